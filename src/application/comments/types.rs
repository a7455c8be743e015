use serde::Serialize;
use thiserror::Error;
use time::OffsetDateTime;

use crate::application::ports::PortError;
use crate::application::repos::RepoError;
use crate::domain::error::DomainError;
use crate::domain::types::CommentStatus;

/// Reasons the moderation pipeline refuses a submission.
#[derive(Debug, Error)]
pub enum ModerationError {
    /// The submission itself is malformed or points somewhere it may not.
    #[error("{0}")]
    Invalid(String),
    /// The submission is well-formed but site policy refuses it.
    #[error("{0}")]
    Rejected(String),
    #[error(transparent)]
    Repo(#[from] RepoError),
}

impl ModerationError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid(message.into())
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected(message.into())
    }
}

#[derive(Debug, Error)]
pub enum CommentError {
    #[error("{0}")]
    Invalid(String),
    #[error("{0}")]
    Rejected(String),
    #[error("comment not found")]
    NotFound,
    #[error("{0} is not configured")]
    NotConfigured(&'static str),
    #[error(transparent)]
    Repo(RepoError),
    #[error(transparent)]
    Port(#[from] PortError),
}

impl CommentError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid(message.into())
    }
}

impl From<DomainError> for CommentError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::Validation { message } => CommentError::Invalid(message),
        }
    }
}

impl From<RepoError> for CommentError {
    fn from(err: RepoError) -> Self {
        match err {
            RepoError::NotFound => CommentError::NotFound,
            other => CommentError::Repo(other),
        }
    }
}

impl From<ModerationError> for CommentError {
    fn from(err: ModerationError) -> Self {
        match err {
            ModerationError::Invalid(message) => CommentError::Invalid(message),
            ModerationError::Rejected(message) => CommentError::Rejected(message),
            ModerationError::Repo(err) => err.into(),
        }
    }
}

/// Identity asserted by an authenticated caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthClaims {
    pub user_id: u64,
}

#[derive(Debug, Clone, Default)]
pub struct CreateCommentCommand {
    pub target_path: String,
    pub target_title: Option<String>,
    /// Public identifier of the structural parent.
    pub parent_id: Option<String>,
    /// Public identifier of the comment shown as replied to.
    pub reply_to_id: Option<String>,
    pub nickname: String,
    pub email: Option<String>,
    pub website: Option<String>,
    pub content: String,
    pub is_anonymous: bool,
    pub allow_notification: bool,
    pub ip_address: String,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateCommentInfoCommand {
    pub nickname: Option<String>,
    pub email: Option<String>,
    pub website: Option<String>,
    pub content: Option<String>,
}

/// How replies under one thread root are listed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyMode {
    /// Chain heads plus their conversations.
    Preview,
    /// Every descendant, newest first.
    Paged(crate::application::pagination::PageRequest),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchOutcome {
    pub succeeded: u64,
    pub failed: u64,
}

/// Public view of a comment.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommentView {
    pub id: String,
    pub target_path: String,
    pub target_title: Option<String>,
    pub parent_id: Option<String>,
    pub reply_to_id: Option<String>,
    /// Display label for "replying to"; absent for top-level comments.
    pub reply_to_nickname: Option<String>,
    pub nickname: String,
    pub email_md5: Option<String>,
    pub website: Option<String>,
    pub ip_location: Option<String>,
    pub content_html: String,
    pub is_admin_author: bool,
    pub is_anonymous: bool,
    #[serde(with = "time::serde::rfc3339::option")]
    pub pinned_at: Option<OffsetDateTime>,
    pub like_count: u32,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// One top-level comment with its reply preview.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThreadItemView {
    #[serde(flatten)]
    pub comment: CommentView,
    pub total_replies: u64,
    pub replies: Vec<CommentView>,
}

/// Administrative view; carries the fields hidden from the public.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdminCommentView {
    #[serde(flatten)]
    pub comment: CommentView,
    pub status: CommentStatus,
    pub email: Option<String>,
    pub ip_address: String,
    pub user_agent: Option<String>,
    pub content: String,
}
