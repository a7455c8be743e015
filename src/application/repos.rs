//! Repository traits describing persistence adapters.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use time::OffsetDateTime;
use tokio::sync::broadcast;

use crate::application::pagination::{Page, PageRequest};
use crate::domain::comments::CommentRecord;
use crate::domain::types::CommentStatus;
use crate::domain::users::UserRecord;

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("resource not found")]
    NotFound,
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
    #[error("integrity error: {message}")]
    Integrity { message: String },
    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

impl RepoError {
    pub fn from_persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }
}

/// Everything needed to insert a comment row. Imports carry their own state
/// and timestamps; fresh submissions use the moderation outcome and `now`.
#[derive(Debug, Clone)]
pub struct CreateCommentParams {
    pub target_path: String,
    pub target_title: Option<String>,
    pub parent_id: Option<u64>,
    pub reply_to_id: Option<u64>,
    pub user_id: Option<u64>,
    pub nickname: String,
    pub email: Option<String>,
    pub email_md5: Option<String>,
    pub website: Option<String>,
    pub ip_address: String,
    pub ip_location: Option<String>,
    pub user_agent: Option<String>,
    pub content: String,
    pub content_html: String,
    pub status: CommentStatus,
    pub is_admin_author: bool,
    pub is_anonymous: bool,
    pub allow_notification: bool,
    pub pinned_at: Option<OffsetDateTime>,
    pub like_count: u32,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// Partial administrative edit; `None` leaves the column untouched.
#[derive(Debug, Clone, Default)]
pub struct UpdateCommentInfoParams {
    pub nickname: Option<String>,
    pub email: Option<String>,
    pub email_md5: Option<String>,
    pub website: Option<String>,
    pub content: Option<String>,
    pub content_html: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct CommentQueryFilter {
    pub nickname: Option<String>,
    pub email: Option<String>,
    pub ip_address: Option<String>,
    pub content: Option<String>,
    pub target_path: Option<String>,
    pub status: Option<CommentStatus>,
}

#[async_trait]
pub trait CommentsRepo: Send + Sync {
    async fn create(&self, params: CreateCommentParams) -> Result<CommentRecord, RepoError>;

    async fn find_by_id(&self, id: u64) -> Result<Option<CommentRecord>, RepoError>;

    async fn find_many_by_ids(&self, ids: &[u64]) -> Result<Vec<CommentRecord>, RepoError>;

    /// Every published comment attached to `path`, in no particular order.
    async fn list_published_by_path(&self, path: &str) -> Result<Vec<CommentRecord>, RepoError>;

    /// Global newest-first feed of published comments.
    async fn list_published(&self, page: PageRequest) -> Result<Page<CommentRecord>, RepoError>;

    async fn list_filtered(
        &self,
        filter: &CommentQueryFilter,
        page: PageRequest,
    ) -> Result<Page<CommentRecord>, RepoError>;

    async fn list_all(&self) -> Result<Vec<CommentRecord>, RepoError>;

    async fn update_status(
        &self,
        id: u64,
        status: CommentStatus,
    ) -> Result<CommentRecord, RepoError>;

    async fn set_pinned(
        &self,
        id: u64,
        pinned_at: Option<OffsetDateTime>,
    ) -> Result<CommentRecord, RepoError>;

    /// Adjust the like counter by `delta`, saturating at zero. Returns the new count.
    async fn adjust_likes(&self, id: u64, delta: i32) -> Result<u32, RepoError>;

    async fn update_content(
        &self,
        id: u64,
        content: String,
        content_html: String,
    ) -> Result<CommentRecord, RepoError>;

    async fn update_info(
        &self,
        id: u64,
        params: UpdateCommentInfoParams,
    ) -> Result<CommentRecord, RepoError>;

    /// Rewrite `target_path` for every comment on `old_path`. Returns the affected count.
    async fn update_path(&self, old_path: &str, new_path: &str) -> Result<u64, RepoError>;

    /// Delete the given rows. Returns the number actually removed.
    async fn delete_by_ids(&self, ids: &[u64]) -> Result<u64, RepoError>;
}

#[async_trait]
pub trait UsersRepo: Send + Sync {
    async fn find_by_id(&self, id: u64) -> Result<Option<UserRecord>, RepoError>;

    async fn list_by_group(&self, group_id: u64) -> Result<Vec<UserRecord>, RepoError>;
}

/// Emitted whenever a site setting is written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettingChange {
    pub key: String,
    pub value: String,
}

#[async_trait]
pub trait SettingsSource: Send + Sync {
    async fn get_string(&self, key: &str) -> Option<String>;

    async fn get_bool(&self, key: &str) -> bool {
        self.get_string(key).await.is_some_and(|value| {
            matches!(
                value.trim().to_ascii_lowercase().as_str(),
                "true" | "1" | "yes" | "on"
            )
        })
    }

    fn subscribe(&self) -> broadcast::Receiver<SettingChange>;
}

/// Atomic counters with expiry, used for rate limiting.
#[async_trait]
pub trait CounterRepo: Send + Sync {
    async fn incr(&self, key: &str) -> Result<i64, RepoError>;

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), RepoError>;
}
