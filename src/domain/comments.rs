//! Comment entity and the invariants shared by every layer that touches it.

use serde::Serialize;
use time::OffsetDateTime;
use url::Url;

use crate::domain::{error::DomainError, types::CommentStatus};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommentRecord {
    pub id: u64,
    pub target_path: String,
    pub target_title: Option<String>,
    /// Structural parent: the comment actually replied to at submission time.
    pub parent_id: Option<u64>,
    /// Conversation pointer used for display; see [`CommentRecord::reply_target_id`].
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
    /// Persisted snapshot; views re-render from `content`.
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

impl CommentRecord {
    pub fn is_top_level(&self) -> bool {
        self.parent_id.is_none()
    }

    pub fn is_pinned(&self) -> bool {
        self.pinned_at.is_some()
    }

    /// Comment this one is displayed as replying to.
    ///
    /// Legacy rows were written without `reply_to_id`; for those the structural
    /// parent doubles as the conversational target.
    pub fn reply_target_id(&self) -> Option<u64> {
        self.reply_to_id.or(self.parent_id)
    }

    pub fn email_eq(&self, other: Option<&str>) -> bool {
        match (self.email.as_deref(), other) {
            (Some(left), Some(right)) => left.trim().eq_ignore_ascii_case(right.trim()),
            _ => false,
        }
    }

    pub fn has_email(&self) -> bool {
        self.email.as_deref().is_some_and(|email| !email.trim().is_empty())
    }
}

/// Lowercase hex MD5 of the normalised email, used for avatar and QQ lookups.
pub fn email_digest(email: &str) -> String {
    let normalized = email.trim().to_lowercase();
    format!("{:x}", md5::compute(normalized.as_bytes()))
}

pub fn validate_content(content: &str, max_chars: usize) -> Result<(), DomainError> {
    let length = content.trim().chars().count();
    if length == 0 {
        return Err(DomainError::validation("comment content must not be empty"));
    }
    if length > max_chars {
        return Err(DomainError::validation(format!(
            "comment content exceeds {max_chars} characters"
        )));
    }
    Ok(())
}

pub fn validate_nickname(nickname: &str, max_chars: usize) -> Result<(), DomainError> {
    let length = nickname.trim().chars().count();
    if length == 0 {
        return Err(DomainError::validation("nickname must not be empty"));
    }
    if length > max_chars {
        return Err(DomainError::validation(format!(
            "nickname exceeds {max_chars} characters"
        )));
    }
    Ok(())
}

pub fn validate_email(email: &str) -> Result<(), DomainError> {
    let trimmed = email.trim();
    let valid = match trimmed.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.is_empty()
                && !domain.contains('@')
                && !trimmed.chars().any(char::is_whitespace)
        }
        None => false,
    };

    if valid {
        Ok(())
    } else {
        Err(DomainError::validation(format!("`{trimmed}` is not a valid email")))
    }
}

pub fn validate_website(website: &str) -> Result<(), DomainError> {
    let parsed = Url::parse(website.trim())
        .map_err(|err| DomainError::validation(format!("website is not a valid URL: {err}")))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(DomainError::validation(format!(
            "website scheme `{other}` is not allowed"
        ))),
    }
}
