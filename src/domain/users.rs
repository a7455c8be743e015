use serde::Serialize;
use time::OffsetDateTime;

use crate::domain::types::ADMIN_GROUP_ID;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserRecord {
    pub id: u64,
    pub nickname: String,
    pub email: Option<String>,
    pub group_id: u64,
    pub created_at: OffsetDateTime,
}

impl UserRecord {
    pub fn is_admin(&self) -> bool {
        self.group_id == ADMIN_GROUP_ID
    }

    /// Exact match against the registered email, ignoring surrounding whitespace.
    pub fn email_matches(&self, candidate: &str) -> bool {
        self.email
            .as_deref()
            .is_some_and(|email| email.trim() == candidate.trim())
    }
}
