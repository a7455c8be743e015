//! Shared domain enumerations.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommentStatus {
    Published,
    Pending,
}

impl CommentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CommentStatus::Published => "published",
            CommentStatus::Pending => "pending",
        }
    }

    pub fn is_published(self) -> bool {
        matches!(self, CommentStatus::Published)
    }
}

/// Entity families that receive public identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Comment,
    User,
}

impl EntityKind {
    pub(crate) fn tag(self) -> u8 {
        match self {
            EntityKind::Comment => 0x43,
            EntityKind::User => 0x55,
        }
    }
}

/// Administrators are users belonging to this group.
pub const ADMIN_GROUP_ID: u64 = 1;
