//! Outbound collaborators consumed by the comment engine.
//!
//! Each trait is a narrow seam over an external system. Implementations live in
//! `infra`; tests substitute in-process stubs.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::comments::CommentRecord;

#[derive(Debug, Error)]
pub enum PortError {
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("unexpected response: {0}")]
    Response(String),
    #[error("collaborator not configured: {0}")]
    NotConfigured(&'static str),
}

impl PortError {
    pub fn transport(err: impl std::fmt::Display) -> Self {
        Self::Transport(err.to_string())
    }

    pub fn response(message: impl Into<String>) -> Self {
        Self::Response(message.into())
    }
}

/// Verdict returned by the external content classifier.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Classification {
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub explanation: String,
    #[serde(default)]
    pub is_violation: bool,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub risk_level: String,
}

#[async_trait]
pub trait ContentClassifier: Send + Sync {
    async fn classify(&self, endpoint: &str, text: &str) -> Result<Classification, PortError>;
}

#[async_trait]
pub trait IpLocator: Send + Sync {
    async fn locate(&self, ip: &str) -> Result<String, PortError>;
}

/// Hands a published comment to the external mail task broker.
#[async_trait]
pub trait EmailDispatcher: Send + Sync {
    async fn dispatch_comment_email(&self, comment_id: u64) -> Result<(), PortError>;
}

/// Instant push (webhook / bark style).
#[async_trait]
pub trait PushChannel: Send + Sync {
    async fn send_comment_notification(
        &self,
        comment: &CommentRecord,
        parent: Option<&CommentRecord>,
    ) -> Result<(), PortError>;
}

/// In-app notification hook. Absent unless an extension provides one.
#[async_trait]
pub trait InAppNotifier: Send + Sync {
    async fn notify_admin(&self, comment: &CommentRecord) -> Result<(), PortError>;

    async fn notify_reply(
        &self,
        comment: &CommentRecord,
        parent: &CommentRecord,
    ) -> Result<(), PortError>;
}

/// Per-user notification preference lookup.
#[async_trait]
pub trait NotificationPreferences: Send + Sync {
    async fn allows_comment_notifications(&self, user_id: u64) -> Result<bool, PortError>;
}

/// Resolves `anzhiyu://file/<id>` references to time-limited signed URLs.
#[async_trait]
pub trait FileUrlResolver: Send + Sync {
    async fn signed_url(&self, file_id: &str) -> Result<String, PortError>;
}

/// Public profile behind a QQ number, used to prefill the comment form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QqProfile {
    pub qq: String,
    #[serde(default)]
    pub nick: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub avatar: String,
}

#[async_trait]
pub trait QqProfileLookup: Send + Sync {
    async fn lookup(&self, qq: &str) -> Result<QqProfile, PortError>;
}
