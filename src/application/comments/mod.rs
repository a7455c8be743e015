//! Comment engine: submission moderation, thread assembly, notification
//! fan-out and bundle transfer.

mod commands;
mod graph;
pub mod moderation;
pub mod notify;
mod queries;
mod service;
pub mod thread;
pub mod transfer;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use commands::is_valid_qq_number;
pub(crate) use commands::METRIC_CREATED;
pub use moderation::{ModerationOutcome, ModerationPipeline, Submission};
pub use notify::{
    NotificationChannels, NotificationDispatcher, NotificationJob, NotificationQueue,
    NotifyError, ShutdownMode,
};
pub use service::{CommentCollaborators, CommentLimits, CommentService, UNKNOWN_LOCATION};
pub use thread::{PREVIEW_CHAIN_HEADS, ThreadBuilder, ThreadNode};
pub use transfer::{
    CommentTransfer, ExportBundle, ExportScope, ExportedComment, ImportReport, TransferError,
    bundle_to_zip, parse_bundle,
};
pub use types::{
    AdminCommentView, AuthClaims, BatchOutcome, CommentError, CommentView, CreateCommentCommand,
    ModerationError, ReplyMode, ThreadItemView, UpdateCommentInfoCommand,
};
