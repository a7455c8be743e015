//! Threaded comment engine: moderation, conversation threading, notification
//! fan-out and a cached Markdown rendering pipeline.

pub mod application;
pub mod config;
pub mod domain;
pub mod infra;
pub(crate) mod util;
