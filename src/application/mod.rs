//! Application services: comment workflows, rendering and the ports they drive.

pub mod comments;
pub mod error;
pub mod pagination;
pub mod ports;
pub mod render;
pub mod repos;
pub mod settings;
