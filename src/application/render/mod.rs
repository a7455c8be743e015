//! Comment content rendering.
//!
//! Markdown goes through emoji substitution, diagram-block protection, comrak
//! and an ammonia allow-list, in that order. Results are memoised in two
//! content-addressed caches that are flushed whenever the emoji pack changes.

mod cache;
mod emoji;
mod protect;
mod sanitizer;
mod service;
mod types;

pub use cache::RenderCache;
pub use emoji::{EMOJI_CLASS, EmojiItem, EmojiPack, EmojiPacks, EmojiReplacer, EmojiSource};
pub use protect::DIAGRAM_MARKER_CLASS;
pub use sanitizer::INTERNAL_SCHEME;
pub use service::{ContentRenderer, RenderCacheConfig, spawn_emoji_watcher};
pub use types::RenderError;

pub(crate) use cache::{METRIC_EVICT, METRIC_HIT, METRIC_MISS};
