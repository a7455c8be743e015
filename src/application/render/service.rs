use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::application::repos::SettingsSource;
use crate::application::settings::keys;

use super::cache::RenderCache;
use super::emoji::{EmojiRegistry, EmojiReplacer, EmojiSource};
use super::protect::{PlaceholderStyle, protect};
use super::sanitizer::{build_comment_sanitizer, default_options};

const SOURCE: &str = "application::render::service";

const DEFAULT_CACHE_CAPACITY: NonZeroUsize = match NonZeroUsize::new(1000) {
    Some(value) => value,
    None => NonZeroUsize::MIN,
};

#[derive(Debug, Clone, Copy)]
pub struct RenderCacheConfig {
    pub enabled: bool,
    pub capacity: NonZeroUsize,
    pub ttl: Duration,
}

impl Default for RenderCacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            capacity: DEFAULT_CACHE_CAPACITY,
            ttl: Duration::from_secs(3600),
        }
    }
}

impl From<&crate::config::RenderSettings> for RenderCacheConfig {
    fn from(settings: &crate::config::RenderSettings) -> Self {
        Self {
            enabled: settings.cache_enabled,
            capacity: settings.cache_capacity,
            ttl: settings.cache_ttl,
        }
    }
}

/// Markdown and HTML rendering for user-submitted comments.
///
/// Output is a pure function of the input and the active emoji pack; the two
/// caches only ever short-circuit work that would produce the same string.
pub struct ContentRenderer {
    options: comrak::Options<'static>,
    sanitizer: ammonia::Builder<'static>,
    emoji: EmojiRegistry,
    markdown_cache: Option<RenderCache>,
    sanitize_cache: Option<RenderCache>,
}

impl ContentRenderer {
    pub fn new(config: RenderCacheConfig) -> Self {
        let cache = |name| {
            config
                .enabled
                .then(|| RenderCache::new(name, config.capacity, config.ttl))
        };

        Self {
            options: default_options(),
            sanitizer: build_comment_sanitizer(),
            emoji: EmojiRegistry::new(),
            markdown_cache: cache("markdown"),
            sanitize_cache: cache("sanitize"),
        }
    }

    /// Markdown with emoji shorthand to sanitized HTML.
    pub fn to_html(&self, markdown: &str) -> String {
        if let Some(hit) = self.markdown_cache.as_ref().and_then(|c| c.get(markdown)) {
            return hit;
        }

        // Read before the replacer: a swap after this point clears the cache
        // and bumps the generation, so this render is not stored.
        let generation = self.markdown_cache.as_ref().map(RenderCache::generation);
        let substituted = self.emoji.replace(markdown);
        let (protected, blocks) = protect(&substituted, PlaceholderStyle::Markdown);
        let rendered = comrak::markdown_to_html(&protected, &self.options);
        let cleaned = self.sanitizer.clean(&rendered).to_string();
        let html = blocks.restore(cleaned);

        if let (Some(cache), Some(generation)) = (&self.markdown_cache, generation) {
            cache.set_if_current(markdown, html.clone(), generation);
        }
        html
    }

    /// Sanitize already-rendered HTML, keeping diagram blocks intact.
    pub fn sanitize_html(&self, html: &str) -> String {
        if let Some(hit) = self.sanitize_cache.as_ref().and_then(|c| c.get(html)) {
            return hit;
        }

        let generation = self.sanitize_cache.as_ref().map(RenderCache::generation);
        let (protected, blocks) = protect(html, PlaceholderStyle::Html);
        let cleaned = self.sanitizer.clean(&protected).to_string();
        let sanitized = blocks.restore(cleaned);

        if let (Some(cache), Some(generation)) = (&self.sanitize_cache, generation) {
            cache.set_if_current(html, sanitized.clone(), generation);
        }
        sanitized
    }

    pub fn invalidate_caches(&self) {
        for cache in [&self.markdown_cache, &self.sanitize_cache]
            .into_iter()
            .flatten()
        {
            cache.clear();
        }
    }

    pub fn emoji_enabled(&self) -> bool {
        self.emoji.is_active()
    }

    /// Install a replacer directly and drop cached output built with the old one.
    pub fn install_emoji(&self, replacer: Option<EmojiReplacer>) {
        self.emoji.store(replacer);
        self.invalidate_caches();
    }

    /// Load the pack at `url` and swap it in. An empty url or any failure
    /// disables substitution; neither case is reported to the caller.
    pub async fn refresh_emoji(&self, source: &dyn EmojiSource, url: &str) {
        let url = url.trim();
        if url.is_empty() {
            debug!(
                target = SOURCE,
                op = "refresh_emoji",
                result = "disabled",
                "Emoji pack url empty"
            );
            self.install_emoji(None);
            return;
        }

        let replacer = match source.fetch(url).await {
            Ok(packs) => EmojiReplacer::from_packs(&packs),
            Err(err) => Err(err),
        };

        match replacer {
            Ok(replacer) => {
                info!(
                    target = SOURCE,
                    op = "refresh_emoji",
                    result = "ok",
                    url,
                    emoji = replacer.as_ref().map_or(0, EmojiReplacer::len),
                    "Emoji pack loaded"
                );
                self.install_emoji(replacer);
            }
            Err(err) => {
                warn!(
                    target = SOURCE,
                    op = "refresh_emoji",
                    result = "error",
                    url,
                    error = %err,
                    "Emoji pack refresh failed; substitution disabled"
                );
                self.install_emoji(None);
            }
        }
    }
}

/// Load the configured emoji pack, then reload it whenever the setting changes.
pub fn spawn_emoji_watcher(
    renderer: Arc<ContentRenderer>,
    settings: Arc<dyn SettingsSource>,
    source: Arc<dyn EmojiSource>,
) -> JoinHandle<()> {
    let mut changes = settings.subscribe();

    tokio::spawn(async move {
        let initial = settings
            .get_string(keys::EMOJI_PACK_URL)
            .await
            .unwrap_or_default();
        renderer.refresh_emoji(source.as_ref(), &initial).await;

        loop {
            match changes.recv().await {
                Ok(change) if change.key == keys::EMOJI_PACK_URL => {
                    renderer.refresh_emoji(source.as_ref(), &change.value).await;
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    warn!(
                        target = SOURCE,
                        op = "emoji_watcher",
                        result = "lagged",
                        skipped,
                        "Settings stream lagged; reloading emoji pack"
                    );
                    let current = settings
                        .get_string(keys::EMOJI_PACK_URL)
                        .await
                        .unwrap_or_default();
                    renderer.refresh_emoji(source.as_ref(), &current).await;
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}
