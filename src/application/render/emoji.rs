//! Emoji shorthand substitution.
//!
//! Packs are fetched as OwO-style JSON and compiled into a single multi-pattern
//! replacer. The active replacer is an immutable value behind an atomically
//! swapped pointer, so rendering never waits on a refresh.

use std::borrow::Cow;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use aho_corasick::{AhoCorasick, MatchKind};
use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use serde::Deserialize;

use super::types::RenderError;

/// CSS class stamped onto every emoji `<img>`.
pub const EMOJI_CLASS: &str = "anzhiyu-owo-emotion";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EmojiPack {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub container: Vec<EmojiItem>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmojiItem {
    pub icon: String,
    pub text: String,
}

/// Named packs, ordered by name so the compiled replacer is deterministic.
pub type EmojiPacks = BTreeMap<String, EmojiPack>;

/// Fetches the configured emoji pack document.
#[async_trait]
pub trait EmojiSource: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<EmojiPacks, RenderError>;
}

pub struct EmojiReplacer {
    matcher: AhoCorasick,
    replacements: Vec<String>,
}

impl EmojiReplacer {
    /// Compile every `(icon, text)` pair into `:text:` → annotated icon.
    /// Returns `None` when the packs contain nothing usable.
    pub fn from_packs(packs: &EmojiPacks) -> Result<Option<Self>, RenderError> {
        let mut seen = HashSet::new();
        let mut patterns = Vec::new();
        let mut replacements = Vec::new();

        for item in packs.values().flat_map(|pack| pack.container.iter()) {
            let name = item.text.trim();
            if name.is_empty() || item.icon.trim().is_empty() || !seen.insert(name.to_string()) {
                continue;
            }
            patterns.push(format!(":{name}:"));
            replacements.push(annotate_icon(&item.icon, name));
        }

        if patterns.is_empty() {
            return Ok(None);
        }

        let matcher = AhoCorasick::builder()
            .match_kind(MatchKind::LeftmostLongest)
            .build(&patterns)
            .map_err(|err| RenderError::emoji_pack(err.to_string()))?;

        Ok(Some(Self {
            matcher,
            replacements,
        }))
    }

    pub fn replace<'a>(&self, content: &'a str) -> Cow<'a, str> {
        if !self.matcher.is_match(content) {
            return Cow::Borrowed(content);
        }
        Cow::Owned(self.matcher.replace_all(content, self.replacements.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.replacements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.replacements.is_empty()
    }
}

/// Holder for the currently active replacer.
pub struct EmojiRegistry {
    current: ArcSwapOption<EmojiReplacer>,
}

impl EmojiRegistry {
    pub fn new() -> Self {
        Self {
            current: ArcSwapOption::empty(),
        }
    }

    pub fn replace<'a>(&self, content: &'a str) -> Cow<'a, str> {
        let guard = self.current.load();
        match guard.as_ref() {
            Some(replacer) => replacer.replace(content),
            None => Cow::Borrowed(content),
        }
    }

    /// Swap in a new replacer; `None` disables substitution.
    pub fn store(&self, replacer: Option<EmojiReplacer>) {
        self.current.store(replacer.map(Arc::new));
    }

    pub fn is_active(&self) -> bool {
        self.current.load().is_some()
    }
}

impl Default for EmojiRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn annotate_icon(icon: &str, name: &str) -> String {
    let attributes = format!(
        "<img class=\"{EMOJI_CLASS}\" alt=\"{}\"",
        escape_attribute(name)
    );
    icon.replacen("<img", &attributes, 1)
}

fn escape_attribute(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '"' => escaped.push_str("&quot;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            other => escaped.push(other),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packs() -> EmojiPacks {
        serde_json::from_str(
            r#"{
                "Blobs": {
                    "type": "image",
                    "container": [
                        {"icon": "<img src=\"https://cdn.example.com/wave.png\">", "text": "wave"},
                        {"icon": "<img src=\"https://cdn.example.com/wave2.png\">", "text": "wave2"},
                        {"icon": "<img src=\"https://cdn.example.com/dup.png\">", "text": "wave"}
                    ]
                },
                "Text": {
                    "type": "emoticon",
                    "container": [{"icon": "(＾▽＾)", "text": "happy"}]
                }
            }"#,
        )
        .expect("valid pack json")
    }

    #[test]
    fn replaces_shorthand_with_annotated_icon() {
        let replacer = EmojiReplacer::from_packs(&packs()).unwrap().unwrap();
        let output = replacer.replace("hi :wave:");
        assert_eq!(
            output,
            "hi <img class=\"anzhiyu-owo-emotion\" alt=\"wave\" src=\"https://cdn.example.com/wave.png\">"
        );
    }

    #[test]
    fn first_definition_wins_and_longest_match_applies() {
        let replacer = EmojiReplacer::from_packs(&packs()).unwrap().unwrap();
        assert_eq!(replacer.len(), 3);
        let output = replacer.replace(":wave2:");
        assert!(output.contains("wave2.png"));
        assert!(!output.contains("dup.png"));
    }

    #[test]
    fn text_emoticons_pass_through_unannotated() {
        let replacer = EmojiReplacer::from_packs(&packs()).unwrap().unwrap();
        assert_eq!(replacer.replace("so :happy:"), "so (＾▽＾)");
    }

    #[test]
    fn content_without_tokens_is_borrowed() {
        let replacer = EmojiReplacer::from_packs(&packs()).unwrap().unwrap();
        assert!(matches!(replacer.replace("plain text"), Cow::Borrowed(_)));
    }

    #[test]
    fn empty_packs_compile_to_none() {
        assert!(
            EmojiReplacer::from_packs(&EmojiPacks::new())
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn registry_swaps_replacers() {
        let registry = EmojiRegistry::new();
        assert_eq!(registry.replace(":wave:"), ":wave:");

        registry.store(EmojiReplacer::from_packs(&packs()).unwrap());
        assert!(registry.is_active());
        assert!(registry.replace(":wave:").contains(EMOJI_CLASS));

        registry.store(None);
        assert_eq!(registry.replace(":wave:"), ":wave:");
    }
}
