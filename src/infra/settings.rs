use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::debug;

use crate::application::repos::{SettingChange, SettingsSource};
use crate::util::lock::{rw_read, rw_write};

const SOURCE: &str = "infra::settings";
const CHANGE_CHANNEL_CAPACITY: usize = 64;

/// Site settings held in process. Every write is broadcast to subscribers.
pub struct InMemorySettings {
    values: RwLock<HashMap<String, String>>,
    changes: broadcast::Sender<SettingChange>,
}

impl InMemorySettings {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            values: RwLock::new(HashMap::new()),
            changes,
        }
    }

    pub fn with_values<K, V>(values: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        let settings = Self::new();
        {
            let mut map = rw_write(&settings.values, SOURCE, "with_values");
            for (key, value) in values {
                map.insert(key.into(), value.into());
            }
        }
        settings
    }

    pub fn set(&self, key: impl Into<String>, value: impl Into<String>) {
        let change = SettingChange {
            key: key.into(),
            value: value.into(),
        };
        rw_write(&self.values, SOURCE, "set").insert(change.key.clone(), change.value.clone());

        // No receivers is fine; nobody is watching yet.
        if self.changes.send(change).is_err() {
            debug!(
                target = SOURCE,
                op = "set",
                result = "no_subscribers",
                "Setting change not observed"
            );
        }
    }
}

impl Default for InMemorySettings {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SettingsSource for InMemorySettings {
    async fn get_string(&self, key: &str) -> Option<String> {
        rw_read(&self.values, SOURCE, "get_string").get(key).cloned()
    }

    fn subscribe(&self) -> broadcast::Receiver<SettingChange> {
        self.changes.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::settings::keys;

    #[tokio::test]
    async fn writes_are_visible_and_broadcast() {
        let settings = InMemorySettings::with_values([(keys::NOTIFY_ADMIN, "true")]);
        assert!(settings.get_bool(keys::NOTIFY_ADMIN).await);

        let mut changes = settings.subscribe();
        settings.set(keys::EMOJI_PACK_URL, "https://example.com/owo.json");

        let change = changes.recv().await.unwrap();
        assert_eq!(change.key, keys::EMOJI_PACK_URL);
        assert_eq!(
            settings.get_string(keys::EMOJI_PACK_URL).await.as_deref(),
            Some("https://example.com/owo.json")
        );
    }

    #[tokio::test]
    async fn missing_keys_read_as_false() {
        let settings = InMemorySettings::new();
        assert_eq!(settings.get_string("nope").await, None);
        assert!(!settings.get_bool("nope").await);
    }
}
