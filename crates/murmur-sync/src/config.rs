use std::time::Duration;

use crate::error::{Result, SyncError};

pub const DEFAULT_SOCKET_URL: &str = "ws://localhost:4000/socket";
pub const DEFAULT_PRESENCE_TOPIC: &str = "murmur:user_presence";
pub const DEFAULT_TYPING_PREFIX: &str = "typing:";
/// Quiet window shared by both typing signals.
pub const DEFAULT_TYPING_DEBOUNCE: Duration = Duration::from_millis(600);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Endpoint handed to `Transport::connect`.
    pub socket_url: String,
    pub presence_topic: String,
    /// Typing topics are `{typing_prefix}{channel_id}`.
    pub typing_prefix: String,
    pub typing_debounce: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            socket_url: DEFAULT_SOCKET_URL.into(),
            presence_topic: DEFAULT_PRESENCE_TOPIC.into(),
            typing_prefix: DEFAULT_TYPING_PREFIX.into(),
            typing_debounce: DEFAULT_TYPING_DEBOUNCE,
        }
    }
}

impl SyncConfig {
    /// Read `MURMUR_*` variables from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let typing_debounce = match lookup("MURMUR_TYPING_DEBOUNCE_MS") {
            Some(raw) => {
                let ms: u64 = raw.trim().parse().map_err(|_| {
                    SyncError::Config(format!("MURMUR_TYPING_DEBOUNCE_MS is not a number: {raw:?}"))
                })?;
                Duration::from_millis(ms)
            }
            None => defaults.typing_debounce,
        };

        Ok(Self {
            socket_url: lookup("MURMUR_SOCKET_URL").unwrap_or(defaults.socket_url),
            presence_topic: lookup("MURMUR_PRESENCE_TOPIC").unwrap_or(defaults.presence_topic),
            typing_prefix: lookup("MURMUR_TYPING_PREFIX").unwrap_or(defaults.typing_prefix),
            typing_debounce,
        })
    }

    pub fn typing_topic(&self, channel_id: uuid::Uuid) -> String {
        format!("{}{}", self.typing_prefix, channel_id)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        let config = SyncConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config, SyncConfig::default());
        assert_eq!(config.typing_debounce, Duration::from_millis(600));
    }

    #[test]
    fn overrides_are_read() {
        let config = SyncConfig::from_lookup(lookup_from(&[
            ("MURMUR_PRESENCE_TOPIC", "lobby"),
            ("MURMUR_TYPING_DEBOUNCE_MS", "250"),
        ]))
        .unwrap();
        assert_eq!(config.presence_topic, "lobby");
        assert_eq!(config.typing_debounce, Duration::from_millis(250));
        assert_eq!(config.socket_url, DEFAULT_SOCKET_URL);
    }

    #[test]
    fn bad_debounce_is_a_config_error() {
        let err = SyncConfig::from_lookup(lookup_from(&[("MURMUR_TYPING_DEBOUNCE_MS", "soon")]))
            .unwrap_err();
        assert!(matches!(err, SyncError::Config(_)));
    }

    #[test]
    fn typing_topic_is_prefixed() {
        let config = SyncConfig::default();
        let id = uuid::Uuid::nil();
        assert_eq!(
            config.typing_topic(id),
            "typing:00000000-0000-0000-0000-000000000000"
        );
    }
}
