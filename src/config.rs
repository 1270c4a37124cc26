use std::time::Duration;

use crate::errors::SyncError;

const DEFAULT_API_BASE_URL: &str = "http://localhost:3000";
const DEFAULT_WS_URL: &str = "ws://localhost:3000/ws";

/// Runtime knobs of the sync engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    pub api_base_url: String,
    pub ws_url: String,
    /// Fixed wait between automatic reconnect attempts.
    pub reconnect_delay: Duration,
    pub reconnect_attempts: u32,
    /// Minimum spacing between two outbound `typing` signals.
    pub typing_debounce: Duration,
    /// Inactivity after which `stop_typing` is emitted and remote typing expires.
    pub typing_quiet_window: Duration,
    pub page_size: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            ws_url: DEFAULT_WS_URL.to_string(),
            reconnect_delay: Duration::from_millis(1000),
            reconnect_attempts: 5,
            typing_debounce: Duration::from_millis(1000),
            typing_quiet_window: Duration::from_millis(2000),
            page_size: 50,
        }
    }
}

impl SyncConfig {
    /// Reads `CHAT_*` environment variables, falling back to the defaults.
    pub fn from_env() -> Result<Self, SyncError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, SyncError> {
        let defaults = Self::default();
        let millis = |key: &str, fallback: Duration| -> Result<Duration, SyncError> {
            match lookup(key) {
                Some(raw) => parse::<u64>(key, &raw).map(Duration::from_millis),
                None => Ok(fallback),
            }
        };

        let config = Self {
            api_base_url: lookup("CHAT_API_BASE_URL").unwrap_or(defaults.api_base_url),
            ws_url: lookup("CHAT_WS_URL").unwrap_or(defaults.ws_url),
            reconnect_delay: millis("CHAT_RECONNECT_DELAY_MS", defaults.reconnect_delay)?,
            reconnect_attempts: match lookup("CHAT_RECONNECT_ATTEMPTS") {
                Some(raw) => parse("CHAT_RECONNECT_ATTEMPTS", &raw)?,
                None => defaults.reconnect_attempts,
            },
            typing_debounce: millis("CHAT_TYPING_DEBOUNCE_MS", defaults.typing_debounce)?,
            typing_quiet_window: millis("CHAT_TYPING_QUIET_MS", defaults.typing_quiet_window)?,
            page_size: match lookup("CHAT_PAGE_SIZE") {
                Some(raw) => parse("CHAT_PAGE_SIZE", &raw)?,
                None => defaults.page_size,
            },
        };

        if config.page_size == 0 {
            return Err(SyncError::Config {
                key: "CHAT_PAGE_SIZE".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        Ok(config)
    }
}

fn parse<T>(key: &str, raw: &str) -> Result<T, SyncError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| SyncError::Config {
        key: key.to_string(),
        message: format!("'{raw}': {e}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn empty_environment_yields_defaults() {
        let config = SyncConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, SyncConfig::default());
        assert_eq!(config.typing_quiet_window, Duration::from_millis(2000));
    }

    #[test]
    fn overrides_are_parsed() {
        let config = SyncConfig::from_lookup(lookup(&[
            ("CHAT_WS_URL", "wss://chat.example.com/ws"),
            ("CHAT_RECONNECT_DELAY_MS", "250"),
            ("CHAT_RECONNECT_ATTEMPTS", "3"),
            ("CHAT_PAGE_SIZE", "20"),
        ]))
        .unwrap();
        assert_eq!(config.ws_url, "wss://chat.example.com/ws");
        assert_eq!(config.reconnect_delay, Duration::from_millis(250));
        assert_eq!(config.reconnect_attempts, 3);
        assert_eq!(config.page_size, 20);
    }

    #[test]
    fn malformed_numbers_name_the_key() {
        let err = SyncConfig::from_lookup(lookup(&[("CHAT_TYPING_QUIET_MS", "soon")])).unwrap_err();
        assert!(matches!(err, SyncError::Config { ref key, .. } if key == "CHAT_TYPING_QUIET_MS"));
    }

    #[test]
    fn zero_page_size_is_rejected() {
        assert!(SyncConfig::from_lookup(lookup(&[("CHAT_PAGE_SIZE", "0")])).is_err());
    }
}
