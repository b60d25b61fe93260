//! Service configuration loaded from the environment (and `.env` via dotenv).

use std::time::Duration;
use thiserror::Error;

pub const DEMO_KEY: &str = "DEMO_KEY";
const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_IMAGE_MODEL: &str = "gemini-2.5-flash-image-preview";
const MAX_INITIAL_STYLES: usize = 8;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{key} must be {expected}, got {value:?}")]
    Invalid { key: &'static str, expected: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct StudioConfig {
    pub api_key: String,
    pub api_base: String,
    pub image_model: String,
    pub request_timeout: Duration,
    /// Number of candidate styles generated from the captured photo.
    pub initial_style_count: usize,
    pub port: u16,
}

impl Default for StudioConfig {
    fn default() -> Self {
        Self {
            api_key: DEMO_KEY.to_string(),
            api_base: DEFAULT_API_BASE.to_string(),
            image_model: DEFAULT_IMAGE_MODEL.to_string(),
            request_timeout: Duration::from_secs(60),
            initial_style_count: 4,
            port: 8080,
        }
    }
}

impl StudioConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let timeout_secs = match lookup("GEMINI_TIMEOUT_SECS") {
            Some(v) => v.parse::<u64>().ok().filter(|s| *s > 0).ok_or(ConfigError::Invalid {
                key: "GEMINI_TIMEOUT_SECS",
                expected: "a positive number of seconds",
                value: v,
            })?,
            None => defaults.request_timeout.as_secs(),
        };

        let initial_style_count = match lookup("STUDIO_INITIAL_STYLES") {
            Some(v) => v
                .parse::<usize>()
                .ok()
                .filter(|n| (1..=MAX_INITIAL_STYLES).contains(n))
                .ok_or(ConfigError::Invalid {
                    key: "STUDIO_INITIAL_STYLES",
                    expected: "between 1 and 8",
                    value: v,
                })?,
            None => defaults.initial_style_count,
        };

        let port = match lookup("PORT") {
            Some(v) => v.parse::<u16>().map_err(|_| ConfigError::Invalid {
                key: "PORT",
                expected: "a TCP port",
                value: v,
            })?,
            None => defaults.port,
        };

        Ok(Self {
            api_key: lookup("GEMINI_API_KEY").filter(|k| !k.is_empty()).unwrap_or(defaults.api_key),
            api_base: lookup("GEMINI_API_BASE").unwrap_or(defaults.api_base),
            image_model: lookup("GEMINI_IMAGE_MODEL").unwrap_or(defaults.image_model),
            request_timeout: Duration::from_secs(timeout_secs),
            initial_style_count,
            port,
        })
    }

    pub fn is_demo(&self) -> bool {
        self.api_key == DEMO_KEY
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn defaults_to_demo_mode_with_four_styles() {
        let cfg = StudioConfig::from_lookup(lookup_from(&[])).unwrap();
        assert!(cfg.is_demo());
        assert_eq!(cfg.initial_style_count, 4);
        assert_eq!(cfg.port, 8080);
    }

    #[test]
    fn reads_overrides() {
        let cfg = StudioConfig::from_lookup(lookup_from(&[
            ("GEMINI_API_KEY", "abc"),
            ("STUDIO_INITIAL_STYLES", "6"),
            ("GEMINI_TIMEOUT_SECS", "15"),
            ("PORT", "9000"),
        ]))
        .unwrap();
        assert!(!cfg.is_demo());
        assert_eq!(cfg.initial_style_count, 6);
        assert_eq!(cfg.request_timeout, Duration::from_secs(15));
        assert_eq!(cfg.port, 9000);
    }

    #[test]
    fn rejects_out_of_range_style_count() {
        let err = StudioConfig::from_lookup(lookup_from(&[("STUDIO_INITIAL_STYLES", "0")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "STUDIO_INITIAL_STYLES", .. }));
        assert!(StudioConfig::from_lookup(lookup_from(&[("STUDIO_INITIAL_STYLES", "12")])).is_err());
        assert!(StudioConfig::from_lookup(lookup_from(&[("PORT", "http")])).is_err());
    }
}
