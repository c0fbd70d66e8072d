// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::accumulator::HAS_SENT_KEY;
use crate::error::Error;
use std::env;

/// Vitals required before a flush when the caller does not provide a list.
pub const DEFAULT_REQUIRED_VITALS: [&str; 11] = [
    "cls",
    "fcp",
    "fid",
    "fp",
    "lcp",
    "navigationTiming",
    "navigatorInformation",
    "networkInformation",
    "storageEstimate",
    "tbt",
    "ttfb",
];

const EVENT_PATH: &str = "/catch/event";
const VITALS_PATH: &str = "/catch/vitals";

/// User supplied options. Only `base_url` and `release` are mandatory.
#[derive(Debug, Clone, Default)]
pub struct Options {
    pub base_url: String,
    pub release: String,
    pub log_events: Option<bool>,
    pub capture_device_info: Option<bool>,
    pub disable_web_vitals: Option<bool>,
    pub disable_error: Option<bool>,
    pub disable_unhandled_rejection: Option<bool>,
    /// Replaces the default list entirely when set.
    pub required_vitals: Option<Vec<String>>,
    pub https_proxy: Option<String>,
}

impl Options {
    pub fn new(base_url: impl Into<String>, release: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            release: release.into(),
            ..Default::default()
        }
    }
}

/// Agent configuration, immutable once the agent is constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Collector root, without a trailing slash
    pub base_url: String,
    /// Release identifier, versions the vitals send gate
    pub release: String,
    /// Log internal agent actions at info level
    pub log_events: bool,
    pub capture_device_info: bool,
    pub disable_web_vitals: bool,
    pub disable_error: bool,
    pub disable_unhandled_rejection: bool,
    pub required_vitals: Vec<String>,
    /// HTTPS proxy used by the HTTP transport
    pub https_proxy: Option<String>,
}

impl Config {
    /// Applies defaults to `options` and validates the result.
    pub fn new(options: Options) -> Result<Self, Error> {
        let required_vitals = options.required_vitals.unwrap_or_else(|| {
            DEFAULT_REQUIRED_VITALS
                .iter()
                .map(|name| name.to_string())
                .collect()
        });

        let config = Self {
            base_url: options.base_url.trim().trim_end_matches('/').to_string(),
            release: options.release,
            log_events: options.log_events.unwrap_or(false),
            capture_device_info: options.capture_device_info.unwrap_or(true),
            disable_web_vitals: options.disable_web_vitals.unwrap_or(false),
            disable_error: options.disable_error.unwrap_or(false),
            disable_unhandled_rejection: options.disable_unhandled_rejection.unwrap_or(false),
            required_vitals,
            https_proxy: options.https_proxy,
        };

        config.validate()?;
        Ok(config)
    }

    /// Create configuration from `BUG_CATCH_*` environment variables
    pub fn from_env() -> Result<Self, Error> {
        let base_url = env::var("BUG_CATCH_BASE_URL").map_err(|_| {
            Error::InvalidConfig("BUG_CATCH_BASE_URL environment variable is not set".to_string())
        })?;
        let release = env::var("BUG_CATCH_RELEASE").map_err(|_| {
            Error::InvalidConfig("BUG_CATCH_RELEASE environment variable is not set".to_string())
        })?;

        let required_vitals = env::var("BUG_CATCH_REQUIRED_VITALS").ok().map(|val| {
            val.split(',')
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(str::to_string)
                .collect::<Vec<String>>()
        });

        let https_proxy = env::var("BUG_CATCH_HTTPS_PROXY")
            .or_else(|_| env::var("HTTPS_PROXY"))
            .ok();

        Self::new(Options {
            base_url,
            release,
            log_events: env_flag("BUG_CATCH_LOG_EVENTS"),
            capture_device_info: env_flag("BUG_CATCH_CAPTURE_DEVICE_INFO"),
            disable_web_vitals: env_flag("BUG_CATCH_DISABLE_WEB_VITALS"),
            disable_error: env_flag("BUG_CATCH_DISABLE_ERROR"),
            disable_unhandled_rejection: env_flag("BUG_CATCH_DISABLE_UNHANDLED_REJECTION"),
            required_vitals,
            https_proxy,
        })
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), Error> {
        if self.release.trim().is_empty() {
            return Err(Error::InvalidConfig(
                "release cannot be empty".to_string(),
            ));
        }

        match reqwest::Url::parse(&self.base_url) {
            Ok(url) if url.scheme() == "http" || url.scheme() == "https" => {}
            Ok(url) => {
                return Err(Error::InvalidConfig(format!(
                    "base URL '{}' has unsupported scheme '{}'",
                    self.base_url,
                    url.scheme()
                )));
            }
            Err(e) => {
                return Err(Error::InvalidConfig(format!(
                    "base URL '{}' is not a valid URL: {}",
                    self.base_url, e
                )));
            }
        }

        if self.required_vitals.is_empty() {
            return Err(Error::InvalidConfig(
                "required vitals cannot be empty".to_string(),
            ));
        }

        if self.required_vitals.iter().any(|name| name == HAS_SENT_KEY) {
            return Err(Error::InvalidConfig(format!(
                "'{HAS_SENT_KEY}' is reserved and cannot be a required vital"
            )));
        }

        Ok(())
    }

    pub fn event_url(&self) -> String {
        format!("{}{}", self.base_url, EVENT_PATH)
    }

    pub fn vitals_url(&self) -> String {
        format!("{}{}", self.base_url, VITALS_PATH)
    }
}

// Anything but a case-insensitive "false" counts as set.
fn env_flag(name: &str) -> Option<bool> {
    env::var(name)
        .ok()
        .map(|val| val.trim().to_lowercase() != "false")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const ENV_VARS: [&str; 10] = [
        "BUG_CATCH_BASE_URL",
        "BUG_CATCH_RELEASE",
        "BUG_CATCH_LOG_EVENTS",
        "BUG_CATCH_CAPTURE_DEVICE_INFO",
        "BUG_CATCH_DISABLE_WEB_VITALS",
        "BUG_CATCH_DISABLE_ERROR",
        "BUG_CATCH_DISABLE_UNHANDLED_REJECTION",
        "BUG_CATCH_REQUIRED_VITALS",
        "BUG_CATCH_HTTPS_PROXY",
        "HTTPS_PROXY",
    ];

    fn clear_env() {
        for var in ENV_VARS {
            env::remove_var(var);
        }
    }

    #[test]
    fn test_defaults_applied() {
        let config = Config::new(Options::new("https://x.test", "r1")).expect("valid config");
        assert!(!config.log_events);
        assert!(config.capture_device_info);
        assert!(!config.disable_web_vitals);
        assert!(!config.disable_error);
        assert!(!config.disable_unhandled_rejection);
        assert_eq!(config.required_vitals.len(), 11);
        assert_eq!(config.required_vitals[0], "cls");
        assert_eq!(config.required_vitals[10], "ttfb");
    }

    #[test]
    fn test_required_vitals_override_replaces_defaults() {
        let config = Config::new(Options {
            required_vitals: Some(vec!["fcp".to_string(), "lcp".to_string()]),
            ..Options::new("https://x.test", "r1")
        })
        .expect("valid config");
        assert_eq!(config.required_vitals, vec!["fcp", "lcp"]);
    }

    #[test]
    fn test_endpoints_trim_trailing_slash() {
        let config = Config::new(Options::new("https://x.test/api/", "r1")).expect("valid config");
        assert_eq!(config.event_url(), "https://x.test/api/catch/event");
        assert_eq!(config.vitals_url(), "https://x.test/api/catch/vitals");
    }

    #[test]
    fn test_validate_empty_release() {
        assert!(Config::new(Options::new("https://x.test", "  ")).is_err());
    }

    #[test]
    fn test_validate_bad_base_url() {
        assert!(Config::new(Options::new("not a url", "r1")).is_err());
        assert!(Config::new(Options::new("ftp://x.test", "r1")).is_err());
    }

    #[test]
    fn test_validate_empty_required_vitals() {
        let result = Config::new(Options {
            required_vitals: Some(Vec::new()),
            ..Options::new("https://x.test", "r1")
        });
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_validate_reserved_required_vital() {
        let result = Config::new(Options {
            required_vitals: Some(vec!["fcp".to_string(), "hasSent".to_string()]),
            ..Options::new("https://x.test", "r1")
        });
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[test]
    #[serial]
    fn test_from_env() {
        clear_env();
        env::set_var("BUG_CATCH_BASE_URL", "http://collector.local:8080");
        env::set_var("BUG_CATCH_RELEASE", "2.3.1");
        env::set_var("BUG_CATCH_LOG_EVENTS", "true");
        env::set_var("BUG_CATCH_CAPTURE_DEVICE_INFO", "FALSE");
        env::set_var("BUG_CATCH_REQUIRED_VITALS", "fcp, lcp,,ttfb");
        env::set_var("HTTPS_PROXY", "http://proxy.local:3128");

        let config = Config::from_env().expect("valid config");
        assert_eq!(config.base_url, "http://collector.local:8080");
        assert_eq!(config.release, "2.3.1");
        assert!(config.log_events);
        assert!(!config.capture_device_info);
        assert!(!config.disable_error);
        assert_eq!(config.required_vitals, vec!["fcp", "lcp", "ttfb"]);
        assert_eq!(config.https_proxy.as_deref(), Some("http://proxy.local:3128"));
        clear_env();
    }

    #[test]
    #[serial]
    fn test_from_env_missing_release() {
        clear_env();
        env::set_var("BUG_CATCH_BASE_URL", "http://collector.local");
        assert!(matches!(Config::from_env(), Err(Error::InvalidConfig(_))));
        clear_env();
    }
}
