//! Configuration for the sync engine.
//!
//! Read from the `[sync]` table of `$XDG_CONFIG_HOME/calview/calview.toml`.
//! A missing file is not an error: defaults apply, then environment
//! overrides.

use crate::projector::DayZone;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::{env, fs, path::PathBuf, time::Duration};
use thiserror::Error;
use url::Url;

const CONFIG_NAMESPACE: &str = "calview";
const CONFIG_FILENAME: &str = "calview.toml";

pub const ENV_BACKEND_URL: &str = "CALVIEW_BACKEND_URL";
pub const ENV_USER_EMAIL: &str = "CALVIEW_USER_EMAIL";

/// Parse a backend URL, adding the trailing `/` that relative endpoint
/// paths need to join under its last segment.
pub fn backend_base_url(raw: &str) -> Result<Url, url::ParseError> {
    let trimmed = raw.trim();
    if trimmed.ends_with('/') {
        Url::parse(trimmed)
    } else {
        Url::parse(&format!("{}/", trimmed))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Base URL of the calendar backend, e.g. `http://localhost:8000/auth`
    #[serde(default = "default_backend_url")]
    pub backend_url: String,

    /// Signed-in user; every backend call is keyed by this address
    #[serde(default)]
    pub user_email: Option<String>,

    /// Calendar the event listing starts scoped to
    #[serde(default = "default_calendar_id")]
    pub calendar_id: String,

    /// Background polling period in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// IANA zone (e.g. "Asia/Kolkata") the schedule is grouped in, also sent
    /// along with created events
    #[serde(default)]
    pub timezone: Option<String>,
}

fn default_backend_url() -> String {
    "http://localhost:8000/auth".to_string()
}

fn default_calendar_id() -> String {
    "primary".to_string()
}

fn default_poll_interval_ms() -> u64 {
    2000
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            backend_url: default_backend_url(),
            user_email: None,
            calendar_id: default_calendar_id(),
            poll_interval_ms: default_poll_interval_ms(),
            request_timeout_secs: default_request_timeout_secs(),
            timezone: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    sync: SyncConfig,
}

#[derive(Debug, Clone)]
pub struct ConfigLoadResult {
    pub config: SyncConfig,
    /// File the config came from, `None` when only defaults applied.
    pub path: Option<PathBuf>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unable to determine configuration directory via XDG environment variables")]
    MissingConfigDir,
    #[error("failed to read config file at {path:?}: {source}")]
    Io {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },
    #[error("failed to parse config file at {path:?}: {source}")]
    Parse {
        #[source]
        source: toml::de::Error,
        path: PathBuf,
    },
    #[error("invalid backend_url '{url}': {source}")]
    InvalidBackendUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("poll_interval_ms must be greater than zero")]
    InvalidPollInterval,
    #[error("unknown timezone '{name}': {reason}")]
    InvalidTimezone { name: String, reason: String },
}

impl SyncConfig {
    /// Parse the `[sync]` table out of a full config document.
    pub fn from_toml_str(text: &str) -> Result<Self, toml::de::Error> {
        let file: ConfigFile = toml::from_str(text)?;
        Ok(file.sync)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// The backend URL, normalized to end with `/` so endpoints join under it.
    pub fn backend_base(&self) -> Result<Url, ConfigError> {
        backend_base_url(&self.backend_url).map_err(|source| ConfigError::InvalidBackendUrl {
            url: self.backend_url.clone(),
            source,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.backend_base()?;
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::InvalidPollInterval);
        }
        self.day_zone()?;
        Ok(())
    }

    /// Zone the schedule is grouped in: the configured IANA `timezone`, else
    /// the system zone.
    pub fn day_zone(&self) -> Result<DayZone, ConfigError> {
        let Some(name) = self.timezone.as_deref().map(str::trim) else {
            return Ok(DayZone::Local);
        };
        name.parse::<Tz>()
            .map(DayZone::Named)
            .map_err(|err| ConfigError::InvalidTimezone {
                name: name.to_string(),
                reason: err.to_string(),
            })
    }

    /// Apply overrides from `lookup`, which maps variable names to values.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = normalize_field(lookup(ENV_BACKEND_URL).as_deref()) {
            self.backend_url = url;
        }
        if let Some(email) = normalize_field(lookup(ENV_USER_EMAIL).as_deref()) {
            self.user_email = Some(email);
        }
    }

    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| env::var(name).ok());
    }
}

fn normalize_field(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
}

/// Load, override from the environment, and validate.
pub fn load_config() -> Result<ConfigLoadResult, ConfigError> {
    let path = match resolve_config_path() {
        Ok(path) => Some(path),
        Err(ConfigError::MissingConfigDir) => None,
        Err(err) => return Err(err),
    };

    let mut result = match path {
        Some(path) if path.exists() => load_config_from(path)?,
        _ => ConfigLoadResult {
            config: SyncConfig::default(),
            path: None,
        },
    };
    result.config.apply_env_overrides();
    result.config.validate()?;
    Ok(result)
}

/// Read one file. No environment overrides, no validation.
pub fn load_config_from(path: PathBuf) -> Result<ConfigLoadResult, ConfigError> {
    let text = fs::read_to_string(&path).map_err(|source| ConfigError::Io {
        source,
        path: path.clone(),
    })?;
    let config = SyncConfig::from_toml_str(&text).map_err(|source| ConfigError::Parse {
        source,
        path: path.clone(),
    })?;
    Ok(ConfigLoadResult {
        config,
        path: Some(path),
    })
}

pub fn resolve_config_path() -> Result<PathBuf, ConfigError> {
    Ok(config_home_dir()?
        .join(CONFIG_NAMESPACE)
        .join(CONFIG_FILENAME))
}

fn config_home_dir() -> Result<PathBuf, ConfigError> {
    if let Some(dir) = env::var_os("XDG_CONFIG_HOME") {
        return Ok(PathBuf::from(dir));
    }

    #[cfg(windows)]
    if let Some(dir) = env::var_os("APPDATA") {
        return Ok(PathBuf::from(dir));
    }

    if let Some(home) = env::var_os("HOME") {
        return Ok(PathBuf::from(home).join(".config"));
    }

    Err(ConfigError::MissingConfigDir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_defaults_when_table_missing() {
        let config = SyncConfig::from_toml_str("[other]\nkey = 1\n").unwrap();
        assert_eq!(config, SyncConfig::default());
        assert_eq!(config.poll_interval(), Duration::from_secs(2));
        assert_eq!(config.calendar_id, "primary");
    }

    #[test]
    fn test_partial_table() {
        let config = SyncConfig::from_toml_str(
            r#"
            [sync]
            user_email = "me@example.com"
            poll_interval_ms = 500
            "#,
        )
        .unwrap();
        assert_eq!(config.user_email.as_deref(), Some("me@example.com"));
        assert_eq!(config.poll_interval_ms, 500);
        assert_eq!(config.request_timeout_secs, 30);
    }

    #[test]
    fn test_backend_base_gets_trailing_slash() {
        let config = SyncConfig {
            backend_url: "http://localhost:8000/auth".to_string(),
            ..Default::default()
        };
        let base = config.backend_base().unwrap();
        assert_eq!(base.join("events/").unwrap().path(), "/auth/events/");
    }

    #[test]
    fn test_day_zone_from_timezone() {
        let mut config = SyncConfig::default();
        assert_eq!(config.day_zone().unwrap(), DayZone::Local);

        config.timezone = Some("Asia/Kolkata".to_string());
        assert_eq!(
            config.day_zone().unwrap(),
            DayZone::Named(chrono_tz::Asia::Kolkata)
        );

        config.timezone = Some("Mars/Olympus_Mons".to_string());
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidTimezone { .. })
        ));
    }

    #[test]
    fn test_backend_base_url_keeps_existing_slash() {
        let base = backend_base_url(" http://localhost:8000/auth/ ").unwrap();
        assert_eq!(base.as_str(), "http://localhost:8000/auth/");
        assert!(backend_base_url("not a url").is_err());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let bad_url = SyncConfig {
            backend_url: "not a url".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            bad_url.validate(),
            Err(ConfigError::InvalidBackendUrl { .. })
        ));

        let zero_poll = SyncConfig {
            poll_interval_ms: 0,
            ..Default::default()
        };
        assert!(matches!(
            zero_poll.validate(),
            Err(ConfigError::InvalidPollInterval)
        ));
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [
            (ENV_BACKEND_URL, "https://calendar.example.com/auth"),
            (ENV_USER_EMAIL, "   "),
        ]
        .into_iter()
        .collect();
        let mut config = SyncConfig {
            user_email: Some("file@example.com".to_string()),
            ..Default::default()
        };
        config.apply_overrides(|name| vars.get(name).map(|v| v.to_string()));
        assert_eq!(config.backend_url, "https://calendar.example.com/auth");
        // blank values do not clobber the file
        assert_eq!(config.user_email.as_deref(), Some("file@example.com"));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[sync]\ncalendar_id = \"work\"").unwrap();
        let result = load_config_from(file.path().to_path_buf()).unwrap();
        assert_eq!(result.config.calendar_id, "work");
        assert_eq!(result.path.as_deref(), Some(file.path()));
    }

    #[test]
    fn test_parse_error_names_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[sync\n").unwrap();
        let err = load_config_from(file.path().to_path_buf()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }
}
