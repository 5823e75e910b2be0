//! Configuration management for Tributary.
//!
//! Configuration is read from `~/.config/tributary/config.toml` (or the path
//! given with `--config`). If the default file doesn't exist, a commented
//! template is created. A `.env` file in the working directory is loaded
//! first, and any string value written exactly as `${VAR}` is replaced with
//! the value of that environment variable.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use url::Url;

use crate::domain::{Destination, Source};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub fetch: FetchConfig,
    pub scheduler: SchedulerConfig,
    pub cache: CacheConfig,
    pub discord: DiscordConfig,
    pub freshrss: FreshRssConfig,
    pub notify: NotifyConfig,
    pub destinations: Vec<DestinationConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub timeout_secs: u64,
    pub user_agent: String,
    /// Identities tried in order after the first attempt fails.
    pub fallback_user_agents: Vec<String>,
    pub retry_delay_min_ms: u64,
    pub retry_delay_max_ms: u64,
    pub cooldown_ceiling_secs: u64,
    pub cooldown_jitter_ms: u64,
    pub proxy: Option<String>,
    pub accept_language: String,
    pub host_headers: Vec<HostHeaders>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 15,
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string(),
            fallback_user_agents: vec![
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:122.0) Gecko/20100101 Firefox/122.0".to_string(),
                "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120 Safari/537.36".to_string(),
                "FeedFetcher-Google".to_string(),
            ],
            retry_delay_min_ms: 400,
            retry_delay_max_ms: 1000,
            cooldown_ceiling_secs: 3600,
            cooldown_jitter_ms: 1000,
            proxy: None,
            accept_language: "en-US,en;q=0.9".to_string(),
            host_headers: Vec::new(),
        }
    }
}

/// Extra request headers for one host and its subdomains.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HostHeaders {
    pub host: String,
    pub headers: BTreeMap<String, String>,
}

impl HostHeaders {
    pub fn matches(&self, host: &str) -> bool {
        let rule = self.host.trim().to_ascii_lowercase();
        let host = host.to_ascii_lowercase();
        !rule.is_empty() && (host == rule || host.ends_with(&format!(".{}", rule)))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub tick_secs: u64,
    pub workers: usize,
    pub request_delay_ms: u64,
    pub video_request_delay_ms: u64,
    pub request_jitter_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_secs: 30,
            workers: 4,
            request_delay_ms: 500,
            video_request_delay_ms: 2000,
            request_jitter_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub path: Option<PathBuf>,
    /// Upper bound on remembered ids per (destination, source).
    pub max_seen: usize,
    pub conditional_flush_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            path: None,
            max_seen: 500,
            conditional_flush_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DiscordConfig {
    pub token: Option<String>,
    pub message_limit: u32,
}

impl Default for DiscordConfig {
    fn default() -> Self {
        Self {
            token: None,
            message_limit: 50,
        }
    }
}

/// FreshRSS instance read through its Fever API (`freshrss://` sources).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FreshRssConfig {
    /// Base URL of the instance, e.g. `https://rss.example.com`.
    pub url: Option<String>,
    /// Fever API key. Derived from `username`/`password` when unset.
    pub fever_key: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    pub webhook_timeout_secs: u64,
    pub webhook_retries: u8,
    /// First retry pause; doubles on every further attempt.
    pub webhook_backoff_ms: u64,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            webhook_timeout_secs: 10,
            webhook_retries: 3,
            webhook_backoff_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DestinationConfig {
    #[serde(default)]
    pub name: String,
    pub target: String,
    #[serde(default = "default_interval_minutes")]
    pub interval_minutes: u64,
    #[serde(default = "default_send_limit")]
    pub send_limit: usize,
    #[serde(default)]
    pub sources: Vec<String>,
}

fn default_interval_minutes() -> u64 {
    10
}

fn default_send_limit() -> usize {
    3
}

impl Config {
    /// Load configuration from `path`, or from the default location.
    ///
    /// A missing default file is created from the template; a missing
    /// explicit path is an error.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        // Missing .env is the normal case
        let _ = dotenvy::dotenv();

        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => {
                let default_path = Self::default_config_path()?;
                if !default_path.exists() {
                    Self::create_default_config(&default_path)?;
                    tracing::info!(path = %default_path.display(), "Created default configuration");
                    return Ok(Self::default());
                }
                default_path
            }
        };

        let content = fs::read_to_string(&config_path).map_err(|e| ConfigError::Io {
            path: config_path.clone(),
            source: e,
        })?;

        Self::from_toml_str(&content).map_err(|e| match e {
            ConfigError::Parse { source, .. } => ConfigError::Parse {
                path: config_path,
                source,
            },
            other => other,
        })
    }

    /// Parse, expand `${VAR}` placeholders and validate.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let parse_err = |source| ConfigError::Parse {
            path: PathBuf::new(),
            source,
        };
        let mut value: toml::Value = toml::from_str(content).map_err(parse_err)?;
        expand_env(&mut value);
        let config: Config = value.try_into().map_err(parse_err)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scheduler.workers == 0 {
            return Err(ConfigError::Invalid("scheduler.workers must be at least 1".into()));
        }
        if self.cache.max_seen == 0 {
            return Err(ConfigError::Invalid("cache.max_seen must be at least 1".into()));
        }
        if self.fetch.retry_delay_min_ms > self.fetch.retry_delay_max_ms {
            return Err(ConfigError::Invalid(
                "fetch.retry_delay_min_ms must not exceed fetch.retry_delay_max_ms".into(),
            ));
        }

        for (i, dest) in self.destinations.iter().enumerate() {
            let label = if dest.name.is_empty() {
                format!("destinations[{}]", i)
            } else {
                dest.name.clone()
            };
            if dest.interval_minutes == 0 {
                return Err(ConfigError::Invalid(format!("{}: interval_minutes must be at least 1", label)));
            }
            if dest.interval_minutes.checked_mul(60).is_none() {
                return Err(ConfigError::Invalid(format!("{}: interval_minutes is too large", label)));
            }
            if dest.send_limit == 0 {
                return Err(ConfigError::Invalid(format!("{}: send_limit must be at least 1", label)));
            }
            if dest.target.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("{}: target is empty", label)));
            }
            for source in &dest.sources {
                let url = Url::parse(source)
                    .map_err(|e| ConfigError::Invalid(format!("{}: invalid source {}: {}", label, source, e)))?;
                if !matches!(url.scheme(), "http" | "https" | "discord" | "freshrss") {
                    return Err(ConfigError::Invalid(format!(
                        "{}: unsupported source scheme in {}",
                        label, source
                    )));
                }
            }
        }
        Ok(())
    }

    /// Runtime destinations, indexed by configuration position, with
    /// duplicate sources removed.
    pub fn destinations(&self) -> Vec<Destination> {
        self.destinations
            .iter()
            .enumerate()
            .map(|(index, dest)| {
                let mut seen = HashSet::new();
                let mut sources = Vec::new();
                for url in &dest.sources {
                    let url = url.trim();
                    if seen.insert(url.to_string()) {
                        sources.push(Source::new(url));
                    } else {
                        tracing::warn!(destination = index, url, "Dropping duplicate source");
                    }
                }
                Destination {
                    index,
                    name: dest.name.clone(),
                    target: dest.target.clone(),
                    sources,
                    interval: Duration::from_secs(dest.interval_minutes.saturating_mul(60)),
                    send_limit: dest.send_limit,
                }
            })
            .collect()
    }

    /// Get the default config file path: `~/.config/tributary/config.toml`
    pub fn default_config_path() -> Result<PathBuf, ConfigError> {
        let config_dir = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
        Ok(config_dir.join("tributary").join("config.toml"))
    }

    fn create_default_config(path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| ConfigError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let mut file = fs::File::create(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;

        file.write_all(Self::default_config_content().as_bytes())
            .map_err(|e| ConfigError::Io {
                path: path.to_path_buf(),
                source: e,
            })?;

        Ok(())
    }

    fn default_config_content() -> &'static str {
        r##"# Tributary configuration
#
# String values written as "${NAME}" are replaced with the environment
# variable NAME (a .env file in the working directory is loaded first).

[fetch]
timeout_secs = 15
# Identities tried in order when a request fails
fallback_user_agents = [
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:122.0) Gecko/20100101 Firefox/122.0",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120 Safari/537.36",
    "FeedFetcher-Google",
]
retry_delay_min_ms = 400
retry_delay_max_ms = 1000
# Longest cooldown a failing host can get
cooldown_ceiling_secs = 3600
cooldown_jitter_ms = 1000
# proxy = "http://127.0.0.1:8080"

# [[fetch.host_headers]]
# host = "example.com"
# headers = { "Sec-GPC" = "1" }

[scheduler]
tick_secs = 30
# Concurrent source checks per destination
workers = 4
request_delay_ms = 500
video_request_delay_ms = 2000
request_jitter_ms = 500

[cache]
# path = "/var/lib/tributary/tributary.db"
max_seen = 500
conditional_flush_secs = 30

[discord]
# token = "${DISCORD_TOKEN}"
message_limit = 50

[freshrss]
# url = "https://rss.example.com"
# fever_key = "${FEVER_KEY}"
# or: username = "..." and password = "${FRESHRSS_PASSWORD}"

[notify]
webhook_timeout_secs = 10
webhook_retries = 3
webhook_backoff_ms = 500

# [[destinations]]
# name = "news"
# target = "https://discord.com/api/webhooks/..."   # or "log"
# interval_minutes = 10
# send_limit = 3
# sources = [
#     "https://blog.rust-lang.org/feed.xml",
#     "https://www.youtube.com/feeds/videos.xml?channel_id=...",
#     "freshrss://all",
# ]
"##
    }
}

/// Replace `${VAR}` string values in place; unset variables become empty.
fn expand_env(value: &mut toml::Value) {
    match value {
        toml::Value::String(s) => {
            if let Some(name) = s.strip_prefix("${").and_then(|rest| rest.strip_suffix('}')) {
                let valid = !name.is_empty()
                    && !name.starts_with(|c: char| c.is_ascii_digit())
                    && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
                if valid {
                    *s = std::env::var(name).unwrap_or_default();
                }
            }
        }
        toml::Value::Array(items) => items.iter_mut().for_each(expand_env),
        toml::Value::Table(table) => table.iter_mut().for_each(|(_, v)| expand_env(v)),
        _ => {}
    }
}

/// Parse a duration like "30s", "10m", "1h", "1d" or raw seconds.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim().to_lowercase();

    let scaled = |value: &str, unit: u64, what: &str| -> Result<u64, String> {
        value
            .parse::<u64>()
            .map_err(|_| format!("Invalid {}: {}", what, value))?
            .checked_mul(unit)
            .ok_or_else(|| format!("Duration too large: {}", s))
    };

    let secs = if let Some(hours) = s.strip_suffix('h') {
        scaled(hours, 3600, "hours")
    } else if let Some(minutes) = s.strip_suffix('m') {
        scaled(minutes, 60, "minutes")
    } else if let Some(days) = s.strip_suffix('d') {
        scaled(days, 86400, "days")
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.parse::<u64>()
            .map_err(|_| format!("Invalid seconds: {}", secs))
    } else {
        s.parse::<u64>()
            .map_err(|_| format!("Invalid duration: {}. Use format like '30s', '10m', '1h'", s))
    }?;

    if secs == 0 {
        return Err("Duration must be greater than zero".to_string());
    }
    Ok(Duration::from_secs(secs))
}

/// Format a duration for display
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs >= 86400 && secs % 86400 == 0 {
        format!("{}d", secs / 86400)
    } else if secs >= 3600 && secs % 3600 == 0 {
        format!("{}h", secs / 3600)
    } else if secs >= 60 && secs % 60 == 0 {
        format!("{}m", secs / 60)
    } else {
        format!("{}s", secs)
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Could not determine config directory")]
    NoConfigDir,

    #[error("Failed to read/write config file at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file at {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
