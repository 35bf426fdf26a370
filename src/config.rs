//! Bot configuration: a TOML file with serde defaults and an environment
//! fallback for the app password.

use std::fs;

use anyhow::{bail, Context, Result};
use regex::RegexSet;
use serde::Deserialize;

/// Environment variable consulted when `[bluesky].app_password` is absent.
pub const APP_PASSWORD_ENV: &str = "BUFOBOT_APP_PASSWORD";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub bluesky: BlueskyConfig,
    #[serde(default)]
    pub jetstream: JetstreamConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub matcher: MatcherConfig,
    #[serde(default)]
    pub cooldown: CooldownConfig,
    #[serde(default)]
    pub posting: PostingConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BlueskyConfig {
    #[serde(default = "default_service")]
    pub service: String,
    #[serde(default)]
    pub handle: String,
    /// App password; falls back to `BUFOBOT_APP_PASSWORD` when unset.
    #[serde(default)]
    pub app_password: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JetstreamConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CatalogConfig {
    #[serde(default = "default_catalog_url")]
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MatcherConfig {
    #[serde(default = "default_min_phrase_words")]
    pub min_phrase_words: usize,
    /// Regexes matched against bufo filenames; hits are dropped from the
    /// catalog before indexing.
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CooldownConfig {
    #[serde(default = "default_cooldown_minutes")]
    pub minutes: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PostingConfig {
    /// Off by default; matches are only logged until this is flipped.
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_quote_chance")]
    pub quote_chance: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_service() -> String {
    "https://bsky.social".to_string()
}

fn default_endpoint() -> String {
    "jetstream2.us-east.bsky.network".to_string()
}

fn default_catalog_url() -> String {
    "https://find-bufo.com/api/search?query=bufo&top_k=2000&alpha=0".to_string()
}

fn default_min_phrase_words() -> usize {
    4
}

fn default_cooldown_minutes() -> i64 {
    120
}

fn default_quote_chance() -> f64 {
    0.5
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for BlueskyConfig {
    fn default() -> Self {
        Self {
            service: default_service(),
            handle: String::new(),
            app_password: None,
        }
    }
}

impl Default for JetstreamConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
        }
    }
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            url: default_catalog_url(),
        }
    }
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            min_phrase_words: default_min_phrase_words(),
            exclude_patterns: Vec::new(),
        }
    }
}

impl Default for CooldownConfig {
    fn default() -> Self {
        Self {
            minutes: default_cooldown_minutes(),
        }
    }
}

impl Default for PostingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            quote_chance: default_quote_chance(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Read a config file, falling back to all defaults when it does not
    /// exist. The app password may come from the environment instead.
    pub fn load(path: &str) -> Result<Self> {
        let expanded = shellexpand::tilde(path);
        let mut config: Config = match fs::read_to_string(expanded.as_ref()) {
            Ok(content) => toml::from_str(&content)
                .with_context(|| format!("failed to parse config file: {path}"))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Config::default(),
            Err(e) => {
                return Err(e).with_context(|| format!("failed to read config file: {path}"))
            }
        };
        if config.bluesky.app_password.is_none() {
            if let Ok(password) = std::env::var(APP_PASSWORD_ENV) {
                config.bluesky.app_password = Some(password);
            }
        }
        Ok(config)
    }

    /// Validate invariants that would otherwise only surface mid-run.
    pub fn validate(&self) -> Result<()> {
        if self.matcher.min_phrase_words == 0 {
            bail!("matcher.min_phrase_words must be at least 1");
        }
        if !(0.0..=1.0).contains(&self.posting.quote_chance) {
            bail!("posting.quote_chance must be between 0.0 and 1.0");
        }
        if self.cooldown.minutes <= 0 {
            bail!("cooldown.minutes must be positive");
        }
        if self.jetstream.endpoint.is_empty() {
            bail!("jetstream.endpoint must not be empty");
        }
        if self.catalog.url.is_empty() {
            bail!("catalog.url must not be empty");
        }
        RegexSet::new(&self.matcher.exclude_patterns)
            .context("matcher.exclude_patterns contains an invalid regex")?;
        Ok(())
    }

    /// Credentials are only required when the bot will talk to Bluesky.
    pub fn require_credentials(&self) -> Result<(&str, &str)> {
        if self.bluesky.handle.is_empty() {
            bail!("bluesky.handle is required to log in");
        }
        match self.bluesky.app_password.as_deref() {
            Some(p) if !p.is_empty() => Ok((&self.bluesky.handle, p)),
            _ => bail!("bluesky.app_password (or {APP_PASSWORD_ENV}) is required to log in"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn defaults_are_safe() {
        let config = Config::default();
        assert!(!config.posting.enabled);
        assert_eq!(config.matcher.min_phrase_words, 4);
        assert_eq!(config.cooldown.minutes, 120);
        assert_eq!(config.posting.quote_chance, 0.5);
        assert_eq!(config.jetstream.endpoint, "jetstream2.us-east.bsky.network");
        assert!(config.matcher.exclude_patterns.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn loads_a_full_config_file() {
        let file = write_config(
            r#"
[bluesky]
service = "https://pds.example.com"
handle = "bufo.example.com"
app_password = "abcd-efgh-ijkl-mnop"

[jetstream]
endpoint = "jetstream1.us-west.bsky.network"

[catalog]
url = "https://bufos.example.com/api/search?query=bufo"

[matcher]
min_phrase_words = 3
exclude_patterns = ["sad", "crying"]

[cooldown]
minutes = 60

[posting]
enabled = true
quote_chance = 0.9

[logging]
level = "debug"
"#,
        );
        let config = Config::load(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.bluesky.service, "https://pds.example.com");
        assert_eq!(config.bluesky.handle, "bufo.example.com");
        assert_eq!(config.jetstream.endpoint, "jetstream1.us-west.bsky.network");
        assert_eq!(config.matcher.min_phrase_words, 3);
        assert_eq!(config.matcher.exclude_patterns, vec!["sad", "crying"]);
        assert_eq!(config.cooldown.minutes, 60);
        assert!(config.posting.enabled);
        assert_eq!(config.posting.quote_chance, 0.9);
        assert_eq!(config.logging.level, "debug");
        assert!(config.validate().is_ok());
        let (handle, password) = config.require_credentials().unwrap();
        assert_eq!(handle, "bufo.example.com");
        assert_eq!(password, "abcd-efgh-ijkl-mnop");
    }

    #[test]
    fn partial_files_keep_defaults_for_the_rest() {
        let file = write_config("[posting]\nenabled = true\n");
        let config = Config::load(file.path().to_str().unwrap()).unwrap();
        assert!(config.posting.enabled);
        assert_eq!(config.matcher.min_phrase_words, 4);
        assert_eq!(config.bluesky.service, "https://bsky.social");
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = Config::load("/definitely/not/a/real/path/bufobot.toml").unwrap();
        assert_eq!(config.cooldown.minutes, 120);
    }

    #[test]
    fn unparseable_files_are_an_error() {
        let file = write_config("this is not toml = = =");
        assert!(Config::load(file.path().to_str().unwrap()).is_err());
    }

    #[test]
    fn validate_rejects_bad_values() {
        let mut config = Config::default();
        config.matcher.min_phrase_words = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.posting.quote_chance = 1.5;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.cooldown.minutes = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.jetstream.endpoint = String::new();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.matcher.exclude_patterns = vec!["[unclosed".to_string()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn credentials_require_handle_and_password() {
        let config = Config::default();
        assert!(config.require_credentials().is_err());

        let mut config = Config::default();
        config.bluesky.handle = "bufo.example.com".to_string();
        assert!(config.require_credentials().is_err());

        config.bluesky.app_password = Some(String::new());
        assert!(config.require_credentials().is_err());
    }

    #[test]
    fn app_password_can_come_from_the_environment() {
        let file = write_config("[bluesky]\nhandle = \"bufo.example.com\"\n");
        std::env::set_var(APP_PASSWORD_ENV, "env-password");
        let config = Config::load(file.path().to_str().unwrap()).unwrap();
        std::env::remove_var(APP_PASSWORD_ENV);

        let (_, password) = config.require_credentials().unwrap();
        assert_eq!(password, "env-password");
    }

    #[test]
    fn file_password_beats_the_environment() {
        let file = write_config(
            "[bluesky]\nhandle = \"bufo.example.com\"\napp_password = \"from-file\"\n",
        );
        let config = Config::load(file.path().to_str().unwrap()).unwrap();
        let (_, password) = config.require_credentials().unwrap();
        assert_eq!(password, "from-file");
    }
}
