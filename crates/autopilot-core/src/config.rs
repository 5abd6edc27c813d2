//! Configuration parsing for autopilot runs.
//!
//! Key=value format read from `.autopilot/config` in the workspace root.
//! Precedence: CLI flags > `--config` file > `.autopilot/config` > defaults.

use crate::types::GeneratorProvider;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Workspace-relative location of the default config file.
pub const WORKSPACE_CONFIG_PATH: &str = ".autopilot/config";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),
    #[error("invalid config line: {0}")]
    InvalidLine(String),
    #[error("invalid integer value for {key}: {value}")]
    InvalidInt { key: String, value: String },
    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Run configuration. Field names match the config keys.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct Config {
    // Generator
    pub provider: GeneratorProvider,
    pub model: String,
    pub api_base_url: Option<String>,
    pub max_tokens: u32,
    pub generation_timeout_sec: u64,
    pub generation_retries: u32,
    pub generation_retry_backoff_sec: u64,

    // Budgets
    pub max_turns: u32,
    pub max_minutes: u64,

    // Command execution
    pub command_timeout_sec: u64,

    // Audit log
    pub log_dir: PathBuf,

    // Initial context
    pub key_files: Vec<String>,
    pub digest_max_depth: usize,
    pub digest_max_lines: usize,
    pub key_file_max_chars: usize,

    /// Keys seen while parsing that matched no field.
    #[serde(skip)]
    pub unknown_keys: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            provider: GeneratorProvider::Anthropic,
            model: "claude-sonnet-4-20250514".to_string(),
            api_base_url: None,
            max_tokens: 4000,
            generation_timeout_sec: 120,
            generation_retries: 0,
            generation_retry_backoff_sec: 5,
            max_turns: 30,
            max_minutes: 45,
            command_timeout_sec: 300,
            log_dir: PathBuf::from("runs"),
            key_files: ["README.md", "package.json", "AGENTS.md", "supabase/config.toml"]
                .into_iter()
                .map(str::to_string)
                .collect(),
            digest_max_depth: 3,
            digest_max_lines: 100,
            key_file_max_chars: 2000,
            unknown_keys: Vec::new(),
        }
    }
}

impl Config {
    /// Load config from a file, merging with defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let mut config = Self::default();
        config.load_file(path)?;
        Ok(config)
    }

    /// Defaults, then `.autopilot/config` if present, then `extra` if given.
    ///
    /// Relative paths are resolved against `workspace_root`.
    pub fn for_workspace(workspace_root: &Path, extra: Option<&Path>) -> Result<Self> {
        let mut config = Self::default();
        let workspace_file = workspace_root.join(WORKSPACE_CONFIG_PATH);
        if workspace_file.is_file() {
            config.load_file(&workspace_file)?;
        }
        if let Some(path) = extra {
            config.load_file(path)?;
        }
        config.resolve_paths(workspace_root);
        Ok(config)
    }

    /// Load and merge values from a config file.
    pub fn load_file(&mut self, path: &Path) -> Result<()> {
        let content = std::fs::read_to_string(path)?;
        self.parse_content(&content)
    }

    /// Parse config content (key=value format).
    fn parse_content(&mut self, content: &str) -> Result<()> {
        for line in content.lines() {
            let trimmed = line.trim();

            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }

            let Some((key, value)) = trimmed.split_once('=') else {
                return Err(ConfigError::InvalidLine(line.to_string()));
            };

            let key = key.trim();
            let value = Self::unquote(value.trim());

            self.apply_value(key, &value)?;
        }
        Ok(())
    }

    /// Remove surrounding quotes from a value.
    fn unquote(value: &str) -> String {
        if value.len() >= 2
            && ((value.starts_with('"') && value.ends_with('"'))
                || (value.starts_with('\'') && value.ends_with('\'')))
        {
            return value[1..value.len() - 1].to_string();
        }
        value.to_string()
    }

    /// Apply a single config value.
    fn apply_value(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "provider" => {
                self.provider =
                    GeneratorProvider::parse(value).ok_or_else(|| ConfigError::InvalidValue {
                        key: key.to_string(),
                        value: value.to_string(),
                    })?;
            }
            "model" => self.model = value.to_string(),
            "api_base_url" => {
                self.api_base_url = Some(value.trim_end_matches('/').to_string()).filter(|v| !v.is_empty());
            }
            "max_tokens" => self.max_tokens = Self::parse_int(key, value)?,
            "generation_timeout_sec" => self.generation_timeout_sec = Self::parse_int(key, value)?,
            "generation_retries" => self.generation_retries = Self::parse_int(key, value)?,
            "generation_retry_backoff_sec" => {
                self.generation_retry_backoff_sec = Self::parse_int(key, value)?;
            }
            "max_turns" => self.max_turns = Self::parse_int(key, value)?,
            "max_minutes" => self.max_minutes = Self::parse_int(key, value)?,
            "command_timeout_sec" => self.command_timeout_sec = Self::parse_int(key, value)?,
            "log_dir" => self.log_dir = PathBuf::from(value),
            "key_files" => {
                self.key_files = value.split_whitespace().map(str::to_string).collect();
            }
            "digest_max_depth" => self.digest_max_depth = Self::parse_int(key, value)?,
            "digest_max_lines" => self.digest_max_lines = Self::parse_int(key, value)?,
            "key_file_max_chars" => self.key_file_max_chars = Self::parse_int(key, value)?,
            _ => self.unknown_keys.push(key.to_string()),
        }
        Ok(())
    }

    fn parse_int<T: FromStr>(key: &str, value: &str) -> Result<T> {
        value.parse().map_err(|_| ConfigError::InvalidInt {
            key: key.to_string(),
            value: value.to_string(),
        })
    }

    /// Resolve relative paths against a workspace root.
    pub fn resolve_paths(&mut self, workspace_root: &Path) {
        if self.log_dir.is_relative() {
            self.log_dir = workspace_root.join(&self.log_dir);
        }
    }

    /// Base URL for the configured provider.
    pub fn base_url(&self) -> &str {
        self.api_base_url
            .as_deref()
            .unwrap_or_else(|| self.provider.default_base_url())
    }

    pub fn generation_timeout(&self) -> Duration {
        Duration::from_secs(self.generation_timeout_sec)
    }

    pub fn generation_retry_backoff(&self) -> Duration {
        Duration::from_secs(self.generation_retry_backoff_sec)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_sec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn default_config_has_expected_values() {
        let config = Config::default();
        assert_eq!(config.provider, GeneratorProvider::Anthropic);
        assert_eq!(config.model, "claude-sonnet-4-20250514");
        assert_eq!(config.max_turns, 30);
        assert_eq!(config.max_minutes, 45);
        assert_eq!(config.generation_timeout(), Duration::from_secs(120));
        assert_eq!(config.command_timeout(), Duration::from_secs(300));
        assert_eq!(config.key_files.len(), 4);
        assert_eq!(config.base_url(), "https://api.anthropic.com");
    }

    #[test]
    fn parse_simple_config() {
        let mut config = Config::default();
        let content = r#"
# generator
provider=gemini
model="gemini-2.5-pro"
max_turns=12
max_minutes='5'
key_files=README.md docs/ARCHITECTURE.md
"#;
        config.parse_content(content).unwrap();
        assert_eq!(config.provider, GeneratorProvider::Gemini);
        assert_eq!(config.model, "gemini-2.5-pro");
        assert_eq!(config.max_turns, 12);
        assert_eq!(config.max_minutes, 5);
        assert_eq!(config.key_files, vec!["README.md", "docs/ARCHITECTURE.md"]);
        assert_eq!(
            config.base_url(),
            "https://generativelanguage.googleapis.com"
        );
    }

    #[test]
    fn api_base_url_overrides_provider_default() {
        let mut config = Config::default();
        config
            .parse_content("api_base_url=http://127.0.0.1:9000/")
            .unwrap();
        assert_eq!(config.base_url(), "http://127.0.0.1:9000");
    }

    #[test]
    fn unquote_removes_quotes() {
        assert_eq!(Config::unquote("\"hello\""), "hello");
        assert_eq!(Config::unquote("'world'"), "world");
        assert_eq!(Config::unquote("noquotes"), "noquotes");
    }

    #[test]
    fn invalid_values_are_errors() {
        let mut config = Config::default();
        assert!(matches!(
            config.parse_content("max_turns=many"),
            Err(ConfigError::InvalidInt { .. })
        ));
        assert!(matches!(
            config.parse_content("provider=openai"),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(matches!(
            config.parse_content("just some text"),
            Err(ConfigError::InvalidLine(_))
        ));
    }

    #[test]
    fn unknown_keys_are_collected() {
        let mut config = Config::default();
        config.parse_content("colour=blue\nmax_turns=3").unwrap();
        assert_eq!(config.unknown_keys, vec!["colour"]);
        assert_eq!(config.max_turns, 3);
    }

    #[test]
    fn workspace_file_then_extra_file() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join(".autopilot")).unwrap();
        std::fs::write(
            dir.path().join(WORKSPACE_CONFIG_PATH),
            "max_turns=7\nmax_minutes=9\n",
        )
        .unwrap();
        let extra = dir.path().join("override.conf");
        std::fs::write(&extra, "max_turns=2\nlog_dir=/tmp/autopilot-runs\n").unwrap();

        let config = Config::for_workspace(dir.path(), Some(&extra)).unwrap();
        assert_eq!(config.max_turns, 2);
        assert_eq!(config.max_minutes, 9);
        assert_eq!(config.log_dir, PathBuf::from("/tmp/autopilot-runs"));
    }

    #[test]
    fn relative_log_dir_resolves_against_workspace() {
        let dir = TempDir::new().unwrap();
        let config = Config::for_workspace(dir.path(), None).unwrap();
        assert_eq!(config.log_dir, dir.path().join("runs"));
    }
}
