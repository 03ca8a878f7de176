//! Configuration file handling.
//!
//! This module handles loading and merging configuration from
//! `.census-stats.toml` files.

use crate::models::InvalidRowPolicy;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Name of the configuration file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = ".census-stats.toml";

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,

    /// CSV input settings.
    #[serde(default)]
    pub input: InputConfig,

    /// Database settings.
    #[serde(default)]
    pub database: DatabaseConfig,
}

/// General application settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Enable verbose logging by default.
    #[serde(default)]
    pub verbose: bool,
}

/// CSV input settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputConfig {
    /// CSV file, or a directory of CSV files.
    #[serde(default = "default_input_path")]
    pub path: PathBuf,

    /// Field delimiter.
    #[serde(default = "default_delimiter")]
    pub delimiter: char,

    /// Lines starting with this character are skipped.
    #[serde(default)]
    pub comment: Option<char>,

    /// What to do with rows that fail validation.
    #[serde(default)]
    pub on_invalid: InvalidRowPolicy,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            path: default_input_path(),
            delimiter: default_delimiter(),
            comment: None,
            on_invalid: InvalidRowPolicy::default(),
        }
    }
}

fn default_input_path() -> PathBuf {
    PathBuf::from("input.csv")
}

fn default_delimiter() -> char {
    ','
}

/// Database settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite database file.
    #[serde(default = "default_database_path")]
    pub path: PathBuf,

    /// Container (table) the statistics are written to.
    #[serde(default = "default_container")]
    pub container: String,

    /// How long to wait on a locked database, in milliseconds.
    #[serde(default = "default_busy_timeout")]
    pub busy_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            container: default_container(),
            busy_timeout_ms: default_busy_timeout(),
        }
    }
}

fn default_database_path() -> PathBuf {
    PathBuf::from("census.db")
}

fn default_container() -> String {
    "occupation_statistics".to_string()
}

fn default_busy_timeout() -> u64 {
    5000
}

impl DatabaseConfig {
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        let default_path = Path::new(DEFAULT_CONFIG_FILE);

        if default_path.exists() {
            Ok(Some(Self::load(default_path)?))
        } else {
            Ok(None)
        }
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// CLI arguments take precedence; options left unset on the command
    /// line keep the file's values.
    pub fn merge_with_args(&mut self, args: &crate::cli::Args) {
        if let Some(ref input) = args.input {
            self.input.path = input.clone();
        }
        if let Some(delimiter) = args.delimiter {
            self.input.delimiter = delimiter;
        }
        if args.comment.is_some() {
            self.input.comment = args.comment;
        }
        if let Some(policy) = args.on_invalid {
            self.input.on_invalid = policy;
        }

        if let Some(ref database) = args.database {
            self.database.path = database.clone();
        }
        if let Some(ref container) = args.container {
            self.database.container = container.clone();
        }

        if args.verbose {
            self.general.verbose = true;
        }
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::tests::make_args;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.input.path, PathBuf::from("input.csv"));
        assert_eq!(config.input.delimiter, ',');
        assert_eq!(config.input.on_invalid, InvalidRowPolicy::Fail);
        assert_eq!(config.database.container, "occupation_statistics");
        assert_eq!(config.database.busy_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_parse_config() {
        let toml_content = r#"
[general]
verbose = true

[input]
path = "data/census"
delimiter = ";"
comment = "@"
on_invalid = "skip"

[database]
path = "/var/lib/census/stats.db"
container = "census-analysis"
"#;

        let config: Config = toml::from_str(toml_content).unwrap();
        assert!(config.general.verbose);
        assert_eq!(config.input.path, PathBuf::from("data/census"));
        assert_eq!(config.input.delimiter, ';');
        assert_eq!(config.input.comment, Some('@'));
        assert_eq!(config.input.on_invalid, InvalidRowPolicy::Skip);
        assert_eq!(config.database.path, PathBuf::from("/var/lib/census/stats.db"));
        assert_eq!(config.database.container, "census-analysis");
        assert_eq!(config.database.busy_timeout_ms, 5000);
    }

    #[test]
    fn test_rejects_unknown_policy() {
        let toml_content = "[input]\non_invalid = \"ignore\"\n";
        assert!(toml::from_str::<Config>(toml_content).is_err());
    }

    #[test]
    fn test_merge_with_args() {
        let mut config: Config = toml::from_str(
            "[input]\npath = \"from-file.csv\"\non_invalid = \"skip\"\n[database]\ncontainer = \"occupation_stats\"\n",
        )
        .unwrap();

        let mut args = make_args();
        args.database = Some(PathBuf::from("cli.db"));
        config.merge_with_args(&args);

        // Unset CLI options keep the file's values.
        assert_eq!(config.input.path, PathBuf::from("from-file.csv"));
        assert_eq!(config.input.on_invalid, InvalidRowPolicy::Skip);
        assert_eq!(config.database.container, "occupation_stats");
        assert_eq!(config.database.path, PathBuf::from("cli.db"));

        args.input = Some(PathBuf::from("cli.csv"));
        args.on_invalid = Some(InvalidRowPolicy::Fail);
        config.merge_with_args(&args);
        assert_eq!(config.input.path, PathBuf::from("cli.csv"));
        assert_eq!(config.input.on_invalid, InvalidRowPolicy::Fail);
    }

    #[test]
    fn test_default_toml_generation() {
        let toml_str = Config::default_toml();
        assert!(toml_str.contains("[general]"));
        assert!(toml_str.contains("[input]"));
        assert!(toml_str.contains("[database]"));

        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.database.container, "occupation_statistics");
    }
}
