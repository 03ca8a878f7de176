//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation and default values.

use crate::models::{ContainerName, InvalidRowPolicy};
use clap::Parser;
use std::path::PathBuf;

/// census-stats - per-occupation income and family size statistics
///
/// Reads census CSV files (columns occupation, income, family_size),
/// computes min/max income and family size per occupation, and upserts
/// one row per occupation into a SQLite container.
///
/// Examples:
///   census-stats input.csv
///   census-stats data/ --database census.db --container census-analysis
///   census-stats input.csv --on-invalid skip --report stats.md
///   census-stats input.csv --dry-run
///   census-stats --show
///   census-stats --init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// CSV file, or directory of CSV files, to aggregate
    ///
    /// Defaults to the config file's input path, or input.csv.
    #[arg(value_name = "INPUT")]
    pub input: Option<PathBuf>,

    /// SQLite database file to write to
    #[arg(short, long, value_name = "FILE", env = "CENSUS_STATS_DB")]
    pub database: Option<PathBuf>,

    /// Container (table) name for the statistics
    #[arg(short = 't', long, value_name = "NAME")]
    pub container: Option<String>,

    /// Path to configuration file
    ///
    /// If not specified, looks for .census-stats.toml in the current directory
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// CSV field delimiter
    #[arg(long, value_name = "CHAR")]
    pub delimiter: Option<char>,

    /// Skip lines starting with this character
    #[arg(long, value_name = "CHAR")]
    pub comment: Option<char>,

    /// What to do with rows whose numbers do not parse
    #[arg(long, value_name = "POLICY")]
    pub on_invalid: Option<InvalidRowPolicy>,

    /// Write a report of the statistics to this file
    #[arg(short, long, value_name = "FILE")]
    pub report: Option<PathBuf>,

    /// Report format (markdown, json)
    #[arg(long, default_value = "markdown", value_name = "FORMAT")]
    pub format: OutputFormat,

    /// Aggregate and print the statistics without touching the database
    #[arg(long, conflicts_with_all = ["show", "check_connection"])]
    pub dry_run: bool,

    /// Print the statistics stored in the container and exit
    #[arg(long, conflicts_with = "check_connection")]
    pub show: bool,

    /// Open the database, print its version and exit
    #[arg(long)]
    pub check_connection: bool,

    /// Generate a default .census-stats.toml configuration file
    #[arg(long)]
    pub init_config: bool,

    /// Enable verbose logging output
    #[arg(short, long)]
    pub verbose: bool,

    /// Run in quiet mode (minimal output)
    #[arg(short, long)]
    pub quiet: bool,
}

/// Output format for the report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Markdown format (default)
    #[default]
    Markdown,
    /// JSON format
    Json,
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Whether this run reads CSV input.
    pub fn reads_input(&self) -> bool {
        !(self.init_config || self.show || self.check_connection)
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        // Skip validation for --init-config
        if self.init_config {
            return Ok(());
        }

        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        if let Some(ref container) = self.container {
            container
                .parse::<ContainerName>()
                .map_err(|e| e.to_string())?;
        }

        for (name, value) in [("delimiter", self.delimiter), ("comment", self.comment)] {
            if let Some(c) = value {
                if !c.is_ascii() || c == '\n' || c == '\r' {
                    return Err(format!("--{} must be a single ASCII character", name));
                }
            }
        }

        if self.delimiter.is_some() && self.delimiter == self.comment {
            return Err("--delimiter and --comment must differ".to_string());
        }

        if self.report.is_some() && !self.reads_input() {
            return Err("--report only applies to runs that read input".to_string());
        }

        // Validate input path if provided
        if let Some(ref input) = self.input {
            if !input.exists() {
                return Err(format!("Input path does not exist: {}", input.display()));
            }
        }

        Ok(())
    }

    /// Returns the log level based on verbosity settings.
    pub fn log_level(&self) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else if self.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }
}
