//! census-stats - per-occupation census statistics
//!
//! A CLI tool that reads census CSV files, computes the income and family
//! size bounds of every occupation, and upserts them into a SQLite
//! container.
//!
//! Exit codes:
//!   0 - Success (rows rejected under --on-invalid skip included)
//!   1 - Runtime error (I/O, database, config, arguments)
//!   2 - Input data error (missing column, invalid row, no CSV files)

mod analysis;
mod cli;
mod config;
mod error;
mod ingest;
mod models;
mod report;
mod store;

use analysis::{AggregateOutcome, Aggregator};
use anyhow::{Context, Result};
use chrono::Utc;
use cli::{Args, OutputFormat};
use config::{Config, DEFAULT_CONFIG_FILE};
use error::{CensusError, EXIT_RUNTIME};
use indicatif::{ProgressBar, ProgressStyle};
use ingest::CsvOptions;
use models::{
    ContainerName, ContainerStatus, InvalidRowPolicy, ReportMetadata, StatsReport, StatsTable,
};
use std::path::{Path, PathBuf};
use std::time::Instant;
use store::{SqliteStore, StatsStore};
use tracing::level_filters::LevelFilter;
use tracing::{debug, error, info, warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse_args();

    // Validate arguments
    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(EXIT_RUNTIME);
    }

    // Handle --init-config early (no logging needed)
    if args.init_config {
        return handle_init_config();
    }

    match run(args) {
        Ok(()) => Ok(()),
        Err(e) => {
            error!("Run failed: {:#}", e);
            eprintln!("\n❌ Error: {:#}", e);
            std::process::exit(exit_code_for(&e));
        }
    }
}

/// Pick the exit code for an error that reached the top level.
fn exit_code_for(err: &anyhow::Error) -> i32 {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<CensusError>())
        .map(CensusError::exit_code)
        .unwrap_or(EXIT_RUNTIME)
}

/// Handle --init-config: generate a default .census-stats.toml.
fn handle_init_config() -> Result<()> {
    let path = Path::new(DEFAULT_CONFIG_FILE);

    if path.exists() {
        eprintln!(
            "⚠️  {} already exists. Remove it first or edit it manually.",
            DEFAULT_CONFIG_FILE
        );
        std::process::exit(EXIT_RUNTIME);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content)
        .with_context(|| format!("Failed to write {}", DEFAULT_CONFIG_FILE))?;

    println!("✅ Created {} with default settings.", DEFAULT_CONFIG_FILE);
    println!("   Edit it to set the input, database and container.");
    Ok(())
}

/// Initialize logging. `RUST_LOG` overrides the verbosity flags.
fn init_logging(level: Level) {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(level).into())
        .from_env_lossy();

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");
}

/// Run the selected mode end to end.
fn run(args: Args) -> Result<()> {
    let start_time = Instant::now();

    // Load configuration
    let (mut config, config_source) = load_config(&args)?;
    config.merge_with_args(&args);

    let level = if args.quiet {
        Level::ERROR
    } else if config.general.verbose {
        Level::DEBUG
    } else {
        args.log_level()
    };
    init_logging(level);

    info!("census-stats v{}", env!("CARGO_PKG_VERSION"));
    match config_source {
        Some(path) => info!("Loaded config from {}", path.display()),
        None => debug!("No config file found, using defaults"),
    }
    debug!("Arguments: {:?}", args);

    let container: ContainerName = config.database.container.parse()?;

    if args.check_connection {
        return handle_check_connection(&config);
    }
    if args.show {
        return handle_show(&config, &container);
    }

    // Step 1: Resolve and read the input
    let options = CsvOptions::try_from(&config.input)?;
    let inputs = ingest::collect_inputs(&config.input.path)?;
    println!(
        "📥 Reading {} input file(s) from {}",
        inputs.len(),
        config.input.path.display()
    );

    // Step 2: Aggregate
    debug!("Invalid row policy: {}", config.input.on_invalid);
    let outcome = aggregate_inputs(&inputs, &options, config.input.on_invalid, !args.quiet)?;
    info!(
        "Aggregated {} occupations from {} rows",
        outcome.table.len(),
        outcome.rows_accepted
    );
    print_statistics(&outcome.table);

    // Step 3: Persist
    let mut metadata = ReportMetadata {
        inputs,
        database: None,
        container: None,
        container_status: None,
        generated_at: Utc::now(),
        rows_read: outcome.rows_read,
        rows_accepted: outcome.rows_accepted,
        rows_rejected: outcome.rejected.len() as u64,
        rows_written: 0,
        duration_seconds: 0.0,
    };

    if args.dry_run {
        println!("\n🔍 Dry run: nothing was written to the database.");
    } else {
        println!(
            "\n💾 Writing to container '{}' in {}",
            container,
            config.database.path.display()
        );
        let mut store = SqliteStore::open(&config.database.path, config.database.busy_timeout())?;
        let (status, written) = write_statistics(&mut store, &container, &outcome.table)?;
        store.close()?;

        metadata.database = Some(config.database.path.clone());
        metadata.container = Some(container.clone());
        metadata.container_status = Some(status);
        metadata.rows_written = written;
    }

    metadata.duration_seconds = start_time.elapsed().as_secs_f64();

    // Step 4: Report
    if let Some(ref path) = args.report {
        let report = StatsReport {
            metadata: metadata.clone(),
            statistics: outcome.table.clone(),
            rejected: outcome.rejected.clone(),
        };
        write_report(&report, args.format, path)?;
    }

    print_summary(&metadata, &outcome);
    Ok(())
}

/// Load configuration from the explicit path or the default location.
///
/// Returns the path the configuration came from, if any.
fn load_config(args: &Args) -> Result<(Config, Option<PathBuf>)> {
    // Try explicit config path
    if let Some(ref config_path) = args.config {
        return Ok((Config::load(config_path)?, Some(config_path.clone())));
    }

    // Try default location
    match Config::load_default()? {
        Some(config) => Ok((config, Some(PathBuf::from(DEFAULT_CONFIG_FILE)))),
        None => Ok((Config::default(), None)),
    }
}

/// Aggregate each input file and merge the partial results.
fn aggregate_inputs(
    inputs: &[PathBuf],
    options: &CsvOptions,
    policy: InvalidRowPolicy,
    show_progress: bool,
) -> Result<AggregateOutcome, CensusError> {
    let progress = if show_progress {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} [{elapsed_precise}] {pos} rows {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        Some(pb)
    } else {
        None
    };

    let mut outcome = AggregateOutcome::default();
    for path in inputs {
        if let Some(ref pb) = progress {
            pb.set_message(path.display().to_string());
        }

        let mut aggregator = Aggregator::new(policy);
        let visited = ingest::for_each_row(path, options, |line, row| {
            if let Some(ref pb) = progress {
                pb.inc(1);
            }
            aggregator.observe_row(path, line, row)
        })?;

        let partial = aggregator.finish();
        debug_assert_eq!(visited, partial.rows_read);
        debug!(
            "{}: {} rows visited, {} accepted, {} occupations",
            path.display(),
            visited,
            partial.rows_accepted,
            partial.table.len()
        );
        outcome.absorb(partial);
    }

    if let Some(pb) = progress {
        pb.finish_and_clear();
    }

    Ok(outcome)
}

/// Create the container if needed and upsert the table into it.
fn write_statistics<S: StatsStore>(
    store: &mut S,
    container: &ContainerName,
    table: &StatsTable,
) -> Result<(ContainerStatus, usize), CensusError> {
    let status = store.ensure_container(container)?;
    let written = store.upsert_stats(container, table)?;
    let total = store.row_count(container)?;

    info!("Wrote {} rows to '{}' ({} rows total)", written, container, total);
    Ok((status, written))
}

/// Handle --check-connection: open the database and report its version.
fn handle_check_connection(config: &Config) -> Result<()> {
    let store =
        SqliteStore::open_existing(&config.database.path, config.database.busy_timeout())?;
    let version = store.check_connection()?;
    println!(
        "✅ Connection successful: SQLite {} at {}",
        version,
        store.path().display()
    );
    store.close()?;
    Ok(())
}

/// Handle --show: print what the container currently holds.
fn handle_show(config: &Config, container: &ContainerName) -> Result<()> {
    let store =
        SqliteStore::open_existing(&config.database.path, config.database.busy_timeout())?;
    let table = store
        .fetch_stats(container)
        .with_context(|| format!("Container '{}' could not be read", container))?;
    println!(
        "📦 Container '{}' in {}",
        container,
        config.database.path.display()
    );
    print_statistics(&table);
    store.close()?;
    Ok(())
}

fn write_report(report: &StatsReport, format: OutputFormat, path: &Path) -> Result<()> {
    let output = match format {
        OutputFormat::Json => report::generate_json_report(report)?,
        OutputFormat::Markdown => report::generate_markdown_report(report),
    };

    std::fs::write(path, &output)
        .with_context(|| format!("Failed to write report to {}", path.display()))?;
    info!("Report saved to {}", path.display());
    Ok(())
}

/// Print the statistics as an aligned table.
fn print_statistics(table: &StatsTable) {
    if table.is_empty() {
        println!("\n   No records were aggregated.");
        return;
    }

    let width = table
        .iter()
        .map(|(occupation, _)| occupation.chars().count())
        .max()
        .unwrap_or(0)
        .max("Occupation".len());

    println!("\n📊 Statistics for {} occupations:\n", table.len());
    println!(
        "   {:<width$}  {:>12}  {:>12}  {:>10}  {:>10}",
        "Occupation",
        "Min income",
        "Max income",
        "Min family",
        "Max family",
        width = width
    );
    for (occupation, stats) in table.iter() {
        println!(
            "   {:<width$}  {:>12}  {:>12}  {:>10}  {:>10}",
            occupation,
            stats.min_income,
            stats.max_income,
            stats.min_family_size,
            stats.max_family_size,
            width = width
        );
    }
}

fn print_summary(metadata: &ReportMetadata, outcome: &AggregateOutcome) {
    println!("\n📋 Summary:");
    println!("   Files read: {}", metadata.inputs.len());
    println!(
        "   Rows: {} read | {} accepted | {} rejected",
        metadata.rows_read, metadata.rows_accepted, metadata.rows_rejected
    );
    if let (Some(container), Some(status)) = (&metadata.container, metadata.container_status) {
        println!("   Container: {} ({})", container, status);
        println!("   Rows written: {}", metadata.rows_written);
    }
    println!("   Duration: {:.2}s", metadata.duration_seconds);

    if !outcome.rejected.is_empty() {
        warn!("{} rows were rejected", outcome.rejected.len());
        println!(
            "\n⚠️  {} rows were left out; the first was {}",
            outcome.rejected.len(),
            outcome.rejected[0]
        );
    }

    println!("\n✅ Done.");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::OccupationStats;
    use std::fs;
    use tempfile::TempDir;

    fn write_csv(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_aggregate_directory_of_files() {
        let dir = TempDir::new().unwrap();
        write_csv(
            dir.path(),
            "part-0.csv",
            "occupation,income,family_size\nClerk,30000,2\nEngineer,80000,3\n",
        );
        write_csv(
            dir.path(),
            "part-1.csv",
            "occupation,income,family_size\nClerk,45000,4\n",
        );

        let inputs = ingest::collect_inputs(dir.path()).unwrap();
        let outcome =
            aggregate_inputs(&inputs, &CsvOptions::default(), InvalidRowPolicy::Fail, false)
                .unwrap();

        assert_eq!(outcome.rows_read, 3);
        assert_eq!(
            outcome.table.get("Clerk"),
            Some(&OccupationStats {
                min_income: 30000,
                max_income: 45000,
                min_family_size: 2,
                max_family_size: 4,
            })
        );
    }

    #[test]
    fn test_invalid_row_fails_with_input_exit_code() {
        let dir = TempDir::new().unwrap();
        let path = write_csv(
            dir.path(),
            "input.csv",
            "occupation,income,family_size\nClerk,thirty,2\n",
        );

        let err = aggregate_inputs(&[path], &CsvOptions::default(), InvalidRowPolicy::Fail, false)
            .unwrap_err();
        let err = anyhow::Error::new(err).context("aggregating census input");
        assert_eq!(exit_code_for(&err), error::EXIT_INPUT);
    }

    #[test]
    fn test_read_only_modes_do_not_create_database() {
        let dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.database.path = dir.path().join("typo.db");
        let container: ContainerName = "occupation_statistics".parse().unwrap();

        let err = handle_check_connection(&config).unwrap_err();
        assert_eq!(exit_code_for(&err), error::EXIT_RUNTIME);
        assert!(handle_show(&config, &container).is_err());
        assert!(!config.database.path.exists());
    }

    #[test]
    fn test_exit_code_for_foreign_error() {
        let err = anyhow::anyhow!("something else");
        assert_eq!(exit_code_for(&err), EXIT_RUNTIME);
    }

    #[test]
    fn test_write_statistics_twice_keeps_one_row_per_occupation() {
        let dir = TempDir::new().unwrap();
        let path = write_csv(
            dir.path(),
            "input.csv",
            "occupation,income,family_size\nClerk,30000,2\nClerk,45000,4\nEngineer,80000,3\n",
        );
        let outcome =
            aggregate_inputs(&[path], &CsvOptions::default(), InvalidRowPolicy::Fail, false)
                .unwrap();

        let mut store = SqliteStore::open_in_memory().unwrap();
        let container: ContainerName = "census-analysis".parse().unwrap();

        let (status, written) = write_statistics(&mut store, &container, &outcome.table).unwrap();
        assert_eq!(status, ContainerStatus::Created);
        assert_eq!(written, 2);

        let (status, _) = write_statistics(&mut store, &container, &outcome.table).unwrap();
        assert_eq!(status, ContainerStatus::Existing);
        assert_eq!(store.row_count(&container).unwrap(), 2);
        assert_eq!(store.fetch_stats(&container).unwrap(), outcome.table);
    }

    #[test]
    fn test_write_report_json() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("report.json");
        let report = StatsReport {
            metadata: ReportMetadata {
                inputs: vec![PathBuf::from("input.csv")],
                database: None,
                container: None,
                container_status: None,
                generated_at: Utc::now(),
                rows_read: 0,
                rows_accepted: 0,
                rows_rejected: 0,
                rows_written: 0,
                duration_seconds: 0.0,
            },
            statistics: StatsTable::new(),
            rejected: Vec::new(),
        };

        write_report(&report, OutputFormat::Json, &path).unwrap();
        let json: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(json["metadata"]["rows_read"], 0);
        assert!(json["metadata"].get("container").is_none());
    }
}
