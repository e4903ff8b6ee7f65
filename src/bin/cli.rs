//! trialcrawl CLI
//!
//! Local execution entry point.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use trialcrawl::{
    error::Result,
    models::{Config, Store},
    pipeline::{self, RunContext, ScanOptions},
    services::{EndpointProbe, ProbeOutcome, RecordSource},
    storage::{LocalStorage, TableStorage, view_key},
    utils::log as runlog,
};

/// trialcrawl - Clinical Trial Catalog Crawler
#[derive(Parser, Debug)]
#[command(
    name = "trialcrawl",
    version,
    about = "Incremental clinical trial crawler and store reconciler"
)]
struct Cli {
    /// Path to storage directory containing config.toml and the tables
    #[arg(short, long, default_value = "storage")]
    storage_dir: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run full pipeline: Crawl → Clean → Merge → Views
    Run {
        /// Start right after this key instead of the store's maximum
        #[arg(long)]
        since_key: Option<u64>,

        /// Stop after this many found records
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Scan new ids and write the raw checkpoint only
    Crawl {
        #[arg(long)]
        since_key: Option<u64>,

        #[arg(long)]
        limit: Option<usize>,
    },

    /// Clean a raw checkpoint file
    Clean {
        /// Raw checkpoint CSV
        #[arg(short, long)]
        input: PathBuf,

        /// Output path (default: <input stem>_clean.csv)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Merge a cleaned file into the store and regenerate views
    Merge {
        /// Cleaned CSV
        #[arg(short, long)]
        input: PathBuf,
    },

    /// Regenerate views from the current store
    Views,

    /// Probe a single serial id and print the outcome
    Probe {
        #[arg(long)]
        key: u64,
    },

    /// Validate configuration
    Validate,

    /// Show store and last run info
    Info,
}

/// Initialize logging based on verbosity flag.
fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

/// Main entry point for the CLI application.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config_path = cli.storage_dir.join("config.toml");
    let config = Config::load_or_default(&config_path);
    if let Err(e) = config.validate() {
        log::error!("Config validation failed: {}", e);
        return Err(e);
    }
    log::info!("Loaded configuration from {}", cli.storage_dir.display());

    let storage = LocalStorage::new(&cli.storage_dir);

    match cli.command {
        Command::Run { since_key, limit } => {
            let probe = EndpointProbe::new(&config)?;
            let mut ctx = RunContext::new(config, &cli.storage_dir);
            let options = ScanOptions { since_key, limit };
            if let Err(e) = pipeline::run(&mut ctx, &probe, &storage, options).await {
                if e.is_fatal_to_run() {
                    log::error!("Run aborted, store left unchanged: {}", e);
                }
                return Err(e);
            }
        }

        Command::Crawl { since_key, limit } => {
            let probe = EndpointProbe::new(&config)?;
            let mut ctx = RunContext::new(config, &cli.storage_dir);
            let options = ScanOptions { since_key, limit };
            if let Some(path) = pipeline::crawl_only(&mut ctx, &probe, &storage, options).await? {
                log::info!("Next: trialcrawl clean -i {}", path.display());
            }
        }

        Command::Clean { input, output } => {
            let output = output.unwrap_or_else(|| pipeline::run::clean_path_for(&input));
            let report = pipeline::clean_file(&config, &input, &output).await?;
            runlog::summary(
                "Clean",
                &[
                    ("Rows in", report.rows_in.to_string()),
                    ("Rows out", report.rows_out.to_string()),
                    ("Rejected", report.rejected.to_string()),
                    ("Defaulted period", report.defaulted_period.to_string()),
                    ("Output", output.display().to_string()),
                ],
            );
        }

        Command::Merge { input } => {
            let mut ctx = RunContext::new(config, &cli.storage_dir);
            let report = pipeline::merge_file(&mut ctx, &storage, &input).await?;
            runlog::summary(
                "Merge",
                &[
                    ("Existing", report.existing_count.to_string()),
                    ("New", report.new_count.to_string()),
                    ("Malformed", report.malformed.to_string()),
                    ("Processed", report.total_processed.to_string()),
                    ("Store rows", report.store_rows.to_string()),
                ],
            );
        }

        Command::Views => {
            let mut ctx = RunContext::new(config, &cli.storage_dir);
            let deltas = pipeline::regenerate_views(&mut ctx, &storage).await?;
            log::info!("Regenerated {} views", deltas.len());
        }

        Command::Probe { key } => {
            let probe = EndpointProbe::new(&config)?;
            match probe.probe(key).await {
                ProbeOutcome::Found(record) => {
                    log::info!("[{key}] found: {}", record.title);
                    for (label, value) in &record.fields {
                        runlog::sub_item(&format!("{label}: {value}"));
                    }
                    for (i, site) in record.sites.iter().enumerate() {
                        runlog::sub_item(&format!("site {}: {}", i + 1, site.name));
                    }
                }
                ProbeOutcome::Miss => log::info!("[{key}] miss"),
                ProbeOutcome::Transient { endpoint, reason } => {
                    log::warn!("[{key}] transient failure via {endpoint}: {reason}")
                }
            }
        }

        Command::Validate => {
            log::info!(
                "✓ Config OK ({} endpoints, {} views)",
                config.endpoints.len(),
                config.views.len()
            );
        }

        Command::Info => {
            log::info!("Storage directory: {}", cli.storage_dir.display());

            let store = pipeline::run::load_store(&storage, &config).await?;
            log::info!(
                "Store '{}': {} rows, max key {}",
                store.name(),
                store.len(),
                store
                    .max_key()
                    .map_or_else(|| "none".to_string(), |k| k.to_string())
            );

            for view in &config.views {
                let rows = match storage.load_table(&view_key(&view.name)).await? {
                    Some(table) => Store::from_table(&view.name, &table, true)?.len(),
                    None => 0,
                };
                log::info!("View '{}' ({}): {} rows", view.name, view.predicate.describe(), rows);
            }

            match storage.read_text(pipeline::run::SUMMARY_FILE).await? {
                Some(content) => {
                    if let Ok(summary) = serde_json::from_str::<serde_json::Value>(&content) {
                        if let Some(finished) = summary.get("finished_at") {
                            log::info!("Last run finished: {}", finished);
                        }
                        if let Some(ok) = summary.get("ok") {
                            log::info!("Last run ok: {}", ok);
                        }
                    }
                }
                None => log::info!("No run recorded yet."),
            }
        }
    }

    log::info!("Done!");

    Ok(())
}
