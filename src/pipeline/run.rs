// src/pipeline/run.rs

//! Run orchestration.
//!
//! One invocation is one [`RunContext`]: cursor scan, raw checkpoint,
//! normalization, clean checkpoint, reconciliation, view regeneration and a
//! persisted summary. Nothing is written to the store or the views until every
//! step that can fail on bad data has passed.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{Local, NaiveDateTime};
use fs2::FileExt;
use futures::future::try_join_all;
use serde::Serialize;

use crate::error::{AppError, Result};
use crate::models::{Config, RawRecord, Store, Table, columns, raw_layout};
use crate::pipeline::cursor::{self, ScanOptions, ScanResult};
use crate::pipeline::normalize::{NormalizeReport, Normalizer, rows_to_table};
use crate::pipeline::reconcile::{self, ReconcileReport, batch_from_table};
use crate::pipeline::views::{self, MaterializedView, PremiumFunnel, ViewDelta, ViewMatcher};
use crate::services::RecordSource;
use crate::storage::{LocalStorage, TableStorage, view_key};
use crate::utils::log;

/// Lock file taken for the whole run.
pub const LOCK_FILE: &str = ".trialcrawl.lock";

/// Summary document written after every run.
pub const SUMMARY_FILE: &str = "last_run.json";

const STAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Everything one invocation needs; built once and passed down.
#[derive(Debug)]
pub struct RunContext {
    pub config: Config,
    pub storage_dir: PathBuf,
    pub output_dir: PathBuf,
    pub started_at: NaiveDateTime,
    pub summary: RunSummary,
}

/// Counters and outcome of a run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub started_at: String,
    pub finished_at: Option<String>,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub scan: ScanSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_checkpoint: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clean_checkpoint: Option<PathBuf>,
    pub normalize: NormalizeReport,
    pub reconcile: ReconcileReport,
    pub views: BTreeMap<String, ViewDelta>,
    /// Stage counts of premium views
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub funnels: BTreeMap<String, PremiumFunnel>,
    /// Whether the store table was rewritten by this run
    pub store_committed: bool,
}

/// Scan counters for the summary.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScanSummary {
    pub start_key: u64,
    pub end_key: Option<u64>,
    pub last_found_key: Option<u64>,
    pub probed: usize,
    pub found: usize,
    pub misses: usize,
    pub retries: usize,
}

impl From<&ScanResult> for ScanSummary {
    fn from(scan: &ScanResult) -> Self {
        Self {
            start_key: scan.start_key,
            end_key: scan.end_key,
            last_found_key: scan.last_found_key,
            probed: scan.probed,
            found: scan.records.len(),
            misses: scan.misses,
            retries: scan.retries,
        }
    }
}

/// Exclusive advisory lock on the storage directory, released on drop.
#[derive(Debug)]
pub struct RunLock {
    file: File,
}

impl RunLock {
    /// Take the lock or fail at once if another run holds it.
    pub fn acquire(storage_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(storage_dir)?;
        let path = storage_dir.join(LOCK_FILE);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        if file.try_lock_exclusive().is_err() {
            return Err(AppError::RunLocked(path.display().to_string()));
        }
        Ok(Self { file })
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

impl RunContext {
    pub fn new(config: Config, storage_dir: impl Into<PathBuf>) -> Self {
        let storage_dir = storage_dir.into();
        let output_dir = config.store.output_path(&storage_dir);
        let started_at = Local::now().naive_local();
        Self {
            config,
            storage_dir,
            output_dir,
            started_at,
            summary: RunSummary {
                started_at: started_at.format("%Y-%m-%d %H:%M:%S").to_string(),
                ..RunSummary::default()
            },
        }
    }

    pub fn lock(&self) -> Result<RunLock> {
        RunLock::acquire(&self.storage_dir)
    }

    /// `<output_dir>/increment_YYYYMMDD_HHMMSS.csv` for this run.
    pub fn raw_checkpoint_path(&self) -> PathBuf {
        self.output_dir.join(format!(
            "increment_{}.csv",
            self.started_at.format(STAMP_FORMAT)
        ))
    }

    fn finish(&mut self, error: Option<&AppError>) {
        self.summary.finished_at = Some(Local::now().format("%Y-%m-%d %H:%M:%S").to_string());
        self.summary.ok = error.is_none();
        self.summary.error = error.map(|e| e.to_string());
    }
}

/// Cleaned file next to a raw checkpoint: same stem plus `_clean`.
pub fn clean_path_for(raw: &Path) -> PathBuf {
    let stem = raw
        .file_stem()
        .map_or_else(|| "batch".into(), |s| s.to_string_lossy().into_owned());
    raw.with_file_name(format!("{stem}_clean.csv"))
}

/// Load the main store, or an empty one on the first run.
pub async fn load_store(storage: &dyn TableStorage, config: &Config) -> Result<Store> {
    let name = &config.store.table;
    match storage.load_table(name).await? {
        Some(table) => Store::from_table(name, &table, config.store.annotate_main),
        None => {
            log::sub_item(&format!("No '{name}' table yet, starting empty"));
            Ok(Store::new(name, config.store.annotate_main))
        }
    }
}

/// Load each view's previous table.
async fn load_previous_views(
    storage: &dyn TableStorage,
    config: &Config,
) -> Result<BTreeMap<String, Store>> {
    let mut previous = BTreeMap::new();
    for view in &config.views {
        if let Some(table) = storage.load_table(&view_key(&view.name)).await? {
            let store = Store::from_table(&view.name, &table, true)?;
            let unknown = store.unknown_annotations();
            if unknown > 0 {
                log::warn(&format!(
                    "View '{}': {} rows carry a {} value outside the options",
                    view.name,
                    unknown,
                    columns::ANNOTATION
                ));
            }
            previous.insert(view.name.clone(), store);
        }
    }
    Ok(previous)
}

fn materialize_all(
    store: &Store,
    config: &Config,
    previous: &BTreeMap<String, Store>,
) -> Result<Vec<MaterializedView>> {
    let matcher = ViewMatcher::new(&config.premium)?;
    Ok(config
        .views
        .iter()
        .map(|definition| {
            views::materialize(store, definition, previous.get(&definition.name), &matcher)
        })
        .collect())
}

/// Write all view tables concurrently.
async fn write_views(storage: &dyn TableStorage, views: &[MaterializedView]) -> Result<()> {
    let writes = views.iter().map(|view| async move {
        let table = view.rows.to_table();
        storage.write_table(&view_key(&view.definition.name), &table).await
    });
    try_join_all(writes).await?;
    Ok(())
}

/// Persist views, then the store. Returns whether the store was rewritten.
///
/// Views are derived and rebuilt on every run, so a failure while writing
/// them leaves the store as it was. The store table is the last write.
async fn commit(
    storage: &dyn TableStorage,
    table: &str,
    merged: &Store,
    new_count: usize,
    views: &[MaterializedView],
) -> Result<bool> {
    merged.check_integrity()?;
    for view in views {
        view.rows.check_integrity()?;
    }
    write_views(storage, views).await?;
    if new_count == 0 {
        return Ok(false);
    }
    storage.write_table(table, &merged.to_table()).await?;
    Ok(true)
}

fn record_views(summary: &mut RunSummary, views: &[MaterializedView]) {
    summary.views = views
        .iter()
        .map(|v| (v.definition.name.clone(), v.delta.clone()))
        .collect();
    summary.funnels = views
        .iter()
        .filter_map(|v| Some((v.definition.name.clone(), v.funnel.clone()?)))
        .collect();
}

fn log_views(views: &[MaterializedView]) {
    for view in views {
        log::sub_item(&format!(
            "{}: {} rows (+{} -{} ={})",
            view.definition.name,
            view.rows.len(),
            view.delta.entered,
            view.delta.left,
            view.delta.retained
        ));
        if let Some(funnel) = &view.funnel {
            let stages: Vec<String> = funnel
                .stages()
                .iter()
                .map(|(stage, count)| format!("{stage} {count}"))
                .collect();
            log::sub_item(&format!("  funnel: {}", stages.join(" → ")));
        }
    }
}

async fn write_summary(storage: &dyn TableStorage, summary: &RunSummary) -> Result<()> {
    let json = serde_json::to_string_pretty(summary)?;
    storage.write_text(SUMMARY_FILE, &json).await
}

fn records_to_table(records: &[RawRecord]) -> Table {
    let cells: Vec<BTreeMap<String, String>> = records.iter().map(RawRecord::to_cells).collect();
    Table::from_records(raw_layout(cells.iter()), cells.iter())
}

async fn scan_store(
    ctx: &RunContext,
    source: &dyn RecordSource,
    store: &Store,
    options: ScanOptions,
) -> Result<ScanResult> {
    cursor::scan(
        source,
        &ctx.config.cursor,
        Duration::from_millis(ctx.config.crawler.retry_backoff_ms),
        store.max_key(),
        options,
    )
    .await
}

/// Full incremental run: scan, checkpoint, clean, merge, regenerate views.
///
/// The summary is persisted whether the run succeeds or not.
pub async fn run(
    ctx: &mut RunContext,
    source: &dyn RecordSource,
    storage: &dyn TableStorage,
    options: ScanOptions,
) -> Result<RunSummary> {
    let _lock = ctx.lock()?;
    let result = run_locked(ctx, source, storage, options).await;
    ctx.finish(result.as_ref().err());
    if let Err(e) = write_summary(storage, &ctx.summary).await {
        log::warn(&format!("Failed to write run summary: {e}"));
    }
    result.map(|()| ctx.summary.clone())
}

async fn run_locked(
    ctx: &mut RunContext,
    source: &dyn RecordSource,
    storage: &dyn TableStorage,
    options: ScanOptions,
) -> Result<()> {
    let total = 5;
    log::header("Incremental crawl");

    log::step(1, total, "Loading store and views");
    let store = load_store(storage, &ctx.config).await?;
    store.check_integrity()?;
    let previous_views = load_previous_views(storage, &ctx.config).await?;
    log::sub_item(&format!(
        "{} rows, max key {}",
        store.len(),
        store.max_key().map_or_else(|| "none".to_string(), |k| k.to_string())
    ));

    log::step(2, total, "Scanning new serial ids");
    let scan = scan_store(ctx, source, &store, options).await?;
    ctx.summary.scan = ScanSummary::from(&scan);
    if !scan.records.is_empty() {
        let raw_path = ctx.raw_checkpoint_path();
        LocalStorage::write_csv_file(&raw_path, &records_to_table(&scan.records)).await?;
        log::sub_item(&format!("Raw checkpoint: {}", raw_path.display()));
        ctx.summary.raw_checkpoint = Some(raw_path);
    }

    log::step(3, total, "Normalizing records");
    let normalizer = Normalizer::new(&ctx.config.normalize)?;
    let (rows, normalize_report) = normalizer.normalize_batch(&scan.records);
    if let Some(raw_path) = &ctx.summary.raw_checkpoint {
        let clean_path = clean_path_for(raw_path);
        LocalStorage::write_csv_file(&clean_path, &rows_to_table(&rows)).await?;
        ctx.summary.clean_checkpoint = Some(clean_path);
    }
    ctx.summary.normalize = normalize_report;

    log::step(4, total, "Reconciling into the store");
    let (merged, reconcile_report) = reconcile::reconcile(&store, rows);
    let new_count = reconcile_report.new_count;
    ctx.summary.reconcile = reconcile_report;

    log::step(5, total, "Regenerating views");
    let materialized = materialize_all(&merged, &ctx.config, &previous_views)?;
    ctx.summary.store_committed = commit(
        storage,
        &ctx.config.store.table,
        &merged,
        new_count,
        &materialized,
    )
    .await?;
    log_views(&materialized);
    record_views(&mut ctx.summary, &materialized);

    log_run_summary(&ctx.summary);
    log::success("Run complete");
    Ok(())
}

/// Scan and write the raw checkpoint only.
pub async fn crawl_only(
    ctx: &mut RunContext,
    source: &dyn RecordSource,
    storage: &dyn TableStorage,
    options: ScanOptions,
) -> Result<Option<PathBuf>> {
    let _lock = ctx.lock()?;
    let store = load_store(storage, &ctx.config).await?;
    let scan = scan_store(ctx, source, &store, options).await?;
    ctx.summary.scan = ScanSummary::from(&scan);
    if scan.records.is_empty() {
        log::sub_item("No new records");
        return Ok(None);
    }
    let raw_path = ctx.raw_checkpoint_path();
    LocalStorage::write_csv_file(&raw_path, &records_to_table(&scan.records)).await?;
    log::sub_item(&format!(
        "{} records written to {}",
        scan.records.len(),
        raw_path.display()
    ));
    Ok(Some(raw_path))
}

/// Clean a raw checkpoint file into a cleaned file.
pub async fn clean_file(config: &Config, input: &Path, output: &Path) -> Result<NormalizeReport> {
    let table = LocalStorage::read_csv_file(input).await?;
    let records: Vec<RawRecord> = table
        .records()
        .filter(|r| r.values().any(|v| !v.trim().is_empty()))
        .map(|r| RawRecord::from_cells(&r))
        .collect();
    let normalizer = Normalizer::new(&config.normalize)?;
    let (rows, report) = normalizer.normalize_batch(&records);
    LocalStorage::write_csv_file(output, &rows_to_table(&rows)).await?;
    Ok(report)
}

/// Merge a cleaned file into the store and regenerate the views.
pub async fn merge_file(
    ctx: &mut RunContext,
    storage: &dyn TableStorage,
    input: &Path,
) -> Result<ReconcileReport> {
    let _lock = ctx.lock()?;
    let store = load_store(storage, &ctx.config).await?;
    let previous_views = load_previous_views(storage, &ctx.config).await?;
    let batch = batch_from_table(&LocalStorage::read_csv_file(input).await?);

    let (merged, report) = reconcile::reconcile(&store, batch);
    let materialized = materialize_all(&merged, &ctx.config, &previous_views)?;
    ctx.summary.store_committed = commit(
        storage,
        &ctx.config.store.table,
        &merged,
        report.new_count,
        &materialized,
    )
    .await?;
    log_views(&materialized);
    ctx.summary.reconcile = report.clone();
    record_views(&mut ctx.summary, &materialized);
    Ok(report)
}

/// Regenerate every view from the current store.
pub async fn regenerate_views(
    ctx: &mut RunContext,
    storage: &dyn TableStorage,
) -> Result<BTreeMap<String, ViewDelta>> {
    let _lock = ctx.lock()?;
    let store = load_store(storage, &ctx.config).await?;
    let previous_views = load_previous_views(storage, &ctx.config).await?;
    let materialized = materialize_all(&store, &ctx.config, &previous_views)?;
    commit(storage, &ctx.config.store.table, &store, 0, &materialized).await?;
    log_views(&materialized);
    record_views(&mut ctx.summary, &materialized);
    Ok(ctx.summary.views.clone())
}

fn log_run_summary(summary: &RunSummary) {
    log::separator();
    log::summary(
        "Run",
        &[
            ("Start key", summary.scan.start_key.to_string()),
            (
                "Last found key",
                summary
                    .scan
                    .last_found_key
                    .map_or_else(|| "none".to_string(), |k| k.to_string()),
            ),
            ("Found", summary.scan.found.to_string()),
            ("Rejected", summary.normalize.rejected.to_string()),
            ("Existing", summary.reconcile.existing_count.to_string()),
            ("New", summary.reconcile.new_count.to_string()),
            ("Processed", summary.reconcile.total_processed.to_string()),
            ("Store rows", summary.reconcile.store_rows.to_string()),
        ],
    );
}
