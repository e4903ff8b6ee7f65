// src/pipeline/cursor.rs

//! Cursor tracker: where a scan starts and when it stops.
//!
//! Serial ids are issued densely, so the scan walks forward from just below
//! the highest stored key and stops once a long enough run of ids is missing.

use std::time::Duration;

use crate::error::{AppError, Result};
use crate::models::{CursorConfig, RawRecord};
use crate::services::{ProbeOutcome, RecordSource};

/// Caller overrides for a scan.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScanOptions {
    /// Scan from `since_key + 1` instead of the computed start
    pub since_key: Option<u64>,
    /// Stop after this many found records
    pub limit: Option<usize>,
}

/// What a scan collected.
#[derive(Debug, Clone, Default)]
pub struct ScanResult {
    pub records: Vec<RawRecord>,
    pub start_key: u64,
    /// Last key that was probed
    pub end_key: Option<u64>,
    pub last_found_key: Option<u64>,
    pub probed: usize,
    pub misses: usize,
    /// Transient failures that were retried past
    pub retries: usize,
    /// Whether the scan ended on the `limit`
    pub hit_limit: bool,
}

/// Position and stop state of a forward scan.
#[derive(Debug, Clone)]
pub struct CrawlCursor {
    pub start_key: u64,
    pub next_key: u64,
    pub consecutive_misses: u32,
    pub max_consecutive_miss: u32,
    /// Retries spent on `next_key`
    pub transient_retries: u32,
}

/// What the scan loop does after an outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorStep {
    /// Probe `next_key`
    Continue,
    /// Probe the same key again
    Retry,
    /// The miss threshold was reached
    Exhausted,
    /// The key kept failing; the run must abort
    GiveUp,
}

impl CrawlCursor {
    /// First key to probe: `max(min_start_key, store_max - buffer)`.
    pub fn start_key(store_max_key: Option<u64>, config: &CursorConfig) -> u64 {
        match store_max_key {
            Some(max) => max.saturating_sub(config.buffer).max(config.min_start_key),
            None => config.min_start_key,
        }
    }

    pub fn new(start_key: u64, config: &CursorConfig) -> Self {
        Self {
            start_key,
            next_key: start_key,
            consecutive_misses: 0,
            max_consecutive_miss: config.max_consecutive_miss,
            transient_retries: 0,
        }
    }

    pub fn found(&mut self) -> CursorStep {
        self.consecutive_misses = 0;
        self.advance()
    }

    pub fn miss(&mut self) -> CursorStep {
        self.consecutive_misses += 1;
        if self.consecutive_misses >= self.max_consecutive_miss {
            return CursorStep::Exhausted;
        }
        self.advance()
    }

    /// Neither advances nor resets the miss run.
    pub fn transient(&mut self, max_id_retries: u32) -> CursorStep {
        if self.transient_retries >= max_id_retries {
            return CursorStep::GiveUp;
        }
        self.transient_retries += 1;
        CursorStep::Retry
    }

    fn advance(&mut self) -> CursorStep {
        self.next_key += 1;
        self.transient_retries = 0;
        CursorStep::Continue
    }
}

/// Walk forward from the start key until the miss threshold is reached.
///
/// A key that stays transient after `max_id_retries` retries aborts the scan
/// with [`AppError::ScanAborted`]; nothing collected so far is returned.
pub async fn scan(
    source: &dyn RecordSource,
    config: &CursorConfig,
    retry_backoff: Duration,
    store_max_key: Option<u64>,
    options: ScanOptions,
) -> Result<ScanResult> {
    let start_key = match options.since_key {
        Some(since) => since.saturating_add(1).max(config.min_start_key),
        None => CrawlCursor::start_key(store_max_key, config),
    };
    let mut cursor = CrawlCursor::new(start_key, config);
    let mut result = ScanResult {
        start_key,
        ..ScanResult::default()
    };
    log::info!(
        "Scanning from {start_key} (store max: {}, stop after {} consecutive misses)",
        store_max_key.map_or_else(|| "none".to_string(), |k| k.to_string()),
        config.max_consecutive_miss
    );

    loop {
        if options.limit.is_some_and(|limit| result.records.len() >= limit) {
            result.hit_limit = true;
            break;
        }

        let key = cursor.next_key;
        result.end_key = Some(key);
        let step = match source.probe(key).await {
            ProbeOutcome::Found(record) => {
                log::info!("[{key}] found: {}", record.title);
                result.probed += 1;
                result.last_found_key = Some(key);
                result.records.push(record);
                cursor.found()
            }
            ProbeOutcome::Miss => {
                log::debug!("[{key}] miss ({} in a row)", cursor.consecutive_misses + 1);
                result.probed += 1;
                result.misses += 1;
                cursor.miss()
            }
            ProbeOutcome::Transient { endpoint, reason } => {
                match cursor.transient(config.max_id_retries) {
                    CursorStep::GiveUp => {
                        return Err(AppError::ScanAborted {
                            key,
                            last_found_key: result.last_found_key,
                            endpoint,
                            reason,
                        });
                    }
                    step => {
                        result.retries += 1;
                        let attempt = cursor.transient_retries;
                        let wait = retry_backoff * attempt;
                        log::warn!(
                            "[{key}] transient failure via {endpoint}: {reason}; \
                             retry {attempt} in {wait:?}"
                        );
                        tokio::time::sleep(wait).await;
                        step
                    }
                }
            }
        };

        if step == CursorStep::Exhausted {
            log::info!(
                "Stopping after {} consecutive misses at {key}",
                cursor.consecutive_misses
            );
            break;
        }
    }
    Ok(result)
}
