// src/pipeline/reconcile.rs

//! Store reconciler.
//!
//! Merges a batch of canonical rows into the store. Stored rows are
//! authoritative: an incoming row with a known key is discarded, so edits
//! made in the table are never overwritten.

use std::collections::{BTreeMap, HashSet};

use serde::Serialize;

use crate::models::{Annotation, CanonicalRow, Store, Table, columns, parse_key};

/// Counters for one reconciliation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// Batch rows whose key was already stored
    pub existing_count: usize,
    /// Rows appended to the store
    pub new_count: usize,
    /// Batch rows looked at, including duplicates and malformed rows
    pub total_processed: usize,
    /// Store size after the merge
    pub store_rows: usize,
    /// Repeated keys inside the batch (later occurrences dropped)
    pub duplicates_in_batch: usize,
    /// Rows without a usable key
    pub malformed: usize,
}

/// Merge `batch` into a copy of `store` and return it with the report.
///
/// The input store is left untouched; the caller commits the returned copy.
pub fn reconcile<I>(store: &Store, batch: I) -> (Store, ReconcileReport)
where
    I: IntoIterator<Item = CanonicalRow>,
{
    let mut merged = store.clone();
    let mut report = ReconcileReport::default();
    let mut seen = HashSet::new();

    for row in batch {
        report.total_processed += 1;
        if row.key == 0 {
            report.malformed += 1;
            continue;
        }
        if !seen.insert(row.key) {
            report.duplicates_in_batch += 1;
            continue;
        }
        if merged.insert_new(&row, Annotation::unset()) {
            log::debug!("[{}] new row", row.key);
            report.new_count += 1;
        } else {
            report.existing_count += 1;
        }
    }

    report.store_rows = merged.len();
    (merged, report)
}

/// Read a cleaned table back into canonical rows.
///
/// Fully blank lines are skipped; a row whose key is not a positive integer
/// comes back with key 0 so that [`reconcile`] counts it as malformed.
pub fn batch_from_table(table: &Table) -> Vec<CanonicalRow> {
    table
        .records()
        .filter(|record| record.values().any(|v| !v.trim().is_empty()))
        .map(|mut record: BTreeMap<String, String>| {
            let raw_key = record.remove(columns::KEY).unwrap_or_default();
            let key = parse_key(&raw_key).unwrap_or(0);
            if key == 0 {
                log::warn!("Malformed key '{raw_key}' in batch");
            }
            record.retain(|_, v| !v.is_empty());
            CanonicalRow::from_cells(key, &record)
        })
        .collect()
}
