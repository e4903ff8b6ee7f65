// src/models/store.rs

//! The trial store: an ordered map from serial id to stored row.
//!
//! Rows already in the store are kept cell-for-cell, so edits made by people
//! (including columns the engine does not know about) survive every rewrite.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::models::columns::{self, SitePart};
use crate::models::{CanonicalRow, Table};

/// Human-maintained contact state of a row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Annotation(String);

impl Annotation {
    /// Sentinel for rows nobody has looked at yet.
    pub const UNSET: &'static str = "데이터없음";

    /// Values offered in the sheet's drop-down.
    pub const OPTIONS: [&'static str; 6] = [
        "데이터없음",
        "컨택필요",
        "컨택중",
        "컨택종료",
        "계약진행중",
        "계약완료",
    ];

    /// Keep a value exactly as written.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn unset() -> Self {
        Self(Self::UNSET.to_string())
    }

    pub fn is_unset(&self) -> bool {
        self.0 == Self::UNSET
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the value is one of the drop-down options.
    pub fn is_known(&self) -> bool {
        Self::OPTIONS.contains(&self.0.as_str())
    }
}

impl Default for Annotation {
    fn default() -> Self {
        Self::unset()
    }
}

impl fmt::Display for Annotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One row of a trial table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRow {
    pub key: u64,
    cells: BTreeMap<String, String>,
    pub annotation: Annotation,
}

impl StoredRow {
    /// Row for a newly merged canonical row.
    pub fn from_canonical(row: &CanonicalRow, annotation: Annotation) -> Self {
        let mut cells = row.to_cells();
        cells.remove(columns::KEY);
        cells.retain(|_, v| !v.is_empty());
        Self {
            key: row.key,
            cells,
            annotation,
        }
    }

    /// Cell value by column name, or an empty string.
    pub fn cell(&self, column: &str) -> &str {
        self.cells.get(column).map_or("", |v| v.as_str())
    }

    /// Same row with one extra cell set.
    pub fn with_cell(mut self, column: &str, value: impl Into<String>) -> Self {
        self.cells.insert(column.to_string(), value.into());
        self
    }

    /// Evaluate the row as a canonical row.
    pub fn canonical(&self) -> CanonicalRow {
        CanonicalRow::from_cells(self.key, &self.cells)
    }

    /// Same cells under a different annotation.
    pub fn with_annotation(&self, annotation: Annotation) -> Self {
        Self {
            key: self.key,
            cells: self.cells.clone(),
            annotation,
        }
    }

    fn render(&self, annotated: bool) -> BTreeMap<String, String> {
        let mut record = self.cells.clone();
        record.insert(columns::KEY.to_string(), self.key.to_string());
        if annotated {
            record.insert(
                columns::ANNOTATION.to_string(),
                self.annotation.as_str().to_string(),
            );
        }
        record
    }
}

/// Ordered collection of trial rows keyed by serial id.
#[derive(Debug, Clone)]
pub struct Store {
    name: String,
    header: Vec<String>,
    rows: BTreeMap<u64, StoredRow>,
    annotated: bool,
}

impl Store {
    /// Create an empty store.
    pub fn new(name: impl Into<String>, annotated: bool) -> Self {
        Self {
            name: name.into(),
            header: Vec::new(),
            rows: BTreeMap::new(),
            annotated,
        }
    }

    /// Create an empty store that inherits another table's column order.
    pub fn with_header(name: impl Into<String>, header: Vec<String>, annotated: bool) -> Self {
        Self {
            header,
            ..Self::new(name, annotated)
        }
    }

    /// Load a store from its table.
    ///
    /// Fully blank rows are skipped. Any other row without a valid, unique key
    /// makes the whole table unusable.
    pub fn from_table(name: impl Into<String>, table: &Table, annotated: bool) -> Result<Self> {
        let mut store = Self::with_header(name, table.header.clone(), annotated);
        if table.is_empty() {
            return Ok(store);
        }
        if table.column_index(columns::KEY).is_none() {
            return Err(AppError::integrity(
                &store.name,
                format!("header has no '{}' column", columns::KEY),
            ));
        }
        let has_annotation = table.column_index(columns::ANNOTATION).is_some();

        for (i, mut record) in table.records().enumerate() {
            if record.values().all(|v| v.trim().is_empty()) {
                continue;
            }
            let line = i + 2;
            let raw_key = record.remove(columns::KEY).unwrap_or_default();
            let key = parse_key(&raw_key).ok_or_else(|| {
                AppError::integrity(&store.name, format!("row {line}: malformed key '{raw_key}'"))
            })?;

            let annotation = if annotated {
                match record.remove(columns::ANNOTATION) {
                    Some(value) if has_annotation => Annotation::new(value),
                    _ => Annotation::unset(),
                }
            } else {
                Annotation::unset()
            };
            record.retain(|_, v| !v.is_empty());

            let row = StoredRow {
                key,
                cells: record,
                annotation,
            };
            if store.rows.insert(key, row).is_some() {
                return Err(AppError::integrity(
                    &store.name,
                    format!("row {line}: duplicate key {key}"),
                ));
            }
        }
        Ok(store)
    }

    /// Render rows in ascending key order under the merged header.
    pub fn to_table(&self) -> Table {
        let header = self.merged_header();
        let records: Vec<_> = self
            .rows
            .values()
            .map(|row| row.render(self.annotated))
            .collect();
        Table::from_records(header, records.iter())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn header(&self) -> &[String] {
        &self.header
    }

    pub fn is_annotated(&self) -> bool {
        self.annotated
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Highest key in the store.
    pub fn max_key(&self) -> Option<u64> {
        self.rows.keys().next_back().copied()
    }

    pub fn contains(&self, key: u64) -> bool {
        self.rows.contains_key(&key)
    }

    pub fn get(&self, key: u64) -> Option<&StoredRow> {
        self.rows.get(&key)
    }

    /// Rows in ascending key order.
    pub fn rows(&self) -> impl Iterator<Item = &StoredRow> {
        self.rows.values()
    }

    /// Rows whose annotation is outside the drop-down options.
    pub fn unknown_annotations(&self) -> usize {
        if !self.annotated {
            return 0;
        }
        self.rows
            .values()
            .filter(|row| !row.annotation.is_known())
            .count()
    }

    pub fn keys(&self) -> impl Iterator<Item = u64> + '_ {
        self.rows.keys().copied()
    }

    /// Add a row whose key is not yet stored. Existing rows are never replaced.
    pub fn insert_new(&mut self, row: &CanonicalRow, annotation: Annotation) -> bool {
        if row.key == 0 || self.rows.contains_key(&row.key) {
            return false;
        }
        self.rows
            .insert(row.key, StoredRow::from_canonical(row, annotation));
        true
    }

    /// Add an already stored row (used when materializing views).
    pub fn insert_stored(&mut self, row: StoredRow) -> bool {
        if row.key == 0 || self.rows.contains_key(&row.key) {
            return false;
        }
        self.rows.insert(row.key, row);
        true
    }

    /// Verify keys are positive, unique and ascending before a commit.
    pub fn check_integrity(&self) -> Result<()> {
        let mut previous = 0u64;
        for (key, row) in &self.rows {
            if *key == 0 || row.key != *key {
                return Err(AppError::integrity(
                    &self.name,
                    format!("row keyed {key} holds key {}", row.key),
                ));
            }
            if *key <= previous {
                return Err(AppError::integrity(
                    &self.name,
                    format!("key {key} out of order after {previous}"),
                ));
            }
            previous = *key;
        }
        Ok(())
    }

    /// Existing header, then any missing columns in the canonical layout.
    fn merged_header(&self) -> Vec<String> {
        let mut header: Vec<String> = Vec::with_capacity(self.header.len());
        let mut seen = BTreeSet::new();
        for column in &self.header {
            if seen.insert(column.clone()) {
                header.push(column.clone());
            }
        }

        if !seen.contains(columns::KEY) {
            header.insert(0, columns::KEY.to_string());
            seen.insert(columns::KEY.to_string());
        }
        if self.annotated && !seen.contains(columns::ANNOTATION) {
            let at = header
                .iter()
                .position(|c| c == columns::KEY)
                .map_or(0, |i| i + 1);
            header.insert(at, columns::ANNOTATION.to_string());
            seen.insert(columns::ANNOTATION.to_string());
        }

        for column in canonical_layout(self.rows.values().map(|r| &r.cells)) {
            if seen.insert(column.clone()) {
                header.push(column);
            }
        }
        header
    }
}

/// Parse a stored key: a positive integer, surrounding whitespace allowed.
pub fn parse_key(raw: &str) -> Option<u64> {
    raw.trim().parse::<u64>().ok().filter(|k| *k > 0)
}

/// Default column order for the columns present in `rows`.
pub fn canonical_layout<'a, I>(rows: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a BTreeMap<String, String>>,
{
    let mut present = BTreeSet::new();
    let mut max_site = 0;
    for cells in rows {
        for column in cells.keys() {
            if let Some((index, SitePart::Name)) = columns::parse_site_column(column) {
                max_site = max_site.max(index);
            }
            present.insert(column.as_str());
        }
    }

    let mut layout: Vec<String> = columns::STORE_LEADING
        .iter()
        .map(|c| c.to_string())
        .collect();
    layout.extend((1..=max_site).map(columns::site_column));
    layout.extend(columns::STORE_TRAILING.iter().map(|c| c.to_string()));

    let known: BTreeSet<String> = layout.iter().cloned().collect();
    let extra: Vec<String> = present
        .into_iter()
        .filter(|c| !known.contains(*c) && columns::parse_site_column(c).is_none())
        .map(str::to_string)
        .collect();
    layout.extend(extra);
    layout
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Status;

    fn row(key: u64, title: &str) -> CanonicalRow {
        CanonicalRow {
            key,
            title: title.to_string(),
            status: Status::Recruiting,
            period_start_month: None,
            period_end_month: None,
            sites: vec!["가나병원".to_string()],
            fields: BTreeMap::new(),
        }
    }

    fn table(header: &[&str], rows: &[&[&str]]) -> Table {
        Table {
            header: header.iter().map(|c| c.to_string()).collect(),
            rows: rows
                .iter()
                .map(|r| r.iter().map(|c| c.to_string()).collect())
                .collect(),
        }
    }

    #[test]
    fn test_insert_new_never_overwrites() {
        let mut store = Store::new("trials", false);
        assert!(store.insert_new(&row(5, "first"), Annotation::unset()));
        assert!(!store.insert_new(&row(5, "second"), Annotation::unset()));
        assert_eq!(store.get(5).unwrap().cell(columns::TITLE), "first");
        assert!(!store.insert_new(&row(0, "zero"), Annotation::unset()));
    }

    #[test]
    fn test_rows_iterate_in_key_order() {
        let mut store = Store::new("trials", false);
        for key in [30, 10, 20] {
            store.insert_new(&row(key, "t"), Annotation::unset());
        }
        assert_eq!(store.keys().collect::<Vec<_>>(), vec![10, 20, 30]);
        assert_eq!(store.max_key(), Some(30));
        assert!(store.check_integrity().is_ok());
    }

    #[test]
    fn test_from_table_rejects_malformed_key() {
        let t = table(&["clncTestSn", "임상시험명"], &[&["12a", "x"]]);
        let err = Store::from_table("trials", &t, false).unwrap_err();
        assert!(matches!(err, AppError::Integrity { .. }));
    }

    #[test]
    fn test_from_table_rejects_duplicate_key() {
        let t = table(&["clncTestSn"], &[&["3"], &["3"]]);
        assert!(Store::from_table("trials", &t, false).is_err());
    }

    #[test]
    fn test_from_table_skips_blank_rows() {
        let t = table(&["clncTestSn", "임상시험명"], &[&["", " "], &["4", "y"]]);
        let store = Store::from_table("trials", &t, false).unwrap();
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_unknown_columns_and_edits_survive_rewrite() {
        let t = table(
            &["clncTestSn", "메모", "진행상태", "임상시험명"],
            &[&["9", "전화함", "보류", "사람이 고친 제목"]],
        );
        let mut store = Store::from_table("trials", &t, false).unwrap();
        store.insert_new(&row(10, "새 시험"), Annotation::unset());

        let out = store.to_table();
        assert_eq!(&out.header[..4], &t.header[..]);
        assert_eq!(out.rows[0][..4], t.rows[0][..]);
        let site_col = out.column_index("실시기관1").unwrap();
        assert_eq!(out.rows[1][site_col], "가나병원");
    }

    #[test]
    fn test_annotated_store_reads_and_writes_annotation() {
        let t = table(&["clncTestSn", "컨택상태"], &[&["1", "컨택중"]]);
        let mut store = Store::from_table("view", &t, true).unwrap();
        assert_eq!(store.get(1).unwrap().annotation.as_str(), "컨택중");
        store.insert_new(&row(2, "t"), Annotation::unset());

        let out = store.to_table();
        assert_eq!(out.header[1], columns::ANNOTATION);
        assert_eq!(out.rows[1][1], Annotation::UNSET);
    }

    #[test]
    fn test_annotation_column_placed_after_key_for_new_tables() {
        let mut store = Store::new("view", true);
        store.insert_new(&row(1, "t"), Annotation::unset());
        let out = store.to_table();
        assert_eq!(out.header[0], columns::KEY);
        assert_eq!(out.header[1], columns::ANNOTATION);
        assert_eq!(out.header[2], columns::STATUS);
    }

    #[test]
    fn test_from_canonical_matches_reloaded_row() {
        let mut store = Store::new("trials", false);
        store.insert_new(&row(7, "같은 행"), Annotation::unset());
        let reloaded = Store::from_table("trials", &store.to_table(), false).unwrap();
        assert_eq!(reloaded.get(7), store.get(7));
        assert_eq!(store.get(7).unwrap().cell(columns::KEY), "");
    }

    #[test]
    fn test_annotation_options_are_known() {
        for option in Annotation::OPTIONS {
            assert!(Annotation::new(option).is_known());
        }
        assert!(!Annotation::new("전화함").is_known());
        assert!(!Annotation::new("").is_known());
    }

    #[test]
    fn test_unknown_annotations_are_counted_on_views_only() {
        let t = table(
            &["clncTestSn", "컨택상태"],
            &[&["1", "컨택중"], &["2", "전화함"], &["3", "데이터없음"]],
        );
        assert_eq!(Store::from_table("view", &t, true).unwrap().unknown_annotations(), 1);
        assert_eq!(Store::from_table("trials", &t, false).unwrap().unknown_annotations(), 0);
    }

    #[test]
    fn test_parse_key_requires_positive_integer() {
        assert_eq!(parse_key(" 202400001 "), Some(202400001));
        assert_eq!(parse_key("0"), None);
        assert_eq!(parse_key("-4"), None);
        assert_eq!(parse_key("12.5"), None);
    }
}
