// src/pipeline/normalize.rs

//! Normalizer: raw record in, canonical row or rejection out.
//!
//! Steps, in order: period split, status extraction, column drop, site
//! cleanup, then the garbage and sparseness checks. Pure and deterministic.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::NaiveDate;
use regex::Regex;
use serde::Serialize;

use crate::error::Result;
use crate::models::{
    CanonicalRow, MonthStamp, NormalizeConfig, RawRecord, Status, Table, canonical_layout,
    columns,
};

/// Why a record never became a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    MissingKey,
    EmptyTitle,
    GarbageTitle,
    NoCoreFields,
    TooSparse,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            RejectReason::MissingKey => "missing key",
            RejectReason::EmptyTitle => "empty title",
            RejectReason::GarbageTitle => "garbage title",
            RejectReason::NoCoreFields => "no core fields",
            RejectReason::TooSparse => "too few values",
        };
        f.write_str(text)
    }
}

/// Outcome of normalizing one record.
#[derive(Debug, Clone, PartialEq)]
pub enum Normalized {
    Row(CanonicalRow),
    Rejected(RejectReason),
}

/// Counters for one normalized batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NormalizeReport {
    pub rows_in: usize,
    pub rows_out: usize,
    pub rejected: usize,
    /// Rows whose period was missing or unparseable
    pub defaulted_period: usize,
    pub unclassified_status: usize,
    /// Distinct column names removed
    pub dropped_columns: usize,
}

/// Record cleaner with its patterns compiled once.
pub struct Normalizer {
    config: NormalizeConfig,
    status_prefix: Regex,
    full_date: Regex,
    year_month: Regex,
    korean_year_month: Regex,
    korean_year: Regex,
}

/// Row plus the bookkeeping the batch report needs.
struct Cleaned {
    result: Normalized,
    defaulted_period: bool,
    dropped: Vec<String>,
}

impl Normalizer {
    pub fn new(config: &NormalizeConfig) -> Result<Self> {
        let labels = Status::RECOGNIZED
            .iter()
            .map(|s| regex::escape(s.label()))
            .collect::<Vec<_>>()
            .join("|");
        Ok(Self {
            config: config.clone(),
            status_prefix: Regex::new(&format!(
                r"^\s*[\[(【]?\s*({labels})\s*[\])】]?\s*[-–:·•]?\s*"
            ))?,
            full_date: Regex::new(r"^(\d{4})[-./](\d{1,2})[-./](\d{1,2})$")?,
            year_month: Regex::new(r"^(\d{4})[-./](\d{1,2})$")?,
            korean_year_month: Regex::new(r"(\d{4})\s*년\s*(\d{1,2})\s*월")?,
            korean_year: Regex::new(r"(\d{4})\s*년")?,
        })
    }

    /// Normalize a single record.
    pub fn normalize(&self, record: &RawRecord) -> Normalized {
        self.clean(record).result
    }

    /// Normalize a batch, keeping accepted rows in input order.
    pub fn normalize_batch(&self, records: &[RawRecord]) -> (Vec<CanonicalRow>, NormalizeReport) {
        let mut report = NormalizeReport {
            rows_in: records.len(),
            ..NormalizeReport::default()
        };
        let mut dropped = BTreeSet::new();
        let mut rows = Vec::with_capacity(records.len());

        for record in records {
            let cleaned = self.clean(record);
            dropped.extend(cleaned.dropped);
            match cleaned.result {
                Normalized::Row(row) => {
                    if cleaned.defaulted_period {
                        report.defaulted_period += 1;
                    }
                    if row.status == Status::Unclassified {
                        report.unclassified_status += 1;
                    }
                    rows.push(row);
                }
                Normalized::Rejected(reason) => {
                    log::debug!("[{}] rejected: {reason}", record.key);
                    report.rejected += 1;
                }
            }
        }

        report.rows_out = rows.len();
        report.dropped_columns = dropped.len();
        (rows, report)
    }

    fn clean(&self, record: &RawRecord) -> Cleaned {
        // Period
        let period = record.field(columns::PERIOD);
        let (start, end, defaulted_period) = self.split_period(period);

        // Status and title
        let (prefix, title) = self.strip_status_prefix(&record.title);
        let status = self.pick_status(&[
            prefix.unwrap_or(""),
            record.field(columns::STATUS),
            title.as_str(),
        ]);

        // Columns
        let mut fields = BTreeMap::new();
        let mut dropped = Vec::new();
        for (column, value) in &record.fields {
            if column == columns::STATUS || column == columns::TITLE || column == columns::KEY {
                continue;
            }
            if self.config.operational_columns.iter().any(|c| c == column)
                || columns::parse_site_column(column).is_some()
            {
                dropped.push(column.clone());
                continue;
            }
            let value = value.trim();
            if !value.is_empty() {
                fields.insert(column.clone(), value.to_string());
            }
        }
        for column in &self.config.operational_columns {
            let present = match column.as_str() {
                columns::FETCHED_AT => record.fetched_at.is_some(),
                columns::ENDPOINT => !record.endpoint.is_empty(),
                _ => false,
            };
            if present {
                dropped.push(column.clone());
            }
        }
        for (i, site) in record.sites.iter().enumerate() {
            if !site.contact.is_empty() {
                dropped.push(columns::site_part_column(i + 1, columns::SitePart::Contact));
            }
            if !site.extra.is_empty() {
                dropped.push(columns::site_part_column(i + 1, columns::SitePart::Extra));
            }
        }

        // Sites
        let sites = record
            .sites
            .iter()
            .map(|site| trim_hospital_name(&site.name))
            .filter(|name| !name.is_empty())
            .collect();

        let row = CanonicalRow {
            key: record.key,
            title,
            status,
            period_start_month: start,
            period_end_month: end,
            sites,
            fields,
        };
        let result = match self.rejection(&row) {
            Some(reason) => Normalized::Rejected(reason),
            None => Normalized::Row(row),
        };
        Cleaned {
            result,
            defaulted_period,
            dropped,
        }
    }

    fn rejection(&self, row: &CanonicalRow) -> Option<RejectReason> {
        if row.key == 0 {
            return Some(RejectReason::MissingKey);
        }
        if row.title.trim().is_empty() {
            return Some(RejectReason::EmptyTitle);
        }
        if self.config.looks_garbage(&row.title) {
            return Some(RejectReason::GarbageTitle);
        }
        if columns::CORE_FIELDS
            .iter()
            .all(|c| row.field(c).trim().is_empty())
        {
            return Some(RejectReason::NoCoreFields);
        }
        let filled = row
            .to_cells()
            .values()
            .filter(|v| !v.trim().is_empty())
            .count();
        if filled <= 3 {
            return Some(RejectReason::TooSparse);
        }
        None
    }

    /// Split a leading status marker off a title.
    pub fn strip_status_prefix<'a>(&self, title: &'a str) -> (Option<&'a str>, String) {
        let title = title.trim();
        match self.status_prefix.captures(title) {
            Some(caps) => {
                let status = caps.get(1).map(|m| m.as_str());
                let end = caps.get(0).map_or(0, |m| m.end());
                (status, title[end..].trim().to_string())
            }
            None => (None, title.to_string()),
        }
    }

    /// First text (in order) holding a status keyword decides; within a text
    /// the configured priority breaks ties.
    pub fn pick_status(&self, texts: &[&str]) -> Status {
        texts
            .iter()
            .filter(|t| !t.trim().is_empty())
            .find_map(|text| {
                self.config
                    .status_priority
                    .iter()
                    .find(|status| text.contains(status.label()))
                    .copied()
            })
            .unwrap_or(Status::Unclassified)
    }

    /// Split a period into start and end months.
    ///
    /// The third value is true when the period was missing or a side that was
    /// present could not be read.
    pub fn split_period(&self, raw: &str) -> (Option<MonthStamp>, Option<MonthStamp>, bool) {
        let raw = raw.trim();
        if raw.is_empty() {
            return (None, None, true);
        }
        let (start_raw, end_raw) = split_range(raw, |s| self.is_plain_stamp(s));
        let start = self.parse_month_or_year(start_raw);
        let end = end_raw.and_then(|e| self.parse_month_or_year(e));
        let end_failed = end_raw.is_some_and(|e| !e.trim().is_empty()) && end.is_none();
        (start, end, start.is_none() || end_failed)
    }

    /// Whether `raw` is exactly one date form, with nothing around it.
    fn is_plain_stamp(&self, raw: &str) -> bool {
        let s = raw.trim();
        let digits_only = s.chars().all(|c| c.is_ascii_digit()) && matches!(s.len(), 4 | 6 | 8);
        (digits_only
            || self.full_date.is_match(s)
            || self.year_month.is_match(s)
            || self.korean_year.is_match(s))
            && self.parse_month_or_year(s).is_some()
    }

    /// Read one side of a period as `YYYY-MM` or `YYYY`.
    pub fn parse_month_or_year(&self, raw: &str) -> Option<MonthStamp> {
        let s = raw.trim();
        if s.is_empty() {
            return None;
        }
        if let Some(caps) = self.full_date.captures(s) {
            let (y, m, d) = (number(&caps, 1)?, number(&caps, 2)?, number(&caps, 3)?);
            if NaiveDate::from_ymd_opt(y as i32, m, d).is_some() {
                return MonthStamp::new(y as i32, m);
            }
        }
        if let Some(caps) = self.year_month.captures(s) {
            if let Some(stamp) = MonthStamp::new(number(&caps, 1)? as i32, number(&caps, 2)?) {
                return Some(stamp);
            }
        }
        if let Some(caps) = self.korean_year_month.captures(s) {
            return MonthStamp::new(number(&caps, 1)? as i32, number(&caps, 2)?);
        }
        if let Some(caps) = self.korean_year.captures(s) {
            return Some(MonthStamp::year_only(number(&caps, 1)? as i32));
        }

        let digits: String = s.chars().filter(char::is_ascii_digit).collect();
        if digits.len() >= 6 {
            MonthStamp::new(digits[..4].parse().ok()?, digits[4..6].parse().ok()?)
        } else if digits.len() == 4 {
            Some(MonthStamp::year_only(digits.parse().ok()?))
        } else {
            None
        }
    }
}

fn number(caps: &regex::Captures, group: usize) -> Option<u32> {
    caps.get(group)?.as_str().parse().ok()
}

/// Split a range on `~` or `–`, or on the first `-` that separates two plain
/// date forms.
fn split_range(raw: &str, readable: impl Fn(&str) -> bool) -> (&str, Option<&str>) {
    if let Some(at) = raw.find(['~', '–']) {
        let sep_len = raw[at..].chars().next().map_or(1, char::len_utf8);
        return (raw[..at].trim(), Some(raw[at + sep_len..].trim()));
    }
    if readable(raw) {
        return (raw, None);
    }
    for (at, _) in raw.match_indices('-') {
        let (left, right) = (raw[..at].trim(), raw[at + 1..].trim());
        if readable(left) && readable(right) {
            return (left, Some(right));
        }
    }
    match raw.split_once('-') {
        Some((left, right)) => (left.trim(), Some(right.trim())),
        None => (raw, None),
    }
}

/// Keep the institution name only: up to the first `병원`, else the first
/// `의원`, else the text before the first comma.
pub fn trim_hospital_name(raw: &str) -> String {
    let name = raw.trim().trim_matches(|c: char| c == '"' || c == '\'' || c.is_whitespace());
    if name.is_empty() {
        return String::new();
    }
    for suffix in ["병원", "의원"] {
        // The suffix must follow at least one character
        if let Some(at) = name
            .match_indices(suffix)
            .map(|(i, _)| i)
            .find(|i| *i > 0)
        {
            return name[..at + suffix.len()].trim().to_string();
        }
    }
    name.split(',').next().unwrap_or(name).trim().to_string()
}

/// Render cleaned rows as a table in the store's column layout.
pub fn rows_to_table(rows: &[CanonicalRow]) -> Table {
    let cells: Vec<BTreeMap<String, String>> = rows.iter().map(CanonicalRow::to_cells).collect();
    Table::from_records(canonical_layout(cells.iter()), cells.iter())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SiteEntry;

    fn normalizer() -> Normalizer {
        Normalizer::new(&NormalizeConfig::default()).unwrap()
    }

    fn record(key: u64, title: &str) -> RawRecord {
        let mut fields = BTreeMap::new();
        fields.insert(columns::SPONSOR.to_string(), "한국제약(주)".to_string());
        fields.insert(columns::PHASE.to_string(), "3상".to_string());
        fields.insert(columns::PERIOD.to_string(), "2023.01~2023.06".to_string());
        fields.insert(columns::FETCHED_AT.to_string(), "2025-09-12 10:00:00".to_string());
        fields.insert("실시기관1_담당자".to_string(), "홍길동".to_string());
        RawRecord {
            key,
            title: title.to_string(),
            fields,
            sites: vec![
                SiteEntry {
                    name: "\"서울대학교병원 내과\"".to_string(),
                    contact: "홍길동".to_string(),
                    extra: String::new(),
                },
                SiteEntry::default(),
                SiteEntry {
                    name: "연세이비인후과의원, 서울시".to_string(),
                    ..SiteEntry::default()
                },
            ],
            fetched_at: None,
            endpoint: "konect".to_string(),
        }
    }

    fn row(result: Normalized) -> CanonicalRow {
        match result {
            Normalized::Row(row) => row,
            Normalized::Rejected(reason) => panic!("rejected: {reason}"),
        }
    }

    #[test]
    fn test_period_split_on_tilde() {
        let n = normalizer();
        let (start, end, defaulted) = n.split_period("2023.01~2023.06");
        assert_eq!(start.map(|m| m.to_string()).as_deref(), Some("2023-01"));
        assert_eq!(end.map(|m| m.to_string()).as_deref(), Some("2023-06"));
        assert!(!defaulted);
    }

    #[test]
    fn test_period_with_dashed_dates() {
        let n = normalizer();
        let (start, end, _) = n.split_period("2023-01-15 - 2024-02-28");
        assert_eq!(start, MonthStamp::new(2023, 1));
        assert_eq!(end, MonthStamp::new(2024, 2));

        let (start, end, _) = n.split_period("2023-01-2024-12");
        assert_eq!(start, MonthStamp::new(2023, 1));
        assert_eq!(end, MonthStamp::new(2024, 12));
    }

    #[test]
    fn test_period_single_value_and_malformed() {
        let n = normalizer();
        let (start, end, defaulted) = n.split_period("2024년 3월");
        assert_eq!(start, MonthStamp::new(2024, 3));
        assert_eq!(end, None);
        assert!(!defaulted);

        let (start, end, defaulted) = n.split_period("미정");
        assert_eq!((start, end), (None, None));
        assert!(defaulted);

        assert!(n.split_period("").2);
    }

    #[test]
    fn test_month_or_year_forms() {
        let n = normalizer();
        let parse = |s: &str| n.parse_month_or_year(s).map(|m| m.to_string());
        assert_eq!(parse("2024/03/15").as_deref(), Some("2024-03"));
        assert_eq!(parse("2024.3").as_deref(), Some("2024-03"));
        assert_eq!(parse("2025년").as_deref(), Some("2025"));
        assert_eq!(parse("20240715").as_deref(), Some("2024-07"));
        assert_eq!(parse("2026").as_deref(), Some("2026"));
        assert_eq!(parse("2024-13"), None);
        assert_eq!(parse("12"), None);
    }

    #[test]
    fn test_status_prefix_forms() {
        let n = normalizer();
        for title in ["[모집중] 연구", "(모집중)연구", "【모집중】 연구", "모집중 - 연구"] {
            let (prefix, clean) = n.strip_status_prefix(title);
            assert_eq!(prefix, Some("모집중"), "{title}");
            assert_eq!(clean, "연구", "{title}");
        }
        assert_eq!(n.strip_status_prefix("고혈압 연구").0, None);
    }

    #[test]
    fn test_status_priority_breaks_ties() {
        let n = normalizer();
        assert_eq!(n.pick_status(&["", "", "모집중 모집완료"]), Status::RecruitmentClosed);
        assert_eq!(n.pick_status(&["승인완료", "", "종료 예정"]), Status::Approved);
        assert_eq!(n.pick_status(&["", "모집중", ""]), Status::Recruiting);
        assert_eq!(n.pick_status(&["", "", "고혈압"]), Status::Unclassified);
    }

    #[test]
    fn test_recruiting_title_yields_recruiting_row() {
        let n = normalizer();
        let row = row(n.normalize(&record(202500001, "[모집중] 고혈압 환자 대상 연구")));
        assert_eq!(row.status, Status::Recruiting);
        assert_eq!(row.title, "고혈압 환자 대상 연구");
        assert_eq!(row.period_start_month, MonthStamp::new(2023, 1));
        assert_eq!(row.period_end_month, MonthStamp::new(2023, 6));
    }

    #[test]
    fn test_operational_and_site_subcolumns_dropped() {
        let n = normalizer();
        let row = row(n.normalize(&record(1, "연구")));
        assert!(!row.fields.contains_key(columns::FETCHED_AT));
        assert!(!row.fields.contains_key("실시기관1_담당자"));
        assert_eq!(row.field(columns::PERIOD), "2023.01~2023.06");
        let cells = row.to_cells();
        assert!(!cells.keys().any(|c| c.ends_with("_담당자") || c.ends_with("_기타")));
    }

    #[test]
    fn test_sites_trimmed_and_renumbered() {
        let n = normalizer();
        let row = row(n.normalize(&record(1, "연구")));
        assert_eq!(row.sites, vec!["서울대학교병원", "연세이비인후과의원"]);
        let cells = row.to_cells();
        assert_eq!(cells["실시기관2"], "연세이비인후과의원");
        assert!(!cells.contains_key("실시기관3"));
    }

    #[test]
    fn test_trim_hospital_name_rules() {
        assert_eq!(trim_hospital_name(" 서울아산병원 소아과 "), "서울아산병원");
        assert_eq!(trim_hospital_name("'가나의원'"), "가나의원");
        assert_eq!(trim_hospital_name("국립암센터, 경기도 고양시"), "국립암센터");
        assert_eq!(trim_hospital_name("  "), "");
    }

    #[test]
    fn test_rejections() {
        let n = normalizer();
        assert_eq!(
            n.normalize(&record(0, "연구")),
            Normalized::Rejected(RejectReason::MissingKey)
        );
        assert_eq!(
            n.normalize(&record(1, "[모집중]")),
            Normalized::Rejected(RejectReason::EmptyTitle)
        );
        assert_eq!(
            n.normalize(&record(1, "임상시험 정보 목록으로")),
            Normalized::Rejected(RejectReason::GarbageTitle)
        );

        let mut no_core = record(1, "연구");
        no_core.fields.remove(columns::SPONSOR);
        no_core.fields.remove(columns::PHASE);
        assert_eq!(
            n.normalize(&no_core),
            Normalized::Rejected(RejectReason::NoCoreFields)
        );

        let sparse = RawRecord {
            key: 1,
            title: "연구".to_string(),
            fields: BTreeMap::from([(columns::PHASE.to_string(), "2상".to_string())]),
            ..RawRecord::default()
        };
        assert_eq!(
            n.normalize(&sparse),
            Normalized::Rejected(RejectReason::TooSparse)
        );
    }

    #[test]
    fn test_batch_report_counts() {
        let n = normalizer();
        let mut undated = record(3, "고혈압 연구");
        undated.fields.remove(columns::PERIOD);
        let records = vec![
            record(1, "[모집중] 연구"),
            record(0, "연구"),
            undated,
        ];
        let (rows, report) = n.normalize_batch(&records);
        assert_eq!(rows.len(), 2);
        assert_eq!(
            report,
            NormalizeReport {
                rows_in: 3,
                rows_out: 2,
                rejected: 1,
                defaulted_period: 1,
                unclassified_status: 1,
                dropped_columns: 3,
            }
        );
    }

    #[test]
    fn test_cleaned_table_uses_store_layout() {
        let n = normalizer();
        let (rows, _) = n.normalize_batch(&[record(5, "연구")]);
        let table = rows_to_table(&rows);
        assert_eq!(table.header[0], columns::KEY);
        assert_eq!(table.header[1], columns::STATUS);
        assert_eq!(table.rows[0][0], "5");
    }
}
