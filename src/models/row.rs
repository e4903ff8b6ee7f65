// src/models/row.rs

//! Canonical, store-ready trial row.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::models::columns::{self, SitePart};

/// Progress status of a trial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Status {
    /// 승인완료
    Approved,
    /// 모집중
    Recruiting,
    /// 모집완료
    RecruitmentClosed,
    /// 종료
    Completed,
    /// No recognized keyword
    Unclassified,
}

impl Status {
    /// All recognized statuses.
    pub const RECOGNIZED: [Status; 4] = [
        Status::Approved,
        Status::Recruiting,
        Status::RecruitmentClosed,
        Status::Completed,
    ];

    /// Keyword shown on the catalog and written to the tables.
    pub fn label(self) -> &'static str {
        match self {
            Status::Approved => "승인완료",
            Status::Recruiting => "모집중",
            Status::RecruitmentClosed => "모집완료",
            Status::Completed => "종료",
            Status::Unclassified => "",
        }
    }

    fn name(self) -> &'static str {
        match self {
            Status::Approved => "approved",
            Status::Recruiting => "recruiting",
            Status::RecruitmentClosed => "recruitment_closed",
            Status::Completed => "completed",
            Status::Unclassified => "unclassified",
        }
    }

    /// Status of a stored cell; anything unknown is unclassified.
    pub fn from_cell(cell: &str) -> Self {
        cell.parse().unwrap_or(Status::Unclassified)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Unclassified => f.write_str("unclassified"),
            other => f.write_str(other.label()),
        }
    }
}

impl FromStr for Status {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Ok(Status::Unclassified);
        }
        [
            Status::Approved,
            Status::Recruiting,
            Status::RecruitmentClosed,
            Status::Completed,
            Status::Unclassified,
        ]
        .into_iter()
        .find(|status| status.label() == s || status.name().eq_ignore_ascii_case(s))
        .ok_or_else(|| format!("unknown status '{s}'"))
    }
}

impl TryFrom<String> for Status {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Status> for String {
    fn from(status: Status) -> Self {
        match status {
            Status::Unclassified => status.name().to_string(),
            other => other.label().to_string(),
        }
    }
}

/// A month (`YYYY-MM`) or, when the month is unknown, a year (`YYYY`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MonthStamp {
    pub year: i32,
    pub month: Option<u32>,
}

impl MonthStamp {
    /// Month-precision stamp; `None` when the month is out of range.
    pub fn new(year: i32, month: u32) -> Option<Self> {
        (1..=12).contains(&month).then_some(Self {
            year,
            month: Some(month),
        })
    }

    /// Year-precision stamp.
    pub fn year_only(year: i32) -> Self {
        Self { year, month: None }
    }

    /// Whole months from `self` to `end`; `None` unless both have a month.
    pub fn months_until(&self, end: &MonthStamp) -> Option<i64> {
        let (start_month, end_month) = (self.month?, end.month?);
        Some(
            i64::from(end.year - self.year) * 12 + i64::from(end_month) - i64::from(start_month),
        )
    }
}

impl fmt::Display for MonthStamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.month {
            Some(month) => write!(f, "{:04}-{:02}", self.year, month),
            None => write!(f, "{:04}", self.year),
        }
    }
}

impl FromStr for MonthStamp {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let bad = || format!("invalid month stamp '{s}'");
        match s.split_once('-') {
            Some((year, month)) if year.len() == 4 => {
                let year = year.parse().map_err(|_| bad())?;
                let month = month.parse().map_err(|_| bad())?;
                MonthStamp::new(year, month).ok_or_else(bad)
            }
            None if s.len() == 4 => s.parse().map(MonthStamp::year_only).map_err(|_| bad()),
            _ => Err(bad()),
        }
    }
}

/// A cleaned trial row ready to merge into the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalRow {
    /// Serial id; the only merge and sort key
    pub key: u64,
    pub title: String,
    pub status: Status,
    pub period_start_month: Option<MonthStamp>,
    pub period_end_month: Option<MonthStamp>,
    /// Normalized institution names, rendered as `실시기관1..N`
    pub sites: Vec<String>,
    /// Remaining domain fields by column name
    pub fields: BTreeMap<String, String>,
}

impl CanonicalRow {
    /// Value of a domain field, or an empty string.
    pub fn field(&self, column: &str) -> &str {
        self.fields.get(column).map_or("", |v| v.as_str())
    }

    /// Trial period in months, when both ends are month-precise.
    pub fn duration_months(&self) -> Option<i64> {
        self.period_start_month?
            .months_until(self.period_end_month.as_ref()?)
    }

    /// Flatten into table cells keyed by column name.
    pub fn to_cells(&self) -> BTreeMap<String, String> {
        let mut cells = self.fields.clone();
        cells.insert(columns::KEY.to_string(), self.key.to_string());
        cells.insert(columns::TITLE.to_string(), self.title.clone());
        cells.insert(columns::STATUS.to_string(), self.status.label().to_string());
        cells.insert(
            columns::PERIOD_START.to_string(),
            self.period_start_month
                .map(|m| m.to_string())
                .unwrap_or_default(),
        );
        cells.insert(
            columns::PERIOD_END.to_string(),
            self.period_end_month
                .map(|m| m.to_string())
                .unwrap_or_default(),
        );
        for (i, site) in self.sites.iter().enumerate() {
            cells.insert(columns::site_column(i + 1), site.clone());
        }
        cells
    }

    /// Read a row back from table cells.
    ///
    /// Lenient: unknown statuses become unclassified and unparseable months
    /// become empty, so human-edited rows can always be evaluated.
    pub fn from_cells(key: u64, cells: &BTreeMap<String, String>) -> Self {
        let mut row = CanonicalRow {
            key,
            title: String::new(),
            status: Status::Unclassified,
            period_start_month: None,
            period_end_month: None,
            sites: Vec::new(),
            fields: BTreeMap::new(),
        };
        let mut sites = BTreeMap::new();

        for (column, value) in cells {
            if let Some((index, SitePart::Name)) = columns::parse_site_column(column) {
                if !value.trim().is_empty() {
                    sites.insert(index, value.clone());
                }
                continue;
            }
            match column.as_str() {
                columns::KEY => {}
                columns::TITLE => row.title = value.clone(),
                columns::STATUS => row.status = Status::from_cell(value),
                columns::PERIOD_START => row.period_start_month = value.parse().ok(),
                columns::PERIOD_END => row.period_end_month = value.parse().ok(),
                _ => {
                    if !value.is_empty() {
                        row.fields.insert(column.clone(), value.clone());
                    }
                }
            }
        }

        row.sites = sites.into_values().collect();
        row
    }
}
