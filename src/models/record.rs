// src/models/record.rs

//! Raw trial record as fetched from a detail page.

use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::models::columns::{self, SitePart};

/// Timestamp format of the fetch column.
pub const FETCHED_AT_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// One row of the institution tab.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SiteEntry {
    /// Institution name as displayed (may include department or address)
    pub name: String,

    /// Person in charge
    #[serde(default)]
    pub contact: String,

    /// Remaining cells joined with ` | `
    #[serde(default)]
    pub extra: String,
}

/// Unprocessed detail page contents for one serial id.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RawRecord {
    /// Serial id the record was fetched for (0 when unknown)
    pub key: u64,

    /// Title text, possibly carrying a status prefix
    pub title: String,

    /// Labelled page fields
    pub fields: BTreeMap<String, String>,

    /// Institution rows in page order
    pub sites: Vec<SiteEntry>,

    /// When the page was fetched
    pub fetched_at: Option<NaiveDateTime>,

    /// Endpoint that served the page
    pub endpoint: String,
}

impl RawRecord {
    /// Value of a labelled field, or an empty string.
    pub fn field(&self, label: &str) -> &str {
        self.fields.get(label).map_or("", |v| v.as_str())
    }

    /// Flatten into checkpoint cells.
    pub fn to_cells(&self) -> BTreeMap<String, String> {
        let mut cells = self.fields.clone();
        cells.insert(columns::KEY.to_string(), self.key.to_string());
        cells.insert(columns::TITLE.to_string(), self.title.clone());
        cells
            .entry(columns::STATUS.to_string())
            .or_insert_with(String::new);
        if let Some(at) = self.fetched_at {
            cells.insert(
                columns::FETCHED_AT.to_string(),
                at.format(FETCHED_AT_FORMAT).to_string(),
            );
        }
        if !self.endpoint.is_empty() {
            cells.insert(columns::ENDPOINT.to_string(), self.endpoint.clone());
        }

        for (i, site) in self.sites.iter().enumerate() {
            let index = i + 1;
            cells.insert(columns::site_column(index), site.name.clone());
            if !site.contact.is_empty() {
                cells.insert(
                    columns::site_part_column(index, SitePart::Contact),
                    site.contact.clone(),
                );
            }
            if !site.extra.is_empty() {
                cells.insert(
                    columns::site_part_column(index, SitePart::Extra),
                    site.extra.clone(),
                );
            }
        }
        cells
    }

    /// Rebuild a record from checkpoint cells.
    ///
    /// A missing or unparseable key becomes 0, which the normalizer rejects.
    pub fn from_cells(cells: &BTreeMap<String, String>) -> Self {
        let mut record = RawRecord::default();
        let mut sites: BTreeMap<usize, SiteEntry> = BTreeMap::new();

        for (column, value) in cells {
            if let Some((index, part)) = columns::parse_site_column(column) {
                let site = sites.entry(index).or_default();
                match part {
                    SitePart::Name => site.name = value.clone(),
                    SitePart::Contact => site.contact = value.clone(),
                    SitePart::Extra => site.extra = value.clone(),
                }
                continue;
            }

            match column.as_str() {
                columns::KEY => record.key = value.trim().parse().unwrap_or(0),
                columns::TITLE => record.title = value.clone(),
                columns::FETCHED_AT => {
                    record.fetched_at =
                        NaiveDateTime::parse_from_str(value.trim(), FETCHED_AT_FORMAT).ok()
                }
                columns::ENDPOINT => record.endpoint = value.clone(),
                _ => {
                    if !value.is_empty() {
                        record.fields.insert(column.clone(), value.clone());
                    }
                }
            }
        }

        record.sites = sites.into_values().collect();
        record
    }
}

/// Checkpoint column order: leading columns, site columns, then other labels sorted.
pub fn raw_layout<'a, I>(records: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a BTreeMap<String, String>>,
{
    let mut layout: Vec<String> = columns::RAW_LEADING.iter().map(|c| c.to_string()).collect();
    let mut max_site = 0;
    let mut rest = std::collections::BTreeSet::new();
    for cells in records {
        for column in cells.keys() {
            match columns::parse_site_column(column) {
                Some((index, _)) => max_site = max_site.max(index),
                None if !layout.contains(column) => {
                    rest.insert(column.clone());
                }
                None => {}
            }
        }
    }
    for index in 1..=max_site {
        for part in [SitePart::Name, SitePart::Contact, SitePart::Extra] {
            layout.push(columns::site_part_column(index, part));
        }
    }
    layout.extend(rest);
    layout
}
