// src/services/shapes.rs

//! Known detail page layouts.
//!
//! The catalog is served by two front ends with different markup. Each layout
//! is one [`ResponseShape`] variant with its own matcher and parser; shapes are
//! tried in [`ResponseShape::ALL`] order.

use std::collections::BTreeMap;

use scraper::{ElementRef, Html, Selector};

use crate::error::{AppError, Result};
use crate::models::{SiteEntry, columns};

/// Most institution rows read from one page.
const MAX_SITES: usize = 30;

/// Containers that hold the institution tab.
const INSTITUTION_CONTAINERS: &str = "#tab2, #tab02, section.institution, .institution, .org-list";

/// A recognized detail page layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseShape {
    /// Card layout: `div.recruit-detail` with `.txt-group` label/value blocks
    RecruitDetail,
    /// Table layout: `table.view` rows of `th`/`td` pairs
    ViewTable,
}

/// Fields read from a matched page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedPage {
    pub title: String,
    pub fields: BTreeMap<String, String>,
    pub sites: Vec<SiteEntry>,
}

impl ResponseShape {
    /// Shapes in detection priority order.
    pub const ALL: [ResponseShape; 2] = [ResponseShape::RecruitDetail, ResponseShape::ViewTable];

    pub fn name(self) -> &'static str {
        match self {
            ResponseShape::RecruitDetail => "recruit-detail",
            ResponseShape::ViewTable => "view-table",
        }
    }

    /// First shape whose matcher accepts the document.
    pub fn detect(document: &Html) -> Result<Option<Self>> {
        for shape in Self::ALL {
            if shape.matches(document)? {
                return Ok(Some(shape));
            }
        }
        Ok(None)
    }

    /// Whether the document has this layout.
    pub fn matches(self, document: &Html) -> Result<bool> {
        let marker = match self {
            ResponseShape::RecruitDetail => "div.recruit-detail, div.recruit-group2",
            ResponseShape::ViewTable => "table.view, table.tbl-view",
        };
        Ok(document.select(&parse_selector(marker)?).next().is_some())
    }

    /// Extract title, labelled fields and institutions.
    pub fn parse(self, document: &Html) -> Result<ParsedPage> {
        let mut page = ParsedPage::default();
        match self {
            ResponseShape::RecruitDetail => {
                page.title = first_text(
                    document,
                    &[
                        "div.recruit-group2 .box .tit",
                        "div.recruit-group2 .box .title",
                        "div.recruit-group2 > div.box",
                        "div.recruit-detail h3",
                    ],
                )?;
                read_txt_groups(document, &mut page.fields)?;
                read_definition_lists(document, &mut page.fields)?;
            }
            ResponseShape::ViewTable => {
                page.title = first_text(
                    document,
                    &["div.view-tit", ".view-tit", ".view_title", "h2.tit, h3.tit, h1.tit"],
                )?;
                read_table_pairs(document, "table.view, table.tbl-view", &mut page.fields)?;
                read_definition_lists(document, &mut page.fields)?;
                if page.title.is_empty() {
                    page.title = page.fields.get(columns::TITLE).cloned().unwrap_or_default();
                }
            }
        }
        page.fields.remove(columns::TITLE);
        page.sites = parse_institutions(document)?;
        Ok(page)
    }
}

/// Read institution rows from the institution tab (or a fragment holding it).
///
/// The first cell is the name, the second the contact and the rest are joined
/// into the extra text.
pub fn parse_institutions(document: &Html) -> Result<Vec<SiteEntry>> {
    let container_sel = parse_selector(INSTITUTION_CONTAINERS)?;
    let body_row_sel = parse_selector("tbody tr")?;
    let row_sel = parse_selector("tr")?;
    let table_sel = parse_selector("table")?;
    let cell_sel = parse_selector("td")?;

    let mut containers: Vec<ElementRef> = Vec::new();
    for container in document.select(&container_sel) {
        let nested = container
            .ancestors()
            .any(|a| containers.iter().any(|c| c.id() == a.id()));
        if !nested {
            containers.push(container);
        }
    }
    // A bare fragment is just the table
    if containers.is_empty() {
        containers.push(document.root_element());
    }

    let mut sites = Vec::new();
    for container in containers {
        for table in container.select(&table_sel) {
            let mut rows: Vec<ElementRef> = table.select(&body_row_sel).collect();
            if rows.is_empty() {
                rows = table.select(&row_sel).collect();
            }
            for row in rows {
                let cells: Vec<String> = row.select(&cell_sel).map(element_text).collect();
                let Some(name) = cells.first().filter(|n| !n.is_empty()) else {
                    continue;
                };
                let extra: Vec<&str> = cells
                    .iter()
                    .skip(2)
                    .map(String::as_str)
                    .filter(|c| !c.is_empty())
                    .collect();
                sites.push(SiteEntry {
                    name: name.clone(),
                    contact: cells.get(1).cloned().unwrap_or_default(),
                    extra: extra.join(" | "),
                });
                if sites.len() >= MAX_SITES {
                    return Ok(sites);
                }
            }
        }
    }
    Ok(sites)
}

fn parse_selector(s: &str) -> Result<Selector> {
    Selector::parse(s).map_err(|e| AppError::selector(s, format!("{e:?}")))
}

/// Element text with whitespace runs collapsed.
fn element_text(element: ElementRef) -> String {
    element
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

fn first_text(document: &Html, candidates: &[&str]) -> Result<String> {
    for candidate in candidates {
        let selector = parse_selector(candidate)?;
        if let Some(text) = document
            .select(&selector)
            .map(element_text)
            .find(|t| !t.is_empty())
        {
            return Ok(text);
        }
    }
    Ok(String::new())
}

fn first_child_text(group: ElementRef, candidates: &[Selector]) -> String {
    candidates
        .iter()
        .find_map(|sel| group.select(sel).next())
        .map(element_text)
        .unwrap_or_default()
}

fn insert_field(fields: &mut BTreeMap<String, String>, label: String, value: String) {
    if !label.is_empty() && !value.is_empty() {
        fields.entry(label).or_insert(value);
    }
}

fn read_txt_groups(document: &Html, fields: &mut BTreeMap<String, String>) -> Result<()> {
    let group_sel = parse_selector("div.txt-group")?;
    let label_sels = [".tit", ".title", "strong", "b", "h4", "h5"]
        .iter()
        .map(|s| parse_selector(s))
        .collect::<Result<Vec<_>>>()?;
    let value_sels = [".txt", ".desc", ".cont", "p"]
        .iter()
        .map(|s| parse_selector(s))
        .collect::<Result<Vec<_>>>()?;

    for group in document.select(&group_sel) {
        let label = first_child_text(group, &label_sels);
        let value = first_child_text(group, &value_sels);
        insert_field(fields, label, value);
    }
    Ok(())
}

fn read_table_pairs(
    document: &Html,
    tables: &str,
    fields: &mut BTreeMap<String, String>,
) -> Result<()> {
    let table_sel = parse_selector(tables)?;
    let row_sel = parse_selector("tr")?;
    let th_sel = parse_selector("th")?;
    let td_sel = parse_selector("td")?;

    for table in document.select(&table_sel) {
        for row in table.select(&row_sel) {
            let labels: Vec<String> = row.select(&th_sel).map(element_text).collect();
            let values: Vec<String> = row.select(&td_sel).map(element_text).collect();
            for (label, value) in labels.into_iter().zip(values) {
                insert_field(fields, label, value);
            }
        }
    }
    Ok(())
}

fn read_definition_lists(document: &Html, fields: &mut BTreeMap<String, String>) -> Result<()> {
    let dl_sel = parse_selector("dl")?;
    let dt_sel = parse_selector("dt")?;
    let dd_sel = parse_selector("dd")?;

    for list in document.select(&dl_sel) {
        let labels: Vec<String> = list.select(&dt_sel).map(element_text).collect();
        let values: Vec<String> = list.select(&dd_sel).map(element_text).collect();
        for (label, value) in labels.into_iter().zip(values) {
            insert_field(fields, label, value);
        }
    }
    Ok(())
}
