// src/models/table.rs

//! Plain tabular data as stored on disk: a header plus string rows.

use std::collections::BTreeMap;

/// A header row and data rows of string cells.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Table {
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    /// Split parsed rows into header and data (the first row is the header).
    pub fn from_rows(mut rows: Vec<Vec<String>>) -> Self {
        if rows.is_empty() {
            return Self::default();
        }
        let header = rows.remove(0);
        Self { header, rows }
    }

    /// Build a table by projecting each record onto `header`.
    pub fn from_records<'a, I>(header: Vec<String>, records: I) -> Self
    where
        I: IntoIterator<Item = &'a BTreeMap<String, String>>,
    {
        let rows = records
            .into_iter()
            .map(|record| {
                header
                    .iter()
                    .map(|column| record.get(column).cloned().unwrap_or_default())
                    .collect()
            })
            .collect();
        Self { header, rows }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Position of a column in the header.
    pub fn column_index(&self, column: &str) -> Option<usize> {
        self.header.iter().position(|h| h == column)
    }

    /// Rows as column → value maps. Short rows read as empty cells.
    pub fn records(&self) -> impl Iterator<Item = BTreeMap<String, String>> + '_ {
        self.rows.iter().map(|row| {
            self.header
                .iter()
                .enumerate()
                .map(|(i, column)| (column.clone(), row.get(i).cloned().unwrap_or_default()))
                .collect()
        })
    }

    /// Header row followed by data rows.
    pub fn to_rows(&self) -> Vec<Vec<String>> {
        let mut rows = Vec::with_capacity(self.rows.len() + 1);
        rows.push(self.header.clone());
        rows.extend(self.rows.iter().cloned());
        rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(cols: &[&str]) -> Vec<String> {
        cols.iter().map(|c| c.to_string()).collect()
    }

    #[test]
    fn test_records_pad_short_rows() {
        let table = Table {
            header: header(&["a", "b", "c"]),
            rows: vec![vec!["1".to_string()]],
        };
        let record = table.records().next().unwrap();
        assert_eq!(record["a"], "1");
        assert_eq!(record["c"], "");
    }

    #[test]
    fn test_from_records_projects_onto_header() {
        let mut record = BTreeMap::new();
        record.insert("b".to_string(), "x".to_string());
        record.insert("z".to_string(), "ignored".to_string());
        let table = Table::from_records(header(&["a", "b"]), [&record]);
        assert_eq!(table.rows, vec![vec![String::new(), "x".to_string()]]);
    }

    #[test]
    fn test_from_rows_splits_header() {
        let table = Table::from_rows(vec![header(&["k"]), header(&["1"]), header(&["2"])]);
        assert_eq!(table.header, header(&["k"]));
        assert_eq!(table.len(), 2);
        assert_eq!(table.to_rows().len(), 3);
        assert!(Table::from_rows(Vec::new()).header.is_empty());
    }
}
