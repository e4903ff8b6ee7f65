// src/utils/csv.rs

//! CSV reading and writing for the table files.
//!
//! Quotes, doubled quotes, embedded newlines and CRLF are handled; a leading
//! UTF-8 byte order mark (spreadsheet exports) is ignored.

use std::io::{self, Write};
use std::mem::take;

use crate::models::Table;

const SEP: char = ',';

/// Parse CSV text into rows. Empty lines are skipped.
pub fn parse_rows(text: &str) -> Vec<Vec<String>> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let mut rows = Vec::new();
    let mut field = String::new();
    let mut row = Vec::new();
    let mut in_quotes = false;
    let mut chars = text.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '"' if in_quotes => {
                if chars.peek() == Some(&'"') {
                    chars.next();
                    field.push('"');
                } else {
                    in_quotes = false;
                }
            }
            '"' => in_quotes = true,
            c if c == SEP && !in_quotes => row.push(take(&mut field)),
            '\n' | '\r' if !in_quotes => {
                if ch == '\r' && chars.peek() == Some(&'\n') {
                    chars.next();
                }
                row.push(take(&mut field));
                if row.len() == 1 && row[0].is_empty() {
                    row.clear();
                } else {
                    rows.push(take(&mut row));
                }
            }
            _ => field.push(ch),
        }
    }

    // Trailing row without a final newline
    if !field.is_empty() || !row.is_empty() {
        row.push(field);
        rows.push(row);
    }
    rows
}

fn needs_quotes(field: &str) -> bool {
    field.contains(SEP) || field.contains('"') || field.contains('\n') || field.contains('\r')
}

/// Write one CSV row.
pub fn write_row<W: Write>(mut w: W, row: &[String]) -> io::Result<()> {
    for (i, cell) in row.iter().enumerate() {
        if i > 0 {
            write!(w, "{SEP}")?;
        }
        if needs_quotes(cell) {
            write!(w, "\"{}\"", cell.replace('"', "\"\""))?;
        } else {
            write!(w, "{cell}")?;
        }
    }
    writeln!(w)
}

/// Parse a whole CSV document into a table (first row is the header).
pub fn parse_table(text: &str) -> Table {
    Table::from_rows(parse_rows(text))
}

/// Serialize a table, header first.
pub fn table_to_string(table: &Table) -> String {
    let mut buf: Vec<u8> = Vec::new();
    for row in table.to_rows() {
        // Writing into a Vec cannot fail
        let _ = write_row(&mut buf, &row);
    }
    match String::from_utf8(buf) {
        Ok(s) => s,
        Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(cells: &[&str]) -> Vec<String> {
        cells.iter().map(|c| c.to_string()).collect()
    }

    #[test]
    fn test_parses_quotes_and_crlf() {
        let rows = parse_rows("a,\"b,c\",\"say \"\"hi\"\"\"\r\n1,2,3\r\n");
        assert_eq!(rows[0], strings(&["a", "b,c", "say \"hi\""]));
        assert_eq!(rows[1], strings(&["1", "2", "3"]));
    }

    #[test]
    fn test_keeps_newlines_inside_quotes() {
        let rows = parse_rows("k,v\n1,\"line1\nline2\"\n");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1][1], "line1\nline2");
    }

    #[test]
    fn test_strips_bom_and_skips_empty_lines() {
        let rows = parse_rows("\u{feff}clncTestSn,임상시험명\n\n7,연구");
        assert_eq!(rows[0][0], "clncTestSn");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1], strings(&["7", "연구"]));
    }

    #[test]
    fn test_keeps_trailing_empty_cells() {
        let rows = parse_rows("a,b,c\n1,,\n");
        assert_eq!(rows[1], strings(&["1", "", ""]));
    }

    #[test]
    fn test_written_table_parses_back() {
        let table = Table {
            header: strings(&["clncTestSn", "실시기관1"]),
            rows: vec![strings(&["1", "서울대학교병원, 내과"]), strings(&["2", "\"A\""])],
        };
        let text = table_to_string(&table);
        assert!(text.contains("\"서울대학교병원, 내과\""));
        assert_eq!(parse_table(&text), table);
    }
}
