//! Spreadsheet upload parsing
//!
//! The first worksheet is read with calamine; its first row holds the
//! column headers and every following row becomes a [`Row`].

use crate::contract::columns;
use crate::error::{Error, Result};
use calamine::{open_workbook_auto_from_rs, Data, ExcelDateTime, Reader};
use chrono::Timelike;
use std::io::Cursor;
use std::path::Path;

/// One spreadsheet record
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    /// Spreadsheet line number (1-indexed, header is line 1)
    line: usize,
    cells: Vec<(String, Option<String>)>,
}

impl Row {
    pub fn new(line: usize, cells: Vec<(String, Option<String>)>) -> Self {
        Self { line, cells }
    }

    pub fn line(&self) -> usize {
        self.line
    }

    /// Cell value for a column, `None` when the column is absent or the cell unset
    pub fn get(&self, column: &str) -> Option<&str> {
        self.cells
            .iter()
            .find(|(header, _)| header == column)
            .and_then(|(_, value)| value.as_deref())
    }

    /// True when every cell is unset
    pub fn is_empty(&self) -> bool {
        self.cells.iter().all(|(_, value)| value.is_none())
    }

    pub fn cells(&self) -> &[(String, Option<String>)] {
        &self.cells
    }
}

/// A parsed spreadsheet: header names plus data rows in sheet order
#[derive(Debug, Clone, Default)]
pub struct Spreadsheet {
    headers: Vec<String>,
    rows: Vec<Row>,
}

impl Spreadsheet {
    /// Build a spreadsheet from headers and positional cell values.
    /// Data rows are numbered from line 2.
    pub fn from_rows(headers: Vec<String>, rows: Vec<Vec<Option<String>>>) -> Self {
        let rows = rows
            .into_iter()
            .enumerate()
            .map(|(i, values)| {
                let cells = headers
                    .iter()
                    .cloned()
                    .zip(values.into_iter().chain(std::iter::repeat(None)))
                    .collect();
                Row::new(i + 2, cells)
            })
            .collect();
        Self { headers, rows }
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    /// The contract type for the whole batch: the first data row's `Tarif` value
    pub fn contract_type(&self) -> Result<String> {
        if !self.headers.iter().any(|h| h == columns::CONTRACT_TYPE) {
            return Err(Error::Spreadsheet {
                reason: format!("missing column \"{}\"", columns::CONTRACT_TYPE),
            });
        }

        self.rows
            .first()
            .and_then(|row| row.get(columns::CONTRACT_TYPE))
            .map(str::to_string)
            .ok_or_else(|| Error::Spreadsheet {
                reason: format!("first row has no \"{}\" value", columns::CONTRACT_TYPE),
            })
    }
}

/// Parse an uploaded workbook (xlsx, xlsm, xls, ods) from bytes
pub fn parse_workbook(data: &[u8]) -> Result<Spreadsheet> {
    let mut workbook =
        open_workbook_auto_from_rs(Cursor::new(data.to_vec())).map_err(|e| Error::Spreadsheet {
            reason: format!("could not open workbook: {}", e),
        })?;

    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| Error::Spreadsheet {
            reason: "workbook has no worksheets".to_string(),
        })?
        .map_err(|e| Error::Spreadsheet {
            reason: format!("could not read first worksheet: {}", e),
        })?;

    let mut rows = range.rows();
    let headers: Vec<String> = match rows.next() {
        Some(header_row) => header_row
            .iter()
            .map(|c| render_cell(c).unwrap_or_default())
            .collect(),
        None => return Ok(Spreadsheet::default()),
    };

    let values: Vec<Vec<Option<String>>> = rows
        .map(|row| row.iter().map(render_cell).collect())
        .collect();

    Ok(Spreadsheet::from_rows(headers, values))
}

/// Read and parse a workbook file
pub fn read_workbook<P: AsRef<Path>>(path: P) -> Result<Spreadsheet> {
    let data = std::fs::read(path)?;
    parse_workbook(&data)
}

/// Render a cell as text; empty cells and blank strings are unset
fn render_cell(cell: &Data) -> Option<String> {
    let text = match cell {
        Data::Empty => return None,
        Data::String(s) => s.trim().to_string(),
        Data::Int(i) => i.to_string(),
        // Excel stores "12" typed into a numeric cell as 12.0
        Data::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", *f as i64),
        Data::Float(f) => f.to_string(),
        Data::Bool(b) => b.to_string(),
        Data::DateTime(dt) => render_datetime(dt),
        Data::DateTimeIso(s) | Data::DurationIso(s) => s.trim().to_string(),
        other => other.to_string(),
    };

    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

/// German display form: `01.01.2024`, `01.01.2024 08:30:00`, `08:30:00`.
/// Durations render as elapsed `h:mm:ss`.
fn render_datetime(dt: &ExcelDateTime) -> String {
    if dt.is_duration() {
        if let Some(d) = dt.as_duration() {
            let secs = d.num_seconds();
            return format!("{}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60);
        }
    }

    let Some(datetime) = dt.as_datetime() else {
        return dt.as_f64().to_string();
    };
    if dt.as_f64() < 1.0 {
        datetime.format("%H:%M:%S").to_string()
    } else if datetime.num_seconds_from_midnight() == 0 {
        datetime.format("%d.%m.%Y").to_string()
    } else {
        datetime.format("%d.%m.%Y %H:%M:%S").to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sheet(headers: &[&str], rows: &[&[Option<&str>]]) -> Spreadsheet {
        Spreadsheet::from_rows(
            headers.iter().map(|h| h.to_string()).collect(),
            rows.iter()
                .map(|r| r.iter().map(|c| c.map(str::to_string)).collect())
                .collect(),
        )
    }

    #[test]
    fn test_render_cell() {
        assert_eq!(render_cell(&Data::Empty), None);
        assert_eq!(render_cell(&Data::String("  ".to_string())), None);
        assert_eq!(render_cell(&Data::String(" Gas ".to_string())), Some("Gas".to_string()));
        assert_eq!(render_cell(&Data::Float(12.0)), Some("12".to_string()));
        assert_eq!(render_cell(&Data::Float(12.5)), Some("12.5".to_string()));
        assert_eq!(render_cell(&Data::Int(24)), Some("24".to_string()));
        assert_eq!(render_cell(&Data::Bool(true)), Some("true".to_string()));
    }

    #[test]
    fn test_row_lookup_and_lines() {
        let s = sheet(
            &["Tarif", "Laufzeit"],
            &[&[Some("Portfolio-Tarif"), Some("12")], &[None, None]],
        );
        assert_eq!(s.rows()[0].line(), 2);
        assert_eq!(s.rows()[0].get("Laufzeit"), Some("12"));
        assert_eq!(s.rows()[0].get("Zählerart"), None);
        assert!(!s.rows()[0].is_empty());
        assert!(s.rows()[1].is_empty());
        assert_eq!(s.rows()[1].line(), 3);
    }

    #[test]
    fn test_short_rows_are_padded() {
        let s = sheet(&["A", "B", "C"], &[&[Some("x")]]);
        assert_eq!(s.rows()[0].cells().len(), 3);
        assert_eq!(s.rows()[0].get("C"), None);
    }

    #[test]
    fn test_contract_type() {
        let s = sheet(&["Tarif"], &[&[Some("Spot-Tarif")], &[Some("Portfolio-Tarif")]]);
        assert_eq!(s.contract_type().unwrap(), "Spot-Tarif");
    }

    #[test]
    fn test_contract_type_missing_column() {
        let s = sheet(&["Laufzeit"], &[&[Some("12")]]);
        assert!(matches!(s.contract_type(), Err(Error::Spreadsheet { .. })));
    }

    #[test]
    fn test_contract_type_empty_first_value() {
        let s = sheet(&["Tarif"], &[&[None]]);
        assert!(matches!(s.contract_type(), Err(Error::Spreadsheet { .. })));
        assert!(matches!(
            Spreadsheet::default().contract_type(),
            Err(Error::Spreadsheet { .. })
        ));
    }

    #[test]
    fn test_parse_workbook_rejects_garbage() {
        let result = parse_workbook(b"definitely not a workbook");
        assert!(matches!(result, Err(Error::Spreadsheet { .. })));
    }

    #[test]
    fn test_parse_workbook_xlsx() {
        let mut workbook = rust_xlsxwriter::Workbook::new();
        let worksheet = workbook.add_worksheet();
        worksheet.write_string(0, 0, "Tarif").unwrap();
        worksheet.write_string(0, 1, "Laufzeit").unwrap();
        worksheet.write_string(0, 2, "###company###").unwrap();
        worksheet.write_string(1, 0, "Portfolio-Tarif").unwrap();
        worksheet.write_number(1, 1, 24.0).unwrap();
        worksheet.write_string(1, 2, "Acme GmbH").unwrap();
        let bytes = workbook.save_to_buffer().unwrap();

        let s = parse_workbook(&bytes).unwrap();
        assert_eq!(s.headers(), &["Tarif", "Laufzeit", "###company###"]);
        assert_eq!(s.rows().len(), 1);
        assert_eq!(s.rows()[0].get("Laufzeit"), Some("24"));
        assert_eq!(s.rows()[0].get("###company###"), Some("Acme GmbH"));
        assert_eq!(s.contract_type().unwrap(), "Portfolio-Tarif");
    }

    #[test]
    fn test_parse_workbook_date_cells() {
        let mut workbook = rust_xlsxwriter::Workbook::new();
        let worksheet = workbook.add_worksheet();
        let date_format = rust_xlsxwriter::Format::new().set_num_format("dd.mm.yyyy");
        let datetime_format =
            rust_xlsxwriter::Format::new().set_num_format("dd.mm.yyyy hh:mm:ss");

        worksheet.write_string(0, 0, "Vertragsbeginn").unwrap();
        worksheet.write_string(0, 1, "Unterschrift").unwrap();
        let start = rust_xlsxwriter::ExcelDateTime::from_ymd(2024, 1, 1).unwrap();
        worksheet
            .write_datetime_with_format(1, 0, &start, &date_format)
            .unwrap();
        let signed = rust_xlsxwriter::ExcelDateTime::from_ymd(2024, 3, 15)
            .unwrap()
            .and_hms(8, 30, 0)
            .unwrap();
        worksheet
            .write_datetime_with_format(1, 1, &signed, &datetime_format)
            .unwrap();
        let bytes = workbook.save_to_buffer().unwrap();

        let s = parse_workbook(&bytes).unwrap();
        assert_eq!(s.rows()[0].get("Vertragsbeginn"), Some("01.01.2024"));
        assert_eq!(s.rows()[0].get("Unterschrift"), Some("15.03.2024 08:30:00"));
    }

    #[test]
    fn test_render_cell_iso_dates_pass_through() {
        assert_eq!(
            render_cell(&Data::DateTimeIso("2024-01-01T00:00:00".to_string())),
            Some("2024-01-01T00:00:00".to_string())
        );
        assert_eq!(
            render_cell(&Data::DurationIso("PT1H".to_string())),
            Some("PT1H".to_string())
        );
    }
}
