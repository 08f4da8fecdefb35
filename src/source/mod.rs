//! Input resolution: uploaded spreadsheets and template files

pub mod resolver;
pub mod spreadsheet;

pub use resolver::{list_templates, resolve_download, resolve_template, ResolvedTemplate};
pub use spreadsheet::{parse_workbook, read_workbook, Row, Spreadsheet};
