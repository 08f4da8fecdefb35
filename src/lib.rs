//! Contract Form Generator Library
//!
//! Fills contract PDF templates from the rows of an uploaded spreadsheet:
//! - `contract`: picks the template for a row from its tariff, commodity,
//!   duration and meter type
//! - `pdf`: lists and fills AcroForm fields
//! - `batch`: runs every row of an upload and reports per-row outcomes
//! - `archive`: bundles the generated documents into a zip
//! - `server`: the HTTP upload/download surface

pub mod archive;
pub mod batch;
pub mod contract;
pub mod error;
pub mod pdf;
pub mod server;
pub mod source;

pub use batch::{process, BatchReport, BatchRequest, BatchRun, RowOutcome, RowReport};
pub use contract::{select_template, ContractType};
pub use error::{Error, Result};
pub use server::{build_router, run_server, run_server_with_config, AppState, ServerConfig};
