//! Batch generation of contract documents from spreadsheet rows

use crate::archive::create_archive;
use crate::contract::{columns, document_name, select, Selection, SkipReason};
use crate::error::{Error, Result};
use crate::pdf::{FieldValues, FormTemplate};
use crate::source::{Row, Spreadsheet};
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Inputs for one batch run
#[derive(Debug, Clone)]
pub struct BatchRequest {
    /// Contract type applied to every row
    pub contract_type: String,
    /// Directory holding the PDF templates
    pub template_dir: PathBuf,
    /// Directory that receives the generated documents
    pub output_dir: PathBuf,
}

/// What happened to a single row
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RowOutcome {
    Produced {
        file_name: String,
        template: String,
        fields_filled: u32,
    },
    Skipped {
        reason: SkipReason,
    },
    Failed {
        #[serde(skip_serializing_if = "Option::is_none")]
        template: Option<String>,
        error: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RowReport {
    /// Spreadsheet line number (header is line 1)
    pub line: usize,
    pub outcome: RowOutcome,
}

/// Per-row results of a batch run, in spreadsheet order
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub contract_type: String,
    /// RFC 3339 timestamp
    pub started_at: String,
    pub rows: Vec<RowReport>,
}

impl BatchReport {
    /// Generated file names in row order
    pub fn produced(&self) -> Vec<String> {
        self.rows
            .iter()
            .filter_map(|r| match &r.outcome {
                RowOutcome::Produced { file_name, .. } => Some(file_name.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn produced_count(&self) -> usize {
        self.count(|o| matches!(o, RowOutcome::Produced { .. }))
    }

    pub fn skipped_count(&self) -> usize {
        self.count(|o| matches!(o, RowOutcome::Skipped { .. }))
    }

    pub fn failed_count(&self) -> usize {
        self.count(|o| matches!(o, RowOutcome::Failed { .. }))
    }

    fn count(&self, pred: impl Fn(&RowOutcome) -> bool) -> usize {
        self.rows.iter().filter(|r| pred(&r.outcome)).count()
    }
}

/// A finished run: the report plus the archive of produced documents
#[derive(Debug, Clone, Serialize)]
pub struct BatchRun {
    pub report: BatchReport,
    pub archive_path: PathBuf,
    /// JSON copy of the report, written next to the archive
    pub report_path: PathBuf,
}

/// Generate one document per matching row.
///
/// Rows that match no template are skipped; a row whose template is
/// missing or broken is recorded as failed and the batch continues.
/// A document name already produced earlier in the run gets a ` (2)`,
/// ` (3)`, ... suffix.
pub fn process(rows: &[Row], request: &BatchRequest) -> Result<BatchReport> {
    std::fs::create_dir_all(&request.output_dir).map_err(|e| Error::WriteFailed {
        path: request.output_dir.display().to_string(),
        reason: e.to_string(),
    })?;

    tracing::info!(
        contract_type = %request.contract_type,
        rows = rows.len(),
        "Starting batch"
    );

    let started_at = chrono::Utc::now().to_rfc3339();
    let mut taken = HashSet::new();
    let mut reports = Vec::with_capacity(rows.len());
    for row in rows {
        reports.push(RowReport {
            line: row.line(),
            outcome: process_row(row, request, &mut taken),
        });
    }

    let report = BatchReport {
        contract_type: request.contract_type.clone(),
        started_at,
        rows: reports,
    };

    tracing::info!(
        produced = report.produced_count(),
        skipped = report.skipped_count(),
        failed = report.failed_count(),
        "Batch finished"
    );

    Ok(report)
}

/// Run a whole upload: read the contract type, process every row and
/// bundle the produced documents into `output_dir/archive_name`.
/// The report is also saved as JSON beside the archive (`contracts.zip`
/// gets `contracts.json`).
pub fn run(
    sheet: &Spreadsheet,
    template_dir: &Path,
    output_dir: &Path,
    archive_name: &str,
) -> Result<BatchRun> {
    let request = BatchRequest {
        contract_type: sheet.contract_type()?,
        template_dir: template_dir.to_path_buf(),
        output_dir: output_dir.to_path_buf(),
    };

    let report = process(sheet.rows(), &request)?;
    let archive_path = create_archive(&report.produced(), output_dir, archive_name)?;
    let report_path = write_report(&report, &archive_path)?;

    Ok(BatchRun {
        report,
        archive_path,
        report_path,
    })
}

fn write_report(report: &BatchReport, archive_path: &Path) -> Result<PathBuf> {
    let path = archive_path.with_extension("json");
    let json = serde_json::to_vec_pretty(report)?;
    std::fs::write(&path, json).map_err(|e| Error::WriteFailed {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    Ok(path)
}

fn process_row(row: &Row, request: &BatchRequest, taken: &mut HashSet<String>) -> RowOutcome {
    if row.is_empty() {
        return RowOutcome::Skipped {
            reason: SkipReason::EmptyRow,
        };
    }

    let selection = select(
        &request.contract_type,
        row.get(columns::COMMODITY).unwrap_or_default(),
        row.get(columns::DURATION).unwrap_or_default(),
        row.get(columns::COUNTER_TYPE).unwrap_or_default(),
    );

    let template_name = match selection {
        Selection::Template(name) => name,
        Selection::Skip(reason) => {
            tracing::debug!(line = row.line(), %reason, "Row skipped");
            return RowOutcome::Skipped { reason };
        }
    };

    match generate_document(row, &template_name, request, taken) {
        Ok((file_name, fields_filled)) => {
            tracing::info!(line = row.line(), file = %file_name, "Document generated");
            RowOutcome::Produced {
                file_name,
                template: template_name,
                fields_filled,
            }
        }
        Err(e) => {
            tracing::warn!(line = row.line(), template = %template_name, error = %e, "Row failed");
            RowOutcome::Failed {
                template: Some(template_name),
                error: e.client_message(),
            }
        }
    }
}

/// Fill the template for a row and write it to the output directory
fn generate_document(
    row: &Row,
    template_name: &str,
    request: &BatchRequest,
    taken: &mut HashSet<String>,
) -> Result<(String, u32)> {
    let template = FormTemplate::open(request.template_dir.join(template_name))?;

    let values: FieldValues = template
        .field_names()
        .into_iter()
        .map(|name| {
            let value = row.get(&name).map(str::to_string);
            (name, value)
        })
        .collect();

    let filled = template.fill(&values)?;

    let file_name = unique_name(
        document_name(
            row.get(columns::COMPANY).unwrap_or_default(),
            &request.contract_type,
        ),
        taken,
    );
    write_document(&request.output_dir, &file_name, &filled.data)?;

    Ok((file_name, filled.summary.fields_filled))
}

/// Reserve `name` for this run, suffixing the stem when it is already taken
fn unique_name(name: String, taken: &mut HashSet<String>) -> String {
    if taken.insert(name.clone()) {
        return name;
    }

    let (stem, ext) = match name.rsplit_once('.') {
        Some((stem, ext)) => (stem.to_string(), format!(".{}", ext)),
        None => (name.clone(), String::new()),
    };
    let mut n = 2;
    loop {
        let candidate = format!("{} ({}){}", stem, n, ext);
        if taken.insert(candidate.clone()) {
            return candidate;
        }
        n += 1;
    }
}

fn write_document(output_dir: &Path, file_name: &str, data: &[u8]) -> Result<()> {
    let path = output_dir.join(file_name);
    std::fs::write(&path, data).map_err(|e| Error::WriteFailed {
        path: path.display().to_string(),
        reason: e.to_string(),
    })
}
