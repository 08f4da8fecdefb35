//! Resolution of template and output files on disk

use crate::error::{Error, Result};
use std::path::{Path, PathBuf};

/// Resolved template data
pub struct ResolvedTemplate {
    pub data: Vec<u8>,
    pub source_name: String,
}

/// Read a template file and validate its PDF header
pub fn resolve_template<P: AsRef<Path>>(path: P) -> Result<ResolvedTemplate> {
    let path = path.as_ref();
    let source_name = path.display().to_string();

    if !path.is_file() {
        return Err(Error::TemplateNotFound { path: source_name });
    }

    let data = std::fs::read(path).map_err(|_| Error::TemplateNotFound {
        path: source_name.clone(),
    })?;

    // Validate PDF header
    if data.len() < 4 || &data[0..4] != b"%PDF" {
        return Err(Error::TemplateMalformed {
            path: source_name,
            reason: "Not a valid PDF file".to_string(),
        });
    }

    Ok(ResolvedTemplate { data, source_name })
}

/// Resolve a client-supplied file name to a file directly inside `dir`.
/// Names with path separators or parent references are denied.
pub fn resolve_download(dir: &Path, file_name: &str) -> Result<PathBuf> {
    let is_plain = !file_name.is_empty()
        && file_name != "."
        && file_name != ".."
        && !file_name.contains(['/', '\\'])
        && Path::new(file_name).file_name().map(|n| n == file_name).unwrap_or(false);

    if !is_plain {
        return Err(Error::PathAccessDenied {
            path: file_name.to_string(),
        });
    }

    let path = dir.join(file_name);
    if !path.is_file() {
        return Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("{} not found", path.display()),
        )));
    }

    Ok(path)
}

/// List template file names (`*.pdf`) available in a directory, sorted
pub fn list_templates(dir: &Path) -> Vec<String> {
    let pattern = dir.join("*.pdf");
    let Ok(entries) = glob::glob(&pattern.to_string_lossy()) else {
        return Vec::new();
    };

    let mut names: Vec<String> = entries
        .filter_map(|entry| entry.ok())
        .filter(|p| p.is_file())
        .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
        .collect();
    names.sort();
    names
}
