//! Zip bundling of generated documents

use crate::error::{Error, Result};
use std::collections::HashSet;
use std::fs::File;
use std::path::{Path, PathBuf};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Bundle `file_names` (all inside `output_dir`) into `output_dir/archive_name`.
///
/// Entries are stored under their base names. The archive is assembled in a
/// temporary file and renamed over the previous one, so readers never see a
/// partially written zip.
pub fn create_archive(
    file_names: &[String],
    output_dir: &Path,
    archive_name: &str,
) -> Result<PathBuf> {
    let archive_path = output_dir.join(archive_name);
    let temp_path = output_dir.join(format!(".{}.{}.tmp", archive_name, uuid::Uuid::new_v4()));

    let written = write_zip(file_names, output_dir, &temp_path);
    if let Err(e) = written {
        let _ = std::fs::remove_file(&temp_path);
        return Err(archive_error(&archive_path, e));
    }

    std::fs::rename(&temp_path, &archive_path).map_err(|e| {
        let _ = std::fs::remove_file(&temp_path);
        archive_error(&archive_path, e.to_string())
    })?;

    tracing::info!(
        archive = %archive_path.display(),
        entries = file_names.len(),
        "Archive written"
    );

    Ok(archive_path)
}

fn write_zip(
    file_names: &[String],
    output_dir: &Path,
    temp_path: &Path,
) -> std::result::Result<(), String> {
    let out = File::create(temp_path).map_err(|e| format!("Could not create archive: {}", e))?;
    let mut zip = ZipWriter::new(out);
    let opts = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    let mut seen = HashSet::new();
    for name in file_names {
        let base_name = Path::new(name)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| format!("Invalid file name: {}", name))?;

        if !seen.insert(base_name.clone()) {
            tracing::debug!(file = %base_name, "Duplicate archive entry skipped");
            continue;
        }

        let mut input = File::open(output_dir.join(&base_name))
            .map_err(|e| format!("Could not open {}: {}", base_name, e))?;
        zip.start_file(base_name.as_str(), opts)
            .map_err(|e| format!("Entry {}: {}", base_name, e))?;
        std::io::copy(&mut input, &mut zip).map_err(|e| format!("Write {}: {}", base_name, e))?;
    }

    zip.finish().map_err(|e| e.to_string())?;
    Ok(())
}

fn archive_error(archive_path: &Path, reason: String) -> Error {
    Error::ArchiveWriteFailed {
        path: archive_path.display().to_string(),
        reason,
    }
}
