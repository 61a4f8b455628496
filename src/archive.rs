//! Extraction of downloaded export archives.
//!
//! The survey platform delivers the response export as a ZIP archive holding
//! a single CSV. The CSV lands in a directory named after the survey and gets
//! a datestamp in its filename so successive downloads don't collide.

use std::fs;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use chrono::{Datelike, Local, NaiveDate};
use tracing::info;
use zip::ZipArchive;

/// Where an extracted export ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedExport {
    /// Survey name derived from the archive entry, spaces stripped.
    pub survey_name: String,
    /// Directory holding everything produced for this survey.
    pub survey_dir: PathBuf,
    /// The extracted, datestamped CSV.
    pub csv_path: PathBuf,
}

/// Extracts the first entry of a downloaded export archive.
///
/// Creates `<base_dir>/<survey_name>/` (reusing it if present) and writes the
/// CSV there as `<survey_name>_<day>_<month>_<year>.csv`.
pub fn extract_export(bytes: &[u8], base_dir: &Path) -> Result<ExtractedExport> {
    extract_export_dated(bytes, base_dir, Local::now().date_naive())
}

/// [`extract_export`] with an explicit date, so tests are deterministic.
pub fn extract_export_dated(
    bytes: &[u8],
    base_dir: &Path,
    date: NaiveDate,
) -> Result<ExtractedExport> {
    let mut archive =
        ZipArchive::new(Cursor::new(bytes)).context("export is not a valid ZIP archive")?;
    if archive.is_empty() {
        bail!("export archive has no entries");
    }

    let mut entry = archive.by_index(0)?;
    let entry_name = entry.name().to_string();
    let survey_name = survey_name_from(&entry_name);

    let mut contents = Vec::new();
    entry.read_to_end(&mut contents)?;

    let survey_dir = base_dir.join(&survey_name);
    fs::create_dir_all(&survey_dir)
        .with_context(|| format!("creating survey directory {}", survey_dir.display()))?;

    let csv_path = survey_dir.join(datestamped_csv_name(&survey_name, date));
    fs::write(&csv_path, &contents)
        .with_context(|| format!("writing extracted export to {}", csv_path.display()))?;

    info!(
        entry = %entry_name,
        path = %csv_path.display(),
        bytes = contents.len(),
        "Export extracted"
    );

    Ok(ExtractedExport {
        survey_name,
        survey_dir,
        csv_path,
    })
}

/// The archive entry's file stem with spaces removed.
fn survey_name_from(entry_name: &str) -> String {
    Path::new(entry_name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("survey")
        .replace(' ', "")
}

/// `<survey_name>_<day>_<month>_<year>.csv`
pub fn datestamped_csv_name(survey_name: &str, date: NaiveDate) -> String {
    format!(
        "{}_{}_{}_{}.csv",
        survey_name,
        date.day(),
        date.month(),
        date.year()
    )
}
