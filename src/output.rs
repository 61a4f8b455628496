//! Report writers: the aggregate summary CSV and per-student feedback files.
//!
//! Both writers are best-effort and independent: a failure writing one
//! student's file is logged and does not stop the rest of the batch.

use anyhow::Result;
use tracing::{info, warn};

use crate::scores::{FieldKind, FieldType, StudentReport, SurveyResults};
use csv::WriterBuilder;
use std::fs;
use std::path::{Path, PathBuf};

/// Writes `<survey_name>_parsed.csv` under `dir`: one row per substantive
/// student, already sorted by last name.
///
/// Columns: `Last, First, Reviewed Count, Total`, then per field either
/// `"<key> avg"` (ratings) or `"<key>"` (comments), then one `"<key>"`
/// column per rating field holding the raw per-review values.
pub fn write_summary(dir: &Path, survey_name: &str, results: &SurveyResults) -> Result<PathBuf> {
    let path = dir.join(format!("{survey_name}_parsed.csv"));
    let mut writer = WriterBuilder::new().from_path(&path)?;

    let mut header = vec![
        "Last".to_string(),
        "First".to_string(),
        "Reviewed Count".to_string(),
        "Total".to_string(),
    ];
    for field in &results.fields {
        match field.field_type {
            FieldType::Numeric => header.push(format!("{} avg", field.key)),
            FieldType::Text => header.push(field.key.clone()),
        }
    }
    for field in &results.fields {
        if field.field_type == FieldType::Numeric {
            header.push(field.key.clone());
        }
    }
    writer.write_record(&header)?;

    for report in &results.reports {
        let mut row = vec![
            report.last.clone(),
            report.first.clone(),
            report.count.to_string(),
            format!("{:.1}", report.total),
        ];
        for field in &report.fields {
            match &field.kind {
                FieldKind::Numeric { average, .. } => {
                    row.push(average.map(fmt_number).unwrap_or_default());
                }
                FieldKind::Text { comments } => row.push(comments.join("; ")),
            }
        }
        for field in &report.fields {
            if let FieldKind::Numeric { values, .. } = &field.kind {
                row.push(fmt_values(values));
            }
        }
        writer.write_record(&row)?;
    }
    writer.flush()?;

    info!(
        path = %path.display(),
        students = results.reports.len(),
        "Summary CSV written"
    );
    Ok(path)
}

/// Writes one `<Last>_<First>.txt` feedback file per student under `dir`.
///
/// Files that already exist are left untouched, so a re-run never clobbers
/// feedback that was handed out.
pub fn write_student_files(dir: &Path, results: &SurveyResults) -> Result<()> {
    let mut written = 0usize;
    for report in &results.reports {
        let path = dir.join(format!("{}_{}.txt", report.last, report.first));
        if path.exists() {
            info!(path = %path.display(), "Student file already exists, skipping");
            continue;
        }
        match write_student_file(&path, report) {
            Ok(()) => written += 1,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to write student file");
            }
        }
    }
    info!(written, total = results.reports.len(), "Student files written");
    Ok(())
}

fn write_student_file(path: &Path, report: &StudentReport) -> Result<()> {
    let mut out = String::new();
    out.push_str(&format!("{} {}\n\n", report.first, report.last));
    out.push_str("Score and comments from your presentation:\n\n");
    out.push_str(&format!("Total: {:.1}\n", report.total));

    for field in &report.fields {
        match &field.kind {
            FieldKind::Numeric { values, .. } => {
                out.push_str(&format!("{}: {}\n", field.key, fmt_values(values)));
            }
            FieldKind::Text { comments } => {
                out.push_str(&format!("\n{}:\n", field.key));
                for comment in comments {
                    if !comment.trim().is_empty() {
                        out.push_str(&format!("\t{comment}\n"));
                    }
                }
            }
        }
    }

    fs::write(path, out)?;
    Ok(())
}

/// Formats a number without a trailing `.0` when it is integral.
fn fmt_number(v: f64) -> String {
    if v.fract() == 0.0 {
        format!("{}", v as i64)
    } else {
        v.to_string()
    }
}

/// Formats raw per-review rating values as `[v1, v2, ...]`.
fn fmt_values(values: &[f64]) -> String {
    let inner = values
        .iter()
        .map(|v| fmt_number(*v))
        .collect::<Vec<_>>()
        .join(", ");
    format!("[{inner}]")
}
