//! Trait and types for a survey platform's response-export API.

use anyhow::Result;

/// Progress of a server-side response export job.
///
/// Maps directly to the `result` object of the export-status endpoint:
/// `percentComplete` plus an optional textual `status`.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportProgress {
    pub percent_complete: f64,
    pub status: String,
}

impl ExportProgress {
    /// Returns `true` once the export file is ready to download.
    pub fn is_complete(&self) -> bool {
        self.percent_complete >= 100.0 || self.status.eq_ignore_ascii_case("complete")
    }
}

/// Abstraction over a survey platform's export endpoints (e.g. Qualtrics).
#[async_trait::async_trait]
pub trait SurveyExportApi {
    /// Starts a CSV response export for the survey, returning the job's
    /// progress id.
    async fn start_export(&self, survey_id: &str) -> Result<String>;

    /// Reports how far along the export job is.
    async fn export_progress(&self, progress_id: &str) -> Result<ExportProgress>;

    /// Downloads the finished export as a ZIP archive.
    async fn download_export(&self, progress_id: &str) -> Result<Vec<u8>>;
}
