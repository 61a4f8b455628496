use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use tracing::info;

use crate::services::export_api::{ExportProgress, SurveyExportApi};

#[derive(Serialize)]
struct ExportRequest<'a> {
    format: &'a str,
    #[serde(rename = "surveyId")]
    survey_id: &'a str,
}

/// Client for the Qualtrics legacy response-export API
/// (`/API/v3/responseexports/`). The API token travels in the `X-API-TOKEN`
/// header on every call.
pub struct QualtricsClient {
    base_url: String,
    api_token: String,
}

impl QualtricsClient {
    pub fn new(data_center: &str, api_token: String) -> Self {
        Self {
            base_url: format!("https://{data_center}.qualtrics.com/API/v3/responseexports"),
            api_token,
        }
    }

    fn http(&self) -> Result<reqwest::Client> {
        Ok(reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .build()?)
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!(
                "Qualtrics returned status {}: {}",
                status,
                body
            ));
        }
        Ok(response)
    }
}

#[async_trait]
impl SurveyExportApi for QualtricsClient {
    async fn start_export(&self, survey_id: &str) -> Result<String> {
        let client = self.http()?;

        let response = client
            .post(&self.base_url)
            .header("X-API-TOKEN", &self.api_token)
            .header("Cache-Control", "no-cache")
            .json(&ExportRequest {
                format: "csv",
                survey_id,
            })
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to send export request: {}", e))?;
        let response = Self::check_status(response).await?;

        // Parse as generic JSON to extract only the fields we need
        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to parse export response: {}", e))?;

        if let Some(status) = json["meta"]["httpStatus"].as_str() {
            info!(status, "Export job accepted");
        }

        json["result"]["id"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| anyhow::anyhow!("Export response missing result.id"))
    }

    async fn export_progress(&self, progress_id: &str) -> Result<ExportProgress> {
        let client = self.http()?;
        let url = format!("{}/{}", self.base_url, progress_id);

        let response = client
            .get(&url)
            .header("X-API-TOKEN", &self.api_token)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to send progress request: {}", e))?;
        let response = Self::check_status(response).await?;

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to parse progress response: {}", e))?;

        let percent_complete = json["result"]["percentComplete"]
            .as_f64()
            .ok_or_else(|| anyhow::anyhow!("Progress response missing result.percentComplete"))?;
        let status = json["result"]["status"]
            .as_str()
            .unwrap_or("in progress")
            .to_string();

        Ok(ExportProgress {
            percent_complete,
            status,
        })
    }

    async fn download_export(&self, progress_id: &str) -> Result<Vec<u8>> {
        let client = self.http()?;
        let url = format!("{}/{}/file", self.base_url, progress_id);

        let response = client
            .get(&url)
            .header("X-API-TOKEN", &self.api_token)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to send download request: {}", e))?;
        let response = Self::check_status(response).await?;

        Ok(response.bytes().await?.to_vec())
    }
}
