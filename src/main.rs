//! CLI entry point for the peer review rater.
//!
//! Provides subcommands for parsing a previously downloaded survey export
//! and for downloading a survey's responses from Qualtrics before parsing
//! them into the summary CSV and per-student feedback files.

mod infra;
mod services;

use crate::infra::qualtrics::client::QualtricsClient;
use crate::services::export_api::SurveyExportApi;
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use peer_rater::{
    archive::extract_export,
    fetch::{BasicClient, fetch_bytes},
    layout::ExportLayout,
    output::{write_student_files, write_summary},
    parser::{ParseOptions, parse_export, parse_export_from_reader},
    scores::{SurveyResults, TypeInference},
};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[derive(Parser)]
#[command(name = "peer_rater")]
#[command(about = "A tool to collect and score peer-review surveys", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse a survey export CSV from a file or URL
    Parse {
        /// Path to file or URL to fetch
        #[arg(value_name = "FILE_OR_URL")]
        source: String,

        /// Directory to write reports to (defaults to the survey name)
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        #[command(flatten)]
        parse_flags: ParseFlags,
    },
    /// Download a survey's responses from Qualtrics, then parse them
    Fetch {
        /// The survey id (e.g. "SV_...")
        #[arg(short, long)]
        survey_id: String,

        /// Qualtrics API token
        #[arg(short = 't', long, env = "QUALTRICS_API_TOKEN", hide_env_values = true)]
        api_token: String,

        /// Qualtrics data center subdomain
        #[arg(short, long, default_value = "az1")]
        data_center: String,

        /// Seconds to wait between export progress polls
        #[arg(long, default_value_t = 2)]
        poll_interval: u64,

        #[command(flatten)]
        parse_flags: ParseFlags,
    },
}

#[derive(Args)]
struct ParseFlags {
    /// Skip rows with an unknown respondent index instead of failing
    #[arg(long, default_value_t = false)]
    lenient: bool,

    /// Infer each field's type from its first value, as the legacy tool did
    #[arg(long, default_value_t = false)]
    legacy_types: bool,
}

impl ParseFlags {
    fn to_options(&self) -> ParseOptions {
        ParseOptions {
            layout: ExportLayout::default(),
            lenient: self.lenient,
            inference: if self.legacy_types {
                TypeInference::FirstElement
            } else {
                TypeInference::Tagged
            },
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path =
        std::env::var("LOG_FILE_PATH").unwrap_or_else(|_| "logs/peer_rater.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("peer_rater.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse().unwrap()));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse().unwrap()));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Parse {
            source,
            output_dir,
            parse_flags,
        } => {
            let survey_name = source_stem(&source);
            let out_dir = output_dir.unwrap_or_else(|| PathBuf::from(&survey_name));
            let opts = parse_flags.to_options();

            let results = if source.starts_with("http") {
                let client = BasicClient::new();
                let bytes = fetch_bytes(&client, &source).await?;
                parse_export_from_reader(bytes.as_slice(), &opts)?
            } else {
                parse_export(&source, &opts)?
            };

            write_reports(&out_dir, &survey_name, &results)?;
        }
        Commands::Fetch {
            survey_id,
            api_token,
            data_center,
            poll_interval,
            parse_flags,
        } => {
            let client = QualtricsClient::new(&data_center, api_token);
            let bytes =
                download_survey_export(&client, &survey_id, Duration::from_secs(poll_interval))
                    .await?;

            let extracted = extract_export(&bytes, Path::new("."))?;
            let results = parse_export(&extracted.csv_path, &parse_flags.to_options())?;
            write_reports(&extracted.survey_dir, &extracted.survey_name, &results)?;
        }
    }

    Ok(())
}

/// Drives a response export to completion: start the job, poll until it
/// reports done, then download the ZIP payload.
#[tracing::instrument(skip(api), fields(survey_id))]
async fn download_survey_export(
    api: &impl SurveyExportApi,
    survey_id: &str,
    poll_interval: Duration,
) -> Result<Vec<u8>> {
    const MAX_POLLS: u32 = 300;

    let progress_id = api.start_export(survey_id).await?;
    info!(progress_id = %progress_id, "Export job started");

    let mut polls = 0u32;
    loop {
        let progress = api.export_progress(&progress_id).await?;
        info!(
            percent = progress.percent_complete,
            status = %progress.status,
            "Export progress"
        );
        if progress.is_complete() {
            break;
        }
        polls += 1;
        if polls >= MAX_POLLS {
            anyhow::bail!(
                "export did not complete after {} progress checks",
                MAX_POLLS
            );
        }
        tokio::time::sleep(poll_interval).await;
    }

    let bytes = api.download_export(&progress_id).await?;
    info!(bytes = bytes.len(), "Export downloaded");
    Ok(bytes)
}

/// Writes both report shapes into `out_dir`, creating it if needed. The two
/// outputs are independent: a summary failure is logged and does not stop
/// the student files.
fn write_reports(out_dir: &Path, survey_name: &str, results: &SurveyResults) -> Result<()> {
    if results.reports.is_empty() {
        warn!("No student received any feedback, reports will be empty");
    }
    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("creating output directory {}", out_dir.display()))?;
    write_student_files(out_dir, results)?;
    if let Err(e) = write_summary(out_dir, survey_name, results) {
        warn!(error = %e, "Failed to write summary CSV");
    }
    Ok(())
}

/// Name of a local path or URL without directories or the `.csv` extension,
/// used as the default survey name.
fn source_stem(source: &str) -> String {
    let tail = source
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(source)
        .split(['?', '#'])
        .next()
        .unwrap_or(source);
    let stem = tail.strip_suffix(".csv").unwrap_or(tail);
    if stem.is_empty() {
        "survey".to_string()
    } else {
        stem.replace(' ', "")
    }
}
