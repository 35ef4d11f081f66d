//! Report sinks.
//!
//! A sink receives an already-materialized [`RollupReport`] by reference,
//! so a failed delivery can be retried without touching the database.

mod generator;

use generator::{
    generate_console_lines, generate_csv_report, generate_json_report, generate_markdown_report,
};

use crate::cli::SinkKind;
use crate::config::ReportConfig;
use crate::error::SinkError;
use crate::models::RollupReport;
use async_trait::async_trait;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

/// Destination for a finished rollup report.
#[async_trait]
pub trait ReportSink: Send {
    /// Where records go, for logs and progress output.
    fn describe(&self) -> String;

    /// Deliver the whole report, or nothing.
    async fn emit(&mut self, report: &RollupReport) -> Result<(), SinkError>;
}

/// Deliver `report` to `sink`.
pub async fn emit(report: &RollupReport, sink: &mut dyn ReportSink) -> Result<(), SinkError> {
    debug!(
        "Emitting {} {} records to {}",
        report.records.len(),
        report.metadata.kind,
        sink.describe()
    );

    match sink.emit(report).await {
        Ok(()) => {
            info!(
                "Delivered {} records to {}",
                report.records.len(),
                sink.describe()
            );
            Ok(())
        }
        Err(e) => {
            warn!("Report delivery to {} failed: {}", sink.describe(), e);
            Err(e)
        }
    }
}

/// Build the sink selected in `config`.
pub fn build_sink(config: &ReportConfig) -> Result<Box<dyn ReportSink>, SinkError> {
    let sink: Box<dyn ReportSink> = match config.sink {
        SinkKind::Console => Box::new(ConsoleSink::stdout()),
        SinkKind::Json | SinkKind::Csv | SinkKind::Markdown => {
            Box::new(FileSink::new(config.output_path(), config.sink))
        }
        SinkKind::Webhook => {
            let url = config.webhook_url.clone().unwrap_or_default();
            Box::new(WebhookSink::new(
                url,
                Duration::from_secs(config.webhook_timeout_seconds),
            )?)
        }
    };
    Ok(sink)
}

/// Writes one line per record to a stream.
pub struct ConsoleSink<W: Write + Send> {
    writer: W,
}

impl ConsoleSink<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write + Send> ConsoleSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }
}

#[async_trait]
impl<W: Write + Send> ReportSink for ConsoleSink<W> {
    fn describe(&self) -> String {
        "console".to_string()
    }

    async fn emit(&mut self, report: &RollupReport) -> Result<(), SinkError> {
        let lines = generate_console_lines(report);
        self.writer
            .write_all(lines.as_bytes())
            .and_then(|_| self.writer.flush())
            .map_err(SinkError::Console)
    }
}

/// Writes a JSON, CSV or Markdown file atomically.
#[derive(Debug, Clone)]
pub struct FileSink {
    path: PathBuf,
    format: SinkKind,
}

impl FileSink {
    pub fn new(path: PathBuf, format: SinkKind) -> Self {
        Self { path, format }
    }

    fn render(&self, report: &RollupReport) -> Result<Vec<u8>, SinkError> {
        match self.format {
            SinkKind::Csv => generate_csv_report(report),
            SinkKind::Markdown => Ok(generate_markdown_report(report).into_bytes()),
            _ => Ok(generate_json_report(report)?.into_bytes()),
        }
    }
}

#[async_trait]
impl ReportSink for FileSink {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    async fn emit(&mut self, report: &RollupReport) -> Result<(), SinkError> {
        let contents = self.render(report)?;
        write_atomic(&self.path, &contents)
    }
}

/// Write `contents` to a temp file beside `path`, then rename it into place.
/// Readers see either the previous file or the complete new one.
fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), SinkError> {
    let io_err = |source: io::Error| SinkError::Io {
        path: path.to_path_buf(),
        source,
    };

    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut tmp = NamedTempFile::new_in(dir).map_err(io_err)?;
    tmp.write_all(contents).map_err(io_err)?;
    tmp.as_file().sync_all().map_err(io_err)?;
    tmp.persist(path).map_err(|e| io_err(e.error))?;

    debug!("Wrote {} bytes to {}", contents.len(), path.display());
    Ok(())
}

/// POSTs the JSON report to an HTTP endpoint.
pub struct WebhookSink {
    url: String,
    timeout: Duration,
    http_client: reqwest::Client,
}

impl WebhookSink {
    pub fn new(url: String, timeout: Duration) -> Result<Self, SinkError> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SinkError::Delivery {
                url: url.clone(),
                reason: format!("failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            url,
            timeout,
            http_client,
        })
    }
}

#[async_trait]
impl ReportSink for WebhookSink {
    fn describe(&self) -> String {
        self.url.clone()
    }

    async fn emit(&mut self, report: &RollupReport) -> Result<(), SinkError> {
        let delivery = |reason: String| SinkError::Delivery {
            url: self.url.clone(),
            reason,
        };

        let response = self
            .http_client
            .post(&self.url)
            .json(report)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    delivery(format!("timed out after {}s", self.timeout.as_secs()))
                } else if e.is_connect() {
                    delivery(format!("cannot connect: {}", e))
                } else {
                    delivery(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(delivery(format!("HTTP {}: {}", status, body.trim())));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::generator::tests::{empty_report, mount_report};
    use super::*;
    use crate::models::RollupKind;
    use tempfile::TempDir;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_console_sink_writes_one_line_per_record() {
        let mut sink = ConsoleSink::new(Vec::new());
        emit(&mount_report(), &mut sink).await.unwrap();

        let output = String::from_utf8(sink.writer).unwrap();
        assert_eq!(output.lines().count(), 2);
        assert!(output.starts_with("{'user_id': 'user-a'"));
    }

    #[tokio::test]
    async fn test_file_sinks_write_complete_files() {
        let dir = TempDir::new().unwrap();
        let report = mount_report();

        for (format, name) in [
            (SinkKind::Json, "out.json"),
            (SinkKind::Csv, "out.csv"),
            (SinkKind::Markdown, "out.md"),
        ] {
            let mut sink = FileSink::new(dir.path().join(name), format);
            emit(&report, &mut sink).await.unwrap();

            let written = std::fs::read(&sink.path).unwrap();
            assert_eq!(written, sink.render(&report).unwrap());
        }

        // Only the three reports remain; no temp files are left behind.
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 3);
    }

    #[tokio::test]
    async fn test_file_sink_replaces_previous_report() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("mounts.csv");
        std::fs::write(&path, "stale").unwrap();

        let mut sink = FileSink::new(path.clone(), SinkKind::Csv);
        emit(&empty_report(RollupKind::MountFailures), &mut sink)
            .await
            .unwrap();

        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "user_id,failures,total,failure_rate\n"
        );
    }

    #[tokio::test]
    async fn test_emit_can_be_retried_after_failure() {
        let dir = TempDir::new().unwrap();
        let target_dir = dir.path().join("reports");
        let report = mount_report();

        let mut sink = FileSink::new(target_dir.join("mounts.json"), SinkKind::Json);
        let err = emit(&report, &mut sink).await.unwrap_err();
        assert!(matches!(err, SinkError::Io { .. }));
        assert!(!sink.path.exists());

        std::fs::create_dir(&target_dir).unwrap();
        tokio_test::assert_ok!(emit(&report, &mut sink).await);

        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&sink.path).unwrap()).unwrap();
        assert_eq!(json["records"].as_array().unwrap().len(), 2);
    }

    /// Accept one HTTP request, answer with `status`, and return the request body.
    async fn serve_once(status: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/hooks/avd", listener.local_addr().unwrap());

        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                request.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&request).to_string();
                if let Some(end) = text.find("\r\n\r\n") {
                    let length = text[..end]
                        .lines()
                        .find_map(|l| {
                            let (name, value) = l.split_once(':')?;
                            name.eq_ignore_ascii_case("content-length")
                                .then(|| value.trim().parse::<usize>().ok())
                                .flatten()
                        })
                        .unwrap_or(0);
                    if request.len() >= end + 4 + length || n == 0 {
                        let body = String::from_utf8_lossy(&request[end + 4..]).to_string();
                        let response = format!(
                            "HTTP/1.1 {}\r\ncontent-length: 0\r\nconnection: close\r\n\r\n",
                            status
                        );
                        socket.write_all(response.as_bytes()).await.unwrap();
                        return body;
                    }
                }
                if n == 0 {
                    return String::new();
                }
            }
        });

        (url, handle)
    }

    #[tokio::test]
    async fn test_webhook_posts_json_report() {
        let (url, server) = serve_once("204 No Content").await;
        let mut sink = WebhookSink::new(url, Duration::from_secs(5)).unwrap();

        emit(&mount_report(), &mut sink).await.unwrap();

        let body: serde_json::Value = serde_json::from_str(&server.await.unwrap()).unwrap();
        assert_eq!(body["metadata"]["kind"], "mount-failures");
        assert_eq!(body["records"][1]["user_id"], "user|c");
    }

    #[tokio::test]
    async fn test_webhook_rejected_status_is_delivery_error() {
        let (url, server) = serve_once("500 Internal Server Error").await;
        let mut sink = WebhookSink::new(url, Duration::from_secs(5)).unwrap();

        let err = emit(&mount_report(), &mut sink).await.unwrap_err();
        server.await.unwrap();

        match err {
            SinkError::Delivery { reason, .. } => assert!(reason.contains("500")),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_build_sink_per_config() {
        let mut config = ReportConfig::default();
        assert_eq!(build_sink(&config).unwrap().describe(), "console");

        config.sink = SinkKind::Markdown;
        assert_eq!(build_sink(&config).unwrap().describe(), "avd_rollup.md");

        config.sink = SinkKind::Webhook;
        config.webhook_url = Some("https://hooks.example.test/avd".to_string());
        assert_eq!(
            build_sink(&config).unwrap().describe(),
            "https://hooks.example.test/avd"
        );
    }
}
