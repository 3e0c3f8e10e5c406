//! Source archive download and extraction.

use async_trait::async_trait;
use pushq_core::stage::ArchiveSource;
use pushq_core::{JobRecord, JobWorkspace};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{info, warn};
use url::Url;

/// File name of the downloaded archive inside the job directory.
const ARCHIVE_FILE: &str = "source.zip";

/// Largest archive a job may download.
pub const DEFAULT_MAX_ARCHIVE_BYTES: u64 = 512 * 1024 * 1024;

/// Downloads `source_url` over HTTP and unpacks it with the system `unzip`.
pub struct HttpArchiveSource {
    client: reqwest::Client,
    root: PathBuf,
    max_bytes: u64,
}

impl HttpArchiveSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            client: reqwest::Client::new(),
            root: root.into(),
            max_bytes: DEFAULT_MAX_ARCHIVE_BYTES,
        }
    }

    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    pub fn with_max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    async fn fetch(&self, url: &Url, dest: &Path) -> Result<u64, ArchiveError> {
        let mut response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| ArchiveError::Request(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ArchiveError::Status(response.status().as_u16()));
        }

        if let Some(length) = response.content_length() {
            if length > self.max_bytes {
                return Err(ArchiveError::TooLarge(self.max_bytes));
            }
        }

        // Stream to disk; the declared length is not trusted.
        let mut file = tokio::fs::File::create(dest).await?;
        let mut written: u64 = 0;
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| ArchiveError::Request(e.to_string()))?
        {
            written += chunk.len() as u64;
            if written > self.max_bytes {
                return Err(ArchiveError::TooLarge(self.max_bytes));
            }
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        Ok(written)
    }
}

/// Validate the archive location; only HTTP(S) is fetched.
fn parse_source_url(raw: &str) -> Result<Url, ArchiveError> {
    let url = Url::parse(raw)?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(ArchiveError::UnsupportedScheme(other.to_string())),
    }
}

/// Unpack `archive` into `dest`, replacing existing files.
async fn extract(archive: &Path, dest: &Path) -> Result<(), ArchiveError> {
    tokio::fs::create_dir_all(dest).await?;

    let output = Command::new("unzip")
        .arg("-q")
        .arg("-o")
        .arg(archive)
        .arg("-d")
        .arg(dest)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        warn!(archive = %archive.display(), "Archive extraction failed");
        return Err(ArchiveError::Extract(stderr.trim().to_string()));
    }
    Ok(())
}

#[async_trait]
impl ArchiveSource for HttpArchiveSource {
    async fn download_archive(&self, mut job: JobRecord) -> pushq_core::Result<JobRecord> {
        let payload = job.submit_payload()?;
        let url = parse_source_url(&payload.source_url)?;

        let workspace = JobWorkspace::new(&self.root, &job.id);
        tokio::fs::create_dir_all(&workspace.download_dir).await?;
        let archive = workspace.download_dir.join(ARCHIVE_FILE);

        info!(job_id = %job.id, url = %url, "Downloading source archive");
        let bytes = self.fetch(&url, &archive).await?;

        let source_dir = workspace.source_dir();
        extract(&archive, &source_dir).await?;
        info!(job_id = %job.id, bytes, path = %source_dir.display(), "Source archive unpacked");

        job.properties
            .insert("archive.path", source_dir.to_string_lossy().into_owned());
        job.properties.insert("archive.bytes", bytes);
        Ok(job)
    }
}

/// Archive retrieval errors.
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid source URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Unsupported source URL scheme: {0}")]
    UnsupportedScheme(String),

    #[error("Download failed: {0}")]
    Request(String),

    #[error("Download returned HTTP {0}")]
    Status(u16),

    #[error("Archive exceeds the {0} byte limit")]
    TooLarge(u64),

    #[error("Extraction failed: {0}")]
    Extract(String),
}

impl From<ArchiveError> for pushq_core::Error {
    fn from(err: ArchiveError) -> Self {
        match err {
            ArchiveError::Io(e) => pushq_core::Error::Io(e.to_string()),
            ArchiveError::InvalidUrl(_) | ArchiveError::UnsupportedScheme(_) => {
                pushq_core::Error::InvalidInput(err.to_string())
            }
            ArchiveError::Request(_) | ArchiveError::Status(_) => {
                pushq_core::Error::Network(err.to_string())
            }
            ArchiveError::TooLarge(_) | ArchiveError::Extract(_) => {
                pushq_core::Error::Retrieval(err.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pushq_core::{Error, JobId, SubmitPayload};
    use std::collections::HashMap;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one canned HTTP response on a loopback port.
    async fn serve_once(head: &'static str, body: Vec<u8>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 1024];
            let _ = socket.read(&mut request).await;
            let _ = socket.write_all(head.as_bytes()).await;
            let _ = socket.write_all(&body).await;
            let _ = socket.shutdown().await;
        });
        format!("http://{addr}/source.zip")
    }

    fn job(source_url: &str) -> JobRecord {
        let payload = SubmitPayload {
            source_url: source_url.to_string(),
            repository: "acme/widgets".to_string(),
            owner_email: "owner@example.com".to_string(),
            build: HashMap::new(),
        };
        JobRecord::submit(JobId::from(3), &payload).unwrap()
    }

    #[test]
    fn test_only_http_sources_are_accepted() {
        assert!(parse_source_url("https://example.com/a.zip").is_ok());
        assert!(parse_source_url("http://example.com/a.zip").is_ok());
        assert!(matches!(
            parse_source_url("file:///etc/passwd"),
            Err(ArchiveError::UnsupportedScheme(s)) if s == "file"
        ));
        assert!(matches!(
            parse_source_url("not a url"),
            Err(ArchiveError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_error_conversion_keeps_category() {
        assert!(matches!(
            pushq_core::Error::from(ArchiveError::Status(404)),
            Error::Network(m) if m.contains("404")
        ));
        assert!(matches!(
            pushq_core::Error::from(ArchiveError::Extract("bad zip".to_string())),
            Error::Retrieval(_)
        ));
    }

    #[tokio::test]
    async fn test_rejected_url_creates_nothing() {
        let root = tempfile::tempdir().unwrap();
        let source = HttpArchiveSource::new(root.path());

        let err = source
            .download_archive(job("ftp://example.com/a.zip"))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::InvalidInput(_)));
        assert!(!root.path().join("3").exists());
    }

    #[tokio::test]
    async fn test_unreachable_host_is_a_network_error() {
        let root = tempfile::tempdir().unwrap();
        let source = HttpArchiveSource::new(root.path());

        // Port 9 on loopback refuses connections.
        let err = source
            .download_archive(job("http://127.0.0.1:9/source.zip"))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Network(_)));
    }

    #[tokio::test]
    async fn test_declared_length_over_limit_is_refused() {
        let root = tempfile::tempdir().unwrap();
        let url = serve_once(
            "HTTP/1.1 200 OK\r\nContent-Length: 4096\r\nConnection: close\r\n\r\n",
            vec![0u8; 4096],
        )
        .await;
        let source = HttpArchiveSource::new(root.path()).with_max_bytes(1024);

        let err = source.download_archive(job(&url)).await.unwrap_err();

        assert!(matches!(err, Error::Retrieval(m) if m.contains("1024")));
    }

    #[tokio::test]
    async fn test_undeclared_body_is_cut_at_limit() {
        let root = tempfile::tempdir().unwrap();
        let url = serve_once(
            "HTTP/1.1 200 OK\r\nConnection: close\r\n\r\n",
            vec![0u8; 64 * 1024],
        )
        .await;
        let source = HttpArchiveSource::new(root.path()).with_max_bytes(1024);

        let err = source.download_archive(job(&url)).await.unwrap_err();

        assert!(matches!(err, Error::Retrieval(m) if m.contains("1024")));
        let partial = root.path().join("3").join(ARCHIVE_FILE);
        assert!(std::fs::metadata(partial).unwrap().len() <= 1024);
    }
}
