//! Artifact streaming with progress tracking and cancellation.
//!
//! Bytes are written to a staging file only. [`promote`] moves a completed
//! staging file under its permanent name; a failed or cancelled transfer
//! never reaches the final directory.

use crate::cancel::CancellationToken;
use crate::config::NetworkConfig;
use crate::{CivitaiError, Result};
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use reqwest::{header, Response};
use std::path::Path;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Boxed stream of body chunks.
pub type ByteStream = BoxStream<'static, Result<Bytes>>;

/// An opened artifact download.
pub struct DownloadStream {
    /// File name announced by the server (`Content-Disposition`).
    pub file_name: Option<String>,
    /// Expected size, when the server sent `Content-Length`.
    pub content_length: Option<u64>,
    pub body: ByteStream,
}

impl std::fmt::Debug for DownloadStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadStream")
            .field("file_name", &self.file_name)
            .field("content_length", &self.content_length)
            .finish()
    }
}

impl DownloadStream {
    /// Wrap a successful HTTP response.
    pub fn from_response(response: Response) -> Self {
        let file_name = response
            .headers()
            .get(header::CONTENT_DISPOSITION)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_content_disposition);
        let content_length = response.content_length();
        let url = response.url().to_string();

        let body = response
            .bytes_stream()
            .map(move |chunk| {
                chunk.map_err(|e| CivitaiError::Network {
                    message: format!("Error reading download stream from {}: {}", url, e),
                    cause: Some(e.to_string()),
                })
            })
            .boxed();

        Self {
            file_name,
            content_length,
            body,
        }
    }
}

/// Extract the file name from a `Content-Disposition` header value.
///
/// Prefers the RFC 5987 `filename*=` form over plain `filename=`.
pub fn parse_content_disposition(value: &str) -> Option<String> {
    let mut plain = None;
    let mut extended = None;

    for part in value.split(';').map(str::trim) {
        if let Some(rest) = part.strip_prefix("filename*=") {
            // charset'lang'percent-encoded
            let encoded = rest.splitn(3, '\'').nth(2).unwrap_or(rest);
            extended = urlencoding::decode(encoded.trim_matches('"'))
                .ok()
                .map(|s| s.into_owned());
        } else if let Some(rest) = part.strip_prefix("filename=") {
            plain = Some(rest.trim_matches('"').to_string());
        }
    }

    extended.or(plain).and_then(|name| sanitize_file_name(&name))
}

/// Reduce a server-provided name to a single safe path component.
pub fn sanitize_file_name(name: &str) -> Option<String> {
    let last = name.rsplit(['/', '\\']).next().unwrap_or("").trim();
    if last.is_empty() || last == "." || last == ".." {
        None
    } else {
        Some(last.to_string())
    }
}

/// Progress information for a download.
#[derive(Debug, Clone)]
pub struct DownloadProgress {
    pub bytes_downloaded: u64,
    pub total_bytes: Option<u64>,
    pub speed_bytes_per_sec: f64,
    /// Percentage complete (0-100).
    pub percent: Option<f64>,
}

impl DownloadProgress {
    fn new(bytes_downloaded: u64, total_bytes: Option<u64>, speed: f64) -> Self {
        let percent = total_bytes.map(|total| {
            if total > 0 {
                (bytes_downloaded as f64 / total as f64) * 100.0
            } else {
                0.0
            }
        });

        Self {
            bytes_downloaded,
            total_bytes,
            speed_bytes_per_sec: speed,
            percent,
        }
    }
}

/// Writes download streams to staging files.
#[derive(Debug, Clone)]
pub struct DownloadManager {
    cancel: CancellationToken,
    progress_interval: Duration,
}

impl DownloadManager {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            progress_interval: NetworkConfig::DOWNLOAD_PROGRESS_INTERVAL,
        }
    }

    /// Drain `stream` into `staging_path`.
    ///
    /// Fails when the stream errors, the token is cancelled, or fewer bytes
    /// arrive than `Content-Length` announced. Cancellation is noticed while
    /// waiting on a stalled body too. The staging file is removed on failure.
    pub async fn stream_to_file(
        &self,
        stream: DownloadStream,
        staging_path: &Path,
        progress_tx: Option<mpsc::Sender<DownloadProgress>>,
    ) -> Result<u64> {
        let result = self.write_stream(stream, staging_path, progress_tx).await;
        if result.is_err() {
            let _ = tokio::fs::remove_file(staging_path).await;
        }
        result
    }

    async fn write_stream(
        &self,
        stream: DownloadStream,
        staging_path: &Path,
        progress_tx: Option<mpsc::Sender<DownloadProgress>>,
    ) -> Result<u64> {
        let DownloadStream {
            content_length,
            mut body,
            ..
        } = stream;

        let mut file = tokio::fs::File::create(staging_path)
            .await
            .map_err(|e| CivitaiError::Io {
                message: format!("Failed to create staging file: {}", e),
                path: Some(staging_path.to_path_buf()),
                source: Some(e),
            })?;

        let mut bytes_downloaded: u64 = 0;
        let mut last_progress_update = Instant::now();
        let started = Instant::now();

        if let Some(ref tx) = progress_tx {
            let _ = tx.send(DownloadProgress::new(0, content_length, 0.0)).await;
        }

        loop {
            let chunk = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(CivitaiError::DownloadCancelled),
                next = body.next() => match next {
                    Some(chunk) => chunk?,
                    None => break,
                },
            };

            file.write_all(&chunk).await.map_err(|e| CivitaiError::Io {
                message: format!("Failed to write staging file: {}", e),
                path: Some(staging_path.to_path_buf()),
                source: Some(e),
            })?;
            bytes_downloaded += chunk.len() as u64;

            if last_progress_update.elapsed() >= self.progress_interval {
                if let Some(ref tx) = progress_tx {
                    let speed = speed(bytes_downloaded, started);
                    let _ = tx
                        .send(DownloadProgress::new(bytes_downloaded, content_length, speed))
                        .await;
                }
                last_progress_update = Instant::now();
            }
        }
        self.cancel.check()?;

        if let Some(expected) = content_length {
            if bytes_downloaded < expected {
                return Err(CivitaiError::DownloadFailed {
                    url: staging_path.display().to_string(),
                    message: format!(
                        "stream ended after {} of {} bytes",
                        bytes_downloaded, expected
                    ),
                });
            }
        }

        file.flush().await.map_err(|e| CivitaiError::io_with_path(e, staging_path))?;
        file.sync_all()
            .await
            .map_err(|e| CivitaiError::io_with_path(e, staging_path))?;

        if let Some(ref tx) = progress_tx {
            let speed = speed(bytes_downloaded, started);
            let _ = tx
                .send(DownloadProgress::new(bytes_downloaded, content_length, speed))
                .await;
        }

        debug!(
            "Staged {} bytes at {}",
            bytes_downloaded,
            staging_path.display()
        );
        Ok(bytes_downloaded)
    }
}

fn speed(bytes: u64, started: Instant) -> f64 {
    let elapsed = started.elapsed().as_secs_f64();
    if elapsed > 0.0 {
        bytes as f64 / elapsed
    } else {
        0.0
    }
}

/// Move a completed staging file to its permanent location.
///
/// Staging lives on the same filesystem as the library root, so this is a
/// rename and the final path appears complete or not at all.
pub fn promote(staged: &Path, destination: &Path) -> Result<()> {
    if let Some(parent) = destination.parent() {
        std::fs::create_dir_all(parent).map_err(|e| CivitaiError::Io {
            message: format!("Failed to create directory: {}", e),
            path: Some(parent.to_path_buf()),
            source: Some(e),
        })?;
    }

    std::fs::rename(staged, destination).map_err(|e| CivitaiError::Io {
        message: format!("Failed to move download to final destination: {}", e),
        path: Some(destination.to_path_buf()),
        source: Some(e),
    })?;

    info!("Saved {}", destination.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use tempfile::TempDir;

    fn stream_of(chunks: Vec<Result<Bytes>>, content_length: Option<u64>) -> DownloadStream {
        DownloadStream {
            file_name: None,
            content_length,
            body: stream::iter(chunks).boxed(),
        }
    }

    #[test]
    fn test_download_progress() {
        let progress = DownloadProgress::new(50, Some(100), 10.0);
        assert_eq!(progress.percent, Some(50.0));

        let unknown = DownloadProgress::new(50, None, 10.0);
        assert_eq!(unknown.percent, None);
    }

    #[test]
    fn test_parse_content_disposition() {
        assert_eq!(
            parse_content_disposition("attachment; filename=\"foo_v2.safetensors\""),
            Some("foo_v2.safetensors".to_string())
        );
        assert_eq!(
            parse_content_disposition(
                "attachment; filename=\"x.bin\"; filename*=UTF-8''caf%C3%A9.safetensors"
            ),
            Some("café.safetensors".to_string())
        );
        assert_eq!(
            parse_content_disposition("attachment; filename=\"../../etc/passwd\""),
            Some("passwd".to_string())
        );
        assert_eq!(parse_content_disposition("inline"), None);
    }

    #[tokio::test]
    async fn test_stream_to_file_writes_all_chunks() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("artifact.part");
        let manager = DownloadManager::new(CancellationToken::new());

        let stream = stream_of(
            vec![Ok(Bytes::from_static(b"abc")), Ok(Bytes::from_static(b"def"))],
            Some(6),
        );
        let bytes = manager.stream_to_file(stream, &path, None).await.unwrap();

        assert_eq!(bytes, 6);
        assert_eq!(std::fs::read(&path).unwrap(), b"abcdef");
    }

    #[tokio::test]
    async fn test_interrupted_stream_removes_staging_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("artifact.part");
        let manager = DownloadManager::new(CancellationToken::new());

        let stream = stream_of(
            vec![
                Ok(Bytes::from_static(b"partial")),
                Err(CivitaiError::Network {
                    message: "connection reset".into(),
                    cause: None,
                }),
            ],
            Some(1024),
        );
        let result = manager.stream_to_file(stream, &path, None).await;

        assert!(result.is_err());
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_short_stream_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("artifact.part");
        let manager = DownloadManager::new(CancellationToken::new());

        let stream = stream_of(vec![Ok(Bytes::from_static(b"1234"))], Some(10));
        let result = manager.stream_to_file(stream, &path, None).await;

        assert!(matches!(result, Err(CivitaiError::DownloadFailed { .. })));
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_cancelled_download() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("artifact.part");
        let token = CancellationToken::new();
        token.cancel();
        let manager = DownloadManager::new(token);

        let stream = stream_of(vec![Ok(Bytes::from_static(b"data"))], None);
        let result = manager.stream_to_file(stream, &path, None).await;

        assert!(matches!(result, Err(CivitaiError::DownloadCancelled)));
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_cancel_interrupts_stalled_stream() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("artifact.part");
        let token = CancellationToken::new();
        let manager = DownloadManager::new(token.clone());

        // One chunk, then the server goes quiet without closing.
        let body = stream::iter(vec![Ok(Bytes::from_static(b"head"))])
            .chain(stream::pending())
            .boxed();
        let stalled = DownloadStream {
            file_name: None,
            content_length: Some(1024),
            body,
        };

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            token.cancel();
        });
        let result = tokio::time::timeout(
            Duration::from_secs(3),
            manager.stream_to_file(stalled, &path, None),
        )
        .await
        .expect("stalled download ignored cancellation");

        assert!(matches!(result, Err(CivitaiError::DownloadCancelled)));
        assert!(!path.exists());
    }

    #[test]
    fn test_promote_moves_file() {
        let tmp = TempDir::new().unwrap();
        let staged = tmp.path().join("staged.bin");
        std::fs::write(&staged, b"weights").unwrap();
        let destination = tmp.path().join("models").join("Lora").join("foo.safetensors");

        promote(&staged, &destination).unwrap();

        assert!(!staged.exists());
        assert_eq!(std::fs::read(&destination).unwrap(), b"weights");
    }
}
