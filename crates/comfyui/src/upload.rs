//! Retrying asset upload into ComfyUI's input store.
//!
//! Uploads use a fixed delay between attempts with no backoff growth.
//! A missing or unreadable source file fails at once without touching the
//! network, carrying the underlying I/O error.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::api::{ComfyUIApi, ComfyUIApiError};

/// Retry parameters for [`upload_asset`].
#[derive(Debug, Clone)]
pub struct UploadPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Pause between a failed attempt and the next one.
    pub retry_delay: Duration,
    /// Per-attempt request timeout.
    pub request_timeout: Duration,
}

impl Default for UploadPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_delay: Duration::from_millis(2000),
            request_timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    /// The source path does not exist.
    #[error("File not found: {}", path.display())]
    FileNotFound {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The source path exists but cannot be read as a regular file.
    #[error("Cannot read {}: {source}", path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The path has no base name usable as a multipart filename.
    #[error("Invalid upload file name: {}", path.display())]
    InvalidFileName { path: PathBuf },

    /// Every attempt failed; `source` is the last attempt's error.
    #[error("Image upload failed after {attempts} attempt(s): {source}")]
    Failed {
        attempts: u32,
        #[source]
        source: ComfyUIApiError,
    },
}

impl UploadError {
    fn from_io(path: &Path, source: std::io::Error) -> Self {
        let path = path.to_path_buf();
        if source.kind() == ErrorKind::NotFound {
            Self::FileNotFound { path, source }
        } else {
            Self::Unreadable { path, source }
        }
    }
}

/// Upload the file at `path` and return the name ComfyUI stored it under.
///
/// The file is streamed from disk on every attempt rather than buffered.
/// Falls back to the file's base name when the response carries no name.
/// The source file is never modified.
pub async fn upload_asset(
    api: &ComfyUIApi,
    path: &Path,
    policy: &UploadPolicy,
) -> Result<String, UploadError> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .ok_or_else(|| UploadError::InvalidFileName {
            path: path.to_path_buf(),
        })?;

    let metadata = tokio::fs::metadata(path)
        .await
        .map_err(|e| UploadError::from_io(path, e))?;
    if !metadata.is_file() {
        return Err(UploadError::Unreadable {
            path: path.to_path_buf(),
            source: std::io::Error::new(ErrorKind::InvalidInput, "not a regular file"),
        });
    }

    let mime_type = mime_for_path(path);
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        tracing::info!(attempt, file = %file_name, "Uploading asset to ComfyUI");

        // Reopened per attempt: a failed request consumes the stream.
        let file = tokio::fs::File::open(path).await.map_err(|e| {
            tracing::error!(path = %path.display(), error = %e, "Asset is not readable");
            UploadError::from_io(path, e)
        })?;

        match api
            .upload_image(&file_name, file, metadata.len(), mime_type, policy.request_timeout)
            .await
        {
            Ok(response) => {
                let name = response
                    .name
                    .filter(|n| !n.is_empty())
                    .unwrap_or_else(|| file_name.clone());
                tracing::info!(attempt, file = %file_name, uploaded_as = %name, "Asset uploaded");
                return Ok(name);
            }
            Err(e) if attempt >= max_attempts => {
                tracing::error!(attempt, file = %file_name, error = %e, "Asset upload failed, giving up");
                return Err(UploadError::Failed {
                    attempts: attempt,
                    source: e,
                });
            }
            Err(e) => {
                tracing::warn!(
                    attempt,
                    file = %file_name,
                    error = %e,
                    retry_in_ms = policy.retry_delay.as_millis() as u64,
                    "Asset upload attempt failed",
                );
                tokio::time::sleep(policy.retry_delay).await;
            }
        }
    }
}

/// Content type sent with the multipart part, from the file extension.
fn mime_for_path(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("webp") => "image/webp",
        Some("gif") => "image/gif",
        _ => "image/png",
    }
}
