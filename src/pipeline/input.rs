//! Input resolution: turn a user-supplied path or URL into an [`UploadedDocument`].
//!
//! Everything is read into memory: the extraction service takes the file as
//! a multipart upload anyway, and the batch holds only one document's bytes
//! in flight at a time. The format is inferred from the file name and checked
//! against the leading bytes so a mislabelled file fails here with a clear
//! message instead of somewhere inside Docling.

use crate::document::UploadedDocument;
use crate::error::ConvertError;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Load one input, downloading it first if it is a URL.
pub async fn load_document(input: &str, timeout_secs: u64) -> Result<UploadedDocument, ConvertError> {
    if is_url(input) {
        download_url(input, timeout_secs).await
    } else {
        load_local(Path::new(input)).await
    }
}

/// Load every input in order, stopping at the first one that cannot be read.
pub async fn load_documents<S: AsRef<str>>(
    inputs: &[S],
    timeout_secs: u64,
) -> Result<Vec<UploadedDocument>, ConvertError> {
    let mut documents = Vec::with_capacity(inputs.len());
    for input in inputs {
        documents.push(load_document(input.as_ref(), timeout_secs).await?);
    }
    Ok(documents)
}

async fn load_local(path: &Path) -> Result<UploadedDocument, ConvertError> {
    let bytes = tokio::fs::read(path).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::PermissionDenied => ConvertError::PermissionDenied {
            path: path.to_path_buf(),
        },
        _ => ConvertError::FileNotFound {
            path: path.to_path_buf(),
        },
    })?;

    let filename = path
        .file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .ok_or_else(|| ConvertError::FileNotFound {
            path: path.to_path_buf(),
        })?;

    debug!("Loaded local file: {} ({} bytes)", path.display(), bytes.len());
    UploadedDocument::from_bytes(filename, bytes)
}

/// Download a URL into memory.
async fn download_url(url: &str, timeout_secs: u64) -> Result<UploadedDocument, ConvertError> {
    info!("Downloading document from: {}", url);

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| ConvertError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            ConvertError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            ConvertError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    })?;

    if !response.status().is_success() {
        return Err(ConvertError::DownloadFailed {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    let filename = filename_from_url(url).ok_or_else(|| ConvertError::UnsupportedFormat {
        filename: url.to_string(),
    })?;

    let bytes = response
        .bytes()
        .await
        .map_err(|e| ConvertError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    info!("Downloaded '{}' ({} bytes)", filename, bytes.len());
    UploadedDocument::from_bytes(filename, bytes.to_vec())
}

/// Last path segment of a URL, if it looks like a file name.
fn filename_from_url(url: &str) -> Option<String> {
    let parsed = reqwest::Url::parse(url).ok()?;
    let last = parsed.path_segments()?.next_back()?;
    if last.is_empty() || !last.contains('.') {
        return None;
    }
    Some(last.to_string())
}
