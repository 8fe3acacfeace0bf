use reqwest::Client;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};
use url::Url;

use crate::config::SourceConfig;
use crate::errors::{Result, SourceError};

/// Turns the configured locator into a local file path, downloading it first
/// when it is an http(s) URL.
pub async fn resolve_locator(client: &Client, config: &SourceConfig) -> Result<PathBuf> {
    let locator = config.url.trim();
    match Url::parse(locator) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => {
            let dest_dir = config
                .cache_dir
                .clone()
                .unwrap_or_else(std::env::temp_dir);
            download(client, &url, &dest_dir, config.reuse_download).await
        }
        Ok(url) if url.scheme() == "file" => url.to_file_path().map_err(|_| {
            SourceError::Malformed {
                reason: format!("{locator} is not a valid file URL"),
            }
            .into()
        }),
        // anything else, including Windows drive letters, is a plain path
        _ => Ok(PathBuf::from(locator)),
    }
}

/// Streams `url` into `dest_dir` under its original file name.
///
/// The body goes to a `.part` file that is renamed once complete, so an
/// interrupted download never passes for a finished one. The `.part` file is
/// removed when the transfer fails.
pub async fn download(
    client: &Client,
    url: &Url,
    dest_dir: &Path,
    reuse_existing: bool,
) -> Result<PathBuf> {
    let filename = url
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|name| !name.is_empty())
        .unwrap_or("download.csv.gz");
    let dest_path = dest_dir.join(filename);

    if reuse_existing && fs::try_exists(&dest_path).await.unwrap_or(false) {
        info!(path = %dest_path.display(), "reusing previous download");
        return Ok(dest_path);
    }

    let download_err = |e: reqwest::Error| SourceError::Download {
        url: url.to_string(),
        reason: e.to_string(),
    };

    fs::create_dir_all(dest_dir).await.map_err(io_err(dest_dir))?;

    info!(url = %url, "downloading");
    let start = Instant::now();
    let mut resp = client
        .get(url.as_str())
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(download_err)?;

    let part_path = dest_path.with_file_name(format!("{filename}.part"));
    let written = match write_body(&mut resp, url, &part_path).await {
        Ok(bytes) => fs::rename(&part_path, &dest_path)
            .await
            .map(|()| bytes)
            .map_err(io_err(&dest_path)),
        Err(e) => Err(e),
    };
    let bytes = match written {
        Ok(bytes) => bytes,
        Err(e) => {
            match fs::remove_file(&part_path).await {
                Ok(()) => info!(path = %part_path.display(), "removed partial download"),
                Err(cleanup) if cleanup.kind() == std::io::ErrorKind::NotFound => {}
                Err(cleanup) => warn!(
                    path = %part_path.display(),
                    "could not remove partial download: {}", cleanup
                ),
            }
            return Err(e.into());
        }
    };

    info!(
        path = %dest_path.display(),
        bytes,
        elapsed = ?start.elapsed(),
        "downloaded"
    );
    Ok(dest_path)
}

async fn write_body(
    resp: &mut reqwest::Response,
    url: &Url,
    part_path: &Path,
) -> std::result::Result<u64, SourceError> {
    let mut file = fs::File::create(part_path)
        .await
        .map_err(io_err(part_path))?;
    let mut bytes = 0u64;
    while let Some(chunk) = resp.chunk().await.map_err(|e| SourceError::Download {
        url: url.to_string(),
        reason: e.to_string(),
    })? {
        file.write_all(&chunk).await.map_err(io_err(part_path))?;
        bytes += chunk.len() as u64;
    }
    file.flush().await.map_err(io_err(part_path))?;
    Ok(bytes)
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> SourceError + use<> {
    let path = path.display().to_string();
    move |source| SourceError::Io { path, source }
}
