use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use anyhow::Context;
use reqwest::blocking::Client;
use reqwest::StatusCode;
use servup_core::Credentials;
use servup_engine::{ArchiveFetcher, FetchError};
use tracing::debug;

use crate::render::{DownloadProgress, OutputStyle};

const DOWNLOAD_BUFFER_BYTES: usize = 64 * 1024;

/// Fetches distribution archives from the artifact repository over HTTP
/// basic auth.
pub(crate) struct HttpArchiveFetcher {
    style: OutputStyle,
}

impl HttpArchiveFetcher {
    pub(crate) fn new(style: OutputStyle) -> Self {
        Self { style }
    }
}

impl ArchiveFetcher for HttpArchiveFetcher {
    fn fetch(
        &mut self,
        url: &str,
        credentials: &Credentials,
        destination: &Path,
    ) -> Result<(), FetchError> {
        let mut progress = DownloadProgress::start(self.style, "download");
        let result = download_with_progress(url, credentials, destination, |downloaded, total| {
            progress.update(downloaded, total)
        });
        match result {
            Ok(bytes) => {
                debug!(bytes, path = %destination.display(), "download complete");
                progress.finish_success();
                Ok(())
            }
            Err(err) => {
                progress.finish_abandon();
                Err(err)
            }
        }
    }
}

/// Streams `url` into `destination` through a `.part` file, reporting
/// `(downloaded, total)` after every chunk. Returns the byte count.
pub(crate) fn download_with_progress<F>(
    url: &str,
    credentials: &Credentials,
    destination: &Path,
    mut on_progress: F,
) -> Result<u64, FetchError>
where
    F: FnMut(u64, Option<u64>),
{
    let client = Client::builder()
        .build()
        .context("failed to build HTTP client")?;
    let mut response = client
        .get(url)
        .basic_auth(&credentials.username, Some(&credentials.password))
        .send()
        .with_context(|| format!("failed to connect to {url}"))?;

    match response.status() {
        StatusCode::OK => {}
        StatusCode::NOT_FOUND => return Err(FetchError::NotFound),
        status => return Err(FetchError::Status(status.as_u16())),
    }

    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create download dir: {}", parent.display()))?;
    }
    let part_path = part_path_for(destination);
    let total = response.content_length();
    on_progress(0, total);

    let written = match stream_to_file(&mut response, &part_path, total, &mut on_progress) {
        Ok(written) => written,
        Err(err) => {
            let _ = fs::remove_file(&part_path);
            return Err(err.into());
        }
    };

    fs::rename(&part_path, destination).with_context(|| {
        format!(
            "failed to move downloaded archive into place: {}",
            destination.display()
        )
    })?;
    Ok(written)
}

fn stream_to_file<R, F>(
    reader: &mut R,
    path: &Path,
    total: Option<u64>,
    on_progress: &mut F,
) -> anyhow::Result<u64>
where
    R: Read,
    F: FnMut(u64, Option<u64>),
{
    let mut file =
        File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    let mut buffer = vec![0_u8; DOWNLOAD_BUFFER_BYTES];
    let mut written = 0_u64;
    loop {
        let read = reader
            .read(&mut buffer)
            .context("failed to read download response")?;
        if read == 0 {
            break;
        }
        file.write_all(&buffer[..read])
            .with_context(|| format!("failed to write {}", path.display()))?;
        written += read as u64;
        on_progress(written, total);
    }
    file.flush()
        .with_context(|| format!("failed to flush {}", path.display()))?;
    Ok(written)
}

fn part_path_for(destination: &Path) -> PathBuf {
    destination.with_file_name(format!(
        "{}.part",
        destination
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("archive")
    ))
}
