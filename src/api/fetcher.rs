//! The HTTP `FileFetcher`: downloads the export from its pre-signed link and persists it to
//! the artifact path. The link came out of the export email, so no further authentication is
//! needed here.

use crate::api::FileFetcher;
use crate::{utils, Result, SyncError};
use anyhow::Context;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::info;
use url::Url;

pub(super) struct HttpFileFetcher {
    http: reqwest::Client,
}

impl HttpFileFetcher {
    pub(super) fn new() -> Result<Self> {
        let http = reqwest::Client::builder()
            .build()
            .context("Unable to build the download HTTP client")?;
        Ok(Self { http })
    }
}

#[async_trait]
impl FileFetcher for HttpFileFetcher {
    async fn fetch(&self, url: &Url, destination: &Path) -> Result<PathBuf> {
        info!("Downloading the export");
        let response = self
            .http
            .get(url.clone())
            .send()
            .await
            .map_err(transient)?
            .error_for_status()
            .map_err(transient)?;

        let bytes = response.bytes().await.map_err(transient)?;
        if bytes.is_empty() {
            // A zero-byte body usually means the link expired mid-transfer; worth retrying.
            return Err(SyncError::Transient(String::from(
                "the export download returned an empty body",
            ))
            .into());
        }

        utils::write(destination, &bytes).await?;
        info!(
            "Saved the export ({} bytes) to {}",
            bytes.len(),
            destination.display()
        );
        Ok(destination.to_path_buf())
    }
}

fn transient(e: reqwest::Error) -> anyhow::Error {
    SyncError::Transient(format!("export download failed: {e}")).into()
}
