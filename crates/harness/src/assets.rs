//! Disk image resolution
//!
//! A `source` test parameter is either a local path or an HTTP(S) URL.
//! Downloads are cached by URL so repeated runs reuse the same image.

use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::info;

use sysapi_common::{Error, Result};

/// Cache of downloaded disk images
#[derive(Debug, Clone)]
pub struct AssetCache {
    cache_dir: PathBuf,
}

impl AssetCache {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
        }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Resolve `source` to a local file, downloading it if needed
    pub async fn fetch(&self, source: &str) -> Result<PathBuf> {
        if source.starts_with("http://") || source.starts_with("https://") {
            return self.download(source).await;
        }

        let path = PathBuf::from(source.strip_prefix("file://").unwrap_or(source));
        if !path.is_file() {
            return Err(Error::Asset(format!("image not found: {}", path.display())));
        }
        Ok(path)
    }

    /// Where the download of `url` is stored
    pub fn cache_path(&self, url: &str) -> PathBuf {
        let digest = hex::encode(Sha256::digest(url.as_bytes()));
        let name = url
            .split(['?', '#'])
            .next()
            .and_then(|u| u.rsplit('/').next())
            .filter(|name| !name.is_empty())
            .unwrap_or("image");
        self.cache_dir.join(format!("{}-{}", &digest[..16], name))
    }

    async fn download(&self, url: &str) -> Result<PathBuf> {
        let dest = self.cache_path(url);
        if dest.is_file() {
            info!("Using cached image {}", dest.display());
            return Ok(dest);
        }

        tokio::fs::create_dir_all(&self.cache_dir).await?;
        info!("Downloading {} to {}", url, dest.display());

        let download_err =
            |e: reqwest::Error| Error::Asset(format!("download of {} failed: {}", url, e));
        let mut response = reqwest::get(url)
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(download_err)?;

        let mut partial = dest.clone().into_os_string();
        partial.push(".part");
        let partial = PathBuf::from(partial);

        let mut file = tokio::fs::File::create(&partial).await?;
        while let Some(chunk) = response.chunk().await.map_err(download_err)? {
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        drop(file);

        tokio::fs::rename(&partial, &dest).await?;
        Ok(dest)
    }
}
