use std::path::Path;

use async_trait::async_trait;
use serde::Serialize;

use crate::errors::HostError;

const HOST_RPC_BASE: &str = "http://127.0.0.1:8000";

/// The host upload channel: ships a local file under a host-relative path.
/// Dropped files land under `files/`, package artifacts under
/// `package_files/`.
#[async_trait]
pub trait Uploader: Send + Sync {
    async fn upload(&self, local_path: &Path, remote_relative_path: &str) -> Result<(), HostError>;
}

#[derive(Serialize)]
struct CompleteRequest<'a> {
    success: bool,
    error: &'a str,
    results_path: &'a str,
}

/// Thin client for the host's RPC endpoint. One instance is shared between
/// the supervisor (for `complete`) and the file registry (for uploads).
pub struct HostClient {
    http: reqwest::Client,
    base: String,
}

impl HostClient {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
            base: HOST_RPC_BASE.to_string(),
        }
    }

    /// Called exactly once per analyzer run, on every exit path.
    pub async fn report_complete(
        &self,
        success: bool,
        error: &str,
        results_path: &Path,
    ) -> Result<(), HostError> {
        let body = CompleteRequest {
            success,
            error,
            results_path: &results_path.to_string_lossy(),
        };

        self.http
            .post(format!("{}/complete", self.base))
            .json(&body)
            .send()
            .await?
            .error_for_status()?;

        Ok(())
    }
}

impl Default for HostClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Uploader for HostClient {
    async fn upload(&self, local_path: &Path, remote_relative_path: &str) -> Result<(), HostError> {
        let bytes = tokio::fs::read(local_path).await.map_err(|source| HostError::Io {
            path: local_path.to_path_buf(),
            source,
        })?;

        self.http
            .post(format!("{}/upload", self.base))
            .query(&[("path", remote_relative_path)])
            .body(bytes)
            .send()
            .await?
            .error_for_status()?;

        Ok(())
    }
}

/// Test double that records every call instead of making a network request.
#[derive(Default)]
pub struct NullUploader {
    pub uploaded: std::sync::Mutex<Vec<(std::path::PathBuf, String)>>,
}

#[async_trait]
impl Uploader for NullUploader {
    async fn upload(&self, local_path: &Path, remote_relative_path: &str) -> Result<(), HostError> {
        self.uploaded
            .lock()
            .unwrap()
            .push((local_path.to_path_buf(), remote_relative_path.to_string()));
        Ok(())
    }
}
