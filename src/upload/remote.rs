use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

use crate::error::{PipelineError, PipelineResult};

/// Object store the upload queue drains into. Writing the same key twice must be safe.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn put(
        &self,
        destination_key: &str,
        bytes: Vec<u8>,
        metadata: &HashMap<String, String>,
    ) -> PipelineResult<()>;
}

/// `PUT <endpoint>/<key>` with metadata carried as `x-meta-<key>` headers.
pub struct HttpRemoteStore {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpRemoteStore {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> PipelineResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| PipelineError::Other(anyhow::anyhow!("http client: {err}")))?;
        Ok(Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
        })
    }

    fn headers(metadata: &HashMap<String, String>) -> PipelineResult<HeaderMap> {
        let mut headers = HeaderMap::with_capacity(metadata.len());
        for (key, value) in metadata {
            let name = HeaderName::from_bytes(format!("x-meta-{}", key.to_ascii_lowercase()).as_bytes())
                .map_err(|_| PipelineError::malformed(format!("metadata key {key:?}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|_| PipelineError::malformed(format!("metadata value for {key:?}")))?;
            headers.insert(name, value);
        }
        Ok(headers)
    }
}

#[async_trait]
impl RemoteStore for HttpRemoteStore {
    async fn put(
        &self,
        destination_key: &str,
        bytes: Vec<u8>,
        metadata: &HashMap<String, String>,
    ) -> PipelineResult<()> {
        let url = format!("{}/{}", self.endpoint, destination_key.trim_start_matches('/'));
        let response = self
            .client
            .put(url)
            .headers(Self::headers(metadata)?)
            .body(bytes)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(PipelineError::transient(format!("remote store returned {status}")))
        }
    }
}

/// Writes objects under a local directory; metadata lands in a `.meta.json` sidecar.
/// Handy for a mounted share or for running without a server.
pub struct DirectoryStore {
    root: PathBuf,
}

impl DirectoryStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl RemoteStore for DirectoryStore {
    async fn put(
        &self,
        destination_key: &str,
        bytes: Vec<u8>,
        metadata: &HashMap<String, String>,
    ) -> PipelineResult<()> {
        if destination_key.split('/').any(|part| part == "..") {
            return Err(PipelineError::malformed(format!("destination key {destination_key:?}")));
        }
        let target = self.root.join(destination_key);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|err| PipelineError::transient(format!("create {}: {err}", parent.display())))?;
        }
        tokio::fs::write(&target, bytes)
            .await
            .map_err(|err| PipelineError::transient(format!("write {}: {err}", target.display())))?;

        let sidecar = serde_json::to_vec_pretty(metadata)
            .map_err(|err| PipelineError::Other(err.into()))?;
        let mut meta_path = target.into_os_string();
        meta_path.push(".meta.json");
        tokio::fs::write(PathBuf::from(meta_path), sidecar)
            .await
            .map_err(|err| PipelineError::transient(format!("write metadata: {err}")))?;
        Ok(())
    }
}
