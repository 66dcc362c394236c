use std::time::Duration;

use async_trait::async_trait;
use log::debug;

#[async_trait]
pub trait ReachabilityCheck: Send + Sync {
    async fn is_reachable(&self) -> bool;
}

/// HEAD request. Any HTTP answer counts as reachable; only transport errors do not.
pub struct HttpReachability {
    client: reqwest::Client,
    url: String,
}

impl HttpReachability {
    pub fn new(url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_default();
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl ReachabilityCheck for HttpReachability {
    async fn is_reachable(&self) -> bool {
        match self.client.head(&self.url).send().await {
            Ok(_) => true,
            Err(err) => {
                debug!("{} unreachable: {err}", self.url);
                false
            }
        }
    }
}
