//! randomuser.me client over reqwest.

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{debug, warn};

use crate::config::ApiConfig;
use crate::contact::PageEnvelope;
use crate::error::SyncError;
use crate::remote::{endpoint, PageFetcher, PageRequest};

pub struct RandomUserRemote {
    client: reqwest::Client,
    base_url: String,
    seed: Option<String>,
}

impl RandomUserRemote {
    pub fn new(config: &ApiConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("rcontacts/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: config.base_url.clone(),
            seed: config.seed.clone(),
        })
    }
}

#[async_trait]
impl PageFetcher for RandomUserRemote {
    async fn fetch_page(&self, request: PageRequest) -> Result<PageEnvelope, SyncError> {
        let url = endpoint(&self.base_url, request, self.seed.as_deref())?;
        debug!(%url, "requesting page");

        let response = self.client.get(url).send().await?;
        let status = response.status();
        debug!(%status, "page response");
        let body = response.error_for_status()?.bytes().await?;

        if body.iter().all(u8::is_ascii_whitespace) {
            return Err(SyncError::EmptyResponseBody);
        }

        decode_page(&body)
    }
}

pub fn decode_page(body: &[u8]) -> Result<PageEnvelope, SyncError> {
    serde_json::from_slice(body).map_err(|e| {
        let err = SyncError::decode(&e);
        warn!(error = %err, "failed to decode page");
        err
    })
}
