//! Remote page feed abstraction.
//!
//! This module provides:
//! - `PageFetcher` trait for anything that can serve one page of contacts
//! - `RandomUserRemote`, the randomuser.me implementation over reqwest
//! - endpoint construction shared by implementations and the connectivity probe

pub mod randomuser;

use async_trait::async_trait;
use reqwest::Url;

use crate::contact::PageEnvelope;
use crate::error::SyncError;

pub use randomuser::RandomUserRemote;

/// One page request: `results` contacts from zero-based page `page`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub results: usize,
    pub page: u32,
}

/// Trait for remote feed implementations
///
/// Fetches are spawned onto the runtime, so implementations must be shareable
/// across tasks.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch_page(&self, request: PageRequest) -> Result<PageEnvelope, SyncError>;
}

/// `<base>?results=<count>&page=<page>[&seed=<seed>]`
pub fn endpoint(base: &str, request: PageRequest, seed: Option<&str>) -> Result<Url, SyncError> {
    let results = request.results.to_string();
    let page = request.page.to_string();
    let mut query: Vec<(&str, &str)> = vec![("results", results.as_str()), ("page", page.as_str())];
    if let Some(seed) = seed {
        query.push(("seed", seed));
    }

    let url = Url::parse_with_params(base, &query)
        .map_err(|e| SyncError::InvalidEndpoint(format!("{}: {}", base, e)))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(SyncError::InvalidEndpoint(format!(
            "{}: unsupported scheme `{}`",
            base,
            url.scheme()
        )));
    }
    Ok(url)
}

/// `host:port` of the feed, used to probe reachability.
pub fn probe_target(base: &str) -> Option<String> {
    let url = Url::parse(base).ok()?;
    let host = url.host_str()?;
    let port = url.port_or_known_default()?;
    Some(format!("{}:{}", host, port))
}
