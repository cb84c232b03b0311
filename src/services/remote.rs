use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use reqwest::header::CONTENT_LENGTH;
use reqwest::Client;

use crate::errors::{Result, RomfetchError};
use crate::models::RawEntry;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);
const PROBE_TIMEOUT: Duration = Duration::from_secs(20);

/// Shared client for listings, probes and transfers. Only the connect phase
/// is bounded globally; body streams run for as long as an archive takes.
static HTTP_CLIENT: Lazy<Client> = Lazy::new(|| {
    Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .user_agent(concat!("romfetch/", env!("CARGO_PKG_VERSION")))
        .build()
        .unwrap_or_else(|_| Client::new())
});

pub fn http_client() -> &'static Client {
    &HTTP_CLIENT
}

/// Source of remote directory listings. The host supplies the implementation
/// that scrapes its archive mirror; tests supply canned listings.
#[async_trait]
pub trait DirectoryLister: Send + Sync {
    async fn list(&self, url: &str) -> Result<Vec<RawEntry>>;
}

/// Source of authoritative remote file sizes, consulted during the scan to
/// classify each file as skip, resume or fresh download.
#[async_trait]
pub trait SizeProber: Send + Sync {
    async fn remote_size(&self, url: &str) -> Result<u64>;
}

/// Probes sizes with a HEAD request against the shared client.
#[derive(Clone, Copy, Debug, Default)]
pub struct HttpProber;

#[async_trait]
impl SizeProber for HttpProber {
    async fn remote_size(&self, url: &str) -> Result<u64> {
        let response = HTTP_CLIENT
            .head(url)
            .timeout(PROBE_TIMEOUT)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(RomfetchError::Http(format!(
                "HEAD {} returned {}",
                url, status
            )));
        }
        response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse().ok())
            .ok_or_else(|| {
                RomfetchError::Http(format!("HEAD {} returned no content length", url))
            })
    }
}
