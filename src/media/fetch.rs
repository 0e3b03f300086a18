//! Remote media downloads with bounded retry.

use std::time::Duration;

use reqwest::{Client, StatusCode};

use super::MediaError;

pub const USER_AGENT: &str = concat!("cmsport/", env!("CARGO_PKG_VERSION"));

/// Downloaded bytes and the URL they came from.
#[derive(Debug, Clone)]
pub struct Fetched {
    pub url: String,
    pub bytes: Vec<u8>,
}

/// HTTP downloader for media storage keys.
#[derive(Clone)]
pub struct MediaFetcher {
    client: Client,
    base_url: Option<String>,
    attempts: u32,
    retry_delay: Duration,
}

impl MediaFetcher {
    pub fn new(
        base_url: Option<&str>,
        timeout: Duration,
        attempts: u32,
        retry_delay: Duration,
    ) -> Result<Self, MediaError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .gzip(true)
            .brotli(true)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.map(|b| b.trim_end_matches('/').to_string()),
            attempts: attempts.max(1),
            retry_delay,
        })
    }

    /// Absolute URL for a storage key.
    pub fn resolve_url(&self, key: &str) -> Result<String, MediaError> {
        let key = key.trim();
        if key.starts_with("http://") || key.starts_with("https://") {
            return Ok(key.to_string());
        }
        let base = self
            .base_url
            .as_deref()
            .ok_or_else(|| MediaError::Unresolvable(key.to_string()))?;
        let joined = format!("{}/{}", base, key.trim_start_matches('/'));
        url::Url::parse(&joined)
            .map(|u| u.to_string())
            .map_err(|_| MediaError::Unresolvable(key.to_string()))
    }

    /// Download a key, retrying transient failures with doubling delay.
    pub async fn fetch(&self, key: &str) -> Result<Fetched, MediaError> {
        let url = self.resolve_url(key)?;
        let mut delay = self.retry_delay;
        let mut attempt = 1;

        loop {
            match self.fetch_once(&url).await {
                Ok(fetched) => return Ok(fetched),
                Err(e) if e.is_transient() && attempt < self.attempts => {
                    tracing::debug!(
                        "Fetch {} failed (attempt {}/{}): {}, retrying in {:?}",
                        url,
                        attempt,
                        self.attempts,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn fetch_once(&self, url: &str) -> Result<Fetched, MediaError> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(MediaError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        let bytes = response.bytes().await?.to_vec();
        if bytes.is_empty() {
            return Err(MediaError::Rejected(format!("{} returned an empty body", url)));
        }
        Ok(Fetched {
            url: url.to_string(),
            bytes,
        })
    }
}

/// Statuses worth retrying.
pub(crate) fn is_transient_status(status: u16) -> bool {
    StatusCode::from_u16(status)
        .map(|s| {
            s.is_server_error()
                || s == StatusCode::TOO_MANY_REQUESTS
                || s == StatusCode::REQUEST_TIMEOUT
        })
        .unwrap_or(false)
}
