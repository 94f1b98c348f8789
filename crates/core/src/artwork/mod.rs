use std::time::Duration;

use async_trait::async_trait;

use crate::{Result, SpotihueError};

/// Default request timeout for artwork downloads.
pub const FETCH_TIMEOUT: Duration = Duration::from_secs(3);

/// Downloads encoded album artwork.
#[async_trait]
pub trait ArtworkFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

/// [`ArtworkFetcher`] backed by a shared `reqwest` client.
#[derive(Debug, Clone)]
pub struct HttpArtworkFetcher {
    client: reqwest::Client,
}

impl HttpArtworkFetcher {
    pub fn new() -> Result<Self> {
        Self::with_timeout(FETCH_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| SpotihueError::ArtworkFetch(err.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ArtworkFetcher for HttpArtworkFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        if url.is_empty() {
            return Err(SpotihueError::ArtworkFetch("empty artwork url".into()));
        }

        let response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|err| SpotihueError::ArtworkFetch(format!("{url}: {err}")))?;

        let bytes = response
            .bytes()
            .await
            .map_err(|err| SpotihueError::ArtworkFetch(format!("{url}: {err}")))?;

        tracing::debug!(url, bytes = bytes.len(), "downloaded artwork");
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_url_is_rejected_without_a_request() {
        let fetcher = HttpArtworkFetcher::new().unwrap();
        let err = fetcher.fetch("").await.unwrap_err();
        assert!(matches!(err, SpotihueError::ArtworkFetch(_)));
    }

    #[tokio::test]
    async fn malformed_url_is_a_fetch_error() {
        let fetcher = HttpArtworkFetcher::new().unwrap();
        let err = fetcher.fetch("not a url").await.unwrap_err();
        assert!(matches!(err, SpotihueError::ArtworkFetch(_)));
    }
}
