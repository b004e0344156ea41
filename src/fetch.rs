use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::USER_AGENT;
use tokio_util::sync::CancellationToken;
use url::Url;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("fetch cancelled")]
    Cancelled,
    #[error("unexpected status {status}")]
    Status { status: u16 },
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("{0}")]
    Transport(String),
    #[error("refusing cross-origin path: {0}")]
    CrossOrigin(String),
}

/// Retrieves static text resources by site-relative path.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Must return [`FetchError::Cancelled`] promptly once `cancel` fires.
    async fn fetch_text(&self, path: &str, cancel: &CancellationToken)
    -> Result<String, FetchError>;
}

#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    base_url: Url,
    timeout: Duration,
}

impl HttpFetcher {
    pub fn new(base_url: Url, timeout: Duration) -> anyhow::Result<Self> {
        use anyhow::Context as _;

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .context("build content http client")?;

        Ok(Self {
            client,
            base_url,
            timeout,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Resolve `path` against the base URL, refusing other origins.
    pub fn resolve(&self, path: &str) -> Result<Url, FetchError> {
        let url = self
            .base_url
            .join(path)
            .map_err(|err| FetchError::Transport(format!("invalid path {path:?}: {err}")))?;
        if url.origin() != self.base_url.origin() {
            return Err(FetchError::CrossOrigin(url.to_string()));
        }
        Ok(url)
    }

    async fn get(&self, url: Url) -> Result<String, FetchError> {
        let response = self
            .client
            .get(url.clone())
            .header(USER_AGENT, concat!("coursepress/", env!("CARGO_PKG_VERSION")))
            .send()
            .await
            .map_err(|err| self.transport_error(&url, err))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
            });
        }

        response
            .text()
            .await
            .map_err(|err| self.transport_error(&url, err))
    }

    fn transport_error(&self, url: &Url, err: reqwest::Error) -> FetchError {
        if err.is_timeout() {
            FetchError::Timeout(self.timeout)
        } else {
            FetchError::Transport(format!("GET {url}: {err}"))
        }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch_text(
        &self,
        path: &str,
        cancel: &CancellationToken,
    ) -> Result<String, FetchError> {
        let url = self.resolve(path)?;
        tracing::debug!(%url, "fetch start");

        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                tracing::debug!(%url, "fetch cancelled");
                Err(FetchError::Cancelled)
            }
            result = self.get(url.clone()) => {
                tracing::debug!(%url, ok = result.is_ok(), "fetch finished");
                result
            }
        }
    }
}
