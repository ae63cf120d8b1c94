//! CSV retrieval for SGF: direct request first, then an ordered list of CORS
//! proxies, one attempt per endpoint.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info, info_span, warn, Instrument};

pub const CRATE_NAME: &str = "sgf-fetch";

/// Proxy prefixes tried in order when the direct request fails.
pub const DEFAULT_PROXIES: [&str; 3] = [
    "https://corsproxy.io/?",
    "https://cors-anywhere.herokuapp.com/",
    "https://api.allorigins.win/raw?url=",
];

/// Failure of a single request against one endpoint.
#[derive(Debug, Error)]
pub enum AttemptError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("unreachable: {0}")]
    Unreachable(String),
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("all {attempts} attempts failed for {url}: {last}")]
    Exhausted {
        url: String,
        attempts: usize,
        #[source]
        last: AttemptError,
    },
}

/// Network seam: one GET returning the body text of a successful response.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get_text(&self, url: &str) -> Result<String, AttemptError>;
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            user_agent: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get_text(&self, url: &str) -> Result<String, AttemptError> {
        let resp = self.client.get(url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(AttemptError::HttpStatus {
                status: status.as_u16(),
                url: resp.url().to_string(),
            });
        }
        Ok(resp.text().await?)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Direct,
    Proxy(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attempt {
    pub endpoint: Endpoint,
    pub url: String,
}

/// Builds `prefix + percent-encoded target`, the form every default proxy accepts.
///
/// Everything outside `A-Z a-z 0-9 - . _ ~` is escaped, which includes
/// `! * ' ( )` that `encodeURIComponent` leaves alone. The published sheet
/// URLs contain none of those.
pub fn proxied_url(prefix: &str, target: &str) -> String {
    format!("{prefix}{}", urlencoding::encode(target))
}

#[derive(Clone)]
pub struct CsvFetcher {
    transport: Arc<dyn Transport>,
    proxies: Vec<String>,
}

impl std::fmt::Debug for CsvFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CsvFetcher")
            .field("proxies", &self.proxies)
            .finish_non_exhaustive()
    }
}

impl CsvFetcher {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            proxies: DEFAULT_PROXIES.iter().map(ToString::to_string).collect(),
        }
    }

    pub fn with_proxies(mut self, proxies: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.proxies = proxies.into_iter().map(Into::into).collect();
        self
    }

    pub fn proxies(&self) -> &[String] {
        &self.proxies
    }

    /// Ordered attempt list: the direct URL, then each proxy.
    pub fn plan(&self, url: &str) -> Vec<Attempt> {
        std::iter::once(Attempt {
            endpoint: Endpoint::Direct,
            url: url.to_string(),
        })
        .chain(self.proxies.iter().map(|prefix| Attempt {
            endpoint: Endpoint::Proxy(prefix.clone()),
            url: proxied_url(prefix, url),
        }))
        .collect()
    }

    pub async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        let span = info_span!("csv_fetch", url);
        self.fetch_planned(url).instrument(span).await
    }

    async fn fetch_planned(&self, url: &str) -> Result<String, FetchError> {
        let plan = self.plan(url);
        let attempts = plan.len();
        let mut last_error = None;

        for attempt in plan {
            debug!(endpoint = ?attempt.endpoint, target = %attempt.url, "attempting csv fetch");
            match self.transport.get_text(&attempt.url).await {
                Ok(text) => {
                    info!(endpoint = ?attempt.endpoint, bytes = text.len(), "csv fetched");
                    return Ok(text);
                }
                Err(err) => {
                    warn!(endpoint = ?attempt.endpoint, error = %err, "csv fetch attempt failed");
                    last_error = Some(err);
                }
            }
        }

        Err(FetchError::Exhausted {
            url: url.to_string(),
            attempts,
            last: last_error
                .unwrap_or_else(|| AttemptError::Unreachable("no endpoints attempted".to_string())),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FixtureResponse {
    Body(String),
    Status(u16),
}

/// In-memory transport keyed by exact URL. Unknown URLs are unreachable.
#[derive(Debug, Clone, Default)]
pub struct FixtureTransport {
    responses: HashMap<String, FixtureResponse>,
    requested: Arc<Mutex<Vec<String>>>,
}

impl FixtureTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_body(mut self, url: impl Into<String>, body: impl Into<String>) -> Self {
        self.responses
            .insert(url.into(), FixtureResponse::Body(body.into()));
        self
    }

    pub fn with_status(mut self, url: impl Into<String>, status: u16) -> Self {
        self.responses.insert(url.into(), FixtureResponse::Status(status));
        self
    }

    /// URLs requested so far, in request order.
    pub fn requested(&self) -> Vec<String> {
        self.requested
            .lock()
            .map(|log| log.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Transport for FixtureTransport {
    async fn get_text(&self, url: &str) -> Result<String, AttemptError> {
        if let Ok(mut log) = self.requested.lock() {
            log.push(url.to_string());
        }
        match self.responses.get(url) {
            Some(FixtureResponse::Body(body)) => Ok(body.clone()),
            Some(FixtureResponse::Status(status)) => Err(AttemptError::HttpStatus {
                status: *status,
                url: url.to_string(),
            }),
            None => Err(AttemptError::Unreachable(url.to_string())),
        }
    }
}
