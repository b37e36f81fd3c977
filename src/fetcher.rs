//! Transport used by the sync loops: specs payloads, the ID-list lookup, and ID-list byte ranges.
use std::{
    future::Future,
    pin::Pin,
    sync::atomic::{AtomicBool, Ordering},
};

use reqwest::{header, StatusCode, Url};

use crate::{Error, Result};

/// Boxed future returned by [`SpecsFetcher`] methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Default server URL.
pub const DEFAULT_BASE_URL: &str = "https://api.featuregate.dev/v1";

const SPECS_ENDPOINT: &str = "/download_config_specs";
const ID_LISTS_ENDPOINT: &str = "/get_id_lists";
const SERVER_SECRET_HEADER: &str = "featuregate-api-key";

/// Tail of an ID-list file starting at the requested offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdListChunk {
    /// Response body.
    pub data: String,
    /// `Content-Length` reported by the server, if any.
    pub content_length: Option<u64>,
}

impl IdListChunk {
    /// Number of bytes this chunk advances the read position by.
    pub fn len(&self) -> u64 {
        self.content_length.unwrap_or(self.data.len() as u64)
    }

    /// Whether the chunk carries no bytes.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Source of specs and ID lists.
///
/// Retries, backoff and rate limiting are the implementation's concern. Returning
/// [`Error::Unauthorized`] stops background synchronization.
pub trait SpecsFetcher: Send + Sync {
    /// Fetch the raw specs payload, as a delta relative to `since_time` (`0` for everything).
    fn fetch_specs(&self, since_time: i64) -> BoxFuture<'_, Result<Vec<u8>>>;

    /// Fetch the raw ID-list lookup: `{ name: { url, fileID, creationTime, size } }`.
    fn fetch_id_list_lookup(&self) -> BoxFuture<'_, Result<Vec<u8>>>;

    /// Fetch `url` starting at byte `offset`.
    fn fetch_id_list_chunk<'a>(
        &'a self,
        url: &'a str,
        offset: u64,
    ) -> BoxFuture<'a, Result<IdListChunk>>;
}

/// [`SpecsFetcher`] talking to the server over HTTP.
pub struct HttpFetcher {
    // Client holds a connection pool internally, so we're reusing the client between requests.
    client: reqwest::Client,
    base_url: String,
    server_secret: String,
    /// If we receive a 401 Unauthorized error during a request, the server secret is not valid.
    /// Cache this so no additional requests are issued.
    unauthorized: AtomicBool,
}

impl HttpFetcher {
    /// Create a fetcher for `base_url` authenticating with `server_secret`.
    pub fn new(base_url: impl Into<String>, server_secret: impl Into<String>) -> HttpFetcher {
        HttpFetcher {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            server_secret: server_secret.into(),
            unauthorized: AtomicBool::new(false),
        }
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        Url::parse(&format!("{}{}", self.base_url, path)).map_err(Error::InvalidBaseUrl)
    }

    async fn post(&self, path: &str, body: serde_json::Value) -> Result<Vec<u8>> {
        if self.unauthorized.load(Ordering::Relaxed) {
            return Err(Error::Unauthorized);
        }

        let url = self.endpoint(path)?;
        let response = self
            .client
            .post(url)
            .header(SERVER_SECRET_HEADER, &self.server_secret)
            .header("featuregate-sdk-version", env!("CARGO_PKG_VERSION"))
            .json(&body)
            .send()
            .await?;

        let response = self.check_status(response)?;
        Ok(response.bytes().await?.to_vec())
    }

    fn check_status(&self, response: reqwest::Response) -> Result<reqwest::Response> {
        response.error_for_status().map_err(|err| {
            if err.status() == Some(StatusCode::UNAUTHORIZED) {
                log::warn!(target: "featuregate", "client is not authorized. Check your server secret");
                self.unauthorized.store(true, Ordering::Relaxed);
                Error::Unauthorized
            } else {
                log::warn!(target: "featuregate", "received non-200 response: {:?}", err);
                Error::from(err)
            }
        })
    }
}

impl SpecsFetcher for HttpFetcher {
    fn fetch_specs(&self, since_time: i64) -> BoxFuture<'_, Result<Vec<u8>>> {
        Box::pin(async move {
            log::debug!(target: "featuregate", since_time; "fetching specs");
            self.post(SPECS_ENDPOINT, serde_json::json!({ "sinceTime": since_time }))
                .await
        })
    }

    fn fetch_id_list_lookup(&self) -> BoxFuture<'_, Result<Vec<u8>>> {
        Box::pin(async move {
            log::debug!(target: "featuregate", "fetching ID list lookup");
            self.post(ID_LISTS_ENDPOINT, serde_json::json!({})).await
        })
    }

    fn fetch_id_list_chunk<'a>(
        &'a self,
        url: &'a str,
        offset: u64,
    ) -> BoxFuture<'a, Result<IdListChunk>> {
        Box::pin(async move {
            let response = self
                .client
                .get(url)
                .header(header::RANGE, format!("bytes={offset}-"))
                .send()
                .await?;
            let response = self.check_status(response)?;
            let content_length = response.content_length();
            let data = response.text().await?;
            Ok(IdListChunk {
                data,
                content_length,
            })
        })
    }
}
