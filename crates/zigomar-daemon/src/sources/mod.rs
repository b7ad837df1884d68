//! Metadata sources polled by the aggregator.
//!
//! Each source is a free async function over the shared `reqwest::Client`
//! that settles into a tagged [`SourceReport`] or a [`SourceError`].  None of
//! them write shared state; the aggregator merges their reports.

pub mod icecast;
pub mod icy_probe;
pub mod instant_audio;
pub mod zeno;

use std::time::Duration;

use reqwest::header::{HeaderValue, ACCEPT};
use reqwest::Client;
use serde::de::DeserializeOwned;
use zigomar_proto::config::Config;
use zigomar_proto::error::SourceError;

/// Fully resolved endpoint URLs for one daemon run.
#[derive(Debug, Clone)]
pub struct SourceEndpoints {
    pub primary: String,
    pub text: String,
    pub status: Vec<String>,
    pub probe: String,
    pub probe_timeout: Duration,
}

impl SourceEndpoints {
    pub fn from_config(config: &Config) -> Self {
        let s = &config.sources;
        Self {
            primary: config.resolve_url(&s.primary_url),
            text: config.resolve_url(&s.text_url),
            status: s.status_urls.iter().map(|u| config.resolve_url(u)).collect(),
            probe: config.resolve_url(&s.probe_url),
            probe_timeout: Duration::from_millis(s.probe_timeout_ms),
        }
    }
}

/// One client for every source.  Only the connect phase is bounded here;
/// apart from the tag probe, requests rely on the transport's own limits.
pub fn build_client() -> anyhow::Result<Client> {
    let client = Client::builder()
        .user_agent(concat!("zigomar/", env!("CARGO_PKG_VERSION")))
        .connect_timeout(Duration::from_secs(10))
        .redirect(reqwest::redirect::Policy::limited(10))
        .build()?;
    Ok(client)
}

pub(crate) fn request_error(e: reqwest::Error) -> SourceError {
    if e.is_timeout() {
        SourceError::Timeout(0)
    } else if e.is_decode() {
        SourceError::Decode(e.to_string())
    } else {
        SourceError::Network(e.to_string())
    }
}

/// `GET url` with `Accept: application/json`; non-2xx is an error.
pub(crate) async fn get_json<T: DeserializeOwned>(client: &Client, url: &str) -> Result<T, SourceError> {
    let resp = client
        .get(url)
        .header(ACCEPT, HeaderValue::from_static("application/json"))
        .send()
        .await
        .map_err(request_error)?;

    let status = resp.status();
    if !status.is_success() {
        return Err(SourceError::Status(status.as_u16()));
    }

    let body = resp.bytes().await.map_err(request_error)?;
    serde_json::from_slice(&body).map_err(|e| SourceError::Decode(e.to_string()))
}
