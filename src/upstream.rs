use async_trait::async_trait;
use http::StatusCode;
use http::HeaderValue;
use http::header::{ACCEPT, AUTHORIZATION};
use reqwest::Url;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::UpstreamError;

/// Where and how the subgraph reaches the REST API.
#[derive(Clone, Debug)]
pub struct UpstreamSettings {
    pub base_url: Url,
    pub timeout: Duration,
    /// Extra attempts after a transport failure. Status responses are never retried.
    pub retries: u32,
    pub backoff: Duration,
}

impl UpstreamSettings {
    pub fn new(base_url: Url) -> Self {
        UpstreamSettings {
            base_url,
            timeout: Duration::from_secs(10),
            retries: 2,
            backoff: Duration::from_millis(100),
        }
    }
}

/// A single GET against the REST API, relative to the configured base URL.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UpstreamRequest {
    pub segments: Vec<String>,
    pub query: Vec<(String, String)>,
    /// Forwarded byte for byte, including non-ASCII octets.
    pub authorization: Option<HeaderValue>,
}

impl UpstreamRequest {
    pub fn path<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        UpstreamRequest {
            segments: segments.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn query_pair(mut self, key: &str, value: impl ToString) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }

    /// Flattens a serializable filter object into query-string pairs.
    /// Unset (`null`) members are left out.
    pub fn query_object<T: Serialize>(mut self, object: &T) -> Result<Self, UpstreamError> {
        let value = serde_json::to_value(object)
            .map_err(|e| UpstreamError::InvalidUrl(format!("unencodable query object: {e}")))?;

        let Value::Object(members) = value else {
            return Err(UpstreamError::InvalidUrl(
                "query object must serialize to a map".to_string(),
            ));
        };

        for (key, value) in members {
            match value {
                Value::Null => {}
                Value::Array(items) => {
                    for item in items {
                        self.query.push((key.clone(), scalar_to_string(item)));
                    }
                }
                other => self.query.push((key, scalar_to_string(other))),
            }
        }

        Ok(self)
    }

    pub fn authorization(mut self, authorization: Option<&HeaderValue>) -> Self {
        self.authorization = authorization.cloned();
        self
    }

    /// Path relative to the base URL, for logs and error messages.
    pub fn display_path(&self) -> String {
        format!("/{}", self.segments.join("/"))
    }

    pub fn url(&self, base: &Url) -> Result<Url, UpstreamError> {
        let mut url = base.clone();
        url.path_segments_mut()
            .map_err(|_| UpstreamError::InvalidUrl(base.to_string()))?
            .pop_if_empty()
            .extend(&self.segments);

        if !self.query.is_empty() {
            url.query_pairs_mut().extend_pairs(&self.query);
        }

        Ok(url)
    }
}

fn scalar_to_string(value: Value) -> String {
    match value {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

/// Outcome of a completed upstream call.
#[derive(Clone, Debug, PartialEq)]
pub enum Fetched {
    /// 2xx with a JSON body. An empty body reads as `null`.
    Body(Value),
    /// Any non-2xx answer.
    Status(StatusCode),
}

#[async_trait]
pub trait Upstream: Send + Sync {
    async fn get(&self, request: &UpstreamRequest) -> Result<Fetched, UpstreamError>;
}

pub struct HttpUpstream {
    client: reqwest::Client,
    settings: UpstreamSettings,
}

impl HttpUpstream {
    pub fn new(settings: UpstreamSettings) -> Result<Self, UpstreamError> {
        let client = reqwest::Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|source| UpstreamError::Unreachable {
                url: settings.base_url.to_string(),
                source,
            })?;

        Ok(HttpUpstream { client, settings })
    }

    pub fn settings(&self) -> &UpstreamSettings {
        &self.settings
    }

    async fn read(&self, url: &Url, response: reqwest::Response) -> Result<Fetched, UpstreamError> {
        let status = response.status();
        if !status.is_success() {
            debug!(%url, %status, "upstream returned non-success status");
            return Ok(Fetched::Status(status));
        }

        let body = response
            .bytes()
            .await
            .map_err(|source| UpstreamError::Unreachable {
                url: url.to_string(),
                source,
            })?;

        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Fetched::Body(Value::Null));
        }

        serde_json::from_slice(&body)
            .map(Fetched::Body)
            .map_err(|source| UpstreamError::Decode {
                origin: url.to_string(),
                source,
            })
    }
}

#[async_trait]
impl Upstream for HttpUpstream {
    async fn get(&self, request: &UpstreamRequest) -> Result<Fetched, UpstreamError> {
        let url = request.url(&self.settings.base_url)?;
        let mut attempt = 0;

        loop {
            let mut builder = self
                .client
                .get(url.clone())
                .header(ACCEPT, "application/json");
            if let Some(authorization) = &request.authorization {
                builder = builder.header(AUTHORIZATION, authorization.clone());
            }

            match builder.send().await {
                Ok(response) => return self.read(&url, response).await,
                Err(source)
                    if attempt < self.settings.retries
                        && (source.is_connect() || source.is_timeout()) =>
                {
                    let delay = self.settings.backoff * 2u32.saturating_pow(attempt);
                    attempt += 1;
                    warn!(%url, attempt, ?delay, error = %source, "retrying upstream call");
                    tokio::time::sleep(delay).await;
                }
                Err(source) => {
                    return Err(UpstreamError::Unreachable {
                        url: url.to_string(),
                        source,
                    });
                }
            }
        }
    }
}
