use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::{Client, Response, StatusCode};
use tracing::{debug, warn};
use url::Url;

use crate::errors::{UpstreamError, UpstreamResult};
use crate::payload::{parse_detection_page, parse_species_family, DetectionPage};

#[derive(Clone, Debug)]
pub struct UpstreamConfig {
    /// Base of the detection API, e.g. `http://birdnet.local:8080/api/v2/`.
    pub base_url: String,
    pub timeout: Duration,
}

/// One page of the `detections` range query.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PageQuery {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub limit: usize,
    pub offset: usize,
}

impl PageQuery {
    fn to_pairs(&self) -> [(&'static str, String); 4] {
        [
            ("start_date", self.start_date.format("%Y-%m-%d").to_string()),
            ("end_date", self.end_date.format("%Y-%m-%d").to_string()),
            ("numResults", self.limit.to_string()),
            ("offset", self.offset.to_string()),
        ]
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SpeciesLookup {
    Found { family_common: Option<String> },
    NotFound,
}

/// Upstream endpoints the proxy forwards verbatim.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ProxyEndpoint {
    Detections,
    Recent,
}

impl ProxyEndpoint {
    pub fn path(self) -> &'static str {
        match self {
            ProxyEndpoint::Detections => "detections",
            ProxyEndpoint::Recent => "detections/recent",
        }
    }
}

/// An upstream response passed through without interpretation.
#[derive(Clone, Debug)]
pub struct ForwardedResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl ForwardedResponse {
    pub fn is_server_error(&self) -> bool {
        self.status >= 500
    }
}

#[async_trait]
pub trait DetectionApi: Send + Sync {
    async fn fetch_detection_page(&self, query: &PageQuery) -> UpstreamResult<DetectionPage>;
    async fn fetch_recent(&self, limit: usize) -> UpstreamResult<DetectionPage>;
    async fn lookup_species(&self, scientific_name: &str) -> UpstreamResult<SpeciesLookup>;
    /// Forwards a GET; any HTTP status is `Ok`, only transport failures are errors.
    async fn forward(
        &self,
        endpoint: ProxyEndpoint,
        query: &[(String, String)],
    ) -> UpstreamResult<ForwardedResponse>;
}

pub struct HttpUpstream {
    client: Client,
    base: Url,
    timeout: Duration,
}

impl HttpUpstream {
    pub fn new(config: UpstreamConfig) -> UpstreamResult<Self> {
        let base = normalize_base(&config.base_url)?;
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|err| UpstreamError::Transport(format!("failed to build HTTP client: {err}")))?;
        Ok(Self {
            client,
            base,
            timeout: config.timeout,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    async fn get<Q>(&self, path: &str, query: &Q) -> UpstreamResult<Response>
    where
        Q: serde::Serialize + ?Sized,
    {
        let url = self
            .base
            .join(path)
            .map_err(|err| UpstreamError::InvalidUrl(format!("{path}: {err}")))?;
        debug!(target: "upstream", %url, "GET");
        self.client
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(|err| self.classify(err))
    }

    fn classify(&self, err: reqwest::Error) -> UpstreamError {
        if err.is_timeout() {
            UpstreamError::Timeout(self.timeout)
        } else {
            UpstreamError::Transport(err.to_string())
        }
    }

    async fn body(&self, response: Response) -> UpstreamResult<Vec<u8>> {
        response
            .bytes()
            .await
            .map(|bytes| bytes.to_vec())
            .map_err(|err| self.classify(err))
    }

    async fn expect_success(&self, response: Response) -> UpstreamResult<Vec<u8>> {
        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(UpstreamError::RateLimited);
        }
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<response unavailable>".to_string());
            return Err(UpstreamError::Status {
                status: status.as_u16(),
                body,
            });
        }
        self.body(response).await
    }
}

#[async_trait]
impl DetectionApi for HttpUpstream {
    async fn fetch_detection_page(&self, query: &PageQuery) -> UpstreamResult<DetectionPage> {
        let response = self.get("detections", &query.to_pairs()).await?;
        let body = self.expect_success(response).await?;
        Ok(parse_detection_page(&body)?)
    }

    async fn fetch_recent(&self, limit: usize) -> UpstreamResult<DetectionPage> {
        let response = self
            .get("detections/recent", &[("limit", limit.to_string())])
            .await?;
        let body = self.expect_success(response).await?;
        Ok(parse_detection_page(&body)?)
    }

    async fn lookup_species(&self, scientific_name: &str) -> UpstreamResult<SpeciesLookup> {
        let response = self
            .get("species", &[("scientific_name", scientific_name)])
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(SpeciesLookup::NotFound);
        }
        let body = self.expect_success(response).await?;
        match parse_species_family(&body) {
            Ok(family_common) => Ok(SpeciesLookup::Found { family_common }),
            Err(err) => {
                warn!(target: "upstream", %err, scientific_name, "species payload unreadable");
                Err(err.into())
            }
        }
    }

    async fn forward(
        &self,
        endpoint: ProxyEndpoint,
        query: &[(String, String)],
    ) -> UpstreamResult<ForwardedResponse> {
        let response = self.get(endpoint.path(), query).await?;
        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let body = self.body(response).await?;
        Ok(ForwardedResponse {
            status,
            content_type,
            body,
        })
    }
}

/// Ensures the base path ends with `/` so relative joins append instead of replace.
fn normalize_base(raw: &str) -> UpstreamResult<Url> {
    let mut base =
        Url::parse(raw.trim()).map_err(|err| UpstreamError::InvalidUrl(format!("{raw}: {err}")))?;
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    Ok(base)
}
