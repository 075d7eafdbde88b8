use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::core::photo::ThumbnailEntry;

/// Scoring algorithm the oracle applies to a payload pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum CompareMethod {
    Pixel,
    ColorHistogram,
}

impl CompareMethod {
    pub fn wire_name(&self) -> &'static str {
        match self {
            Self::Pixel => "pixel",
            Self::ColorHistogram => "color_histogram",
        }
    }
}

impl fmt::Display for CompareMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

#[derive(Debug, Error)]
pub enum OracleError {
    #[error("similarity service unavailable: {0}")]
    Unavailable(String),

    #[error("malformed similarity response: {0}")]
    Protocol(String),

    #[error("invalid oracle configuration: {0}")]
    Config(String),
}

/// Pairwise similarity oracle, opaque to the clustering engine.
///
/// Scores are percentages in [0, 100]. The engine treats any error as
/// "not similar" and counts it; implementations never need to retry.
#[async_trait]
pub trait SimilarityOracle: Send + Sync {
    async fn compare(
        &self,
        a: &ThumbnailEntry,
        b: &ThumbnailEntry,
        method: CompareMethod,
    ) -> Result<f64, OracleError>;
}

/// Connection settings for the remote scoring endpoint.
#[derive(Debug, Clone)]
pub struct OracleConfig {
    pub endpoint: String,
    pub timeout: Duration,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:5001/compare".to_string(),
            timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Serialize)]
struct CompareRequest<'a> {
    image1: &'a str,
    image2: &'a str,
    method: &'static str,
}

#[derive(Debug, Deserialize)]
struct CompareResponse {
    similarity: f64,
}

/// Client for the remote scoring endpoint: POSTs two base64 payloads and a
/// method selector, gets back `{"similarity": <number>}`.
#[derive(Debug, Clone)]
pub struct HttpOracle {
    client: Client,
    endpoint: Url,
}

impl HttpOracle {
    pub fn new(config: OracleConfig) -> Result<Self, OracleError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|err| OracleError::Config(err.to_string()))?;

        let endpoint = Url::parse(&config.endpoint)
            .map_err(|err| OracleError::Config(format!("invalid endpoint URL: {err}")))?;

        Ok(Self { client, endpoint })
    }
}

#[async_trait]
impl SimilarityOracle for HttpOracle {
    async fn compare(
        &self,
        a: &ThumbnailEntry,
        b: &ThumbnailEntry,
        method: CompareMethod,
    ) -> Result<f64, OracleError> {
        let image1 = BASE64.encode(&a.payload);
        let image2 = BASE64.encode(&b.payload);
        let request = CompareRequest {
            image1: &image1,
            image2: &image2,
            method: method.wire_name(),
        };

        // reqwest surfaces timeouts as transport errors, which is exactly
        // the "unavailable" bucket.
        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&request)
            .send()
            .await
            .map_err(|err| OracleError::Unavailable(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(OracleError::Protocol(format!(
                "unexpected status {status} from {}",
                self.endpoint
            )));
        }

        let body: CompareResponse = response
            .json()
            .await
            .map_err(|err| OracleError::Protocol(err.to_string()))?;

        if !body.similarity.is_finite() {
            return Err(OracleError::Protocol(format!(
                "non-finite similarity {}",
                body.similarity
            )));
        }

        // The scorer can overshoot the nominal range slightly; clamp rather
        // than reject.
        Ok(body.similarity.clamp(0.0, 100.0))
    }
}
