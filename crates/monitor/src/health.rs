use async_trait::async_trait;
use ixp_gate_domain::model::IxpId;
use reqwest::{Client, Url};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HealthError {
    #[error("health query timed out")]
    Timeout,
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("health endpoint returned status {0}")]
    Status(u16),
    #[error("malformed health response: {0}")]
    Malformed(String),
    #[error("invalid health base url `{0}`")]
    InvalidBaseUrl(String),
}

impl HealthError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout | Self::Transport(_) => true,
            Self::Status(code) => *code >= 500 || *code == 429,
            Self::Malformed(_) | Self::InvalidBaseUrl(_) => false,
        }
    }
}

/// Remote source of per-exchange-point health tokens.
#[async_trait]
pub trait HealthSource: Send + Sync {
    async fn fetch_status(&self, ixp_id: &IxpId) -> Result<String, HealthError>;
}

/// Queries `GET {base}/{ixp_id}/status` and reads the `status` field of the
/// JSON body.
pub struct HttpHealthSource {
    client: Client,
    base_url: Url,
}

#[derive(Debug, Deserialize)]
struct HealthResponse {
    #[serde(default)]
    status: Value,
}

impl HttpHealthSource {
    pub fn new(client: Client, base_url: &str) -> Result<Self, HealthError> {
        let base_url =
            Url::parse(base_url).map_err(|_| HealthError::InvalidBaseUrl(base_url.to_string()))?;
        if base_url.cannot_be_a_base() {
            return Err(HealthError::InvalidBaseUrl(base_url.to_string()));
        }
        Ok(Self { client, base_url })
    }

    fn status_url(&self, ixp_id: &IxpId) -> Result<Url, HealthError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| HealthError::InvalidBaseUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .push(ixp_id.as_str())
            .push("status");
        Ok(url)
    }
}

#[async_trait]
impl HealthSource for HttpHealthSource {
    async fn fetch_status(&self, ixp_id: &IxpId) -> Result<String, HealthError> {
        let response = self
            .client
            .get(self.status_url(ixp_id)?)
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    HealthError::Timeout
                } else {
                    HealthError::Transport(err.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(HealthError::Status(status.as_u16()));
        }

        let body: HealthResponse = response
            .json()
            .await
            .map_err(|err| HealthError::Malformed(err.to_string()))?;
        status_token(body.status)
    }
}

fn status_token(value: Value) -> Result<String, HealthError> {
    let token = match value {
        Value::String(text) => text.trim().to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    };
    if token.is_empty() {
        return Err(HealthError::Malformed("missing `status` field".into()));
    }
    Ok(token)
}
