use std::fmt;

use listsync_core::{Params, RecordError};
use serde::Deserialize;
use serde_json::Value;

/// One page of a list call.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ListResponse {
    #[serde(default)]
    pub data: Vec<Value>,
    #[serde(default)]
    pub total: Option<u64>,
    #[serde(default)]
    pub limit: Option<u64>,
    #[serde(default)]
    pub offset: Option<u64>,
}

/// Per-id outcome inside a batched response.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BatchResult {
    #[serde(deserialize_with = "identity_string")]
    pub id: String,
    pub status: u16,
    #[serde(default)]
    pub data: Value,
}

fn identity_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(id) => Ok(id),
        Value::Number(id) => Ok(id.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number identity, got {other}"
        ))),
    }
}

impl BatchResult {
    pub fn is_success(&self) -> bool {
        self.status < 400
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    Single(Value),
    Batch(Vec<BatchResult>),
}

/// Result of a mutating call.
#[derive(Debug, Clone, PartialEq)]
pub struct OperateResponse {
    pub status: u16,
    pub body: ResponseBody,
}

impl OperateResponse {
    pub fn single(status: u16, data: Value) -> Self {
        Self {
            status,
            body: ResponseBody::Single(data),
        }
    }

    pub fn batch(status: u16, results: Vec<BatchResult>) -> Self {
        Self {
            status,
            body: ResponseBody::Batch(results),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct TransportError {
    pub kind: FailureKind,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn status(code: u16) -> Self {
        Self::new(FailureKind::HttpStatus(code), format!("status {code}"))
    }

    /// The addressed resource no longer exists on the server.
    pub fn is_not_found(&self) -> bool {
        self.kind == FailureKind::HttpStatus(404)
    }

    pub fn to_record_error(&self) -> RecordError {
        let status = match self.kind {
            FailureKind::HttpStatus(code) => Some(code),
            _ => None,
        };
        RecordError::new(status, self.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    InvalidUrl,
    HttpStatus(u16),
    Timeout,
    Decode,
    Unsupported,
    Network,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::InvalidUrl => write!(f, "invalid url"),
            FailureKind::HttpStatus(code) => write!(f, "http status {code}"),
            FailureKind::Timeout => write!(f, "timeout"),
            FailureKind::Decode => write!(f, "malformed response body"),
            FailureKind::Unsupported => write!(f, "unsupported operation"),
            FailureKind::Network => write!(f, "network error"),
        }
    }
}

/// Remote resource operations the list engine drives.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    async fn list(&self, params: &Params) -> Result<ListResponse, TransportError>;

    async fn get(&self, id: &str, params: &Params) -> Result<Value, TransportError>;

    async fn create(&self, data: &Value) -> Result<OperateResponse, TransportError>;

    async fn update(&self, id: &str, data: &Value) -> Result<OperateResponse, TransportError>;

    async fn batch_update(
        &self,
        ids: &[String],
        data: &Value,
    ) -> Result<OperateResponse, TransportError>;

    async fn perform_action(
        &self,
        id: &str,
        action: &str,
        data: &Value,
    ) -> Result<OperateResponse, TransportError>;

    async fn batch_perform_action(
        &self,
        ids: &[String],
        action: &str,
        data: &Value,
    ) -> Result<OperateResponse, TransportError>;

    async fn delete(&self, id: &str) -> Result<OperateResponse, TransportError>;

    async fn batch_delete(&self, ids: &[String]) -> Result<OperateResponse, TransportError>;
}

/// Caller-supplied list function for lists not backed by a named resource.
#[async_trait::async_trait]
pub trait ListFetcher: Send + Sync {
    async fn fetch(&self, params: &Params) -> Result<ListResponse, TransportError>;
}
