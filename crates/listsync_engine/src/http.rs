use std::time::Duration;

use engine_logging::engine_trace;
use listsync_core::Params;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Method, RequestBuilder};
use serde::Deserialize;
use serde_json::{Map, Value};
use url::Url;

use crate::transport::{
    BatchResult, FailureKind, ListResponse, OperateResponse, Transport, TransportError,
};

#[derive(Debug, Clone)]
pub struct TransportSettings {
    /// API root the resource collections live under.
    pub base_url: String,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    /// Session token sent as a bearer `Authorization` header.
    pub auth_token: Option<String>,
}

impl TransportSettings {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            auth_token: None,
        }
    }
}

#[derive(Deserialize)]
struct BatchEnvelope {
    #[serde(default)]
    data: Vec<BatchResult>,
}

/// REST binding of a single named resource collection.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
    base: Url,
    resource: String,
    auth_token: Option<String>,
}

impl ReqwestTransport {
    pub fn new(resource: impl Into<String>, settings: TransportSettings) -> Result<Self, TransportError> {
        let base = Url::parse(&settings.base_url)
            .map_err(|err| TransportError::new(FailureKind::InvalidUrl, err.to_string()))?;
        if base.cannot_be_a_base() {
            return Err(TransportError::new(
                FailureKind::InvalidUrl,
                format!("{base} cannot carry resource paths"),
            ));
        }
        let client = reqwest::Client::builder()
            .connect_timeout(settings.connect_timeout)
            .timeout(settings.request_timeout)
            .build()
            .map_err(|err| TransportError::new(FailureKind::Network, err.to_string()))?;

        Ok(Self {
            client,
            base,
            resource: resource.into(),
            auth_token: settings.auth_token,
        })
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    fn url(&self, segments: &[&str], params: &Params) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().push(&self.resource).extend(segments);
        }
        append_query(&mut url, params);
        url
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        engine_trace!("{} {}", method, url);
        let request = self.client.request(method, url);
        match &self.auth_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<(u16, Value), TransportError> {
        let response = request.send().await.map_err(map_reqwest_error)?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::new(
                FailureKind::HttpStatus(status.as_u16()),
                status.to_string(),
            ));
        }
        let bytes = response.bytes().await.map_err(map_reqwest_error)?;
        if bytes.is_empty() {
            return Ok((status.as_u16(), Value::Null));
        }
        let body = serde_json::from_slice(&bytes)
            .map_err(|err| TransportError::new(FailureKind::Decode, err.to_string()))?;
        Ok((status.as_u16(), body))
    }

    async fn send_single(&self, request: RequestBuilder) -> Result<OperateResponse, TransportError> {
        let (status, body) = self.send(request).await?;
        Ok(OperateResponse::single(status, body))
    }

    async fn send_batch(&self, request: RequestBuilder) -> Result<OperateResponse, TransportError> {
        let (status, body) = self.send(request).await?;
        let envelope: BatchEnvelope = serde_json::from_value(body)
            .map_err(|err| TransportError::new(FailureKind::Decode, err.to_string()))?;
        Ok(OperateResponse::batch(status, envelope.data))
    }
}

fn with_json(request: RequestBuilder, body: &Value) -> RequestBuilder {
    request
        .header(CONTENT_TYPE, "application/json")
        .body(body.to_string())
}

/// Merges the target ids into an object payload as `{"id": [...]}`.
fn with_ids(ids: &[String], data: &Value) -> Value {
    let mut body = match data {
        Value::Object(map) => map.clone(),
        _ => Map::new(),
    };
    body.insert(
        "id".to_string(),
        Value::Array(ids.iter().cloned().map(Value::String).collect()),
    );
    Value::Object(body)
}

/// List-valued params become repeated keys; nulls are dropped.
fn append_query(url: &mut Url, params: &Params) {
    if params.values().all(Value::is_null) {
        return;
    }
    let mut query = url.query_pairs_mut();
    for (key, value) in params {
        match value {
            Value::Null => {}
            Value::Array(items) => {
                for item in items {
                    query.append_pair(key, &query_value(item));
                }
            }
            other => {
                query.append_pair(key, &query_value(other));
            }
        }
    }
}

fn query_value(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn map_reqwest_error(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        return TransportError::new(FailureKind::Timeout, err.to_string());
    }
    if err.is_decode() {
        return TransportError::new(FailureKind::Decode, err.to_string());
    }
    TransportError::new(FailureKind::Network, err.to_string())
}

#[async_trait::async_trait]
impl Transport for ReqwestTransport {
    async fn list(&self, params: &Params) -> Result<ListResponse, TransportError> {
        let url = self.url(&[], params);
        let (_, body) = self.send(self.request(Method::GET, url)).await?;
        serde_json::from_value(body)
            .map_err(|err| TransportError::new(FailureKind::Decode, err.to_string()))
    }

    async fn get(&self, id: &str, params: &Params) -> Result<Value, TransportError> {
        let url = self.url(&[id], params);
        let (_, body) = self.send(self.request(Method::GET, url)).await?;
        Ok(body)
    }

    async fn create(&self, data: &Value) -> Result<OperateResponse, TransportError> {
        let url = self.url(&[], &Params::new());
        self.send_single(with_json(self.request(Method::POST, url), data))
            .await
    }

    async fn update(&self, id: &str, data: &Value) -> Result<OperateResponse, TransportError> {
        let url = self.url(&[id], &Params::new());
        self.send_single(with_json(self.request(Method::PUT, url), data))
            .await
    }

    async fn batch_update(
        &self,
        ids: &[String],
        data: &Value,
    ) -> Result<OperateResponse, TransportError> {
        let url = self.url(&[], &Params::new());
        let body = with_ids(ids, data);
        self.send_batch(with_json(self.request(Method::PUT, url), &body))
            .await
    }

    async fn perform_action(
        &self,
        id: &str,
        action: &str,
        data: &Value,
    ) -> Result<OperateResponse, TransportError> {
        let url = self.url(&[id, action], &Params::new());
        self.send_single(with_json(self.request(Method::POST, url), data))
            .await
    }

    async fn batch_perform_action(
        &self,
        ids: &[String],
        action: &str,
        data: &Value,
    ) -> Result<OperateResponse, TransportError> {
        let url = self.url(&[action], &Params::new());
        let body = with_ids(ids, data);
        self.send_batch(with_json(self.request(Method::POST, url), &body))
            .await
    }

    async fn delete(&self, id: &str) -> Result<OperateResponse, TransportError> {
        let url = self.url(&[id], &Params::new());
        self.send_single(self.request(Method::DELETE, url)).await
    }

    async fn batch_delete(&self, ids: &[String]) -> Result<OperateResponse, TransportError> {
        let mut params = Params::new();
        params.insert(
            "id".to_string(),
            Value::Array(ids.iter().cloned().map(Value::String).collect()),
        );
        let url = self.url(&[], &params);
        self.send_single(self.request(Method::DELETE, url)).await
    }
}
