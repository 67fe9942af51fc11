use std::pin::Pin;

use bytes::Bytes;
use futures::StreamExt as _;
use reqwest::header::{ACCEPT, HeaderValue};
use serde_json::Value;
use tracing::debug;

use crate::config::ClientConfig;
use crate::errors::StreamError;
use crate::request::StreamRequest;

/// Raw response body as it arrives from the network.
pub type ByteStream =
    Pin<Box<dyn futures::Stream<Item = Result<Bytes, StreamError>> + Send + 'static>>;

/// Opens event streams and plain JSON calls against the investigation server.
///
/// Sessions only depend on this trait, so tests can feed them scripted bodies.
#[async_trait::async_trait]
pub trait EventTransport: Send + Sync {
    /// Sends `request` and returns the response body once the status is known
    /// to be successful.
    async fn open(&self, request: &StreamRequest) -> Result<ByteStream, StreamError>;

    /// Sends `request` and parses a single JSON response.
    async fn send_json(&self, request: &StreamRequest) -> Result<Value, StreamError> {
        Err(StreamError::protocol_msg(format!(
            "transport does not support JSON calls ({})",
            request.endpoint.label()
        )))
    }
}

/// `reqwest`-backed transport.
pub struct HttpTransport {
    client: reqwest::Client,
    config: ClientConfig,
}

impl HttpTransport {
    pub fn new(config: ClientConfig) -> Result<Self, StreamError> {
        config.validate()?;
        // Connect timeout only: a healthy stream may stay quiet for minutes.
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| StreamError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    pub fn from_env() -> Result<Self, StreamError> {
        Self::new(ClientConfig::from_env()?)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    async fn send(
        &self,
        request: &StreamRequest,
        accept: &'static str,
    ) -> Result<reqwest::Response, StreamError> {
        let url = self.config.endpoint_url(&request.endpoint.path());
        debug!(endpoint = request.endpoint.label(), %url, "sending request");
        let builder = match &request.body {
            Some(body) => self.client.post(&url).json(body),
            None => self.client.get(&url),
        };
        let response = builder
            .header(ACCEPT, HeaderValue::from_static(accept))
            .send()
            .await
            .map_err(|e| StreamError::transport(format!("request to {url} failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(StreamError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }
}

#[async_trait::async_trait]
impl EventTransport for HttpTransport {
    async fn open(&self, request: &StreamRequest) -> Result<ByteStream, StreamError> {
        let response = self.send(request, "text/event-stream").await?;
        if response.status() == reqwest::StatusCode::NO_CONTENT {
            return Err(StreamError::MissingBody);
        }
        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| StreamError::transport(format!("body read failed: {e}"))));
        Ok(Box::pin(body))
    }

    async fn send_json(&self, request: &StreamRequest) -> Result<Value, StreamError> {
        let response = self.send(request, "application/json").await?;
        response
            .json::<Value>()
            .await
            .map_err(|e| StreamError::transport(format!("invalid JSON response: {e}")))
    }
}
