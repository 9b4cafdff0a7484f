//! The AI boundary: chat, search and streaming calls to the edge functions.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use thiserror::Error;
use tracing::debug;

use crate::api::{AiResponse, ChatRequest, SearchRequest, SearchResponse};
use crate::core::chat_stream::{chunk_stream, describe_api_error, ChunkStream};
use crate::utils::auth::add_bearer_auth;
use crate::utils::url::construct_api_url;

pub const CHAT_ENDPOINT: &str = "ai-chat";
pub const SEARCH_ENDPOINT: &str = "react-search";

#[derive(Debug, Error)]
pub enum AiError {
    #[error("request failed: {0}")]
    Http(reqwest::Error),

    #[error("edge function returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("request timed out")]
    Timeout,

    #[error("{0}")]
    ResponseShape(String),

    #[error("stream failed: {0}")]
    Stream(String),
}

impl From<reqwest::Error> for AiError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            AiError::Timeout
        } else {
            AiError::Http(error)
        }
    }
}

/// Pull the answer text out of either response shape.
pub fn extract_content(response: &AiResponse) -> Result<String, AiError> {
    response
        .content()
        .map(str::to_string)
        .ok_or_else(|| AiError::ResponseShape("response contained no content".to_string()))
}

#[async_trait]
pub trait AiClient: Send + Sync {
    async fn chat(
        &self,
        request: &ChatRequest,
        access_token: Option<&str>,
    ) -> Result<AiResponse, AiError>;

    async fn search(
        &self,
        request: &SearchRequest,
        access_token: Option<&str>,
    ) -> Result<AiResponse, AiError>;

    /// Start a streaming chat. The request's `stream` flag is forced on.
    async fn stream_chat(
        &self,
        request: &ChatRequest,
        access_token: Option<&str>,
    ) -> Result<ChunkStream, AiError>;
}

/// [`AiClient`] over HTTP against `{edge_base_url}/ai-chat` and
/// `{edge_base_url}/react-search`.
#[derive(Clone)]
pub struct HttpAiClient {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl HttpAiClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self::with_client(reqwest::Client::new(), base_url, timeout)
    }

    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            timeout,
        }
    }

    fn post(&self, endpoint: &str, access_token: Option<&str>) -> reqwest::RequestBuilder {
        let url = construct_api_url(&self.base_url, endpoint);
        debug!(%url, "calling edge function");
        let request = self
            .client
            .post(url)
            .header("Content-Type", "application/json");
        add_bearer_auth(request, access_token)
    }

    async fn send_json<T: serde::Serialize + Sync>(
        &self,
        endpoint: &str,
        body: &T,
        access_token: Option<&str>,
    ) -> Result<String, AiError> {
        let response = self
            .post(endpoint, access_token)
            .timeout(self.timeout)
            .json(body)
            .send()
            .await?;
        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(AiError::Status {
                status: status.as_u16(),
                message: describe_api_error(&text),
            });
        }
        Ok(text)
    }
}

fn parse_body<T: serde::de::DeserializeOwned>(body: &str) -> Result<T, AiError> {
    serde_json::from_str(body)
        .map_err(|error| AiError::ResponseShape(format!("unrecognized response body: {error}")))
}

#[async_trait]
impl AiClient for HttpAiClient {
    async fn chat(
        &self,
        request: &ChatRequest,
        access_token: Option<&str>,
    ) -> Result<AiResponse, AiError> {
        let body = self.send_json(CHAT_ENDPOINT, request, access_token).await?;
        parse_body(&body)
    }

    async fn search(
        &self,
        request: &SearchRequest,
        access_token: Option<&str>,
    ) -> Result<AiResponse, AiError> {
        let body = self.send_json(SEARCH_ENDPOINT, request, access_token).await?;
        // Raw search output first; some deployments already normalize it.
        match serde_json::from_str::<SearchResponse>(&body) {
            Ok(raw) => Ok(raw.into()),
            Err(_) => parse_body(&body),
        }
    }

    async fn stream_chat(
        &self,
        request: &ChatRequest,
        access_token: Option<&str>,
    ) -> Result<ChunkStream, AiError> {
        let mut request = request.clone();
        request.stream = true;

        // No overall timeout: a healthy stream may outlive it.
        let response = self
            .post(CHAT_ENDPOINT, access_token)
            .json(&request)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let text = response
                .text()
                .await
                .unwrap_or_else(|_| "<no body>".to_string());
            return Err(AiError::Status {
                status: status.as_u16(),
                message: describe_api_error(&text),
            });
        }

        Ok(chunk_stream(response.bytes_stream().map(|chunk| chunk.map_err(AiError::from))))
    }
}
