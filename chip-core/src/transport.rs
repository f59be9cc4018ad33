use async_trait::async_trait;
use secrecy::ExposeSecret;

use crate::config::{Config, EndpointConfig};
use crate::error::CoreResult;
use crate::http_client::{HttpClient, RequestCtx};
use crate::model::ChatRequest;
use crate::stream::BoxDeltaStream;

/// Issues one streaming chat request. The returned stream is consumed
/// exactly once by the controller.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn stream_chat(&self, req: &ChatRequest, request_id: &str) -> CoreResult<BoxDeltaStream>;
}

/// Client for the chat proxy function: bearer-authenticated
/// `POST { messages }` answered with `text/event-stream`.
#[derive(Debug, Clone)]
pub struct ProxyClient {
    http: HttpClient,
    endpoint: EndpointConfig,
}

impl ProxyClient {
    pub fn new(http: HttpClient, endpoint: EndpointConfig) -> Self {
        Self { http, endpoint }
    }

    pub fn from_config(cfg: &Config) -> CoreResult<Self> {
        let http = HttpClient::new(&cfg.http)?;
        Ok(Self::new(http, cfg.endpoint()?))
    }

    #[cfg(test)]
    pub fn new_for_tests(url: &str) -> Self {
        ProxyClient::new(
            HttpClient::new_default().unwrap(),
            EndpointConfig::new(url, "test-key"),
        )
    }

    // Content-Type comes from the JSON body.
    fn headers(&self) -> Vec<(String, String)> {
        vec![(
            "Authorization".to_string(),
            format!("Bearer {}", self.endpoint.auth_token.expose_secret()),
        )]
    }
}

#[async_trait]
impl ChatTransport for ProxyClient {
    async fn stream_chat(&self, req: &ChatRequest, request_id: &str) -> CoreResult<BoxDeltaStream> {
        let ctx = RequestCtx {
            request_id: Some(request_id),
        };
        let owned_headers = self.headers();
        let hdrs: Vec<(&str, &str)> = owned_headers
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        self.http
            .post_sse(&self.endpoint.endpoint_url, req, &hdrs, &ctx)
            .await
    }
}
