use std::time::Duration;

use http::header::{ACCEPT, CONTENT_TYPE, RETRY_AFTER, USER_AGENT};
use reqwest::{Client, StatusCode};
use serde::Serialize;

use crate::config::HttpCfg;
use crate::error::{ChipError, CoreResult};
use crate::stream::{BoxDeltaStream, DeltaStream};

/// Request context carries the correlation id for one conversation turn.
#[derive(Clone, Copy, Default)]
pub struct RequestCtx<'a> {
    pub request_id: Option<&'a str>,
}

/// Thin wrapper around reqwest::Client with defaults and helpers.
#[derive(Debug, Clone)]
pub struct HttpClient {
    inner: Client,
    user_agent: String,
}

impl HttpClient {
    pub fn new(cfg: &HttpCfg) -> CoreResult<Self> {
        let mut builder = Client::builder()
            .connect_timeout(Duration::from_millis(cfg.connect_timeout_ms))
            .timeout(Duration::from_millis(cfg.request_timeout_ms));
        if let Some(n) = cfg.pool_max_idle_per_host {
            builder = builder.pool_max_idle_per_host(n);
        }
        let inner = builder
            .build()
            .map_err(|e| ChipError::Other(anyhow::anyhow!("http client build failed: {e}")))?;
        Ok(Self {
            inner,
            user_agent: concat!("chip/", env!("CARGO_PKG_VERSION")).to_string(),
        })
    }

    pub fn new_default() -> CoreResult<Self> {
        Self::new(&HttpCfg::default())
    }

    /// POST JSON and return the decoded delta stream of the
    /// `text/event-stream` response.
    pub async fn post_sse<T: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &T,
        headers: &[(&str, &str)],
        ctx: &RequestCtx<'_>,
    ) -> CoreResult<BoxDeltaStream> {
        let mut req = self
            .inner
            .post(url)
            .json(body)
            .header(USER_AGENT, &self.user_agent)
            .header(ACCEPT, "text/event-stream");

        for (k, v) in headers {
            req = req.header(*k, *v);
        }
        if let Some(rid) = ctx.request_id {
            req = req.header("X-Request-Id", rid);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| ChipError::transport(e.to_string()))?;

        let status = resp.status();
        let headers = resp.headers().clone();
        if let Some(upstream_id) = extract_request_id(&headers) {
            tracing::debug!(upstream_id = %upstream_id, status = status.as_u16(), "proxy responded");
        }

        if !status.is_success() {
            let ra = parse_retry_after(&headers);
            let text = resp.text().await.unwrap_or_default();
            return Err(map_http_error(status, ra, &text));
        }

        if status == StatusCode::NO_CONTENT || resp.content_length() == Some(0) {
            return Err(ChipError::MalformedUpstream {
                status: None,
                message: None,
            });
        }

        let is_sse = headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with("text/event-stream"));
        if !is_sse {
            tracing::warn!(status = status.as_u16(), "proxy response is not text/event-stream");
        }

        let byte_stream = resp.bytes_stream();
        Ok(Box::pin(DeltaStream::new(Box::pin(byte_stream))))
    }
}

fn extract_request_id(headers: &reqwest::header::HeaderMap) -> Option<String> {
    static CANDIDATES: [&str; 4] = ["x-request-id", "request-id", "sb-request-id", "x-cdn-request-id"];
    for k in CANDIDATES {
        if let Some(v) = headers.get(k)
            && let Ok(s) = v.to_str()
        {
            return Some(s.to_string());
        }
    }
    None
}

fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    if let Some(v) = headers.get(RETRY_AFTER)
        && let Ok(s) = v.to_str()
        && let Ok(secs) = s.trim().parse::<u64>()
    {
        return Some(secs);
    }
    // HTTP-date forms are ignored.
    None
}

/// `{ "error": "..." }` from an error body; anything else yields `None`.
fn upstream_error_text(body: &str) -> Option<String> {
    let v: serde_json::Value = serde_json::from_str(body).ok()?;
    v.get("error")
        .and_then(|e| e.as_str())
        .map(|s| truncate(s, 300))
}

fn map_http_error(status: StatusCode, retry_after: Option<u64>, body: &str) -> ChipError {
    let upstream = upstream_error_text(body);
    match status {
        StatusCode::TOO_MANY_REQUESTS => ChipError::RateLimited {
            retry_after,
            upstream,
        },
        StatusCode::PAYMENT_REQUIRED => ChipError::CapacityExceeded { upstream },
        s => ChipError::MalformedUpstream {
            status: Some(s.as_u16()),
            message: upstream,
        },
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() > max {
        let mut end = max;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        let mut t = s[..end].to_string();
        t.push_str("...");
        t
    } else {
        s.to_string()
    }
}
