use anyhow::Context;
use async_trait::async_trait;
use axum::{
    body::{Body, Bytes},
    http::{header, HeaderValue, Method, Request, StatusCode},
    Router,
};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::BTreeMap;
use tower::ServiceExt;

pub const DEFAULT_API_PREFIX: &str = "/api";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub api_prefix: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_prefix: DEFAULT_API_PREFIX.to_string(),
        }
    }
}

impl ClientConfig {
    /// Reads `GAMEGRAPH_API_PREFIX`, falling back to `/api`.
    pub fn from_env() -> Self {
        match std::env::var("GAMEGRAPH_API_PREFIX") {
            Ok(p) if !p.trim().is_empty() => Self {
                api_prefix: p.trim().trim_end_matches('/').to_string(),
            },
            _ => Self::default(),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_prefix, path)
    }
}

#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub body: Bytes,
}

impl ApiResponse {
    pub fn is_ok(&self) -> bool {
        self.status == StatusCode::OK
    }

    pub fn json<T: DeserializeOwned>(&self) -> anyhow::Result<T> {
        serde_json::from_slice(&self.body)
            .with_context(|| format!("decoding {} response body", self.status))
    }

    /// Body as text, for logging error responses.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Carries one API request. `path` is relative to the API prefix, e.g. `/game/{id}`.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> anyhow::Result<ApiResponse>;
}

/// Serves requests from an in-process router, keeping cookies between calls like a browser would.
pub struct RouterTransport {
    router: Router,
    config: ClientConfig,
    cookies: Mutex<BTreeMap<String, String>>,
}

impl RouterTransport {
    pub fn new(router: Router, config: ClientConfig) -> Self {
        Self {
            router,
            config,
            cookies: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn cookie(&self, name: &str) -> Option<String> {
        self.cookies.lock().get(name).cloned()
    }

    fn cookie_header(&self) -> Option<String> {
        let jar = self.cookies.lock();
        if jar.is_empty() {
            return None;
        }
        Some(
            jar.iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }

    fn store_set_cookie(&self, value: &HeaderValue) {
        let Ok(raw) = value.to_str() else {
            return;
        };
        let pair = raw.split(';').next().unwrap_or_default();
        let Some((name, val)) = pair.trim().split_once('=') else {
            return;
        };
        let mut jar = self.cookies.lock();
        if val.is_empty() {
            jar.remove(name);
        } else {
            jar.insert(name.to_string(), val.to_string());
        }
    }
}

#[async_trait]
impl Transport for RouterTransport {
    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> anyhow::Result<ApiResponse> {
        let mut builder = Request::builder()
            .method(method.clone())
            .uri(self.config.url(path));
        if let Some(cookie) = self.cookie_header() {
            builder = builder.header(header::COOKIE, cookie);
        }
        let request = match body {
            Some(v) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(serde_json::to_vec(&v)?))?,
            None => builder.body(Body::empty())?,
        };

        let response = self.router.clone().oneshot(request).await?;
        for v in response.headers().get_all(header::SET_COOKIE) {
            self.store_set_cookie(v);
        }
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .context("reading response body")?;
        tracing::debug!(%method, path, %status, "api call");
        Ok(ApiResponse { status, body })
    }
}
