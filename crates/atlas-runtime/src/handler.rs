//! HTTP request handler

use crate::api::{json_response, ApiHandler};
use crate::atlas::Atlas;
use atlas_config::ServerConfig;
use atlas_core::{Error, Result};
use atlas_proxy::{full, ProxyBody};
use bytes::Bytes;
use http::{header, Request, Response, StatusCode, Uri};
use http_body_util::{BodyExt, Limited};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, warn};

/// Counts a request as in flight until dropped
struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::Relaxed);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

/// `path` relative to `prefix`, if it lies at or below it
fn strip_prefix<'a>(path: &'a str, prefix: &str) -> Option<&'a str> {
    if prefix == "/" {
        return Some(path);
    }
    let rest = path.strip_prefix(prefix)?;
    (rest.is_empty() || rest.starts_with('/')).then_some(rest)
}

/// JSON `{"error": ...}` with the status of `err`
pub fn error_response(err: &Error) -> Response<ProxyBody> {
    let body = serde_json::json!({ "error": err.to_string() });
    let mut response = Response::new(full(body.to_string()));
    *response.status_mut() = err.to_status_code();
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static("application/json"),
    );
    response
}

/// Top-level dispatcher: registry health, API prefix, gateway prefix
#[derive(Debug, Clone)]
pub struct RequestHandler {
    atlas: Arc<Atlas>,
    api: ApiHandler,
    config: Arc<ServerConfig>,
    in_flight: Arc<AtomicUsize>,
}

impl RequestHandler {
    /// Create a new request handler
    pub fn new(atlas: Arc<Atlas>, config: ServerConfig, in_flight: Arc<AtomicUsize>) -> Self {
        Self {
            api: ApiHandler::new(Arc::clone(&atlas)),
            atlas,
            config: Arc::new(config),
            in_flight,
        }
    }

    /// Requests currently being handled
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Relaxed)
    }

    /// Handle one request; errors become JSON error responses
    pub async fn handle<B>(
        &self,
        req: Request<B>,
        remote: Option<SocketAddr>,
    ) -> Response<ProxyBody>
    where
        B: http_body::Body<Data = Bytes> + Send + Sync + 'static,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let _in_flight = InFlight::enter(&self.in_flight);
        let start = Instant::now();
        let method = req.method().clone();
        let path = req.uri().path().to_string();

        let response = match self.dispatch(req, remote).await {
            Ok(response) => response,
            Err(e) => {
                if e.to_status_code().is_server_error() {
                    error!(method = %method, path = %path, error = %e, "Request failed");
                } else {
                    debug!(method = %method, path = %path, error = %e, "Request rejected");
                }
                error_response(&e)
            }
        };

        debug!(
            method = %method,
            path = %path,
            status = response.status().as_u16(),
            latency_ms = start.elapsed().as_millis() as u64,
            "Request completed"
        );
        response
    }

    async fn dispatch<B>(
        &self,
        req: Request<B>,
        remote: Option<SocketAddr>,
    ) -> Result<Response<ProxyBody>>
    where
        B: http_body::Body<Data = Bytes> + Send + Sync + 'static,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let path = req.uri().path().to_string();

        if path == "/health" {
            return json_response(
                StatusCode::OK,
                &serde_json::json!({
                    "status": "ok",
                    "services": self.atlas.registry().len(),
                }),
            );
        }

        if let Some(rest) = strip_prefix(&path, &self.config.gateway_prefix) {
            let rest = rest.to_string();
            return self.forward(req, &rest, remote).await;
        }

        if let Some(rest) = strip_prefix(&path, &self.config.api_prefix) {
            let rest = rest.to_string();
            let (parts, body) = req.into_parts();
            let body = read_body(body, self.config.max_body_size).await?;
            return self
                .api
                .handle(&parts.method, &rest, parts.uri.query(), &parts.headers, body)
                .await;
        }

        Err(Error::NotFound(format!("no endpoint {path}")))
    }

    /// `rest` is `/{gateway_id}/{path..}`
    async fn forward<B>(
        &self,
        req: Request<B>,
        rest: &str,
        remote: Option<SocketAddr>,
    ) -> Result<Response<ProxyBody>>
    where
        B: http_body::Body<Data = Bytes> + Send + Sync + 'static,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let rest = rest.trim_start_matches('/');
        let (gateway_id, inbound) = match rest.split_once('/') {
            Some((gateway, tail)) => (gateway, format!("/{tail}")),
            None => (rest, "/".to_string()),
        };
        if gateway_id.is_empty() {
            return Err(Error::InvalidRequest("missing gateway id".to_string()));
        }

        let declared = req
            .headers()
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<usize>().ok());
        if declared.is_some_and(|len| len > self.config.max_body_size) {
            return Err(Error::InvalidRequest("request body too large".to_string()));
        }

        let (mut parts, body) = req.into_parts();
        let path_and_query = match parts.uri.query() {
            Some(query) => format!("{inbound}?{query}"),
            None => inbound,
        };
        parts.uri = path_and_query
            .parse::<Uri>()
            .map_err(|e| Error::InvalidRequest(format!("invalid path: {e}")))?;

        let req = Request::from_parts(parts, Limited::new(body, self.config.max_body_size));
        match self.atlas.forward(gateway_id, req, remote).await {
            Ok(response) => Ok(response),
            Err(e) => {
                if e.is_upstream() {
                    warn!(gateway = %gateway_id, error = %e, "Forwarding failed");
                }
                Err(e)
            }
        }
    }
}

async fn read_body<B>(body: B, limit: usize) -> Result<Bytes>
where
    B: http_body::Body<Data = Bytes>,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    Limited::new(body, limit)
        .collect()
        .await
        .map(|collected| collected.to_bytes())
        .map_err(|e| Error::InvalidRequest(format!("Failed to read request body: {e}")))
}
