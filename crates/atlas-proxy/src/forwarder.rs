//! Gateway forwarder

use crate::body::ProxyBody;
use crate::client::{ClientConfig, HttpClient};
use crate::headers::{filter_request_headers, filter_response_headers};
use atlas_core::{Error, HealthStatus, Result};
use atlas_router::{CompiledRoute, RouteTable};
use atlas_state::ServiceRegistry;
use bytes::Bytes;
use futures::TryStreamExt;
use http::{header, HeaderValue, Request, Response};
use http_body::{Body as _, Frame};
use http_body_util::{BodyDataStream, BodyExt, StreamBody};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Forwarder configuration
#[derive(Debug, Clone)]
pub struct ForwarderConfig {
    /// Time allowed until the target's response headers arrive
    pub timeout: Duration,
    /// TCP connect timeout
    pub connect_timeout: Duration,
    /// Whether to add X-Forwarded-* headers
    pub add_forwarded_headers: bool,
}

impl Default for ForwarderConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(5),
            add_forwarded_headers: true,
        }
    }
}

/// Forwards gateway requests to route targets.
///
/// Only reads the registry and route table; no lock is held across the
/// outbound call. Dropping the returned future (caller went away) drops the
/// outbound request and its connection.
#[derive(Debug, Clone)]
pub struct Forwarder {
    registry: ServiceRegistry,
    routes: RouteTable,
    client: HttpClient,
    config: ForwarderConfig,
}

impl Forwarder {
    /// Create a forwarder
    pub fn new(
        registry: ServiceRegistry,
        routes: RouteTable,
        config: ForwarderConfig,
    ) -> Result<Self> {
        let client = HttpClient::new(&ClientConfig {
            timeout: config.timeout,
            connect_timeout: config.connect_timeout,
        })?;
        Ok(Self {
            registry,
            routes,
            client,
            config,
        })
    }

    /// Best matching route of `gateway_id` for `path`
    pub fn resolve_route(&self, gateway_id: &str, path: &str) -> Result<Arc<CompiledRoute>> {
        self.routes.resolve(gateway_id, path)
    }

    /// Forward `req` on behalf of `gateway_id`.
    ///
    /// The request URI carries the inbound path relative to the gateway
    /// (plus query). Fails with `NotFound` or `Forbidden` if `gateway_id` is
    /// not a registered gateway, then `NoRoute`, `TargetUnavailable`,
    /// `Upstream` or `UpstreamTimeout`; never retries.
    pub async fn forward<B>(
        &self,
        gateway_id: &str,
        req: Request<B>,
        client_addr: Option<SocketAddr>,
    ) -> Result<Response<ProxyBody>>
    where
        B: http_body::Body<Data = Bytes> + Send + Sync + 'static,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        match self.registry.get(gateway_id) {
            Some(gateway) if gateway.is_gateway() => {}
            Some(_) => {
                return Err(Error::Forbidden(format!(
                    "service '{gateway_id}' is not a gateway"
                )));
            }
            None => return Err(Error::service_not_found(gateway_id)),
        }

        let path = req.uri().path().to_string();
        let route = self.resolve_route(gateway_id, &path)?;

        let target_id = &route.rule.target_service_id;
        let target = match self.registry.get(target_id) {
            Some(target) if target.status() != HealthStatus::Unhealthy => target,
            Some(_) => {
                debug!(
                    gateway = %gateway_id,
                    target = %target_id,
                    "Refusing to forward to unhealthy target"
                );
                return Err(Error::TargetUnavailable(format!(
                    "service '{target_id}' is unhealthy"
                )));
            }
            None => {
                return Err(Error::TargetUnavailable(format!(
                    "service '{target_id}' is not registered"
                )));
            }
        };

        let upstream_path = route.upstream_path(&path);
        let url = match req.uri().query() {
            Some(query) => format!("{}{}?{}", target.base_url(), upstream_path, query),
            None => format!("{}{}", target.base_url(), upstream_path),
        };

        let (parts, body) = req.into_parts();
        let mut headers = filter_request_headers(&parts.headers);
        if self.config.add_forwarded_headers {
            add_forwarded_headers(&mut headers, &parts.headers, client_addr);
        }
        // a streamed body is sent chunked unless the length is set explicitly
        if let Some(len) = body.size_hint().exact() {
            if len > 0 || parts.headers.contains_key(header::CONTENT_LENGTH) {
                headers.insert(header::CONTENT_LENGTH, HeaderValue::from(len));
            }
        }

        let outbound = self
            .client
            .request(parts.method.clone(), &url)
            .headers(headers)
            .body(reqwest::Body::wrap_stream(BodyDataStream::new(body)));

        debug!(
            gateway = %gateway_id,
            route_id = route.rule.id,
            method = %parts.method,
            url = %url,
            "Forwarding request"
        );

        let start = Instant::now();
        let upstream = match self.client.send(outbound).await {
            Ok(upstream) => upstream,
            Err(e) => {
                warn!(
                    gateway = %gateway_id,
                    target = %target_id,
                    url = %url,
                    error = %e,
                    "Upstream request failed"
                );
                return Err(e);
            }
        };

        debug!(
            url = %url,
            status = %upstream.status(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Upstream responded"
        );

        let mut response = Response::builder().status(upstream.status());
        if let Some(headers) = response.headers_mut() {
            *headers = filter_response_headers(upstream.headers());
        }

        let stream = upstream
            .bytes_stream()
            .map_ok(Frame::data)
            .map_err(|e| Error::Upstream(e.to_string()));
        let body = StreamBody::new(stream).boxed_unsync();

        response
            .body(body)
            .map_err(|e| Error::Internal(format!("failed to build response: {e}")))
    }
}

fn add_forwarded_headers(
    headers: &mut http::HeaderMap,
    inbound: &http::HeaderMap,
    client_addr: Option<SocketAddr>,
) {
    if let Some(addr) = client_addr {
        let ip = addr.ip().to_string();
        let value = match inbound.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
            Some(prior) => format!("{prior}, {ip}"),
            None => ip,
        };
        if let Ok(value) = HeaderValue::from_str(&value) {
            headers.insert("x-forwarded-for", value);
        }
    }
    if let Some(host) = inbound.get(http::header::HOST) {
        headers.insert("x-forwarded-host", host.clone());
    }
    if !headers.contains_key("x-forwarded-proto") {
        headers.insert("x-forwarded-proto", HeaderValue::from_static("http"));
    }
}
