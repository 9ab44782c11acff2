//! Registry REST API

use crate::atlas::{Atlas, ServiceFilter};
use atlas_core::{
    EdgeSpec, Error, HealthStatus, Result, RoutePatch, RouteSpec, ServicePatch, ServiceRecord,
    ServiceSpec,
};
use atlas_proxy::{empty, full, ProxyBody};
use atlas_state::Upsert;
use bytes::Bytes;
use http::{header, HeaderMap, Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

/// Header a gateway identifies itself with when fetching its routes
pub const GATEWAY_ID_HEADER: &str = "x-gateway-id";

/// A service record as returned by the API
#[derive(Debug, Serialize)]
struct ServiceView {
    #[serde(flatten)]
    record: ServiceRecord,
    base_url: String,
}

impl From<ServiceRecord> for ServiceView {
    fn from(record: ServiceRecord) -> Self {
        Self {
            base_url: record.base_url(),
            record,
        }
    }
}

fn views(records: Vec<ServiceRecord>) -> Vec<ServiceView> {
    records.into_iter().map(ServiceView::from).collect()
}

/// Handles requests below the API prefix
#[derive(Debug, Clone)]
pub struct ApiHandler {
    atlas: Arc<Atlas>,
}

impl ApiHandler {
    /// Create a new API handler
    pub fn new(atlas: Arc<Atlas>) -> Self {
        Self { atlas }
    }

    /// Handle one API request.
    ///
    /// `path` is relative to the API prefix, e.g. `/services/billing`.
    pub async fn handle(
        &self,
        method: &Method,
        path: &str,
        query: Option<&str>,
        headers: &HeaderMap,
        body: Bytes,
    ) -> Result<Response<ProxyBody>> {
        let segments: Vec<&str> = path
            .split('/')
            .filter(|segment| !segment.is_empty())
            .collect();

        debug!(method = %method, path = %path, "API request");

        let atlas = &self.atlas;
        match (method, segments.as_slice()) {
            // services
            (&Method::POST, ["services"]) => {
                let spec: ServiceSpec = parse_body(&body)?;
                let (record, outcome) = atlas.register(spec).await?;
                let status = match outcome {
                    Upsert::Created => StatusCode::CREATED,
                    Upsert::Replaced => StatusCode::OK,
                };
                json_response(status, &ServiceView::from(record))
            }
            (&Method::GET, ["services"]) => {
                let filter = service_filter(query)?;
                json_response(StatusCode::OK, &views(atlas.list_services(&filter)))
            }
            (&Method::GET, ["services", id]) => {
                json_response(StatusCode::OK, &ServiceView::from(atlas.get(id)?))
            }
            (&Method::PUT, ["services", id]) => {
                let patch: ServicePatch = parse_body(&body)?;
                json_response(StatusCode::OK, &ServiceView::from(atlas.update(id, patch).await?))
            }
            (&Method::DELETE, ["services", id]) => {
                atlas.deregister(id).await?;
                no_content()
            }
            (&Method::POST, ["services", id, "heartbeat"]) => {
                json_response(StatusCode::OK, &ServiceView::from(atlas.heartbeat(id).await?))
            }
            (&Method::GET, ["services", id, "dependencies"]) => {
                json_response(StatusCode::OK, &atlas.dependencies_of(id))
            }
            (&Method::GET, ["services", id, "dependents"]) => {
                json_response(StatusCode::OK, &atlas.dependents_of(id))
            }

            // discovery
            (&Method::GET, ["discover", id]) => {
                json_response(StatusCode::OK, &ServiceView::from(atlas.discover(id)?))
            }
            (&Method::GET, ["gateways"]) => json_response(StatusCode::OK, &views(atlas.gateways())),

            // dependencies
            (&Method::POST, ["dependencies"]) => {
                let spec: EdgeSpec = parse_body(&body)?;
                json_response(StatusCode::CREATED, &atlas.add_dependency(spec).await?)
            }
            (&Method::GET, ["dependencies"]) => {
                json_response(StatusCode::OK, &atlas.list_dependencies())
            }
            (&Method::DELETE, ["dependencies", id]) => {
                atlas.remove_dependency(parse_id(id)?).await?;
                no_content()
            }
            (&Method::GET, ["topology"]) => json_response(StatusCode::OK, &atlas.topology()),

            // routes
            (&Method::POST, ["routes"]) => {
                let spec: RouteSpec = parse_body(&body)?;
                json_response(StatusCode::CREATED, &atlas.add_route(spec).await?)
            }
            (&Method::GET, ["routes"]) => {
                let params = query_pairs(query);
                let gateway = params
                    .iter()
                    .find(|(k, _)| k == "gateway_id")
                    .map(|(_, v)| v.as_str());
                let enabled_only = match params.iter().find(|(k, _)| k == "enabled_only") {
                    Some((_, v)) => parse_bool("enabled_only", v)?,
                    None => false,
                };
                json_response(StatusCode::OK, &atlas.list_routes(gateway, enabled_only))
            }
            (&Method::GET, ["routes", id]) => {
                json_response(StatusCode::OK, &atlas.get_route(parse_id(id)?)?)
            }
            (&Method::PUT, ["routes", id]) => {
                let patch: RoutePatch = parse_body(&body)?;
                json_response(
                    StatusCode::OK,
                    &atlas.update_route(parse_id(id)?, patch).await?,
                )
            }
            (&Method::DELETE, ["routes", id]) => {
                atlas.remove_route(parse_id(id)?).await?;
                no_content()
            }
            (&Method::GET, ["gateway", "routes"]) => {
                let gateway = headers
                    .get(GATEWAY_ID_HEADER)
                    .and_then(|v| v.to_str().ok())
                    .map(str::trim)
                    .filter(|v| !v.is_empty())
                    .ok_or_else(|| {
                        Error::InvalidRequest("missing X-Gateway-ID header".to_string())
                    })?;
                json_response(StatusCode::OK, &atlas.gateway_routes(gateway)?)
            }

            // monitoring
            (&Method::GET, ["monitor", "overview"]) => {
                json_response(StatusCode::OK, &atlas.overview())
            }
            (&Method::POST, ["monitor", "health-check"]) => {
                let summary = atlas.trigger_health_check().await;
                json_response(
                    StatusCode::OK,
                    &serde_json::json!({
                        "message": "health check completed",
                        "result": summary,
                    }),
                )
            }

            _ => Err(Error::NotFound(format!("no endpoint {method} {path}"))),
        }
    }
}

fn parse_body<T: DeserializeOwned>(body: &Bytes) -> Result<T> {
    serde_json::from_slice(body)
        .map_err(|e| Error::InvalidRequest(format!("invalid request body: {e}")))
}

fn parse_id(raw: &str) -> Result<u64> {
    raw.parse()
        .map_err(|_| Error::InvalidRequest(format!("invalid id '{raw}'")))
}

fn parse_bool(name: &str, raw: &str) -> Result<bool> {
    match raw {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        _ => Err(Error::InvalidRequest(format!("invalid {name} '{raw}'"))),
    }
}

fn query_pairs(query: Option<&str>) -> Vec<(String, String)> {
    query
        .map(|q| url::form_urlencoded::parse(q.as_bytes()).into_owned().collect())
        .unwrap_or_default()
}

fn service_filter(query: Option<&str>) -> Result<ServiceFilter> {
    let mut filter = ServiceFilter::default();
    for (key, value) in query_pairs(query) {
        match key.as_str() {
            "status" => {
                let status: HealthStatus = value
                    .parse()
                    .map_err(|_| Error::InvalidRequest(format!("invalid status '{value}'")))?;
                filter.status = Some(status);
            }
            "is_gateway" => filter.is_gateway = Some(parse_bool("is_gateway", &value)?),
            _ => {}
        }
    }
    Ok(filter)
}

/// Create a JSON response
pub fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Result<Response<ProxyBody>> {
    let json = serde_json::to_vec(body)?;

    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "application/json")
        .body(full(json))
        .map_err(|e| Error::Internal(format!("Failed to build response: {e}")))
}

fn no_content() -> Result<Response<ProxyBody>> {
    let mut response = Response::new(empty());
    *response.status_mut() = StatusCode::NO_CONTENT;
    Ok(response)
}
