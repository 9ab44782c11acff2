//! Hop-by-hop header handling

use http::header::{self, HeaderMap, HeaderName};

const KEEP_ALIVE: &str = "keep-alive";
const PROXY_CONNECTION: &str = "proxy-connection";

/// Whether `name` describes a single connection and never crosses the proxy
pub fn is_hop_by_hop(name: &HeaderName) -> bool {
    *name == header::CONNECTION
        || *name == header::CONTENT_LENGTH
        || *name == header::HOST
        || *name == header::PROXY_AUTHENTICATE
        || *name == header::PROXY_AUTHORIZATION
        || *name == header::TE
        || *name == header::TRAILER
        || *name == header::TRANSFER_ENCODING
        || *name == header::UPGRADE
        || name.as_str() == KEEP_ALIVE
        || name.as_str() == PROXY_CONNECTION
}

/// Copy `headers` minus hop-by-hop ones, including any named in `Connection`.
///
/// `Content-Length` is dropped too; the client recomputes it from the body.
pub fn filter_request_headers(headers: &HeaderMap) -> HeaderMap {
    strip(headers, true)
}

/// Copy upstream response headers minus connection-level ones.
///
/// `Content-Length` is kept so the caller sees the upstream's framing.
pub fn filter_response_headers(headers: &HeaderMap) -> HeaderMap {
    strip(headers, false)
}

fn strip(headers: &HeaderMap, drop_length: bool) -> HeaderMap {
    let named: Vec<String> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|v| v.trim().to_ascii_lowercase())
        .filter(|v| !v.is_empty())
        .collect();

    let mut out = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        if *name == header::CONTENT_LENGTH {
            if drop_length {
                continue;
            }
        } else if is_hop_by_hop(name) {
            continue;
        }
        if named.iter().any(|n| n == name.as_str()) {
            continue;
        }
        out.append(name.clone(), value.clone());
    }
    out
}
