//! Reverse proxy for the domain services.
//!
//! The routing table is static: longest path-prefix wins, the prefix is
//! preserved end-to-end so each downstream sees its own contract path.
//! Bodies stream through unbuffered in both directions. Identity travels as
//! `X-User-Info`, which is stripped from whatever the client sent before we
//! inject our own.

use axum::{
  body::Body,
  extract::{Request, State},
  http::{HeaderMap, HeaderValue, StatusCode},
  response::{IntoResponse, Response},
};
use tracing::{debug, warn};

use opshub_core::middlewares::{CorrelationId, X_CORRELATION_ID, X_USER_INFO};
use opshub_core::{CoreError, Principal};

use crate::config::UpstreamRoute;
use crate::state::AppState;

/// Hop-by-hop headers that must not cross the proxy, plus the credential
/// header (downstream trusts the gateway, not the token).
const STRIPPED_REQUEST_HEADERS: &[&str] = &[
  "host",
  "connection",
  "keep-alive",
  "proxy-authenticate",
  "proxy-authorization",
  "te",
  "trailer",
  "transfer-encoding",
  "upgrade",
  "authorization",
  X_USER_INFO,
];

const STRIPPED_RESPONSE_HEADERS: &[&str] = &[
  "connection",
  "keep-alive",
  "transfer-encoding",
  "trailer",
  "upgrade",
];

/// Longest-prefix resolution over the static table.
pub fn resolve_route<'a>(routes: &'a [UpstreamRoute], path: &str) -> Option<&'a UpstreamRoute> {
  routes
    .iter()
    .filter(|route| {
      path == route.prefix || path.starts_with(&format!("{}/", route.prefix))
    })
    .max_by_key(|route| route.prefix.len())
}

pub async fn proxy_handler(State(state): State<AppState>, req: Request) -> Response {
  let path = req.uri().path().to_string();
  let Some(route) = resolve_route(&state.config.upstreams, &path) else {
    return CoreError::NotFound(format!("no route for {path}")).into_response();
  };

  let path_and_query = req
    .uri()
    .path_and_query()
    .map(|pq| pq.as_str().to_string())
    .unwrap_or(path);
  // Prefix preserved: downstream contracts are anchored at /api/v1/<svc>.
  let target = format!("{}{}", route.url, path_and_query);

  let principal = req.extensions().get::<Principal>().cloned();
  let correlation_id = req
    .extensions()
    .get::<CorrelationId>()
    .map(|c| c.0.clone());
  let service = route.service.clone();

  let method = req.method().clone();
  let mut headers = req.headers().clone();
  for name in STRIPPED_REQUEST_HEADERS {
    headers.remove(*name);
  }
  if let Some(principal) = &principal {
    match HeaderValue::from_str(&principal.to_header_json().to_string()) {
      Ok(value) => {
        headers.insert(X_USER_INFO, value);
      }
      Err(e) => {
        warn!("Failed to encode identity header: {}", e);
        return CoreError::Internal("identity propagation failed".into()).into_response();
      }
    }
  }
  if let Some(correlation_id) = &correlation_id {
    if let Ok(value) = HeaderValue::from_str(correlation_id) {
      headers.insert(X_CORRELATION_ID, value);
    }
  }

  let body_stream = req.into_body().into_data_stream();
  let outbound = state
    .proxy_client
    .request(method, &target)
    .headers(headers)
    .body(reqwest::Body::wrap_stream(body_stream));

  debug!(service = %service, target = %target, "Proxying request");

  let upstream = match outbound.send().await {
    Ok(response) => response,
    Err(e) => {
      warn!(service = %service, "Upstream call failed: {}", e);
      return CoreError::proxy_unavailable(
        service,
        if e.is_timeout() {
          "upstream timed out".to_string()
        } else {
          "upstream unreachable".to_string()
        },
      )
      .into_response();
    }
  };

  let status = upstream.status();
  if status.is_server_error() {
    warn!(service = %service, status = %status, "Upstream returned server error");
    return CoreError::proxy_unavailable(service, format!("upstream returned {status}"))
      .into_response();
  }

  // 4xx and success pass through verbatim, body streamed.
  let mut response_headers = HeaderMap::new();
  for (name, value) in upstream.headers() {
    if !STRIPPED_RESPONSE_HEADERS.contains(&name.as_str()) {
      response_headers.insert(name.clone(), value.clone());
    }
  }

  let mut builder = Response::builder().status(status);
  if let Some(headers_mut) = builder.headers_mut() {
    *headers_mut = response_headers;
  }
  builder
    .body(Body::from_stream(upstream.bytes_stream()))
    .unwrap_or_else(|e| {
      warn!("Failed to assemble proxied response: {}", e);
      StatusCode::BAD_GATEWAY.into_response()
    })
}

#[cfg(test)]
mod tests {
  use super::*;

  fn table() -> Vec<UpstreamRoute> {
    vec![
      UpstreamRoute {
        prefix: "/api/v1/devices".into(),
        service: "devices".into(),
        url: "http://devices:8101".into(),
      },
      UpstreamRoute {
        prefix: "/api/v1/llm".into(),
        service: "llm".into(),
        url: "http://llm:8301".into(),
      },
    ]
  }

  #[test]
  fn longest_prefix_match_resolves_service() {
    let routes = table();
    assert_eq!(
      resolve_route(&routes, "/api/v1/devices/abc/status").unwrap().service,
      "devices"
    );
    assert_eq!(
      resolve_route(&routes, "/api/v1/llm/chat/completions").unwrap().service,
      "llm"
    );
    assert!(resolve_route(&routes, "/api/v1/unknown/x").is_none());
  }

  #[test]
  fn prefix_match_does_not_bleed_across_segments() {
    let routes = vec![UpstreamRoute {
      prefix: "/api/v1/devices".into(),
      service: "devices".into(),
      url: "http://devices:8101".into(),
    }];
    // "/api/v1/devicesX" must not match the devices route.
    assert!(resolve_route(&routes, "/api/v1/devicesX/y").is_none());
    assert!(resolve_route(&routes, "/api/v1/devices").is_some());
  }

  #[test]
  fn credential_headers_are_on_the_strip_list() {
    assert!(STRIPPED_REQUEST_HEADERS.contains(&"authorization"));
    assert!(STRIPPED_REQUEST_HEADERS.contains(&X_USER_INFO));
  }
}
