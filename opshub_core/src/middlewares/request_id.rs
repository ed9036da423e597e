use axum::{
  body::Body,
  extract::Request,
  http::{HeaderValue, StatusCode},
  middleware::Next,
  response::Response,
};
use uuid::Uuid;

pub const X_CORRELATION_ID: &str = "x-correlation-id";

/// The correlation id for the current request, available as an extension.
#[derive(Debug, Clone)]
pub struct CorrelationId(pub String);

/// Ensures every request carries an `X-Correlation-ID`, generating one when
/// the client did not send it, and echoes it on the response.
pub async fn request_id_middleware(mut req: Request<Body>, next: Next) -> Response {
  let id = match req
    .headers()
    .get(X_CORRELATION_ID)
    .and_then(|v| v.to_str().ok())
  {
    Some(existing) if !existing.is_empty() => existing.to_string(),
    _ => {
      let generated = Uuid::new_v4().to_string();
      if let Ok(value) = HeaderValue::from_str(&generated) {
        req.headers_mut().insert(X_CORRELATION_ID, value);
      }
      generated
    }
  };

  req.extensions_mut().insert(CorrelationId(id.clone()));
  let mut res = next.run(req).await;

  if res.status() != StatusCode::CONTINUE {
    if let Ok(value) = HeaderValue::from_str(&id) {
      res.headers_mut().insert(X_CORRELATION_ID, value);
    }
  }
  res
}

#[cfg(test)]
mod tests {
  use super::*;
  use axum::{middleware::from_fn, routing::get, Extension, Router};
  use tower::ServiceExt;

  async fn echo(Extension(CorrelationId(id)): Extension<CorrelationId>) -> String {
    id
  }

  fn app() -> Router {
    Router::new()
      .route("/", get(echo))
      .layer(from_fn(request_id_middleware))
  }

  #[tokio::test]
  async fn generates_an_id_when_absent() {
    let res = app()
      .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
      .await
      .unwrap();
    let header = res.headers().get(X_CORRELATION_ID).unwrap();
    assert!(header.to_str().unwrap().len() >= 32);
  }

  #[tokio::test]
  async fn passes_a_client_id_through() {
    let res = app()
      .oneshot(
        Request::builder()
          .uri("/")
          .header(X_CORRELATION_ID, "corr-abc")
          .body(Body::empty())
          .unwrap(),
      )
      .await
      .unwrap();
    assert_eq!(
      res.headers().get(X_CORRELATION_ID).unwrap().to_str().unwrap(),
      "corr-abc"
    );
  }
}
