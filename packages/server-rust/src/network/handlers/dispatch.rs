//! Fallback handler that feeds every non-health request into the dispatch pipeline.

use axum::body::{to_bytes, Body};
use axum::extract::{Request, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tower::{Service, ServiceExt};
use tracing::{debug, error};
use uuid::Uuid;

use super::AppState;
use crate::network::middleware::REQUEST_ID_HEADER;
use crate::service::{DispatchRequest, DispatchResponse};

/// Largest request body accepted by the dispatch surface.
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

impl IntoResponse for DispatchResponse {
    fn into_response(self) -> Response {
        let mut response = if self.body.is_null() {
            self.status.into_response()
        } else {
            (self.status, Json(self.body)).into_response()
        };
        if let Some(after) = self.retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(after.as_secs()));
        }
        response
    }
}

/// Turns an HTTP request into a [`DispatchRequest`] and runs it through the pipeline.
///
/// The pipeline call runs on its own task. If the client goes away the
/// handler future is dropped, the drop guard cancels the request token,
/// and the dispatcher rolls back before the task ends. The in-flight guard
/// moves into the task so drain waits for that rollback too.
pub async fn dispatch_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    let (parts, body) = request.into_parts();
    let request_id = parts
        .headers
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| Uuid::parse_str(v).ok())
        .unwrap_or_else(Uuid::new_v4);

    let Some(in_flight) = state.shutdown.try_admit() else {
        debug!(%request_id, state = state.shutdown.health_state().as_str(), "request refused");
        return DispatchResponse::overloaded(request_id).into_response();
    };

    let body = match to_bytes(body, MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(err) => {
            debug!(%request_id, error = %err, "could not read request body");
            let body = json!({
                "error": "payload_too_large",
                "message": format!("request body could not be read: {err}"),
            });
            return (StatusCode::PAYLOAD_TOO_LARGE, Json(body)).into_response();
        }
    };

    let cancel = CancellationToken::new();
    let request = DispatchRequest::new(parts.method, parts.uri.path())
        .with_id(request_id)
        .with_headers(parts.headers)
        .with_body(body)
        .with_cancellation(cancel.clone());

    let mut pipeline = state.pipeline.clone();
    let disconnect = cancel.drop_guard();
    let task = tokio::spawn(async move {
        let _in_flight = in_flight;
        pipeline.ready().await?.call(request).await
    });
    let joined = task.await;
    disconnect.disarm();

    match joined {
        Ok(Ok(response)) => response.into_response(),
        Ok(Err(err)) => {
            error!(%request_id, error = %err, "dispatch pipeline failed");
            DispatchResponse::internal_error(request_id, 0).into_response()
        }
        Err(err) => {
            error!(%request_id, error = %err, "dispatch task aborted");
            DispatchResponse::internal_error(request_id, 0).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::Value;

    use super::*;
    use crate::service::Outcome;
    use crate::network::handlers::health::test_support::app_state;

    async fn body_json(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn refuses_requests_until_ready() {
        let state = app_state();
        let request = Request::builder().uri("/items/a").body(Body::empty()).unwrap();

        let response = dispatch_handler(State(state), request).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.headers()[header::RETRY_AFTER], "1");
        assert_eq!(body_json(response).await["error"], "overloaded");
    }

    #[tokio::test]
    async fn unknown_route_maps_to_not_found() {
        let state = app_state();
        state.shutdown.set_ready();
        let request = Request::builder().uri("/nowhere").body(Body::empty()).unwrap();

        let response = dispatch_handler(State(state.clone()), request).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(response).await["error"], "not_found");
        assert_eq!(state.shutdown.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn null_body_renders_empty() {
        let response =
            DispatchResponse::from_outcome(Uuid::new_v4(), Outcome::no_content(), 1).into_response();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(bytes.is_empty());
    }

    #[test]
    fn cancelled_uses_client_closed_status() {
        let response = DispatchResponse::cancelled(Uuid::new_v4(), 1).into_response();
        assert_eq!(response.status().as_u16(), 499);
    }
}
