use axum::{
    Json, Router,
    body::{Body, Bytes},
    extract::State,
    http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
};
use chatrelay::{
    HandlerOutcome, InboundRequest, StreamHandler,
    transport::{PREFLIGHT_FRAME, SSE_HEADERS, frames},
};
use futures::StreamExt;
use serde_json::json;
use std::{convert::Infallible, sync::Arc};
use tower_http::trace::TraceLayer;
use tracing::warn;

#[derive(Clone)]
pub struct ServerState {
    handler: Arc<StreamHandler>,
}

/// Every path goes through the chat handler; it owns routing.
pub fn build_app(handler: Arc<StreamHandler>) -> Router {
    Router::new()
        .fallback(handle_request)
        .with_state(ServerState { handler })
        .layer(TraceLayer::new_for_http())
}

fn with_headers(mut response: Response, headers: &[(&'static str, &'static str)]) -> Response {
    for &(name, value) in headers {
        response.headers_mut().insert(
            HeaderName::from_static(name),
            HeaderValue::from_static(value),
        );
    }
    response
}

fn rejection(status: StatusCode, message: String) -> Response {
    let cors: Vec<_> = SSE_HEADERS
        .iter()
        .copied()
        .filter(|(name, _)| name.starts_with("access-control-"))
        .collect();
    with_headers(
        (status, Json(json!({ "message": message }))).into_response(),
        &cors,
    )
}

async fn handle_request(
    State(state): State<ServerState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let mut request = InboundRequest::new(method.as_str(), uri.path());
    for (name, value) in &headers {
        if let Ok(value) = value.to_str() {
            request = request.with_header(name.as_str(), value);
        }
    }
    if !body.is_empty() {
        match String::from_utf8(body.to_vec()) {
            Ok(text) => request = request.with_body(text),
            Err(e) => {
                warn!(error = %e, "request body is not valid UTF-8");
                return rejection(StatusCode::BAD_REQUEST, "Body is not valid UTF-8".into());
            }
        }
    }

    match state.handler.handle(request).await {
        HandlerOutcome::Preflight => {
            with_headers(Response::new(Body::from(PREFLIGHT_FRAME)), &SSE_HEADERS)
        }
        HandlerOutcome::Stream(events) => {
            let body = Body::from_stream(frames(events).map(Ok::<_, Infallible>));
            with_headers(Response::new(body), &SSE_HEADERS)
        }
        HandlerOutcome::Rejected(e) => {
            let status = StatusCode::from_u16(e.status_code())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            rejection(status, e.to_string())
        }
    }
}
