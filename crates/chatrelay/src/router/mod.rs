//! Request routing: method check, body validation, auth, then path dispatch.

use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::auth::{AuthContext, AuthExtractor};
use crate::chat::ChatMessage;
use crate::error::ChatError;
use crate::events::EventStream;

pub mod envelope;
pub mod pattern;

pub use envelope::{InboundRequest, RequestEnvelope};
pub use pattern::{RouteMatch, RouteTemplate};

pub const GENERIC_ROUTE: &str = "/chat/v1/stream";
pub const SESSION_ROUTE: &str = "/chat/v1/sessions/{sessionId}/stream";

/// The narrow surface the router dispatches to.
pub trait ChatController: Send + Sync {
    fn stream_chat(&self, auth: &AuthContext, messages: &[ChatMessage]) -> EventStream;

    fn stream_session_chat(
        &self,
        session_id: &str,
        auth: &AuthContext,
        messages: &[ChatMessage],
    ) -> EventStream;
}

#[derive(Debug, Deserialize)]
struct ChatStreamBody {
    #[serde(default)]
    messages: Vec<ChatMessage>,
}

fn parse_body(body: Option<&str>) -> Result<Vec<ChatMessage>, ChatError> {
    let raw = body.filter(|b| !b.trim().is_empty()).unwrap_or("{}");
    let value: serde_json::Value = serde_json::from_str(raw)
        .map_err(|e| ChatError::InvalidArguments(format!("Invalid JSON body: {e}")))?;
    let body: ChatStreamBody = serde_json::from_value(value)
        .map_err(|e| ChatError::InvalidArguments(format!("Invalid request body: {e}")))?;
    if body.messages.is_empty() {
        return Err(ChatError::InvalidArguments(
            "messages must contain at least one message".to_string(),
        ));
    }
    Ok(body.messages)
}

pub struct ChatRouter {
    controller: Arc<dyn ChatController>,
    auth: Arc<dyn AuthExtractor>,
    generic: RouteTemplate,
    session: RouteTemplate,
}

impl ChatRouter {
    pub fn new(controller: Arc<dyn ChatController>, auth: Arc<dyn AuthExtractor>) -> Self {
        Self {
            controller,
            auth,
            generic: RouteTemplate::new(GENERIC_ROUTE),
            session: RouteTemplate::new(SESSION_ROUTE),
        }
    }

    /// Validates and dispatches one request. All failures happen before any stream exists.
    pub fn route(&self, request: &InboundRequest) -> Result<EventStream, ChatError> {
        if request.method != "POST" {
            return Err(ChatError::InvalidArguments(format!(
                "Method {} not allowed",
                request.method
            )));
        }

        let messages = parse_body(request.body.as_deref())?;
        let auth = self.auth.extract(request)?;

        if let Some(found) = self.session.matches(&request.path) {
            let raw = found.param("sessionId").unwrap_or_default();
            let session_id = urlencoding::decode(raw)
                .map_err(|e| ChatError::InvalidArguments(format!("Invalid session id: {e}")))?;
            debug!(path = %request.path, session_id = %session_id, "session chat route");
            return Ok(self
                .controller
                .stream_session_chat(&session_id, &auth, &messages));
        }

        if self.generic.matches(&request.path).is_some() {
            debug!(path = %request.path, "generic chat route");
            return Ok(self.controller.stream_chat(&auth, &messages));
        }

        warn!(method = %request.method, path = %request.path, "no route matched");
        Err(ChatError::NotFound(format!(
            "Route not found: {} {}",
            request.method, request.path
        )))
    }
}

impl std::fmt::Debug for ChatRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatRouter")
            .field("generic", &self.generic)
            .field("session", &self.session)
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::events::StreamEvent;
    use std::sync::Mutex;

    /// One dispatched call: `(session_id, user_id, message_count)`.
    pub type Dispatch = (Option<String>, String, usize);

    /// Controller that records dispatches and replays a fixed event list.
    #[derive(Default)]
    pub struct RecordingController {
        pub dispatched: Mutex<Vec<Dispatch>>,
        pub events: Vec<StreamEvent>,
    }

    impl RecordingController {
        fn replay(&self) -> EventStream {
            Box::pin(futures::stream::iter(self.events.clone()))
        }
    }

    impl ChatController for RecordingController {
        fn stream_chat(&self, auth: &AuthContext, messages: &[ChatMessage]) -> EventStream {
            self.dispatched
                .lock()
                .unwrap()
                .push((None, auth.user_id.clone(), messages.len()));
            self.replay()
        }

        fn stream_session_chat(
            &self,
            session_id: &str,
            auth: &AuthContext,
            messages: &[ChatMessage],
        ) -> EventStream {
            self.dispatched.lock().unwrap().push((
                Some(session_id.to_string()),
                auth.user_id.clone(),
                messages.len(),
            ));
            self.replay()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::RecordingController;
    use super::*;
    use crate::auth::ClaimsAuthExtractor;
    use crate::auth::test_support::{StaticAuth, user};
    use serde_json::json;

    const BODY: &str = r#"{"messages":[{"role":"user","parts":[{"type":"text","text":"hi"}]}]}"#;

    fn setup() -> (Arc<RecordingController>, ChatRouter) {
        let controller = Arc::new(RecordingController::default());
        let router = ChatRouter::new(controller.clone(), Arc::new(StaticAuth(user("u-1"))));
        (controller, router)
    }

    fn post(path: &str, body: &str) -> InboundRequest {
        InboundRequest::new("POST", path).with_body(body)
    }

    #[test]
    fn generic_route_dispatches_to_stream_chat() {
        let (controller, router) = setup();
        assert!(router.route(&post("/chat/v1/stream", BODY)).is_ok());
        assert_eq!(
            controller.dispatched.lock().unwrap().as_slice(),
            [(None, "u-1".to_string(), 1)]
        );
    }

    #[test]
    fn session_id_is_url_decoded() {
        let (controller, router) = setup();
        assert!(router
            .route(&post("/chat/v1/sessions/abc%20123/stream", BODY))
            .is_ok());
        assert_eq!(
            controller.dispatched.lock().unwrap()[0].0.as_deref(),
            Some("abc 123")
        );
    }

    #[test]
    fn non_post_is_rejected_before_anything_else() {
        let (controller, router) = setup();
        let err = router
            .route(&InboundRequest::new("GET", "/nowhere"))
            .err()
            .unwrap();
        assert!(matches!(err, ChatError::InvalidArguments(m) if m.contains("GET")));
        assert!(controller.dispatched.lock().unwrap().is_empty());
    }

    #[test]
    fn body_validation() {
        let (_, router) = setup();
        for body in ["", "{}", r#"{"messages": []}"#, "not json", r#"{"messages": "x"}"#] {
            let err = router.route(&post("/chat/v1/stream", body)).err().unwrap();
            assert!(matches!(err, ChatError::InvalidArguments(_)), "body {body:?}");
        }
        let err = router
            .route(&InboundRequest::new("POST", "/chat/v1/stream"))
            .err()
            .unwrap();
        assert_eq!(
            err,
            ChatError::InvalidArguments("messages must contain at least one message".into())
        );
    }

    #[test]
    fn unknown_path_is_not_found() {
        let (_, router) = setup();
        let err = router.route(&post("/chat/v2/stream", BODY)).err().unwrap();
        assert_eq!(err.status_code(), 404);
    }

    #[test]
    fn missing_identity_is_unauthorized() {
        let controller = Arc::new(RecordingController::default());
        let router = ChatRouter::new(controller.clone(), Arc::new(ClaimsAuthExtractor::new()));
        let err = router.route(&post("/chat/v1/stream", BODY)).err().unwrap();
        assert_eq!(err.status_code(), 401);

        let claims = json!({"sub": "u-9"}).as_object().cloned().unwrap();
        assert!(router
            .route(&post("/chat/v1/stream", BODY).with_claims(claims))
            .is_ok());
        assert_eq!(controller.dispatched.lock().unwrap()[0].1, "u-9");
    }

    #[test]
    fn invalid_percent_encoding_is_invalid_arguments() {
        let (_, router) = setup();
        let err = router
            .route(&post("/chat/v1/sessions/%FF%FE/stream", BODY))
            .err()
            .unwrap();
        assert!(matches!(err, ChatError::InvalidArguments(m) if m.starts_with("Invalid session id")));
    }
}
