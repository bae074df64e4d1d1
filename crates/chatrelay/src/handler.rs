use futures::FutureExt;
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{error, info};

use crate::error::ChatError;
use crate::events::EventStream;
use crate::router::{ChatRouter, InboundRequest, RequestEnvelope};

type RouterFactory = Box<dyn Fn() -> BoxFuture<'static, Result<ChatRouter, ChatError>> + Send + Sync>;

/// What the transport should do with a request.
pub enum HandlerOutcome {
    /// CORS preflight: acknowledge without touching the chat stack.
    Preflight,
    Stream(EventStream),
    Rejected(ChatError),
}

impl std::fmt::Debug for HandlerOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HandlerOutcome::Preflight => f.write_str("Preflight"),
            HandlerOutcome::Stream(_) => f.write_str("Stream(..)"),
            HandlerOutcome::Rejected(e) => f.debug_tuple("Rejected").field(e).finish(),
        }
    }
}

/// Entry point for inbound requests. Owns the chat router, built on first use and shared after.
pub struct StreamHandler {
    router: OnceCell<Arc<ChatRouter>>,
    factory: RouterFactory,
}

impl StreamHandler {
    pub fn new<F, Fut>(factory: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ChatRouter, ChatError>> + Send + 'static,
    {
        Self {
            router: OnceCell::new(),
            factory: Box::new(move || factory().boxed()),
        }
    }

    /// A handler around an already-built router.
    pub fn with_router(router: ChatRouter) -> Self {
        Self {
            router: OnceCell::new_with(Some(Arc::new(router))),
            factory: Box::new(|| {
                async { Err(ChatError::Internal("router already built".into())) }.boxed()
            }),
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.router.initialized()
    }

    /// Returns the shared router, building it if needed. A failed build is retried on the
    /// next call.
    pub async fn router(&self) -> Result<Arc<ChatRouter>, ChatError> {
        self.router
            .get_or_try_init(|| async {
                info!("building chat router");
                (self.factory)().await.map(Arc::new).map_err(|e| {
                    error!(error = %e, "failed to build chat router");
                    e
                })
            })
            .await
            .cloned()
    }

    pub async fn handle(&self, request: InboundRequest) -> HandlerOutcome {
        if request.is_preflight() {
            return HandlerOutcome::Preflight;
        }
        let router = match self.router().await {
            Ok(router) => router,
            Err(e) => return HandlerOutcome::Rejected(e),
        };
        match router.route(&request) {
            Ok(events) => HandlerOutcome::Stream(events),
            Err(e) => {
                info!(
                    method = %request.method,
                    path = %request.path,
                    status = e.status_code(),
                    error = %e,
                    "request rejected"
                );
                HandlerOutcome::Rejected(e)
            }
        }
    }

    /// Like [`StreamHandler::handle`], starting from a raw gateway envelope.
    pub async fn handle_envelope(&self, envelope: RequestEnvelope) -> HandlerOutcome {
        if envelope.method().eq_ignore_ascii_case("OPTIONS") {
            return HandlerOutcome::Preflight;
        }
        match envelope.into_request() {
            Ok(request) => self.handle(request).await,
            Err(e) => HandlerOutcome::Rejected(e),
        }
    }
}
