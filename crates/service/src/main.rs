use anyhow::Result;
use chatrelay::{
    ChatEngine, ChatEngineConfig, ChatError, ChatRouter, ChatSecrets, ClaimsAuthExtractor,
    GenerationPolicy, StreamHandler,
    config::DEFAULT_MODEL,
    mcp::HttpProviderConnector,
    providers::{AnthropicProvider, anthropic::DEFAULT_BASE_URL},
};
use clap::Parser;
use std::{path::PathBuf, sync::Arc, time::Duration};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod app;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about)]
struct Args {
    /// Address to bind the service to
    #[arg(long, env = "CHAT_ADDR", default_value = "0.0.0.0:8080")]
    addr: String,
    /// Deployment environment; `production` hides the diagnostic tool
    #[arg(long, env = "ENVIRONMENT", default_value = "development")]
    environment: String,
    #[arg(long, env = "CHAT_MODEL", default_value = DEFAULT_MODEL)]
    model: String,
    /// Secrets document (JSON) holding the tool provider configuration
    #[arg(long, env = "CHAT_SECRETS", hide_env_values = true)]
    secrets: Option<String>,
    /// Path to the secrets document, used when --secrets is not given
    #[arg(long, env = "CHAT_SECRETS_FILE")]
    secrets_file: Option<PathBuf>,
    #[arg(long, env = "ANTHROPIC_API_KEY", hide_env_values = true)]
    anthropic_api_key: Option<String>,
    #[arg(long, env = "ANTHROPIC_BASE_URL", default_value = DEFAULT_BASE_URL)]
    anthropic_base_url: String,
    #[arg(long, default_value_t = 10)]
    max_steps: u32,
    #[arg(long, default_value_t = 4096)]
    max_output_tokens: u32,
    /// Extended thinking budget; 0 disables thinking
    #[arg(long, default_value_t = 2048)]
    reasoning_budget: u32,
    #[arg(long, default_value_t = 5000)]
    context_timeout_ms: u64,
    /// Take the caller identity from bearer token payloads without verifying signatures.
    /// Only enable behind a gateway that has already verified the token.
    #[arg(long, env = "CHAT_TRUST_BEARER_PAYLOAD")]
    trust_bearer_payload: bool,
}

impl Args {
    async fn load_secrets(&self) -> Result<ChatSecrets, ChatError> {
        let raw = match (&self.secrets, &self.secrets_file) {
            (Some(inline), _) => inline.clone(),
            (None, Some(path)) => tokio::fs::read_to_string(path).await.map_err(|e| {
                ChatError::Internal(format!(
                    "Failed to read secrets from {}: {e}",
                    path.display()
                ))
            })?,
            (None, None) => return Ok(ChatSecrets::default()),
        };
        Ok(ChatSecrets::parse(&raw))
    }

    fn auth_extractor(&self) -> ClaimsAuthExtractor {
        if self.trust_bearer_payload {
            ClaimsAuthExtractor::trusting_bearer_payload()
        } else {
            ClaimsAuthExtractor::new()
        }
    }

    fn engine_config(&self, secrets: &ChatSecrets) -> ChatEngineConfig {
        ChatEngineConfig {
            tool_providers: secrets.tool_providers(),
            model: self.model.clone(),
            is_production: self.environment == "production",
            policy: GenerationPolicy {
                max_steps: self.max_steps,
                max_output_tokens: self.max_output_tokens,
                reasoning_budget_tokens: (self.reasoning_budget > 0)
                    .then_some(self.reasoning_budget),
            },
            context_timeout: Duration::from_millis(self.context_timeout_ms),
        }
    }
}

async fn build_router(args: Arc<Args>) -> Result<ChatRouter, ChatError> {
    let secrets = args.load_secrets().await?;
    let config = args.engine_config(&secrets);

    let provider = AnthropicProvider::new(
        args.anthropic_api_key.clone().unwrap_or_default(),
        config.model.clone(),
    )
    .and_then(|p| p.with_base_url(&args.anthropic_base_url))
    .map_err(|e| ChatError::Internal(format!("Failed to create model backend: {e}")))?;

    let engine = ChatEngine::initialize(
        &config,
        Arc::new(provider),
        &HttpProviderConnector::new(),
        None,
    )
    .await;

    Ok(ChatRouter::new(
        Arc::new(engine),
        Arc::new(args.auth_extractor()),
    ))
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("chatrelay=info,chatrelay_service=info,tower_http=info")
    });
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    let args = Arc::new(Args::parse());

    info!(
        addr = %args.addr,
        environment = %args.environment,
        model = %args.model,
        secrets = if args.secrets.is_some() {
            "inline"
        } else if args.secrets_file.is_some() {
            "file"
        } else {
            "none"
        },
        "starting service"
    );
    if args.trust_bearer_payload {
        warn!("bearer token payloads are trusted without signature verification");
    } else {
        info!("only authorizer-forwarded claims identify callers");
    }

    let handler = {
        let args = args.clone();
        StreamHandler::new(move || build_router(args.clone()))
    };
    let app = app::build_app(Arc::new(handler));

    let listener = tokio::net::TcpListener::bind(&args.addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
