//! HTTP API for servechat.
//!
//! Serves the chat UI backend under `/api`: the tool-calling agent, a
//! direct model passthrough, feedback logging, and trace lookup. See
//! [`api`] for the route list.
//!
//! Built on Axum. Layers applied to every route:
//! - permissive CORS (the dev UI runs on another port)
//! - request body size limit (`gateway.max_body_bytes`, 1 MB by default)
//! - HTTP trace logging

pub mod api;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use servechat_agent::ToolLoop;
use servechat_config::AppConfig;
use servechat_core::error::{ProviderError, ToolError};
use servechat_core::provider::Provider;
use servechat_core::tool::ToolRegistry;
use servechat_providers::OpenAiCompatProvider;
use servechat_telemetry::{
    JsonlTraceSink, MemoryTraceStore, TelemetryError, TraceLogger, TracingSink,
};
use servechat_tools::Catalog;

pub use api::api_router;

/// Startup failures for the gateway.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("model endpoint: {0}")]
    Provider(#[from] ProviderError),

    #[error("tool registry: {0}")]
    Tool(#[from] ToolError),

    #[error("trace sink: {0}")]
    Telemetry(#[from] TelemetryError),

    #[error("server: {0}")]
    Io(#[from] std::io::Error),
}

/// Shared, read-only state for all handlers.
///
/// Each request runs its own loop invocation; only the provider, the
/// tool registry (inside the loop), and the trace sinks are shared.
pub struct ApiState {
    pub config: AppConfig,
    pub provider: Arc<dyn Provider>,
    pub tool_loop: Arc<ToolLoop>,
    pub traces: Arc<MemoryTraceStore>,
    pub logger: TraceLogger,
    pub started_at: DateTime<Utc>,
}

pub type SharedApiState = Arc<ApiState>;

impl ApiState {
    /// State with an in-memory trace store as the only sink.
    pub fn new(config: AppConfig, provider: Arc<dyn Provider>, tools: Arc<ToolRegistry>) -> Self {
        Self::with_logger(config, provider, tools, TraceLogger::new())
    }

    /// State recording to `logger`'s sinks plus the in-memory trace store.
    pub fn with_logger(
        config: AppConfig,
        provider: Arc<dyn Provider>,
        tools: Arc<ToolRegistry>,
        logger: TraceLogger,
    ) -> Self {
        let traces = Arc::new(
            MemoryTraceStore::new(config.telemetry.max_traces)
                .with_experiment(config.telemetry.experiment_id.clone()),
        );
        let logger = logger.with_sink(traces.clone());
        let tool_loop = ToolLoop::from_config(provider.clone(), tools, &config)
            .with_trace_logger(logger.clone());

        Self {
            config,
            provider,
            tool_loop: Arc::new(tool_loop),
            traces,
            logger,
            started_at: Utc::now(),
        }
    }

    /// Build every subsystem from config: endpoint client, catalog tools,
    /// and the configured trace sinks.
    pub fn from_config(config: AppConfig) -> Result<Self, GatewayError> {
        let provider: Arc<dyn Provider> =
            Arc::new(OpenAiCompatProvider::from_config(&config.endpoint)?);
        let catalog = Arc::new(Catalog::new(config.catalog.clone()));
        let tools = Arc::new(servechat_tools::default_registry(catalog)?);

        let mut logger = TraceLogger::new().with_sink(Arc::new(TracingSink));
        if config.telemetry.enabled {
            let sink = JsonlTraceSink::open(config.telemetry.trace_path())?;
            info!(path = %sink.path().display(), "Recording traces to file");
            logger = logger.with_sink(Arc::new(sink));
        }

        Ok(Self::with_logger(config, provider, tools, logger))
    }
}

/// Build the full router: `/api` routes plus the shared layers.
pub fn build_router(state: SharedApiState) -> Router {
    let max_body = state.config.gateway.max_body_bytes;
    Router::new()
        .nest("/api", api::api_router(state))
        .layer(DefaultBodyLimit::max(max_body))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Start the HTTP server and serve until Ctrl-C.
pub async fn start(config: AppConfig) -> Result<(), GatewayError> {
    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);
    let state = Arc::new(ApiState::from_config(config)?);

    info!(
        addr = %addr,
        provider = state.provider.name(),
        model = %state.tool_loop.model().model_name,
        sinks = ?state.logger.sink_names(),
        "Gateway starting"
    );

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        // No signal handler available; serve until the process is killed
        std::future::pending::<()>().await;
    }
}
