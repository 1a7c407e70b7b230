//! `/api` routes.
//!
//! - `GET  /api/health`             : liveness plus deployment labels
//! - `POST /api/agent`              : run the tool-calling loop on a message list
//! - `POST /api/log_assessment`     : attach user feedback to a trace
//! - `POST /api/invoke_endpoint`    : one direct model call, no tools
//! - `GET  /api/traces/{trace_id}`  : recorded rounds and feedback
//! - `GET  /api/tracing_experiment` : experiment id and link for the UI

use axum::{
    Router,
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use servechat_core::error::ProviderError;
use servechat_core::message::Conversation;
use servechat_core::provider::{FinishReason, ModelConfig, ModelResponse, ProviderRequest};
use servechat_providers::wire::{WireMessage, WireResponse, decode_messages, encode_response};
use servechat_telemetry::{Rating, TraceRecord};

use crate::SharedApiState;

/// Feedback name used when the UI sends thumbs up/down.
pub const DEFAULT_ASSESSMENT_NAME: &str = "user_feedback";

// ── Router ────────────────────────────────────────────────────────────────

/// Build the API router. Nest this under "/api" in the main router.
pub fn api_router(state: SharedApiState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/agent", post(agent_handler))
        .route("/log_assessment", post(log_assessment_handler))
        .route("/invoke_endpoint", post(invoke_endpoint_handler))
        .route("/traces/{trace_id}", get(get_trace_handler))
        .route("/tracing_experiment", get(experiment_handler))
        .with_state(state)
}

// ── Request / Response types ──────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub experiment_id: Option<String>,
    pub environment: String,
    pub uptime_seconds: i64,
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
}

/// Body of `POST /api/agent`.
///
/// Accepts `{"messages": [...]}` or the nested `{"inputs": {"messages": [...]}}`
/// form the chat UI sends.
#[derive(Debug, Deserialize)]
pub struct AgentRequest {
    #[serde(default)]
    pub messages: Vec<WireMessage>,
    #[serde(default)]
    pub inputs: Option<AgentInputs>,
}

#[derive(Debug, Deserialize)]
pub struct AgentInputs {
    #[serde(default)]
    pub messages: Vec<WireMessage>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AgentResponse {
    /// Chat-completion shaped reply
    pub response: WireResponse,
    pub trace_id: String,
}

#[derive(Debug, Deserialize)]
pub struct AssessmentRequest {
    pub trace_id: String,
    #[serde(default = "default_assessment_name")]
    pub assessment_name: String,
    /// String, number, or boolean
    pub assessment_value: Rating,
    #[serde(default)]
    pub comment: Option<String>,
}

fn default_assessment_name() -> String {
    DEFAULT_ASSESSMENT_NAME.into()
}

#[derive(Debug, Deserialize)]
pub struct InvokeEndpointRequest {
    pub endpoint_name: String,
    pub messages: Vec<WireMessage>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ExperimentInfo {
    pub experiment_id: Option<String>,
    pub link: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn bad_request(error: impl Into<String>) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error: error.into(),
        }),
    )
}

fn provider_status(e: &ProviderError) -> StatusCode {
    match e {
        ProviderError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        ProviderError::NotConfigured(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::BAD_GATEWAY,
    }
}

// ── Handlers ──────────────────────────────────────────────────────────────

async fn health_handler(State(state): State<SharedApiState>) -> Json<HealthResponse> {
    let now = chrono::Utc::now();
    Json(HealthResponse {
        status: "healthy".into(),
        version: env!("CARGO_PKG_VERSION").into(),
        experiment_id: state.config.telemetry.experiment_id.clone(),
        environment: state.config.gateway.environment.clone(),
        uptime_seconds: (now - state.started_at).num_seconds(),
        timestamp: now.timestamp_millis(),
    })
}

async fn agent_handler(
    State(state): State<SharedApiState>,
    Json(payload): Json<AgentRequest>,
) -> Result<Json<AgentResponse>, ApiError> {
    let wire_messages = match payload.inputs {
        Some(inputs) => inputs.messages,
        None => payload.messages,
    };
    let messages = decode_messages(&wire_messages).map_err(bad_request)?;
    let mut conversation = Conversation::from_messages(messages);

    let Some(user_text) = conversation.last_user_text() else {
        return Err(bad_request("messages must contain at least one user turn"));
    };
    let preview: String = user_text.chars().take(100).collect();
    let trace_id = Uuid::new_v4().to_string();
    info!(trace_id = %trace_id, turns = conversation.len(), preview = %preview, "Agent request received");

    let mut reply = match state
        .tool_loop
        .run_traced(&mut conversation, &trace_id, None)
        .await
    {
        Ok(result) => {
            info!(
                trace_id = %trace_id,
                iterations = result.iterations_used,
                total_tokens = result.usage_total.total_tokens,
                "Agent response generated"
            );
            ModelResponse::text(result.final_content.unwrap_or_default())
                .with_usage(result.usage_total)
        }
        Err(e) => {
            warn!(trace_id = %trace_id, error = %e, "Agent request failed");
            let mut reply = ModelResponse::text(e.user_message());
            reply.finish_reason = FinishReason::Error;
            reply
        }
    };
    reply.model = state.tool_loop.model().model_name.clone();

    Ok(Json(AgentResponse {
        response: encode_response(&format!("chatcmpl-{trace_id}"), &reply),
        trace_id,
    }))
}

async fn log_assessment_handler(
    State(state): State<SharedApiState>,
    Json(payload): Json<AssessmentRequest>,
) -> Json<StatusResponse> {
    info!(
        trace_id = %payload.trace_id,
        name = %payload.assessment_name,
        value = %payload.assessment_value,
        "User feedback"
    );
    if !state.traces.contains(&payload.trace_id) {
        warn!(trace_id = %payload.trace_id, "Feedback for a trace this server has not seen");
    }

    state.logger.record_feedback(
        &payload.trace_id,
        &payload.assessment_name,
        payload.assessment_value,
        payload.comment,
    );

    Json(StatusResponse {
        status: "success".into(),
    })
}

async fn invoke_endpoint_handler(
    State(state): State<SharedApiState>,
    Json(payload): Json<InvokeEndpointRequest>,
) -> Result<Json<WireResponse>, ApiError> {
    let messages = decode_messages(&payload.messages).map_err(bad_request)?;
    let model = ModelConfig {
        model_name: payload.endpoint_name,
        ..state.tool_loop.model().clone()
    };
    info!(endpoint = %model.model_name, turns = messages.len(), "Direct endpoint call");

    let request = ProviderRequest::new(&model, messages, Vec::new());
    let outcome = match tokio::time::timeout(model.timeout(), state.provider.complete(request)).await
    {
        Ok(outcome) => outcome,
        Err(_) => Err(ProviderError::Timeout(format!(
            "no reply within {}s",
            model.timeout_seconds
        ))),
    };

    match outcome {
        Ok(response) => {
            let id = format!("chatcmpl-{}", Uuid::new_v4().simple());
            Ok(Json(encode_response(&id, &response)))
        }
        Err(e) => {
            warn!(endpoint = %model.model_name, error = %e, "Direct endpoint call failed");
            Err((
                provider_status(&e),
                Json(ErrorResponse {
                    error: e.to_string(),
                }),
            ))
        }
    }
}

async fn get_trace_handler(
    State(state): State<SharedApiState>,
    Path(trace_id): Path<String>,
) -> Result<Json<TraceRecord>, StatusCode> {
    state
        .traces
        .get_trace(&trace_id)
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

async fn experiment_handler(State(state): State<SharedApiState>) -> Json<ExperimentInfo> {
    Json(ExperimentInfo {
        experiment_id: state.config.telemetry.experiment_id.clone(),
        link: state.config.telemetry.experiment_link(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ApiState;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use serde_json::{Value, json};
    use servechat_config::{AppConfig, CatalogConfig, SchemaConfig, TableConfig};
    use servechat_core::message::ToolCallRequest;
    use servechat_core::provider::{Provider, Usage};
    use servechat_telemetry::OutcomeStatus;
    use servechat_tools::Catalog;
    use std::sync::{Arc, Mutex};
    use tower::ServiceExt;

    /// Replays scripted outcomes; the last one repeats.
    struct MockProvider {
        script: Vec<Result<ModelResponse, ProviderError>>,
        requests: Mutex<Vec<ProviderRequest>>,
    }

    impl MockProvider {
        fn new(script: Vec<Result<ModelResponse, ProviderError>>) -> Self {
            Self {
                script,
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait::async_trait]
    impl Provider for MockProvider {
        fn name(&self) -> &str {
            "gateway_mock"
        }

        async fn complete(&self, request: ProviderRequest) -> Result<ModelResponse, ProviderError> {
            let mut requests = self.requests.lock().unwrap();
            requests.push(request);
            let index = (requests.len() - 1).min(self.script.len() - 1);
            self.script[index].clone()
        }
    }

    fn usage() -> Usage {
        Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        }
    }

    fn test_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.telemetry.experiment_id = Some("1234".into());
        config.telemetry.tracking_url = Some("https://example.cloud.databricks.com".into());
        config.agent.max_retries = 0;
        config.catalog = vec![CatalogConfig {
            name: "main".into(),
            schemas: vec![SchemaConfig {
                name: "sales".into(),
                tables: vec![TableConfig {
                    name: "orders".into(),
                    table_type: "MANAGED".into(),
                }],
                volumes: vec![],
            }],
        }];
        config
    }

    fn test_state(script: Vec<Result<ModelResponse, ProviderError>>) -> (SharedApiState, Arc<MockProvider>) {
        let config = test_config();
        let provider = Arc::new(MockProvider::new(script));
        let catalog = Arc::new(Catalog::new(config.catalog.clone()));
        let tools = Arc::new(servechat_tools::default_registry(catalog).unwrap());
        let state = Arc::new(ApiState::new(config, provider.clone(), tools));
        (state, provider)
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let body = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn health_reports_labels() {
        let (state, _) = test_state(vec![Ok(ModelResponse::text("unused"))]);
        let response = api_router(state).oneshot(get("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json = body_json(response).await;
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["experiment_id"], "1234");
        assert_eq!(json["environment"], "development");
    }

    #[tokio::test]
    async fn agent_runs_tools_and_records_trace() {
        let (state, provider) = test_state(vec![
            Ok(ModelResponse::tool_calls(vec![ToolCallRequest::new(
                "call_1",
                "list_tables",
                json!({"catalog_name": "main", "schema_name": "sales"}),
            )])
            .with_usage(usage())),
            Ok(ModelResponse::text("main.sales has one table: orders.").with_usage(usage())),
        ]);

        let response = api_router(state.clone())
            .oneshot(post_json(
                "/agent",
                json!({"inputs": {"messages": [{"role": "user", "content": "What tables are in main.sales?"}]}}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json: AgentResponse = serde_json::from_value(body_json(response).await).unwrap();
        let choice = &json.response.choices[0];
        assert_eq!(choice.message.content, Some(json!("main.sales has one table: orders.")));
        assert_eq!(choice.finish_reason.as_deref(), Some("stop"));
        assert_eq!(json.response.usage.unwrap().total_tokens, 30);

        // The tool result reached the model on the second call
        let requests = provider.requests.lock().unwrap();
        assert_eq!(requests.len(), 2);
        let tool_turn = requests[1].messages.last().unwrap();
        assert_eq!(tool_turn.text(), "Tables in main.sales: orders (MANAGED)");

        let trace = state.traces.get_trace(&json.trace_id).unwrap();
        assert_eq!(trace.rounds.len(), 2);
        assert_eq!(trace.experiment_id.as_deref(), Some("1234"));
        assert_eq!(trace.outcome.unwrap().status, OutcomeStatus::Complete);
    }

    #[tokio::test]
    async fn agent_failure_becomes_error_message() {
        let (state, _) = test_state(vec![Err(ProviderError::Network("connection refused".into()))]);

        let response = api_router(state)
            .oneshot(post_json(
                "/agent",
                json!({"messages": [{"role": "user", "content": "hello"}]}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json = body_json(response).await;
        let choice = &json["response"]["choices"][0];
        assert_eq!(choice["finish_reason"], "error");
        assert_eq!(choice["message"]["role"], "assistant");
        assert!(choice["message"]["content"].as_str().unwrap().contains("unavailable"));
    }

    #[tokio::test]
    async fn agent_rejects_missing_user_turn() {
        let (state, _) = test_state(vec![Ok(ModelResponse::text("unused"))]);
        let response = api_router(state)
            .oneshot(post_json("/agent", json!({"messages": []})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn log_assessment_attaches_feedback() {
        let (state, _) = test_state(vec![Ok(ModelResponse::text("hi").with_usage(usage()))]);
        let app = api_router(state.clone());

        let response = app
            .clone()
            .oneshot(post_json("/agent", json!({"messages": [{"role": "user", "content": "hi"}]})))
            .await
            .unwrap();
        let trace_id = body_json(response).await["trace_id"].as_str().unwrap().to_string();

        let response = app
            .clone()
            .oneshot(post_json(
                "/log_assessment",
                json!({"trace_id": trace_id, "assessment_name": "user_feedback", "assessment_value": true}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "success");

        let response = app.oneshot(get(&format!("/traces/{trace_id}"))).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["feedback"][0]["rating"], true);
        assert_eq!(json["rounds"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn feedback_for_unknown_trace_still_records() {
        let (state, _) = test_state(vec![Ok(ModelResponse::text("unused"))]);
        let response = api_router(state.clone())
            .oneshot(post_json(
                "/log_assessment",
                json!({"trace_id": "tr-elsewhere", "assessment_name": "rating", "assessment_value": 4}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let trace = state.traces.get_trace("tr-elsewhere").unwrap();
        assert_eq!(trace.feedback[0].rating, Rating::Score(4.0));
    }

    #[tokio::test]
    async fn unknown_trace_is_404() {
        let (state, _) = test_state(vec![Ok(ModelResponse::text("unused"))]);
        let response = api_router(state).oneshot(get("/traces/nope")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn invoke_endpoint_uses_requested_model_without_tools() {
        let (state, provider) = test_state(vec![Ok(ModelResponse::text("direct reply").with_usage(usage()))]);

        let response = api_router(state)
            .oneshot(post_json(
                "/invoke_endpoint",
                json!({"endpoint_name": "databricks-llama-4", "messages": [{"role": "user", "content": "hi"}]}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json = body_json(response).await;
        assert_eq!(json["object"], "chat.completion");
        assert_eq!(json["choices"][0]["message"]["content"], "direct reply");

        let requests = provider.requests.lock().unwrap();
        assert_eq!(requests[0].model, "databricks-llama-4");
        assert!(requests[0].tools.is_empty());
    }

    #[tokio::test]
    async fn invoke_endpoint_maps_provider_errors() {
        let (state, _) = test_state(vec![Err(ProviderError::AuthenticationFailed("bad token".into()))]);
        let response = api_router(state)
            .oneshot(post_json(
                "/invoke_endpoint",
                json!({"endpoint_name": "x", "messages": [{"role": "user", "content": "hi"}]}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert!(body_json(response).await["error"].as_str().unwrap().contains("bad token"));
    }

    #[tokio::test]
    async fn experiment_link_comes_from_config() {
        let (state, _) = test_state(vec![Ok(ModelResponse::text("unused"))]);
        let response = api_router(state).oneshot(get("/tracing_experiment")).await.unwrap();
        let json = body_json(response).await;
        assert_eq!(json["experiment_id"], "1234");
        assert_eq!(
            json["link"],
            "https://example.cloud.databricks.com/ml/experiments/1234/traces"
        );
    }

    #[tokio::test]
    async fn full_router_nests_under_api() {
        let (state, _) = test_state(vec![Ok(ModelResponse::text("unused"))]);
        let app = crate::build_router(state);

        let response = app.clone().oneshot(get("/api/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app.oneshot(get("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
