//! Web模式：开发者界面、REST接口、SSE流式执行和MCP端点

use anyhow::Result;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::Stream;
use futures::stream::unfold;
use serde::Serialize;
use serde_json::{Value, json};
use std::convert::Infallible;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::llm::client::LLMClient;
use crate::resolver::{
    EventReceiver, PipelineEvent, ResolveRequest, Resolver, ResolverContext, event_channel,
};
use crate::types::FixReport;

pub mod mcp;

mod ui;

#[derive(Clone)]
pub struct AppState {
    pub resolver: Resolver,
}

pub fn router(resolver: Resolver) -> Router {
    let state = Arc::new(AppState { resolver });
    Router::new()
        .route("/", get(handle_index))
        .route("/health", get(handle_health))
        .route("/api/sessions", get(handle_list_sessions))
        .route("/api/sessions/:id", get(handle_get_session))
        .route("/api/run", post(handle_run))
        .route("/api/run_sse", post(handle_run_sse))
        .route("/mcp", post(handle_mcp))
        .with_state(state)
}

/// 启动Web服务，Ctrl-C时优雅退出
pub async fn serve(config: &Config) -> Result<()> {
    let client = LLMClient::new(config)?;
    let context = ResolverContext::with_runtime(config.clone(), Arc::new(client))?;
    let app = router(Resolver::new(context));

    let listener = TcpListener::bind(&config.server.bind).await?;
    tracing::info!("🌐 Web服务已启动: http://{}", listener.local_addr()?);
    tracing::info!("  GET  /            开发者界面");
    tracing::info!("  POST /api/run_sse 流式执行");
    tracing::info!("  POST /mcp         MCP JSON-RPC");

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("👋 Web服务已停止");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("❌ 无法监听Ctrl-C: {}", e);
        return;
    }
    tracing::info!("🛑 收到Ctrl-C，正在关闭...");
}

/// 接口错误，统一输出 `{"error": "..."}`
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn internal(e: anyhow::Error) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, format!("{:#}", e))
    }

    /// 上游托管服务的错误原样返回
    fn upstream(e: anyhow::Error) -> Self {
        Self::new(StatusCode::BAD_GATEWAY, format!("{:#}", e))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

async fn handle_index() -> Html<&'static str> {
    Html(ui::INDEX_HTML)
}

async fn handle_health() -> Json<Value> {
    Json(json!({ "status": "ok", "server": env!("CARGO_PKG_NAME") }))
}

async fn handle_list_sessions(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    let context = state.resolver.context();
    let sessions = context
        .sessions
        .list_sessions(&context.config.app_name, &context.config.user_id)
        .await
        .map_err(ApiError::internal)?;
    Ok(Json(sessions).into_response())
}

async fn handle_get_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let context = state.resolver.context();
    let session = context
        .sessions
        .get_session(&context.config.app_name, &context.config.user_id, &id)
        .await
        .map_err(ApiError::internal)?
        .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, format!("Session not found: {}", id)))?;
    Ok(Json(session).into_response())
}

fn validate(request: &ResolveRequest) -> Result<(), ApiError> {
    if request.report.text.trim().is_empty() {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            "Field `text` must not be empty",
        ));
    }
    Ok(())
}

async fn handle_run(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ResolveRequest>,
) -> Result<Json<FixReport>, ApiError> {
    validate(&request)?;
    let report = state
        .resolver
        .run(request, None)
        .await
        .map_err(ApiError::upstream)?;
    Ok(Json(report))
}

async fn handle_run_sse(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ResolveRequest>,
) -> Result<Response, ApiError> {
    validate(&request)?;
    let stream = run_stream(
        state.resolver.clone(),
        request,
        |event| sse_event(event.name(), event),
        |outcome| match outcome {
            Ok(report) => sse_event("report", &report),
            Err(e) => sse_event("error", &json!({ "error": format!("{:#}", e) })),
        },
    );
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()).into_response())
}

/// POST /mcp；Accept 包含 text/event-stream 的 tools/call 以SSE推送进度
async fn handle_mcp(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    // 请求体自行解析，坏JSON也按JSON-RPC返回 -32700
    let request: mcp::JsonRpcRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            let response =
                mcp::JsonRpcResponse::failure(None, mcp::PARSE_ERROR, format!("Parse error: {}", e));
            return Json(response).into_response();
        }
    };

    let wants_stream = headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|accept| accept.contains("text/event-stream"));

    if wants_stream && request.method == "tools/call" {
        let args = match mcp::parse_tool_call(&request.params) {
            Ok(args) => args,
            Err(error) => {
                let response = mcp::JsonRpcResponse::failure(request.id, error.code, error.message);
                return Json(response).into_response();
            }
        };
        let id = request.id;
        let stream = run_stream(
            state.resolver.clone(),
            args.into_request(),
            |event| sse_event("message", &mcp::progress_notification(event)),
            move |outcome| {
                let response = mcp::JsonRpcResponse::success(id, mcp::tool_result(&outcome));
                sse_event("message", &response)
            },
        );
        return Sse::new(stream).keep_alive(KeepAlive::default()).into_response();
    }

    match mcp::handle_request(&state.resolver, request).await {
        Some(response) => Json(response).into_response(),
        None => StatusCode::ACCEPTED.into_response(),
    }
}

fn sse_event<T: Serialize + ?Sized>(name: &str, value: &T) -> Event {
    let data = serde_json::to_string(value)
        .unwrap_or_else(|e| json!({ "error": e.to_string() }).to_string());
    Event::default().event(name).data(data)
}

enum RunStream<F> {
    Running(EventReceiver, JoinHandle<Result<FixReport>>, F),
    Finished,
}

/// 在后台执行求解，逐条转发流水线事件，结束时追加最终结果
fn run_stream<E, F>(
    resolver: Resolver,
    request: ResolveRequest,
    on_event: E,
    on_finish: F,
) -> impl Stream<Item = Result<Event, Infallible>>
where
    E: Fn(&PipelineEvent) -> Event + Send + 'static,
    F: FnOnce(Result<FixReport>) -> Event + Send + 'static,
{
    let (tx, rx) = event_channel();
    let handle = tokio::spawn(async move { resolver.run(request, Some(tx)).await });

    unfold(
        (RunStream::Running(rx, handle, on_finish), on_event),
        |(state, on_event)| async move {
            match state {
                RunStream::Running(mut rx, handle, on_finish) => match rx.recv().await {
                    Some(event) => {
                        let item = on_event(&event);
                        Some((Ok(item), (RunStream::Running(rx, handle, on_finish), on_event)))
                    }
                    None => {
                        // 发送端随 run 结束一起释放
                        let outcome = match handle.await {
                            Ok(outcome) => outcome,
                            Err(e) => Err(anyhow::anyhow!("Resolver task failed: {}", e)),
                        };
                        Some((Ok(on_finish(outcome)), (RunStream::Finished, on_event)))
                    }
                },
                RunStream::Finished => None,
            }
        },
    )
}
