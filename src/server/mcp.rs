//! Model Context Protocol 的 JSON-RPC 处理：initialize、tools/list、tools/call

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::resolver::outlet::render_report;
use crate::resolver::{PipelineEvent, ResolveRequest, Resolver};
use crate::types::{ErrorReport, FixReport};

pub const PROTOCOL_VERSION: &str = "2025-03-26";
pub const SOLVE_TOOL: &str = "solve_dependency_issue";

pub const PARSE_ERROR: i32 = -32700;
pub const INVALID_REQUEST: i32 = -32600;
pub const METHOD_NOT_FOUND: i32 = -32601;
pub const INVALID_PARAMS: i32 = -32602;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    #[serde(default)]
    pub jsonrpc: String,
    /// 通知没有id
    #[serde(default)]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: Option<Value>, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
            }),
        }
    }
}

/// `solve_dependency_issue` 的参数
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct SolveArgs {
    /// The error log or a description of the dependency problem
    pub error_text: String,
    /// Current requirements.txt content, if available
    #[serde(default)]
    pub requirements: Option<String>,
    /// Resume an existing session
    #[serde(default)]
    pub session_id: Option<String>,
}

impl SolveArgs {
    pub fn into_request(self) -> ResolveRequest {
        ResolveRequest::new(ErrorReport::new(self.error_text, self.requirements))
            .with_session_id(self.session_id)
    }
}

pub fn tool_definitions() -> Value {
    let schema = serde_json::to_value(schemars::schema_for!(SolveArgs)).unwrap_or(json!({}));
    json!({
        "tools": [{
            "name": SOLVE_TOOL,
            "description": "Diagnose a Python dependency conflict from an error log, research official docs and community threads, and return a verified requirements.txt.",
            "inputSchema": schema,
        }]
    })
}

fn initialize_result() -> Value {
    json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": { "tools": {} },
        "serverInfo": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
        }
    })
}

/// 解析 tools/call 的参数，只接受 `solve_dependency_issue`
pub fn parse_tool_call(params: &Value) -> Result<SolveArgs, JsonRpcError> {
    let name = params
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| JsonRpcError {
            code: INVALID_PARAMS,
            message: "Missing tool name".to_string(),
        })?;
    if name != SOLVE_TOOL {
        return Err(JsonRpcError {
            code: INVALID_PARAMS,
            message: format!("Unknown tool: {}", name),
        });
    }
    let arguments = params.get("arguments").cloned().unwrap_or(json!({}));
    let args: SolveArgs = serde_json::from_value(arguments).map_err(|e| JsonRpcError {
        code: INVALID_PARAMS,
        message: format!("Invalid arguments: {}", e),
    })?;
    if args.error_text.trim().is_empty() {
        return Err(JsonRpcError {
            code: INVALID_PARAMS,
            message: "error_text must not be empty".to_string(),
        });
    }
    Ok(args)
}

/// 工具执行结果；执行失败按MCP约定放在 result 中并标记 isError
pub fn tool_result(outcome: &anyhow::Result<FixReport>) -> Value {
    match outcome {
        Ok(report) => json!({
            "content": [{ "type": "text", "text": render_report(report) }],
            "structuredContent": report,
            "isError": false,
        }),
        Err(e) => json!({
            "content": [{ "type": "text", "text": format!("{:#}", e) }],
            "isError": true,
        }),
    }
}

/// 流式调用过程中推送的进度通知
pub fn progress_notification(event: &PipelineEvent) -> Value {
    json!({
        "jsonrpc": "2.0",
        "method": "notifications/message",
        "params": {
            "level": if matches!(event, PipelineEvent::Warning { .. }) { "warning" } else { "info" },
            "logger": env!("CARGO_PKG_NAME"),
            "data": event,
        }
    })
}

/// 处理一条请求，通知返回 None
pub async fn handle_request(resolver: &Resolver, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
    let id = request.id.clone();
    let response = match request.method.as_str() {
        "initialize" => JsonRpcResponse::success(id, initialize_result()),
        "ping" => JsonRpcResponse::success(id, json!({})),
        "tools/list" => JsonRpcResponse::success(id, tool_definitions()),
        "tools/call" => match parse_tool_call(&request.params) {
            Ok(args) => {
                let outcome = resolver.run(args.into_request(), None).await;
                if let Err(e) = &outcome {
                    tracing::error!("❌ MCP工具调用失败: {}", e);
                }
                JsonRpcResponse::success(id, tool_result(&outcome))
            }
            Err(error) => JsonRpcResponse {
                jsonrpc: "2.0".to_string(),
                id,
                result: None,
                error: Some(error),
            },
        },
        method if method.starts_with("notifications/") => return None,
        method => JsonRpcResponse::failure(id, METHOD_NOT_FOUND, format!("Method not found: {}", method)),
    };

    if request.id.is_none() {
        return None;
    }
    Some(response)
}
