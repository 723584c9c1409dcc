//! MCP server (binds C9/C10/C13 to the JSON-RPC transport).
//!
//! `tools/call` arguments carry a top-level `action` (and, for workflows other
//! than `commune`, a `project_path`). The server strips `_client_meta`, runs
//! the covenant check, then the phase check, then dispatches — in that order,
//! per §5's ordering guarantee that covenant state updates before the tool
//! body runs.

use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{error, warn};

use covenant_core::Manager;

use crate::covenant::{strip_client_meta, Covenant};
use crate::dispatch::{self, DispatchContext, DispatchError};
use crate::dream::DreamScheduler;
use crate::phase::PhaseTracker;
use crate::protocol::messages::{
    CallToolRequest, CallToolResult, InitializeRequest, InitializeResult, ListToolsResult,
    ServerCapabilities, ServerInfo, ToolDescription, ToolResultContent,
};
use crate::protocol::types::{JsonRpcError, JsonRpcRequest, JsonRpcResponse};
use crate::tasks::TaskManager;

const WORKFLOWS: &[(&str, &[&str])] = &[
    ("commune", dispatch::COMMUNE_ACTIONS),
    ("consult", dispatch::CONSULT_ACTIONS),
    ("inscribe", dispatch::INSCRIBE_ACTIONS),
    ("reflect", dispatch::REFLECT_ACTIONS),
    ("understand", dispatch::UNDERSTAND_ACTIONS),
    ("govern", dispatch::GOVERN_ACTIONS),
    ("explore", dispatch::EXPLORE_ACTIONS),
    ("maintain", dispatch::MAINTAIN_ACTIONS),
];

pub struct McpServer {
    manager: Arc<Manager>,
    covenant: Covenant,
    phase: PhaseTracker,
    dream: Arc<DreamScheduler>,
    tasks: TaskManager,
    initialized: bool,
}

impl McpServer {
    pub fn new(manager: Arc<Manager>, dream: Arc<DreamScheduler>, tasks: TaskManager, counsel_ttl: std::time::Duration) -> Self {
        Self {
            manager,
            covenant: Covenant::new(counsel_ttl),
            phase: PhaseTracker::new(),
            dream,
            tasks,
            initialized: false,
        }
    }

    pub async fn handle_request(&mut self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        let id = request.id.clone();
        let result = match request.method.as_str() {
            "initialize" => self.handle_initialize(request.params),
            "tools/list" => Ok(self.handle_list_tools()),
            "tools/call" => self.handle_call_tool(request.params).await,
            "notifications/initialized" => return None,
            _ => Err(JsonRpcError::method_not_found_with_message(&format!(
                "unknown method '{}'",
                request.method
            ))),
        };

        match result {
            Ok(value) => Some(JsonRpcResponse::success(id, value)),
            Err(e) => Some(JsonRpcResponse::error(id, e)),
        }
    }

    fn handle_initialize(&mut self, params: Option<Value>) -> Result<Value, JsonRpcError> {
        let _req: InitializeRequest = match params {
            Some(p) => serde_json::from_value(p).unwrap_or_default(),
            None => InitializeRequest::default(),
        };
        self.initialized = true;
        let result = InitializeResult {
            protocol_version: crate::protocol::types::MCP_VERSION.to_string(),
            server_info: ServerInfo {
                name: "covenant-mcp".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
            capabilities: ServerCapabilities {
                tools: Some(Default::default()),
                resources: None,
                prompts: None,
            },
            instructions: Some(
                "Call get_briefing (via the commune workflow) before any mutating tool.".to_string(),
            ),
        };
        serde_json::to_value(result).map_err(|e| JsonRpcError::internal_error(&e.to_string()))
    }

    fn handle_list_tools(&self) -> Value {
        let tools: Vec<ToolDescription> = WORKFLOWS
            .iter()
            .map(|(name, actions)| ToolDescription {
                name: name.to_string(),
                description: Some(format!("actions: {}", actions.join(", "))),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "action": {"type": "string", "enum": actions},
                        "project_path": {"type": "string"},
                    },
                    "required": ["action"],
                }),
            })
            .collect();
        serde_json::to_value(ListToolsResult { tools }).unwrap_or(Value::Null)
    }

    async fn handle_call_tool(&mut self, params: Option<Value>) -> Result<Value, JsonRpcError> {
        if !self.initialized {
            return Err(JsonRpcError::server_not_initialized());
        }
        let call: CallToolRequest = match params {
            Some(p) => serde_json::from_value(p).map_err(|e| JsonRpcError::invalid_params(&e.to_string()))?,
            None => return Err(JsonRpcError::invalid_params("missing tool call arguments")),
        };

        let workflow = call.name.as_str();
        let Some((_, valid_actions)) = WORKFLOWS.iter().find(|(name, _)| *name == workflow) else {
            return Ok(error_result(&format!(
                "unknown workflow '{workflow}'; valid workflows: {}",
                WORKFLOWS.iter().map(|(n, _)| *n).collect::<Vec<_>>().join(", ")
            )));
        };

        let (args, meta) = strip_client_meta(call.arguments.unwrap_or_else(|| json!({})));
        let action = args.get("action").and_then(Value::as_str).unwrap_or("").to_string();
        let project_path = args
            .get("project_path")
            .and_then(Value::as_str)
            .unwrap_or_else(|| self.manager.storage().project())
            .to_string();

        if !valid_actions.contains(&action.as_str()) {
            return Ok(error_result(&format!(
                "'{action}' is not a valid action for {workflow}; valid actions: {}",
                valid_actions.join(", ")
            )));
        }

        self.dream.notify_tool_call();

        if let Some(block) = self
            .covenant
            .check_tool_access(self.manager.storage(), &project_path, &action)
            .map_err(|e| JsonRpcError::internal_error(&e.to_string()))?
        {
            return Ok(serde_json::to_value(&block).unwrap_or(Value::Null));
        }
        if let Err(not_visible) = self.phase.check_and_advance(Some(&project_path), &action) {
            return Ok(serde_json::to_value(&not_visible).unwrap_or(Value::Null));
        }

        if action == "get_briefing" {
            if let Err(e) = self.covenant.mark_briefed(self.manager.storage(), &project_path) {
                warn!(error = %e, "failed to persist briefing");
            }
        }
        if action == "context_check" {
            let topic = args.get("description").and_then(Value::as_str).unwrap_or_default();
            if let Err(e) = self.covenant.record_context_check(self.manager.storage(), &project_path, topic) {
                warn!(error = %e, "failed to persist context_check");
            }
        }

        // `_client_meta` is attached to `remember` calls through
        // `RememberInput::source_client`/`source_model`, populated by the
        // `inscribe` workflow reading the same arguments; the parsed struct
        // is only needed here to confirm stripping happened before this point.
        let _ = &meta;

        let ctx = DispatchContext {
            manager: &self.manager,
            dream: &self.dream,
            tasks: &self.tasks,
        };
        let outcome = match workflow {
            "commune" => dispatch::commune(&action, &args, &ctx),
            "consult" => dispatch::consult(&action, &args, &ctx),
            "inscribe" => dispatch::inscribe(&action, &args, &ctx),
            "reflect" => dispatch::reflect(&action, &args, &ctx),
            "understand" => dispatch::understand(&action, &args, &ctx),
            "govern" => dispatch::govern(&action, &args, &ctx),
            "explore" => dispatch::explore(&action, &args, &ctx),
            "maintain" => dispatch::maintain(&action, &args, &ctx).await,
            _ => unreachable!("workflow validated above"),
        };

        match outcome {
            Ok(value) => Ok(tool_result(value)),
            Err(e @ (DispatchError::InvalidAction { .. } | DispatchError::MissingParam { .. })) => {
                Ok(error_result(&e.hint()))
            }
            Err(DispatchError::Core(e)) => {
                error!(error = %e, workflow, action, "dispatch failed");
                Ok(error_result(&e.to_string()))
            }
        }
    }
}

fn tool_result(value: Value) -> Value {
    let result = CallToolResult {
        content: vec![ToolResultContent {
            content_type: "text".to_string(),
            text: value.to_string(),
        }],
        is_error: None,
    };
    serde_json::to_value(result).unwrap_or(Value::Null)
}

fn error_result(message: &str) -> Value {
    let result = CallToolResult {
        content: vec![ToolResultContent {
            content_type: "text".to_string(),
            text: message.to_string(),
        }],
        is_error: Some(true),
    };
    serde_json::to_value(result).unwrap_or(Value::Null)
}
