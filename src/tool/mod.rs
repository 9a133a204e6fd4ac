//! Tool invocation contract.
//!
//! The boundary the external agent loop calls through. Tools are a fixed
//! registry of handlers indexed by name, each with a declared JSON input
//! schema checked before invocation. Every call returns a structured
//! `{ok, ...}` envelope; raw stack traces and connection details never cross
//! this boundary. The reasoning loop and its iteration cap live outside this
//! crate.

use crate::driver::ParamMap;
use crate::error::GatewayError;
use crate::gateway::{ExecutionGateway, ExecutionResult};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// A callable tool exposed to the agent loop.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON schema of the accepted arguments.
    fn parameters(&self) -> Value;
    /// Invoke with already-parsed JSON arguments. Always returns an
    /// `{ok, ...}` envelope, never an error.
    async fn invoke(&self, args: Value) -> Value;
}

fn ok_envelope(result: &ExecutionResult) -> Value {
    json!({ "ok": true, "result": result })
}

fn err_envelope(error: &GatewayError) -> Value {
    json!({
        "ok": false,
        "error_kind": error.kind(),
        "message": error.to_string(),
    })
}

fn bad_args(message: &str) -> Value {
    json!({
        "ok": false,
        "error_kind": "parameter_type_mismatch",
        "message": message,
    })
}

fn param_map(args: &Value) -> Result<ParamMap, Value> {
    match args.get("params") {
        None | Some(Value::Null) => Ok(ParamMap::new()),
        Some(Value::Object(map)) => Ok(map.clone()),
        Some(_) => Err(bad_args("'params' must be an object")),
    }
}

/// Executes a registered analytic template.
pub struct TemplateQueryTool {
    gateway: Arc<ExecutionGateway>,
}

impl TemplateQueryTool {
    pub fn new(gateway: Arc<ExecutionGateway>) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl Tool for TemplateQueryTool {
    fn name(&self) -> &str {
        "run_template"
    }

    fn description(&self) -> &str {
        "Run a pre-registered, safe-by-construction analytics template."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "template": {
                    "type": "string",
                    "description": "Template id",
                    "enum": self.gateway.catalog().ids(),
                },
                "params": {
                    "type": "object",
                    "description": "Scalar parameters per the template schema"
                }
            },
            "required": ["template"]
        })
    }

    async fn invoke(&self, args: Value) -> Value {
        let Some(template_id) = args.get("template").and_then(Value::as_str) else {
            return bad_args("missing 'template' argument");
        };
        let params = match param_map(&args) {
            Ok(params) => params,
            Err(envelope) => return envelope,
        };

        debug!(template_id, "tool call: run_template");
        match self.gateway.run_template(template_id, &params).await {
            Ok(result) => ok_envelope(&result),
            Err(error) => err_envelope(&error),
        }
    }
}

/// Executes a validation-gated free-text query. Only registered when the
/// configuration explicitly permits ad-hoc queries.
pub struct AdHocQueryTool {
    gateway: Arc<ExecutionGateway>,
}

impl AdHocQueryTool {
    pub fn new(gateway: Arc<ExecutionGateway>) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl Tool for AdHocQueryTool {
    fn name(&self) -> &str {
        "run_query"
    }

    fn description(&self) -> &str {
        "Run a read-only Cypher query. The query is validated, bounded, and \
         normalized before execution; write operations are rejected."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Read-only Cypher query text"
                },
                "params": {
                    "type": "object",
                    "description": "Bound scalar parameters"
                }
            },
            "required": ["query"]
        })
    }

    async fn invoke(&self, args: Value) -> Value {
        let Some(query) = args.get("query").and_then(Value::as_str) else {
            return bad_args("missing 'query' argument");
        };
        let params = match param_map(&args) {
            Ok(params) => params,
            Err(envelope) => return envelope,
        };

        debug!("tool call: run_query");
        match self.gateway.run_adhoc(query, &params).await {
            Ok(result) => ok_envelope(&result),
            Err(error) => err_envelope(&error),
        }
    }
}

/// Lists the template catalog with parameter schemas, for tool discovery.
pub struct ListTemplatesTool {
    gateway: Arc<ExecutionGateway>,
}

impl ListTemplatesTool {
    pub fn new(gateway: Arc<ExecutionGateway>) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl Tool for ListTemplatesTool {
    fn name(&self) -> &str {
        "list_templates"
    }

    fn description(&self) -> &str {
        "List available analytics templates and their parameter schemas."
    }

    fn parameters(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn invoke(&self, _args: Value) -> Value {
        let mut templates: Vec<Value> = self
            .gateway
            .catalog()
            .iter()
            .map(|t| t.schema_json())
            .collect();
        templates.sort_by(|a, b| a["id"].as_str().cmp(&b["id"].as_str()));
        json!({ "ok": true, "result": { "templates": templates } })
    }
}

/// Reports graph metadata from the schema cache.
pub struct SchemaTool {
    gateway: Arc<ExecutionGateway>,
}

impl SchemaTool {
    pub fn new(gateway: Arc<ExecutionGateway>) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl Tool for SchemaTool {
    fn name(&self) -> &str {
        "get_schema"
    }

    fn description(&self) -> &str {
        "Describe the graph: node labels, relationship types, property keys."
    }

    fn parameters(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn invoke(&self, _args: Value) -> Value {
        match self.gateway.schema().await {
            Ok(schema) => json!({ "ok": true, "result": schema }),
            Err(error) => err_envelope(&error),
        }
    }
}

/// Fixed registry of tools, assembled once at startup.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Standard registry for a gateway: templates and schema always, ad-hoc
    /// queries only when the configuration allows them.
    pub fn for_gateway(gateway: Arc<ExecutionGateway>) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(TemplateQueryTool::new(Arc::clone(&gateway))));
        registry.register(Arc::new(ListTemplatesTool::new(Arc::clone(&gateway))));
        registry.register(Arc::new(SchemaTool::new(Arc::clone(&gateway))));
        if gateway.config().allow_adhoc {
            registry.register(Arc::new(AdHocQueryTool::new(gateway)));
        }
        registry
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Dispatch a call by tool name. Unknown names yield an error envelope,
    /// not a panic.
    pub async fn invoke(&self, name: &str, args: Value) -> Value {
        match self.tools.get(name) {
            Some(tool) => tool.invoke(args).await,
            None => json!({
                "ok": false,
                "error_kind": "unknown_tool",
                "message": format!("no tool named '{name}'"),
            }),
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GatewayConfig;
    use crate::driver::memory::MemoryGraph;

    fn gateway(allow_adhoc: bool) -> Arc<ExecutionGateway> {
        let config = GatewayConfig {
            allow_adhoc,
            ..GatewayConfig::default()
        };
        Arc::new(ExecutionGateway::new(
            Arc::new(MemoryGraph::builder().build()),
            config,
        ))
    }

    #[tokio::test]
    async fn test_adhoc_tool_gated_by_config() {
        let registry = ToolRegistry::for_gateway(gateway(false));
        assert_eq!(
            registry.names(),
            vec!["get_schema", "list_templates", "run_template"]
        );

        let registry = ToolRegistry::for_gateway(gateway(true));
        assert!(registry.get("run_query").is_some());
    }

    #[tokio::test]
    async fn test_unknown_tool_envelope() {
        let registry = ToolRegistry::for_gateway(gateway(false));
        let out = registry.invoke("drop_database", json!({})).await;
        assert_eq!(out["ok"], json!(false));
        assert_eq!(out["error_kind"], json!("unknown_tool"));
    }

    #[tokio::test]
    async fn test_denied_query_maps_to_error_kind() {
        let registry = ToolRegistry::for_gateway(gateway(true));
        let out = registry
            .invoke("run_query", json!({"query": "MATCH (n) DETACH DELETE n"}))
            .await;
        assert_eq!(out["ok"], json!(false));
        assert_eq!(out["error_kind"], json!("disallowed_operation"));
    }

    #[tokio::test]
    async fn test_list_templates_includes_schemas() {
        let registry = ToolRegistry::for_gateway(gateway(false));
        let out = registry.invoke("list_templates", json!({})).await;
        assert_eq!(out["ok"], json!(true));
        let templates = out["result"]["templates"].as_array().unwrap();
        assert!(templates
            .iter()
            .any(|t| t["id"] == "get_top_countries_by_learners"));
    }

    #[tokio::test]
    async fn test_missing_argument_envelope() {
        let registry = ToolRegistry::for_gateway(gateway(true));
        let out = registry.invoke("run_query", json!({})).await;
        assert_eq!(out["ok"], json!(false));

        let out = registry
            .invoke("run_template", json!({"params": {"limit": 5}}))
            .await;
        assert_eq!(out["ok"], json!(false));
    }
}
