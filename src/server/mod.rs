//! MCP server exposing the deobfuscation workflow as tools and resources.

mod requests;

pub use requests::*;

use crate::config::PublishMode;
use crate::error::ToolError;
use crate::expand_path;
use crate::publish::{parse_resource_uri, resource_uri, Publication, MIME_TYPE};
use crate::service::DeobfuscationService;
use crate::tool_registry::{self, ToolCategory};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use hyper::http;
use rmcp::{
    handler::server::{router::tool::ToolRouter, tool::ToolCallContext, wrapper::Parameters},
    model::{
        AnnotateAble, CallToolResult, Content, Extensions, ListResourcesResult,
        PaginatedRequestParams,
        RawContent, RawResource, ReadResourceRequestParams, ReadResourceResult, ResourceContents,
        ServerCapabilities, ServerInfo, Tool,
    },
    schemars::{schema_for, JsonSchema},
    service::RequestContext,
    tool, tool_handler, tool_router, ErrorData as McpError, RoleServer, ServerHandler,
};
use serde_json::{json, Value};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Header carrying the transport's session id on streamable HTTP requests.
pub const SESSION_ID_HEADER: &str = "mcp-session-id";

/// MCP server for session-scoped deobfuscation
#[derive(Clone)]
pub struct DeobMcpServer {
    service: Arc<DeobfuscationService>,
    tool_mux: ToolMux<DeobMcpServer>,
    /// Session used when the transport supplies no id (stdio).
    fallback_session_id: Arc<str>,
}

#[derive(Clone)]
struct ToolMux<S> {
    call_router: ToolRouter<S>,
}

impl<S> ToolMux<S>
where
    S: Send + Sync + 'static,
{
    fn new(call_router: ToolRouter<S>) -> Self {
        Self { call_router }
    }

    async fn call(
        &self,
        context: ToolCallContext<'_, S>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        self.call_router.call(context).await
    }

    /// Routed tools, in catalog order.
    fn list_all(&self) -> Vec<Tool> {
        let mut tools = Vec::new();
        for info in tool_registry::all_tools() {
            if let Some(route) = self.call_router.map.get(info.name) {
                tools.push(route.attr.clone());
            }
        }
        tools
    }

    fn get(&self, name: &str) -> Option<&Tool> {
        self.call_router.map.get(name).map(|route| &route.attr)
    }
}

impl DeobMcpServer {
    pub fn new(service: Arc<DeobfuscationService>) -> Self {
        let fallback_session_id: Arc<str> = uuid::Uuid::new_v4().to_string().into();
        info!(fallback_session_id = %fallback_session_id, "Creating deobfuscation MCP server");
        Self {
            service,
            tool_mux: ToolMux::new(Self::tool_router()),
            fallback_session_id,
        }
    }

    fn instructions(&self) -> String {
        let publish_hint = match self.service.config().publish_mode {
            PublishMode::Resource => {
                "save_deobfuscated returns a deob://files/{name} resource link; fetch the bytes with resources/read."
            }
            PublishMode::File => {
                "save_deobfuscated writes the module next to the input and returns the written path."
            }
        };
        format!(
            "Deobfuscation server for compiled .NET modules. Each session holds one loaded module. \
                 \n\nWorkflow: \
                 \n1. detect_obfuscator: Load a module and identify the obfuscator ('Unknown Obfuscator' if none matches) \
                 \n2. deobfuscate: Clean the module; pass method to force a specific analyzer (see list_analyzers) \
                 \n3. save_deobfuscated: Publish the cleaned module \
                 \n   {publish_hint} \
                 \n\npipeline_status shows where the session is. A new detect_obfuscator replaces the loaded module. \
                 \n\nTip: Use tool_catalog(query='what you want to do') to find the right tool."
        )
    }

    /// Resolve a user-supplied module path; `None` if it is not an existing file.
    fn validate_path(path: &str) -> Option<PathBuf> {
        let path = path.trim();
        if path.is_empty()
            || Path::new(path)
                .components()
                .any(|c| c == Component::ParentDir)
        {
            return None;
        }
        let expanded = expand_path(path);
        expanded.is_file().then_some(expanded)
    }

    fn value_to_strings(value: &Value) -> Result<Vec<String>, ToolError> {
        match value {
            Value::String(s) => {
                let out: Vec<String> = s
                    .split(',')
                    .map(|t| t.trim())
                    .filter(|t| !t.is_empty())
                    .map(|t| t.to_string())
                    .collect();
                if out.is_empty() {
                    Err(ToolError::InvalidParams("empty analyzer list".to_string()))
                } else {
                    Ok(out)
                }
            }
            Value::Array(arr) => arr
                .iter()
                .map(|v| match v {
                    Value::String(s) => Ok(s.to_string()),
                    _ => Err(ToolError::InvalidParams(
                        "expected analyzer names as strings".to_string(),
                    )),
                })
                .collect(),
            _ => Err(ToolError::InvalidParams(
                "expected string or array of strings".to_string(),
            )),
        }
    }

    /// Session id from the HTTP request, or this connection's fallback.
    fn session_id(&self, context: &RequestContext<RoleServer>) -> String {
        header_session_id(&context.extensions)
            .unwrap_or_else(|| self.fallback_session_id.to_string())
    }

    async fn notify_resources_changed(&self, context: &RequestContext<RoleServer>) {
        if let Err(e) = context.peer.notify_resource_list_changed().await {
            warn!(error = %e, "Failed to send resources/list_changed");
        }
    }

    fn json_result(value: &impl serde::Serialize) -> CallToolResult {
        CallToolResult::success(vec![Content::text(
            serde_json::to_string_pretty(value).unwrap_or_else(|e| format!("{e}")),
        )])
    }
}

fn header_session_id(extensions: &Extensions) -> Option<String> {
    extensions
        .get::<http::request::Parts>()
        .and_then(|parts| parts.headers.get(SESSION_ID_HEADER))
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn published_resource(name: &str) -> RawResource {
    let mut raw = RawResource::new(resource_uri(name), name.to_string());
    raw.mime_type = Some(MIME_TYPE.to_string());
    raw
}

// Tool implementations using the #[tool_router] attribute

#[tool_router]
impl DeobMcpServer {
    #[tool(
        description = "Load a compiled module and detect which obfuscator produced it. \
        Offers the module to every analyzer in registry order (or only the `analyzers` subset) \
        and returns the long name of the first that claims it, or 'Unknown Obfuscator'. \
        Replaces any module previously loaded in this session."
    )]
    #[instrument(skip(self, context), fields(path = %req.path))]
    async fn detect_obfuscator(
        &self,
        Parameters(req): Parameters<DetectRequest>,
        context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        debug!("Tool call: detect_obfuscator");
        let Some(path) = Self::validate_path(&req.path) else {
            return Ok(ToolError::InvalidPath(req.path).to_tool_result());
        };
        let analyzers = match req.analyzers.as_ref().map(Self::value_to_strings).transpose() {
            Ok(analyzers) => analyzers,
            Err(e) => return Ok(e.to_tool_result()),
        };

        let session_id = self.session_id(&context);
        match self
            .service
            .detect(&session_id, &path, analyzers.as_deref(), &context.ct)
            .await
        {
            Ok(descriptor) => {
                self.notify_resources_changed(&context).await;
                Ok(CallToolResult::success(vec![Content::text(
                    descriptor.type_long,
                )]))
            }
            Err(e) => Ok(e.to_tool_result()),
        }
    }

    #[tool(
        description = "Deobfuscate the module loaded by detect_obfuscator. \
        Optionally pass method (any analyzer alias, see list_analyzers) to override the detected analyzer. \
        Returns the output path; call save_deobfuscated to obtain the result."
    )]
    #[instrument(skip(self, context))]
    async fn deobfuscate(
        &self,
        Parameters(req): Parameters<DeobfuscateRequest>,
        context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        debug!("Tool call: deobfuscate");
        let session_id = self.session_id(&context);
        match self
            .service
            .transform(&session_id, req.method.as_deref(), &context.ct)
            .await
        {
            Ok(output) => {
                self.notify_resources_changed(&context).await;
                Ok(CallToolResult::success(vec![Content::text(
                    output.display().to_string(),
                )]))
            }
            Err(e) => Ok(e.to_tool_result()),
        }
    }

    #[tool(
        description = "Save the deobfuscated module. Returns a resource link (deob://files/{name}) \
        readable with resources/read, or in file mode the path written."
    )]
    #[instrument(skip(self, context))]
    async fn save_deobfuscated(
        &self,
        context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        debug!("Tool call: save_deobfuscated");
        let session_id = self.session_id(&context);
        match self.service.publish(&session_id, &context.ct).await {
            Ok(publication) => {
                let summary = serde_json::to_string_pretty(&publication)
                    .unwrap_or_else(|_| format!("{publication:?}"));
                let mut content = Vec::with_capacity(2);
                if let Publication::Resource { name, .. } = &publication {
                    content.push(RawContent::ResourceLink(published_resource(name)).no_annotation());
                }
                content.push(Content::text(summary));
                Ok(CallToolResult::success(content))
            }
            Err(e) => Ok(e.to_tool_result()),
        }
    }

    #[tool(description = "Show this session's pipeline state, loaded module, selected analyzer and accumulated analyzer state.")]
    #[instrument(skip(self, context))]
    async fn pipeline_status(
        &self,
        context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        debug!("Tool call: pipeline_status");
        let session_id = self.session_id(&context);
        let info = self.service.status(&session_id).await;
        Ok(Self::json_result(&info))
    }

    #[tool(description = "List available analyzers in registry order. Any alias (type_long, name, type_short) selects one.")]
    #[instrument(skip(self))]
    async fn list_analyzers(&self) -> Result<CallToolResult, McpError> {
        debug!("Tool call: list_analyzers");
        Ok(Self::json_result(&json!({
            "analyzers": self.service.analyzers(),
            "hint": "Pass any alias as deobfuscate(method=...) or detect_obfuscator(analyzers=[...])"
        })))
    }

    #[tool(description = "Discover available tools by query or category. \
        Use this to find the right tool for your task before calling tool_help for full details.")]
    #[instrument(skip(self))]
    async fn tool_catalog(
        &self,
        Parameters(req): Parameters<ToolCatalogRequest>,
    ) -> Result<CallToolResult, McpError> {
        debug!("Tool call: tool_catalog");
        let limit = req.limit.unwrap_or(7).min(15);

        if let Some(cat_str) = &req.category {
            if let Ok(cat) = cat_str.parse::<ToolCategory>() {
                let tools: Vec<_> = tool_registry::tools_by_category(cat)
                    .take(limit)
                    .map(|t| {
                        json!({
                            "name": t.name,
                            "description": t.short_desc,
                            "category": t.category.as_str(),
                        })
                    })
                    .collect();

                return Ok(Self::json_result(&json!({
                    "category": cat.as_str(),
                    "category_description": cat.description(),
                    "tools": tools,
                    "hint": "Use tool_help(name) for full documentation and examples"
                })));
            }
        }

        if let Some(query) = &req.query {
            let results = tool_registry::search_tools(query, limit);
            let tools: Vec<_> = results
                .iter()
                .map(|(t, keywords)| {
                    json!({
                        "name": t.name,
                        "description": t.short_desc,
                        "category": t.category.as_str(),
                        "matched": keywords,
                    })
                })
                .collect();

            return Ok(Self::json_result(&json!({
                "query": query,
                "tools": tools,
                "hint": "Use tool_help(name) for full documentation and examples"
            })));
        }

        let categories: Vec<_> = ToolCategory::all()
            .iter()
            .map(|c| {
                json!({
                    "category": c.as_str(),
                    "description": c.description(),
                    "tool_count": tool_registry::tools_by_category(*c).count(),
                })
            })
            .collect();

        Ok(Self::json_result(&json!({
            "categories": categories,
            "hint": "Use tool_catalog(category='...') to list tools in a category, or tool_catalog(query='...') to search."
        })))
    }

    #[tool(
        description = "Get full documentation for a tool including description, parameters schema, and example."
    )]
    #[instrument(skip(self))]
    async fn tool_help(
        &self,
        Parameters(req): Parameters<ToolHelpRequest>,
    ) -> Result<CallToolResult, McpError> {
        debug!("Tool call: tool_help for {}", req.name);

        if let Some(tool) = tool_registry::get_tool(&req.name) {
            Ok(Self::json_result(&json!({
                "name": tool.name,
                "category": tool.category.as_str(),
                "description": tool.full_desc,
                "parameters": tool_params_schema(tool.name),
                "example": tool.example,
                "keywords": tool.keywords,
            })))
        } else {
            let suggestions = tool_registry::search_tools(&req.name, 3);
            let suggestion_names: Vec<_> = suggestions.iter().map(|(t, _)| t.name).collect();
            Ok(Self::json_result(&json!({
                "error": format!("Tool '{}' not found", req.name),
                "suggestions": suggestion_names,
                "hint": "Use tool_catalog to discover available tools"
            })))
        }
    }
}

fn tool_params_schema(name: &str) -> Option<Value> {
    fn schema<T: JsonSchema>() -> Value {
        serde_json::to_value(schema_for!(T)).unwrap_or_else(|_| json!({}))
    }

    match name {
        "detect_obfuscator" => Some(schema::<DetectRequest>()),
        "deobfuscate" => Some(schema::<DeobfuscateRequest>()),
        "save_deobfuscated" | "pipeline_status" | "list_analyzers" => {
            Some(schema::<EmptyParams>())
        }
        "tool_catalog" => Some(schema::<ToolCatalogRequest>()),
        "tool_help" => Some(schema::<ToolHelpRequest>()),
        _ => None,
    }
}

#[tool_handler(router = self.tool_mux)]
impl ServerHandler for DeobMcpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            capabilities: ServerCapabilities::builder()
                .enable_tools()
                .enable_resources()
                .enable_resources_list_changed()
                .build(),
            instructions: Some(self.instructions()),
            ..Default::default()
        }
    }

    async fn list_resources(
        &self,
        _request: Option<PaginatedRequestParams>,
        context: RequestContext<RoleServer>,
    ) -> Result<ListResourcesResult, McpError> {
        let session_id = self.session_id(&context);
        let resources = self
            .service
            .published_name(&session_id)
            .await
            .map(|name| vec![published_resource(&name).no_annotation()])
            .unwrap_or_default();
        Ok(ListResourcesResult::with_all_items(resources))
    }

    #[instrument(skip(self, request, context), fields(uri = %request.uri))]
    async fn read_resource(
        &self,
        request: ReadResourceRequestParams,
        context: RequestContext<RoleServer>,
    ) -> Result<ReadResourceResult, McpError> {
        let not_found = || {
            McpError::resource_not_found(
                ToolError::UnknownResource(request.uri.clone()).to_string(),
                None,
            )
        };
        let Some(name) = parse_resource_uri(&request.uri) else {
            return Err(not_found());
        };

        let session_id = self.session_id(&context);
        let resource = self
            .service
            .fetch(&session_id, name)
            .await
            .map_err(|_| not_found())?;
        debug!(bytes = resource.bytes.len(), "Resource read");
        Ok(ReadResourceResult {
            contents: vec![ResourceContents::BlobResourceContents {
                uri: request.uri.clone(),
                mime_type: Some(resource.mime_type.to_string()),
                blob: BASE64.encode(&resource.bytes),
                meta: None,
            }],
        })
    }
}
