//! MCP tool request types.
//!
//! These structs define the parameters for each MCP tool exposed by the server.

use rmcp::schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Deserialize, JsonSchema)]
pub struct DetectRequest {
    #[schemars(
        description = "Path to the compiled module to analyze. Replaces any module already loaded in this session."
    )]
    #[serde(alias = "file", alias = "file_path")]
    pub path: String,
    #[schemars(
        description = "Optional subset of analyzers to try, by any alias (string, comma-separated string, or array). Defaults to every analyzer in registry order."
    )]
    #[serde(alias = "analyzer", alias = "only")]
    pub analyzers: Option<Value>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct DeobfuscateRequest {
    #[schemars(
        description = "Optional analyzer override (long name, name or short type, e.g. 'SmartAssembly' or 'sa'). Omit to use the detected analyzer."
    )]
    #[serde(alias = "name", alias = "analyzer")]
    pub method: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct EmptyParams {}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ToolCatalogRequest {
    #[schemars(
        description = "What you're trying to accomplish (e.g., 'remove obfuscation', 'download the result')"
    )]
    pub query: Option<String>,
    #[schemars(description = "Filter by category: core, pipeline, discovery")]
    pub category: Option<String>,
    #[schemars(description = "Maximum number of tools to return (default: 7)")]
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ToolHelpRequest {
    #[schemars(description = "Name of the tool to get help for")]
    pub name: String,
}
