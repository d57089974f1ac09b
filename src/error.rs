//! Error types for the deobfuscation MCP server.
//!
//! Tool execution errors are returned with `is_error: true` in CallToolResult,
//! while protocol errors (invalid tool name, malformed args) are handled by rmcp.

use rmcp::model::{CallToolResult, Content};
use thiserror::Error;

use crate::analyzer::AnalyzerError;

/// Tool execution errors - returned with is_error: true in CallToolResult
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ToolError {
    #[error("Failed to load module: {0}")]
    LoadFailed(String),

    #[error("No file loaded in this session. Call detect_obfuscator first.")]
    NoActivePipeline,

    #[error("No file available: the loaded module has not been deobfuscated yet")]
    NotYetTransformed,

    #[error("Deobfuscation failed: {0}")]
    TransformFailed(String),

    #[error("Unknown resource: {0}")]
    UnknownResource(String),

    #[error("No analyzer matches '{0}'. Use list_analyzers to see valid names.")]
    UnknownAnalyzer(String),

    #[error("Invalid module path: {0}")]
    InvalidPath(String),

    #[error("Invalid parameters: {0}")]
    InvalidParams(String),

    #[error("Failed to publish module: {0}")]
    PublishFailed(String),

    #[error("Operation cancelled")]
    Cancelled,
}

impl ToolError {
    /// Convert to MCP CallToolResult with is_error: true
    pub fn to_tool_result(&self) -> CallToolResult {
        CallToolResult::error(vec![Content::text(self.to_string())])
    }
}

impl From<AnalyzerError> for ToolError {
    fn from(e: AnalyzerError) -> Self {
        match e {
            AnalyzerError::Cancelled => ToolError::Cancelled,
            other => ToolError::TransformFailed(other.to_string()),
        }
    }
}

impl From<tokio::task::JoinError> for ToolError {
    fn from(e: tokio::task::JoinError) -> Self {
        if e.is_panic() {
            ToolError::TransformFailed("analyzer panicked".to_string())
        } else {
            ToolError::Cancelled
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_result_is_flagged_as_error() {
        let result = ToolError::NoActivePipeline.to_tool_result();
        assert_eq!(result.is_error, Some(true));
    }

    #[test]
    fn analyzer_cancellation_maps_to_cancelled() {
        assert_eq!(ToolError::from(AnalyzerError::Cancelled), ToolError::Cancelled);
        assert!(matches!(
            ToolError::from(AnalyzerError::Fault("bad header".into())),
            ToolError::TransformFailed(msg) if msg.contains("bad header")
        ));
    }
}
