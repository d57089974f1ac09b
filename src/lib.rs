//! Session-scoped deobfuscation MCP server
//!
//! This library exposes an obfuscator-detection and deobfuscation workflow over
//! MCP (Model Context Protocol). Every client session gets an isolated pipeline
//! over one loaded module: detect which obfuscator produced it, deobfuscate it,
//! then fetch the result as a resource.
//!
//! # Architecture
//!
//! - **SessionManager**: process-wide map from transport session id to
//!   [`Session`](session::Session). Sessions are created on first use and
//!   evicted after a configurable idle period.
//!
//! - **Pipeline**: one loaded module plus the analyzer chosen for it, moving
//!   through `Empty → Loaded → Detected → Transformed`. Transforms run on
//!   copies in a blocking task and commit only when every phase succeeded.
//!
//! - **AnalyzerRegistry**: closed, ordered set of analyzers built at startup.
//!   The first analyzer to claim a module wins; the "unknown" analyzer is the
//!   passthrough fallback when none does.
//!
//! - **DeobfuscationService**: the detect / transform / publish facade.
//!
//! - **DeobMcpServer**: the `rmcp` server handler exposing the facade as tools
//!   and the published modules as `deob://files/{name}` resources.
//!
//! # Tools
//!
//! ## Core
//! - `detect_obfuscator`: Load a module and identify its obfuscator
//! - `deobfuscate`: Deobfuscate the loaded module (optionally forcing an analyzer)
//! - `save_deobfuscated`: Publish the result as a resource, or write it to disk
//!
//! ## Pipeline
//! - `pipeline_status`: Show the session's pipeline state
//!
//! ## Discovery
//! - `list_analyzers`: List analyzers and their aliases
//! - `tool_catalog`: Search tools by intent or category
//! - `tool_help`: Full documentation for one tool

use std::path::PathBuf;

pub mod analyzer;
pub mod config;
pub mod engine;
pub mod error;
pub mod pipeline;
pub mod publish;
pub mod server;
pub mod service;
pub mod session;
pub mod tool_registry;

pub use analyzer::{Analyzer, AnalyzerDescriptor, AnalyzerPass, AnalyzerRegistry, Claim};
pub use config::{PublishMode, ServiceConfig};
pub use error::ToolError;
pub use pipeline::{Pipeline, PipelineState};
pub use publish::{Publication, PublishedResource};
pub use server::DeobMcpServer;
pub use service::DeobfuscationService;
pub use session::{SessionInfo, SessionManager, SessionStats};
pub use tool_registry::{ToolCategory, ToolInfo, TOOL_REGISTRY};

/// Expand `~/` prefix to the user's home directory.
pub fn expand_path(path: &str) -> PathBuf {
    path.strip_prefix("~/")
        .and_then(|stripped| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(stripped)))
        .unwrap_or_else(|| PathBuf::from(path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expand_path_leaves_plain_paths_alone() {
        assert_eq!(expand_path("/tmp/app.exe"), PathBuf::from("/tmp/app.exe"));
        assert_eq!(expand_path("rel/app.exe"), PathBuf::from("rel/app.exe"));
    }
}
