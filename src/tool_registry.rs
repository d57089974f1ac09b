//! Tool registry for dynamic tool discovery.
//!
//! All tools are exposed in tools/list; `tool_catalog` and `tool_help` add
//! intent search and full documentation on top.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Tool category for grouping related tools
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCategory {
    /// Detect / deobfuscate / save
    Core,
    /// Session pipeline inspection
    Pipeline,
    /// Tool and analyzer discovery
    Discovery,
}

impl ToolCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Core => "core",
            Self::Pipeline => "pipeline",
            Self::Discovery => "discovery",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Core => "Detect the obfuscator, deobfuscate, and save the result",
            Self::Pipeline => "Inspect the session's loaded module and pipeline state",
            Self::Discovery => "Discover tools and available analyzers",
        }
    }

    pub fn all() -> &'static [ToolCategory] {
        &[Self::Core, Self::Pipeline, Self::Discovery]
    }
}

impl FromStr for ToolCategory {
    type Err = ();

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let normalized = input.trim().to_lowercase().replace(['-', ' '], "_");
        match normalized.as_str() {
            "core" | "deobfuscation" | "deob" => Ok(Self::Core),
            "pipeline" | "session" | "status" => Ok(Self::Pipeline),
            "discovery" | "help" | "meta" => Ok(Self::Discovery),
            _ => Err(()),
        }
    }
}

/// Metadata for a single tool
#[derive(Debug, Clone)]
pub struct ToolInfo {
    pub name: &'static str,
    pub category: ToolCategory,
    /// Short description (1 line, <100 chars) - used in tool_catalog results
    pub short_desc: &'static str,
    /// Full description with usage details - used in tool_help
    pub full_desc: &'static str,
    /// Example invocation (JSON)
    pub example: &'static str,
    /// Keywords for search
    pub keywords: &'static [&'static str],
}

/// Static registry of all tools, in tools/list order
pub static TOOL_REGISTRY: &[ToolInfo] = &[
    // === CORE ===
    ToolInfo {
        name: "detect_obfuscator",
        category: ToolCategory::Core,
        short_desc: "Load a module and detect which obfuscator produced it",
        full_desc: "Load the module at `path` into this session and offer it to every analyzer \
                    in registry order (or only to the `analyzers` subset) until one claims it. \
                    Returns the long name of the claiming analyzer, or 'Unknown Obfuscator' when \
                    none does; that is not an error. Replaces any module previously loaded in \
                    this session. Must be called before deobfuscate.",
        example: r#"{"path": "/samples/app.exe"}"#,
        keywords: &["detect", "identify", "load", "open", "obfuscator", "protector", "packer"],
    },
    ToolInfo {
        name: "deobfuscate",
        category: ToolCategory::Core,
        short_desc: "Deobfuscate the loaded module with the detected (or named) analyzer",
        full_desc: "Run the analyzer's begin, apply and end phases over the loaded module as one \
                    unit. Pass `method` (any analyzer alias) to override the detected analyzer. \
                    On failure or cancellation the session keeps its previous state. Returns the \
                    output path; nothing is written until save_deobfuscated.",
        example: r#"{"method": "sa"}"#,
        keywords: &["deobfuscate", "clean", "transform", "remove", "strip", "unpack", "override"],
    },
    ToolInfo {
        name: "save_deobfuscated",
        category: ToolCategory::Core,
        short_desc: "Publish the deobfuscated module as a resource (or write it to disk)",
        full_desc: "Serialize the deobfuscated module. In resource mode returns a resource link \
                    `deob://files/{name}` that can be fetched with resources/read (base64 blob, \
                    application/octet-stream). In file mode writes the module to its output path. \
                    Fails with 'No file available' until deobfuscate has succeeded.",
        example: r#"{}"#,
        keywords: &["save", "download", "export", "write", "resource", "file", "result"],
    },
    // === PIPELINE ===
    ToolInfo {
        name: "pipeline_status",
        category: ToolCategory::Pipeline,
        short_desc: "Show the session's pipeline state and loaded module",
        full_desc: "Report the calling session's pipeline state (empty, detected, transformed), \
                    source and output paths, selected analyzer, loaded modules and the analyzer \
                    state accumulated across deobfuscate calls.",
        example: r#"{}"#,
        keywords: &["status", "state", "session", "pipeline", "progress", "info"],
    },
    // === DISCOVERY ===
    ToolInfo {
        name: "list_analyzers",
        category: ToolCategory::Discovery,
        short_desc: "List available analyzers and their aliases",
        full_desc: "List every analyzer in registry order with its long name, name and short \
                    type. Any of the three can be used for deobfuscate's `method` or \
                    detect_obfuscator's `analyzers`.",
        example: r#"{}"#,
        keywords: &["analyzers", "obfuscators", "list", "supported", "names", "aliases"],
    },
    ToolInfo {
        name: "tool_catalog",
        category: ToolCategory::Discovery,
        short_desc: "Discover tools by query or category",
        full_desc: "Search tools by intent (`query`) or list a category. With neither, lists \
                    the categories with their tool counts.",
        example: r#"{"query": "download the cleaned module"}"#,
        keywords: &["catalog", "discover", "search", "find", "tools"],
    },
    ToolInfo {
        name: "tool_help",
        category: ToolCategory::Discovery,
        short_desc: "Get full documentation for a tool",
        full_desc: "Return a tool's full description, parameter schema and example invocation.",
        example: r#"{"name": "deobfuscate"}"#,
        keywords: &["help", "docs", "documentation", "usage", "schema"],
    },
];

/// Get all tools
pub fn all_tools() -> impl Iterator<Item = &'static ToolInfo> {
    TOOL_REGISTRY.iter()
}

/// Get tool by name
pub fn get_tool(name: &str) -> Option<&'static ToolInfo> {
    TOOL_REGISTRY.iter().find(|t| t.name == name)
}

/// Get tools by category
pub fn tools_by_category(category: ToolCategory) -> impl Iterator<Item = &'static ToolInfo> {
    TOOL_REGISTRY.iter().filter(move |t| t.category == category)
}

/// Search tools by query (simple keyword matching)
pub fn search_tools(query: &str, limit: usize) -> Vec<(&'static ToolInfo, Vec<&'static str>)> {
    let query_lower = query.to_lowercase();
    let query_words: Vec<&str> = query_lower.split_whitespace().collect();

    let mut results: Vec<(&'static ToolInfo, Vec<&'static str>, usize)> = Vec::new();

    for tool in TOOL_REGISTRY.iter() {
        let mut matched_keywords = Vec::new();
        let mut score = 0usize;

        let name_lower = tool.name.to_lowercase();
        for word in &query_words {
            if name_lower.contains(word) {
                score += 10;
                matched_keywords.push("name match");
            }
        }

        let desc_lower = tool.short_desc.to_lowercase();
        for word in &query_words {
            if desc_lower.contains(word) {
                score += 5;
            }
        }

        for keyword in tool.keywords {
            for word in &query_words {
                if keyword.contains(word) || word.contains(keyword) {
                    score += 3;
                    if !matched_keywords.contains(keyword) {
                        matched_keywords.push(keyword);
                    }
                }
            }
        }

        let cat_str = tool.category.as_str();
        for word in &query_words {
            if cat_str.contains(word) {
                score += 2;
                matched_keywords.push(cat_str);
            }
        }

        if score > 0 {
            results.push((tool, matched_keywords, score));
        }
    }

    // Stable sort keeps registry order among equal scores
    results.sort_by(|a, b| b.2.cmp(&a.2));

    results
        .into_iter()
        .take(limit)
        .map(|(tool, keywords, _)| (tool, keywords))
        .collect()
}
