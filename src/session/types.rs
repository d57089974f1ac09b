//! Session and session info types.

use crate::analyzer::{AnalyzerDescriptor, AnalyzerState};
use crate::engine::ModuleResolver;
use crate::pipeline::{Pipeline, PipelineState};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Per-client state: one resolver, one analyzer-state store, at most one pipeline.
pub struct Session {
    /// Opaque identifier supplied by the transport.
    pub id: String,
    /// When the session was created.
    pub created_at: DateTime<Utc>,
    /// Modules loaded for this session.
    pub resolver: ModuleResolver,
    /// Knowledge accumulated across transform calls.
    pub analyzer_state: AnalyzerState,
    /// The active pipeline, if any.
    pub pipeline: Option<Pipeline>,
}

impl Session {
    /// Create an empty session.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            created_at: Utc::now(),
            resolver: ModuleResolver::new(),
            analyzer_state: AnalyzerState::new(),
            pipeline: None,
        }
    }

    /// Get the current pipeline state (`Empty` when there is no pipeline).
    pub fn pipeline_state(&self) -> PipelineState {
        self.pipeline
            .as_ref()
            .map(Pipeline::state)
            .unwrap_or(PipelineState::Empty)
    }

    /// Snapshot for status responses.
    pub fn info(&self) -> SessionInfo {
        let pipeline = self.pipeline.as_ref();
        SessionInfo {
            id: self.id.clone(),
            created_at: self.created_at,
            state: self.pipeline_state(),
            source_path: pipeline.map(|p| p.source_path().display().to_string()),
            output_path: pipeline.map(|p| p.output_path().display().to_string()),
            analyzer: pipeline.map(|p| *p.analyzer().descriptor()),
            loaded_modules: self
                .resolver
                .loaded_paths()
                .iter()
                .map(|p| p.display().to_string())
                .collect(),
            analyzer_state: self.analyzer_state.clone(),
        }
    }
}

/// Information about a session (serializable for API responses).
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub state: PipelineState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analyzer: Option<AnalyzerDescriptor>,
    pub loaded_modules: Vec<String>,
    pub analyzer_state: AnalyzerState,
}
