//! Detect/transform pipeline over one loaded module.
//!
//! A pipeline moves through `Empty → Loaded → Detected → Transformed`. The
//! three phases of a transform run on copies of the module and the analyzer
//! state inside a blocking task; the copies replace the originals only after
//! every phase succeeded, so a fault or cancellation leaves the pipeline
//! exactly as it was.

use crate::analyzer::{Analyzer, AnalyzerError, AnalyzerState, Claim};
use crate::engine::{Module, ModuleResolver};
use crate::error::ToolError;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    /// No module loaded.
    Empty,
    /// Module bound in the resolver, not yet offered to analyzers.
    Loaded,
    /// An analyzer (possibly the fallback) owns the module.
    Detected,
    /// All three phases of a pass completed.
    Transformed,
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineState::Empty => write!(f, "empty"),
            PipelineState::Loaded => write!(f, "loaded"),
            PipelineState::Detected => write!(f, "detected"),
            PipelineState::Transformed => write!(f, "transformed"),
        }
    }
}

pub struct Pipeline {
    source_path: PathBuf,
    module: Arc<Module>,
    analyzer: Arc<dyn Analyzer>,
    output_path: PathBuf,
    state: PipelineState,
}

impl Pipeline {
    /// Wrap a freshly bound module. `placeholder` stands in until a claim is recorded.
    pub fn loaded(
        module: Arc<Module>,
        placeholder: Arc<dyn Analyzer>,
        output_extension: &str,
    ) -> Self {
        let source_path = module.path().to_path_buf();
        let output_path = source_path.with_extension(output_extension);
        Self {
            source_path,
            module,
            analyzer: placeholder,
            output_path,
            state: PipelineState::Loaded,
        }
    }

    /// Record the registry's claim.
    pub fn claimed(mut self, claim: Claim) -> Self {
        self.analyzer = claim.into_analyzer();
        self.state = PipelineState::Detected;
        self
    }

    pub fn source_path(&self) -> &Path {
        &self.source_path
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    pub fn module(&self) -> &Arc<Module> {
        &self.module
    }

    pub fn analyzer(&self) -> &Arc<dyn Analyzer> {
        &self.analyzer
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Run `analyzer`'s begin/apply/end phases as one unit.
    ///
    /// On success the transformed module is rebound in `resolver`, `state` is
    /// replaced by the pass's copy and the pipeline records `Transformed`.
    pub async fn transform(
        &mut self,
        analyzer: Arc<dyn Analyzer>,
        state: &mut AnalyzerState,
        resolver: &mut ModuleResolver,
        ct: &CancellationToken,
    ) -> Result<&Path, ToolError> {
        if self.state == PipelineState::Loaded {
            return Err(ToolError::TransformFailed(
                "module has not been offered to any analyzer".to_string(),
            ));
        }

        let working = (*self.module).clone();
        let working_state = state.clone();
        let pass_analyzer = analyzer.clone();
        let pass_ct = ct.clone();
        let handle = tokio::task::spawn_blocking(move || {
            run_pass(pass_analyzer.as_ref(), working, working_state, &pass_ct)
        });

        let outcome = tokio::select! {
            biased;
            _ = ct.cancelled() => {
                debug!(path = %self.source_path.display(), "Transform cancelled");
                return Err(ToolError::Cancelled);
            }
            joined = handle => joined??,
        };

        let module = Arc::new(outcome.module);
        resolver.rebind(module.clone());
        self.module = module;
        *state = outcome.state;
        self.analyzer = analyzer;
        self.state = PipelineState::Transformed;
        info!(
            path = %self.source_path.display(),
            analyzer = self.analyzer.descriptor().type_long,
            "Module transformed"
        );
        Ok(&self.output_path)
    }
}

/// Result of a completed pass.
pub struct PassOutcome {
    pub module: Module,
    pub state: AnalyzerState,
}

/// Drive one pass synchronously, checking for cancellation between phases.
pub fn run_pass(
    analyzer: &dyn Analyzer,
    mut module: Module,
    mut state: AnalyzerState,
    ct: &CancellationToken,
) -> Result<PassOutcome, AnalyzerError> {
    let checkpoint = || {
        if ct.is_cancelled() {
            Err(AnalyzerError::Cancelled)
        } else {
            Ok(())
        }
    };

    let mut pass = analyzer.start_pass();
    checkpoint()?;
    pass.begin(&module, &mut state)?;
    checkpoint()?;
    pass.apply(&mut module, &mut state)?;
    checkpoint()?;
    pass.end(&module, &mut state)?;
    Ok(PassOutcome { module, state })
}
