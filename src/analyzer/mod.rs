//! Pluggable analyzers.
//!
//! An [`Analyzer`] recognizes modules produced by one obfuscation scheme and,
//! once selected, starts an [`AnalyzerPass`] that rewrites the module in three
//! ordered phases: `begin` (scan and prepare), `apply` (the only phase that
//! receives the module mutably) and `end` (finalize bookkeeping).
//!
//! The set of analyzers is closed and built at startup; see [`AnalyzerRegistry`].

mod registry;
mod state;
mod unknown;
mod watermark;

pub use registry::{AnalyzerRegistry, Claim};
pub use state::AnalyzerState;
pub use unknown::UnknownAnalyzer;
pub use watermark::WatermarkAnalyzer;

use crate::engine::Module;
use serde::Serialize;
use thiserror::Error;

/// Identity of an analyzer. Any of the three aliases selects it by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AnalyzerDescriptor {
    /// Long human-readable identity, e.g. "SmartAssembly".
    pub type_long: &'static str,
    /// Short identifier, e.g. "SmartAssembly".
    pub name: &'static str,
    /// Category identifier, e.g. "sa".
    pub type_short: &'static str,
}

impl AnalyzerDescriptor {
    /// ASCII case-insensitive match on any alias.
    pub fn matches(&self, alias: &str) -> bool {
        let alias = alias.trim();
        [self.type_long, self.name, self.type_short]
            .iter()
            .any(|a| a.eq_ignore_ascii_case(alias))
    }
}

/// Faults raised by an analyzer pass.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AnalyzerError {
    #[error("{0}")]
    Fault(String),
    #[error("pass cancelled")]
    Cancelled,
}

/// A pluggable analyzer: claims modules and starts rewrite passes.
pub trait Analyzer: Send + Sync {
    fn descriptor(&self) -> &AnalyzerDescriptor;

    /// Whether this analyzer recognizes `module`. Must not mutate anything.
    fn claims(&self, module: &Module, state: &AnalyzerState) -> bool;

    /// Start a fresh pass. Per-pass scratch lives in the returned value.
    fn start_pass(&self) -> Box<dyn AnalyzerPass>;
}

/// One three-phase rewrite of a module.
pub trait AnalyzerPass: Send {
    fn begin(&mut self, module: &Module, state: &mut AnalyzerState) -> Result<(), AnalyzerError>;

    fn apply(&mut self, module: &mut Module, state: &mut AnalyzerState)
        -> Result<(), AnalyzerError>;

    fn end(&mut self, module: &Module, state: &mut AnalyzerState) -> Result<(), AnalyzerError>;
}
