//! Closed, ordered set of analyzers built at startup.

use super::{Analyzer, AnalyzerState, UnknownAnalyzer, WatermarkAnalyzer};
use crate::engine::Module;
use crate::error::ToolError;
use std::sync::Arc;
use tracing::debug;

/// Outcome of offering a module to the registry.
///
/// Nothing claiming a module is an expected outcome, not a fault.
#[derive(Clone)]
pub enum Claim {
    Claimed(Arc<dyn Analyzer>),
    Fallback(Arc<dyn Analyzer>),
}

impl Claim {
    pub fn analyzer(&self) -> &Arc<dyn Analyzer> {
        match self {
            Claim::Claimed(a) | Claim::Fallback(a) => a,
        }
    }

    pub fn into_analyzer(self) -> Arc<dyn Analyzer> {
        match self {
            Claim::Claimed(a) | Claim::Fallback(a) => a,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, Claim::Fallback(_))
    }
}

impl std::fmt::Debug for Claim {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = if self.is_fallback() { "Fallback" } else { "Claimed" };
        f.debug_tuple(kind)
            .field(&self.analyzer().descriptor().type_long)
            .finish()
    }
}

pub struct AnalyzerRegistry {
    fallback: Arc<dyn Analyzer>,
    analyzers: Vec<Arc<dyn Analyzer>>,
}

impl AnalyzerRegistry {
    /// Registry over `analyzers` (scan order), with [`UnknownAnalyzer`] as fallback.
    pub fn new(analyzers: Vec<Arc<dyn Analyzer>>) -> Self {
        Self {
            fallback: Arc::new(UnknownAnalyzer),
            analyzers,
        }
    }

    pub fn builtin() -> Self {
        Self::new(WatermarkAnalyzer::builtin())
    }

    /// Every analyzer in registry order; the fallback is listed first.
    pub fn all(&self) -> impl Iterator<Item = &Arc<dyn Analyzer>> {
        std::iter::once(&self.fallback).chain(self.analyzers.iter())
    }

    pub fn fallback(&self) -> &Arc<dyn Analyzer> {
        &self.fallback
    }

    /// First analyzer, in registry order, matching `alias`.
    pub fn find(&self, alias: &str) -> Option<Arc<dyn Analyzer>> {
        self.all().find(|a| a.descriptor().matches(alias)).cloned()
    }

    /// Resolve a caller-named subset, keeping registry order.
    pub fn select(&self, aliases: &[String]) -> Result<Vec<Arc<dyn Analyzer>>, ToolError> {
        if let Some(unknown) = aliases.iter().find(|n| self.find(n).is_none()) {
            return Err(ToolError::UnknownAnalyzer(unknown.clone()));
        }
        Ok(self
            .all()
            .filter(|a| aliases.iter().any(|n| a.descriptor().matches(n)))
            .cloned()
            .collect())
    }

    /// Offer `module` to each candidate in order; first claim wins.
    ///
    /// With no candidates given, the whole registry is scanned.
    pub fn claim(
        &self,
        module: &Module,
        state: &AnalyzerState,
        candidates: Option<&[Arc<dyn Analyzer>]>,
    ) -> Claim {
        let candidates = candidates.unwrap_or(self.analyzers.as_slice());
        for analyzer in candidates {
            if analyzer.claims(module, state) {
                debug!(analyzer = analyzer.descriptor().type_long, "Module claimed");
                return Claim::Claimed(analyzer.clone());
            }
        }
        debug!("No analyzer claimed module, using fallback");
        Claim::Fallback(self.fallback.clone())
    }
}
