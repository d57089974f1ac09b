//! Fallback analyzer used when nothing claims a module.

use super::{Analyzer, AnalyzerDescriptor, AnalyzerError, AnalyzerPass, AnalyzerState};
use crate::engine::Module;

const DESCRIPTOR: AnalyzerDescriptor = AnalyzerDescriptor {
    type_long: "Unknown Obfuscator",
    name: "Unknown",
    type_short: "un",
};

/// Never claims a module; its pass leaves the image untouched.
#[derive(Debug, Default)]
pub struct UnknownAnalyzer;

impl Analyzer for UnknownAnalyzer {
    fn descriptor(&self) -> &AnalyzerDescriptor {
        &DESCRIPTOR
    }

    fn claims(&self, _module: &Module, _state: &AnalyzerState) -> bool {
        false
    }

    fn start_pass(&self) -> Box<dyn AnalyzerPass> {
        Box::new(PassthroughPass)
    }
}

struct PassthroughPass;

impl AnalyzerPass for PassthroughPass {
    fn begin(&mut self, _module: &Module, _state: &mut AnalyzerState) -> Result<(), AnalyzerError> {
        Ok(())
    }

    fn apply(
        &mut self,
        _module: &mut Module,
        _state: &mut AnalyzerState,
    ) -> Result<(), AnalyzerError> {
        Ok(())
    }

    fn end(&mut self, _module: &Module, _state: &mut AnalyzerState) -> Result<(), AnalyzerError> {
        Ok(())
    }
}
