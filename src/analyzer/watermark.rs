//! Analyzers that recognize an obfuscator by the watermark attribute it
//! leaves in the module, and strip that watermark.

use super::{Analyzer, AnalyzerDescriptor, AnalyzerError, AnalyzerPass, AnalyzerState};
use crate::engine::Module;
use std::sync::Arc;
use tracing::debug;

/// Byte written over every watermark occurrence.
const BLANK: u8 = b'_';

/// Claims modules that contain any of its watermark names.
#[derive(Debug, Clone)]
pub struct WatermarkAnalyzer {
    descriptor: AnalyzerDescriptor,
    watermarks: &'static [&'static str],
}

impl WatermarkAnalyzer {
    pub const fn new(
        descriptor: AnalyzerDescriptor,
        watermarks: &'static [&'static str],
    ) -> Self {
        Self {
            descriptor,
            watermarks,
        }
    }

    /// Built-in analyzers, in registry order.
    pub fn builtin() -> Vec<Arc<dyn Analyzer>> {
        vec![
            Arc::new(Self::new(
                AnalyzerDescriptor {
                    type_long: "Babel .NET",
                    name: "Babel .NET",
                    type_short: "bl",
                },
                &["BabelObfuscatorAttribute", "BabelAttribute"],
            )),
            Arc::new(Self::new(
                AnalyzerDescriptor {
                    type_long: "Confuser",
                    name: "Confuser",
                    type_short: "cr",
                },
                &["ConfusedByAttribute"],
            )),
            Arc::new(Self::new(
                AnalyzerDescriptor {
                    type_long: "Dotfuscator",
                    name: "Dotfuscator",
                    type_short: "df",
                },
                &["DotfuscatorAttribute"],
            )),
            Arc::new(Self::new(
                AnalyzerDescriptor {
                    type_long: "SmartAssembly",
                    name: "SmartAssembly",
                    type_short: "sa",
                },
                &["PoweredByAttribute"],
            )),
        ]
    }

    fn state_key(&self) -> String {
        format!("{}.watermarks_removed", self.descriptor.type_short)
    }
}

impl Analyzer for WatermarkAnalyzer {
    fn descriptor(&self) -> &AnalyzerDescriptor {
        &self.descriptor
    }

    fn claims(&self, module: &Module, _state: &AnalyzerState) -> bool {
        self.watermarks.iter().any(|w| module.contains(w.as_bytes()))
    }

    fn start_pass(&self) -> Box<dyn AnalyzerPass> {
        Box::new(WatermarkPass {
            watermarks: self.watermarks,
            state_key: self.state_key(),
            hits: Vec::new(),
        })
    }
}

struct WatermarkPass {
    watermarks: &'static [&'static str],
    state_key: String,
    /// (offset, length) of each watermark found in `begin`.
    hits: Vec<(usize, usize)>,
}

impl AnalyzerPass for WatermarkPass {
    fn begin(&mut self, module: &Module, _state: &mut AnalyzerState) -> Result<(), AnalyzerError> {
        self.hits = self
            .watermarks
            .iter()
            .flat_map(|w| {
                module
                    .find_all(w.as_bytes())
                    .into_iter()
                    .map(move |offset| (offset, w.len()))
            })
            .collect();
        self.hits.sort_unstable();
        // Keep ranges disjoint.
        self.hits.dedup_by(|b, a| b.0 < a.0 + a.1);
        debug!(hits = self.hits.len(), "Watermark scan complete");
        Ok(())
    }

    fn apply(
        &mut self,
        module: &mut Module,
        _state: &mut AnalyzerState,
    ) -> Result<(), AnalyzerError> {
        let image = module.image_mut();
        for &(offset, len) in &self.hits {
            let range = image.get_mut(offset..offset + len).ok_or_else(|| {
                AnalyzerError::Fault(format!("watermark at {offset:#x} is out of bounds"))
            })?;
            range.fill(BLANK);
        }
        Ok(())
    }

    fn end(&mut self, _module: &Module, state: &mut AnalyzerState) -> Result<(), AnalyzerError> {
        state.increment(&self.state_key, self.hits.len() as u64);
        Ok(())
    }
}
