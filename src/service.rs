//! Operation facade: the session-scoped detect / transform / publish workflow.
//!
//! Each operation resolves (or creates) the caller's session, holds the
//! session lock for its whole duration and translates engine outcomes into
//! [`ToolError`]s. Nothing here knows about MCP; the server layer maps these
//! results onto tool responses.

use crate::analyzer::{AnalyzerDescriptor, AnalyzerRegistry};
use crate::config::{PublishMode, ServiceConfig};
use crate::engine::{Module, ModuleResolver};
use crate::error::ToolError;
use crate::pipeline::{Pipeline, PipelineState};
use crate::publish::{resource_name, resource_uri, Publication, PublishedResource};
use crate::session::{SessionGuard, SessionInfo, SessionManager, SessionSlot, SessionStats};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

pub struct DeobfuscationService {
    manager: Arc<SessionManager>,
    registry: AnalyzerRegistry,
    config: ServiceConfig,
}

impl DeobfuscationService {
    pub fn new(registry: AnalyzerRegistry, config: ServiceConfig) -> Self {
        Self {
            manager: Arc::new(SessionManager::new()),
            registry,
            config,
        }
    }

    pub fn manager(&self) -> &Arc<SessionManager> {
        &self.manager
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Descriptors of every analyzer, in registry order.
    pub fn analyzers(&self) -> Vec<AnalyzerDescriptor> {
        self.registry.all().map(|a| *a.descriptor()).collect()
    }

    /// Load `path` into the session and offer it to the analyzers.
    ///
    /// `analyzers` restricts the candidates to the named subset. The returned
    /// descriptor is the fallback's when nothing claims the module. On any
    /// failure the session's previous pipeline and module binding are kept.
    #[instrument(skip(self, path, analyzers, ct), fields(path = %path.display()))]
    pub async fn detect(
        &self,
        session_id: &str,
        path: &Path,
        analyzers: Option<&[String]>,
        ct: &CancellationToken,
    ) -> Result<AnalyzerDescriptor, ToolError> {
        if path.as_os_str().is_empty() {
            return Err(ToolError::InvalidPath("path must not be empty".to_string()));
        }
        let candidates = analyzers.map(|names| self.registry.select(names)).transpose()?;

        let slot = self.manager.get_or_create(session_id).await;
        let mut guard = lock_or_cancel(&slot, ct).await?;
        let session = &mut *guard;

        let key = tokio::select! {
            biased;
            _ = ct.cancelled() => return Err(ToolError::Cancelled),
            key = ModuleResolver::canonical_key(path) => key?,
        };
        let loaded = tokio::select! {
            biased;
            _ = ct.cancelled() => return Err(ToolError::Cancelled),
            module = Module::read(&key) => module?,
        };

        // No await past this point: the swap completes or is undone as a unit.
        let previous = session.pipeline.take();
        let released = previous
            .as_ref()
            .and_then(|p| session.resolver.release(p.source_path()));
        let module = match session.resolver.bind(loaded) {
            Ok(module) => module,
            Err(e) => {
                if let Some(module) = released {
                    session.resolver.rebind(module);
                }
                session.pipeline = previous;
                warn!(session_id = %session.id, error = %e, "Detect failed, previous pipeline kept");
                return Err(e);
            }
        };

        let claim = self
            .registry
            .claim(&module, &session.analyzer_state, candidates.as_deref());
        let fallback = claim.is_fallback();
        let pipeline = Pipeline::loaded(
            module,
            self.registry.fallback().clone(),
            &self.config.output_extension,
        )
        .claimed(claim);
        let descriptor = *pipeline.analyzer().descriptor();
        session.pipeline = Some(pipeline);

        info!(
            session_id = %session.id,
            analyzer = descriptor.type_long,
            fallback,
            "Obfuscator detected"
        );
        Ok(descriptor)
    }

    /// Run the pipeline's analyzer (or the one named by `method`) over the module.
    ///
    /// A blank `method` keeps the analyzer chosen at detect time.
    #[instrument(skip(self, ct))]
    pub async fn transform(
        &self,
        session_id: &str,
        method: Option<&str>,
        ct: &CancellationToken,
    ) -> Result<PathBuf, ToolError> {
        let slot = self.manager.get_or_create(session_id).await;
        let mut guard = lock_or_cancel(&slot, ct).await?;
        let session = &mut *guard;

        let pipeline = session
            .pipeline
            .as_mut()
            .ok_or(ToolError::NoActivePipeline)?;
        let analyzer = match method.map(str::trim).filter(|m| !m.is_empty()) {
            Some(name) => self
                .registry
                .find(name)
                .ok_or_else(|| ToolError::UnknownAnalyzer(name.to_string()))?,
            None => pipeline.analyzer().clone(),
        };

        let output = pipeline
            .transform(
                analyzer,
                &mut session.analyzer_state,
                &mut session.resolver,
                ct,
            )
            .await?;
        Ok(output.to_path_buf())
    }

    /// Hand the transformed module to the caller using the configured strategy.
    #[instrument(skip(self, ct))]
    pub async fn publish(
        &self,
        session_id: &str,
        ct: &CancellationToken,
    ) -> Result<Publication, ToolError> {
        let slot = self.manager.get_or_create(session_id).await;
        let session = lock_or_cancel(&slot, ct).await?;
        let pipeline = session.pipeline.as_ref();
        let resource = PublishedResource::from_pipeline(pipeline)?;

        match self.config.publish_mode {
            PublishMode::Resource => {
                info!(session_id = %session.id, uri = %resource.uri, "Resource published");
                Ok(Publication::Resource {
                    name: resource.name,
                    uri: resource.uri,
                })
            }
            PublishMode::File => {
                let path = pipeline
                    .map(|p| p.output_path().to_path_buf())
                    .ok_or(ToolError::NoActivePipeline)?;
                tokio::fs::write(&path, &resource.bytes)
                    .await
                    .map_err(|e| ToolError::PublishFailed(format!("{}: {}", path.display(), e)))?;
                info!(
                    session_id = %session.id,
                    path = %path.display(),
                    bytes = resource.bytes.len(),
                    "Module written"
                );
                Ok(Publication::File {
                    path,
                    bytes_written: resource.bytes.len(),
                })
            }
        }
    }

    /// Serve a resource read. Sessions are never created here.
    pub async fn fetch(&self, session_id: &str, name: &str) -> Result<PublishedResource, ToolError> {
        let Some(slot) = self.manager.get(session_id).await else {
            return Err(ToolError::UnknownResource(resource_uri(name)));
        };
        let session = slot.lock().await;
        PublishedResource::fetch(session.pipeline.as_ref(), name)
    }

    /// Name of the session's fetchable resource, if its pipeline is Transformed.
    pub async fn published_name(&self, session_id: &str) -> Option<String> {
        let slot = self.manager.get(session_id).await?;
        let session = slot.lock().await;
        session
            .pipeline
            .as_ref()
            .filter(|p| p.state() == PipelineState::Transformed)
            .map(resource_name)
    }

    pub async fn status(&self, session_id: &str) -> SessionInfo {
        let slot = self.manager.get_or_create(session_id).await;
        let session = slot.lock().await;
        session.info()
    }

    pub async fn stats(&self) -> SessionStats {
        self.manager.stats().await
    }
}

async fn lock_or_cancel<'a>(
    slot: &'a SessionSlot,
    ct: &CancellationToken,
) -> Result<SessionGuard<'a>, ToolError> {
    tokio::select! {
        biased;
        _ = ct.cancelled() => Err(ToolError::Cancelled),
        guard = slot.lock() => Ok(guard),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::{Analyzer, AnalyzerError, AnalyzerPass, AnalyzerState};
    use std::time::Duration;
    use tempfile::TempDir;

    #[derive(Clone, Copy)]
    enum Behavior {
        Fill(u8),
        Fail,
        Panic,
        Slow(Duration),
    }

    /// Claims modules containing `marker`; its pass overwrites the marker.
    struct MarkerAnalyzer {
        descriptor: AnalyzerDescriptor,
        marker: &'static [u8],
        behavior: Behavior,
    }

    struct MarkerPass {
        short: &'static str,
        marker: &'static [u8],
        behavior: Behavior,
        hits: Vec<usize>,
    }

    impl Analyzer for MarkerAnalyzer {
        fn descriptor(&self) -> &AnalyzerDescriptor {
            &self.descriptor
        }

        fn claims(&self, module: &Module, _state: &AnalyzerState) -> bool {
            module.contains(self.marker)
        }

        fn start_pass(&self) -> Box<dyn AnalyzerPass> {
            Box::new(MarkerPass {
                short: self.descriptor.type_short,
                marker: self.marker,
                behavior: self.behavior,
                hits: Vec::new(),
            })
        }
    }

    impl MarkerPass {
        fn fill(&self, module: &mut Module, byte: u8) {
            let image = module.image_mut();
            for &offset in &self.hits {
                image[offset..offset + self.marker.len()].fill(byte);
            }
        }
    }

    impl AnalyzerPass for MarkerPass {
        fn begin(&mut self, module: &Module, state: &mut AnalyzerState) -> Result<(), AnalyzerError> {
            self.hits = module.find_all(self.marker);
            state.increment(&format!("{}.begun", self.short), 1);
            Ok(())
        }

        fn apply(
            &mut self,
            module: &mut Module,
            _state: &mut AnalyzerState,
        ) -> Result<(), AnalyzerError> {
            match self.behavior {
                Behavior::Fill(byte) => self.fill(module, byte),
                Behavior::Fail => return Err(AnalyzerError::Fault("apply exploded".into())),
                Behavior::Panic => panic!("apply exploded"),
                Behavior::Slow(delay) => {
                    std::thread::sleep(delay);
                    self.fill(module, b'.');
                }
            }
            Ok(())
        }

        fn end(&mut self, _module: &Module, state: &mut AnalyzerState) -> Result<(), AnalyzerError> {
            state.increment(&format!("{}.passes", self.short), 1);
            Ok(())
        }
    }

    fn marker(
        type_long: &'static str,
        name: &'static str,
        type_short: &'static str,
        marker: &'static [u8],
        behavior: Behavior,
    ) -> Arc<dyn Analyzer> {
        Arc::new(MarkerAnalyzer {
            descriptor: AnalyzerDescriptor {
                type_long,
                name,
                type_short,
            },
            marker,
            behavior,
        })
    }

    fn test_registry() -> AnalyzerRegistry {
        AnalyzerRegistry::new(vec![
            marker("Xenon Protector", "Xenon", "xe", b"MARK-X", Behavior::Fill(b'x')),
            marker("Yarrow Guard", "Yarrow", "ya", b"MARK-Y", Behavior::Fill(b'y')),
            marker("Faulty Packer", "Faulty", "fa", b"MARK-FAIL", Behavior::Fail),
            marker("Crashing Packer", "Crashing", "cp", b"MARK-PANIC", Behavior::Panic),
            marker(
                "Slow Packer",
                "Slow",
                "sl",
                b"MARK-SLOW",
                Behavior::Slow(Duration::from_millis(400)),
            ),
        ])
    }

    fn service() -> DeobfuscationService {
        DeobfuscationService::new(test_registry(), ServiceConfig::default())
    }

    fn write(dir: &TempDir, name: &str, bytes: &[u8]) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, bytes).unwrap();
        std::fs::canonicalize(path).unwrap()
    }

    fn ct() -> CancellationToken {
        CancellationToken::new()
    }

    #[tokio::test]
    async fn transform_before_detect_fails() {
        let service = service();
        let err = service.transform("s1", None, &ct()).await.unwrap_err();
        assert_eq!(err, ToolError::NoActivePipeline);
        assert_eq!(service.status("s1").await.state, PipelineState::Empty);
    }

    #[tokio::test]
    async fn publish_requires_transformed_pipeline() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "a.bin", b"plain bytes");
        let service = service();

        let err = service.publish("s1", &ct()).await.unwrap_err();
        assert_eq!(err, ToolError::NoActivePipeline);

        service.detect("s1", &path, None, &ct()).await.unwrap();
        let err = service.publish("s1", &ct()).await.unwrap_err();
        assert_eq!(err, ToolError::NotYetTransformed);
        assert!(err.to_string().contains("No file available"));
    }

    #[tokio::test]
    async fn unclaimed_module_passes_through_unchanged() {
        let dir = TempDir::new().unwrap();
        let original = b"nothing to see here".to_vec();
        let path = write(&dir, "a.bin", &original);
        let service = service();

        let detected = service.detect("s1", &path, None, &ct()).await.unwrap();
        assert_eq!(detected.type_long, "Unknown Obfuscator");

        let output = service.transform("s1", None, &ct()).await.unwrap();
        assert_eq!(output, path.with_extension("deobfuscate.dll"));

        let publication = service.publish("s1", &ct()).await.unwrap();
        assert_eq!(
            publication,
            Publication::Resource {
                name: "a.deobfuscate.dll".to_string(),
                uri: "deob://files/a.deobfuscate.dll".to_string(),
            }
        );

        let resource = service.fetch("s1", "a.deobfuscate.dll").await.unwrap();
        assert_eq!(resource.bytes, original);
        assert_eq!(resource.mime_type, "application/octet-stream");
        // Nothing is written in resource mode.
        assert!(!output.exists());
    }

    #[tokio::test]
    async fn publish_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "app.exe", b"head MARK-X tail");
        let service = service();
        service.detect("s1", &path, None, &ct()).await.unwrap();
        service.transform("s1", None, &ct()).await.unwrap();

        let first = service.publish("s1", &ct()).await.unwrap();
        let second = service.publish("s1", &ct()).await.unwrap();
        assert_eq!(first, second);

        let a = service.fetch("s1", "app.deobfuscate.dll").await.unwrap();
        let b = service.fetch("s1", "app.deobfuscate.dll").await.unwrap();
        assert_eq!(a.bytes, b.bytes);
        assert_eq!(a.bytes, b"head xxxxxx tail");
    }

    #[tokio::test]
    async fn sessions_are_isolated() {
        let dir = TempDir::new().unwrap();
        let a = write(&dir, "a.bin", b"MARK-X");
        let b = write(&dir, "b.bin", b"MARK-Y");
        let service = service();

        service.detect("s1", &a, None, &ct()).await.unwrap();
        service.transform("s1", None, &ct()).await.unwrap();

        let other = service.status("s2").await;
        assert_eq!(other.state, PipelineState::Empty);
        assert!(other.loaded_modules.is_empty());
        assert_eq!(
            service.transform("s2", None, &ct()).await.unwrap_err(),
            ToolError::NoActivePipeline
        );
        assert!(matches!(
            service.fetch("s2", "a.deobfuscate.dll").await,
            Err(ToolError::UnknownResource(_))
        ));

        let detected = service.detect("s2", &b, None, &ct()).await.unwrap();
        assert_eq!(detected.type_short, "ya");

        let first = service.status("s1").await;
        assert_eq!(first.state, PipelineState::Transformed);
        assert_eq!(first.source_path.as_deref(), Some(a.to_str().unwrap()));
        assert_eq!(first.analyzer_state.counter("xe.passes"), 1);
        assert_eq!(service.status("s2").await.analyzer_state.counter("xe.passes"), 0);
    }

    #[tokio::test]
    async fn unknown_session_has_no_resources() {
        let service = service();
        assert!(matches!(
            service.fetch("ghost", "a.dll").await,
            Err(ToolError::UnknownResource(uri)) if uri == "deob://files/a.dll"
        ));
        assert!(service.published_name("ghost").await.is_none());
        assert!(service.manager().get("ghost").await.is_none());
    }

    #[tokio::test]
    async fn second_detect_releases_previous_module() {
        let dir = TempDir::new().unwrap();
        let a = write(&dir, "a.bin", b"first");
        let b = write(&dir, "b.bin", b"second");
        let service = service();

        service.detect("s1", &a, None, &ct()).await.unwrap();
        service.detect("s1", &b, None, &ct()).await.unwrap();
        let info = service.status("s1").await;
        assert_eq!(info.loaded_modules, vec![b.display().to_string()]);

        // Reusing the same path must not collide in the resolver.
        service.detect("s1", &b, None, &ct()).await.unwrap();
        service.detect("s1", &b, None, &ct()).await.unwrap();
        let info = service.status("s1").await;
        assert_eq!(info.loaded_modules.len(), 1);
        assert_eq!(info.state, PipelineState::Detected);
    }

    #[tokio::test]
    async fn override_selects_by_any_alias() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "app.exe", b"MARK-X MARK-Y");

        for alias in ["Yarrow Guard", "yarrow", "YA"] {
            let service = service();
            let detected = service.detect("s1", &path, None, &ct()).await.unwrap();
            assert_eq!(detected.type_short, "xe");

            service.transform("s1", Some(alias), &ct()).await.unwrap();
            let resource = service.fetch("s1", "app.deobfuscate.dll").await.unwrap();
            assert_eq!(resource.bytes, b"MARK-X yyyyyy", "alias {alias}");

            let info = service.status("s1").await;
            assert_eq!(info.analyzer.map(|d| d.type_short), Some("ya"));
            assert_eq!(info.analyzer_state.counter("ya.passes"), 1);
            assert_eq!(info.analyzer_state.counter("xe.passes"), 0);
        }
    }

    #[tokio::test]
    async fn unknown_override_fails_without_reusing_claim() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "app.exe", b"MARK-X");
        let service = service();
        service.detect("s1", &path, None, &ct()).await.unwrap();

        let err = service.transform("s1", Some("Rummage"), &ct()).await.unwrap_err();
        assert_eq!(err, ToolError::UnknownAnalyzer("Rummage".to_string()));
        let info = service.status("s1").await;
        assert_eq!(info.state, PipelineState::Detected);
        assert_eq!(info.analyzer_state.counter("xe.passes"), 0);
    }

    #[tokio::test]
    async fn blank_override_keeps_detected_analyzer() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "app.exe", b"MARK-X");
        let service = service();
        service.detect("s1", &path, None, &ct()).await.unwrap();
        service.transform("s1", Some("  "), &ct()).await.unwrap();
        assert_eq!(service.status("s1").await.analyzer_state.counter("xe.passes"), 1);
    }

    #[tokio::test]
    async fn analyzer_subset_restricts_detection() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "app.exe", b"MARK-X MARK-Y");
        let service = service();

        let subset = vec!["Yarrow".to_string()];
        let detected = service
            .detect("s1", &path, Some(&subset), &ct())
            .await
            .unwrap();
        assert_eq!(detected.type_short, "ya");

        let bad = vec!["xe".to_string(), "nope".to_string()];
        let err = service
            .detect("s1", &path, Some(&bad), &ct())
            .await
            .unwrap_err();
        assert_eq!(err, ToolError::UnknownAnalyzer("nope".to_string()));
        assert_eq!(
            service.status("s1").await.analyzer.map(|d| d.type_short),
            Some("ya")
        );
    }

    #[tokio::test]
    async fn failing_apply_leaves_pipeline_detected() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "app.exe", b"MARK-FAIL");
        let service = service();
        service.detect("s1", &path, None, &ct()).await.unwrap();

        let err = service.transform("s1", None, &ct()).await.unwrap_err();
        assert!(matches!(err, ToolError::TransformFailed(msg) if msg.contains("apply exploded")));

        let info = service.status("s1").await;
        assert_eq!(info.state, PipelineState::Detected);
        // Begin ran on a copy; its bookkeeping was discarded with the failure.
        assert_eq!(info.analyzer_state.counter("fa.begun"), 0);
        assert_eq!(
            service.publish("s1", &ct()).await.unwrap_err(),
            ToolError::NotYetTransformed
        );
    }

    #[tokio::test]
    async fn panicking_analyzer_is_a_transform_failure() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "app.exe", b"MARK-PANIC");
        let service = service();
        service.detect("s1", &path, None, &ct()).await.unwrap();

        let err = service.transform("s1", None, &ct()).await.unwrap_err();
        assert!(matches!(err, ToolError::TransformFailed(_)));
        assert_eq!(service.status("s1").await.state, PipelineState::Detected);
    }

    #[tokio::test]
    async fn cancellation_mid_transform_leaves_pipeline_detected() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "app.exe", b"MARK-SLOW");
        let service = service();
        service.detect("s1", &path, None, &ct()).await.unwrap();

        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let err = service.transform("s1", None, &token).await.unwrap_err();
        assert_eq!(err, ToolError::Cancelled);
        assert_eq!(service.status("s1").await.state, PipelineState::Detected);

        // The abandoned pass finishing later must not leak into the session.
        tokio::time::sleep(Duration::from_millis(500)).await;
        let info = service.status("s1").await;
        assert_eq!(info.state, PipelineState::Detected);
        assert_eq!(info.analyzer_state.counter("sl.passes"), 0);

        service.transform("s1", None, &ct()).await.unwrap();
        let resource = service.fetch("s1", "app.deobfuscate.dll").await.unwrap();
        assert_eq!(resource.bytes, b".........");
    }

    #[tokio::test]
    async fn cancelled_detect_leaves_session_unchanged() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "app.exe", b"MARK-X");
        let service = service();

        let token = CancellationToken::new();
        token.cancel();
        let err = service.detect("s1", &path, None, &token).await.unwrap_err();
        assert_eq!(err, ToolError::Cancelled);
        assert_eq!(service.status("s1").await.state, PipelineState::Empty);
    }

    #[tokio::test]
    async fn failed_detect_restores_previous_pipeline() {
        let dir = TempDir::new().unwrap();
        let good = write(&dir, "good.exe", b"MARK-X");
        let empty = write(&dir, "empty.exe", b"");
        let service = service();
        service.detect("s1", &good, None, &ct()).await.unwrap();
        service.transform("s1", None, &ct()).await.unwrap();

        let err = service.detect("s1", &empty, None, &ct()).await.unwrap_err();
        assert!(matches!(err, ToolError::LoadFailed(_)));

        let missing = dir.path().join("missing.exe");
        let err = service.detect("s1", &missing, None, &ct()).await.unwrap_err();
        assert!(matches!(err, ToolError::LoadFailed(_)));

        let info = service.status("s1").await;
        assert_eq!(info.state, PipelineState::Transformed);
        assert_eq!(info.loaded_modules, vec![good.display().to_string()]);
        assert!(service.fetch("s1", "good.deobfuscate.dll").await.is_ok());

        assert!(matches!(
            service.detect("s1", Path::new(""), None, &ct()).await,
            Err(ToolError::InvalidPath(_))
        ));
    }

    #[tokio::test]
    async fn retransform_runs_on_transformed_module() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "app.exe", b"MARK-X");
        let service = service();
        service.detect("s1", &path, None, &ct()).await.unwrap();
        service.transform("s1", None, &ct()).await.unwrap();
        service.transform("s1", None, &ct()).await.unwrap();

        let info = service.status("s1").await;
        assert_eq!(info.state, PipelineState::Transformed);
        assert_eq!(info.analyzer_state.counter("xe.passes"), 2);
        assert_eq!(published(&service, "s1").await, b"xxxxxx");
    }

    #[tokio::test]
    async fn file_mode_writes_output_path() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "app.exe", b"keep MARK-Y");
        let service = DeobfuscationService::new(
            test_registry(),
            ServiceConfig::default().with_publish_mode(PublishMode::File),
        );
        service.detect("s1", &path, None, &ct()).await.unwrap();
        let output = service.transform("s1", None, &ct()).await.unwrap();

        let publication = service.publish("s1", &ct()).await.unwrap();
        assert_eq!(
            publication,
            Publication::File {
                path: output.clone(),
                bytes_written: 11,
            }
        );
        assert_eq!(std::fs::read(&output).unwrap(), b"keep yyyyyy");
        assert_eq!(std::fs::read(&path).unwrap(), b"keep MARK-Y");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_sessions_run_independently() {
        let dir = TempDir::new().unwrap();
        let service = Arc::new(service());
        let mut handles = Vec::new();
        for i in 0..8 {
            let path = write(&dir, &format!("m{i}.exe"), format!("{i} MARK-X").as_bytes());
            let service = service.clone();
            handles.push(tokio::spawn(async move {
                let session = format!("s{i}");
                service.detect(&session, &path, None, &ct()).await.unwrap();
                service.transform(&session, None, &ct()).await.unwrap();
                service.publish(&session, &ct()).await.unwrap();
                published(&service, &session).await
            }));
        }
        for (i, handle) in handles.into_iter().enumerate() {
            assert_eq!(handle.await.unwrap(), format!("{i} xxxxxx").into_bytes());
        }
        assert_eq!(service.stats().await.total_sessions, 8);
        assert_eq!(service.stats().await.sessions_with_pipeline, 8);
    }

    #[tokio::test]
    async fn long_transform_is_not_evicted_on_return() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "app.exe", b"MARK-SLOW");
        let service = service();
        service.detect("s1", &path, None, &ct()).await.unwrap();

        // The pass holds the session lock for longer than the idle limit.
        service.transform("s1", None, &ct()).await.unwrap();
        let evicted = service.manager().evict_idle(Duration::from_millis(200)).await;
        assert!(evicted.is_empty());

        assert!(service.publish("s1", &ct()).await.is_ok());
        assert_eq!(published(&service, "s1").await, b".........");
    }

    #[tokio::test]
    async fn abandoned_detect_keeps_previous_pipeline() {
        let dir = TempDir::new().unwrap();
        let good = write(&dir, "good.exe", b"MARK-X");
        let next = write(&dir, "next.exe", &vec![b'n'; 1 << 20]);
        let service = service();
        service.detect("s1", &good, None, &ct()).await.unwrap();
        service.transform("s1", None, &ct()).await.unwrap();

        for micros in [0, 10, 50, 100, 500] {
            let token = ct();
            let detect = service.detect("s1", &next, None, &token);
            if tokio::time::timeout(Duration::from_micros(micros), detect)
                .await
                .is_ok()
            {
                break;
            }
            let info = service.status("s1").await;
            assert_eq!(info.state, PipelineState::Transformed);
            assert_eq!(info.loaded_modules, vec![good.display().to_string()]);
        }
    }

    #[test]
    fn lists_analyzers_in_registry_order() {
        let names: Vec<_> = service().analyzers().iter().map(|d| d.type_short).collect();
        assert_eq!(names, vec!["un", "xe", "ya", "fa", "cp", "sl"]);
    }

    async fn published(service: &DeobfuscationService, session_id: &str) -> Vec<u8> {
        let name = service.published_name(session_id).await.unwrap();
        service.fetch(session_id, &name).await.unwrap().bytes
    }
}
