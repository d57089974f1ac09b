//! Service configuration.

use clap::ValueEnum;
use serde::Serialize;
use std::time::Duration;

/// Default extension given to deobfuscated output paths.
pub const DEFAULT_OUTPUT_EXTENSION: &str = "deobfuscate.dll";
/// Default idle time before a session is evicted (1 hour).
pub const DEFAULT_SESSION_IDLE_TIMEOUT_SECS: u64 = 3600;
/// Default interval between eviction sweeps.
pub const DEFAULT_REAP_INTERVAL_SECS: u64 = 60;

/// How `save_deobfuscated` hands the module to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum PublishMode {
    /// Expose a fetchable `deob://files/{name}` resource.
    #[default]
    Resource,
    /// Write the module to its output path on disk.
    File,
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub publish_mode: PublishMode,
    /// Extension replacing the source extension in output paths.
    pub output_extension: String,
    /// `None` disables idle eviction.
    pub session_idle_timeout: Option<Duration>,
    pub reap_interval: Duration,
}

impl ServiceConfig {
    pub fn with_publish_mode(mut self, mode: PublishMode) -> Self {
        self.publish_mode = mode;
        self
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            publish_mode: PublishMode::default(),
            output_extension: DEFAULT_OUTPUT_EXTENSION.to_string(),
            session_idle_timeout: Some(Duration::from_secs(DEFAULT_SESSION_IDLE_TIMEOUT_SECS)),
            reap_interval: Duration::from_secs(DEFAULT_REAP_INTERVAL_SECS),
        }
    }
}
