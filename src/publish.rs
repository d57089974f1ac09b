//! Resource publisher: exposes a transformed module as a fetchable blob.
//!
//! Resources are named after the pipeline's output file name and addressed as
//! `deob://files/{name}`. Bytes are serialized from the pipeline's current
//! module on every fetch; nothing is cached.

use crate::error::ToolError;
use crate::pipeline::{Pipeline, PipelineState};
use serde::Serialize;
use std::path::PathBuf;

pub const URI_SCHEME_PREFIX: &str = "deob://files/";
pub const MIME_TYPE: &str = "application/octet-stream";

pub fn resource_uri(name: &str) -> String {
    format!("{URI_SCHEME_PREFIX}{name}")
}

/// Extract the resource name from a `deob://files/{name}` URI.
pub fn parse_resource_uri(uri: &str) -> Option<&str> {
    uri.strip_prefix(URI_SCHEME_PREFIX)
        .filter(|name| !name.is_empty() && !name.contains('/'))
}

/// Resource name for a pipeline: the file name of its output path.
pub fn resource_name(pipeline: &Pipeline) -> String {
    pipeline
        .output_path()
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| pipeline.output_path().display().to_string())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedResource {
    pub name: String,
    pub uri: String,
    pub bytes: Vec<u8>,
    pub mime_type: &'static str,
}

impl PublishedResource {
    /// Serialize the pipeline's module. Requires a Transformed pipeline.
    pub fn from_pipeline(pipeline: Option<&Pipeline>) -> Result<Self, ToolError> {
        let pipeline = pipeline.ok_or(ToolError::NoActivePipeline)?;
        if pipeline.state() != PipelineState::Transformed {
            return Err(ToolError::NotYetTransformed);
        }
        let name = resource_name(pipeline);
        Ok(Self {
            uri: resource_uri(&name),
            name,
            bytes: pipeline.module().to_bytes(),
            mime_type: MIME_TYPE,
        })
    }

    /// Serve a fetch for `name`. Every miss reads as an unknown resource.
    pub fn fetch(pipeline: Option<&Pipeline>, name: &str) -> Result<Self, ToolError> {
        match Self::from_pipeline(pipeline) {
            Ok(resource) if resource.name == name => Ok(resource),
            _ => Err(ToolError::UnknownResource(resource_uri(name))),
        }
    }
}

/// What `save_deobfuscated` handed back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Publication {
    Resource { name: String, uri: String },
    File { path: PathBuf, bytes_written: usize },
}
