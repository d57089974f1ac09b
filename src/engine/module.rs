//! In-memory module image.

use crate::error::ToolError;
use std::path::{Path, PathBuf};

/// A loaded compiled module.
///
/// The image is held as raw bytes; analyzers read it freely and rewrite it only
/// during the apply phase of a pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Module {
    path: PathBuf,
    image: Vec<u8>,
}

impl Module {
    /// Build a module from an already-read image.
    pub fn from_image(path: impl Into<PathBuf>, image: Vec<u8>) -> Result<Self, ToolError> {
        let path = path.into();
        if image.is_empty() {
            return Err(ToolError::LoadFailed(format!(
                "{}: module image is empty",
                path.display()
            )));
        }
        Ok(Self { path, image })
    }

    /// Read a module from disk.
    pub async fn read(path: &Path) -> Result<Self, ToolError> {
        let image = tokio::fs::read(path)
            .await
            .map_err(|e| ToolError::LoadFailed(format!("{}: {}", path.display(), e)))?;
        Self::from_image(path, image)
    }

    /// Canonical path the module was loaded from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.image.len()
    }

    pub fn is_empty(&self) -> bool {
        self.image.is_empty()
    }

    pub fn image(&self) -> &[u8] {
        &self.image
    }

    pub fn image_mut(&mut self) -> &mut [u8] {
        &mut self.image
    }

    /// Offsets of every non-overlapping occurrence of `needle`.
    pub fn find_all(&self, needle: &[u8]) -> Vec<usize> {
        let mut hits = Vec::new();
        if needle.is_empty() || needle.len() > self.image.len() {
            return hits;
        }
        let mut pos = 0;
        while pos + needle.len() <= self.image.len() {
            if &self.image[pos..pos + needle.len()] == needle {
                hits.push(pos);
                pos += needle.len();
            } else {
                pos += 1;
            }
        }
        hits
    }

    pub fn contains(&self, needle: &[u8]) -> bool {
        !self.find_all(needle).is_empty()
    }

    /// Serialize the current image.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.image.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_image_is_a_load_failure() {
        let err = Module::from_image("a.bin", Vec::new()).unwrap_err();
        assert!(matches!(err, ToolError::LoadFailed(msg) if msg.contains("empty")));
    }

    #[test]
    fn find_all_skips_overlaps() {
        let module = Module::from_image("a.bin", b"aaaa-aa".to_vec()).unwrap();
        assert_eq!(module.find_all(b"aa"), vec![0, 2, 5]);
        assert!(module.find_all(b"").is_empty());
        assert!(!module.contains(b"zz"));
    }

    #[tokio::test]
    async fn read_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = Module::read(&dir.path().join("missing.dll")).await.unwrap_err();
        assert!(matches!(err, ToolError::LoadFailed(_)));
    }
}
