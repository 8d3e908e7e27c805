//! Artifact writer -- maps a log's logical name onto the output tree and writes it.
//!
//! Layout: `<root>/<instance>/<group>/<leaf>`, where `group` is the first segment of the
//! artifact name and `leaf` is the rest. Extra separators in the leaf become nested
//! directories.

use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;

use crate::error::{Error, Result};
use crate::types::{ArtifactRef, InstanceId};

/// Writes fetched log content below a fixed output root
///
/// Cheap to clone; every retrieval task carries its own copy.
#[derive(Clone, Debug)]
pub struct ArtifactWriter {
    root: PathBuf,
}

impl ArtifactWriter {
    /// Create a writer rooted at `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Output root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Derive the destination file for an artifact without touching the filesystem.
    ///
    /// Fails with [`Error::InvalidArtifactName`] if the name has no group separator or
    /// contains a segment that would escape or collapse the layout.
    pub fn destination(&self, instance: &InstanceId, artifact: &ArtifactRef) -> Result<PathBuf> {
        let invalid = |reason: &str| Error::InvalidArtifactName {
            name: artifact.name.clone(),
            reason: reason.to_string(),
        };

        let (group, leaf) = match (artifact.group(), artifact.leaf()) {
            (Some(group), Some(leaf)) => (group, leaf),
            _ => return Err(invalid("missing group separator '/'")),
        };

        if artifact.name.contains(['\\', '\0']) {
            return Err(invalid("contains a backslash or NUL byte"));
        }

        let mut path = self.root.join(instance.as_str());
        for segment in std::iter::once(group).chain(leaf.split('/')) {
            match segment {
                "" => return Err(invalid("contains an empty path segment")),
                "." | ".." => return Err(invalid("contains a relative path segment")),
                s => path.push(s),
            }
        }
        Ok(path)
    }

    /// Write `content` to the artifact's destination, creating or truncating the file.
    ///
    /// Missing parent directories are created. Writing the same artifact twice leaves the
    /// second content on disk. Empty content still produces a zero-length file.
    pub async fn write(
        &self,
        instance: &InstanceId,
        artifact: &ArtifactRef,
        content: &[u8],
    ) -> Result<PathBuf> {
        let dest = self.destination(instance, artifact)?;

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| Error::Write {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }

        let write_err = |source: std::io::Error| Error::Write {
            path: dest.clone(),
            source,
        };
        let mut file = tokio::fs::File::create(&dest).await.map_err(write_err)?;
        file.write_all(content).await.map_err(write_err)?;
        file.flush().await.map_err(write_err)?;

        tracing::debug!(
            artifact = %artifact,
            path = %dest.display(),
            bytes = content.len(),
            "Wrote log file"
        );
        Ok(dest)
    }
}
