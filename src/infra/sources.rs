//! Storage for source attachments decoded from job submissions.

use std::io::Write as _;
use std::path::{Component, Path, PathBuf};

use thiserror::Error;
use tokio::fs;
use tracing::debug;

use crate::domain::attachment::InlineAttachment;

#[derive(Debug, Error)]
pub enum SourceStorageError {
    #[error("attachment name `{name}` escapes the sources directory")]
    PathTraversal { name: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Where a decoded attachment ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredSource {
    /// File name without the extension.
    pub name: String,
    /// Extension including the leading dot.
    pub extension: String,
    pub path: PathBuf,
    pub size_bytes: u64,
}

/// Filesystem directory receiving decoded attachments as `{name}{extension}`.
#[derive(Debug)]
pub struct SourceStorage {
    root: PathBuf,
}

impl SourceStorage {
    /// Initialise storage rooted at the provided directory, creating it if necessary.
    pub fn new(root: PathBuf) -> Result<Self, std::io::Error> {
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Write the attachment bytes. Exactly one file is written on success, none on error.
    pub async fn store(
        &self,
        attachment: &InlineAttachment,
    ) -> Result<StoredSource, SourceStorageError> {
        let file_name = attachment.file_name();
        let path = self.resolve(&file_name)?;

        // Staged next to the target; the temp file is unlinked on drop if anything fails.
        let root = self.root.clone();
        let target = path.clone();
        let bytes = attachment.bytes.clone();
        tokio::task::spawn_blocking(move || {
            let mut file = tempfile::Builder::new()
                .prefix(".source-")
                .tempfile_in(&root)?;
            file.write_all(&bytes)?;
            file.as_file().sync_all()?;
            file.persist(&target).map(|_| ()).map_err(|err| err.error)
        })
        .await
        .map_err(std::io::Error::other)??;
        debug!(
            target = "jobdock::sources",
            path = %path.display(),
            size_bytes = attachment.bytes.len(),
            "stored inline source attachment"
        );

        Ok(StoredSource {
            name: attachment.name.clone(),
            extension: attachment.extension.clone(),
            path,
            size_bytes: attachment.bytes.len() as u64,
        })
    }

    /// Delete a previously stored attachment, e.g. when its job could not be recorded.
    pub async fn remove(&self, stored: &StoredSource) -> Result<(), SourceStorageError> {
        match fs::remove_file(&stored.path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Resolve a bare file name inside the root. Anything that is not a single plain
    /// component is refused rather than cleaned up.
    fn resolve(&self, file_name: &str) -> Result<PathBuf, SourceStorageError> {
        let traversal = || SourceStorageError::PathTraversal {
            name: file_name.to_string(),
        };

        if file_name.contains(['/', '\\', '\0']) {
            return Err(traversal());
        }

        let mut components = Path::new(file_name).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(part)), None) if part == file_name => {}
            _ => return Err(traversal()),
        }

        let path = self.root.join(file_name);
        if path.parent() != Some(self.root.as_path()) {
            return Err(traversal());
        }
        Ok(path)
    }
}
