use crate::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Read/write access to the current content of source files. Paths are relative to the
/// session root unless absolute.
#[async_trait]
pub trait SourceStore: Send + Sync {
    async fn read(&self, path: &str) -> Result<String>;

    /// Replaces the whole file content.
    async fn write(&self, path: &str, content: &str) -> Result<()>;
}

/// Filesystem-backed store. Writes go through a sibling temp file and a rename.
#[derive(Debug, Clone)]
pub struct FsSourceStore {
    root: PathBuf,
}

impl FsSourceStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn resolve(&self, path: &str) -> PathBuf {
        let p = Path::new(path);
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            self.root.join(p)
        }
    }
}

#[async_trait]
impl SourceStore for FsSourceStore {
    async fn read(&self, path: &str) -> Result<String> {
        Ok(tokio::fs::read_to_string(self.resolve(path)).await?)
    }

    async fn write(&self, path: &str, content: &str) -> Result<()> {
        let target = self.resolve(path);
        let file_name = target
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "file".to_string());
        let tmp = target.with_file_name(format!(".{}.errorgraph.tmp", file_name));
        tokio::fs::write(&tmp, content).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &target).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        debug!(file = %target.display(), bytes = content.len(), "wrote source file");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn reads_and_replaces_relative_paths() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.py"), "import os\n").unwrap();
        let store = FsSourceStore::new(dir.path());

        assert_eq!(store.read("a.py").await.unwrap(), "import os\n");
        store.write("a.py", "print(1)\n").await.unwrap();
        assert_eq!(store.read("a.py").await.unwrap(), "print(1)\n");
        assert!(!dir.path().join(".a.py.errorgraph.tmp").exists());
    }

    #[tokio::test]
    async fn missing_file_is_an_io_error() {
        let dir = TempDir::new().unwrap();
        let store = FsSourceStore::new(dir.path());
        assert!(matches!(
            store.read("nope.py").await,
            Err(crate::ErrorGraphError::Io(_))
        ));
    }
}
