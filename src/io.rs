//! Storage I/O for project files

use crate::error::{DownsampleError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Keyed byte storage underneath a project
#[async_trait]
pub trait IOManager: Send + Sync {
    /// Read data from a path
    async fn read(&self, path: &str) -> Result<Bytes>;

    /// Read data, `None` if nothing is stored at `path`
    async fn read_optional(&self, path: &str) -> Result<Option<Bytes>> {
        match self.read(path).await {
            Ok(data) => Ok(Some(data)),
            Err(DownsampleError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Write data to a path, replacing what was there
    async fn write(&self, path: &str, data: &[u8]) -> Result<()>;
}

/// File system I/O manager
pub struct FileSystemIOManager {
    base_path: PathBuf,
}

impl FileSystemIOManager {
    pub fn new(base_path: impl AsRef<Path>) -> Self {
        Self {
            base_path: base_path.as_ref().to_path_buf(),
        }
    }

    fn full_path(&self, path: &str) -> PathBuf {
        self.base_path.join(path)
    }
}

fn map_not_found(err: std::io::Error, path: &Path) -> DownsampleError {
    if err.kind() == ErrorKind::NotFound {
        DownsampleError::NotFound(path.display().to_string())
    } else {
        DownsampleError::Io(err)
    }
}

#[async_trait]
impl IOManager for FileSystemIOManager {
    async fn read(&self, path: &str) -> Result<Bytes> {
        let full_path = self.full_path(path);
        let data = fs::read(&full_path)
            .await
            .map_err(|e| map_not_found(e, &full_path))?;
        Ok(Bytes::from(data))
    }

    async fn write(&self, path: &str, data: &[u8]) -> Result<()> {
        let full_path = self.full_path(path);

        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        // Readers never observe a half-written file
        let partial = full_path.with_extension("partial");
        let mut file = fs::File::create(&partial).await?;
        file.write_all(data).await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(&partial, &full_path).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_file_system_io() {
        let temp_dir = TempDir::new().unwrap();
        let io = FileSystemIOManager::new(temp_dir.path());

        let data = b"brick payload";
        io.write("bricks/t0/lod1/00000003.brick", data).await.unwrap();

        let read_data = io.read("bricks/t0/lod1/00000003.brick").await.unwrap();
        assert_eq!(&read_data[..], data);
        assert!(!temp_dir
            .path()
            .join("bricks/t0/lod1/00000003.partial")
            .exists());
    }

    #[tokio::test]
    async fn test_missing_paths() {
        let temp_dir = TempDir::new().unwrap();
        let io = FileSystemIOManager::new(temp_dir.path());

        assert!(matches!(
            io.read("project.json").await,
            Err(DownsampleError::NotFound(_))
        ));
        assert!(io.read_optional("project.json").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_write_replaces_existing() {
        let temp_dir = TempDir::new().unwrap();
        let io = FileSystemIOManager::new(temp_dir.path());

        io.write("project.json", b"{}").await.unwrap();
        io.write("project.json", b"{\"a\":1}").await.unwrap();
        assert_eq!(&io.read("project.json").await.unwrap()[..], b"{\"a\":1}");
        let entries = std::fs::read_dir(temp_dir.path()).unwrap().count();
        assert_eq!(entries, 1);
    }
}
