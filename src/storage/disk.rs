//! Local directory storage backend

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, warn};

use super::FileStorage;
use crate::errors::{Error, Result};

/// Stored certificates and keys are readable and writable by the owner only.
#[cfg(unix)]
const FILE_MODE: u32 = 0o600;

/// Stores each file directly inside one directory
#[derive(Debug, Clone)]
pub struct DiskStorage {
    directory: PathBuf,
}

impl DiskStorage {
    /// Open the storage directory, creating it when it does not exist.
    ///
    /// Failing to create the directory is fatal for the control plane since no
    /// certificate could ever be stored or read.
    pub async fn open(directory: impl AsRef<Path>) -> Result<Self> {
        let directory = directory.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&directory).await.map_err(|e| {
            Error::storage(format!("failed to create storage directory {}", directory.display()), e)
        })?;

        Ok(Self { directory })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn path_for(&self, name: &str) -> Result<PathBuf> {
        if name.is_empty() || name.contains('/') || name.contains('\\') || name == ".." {
            return Err(Error::validation_field(
                format!("invalid storage file name '{}'", name),
                "name",
            ));
        }
        Ok(self.directory.join(name))
    }
}

#[async_trait]
impl FileStorage for DiskStorage {
    async fn get_file(&self, name: &str) -> Result<Vec<u8>> {
        let path = self.path_for(name)?;
        match tokio::fs::read(&path).await {
            Ok(contents) => Ok(contents),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(Error::not_found(name)),
            Err(e) => Err(Error::storage(format!("failed to read {}", path.display()), e)),
        }
    }

    async fn put_file(&self, name: &str, contents: &[u8]) -> Result<()> {
        let path = self.path_for(name)?;

        let mut options = tokio::fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        options.mode(FILE_MODE);

        let write = async {
            use tokio::io::AsyncWriteExt;
            let mut file = options.open(&path).await?;
            file.write_all(contents).await?;
            file.flush().await
        };

        if let Err(e) = write.await {
            warn!(
                driver = "disk",
                file_name = %name,
                directory = %self.directory.display(),
                error = %e,
                "Error while writing file"
            );
            return Err(Error::storage(format!("failed to write {}", path.display()), e));
        }

        debug!(driver = "disk", file_name = %name, bytes = contents.len(), "Stored file");
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "disk"
    }
}
