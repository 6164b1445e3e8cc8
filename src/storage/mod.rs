//! Certificate storage
//!
//! A get/put byte-blob store keyed by file name. The control plane only ever
//! calls [`FileStorage::get_file`] and [`FileStorage::put_file`]; replication
//! of the blobs is left to whatever backs the storage.
//!
//! ## Backends
//!
//! - **Disk**: one file per key in a local directory, owner read/write only
//! - **Memory**: process-local map, used by tests and dry runs

pub mod disk;
pub mod memory;

use async_trait::async_trait;

use crate::errors::Result;

pub use disk::DiskStorage;
pub use memory::MemoryStorage;

/// Byte-blob store keyed by file name
///
/// Implementations must be Send + Sync; one instance is shared by the epoch
/// task and the certificate provisioner.
#[async_trait]
pub trait FileStorage: Send + Sync + std::fmt::Debug {
    /// Read a file. Missing files return [`crate::Error::NotFound`].
    async fn get_file(&self, name: &str) -> Result<Vec<u8>>;

    /// Create or replace a file
    async fn put_file(&self, name: &str, contents: &[u8]) -> Result<()>;

    /// Short backend identifier used in logs
    fn backend_name(&self) -> &'static str;
}
