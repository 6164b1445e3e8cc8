//! In-memory storage backend

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use super::FileStorage;
use crate::errors::{Error, Result};

/// Process-local storage. Clones share the same contents.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    files: Arc<DashMap<String, Vec<u8>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.files.contains_key(name)
    }

    pub fn remove(&self, name: &str) -> Option<Vec<u8>> {
        self.files.remove(name).map(|(_, contents)| contents)
    }
}

#[async_trait]
impl FileStorage for MemoryStorage {
    async fn get_file(&self, name: &str) -> Result<Vec<u8>> {
        self.files.get(name).map(|entry| entry.value().clone()).ok_or_else(|| Error::not_found(name))
    }

    async fn put_file(&self, name: &str, contents: &[u8]) -> Result<()> {
        self.files.insert(name.to_string(), contents.to_vec());
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
