//! Built-in store backends, selectable by name from configuration.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use courier_common::{Error, Result};

use crate::local::FileStore;
use crate::memory::MemoryStore;
use crate::store::KeyValueStore;

/// Which store holds the persisted queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Process-local; nothing survives a restart.
    Memory,
    /// One file per key under a root directory.
    #[default]
    File,
}

impl StoreBackend {
    /// Open the backend. `root` is required for `File` and ignored otherwise.
    ///
    /// # Errors
    /// - `Error::Config` when `File` is opened without a root
    /// - `Error::Io` when the root directory cannot be created
    pub fn open(self, root: Option<&Path>) -> Result<Arc<dyn KeyValueStore>> {
        match self {
            StoreBackend::Memory => Ok(Arc::new(MemoryStore::new())),
            StoreBackend::File => {
                let root = root.ok_or_else(|| {
                    Error::Config("File store requires a root directory".to_string())
                })?;
                Ok(Arc::new(FileStore::new(root)?))
            }
        }
    }
}

impl fmt::Display for StoreBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreBackend::Memory => write!(f, "memory"),
            StoreBackend::File => write!(f, "file"),
        }
    }
}

impl FromStr for StoreBackend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(StoreBackend::Memory),
            "file" => Ok(StoreBackend::File),
            other => Err(Error::NotFound(format!(
                "Unknown store '{}', expected 'memory' or 'file'",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_file_store() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = StoreBackend::File.open(Some(dir.path())).unwrap();
        assert_eq!(store.name(), "file");
    }

    #[test]
    fn test_file_store_requires_root() {
        assert!(matches!(
            StoreBackend::File.open(None),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_memory_ignores_root() {
        let store = StoreBackend::Memory.open(None).unwrap();
        assert_eq!(store.name(), "memory");
    }

    #[test]
    fn test_parse_names() {
        assert_eq!("File".parse::<StoreBackend>().unwrap(), StoreBackend::File);
        assert_eq!(" memory ".parse::<StoreBackend>().unwrap(), StoreBackend::Memory);
        assert!(matches!(
            "s3".parse::<StoreBackend>(),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_config_form() {
        let backend: StoreBackend = serde_json::from_str("\"memory\"").unwrap();
        assert_eq!(backend, StoreBackend::Memory);
        assert_eq!(StoreBackend::default().to_string(), "file");
    }
}
