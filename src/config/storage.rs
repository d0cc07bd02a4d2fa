//! Storage configuration types.

use serde::Deserialize;

/// Storage type discriminator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageType {
    #[default]
    Sqlite,
    /// In-process only; state is lost on exit.
    Memory,
}

/// Storage configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Storage type discriminator.
    #[serde(rename = "type")]
    pub storage_type: StorageType,
    /// SQLite database path or `sqlite::memory:`.
    pub path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            storage_type: StorageType::Sqlite,
            path: "rakeback.db".to_string(),
        }
    }
}

impl StorageConfig {
    /// In-memory configuration for tests.
    pub fn memory() -> Self {
        Self {
            storage_type: StorageType::Memory,
            path: String::new(),
        }
    }
}
