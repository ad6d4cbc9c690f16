//! 键值持久化
//!
//! - **file**: 数据目录下每个键一个 JSON 文件
//! - **devices**: 注册表快照的编码、版本和迁移

pub mod devices;
pub mod file;

pub use devices::{DEVICES_KEY, DeviceStore, SCHEMA_VERSION};
pub use file::FileStore;

use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Malformed snapshot: {0}")]
    Malformed(String),

    #[error("Unsupported schema version {0}")]
    UnsupportedVersion(u32),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

/// 异步键值存储
#[async_trait::async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    async fn set(&self, key: &str, value: String) -> Result<(), StoreError>;
}

/// 内存存储，用于测试和无持久化运行
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 同步读取，方便测试断言
    pub fn raw(&self, key: &str) -> Option<String> {
        self.entries
            .lock()
            .ok()
            .and_then(|entries| entries.get(key).cloned())
    }
}

#[async_trait::async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let entries = self
            .entries
            .lock()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Ok(entries.get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> Result<(), StoreError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        entries.insert(key.to_string(), value);
        Ok(())
    }
}
