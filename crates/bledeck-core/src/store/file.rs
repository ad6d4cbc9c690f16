//! 文件存储
//!
//! 每个键对应数据目录下的 `<key>.json`，写入时先写临时文件再重命名，
//! 进程中途退出不会留下半个文件。

use super::{KeyValueStore, StoreError};
use log::debug;
use std::path::{Path, PathBuf};
use tokio::fs;

pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        let file_name: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{file_name}.json"))
    }
}

#[async_trait::async_trait]
impl KeyValueStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let path = self.path_for(key);
        match fs::read_to_string(&path).await {
            Ok(content) => {
                debug!("Loaded '{}' from {:?}", key, path);
                Ok(Some(content))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn set(&self, key: &str, value: String) -> Result<(), StoreError> {
        fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, value.as_bytes()).await?;
        fs::rename(&tmp, &path).await?;
        debug!("Saved '{}' to {:?} ({} bytes)", key, path, value.len());
        Ok(())
    }
}
