//! 远程摘要清单
//!
//! 清单是存储桶中的一个 JSON 对象，内容为 `{"相对路径": "摘要"}`。
//! 每次运行获取一次，只保存在内存中。

use crate::error::{SyncError, SyncResult};
use crate::storage::ObjectStore;
use std::collections::HashMap;
use tracing::info;

/// 默认的清单对象键
pub const DEFAULT_MANIFEST_KEY: &str = "mods_md5_info.json";

#[derive(Debug, Clone, Default)]
pub struct DigestManifest {
    entries: HashMap<String, String>,
}

impl DigestManifest {
    /// 解析清单内容，路径统一为 `/` 分隔
    pub fn parse(data: &[u8]) -> serde_json::Result<Self> {
        let raw: HashMap<String, String> = serde_json::from_slice(data)?;
        let entries = raw
            .into_iter()
            .map(|(path, digest)| (normalize_key(&path), digest.trim().to_ascii_lowercase()))
            .collect();
        Ok(Self { entries })
    }

    /// 从存储桶获取清单
    pub async fn fetch(store: &dyn ObjectStore, key: &str) -> SyncResult<Self> {
        let data = store.read_object(key).await.map_err(|e| SyncError::Manifest {
            key: key.to_string(),
            reason: e.to_string(),
        })?;
        let manifest = Self::parse(&data).map_err(|e| SyncError::Manifest {
            key: key.to_string(),
            reason: e.to_string(),
        })?;
        info!("已加载摘要清单 {}: {} 个条目", key, manifest.len());
        Ok(manifest)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(&normalize_key(key)).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<(String, String)> for DigestManifest {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(k, v)| (normalize_key(&k), v.to_ascii_lowercase()))
                .collect(),
        }
    }
}

fn normalize_key(key: &str) -> String {
    key.replace('\\', "/").trim_start_matches('/').to_string()
}
