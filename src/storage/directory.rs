use super::{ObjectListing, ObjectStore};
use crate::core::digest::{file_digest, DigestAlgorithm};
use anyhow::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use walkdir::WalkDir;

/// 以本地目录充当存储桶，键为相对路径，目录以 `/` 结尾
pub struct DirectoryStore {
    base_path: PathBuf,
    name: String,
}

impl DirectoryStore {
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let base_path = path.as_ref().to_path_buf();
        if !base_path.is_dir() {
            anyhow::bail!("目录不存在: {}", base_path.display());
        }
        let name = format!("dir:{}", base_path.display());
        Ok(Self { base_path, name })
    }

    fn resolve_path(&self, key: &str) -> PathBuf {
        let key = key.trim_start_matches('/').trim_end_matches('/');
        key.split('/')
            .filter(|s| !s.is_empty())
            .fold(self.base_path.clone(), |acc, seg| acc.join(seg))
    }

    /// 按键排序的完整列表，保证 marker 稳定
    fn all_keys(base: &Path) -> Vec<String> {
        let mut keys: Vec<String> = WalkDir::new(base)
            .follow_links(false)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter_map(|entry| {
                let relative = entry.path().strip_prefix(base).ok()?.to_str()?.replace('\\', "/");
                // 跳过根目录本身
                if relative.is_empty() {
                    return None;
                }
                if entry.file_type().is_dir() {
                    Some(format!("{}/", relative))
                } else {
                    Some(relative)
                }
            })
            .collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl ObjectStore for DirectoryStore {
    async fn list_objects(&self, marker: Option<&str>, max_keys: usize) -> Result<ObjectListing> {
        let base = self.base_path.clone();
        let all = tokio::task::spawn_blocking(move || Self::all_keys(&base)).await?;

        let start = match marker {
            Some(m) => all.partition_point(|k| k.as_str() <= m),
            None => 0,
        };
        let end = (start + max_keys).min(all.len());
        let keys = all[start..end].to_vec();
        let is_truncated = end < all.len();
        let next_marker = if is_truncated { keys.last().cloned() } else { None };

        Ok(ObjectListing {
            keys,
            next_marker,
            is_truncated,
        })
    }

    async fn read_object(&self, key: &str) -> Result<Vec<u8>> {
        Ok(fs::read(self.resolve_path(key)).await?)
    }

    async fn object_digest(&self, key: &str) -> Result<Option<String>> {
        let path = self.resolve_path(key);
        if !path.is_file() {
            return Ok(None);
        }
        let digest =
            tokio::task::spawn_blocking(move || file_digest(&path, DigestAlgorithm::Md5)).await??;
        Ok(Some(digest))
    }

    fn name(&self) -> &str {
        &self.name
    }
}
