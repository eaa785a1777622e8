//! 完整性检查与传输判定策略

use crate::core::digest::{digests_equal, file_digest, DigestAlgorithm};
use crate::core::manifest::DigestManifest;
use crate::storage::ObjectStore;
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// 判定文件是否需要下载的方式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncMode {
    /// 对比远程摘要清单
    #[default]
    Manifest,
    /// 逐个查询对象摘要（ETag）
    ObjectDigest,
    /// 只下载本地不存在的文件，不检测修改
    LocalListing,
}

impl std::str::FromStr for SyncMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "manifest" => Ok(SyncMode::Manifest),
            "object-digest" => Ok(SyncMode::ObjectDigest),
            "local-listing" => Ok(SyncMode::LocalListing),
            other => Err(format!("未知的同步模式: {}", other)),
        }
    }
}

/// 远程对象的描述
#[derive(Debug, Clone)]
pub struct RemoteDescriptor<'a> {
    pub key: &'a str,
    pub digest: Option<&'a str>,
}

/// 本地文件与远程描述的比较
#[derive(Debug, Clone, Copy, Default)]
pub struct IntegrityChecker {
    algorithm: DigestAlgorithm,
}

impl IntegrityChecker {
    pub fn new(algorithm: DigestAlgorithm) -> Self {
        Self { algorithm }
    }

    pub fn algorithm(&self) -> DigestAlgorithm {
        self.algorithm
    }

    pub async fn needs_transfer(&self, local_path: &Path, remote: &RemoteDescriptor<'_>) -> bool {
        if !local_path.exists() {
            return true;
        }

        let Some(expected) = remote.digest else {
            debug!("缺少远程摘要，重新下载: {}", remote.key);
            return true;
        };

        let path = local_path.to_path_buf();
        let algorithm = self.algorithm;
        let local = tokio::task::spawn_blocking(move || file_digest(&path, algorithm)).await;

        match local {
            Ok(Ok(actual)) => {
                let changed = !digests_equal(&actual, expected);
                debug!(
                    "摘要比较 {}: local={} remote={} changed={}",
                    remote.key, actual, expected, changed
                );
                changed
            }
            Ok(Err(e)) => {
                warn!("计算本地摘要失败，重新下载 {}: {}", local_path.display(), e);
                true
            }
            Err(e) => {
                warn!("摘要任务异常，重新下载 {}: {}", local_path.display(), e);
                true
            }
        }
    }
}

/// 传输判定策略
#[async_trait]
pub trait TransferDecision: Send + Sync {
    /// 返回 Err 表示获取远程摘要失败，按传输失败处理
    async fn needs_transfer(&self, local_path: &Path, key: &str) -> Result<bool>;

    fn name(&self) -> &str;
}

/// 对比预先获取的摘要清单
pub struct ManifestDecision {
    manifest: Arc<DigestManifest>,
    checker: IntegrityChecker,
}

impl ManifestDecision {
    pub fn new(manifest: Arc<DigestManifest>, checker: IntegrityChecker) -> Self {
        Self { manifest, checker }
    }
}

#[async_trait]
impl TransferDecision for ManifestDecision {
    async fn needs_transfer(&self, local_path: &Path, key: &str) -> Result<bool> {
        let remote = RemoteDescriptor {
            key,
            digest: self.manifest.get(key),
        };
        Ok(self.checker.needs_transfer(local_path, &remote).await)
    }

    fn name(&self) -> &str {
        "manifest"
    }
}

/// 逐个查询远程对象摘要
pub struct ObjectDigestDecision {
    store: Arc<dyn ObjectStore>,
    checker: IntegrityChecker,
}

impl ObjectDigestDecision {
    pub fn new(store: Arc<dyn ObjectStore>, checker: IntegrityChecker) -> Self {
        Self { store, checker }
    }
}

#[async_trait]
impl TransferDecision for ObjectDigestDecision {
    async fn needs_transfer(&self, local_path: &Path, key: &str) -> Result<bool> {
        if !local_path.exists() {
            return Ok(true);
        }
        let digest = self.store.object_digest(key).await?;
        let remote = RemoteDescriptor {
            key,
            digest: digest.as_deref(),
        };
        Ok(self.checker.needs_transfer(local_path, &remote).await)
    }

    fn name(&self) -> &str {
        "object-digest"
    }
}

/// 本地不存在即下载
pub struct PresenceDecision;

#[async_trait]
impl TransferDecision for PresenceDecision {
    async fn needs_transfer(&self, local_path: &Path, _key: &str) -> Result<bool> {
        Ok(!local_path.exists())
    }

    fn name(&self) -> &str {
        "local-listing"
    }
}

/// 把键映射为本地路径
pub fn local_path_for(root: &Path, key: &str) -> PathBuf {
    key.trim_end_matches('/')
        .split('/')
        .filter(|s| !s.is_empty())
        .fold(root.to_path_buf(), |acc, seg| acc.join(seg))
}
