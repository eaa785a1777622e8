pub mod directory;
pub mod s3;

use anyhow::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub use directory::DirectoryStore;
pub use s3::S3Store;

// ============ 公共常量 ============

/// 非 IO 操作超时（秒）- stat, list 等
pub const OP_TIMEOUT_SECS: u64 = 60;
/// IO 操作超时（秒）- read 等
pub const IO_TIMEOUT_SECS: u64 = 300;
/// 单页列举的默认最大条目数
pub const DEFAULT_MAX_KEYS: usize = 1000;

/// 一页列举结果
#[derive(Debug, Clone, Default)]
pub struct ObjectListing {
    pub keys: Vec<String>,
    /// 传回 `list_objects` 以获取下一页
    pub next_marker: Option<String>,
    pub is_truncated: bool,
}

/// 远程对象存储接口
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// 列举 marker 之后的一页对象
    async fn list_objects(&self, marker: Option<&str>, max_keys: usize) -> Result<ObjectListing>;

    /// 读取整个对象
    async fn read_object(&self, key: &str) -> Result<Vec<u8>>;

    /// 查询对象的内容摘要（S3 上为 ETag）
    async fn object_digest(&self, key: &str) -> Result<Option<String>>;

    /// 下载对象到本地文件，返回写入的字节数
    async fn download(&self, key: &str, dest: &Path) -> Result<u64> {
        let data = self.read_object(key).await?;
        write_atomic(dest, &data).await?;
        Ok(data.len() as u64)
    }

    /// 获取存储名称（用于日志）
    fn name(&self) -> &str;
}

/// 先写入同目录下的 `.<name>.part` 临时文件，再重命名覆盖目标
///
/// 以 `.` 开头的名字不会是任何下载目标，临时文件不会覆盖真实对象。
pub async fn write_atomic(dest: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let temp_path = part_path(dest);
    tokio::fs::write(&temp_path, data).await?;
    if let Err(e) = tokio::fs::rename(&temp_path, dest).await {
        let _ = tokio::fs::remove_file(&temp_path).await;
        return Err(e.into());
    }
    Ok(())
}

fn part_path(dest: &Path) -> PathBuf {
    let mut name = std::ffi::OsString::from(".");
    if let Some(file_name) = dest.file_name() {
        name.push(file_name);
    }
    name.push(".part");
    dest.with_file_name(name)
}

/// 远程存储的连接参数
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub bucket: String,
    pub region: String,
    pub access_key: String,
    pub secret_key: String,
    pub endpoint: Option<String>,
}

/// 根据配置创建存储实例
pub fn create_store(config: &StoreConfig) -> Result<Arc<dyn ObjectStore>> {
    tracing::info!("初始化S3存储: bucket={}, region={}", config.bucket, config.region);
    Ok(Arc::new(S3Store::new(
        &config.bucket,
        &config.region,
        &config.access_key,
        &config.secret_key,
        config.endpoint.clone(),
    )?) as Arc<dyn ObjectStore>)
}
