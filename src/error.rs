//! 同步运行的错误类型

use std::path::PathBuf;

/// 一次同步运行中可能出现的致命错误
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// 凭据或存储桶配置缺失，此时不会发起任何网络请求
    #[error("配置错误: {0}")]
    Configuration(String),

    /// 分页列举远程对象失败
    #[error("列举远程对象失败 (marker={marker:?}): {source}")]
    Listing {
        marker: Option<String>,
        #[source]
        source: anyhow::Error,
    },

    /// 本地 mods 根目录不存在
    #[error("本地目录不存在: {}，请先运行一次游戏以创建该目录", .0.display())]
    LocalState(PathBuf),

    /// 摘要清单获取或解析失败
    #[error("摘要清单 {key} 不可用: {reason}")]
    Manifest { key: String, reason: String },

    #[error("创建本地目录失败 {}: {source}", path.display())]
    DirectoryCreation {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// 第一个失败的传输，在所有任务结束后上报
    #[error("下载 {key} 失败: {reason} (共 {failed} 个文件失败)")]
    Transfer {
        key: String,
        reason: String,
        failed: usize,
    },

    #[error("{failed}/{total} 个文件下载失败")]
    PartialFailure { failed: usize, total: usize },
}

impl SyncError {
    /// 是否在开始同步前就已失败（未触碰本地文件）
    pub fn is_preflight(&self) -> bool {
        matches!(
            self,
            SyncError::Configuration(_)
                | SyncError::Listing { .. }
                | SyncError::LocalState(_)
                | SyncError::Manifest { .. }
        )
    }
}

pub type SyncResult<T> = std::result::Result<T, SyncError>;
