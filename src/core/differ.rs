use crate::core::classifier::{IgnoreReason, KeyKind, PathClassifier};
use crate::core::integrity::local_path_for;
use crate::error::{SyncError, SyncResult};
use crate::storage::ObjectStore;
use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

/// 同步动作
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncAction {
    /// 创建本地目录（已存在时不做任何修改）
    CreateDirectory { key: String, path: PathBuf },
    /// 忽略
    Ignore { key: String, reason: IgnoreReason },
    /// 下载：远程键 -> 本地路径
    Transfer { key: String, path: PathBuf },
}

impl SyncAction {
    pub fn key(&self) -> &str {
        match self {
            SyncAction::CreateDirectory { key, .. } => key,
            SyncAction::Ignore { key, .. } => key,
            SyncAction::Transfer { key, .. } => key,
        }
    }
}

/// 一次运行的完整动作列表
#[derive(Debug, Clone, Default)]
pub struct SyncPlan {
    pub actions: Vec<SyncAction>,
}

impl SyncPlan {
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn summarize(&self) -> PlanSummary {
        let mut summary = PlanSummary::default();
        for action in &self.actions {
            match action {
                SyncAction::CreateDirectory { .. } => summary.directories += 1,
                SyncAction::Ignore { reason, .. } => match reason {
                    IgnoreReason::AlreadyPresent | IgnoreReason::Manifest => {
                        summary.unchanged += 1
                    }
                    _ => summary.ignored += 1,
                },
                SyncAction::Transfer { .. } => summary.transfers += 1,
            }
        }
        summary
    }
}

/// 动作统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlanSummary {
    pub directories: usize,
    /// 隐藏文件、排除规则、不安全路径
    pub ignored: usize,
    /// 清单对象及列表模式下已存在的文件
    pub unchanged: usize,
    pub transfers: usize,
}

/// 本地状态
#[derive(Debug, Clone)]
pub enum LocalState {
    /// 所有普通文件都生成下载动作，执行时再做完整性检查
    Deferred,
    /// 本地已有文件的相对路径集合，只下载缺失的
    Listing(HashSet<String>),
}

/// 差异计算器
pub struct TreeDiffer<'a> {
    root: &'a Path,
    classifier: &'a PathClassifier,
    manifest_key: Option<&'a str>,
}

impl<'a> TreeDiffer<'a> {
    pub fn new(root: &'a Path, classifier: &'a PathClassifier) -> Self {
        Self {
            root,
            classifier,
            manifest_key: None,
        }
    }

    /// 清单对象不会被下载到本地
    pub fn with_manifest_key(mut self, key: &'a str) -> Self {
        self.manifest_key = Some(key);
        self
    }

    pub fn build_plan(&self, remote_keys: &[String], local: &LocalState) -> SyncPlan {
        let mut actions = Vec::with_capacity(remote_keys.len());

        for key in remote_keys {
            let action = self.action_for(key, local);
            debug!("{:?}", action);
            actions.push(action);
        }

        let plan = SyncPlan { actions };
        let summary = plan.summarize();
        info!(
            "比较完成: {} 个键, {} 个目录, {} 个下载, {} 个忽略, {} 个无需处理",
            remote_keys.len(),
            summary.directories,
            summary.transfers,
            summary.ignored,
            summary.unchanged
        );
        plan
    }

    fn action_for(&self, key: &str, local: &LocalState) -> SyncAction {
        if !is_safe_key(key) {
            return SyncAction::Ignore {
                key: key.to_string(),
                reason: IgnoreReason::UnsafePath,
            };
        }

        if self.manifest_key == Some(key) {
            return SyncAction::Ignore {
                key: key.to_string(),
                reason: IgnoreReason::Manifest,
            };
        }

        match self.classifier.classify(key) {
            KeyKind::Ignored(reason) => SyncAction::Ignore {
                key: key.to_string(),
                reason,
            },
            KeyKind::DirectoryMarker => SyncAction::CreateDirectory {
                key: key.to_string(),
                path: local_path_for(self.root, key),
            },
            KeyKind::RegularFile => match local {
                LocalState::Listing(existing) if existing.contains(key) => SyncAction::Ignore {
                    key: key.to_string(),
                    reason: IgnoreReason::AlreadyPresent,
                },
                _ => SyncAction::Transfer {
                    key: key.to_string(),
                    path: local_path_for(self.root, key),
                },
            },
        }
    }
}

/// 拒绝绝对路径、`..` 以及盘符前缀
pub fn is_safe_key(key: &str) -> bool {
    let trimmed = key.trim_end_matches('/');
    if trimmed.is_empty() || trimmed.starts_with('/') || trimmed.contains('\\') {
        return false;
    }
    trimmed.split('/').all(|seg| {
        let mut components = Path::new(seg).components();
        seg.is_empty()
            || matches!(
                (components.next(), components.next()),
                (Some(Component::Normal(_)) | Some(Component::CurDir), None)
            )
    })
}

/// 循环分页列举，直到不再截断
pub async fn list_all_keys(store: &dyn ObjectStore, max_keys: usize) -> SyncResult<Vec<String>> {
    let mut keys = Vec::new();
    let mut marker: Option<String> = None;
    let mut pages = 0usize;

    loop {
        let listing = store
            .list_objects(marker.as_deref(), max_keys)
            .await
            .map_err(|source| SyncError::Listing {
                marker: marker.clone(),
                source,
            })?;
        pages += 1;
        debug!("第 {} 页: {} 个键", pages, listing.keys.len());

        let next_marker = listing
            .next_marker
            .or_else(|| listing.keys.last().cloned());
        keys.extend(listing.keys);

        if !listing.is_truncated {
            break;
        }
        if next_marker.is_none() || next_marker == marker {
            return Err(SyncError::Listing {
                marker,
                source: anyhow::anyhow!("分页标记没有前进"),
            });
        }
        marker = next_marker;
    }

    info!("列举完成: {} ({} 页, {} 个键)", store.name(), pages, keys.len());
    Ok(keys)
}

/// 扫描本地根目录下的普通文件，返回 `/` 分隔的相对路径
pub fn scan_local_files(root: &Path) -> HashSet<String> {
    WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| {
            let relative = entry.path().strip_prefix(root).ok()?.to_str()?;
            Some(relative.replace('\\', "/"))
        })
        .collect()
}
