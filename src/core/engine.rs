use crate::core::classifier::{DirectoryHeuristic, PathClassifier};
use crate::core::differ::{list_all_keys, scan_local_files, LocalState, TreeDiffer};
use crate::core::digest::DigestAlgorithm;
use crate::core::integrity::{
    IntegrityChecker, ManifestDecision, ObjectDigestDecision, PresenceDecision, SyncMode,
    TransferDecision,
};
use crate::core::manifest::{DigestManifest, DEFAULT_MANIFEST_KEY};
use crate::core::scheduler::{FailurePolicy, SchedulerConfig, TransferScheduler};
use crate::error::{SyncError, SyncResult};
use crate::progress::ProgressReporter;
use crate::storage::{ObjectStore, DEFAULT_MAX_KEYS};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

/// 同步配置
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// 本地 mods 根目录，必须已存在
    pub mods_root: PathBuf,
    pub mode: SyncMode,
    pub manifest_key: String,
    pub digest: DigestAlgorithm,
    /// 单页列举的最大条目数
    pub max_keys: usize,
    pub directory_heuristic: DirectoryHeuristic,
    pub ignore_patterns: Vec<String>,
    pub scheduler: SchedulerConfig,
}

impl SyncConfig {
    pub fn new(mods_root: impl Into<PathBuf>) -> Self {
        Self {
            mods_root: mods_root.into(),
            mode: SyncMode::default(),
            manifest_key: DEFAULT_MANIFEST_KEY.to_string(),
            digest: DigestAlgorithm::default(),
            max_keys: DEFAULT_MAX_KEYS,
            directory_heuristic: DirectoryHeuristic::default(),
            ignore_patterns: Vec::new(),
            scheduler: SchedulerConfig::default(),
        }
    }
}

/// 失败的文件
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedTransfer {
    pub key: String,
    pub reason: String,
}

/// 同步报告
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub start_time: i64,
    pub end_time: i64,
    pub keys_listed: usize,
    pub directories: usize,
    pub ignored: usize,
    pub transfers_submitted: usize,
    pub files_downloaded: usize,
    pub files_skipped: usize,
    pub bytes_downloaded: u64,
    pub failures: Vec<FailedTransfer>,
    /// 毫秒
    pub duration: u64,
}

impl SyncReport {
    fn empty(start_time: i64) -> Self {
        Self {
            start_time,
            end_time: start_time,
            keys_listed: 0,
            directories: 0,
            ignored: 0,
            transfers_submitted: 0,
            files_downloaded: 0,
            files_skipped: 0,
            bytes_downloaded: 0,
            failures: Vec::new(),
            duration: 0,
        }
    }

    pub fn is_noop(&self) -> bool {
        self.files_downloaded == 0 && self.failures.is_empty()
    }

    /// 有文件下载失败时对应的错误
    pub fn partial_failure(&self) -> Option<SyncError> {
        (!self.failures.is_empty()).then(|| SyncError::PartialFailure {
            failed: self.failures.len(),
            total: self.transfers_submitted,
        })
    }

    /// 失败时转为错误，用于退出码
    pub fn into_result(self) -> SyncResult<Self> {
        match self.partial_failure() {
            Some(e) => Err(e),
            None => Ok(self),
        }
    }
}

/// 同步引擎
pub struct SyncEngine {
    store: Arc<dyn ObjectStore>,
    config: SyncConfig,
}

impl SyncEngine {
    pub fn new(store: Arc<dyn ObjectStore>, config: SyncConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// 运行一次同步：列举 -> 比较 -> 下载 -> 报告
    pub async fn run(&self, progress: &dyn ProgressReporter) -> SyncResult<SyncReport> {
        let started = chrono::Utc::now();
        let root = &self.config.mods_root;

        info!(
            "开始同步: {} -> {} (mode={:?})",
            self.store.name(),
            root.display(),
            self.config.mode
        );

        if !root.is_dir() {
            error!("本地目录不存在: {}", root.display());
            return Err(SyncError::LocalState(root.clone()));
        }

        let keys = list_all_keys(self.store.as_ref(), self.config.max_keys).await?;
        if keys.is_empty() {
            info!("远程没有任何对象，无需更新");
            return Ok(SyncReport::empty(started.timestamp()));
        }

        let (decision, local) = self.prepare_strategy().await?;

        let classifier = PathClassifier::new(self.config.directory_heuristic)
            .with_ignore_patterns(&self.config.ignore_patterns);
        let mut differ = TreeDiffer::new(root, &classifier);
        if self.config.mode == SyncMode::Manifest {
            differ = differ.with_manifest_key(&self.config.manifest_key);
        }
        let plan = differ.build_plan(&keys, &local);
        let plan_summary = plan.summarize();

        let scheduler = TransferScheduler::new(
            self.store.clone(),
            decision,
            self.config.scheduler.clone(),
        );
        let summary = scheduler.execute(&plan, progress).await?;

        let ended = chrono::Utc::now();
        let report = SyncReport {
            start_time: started.timestamp(),
            end_time: ended.timestamp(),
            keys_listed: keys.len(),
            directories: summary.directories,
            ignored: plan_summary.ignored,
            transfers_submitted: summary.transfers.len(),
            files_downloaded: summary.downloaded(),
            files_skipped: summary.skipped(),
            bytes_downloaded: summary.bytes_downloaded(),
            failures: summary
                .failures()
                .map(|(key, reason)| FailedTransfer {
                    key: key.to_string(),
                    reason: reason.to_string(),
                })
                .collect(),
            duration: (ended - started).num_milliseconds().max(0) as u64,
        };

        if report.ignored > 0 {
            info!("已忽略非正常mod该有的{}个文件", report.ignored);
        }
        info!(
            "同步完成: 下载 {}, 跳过 {}, 失败 {}, {} 字节, 耗时 {}ms",
            report.files_downloaded,
            report.files_skipped,
            report.failures.len(),
            report.bytes_downloaded,
            report.duration
        );
        if self.config.scheduler.failure_policy == FailurePolicy::Continue
            && !report.failures.is_empty()
        {
            error!("{} 个文件下载失败", report.failures.len());
        }

        Ok(report)
    }

    /// 按模式选择判定策略及本地状态
    async fn prepare_strategy(&self) -> SyncResult<(Arc<dyn TransferDecision>, LocalState)> {
        let checker = IntegrityChecker::new(self.config.digest);
        match self.config.mode {
            SyncMode::Manifest => {
                let manifest =
                    DigestManifest::fetch(self.store.as_ref(), &self.config.manifest_key).await?;
                Ok((
                    Arc::new(ManifestDecision::new(Arc::new(manifest), checker)),
                    LocalState::Deferred,
                ))
            }
            SyncMode::ObjectDigest => Ok((
                Arc::new(ObjectDigestDecision::new(self.store.clone(), checker)),
                LocalState::Deferred,
            )),
            SyncMode::LocalListing => {
                let root = self.config.mods_root.clone();
                let existing = tokio::task::spawn_blocking(move || scan_local_files(&root))
                    .await
                    .map_err(|e| {
                        error!("扫描本地目录失败: {}", e);
                        SyncError::LocalState(self.config.mods_root.clone())
                    })?;
                info!("本地已有 {} 个文件", existing.len());
                Ok((Arc::new(PresenceDecision), LocalState::Listing(existing)))
            }
        }
    }
}
