//! 下载调度：固定大小的工作池并行执行下载，按提交顺序等待结果

use crate::core::differ::{SyncAction, SyncPlan};
use crate::core::integrity::TransferDecision;
use crate::error::{SyncError, SyncResult};
use crate::progress::ProgressReporter;
use crate::storage::ObjectStore;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::{AbortHandle, JoinHandle};
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

/// 失败处理方式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// 所有任务结束后，把第一个失败作为整次运行的错误
    #[default]
    Abort,
    /// 收集全部失败，在报告中汇总
    Continue,
}

/// 调度配置
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// 工作池大小
    pub workers: usize,
    /// 最大重试次数
    pub max_retries: u32,
    /// 重试基础延迟（毫秒）
    pub retry_base_delay_ms: u64,
    pub failure_policy: FailurePolicy,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            max_retries: 3,
            retry_base_delay_ms: 500,
            failure_policy: FailurePolicy::Abort,
        }
    }
}

/// 可用并行度减一，至少为 1，留出一份给进度显示和主流程
pub fn default_workers() -> usize {
    workers_for(
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1),
    )
}

/// `max(1, parallelism - 1)`
pub fn workers_for(parallelism: usize) -> usize {
    parallelism.saturating_sub(1).max(1)
}

/// 单个下载任务的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOutcome {
    /// 本地内容已是最新
    Skipped,
    Downloaded { bytes: u64 },
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct TransferReport {
    pub key: String,
    pub outcome: TransferOutcome,
}

/// 执行结果汇总
#[derive(Debug, Clone, Default)]
pub struct ExecutionSummary {
    pub directories: usize,
    pub ignored: usize,
    pub transfers: Vec<TransferReport>,
}

impl ExecutionSummary {
    pub fn downloaded(&self) -> usize {
        self.transfers
            .iter()
            .filter(|t| matches!(t.outcome, TransferOutcome::Downloaded { .. }))
            .count()
    }

    pub fn skipped(&self) -> usize {
        self.transfers
            .iter()
            .filter(|t| t.outcome == TransferOutcome::Skipped)
            .count()
    }

    pub fn bytes_downloaded(&self) -> u64 {
        self.transfers
            .iter()
            .map(|t| match t.outcome {
                TransferOutcome::Downloaded { bytes } => bytes,
                _ => 0,
            })
            .sum()
    }

    pub fn failures(&self) -> impl Iterator<Item = (&str, &str)> {
        self.transfers.iter().filter_map(|t| match &t.outcome {
            TransferOutcome::Failed(reason) => Some((t.key.as_str(), reason.as_str())),
            _ => None,
        })
    }
}

/// 一次执行期间持有的工作池
///
/// 任务在多线程运行时上执行，并发数由信号量限制。`shutdown` 等待所有已提交的任务
/// （包括还在排队的）执行完毕；未经 `shutdown` 就被 drop 时（如提前返回），关闭
/// 信号量并中止剩余任务。
pub struct WorkerPool {
    semaphore: Arc<Semaphore>,
    tracker: TaskTracker,
    tasks: Vec<AbortHandle>,
    size: usize,
}

impl WorkerPool {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        debug!("创建工作池: {} 个工作者", size);
        Self {
            semaphore: Arc::new(Semaphore::new(size)),
            tracker: TaskTracker::new(),
            tasks: Vec::new(),
            size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// 提交任务，立即返回；任务在拿到许可后才开始执行。
    /// 只有池被提前 drop 时结果才为 `None`。
    pub fn submit<F, T>(&mut self, task: F) -> JoinHandle<Option<T>>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let semaphore = self.semaphore.clone();
        let handle = self.tracker.spawn(async move {
            let _permit = semaphore.acquire_owned().await.ok()?;
            Some(task.await)
        });
        self.tasks.push(handle.abort_handle());
        handle
    }

    /// 不再接收新任务，等待所有已提交的任务执行完毕
    pub async fn shutdown(mut self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tasks.clear();
        debug!("工作池已关闭");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        if self.tasks.is_empty() {
            return;
        }
        self.semaphore.close();
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

/// 下载调度器
pub struct TransferScheduler {
    store: Arc<dyn ObjectStore>,
    decision: Arc<dyn TransferDecision>,
    config: SchedulerConfig,
}

impl TransferScheduler {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        decision: Arc<dyn TransferDecision>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            store,
            decision,
            config,
        }
    }

    /// 执行同步计划
    ///
    /// 先按顺序创建目录并统计忽略项，然后把下载动作提交到工作池。结果按提交
    /// 顺序等待，每等待一个就把已等待数量报告给进度显示，因此进度单调递增。
    pub async fn execute(
        &self,
        plan: &SyncPlan,
        progress: &dyn ProgressReporter,
    ) -> SyncResult<ExecutionSummary> {
        let mut summary = ExecutionSummary::default();
        let mut pending: Vec<(&str, &Path)> = Vec::new();

        for action in &plan.actions {
            match action {
                SyncAction::CreateDirectory { path, .. } => {
                    create_directory(path).await?;
                    summary.directories += 1;
                }
                SyncAction::Ignore { key, reason } => {
                    debug!("忽略 {} ({})", key, reason);
                    summary.ignored += 1;
                }
                SyncAction::Transfer { key, path } => pending.push((key.as_str(), path.as_path())),
            }
        }

        if pending.is_empty() {
            return Ok(summary);
        }

        let mut pool = WorkerPool::new(self.config.workers);
        info!("提交 {} 个下载任务到 {} 个工作者", pending.len(), pool.size());

        let handles: Vec<_> = pending
            .iter()
            .map(|(key, path)| {
                let task = TransferTask {
                    key: key.to_string(),
                    path: path.to_path_buf(),
                    store: self.store.clone(),
                    decision: self.decision.clone(),
                    max_retries: self.config.max_retries,
                    retry_base_delay_ms: self.config.retry_base_delay_ms,
                };
                (key.to_string(), pool.submit(task.run()))
            })
            .collect();

        progress.start(handles.len() as u64);
        let progress_guard = scopeguard::guard(progress, |p| p.stop());

        for (index, (key, handle)) in handles.into_iter().enumerate() {
            let outcome = match handle.await {
                Ok(Some(outcome)) => outcome,
                Ok(None) => TransferOutcome::Failed("工作池已关闭".to_string()),
                Err(e) => TransferOutcome::Failed(format!("任务异常: {}", e)),
            };
            if let TransferOutcome::Failed(reason) = &outcome {
                error!("下载失败 {}: {}", key, reason);
            }
            summary.transfers.push(TransferReport { key, outcome });
            progress_guard.set_current(index as u64 + 1);
        }

        drop(progress_guard);
        pool.shutdown().await;

        let failed = summary.failures().count();
        if failed > 0 && self.config.failure_policy == FailurePolicy::Abort {
            if let Some((key, reason)) = summary.failures().next() {
                return Err(SyncError::Transfer {
                    key: key.to_string(),
                    reason: reason.to_string(),
                    failed,
                });
            }
        }

        Ok(summary)
    }
}

async fn create_directory(path: &Path) -> SyncResult<()> {
    if path.is_dir() {
        return Ok(());
    }
    debug!("创建目录: {}", path.display());
    tokio::fs::create_dir_all(path)
        .await
        .map_err(|source| SyncError::DirectoryCreation {
            path: path.to_path_buf(),
            source,
        })
}

/// 任务状态：Pending -> CheckingIntegrity -> SkippedUpToDate | Downloading -> Downloaded | Failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskState {
    CheckingIntegrity,
    Downloading,
}

struct TransferTask {
    key: String,
    path: PathBuf,
    store: Arc<dyn ObjectStore>,
    decision: Arc<dyn TransferDecision>,
    max_retries: u32,
    retry_base_delay_ms: u64,
}

impl TransferTask {
    /// 带重试执行，每次重试都重新做完整性检查
    async fn run(self) -> TransferOutcome {
        let mut last_error = String::new();

        for attempt in 0..=self.max_retries {
            match self.attempt().await {
                Ok(outcome) => return outcome,
                Err((state, e)) => {
                    last_error = format!("{:?}: {:#}", state, e);
                    if attempt < self.max_retries {
                        // 指数退避
                        let delay = self.retry_base_delay_ms * 2_u64.pow(attempt);
                        warn!(
                            "{} 失败，{}ms 后重试 ({}/{}): {}",
                            self.key,
                            delay,
                            attempt + 1,
                            self.max_retries,
                            last_error
                        );
                        tokio::time::sleep(Duration::from_millis(delay)).await;
                    }
                }
            }
        }

        TransferOutcome::Failed(last_error)
    }

    async fn attempt(&self) -> Result<TransferOutcome, (TaskState, anyhow::Error)> {
        let needed = self
            .decision
            .needs_transfer(&self.path, &self.key)
            .await
            .map_err(|e| (TaskState::CheckingIntegrity, e))?;

        if !needed {
            debug!("已是最新，跳过: {}", self.key);
            return Ok(TransferOutcome::Skipped);
        }

        let bytes = self
            .store
            .download(&self.key, &self.path)
            .await
            .map_err(|e| (TaskState::Downloading, e))?;
        debug!("下载完成: {} ({} 字节)", self.key, bytes);
        Ok(TransferOutcome::Downloaded { bytes })
    }
}
