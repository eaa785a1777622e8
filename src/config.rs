//! 应用配置模块
//!
//! 凭据来自命令行的三个位置参数，或程序旁边的 `key.properties`；其余选项来自同目录
//! 下可选的 `config.json`。

use crate::core::{
    DigestAlgorithm, DirectoryHeuristic, FailurePolicy, SchedulerConfig, SyncConfig, SyncMode,
};
use crate::error::{SyncError, SyncResult};
use crate::storage::{StoreConfig, DEFAULT_MAX_KEYS};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const KEY_FILE_NAME: &str = "key.properties";
pub const CONFIG_FILE_NAME: &str = "config.json";

/// 存储桶凭据
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub credential_id: String,
    pub credential_secret: String,
    pub bucket: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("credential_id", &self.credential_id)
            .field("credential_secret", &"***")
            .field("bucket", &self.bucket)
            .finish()
    }
}

impl Credentials {
    fn from_parts(id: Option<&str>, secret: Option<&str>, bucket: Option<&str>) -> Option<Self> {
        let non_empty = |v: Option<&str>| v.map(str::trim).filter(|s| !s.is_empty()).map(String::from);
        Some(Self {
            credential_id: non_empty(id)?,
            credential_secret: non_empty(secret)?,
            bucket: non_empty(bucket)?,
        })
    }

    /// 恰好三个位置参数：secretId secretKey bucketName
    pub fn from_args(args: &[String]) -> Option<Self> {
        match args {
            [id, secret, bucket] => Self::from_parts(Some(id.as_str()), Some(secret.as_str()), Some(bucket.as_str())),
            _ => None,
        }
    }

    pub fn from_properties(content: &str) -> Option<Self> {
        let props = parse_properties(content);
        Self::from_parts(
            props.get("secretId").map(String::as_str),
            props.get("secretKey").map(String::as_str),
            props.get("bucketName").map(String::as_str),
        )
    }

    /// 优先使用命令行参数，其次依次查找各目录下的 `key.properties`
    pub fn load(args: &[String], search_dirs: &[PathBuf]) -> SyncResult<Self> {
        if let Some(credentials) = Self::from_args(args) {
            return Ok(credentials);
        }
        if !args.is_empty() {
            tracing::warn!("位置参数数量为 {}，需要 3 个，改为读取 {}", args.len(), KEY_FILE_NAME);
        }

        for dir in search_dirs {
            let path = dir.join(KEY_FILE_NAME);
            let Ok(content) = fs::read_to_string(&path) else {
                continue;
            };
            if let Some(credentials) = Self::from_properties(&content) {
                tracing::debug!("从 {} 读取凭据", path.display());
                return Ok(credentials);
            }
            tracing::warn!("{} 缺少 secretId/secretKey/bucketName", path.display());
        }

        Err(SyncError::Configuration(format!(
            "请在启动时传递三个参数 secretId secretKey bucketName，或者在程序目录下新建 {} 配置这三个值",
            KEY_FILE_NAME
        )))
    }
}

/// 解析 Java properties 格式：`key=value` 或 `key: value`，`#`/`!` 开头为注释
pub fn parse_properties(content: &str) -> HashMap<String, String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#') && !line.starts_with('!'))
        .filter_map(|line| {
            let split = line.find(&['=', ':'][..])?;
            let key = line[..split].trim();
            let value = line[split + 1..].trim();
            (!key.is_empty()).then(|| (key.to_string(), value.to_string()))
        })
        .collect()
}

/// 配置文件查找目录：程序所在目录，然后是当前工作目录
pub fn config_dirs() -> Vec<PathBuf> {
    let mut dirs = Vec::new();
    if let Some(exe_dir) = std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(Path::to_path_buf))
    {
        dirs.push(exe_dir);
    }
    if let Ok(cwd) = std::env::current_dir() {
        if !dirs.contains(&cwd) {
            dirs.push(cwd);
        }
    }
    dirs
}

/// 读取 `config.json` 中的某一节，缺失或无效时使用默认值
pub fn load_section<T: DeserializeOwned + Default>(config_dir: &Path, section: &str) -> T {
    let config_file = config_dir.join(CONFIG_FILE_NAME);
    if config_file.exists() {
        if let Ok(content) = fs::read_to_string(&config_file) {
            if let Ok(config) = serde_json::from_str::<serde_json::Value>(&content) {
                if let Some(value) = config.get(section) {
                    match serde_json::from_value::<T>(value.clone()) {
                        Ok(parsed) => return parsed,
                        Err(e) => eprintln!("{} 中的 {} 配置无效: {}", config_file.display(), section, e),
                    }
                }
            }
        }
    }
    T::default()
}

/// 同步选项
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncSettings {
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default)]
    pub endpoint: Option<String>,
    /// 为空时使用 `<home>/Zomboid/mods`
    #[serde(default)]
    pub mods_root: Option<PathBuf>,
    #[serde(default)]
    pub mode: SyncMode,
    #[serde(default = "default_manifest_key")]
    pub manifest_key: String,
    #[serde(default)]
    pub digest: DigestAlgorithm,
    #[serde(default = "default_max_keys")]
    pub max_keys: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    /// 为空时为 CPU 数减一
    #[serde(default)]
    pub workers: Option<usize>,
    #[serde(default)]
    pub failure_policy: FailurePolicy,
    #[serde(default)]
    pub directory_heuristic: DirectoryHeuristic,
    #[serde(default)]
    pub ignore_patterns: Vec<String>,
}

fn default_region() -> String {
    "ap-guangzhou".to_string()
}

fn default_manifest_key() -> String {
    crate::core::manifest::DEFAULT_MANIFEST_KEY.to_string()
}

fn default_max_keys() -> usize {
    DEFAULT_MAX_KEYS
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    500
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            region: default_region(),
            endpoint: None,
            mods_root: None,
            mode: SyncMode::default(),
            manifest_key: default_manifest_key(),
            digest: DigestAlgorithm::default(),
            max_keys: default_max_keys(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            workers: None,
            failure_policy: FailurePolicy::default(),
            directory_heuristic: DirectoryHeuristic::default(),
            ignore_patterns: Vec::new(),
        }
    }
}

impl SyncSettings {
    pub fn load(config_dir: &Path) -> Self {
        load_section(config_dir, "sync")
    }

    pub fn store_config(&self, credentials: &Credentials) -> StoreConfig {
        StoreConfig {
            bucket: credentials.bucket.clone(),
            region: self.region.clone(),
            access_key: credentials.credential_id.clone(),
            secret_key: credentials.credential_secret.clone(),
            endpoint: self.endpoint.clone(),
        }
    }

    pub fn sync_config(&self) -> SyncConfig {
        let mods_root = self.mods_root.clone().unwrap_or_else(default_mods_root);
        let mut scheduler = SchedulerConfig {
            max_retries: self.max_retries,
            retry_base_delay_ms: self.retry_base_delay_ms,
            failure_policy: self.failure_policy,
            ..SchedulerConfig::default()
        };
        if let Some(workers) = self.workers {
            scheduler.workers = workers.max(1);
        }

        SyncConfig {
            mods_root,
            mode: self.mode,
            manifest_key: self.manifest_key.clone(),
            digest: self.digest,
            max_keys: self.max_keys.max(1),
            directory_heuristic: self.directory_heuristic,
            ignore_patterns: self.ignore_patterns.clone(),
            scheduler,
        }
    }
}

/// 游戏的 mods 目录
pub fn default_mods_root() -> PathBuf {
    crate::dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("Zomboid")
        .join("mods")
}
