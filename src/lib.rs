pub mod config;
pub mod core;
pub mod error;
pub mod logging;
pub mod progress;
pub mod storage;

pub use core::{SyncConfig, SyncEngine, SyncMode, SyncReport};
pub use error::{SyncError, SyncResult};
pub use progress::{ConsoleProgress, ProgressReporter, SilentProgress};
pub use storage::{create_store, ObjectStore, StoreConfig};

// 不引入 dirs 依赖，只需要用户主目录
pub mod dirs {
    use std::path::PathBuf;

    pub fn home_dir() -> Option<PathBuf> {
        let var = if cfg!(target_os = "windows") {
            "USERPROFILE"
        } else {
            "HOME"
        };
        std::env::var_os(var)
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
    }
}
