use clap::Parser;
use modsync_lib::config::{config_dirs, Credentials, SyncSettings, CONFIG_FILE_NAME};
use modsync_lib::core::FailurePolicy;
use modsync_lib::logging::{init_logging, LogConfig};
use modsync_lib::{create_store, ConsoleProgress, SyncEngine, SyncError, SyncMode, SyncReport};
use std::io::{BufRead, IsTerminal, Write};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "modsync")]
#[command(version)]
#[command(about = "把对象存储中的 mods 同步到本地游戏目录")]
struct Cli {
    /// secretId secretKey bucketName（省略时读取 key.properties）
    #[arg(value_name = "CREDENTIAL")]
    credentials: Vec<String>,

    /// 本地 mods 目录，默认 <home>/Zomboid/mods
    #[arg(long)]
    mods_root: Option<PathBuf>,

    /// 传输判定方式: manifest, object-digest, local-listing
    #[arg(long)]
    mode: Option<SyncMode>,

    #[arg(long)]
    region: Option<String>,

    /// 自定义 S3 兼容域名
    #[arg(long)]
    endpoint: Option<String>,

    /// 单个文件失败时继续其余下载
    #[arg(long)]
    continue_on_error: bool,

    /// 结束后不等待回车
    #[arg(long)]
    no_wait: bool,

    /// 同时把日志输出到终端
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn apply_overrides(&self, settings: &mut SyncSettings) {
        if let Some(root) = &self.mods_root {
            settings.mods_root = Some(root.clone());
        }
        if let Some(mode) = self.mode {
            settings.mode = mode;
        }
        if let Some(region) = &self.region {
            settings.region = region.clone();
        }
        if let Some(endpoint) = &self.endpoint {
            settings.endpoint = Some(endpoint.clone());
        }
        if self.continue_on_error {
            settings.failure_policy = FailurePolicy::Continue;
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let search_dirs = config_dirs();
    let config_dir = search_dirs
        .iter()
        .find(|dir| dir.join(CONFIG_FILE_NAME).exists())
        .or_else(|| search_dirs.first())
        .cloned()
        .unwrap_or_else(|| PathBuf::from("."));

    let log_config = LogConfig::load(&config_dir);
    let _log_guard = init_logging(&config_dir, &log_config, cli.verbose);

    let code = match run(&cli, &search_dirs, &config_dir).await {
        Ok(report) => print_report(&report),
        Err(e) => {
            tracing::error!("同步失败: {}", e);
            eprintln!("{}", e);
            if e.is_preflight() {
                eprintln!("本地文件未被修改");
            }
            ExitCode::FAILURE
        }
    };

    if !cli.no_wait {
        wait_for_enter();
    }
    code
}

async fn run(
    cli: &Cli,
    search_dirs: &[PathBuf],
    config_dir: &std::path::Path,
) -> Result<SyncReport, SyncError> {
    let credentials = Credentials::load(&cli.credentials, search_dirs)?;

    let mut settings = SyncSettings::load(config_dir);
    cli.apply_overrides(&mut settings);

    println!("正在连接服务器...");
    let store = create_store(&settings.store_config(&credentials))
        .map_err(|e| SyncError::Configuration(format!("无法创建存储连接: {}", e)))?;

    let engine = SyncEngine::new(store, settings.sync_config());
    println!("本地目录: {}", engine.config().mods_root.display());
    println!("开始对比文件...");

    engine.run(&ConsoleProgress::default()).await
}

fn print_report(report: &SyncReport) -> ExitCode {
    if report.ignored > 0 {
        println!("已忽略非正常mod该有的{}个文件", report.ignored);
    }

    if report.is_noop() {
        println!("nothing to update");
    } else {
        println!("{} files updated", report.files_downloaded);
    }

    let Some(error) = report.partial_failure() else {
        return ExitCode::SUCCESS;
    };
    for failure in &report.failures {
        eprintln!("  下载失败 {}: {}", failure.key, failure.reason);
    }
    eprintln!("{}", error);
    ExitCode::FAILURE
}

/// 交互终端下等待回车，避免双击运行时窗口立即关闭
fn wait_for_enter() {
    if !std::io::stdin().is_terminal() {
        return;
    }
    print!("按回车键退出程序...");
    let _ = std::io::stdout().flush();
    let mut line = String::new();
    let _ = std::io::stdin().lock().read_line(&mut line);
}
