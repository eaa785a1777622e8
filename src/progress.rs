//! 进度显示
//!
//! 调度器只发送三种信号：开始（总数）、设置当前数、停止。渲染由 indicatif 的
//! 后台刷新线程完成。

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::sync::Mutex;
use std::time::Duration;

/// 进度接收方
pub trait ProgressReporter: Send + Sync {
    fn start(&self, total: u64);

    fn set_current(&self, current: u64);

    fn stop(&self);
}

/// 不显示任何内容
#[derive(Debug, Default)]
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn start(&self, _total: u64) {}

    fn set_current(&self, _current: u64) {}

    fn stop(&self) {}
}

/// 终端进度条，格式为 `更新进度: 42% [████------]`
pub struct ConsoleProgress {
    title: String,
    bar: Mutex<Option<ProgressBar>>,
}

impl ConsoleProgress {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            bar: Mutex::new(None),
        }
    }

    fn style(&self) -> ProgressStyle {
        let template = format!("{}: {{percent:>3}}% [{{bar:50}}] {{pos}}/{{len}}", self.title);
        ProgressStyle::with_template(&template)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█-")
    }
}

impl Default for ConsoleProgress {
    fn default() -> Self {
        Self::new("更新进度")
    }
}

impl ProgressReporter for ConsoleProgress {
    fn start(&self, total: u64) {
        let bar = ProgressBar::with_draw_target(Some(total), ProgressDrawTarget::stdout());
        bar.set_style(self.style());
        bar.enable_steady_tick(Duration::from_millis(100));
        if let Ok(mut slot) = self.bar.lock() {
            *slot = Some(bar);
        }
    }

    fn set_current(&self, current: u64) {
        if let Ok(slot) = self.bar.lock() {
            if let Some(bar) = slot.as_ref() {
                bar.set_position(current);
            }
        }
    }

    fn stop(&self) {
        if let Ok(mut slot) = self.bar.lock() {
            if let Some(bar) = slot.take() {
                bar.finish();
            }
        }
    }
}
