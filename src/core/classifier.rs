//! 远程键分类：忽略项 / 目录标记 / 普通文件

use serde::{Deserialize, Serialize};

/// 键的类别
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyKind {
    Ignored(IgnoreReason),
    DirectoryMarker,
    RegularFile,
}

/// 忽略原因
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IgnoreReason {
    /// 最后一段以 `.` 开头（隐藏文件、编辑器锁文件等）
    Hidden,
    /// 命中配置的排除规则
    Pattern(String),
    /// 会逃出本地根目录的键
    UnsafePath,
    /// 摘要清单本身
    Manifest,
    /// 本地列表中已存在（仅列表对比模式）
    AlreadyPresent,
}

impl std::fmt::Display for IgnoreReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IgnoreReason::Hidden => write!(f, "hidden"),
            IgnoreReason::Pattern(p) => write!(f, "pattern {}", p),
            IgnoreReason::UnsafePath => write!(f, "unsafe path"),
            IgnoreReason::Manifest => write!(f, "manifest"),
            IgnoreReason::AlreadyPresent => write!(f, "already present"),
        }
    }
}

/// 目录判定规则
///
/// 以 `/` 结尾的键总是目录。`Extensionless` 额外把最后一段不含 `.` 的键视为目录，
/// 没有扩展名的普通文件会被误判，这是已知的限制。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DirectoryHeuristic {
    #[default]
    Extensionless,
    TrailingSlash,
}

/// 键分类器
#[derive(Debug, Clone, Default)]
pub struct PathClassifier {
    heuristic: DirectoryHeuristic,
    ignore_patterns: Vec<(String, regex::Regex)>,
}

impl PathClassifier {
    pub fn new(heuristic: DirectoryHeuristic) -> Self {
        Self {
            heuristic,
            ignore_patterns: Vec::new(),
        }
    }

    /// 添加排除规则（支持 `*` 和 `**`），无法编译的规则会被跳过
    pub fn with_ignore_patterns<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for pattern in patterns {
            let pattern = pattern.as_ref();
            match glob_to_regex(pattern) {
                Ok(re) => self.ignore_patterns.push((pattern.to_string(), re)),
                Err(e) => tracing::warn!("忽略无效的排除规则 {}: {}", pattern, e),
            }
        }
        self
    }

    pub fn classify(&self, key: &str) -> KeyKind {
        let trimmed = key.trim_end_matches('/');
        let name = final_segment(trimmed);

        if name.starts_with('.') {
            return KeyKind::Ignored(IgnoreReason::Hidden);
        }

        if let Some((pattern, _)) = self
            .ignore_patterns
            .iter()
            .find(|(_, re)| re.is_match(trimmed))
        {
            return KeyKind::Ignored(IgnoreReason::Pattern(pattern.clone()));
        }

        if key.ends_with('/') {
            return KeyKind::DirectoryMarker;
        }

        match self.heuristic {
            DirectoryHeuristic::Extensionless if !name.contains('.') => KeyKind::DirectoryMarker,
            _ => KeyKind::RegularFile,
        }
    }
}

/// 最后一个 `/` 之后的部分
pub fn final_segment(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}

/// 简单的 glob 转正则：`**` 跨目录，`*` 不跨目录
fn glob_to_regex(pattern: &str) -> Result<regex::Regex, regex::Error> {
    let mut re = String::from("^");
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' if chars.peek() == Some(&'*') => {
                chars.next();
                re.push_str(".*");
            }
            '*' => re.push_str("[^/]*"),
            '?' => re.push_str("[^/]"),
            c => re.push_str(&regex::escape(&c.to_string())),
        }
    }
    re.push('$');
    regex::Regex::new(&re)
}
