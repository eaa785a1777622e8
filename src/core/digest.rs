//! 文件内容摘要

use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

/// 每次读取的块大小
pub const DIGEST_CHUNK_SIZE: usize = 64 * 1024;

/// 摘要算法
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DigestAlgorithm {
    /// 与 S3/COS 的 ETag 及摘要清单一致
    #[default]
    Md5,
    Blake3,
}

/// 分块流式计算文件摘要，返回小写十六进制字符串
///
/// 这是阻塞调用，在异步上下文中应放到 `spawn_blocking` 里执行。
pub fn file_digest(path: &Path, algorithm: DigestAlgorithm) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut buffer = vec![0u8; DIGEST_CHUNK_SIZE];

    match algorithm {
        DigestAlgorithm::Md5 => {
            let mut hasher = Md5::new();
            loop {
                let n = file.read(&mut buffer)?;
                if n == 0 {
                    break;
                }
                hasher.update(&buffer[..n]);
            }
            Ok(hex::encode(hasher.finalize()))
        }
        DigestAlgorithm::Blake3 => {
            let mut hasher = blake3::Hasher::new();
            loop {
                let n = file.read(&mut buffer)?;
                if n == 0 {
                    break;
                }
                hasher.update(&buffer[..n]);
            }
            Ok(hasher.finalize().to_hex().to_string())
        }
    }
}

/// 内存数据的摘要
pub fn bytes_digest(data: &[u8], algorithm: DigestAlgorithm) -> String {
    match algorithm {
        DigestAlgorithm::Md5 => hex::encode(Md5::digest(data)),
        DigestAlgorithm::Blake3 => blake3::hash(data).to_hex().to_string(),
    }
}

/// 摘要比较忽略大小写和首尾空白
pub fn digests_equal(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}
