use super::{ObjectListing, ObjectStore, IO_TIMEOUT_SECS, OP_TIMEOUT_SECS};
use anyhow::Result;
use async_trait::async_trait;
use futures::TryStreamExt;
use opendal::{layers::TimeoutLayer, Metakey, Operator};
use std::time::Duration;

/// 兼容 S3 协议的对象存储（腾讯云 COS 等）
pub struct S3Store {
    operator: Operator,
    name: String,
}

impl S3Store {
    pub fn new(
        bucket: &str,
        region: &str,
        access_key: &str,
        secret_key: &str,
        endpoint: Option<String>,
    ) -> Result<Self> {
        use opendal::services::S3;

        let endpoint = endpoint.unwrap_or_else(|| default_endpoint(region));
        let builder = S3::default()
            .bucket(bucket)
            .region(region)
            .access_key_id(access_key)
            .secret_access_key(secret_key)
            .endpoint(&endpoint);

        // 添加超时层
        let operator = Operator::new(builder)?
            .layer(
                TimeoutLayer::default()
                    .with_timeout(Duration::from_secs(OP_TIMEOUT_SECS))
                    .with_io_timeout(Duration::from_secs(IO_TIMEOUT_SECS)),
            )
            .finish();

        Ok(Self {
            operator,
            name: format!("s3://{}", bucket),
        })
    }
}

/// COS 的 S3 兼容域名
pub fn default_endpoint(region: &str) -> String {
    format!("https://cos.{}.myqcloud.com", region)
}

/// ETag 去掉引号即为内容摘要
fn normalize_etag(etag: &str) -> String {
    etag.trim_matches('"').to_ascii_lowercase()
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn list_objects(&self, marker: Option<&str>, max_keys: usize) -> Result<ObjectListing> {
        let mut request = self
            .operator
            .lister_with("")
            .recursive(true)
            .metakey(Metakey::Mode);
        if let Some(marker) = marker {
            request = request.start_after(marker);
        }
        let mut lister = request.await?;

        let mut keys = Vec::new();
        while keys.len() < max_keys {
            match lister.try_next().await? {
                Some(entry) => {
                    let key = entry.path().trim_start_matches('/');
                    // 跳过根目录
                    if key.is_empty() {
                        continue;
                    }
                    keys.push(key.to_string());
                }
                None => break,
            }
        }

        // 多取一个条目判断是否还有下一页
        let is_truncated = keys.len() == max_keys && lister.try_next().await?.is_some();
        let next_marker = if is_truncated { keys.last().cloned() } else { None };

        Ok(ObjectListing {
            keys,
            next_marker,
            is_truncated,
        })
    }

    async fn read_object(&self, key: &str) -> Result<Vec<u8>> {
        let data = self.operator.read(key).await?;
        Ok(data.to_vec())
    }

    async fn object_digest(&self, key: &str) -> Result<Option<String>> {
        match self.operator.stat(key).await {
            Ok(meta) => Ok(meta.etag().map(normalize_etag)),
            Err(e) if e.kind() == opendal::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}
