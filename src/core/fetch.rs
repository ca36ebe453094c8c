use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use super::resolver::UrlResolver;
use crate::error::{Result, UpdaterError};
use crate::models::Source;

/// 远程拉取的固定超时
pub const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// 来源读取器
#[async_trait]
pub trait SourceReader: Send + Sync {
    fn can_handle(&self, source: &Source) -> bool;

    async fn read(&self, source: &Source) -> Result<String>;
}

/// 内容指纹：原始文本的 SHA-256 hex
pub fn hash_content(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// HTTP(S) 来源
pub struct RemoteReader {
    client: reqwest::Client,
    resolver: UrlResolver,
    timeout: Duration,
}

impl RemoteReader {
    pub fn new(resolver: UrlResolver) -> Self {
        Self {
            client: reqwest::Client::new(),
            resolver,
            timeout: FETCH_TIMEOUT,
        }
    }

    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn fetch_raw(&self, url: &str) -> Result<String> {
        let request = async {
            let resp = self
                .client
                .get(url)
                .header("User-Agent", "settings-updater")
                .send()
                .await
                .map_err(|e| UpdaterError::FetchError(format!("{url}: {e}")))?;

            let status = resp.status();
            if !status.is_success() {
                return Err(UpdaterError::FetchError(format!(
                    "HTTP {} for {}",
                    status.as_u16(),
                    url
                )));
            }

            resp.text()
                .await
                .map_err(|e| UpdaterError::FetchError(format!("{url}: {e}")))
        };

        match tokio::time::timeout(self.timeout, request).await {
            Ok(result) => result,
            Err(_) => Err(UpdaterError::Timeout {
                url: url.to_string(),
                timeout: self.timeout,
            }),
        }
    }
}

#[async_trait]
impl SourceReader for RemoteReader {
    fn can_handle(&self, source: &Source) -> bool {
        source.url.is_some() && source.file.is_none()
    }

    async fn read(&self, source: &Source) -> Result<String> {
        let raw = source
            .url
            .as_deref()
            .ok_or_else(|| UpdaterError::ValidationError(format!("[{}] no url", source.name)))?;
        let url = self.resolver.resolve(raw)?;
        tracing::info!("[{}] fetching {}", source.name, url);
        self.fetch_raw(&url).await
    }
}

/// 本地文件来源
#[derive(Debug, Clone, Default)]
pub struct LocalFileReader {
    workspace_root: Option<PathBuf>,
}

impl LocalFileReader {
    pub fn new(workspace_root: Option<PathBuf>) -> Self {
        Self { workspace_root }
    }

    /// 路径解析顺序：
    /// 1. `~` 展开为用户主目录
    /// 2. 绝对路径原样返回
    /// 3. 相对路径 + 有工作区：拼接到第一个工作区根目录
    /// 4. 相对路径 + 无工作区：原样返回，由读取时报告文件不存在
    pub fn resolve_path(&self, raw: &str) -> PathBuf {
        if let Some(rest) = raw.strip_prefix('~') {
            if let Some(home) = dirs::home_dir() {
                return PathBuf::from(format!("{}{}", home.display(), rest));
            }
        }
        let path = Path::new(raw);
        if path.is_absolute() {
            return path.to_path_buf();
        }
        match &self.workspace_root {
            Some(root) => root.join(path),
            None => path.to_path_buf(),
        }
    }
}

#[async_trait]
impl SourceReader for LocalFileReader {
    fn can_handle(&self, source: &Source) -> bool {
        source.is_local()
    }

    async fn read(&self, source: &Source) -> Result<String> {
        let raw = source
            .file
            .as_deref()
            .ok_or_else(|| UpdaterError::ValidationError(format!("[{}] no file", source.name)))?;
        let path = self.resolve_path(raw);
        let bytes = tokio::fs::read(&path).await.map_err(|e| {
            UpdaterError::FetchError(format!("cannot read {}: {}", path.display(), e))
        })?;
        String::from_utf8(bytes).map_err(|e| {
            UpdaterError::FetchError(format!("{} is not valid UTF-8: {}", path.display(), e))
        })
    }
}
