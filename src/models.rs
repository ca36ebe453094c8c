use serde::{Deserialize, Serialize};

/// 扁平的设置映射：点路径 key → 任意 JSON 值
pub type ParsedSettings = serde_json::Map<String, serde_json::Value>;

/// 设置来源（远程 URL 或本地文件）
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Source {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parser: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merge_strategy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    /// 分钟
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_interval: Option<u64>,
}

impl Source {
    pub fn is_enabled(&self) -> bool {
        self.enabled != Some(false)
    }

    pub fn is_remote(&self) -> bool {
        self.url.is_some()
    }

    pub fn is_local(&self) -> bool {
        self.file.is_some() && self.url.is_none()
    }

    /// 用于日志和状态展示的来源描述
    pub fn locator(&self) -> &str {
        self.url
            .as_deref()
            .or(self.file.as_deref())
            .unwrap_or("unknown")
    }
}

/// 每个来源的持久化状态
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct SourceState {
    /// Unix 毫秒，0 表示从未拉取
    pub last_fetch_at: i64,
    /// 上次内容的 SHA-256 hex，空串表示从未拉取
    pub last_content_hash: String,
    /// 该来源当前负责的设置 key
    pub applied_keys: Vec<String>,
}

/// 一次 apply 的结果，不持久化
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ApplyResult {
    pub keys_written: Vec<String>,
    pub keys_removed: Vec<String>,
}
