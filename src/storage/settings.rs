use std::path::{Path, PathBuf};

use async_trait::async_trait;
use jsonc_parser::cst::{CstInputValue, CstRootNode};
use jsonc_parser::ParseOptions;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::error::{Result, UpdaterError};
use crate::models::ParsedSettings;

/// 目标设置文件的按 key 读写接口
#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>>;

    /// `None` 表示删除该 key
    async fn set(&self, key: &str, value: Option<serde_json::Value>) -> Result<()>;
}

/// 基于文件的 JSONC 设置存储。读取时容忍注释和尾逗号；写入只修改目标 key 对应的节点，
/// 其余文本（注释、缩进、key 顺序）原样保留。
pub struct JsoncSettingsFile {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsoncSettingsFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_document(&self) -> Result<ParsedSettings> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(ParsedSettings::new()),
            Err(e) => return Err(e.into()),
        };
        if content.trim().is_empty() {
            return Ok(ParsedSettings::new());
        }
        match json5::from_str::<serde_json::Value>(&content) {
            Ok(serde_json::Value::Object(map)) => Ok(map),
            Ok(_) => Err(UpdaterError::ParseError(format!(
                "{} is not a JSON object",
                self.path.display()
            ))),
            Err(e) => Err(UpdaterError::ParseError(format!(
                "{}: {}",
                self.path.display(),
                e
            ))),
        }
    }

    /// 检查文件的 JSONC 语法。文件不存在视为合法。
    pub async fn validate(&self) -> Result<()> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        json5::from_str::<serde_json::Value>(&content)
            .map(|_| ())
            .map_err(|e| match e {
                json5::Error::Message {
                    msg,
                    location: Some(loc),
                } => UpdaterError::ParseError(format!(
                    "{} line {}:{}  {}",
                    self.path.display(),
                    loc.line,
                    loc.column,
                    msg
                )),
                json5::Error::Message { msg, location: None } => {
                    UpdaterError::ParseError(format!("{}: {}", self.path.display(), msg))
                }
            })
    }
}

#[async_trait]
impl SettingsStore for JsoncSettingsFile {
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>> {
        let _guard = self.lock.lock().await;
        Ok(self.read_document().await?.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Option<serde_json::Value>) -> Result<()> {
        let _guard = self.lock.lock().await;
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e.into()),
        };
        let text = if content.trim().is_empty() {
            "{}\n".to_string()
        } else {
            content
        };

        let new_text = {
            let root = CstRootNode::parse(&text, &ParseOptions::default())
                .map_err(|e| UpdaterError::ParseError(format!("{}: {}", self.path.display(), e)))?;
            let object = root.object_value().ok_or_else(|| {
                UpdaterError::ParseError(format!("{} is not a JSON object", self.path.display()))
            })?;
            match (object.get(key), value) {
                (Some(prop), Some(v)) => prop.set_value(to_cst_input(&v)),
                (None, Some(v)) => {
                    object.append(key, to_cst_input(&v));
                }
                (Some(prop), None) => prop.remove(),
                (None, None) => return Ok(()),
            }
            root.to_string()
        };

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| UpdaterError::WriteFailure(format!("{key}: {e}")))?;
            }
        }
        tokio::fs::write(&self.path, new_text)
            .await
            .map_err(|e| UpdaterError::WriteFailure(format!("{key}: {e}")))
    }
}

fn to_cst_input(value: &Value) -> CstInputValue {
    match value {
        Value::Null => CstInputValue::Null,
        Value::Bool(b) => CstInputValue::Bool(*b),
        Value::Number(n) => CstInputValue::Number(n.to_string()),
        Value::String(s) => CstInputValue::String(s.clone()),
        Value::Array(items) => CstInputValue::Array(items.iter().map(to_cst_input).collect()),
        Value::Object(map) => CstInputValue::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), to_cst_input(v)))
                .collect(),
        ),
    }
}
