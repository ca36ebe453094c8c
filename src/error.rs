use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum UpdaterError {
    #[error("invalid source url: {0}")]
    ValidationError(String),

    #[error("configuration error: {0}")]
    ConfigurationError(String),

    #[error("fetch failed: {0}")]
    FetchError(String),

    #[error("request to {url} timed out after {}s", .timeout.as_secs())]
    Timeout { url: String, timeout: Duration },

    #[error("parse error: {0}")]
    ParseError(String),

    #[error("write failed: {0}")]
    WriteFailure(String),

    /// 写入失败，但已从备份恢复
    #[error("update failed and settings were rolled back: {message}")]
    RollbackPerformed { message: String, backup_path: PathBuf },

    /// 恢复本身失败，目标文件可能已损坏
    #[error("rollback from {} failed: {message}", .backup_path.display())]
    RollbackFailed { message: String, backup_path: PathBuf },

    #[error("storage error: {0}")]
    StorageError(String),

    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, UpdaterError>;
