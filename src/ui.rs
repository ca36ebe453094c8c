use std::path::PathBuf;

use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;

/// 状态指示
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    Idle,
    Updating(String),
    Error(String),
}

/// 面向用户的通知
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    Updated { source: String },
    Failed { source: String, message: String },
    RolledBack { source: String, backup_path: PathBuf },
}

/// 流水线对外的展示与交互接口，进程启动时构造一次并注入
#[async_trait]
pub trait Ui: Send + Sync {
    fn set_status(&self, status: Status);

    fn notify(&self, notice: Notice);

    /// 询问是否应用变更，只有明确确认才返回 true
    async fn confirm(&self, message: &str) -> bool;
}

/// 终端实现：状态写日志，通知写 stderr，确认从 stdin 读取。
/// 所有确认共用同一个带缓冲的输入，并发的提示依次进行。
pub struct ConsoleUi {
    input: Mutex<Box<dyn AsyncBufRead + Unpin + Send>>,
}

impl ConsoleUi {
    pub fn new() -> Self {
        Self::with_input(BufReader::new(tokio::io::stdin()))
    }

    pub fn with_input(input: impl AsyncBufRead + Unpin + Send + 'static) -> Self {
        Self {
            input: Mutex::new(Box::new(input)),
        }
    }
}

impl Default for ConsoleUi {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Ui for ConsoleUi {
    fn set_status(&self, status: Status) {
        match status {
            Status::Idle => tracing::debug!("status: idle"),
            Status::Updating(name) => tracing::debug!("status: updating {}", name),
            Status::Error(msg) => tracing::debug!("status: error ({})", msg),
        }
    }

    fn notify(&self, notice: Notice) {
        match notice {
            Notice::Updated { source } => eprintln!("\"{source}\" updated successfully."),
            Notice::Failed { source, message } => eprintln!("\"{source}\" failed: {message}"),
            Notice::RolledBack {
                source,
                backup_path,
            } => eprintln!(
                "\"{source}\" update failed - settings were automatically rolled back from {}. \
                 Re-run with RUST_LOG=debug for the full log.",
                backup_path.display()
            ),
        }
    }

    async fn confirm(&self, message: &str) -> bool {
        // 提示和读取都在锁内，回答不会被另一个提示读走
        let mut input = self.input.lock().await;
        let mut stderr = tokio::io::stderr();
        let prompt = format!("{message} Update? [y/N] ");
        if stderr.write_all(prompt.as_bytes()).await.is_err() {
            return false;
        }
        let _ = stderr.flush().await;

        let mut line = String::new();
        match input.read_line(&mut line).await {
            Ok(_) => matches!(line.trim().to_lowercase().as_str(), "y" | "yes"),
            Err(_) => false,
        }
    }
}
