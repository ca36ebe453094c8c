use std::path::{Path, PathBuf};

use chrono::Utc;

use crate::error::{Result, UpdaterError};

const BACKUP_PREFIX: &str = "settings-";
const BACKUP_SUFFIX: &str = ".json";

/// 写入前备份目标设置文件，失败时恢复
pub struct BackupManager {
    storage_root: Option<PathBuf>,
    settings_path: PathBuf,
    limit: usize,
}

impl BackupManager {
    pub fn new(storage_root: Option<PathBuf>, settings_path: PathBuf, limit: usize) -> Self {
        Self {
            storage_root,
            settings_path,
            limit,
        }
    }

    pub fn backup_dir(&self) -> Option<PathBuf> {
        self.storage_root.as_ref().map(|root| root.join("backups"))
    }

    /// 复制一份带时间戳的备份，返回备份路径。
    /// 存储目录不可用、目标文件不存在或复制失败时返回 None，不阻塞后续写入。
    pub async fn backup(&self) -> Option<PathBuf> {
        let dir = self.backup_dir()?;
        if !self.settings_path.exists() {
            return None;
        }

        if let Err(e) = tokio::fs::create_dir_all(&dir).await {
            tracing::error!("[backup] could not create {}: {}", dir.display(), e);
            return None;
        }

        let stamp = Utc::now().format("%Y-%m-%dT%H-%M-%S-%9fZ");
        let dest = dir.join(format!("{BACKUP_PREFIX}{stamp}{BACKUP_SUFFIX}"));

        match tokio::fs::copy(&self.settings_path, &dest).await {
            Ok(_) => tracing::info!("[backup] {} -> {}", self.settings_path.display(), dest.display()),
            Err(e) => {
                tracing::error!("[backup] could not back up {}: {}", self.settings_path.display(), e);
                return None;
            }
        }

        self.prune(&dir).await;
        Some(dest)
    }

    /// 用备份覆盖目标文件。失败不可恢复，直接上抛。
    pub async fn rollback(&self, backup_path: &Path) -> Result<()> {
        match tokio::fs::copy(backup_path, &self.settings_path).await {
            Ok(_) => {
                tracing::info!(
                    "[backup] restored {} from {}",
                    self.settings_path.display(),
                    backup_path.display()
                );
                Ok(())
            }
            Err(e) => {
                tracing::error!(
                    "[backup] ROLLBACK FAILED, {} may be corrupted; surviving backup: {} ({})",
                    self.settings_path.display(),
                    backup_path.display(),
                    e
                );
                Err(UpdaterError::RollbackFailed {
                    message: e.to_string(),
                    backup_path: backup_path.to_path_buf(),
                })
            }
        }
    }

    /// 仅保留最新的 `limit` 份备份（按文件名排序），至少保留刚写入的一份
    async fn prune(&self, dir: &Path) {
        let mut files = match list_backups(dir).await {
            Ok(files) => files,
            Err(e) => {
                tracing::error!("[backup] could not list backups: {}", e);
                return;
            }
        };
        files.sort();

        let keep = self.limit.max(1);
        if files.len() <= keep {
            return;
        }
        let excess = files.len() - keep;
        for name in files.into_iter().take(excess) {
            match tokio::fs::remove_file(dir.join(&name)).await {
                Ok(()) => tracing::info!("[backup] pruned old backup: {}", name),
                Err(e) => tracing::error!("[backup] could not prune {}: {}", name, e),
            }
        }
    }
}

async fn list_backups(dir: &Path) -> std::io::Result<Vec<String>> {
    let mut names = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        if let Some(name) = entry.file_name().to_str() {
            if name.starts_with(BACKUP_PREFIX) && name.ends_with(BACKUP_SUFFIX) {
                names.push(name.to_string());
            }
        }
    }
    Ok(names)
}
