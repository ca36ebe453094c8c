use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;

use super::apply::{candidate_settings, ApplyContext};
use super::fetch::{hash_content, SourceReader};
use super::parser::{ParseMode, ParserRegistry};
use crate::error::{Result, UpdaterError};
use crate::models::{ApplyResult, Source, SourceState};
use crate::storage::StateStore;
use crate::ui::{Notice, Status, Ui};

/// 跳过原因
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    Disabled,
    NoReader,
    AlreadyRunning,
}

/// 单个来源一次运行的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Skipped(SkipReason),
    /// 远程内容哈希未变化
    Unchanged,
    /// 内容有变化但配置已是最新
    UpToDate,
    /// 用户拒绝
    Declined,
    Applied(ApplyResult),
    RolledBack { backup_path: PathBuf },
    Failed(String),
}

/// 单来源更新流水线：读取、去重、解析、变更统计、确认、应用
pub struct Orchestrator {
    readers: Vec<Arc<dyn SourceReader>>,
    parsers: ParserRegistry,
    apply: ApplyContext,
    ui: Arc<dyn Ui>,
    default_parser: String,
    in_flight: Mutex<HashSet<String>>,
}

impl Orchestrator {
    pub fn new(
        readers: Vec<Arc<dyn SourceReader>>,
        parsers: ParserRegistry,
        apply: ApplyContext,
        ui: Arc<dyn Ui>,
        default_parser: impl Into<String>,
    ) -> Self {
        Self {
            readers,
            parsers,
            apply,
            ui,
            default_parser: default_parser.into(),
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    pub fn state(&self) -> &StateStore {
        &self.apply.state
    }

    /// 交互式入口，解析失败时按空内容处理
    pub async fn run_for_source(&self, source: &Source, prompt: bool) -> Result<RunOutcome> {
        self.run_for_source_with(source, prompt, ParseMode::Lenient)
            .await
    }

    /// 只有回滚失败会返回 Err，其余错误转换为状态和通知
    pub async fn run_for_source_with(
        &self,
        source: &Source,
        prompt: bool,
        mode: ParseMode,
    ) -> Result<RunOutcome> {
        if !source.is_enabled() {
            tracing::debug!("[{}] source is disabled, skipping", source.name);
            return Ok(RunOutcome::Skipped(SkipReason::Disabled));
        }
        if !self.in_flight.lock().await.insert(source.name.clone()) {
            tracing::info!("[{}] update already in progress, skipping", source.name);
            return Ok(RunOutcome::Skipped(SkipReason::AlreadyRunning));
        }

        let result = self.run_pipeline(source, prompt, mode).await;
        self.in_flight.lock().await.remove(&source.name);

        match result {
            Ok(outcome) => Ok(outcome),
            Err(UpdaterError::RollbackPerformed {
                message,
                backup_path,
            }) => {
                self.ui.set_status(Status::Error(message.clone()));
                tracing::error!(
                    "[{}] update failed, settings automatically rolled back: {}",
                    source.name,
                    message
                );
                tracing::info!("[{}] restored from: {}", source.name, backup_path.display());
                self.ui.notify(Notice::RolledBack {
                    source: source.name.clone(),
                    backup_path: backup_path.clone(),
                });
                Ok(RunOutcome::RolledBack { backup_path })
            }
            Err(e @ UpdaterError::RollbackFailed { .. }) => {
                self.ui.set_status(Status::Error(e.to_string()));
                tracing::error!(
                    "[{}] {}; the settings file may be corrupted",
                    source.name,
                    e
                );
                self.ui.notify(Notice::Failed {
                    source: source.name.clone(),
                    message: e.to_string(),
                });
                Err(e)
            }
            Err(e) => {
                let message = e.to_string();
                self.ui.set_status(Status::Error(message.clone()));
                tracing::error!("[{}] error: {}", source.name, message);
                self.ui.notify(Notice::Failed {
                    source: source.name.clone(),
                    message: message.clone(),
                });
                Ok(RunOutcome::Failed(message))
            }
        }
    }

    async fn run_pipeline(&self, source: &Source, prompt: bool, mode: ParseMode) -> Result<RunOutcome> {
        self.ui.set_status(Status::Updating(source.name.clone()));

        let Some(reader) = self.readers.iter().find(|r| r.can_handle(source)) else {
            tracing::warn!("[{}] source has neither url nor file, skipping", source.name);
            self.ui.set_status(Status::Idle);
            return Ok(RunOutcome::Skipped(SkipReason::NoReader));
        };

        let raw = reader.read(source).await?;

        // 仅远程来源按内容哈希去重；本地文件的触发本身意味着内容已变化
        let content_hash = hash_content(&raw);
        if source.is_remote() {
            let state = self.apply.state.get(&source.name).await;
            if state.last_content_hash == content_hash {
                tracing::info!("[{}] no change detected, skipping", source.name);
                self.apply
                    .state
                    .save(
                        &source.name,
                        SourceState {
                            last_fetch_at: Utc::now().timestamp_millis(),
                            ..state
                        },
                    )
                    .await?;
                self.ui.set_status(Status::Idle);
                return Ok(RunOutcome::Unchanged);
            }
        }

        let parser_type = source.parser.as_deref().unwrap_or(&self.default_parser);
        let parsed = self.parsers.parse(&raw, parser_type, mode)?;
        let candidate = candidate_settings(source, parsed);

        let change_count = self.apply.count_changes(source, &candidate).await?;
        if change_count == 0 {
            tracing::info!("[{}] settings already up to date", source.name);
            self.ui.set_status(Status::Idle);
            return Ok(RunOutcome::UpToDate);
        }

        if prompt {
            let message = format!(
                "\"{}\": {} setting{} will change.",
                source.name,
                change_count,
                if change_count == 1 { "" } else { "s" }
            );
            if !self.ui.confirm(&message).await {
                tracing::info!("[{}] user skipped update", source.name);
                self.ui.set_status(Status::Idle);
                return Ok(RunOutcome::Declined);
            }
        }

        let result = self
            .apply
            .apply_source(source, &candidate, &content_hash)
            .await?;
        tracing::info!(
            "[{}] applied: {} written, {} removed",
            source.name,
            result.keys_written.len(),
            result.keys_removed.len()
        );
        self.ui.set_status(Status::Idle);
        self.ui.notify(Notice::Updated {
            source: source.name.clone(),
        });
        Ok(RunOutcome::Applied(result))
    }
}
