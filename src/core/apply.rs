use std::sync::Arc;

use chrono::Utc;

use super::merge::MergeRegistry;
use crate::error::{Result, UpdaterError};
use crate::models::{ApplyResult, ParsedSettings, Source, SourceState};
use crate::storage::{BackupManager, SettingsStore, StateStore};

const DEFAULT_STRATEGY: &str = "replace";

/// 要写入的 key 集合。
/// 声明了 target key 时只写这一个 key：解析结果中已有该 key 则取其值，否则整个结果作为值。
pub fn candidate_settings(source: &Source, parsed: ParsedSettings) -> ParsedSettings {
    match &source.target_key {
        Some(target) => {
            let value = match parsed.get(target) {
                Some(v) if !v.is_null() => v.clone(),
                _ => serde_json::Value::Object(parsed),
            };
            let mut map = ParsedSettings::new();
            map.insert(target.clone(), value);
            map
        }
        None => parsed,
    }
}

/// apply 所需的协作者
pub struct ApplyContext {
    pub settings: Arc<dyn SettingsStore>,
    pub state: Arc<StateStore>,
    pub backups: BackupManager,
    pub strategies: MergeRegistry,
}

impl ApplyContext {
    fn strategy<'a>(source: &'a Source) -> &'a str {
        source.merge_strategy.as_deref().unwrap_or(DEFAULT_STRATEGY)
    }

    /// 统计变更数：合并后与当前值不同的 key，加上不再出现的已应用 key
    pub async fn count_changes(&self, source: &Source, candidate: &ParsedSettings) -> Result<usize> {
        let strategy = Self::strategy(source);
        let mut count = 0;
        for (key, incoming) in candidate {
            let existing = self.settings.get(key).await?;
            let merged = self.strategies.apply(strategy, existing.as_ref(), incoming);
            if existing.as_ref() != Some(&merged) {
                count += 1;
            }
        }

        let state = self.state.get(&source.name).await;
        count += state
            .applied_keys
            .iter()
            .filter(|k| !candidate.contains_key(k.as_str()))
            .count();
        Ok(count)
    }

    /// 备份、写入、清理、记录状态。写入失败且有备份时自动回滚。
    pub async fn apply_source(
        &self,
        source: &Source,
        candidate: &ParsedSettings,
        content_hash: &str,
    ) -> Result<ApplyResult> {
        let previous = self.state.get(&source.name).await;
        let backup_path = self.backups.backup().await;

        let result = match self.write_settings(source, candidate, &previous).await {
            Ok(result) => result,
            Err(e) => {
                let Some(backup_path) = backup_path else {
                    return Err(e);
                };
                tracing::error!("[{}] write failed, rolling back: {}", source.name, e);
                self.backups.rollback(&backup_path).await?;
                return Err(UpdaterError::RollbackPerformed {
                    message: e.to_string(),
                    backup_path,
                });
            }
        };

        self.state
            .save(
                &source.name,
                SourceState {
                    last_fetch_at: Utc::now().timestamp_millis(),
                    last_content_hash: content_hash.to_string(),
                    applied_keys: result.keys_written.clone(),
                },
            )
            .await?;

        Ok(result)
    }

    async fn write_settings(
        &self,
        source: &Source,
        candidate: &ParsedSettings,
        previous: &SourceState,
    ) -> Result<ApplyResult> {
        let strategy = Self::strategy(source);
        let mut result = ApplyResult::default();

        for (key, incoming) in candidate {
            let existing = self.settings.get(key).await?;
            let merged = self.strategies.apply(strategy, existing.as_ref(), incoming);
            self.settings.set(key, Some(merged)).await?;
            result.keys_written.push(key.clone());
            tracing::info!("[{}] wrote \"{}\" (strategy: {})", source.name, key, strategy);
        }

        // 清理来源中已移除的 key；仍被其他来源声明的保持不动
        for key in &previous.applied_keys {
            if result.keys_written.contains(key) {
                continue;
            }
            if self
                .state
                .is_key_owned_by_another_source(key, &source.name)
                .await
            {
                tracing::info!("[{}] kept \"{}\" (owned by another source)", source.name, key);
                continue;
            }
            self.settings.set(key, None).await?;
            result.keys_removed.push(key.clone());
            tracing::info!("[{}] removed \"{}\" (no longer in source)", source.name, key);
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::JsoncSettingsFile;
    use crate::testing::MemorySettings;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn obj(v: Value) -> ParsedSettings {
        match v {
            Value::Object(m) => m,
            _ => panic!("not an object"),
        }
    }

    fn source(name: &str) -> Source {
        Source {
            name: name.to_string(),
            url: Some("https://example.com/s.md".to_string()),
            ..Default::default()
        }
    }

    fn context(tmp: &TempDir, settings: Arc<dyn SettingsStore>) -> ApplyContext {
        ApplyContext {
            settings,
            state: Arc::new(StateStore::load(&tmp.path().join("state.json"))),
            backups: BackupManager::new(
                Some(tmp.path().to_path_buf()),
                tmp.path().join("settings.json"),
                10,
            ),
            strategies: MergeRegistry::default(),
        }
    }

    fn owned(keys: &[&str]) -> SourceState {
        SourceState {
            applied_keys: keys.iter().map(|k| k.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_candidate_without_target_key() {
        let parsed = obj(json!({"a": 1, "b": 2}));
        assert_eq!(candidate_settings(&source("s"), parsed.clone()), parsed);
    }

    #[test]
    fn test_candidate_with_target_key() {
        let mut s = source("s");
        s.target_key = Some("editor.wordWrap".to_string());

        // 已嵌套在 target key 下
        assert_eq!(
            candidate_settings(&s, obj(json!({"editor.wordWrap": "on", "x": 1}))),
            obj(json!({"editor.wordWrap": "on"}))
        );
        // 整个结果作为值
        assert_eq!(
            candidate_settings(&s, obj(json!({"*.ts": "*.js"}))),
            obj(json!({"editor.wordWrap": {"*.ts": "*.js"}}))
        );
        assert_eq!(
            candidate_settings(&s, obj(json!({"editor.wordWrap": null}))),
            obj(json!({"editor.wordWrap": {"editor.wordWrap": null}}))
        );
    }

    #[tokio::test]
    async fn test_count_changes() {
        let tmp = TempDir::new().unwrap();
        let settings = Arc::new(MemorySettings::with(json!({"same": 1, "diff": 1})));
        let ctx = context(&tmp, settings);
        ctx.state.save("s", owned(&["same", "gone"])).await.unwrap();

        let candidate = obj(json!({"same": 1, "diff": 2, "new": true}));
        // diff + new + gone
        assert_eq!(ctx.count_changes(&source("s"), &candidate).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_count_changes_with_merge_strategy() {
        let tmp = TempDir::new().unwrap();
        let settings = Arc::new(MemorySettings::with(json!({"obj": {"a": 1, "b": 2}})));
        let ctx = context(&tmp, settings);
        let mut s = source("s");
        s.merge_strategy = Some("merge-shallow".to_string());

        // 合并后结果不变
        let candidate = obj(json!({"obj": {"a": 1}}));
        assert_eq!(ctx.count_changes(&s, &candidate).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_apply_writes_and_records_state() {
        let tmp = TempDir::new().unwrap();
        let settings = Arc::new(MemorySettings::with(json!({"list": [1]})));
        let ctx = context(&tmp, settings.clone());
        let mut s = source("s");
        s.merge_strategy = Some("merge-deep".to_string());

        let result = ctx
            .apply_source(&s, &obj(json!({"list": [2], "k": "v"})), "hash1")
            .await
            .unwrap();

        assert_eq!(result.keys_written, vec!["k".to_string(), "list".to_string()]);
        assert!(result.keys_removed.is_empty());
        assert_eq!(settings.value("list"), Some(json!([1, 2])));
        assert_eq!(settings.value("k"), Some(json!("v")));

        let state = ctx.state.get("s").await;
        assert_eq!(state.last_content_hash, "hash1");
        assert!(state.last_fetch_at > 0);
        assert_eq!(state.applied_keys, result.keys_written);
    }

    #[tokio::test]
    async fn test_apply_removes_keys_dropped_from_source() {
        let tmp = TempDir::new().unwrap();
        let settings = Arc::new(MemorySettings::with(json!({"old.key": 1})));
        let ctx = context(&tmp, settings.clone());
        ctx.state.save("src1", owned(&["old.key"])).await.unwrap();

        let result = ctx
            .apply_source(&source("src1"), &obj(json!({"new.key": 2})), "h")
            .await
            .unwrap();

        assert_eq!(result.keys_removed, vec!["old.key".to_string()]);
        assert_eq!(settings.value("old.key"), None);
        assert_eq!(ctx.state.get("src1").await.applied_keys, vec!["new.key".to_string()]);
    }

    #[tokio::test]
    async fn test_apply_keeps_keys_owned_by_other_source() {
        let tmp = TempDir::new().unwrap();
        let settings = Arc::new(MemorySettings::with(json!({"old.key": 1})));
        let ctx = context(&tmp, settings.clone());
        ctx.state.save("src1", owned(&["old.key"])).await.unwrap();
        ctx.state.save("src2", owned(&["old.key"])).await.unwrap();

        let result = ctx
            .apply_source(&source("src1"), &obj(json!({"new.key": 2})), "h")
            .await
            .unwrap();

        assert!(result.keys_removed.is_empty());
        assert_eq!(settings.value("old.key"), Some(json!(1)));
        // 自身的所有权仍然释放
        assert_eq!(ctx.state.get("src1").await.applied_keys, vec!["new.key".to_string()]);
    }

    #[tokio::test]
    async fn test_write_failure_without_backup_propagates() {
        let tmp = TempDir::new().unwrap();
        let settings = Arc::new(MemorySettings::default());
        settings.fail_writes_to("bad");
        // settings.json 不存在，无备份
        let ctx = context(&tmp, settings);

        let err = ctx
            .apply_source(&source("s"), &obj(json!({"bad": 1})), "h")
            .await
            .unwrap_err();
        assert!(matches!(err, UpdaterError::WriteFailure(_)));
        assert_eq!(ctx.state.get("s").await, SourceState::default());
    }

    /// 文件存储包装：写指定 key 时失败，可选地先删除备份目录
    struct FailingFile {
        inner: JsoncSettingsFile,
        fail_key: &'static str,
        remove_on_fail: Option<PathBuf>,
    }

    #[async_trait]
    impl SettingsStore for FailingFile {
        async fn get(&self, key: &str) -> Result<Option<Value>> {
            self.inner.get(key).await
        }

        async fn set(&self, key: &str, value: Option<Value>) -> Result<()> {
            if key == self.fail_key {
                if let Some(dir) = &self.remove_on_fail {
                    std::fs::remove_dir_all(dir).unwrap();
                }
                return Err(UpdaterError::WriteFailure(format!("{key}: disk full")));
            }
            self.inner.set(key, value).await
        }
    }

    #[tokio::test]
    async fn test_write_failure_rolls_back_from_backup() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("settings.json");
        let original = "{\n  // keep me\n  \"z.key\": 1\n}\n";
        std::fs::write(&path, original).unwrap();

        let store = Arc::new(FailingFile {
            inner: JsoncSettingsFile::new(&path),
            fail_key: "b.fail",
            remove_on_fail: None,
        });
        let ctx = context(&tmp, store);

        let err = ctx
            .apply_source(&source("s"), &obj(json!({"a.first": 1, "b.fail": 2})), "h")
            .await
            .unwrap_err();

        match err {
            UpdaterError::RollbackPerformed {
                message,
                backup_path,
            } => {
                assert!(message.contains("disk full"));
                assert!(backup_path.exists());
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(std::fs::read_to_string(&path).unwrap(), original);
        assert_eq!(ctx.state.get("s").await, SourceState::default());
    }

    #[tokio::test]
    async fn test_failed_rollback_is_fatal() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("settings.json");
        std::fs::write(&path, "{}").unwrap();

        let store = Arc::new(FailingFile {
            inner: JsoncSettingsFile::new(&path),
            fail_key: "b.fail",
            remove_on_fail: Some(tmp.path().join("backups")),
        });
        let ctx = context(&tmp, store);

        let err = ctx
            .apply_source(&source("s"), &obj(json!({"b.fail": 2})), "h")
            .await
            .unwrap_err();
        assert!(matches!(err, UpdaterError::RollbackFailed { .. }));
    }
}
