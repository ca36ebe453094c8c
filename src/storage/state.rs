use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::{Result, UpdaterError};
use crate::models::SourceState;

/// 进程级持久化状态
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ProcessState {
    #[serde(default, rename = "init")]
    pub initialized: bool,
    #[serde(default, rename = "sourceStates")]
    pub sources: BTreeMap<String, SourceState>,
}

/// 来源状态存储：内存状态 + JSON 文件持久化
pub struct StateStore {
    state: RwLock<ProcessState>,
    file_path: PathBuf,
}

impl StateStore {
    /// 从 JSON 文件加载状态。文件不存在则初始化空状态，文件损坏则记录警告并初始化空状态。
    pub fn load(file_path: &Path) -> Self {
        let state = if file_path.exists() {
            match std::fs::read_to_string(file_path) {
                Ok(content) => match serde_json::from_str::<ProcessState>(&content) {
                    Ok(state) => state,
                    Err(e) => {
                        tracing::warn!("state file is corrupt, starting empty: {}", e);
                        ProcessState::default()
                    }
                },
                Err(e) => {
                    tracing::warn!("cannot read state file, starting empty: {}", e);
                    ProcessState::default()
                }
            }
        } else {
            ProcessState::default()
        };

        Self {
            state: RwLock::new(state),
            file_path: file_path.to_path_buf(),
        }
    }

    pub fn file_path(&self) -> &Path {
        &self.file_path
    }

    /// 读取来源状态；不存在时返回零值，不会写入
    pub async fn get(&self, source_name: &str) -> SourceState {
        self.state
            .read()
            .await
            .sources
            .get(source_name)
            .cloned()
            .unwrap_or_default()
    }

    /// 整体覆盖某个来源的状态并持久化，失败回滚内存状态
    pub async fn save(&self, source_name: &str, source_state: SourceState) -> Result<()> {
        let mut state = self.state.write().await;
        let previous = state.sources.insert(source_name.to_string(), source_state);

        if let Err(e) = self.persist(&state).await {
            match previous {
                Some(prev) => state.sources.insert(source_name.to_string(), prev),
                None => state.sources.remove(source_name),
            };
            return Err(e);
        }
        Ok(())
    }

    /// 除 `exclude_name` 外是否还有来源声明了该 key
    pub async fn is_key_owned_by_another_source(&self, key: &str, exclude_name: &str) -> bool {
        self.state
            .read()
            .await
            .sources
            .iter()
            .any(|(name, s)| name != exclude_name && s.applied_keys.iter().any(|k| k == key))
    }

    pub async fn is_initialized(&self) -> bool {
        self.state.read().await.initialized
    }

    pub async fn mark_initialized(&self) -> Result<()> {
        let mut state = self.state.write().await;
        if state.initialized {
            return Ok(());
        }
        state.initialized = true;
        if let Err(e) = self.persist(&state).await {
            state.initialized = false;
            return Err(e);
        }
        Ok(())
    }

    /// 将状态序列化为 JSON 写入文件
    async fn persist(&self, state: &ProcessState) -> Result<()> {
        let json = serde_json::to_string_pretty(state)
            .map_err(|e| UpdaterError::StorageError(e.to_string()))?;

        // 确保父目录存在
        if let Some(parent) = self.file_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        tokio::fs::write(&self.file_path, json).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tempfile::TempDir;

    fn state(hash: &str, keys: &[&str]) -> SourceState {
        SourceState {
            last_fetch_at: 1_700_000_000_000,
            last_content_hash: hash.to_string(),
            applied_keys: keys.iter().map(|k| k.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn test_get_unknown_source_returns_default() {
        let tmp = TempDir::new().unwrap();
        let store = StateStore::load(&tmp.path().join("state.json"));

        let s = store.get("missing").await;
        assert_eq!(s, SourceState::default());
        assert_eq!(s.last_fetch_at, 0);
        assert!(s.last_content_hash.is_empty());
        // 读取不会产生持久化副作用
        assert!(!tmp.path().join("state.json").exists());
    }

    #[tokio::test]
    async fn test_save_overwrites_whole_record() {
        let tmp = TempDir::new().unwrap();
        let store = StateStore::load(&tmp.path().join("state.json"));

        store.save("src1", state("aaa", &["a", "b"])).await.unwrap();
        store.save("src1", state("bbb", &["c"])).await.unwrap();

        assert_eq!(store.get("src1").await, state("bbb", &["c"]));
    }

    #[tokio::test]
    async fn test_save_persists_across_reload() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested/state.json");
        {
            let store = StateStore::load(&path);
            store.save("src1", state("abc", &["editor.fontSize"])).await.unwrap();
            store.mark_initialized().await.unwrap();
        }

        let store = StateStore::load(&path);
        assert!(store.is_initialized().await);
        assert_eq!(store.get("src1").await, state("abc", &["editor.fontSize"]));
    }

    #[tokio::test]
    async fn test_persisted_layout_uses_camel_case() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("state.json");
        let store = StateStore::load(&path);
        store.save("src1", state("abc", &["k"])).await.unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["sourceStates"]["src1"]["lastContentHash"], "abc");
        assert_eq!(raw["sourceStates"]["src1"]["appliedKeys"][0], "k");
        assert_eq!(raw["init"], false);
    }

    #[tokio::test]
    async fn test_corrupt_file_starts_empty() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("state.json");
        std::fs::write(&path, "{not json").unwrap();

        let store = StateStore::load(&path);
        assert!(!store.is_initialized().await);
        assert_eq!(store.get("src1").await, SourceState::default());
    }

    #[tokio::test]
    async fn test_key_owned_by_another_source() {
        let tmp = TempDir::new().unwrap();
        let store = StateStore::load(&tmp.path().join("state.json"));
        store.save("src1", state("", &["shared.key", "own.key"])).await.unwrap();
        store.save("src2", state("", &["shared.key"])).await.unwrap();

        assert!(store.is_key_owned_by_another_source("shared.key", "src1").await);
        assert!(!store.is_key_owned_by_another_source("own.key", "src1").await);
        assert!(store.is_key_owned_by_another_source("own.key", "src2").await);
        assert!(!store.is_key_owned_by_another_source("nobody.key", "src1").await);
    }

    #[tokio::test]
    async fn test_failed_persist_restores_memory_state() {
        let tmp = TempDir::new().unwrap();
        // 父路径是一个文件，写入必然失败
        std::fs::write(tmp.path().join("blocker"), "").unwrap();
        let store = StateStore::load(&tmp.path().join("blocker/state.json"));

        assert!(store.save("src1", state("abc", &["k"])).await.is_err());
        assert_eq!(store.get("src1").await, SourceState::default());
    }

    proptest! {
        #[test]
        fn prop_save_then_get_round_trips(
            name in "[a-z][a-z0-9-]{0,12}",
            ts in 0i64..i64::MAX,
            hash in "[0-9a-f]{0,64}",
            keys in proptest::collection::vec("[a-z]{1,8}(\\.[a-z]{1,8}){0,2}", 0..6),
        ) {
            let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
            rt.block_on(async {
                let tmp = TempDir::new().unwrap();
                let path = tmp.path().join("state.json");
                let expected = SourceState { last_fetch_at: ts, last_content_hash: hash, applied_keys: keys };

                let store = StateStore::load(&path);
                store.save(&name, expected.clone()).await.unwrap();
                prop_assert_eq!(store.get(&name).await, expected.clone());

                let reloaded = StateStore::load(&path);
                prop_assert_eq!(reloaded.get(&name).await, expected);
                Ok(())
            })?;
        }
    }
}
