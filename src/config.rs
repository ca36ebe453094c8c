use crate::error::{Result, UpdaterError};
use crate::models::Source;
use crate::storage::SettingsStore;

pub const CONFIG_NAMESPACE: &str = "settingsUpdater";
pub const DEFAULT_PARSER: &str = "jsonc-block";
pub const DEFAULT_UPDATE_INTERVAL_MINUTES: u64 = 720;
pub const DEFAULT_BACKUP_LIMIT: usize = 100;

/// `settingsUpdater.*` 命名空间下的配置
#[derive(Debug, Clone, PartialEq)]
pub struct UpdaterConfig {
    pub sources: Vec<Source>,
    pub default_parser: String,
    /// 分钟
    pub auto_update_interval: u64,
    pub backup_limit: usize,
    pub gitea_base_url: Option<String>,
}

impl Default for UpdaterConfig {
    fn default() -> Self {
        Self {
            sources: vec![],
            default_parser: DEFAULT_PARSER.to_string(),
            auto_update_interval: DEFAULT_UPDATE_INTERVAL_MINUTES,
            backup_limit: DEFAULT_BACKUP_LIMIT,
            gitea_base_url: None,
        }
    }
}

fn key(name: &str) -> String {
    format!("{CONFIG_NAMESPACE}.{name}")
}

async fn read_key<T: serde::de::DeserializeOwned>(
    store: &dyn SettingsStore,
    name: &str,
) -> Result<Option<T>> {
    match store.get(&key(name)).await? {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(v) => serde_json::from_value(v)
            .map(Some)
            .map_err(|e| UpdaterError::ConfigurationError(format!("{}: {}", key(name), e))),
    }
}

impl UpdaterConfig {
    /// 从目标设置文件读取配置，缺失的项使用默认值
    pub async fn load(store: &dyn SettingsStore) -> Result<Self> {
        let defaults = Self::default();
        let sources: Vec<Source> = read_key(store, "sources").await?.unwrap_or_default();

        let mut seen = std::collections::HashSet::new();
        for s in &sources {
            if s.name.is_empty() {
                return Err(UpdaterError::ConfigurationError(
                    "every source needs a non-empty name".to_string(),
                ));
            }
            if !seen.insert(s.name.as_str()) {
                return Err(UpdaterError::ConfigurationError(format!(
                    "duplicate source name: {}",
                    s.name
                )));
            }
        }

        Ok(Self {
            default_parser: read_key(store, "defaultParser")
                .await?
                .unwrap_or(defaults.default_parser),
            auto_update_interval: read_key(store, "autoUpdateInterval")
                .await?
                .unwrap_or(defaults.auto_update_interval),
            backup_limit: read_key(store, "backupLimit")
                .await?
                .unwrap_or(defaults.backup_limit),
            gitea_base_url: read_key::<String>(store, "giteaBaseUrl")
                .await?
                .filter(|u| !u.is_empty()),
            sources,
        })
    }

    pub fn enabled_sources(&self) -> impl Iterator<Item = &Source> {
        self.sources.iter().filter(|s| s.is_enabled())
    }

    pub fn find_source(&self, name: &str) -> Option<&Source> {
        self.sources.iter().find(|s| s.name == name)
    }

    /// 来源的更新间隔（分钟），未设置时使用全局间隔
    pub fn interval_minutes(&self, source: &Source) -> u64 {
        source.update_interval.unwrap_or(self.auto_update_interval)
    }
}

/// 修改来源的 enabled 标记并写回设置文件
pub async fn set_source_enabled(
    store: &dyn SettingsStore,
    name: &str,
    enabled: bool,
) -> Result<Source> {
    let mut sources: Vec<Source> = read_key(store, "sources").await?.unwrap_or_default();
    let source = sources
        .iter_mut()
        .find(|s| s.name == name)
        .ok_or_else(|| UpdaterError::ConfigurationError(format!("source not found: {name}")))?;
    source.enabled = Some(enabled);
    let updated = source.clone();

    store
        .set(&key("sources"), Some(serde_json::to_value(&sources)?))
        .await?;
    Ok(updated)
}
