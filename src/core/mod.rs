pub mod apply;
pub mod fetch;
pub mod lifecycle;
pub mod merge;
pub mod orchestrator;
pub mod parser;
pub mod resolver;

use std::path::PathBuf;
use std::sync::Arc;

use crate::config::UpdaterConfig;
use crate::error::Result;
use crate::storage::{BackupManager, JsoncSettingsFile, SettingsStore, StateStore};
use crate::ui::Ui;

use self::apply::ApplyContext;
use self::fetch::{LocalFileReader, RemoteReader, SourceReader};
use self::merge::MergeRegistry;
use self::orchestrator::Orchestrator;
use self::parser::ParserRegistry;
use self::resolver::UrlResolver;

/// 进程使用的文件位置
#[derive(Debug, Clone)]
pub struct Paths {
    pub settings_file: PathBuf,
    pub storage_dir: PathBuf,
    pub workspace: Option<PathBuf>,
}

/// 进程启动时构造一次的服务集合
pub struct Services {
    pub config: UpdaterConfig,
    pub settings: Arc<JsoncSettingsFile>,
    pub orchestrator: Arc<Orchestrator>,
}

impl Services {
    pub async fn production(paths: &Paths, ui: Arc<dyn Ui>) -> Result<Self> {
        let settings = Arc::new(JsoncSettingsFile::new(&paths.settings_file));
        let config = UpdaterConfig::load(settings.as_ref()).await?;

        let readers: Vec<Arc<dyn SourceReader>> = vec![
            Arc::new(RemoteReader::new(UrlResolver::new(config.gitea_base_url.clone()))),
            Arc::new(LocalFileReader::new(paths.workspace.clone())),
        ];
        let apply = ApplyContext {
            settings: settings.clone() as Arc<dyn SettingsStore>,
            state: Arc::new(StateStore::load(&paths.storage_dir.join("state.json"))),
            backups: BackupManager::new(
                Some(paths.storage_dir.clone()),
                paths.settings_file.clone(),
                config.backup_limit,
            ),
            strategies: MergeRegistry::default(),
        };
        let orchestrator = Orchestrator::new(
            readers,
            ParserRegistry::default(),
            apply,
            ui,
            config.default_parser.clone(),
        );

        Ok(Self {
            config,
            settings,
            orchestrator: Arc::new(orchestrator),
        })
    }
}
