pub mod backup;
pub mod settings;
pub mod state;

pub use backup::BackupManager;
pub use settings::{JsoncSettingsFile, SettingsStore};
pub use state::StateStore;
