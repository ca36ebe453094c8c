use std::path::PathBuf;
use std::sync::Arc;

use chrono::{Local, TimeZone};
use clap::{Parser, Subcommand};

use crate::config::set_source_enabled;
use crate::core::lifecycle::{run_startup_check, Scheduler};
use crate::core::orchestrator::RunOutcome;
use crate::core::{Paths, Services};
use crate::error::{Result, UpdaterError};
use crate::models::{Source, SourceState};
use crate::storage::JsoncSettingsFile;
use crate::ui::ConsoleUi;

/// settings-updater - keep editor settings in sync with remote and local sources
#[derive(Parser)]
#[command(name = "settings-updater")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Target settings file
    #[arg(long, value_name = "FILE")]
    pub settings: Option<PathBuf>,

    /// Directory for state.json and backups
    #[arg(long, value_name = "DIR")]
    pub storage_dir: Option<PathBuf>,

    /// Workspace root used for relative local source paths
    #[arg(long, value_name = "DIR")]
    pub workspace: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Update one source, or every enabled source in order
    Update {
        name: Option<String>,

        /// Apply without asking
        #[arg(short = 'y', long)]
        yes: bool,
    },
    /// Run the startup reconciliation once
    Startup,
    /// Startup reconciliation, then poll remote sources until Ctrl-C
    Daemon,
    /// Show every configured source and its state
    Status,
    /// Enable a source and update it immediately
    Enable { name: String },
    /// Disable a source; settings it already applied are kept
    Disable { name: String },
    /// Check the settings file for syntax errors
    Validate,
}

impl Cli {
    pub fn paths(&self) -> Paths {
        Paths {
            settings_file: self.settings.clone().unwrap_or_else(default_settings_file),
            storage_dir: self.storage_dir.clone().unwrap_or_else(default_storage_dir),
            workspace: self.workspace.clone(),
        }
    }
}

fn default_settings_file() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("Code")
        .join("User")
        .join("settings.json")
}

fn default_storage_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("settings-updater")
}

/// 按子命令构造服务并执行
pub async fn run(cli: Cli) -> Result<()> {
    let paths = cli.paths();
    tracing::debug!(
        "settings: {}, storage: {}",
        paths.settings_file.display(),
        paths.storage_dir.display()
    );

    let services = || Services::production(&paths, Arc::new(ConsoleUi::new()));
    match cli.command {
        Commands::Update { name, yes } => update(&services().await?, name.as_deref(), !yes).await,
        Commands::Startup => {
            let services = services().await?;
            report(run_startup_check(&services.orchestrator, &services.config).await?);
            Ok(())
        }
        Commands::Daemon => daemon(services().await?).await,
        Commands::Status => {
            status(&services().await?).await;
            Ok(())
        }
        Commands::Enable { name } => {
            let services = services().await?;
            let source = set_source_enabled(services.settings.as_ref(), &name, true).await?;
            println!("\"{name}\" enabled.");
            let outcome = services.orchestrator.run_for_source(&source, true).await?;
            report(vec![(name, outcome)]);
            Ok(())
        }
        Commands::Disable { name } => {
            let services = services().await?;
            set_source_enabled(services.settings.as_ref(), &name, false).await?;
            println!("\"{name}\" disabled. Settings it applied are kept.");
            Ok(())
        }
        // 设置文件无法解析时也要能运行，不构造服务
        Commands::Validate => validate(&paths).await,
    }
}

async fn update(services: &Services, name: Option<&str>, prompt: bool) -> Result<()> {
    let sources: Vec<&Source> = match name {
        Some(name) => vec![services.config.find_source(name).ok_or_else(|| {
            UpdaterError::ConfigurationError(format!("source not found: {name}"))
        })?],
        None => services.config.enabled_sources().collect(),
    };
    if sources.is_empty() {
        println!("No enabled sources.");
        return Ok(());
    }

    // 顺序执行，避免两个来源同时写设置文件
    let mut outcomes = Vec::new();
    for source in sources {
        let outcome = services.orchestrator.run_for_source(source, prompt).await?;
        outcomes.push((source.name.clone(), outcome));
    }
    report(outcomes);
    Ok(())
}

async fn daemon(services: Services) -> Result<()> {
    report(run_startup_check(&services.orchestrator, &services.config).await?);

    let scheduler = Scheduler::start(services.orchestrator.clone(), &services.config);
    tracing::info!("watching for updates, press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;

    tracing::info!("shutting down");
    scheduler.stop().await;
    Ok(())
}

async fn status(services: &Services) {
    tracing::debug!(
        "state file: {}",
        services.orchestrator.state().file_path().display()
    );
    if services.config.sources.is_empty() {
        println!("No sources configured.");
        return;
    }
    for source in &services.config.sources {
        let state = services.orchestrator.state().get(&source.name).await;
        println!("{}", describe(source, &state));
    }
}

fn describe(source: &Source, state: &SourceState) -> String {
    let status = if !source.is_enabled() {
        "disabled"
    } else if !state.applied_keys.is_empty() {
        "active"
    } else {
        "pending"
    };
    let checked = match Local.timestamp_millis_opt(state.last_fetch_at).single() {
        Some(t) if state.last_fetch_at > 0 => t.format("%Y-%m-%d %H:%M").to_string(),
        _ => "never".to_string(),
    };
    format!(
        "{} [{}]\n  source: {}\n  last checked: {}\n  keys: {}",
        source.name,
        status,
        source.locator(),
        checked,
        if state.applied_keys.is_empty() {
            "-".to_string()
        } else {
            state.applied_keys.join(", ")
        }
    )
}

fn report(outcomes: Vec<(String, RunOutcome)>) {
    for (name, outcome) in outcomes {
        let line = match outcome {
            RunOutcome::Skipped(reason) => format!("skipped ({reason:?})"),
            RunOutcome::Unchanged => "unchanged".to_string(),
            RunOutcome::UpToDate => "already up to date".to_string(),
            RunOutcome::Declined => "declined".to_string(),
            RunOutcome::Applied(result) => format!(
                "{} written, {} removed",
                result.keys_written.len(),
                result.keys_removed.len()
            ),
            RunOutcome::RolledBack { backup_path } => {
                format!("rolled back from {}", backup_path.display())
            }
            RunOutcome::Failed(message) => format!("failed: {message}"),
        };
        println!("{name}: {line}");
    }
}

async fn validate(paths: &Paths) -> Result<()> {
    let file = JsoncSettingsFile::new(&paths.settings_file);
    file.validate().await?;
    println!("{}: OK", file.path().display());
    Ok(())
}
