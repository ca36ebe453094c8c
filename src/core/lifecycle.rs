use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use super::orchestrator::{Orchestrator, RunOutcome};
use super::parser::ParseMode;
use crate::config::UpdaterConfig;
use crate::error::Result;
use crate::models::Source;

const MINUTE_MS: i64 = 60_000;

/// 配置里的间隔可以任意大，换算时饱和而不是溢出
fn interval_ms(minutes: u64) -> i64 {
    i64::try_from(minutes)
        .unwrap_or(i64::MAX)
        .saturating_mul(MINUTE_MS)
}

/// 定时器周期上限，`Instant + period` 不能溢出
const MAX_PERIOD: Duration = Duration::from_secs(365 * 24 * 60 * 60);

fn interval_period(minutes: u64) -> Duration {
    Duration::from_secs(minutes.saturating_mul(60)).min(MAX_PERIOD)
}

/// 启动时的对账。
/// 首次运行：不提示，应用所有启用的来源。
/// 之后：跳过本地文件来源，只运行距上次拉取超过间隔的来源，需要确认。
pub async fn run_startup_check(
    orchestrator: &Orchestrator,
    config: &UpdaterConfig,
) -> Result<Vec<(String, RunOutcome)>> {
    let mut outcomes = Vec::new();

    if !orchestrator.state().is_initialized().await {
        orchestrator.state().mark_initialized().await?;
        tracing::info!("first run, applying all sources without prompt");
        for source in config.enabled_sources() {
            let outcome = orchestrator
                .run_for_source_with(source, false, ParseMode::Strict)
                .await?;
            outcomes.push((source.name.clone(), outcome));
        }
        return Ok(outcomes);
    }

    let now = Utc::now().timestamp_millis();
    for source in config.enabled_sources() {
        if source.file.is_some() {
            continue;
        }
        let state = orchestrator.state().get(&source.name).await;
        let due_after = interval_ms(config.interval_minutes(source));
        if now.saturating_sub(state.last_fetch_at) >= due_after {
            let outcome = orchestrator
                .run_for_source_with(source, true, ParseMode::Strict)
                .await?;
            outcomes.push((source.name.clone(), outcome));
        } else {
            tracing::debug!("[{}] fetched recently, not due yet", source.name);
        }
    }
    Ok(outcomes)
}

/// 每个远程来源一个定时器
pub struct Scheduler {
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl Scheduler {
    pub fn start(orchestrator: Arc<Orchestrator>, config: &UpdaterConfig) -> Self {
        let jobs = config
            .enabled_sources()
            .filter(|s| s.url.is_some())
            .filter_map(|s| {
                let minutes = config.interval_minutes(s);
                if minutes == 0 {
                    tracing::warn!("[{}] update interval is 0, not scheduling", s.name);
                    return None;
                }
                Some((s.clone(), interval_period(minutes)))
            })
            .collect();
        Self::spawn(orchestrator, jobs)
    }

    pub(crate) fn spawn(orchestrator: Arc<Orchestrator>, jobs: Vec<(Source, Duration)>) -> Self {
        let (shutdown, _) = watch::channel(false);
        let tasks = jobs
            .into_iter()
            .map(|(source, period)| {
                tracing::info!(
                    "[{}] polling every {} min",
                    source.name,
                    period.as_secs() / 60
                );
                let orchestrator = orchestrator.clone();
                let mut stop = shutdown.subscribe();
                tokio::spawn(async move {
                    let mut ticker = interval_at(Instant::now() + period, period);
                    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                    loop {
                        tokio::select! {
                            _ = ticker.tick() => {}
                            _ = stop.changed() => break,
                        }
                        // 已开始的运行不会被打断
                        if let Err(e) = orchestrator
                            .run_for_source_with(&source, true, ParseMode::Strict)
                            .await
                        {
                            tracing::error!("[{}] scheduled update aborted: {}", source.name, e);
                        }
                        if *stop.borrow() {
                            break;
                        }
                    }
                })
            })
            .collect();
        Self { shutdown, tasks }
    }

    /// 停止后续触发，等待进行中的运行结束
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        for task in self.tasks {
            let _ = task.await;
        }
    }
}
