//! Stats cycle: collect task status logs into the `/stats` snapshots.

use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinSet;

use super::{Cycle, SchedulerSettings};
use crate::cache::SeriesCache;
use crate::client::{randomized_pause, TaskInfo, TaskStatEntry};
use crate::exporter::{Exporter, ExporterError};

/// Outcome of one stats cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsCycleSummary {
    pub collected: usize,
    pub failed: usize,
    /// Whether the task stats snapshot was replaced.
    pub published: bool,
    /// Whether the all-tasks snapshot was replaced.
    pub all_tasks_published: bool,
}

enum UnitOutput {
    Stats(usize, TaskStatEntry),
    AllTasks(Vec<TaskInfo>),
}

/// Refreshes the cached JSON served on `/stats`.
pub struct StatsScheduler {
    exporters: Vec<Arc<Exporter>>,
    cache: Arc<SeriesCache>,
    settings: SchedulerSettings,
}

impl StatsScheduler {
    pub fn new(
        exporters: Vec<Arc<Exporter>>,
        cache: Arc<SeriesCache>,
        settings: SchedulerSettings,
    ) -> Self {
        Self {
            exporters,
            cache,
            settings,
        }
    }

    pub async fn run_once(&mut self) -> StatsCycleSummary {
        let cycle_start = Instant::now();
        tracing::info!("Starting new stats refresh cycle...");

        let mut units: JoinSet<Vec<Result<UnitOutput, ExporterError>>> = JoinSet::new();
        for (index, exporter) in self.exporters.iter().enumerate() {
            let exporter = exporter.clone();
            let delay = self.settings.request_delay;
            units.spawn(async move {
                randomized_pause(delay).await;
                let mut outputs = Vec::with_capacity(2);
                // The first exporter also owns the account-wide task listing.
                if index == 0 {
                    outputs.push(exporter.update_all_tasks_info().await.map(UnitOutput::AllTasks));
                }
                outputs.push(
                    exporter
                        .update_task_stats()
                        .await
                        .map(|entry| UnitOutput::Stats(index, entry)),
                );
                outputs
            });
        }

        let mut summary = StatsCycleSummary::default();
        let mut stats: Vec<(usize, TaskStatEntry)> = Vec::with_capacity(self.exporters.len());
        let mut all_tasks: Option<Vec<TaskInfo>> = None;

        while let Some(joined) = units.join_next().await {
            let outputs = match joined {
                Ok(outputs) => outputs,
                Err(e) => {
                    summary.failed += 1;
                    tracing::error!(error = %e, "Stats refresh task panicked");
                    continue;
                }
            };
            for output in outputs {
                match output {
                    Ok(UnitOutput::Stats(index, entry)) => stats.push((index, entry)),
                    Ok(UnitOutput::AllTasks(tasks)) => all_tasks = Some(tasks),
                    Err(e @ ExporterError::Upstream { operation: "get_all_tasks", .. }) => {
                        tracing::error!(error = %e, "Failed to update all tasks info");
                    }
                    Err(e) => {
                        summary.failed += 1;
                        tracing::error!(error = %e, "Failed to update task stats");
                    }
                }
            }
        }

        summary.collected = stats.len();
        stats.sort_by_key(|(index, _)| *index);

        if stats.is_empty() && !self.exporters.is_empty() {
            tracing::warn!("No task stats collected, keeping previous snapshot");
        } else {
            let entries: Vec<TaskStatEntry> = stats.into_iter().map(|(_, entry)| entry).collect();
            match serde_json::to_vec(&entries) {
                Ok(bytes) => {
                    self.cache.task_stats.publish(bytes).await;
                    summary.published = true;
                }
                Err(e) => tracing::error!(error = %e, "Failed to encode task stats"),
            }
        }

        if let Some(tasks) = all_tasks {
            match serde_json::to_vec(&tasks) {
                Ok(bytes) => {
                    self.cache.all_tasks.publish(bytes).await;
                    summary.all_tasks_published = true;
                }
                Err(e) => tracing::error!(error = %e, "Failed to encode all tasks info"),
            }
        }

        tracing::info!(
            duration_s = cycle_start.elapsed().as_secs_f64(),
            collected = summary.collected,
            failed = summary.failed,
            published = summary.published,
            all_tasks_published = summary.all_tasks_published,
            "Stats refresh cycle finished. Waiting for the next cycle"
        );
        summary
    }
}

impl Cycle for StatsScheduler {
    fn name(&self) -> &'static str {
        "stats"
    }

    async fn run_cycle(&mut self) {
        self.run_once().await;
    }
}
