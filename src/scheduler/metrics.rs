//! Metrics cycle: refresh every exporter and retire series that disappeared.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::{JoinError, JoinSet};

use super::{Cycle, SchedulerSettings};
use crate::client::{randomized_pause, Client, MonitoringPointDirectory};
use crate::exporter::{Exporter, ExporterError, Metrics, RefreshReport, SeriesKey, SeriesLabels};

type UnitResult = Result<(i64, Result<RefreshReport, ExporterError>), JoinError>;

/// Outcome of one metrics cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsCycleSummary {
    pub refreshed: usize,
    pub failed: usize,
    pub published: usize,
    pub retired: usize,
}

/// Label sets written during one cycle, keyed by monitoring point.
#[derive(Debug, Default)]
struct CycleLabels {
    /// Points with published series.
    published: HashMap<SeriesKey, SeriesLabels>,
    /// Points with an `mp_data_status` sample, with or without data.
    reported: HashMap<SeriesKey, SeriesLabels>,
}

/// Refreshes monitoring point metrics for all tasks once per cycle.
pub struct MetricsScheduler {
    exporters: Vec<Arc<Exporter>>,
    client: Arc<Client>,
    metrics: Arc<Metrics>,
    settings: SchedulerSettings,
    /// Directory of the last successful fetch, reused when a fetch fails.
    directory: Arc<MonitoringPointDirectory>,
    /// Label sets written by the previous cycle.
    previous: CycleLabels,
}

impl MetricsScheduler {
    pub fn new(
        exporters: Vec<Arc<Exporter>>,
        client: Arc<Client>,
        metrics: Arc<Metrics>,
        settings: SchedulerSettings,
        directory: MonitoringPointDirectory,
    ) -> Self {
        Self {
            exporters,
            client,
            metrics,
            settings,
            directory: Arc::new(directory),
            previous: CycleLabels::default(),
        }
    }

    /// Refresh the shared directory before fan-out.
    ///
    /// Every unit of the cycle reads the same directory, so this fetch, with its jitter,
    /// rate limiting and retry pauses, completes before any unit starts. Its time counts
    /// toward the cycle, and a cycle overrunning the interval skips the missed ticks.
    async fn refresh_directory(&mut self) {
        match self.client.get_monitoring_points().await {
            Ok(directory) => {
                tracing::debug!(count = directory.len(), "Monitoring points directory refreshed");
                if directory.is_empty() {
                    tracing::warn!("Monitoring points directory is empty");
                }
                self.directory = Arc::new(directory);
            }
            Err(e) => {
                self.metrics.record_error("api_client", "get_mps", "", "");
                tracing::error!(error = %e, "Failed to refresh monitoring points, reusing previous directory");
            }
        }
    }

    /// Run one full cycle: fan out, join, merge, retire stale series.
    pub async fn run_once(&mut self) -> MetricsCycleSummary {
        let cycle_start = Instant::now();
        tracing::info!("Starting new metrics refresh cycle...");
        self.metrics.set_cycle_settings(
            self.settings.refresh_interval.as_secs_f64(),
            self.settings.max_allowed_staleness_steps,
        );

        self.refresh_directory().await;

        let mut units = JoinSet::new();
        for exporter in &self.exporters {
            let exporter = exporter.clone();
            let directory = self.directory.clone();
            let delay = self.settings.request_delay;
            units.spawn(async move {
                randomized_pause(delay).await;
                let result = exporter.refresh_metrics(&directory).await;
                (exporter.task_id(), result)
            });
        }

        let mut summary = MetricsCycleSummary::default();
        let mut current = CycleLabels::default();

        while let Some(joined) = units.join_next().await {
            merge_unit(joined, &mut summary, &mut current);
        }

        tracing::info!(
            duration_s = cycle_start.elapsed().as_secs_f64(),
            "All exporters finished refresh cycle"
        );

        summary.retired = self.retire_stale(&current);
        summary.published = current.published.len();
        self.previous = current;

        tracing::info!(
            refreshed = summary.refreshed,
            failed = summary.failed,
            published = summary.published,
            retired = summary.retired,
            "Metrics cleanup finished. Waiting for the next cycle"
        );
        summary
    }

    /// Delete series written last cycle that are missing now or changed labels.
    ///
    /// Returns the number of retired monitoring point series.
    fn retire_stale(&self, current: &CycleLabels) -> usize {
        let mut retired = 0;
        for (key, labels) in &self.previous.published {
            match current.published.get(key) {
                None => {
                    tracing::info!(series = %key, "Deleting stale series");
                    self.metrics.delete_series(labels);
                    retired += 1;
                }
                Some(now) if now != labels => {
                    tracing::info!(series = %key, "Deleting series with outdated labels");
                    self.metrics.delete_series(labels);
                    retired += 1;
                }
                Some(_) => {}
            }
        }

        for (key, labels) in &self.previous.reported {
            let still_reported = current
                .reported
                .get(key)
                .is_some_and(|now| now.data_values() == labels.data_values());
            if !still_reported {
                tracing::debug!(series = %key, "Deleting stale data status");
                self.metrics.delete_data_status(labels);
            }
        }

        retired
    }
}

/// Fold one joined unit into the cycle state. A panicked unit counts as a failed refresh.
fn merge_unit(joined: UnitResult, summary: &mut MetricsCycleSummary, current: &mut CycleLabels) {
    match joined {
        Ok((_, Ok(report))) => {
            summary.refreshed += 1;
            for labels in report.reported() {
                current.reported.insert(labels.key(), labels.clone());
            }
            for labels in report.published {
                current.published.insert(labels.key(), labels);
            }
        }
        Ok((task_id, Err(e))) => {
            summary.failed += 1;
            tracing::error!(task_id, error = %e, "Exporter refresh failed");
        }
        Err(e) => {
            summary.failed += 1;
            tracing::error!(error = %e, "Exporter refresh task panicked");
        }
    }
}

impl Cycle for MetricsScheduler {
    fn name(&self) -> &'static str {
        "metrics"
    }

    async fn run_cycle(&mut self) {
        self.run_once().await;
    }
}
