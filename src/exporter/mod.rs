//! Per-task exporter.
//!
//! An [`Exporter`] owns one task's identity and turns Ping-Admin payloads into
//! monitoring point metrics and status-log snapshots.

mod labels;
mod metrics;

pub use labels::*;
pub use metrics::*;

#[cfg(test)]
pub(crate) use metrics::testing;

use chrono::{DateTime, TimeZone, Utc};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::client::{
    Client, ClientError, ConnectionResult, MonitoringPointDirectory, MonitoringPointEntry,
    TaskInfo, TaskStatEntry,
};
use crate::translator::Translator;

/// Samples at least this old mark the monitoring point as down.
const MAX_SAMPLE_AGE: Duration = Duration::from_secs(24 * 60 * 60);

const ERROR_MODULE_API: &str = "api_client";

/// Exporter error types.
#[derive(Error, Debug)]
pub enum ExporterError {
    #[error("task with ID {0} not found in provided metadata")]
    NotFound(i64),
    #[error("{operation} failed: {source}")]
    Upstream {
        operation: &'static str,
        #[source]
        source: ClientError,
    },
}

/// Settings of a single exporter.
#[derive(Debug, Clone)]
pub struct ExporterConfig {
    pub task_id: i64,
    /// Translate monitoring point names in metric labels.
    pub eng_mp_names: bool,
    /// Fixed delay before the API exposes a new data point.
    pub api_update_delay: Duration,
    /// Fixed interval between API data points.
    pub api_data_time_step: Duration,
}

/// Number of missed API data steps for a sample observed `delta_seconds` after it was taken.
///
/// A sample is expected to show up `update_delay` after its timestamp, so a delta equal
/// to the delay is 0 steps. Deltas are signed: a sample stamped ahead of our clock
/// still yields a non-negative step count.
pub fn staleness_steps(delta_seconds: f64, update_delay: Duration, time_step: Duration) -> u64 {
    if time_step.is_zero() {
        return 0;
    }
    let drift = (delta_seconds - update_delay.as_secs_f64()).abs();
    (drift / time_step.as_secs_f64()).floor() as u64
}

/// Clamp a monitoring point status into {0, 1}.
///
/// Returns the normalized value and whether the raw value was invalid.
pub fn normalize_status(raw: i64) -> (i64, bool) {
    match raw {
        0 | 1 => (raw, false),
        _ => (0, true),
    }
}

/// Label sets touched by one metrics refresh.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RefreshReport {
    /// Monitoring points whose series were written.
    pub published: Vec<SeriesLabels>,
    /// Monitoring points reported without samples; only `mp_data_status` was set.
    pub without_data: Vec<SeriesLabels>,
}

impl RefreshReport {
    /// Every label set whose `mp_data_status` was written.
    pub fn reported(&self) -> impl Iterator<Item = &SeriesLabels> {
        self.published.iter().chain(&self.without_data)
    }
}

/// Collects metrics for a single task.
pub struct Exporter {
    config: ExporterConfig,
    client: Arc<Client>,
    metrics: Arc<Metrics>,
    translator: Arc<Translator>,
    task: TaskInfo,
}

impl Exporter {
    /// Create an exporter for `config.task_id`, resolving it against the task listing.
    pub fn new(
        config: ExporterConfig,
        client: Arc<Client>,
        metrics: Arc<Metrics>,
        translator: Arc<Translator>,
        all_tasks: &[TaskInfo],
    ) -> Result<Self, ExporterError> {
        let task = all_tasks
            .iter()
            .find(|t| t.id == config.task_id)
            .cloned()
            .ok_or(ExporterError::NotFound(config.task_id))?;

        tracing::debug!(task_id = task.id, task_name = %task.service_name, "Exporter instance created");

        Ok(Self {
            config,
            client,
            metrics,
            translator,
            task,
        })
    }

    pub fn task_id(&self) -> i64 {
        self.task.id
    }

    pub fn task_name(&self) -> &str {
        &self.task.service_name
    }

    fn record_api_error(&self, operation: &'static str) {
        self.metrics.record_error(
            ERROR_MODULE_API,
            operation,
            &self.task.id.to_string(),
            &self.task.service_name,
        );
    }

    fn upstream_error(&self, operation: &'static str, source: ClientError) -> ExporterError {
        self.record_api_error(operation);
        ExporterError::Upstream { operation, source }
    }

    /// Fetch the full task listing of the account.
    pub async fn update_all_tasks_info(&self) -> Result<Vec<TaskInfo>, ExporterError> {
        tracing::info!(task_id = self.task.id, "Updating all tasks info...");
        self.client
            .get_all_tasks()
            .await
            .map_err(|e| self.upstream_error("get_all_tasks", e))
    }

    /// Fetch the status log of the task and prepare it for the JSON snapshot.
    pub async fn update_task_stats(&self) -> Result<TaskStatEntry, ExporterError> {
        tracing::info!(task_id = self.task.id, "Updating task stats...");
        self.metrics.record_loop("stats");

        let mut entry = self
            .client
            .get_task_stat(self.task.id)
            .await
            .map_err(|e| self.upstream_error("get_task_stat", e))?;

        self.process_task_stat(&mut entry);
        Ok(entry)
    }

    fn process_task_stat(&self, entry: &mut TaskStatEntry) {
        entry.task_id = self.task.id.to_string();
        entry.task_name = self.task.service_name.clone();
        entry.timestamp = Utc::now();

        for log in &mut entry.task_logs {
            log.traceroute = log.traceroute.replace("\\n", "\n");
            log.mp_name = self.translator.translate(&log.mp_name);
        }
    }

    /// Refresh monitoring point metrics and report the label sets touched.
    pub async fn refresh_metrics(
        &self,
        directory: &MonitoringPointDirectory,
    ) -> Result<RefreshReport, ExporterError> {
        self.refresh_metrics_at(directory, Utc::now()).await
    }

    /// [`Exporter::refresh_metrics`] with an explicit refresh start time.
    pub async fn refresh_metrics_at(
        &self,
        directory: &MonitoringPointDirectory,
        refresh_start: DateTime<Utc>,
    ) -> Result<RefreshReport, ExporterError> {
        let started = Instant::now();
        tracing::info!(task_id = self.task.id, "Refreshing metrics...");
        self.metrics.record_loop("metrics");

        let result = self.refresh_entries(directory, refresh_start).await;

        let duration = started.elapsed().as_secs_f64();
        self.metrics
            .set_refresh_duration(&self.task.id.to_string(), &self.task.service_name, duration);
        tracing::info!(task_id = self.task.id, duration_s = duration, "Refresh finished");

        result
    }

    async fn refresh_entries(
        &self,
        directory: &MonitoringPointDirectory,
        refresh_start: DateTime<Utc>,
    ) -> Result<RefreshReport, ExporterError> {
        let entries = self
            .client
            .get_task_graph_stat(self.task.id)
            .await
            .map_err(|e| self.upstream_error("get_task_graph_stat", e))?;

        if entries.is_empty() {
            self.record_api_error("get_task_graph_stat");
            tracing::error!(task_id = self.task.id, "No MP data from API");
        } else {
            tracing::debug!(task_id = self.task.id, count = entries.len(), "Received data items from API");
        }

        let mut report = RefreshReport::default();
        for entry in &entries {
            let status = self.resolve_status(entry, directory);
            let labels = self.build_labels(entry, directory);
            if self.process_entry(entry, &labels, status, refresh_start) {
                report.published.push(labels);
            } else {
                report.without_data.push(labels);
            }
        }
        Ok(report)
    }

    /// Look up the availability of the entry's monitoring point.
    ///
    /// Points missing from the directory count as unavailable.
    fn resolve_status(&self, entry: &MonitoringPointEntry, directory: &MonitoringPointDirectory) -> i64 {
        let raw = directory.get(&entry.id).map(|mp| mp.status).unwrap_or(0);
        let (status, invalid) = normalize_status(raw);
        if invalid {
            tracing::error!(
                task_id = self.task.id,
                mp_id = %entry.id,
                mp_name = %entry.name,
                status = raw,
                "Incorrect monitoring point status"
            );
        }
        status
    }

    fn build_labels(&self, entry: &MonitoringPointEntry, directory: &MonitoringPointDirectory) -> SeriesLabels {
        let mp_name = if self.config.eng_mp_names {
            self.translator.translate(&entry.name)
        } else {
            entry.name.clone()
        };

        let (mp_ip, mp_gps) = match directory.get(&entry.id) {
            Some(mp) => (non_empty_or_unknown(&mp.ip), non_empty_or_unknown(&mp.gps)),
            None => ("unknown".to_string(), "unknown".to_string()),
        };

        SeriesLabels {
            task_id: self.task.id.to_string(),
            task_name: self.task.service_name.clone(),
            mp_id: entry.id.clone(),
            mp_name,
            mp_ip,
            mp_gps,
        }
    }

    /// Publish the samples of one monitoring point; returns whether it carried any.
    fn process_entry(
        &self,
        entry: &MonitoringPointEntry,
        labels: &SeriesLabels,
        status: i64,
        refresh_start: DateTime<Utc>,
    ) -> bool {
        if entry.results.is_empty() {
            self.metrics.set_data_status(labels, false);
            tracing::warn!(task_id = self.task.id, mp_id = %entry.id, mp_name = %entry.name, "No results found for MP");
            return false;
        }

        // Usually a single sample per entry; later samples overwrite earlier ones.
        for result in &entry.results {
            self.update_metrics(result, labels, status, refresh_start);
        }
        self.metrics.set_data_status(labels, true);
        true
    }

    fn update_metrics(
        &self,
        result: &ConnectionResult,
        labels: &SeriesLabels,
        status: i64,
        refresh_start: DateTime<Utc>,
    ) {
        if status == 0 {
            tracing::warn!(mp_id = %labels.mp_id, mp_name = %labels.mp_name, "Monitoring point is unavailable");
            self.metrics.mark_down(labels);
            return;
        }

        let sampled_at = Utc
            .timestamp_opt(result.timestamp, 0)
            .single()
            .unwrap_or(DateTime::UNIX_EPOCH);
        let delta = refresh_start.signed_duration_since(sampled_at);
        let delta_seconds = delta.num_milliseconds() as f64 / 1000.0;

        let too_old = delta
            .to_std()
            .map(|d| d >= MAX_SAMPLE_AGE)
            .unwrap_or(false);
        if too_old {
            tracing::warn!(mp_id = %labels.mp_id, mp_name = %labels.mp_name, "Data for MP is older than 24 hours");
            self.metrics.mark_down(labels);
            return;
        }

        let steps = staleness_steps(
            delta_seconds,
            self.config.api_update_delay,
            self.config.api_data_time_step,
        );

        self.metrics.publish(
            labels,
            &MpObservation {
                connect_seconds: result.connect,
                dns_lookup_seconds: result.dns,
                server_processing_seconds: result.server,
                total_duration_seconds: result.total,
                speed_bytes_per_second: result.speed as f64,
                last_success_timestamp_seconds: result.timestamp as f64,
                last_success_delta_seconds: delta_seconds,
                staleness_steps: steps,
            },
        );

        tracing::debug!(
            mp_id = %labels.mp_id,
            mp_name = %labels.mp_name,
            delta_s = delta_seconds,
            steps,
            "Metrics updated for MP"
        );
    }
}

fn non_empty_or_unknown(value: &str) -> String {
    if value.is_empty() {
        "unknown".to_string()
    } else {
        value.to_string()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::testing::*;
    use super::*;
    use crate::client::tests::{test_client, FakeUpstream};
    use crate::client::MonitoringPointInfo;
    use axum::http::StatusCode;
    use chrono::Duration as ChronoDuration;
    use serde_json::{json, Value};
    use std::collections::HashMap;

    pub(crate) const T: i64 = 1_700_000_000;

    pub(crate) fn task(id: i64, name: &str) -> TaskInfo {
        TaskInfo {
            enabled_status: 1,
            id,
            service_name: name.to_string(),
            url: format!("{}.example.com", name),
            task_status: 1,
            black_list_status: 0,
            virus_status: 0,
            last_check: String::new(),
            timestamp: Utc::now(),
        }
    }

    pub(crate) fn mp(id: &str, name: &str, status: i64) -> MonitoringPointInfo {
        MonitoringPointInfo {
            id: id.to_string(),
            name: name.to_string(),
            ip: "10.0.0.1".to_string(),
            gps: "55.75,37.61".to_string(),
            status,
        }
    }

    pub(crate) fn sample(mp_id: &str, mp_name: &str, connect: &str, stamp: i64) -> Value {
        json!({"tm_id": mp_id, "tm_name": mp_name, "tm_res": [{
            "connect": connect, "dns": "0.02", "server": "0.3", "total": "0.5",
            "speed": "4096", "tmstamp": stamp.to_string()
        }]})
    }

    pub(crate) fn exporter_config(task_id: i64) -> ExporterConfig {
        ExporterConfig {
            task_id,
            eng_mp_names: true,
            api_update_delay: Duration::from_secs(240),
            api_data_time_step: Duration::from_secs(180),
        }
    }

    pub(crate) fn build_exporter(
        endpoint: &str,
        metrics: Arc<Metrics>,
        task_id: i64,
        translator: Translator,
    ) -> Exporter {
        Exporter::new(
            exporter_config(task_id),
            Arc::new(test_client(endpoint, 1)),
            metrics,
            Arc::new(translator),
            &[task(task_id, "shop"), task(999, "other")],
        )
        .unwrap()
    }

    fn mp_labels(mp_id: &str) -> Vec<(&str, &str)> {
        vec![("task_id", "123"), ("mp_id", mp_id)]
    }

    fn at(offset_seconds: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(T, 0).unwrap() + ChronoDuration::seconds(offset_seconds)
    }

    #[test]
    fn test_staleness_steps() {
        let delay = Duration::from_secs(240);
        let step = Duration::from_secs(180);
        assert_eq!(staleness_steps(240.0, delay, step), 0);
        assert_eq!(staleness_steps(419.0, delay, step), 0);
        assert_eq!(staleness_steps(420.0, delay, step), 1);
        assert_eq!(staleness_steps(780.0, delay, step), 3);
        // Earlier than expected still counts as drift.
        assert_eq!(staleness_steps(0.0, delay, step), 1);
        assert_eq!(staleness_steps(-300.0, delay, step), 3);
        assert_eq!(staleness_steps(100.0, delay, Duration::ZERO), 0);
    }

    #[test]
    fn test_normalize_status() {
        assert_eq!(normalize_status(0), (0, false));
        assert_eq!(normalize_status(1), (1, false));
        assert_eq!(normalize_status(2), (0, true));
        assert_eq!(normalize_status(-1), (0, true));
    }

    #[test]
    fn test_new_rejects_unknown_task() {
        let client = Arc::new(test_client("http://127.0.0.1:1", 1));
        let result = Exporter::new(
            exporter_config(5),
            client,
            Arc::new(Metrics::new().unwrap()),
            Arc::new(Translator::passthrough()),
            &[task(123, "shop")],
        );
        assert!(matches!(result, Err(ExporterError::NotFound(5))));
    }

    #[tokio::test]
    async fn test_fresh_sample_is_published() {
        let fake = FakeUpstream::default();
        fake.respond("task_graph_stat", StatusCode::OK, json!([sample("7", "msk", "0.1", T)]));
        let metrics = Arc::new(Metrics::new().unwrap());
        let translator = Translator::from_map(HashMap::from([("msk".to_string(), "Moscow".to_string())]));
        let exporter = build_exporter(&fake.serve().await, metrics.clone(), 123, translator);
        let directory: MonitoringPointDirectory = [mp("7", "msk", 1)].into_iter().collect();

        let published = exporter.refresh_metrics_at(&directory, at(240)).await.unwrap().published;

        assert_eq!(published.len(), 1);
        assert_eq!(published[0].mp_name, "Moscow");
        assert_eq!(published[0].mp_ip, "10.0.0.1");
        let labels = mp_labels("7");
        assert_eq!(sample_value(&metrics.mp_connect_seconds, &labels), Some(0.1));
        assert_eq!(sample_value(&metrics.mp_status, &labels), Some(1.0));
        assert_eq!(sample_value(&metrics.mp_data_staleness_steps, &labels), Some(0.0));
        assert_eq!(sample_value(&metrics.mp_last_success_delta_seconds, &labels), Some(240.0));
        assert_eq!(sample_value(&metrics.mp_speed_bytes_per_second, &labels), Some(4096.0));
        assert_eq!(sample_value(&metrics.mp_data_status, &labels), Some(1.0));
        assert_eq!(
            sample_value(&metrics.loops_total, &[("exporter_type", "metrics")]),
            Some(1.0)
        );
    }

    #[tokio::test]
    async fn test_day_old_sample_removes_series() {
        let fake = FakeUpstream::default();
        fake.respond("task_graph_stat", StatusCode::OK, json!([sample("7", "msk", "0.1", T)]));
        let metrics = Arc::new(Metrics::new().unwrap());
        let exporter = build_exporter(&fake.serve().await, metrics.clone(), 123, Translator::passthrough());
        let directory: MonitoringPointDirectory = [mp("7", "msk", 1)].into_iter().collect();

        exporter.refresh_metrics_at(&directory, at(240)).await.unwrap();
        let published = exporter
            .refresh_metrics_at(&directory, at(25 * 3600))
            .await
            .unwrap()
            .published;

        assert_eq!(published.len(), 1);
        let labels = mp_labels("7");
        assert_eq!(sample_value(&metrics.mp_status, &labels), Some(0.0));
        assert_eq!(sample_value(&metrics.mp_connect_seconds, &labels), None);
        assert_eq!(sample_value(&metrics.mp_data_staleness_steps, &labels), None);
        assert_eq!(sample_value(&metrics.mp_last_success_timestamp_seconds, &labels), None);
    }

    #[tokio::test]
    async fn test_sample_exactly_one_day_old_is_marked_down() {
        let fake = FakeUpstream::default();
        fake.respond("task_graph_stat", StatusCode::OK, json!([sample("7", "msk", "0.1", T)]));
        let metrics = Arc::new(Metrics::new().unwrap());
        let exporter = build_exporter(&fake.serve().await, metrics.clone(), 123, Translator::passthrough());
        let directory: MonitoringPointDirectory = [mp("7", "msk", 1)].into_iter().collect();

        exporter.refresh_metrics_at(&directory, at(24 * 3600 - 1)).await.unwrap();
        let labels = mp_labels("7");
        assert_eq!(sample_value(&metrics.mp_status, &labels), Some(1.0));

        exporter.refresh_metrics_at(&directory, at(24 * 3600)).await.unwrap();
        assert_eq!(sample_value(&metrics.mp_status, &labels), Some(0.0));
        assert_eq!(sample_value(&metrics.mp_connect_seconds, &labels), None);
    }

    #[tokio::test]
    async fn test_unavailable_point_is_marked_down() {
        let fake = FakeUpstream::default();
        fake.respond("task_graph_stat", StatusCode::OK, json!([sample("7", "msk", "0.1", T)]));
        let metrics = Arc::new(Metrics::new().unwrap());
        let exporter = build_exporter(&fake.serve().await, metrics.clone(), 123, Translator::passthrough());
        let directory: MonitoringPointDirectory = [mp("7", "msk", 0)].into_iter().collect();

        exporter.refresh_metrics_at(&directory, at(240)).await.unwrap();

        let labels = mp_labels("7");
        assert_eq!(sample_value(&metrics.mp_status, &labels), Some(0.0));
        assert_eq!(series_count(&metrics.mp_connect_seconds), 0);
    }

    #[tokio::test]
    async fn test_invalid_status_is_normalized_to_zero() {
        let fake = FakeUpstream::default();
        fake.respond(
            "task_graph_stat",
            StatusCode::OK,
            json!([sample("7", "msk", "0.1", T), sample("8", "spb", "0.2", T)]),
        );
        let metrics = Arc::new(Metrics::new().unwrap());
        let exporter = build_exporter(&fake.serve().await, metrics.clone(), 123, Translator::passthrough());
        // "8" is missing from the directory and counts as unavailable too.
        let directory: MonitoringPointDirectory = [mp("7", "msk", 5)].into_iter().collect();

        exporter.refresh_metrics_at(&directory, at(240)).await.unwrap();

        assert_eq!(sample_value(&metrics.mp_status, &mp_labels("7")), Some(0.0));
        assert_eq!(sample_value(&metrics.mp_status, &mp_labels("8")), Some(0.0));
        let text = metrics.encode().unwrap();
        assert!(!text
            .lines()
            .any(|line| line.starts_with("ping_admin_mp_status{") && line.ends_with(" 5")));
        assert_eq!(series_count(&metrics.mp_connect_seconds), 0);
    }

    #[tokio::test]
    async fn test_entry_without_samples_reports_absent_data() {
        let fake = FakeUpstream::default();
        fake.respond(
            "task_graph_stat",
            StatusCode::OK,
            json!([{"tm_id": "7", "tm_name": "msk", "tm_res": []}]),
        );
        let metrics = Arc::new(Metrics::new().unwrap());
        let exporter = build_exporter(&fake.serve().await, metrics.clone(), 123, Translator::passthrough());
        let directory: MonitoringPointDirectory = [mp("7", "msk", 1)].into_iter().collect();

        let report = exporter.refresh_metrics_at(&directory, at(240)).await.unwrap();

        assert!(report.published.is_empty());
        assert_eq!(report.without_data.len(), 1);
        assert_eq!(report.without_data[0].mp_id, "7");
        assert_eq!(report.reported().count(), 1);
        assert_eq!(sample_value(&metrics.mp_data_status, &mp_labels("7")), Some(0.0));
        assert_eq!(series_count(&metrics.mp_status), 0);
    }

    #[tokio::test]
    async fn test_empty_graph_stat_counts_error_but_succeeds() {
        let fake = FakeUpstream::default();
        fake.respond("task_graph_stat", StatusCode::OK, json!([]));
        let metrics = Arc::new(Metrics::new().unwrap());
        let exporter = build_exporter(&fake.serve().await, metrics.clone(), 123, Translator::passthrough());

        let report = exporter
            .refresh_metrics_at(&MonitoringPointDirectory::default(), at(240))
            .await
            .unwrap();

        assert_eq!(report, RefreshReport::default());
        assert_eq!(
            sample_value(&metrics.errors_total, &[("error_type", "get_task_graph_stat")]),
            Some(1.0)
        );
    }

    #[tokio::test]
    async fn test_upstream_failure_is_counted_and_returned() {
        let fake = FakeUpstream::default();
        fake.respond("task_graph_stat", StatusCode::BAD_GATEWAY, json!([]));
        let metrics = Arc::new(Metrics::new().unwrap());
        let exporter = build_exporter(&fake.serve().await, metrics.clone(), 123, Translator::passthrough());

        let err = exporter
            .refresh_metrics(&MonitoringPointDirectory::default())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ExporterError::Upstream { operation: "get_task_graph_stat", .. }
        ));
        assert_eq!(
            sample_value(
                &metrics.errors_total,
                &[("error_module", "api_client"), ("task_id", "123"), ("task_name", "shop")]
            ),
            Some(1.0)
        );
        assert!(sample_value(&metrics.refresh_duration_seconds, &[("task_id", "123")]).is_some());
    }

    #[tokio::test]
    async fn test_task_stats_are_normalized() {
        let fake = FakeUpstream::default();
        fake.respond(
            "task_stat",
            StatusCode::OK,
            json!([{"tasks_logs": [{
                "data": "2024-01-01 10:00:00", "descr": "Timeout", "status": 0,
                "tm": "msk", "tm_id": "7", "traceroute": "1 hop\\n2 hop"
            }]}]),
        );
        let metrics = Arc::new(Metrics::new().unwrap());
        let translator = Translator::from_map(HashMap::from([("msk".to_string(), "Moscow".to_string())]));
        let exporter = build_exporter(&fake.serve().await, metrics, 123, translator);

        let entry = exporter.update_task_stats().await.unwrap();

        assert_eq!(entry.task_id, "123");
        assert_eq!(entry.task_name, "shop");
        assert_eq!(entry.task_logs[0].traceroute, "1 hop\n2 hop");
        assert_eq!(entry.task_logs[0].mp_name, "Moscow");
        assert_eq!(entry.task_logs[0].mp_id, "7");
    }
}
