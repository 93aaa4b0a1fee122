//! Prometheus metrics owned by the exporter.
//!
//! The registry is a plain value constructed at startup and shared through `Arc`:
//! schedulers write to it, the HTTP layer only encodes it.

use prometheus::{Encoder, Gauge, GaugeVec, IntCounterVec, Opts, Registry, TextEncoder};

use super::labels::*;
use crate::version;

const NAMESPACE: &str = "ping_admin";
const SUBSYSTEM_EXPORTER: &str = "exporter";
const SUBSYSTEM_MP: &str = "mp";

/// Values published for one fresh connection sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MpObservation {
    pub connect_seconds: f64,
    pub dns_lookup_seconds: f64,
    pub server_processing_seconds: f64,
    pub total_duration_seconds: f64,
    pub speed_bytes_per_second: f64,
    pub last_success_timestamp_seconds: f64,
    pub last_success_delta_seconds: f64,
    pub staleness_steps: u64,
}

/// All metrics exposed on `/metrics`.
///
/// `service_info` and the `exporter` subsystem describe APATIT itself, the `mp`
/// subsystem describes monitoring points.
pub struct Metrics {
    registry: Registry,

    pub service_info: Gauge,
    pub refresh_interval_seconds: Gauge,
    pub max_allowed_staleness_steps: Gauge,
    pub refresh_duration_seconds: GaugeVec,
    pub loops_total: IntCounterVec,
    pub errors_total: IntCounterVec,

    pub mp_data_status: GaugeVec,
    pub mp_status: GaugeVec,
    pub mp_connect_seconds: GaugeVec,
    pub mp_dns_lookup_seconds: GaugeVec,
    pub mp_server_processing_seconds: GaugeVec,
    pub mp_total_duration_seconds: GaugeVec,
    pub mp_speed_bytes_per_second: GaugeVec,
    pub mp_last_success_timestamp_seconds: GaugeVec,
    pub mp_last_success_delta_seconds: GaugeVec,
    pub mp_data_staleness_steps: GaugeVec,
}

fn exporter_opts(name: &str, help: &str) -> Opts {
    Opts::new(name, help)
        .namespace(NAMESPACE)
        .subsystem(SUBSYSTEM_EXPORTER)
}

fn mp_gauge(name: &str, help: &str) -> prometheus::Result<GaugeVec> {
    GaugeVec::new(
        Opts::new(name, help).namespace(NAMESPACE).subsystem(SUBSYSTEM_MP),
        &MP_LABELS,
    )
}

impl Metrics {
    /// Create every metric and register it in a fresh registry.
    pub fn new() -> prometheus::Result<Self> {
        let service_info = Gauge::with_opts(
            Opts::new("service_info", "Information about the APATIT service.")
                .namespace("apatit")
                .const_label("language", version::LANGUAGE)
                .const_label("name", version::NAME)
                .const_label("owner", version::OWNER)
                .const_label("version", version::VERSION),
        )?;

        let metrics = Self {
            registry: Registry::new(),
            service_info,
            refresh_interval_seconds: Gauge::with_opts(exporter_opts(
                "refresh_interval_seconds",
                "The configured interval for refreshing metrics.",
            ))?,
            max_allowed_staleness_steps: Gauge::with_opts(exporter_opts(
                "max_allowed_staleness_steps",
                "Configured staleness threshold in steps. If `ping_admin_mp_data_staleness_steps` \
                 exceeds this value the MP is considered potentially unavailable.",
            ))?,
            refresh_duration_seconds: GaugeVec::new(
                exporter_opts(
                    "refresh_duration_seconds",
                    "The duration of the last metrics refresh cycle for a specific task.",
                ),
                &[LABEL_TASK_ID, LABEL_TASK_NAME],
            )?,
            loops_total: IntCounterVec::new(
                exporter_opts("loops_total", "Total number of refresh loops started."),
                &[LABEL_EXPORTER_TYPE],
            )?,
            errors_total: IntCounterVec::new(
                exporter_opts(
                    "errors_total",
                    "Total number of errors during refresh for a specific task.",
                ),
                &[LABEL_ERROR_MODULE, LABEL_ERROR_TYPE, LABEL_TASK_ID, LABEL_TASK_NAME],
            )?,
            mp_data_status: GaugeVec::new(
                Opts::new(
                    "data_status",
                    "Whether the API returned data for the MP in the last refresh (1 = data, 0 = no data).",
                )
                .namespace(NAMESPACE)
                .subsystem(SUBSYSTEM_MP),
                &MP_DATA_LABELS,
            )?,
            mp_status: mp_gauge(
                "status",
                "Status of the monitoring point (1 = up/processed, 0 = stale/down).",
            )?,
            mp_connect_seconds: mp_gauge("connect_seconds", "Time spent establishing a connection.")?,
            mp_dns_lookup_seconds: mp_gauge("dns_lookup_seconds", "Time spent on DNS lookup.")?,
            mp_server_processing_seconds: mp_gauge(
                "server_processing_seconds",
                "Time the server spent processing the request.",
            )?,
            mp_total_duration_seconds: mp_gauge("total_duration_seconds", "Total request time.")?,
            mp_speed_bytes_per_second: mp_gauge(
                "speed_bytes_per_second",
                "Download speed in bytes per second.",
            )?,
            mp_last_success_timestamp_seconds: mp_gauge(
                "last_success_timestamp_seconds",
                "Timestamp of the last successful data point from the API.",
            )?,
            mp_last_success_delta_seconds: mp_gauge(
                "last_success_delta_seconds",
                "Time since the last successful data point was received.",
            )?,
            mp_data_staleness_steps: mp_gauge(
                "data_staleness_steps",
                "How many API data steps have been missed for this MP. 0 means the data is fresh.",
            )?,
        };

        metrics.register_all()?;
        Ok(metrics)
    }

    fn register_all(&self) -> prometheus::Result<()> {
        let r = &self.registry;
        r.register(Box::new(self.service_info.clone()))?;
        r.register(Box::new(self.refresh_interval_seconds.clone()))?;
        r.register(Box::new(self.max_allowed_staleness_steps.clone()))?;
        r.register(Box::new(self.refresh_duration_seconds.clone()))?;
        r.register(Box::new(self.loops_total.clone()))?;
        r.register(Box::new(self.errors_total.clone()))?;
        r.register(Box::new(self.mp_data_status.clone()))?;
        for vec in self.mp_series() {
            r.register(Box::new(vec.clone()))?;
        }
        Ok(())
    }

    /// Gauges deleted together when a monitoring point series is retired.
    fn mp_series(&self) -> [&GaugeVec; 9] {
        [
            &self.mp_status,
            &self.mp_connect_seconds,
            &self.mp_dns_lookup_seconds,
            &self.mp_server_processing_seconds,
            &self.mp_total_duration_seconds,
            &self.mp_speed_bytes_per_second,
            &self.mp_last_success_timestamp_seconds,
            &self.mp_last_success_delta_seconds,
            &self.mp_data_staleness_steps,
        ]
    }

    /// Render the registry in the Prometheus text exposition format.
    pub fn encode(&self) -> prometheus::Result<String> {
        let mut buffer = Vec::with_capacity(16 * 1024);
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }

    /// Publish the settings a cycle runs with.
    pub fn set_cycle_settings(&self, refresh_interval_seconds: f64, max_staleness_steps: u32) {
        self.refresh_interval_seconds.set(refresh_interval_seconds);
        self.max_allowed_staleness_steps
            .set(f64::from(max_staleness_steps));
    }

    pub fn record_loop(&self, exporter_type: &str) {
        self.loops_total.with_label_values(&[exporter_type]).inc();
    }

    pub fn record_error(&self, module: &str, error_type: &str, task_id: &str, task_name: &str) {
        self.errors_total
            .with_label_values(&[module, error_type, task_id, task_name])
            .inc();
    }

    pub fn set_refresh_duration(&self, task_id: &str, task_name: &str, seconds: f64) {
        self.refresh_duration_seconds
            .with_label_values(&[task_id, task_name])
            .set(seconds);
    }

    /// Mark whether the API returned samples for a monitoring point.
    pub fn set_data_status(&self, labels: &SeriesLabels, has_data: bool) {
        self.mp_data_status
            .with_label_values(&labels.data_values())
            .set(if has_data { 1.0 } else { 0.0 });
    }

    /// Publish a fresh sample and mark the monitoring point as up.
    pub fn publish(&self, labels: &SeriesLabels, obs: &MpObservation) {
        let values = labels.values();
        self.mp_connect_seconds
            .with_label_values(&values)
            .set(obs.connect_seconds);
        self.mp_dns_lookup_seconds
            .with_label_values(&values)
            .set(obs.dns_lookup_seconds);
        self.mp_server_processing_seconds
            .with_label_values(&values)
            .set(obs.server_processing_seconds);
        self.mp_total_duration_seconds
            .with_label_values(&values)
            .set(obs.total_duration_seconds);
        self.mp_speed_bytes_per_second
            .with_label_values(&values)
            .set(obs.speed_bytes_per_second);
        self.mp_last_success_timestamp_seconds
            .with_label_values(&values)
            .set(obs.last_success_timestamp_seconds);
        self.mp_last_success_delta_seconds
            .with_label_values(&values)
            .set(obs.last_success_delta_seconds);
        self.mp_data_staleness_steps
            .with_label_values(&values)
            .set(obs.staleness_steps as f64);
        self.mp_status.with_label_values(&values).set(1.0);
    }

    /// Drop every series of a monitoring point, then report it as down.
    pub fn mark_down(&self, labels: &SeriesLabels) {
        self.delete_series(labels);
        self.mp_status.with_label_values(&labels.values()).set(0.0);
    }

    /// Delete all monitoring point series carrying exactly these labels.
    pub fn delete_series(&self, labels: &SeriesLabels) {
        let values = labels.values();
        for vec in self.mp_series() {
            // Absent series are fine: nothing to delete.
            let _ = vec.remove_label_values(&values);
        }
    }

    /// Delete the data presence series of a monitoring point.
    pub fn delete_data_status(&self, labels: &SeriesLabels) {
        let _ = self.mp_data_status.remove_label_values(&labels.data_values());
    }
}
