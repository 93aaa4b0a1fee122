//! Ping-Admin API payloads.
//!
//! `*Raw` types mirror the JSON the API returns. They are converted into the processed
//! types the exporter works with. Records are decoded all-or-nothing, but numeric
//! sub-fields that arrive as strings go through [`parse_or_zero`] and fall back to zero.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;

// ============================================================================
// Best-effort numeric fields
// ============================================================================

/// A numeric field that could not be parsed and was replaced by zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldWarning {
    pub field: &'static str,
    pub value: String,
}

/// Parse an optional string field, falling back to the zero value.
///
/// Missing or empty input is not a warning; unparsable input is.
pub fn parse_or_zero<T>(raw: Option<&str>, field: &'static str) -> (T, Option<FieldWarning>)
where
    T: FromStr + Default,
{
    match raw.map(str::trim) {
        None | Some("") => (T::default(), None),
        Some(value) => match value.parse::<T>() {
            Ok(parsed) => (parsed, None),
            Err(_) => (
                T::default(),
                Some(FieldWarning {
                    field,
                    value: value.to_string(),
                }),
            ),
        },
    }
}

/// [`parse_or_zero`] that logs the fallback.
fn decode_field<T>(raw: Option<&str>, field: &'static str) -> T
where
    T: FromStr + Default,
{
    let (value, warning) = parse_or_zero(raw, field);
    if let Some(w) = warning {
        tracing::warn!(field = w.field, value = %w.value, "Failed to parse numeric value, using zero");
    }
    value
}

// ============================================================================
// Raw API structures
// ============================================================================

/// One element of the `sa=task_graph_stat` response.
#[derive(Debug, Clone, Deserialize)]
pub struct EntryRaw {
    pub tm_id: String,
    pub tm_name: String,
    #[serde(default)]
    pub tm_res: Vec<TmResRaw>,
}

/// A connection sample inside [`EntryRaw`]. Every field is a string on the wire.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TmResRaw {
    pub connect: Option<String>,
    pub dns: Option<String>,
    pub server: Option<String>,
    pub tmstamp: Option<String>,
    pub speed: Option<String>,
    pub total: Option<String>,
}

/// One element of the `sa=tasks` response.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TaskRaw {
    /// Console status (enabled/disabled).
    pub status: i64,
    pub tid: i64,
    /// Service name.
    pub nazv: String,
    /// IP or DNS name of the service.
    pub name: String,
    pub log_status: i64,
    pub rk_log_status: i64,
    pub sb_log_status: i64,
    pub last_data: String,
}

/// One element of the `sa=tm` response.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MonitoringPointRaw {
    pub id: String,
    pub name: String,
    pub ip: String,
    pub gps: String,
    pub status: String,
}

/// One element of the `sa=task_stat` response.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskStatRaw {
    #[serde(default)]
    pub tasks_logs: Vec<TaskLogRaw>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskLogRaw {
    pub data: Option<String>,
    pub descr: Option<String>,
    pub status: Option<i64>,
    pub tm: Option<String>,
    pub tm_id: Option<String>,
    pub traceroute: Option<String>,
}

// ============================================================================
// Processed structures
// ============================================================================

/// A task from the account listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct TaskInfo {
    pub enabled_status: i64,
    #[serde(rename = "ID")]
    pub id: i64,
    pub service_name: String,
    #[serde(rename = "URL")]
    pub url: String,
    pub task_status: i64,
    pub black_list_status: i64,
    pub virus_status: i64,
    pub last_check: String,
    pub timestamp: DateTime<Utc>,
}

impl From<TaskRaw> for TaskInfo {
    fn from(raw: TaskRaw) -> Self {
        Self {
            enabled_status: raw.status,
            id: raw.tid,
            service_name: raw.nazv,
            url: raw.name,
            task_status: raw.log_status,
            black_list_status: raw.rk_log_status,
            virus_status: raw.sb_log_status,
            last_check: raw.last_data,
            timestamp: Utc::now(),
        }
    }
}

/// A monitoring point (probe agent).
#[derive(Debug, Clone, PartialEq)]
pub struct MonitoringPointInfo {
    pub id: String,
    pub name: String,
    pub ip: String,
    pub gps: String,
    /// Availability as reported; not yet validated against {0, 1}.
    pub status: i64,
}

impl From<MonitoringPointRaw> for MonitoringPointInfo {
    fn from(raw: MonitoringPointRaw) -> Self {
        let status = decode_field(Some(&raw.status), "status");
        Self {
            id: raw.id,
            name: raw.name,
            ip: raw.ip,
            gps: raw.gps,
            status,
        }
    }
}

/// Monitoring points indexed by ID, fetched once per cycle and shared read-only.
#[derive(Debug, Clone, Default)]
pub struct MonitoringPointDirectory {
    points: HashMap<String, MonitoringPointInfo>,
}

impl MonitoringPointDirectory {
    pub fn get(&self, id: &str) -> Option<&MonitoringPointInfo> {
        self.points.get(id)
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

impl FromIterator<MonitoringPointInfo> for MonitoringPointDirectory {
    fn from_iter<I: IntoIterator<Item = MonitoringPointInfo>>(iter: I) -> Self {
        Self {
            points: iter.into_iter().map(|mp| (mp.id.clone(), mp)).collect(),
        }
    }
}

/// Graph stats of one task as seen by one monitoring point.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitoringPointEntry {
    pub id: String,
    pub name: String,
    pub results: Vec<ConnectionResult>,
}

/// One timestamped connection sample.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ConnectionResult {
    pub connect: f64,
    pub dns: f64,
    pub server: f64,
    pub total: f64,
    pub speed: i64,
    /// Unix epoch seconds.
    pub timestamp: i64,
}

impl From<EntryRaw> for MonitoringPointEntry {
    fn from(raw: EntryRaw) -> Self {
        let results = raw
            .tm_res
            .iter()
            .map(|res| ConnectionResult {
                connect: decode_field(res.connect.as_deref(), "connect"),
                dns: decode_field(res.dns.as_deref(), "dns"),
                server: decode_field(res.server.as_deref(), "server"),
                total: decode_field(res.total.as_deref(), "total"),
                speed: decode_field(res.speed.as_deref(), "speed"),
                timestamp: decode_field(res.tmstamp.as_deref(), "timestamp"),
            })
            .collect();

        Self {
            id: raw.tm_id,
            name: raw.tm_name,
            results,
        }
    }
}

/// Recent event log of one task, as published on `/stats?type=task`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct TaskStatEntry {
    #[serde(rename = "TaskID")]
    pub task_id: String,
    pub task_name: String,
    pub timestamp: DateTime<Utc>,
    pub task_logs: Vec<TaskLog>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct TaskLog {
    pub data: String,
    pub description: String,
    pub status: i64,
    #[serde(rename = "MPName")]
    pub mp_name: String,
    #[serde(rename = "MPID")]
    pub mp_id: String,
    pub traceroute: String,
}

impl From<TaskStatRaw> for TaskStatEntry {
    fn from(raw: TaskStatRaw) -> Self {
        let task_logs = raw
            .tasks_logs
            .into_iter()
            .map(|log| TaskLog {
                data: log.data.unwrap_or_default(),
                description: log.descr.unwrap_or_default(),
                status: log.status.unwrap_or_default(),
                mp_name: log.tm.unwrap_or_default(),
                mp_id: log.tm_id.unwrap_or_default(),
                traceroute: log.traceroute.unwrap_or_default(),
            })
            .collect();

        Self {
            task_id: String::new(),
            task_name: String::new(),
            timestamp: Utc::now(),
            task_logs,
        }
    }
}
