//! Prometheus label names and the per-series label set.
//!
//! A task is a monitoring job in Ping-Admin; an MP (monitoring point) is a probe agent
//! that checks the task.

pub const LABEL_ERROR_MODULE: &str = "error_module";
pub const LABEL_ERROR_TYPE: &str = "error_type";
pub const LABEL_EXPORTER_TYPE: &str = "exporter_type";
pub const LABEL_TASK_ID: &str = "task_id";
pub const LABEL_TASK_NAME: &str = "task_name";
pub const LABEL_MP_ID: &str = "mp_id";
pub const LABEL_MP_NAME: &str = "mp_name";
pub const LABEL_MP_IP: &str = "mp_ip";
pub const LABEL_MP_GPS: &str = "mp_gps";

/// Label names shared by every monitoring point series, in value order.
pub const MP_LABELS: [&str; 6] = [
    LABEL_TASK_ID,
    LABEL_TASK_NAME,
    LABEL_MP_ID,
    LABEL_MP_NAME,
    LABEL_MP_IP,
    LABEL_MP_GPS,
];

/// Label names of the per-MP data presence indicator.
pub const MP_DATA_LABELS: [&str; 4] = [LABEL_TASK_ID, LABEL_TASK_NAME, LABEL_MP_ID, LABEL_MP_NAME];

/// Identity of a monitoring point series across cycles.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SeriesKey {
    pub task_id: String,
    pub mp_id: String,
}

impl std::fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.task_id, self.mp_id)
    }
}

/// Full label set of one monitoring point series.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SeriesLabels {
    pub task_id: String,
    pub task_name: String,
    pub mp_id: String,
    pub mp_name: String,
    pub mp_ip: String,
    pub mp_gps: String,
}

impl SeriesLabels {
    pub fn key(&self) -> SeriesKey {
        SeriesKey {
            task_id: self.task_id.clone(),
            mp_id: self.mp_id.clone(),
        }
    }

    /// Values in [`MP_LABELS`] order.
    pub fn values(&self) -> [&str; 6] {
        [
            &self.task_id,
            &self.task_name,
            &self.mp_id,
            &self.mp_name,
            &self.mp_ip,
            &self.mp_gps,
        ]
    }

    /// Values in [`MP_DATA_LABELS`] order.
    pub fn data_values(&self) -> [&str; 4] {
        [&self.task_id, &self.task_name, &self.mp_id, &self.mp_name]
    }
}
