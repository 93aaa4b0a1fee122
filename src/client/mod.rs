//! Ping-Admin API client.
//!
//! Every request is rate limited, optionally jittered, and retried a bounded number of
//! times. The API key travels in the query string, so anything logged or returned as an
//! error goes through [`mask_api_key`] first.

mod models;
mod rate_limit;

pub use models::*;
pub use rate_limit::*;

use serde::de::DeserializeOwned;
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;

use rand::Rng;
use regex::Regex;
use reqwest::Url;

use crate::version;

/// Per-request timeout on the underlying HTTP client.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Client error types.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("unexpected status code: {0}")]
    Status(u16),
    #[error("failed to decode response: {0}")]
    Decode(String),
    #[error("no data: {0}")]
    NoData(String),
    #[error("invalid endpoint: {0}")]
    Endpoint(String),
    #[error("upstream unavailable after {attempts} attempts: {last}")]
    Unavailable {
        attempts: u32,
        last: Box<ClientError>,
    },
}

/// Settings for [`Client::new`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub api_key: String,
    pub endpoint: String,
    /// Jitter floor; pauses are drawn from `[delay, 2 * delay)`.
    pub request_delay: Duration,
    /// Total attempts per request.
    pub request_retries: u32,
    pub max_requests_per_second: usize,
}

/// Whether a request is preceded by a randomized pause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Jitter {
    Before,
    None,
}

/// Client for the Ping-Admin HTTP API.
pub struct Client {
    http: reqwest::Client,
    api_key: String,
    base: Url,
    request_delay: Duration,
    request_retries: u32,
    limiter: RateLimiter,
}

impl Client {
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let endpoint = format!("{}/", config.endpoint.trim_end_matches('/'));
        let base = Url::parse(&endpoint).map_err(|e| ClientError::Endpoint(e.to_string()))?;

        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(version::user_agent())
            .build()
            .map_err(|e| ClientError::Transport(mask_api_key(&e.to_string())))?;

        let limiter = RateLimiter::new(config.max_requests_per_second);
        tracing::debug!(
            endpoint = %base,
            max_requests_per_second = limiter.max_per_second(),
            request_retries = config.request_retries,
            "API client created"
        );

        Ok(Self {
            http,
            api_key: config.api_key,
            base,
            request_delay: config.request_delay,
            request_retries: config.request_retries,
            limiter,
        })
    }

    /// List all tasks of the account (`sa=tasks`).
    pub async fn get_all_tasks(&self) -> Result<Vec<TaskInfo>, ClientError> {
        let raw: Vec<TaskRaw> = self.get_api("tasks", &[], Jitter::Before).await?;
        Ok(raw.into_iter().map(TaskInfo::from).collect())
    }

    /// List all monitoring points (`sa=tm`).
    pub async fn get_monitoring_points(&self) -> Result<MonitoringPointDirectory, ClientError> {
        let raw: Vec<MonitoringPointRaw> = self.get_api("tm", &[], Jitter::Before).await?;
        Ok(raw.into_iter().map(MonitoringPointInfo::from).collect())
    }

    /// Latest connection samples of a task per monitoring point (`sa=task_graph_stat`).
    pub async fn get_task_graph_stat(
        &self,
        task_id: i64,
    ) -> Result<Vec<MonitoringPointEntry>, ClientError> {
        let id = task_id.to_string();
        let raw: Vec<EntryRaw> = self
            .get_api(
                "task_graph_stat",
                &[("id", id.as_str()), ("notnull", "1"), ("limit", "1")],
                Jitter::None,
            )
            .await?;
        Ok(raw.into_iter().map(MonitoringPointEntry::from).collect())
    }

    /// Recent event log of a task (`sa=task_stat`).
    pub async fn get_task_stat(&self, task_id: i64) -> Result<TaskStatEntry, ClientError> {
        let id = task_id.to_string();
        let raw: Vec<TaskStatRaw> = self
            .get_api(
                "task_stat",
                &[("id", id.as_str()), ("limit", "100")],
                Jitter::None,
            )
            .await?;

        raw.into_iter()
            .next()
            .map(TaskStatEntry::from)
            .ok_or_else(|| {
                ClientError::NoData(format!("no task stat entries returned for task {}", task_id))
            })
    }

    fn url(&self, action: &str, params: &[(&str, &str)]) -> Url {
        let mut url = self.base.clone();
        url.query_pairs_mut()
            .append_pair("a", "api")
            .append_pair("sa", action)
            .append_pair("enc", "utf8")
            .append_pair("api_key", &self.api_key)
            .extend_pairs(params.iter().copied());
        url
    }

    /// Issue a GET with retries and decode the JSON body.
    async fn get_api<T: DeserializeOwned>(
        &self,
        action: &str,
        params: &[(&str, &str)],
        jitter: Jitter,
    ) -> Result<T, ClientError> {
        let url = self.url(action, params);
        let masked = mask_api_key(url.as_str());
        let attempts = self.request_retries.max(1);

        if jitter == Jitter::Before {
            randomized_pause(self.request_delay).await;
        }

        let mut last = ClientError::Transport("no attempt made".to_string());
        for attempt in 1..=attempts {
            self.limiter.acquire().await;
            tracing::debug!(url = %masked, attempt, "Sending API request");

            match self.send(url.clone()).await {
                Ok(body) => return decode(&body),
                Err(e) => {
                    tracing::warn!(url = %masked, attempt, error = %e, "API request failed");
                    last = e;
                }
            }

            if attempt < attempts {
                tracing::info!(url = %masked, "Trying to send this request again..");
                randomized_pause(self.request_delay).await;
            }
        }

        Err(ClientError::Unavailable {
            attempts,
            last: Box::new(last),
        })
    }

    async fn send(&self, url: Url) -> Result<String, ClientError> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| ClientError::Transport(mask_api_key(&e.to_string())))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::Status(status.as_u16()));
        }

        response
            .text()
            .await
            .map_err(|e| ClientError::Transport(mask_api_key(&e.to_string())))
    }
}

fn decode<T: DeserializeOwned>(body: &str) -> Result<T, ClientError> {
    serde_json::from_str(body).map_err(|e| ClientError::Decode(mask_api_key(&e.to_string())))
}

/// Replace the value of any `api_key=` parameter with `***`.
pub fn mask_api_key(s: &str) -> String {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r#"(api_key=)[^&\s"')]+"#).expect("valid regex"));
    re.replace_all(s, "${1}***").into_owned()
}

/// Random duration in `[min, 2 * min)`; zero when `min` is zero.
pub fn jitter_duration(min: Duration) -> Duration {
    let min_ms = u64::try_from(min.as_millis()).unwrap_or(u64::MAX).min(u64::MAX / 2);
    if min_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::thread_rng().gen_range(min_ms..2 * min_ms))
}

/// Sleep for [`jitter_duration`] to spread requests across tasks.
pub async fn randomized_pause(min: Duration) {
    let pause = jitter_duration(min);
    if pause.is_zero() {
        return;
    }
    tracing::debug!(duration_ms = pause.as_millis() as u64, "Pausing before next request");
    tokio::time::sleep(pause).await;
}
