//! HTTP request handlers.

use super::AppState;
use crate::version;

use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
};

const INDEX_TEMPLATE: &str = include_str!("templates/index.html");

const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";

const INVALID_TYPE_BODY: &str =
    r#"{"error":"Invalid or missing 'type' parameter. Use 'type=task' or 'type=all'."}"#;

// ============================================================================
// Index
// ============================================================================

pub async fn handle_index() -> impl IntoResponse {
    Html(INDEX_TEMPLATE.replace("{{version}}", version::VERSION))
}

// ============================================================================
// Metrics
// ============================================================================

pub async fn handle_metrics(State(state): State<AppState>) -> Response {
    match state.metrics.encode() {
        Ok(body) => ([(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)], body).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

// ============================================================================
// Stats
// ============================================================================

/// Latest published snapshot; `[]` until the first publish.
///
/// Only the first `type` parameter counts, so repeated or unknown parameters
/// never turn into an extractor rejection.
pub async fn handle_stats(
    State(state): State<AppState>,
    Query(params): Query<Vec<(String, String)>>,
) -> Response {
    let kind = params
        .iter()
        .find(|(name, _)| name == "type")
        .map(|(_, value)| value.as_str());

    let mut body = match kind {
        Some("task") => state.cache.task_stats.read().await,
        Some("all") => state.cache.all_tasks.read().await,
        _ => INVALID_TYPE_BODY.as_bytes().to_vec(),
    };

    if body.is_empty() {
        body = b"[]".to_vec();
    }

    ([(header::CONTENT_TYPE, JSON_CONTENT_TYPE)], body).into_response()
}

#[cfg(test)]
mod tests {
    use super::super::Server;
    use crate::cache::SeriesCache;
    use crate::exporter::Metrics;
    use serde_json::Value;
    use std::sync::Arc;
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;

    struct Running {
        base: String,
        cache: Arc<SeriesCache>,
        metrics: Arc<Metrics>,
        stop: oneshot::Sender<()>,
        handle: tokio::task::JoinHandle<()>,
    }

    async fn start() -> Running {
        let metrics = Arc::new(Metrics::new().unwrap());
        let cache = Arc::new(SeriesCache::new());
        let server = Server::new("127.0.0.1:0".to_string(), metrics.clone(), cache.clone());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let (stop, stopped) = oneshot::channel::<()>();

        let handle = tokio::spawn(async move {
            server
                .serve(listener, async {
                    let _ = stopped.await;
                })
                .await
                .unwrap();
        });

        Running {
            base,
            cache,
            metrics,
            stop,
            handle,
        }
    }

    async fn get(url: String) -> reqwest::Response {
        reqwest::get(url).await.unwrap()
    }

    #[tokio::test]
    async fn test_index_page() {
        let running = start().await;

        let response = get(format!("{}/", running.base)).await;
        assert_eq!(response.status(), 200);
        let body = response.text().await.unwrap();
        assert!(body.contains("Advanced Ping-Admin Task Indicators Transducer"));
        assert!(body.contains("/stats?type=all"));

        let missing = get(format!("{}/nope", running.base)).await;
        assert_eq!(missing.status(), 404);
    }

    #[tokio::test]
    async fn test_stats_defaults_to_empty_array() {
        let running = start().await;

        for kind in ["task", "all"] {
            let response = get(format!("{}/stats?type={}", running.base, kind)).await;
            assert_eq!(response.status(), 200);
            assert_eq!(
                response.headers()["content-type"],
                "application/json; charset=utf-8"
            );
            assert_eq!(response.text().await.unwrap(), "[]");
        }
    }

    #[tokio::test]
    async fn test_stats_serves_published_snapshot() {
        let running = start().await;
        let doc = br#"[{"TaskID":"123","TaskLogs":[]}]"#.to_vec();
        running.cache.task_stats.publish(doc.clone()).await;
        running.cache.all_tasks.publish(br#"[{"ID":123}]"#.to_vec()).await;

        let task = get(format!("{}/stats?type=task", running.base)).await;
        assert_eq!(task.bytes().await.unwrap().to_vec(), doc);

        let all: Value = get(format!("{}/stats?type=all", running.base))
            .await
            .json()
            .await
            .unwrap();
        assert_eq!(all[0]["ID"], 123);
    }

    #[tokio::test]
    async fn test_stats_rejects_unknown_type() {
        let running = start().await;

        for query in ["", "?type=bogus"] {
            let response = get(format!("{}/stats{}", running.base, query)).await;
            assert_eq!(response.status(), 200);
            let body: Value = response.json().await.unwrap();
            assert!(body["error"].as_str().unwrap().contains("type=task"));
        }
    }

    #[tokio::test]
    async fn test_stats_uses_first_type_parameter() {
        let running = start().await;
        running.cache.task_stats.publish(br#"[{"TaskID":"123"}]"#.to_vec()).await;

        let response = get(format!("{}/stats?type=task&type=all", running.base)).await;
        assert_eq!(response.status(), 200);
        assert_eq!(
            response.headers()["content-type"],
            "application/json; charset=utf-8"
        );
        let body: Value = response.json().await.unwrap();
        assert_eq!(body[0]["TaskID"], "123");

        let response = get(format!("{}/stats?kind=x&type=bogus&type=task", running.base)).await;
        assert_eq!(response.status(), 200);
        let body: Value = response.json().await.unwrap();
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn test_metrics_exposition() {
        let running = start().await;
        running.metrics.service_info.set(1.0);
        running.metrics.record_loop("metrics");

        let response = get(format!("{}/metrics", running.base)).await;
        assert_eq!(response.status(), 200);
        assert!(response.headers()["content-type"]
            .to_str()
            .unwrap()
            .starts_with("text/plain"));
        let body = response.text().await.unwrap();
        assert!(body.contains("apatit_service_info{"));
        assert!(body.contains("ping_admin_exporter_loops_total{exporter_type=\"metrics\"} 1"));
    }

    #[tokio::test]
    async fn test_graceful_shutdown() {
        let running = start().await;
        let _ = get(format!("{}/", running.base)).await;

        running.stop.send(()).unwrap();
        let _ = tokio_test::assert_ok!(
            tokio::time::timeout(std::time::Duration::from_secs(5), running.handle).await
        );
    }
}
