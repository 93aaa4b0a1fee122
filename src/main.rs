//! APATIT - Advanced Ping-Admin Task Indicators Transducer
//!
//! Polls the Ping-Admin API for configured tasks and exposes the results as
//! Prometheus metrics and JSON snapshots.

mod cache;
mod client;
mod config;
mod exporter;
mod scheduler;
mod translator;
mod version;
mod web;

use cache::SeriesCache;
use client::{Client, ClientConfig, MonitoringPointDirectory, TaskInfo};
use config::Config;
use exporter::{Exporter, ExporterConfig, ExporterError, Metrics};
use scheduler::{run_until_stopped, MetricsScheduler, SchedulerSettings, StatsScheduler};
use translator::Translator;
use web::Server;

use std::sync::Arc;
use tokio::sync::{broadcast, oneshot};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let cfg = match Config::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    init_logging(&cfg.log_level, &cfg.log_format);
    tracing::info!(
        version = version::VERSION,
        tasks = cfg.task_ids.len(),
        refresh_interval_s = cfg.refresh_interval.as_secs_f64(),
        "Starting {}...",
        version::NAME
    );

    let translator = match Translator::load(&cfg.locations_file) {
        Ok(t) => t,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to initialize translator, location names will not be translated");
            Translator::passthrough()
        }
    };
    let translator = Arc::new(translator);

    let metrics = Arc::new(Metrics::new()?);
    metrics.service_info.set(1.0);

    let client = Arc::new(Client::new(ClientConfig {
        api_key: cfg.api_key.clone(),
        endpoint: cfg.api_endpoint.clone(),
        request_delay: cfg.request_delay,
        request_retries: cfg.request_retries,
        max_requests_per_second: cfg.max_requests_per_second,
    })?);

    let all_tasks = client.get_all_tasks().await?;
    let directory = match client.get_monitoring_points().await {
        Ok(directory) => directory,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to fetch monitoring points, starting with an empty directory");
            MonitoringPointDirectory::default()
        }
    };
    tracing::info!(
        tasks = all_tasks.len(),
        monitoring_points = directory.len(),
        "Fetched initial metadata"
    );

    let exporters = build_exporters(&cfg, &client, &metrics, &translator, &all_tasks);
    if exporters.is_empty() {
        return Err("failed to create exporters: no configured task was found".into());
    }

    let settings = SchedulerSettings {
        refresh_interval: cfg.refresh_interval,
        request_delay: cfg.request_delay,
        max_allowed_staleness_steps: cfg.max_allowed_staleness_steps,
    };
    let cache = Arc::new(SeriesCache::new());

    // Start web server
    let (server_stop, server_stopped) = oneshot::channel::<()>();
    let server = Server::new(cfg.listen_address.clone(), metrics.clone(), cache.clone());
    let server_handle = tokio::spawn(async move {
        let shutdown = async {
            let _ = server_stopped.await;
        };
        if let Err(e) = server.start(shutdown).await {
            tracing::error!(error = %e, "HTTP server failed");
        }
    });

    // Start schedulers
    let (stop_tx, _) = broadcast::channel::<()>(1);
    let stats = tokio::spawn(run_until_stopped(
        StatsScheduler::new(exporters.clone(), cache, settings.clone()),
        cfg.refresh_interval,
        stop_tx.subscribe(),
    ));
    let refresh = tokio::spawn(run_until_stopped(
        MetricsScheduler::new(exporters, client, metrics, settings, directory),
        cfg.refresh_interval,
        stop_tx.subscribe(),
    ));

    tracing::info!("Exporters are running. Press Ctrl+C to exit.");
    wait_for_signal().await;

    tracing::info!("Shutdown signal received. Stopping schedulers...");
    let _ = stop_tx.send(());
    for handle in [stats, refresh] {
        if let Err(e) = handle.await {
            tracing::error!(error = %e, "Scheduler task failed");
        }
    }

    let _ = server_stop.send(());
    if let Err(e) = server_handle.await {
        tracing::error!(error = %e, "HTTP server task failed");
    }

    tracing::info!("Shutdown complete. Bye!");
    Ok(())
}

/// One exporter per configured task; unknown task IDs are skipped.
fn build_exporters(
    cfg: &Config,
    client: &Arc<Client>,
    metrics: &Arc<Metrics>,
    translator: &Arc<Translator>,
    all_tasks: &[TaskInfo],
) -> Vec<Arc<Exporter>> {
    let mut exporters = Vec::with_capacity(cfg.task_ids.len());
    for &task_id in &cfg.task_ids {
        let exporter_cfg = ExporterConfig {
            task_id,
            eng_mp_names: cfg.eng_mp_names,
            api_update_delay: cfg.api_update_delay,
            api_data_time_step: cfg.api_data_time_step,
        };
        match Exporter::new(
            exporter_cfg,
            client.clone(),
            metrics.clone(),
            translator.clone(),
            all_tasks,
        ) {
            Ok(exporter) => {
                tracing::info!(task_id, task_name = exporter.task_name(), "Exporter created");
                exporters.push(Arc::new(exporter));
            }
            Err(e @ ExporterError::NotFound(_)) => {
                tracing::error!(task_id, error = %e, "Skipping task");
            }
            Err(e) => {
                tracing::error!(task_id, error = %e, "Failed to create exporter");
            }
        }
    }
    exporters
}

fn init_logging(level: &str, format: &str) {
    let default_directive = format!("{}={}", version::NAME, level.to_lowercase());
    let level_valid = default_directive.parse::<tracing_subscriber::filter::Directive>().is_ok()
        && matches!(
            level.to_lowercase().as_str(),
            "trace" | "debug" | "info" | "warn" | "error"
        );
    let directive = if level_valid {
        default_directive
    } else {
        format!("{}=info", version::NAME)
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&directive));

    let registry = tracing_subscriber::registry().with(filter);
    if format.eq_ignore_ascii_case("text") {
        registry.with(tracing_subscriber::fmt::layer()).init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().json().flatten_event(true))
            .init();
    }

    if !level_valid {
        tracing::warn!(level, "Invalid log level, falling back to info");
    }
}

async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
