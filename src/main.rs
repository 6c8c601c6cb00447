use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

use message_pipeline::channels::WhatsAppListener;
use message_pipeline::config::PipelineConfig;
use message_pipeline::pipeline::PipelineStep;
use message_pipeline::processor::ChatGptProcessor;
use message_pipeline::scheduler::{CronSchedule, SlotPlanner, TaskRunner, spawn_scheduler};
use message_pipeline::store::{LibSqlBackend, RunLog};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = PipelineConfig::from_env().context("Failed to load configuration")?;
    let _log_guard = init_tracing(config.log_dir.as_deref());

    eprintln!("📨 message-pipeline v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   DAG: {} / {}", config.task.dag_id, config.task.task_id);
    eprintln!(
        "   Schedule: {} (catchup: {}, retries: {}, retry delay: {:?})",
        config.task.schedule, config.task.catchup, config.task.retries, config.task.retry_delay
    );
    eprintln!("   Owner: {}  Tags: {}", config.task.owner, config.task.tags.join(", "));
    eprintln!("   Model: {}", config.processor.model);

    // ── Database ─────────────────────────────────────────────────────────
    let db = Arc::new(
        LibSqlBackend::new_local(&config.store.db_path, &config.store.collection)
            .await
            .with_context(|| {
                format!("Failed to open database at {}", config.store.db_path.display())
            })?,
    );
    eprintln!("   Database: {}", config.store.db_path.display());

    // ── Pipeline ─────────────────────────────────────────────────────────
    let listener = WhatsAppListener::new(&config.webhook);
    let processor = Arc::new(ChatGptProcessor::new(config.processor.clone())?);
    let step = Arc::new(PipelineStep::new(
        Arc::new(listener.clone()),
        processor,
        db.clone(),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let run_log: Arc<dyn RunLog> = db.clone();
    let runner = Arc::new(TaskRunner::new(
        config.task.clone(),
        step,
        Some(run_log),
        shutdown_rx.clone(),
    ));

    // ── Webhook server ───────────────────────────────────────────────────
    let port = config.webhook.port;
    let app = listener.router().layer(TraceLayer::new_for_http());
    let tcp = tokio::net::TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("Failed to bind webhook port {port}"))?;
    eprintln!("   Webhook: http://0.0.0.0:{}/webhook", port);

    let mut server_shutdown = shutdown_rx.clone();
    let server = tokio::spawn(async move {
        axum::serve(tcp, app)
            .with_graceful_shutdown(async move {
                let _ = server_shutdown.wait_for(|stop| *stop).await;
            })
            .await
    });
    tracing::info!(port, "Webhook server started");

    // ── Scheduler ────────────────────────────────────────────────────────
    let schedule = CronSchedule::parse(&config.task.schedule)?;
    let planner = SlotPlanner::new(schedule, config.task.start_date, config.task.catchup);
    let scheduler = spawn_scheduler(runner, planner, shutdown_rx);
    eprintln!("   Press Ctrl-C to stop.\n");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    tracing::info!("Shutdown requested");
    let _ = shutdown_tx.send(true);

    if let Err(e) = scheduler.await {
        tracing::error!("Scheduler task panicked: {}", e);
    }
    server.await?.context("Webhook server failed")?;

    Ok(())
}

/// Console logging, plus a daily rolling file when `log_dir` is set.
///
/// The returned guard flushes the file writer on drop.
fn init_tracing(log_dir: Option<&Path>) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = || {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "message-pipeline.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(filter())
                .with(tracing_subscriber::fmt::layer().with_target(false))
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(writer),
                )
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter())
                .with_target(false)
                .init();
            None
        }
    }
}
