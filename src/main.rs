use axum::routing::get;
use axum_prometheus::PrometheusMetricLayer;
use clap::Parser;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use lexis::config::{Config, JobConfig};
use lexis::events::{EventSink, TracingSink};
use lexis::jobs::JobQueue;
use lexis::openai_engine::{OpenAiClassifier, OpenAiConfig};
use lexis::server::{AppState, router};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = Config::parse();
    tracing::info!("Starting classification service with config: {:?}", config);
    config.validate()?;

    let job_config = JobConfig::from(&config);

    let classifier = OpenAiClassifier::new(OpenAiConfig::from(&config))?;
    tracing::info!(model = %config.model, labels = ?config.parse_labels(), "Classifier ready");

    let events: Arc<dyn EventSink> = Arc::new(TracingSink);
    let (queue, worker) = JobQueue::new(Arc::new(classifier), job_config.clone(), events);

    // Spawn background task to execute queued runs
    tokio::spawn(async move {
        tracing::info!("Starting run worker");
        worker.run_forever().await;
    });

    let (prometheus_layer, metric_handle) = PrometheusMetricLayer::pair();

    let state = AppState::new(queue).with_max_body_bytes(config.max_body_bytes);
    let app = router(state)
        .route("/metrics", get(|| async move { metric_handle.render() }))
        .layer(prometheus_layer)
        .layer(TraceLayer::new_for_http());

    let listener = TcpListener::bind(&config.server_address()).await?;
    tracing::info!("Server running on http://{}", config.server_address());
    tracing::info!(
        "Batch size: {}, max attempts: {}, call timeout: {:?}, finished runs kept: {}",
        job_config.pipeline.batch_size,
        job_config.retry.max_attempts,
        job_config.retry.call_timeout,
        job_config.max_finished_runs
    );

    axum::serve(listener, app).await?;
    Ok(())
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,lexis=debug".into());
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    if std::env::var("LOG_FORMAT").is_ok_and(|format| format == "json") {
        builder.json().init();
    } else {
        builder.init();
    }
}
