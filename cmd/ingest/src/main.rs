mod watch;

use spectre_extractors::ExtractorRegistry;
use spectre_graph::GraphClient;
use spectre_ingest::config::IngestorConfig;
use spectre_ingest::listener::EventListener;
use spectre_ingest::metrics::IngestMetrics;
use spectre_ingest::pipeline::Pipeline;
use spectre_ingest::reconciler::Reconciler;
use spectre_ingest::retention::RetentionManager;
use spectre_ingest::telemetry;

use std::sync::Arc;

use axum::extract::State;
use axum::response::{IntoResponse, Json};
use axum::routing::{get, Router};
use clap::{crate_authors, crate_description, crate_version, Parser};
use tokio::net::TcpListener;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

async fn stats(State(pipeline): State<Arc<Pipeline>>) -> impl IntoResponse {
    Json(pipeline.stats())
}

async fn health() -> impl IntoResponse {
    Json("healthy")
}

#[derive(Parser, Debug)]
#[command(
    name = "spectre",
    about = crate_description!(),
    version = crate_version!(),
    author = crate_authors!("\n"),
)]
struct Args {
    /// Listen on given port
    #[arg(short, long, default_value_t = 8080, env)]
    port: u16,

    /// Path to the ingestor configuration file
    #[arg(short, long, default_value = "/etc/spectre/config.yaml", env)]
    config: String,

    /// Set logging filter directive for `tracing_subscriber::filter::EnvFilter`. Example: "info,kube=debug,spectre=debug"
    #[arg(long, default_value = "info", env)]
    log_filter: String,

    /// Set log format
    #[arg(long, value_enum, default_value_t = telemetry::LogFormat::Text, env)]
    log_format: telemetry::LogFormat,

    /// URL for the OpenTelemetry tracing endpoint.
    ///
    /// This optional argument specifies the URL to which traces will be sent using
    /// OpenTelemetry. If not provided, tracing will be disabled.
    #[arg(short, long, env = "OPENTELEMETRY_ENDPOINT_URL")]
    tracing_url: Option<String>,

    /// Sampling ratio for tracing.
    ///
    /// Specifies the ratio of traces to sample. A value of `1.0` will sample all traces,
    /// while a lower value will sample fewer traces.
    #[arg(short, long, default_value_t = 0.1, env)]
    sample_ratio: f64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Args = Args::parse();

    telemetry::init(
        &args.log_filter,
        args.log_format,
        args.tracing_url.as_deref(),
        args.sample_ratio,
    )
    .map_err(|e| anyhow::anyhow!("telemetry init failed: {e}"))?;

    let provider = opentelemetry_sdk::metrics::SdkMeterProvider::builder().build();
    opentelemetry::global::set_meter_provider(provider.clone());
    let meter = opentelemetry::global::meter("spectre");
    let metrics = Arc::new(IngestMetrics::new(&meter));

    let config = match IngestorConfig::load(&args.config) {
        Ok(config) => config,
        Err(error) => {
            warn!(msg = "config not loadable, using defaults", path = %args.config, %error);
            IngestorConfig::default()
        }
    };
    if config.watch.is_empty() {
        warn!(msg = "watch list is empty, nothing will be ingested");
    }

    // schema-init failures are fatal; everything later degrades gracefully
    let graph = Arc::new(GraphClient::connect(config.graph.clone()).await?);
    graph.create_graph().await?;
    graph.init_schema().await?;

    let client = kube::Client::try_default().await?;

    let producer_cancel = CancellationToken::new();
    let background_cancel = CancellationToken::new();
    let pipeline_cancel = CancellationToken::new();

    let (listener, mut batches, batcher_handle) =
        EventListener::spawn(config.listener.clone(), producer_cancel.clone());
    let listener = Arc::new(listener);

    let pipeline = Arc::new(Pipeline::new(
        graph.clone(),
        ExtractorRegistry::with_defaults(),
        &config,
        metrics.clone(),
    ));

    let watcher_handles = watch::spawn_watchers(
        client.clone(),
        &config.watch,
        listener.clone(),
        metrics.clone(),
        producer_cancel.clone(),
    );

    // queue depth gauge for backpressure visibility
    {
        let listener = listener.clone();
        let metrics = metrics.clone();
        let buffer_size = config.listener.buffer_size;
        let cancel = background_cancel.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(std::time::Duration::from_secs(10));
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let depth = buffer_size.saturating_sub(listener.queue_capacity());
                        metrics.queue_depth_set(depth as i64);
                    }
                }
            }
        });
    }

    let retention = {
        let manager = RetentionManager::new(graph.clone(), config.retention.clone(), metrics.clone());
        let cancel = background_cancel.clone();
        tokio::spawn(async move { manager.run(cancel).await })
    };
    let reconciler = {
        let lister = Arc::new(watch::KubeLister::new(client.clone(), config.watch.clone()));
        let task = Reconciler::new(
            lister,
            graph.clone(),
            pipeline.clone(),
            config.reconciler.clone(),
            metrics.clone(),
        );
        let cancel = background_cancel.clone();
        tokio::spawn(async move { task.run(cancel).await })
    };

    // the single ingest writer
    let ingest = {
        let pipeline = pipeline.clone();
        let cancel = pipeline_cancel.clone();
        tokio::spawn(async move {
            while let Some(batch) = batches.recv().await {
                if let Err(error) = pipeline.process_batch(&cancel, &batch).await {
                    error!(msg = "batch failed", %error);
                }
            }
        })
    };

    let app = Router::new()
        .route("/health", get(health))
        .route("/stats", get(stats))
        .with_state(pipeline.clone());
    let bind = TcpListener::bind(("0.0.0.0", args.port)).await?;
    info!(msg = "serving", port = args.port);
    let server_cancel = background_cancel.clone();
    let server = tokio::spawn(async move {
        let shutdown = async move { server_cancel.cancelled().await };
        if let Err(error) = axum::serve(bind, app).with_graceful_shutdown(shutdown).await {
            error!(msg = "http server failed", %error);
        }
    });

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    tokio::select! {
        _ = sigterm.recv() => info!(msg = "SIGTERM received"),
        _ = sigint.recv() => info!(msg = "SIGINT received"),
    }

    // stop producing, flush the listener, drain the pipeline, then stop the
    // periodic tasks and close the store
    producer_cancel.cancel();
    for handle in watcher_handles {
        let _ = handle.await;
    }
    let _ = batcher_handle.await;
    let _ = ingest.await;
    background_cancel.cancel();
    let _ = tokio::join!(retention, reconciler, server);
    graph.close().await;
    provider.shutdown()?;
    info!(msg = "shutdown complete");
    Ok(())
}
