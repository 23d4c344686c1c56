use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use courier::api::{self, AppState};
use courier::audit::KafkaAuditPublisher;
use courier::config::{Config, TransformKind};
use courier::metrics::Collector;
use courier::refstore::RefStore;
use courier::shutdown::ShutdownSignal;
use courier::sink::{FtpSink, Sink, SuppaftpDialer};
use courier::transform::Ravenpack;
use courier::worker::{Cutoff, DeliveryWorker, Pipeline, PipelineSettings};

const HTTP_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // Build id is injected into the environment by the release pipeline.
    let build = std::env::var("COURIER_BUILD").unwrap_or_else(|_| "testing-unset".to_string());

    let cfg = match Config::from_env(build) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("load config error: {e}");
            std::process::exit(1);
        }
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if cfg.debug { "debug" } else { "info" }));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!(
        build = %cfg.app_build,
        environment = cfg.env.as_str(),
        group_id = %cfg.kafka.group_id,
        "Initializing"
    );

    let metrics = Arc::new(Collector::new(&cfg.kafka.group_id, &cfg.kafka.topic));
    let shutdown = ShutdownSignal::new();

    // FTP session up first: without a writable endpoint there is nothing
    // to consume for.
    let dialer = SuppaftpDialer::new(cfg.ftp.host.clone(), cfg.ftp.connect_timeout);
    let sink = match FtpSink::connect(dialer, cfg.ftp.clone()).await {
        Ok(sink) => sink,
        Err(e) => {
            error!(error = %e, "Load ftp sink error");
            std::process::exit(1);
        }
    };
    let keepalive = sink.spawn_keepalive(&shutdown);

    info!("Loading redis");
    let refstore = match RefStore::connect(&cfg.redis_url).await {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!(error = %e, "Load redis error");
            std::process::exit(1);
        }
    };

    let transform = match cfg.transform.kind {
        TransformKind::Ravenpack => Ravenpack::new(refstore),
        TransformKind::Default => {
            error!(kind = cfg.transform.kind.as_str(), "Unsupported transform kind");
            std::process::exit(1);
        }
    };

    let audit = match KafkaAuditPublisher::new(&cfg.kafka) {
        Ok(audit) => audit,
        Err(e) => {
            error!(error = %e, "Load audit producer error");
            std::process::exit(1);
        }
    };

    let pipeline = Pipeline::new(
        transform,
        Arc::clone(&sink),
        audit,
        PipelineSettings {
            consumer_group: cfg.kafka.group_id.clone(),
            accepted_kinds: cfg.transform.accepted_kinds.clone(),
            cutoff: cfg.transform.ignore_updated_before.map(Cutoff),
            ftp_host: cfg.ftp.host.clone(),
            ftp_username: cfg.ftp.username.clone(),
            ftp_path: cfg.ftp.path.clone(),
        },
    );

    info!(
        brokers = ?cfg.kafka.brokers,
        topic = %cfg.kafka.topic,
        group_id = %cfg.kafka.group_id,
        "Initializing kafka worker"
    );
    let worker = match DeliveryWorker::new(&cfg, pipeline, Arc::clone(&metrics)) {
        Ok(worker) => worker,
        Err(e) => {
            error!(error = %e, "Load kafka worker error");
            std::process::exit(1);
        }
    };

    let state = Arc::new(AppState {
        build: cfg.app_build.clone(),
        metrics: Arc::clone(&metrics),
    });
    let listener = match tokio::net::TcpListener::bind(cfg.listen_addr()).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(listen = %cfg.listen_addr(), error = %e, "Http listener bind error");
            std::process::exit(1);
        }
    };
    info!(listen = %cfg.listen_addr(), "Starting http server");

    let mut http_shutdown = shutdown.subscribe();
    let server = tokio::spawn(async move {
        axum::serve(listener, api::router(state))
            .with_graceful_shutdown(async move {
                let _ = http_shutdown.recv().await;
            })
            .await
    });

    let worker_shutdown = shutdown.clone();
    let mut worker_task = tokio::spawn(async move { worker.run(&worker_shutdown).await });
    info!("Worker started");

    let mut failed = false;
    tokio::select! {
        _ = shutdown.wait() => {}
        result = &mut worker_task => {
            match result {
                Ok(Ok(())) => info!("Worker stopped"),
                Ok(Err(e)) => {
                    error!(error = %e, "Worker failed");
                    failed = true;
                }
                Err(e) => {
                    error!(error = %e, "Worker task error");
                    failed = true;
                }
            }
            shutdown.trigger();
        }
    }

    if !worker_task.is_finished() {
        match worker_task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(error = %e, "Worker failed during shutdown"),
            Err(e) => error!(error = %e, "Worker task error"),
        }
    }

    if let Some(task) = keepalive {
        let _ = task.await;
    }

    if let Err(e) = sink.close().await {
        error!(error = %e, "Sink close error");
    }

    match tokio::time::timeout(HTTP_SHUTDOWN_GRACE, server).await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(e))) => error!(error = %e, "Http server error"),
        Ok(Err(e)) => error!(error = %e, "Http server task error"),
        Err(_) => warn!("Http server shutdown timed out"),
    }

    info!("Shutdown complete");
    if failed {
        std::process::exit(1);
    }
}
