use chunked_upload_backend::config::UploadConfig;
use chunked_upload_backend::services::upload_service::UploadService;
use chunked_upload_backend::services::worker::BackgroundWorker;
use chunked_upload_backend::{AppState, create_app};
use clap::Parser;
use dotenvy::dotenv;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Service type to run (api, worker, all)
    #[arg(short, long, default_value = "all")]
    mode: String,

    /// Port for the API server
    #[arg(short, long, default_value_t = 3000)]
    port: u16,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Environment & logging
    dotenv().ok();
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chunked_upload_backend=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if !matches!(args.mode.as_str(), "api" | "worker" | "all") {
        anyhow::bail!("Unknown mode '{}', expected api, worker or all", args.mode);
    }

    info!("🚀 Starting Chunked Upload Backend [Mode: {}]...", args.mode);

    let config = UploadConfig::from_env();
    info!(
        "📁 Upload Config: Root={}, Default Dir={}, Max Chunk={}MB, Cleanup After={}s",
        config.document_root.display(),
        config.default_target_dir,
        config.max_chunk_size / 1024 / 1024,
        config.cleanup_max_age.as_secs()
    );

    let service = Arc::new(UploadService::new(config.clone()));

    // 2. Graceful shutdown channel
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    // 3. Background sweeper
    if args.mode == "worker" || args.mode == "all" {
        if config.enable_background_sweep {
            let worker = BackgroundWorker::new(service.clone(), shutdown_rx.clone());
            tokio::spawn(worker.run());
            info!("👷 Worker service initialized.");
        } else {
            warn!("Background sweep disabled by configuration");
        }
    }

    // 4. API server
    if args.mode == "api" || args.mode == "all" {
        let state = AppState {
            service: service.clone(),
            config: config.clone(),
        };

        let app = create_app(state);
        let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
        let listener = tokio::net::TcpListener::bind(addr).await?;

        info!("✅ API Server listening on: http://0.0.0.0:{}", args.port);
        info!(
            "📖 OpenAPI document: http://localhost:{}/api-docs/openapi.json",
            args.port
        );

        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(shutdown_signal())
                .await
            {
                error!("❌ Server runtime error: {}", e);
            }
        });
    }

    // 5. Wait for shutdown, then stop the sweeper
    shutdown_signal().await;
    let _ = shutdown_tx.send(true);

    info!("🛑 Shutting down backend services...");
    info!("👋 Backend exited cleanly.");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("⌨️  Ctrl+C received, initiating graceful shutdown...");
        },
        _ = terminate => {
            info!("💤 SIGTERM received, initiating graceful shutdown...");
        },
    }
}
