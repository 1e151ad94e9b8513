use tokio::signal;
use tokio::sync::watch;
use tokio::time::timeout;

use quill_collab::server::{self, ServerConfig, SHUTDOWN_DEADLINE};

#[tokio::main]
async fn main() {
    env_logger::init();

    let config = ServerConfig::from_env();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let server = tokio::spawn(async move {
        if let Err(e) = server::run(config, shutdown_rx).await {
            log::error!("server error: {e}");
        }
    });

    shutdown_signal().await;
    log::info!("shutting down");
    let _ = shutdown_tx.send(true);
    if timeout(SHUTDOWN_DEADLINE, server).await.is_err() {
        log::warn!("shutdown deadline exceeded");
    }
    log::info!("server stopped");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                log::error!("failed to install SIGTERM handler: {e}");
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
