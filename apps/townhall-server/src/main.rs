use std::net::SocketAddr;
use std::sync::Arc;

use tracing::{error, info, warn};

mod access_log;
mod api;
mod app_state;
mod config;
mod connection;
mod mutations;
mod responses;
mod router;
mod security;
#[cfg(test)]
mod test_support;

pub(crate) use app_state::AppState;

#[tokio::main]
async fn main() {
    townhall_otel::init();

    let cfg = match config::http_config_from_env() {
        Ok(cfg) => cfg,
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(2);
        }
    };

    let sessions = security::StaticSessions::from_env();
    if sessions.len() == 0 && !sessions.debug() {
        warn!("no session tokens configured; every push connection will be rejected");
    }
    let addr = cfg.addr;
    let state = AppState::new(cfg, Arc::new(sessions));
    let app = router::attach_layers(router::build_router(), state);

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(err) => {
            error!(%addr, "failed to bind server socket: {err}");
            std::process::exit(1);
        }
    };
    info!(%addr, "townhall push server listening");

    let server = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal());

    if let Err(err) = server.await {
        error!("http server exited with error: {err}");
    }
    info!("server stopped");
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = term.recv() => {},
                }
            }
            Err(err) => {
                warn!("failed to install SIGTERM handler: {err}");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }

    info!("shutdown signal received");
}
