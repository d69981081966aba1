//! Runtime lifecycle: bind, serve, and shut down on Ctrl+C.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use super::routes::create_router;
use super::state::build_states;
use crate::common::config::AppConfig;
use crate::storage::Mounts;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Build the application router from a validated config.
pub fn build_app(config: &AppConfig) -> Result<axum::Router> {
    let mounts = Mounts::from_config(config).context("Failed to set up filesystems")?;
    let states = build_states(config, Arc::new(mounts));
    Ok(create_router(&states, config.body_limit))
}

/// Starts the Axum server in the background and returns `(bound_addr, handle)`.
pub async fn start_local_server(
    app: axum::Router,
    bind: &str,
    port: u16,
) -> Result<(SocketAddr, axum_server::Handle)> {
    let listener = std::net::TcpListener::bind((bind, port)).with_context(|| {
        format!(
            "Failed to bind to {bind}:{port} - port already in use.\n\n\
             Is another pondstage instance running?\n\
             Or is another service using this port?"
        )
    })?;

    listener
        .set_nonblocking(true)
        .context("Failed to set listener to non-blocking mode")?;

    let addr = listener.local_addr()?;

    let server_handle = axum_server::Handle::new();
    let server_handle_clone = server_handle.clone();

    tokio::spawn(async move {
        if let Err(e) = axum_server::from_tcp(listener)
            .handle(server_handle_clone)
            .serve(app.into_make_service())
            .await
        {
            tracing::error!(error = %e, "Server error");
        }
    });

    Ok((addr, server_handle))
}

/// Serve every configured server until Ctrl+C.
pub async fn serve(config: &AppConfig) -> Result<()> {
    let app = build_app(config)?;
    let (addr, handle) = start_local_server(app, &config.bind, config.port).await?;

    for (name, server) in &config.servers {
        tracing::info!(
            server = %name,
            url = %format!("http://{addr}{}", server.route),
            filesystem = %server.filesystem_ident,
            "Listening"
        );
    }

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;
    tracing::info!("Ctrl+C received - initiating graceful shutdown");

    // Stop accepting new connections, let in-flight requests finish
    handle.graceful_shutdown(Some(SHUTDOWN_GRACE));
    while handle.connection_count() > 0 {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    tracing::info!("Server shutdown complete");
    Ok(())
}
