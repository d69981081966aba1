//! Router definitions: one route per configured server, plus health.

use axum::{extract::DefaultBodyLimit, routing::*, Router};

use super::dispatch;
use super::state::ServerState;

/// Build the router serving every configured server.
pub fn create_router(states: &[ServerState], body_limit: usize) -> Router {
    let mut router = Router::new().route("/health", get(|| async { "OK" }));

    for state in states {
        tracing::debug!(server = %state.name, route = %state.config.route, "Mounting server");
        router = router.merge(create_server_router(state));
    }

    router.layer(DefaultBodyLimit::max(body_limit))
}

/// Router for a single server. Method routing happens in the dispatcher.
pub fn create_server_router(state: &ServerState) -> Router {
    Router::new()
        .route(&state.config.route, any(dispatch::handle))
        .with_state(state.clone())
}
