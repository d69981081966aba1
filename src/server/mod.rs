// Submodules
pub mod disposition;
pub mod dispatch;
pub mod intake;
pub mod routes;
pub mod runtime;
pub mod state;

// Public API (what main.rs imports)
pub use routes::create_router;
pub use runtime::{build_app, serve, start_local_server};
pub use state::{build_states, ServerState};
