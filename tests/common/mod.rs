#![allow(dead_code)]

pub mod config_test_utils;
pub mod http;

use std::sync::Arc;

use axum::Router;
use pondstage::common::config::ServerConfig;
use pondstage::server::{create_router, ServerState};
use pondstage::storage::{LocalBackend, MemoryBackend, Mounts, StorageBackend};
use pondstage::transfer::{CounterDispenser, TransferManager};
use tempfile::TempDir;

pub const TRANSFER_DIR: &str = "uploads/tmp";
pub const UPLOAD_PATH: &str = "uploads";
pub const ROUTE: &str = "/file-pond";
pub const BODY_LIMIT: usize = 8 * 1024 * 1024;

pub fn setup_temp_dir() -> TempDir {
    TempDir::new().expect("Failed to create temp directory")
}

pub fn server_config() -> ServerConfig {
    ServerConfig {
        route: ROUTE.to_string(),
        filesystem_ident: "private".to_string(),
        upload_path: UPLOAD_PATH.to_string(),
        transfer_dir: TRANSFER_DIR.to_string(),
    }
}

//===========
// App Factory
//===========

/// Router backed by a local filesystem rooted at `<temp>/storage`.
pub struct TestApp {
    pub app: Router,
    pub state: ServerState,
    pub temp_dir: TempDir,
}

impl TestApp {
    pub fn storage_root(&self) -> std::path::PathBuf {
        self.temp_dir.path().join("storage")
    }

    pub fn spool_dir(&self) -> std::path::PathBuf {
        self.temp_dir.path().join("spool")
    }
}

pub fn create_test_app() -> TestApp {
    let temp_dir = setup_temp_dir();
    let backend: Arc<dyn StorageBackend> =
        Arc::new(LocalBackend::new(temp_dir.path().join("storage")));
    let mounts = Arc::new(Mounts::new().with("private", backend));

    let state = ServerState::new(
        "default",
        server_config(),
        mounts,
        Arc::new(CounterDispenser::new()),
        temp_dir.path().join("spool"),
    );
    let app = create_router(std::slice::from_ref(&state), BODY_LIMIT);

    TestApp {
        app,
        state,
        temp_dir,
    }
}

/// Manager over two in-memory backends, `private` and `public`.
pub fn memory_manager() -> (Arc<MemoryBackend>, Arc<MemoryBackend>, TransferManager) {
    let private = Arc::new(MemoryBackend::new());
    let public = Arc::new(MemoryBackend::new());
    let mounts = Mounts::new()
        .with("private", private.clone())
        .with("public", public.clone());
    (
        private,
        public,
        TransferManager::new(Arc::new(mounts), "private"),
    )
}

pub fn is_hex_id(s: &str) -> bool {
    s.len() == 32 && s.chars().all(|c| c.is_ascii_hexdigit())
}
