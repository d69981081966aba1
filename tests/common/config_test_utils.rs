use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};
use tempfile::TempDir;

// Variables the config tests touch. Restored after each test.
const ENV_VARS: &[&str] = &[
    "PONDSTAGE_BIND",
    "PONDSTAGE_PORT",
    "PONDSTAGE_BODY_LIMIT",
    "PONDSTAGE_DEFAULT_SERVER",
    "PONDSTAGE_SERVERS__DEFAULT__ROUTE",
    "PONDSTAGE_SERVERS__DEFAULT__TRANSFER_DIR",
];

fn env_lock() -> &'static Mutex<()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
}

struct EnvRestore {
    saved: Vec<(&'static str, Option<std::ffi::OsString>)>,
}

impl EnvRestore {
    fn capture() -> Self {
        let saved = ENV_VARS
            .iter()
            .map(|name| (*name, std::env::var_os(name)))
            .collect();
        for name in ENV_VARS {
            std::env::remove_var(name);
        }
        Self { saved }
    }
}

impl Drop for EnvRestore {
    fn drop(&mut self) {
        for (name, value) in self.saved.drain(..) {
            match value {
                Some(value) => std::env::set_var(name, value),
                None => std::env::remove_var(name),
            }
        }
    }
}

fn write_config(temp_dir: &TempDir, contents: &str) -> PathBuf {
    let path = temp_dir.path().join("config.toml");
    std::fs::write(&path, contents).expect("write config");
    path
}

/// Run `f` with `config_toml` written to a fresh file and a clean
/// `PONDSTAGE_*` environment. Env-touching tests serialize on one lock.
pub fn with_config_env<T>(config_toml: &str, f: impl FnOnce(&Path) -> T) -> T {
    let _guard = env_lock().lock().unwrap_or_else(|e| e.into_inner());
    let temp_dir = TempDir::new().expect("temp dir");
    let path = write_config(&temp_dir, config_toml);

    let restore = EnvRestore::capture();
    let result = f(&path);
    drop(restore);
    result
}
