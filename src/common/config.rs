//! Configuration schema, defaults, and layered loading.
//!
//! Precedence: defaults < config file < environment < CLI
use anyhow::{bail, ensure, Context, Result};
use directories::ProjectDirs;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use crate::utils::security::normalize_path;

pub const ENV_PREFIX: &str = "PONDSTAGE_";
pub const DEFAULT_BODY_LIMIT: usize = 64 * 1024 * 1024;

pub fn config_path() -> PathBuf {
    ProjectDirs::from("", "", "pondstage")
        .map(|p| p.config_dir().join("config.toml"))
        .unwrap_or_else(|| PathBuf::from("pondstage.toml"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FilesystemKind {
    #[default]
    Local,
    Memory,
}

/// One named storage backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct FilesystemConfig {
    pub kind: FilesystemKind,
    /// Root directory, required for `local`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root: Option<PathBuf>,
}

/// One logically independent upload endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Route the widget talks to.
    pub route: String,
    /// Filesystem used for staging and loading.
    pub filesystem_ident: String,
    /// Final destination root for committed files.
    pub upload_path: String,
    /// Staging root, one directory per transfer id underneath.
    pub transfer_dir: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            route: "/file-pond".to_string(),
            filesystem_ident: "private".to_string(),
            upload_path: "uploads".to_string(),
            transfer_dir: "uploads/tmp".to_string(),
        }
    }
}

/// Fully resolved application configuration after all layers merge.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub bind: String,
    pub port: u16,
    /// Where inbound multipart file parts are spooled during a request.
    pub spool_dir: PathBuf,
    pub body_limit: usize,
    pub default_server: String,
    pub filesystems: BTreeMap<String, FilesystemConfig>,
    pub servers: BTreeMap<String, ServerConfig>,
}

impl Default for AppConfig {
    fn default() -> Self {
        let mut filesystems = BTreeMap::new();
        filesystems.insert(
            "private".to_string(),
            FilesystemConfig {
                kind: FilesystemKind::Local,
                root: Some(PathBuf::from("storage")),
            },
        );

        let mut servers = BTreeMap::new();
        servers.insert("default".to_string(), ServerConfig::default());

        Self {
            bind: "127.0.0.1".to_string(),
            port: 8080,
            spool_dir: std::env::temp_dir().join("pondstage-spool"),
            body_limit: DEFAULT_BODY_LIMIT,
            default_server: "default".to_string(),
            filesystems,
            servers,
        }
    }
}

impl AppConfig {
    /// Look up a named server.
    pub fn server(&self, name: &str) -> Result<&ServerConfig> {
        match self.servers.get(name) {
            Some(server) => Ok(server),
            None => bail!("Unknown server '{name}'"),
        }
    }

    /// Resolve an optional server name, falling back to `default_server`.
    pub fn select_server<'a>(
        &'a self,
        name: Option<&'a str>,
    ) -> Result<(&'a str, &'a ServerConfig)> {
        let name = name.unwrap_or(self.default_server.as_str());
        Ok((name, self.server(name)?))
    }

    /// Validates cross references and rejects unsafe values.
    pub fn validate(&self) -> Result<()> {
        ensure!(self.body_limit > 0, "Invalid config: body_limit must be > 0");
        ensure!(
            !self.servers.is_empty(),
            "Invalid config: at least one server must be configured"
        );
        ensure!(
            self.servers.contains_key(&self.default_server),
            "Invalid config: default_server '{}' is not configured",
            self.default_server
        );

        for (name, filesystem) in &self.filesystems {
            if filesystem.kind == FilesystemKind::Local {
                ensure!(
                    filesystem.root.is_some(),
                    "Invalid config: filesystems.{name}.root is required for local filesystems"
                );
            }
        }

        let mut routes = HashSet::new();
        for (name, server) in &self.servers {
            Self::validate_server(name, server)?;
            ensure!(
                self.filesystems.contains_key(&server.filesystem_ident),
                "Invalid config: servers.{name}.filesystem_ident '{}' is not a configured filesystem",
                server.filesystem_ident
            );
            ensure!(
                routes.insert(server.route.as_str()),
                "Invalid config: servers.{name}.route '{}' is used by another server",
                server.route
            );
        }

        Ok(())
    }

    fn validate_server(name: &str, server: &ServerConfig) -> Result<()> {
        ensure!(
            server.route.starts_with('/'),
            "Invalid config: servers.{name}.route must start with '/'"
        );
        ensure!(
            server.route != "/health",
            "Invalid config: servers.{name}.route '/health' is reserved"
        );
        ensure!(
            !server.route.contains([':', '*']),
            "Invalid config: servers.{name}.route must not contain ':' or '*'"
        );

        let transfer_dir = normalize_path(&server.transfer_dir)
            .with_context(|| format!("Invalid config: servers.{name}.transfer_dir"))?;
        ensure!(
            !transfer_dir.is_empty(),
            "Invalid config: servers.{name}.transfer_dir must not be the backend root"
        );
        normalize_path(&server.upload_path)
            .with_context(|| format!("Invalid config: servers.{name}.upload_path"))?;

        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConfigOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

/// Loads config from defaults/file/env. `path` replaces the default file location.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(config_path);

    let config: AppConfig = Figment::new()
        .merge(Serialized::defaults(AppConfig::default()))
        .merge(Toml::file(&path))
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
        .extract()
        .context("Failed to load configuration")?;

    config.validate()?;

    Ok(config)
}

/// Applies runtime overrides to a loaded config.
pub fn apply_overrides(mut config: AppConfig, overrides: &ConfigOverrides) -> AppConfig {
    if let Some(bind) = &overrides.bind {
        config.bind = bind.clone();
    }
    if let Some(port) = overrides.port {
        config.port = port;
    }

    config
}
