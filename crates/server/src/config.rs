use anyhow::Context;
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};

pub const DEFAULT_PORT: u16 = 39333;

#[derive(Debug, Clone, Default, Parser)]
#[command(name = "gamegraph-server", version, about = "REST backend for gamegraph.")]
pub struct Cli {
    /// YAML file with server settings. Flags override values from the file.
    #[arg(long, env = "GAMEGRAPH_CONFIG")]
    pub config: Option<PathBuf>,

    #[arg(long, env = "GAMEGRAPH_BIND")]
    pub bind: Option<SocketAddr>,

    #[arg(long, env = "GAMEGRAPH_DB")]
    pub db_path: Option<PathBuf>,

    /// Frontend origins allowed to make credentialed requests.
    #[arg(long = "cors-origin", env = "GAMEGRAPH_CORS_ORIGINS", value_delimiter = ',')]
    pub cors_origins: Vec<String>,

    /// tracing-subscriber filter directive, e.g. `info,gamegraph_server=debug`.
    #[arg(long, env = "GAMEGRAPH_LOG")]
    pub log_filter: Option<String>,

    /// Mark the session cookie `Secure` (serve behind TLS).
    #[arg(long)]
    pub secure_cookies: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: SocketAddr,
    pub db_path: PathBuf,
    pub cors_origins: Vec<String>,
    pub log_filter: Option<String>,
    pub secure_cookies: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), DEFAULT_PORT),
            db_path: default_db_path(),
            cors_origins: vec!["http://localhost:3000".to_string()],
            log_filter: None,
            secure_cookies: false,
        }
    }
}

pub fn default_db_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".gamegraph")
        .join("gamegraph.db")
}

impl ServerConfig {
    pub fn from_yaml_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read config: {}", path.display()))?;
        Self::from_yaml_str(&raw).with_context(|| format!("parse config: {}", path.display()))
    }

    pub fn from_yaml_str(raw: &str) -> anyhow::Result<Self> {
        Ok(serde_yaml::from_str(raw)?)
    }

    /// Builds the effective config: defaults, then the YAML file, then flags and env.
    pub fn resolve(cli: Cli) -> anyhow::Result<Self> {
        let mut cfg = match &cli.config {
            Some(path) => Self::from_yaml_file(path)?,
            None => Self::default(),
        };
        if let Some(bind) = cli.bind {
            cfg.bind = bind;
        }
        if let Some(db_path) = cli.db_path {
            cfg.db_path = db_path;
        }
        if !cli.cors_origins.is_empty() {
            cfg.cors_origins = cli.cors_origins;
        }
        if cli.log_filter.is_some() {
            cfg.log_filter = cli.log_filter;
        }
        cfg.secure_cookies |= cli.secure_cookies;
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yaml_fills_missing_fields_with_defaults() {
        let cfg = ServerConfig::from_yaml_str(
            "bind: 0.0.0.0:8080\ncors_origins:\n  - https://play.example.com\n",
        )
        .unwrap();
        assert_eq!(cfg.bind.port(), 8080);
        assert_eq!(cfg.cors_origins, vec!["https://play.example.com"]);
        assert_eq!(cfg.db_path, default_db_path());
        assert!(!cfg.secure_cookies);
    }

    #[test]
    fn flags_override_file_values() {
        let cli = Cli::parse_from([
            "gamegraph-server",
            "--db-path",
            "/tmp/gg.db",
            "--cors-origin",
            "http://a.test,http://b.test",
            "--secure-cookies",
        ]);
        let cfg = ServerConfig::resolve(cli).unwrap();
        assert_eq!(cfg.db_path, PathBuf::from("/tmp/gg.db"));
        assert_eq!(cfg.cors_origins, vec!["http://a.test", "http://b.test"]);
        assert!(cfg.secure_cookies);
        assert_eq!(cfg.bind.port(), DEFAULT_PORT);
    }
}
