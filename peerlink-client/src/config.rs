//! Load config from file and environment.

use std::path::{Path, PathBuf};

use anyhow::Context;
use peerlink_core::{ClientConfig, DEFAULT_PORT};
use serde::Deserialize;

/// Client configuration. File: ~/.config/peerlink/config.toml or /etc/peerlink/config.toml.
/// Env overrides: PEERLINK_SERVER, PEERLINK_PORT, PEERLINK_NAME.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Signaling server host name or address (default localhost).
    #[serde(default = "default_server")]
    pub server: String,
    /// Server port (default 8888).
    #[serde(default = "default_port")]
    pub port: u16,
    /// Name announced at sign-in (default user@host).
    #[serde(default = "default_name")]
    pub name: String,
    /// Filter directive used when RUST_LOG is unset (default "warn").
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub session: ClientConfig,
}

fn default_server() -> String {
    "localhost".to_string()
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_log_level() -> String {
    "warn".to_string()
}

/// `user@host` from the environment.
fn default_name() -> String {
    let user = std::env::var("USER").unwrap_or_else(|_| "user".to_string());
    let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "host".to_string());
    format!("{}@{}", user, host)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: default_server(),
            port: default_port(),
            name: default_name(),
            log_level: default_log_level(),
            session: ClientConfig::default(),
        }
    }
}

/// Load config: default, then config file (explicit path, else first standard path that exists),
/// then env vars.
pub fn load(explicit: Option<&Path>) -> anyhow::Result<Config> {
    let mut c = match explicit {
        Some(path) => load_file(path)?,
        None => match config_paths().into_iter().find(|p| p.exists()) {
            Some(path) => load_file(&path)?,
            None => Config::default(),
        },
    };
    apply_env(&mut c, |key| std::env::var(key).ok());
    Ok(c)
}

fn load_file(path: &Path) -> anyhow::Result<Config> {
    let s = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    toml::from_str(&s).with_context(|| format!("parsing {}", path.display()))
}

fn apply_env(c: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(s) = var("PEERLINK_SERVER") {
        if !s.is_empty() {
            c.server = s;
        }
    }
    if let Some(s) = var("PEERLINK_PORT") {
        if let Ok(p) = s.parse::<u16>() {
            c.port = p;
        }
    }
    if let Some(s) = var("PEERLINK_NAME") {
        if !s.is_empty() {
            c.name = s;
        }
    }
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/peerlink/config.toml"));
    }
    out.push(PathBuf::from("/etc/peerlink/config.toml"));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_fills_defaults() {
        let c: Config = toml::from_str(
            "server = \"signal.example\"\n[session]\nreconnect_delay_ms = 500\n",
        )
        .unwrap();
        assert_eq!(c.server, "signal.example");
        assert_eq!(c.port, 8888);
        assert_eq!(c.log_level, "warn");
        assert_eq!(c.session.reconnect_delay_ms, 500);
        assert_eq!(c.session.max_reconnect_attempts, 5);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(toml::from_str::<Config>("proxy_port = 3128\n").is_err());
        assert!(toml::from_str::<Config>("[session]\nretries = 1\n").is_err());
    }

    #[test]
    fn env_overrides_file() {
        let mut c = Config::default();
        apply_env(&mut c, |key| match key {
            "PEERLINK_SERVER" => Some("10.0.0.1".to_string()),
            "PEERLINK_PORT" => Some("not a port".to_string()),
            "PEERLINK_NAME" => Some("alice".to_string()),
            _ => None,
        });
        assert_eq!(c.server, "10.0.0.1");
        assert_eq!(c.port, 8888);
        assert_eq!(c.name, "alice");
    }

    #[test]
    fn explicit_path_must_exist() {
        let missing = std::env::temp_dir().join("peerlink-no-such-config.toml");
        assert!(load(Some(&missing)).is_err());
    }
}
