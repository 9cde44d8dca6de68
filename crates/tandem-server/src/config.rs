//! Server configuration: TOML file + CLI overrides.

use crate::session::RegistryConfig;
use serde::Deserialize;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tandem_core::{TandemError, TandemResult};
use tracing::info;

/// What happens when a client joins a code that has no host.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum JoinPolicy {
    /// Refuse with `session-not-found` until a host is present.
    #[default]
    RequireHost,
    /// Create the session on first join, whatever the role.
    CreateOnJoin,
}

/// Top-level config file structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub session: SessionSection,
    #[serde(default)]
    pub liveness: LivenessSection,
    #[serde(default)]
    pub limits: LimitsSection,
}

/// `[server]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind: default_bind(),
            max_frame_bytes: default_max_frame_bytes(),
        }
    }
}

/// `[session]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionSection {
    #[serde(default = "default_max_clients")]
    pub max_clients: usize,
    #[serde(default = "default_grace_period_secs")]
    pub grace_period_secs: u64,
    #[serde(default = "default_max_age_secs")]
    pub max_age_secs: u64,
    #[serde(default = "default_session_sweep_secs")]
    pub sweep_interval_secs: u64,
    #[serde(default)]
    pub join_policy: JoinPolicy,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            max_clients: default_max_clients(),
            grace_period_secs: default_grace_period_secs(),
            max_age_secs: default_max_age_secs(),
            sweep_interval_secs: default_session_sweep_secs(),
            join_policy: JoinPolicy::default(),
        }
    }
}

/// `[liveness]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct LivenessSection {
    #[serde(default = "default_heartbeat_timeout_secs")]
    pub heartbeat_timeout_secs: u64,
    #[serde(default = "default_liveness_sweep_secs")]
    pub sweep_interval_secs: u64,
}

impl Default for LivenessSection {
    fn default() -> Self {
        Self {
            heartbeat_timeout_secs: default_heartbeat_timeout_secs(),
            sweep_interval_secs: default_liveness_sweep_secs(),
        }
    }
}

/// `[limits]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct LimitsSection {
    #[serde(default = "default_connections_per_window")]
    pub connections_per_window: u32,
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
    #[serde(default = "default_play_debounce_ms")]
    pub play_debounce_ms: u64,
    #[serde(default = "default_ready_dedupe_ms")]
    pub ready_dedupe_ms: u64,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: u64,
    #[serde(default = "default_upload_type_prefix")]
    pub upload_type_prefix: String,
}

impl Default for LimitsSection {
    fn default() -> Self {
        Self {
            connections_per_window: default_connections_per_window(),
            window_secs: default_window_secs(),
            play_debounce_ms: default_play_debounce_ms(),
            ready_dedupe_ms: default_ready_dedupe_ms(),
            max_upload_bytes: default_max_upload_bytes(),
            upload_type_prefix: default_upload_type_prefix(),
        }
    }
}

fn default_port() -> u16 {
    4480
}
fn default_bind() -> String {
    "0.0.0.0".to_string()
}
fn default_max_frame_bytes() -> usize {
    48 * 1024 * 1024
}
fn default_max_clients() -> usize {
    50
}
fn default_grace_period_secs() -> u64 {
    30
}
fn default_max_age_secs() -> u64 {
    86400
}
fn default_session_sweep_secs() -> u64 {
    60
}
fn default_heartbeat_timeout_secs() -> u64 {
    60
}
fn default_liveness_sweep_secs() -> u64 {
    15
}
fn default_connections_per_window() -> u32 {
    30
}
fn default_window_secs() -> u64 {
    60
}
fn default_play_debounce_ms() -> u64 {
    50
}
fn default_ready_dedupe_ms() -> u64 {
    1000
}
fn default_max_upload_bytes() -> u64 {
    30 * 1024 * 1024
}
fn default_upload_type_prefix() -> String {
    "audio/".to_string()
}

/// Resolved server configuration (CLI overrides applied).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    pub max_frame_bytes: usize,
    pub max_clients: usize,
    pub grace_period: Duration,
    pub max_age: Duration,
    pub session_sweep_interval: Duration,
    pub join_policy: JoinPolicy,
    pub heartbeat_timeout: Duration,
    pub liveness_sweep_interval: Duration,
    pub connections_per_window: u32,
    pub rate_window: Duration,
    pub play_debounce: Duration,
    pub ready_dedupe: Duration,
    pub max_upload_bytes: u64,
    pub upload_type_prefix: String,
}

impl ServerConfig {
    /// Load config from TOML file, then apply CLI overrides.
    pub fn load(
        config_path: Option<&Path>,
        cli_port: Option<u16>,
        cli_bind: Option<&str>,
        cli_max_clients: Option<usize>,
        cli_grace_period: Option<u64>,
        cli_join_policy: Option<JoinPolicy>,
    ) -> TandemResult<Self> {
        let file_config = match config_path {
            Some(path) => {
                let expanded = expand_tilde(path);
                if expanded.exists() {
                    info!(path = %expanded.display(), "loading config file");
                    let content = std::fs::read_to_string(&expanded)?;
                    parse(&content)?
                } else {
                    info!(path = %expanded.display(), "config file not found, using defaults");
                    ConfigFile::default()
                }
            }
            None => ConfigFile::default(),
        };

        let ConfigFile {
            server,
            session,
            liveness,
            limits,
        } = file_config;

        // Merge CLI overrides
        let port = cli_port.unwrap_or(server.port);
        let bind = cli_bind.map(str::to_string).unwrap_or(server.bind);
        let ip: IpAddr = bind
            .parse()
            .map_err(|e| TandemError::Config(format!("invalid bind address {bind:?}: {e}")))?;

        Ok(Self {
            listen_addr: SocketAddr::new(ip, port),
            max_frame_bytes: server.max_frame_bytes,
            max_clients: cli_max_clients.unwrap_or(session.max_clients),
            grace_period: Duration::from_secs(
                cli_grace_period.unwrap_or(session.grace_period_secs),
            ),
            max_age: Duration::from_secs(session.max_age_secs),
            session_sweep_interval: nonzero_secs(session.sweep_interval_secs),
            join_policy: cli_join_policy.unwrap_or(session.join_policy),
            heartbeat_timeout: Duration::from_secs(liveness.heartbeat_timeout_secs),
            liveness_sweep_interval: nonzero_secs(liveness.sweep_interval_secs),
            connections_per_window: limits.connections_per_window,
            rate_window: Duration::from_secs(limits.window_secs),
            play_debounce: Duration::from_millis(limits.play_debounce_ms),
            ready_dedupe: Duration::from_millis(limits.ready_dedupe_ms),
            max_upload_bytes: limits.max_upload_bytes,
            upload_type_prefix: limits.upload_type_prefix,
        })
    }

    /// The subset the session layer needs.
    pub fn registry_config(&self) -> RegistryConfig {
        RegistryConfig {
            max_clients: self.max_clients,
            grace_period: self.grace_period,
            max_age: self.max_age,
            join_policy: self.join_policy,
            play_debounce: self.play_debounce,
            ready_dedupe: self.ready_dedupe,
            heartbeat_timeout: self.heartbeat_timeout,
            max_upload_bytes: self.max_upload_bytes,
            upload_type_prefix: self.upload_type_prefix.clone(),
        }
    }
}

fn parse(content: &str) -> TandemResult<ConfigFile> {
    toml::from_str::<ConfigFile>(content)
        .map_err(|e| TandemError::Config(format!("config parse error: {e}")))
}

/// `tokio::time::interval` panics on a zero period.
fn nonzero_secs(secs: u64) -> Duration {
    Duration::from_secs(secs.max(1))
}

/// Expand `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    if let Some(rest) = s.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    path.to_path_buf()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_without_a_file() {
        let config = ServerConfig::load(None, None, None, None, None, None).unwrap();
        assert_eq!(config.listen_addr, "0.0.0.0:4480".parse().unwrap());
        assert_eq!(config.max_clients, 50);
        assert_eq!(config.grace_period, Duration::from_secs(30));
        assert_eq!(config.join_policy, JoinPolicy::RequireHost);
        assert_eq!(config.heartbeat_timeout, Duration::from_secs(60));
        assert_eq!(config.play_debounce, Duration::from_millis(50));
        assert_eq!(config.max_upload_bytes, 30 * 1024 * 1024);
        assert!(config.max_frame_bytes > config.max_upload_bytes as usize);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let path = Path::new("/nonexistent/tandem/config.toml");
        let config = ServerConfig::load(Some(path), None, None, None, None, None).unwrap();
        assert_eq!(config.listen_addr.port(), 4480);
    }

    #[test]
    fn partial_toml_keeps_other_defaults() {
        let file = parse(
            r#"
            [session]
            max_clients = 8
            join_policy = "create-on-join"

            [limits]
            upload_type_prefix = "audio/ogg"
            "#,
        )
        .unwrap();
        assert_eq!(file.session.max_clients, 8);
        assert_eq!(file.session.join_policy, JoinPolicy::CreateOnJoin);
        assert_eq!(file.session.grace_period_secs, 30);
        assert_eq!(file.server.port, 4480);
        assert_eq!(file.limits.upload_type_prefix, "audio/ogg");
        assert_eq!(file.liveness.sweep_interval_secs, 15);
    }

    #[test]
    fn cli_overrides_win() {
        let config = ServerConfig::load(
            None,
            Some(9000),
            Some("127.0.0.1"),
            Some(4),
            Some(5),
            Some(JoinPolicy::CreateOnJoin),
        )
        .unwrap();
        assert_eq!(config.listen_addr, "127.0.0.1:9000".parse().unwrap());
        assert_eq!(config.max_clients, 4);
        assert_eq!(config.grace_period, Duration::from_secs(5));
        assert_eq!(config.registry_config().join_policy, JoinPolicy::CreateOnJoin);
    }

    #[test]
    fn bad_input_is_a_config_error() {
        assert!(matches!(
            parse("[session]\nmax_clients = \"lots\""),
            Err(TandemError::Config(_))
        ));
        assert!(matches!(
            ServerConfig::load(None, None, Some("not-an-ip"), None, None, None),
            Err(TandemError::Config(_))
        ));
    }
}
