use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::warn;

const DEFAULT_API_PORT: u16 = 4600;
const DEFAULT_WS_PORT: u16 = 4601;
const DEFAULT_TOKEN_TTL_HOURS: u32 = 24;

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

// ─── ObservabilityConfig ─────────────────────────────────────────────────────

/// Daemon observability configuration (`[observability]` in config.toml).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log SQLite queries that exceed this threshold (milliseconds). Default: 100.
    /// Set to 0 to disable slow query logging.
    pub slow_query_threshold_ms: u64,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            slow_query_threshold_ms: 100,
        }
    }
}

// ─── DaemonConfig ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// HTTP API port.
    pub port: u16,
    /// Realtime WebSocket port.
    pub ws_port: u16,
    pub data_dir: PathBuf,
    pub log: String,
    /// Log output format: "pretty" (default) | "json".
    pub log_format: String,
    /// Bind address for both listeners (default: "127.0.0.1").
    pub bind_address: String,
    /// Bearer token lifetime in hours.
    pub token_ttl_hours: u32,
    pub observability: ObservabilityConfig,
}

impl DaemonConfig {
    /// Build config from CLI/env args + optional TOML file.
    ///
    /// Priority (highest to lowest):
    ///   1. CLI / env — passed as `Some(value)` from clap
    ///   2. TOML file at `{data_dir}/config.toml`
    ///   3. Built-in defaults
    pub fn new(
        port: Option<u16>,
        ws_port: Option<u16>,
        data_dir: Option<PathBuf>,
        log: Option<String>,
        bind_address: Option<String>,
    ) -> Self {
        let data_dir = data_dir.unwrap_or_else(default_data_dir);

        // Load TOML as the lowest-priority override layer
        let toml = load_toml(&data_dir).unwrap_or_default();

        let port = port.or(toml.port).unwrap_or(DEFAULT_API_PORT);
        let ws_port = ws_port.or(toml.ws_port).unwrap_or(DEFAULT_WS_PORT);
        let log = log.or(toml.log).unwrap_or_else(|| "info".to_string());

        let log_format = std::env::var("TRACKD_LOG_FORMAT")
            .ok()
            .filter(|s| !s.is_empty())
            .or(toml.log_format)
            .unwrap_or_else(|| "pretty".to_string());

        let bind_address = bind_address
            .or(std::env::var("TRACKD_BIND").ok().filter(|s| !s.is_empty()))
            .or(toml.bind_address)
            .unwrap_or_else(default_bind_address);

        let token_ttl_hours = toml.token_ttl_hours.unwrap_or(DEFAULT_TOKEN_TTL_HOURS);
        let observability = toml.observability.unwrap_or_default();

        Self {
            port,
            ws_port,
            data_dir,
            log,
            log_format,
            bind_address,
            token_ttl_hours,
            observability,
        }
    }
}

// ─── TOML layer ──────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
struct TomlConfig {
    port: Option<u16>,
    ws_port: Option<u16>,
    log: Option<String>,
    log_format: Option<String>,
    bind_address: Option<String>,
    token_ttl_hours: Option<u32>,
    observability: Option<ObservabilityConfig>,
}

fn load_toml(data_dir: &Path) -> Option<TomlConfig> {
    let path = data_dir.join("config.toml");
    let content = std::fs::read_to_string(&path).ok()?;
    match toml::from_str(&content) {
        Ok(parsed) => Some(parsed),
        Err(e) => {
            warn!(path = %path.display(), err = %e, "ignoring malformed config.toml");
            None
        }
    }
}

fn default_data_dir() -> PathBuf {
    #[cfg(target_os = "macos")]
    {
        // ~/Library/Application Support/trackd
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home)
                .join("Library")
                .join("Application Support")
                .join("trackd");
        }
    }
    #[cfg(target_os = "linux")]
    {
        // $XDG_DATA_HOME/trackd or ~/.local/share/trackd
        if let Ok(xdg) = std::env::var("XDG_DATA_HOME") {
            return PathBuf::from(xdg).join("trackd");
        }
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home)
                .join(".local")
                .join("share")
                .join("trackd");
        }
    }
    #[cfg(target_os = "windows")]
    {
        // %APPDATA%\trackd
        if let Ok(appdata) = std::env::var("APPDATA") {
            return PathBuf::from(appdata).join("trackd");
        }
    }
    PathBuf::from(".trackd")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn defaults_apply_when_nothing_is_configured() {
        let dir = TempDir::new().unwrap();
        let config = DaemonConfig::new(None, None, Some(dir.path().to_path_buf()), None, None);
        assert_eq!(config.port, DEFAULT_API_PORT);
        assert_eq!(config.ws_port, DEFAULT_WS_PORT);
        assert_eq!(config.log, "info");
        assert_eq!(config.bind_address, "127.0.0.1");
        assert_eq!(config.token_ttl_hours, 24);
    }

    #[test]
    fn cli_args_override_toml_file() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("config.toml"),
            "port = 9000\nws_port = 9001\nlog = \"debug\"\ntoken_ttl_hours = 1\n",
        )
        .unwrap();

        let config = DaemonConfig::new(
            Some(8000),
            None,
            Some(dir.path().to_path_buf()),
            None,
            None,
        );
        // CLI wins over TOML; TOML wins over defaults.
        assert_eq!(config.port, 8000);
        assert_eq!(config.ws_port, 9001);
        assert_eq!(config.log, "debug");
        assert_eq!(config.token_ttl_hours, 1);
    }

    #[test]
    fn malformed_toml_falls_back_to_defaults() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("config.toml"), "port = \"nope").unwrap();
        let config = DaemonConfig::new(None, None, Some(dir.path().to_path_buf()), None, None);
        assert_eq!(config.port, DEFAULT_API_PORT);
    }
}
