//! Gateway configuration file – reads/writes `~/.basestation/config.toml`.

use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use basestation_cockpit::Heartbeat;
use basestation_runtime::GatewayConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("failed to write config at {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

const HEARTBEAT_SECS_MAX: u64 = 3_600;
const HEARTBEAT_TIMEOUT_MS_MAX: u64 = 60_000;
const ANTENNA_INTERVAL_MS_MAX: u64 = 3_600_000;

/// Persisted gateway settings.  Every field is optional in the file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Websocket listen address for operator clients.
    #[serde(default = "default_ws_addr")]
    pub ws_addr: SocketAddr,

    /// Where antenna datagrams are sent.
    #[serde(default = "default_antenna_peer")]
    pub antenna_peer: SocketAddr,

    /// Where antenna feedback datagrams are received.
    #[serde(default = "default_antenna_listen")]
    pub antenna_listen: SocketAddr,

    #[serde(default = "default_antenna_interval_ms")]
    pub antenna_interval_ms: u64,

    /// Seconds between websocket pings.
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,

    /// Grace period after a missed pong, in milliseconds.
    #[serde(default = "default_heartbeat_timeout_ms")]
    pub heartbeat_timeout_ms: u64,
}

fn default_ws_addr() -> SocketAddr {
    GatewayConfig::default().ws_addr
}
fn default_antenna_peer() -> SocketAddr {
    GatewayConfig::default().antenna_peer
}
fn default_antenna_listen() -> SocketAddr {
    GatewayConfig::default().antenna_listen
}
fn default_antenna_interval_ms() -> u64 {
    1000
}
fn default_heartbeat_secs() -> u64 {
    3
}
fn default_heartbeat_timeout_ms() -> u64 {
    1500
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ws_addr: default_ws_addr(),
            antenna_peer: default_antenna_peer(),
            antenna_listen: default_antenna_listen(),
            antenna_interval_ms: default_antenna_interval_ms(),
            heartbeat_secs: default_heartbeat_secs(),
            heartbeat_timeout_ms: default_heartbeat_timeout_ms(),
        }
    }
}

impl Config {
    /// Reject periods the gateway loops cannot run with.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Invalid`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        in_range("heartbeat_secs", self.heartbeat_secs, 1, HEARTBEAT_SECS_MAX)?;
        in_range(
            "heartbeat_timeout_ms",
            self.heartbeat_timeout_ms,
            0,
            HEARTBEAT_TIMEOUT_MS_MAX,
        )?;
        in_range(
            "antenna_interval_ms",
            self.antenna_interval_ms,
            1,
            ANTENNA_INTERVAL_MS_MAX,
        )
    }

    pub fn gateway_config(&self) -> GatewayConfig {
        GatewayConfig {
            ws_addr: self.ws_addr,
            heartbeat: Heartbeat {
                interval: Duration::from_secs(self.heartbeat_secs),
                timeout: Duration::from_millis(self.heartbeat_timeout_ms),
            },
            antenna_peer: self.antenna_peer,
            antenna_listen: self.antenna_listen,
            antenna_interval: Duration::from_millis(self.antenna_interval_ms),
            ..GatewayConfig::default()
        }
    }
}

fn in_range(field: &'static str, value: u64, min: u64, max: u64) -> Result<(), ConfigError> {
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::Invalid {
            field,
            reason: format!("{value} is outside {min}..={max}"),
        })
    }
}

/// `$BASESTATION_CONFIG`, or `~/.basestation/config.toml`.
pub fn config_path() -> PathBuf {
    if let Ok(path) = std::env::var("BASESTATION_CONFIG") {
        return PathBuf::from(path);
    }
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".basestation").join("config.toml")
}

/// Load the config with environment overrides applied and validated.
/// `None` if the file does not exist.
pub fn load() -> Result<Option<Config>, ConfigError> {
    let Some(mut cfg) = load_from(&config_path())? else {
        return Ok(None);
    };
    apply_env_overrides(&mut cfg);
    cfg.validate()?;
    Ok(Some(cfg))
}

pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let cfg: Config = toml::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    cfg.validate()?;
    Ok(Some(cfg))
}

/// Apply `BASESTATION_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `BASESTATION_WS_ADDR` | `ws_addr` |
/// | `BASESTATION_ANTENNA_PEER` | `antenna_peer` |
/// | `BASESTATION_ANTENNA_LISTEN` | `antenna_listen` |
/// | `BASESTATION_HEARTBEAT_SECS` | `heartbeat_secs` |
///
/// Unparsable values are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Some(addr) = env_parsed("BASESTATION_WS_ADDR") {
        cfg.ws_addr = addr;
    }
    if let Some(addr) = env_parsed("BASESTATION_ANTENNA_PEER") {
        cfg.antenna_peer = addr;
    }
    if let Some(addr) = env_parsed("BASESTATION_ANTENNA_LISTEN") {
        cfg.antenna_listen = addr;
    }
    if let Some(secs) = env_parsed("BASESTATION_HEARTBEAT_SECS") {
        cfg.heartbeat_secs = secs;
    }
}

fn env_parsed<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok()?.trim().parse().ok()
}

pub fn save(cfg: &Config) -> Result<(), ConfigError> {
    save_to(cfg, &config_path())
}

/// Write `cfg` to `path`, creating the parent directory.  On Unix the
/// directory is `0o700` and the file `0o600`.
pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    let write_err = |source| ConfigError::Write {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(write_err)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700)).map_err(write_err)?;
        }
    }
    let raw = toml::to_string_pretty(cfg)?;
    #[cfg(unix)]
    {
        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| f.write_all(raw.as_bytes()))
            .map_err(write_err)?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw).map_err(write_err)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_gateway_defaults() {
        let gateway = Config::default().gateway_config();
        assert_eq!(gateway, GatewayConfig::default());
    }

    #[test]
    fn roundtrip_default_config() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        save_to(&Config::default(), &path).expect("save");
        let loaded = load_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded, Config::default());
        assert_eq!(loaded.ws_addr.port(), 5000);
        assert_eq!(loaded.antenna_peer.to_string(), "192.168.1.4:42069");
    }

    #[test]
    fn partial_file_uses_defaults() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        fs::write(&path, "ws_addr = \"127.0.0.1:6000\"\nheartbeat_secs = 10\n").unwrap();

        let cfg = load_from(&path).unwrap().unwrap();
        assert_eq!(cfg.ws_addr.to_string(), "127.0.0.1:6000");
        assert_eq!(cfg.heartbeat_secs, 10);
        assert_eq!(cfg.antenna_listen, default_antenna_listen());

        let gateway = cfg.gateway_config();
        assert_eq!(gateway.heartbeat.interval, Duration::from_secs(10));
        assert_eq!(gateway.heartbeat.timeout, Duration::from_millis(1500));
    }

    #[test]
    fn invalid_file_is_a_parse_error() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        fs::write(&path, "ws_addr = \"not an address\"\n").unwrap();
        assert!(matches!(load_from(&path), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn zero_heartbeat_is_rejected() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        fs::write(&path, "heartbeat_secs = 0\n").unwrap();
        assert!(matches!(
            load_from(&path),
            Err(ConfigError::Invalid { field: "heartbeat_secs", .. })
        ));
    }

    #[test]
    fn zero_antenna_interval_is_rejected() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        fs::write(&path, "antenna_interval_ms = 0\n").unwrap();
        assert!(matches!(
            load_from(&path),
            Err(ConfigError::Invalid { field: "antenna_interval_ms", .. })
        ));
    }

    #[test]
    fn oversized_periods_are_rejected() {
        let cfg = Config {
            heartbeat_secs: u64::MAX,
            ..Config::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::Invalid { field: "heartbeat_secs", .. })
        ));

        let cfg = Config {
            heartbeat_timeout_ms: 60_001,
            ..Config::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::Invalid { field: "heartbeat_timeout_ms", .. })
        ));

        let cfg = Config {
            antenna_interval_ms: u64::MAX,
            ..Config::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::Invalid { field: "antenna_interval_ms", .. })
        ));
    }

    #[test]
    fn defaults_are_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[cfg(unix)]
    #[test]
    fn config_file_has_restrictive_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        save_to(&Config::default(), &path).expect("save");

        let file_mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(file_mode, 0o600, "config file must have 0o600 permissions");
        let dir_mode = fs::metadata(path.parent().unwrap()).unwrap().permissions().mode() & 0o777;
        assert_eq!(dir_mode, 0o700, "config directory must have 0o700 permissions");
    }

    #[test]
    fn config_path_points_to_basestation_dir() {
        let p = config_path_for_home("/home/operator");
        assert_eq!(p, PathBuf::from("/home/operator/.basestation/config.toml"));
    }

    #[test]
    fn load_from_returns_none_when_missing() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        assert!(load_from(&path).expect("no error").is_none());
    }

    #[test]
    fn apply_env_overrides_changes_antenna_peer() {
        // SAFETY: no other test touches this variable.
        unsafe { std::env::set_var("BASESTATION_ANTENNA_PEER", "10.0.0.7:5555") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.antenna_peer.to_string(), "10.0.0.7:5555");
        unsafe { std::env::remove_var("BASESTATION_ANTENNA_PEER") };
    }

    #[test]
    fn apply_env_overrides_ignores_invalid_heartbeat() {
        // SAFETY: no other test touches this variable.
        unsafe { std::env::set_var("BASESTATION_HEARTBEAT_SECS", "soon") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.heartbeat_secs, 3);
        unsafe { std::env::remove_var("BASESTATION_HEARTBEAT_SECS") };
    }
}
