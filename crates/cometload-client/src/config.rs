// Session defaults and env/YAML configuration loading.
use anyhow::{Context, Result};
use cometload_wire::{DEFAULT_MAX_FRAME_BYTES, Dialect};
use serde::Deserialize;
use std::fs;
use std::net::SocketAddr;
use std::time::Duration;

pub const DEFAULT_SERVER_ADDR: &str = "127.0.0.1:9000";
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(100);
/// Floor applied to `heartbeat_interval` by the send duty.
pub const MIN_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(10);
pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_OUTBOUND_QUEUE_DEPTH: usize = 64;
/// Write errors tolerated on one frame before the connection is declared dead.
pub const DEFAULT_WRITE_ATTEMPTS: u32 = 5;
pub const DEFAULT_USER_AGENT: &str = "mobile_socket_client/0.1.0";

/// How acknowledgements leave the session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AckMode {
    /// The receive duty writes each ack itself; no send duty, no heartbeats.
    Inline,
    /// A send duty owns the write half and drains a bounded outbound queue,
    /// interleaving heartbeats.
    #[default]
    Queued,
}

impl AckMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "inline" => Some(Self::Inline),
            "queued" => Some(Self::Queued),
            _ => None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub server_addr: SocketAddr,
    // Source address to bind before dialing; lets one host simulate several client IPs.
    pub local_addr: Option<SocketAddr>,
    pub ack_mode: AckMode,
    pub dialect: Dialect,
    pub heartbeat_interval: Duration,
    pub dial_timeout: Duration,
    pub handshake_timeout: Duration,
    pub outbound_queue_depth: usize,
    pub write_attempts: u32,
    pub max_frame_bytes: usize,
    pub user_agent: String,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
struct SessionConfigOverride {
    server_addr: Option<String>,
    local_addr: Option<String>,
    ack_mode: Option<String>,
    dialect: Option<String>,
    heartbeat_interval_ms: Option<u64>,
    dial_timeout_ms: Option<u64>,
    handshake_timeout_ms: Option<u64>,
    outbound_queue_depth: Option<usize>,
    write_attempts: Option<u32>,
    max_frame_bytes: Option<usize>,
    user_agent: Option<String>,
}

impl SessionConfig {
    pub fn new(server_addr: SocketAddr) -> Self {
        Self {
            server_addr,
            local_addr: None,
            ack_mode: AckMode::default(),
            dialect: Dialect::default(),
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            dial_timeout: DEFAULT_DIAL_TIMEOUT,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            outbound_queue_depth: DEFAULT_OUTBOUND_QUEUE_DEPTH,
            write_attempts: DEFAULT_WRITE_ATTEMPTS,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }

    /// Heartbeat period used by the send duty, never below
    /// [`MIN_HEARTBEAT_INTERVAL`].
    pub fn effective_heartbeat_interval(&self) -> Duration {
        self.heartbeat_interval.max(MIN_HEARTBEAT_INTERVAL)
    }

    pub fn from_env_or_yaml(config_path: Option<&str>) -> Result<Self> {
        let mut config = Self::from_env()?;
        let override_path = config_path
            .map(|value| value.to_string())
            .or_else(|| std::env::var("COMETLOAD_CLIENT_CONFIG").ok());
        if let Some(path) = override_path.as_deref() {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("read client config: {path}"))?;
            let override_cfg: SessionConfigOverride =
                serde_yaml::from_str(&contents).context("parse client config yaml")?;
            override_cfg.apply(&mut config)?;
        }
        Ok(config)
    }

    fn from_env() -> Result<Self> {
        let server_addr = std::env::var("COMETLOAD_SERVER_ADDR")
            .unwrap_or_else(|_| DEFAULT_SERVER_ADDR.to_string())
            .parse()
            .context("parse COMETLOAD_SERVER_ADDR")?;
        let mut config = Self::new(server_addr);
        if let Ok(value) = std::env::var("COMETLOAD_LOCAL_ADDR") {
            config.local_addr = Some(value.parse().context("parse COMETLOAD_LOCAL_ADDR")?);
        }
        if let Some(value) = std::env::var("COMETLOAD_ACK_MODE")
            .ok()
            .and_then(|value| AckMode::parse(&value))
        {
            config.ack_mode = value;
        }
        if let Some(value) = std::env::var("COMETLOAD_DIALECT")
            .ok()
            .and_then(|value| Dialect::parse(&value))
        {
            config.dialect = value;
        }
        if let Some(value) = read_u64_env("COMETLOAD_HEARTBEAT_INTERVAL_MS") {
            config.heartbeat_interval = Duration::from_millis(value);
        }
        if let Some(value) = read_u64_env("COMETLOAD_DIAL_TIMEOUT_MS") {
            config.dial_timeout = Duration::from_millis(value);
        }
        if let Some(value) = read_u64_env("COMETLOAD_HANDSHAKE_TIMEOUT_MS") {
            config.handshake_timeout = Duration::from_millis(value);
        }
        if let Some(value) = read_usize_env("COMETLOAD_OUTBOUND_QUEUE_DEPTH") {
            config.outbound_queue_depth = value;
        }
        if let Some(value) = read_u64_env("COMETLOAD_WRITE_ATTEMPTS") {
            config.write_attempts = u32::try_from(value).unwrap_or(u32::MAX);
        }
        if let Some(value) = read_usize_env("COMETLOAD_MAX_FRAME_BYTES") {
            config.max_frame_bytes = value;
        }
        if let Ok(value) = std::env::var("COMETLOAD_USER_AGENT")
            && !value.is_empty()
        {
            config.user_agent = value;
        }
        Ok(config)
    }
}

impl SessionConfigOverride {
    fn apply(&self, config: &mut SessionConfig) -> Result<()> {
        if let Some(value) = &self.server_addr {
            config.server_addr = value.parse().context("parse server_addr")?;
        }
        if let Some(value) = &self.local_addr {
            config.local_addr = Some(value.parse().context("parse local_addr")?);
        }
        if let Some(value) = &self.ack_mode
            && let Some(parsed) = AckMode::parse(value)
        {
            config.ack_mode = parsed;
        }
        if let Some(value) = &self.dialect
            && let Some(parsed) = Dialect::parse(value)
        {
            config.dialect = parsed;
        }
        if let Some(value) = self.heartbeat_interval_ms
            && value > 0
        {
            config.heartbeat_interval = Duration::from_millis(value);
        }
        if let Some(value) = self.dial_timeout_ms
            && value > 0
        {
            config.dial_timeout = Duration::from_millis(value);
        }
        if let Some(value) = self.handshake_timeout_ms
            && value > 0
        {
            config.handshake_timeout = Duration::from_millis(value);
        }
        if let Some(value) = self.outbound_queue_depth
            && value > 0
        {
            config.outbound_queue_depth = value;
        }
        if let Some(value) = self.write_attempts
            && value > 0
        {
            config.write_attempts = value;
        }
        if let Some(value) = self.max_frame_bytes
            && value > 0
        {
            config.max_frame_bytes = value;
        }
        if let Some(value) = &self.user_agent
            && !value.is_empty()
        {
            config.user_agent = value.clone();
        }
        Ok(())
    }
}

fn read_u64_env(key: &str) -> Option<u64> {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .filter(|value| *value > 0)
}

fn read_usize_env(key: &str) -> Option<usize> {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
        .filter(|value| *value > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    struct EnvGuard {
        key: &'static str,
        prev: Option<String>,
    }

    impl EnvGuard {
        fn set(key: &'static str, value: &str) -> Self {
            let prev = std::env::var(key).ok();
            unsafe {
                std::env::set_var(key, value);
            }
            Self { key, prev }
        }

        fn unset(key: &'static str) -> Self {
            let prev = std::env::var(key).ok();
            unsafe {
                std::env::remove_var(key);
            }
            Self { key, prev }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            match &self.prev {
                Some(value) => unsafe {
                    std::env::set_var(self.key, value);
                },
                None => unsafe {
                    std::env::remove_var(self.key);
                },
            }
        }
    }

    #[test]
    fn defaults_match_protocol_constants() {
        let config = SessionConfig::new("127.0.0.1:9000".parse().expect("addr"));
        assert_eq!(config.ack_mode, AckMode::Queued);
        assert_eq!(config.dialect, Dialect::Compact);
        assert_eq!(config.heartbeat_interval, Duration::from_secs(100));
        assert_eq!(config.write_attempts, 5);
        assert_eq!(config.user_agent, "mobile_socket_client/0.1.0");
        assert!(config.local_addr.is_none());
    }

    #[test]
    fn heartbeat_interval_has_a_floor() {
        let mut config = SessionConfig::new("127.0.0.1:9000".parse().expect("addr"));
        assert_eq!(config.effective_heartbeat_interval(), DEFAULT_HEARTBEAT_INTERVAL);
        config.heartbeat_interval = Duration::ZERO;
        assert_eq!(config.effective_heartbeat_interval(), MIN_HEARTBEAT_INTERVAL);
        config.heartbeat_interval = Duration::from_millis(25);
        assert_eq!(config.effective_heartbeat_interval(), Duration::from_millis(25));
    }

    #[test]
    fn ack_mode_parse() {
        assert_eq!(AckMode::parse("inline"), Some(AckMode::Inline));
        assert_eq!(AckMode::parse("queued"), Some(AckMode::Queued));
        assert_eq!(AckMode::parse("sync"), None);
    }

    #[test]
    #[serial]
    fn env_overrides_defaults() -> Result<()> {
        let _g0 = EnvGuard::unset("COMETLOAD_CLIENT_CONFIG");
        let _g1 = EnvGuard::set("COMETLOAD_SERVER_ADDR", "10.0.0.1:9100");
        let _g2 = EnvGuard::set("COMETLOAD_ACK_MODE", "inline");
        let _g3 = EnvGuard::set("COMETLOAD_DIALECT", "verbose");
        let _g4 = EnvGuard::set("COMETLOAD_HEARTBEAT_INTERVAL_MS", "250");
        let _g5 = EnvGuard::set("COMETLOAD_WRITE_ATTEMPTS", "0");
        let _g6 = EnvGuard::set("COMETLOAD_LOCAL_ADDR", "127.0.0.2:0");
        let config = SessionConfig::from_env_or_yaml(None)?;
        assert_eq!(config.server_addr, "10.0.0.1:9100".parse()?);
        assert_eq!(config.ack_mode, AckMode::Inline);
        assert_eq!(config.dialect, Dialect::Verbose);
        assert_eq!(config.heartbeat_interval, Duration::from_millis(250));
        assert_eq!(config.write_attempts, DEFAULT_WRITE_ATTEMPTS);
        assert_eq!(config.local_addr, Some("127.0.0.2:0".parse()?));
        Ok(())
    }

    #[test]
    #[serial]
    fn invalid_server_addr_is_an_error() {
        let _g0 = EnvGuard::unset("COMETLOAD_CLIENT_CONFIG");
        let _g1 = EnvGuard::set("COMETLOAD_SERVER_ADDR", "not-an-addr");
        assert!(SessionConfig::from_env_or_yaml(None).is_err());
    }

    #[test]
    #[serial]
    fn yaml_overrides_env_and_ignores_zero() -> Result<()> {
        let _g1 = EnvGuard::unset("COMETLOAD_SERVER_ADDR");
        let _g2 = EnvGuard::unset("COMETLOAD_ACK_MODE");
        let _g3 = EnvGuard::unset("COMETLOAD_LOCAL_ADDR");
        let dir = std::env::temp_dir().join(format!("cometload-config-{}", std::process::id()));
        fs::create_dir_all(&dir)?;
        let path = dir.join("client.yaml");
        let mut file = fs::File::create(&path)?;
        writeln!(file, "server_addr: \"127.0.0.1:9555\"")?;
        writeln!(file, "ack_mode: inline")?;
        writeln!(file, "dialect: bogus")?;
        writeln!(file, "handshake_timeout_ms: 1500")?;
        writeln!(file, "outbound_queue_depth: 0")?;
        writeln!(file, "user_agent: load_client/2.0")?;
        drop(file);

        let config = SessionConfig::from_env_or_yaml(path.to_str())?;
        assert_eq!(config.server_addr, "127.0.0.1:9555".parse()?);
        assert_eq!(config.ack_mode, AckMode::Inline);
        assert_eq!(config.dialect, Dialect::Compact);
        assert_eq!(config.handshake_timeout, Duration::from_millis(1500));
        assert_eq!(config.outbound_queue_depth, DEFAULT_OUTBOUND_QUEUE_DEPTH);
        assert_eq!(config.user_agent, "load_client/2.0");
        let _ = fs::remove_dir_all(&dir);
        Ok(())
    }

    #[test]
    #[serial]
    fn missing_yaml_file_is_an_error() {
        let _g1 = EnvGuard::unset("COMETLOAD_SERVER_ADDR");
        let result = SessionConfig::from_env_or_yaml(Some("/nonexistent/cometload.yaml"));
        assert!(result.is_err());
    }
}
