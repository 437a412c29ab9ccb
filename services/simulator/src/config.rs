use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::net::SocketAddr;
use std::time::Duration;

// Simulator process configuration sourced from environment variables.
// Connection settings (server address, dialect, ack mode) live in the
// engine's `SessionConfig`.
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    // Number of simulated users.
    pub client_count: usize,
    // User names are `<prefix>_<index>`.
    pub user_prefix: String,
    // Clients started between ramp pauses.
    pub ramp_batch: usize,
    // Pause after each ramp batch.
    pub ramp_pause_ms: u64,
    // Diagnostics and metrics HTTP listener bind address.
    pub stats_bind: SocketAddr,
    // Reconnect after a session ends instead of leaving the client closed.
    pub reconnect: bool,
    // Delay before a reconnect attempt.
    pub reconnect_delay_ms: u64,
}

const DEFAULT_CLIENT_COUNT: usize = 10_000;
const DEFAULT_USER_PREFIX: &str = "test";
const DEFAULT_RAMP_BATCH: usize = 1_000;
const DEFAULT_RAMP_PAUSE_MS: u64 = 10_000;
const DEFAULT_STATS_BIND: &str = "0.0.0.0:9090";
const DEFAULT_RECONNECT_DELAY_MS: u64 = 1_000;

#[derive(Debug, Deserialize)]
struct SimulatorConfigOverride {
    client_count: Option<usize>,
    user_prefix: Option<String>,
    ramp_batch: Option<usize>,
    ramp_pause_ms: Option<u64>,
    stats_bind: Option<String>,
    reconnect: Option<bool>,
    reconnect_delay_ms: Option<u64>,
}

impl SimulatorConfig {
    pub fn from_env() -> Result<Self> {
        let stats_bind = std::env::var("COMETLOAD_SIM_STATS_BIND")
            .unwrap_or_else(|_| DEFAULT_STATS_BIND.to_string())
            .parse()
            .with_context(|| "parse COMETLOAD_SIM_STATS_BIND")?;
        let client_count = std::env::var("COMETLOAD_SIM_CLIENTS")
            .ok()
            .and_then(|value| value.parse::<usize>().ok())
            .unwrap_or(DEFAULT_CLIENT_COUNT);
        let user_prefix = std::env::var("COMETLOAD_SIM_USER_PREFIX")
            .ok()
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| DEFAULT_USER_PREFIX.to_string());
        let ramp_batch = std::env::var("COMETLOAD_SIM_RAMP_BATCH")
            .ok()
            .and_then(|value| value.parse::<usize>().ok())
            .filter(|value| *value > 0)
            .unwrap_or(DEFAULT_RAMP_BATCH);
        // Zero disables the pause between batches.
        let ramp_pause_ms = std::env::var("COMETLOAD_SIM_RAMP_PAUSE_MS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .unwrap_or(DEFAULT_RAMP_PAUSE_MS);
        let reconnect = std::env::var("COMETLOAD_SIM_RECONNECT")
            .ok()
            .map(|value| matches!(value.as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);
        let reconnect_delay_ms = std::env::var("COMETLOAD_SIM_RECONNECT_DELAY_MS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .filter(|value| *value > 0)
            .unwrap_or(DEFAULT_RECONNECT_DELAY_MS);
        Ok(Self {
            client_count,
            user_prefix,
            ramp_batch,
            ramp_pause_ms,
            stats_bind,
            reconnect,
            reconnect_delay_ms,
        })
    }

    pub fn from_env_or_yaml() -> Result<Self> {
        let mut config = Self::from_env()?;
        if let Ok(path) = std::env::var("COMETLOAD_SIM_CONFIG") {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("read COMETLOAD_SIM_CONFIG: {path}"))?;
            let override_cfg: SimulatorConfigOverride =
                serde_yaml::from_str(&contents).with_context(|| "parse simulator config yaml")?;
            if let Some(value) = override_cfg.client_count {
                config.client_count = value;
            }
            if let Some(value) = override_cfg.user_prefix
                && !value.is_empty()
            {
                config.user_prefix = value;
            }
            if let Some(value) = override_cfg.ramp_batch
                && value > 0
            {
                config.ramp_batch = value;
            }
            if let Some(value) = override_cfg.ramp_pause_ms {
                config.ramp_pause_ms = value;
            }
            if let Some(value) = override_cfg.stats_bind {
                config.stats_bind = value.parse().with_context(|| "parse stats_bind")?;
            }
            if let Some(value) = override_cfg.reconnect {
                config.reconnect = value;
            }
            if let Some(value) = override_cfg.reconnect_delay_ms
                && value > 0
            {
                config.reconnect_delay_ms = value;
            }
        }
        Ok(config)
    }

    pub fn ramp_pause(&self) -> Duration {
        Duration::from_millis(self.ramp_pause_ms)
    }

    pub fn reconnect_delay(&self) -> Option<Duration> {
        self.reconnect
            .then(|| Duration::from_millis(self.reconnect_delay_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::EnvGuard;
    use serial_test::serial;
    use std::io::Write;

    const KEYS: [&str; 8] = [
        "COMETLOAD_SIM_CONFIG",
        "COMETLOAD_SIM_STATS_BIND",
        "COMETLOAD_SIM_CLIENTS",
        "COMETLOAD_SIM_USER_PREFIX",
        "COMETLOAD_SIM_RAMP_BATCH",
        "COMETLOAD_SIM_RAMP_PAUSE_MS",
        "COMETLOAD_SIM_RECONNECT",
        "COMETLOAD_SIM_RECONNECT_DELAY_MS",
    ];

    fn clear_env() -> Vec<EnvGuard> {
        KEYS.iter().map(|key| EnvGuard::unset(key)).collect()
    }

    #[test]
    #[serial]
    fn defaults_follow_the_load_tool() -> Result<()> {
        let _guards = clear_env();
        let config = SimulatorConfig::from_env_or_yaml()?;
        assert_eq!(config.client_count, 10_000);
        assert_eq!(config.user_prefix, "test");
        assert_eq!(config.ramp_batch, 1_000);
        assert_eq!(config.ramp_pause(), Duration::from_secs(10));
        assert_eq!(config.stats_bind, "0.0.0.0:9090".parse()?);
        assert_eq!(config.reconnect_delay(), None);
        Ok(())
    }

    #[test]
    #[serial]
    fn env_values_are_parsed() -> Result<()> {
        let _guards = clear_env();
        let _g1 = EnvGuard::set("COMETLOAD_SIM_CLIENTS", "12");
        let _g2 = EnvGuard::set("COMETLOAD_SIM_USER_PREFIX", "load");
        let _g3 = EnvGuard::set("COMETLOAD_SIM_RAMP_BATCH", "0");
        let _g4 = EnvGuard::set("COMETLOAD_SIM_RAMP_PAUSE_MS", "0");
        let _g5 = EnvGuard::set("COMETLOAD_SIM_RECONNECT", "yes");
        let _g6 = EnvGuard::set("COMETLOAD_SIM_RECONNECT_DELAY_MS", "250");
        let config = SimulatorConfig::from_env_or_yaml()?;
        assert_eq!(config.client_count, 12);
        assert_eq!(config.user_prefix, "load");
        assert_eq!(config.ramp_batch, DEFAULT_RAMP_BATCH);
        assert_eq!(config.ramp_pause(), Duration::ZERO);
        assert_eq!(config.reconnect_delay(), Some(Duration::from_millis(250)));
        Ok(())
    }

    #[test]
    #[serial]
    fn invalid_stats_bind_is_an_error() {
        let _guards = clear_env();
        let _g1 = EnvGuard::set("COMETLOAD_SIM_STATS_BIND", "nope");
        assert!(SimulatorConfig::from_env_or_yaml().is_err());
    }

    #[test]
    #[serial]
    fn yaml_overrides_env() -> Result<()> {
        let _guards = clear_env();
        let dir = std::env::temp_dir().join(format!("cometload-sim-{}", std::process::id()));
        fs::create_dir_all(&dir)?;
        let path = dir.join("simulator.yaml");
        let mut file = fs::File::create(&path)?;
        writeln!(file, "client_count: 3")?;
        writeln!(file, "ramp_batch: 0")?;
        writeln!(file, "stats_bind: \"127.0.0.1:0\"")?;
        writeln!(file, "reconnect: true")?;
        drop(file);
        let _g1 = EnvGuard::set("COMETLOAD_SIM_CLIENTS", "99");
        let _g2 = EnvGuard::set("COMETLOAD_SIM_CONFIG", path.to_str().unwrap_or_default());

        let config = SimulatorConfig::from_env_or_yaml()?;
        assert_eq!(config.client_count, 3);
        assert_eq!(config.ramp_batch, DEFAULT_RAMP_BATCH);
        assert_eq!(config.stats_bind, "127.0.0.1:0".parse()?);
        assert_eq!(
            config.reconnect_delay(),
            Some(Duration::from_millis(DEFAULT_RECONNECT_DELAY_MS))
        );
        let _ = fs::remove_dir_all(&dir);
        Ok(())
    }
}
