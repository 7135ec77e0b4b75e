use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use glam::Vec2;
use serde::{Deserialize, Serialize};

use volley::world::DEFAULT_MAP_SIZE;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    pub tick_rate: u32,
    pub max_players: u8,
    pub client_timeout_secs: u64,
    pub empty_timeout_secs: u64,
    pub map_width: f32,
    pub map_height: f32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: volley::DEFAULT_PORT,
            tick_rate: volley::DEFAULT_TICK_RATE,
            max_players: 4,
            client_timeout_secs: 10,
            empty_timeout_secs: 10,
            map_width: DEFAULT_MAP_SIZE.x,
            map_height: DEFAULT_MAP_SIZE.y,
        }
    }
}

impl ServerConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn bind_addr(&self) -> Result<SocketAddr> {
        let ip: IpAddr = self
            .bind
            .parse()
            .with_context(|| format!("invalid bind address {:?}", self.bind))?;
        Ok(SocketAddr::new(ip, self.port))
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            tick_rate: self.tick_rate.max(1),
            max_players: self.max_players.max(1),
            client_timeout: Duration::from_secs(self.client_timeout_secs),
            empty_timeout: Duration::from_secs(self.empty_timeout_secs),
            map_size: Vec2::new(self.map_width, self.map_height),
            ..SessionConfig::default()
        }
    }
}

/// Per-room knobs, derived from [`ServerConfig`].
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub tick_rate: u32,
    pub max_players: u8,
    pub client_timeout: Duration,
    pub empty_timeout: Duration,
    pub leave_repeats: u8,
    pub leave_spacing: Duration,
    pub lag_warning: Duration,
    pub map_size: Vec2,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            tick_rate: volley::DEFAULT_TICK_RATE,
            max_players: 4,
            client_timeout: Duration::from_secs(10),
            empty_timeout: Duration::from_secs(10),
            leave_repeats: 3,
            leave_spacing: Duration::from_millis(100),
            lag_warning: Duration::from_millis(100),
            map_size: DEFAULT_MAP_SIZE,
        }
    }
}

impl SessionConfig {
    pub fn tick_period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.tick_rate))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let config: ServerConfig =
            serde_json::from_str(r#"{ "port": 5000, "max_players": 2 }"#).unwrap();
        assert_eq!(config.port, 5000);
        assert_eq!(config.max_players, 2);
        assert_eq!(config.tick_rate, 60);
        assert_eq!(config.client_timeout_secs, 10);
    }

    #[test]
    fn session_config_uses_protocol_constants() {
        let session = ServerConfig::default().session_config();
        assert_eq!(session.tick_period(), Duration::from_secs_f64(1.0 / 60.0));
        assert_eq!(session.leave_repeats, 3);
        assert_eq!(session.leave_spacing, Duration::from_millis(100));
        assert_eq!(session.empty_timeout, Duration::from_secs(10));
    }

    #[test]
    fn bad_bind_address_is_an_error() {
        let config = ServerConfig {
            bind: "not an ip".into(),
            ..ServerConfig::default()
        };
        assert!(config.bind_addr().is_err());
        assert_eq!(
            ServerConfig::default().bind_addr().unwrap(),
            "0.0.0.0:4242".parse().unwrap()
        );
    }
}
