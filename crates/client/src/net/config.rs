use std::time::Duration;

pub const DEFAULT_INTERPOLATION_SPEED: f32 = 10.0;
/// Mirrors that hear nothing for this long are frozen on their last target.
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, PartialEq)]
pub struct InterpolationConfig {
    pub speed: f32,
    pub stale_after: Duration,
}

impl Default for InterpolationConfig {
    fn default() -> Self {
        Self {
            speed: DEFAULT_INTERPOLATION_SPEED,
            stale_after: DEFAULT_STALE_AFTER,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    pub session_id: u32,
    pub player_name: String,
    pub frame_rate: u32,
    pub ping_interval: Duration,
    pub status_interval: Duration,
    pub interpolation: InterpolationConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: volley::DEFAULT_PORT,
            session_id: 1,
            player_name: "pilot".to_string(),
            frame_rate: 60,
            ping_interval: Duration::from_secs(1),
            status_interval: Duration::from_secs(2),
            interpolation: InterpolationConfig::default(),
        }
    }
}

impl ClientConfig {
    pub fn frame_period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.frame_rate.max(1)))
    }
}
