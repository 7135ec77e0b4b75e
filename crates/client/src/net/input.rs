use glam::Vec2;

use volley::net::{PlayerMoveData, PlayerShootData};

pub const DEFAULT_PILOT_SPEED: f32 = 200.0;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct InputState {
    pub velocity: Vec2,
    pub shooting: bool,
    pub charge_level: u8,
}

impl InputState {
    /// Only velocity is authoritative from the client; the position field
    /// carries our last known mirror position.
    pub fn to_move(&self, player_id: u32, position: Vec2) -> PlayerMoveData {
        PlayerMoveData {
            player_id,
            x: position.x,
            y: position.y,
            vx: self.velocity.x,
            vy: self.velocity.y,
        }
    }

    pub fn to_shoot(&self, player_id: u32) -> PlayerShootData {
        PlayerShootData {
            player_id,
            is_shooting: self.shooting,
            charge_level: self.charge_level,
        }
    }
}

/// Deterministic pilot for headless runs: flies a box pattern and fires in
/// bursts, holding a charged shot on every fourth leg.
#[derive(Debug, Clone)]
pub struct ScriptedInput {
    speed: f32,
    leg_frames: u64,
}

impl Default for ScriptedInput {
    fn default() -> Self {
        Self::new(DEFAULT_PILOT_SPEED, 90)
    }
}

impl ScriptedInput {
    pub fn new(speed: f32, leg_frames: u64) -> Self {
        Self {
            speed,
            leg_frames: leg_frames.max(1),
        }
    }

    pub fn at(&self, frame: u64) -> InputState {
        let leg = frame / self.leg_frames;
        let direction = match leg % 4 {
            0 => Vec2::new(1.0, 0.0),
            1 => Vec2::new(0.0, 1.0),
            2 => Vec2::new(-1.0, 0.0),
            _ => Vec2::new(0.0, -1.0),
        };

        let into_leg = frame % self.leg_frames;
        let charging = leg % 4 == 3;
        let shooting = charging || (into_leg / 10) % 2 == 0;
        let charge_level = if charging {
            (into_leg * 4 / self.leg_frames) as u8
        } else {
            0
        };

        InputState {
            velocity: direction * self.speed,
            shooting,
            charge_level,
        }
    }
}
