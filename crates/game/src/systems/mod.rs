mod combat;
mod motion;
mod spawner;

pub use combat::{
    collision_system, lives_system, projectile_expiry_system, scoring_system, weapon_system,
};
pub use motion::{
    OUT_OF_BOUNDS_MARGIN, boundary_system, companion_system, mob_wrap_system, movement_system,
    spawn_effect_system,
};
pub use spawner::{spawner_system, stage_obstacles};

use crate::net::StageClearedData;
use crate::world::World;

pub const WAVES_PER_STAGE: u16 = 5;
/// The boss warning goes up this many waves before the boss wave.
pub const BOSS_WARNING_WAVES: u16 = 2;
pub const STAGE_CLEAR_BONUS: u32 = 1000;
pub const PICKUP_EVERY_KILLS: u32 = 8;

/// Progress through the current stage, shared by all systems of a session.
#[derive(Debug, Clone, PartialEq)]
pub struct StageState {
    pub stage: u32,
    pub wave: u16,
    pub boss_warning: bool,
    pub boss_spawned: bool,
    pub kills: u32,
    cleared: Option<StageClearedData>,
}

impl Default for StageState {
    fn default() -> Self {
        Self {
            stage: 1,
            wave: 1,
            boss_warning: false,
            boss_spawned: false,
            kills: 0,
            cleared: None,
        }
    }
}

impl StageState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance_wave(&mut self) {
        self.wave = self.wave.saturating_add(1);
        self.boss_warning = self.wave + BOSS_WARNING_WAVES >= WAVES_PER_STAGE;
    }

    pub fn is_boss_wave(&self) -> bool {
        self.wave >= WAVES_PER_STAGE
    }

    /// Records the clear and moves on to the next stage. Returns the bonus.
    pub fn clear_stage(&mut self) -> u32 {
        let bonus = STAGE_CLEAR_BONUS * self.stage;
        self.cleared = Some(StageClearedData {
            stage: self.stage,
            bonus,
        });
        self.stage += 1;
        self.wave = 1;
        self.boss_warning = false;
        self.boss_spawned = false;
        bonus
    }

    pub fn take_cleared(&mut self) -> Option<StageClearedData> {
        self.cleared.take()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

pub type SystemFn = fn(&mut World, &mut StageState, f32);

/// Ordered list of gameplay systems run once per tick.
#[derive(Default)]
pub struct SystemManager {
    systems: Vec<(&'static str, SystemFn)>,
}

impl SystemManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_gameplay_systems() -> Self {
        let mut manager = Self::new();
        manager.add("spawner", spawner_system);
        manager.add("movement", movement_system);
        manager.add("mob_wrap", mob_wrap_system);
        manager.add("boundary", boundary_system);
        manager.add("collision", collision_system);
        manager.add("lives", lives_system);
        manager.add("companion", companion_system);
        manager.add("weapon", weapon_system);
        manager.add("projectile_expiry", projectile_expiry_system);
        manager.add("scoring", scoring_system);
        manager.add("spawn_effect", spawn_effect_system);
        manager
    }

    pub fn add(&mut self, name: &'static str, system: SystemFn) {
        self.systems.push((name, system));
    }

    pub fn update(&self, world: &mut World, stage: &mut StageState, dt: f32) {
        for (_, system) in &self.systems {
            system(world, stage, dt);
        }
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.systems.iter().map(|(name, _)| *name)
    }

    pub fn len(&self) -> usize {
        self.systems.len()
    }

    pub fn is_empty(&self) -> bool {
        self.systems.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec2;

    #[test]
    fn gameplay_order_is_fixed() {
        let manager = SystemManager::with_gameplay_systems();
        let names: Vec<_> = manager.names().collect();
        assert_eq!(
            names,
            [
                "spawner",
                "movement",
                "mob_wrap",
                "boundary",
                "collision",
                "lives",
                "companion",
                "weapon",
                "projectile_expiry",
                "scoring",
                "spawn_effect",
            ]
        );
    }

    #[test]
    fn boss_warning_rises_two_waves_early() {
        let mut stage = StageState::new();
        stage.advance_wave();
        assert_eq!(stage.wave, 2);
        assert!(!stage.boss_warning);
        stage.advance_wave();
        assert!(stage.boss_warning);
        stage.advance_wave();
        stage.advance_wave();
        assert!(stage.is_boss_wave());
    }

    #[test]
    fn clearing_advances_stage_once() {
        let mut stage = StageState::new();
        stage.boss_spawned = true;
        assert_eq!(stage.clear_stage(), STAGE_CLEAR_BONUS);
        assert_eq!(stage.stage, 2);
        assert!(!stage.boss_spawned);
        assert_eq!(
            stage.take_cleared(),
            Some(StageClearedData {
                stage: 1,
                bonus: STAGE_CLEAR_BONUS
            })
        );
        assert_eq!(stage.take_cleared(), None);
    }

    #[test]
    fn update_runs_systems_with_dt() {
        let mut world = World::new();
        let id = world.spawn_with(|e| {
            e.position = Some(Vec2::ZERO);
            e.velocity = Some(Vec2::new(10.0, 0.0));
        });
        let mut manager = SystemManager::new();
        manager.add("movement", movement_system);

        manager.update(&mut world, &mut StageState::new(), 0.5);
        assert_eq!(world.get(id).and_then(|e| e.position), Some(Vec2::new(5.0, 0.0)));
    }
}
