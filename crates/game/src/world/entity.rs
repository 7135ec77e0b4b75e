use std::time::Instant;

use glam::Vec2;

use crate::net::EntityKind;

use super::ids::{LocalId, NetworkId};
use super::tag;

pub const DEFAULT_MAP_SIZE: Vec2 = Vec2::new(1280.0, 720.0);
pub const PLAYER_RADIUS: f32 = 16.0;
pub const STARTING_LIVES: i32 = 3;
pub const INVULNERABLE_SECS: f32 = 2.0;
pub const PLAYER_FIRE_INTERVAL: f32 = 0.2;
pub const PROJECTILE_SPEED: f32 = 600.0;
pub const ENEMY_PROJECTILE_SPEED: f32 = 300.0;
pub const PROJECTILE_LIFETIME: f32 = 2.5;
pub const SPAWN_EFFECT_SECS: f32 = 0.5;

/// Fixed per-slot starting offset on the left edge of the map.
pub fn player_spawn_point(slot: u8) -> Vec2 {
    Vec2::new(100.0, 150.0 + f32::from(slot) * 120.0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Team {
    Players,
    Enemies,
    Neutral,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Player {
    pub player_id: u32,
    pub slot: u8,
    pub spawn_point: Vec2,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Lives {
    pub remaining: i32,
    pub invulnerable_for: f32,
    pub hit_pending: bool,
}

impl Lives {
    pub fn new(remaining: i32) -> Self {
        Self {
            remaining,
            invulnerable_for: INVULNERABLE_SECS,
            hit_pending: false,
        }
    }

    pub fn is_out(&self) -> bool {
        self.remaining <= 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Health {
    pub current: i32,
    pub max: i32,
}

impl Health {
    pub fn new(max: i32) -> Self {
        Self { current: max, max }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Collider {
    pub radius: f32,
    pub team: Team,
    pub contact_damage: i32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Weapon {
    pub is_shooting: bool,
    pub charge_level: u8,
    pub cooldown: f32,
    pub fire_interval: f32,
    pub auto_fire: bool,
    pub power: u8,
}

impl Weapon {
    pub fn manual(fire_interval: f32) -> Self {
        Self {
            is_shooting: false,
            charge_level: 0,
            cooldown: 0.0,
            fire_interval,
            auto_fire: false,
            power: 0,
        }
    }

    pub fn automatic(fire_interval: f32) -> Self {
        Self {
            auto_fire: true,
            cooldown: fire_interval,
            ..Self::manual(fire_interval)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Projectile {
    /// Player id credited for kills, 0 for enemy fire.
    pub owner: u32,
    pub lifetime: f32,
    pub damage: i32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Enemy {
    pub score_value: u32,
    pub wraps: bool,
    pub is_boss: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Companion {
    pub leader: LocalId,
    pub offset: Vec2,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpawnEffect {
    pub elapsed: f32,
    pub duration: f32,
    pub target_velocity: Vec2,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnemySpawner {
    pub interval: f32,
    pub timer: f32,
    pub wave_size: u16,
    pub spawned_in_wave: u16,
    pub seed: u32,
}

impl EnemySpawner {
    pub fn new(seed: u32) -> Self {
        Self {
            interval: 1.2,
            timer: 2.0,
            wave_size: 6,
            spawned_in_wave: 0,
            seed: seed.max(1),
        }
    }

    /// xorshift32, good enough to scatter spawn heights.
    pub fn next_unit(&mut self) -> f32 {
        let mut x = self.seed;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.seed = x;
        (x % 10_000) as f32 / 10_000.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MapBounds {
    pub min: Vec2,
    pub max: Vec2,
}

impl MapBounds {
    pub fn new(size: Vec2) -> Self {
        Self {
            min: Vec2::ZERO,
            max: size,
        }
    }

    pub fn contains(&self, point: Vec2, margin: f32) -> bool {
        point.x >= self.min.x - margin
            && point.x <= self.max.x + margin
            && point.y >= self.min.y - margin
            && point.y <= self.max.y + margin
    }

    pub fn clamp(&self, point: Vec2) -> Vec2 {
        point.clamp(self.min, self.max)
    }

    pub fn size(&self) -> Vec2 {
        self.max - self.min
    }
}

impl Default for MapBounds {
    fn default() -> Self {
        Self::new(DEFAULT_MAP_SIZE)
    }
}

/// Client-side blend target for a replicated entity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NetworkInterpolation {
    pub target_x: f32,
    pub target_y: f32,
    pub target_vx: f32,
    pub target_vy: f32,
    pub interpolation_speed: f32,
    pub last_update_time: Instant,
}

impl NetworkInterpolation {
    pub fn new(position: Vec2, velocity: Vec2, speed: f32, now: Instant) -> Self {
        Self {
            target_x: position.x,
            target_y: position.y,
            target_vx: velocity.x,
            target_vy: velocity.y,
            interpolation_speed: speed,
            last_update_time: now,
        }
    }

    pub fn retarget(&mut self, position: Vec2, velocity: Vec2, now: Instant) {
        self.target_x = position.x;
        self.target_y = position.y;
        self.target_vx = velocity.x;
        self.target_vy = velocity.y;
        self.last_update_time = now;
    }

    pub fn target_position(&self) -> Vec2 {
        Vec2::new(self.target_x, self.target_y)
    }

    pub fn target_velocity(&self) -> Vec2 {
        Vec2::new(self.target_vx, self.target_vy)
    }
}

/// An entity is a bag of optional components. The network id is only set
/// through [`super::World::assign_network_id`] so the lookup table stays
/// consistent.
#[derive(Debug, Clone, Default)]
pub struct Entity {
    pub position: Option<Vec2>,
    pub velocity: Option<Vec2>,
    pub(super) network_id: Option<NetworkId>,
    pub tag: Option<&'static str>,
    pub player: Option<Player>,
    pub lives: Option<Lives>,
    pub score: Option<u32>,
    pub health: Option<Health>,
    pub collider: Option<Collider>,
    pub weapon: Option<Weapon>,
    pub projectile: Option<Projectile>,
    pub enemy: Option<Enemy>,
    pub companion: Option<Companion>,
    pub spawn_effect: Option<SpawnEffect>,
    pub spawner: Option<EnemySpawner>,
    pub map_bounds: Option<MapBounds>,
    pub interpolation: Option<NetworkInterpolation>,
}

impl Entity {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn player(player_id: u32, slot: u8) -> Self {
        let spawn_point = player_spawn_point(slot);
        Self {
            position: Some(spawn_point),
            velocity: Some(Vec2::ZERO),
            tag: Some(tag::PLAYER),
            player: Some(Player {
                player_id,
                slot,
                spawn_point,
            }),
            lives: Some(Lives::new(STARTING_LIVES)),
            score: Some(0),
            collider: Some(Collider {
                radius: PLAYER_RADIUS,
                team: Team::Players,
                contact_damage: 0,
            }),
            weapon: Some(Weapon::manual(PLAYER_FIRE_INTERVAL)),
            ..Self::default()
        }
    }

    pub fn enemy(tag: &'static str, position: Vec2) -> Self {
        let (health, score_value, velocity, wraps, radius, weapon) = match tag {
            tag::MONSTER_DRONE => (2, 150, Vec2::new(-160.0, 60.0), true, 14.0, None),
            tag::MONSTER_CRAWLER => (
                3,
                200,
                Vec2::new(-80.0, 0.0),
                false,
                18.0,
                Some(Weapon::automatic(2.0)),
            ),
            _ => (1, 100, Vec2::new(-120.0, 0.0), true, 14.0, None),
        };
        Self {
            position: Some(position),
            velocity: Some(Vec2::ZERO),
            tag: Some(tag),
            health: Some(Health::new(health)),
            collider: Some(Collider {
                radius,
                team: Team::Enemies,
                contact_damage: 1,
            }),
            weapon,
            enemy: Some(Enemy {
                score_value,
                wraps,
                is_boss: false,
            }),
            spawn_effect: Some(SpawnEffect {
                elapsed: 0.0,
                duration: SPAWN_EFFECT_SECS,
                target_velocity: velocity,
            }),
            ..Self::default()
        }
    }

    pub fn boss(position: Vec2) -> Self {
        Self {
            position: Some(position),
            velocity: Some(Vec2::ZERO),
            tag: Some(tag::BOSS_DREADNOUGHT),
            health: Some(Health::new(40)),
            collider: Some(Collider {
                radius: 64.0,
                team: Team::Enemies,
                contact_damage: 1,
            }),
            weapon: Some(Weapon::automatic(1.0)),
            enemy: Some(Enemy {
                score_value: 5000,
                wraps: false,
                is_boss: true,
            }),
            spawn_effect: Some(SpawnEffect {
                elapsed: 0.0,
                duration: SPAWN_EFFECT_SECS * 2.0,
                target_velocity: Vec2::new(-30.0, 90.0),
            }),
            ..Self::default()
        }
    }

    pub fn projectile(
        tag: &'static str,
        owner: u32,
        team: Team,
        position: Vec2,
        velocity: Vec2,
        damage: i32,
    ) -> Self {
        Self {
            position: Some(position),
            velocity: Some(velocity),
            tag: Some(tag),
            collider: Some(Collider {
                radius: 4.0 + damage as f32,
                team,
                contact_damage: damage,
            }),
            projectile: Some(Projectile {
                owner,
                lifetime: PROJECTILE_LIFETIME,
                damage,
            }),
            ..Self::default()
        }
    }

    pub fn obstacle(tag: &'static str, position: Vec2, velocity: Vec2) -> Self {
        let radius = if tag == tag::OBSTACLE_WALL { 40.0 } else { 24.0 };
        Self {
            position: Some(position),
            velocity: Some(velocity),
            tag: Some(tag),
            collider: Some(Collider {
                radius,
                team: Team::Neutral,
                contact_damage: 1,
            }),
            ..Self::default()
        }
    }

    pub fn companion(leader: LocalId, leader_position: Vec2, offset: Vec2) -> Self {
        Self {
            position: Some(leader_position + offset),
            velocity: Some(Vec2::ZERO),
            tag: Some(tag::COMPANION_POD),
            weapon: Some(Weapon::manual(PLAYER_FIRE_INTERVAL * 2.0)),
            companion: Some(Companion { leader, offset }),
            ..Self::default()
        }
    }

    pub fn pickup(position: Vec2) -> Self {
        Self {
            position: Some(position),
            velocity: Some(Vec2::new(-60.0, 0.0)),
            tag: Some(tag::PICKUP_POWER),
            collider: Some(Collider {
                radius: 12.0,
                team: Team::Neutral,
                contact_damage: 0,
            }),
            ..Self::default()
        }
    }

    pub fn map_bounds(size: Vec2) -> Self {
        Self {
            map_bounds: Some(MapBounds::new(size)),
            ..Self::default()
        }
    }

    pub fn enemy_spawner(seed: u32) -> Self {
        Self {
            spawner: Some(EnemySpawner::new(seed)),
            ..Self::default()
        }
    }

    /// Client mirror of a replicated entity.
    pub fn mirror(tag: &'static str, position: Vec2, velocity: Vec2) -> Self {
        Self {
            position: Some(position),
            velocity: Some(velocity),
            tag: Some(tag),
            ..Self::default()
        }
    }

    pub fn network_id(&self) -> Option<NetworkId> {
        self.network_id
    }

    pub fn is_player(&self) -> bool {
        self.player.is_some()
    }

    /// Spawners and map bounds carry no transform and are never replicated.
    pub fn is_data_only(&self) -> bool {
        self.spawner.is_some() || self.map_bounds.is_some()
    }

    pub fn has_transform(&self) -> bool {
        self.position.is_some() && self.velocity.is_some()
    }

    pub fn is_replicable(&self) -> bool {
        self.has_transform() && !self.is_player() && !self.is_data_only()
    }

    pub fn is_alive_player(&self) -> bool {
        self.is_player() && !self.lives.is_some_and(|lives| lives.is_out())
    }

    pub fn kind(&self) -> (EntityKind, u8) {
        if self.is_player() {
            return (EntityKind::Player, 0);
        }
        tag::classify(self.tag.unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn player_is_not_replicated_by_broadcast() {
        let player = Entity::player(1, 0);
        assert!(player.has_transform());
        assert!(!player.is_replicable());
        assert_eq!(player.kind(), (EntityKind::Player, 0));
        assert_eq!(player.position, Some(player_spawn_point(0)));
    }

    #[test]
    fn data_entities_are_not_replicated() {
        assert!(!Entity::map_bounds(DEFAULT_MAP_SIZE).is_replicable());
        let mut spawner = Entity::enemy_spawner(7);
        spawner.position = Some(Vec2::ZERO);
        spawner.velocity = Some(Vec2::ZERO);
        assert!(!spawner.is_replicable());
    }

    #[test]
    fn enemies_start_still_and_ease_in() {
        let bug = Entity::enemy(tag::MONSTER_BUG, Vec2::new(1200.0, 300.0));
        assert!(bug.is_replicable());
        assert_eq!(bug.velocity, Some(Vec2::ZERO));
        assert_eq!(bug.kind(), (EntityKind::Enemy, 1));
        assert!(bug.spawn_effect.is_some());
    }

    #[test]
    fn missing_lives_counts_as_alive() {
        let mut player = Entity::player(1, 0);
        player.lives = None;
        assert!(player.is_alive_player());
        player.lives = Some(Lives::new(0));
        assert!(!player.is_alive_player());
    }

    #[test]
    fn spawner_rng_stays_in_unit_range() {
        let mut spawner = EnemySpawner::new(42);
        for _ in 0..100 {
            let value = spawner.next_unit();
            assert!((0.0..1.0).contains(&value));
        }
    }
}
