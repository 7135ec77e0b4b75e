mod entity;
mod ids;
mod store;
pub mod tag;

pub use entity::{
    Collider, Companion, DEFAULT_MAP_SIZE, ENEMY_PROJECTILE_SPEED, Enemy, EnemySpawner, Entity,
    Health, INVULNERABLE_SECS, Lives, MapBounds, NetworkInterpolation, PLAYER_FIRE_INTERVAL,
    PLAYER_RADIUS, PROJECTILE_LIFETIME, PROJECTILE_SPEED, Player, Projectile, SPAWN_EFFECT_SECS,
    STARTING_LIVES, SpawnEffect, Team, Weapon, player_spawn_point,
};
pub use ids::{LocalId, NetworkId, NetworkIdAllocator};
pub use store::{KillEvent, World};
