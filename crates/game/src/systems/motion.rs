use glam::Vec2;

use crate::net::DestroyReason;
use crate::world::World;

use super::StageState;

/// How far past the map edge an entity may drift before it is removed.
pub const OUT_OF_BOUNDS_MARGIN: f32 = 64.0;
const BOSS_EDGE_PADDING: f32 = 64.0;
const BOSS_HOLD_DISTANCE: f32 = 250.0;

pub fn movement_system(world: &mut World, _stage: &mut StageState, dt: f32) {
    for (_, entity) in world.iter_mut() {
        if entity.companion.is_some() {
            continue;
        }
        if let (Some(position), Some(velocity)) = (entity.position.as_mut(), entity.velocity) {
            *position += velocity * dt;
        }
    }
}

/// Wrapping mobs reappear on the far side; everything else that is an enemy
/// bounces off the top and bottom edges. The boss holds position on the
/// right side of the map.
pub fn mob_wrap_system(world: &mut World, _stage: &mut StageState, _dt: f32) {
    let bounds = world.map_bounds();

    for (_, entity) in world.iter_mut() {
        let Some(enemy) = entity.enemy else {
            continue;
        };
        let (Some(position), Some(velocity)) = (entity.position.as_mut(), entity.velocity.as_mut())
        else {
            continue;
        };

        if enemy.is_boss {
            if position.x <= bounds.max.x - BOSS_HOLD_DISTANCE {
                velocity.x = 0.0;
            }
            if position.y <= bounds.min.y + BOSS_EDGE_PADDING {
                velocity.y = velocity.y.abs();
            } else if position.y >= bounds.max.y - BOSS_EDGE_PADDING {
                velocity.y = -velocity.y.abs();
            }
            continue;
        }

        if enemy.wraps {
            if position.x < bounds.min.x {
                position.x = bounds.max.x;
            }
            if position.y < bounds.min.y {
                position.y = bounds.max.y;
            } else if position.y > bounds.max.y {
                position.y = bounds.min.y;
            }
        } else if position.y <= bounds.min.y || position.y >= bounds.max.y {
            position.y = position.y.clamp(bounds.min.y, bounds.max.y);
            velocity.y = -velocity.y;
        }
    }
}

/// Players are clamped to the map. Anything else that leaves the padded
/// map is removed.
pub fn boundary_system(world: &mut World, _stage: &mut StageState, _dt: f32) {
    let bounds = world.map_bounds();

    let escaped = world.view(|entity| {
        if entity.is_player() || entity.companion.is_some() {
            return false;
        }
        if entity.enemy.is_some_and(|enemy| enemy.is_boss) {
            return false;
        }
        entity.has_transform()
            && entity
                .position
                .is_some_and(|position| !bounds.contains(position, OUT_OF_BOUNDS_MARGIN))
    });
    for id in escaped {
        world.despawn(id, DestroyReason::OutOfBounds);
    }

    for (_, entity) in world.iter_mut() {
        if !entity.is_player() {
            continue;
        }
        if let Some(position) = entity.position.as_mut() {
            *position = bounds.clamp(*position);
        }
    }
}

/// Companions sit at a fixed offset from their leader and mirror its
/// firing. They go down with the leader.
pub fn companion_system(world: &mut World, _stage: &mut StageState, _dt: f32) {
    for id in world.view(|entity| entity.companion.is_some()) {
        let Some(companion) = world.get(id).and_then(|entity| entity.companion) else {
            continue;
        };
        let Some(leader) = world.get(companion.leader) else {
            world.despawn(id, DestroyReason::Killed);
            continue;
        };

        let leader_position = leader.position.unwrap_or_default();
        let leader_velocity = leader.velocity.unwrap_or_default();
        let leader_alive = leader.is_alive_player() || !leader.is_player();
        let leader_shooting =
            leader_alive && leader.weapon.is_some_and(|weapon| weapon.is_shooting);

        if let Some(entity) = world.get_mut(id) {
            entity.position = Some(leader_position + companion.offset);
            entity.velocity = Some(leader_velocity);
            if let Some(weapon) = entity.weapon.as_mut() {
                weapon.is_shooting = leader_shooting;
            }
        }
    }
}

/// Freshly spawned entities ramp up to their cruise velocity.
pub fn spawn_effect_system(world: &mut World, _stage: &mut StageState, dt: f32) {
    for (_, entity) in world.iter_mut() {
        let Some(effect) = entity.spawn_effect.as_mut() else {
            continue;
        };
        effect.elapsed += dt;
        let t = if effect.duration > 0.0 {
            (effect.elapsed / effect.duration).min(1.0)
        } else {
            1.0
        };
        let target = effect.target_velocity;

        if t >= 1.0 {
            entity.velocity = Some(target);
            entity.spawn_effect = None;
        } else {
            entity.velocity = Some(target * smoothstep(t));
        }
    }
}

fn smoothstep(t: f32) -> f32 {
    t * t * (3.0 - 2.0 * t)
}
