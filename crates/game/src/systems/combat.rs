use std::collections::HashSet;

use glam::Vec2;

use crate::net::DestroyReason;
use crate::world::{
    ENEMY_PROJECTILE_SPEED, Enemy, Entity, INVULNERABLE_SECS, KillEvent, LocalId, PROJECTILE_SPEED,
    Team, Weapon, World, tag,
};

use super::{PICKUP_EVERY_KILLS, StageState};

const MUZZLE_OFFSET: f32 = 20.0;
const SPREAD: f32 = 0.2;
const MAX_POWER: u8 = 3;
const MIN_FIRE_INTERVAL: f32 = 0.08;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Body {
    Player,
    Enemy,
    Projectile { owner: u32, damage: i32 },
    Obstacle,
    Pickup,
}

#[derive(Debug, Clone, Copy)]
struct Collidable {
    id: LocalId,
    position: Vec2,
    radius: f32,
    team: Team,
    body: Body,
}

fn collidable(id: LocalId, entity: &Entity) -> Option<Collidable> {
    let collider = entity.collider?;
    let position = entity.position?;

    let body = if entity.is_player() {
        if !entity.is_alive_player() {
            return None;
        }
        Body::Player
    } else if let Some(projectile) = entity.projectile {
        Body::Projectile {
            owner: projectile.owner,
            damage: projectile.damage,
        }
    } else if entity.enemy.is_some() {
        Body::Enemy
    } else if entity.tag == Some(tag::PICKUP_POWER) {
        Body::Pickup
    } else {
        Body::Obstacle
    };

    Some(Collidable {
        id,
        position,
        radius: collider.radius,
        team: collider.team,
        body,
    })
}

/// Circle overlap between every pair of colliders. Each entity takes part
/// in at most one consuming contact per tick.
pub fn collision_system(world: &mut World, stage: &mut StageState, _dt: f32) {
    let bodies: Vec<Collidable> = world
        .iter()
        .filter_map(|(id, entity)| collidable(id, entity))
        .collect();
    let mut consumed = HashSet::new();

    for (i, a) in bodies.iter().enumerate() {
        for b in &bodies[i + 1..] {
            if consumed.contains(&a.id) || consumed.contains(&b.id) {
                continue;
            }
            if a.position.distance(b.position) >= a.radius + b.radius {
                continue;
            }
            if !resolve(world, stage, a, b, &mut consumed) {
                resolve(world, stage, b, a, &mut consumed);
            }
        }
    }
}

fn resolve(
    world: &mut World,
    stage: &mut StageState,
    a: &Collidable,
    b: &Collidable,
    consumed: &mut HashSet<LocalId>,
) -> bool {
    match (a.body, b.body) {
        (Body::Projectile { owner, damage }, Body::Enemy) if a.team == Team::Players => {
            consume(world, a.id, consumed);
            damage_enemy(world, stage, b, owner, damage, consumed);
        }
        (Body::Projectile { .. }, Body::Player) if a.team == Team::Enemies => {
            consume(world, a.id, consumed);
            hit_player(world, b.id);
        }
        (Body::Projectile { .. }, Body::Obstacle) => {
            consume(world, a.id, consumed);
        }
        (Body::Enemy | Body::Obstacle, Body::Player) => {
            hit_player(world, b.id);
        }
        (Body::Pickup, Body::Player) => {
            consumed.insert(a.id);
            world.despawn(a.id, DestroyReason::Collected);
            power_up(world, b.id);
        }
        _ => return false,
    }
    true
}

fn consume(world: &mut World, id: LocalId, consumed: &mut HashSet<LocalId>) {
    consumed.insert(id);
    world.despawn(id, DestroyReason::Killed);
}

fn damage_enemy(
    world: &mut World,
    stage: &mut StageState,
    target: &Collidable,
    killer: u32,
    damage: i32,
    consumed: &mut HashSet<LocalId>,
) {
    let Some(entity) = world.get_mut(target.id) else {
        return;
    };
    let Some(health) = entity.health.as_mut() else {
        return;
    };
    health.current -= damage;
    if health.current > 0 {
        return;
    }

    let enemy = entity.enemy.unwrap_or(Enemy {
        score_value: 0,
        wraps: false,
        is_boss: false,
    });
    consumed.insert(target.id);
    world.despawn(target.id, DestroyReason::Killed);
    stage.kills += 1;
    world.push_kill(KillEvent {
        killer,
        score_value: enemy.score_value,
        was_boss: enemy.is_boss,
        position: target.position,
    });

    if !enemy.is_boss && stage.kills % PICKUP_EVERY_KILLS == 0 {
        world.spawn(Entity::pickup(target.position));
    }
}

fn hit_player(world: &mut World, id: LocalId) {
    if let Some(lives) = world.get_mut(id).and_then(|entity| entity.lives.as_mut()) {
        if lives.invulnerable_for <= 0.0 && !lives.is_out() {
            lives.hit_pending = true;
        }
    }
}

fn power_up(world: &mut World, id: LocalId) {
    if let Some(weapon) = world.get_mut(id).and_then(|entity| entity.weapon.as_mut()) {
        weapon.power = (weapon.power + 1).min(MAX_POWER);
        weapon.fire_interval = (weapon.fire_interval * 0.8).max(MIN_FIRE_INTERVAL);
    }
}

/// Applies pending hits. A player with lives left respawns at its slot
/// with fresh invulnerability; one without stays put, disarmed.
pub fn lives_system(world: &mut World, _stage: &mut StageState, dt: f32) {
    for (_, entity) in world.iter_mut() {
        let (Some(player), Some(lives)) = (entity.player, entity.lives.as_mut()) else {
            continue;
        };
        lives.invulnerable_for = (lives.invulnerable_for - dt).max(0.0);

        if lives.hit_pending {
            lives.hit_pending = false;
            if !lives.is_out() {
                lives.remaining -= 1;
                lives.invulnerable_for = INVULNERABLE_SECS;
                if !lives.is_out() {
                    entity.position = Some(player.spawn_point);
                }
            }
        }

        if entity.lives.is_some_and(|lives| lives.is_out()) {
            entity.velocity = Some(Vec2::ZERO);
            if let Some(weapon) = entity.weapon.as_mut() {
                weapon.is_shooting = false;
                weapon.charge_level = 0;
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Shooter {
    Player(u32),
    Enemy,
}

fn shooter_of(world: &World, entity: &Entity) -> Shooter {
    if let Some(player) = entity.player {
        return Shooter::Player(player.player_id);
    }
    if let Some(companion) = entity.companion {
        let owner = world
            .get(companion.leader)
            .and_then(|leader| leader.player)
            .map_or(0, |player| player.player_id);
        return Shooter::Player(owner);
    }
    Shooter::Enemy
}

fn volley(shooter: Shooter, position: Vec2, weapon: &mut Weapon) -> Vec<Entity> {
    match shooter {
        Shooter::Player(owner) => {
            let muzzle = position + Vec2::new(MUZZLE_OFFSET, 0.0);
            let forward = Vec2::new(PROJECTILE_SPEED, 0.0);

            if weapon.charge_level > 0 {
                let damage = 1 + i32::from(weapon.charge_level);
                weapon.charge_level = 0;
                return vec![Entity::projectile(
                    tag::PROJECTILE_CHARGED,
                    owner,
                    Team::Players,
                    muzzle,
                    forward,
                    damage,
                )];
            }

            let mut shots = vec![Entity::projectile(
                tag::PROJECTILE_BASIC,
                owner,
                Team::Players,
                muzzle,
                forward,
                1,
            )];
            if weapon.power > 0 {
                for dir in [-1.0, 1.0] {
                    let velocity = forward + Vec2::new(0.0, dir * PROJECTILE_SPEED * SPREAD);
                    shots.push(Entity::projectile(
                        tag::PROJECTILE_BASIC,
                        owner,
                        Team::Players,
                        muzzle,
                        velocity,
                        1,
                    ));
                }
            }
            shots
        }
        Shooter::Enemy => vec![Entity::projectile(
            tag::PROJECTILE_ENEMY,
            0,
            Team::Enemies,
            position - Vec2::new(MUZZLE_OFFSET, 0.0),
            Vec2::new(-ENEMY_PROJECTILE_SPEED, 0.0),
            1,
        )],
    }
}

/// Spawns projectiles for every weapon that is firing and off cooldown.
pub fn weapon_system(world: &mut World, _stage: &mut StageState, dt: f32) {
    let mut shots = Vec::new();

    for id in world.view(|entity| entity.weapon.is_some() && entity.position.is_some()) {
        let Some(entity) = world.get(id) else {
            continue;
        };
        let (Some(mut weapon), Some(position)) = (entity.weapon, entity.position) else {
            continue;
        };

        weapon.cooldown = (weapon.cooldown - dt).max(0.0);
        let armed = !entity.is_player() || entity.is_alive_player();
        let warming_up = entity.spawn_effect.is_some();
        let trigger = weapon.auto_fire || weapon.is_shooting;

        if armed && !warming_up && trigger && weapon.cooldown <= 0.0 {
            let shooter = shooter_of(world, entity);
            shots.extend(volley(shooter, position, &mut weapon));
            weapon.cooldown = weapon.fire_interval;
        }

        if let Some(entity) = world.get_mut(id) {
            entity.weapon = Some(weapon);
        }
    }

    for shot in shots {
        world.spawn(shot);
    }
}

pub fn projectile_expiry_system(world: &mut World, _stage: &mut StageState, dt: f32) {
    let mut expired = Vec::new();
    for (id, entity) in world.iter_mut() {
        if let Some(projectile) = entity.projectile.as_mut() {
            projectile.lifetime -= dt;
            if projectile.lifetime <= 0.0 {
                expired.push(id);
            }
        }
    }
    for id in expired {
        world.despawn(id, DestroyReason::Timeout);
    }
}

/// Credits kills to the owning player. A boss kill clears the stage and
/// pays the clear bonus to every player.
pub fn scoring_system(world: &mut World, stage: &mut StageState, _dt: f32) {
    for kill in world.drain_kills() {
        if kill.killer != 0 {
            if let Some(id) = world.find_player(kill.killer) {
                add_score(world, id, kill.score_value);
            }
        }

        if kill.was_boss {
            let cleared_stage = stage.stage;
            let bonus = stage.clear_stage();
            for id in world.view(Entity::is_player) {
                add_score(world, id, bonus);
            }
            log::info!("Stage {} cleared, bonus {}", cleared_stage, bonus);
        }
    }
}

fn add_score(world: &mut World, id: LocalId, amount: u32) {
    if let Some(score) = world.get_mut(id).and_then(|entity| entity.score.as_mut()) {
        *score = score.saturating_add(amount);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::{NetworkId, STARTING_LIVES};

    fn spawn_player(world: &mut World, player_id: u32) -> LocalId {
        let id = world.spawn(Entity::player(player_id, 0));
        world.assign_network_id(id, NetworkId(player_id));
        if let Some(lives) = world.get_mut(id).and_then(|e| e.lives.as_mut()) {
            lives.invulnerable_for = 0.0;
        }
        id
    }

    fn player_shot(owner: u32, position: Vec2) -> Entity {
        Entity::projectile(
            tag::PROJECTILE_BASIC,
            owner,
            Team::Players,
            position,
            Vec2::ZERO,
            1,
        )
    }

    #[test]
    fn player_shot_kills_enemy_and_scores() {
        let mut world = World::new();
        let mut stage = StageState::new();
        let player = spawn_player(&mut world, 1);
        let bug = world.spawn(Entity::enemy(tag::MONSTER_BUG, Vec2::new(500.0, 300.0)));
        let shot = world.spawn(player_shot(1, Vec2::new(505.0, 300.0)));

        collision_system(&mut world, &mut stage, 0.016);
        assert!(!world.is_valid(bug));
        assert!(!world.is_valid(shot));
        assert_eq!(stage.kills, 1);

        scoring_system(&mut world, &mut stage, 0.016);
        assert_eq!(world.get(player).unwrap().score, Some(100));
    }

    #[test]
    fn tough_enemy_survives_one_hit() {
        let mut world = World::new();
        let mut stage = StageState::new();
        let crawler = world.spawn(Entity::enemy(tag::MONSTER_CRAWLER, Vec2::new(500.0, 300.0)));
        world.spawn(player_shot(1, Vec2::new(500.0, 300.0)));

        collision_system(&mut world, &mut stage, 0.016);
        let health = world.get(crawler).unwrap().health.unwrap();
        assert_eq!(health.current, health.max - 1);
        assert_eq!(stage.kills, 0);
    }

    #[test]
    fn enemy_fire_costs_a_life_and_respawns() {
        let mut world = World::new();
        let mut stage = StageState::new();
        let player = spawn_player(&mut world, 1);
        let spawn_point = world.get(player).unwrap().player.unwrap().spawn_point;
        world.get_mut(player).unwrap().position = Some(Vec2::new(400.0, 400.0));
        world.spawn(Entity::projectile(
            tag::PROJECTILE_ENEMY,
            0,
            Team::Enemies,
            Vec2::new(400.0, 400.0),
            Vec2::ZERO,
            1,
        ));

        collision_system(&mut world, &mut stage, 0.016);
        lives_system(&mut world, &mut stage, 0.016);

        let entity = world.get(player).unwrap();
        let lives = entity.lives.unwrap();
        assert_eq!(lives.remaining, STARTING_LIVES - 1);
        assert!(lives.invulnerable_for > 0.0);
        assert_eq!(entity.position, Some(spawn_point));
    }

    #[test]
    fn invulnerable_player_ignores_contact() {
        let mut world = World::new();
        let mut stage = StageState::new();
        let player = world.spawn(Entity::player(1, 0));
        let position = world.get(player).unwrap().position.unwrap();
        world.spawn(Entity::obstacle(tag::OBSTACLE_WALL, position, Vec2::ZERO));

        collision_system(&mut world, &mut stage, 0.016);
        lives_system(&mut world, &mut stage, 0.016);
        assert_eq!(
            world.get(player).unwrap().lives.unwrap().remaining,
            STARTING_LIVES
        );
    }

    #[test]
    fn out_of_lives_player_is_frozen() {
        let mut world = World::new();
        let mut stage = StageState::new();
        let player = spawn_player(&mut world, 1);
        {
            let entity = world.get_mut(player).unwrap();
            entity.lives.as_mut().unwrap().remaining = 1;
            entity.lives.as_mut().unwrap().hit_pending = true;
            entity.velocity = Some(Vec2::new(50.0, 0.0));
        }

        lives_system(&mut world, &mut stage, 0.016);
        let entity = world.get(player).unwrap();
        assert!(!entity.is_alive_player());
        assert_eq!(entity.velocity, Some(Vec2::ZERO));
    }

    #[test]
    fn pickup_is_collected_and_powers_up() {
        let mut world = World::new();
        let mut stage = StageState::new();
        let player = spawn_player(&mut world, 1);
        let position = world.get(player).unwrap().position.unwrap();
        let pickup = world.spawn(Entity::pickup(position));
        world.assign_network_id(pickup, NetworkId(20_000));

        collision_system(&mut world, &mut stage, 0.016);
        assert!(!world.is_valid(pickup));
        assert_eq!(
            world.despawn_reason(NetworkId(20_000)),
            Some(DestroyReason::Collected)
        );
        assert_eq!(world.get(player).unwrap().weapon.unwrap().power, 1);
    }

    #[test]
    fn weapon_respects_cooldown() {
        let mut world = World::new();
        let mut stage = StageState::new();
        let player = spawn_player(&mut world, 1);
        world.get_mut(player).unwrap().weapon.as_mut().unwrap().is_shooting = true;

        weapon_system(&mut world, &mut stage, 0.016);
        weapon_system(&mut world, &mut stage, 0.016);
        let shots = world.view(|e| e.projectile.is_some());
        assert_eq!(shots.len(), 1);

        let projectile = world.get(shots[0]).unwrap();
        assert_eq!(projectile.tag, Some(tag::PROJECTILE_BASIC));
        assert_eq!(projectile.projectile.unwrap().owner, 1);
        assert!(projectile.velocity.unwrap().x > 0.0);
    }

    #[test]
    fn charged_shot_consumes_charge() {
        let mut world = World::new();
        let mut stage = StageState::new();
        let player = spawn_player(&mut world, 1);
        {
            let weapon = world.get_mut(player).unwrap().weapon.as_mut().unwrap();
            weapon.is_shooting = true;
            weapon.charge_level = 3;
        }

        weapon_system(&mut world, &mut stage, 0.016);
        let shots = world.view(|e| e.projectile.is_some());
        let projectile = world.get(shots[0]).unwrap();
        assert_eq!(projectile.tag, Some(tag::PROJECTILE_CHARGED));
        assert_eq!(projectile.projectile.unwrap().damage, 4);
        assert_eq!(world.get(player).unwrap().weapon.unwrap().charge_level, 0);
    }

    #[test]
    fn projectiles_expire_with_timeout() {
        let mut world = World::new();
        let mut stage = StageState::new();
        let shot = world.spawn(player_shot(1, Vec2::ZERO));
        world.assign_network_id(shot, NetworkId(20_001));

        projectile_expiry_system(&mut world, &mut stage, 1.0);
        assert!(world.is_valid(shot));
        projectile_expiry_system(&mut world, &mut stage, 2.0);
        assert!(!world.is_valid(shot));
        assert_eq!(
            world.despawn_reason(NetworkId(20_001)),
            Some(DestroyReason::Timeout)
        );
    }

    #[test]
    fn boss_kill_clears_stage() {
        let mut world = World::new();
        let mut stage = StageState::new();
        stage.boss_spawned = true;
        let player = spawn_player(&mut world, 1);
        world.push_kill(KillEvent {
            killer: 1,
            score_value: 5000,
            was_boss: true,
            position: Vec2::ZERO,
        });

        scoring_system(&mut world, &mut stage, 0.016);
        assert_eq!(stage.stage, 2);
        assert!(stage.take_cleared().is_some());
        assert_eq!(world.get(player).unwrap().score, Some(5000 + 1000));
    }
}
