use glam::Vec2;

use crate::world::{Entity, MapBounds, World, tag};

use super::StageState;

const SPAWN_INSET: f32 = 20.0;
const SPAWN_VERTICAL_MARGIN: f32 = 40.0;
const BOSS_INSET: f32 = 120.0;
const OBSTACLE_DRIFT: f32 = -20.0;

const WAVE_ROSTER: [&str; 3] = [tag::MONSTER_BUG, tag::MONSTER_DRONE, tag::MONSTER_CRAWLER];

/// Drives enemy waves from every `EnemySpawner`. The boss wave spawns the
/// boss once and pauses the spawner until the stage is cleared.
pub fn spawner_system(world: &mut World, stage: &mut StageState, dt: f32) {
    let bounds = world.map_bounds();

    for id in world.view(|entity| entity.spawner.is_some()) {
        if stage.boss_spawned {
            break;
        }
        let Some(mut spawner) = world.get(id).and_then(|entity| entity.spawner) else {
            continue;
        };

        spawner.timer -= dt;
        let mut spawned = None;
        if spawner.timer <= 0.0 {
            spawner.timer = spawner.interval;

            if stage.is_boss_wave() {
                let center_y = (bounds.min.y + bounds.max.y) * 0.5;
                let center = Vec2::new(bounds.max.x - BOSS_INSET, center_y);
                spawned = Some(Entity::boss(center));
                stage.boss_spawned = true;
                log::info!("Boss wave reached on stage {}", stage.stage);
            } else {
                let height = bounds.size().y - SPAWN_VERTICAL_MARGIN * 2.0;
                let y = bounds.min.y
                    + SPAWN_VERTICAL_MARGIN
                    + spawner.next_unit() * height.max(0.0);
                let roster = (usize::from(stage.wave) + usize::from(spawner.spawned_in_wave))
                    % WAVE_ROSTER.len();
                spawned = Some(Entity::enemy(
                    WAVE_ROSTER[roster],
                    Vec2::new(bounds.max.x - SPAWN_INSET, y),
                ));

                spawner.spawned_in_wave += 1;
                if spawner.spawned_in_wave >= spawner.wave_size {
                    spawner.spawned_in_wave = 0;
                    stage.advance_wave();
                }
            }
        }

        if let Some(entity) = world.get_mut(id) {
            entity.spawner = Some(spawner);
        }
        if let Some(entity) = spawned {
            world.spawn(entity);
        }
    }
}

/// Static layout for a stage: drifting asteroids and one wall, laid out
/// across the right half of the map.
pub fn stage_obstacles(stage: u32, bounds: &MapBounds) -> Vec<Entity> {
    let size = bounds.size();
    let count = 2 + (stage as usize).min(4);
    let drift = Vec2::new(OBSTACLE_DRIFT * stage.min(4) as f32, 0.0);

    let mut obstacles: Vec<Entity> = (0..count)
        .map(|i| {
            let t = (i as f32 + 1.0) / (count as f32 + 1.0);
            let position = Vec2::new(
                bounds.min.x + size.x * (0.5 + 0.5 * t),
                bounds.min.y + size.y * if i % 2 == 0 { 0.25 } else { 0.75 },
            );
            Entity::obstacle(tag::OBSTACLE_ASTEROID, position, drift)
        })
        .collect();

    obstacles.push(Entity::obstacle(
        tag::OBSTACLE_WALL,
        Vec2::new(bounds.max.x, bounds.min.y + size.y * 0.5),
        drift,
    ));
    obstacles
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::systems::WAVES_PER_STAGE;
    use crate::world::DEFAULT_MAP_SIZE;

    fn spawner_world() -> World {
        let mut world = World::new();
        world.spawn(Entity::map_bounds(DEFAULT_MAP_SIZE));
        world.spawn(Entity::enemy_spawner(1234));
        world
    }

    fn enemy_count(world: &World) -> usize {
        world.view(|e| e.enemy.is_some()).len()
    }

    #[test]
    fn spawns_enemies_inside_the_map() {
        let mut world = spawner_world();
        let mut stage = StageState::new();

        for _ in 0..300 {
            spawner_system(&mut world, &mut stage, 1.0 / 60.0);
        }

        assert!(enemy_count(&world) > 0);
        let bounds = world.map_bounds();
        for (_, entity) in world.iter() {
            if entity.enemy.is_some() {
                assert!(bounds.contains(entity.position.unwrap(), 0.0));
            }
        }
    }

    #[test]
    fn boss_spawns_once_on_boss_wave() {
        let mut world = spawner_world();
        let mut stage = StageState::new();
        stage.wave = WAVES_PER_STAGE;

        for _ in 0..600 {
            spawner_system(&mut world, &mut stage, 1.0 / 60.0);
        }

        assert!(stage.boss_spawned);
        let bosses = world.view(|e| e.enemy.is_some_and(|enemy| enemy.is_boss));
        assert_eq!(bosses.len(), 1);
        assert_eq!(enemy_count(&world), 1);
    }

    #[test]
    fn waves_advance_after_wave_size_spawns() {
        let mut world = spawner_world();
        let mut stage = StageState::new();

        // each iteration forces one spawn
        for _ in 0..6 {
            spawner_system(&mut world, &mut stage, 10.0);
        }
        assert_eq!(stage.wave, 2);
        assert_eq!(enemy_count(&world), 6);
    }

    #[test]
    fn stage_layout_grows_with_stage() {
        let bounds = MapBounds::default();
        let first = stage_obstacles(1, &bounds);
        let third = stage_obstacles(3, &bounds);
        assert!(third.len() > first.len());
        assert!(first.iter().all(Entity::is_replicable));
        assert!(first.iter().any(|e| e.tag == Some(tag::OBSTACLE_WALL)));
    }
}
