use std::time::Instant;

use glam::Vec2;

use volley::World;

use super::config::InterpolationConfig;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InterpolationStats {
    pub blended: usize,
    pub stale: usize,
}

/// One per-frame pass over every mirror with a blend target. Positions ease
/// toward the target, velocity is taken from the target as-is. Mirrors that
/// have not been updated within the stale threshold snap to the target and
/// stop.
pub fn interpolate(
    world: &mut World,
    now: Instant,
    dt: f32,
    config: &InterpolationConfig,
) -> InterpolationStats {
    let mut stats = InterpolationStats::default();

    for (_, entity) in world.iter_mut() {
        let Some(interpolation) = entity.interpolation else {
            continue;
        };
        let target = interpolation.target_position();

        if now.saturating_duration_since(interpolation.last_update_time) > config.stale_after {
            entity.position = Some(target);
            entity.velocity = Some(Vec2::ZERO);
            stats.stale += 1;
            continue;
        }

        let lerp_factor = (interpolation.interpolation_speed * dt).clamp(0.0, 1.0);
        let position = entity.position.unwrap_or(target);
        entity.position = Some(position + (target - position) * lerp_factor);
        entity.velocity = Some(interpolation.target_velocity());
        stats.blended += 1;
    }

    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use volley::Entity;
    use volley::world::{NetworkInterpolation, tag};

    fn mirror(world: &mut World, at: Vec2, target: Vec2, now: Instant) -> volley::LocalId {
        world.spawn_with(|entity| {
            *entity = Entity::mirror(tag::MONSTER_BUG, at, Vec2::ZERO);
            entity.interpolation = Some(NetworkInterpolation::new(
                target,
                Vec2::new(-120.0, 0.0),
                10.0,
                now,
            ));
        })
    }

    #[test]
    fn converges_monotonically() {
        let mut world = World::new();
        let now = Instant::now();
        let target = Vec2::new(100.0, 50.0);
        let id = mirror(&mut world, Vec2::ZERO, target, now);
        let config = InterpolationConfig::default();

        let mut last = f32::MAX;
        for _ in 0..120 {
            interpolate(&mut world, now, 1.0 / 60.0, &config);
            let distance = world.get(id).unwrap().position.unwrap().distance(target);
            assert!(distance <= last);
            last = distance;
        }
        assert!(last < 0.01);
        assert_eq!(world.get(id).unwrap().velocity, Some(Vec2::new(-120.0, 0.0)));
    }

    #[test]
    fn large_steps_do_not_overshoot() {
        let mut world = World::new();
        let now = Instant::now();
        let target = Vec2::new(10.0, 10.0);
        let id = mirror(&mut world, Vec2::ZERO, target, now);

        interpolate(&mut world, now, 5.0, &InterpolationConfig::default());
        assert_eq!(world.get(id).unwrap().position, Some(target));
    }

    #[test]
    fn stale_mirrors_snap_and_stop() {
        let mut world = World::new();
        let then = Instant::now();
        let target = Vec2::new(300.0, 200.0);
        let id = mirror(&mut world, Vec2::ZERO, target, then);

        let stats = interpolate(
            &mut world,
            then + Duration::from_millis(600),
            1.0 / 60.0,
            &InterpolationConfig::default(),
        );
        assert_eq!(stats.stale, 1);
        let entity = world.get(id).unwrap();
        assert_eq!(entity.position, Some(target));
        assert_eq!(entity.velocity, Some(Vec2::ZERO));
    }

    #[test]
    fn entities_without_target_are_untouched() {
        let mut world = World::new();
        let id = world.spawn(Entity::mirror(tag::PLAYER, Vec2::ONE, Vec2::X));
        let stats = interpolate(
            &mut world,
            Instant::now(),
            0.5,
            &InterpolationConfig::default(),
        );
        assert_eq!(stats, InterpolationStats::default());
        assert_eq!(world.get(id).unwrap().position, Some(Vec2::ONE));
    }
}
