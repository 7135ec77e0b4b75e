use crate::net::EntityKind;

pub const PLAYER: &str = "Player";
pub const MONSTER_BUG: &str = "Monster_Bug";
pub const MONSTER_DRONE: &str = "Monster_Drone";
pub const MONSTER_CRAWLER: &str = "Monster_Crawler";
pub const BOSS_DREADNOUGHT: &str = "Boss_Dreadnought";
pub const PROJECTILE_BASIC: &str = "Projectile_Basic";
pub const PROJECTILE_CHARGED: &str = "Projectile_Charged";
pub const PROJECTILE_ENEMY: &str = "Projectile_Enemy";
pub const OBSTACLE_ASTEROID: &str = "Obstacle_Asteroid";
pub const OBSTACLE_WALL: &str = "Obstacle_Wall";
pub const COMPANION_POD: &str = "Companion_Pod";
pub const PICKUP_POWER: &str = "Pickup_Power";

const EXACT: &[(&str, EntityKind, u8)] = &[
    (MONSTER_BUG, EntityKind::Enemy, 1),
    (MONSTER_DRONE, EntityKind::Enemy, 2),
    (MONSTER_CRAWLER, EntityKind::Enemy, 3),
    (BOSS_DREADNOUGHT, EntityKind::Boss, 1),
    (PROJECTILE_BASIC, EntityKind::Projectile, 1),
    (PROJECTILE_CHARGED, EntityKind::Projectile, 2),
    (PROJECTILE_ENEMY, EntityKind::Projectile, 3),
    (OBSTACLE_ASTEROID, EntityKind::Obstacle, 1),
    (OBSTACLE_WALL, EntityKind::Obstacle, 2),
    (COMPANION_POD, EntityKind::Companion, 1),
    (PICKUP_POWER, EntityKind::Pickup, 1),
];

const PREFIXES: &[(&str, EntityKind)] = &[
    ("Monster_", EntityKind::Enemy),
    ("Boss_", EntityKind::Boss),
    ("Projectile_", EntityKind::Projectile),
    ("Obstacle_", EntityKind::Obstacle),
];

/// Wire `(entity_type, sub_type)` for a tag.
pub fn classify(tag: &str) -> (EntityKind, u8) {
    if let Some(&(_, kind, sub_type)) = EXACT.iter().find(|(name, _, _)| *name == tag) {
        return (kind, sub_type);
    }
    if tag == PLAYER {
        return (EntityKind::Player, 0);
    }
    PREFIXES
        .iter()
        .find(|(prefix, _)| tag.starts_with(prefix))
        .map(|&(_, kind)| (kind, 0))
        .unwrap_or((EntityKind::Obstacle, 0))
}

/// Inverse of [`classify`] for mirrors built from spawn packets. Unknown
/// pairs fall back to the first tag of the kind.
pub fn tag_for(kind: EntityKind, sub_type: u8) -> &'static str {
    if kind == EntityKind::Player {
        return PLAYER;
    }
    EXACT
        .iter()
        .find(|(_, k, s)| *k == kind && *s == sub_type)
        .or_else(|| EXACT.iter().find(|(_, k, _)| *k == kind))
        .map(|&(name, _, _)| name)
        .unwrap_or(OBSTACLE_ASTEROID)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_names_map_to_sub_types() {
        assert_eq!(classify(MONSTER_DRONE), (EntityKind::Enemy, 2));
        assert_eq!(classify(BOSS_DREADNOUGHT), (EntityKind::Boss, 1));
        assert_eq!(classify(PROJECTILE_ENEMY), (EntityKind::Projectile, 3));
        assert_eq!(classify(OBSTACLE_WALL), (EntityKind::Obstacle, 2));
        assert_eq!(classify(COMPANION_POD), (EntityKind::Companion, 1));
        assert_eq!(classify(PICKUP_POWER), (EntityKind::Pickup, 1));
    }

    #[test]
    fn prefix_fallback_uses_sub_type_zero() {
        assert_eq!(classify("Monster_Unknown"), (EntityKind::Enemy, 0));
        assert_eq!(classify("Boss_Hydra"), (EntityKind::Boss, 0));
        assert_eq!(classify("Projectile_Laser"), (EntityKind::Projectile, 0));
        assert_eq!(classify("Something"), (EntityKind::Obstacle, 0));
        // prefix match is case sensitive
        assert_eq!(classify("monster_bug"), (EntityKind::Obstacle, 0));
    }

    #[test]
    fn tag_for_inverts_exact_entries() {
        for &(name, kind, sub_type) in EXACT {
            assert_eq!(tag_for(kind, sub_type), name);
        }
        assert_eq!(tag_for(EntityKind::Enemy, 9), MONSTER_BUG);
        assert_eq!(tag_for(EntityKind::Player, 0), PLAYER);
    }
}
