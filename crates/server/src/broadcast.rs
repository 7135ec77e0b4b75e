use std::collections::HashSet;

use volley::net::{
    DestroyReason, EntityDestroyData, EntityMoveData, EntitySpawnData, GameStateData,
    GameStateFlags, PlayerMoveData,
};
use volley::world::{Entity, LocalId, NetworkId, NetworkIdAllocator, World};
use volley::StageState;

/// Everything one broadcast pass wants on the wire, in send order.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ReplicationFrame {
    pub destroys: Vec<EntityDestroyData>,
    pub spawns: Vec<EntitySpawnData>,
    pub player_moves: Vec<PlayerMoveData>,
    pub entity_moves: Vec<EntityMoveData>,
}

impl ReplicationFrame {
    pub fn len(&self) -> usize {
        self.destroys.len() + self.spawns.len() + self.player_moves.len() + self.entity_moves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Diffs entity existence between passes. Non-player entities get a
/// broadcast id the first time they have a transform and are announced
/// exactly once; ids that vanish are announced as destroyed on the next
/// pass. `known` only ever holds ids that are live in the world, and the
/// allocator never hands an id out twice.
#[derive(Debug)]
pub struct BroadcastSystem {
    ids: NetworkIdAllocator,
    known: HashSet<NetworkId>,
}

impl Default for BroadcastSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl BroadcastSystem {
    pub fn new() -> Self {
        Self {
            ids: NetworkIdAllocator::broadcast(),
            known: HashSet::new(),
        }
    }

    pub fn replicate(&mut self, world: &mut World) -> ReplicationFrame {
        let mut frame = ReplicationFrame::default();

        let vanished: Vec<NetworkId> = self
            .known
            .iter()
            .copied()
            .filter(|&network_id| world.by_network_id(network_id).is_none())
            .collect();
        for network_id in vanished {
            self.known.remove(&network_id);
            frame.destroys.push(EntityDestroyData {
                entity_id: network_id.raw(),
                reason: world.despawn_reason(network_id).unwrap_or_default(),
            });
        }
        world.drain_despawns();

        for id in world.view(|entity| entity.is_replicable() && entity.network_id().is_none()) {
            let network_id = self.next_free_id(world);
            world.assign_network_id(id, network_id);
        }

        for (_, entity) in world.iter() {
            let Some(network_id) = entity.network_id() else {
                continue;
            };
            let (Some(position), Some(velocity)) = (entity.position, entity.velocity) else {
                continue;
            };

            if entity.is_player() {
                frame.player_moves.push(PlayerMoveData {
                    player_id: network_id.raw(),
                    x: position.x,
                    y: position.y,
                    vx: velocity.x,
                    vy: velocity.y,
                });
                continue;
            }
            if !entity.is_replicable() {
                continue;
            }

            if self.known.insert(network_id) {
                frame.spawns.push(spawn_data(network_id, entity));
            }
            frame.entity_moves.push(EntityMoveData {
                entity_id: network_id.raw(),
                x: position.x,
                y: position.y,
                vx: velocity.x,
                vy: velocity.y,
            });
        }

        frame
    }

    /// One spawn per live tracked entity, for a client that just joined.
    pub fn initial_sync(&self, world: &World) -> Vec<EntitySpawnData> {
        world
            .iter()
            .filter_map(|(_, entity)| {
                let network_id = entity.network_id()?;
                (entity.is_replicable() && self.known.contains(&network_id))
                    .then(|| spawn_data(network_id, entity))
            })
            .collect()
    }

    pub fn state_for(
        &self,
        world: &World,
        player: Option<LocalId>,
        stage: &StageState,
        game_over: bool,
        stage_cleared: bool,
    ) -> GameStateData {
        let entity = player.and_then(|id| world.get(id));
        let score = entity.and_then(|e| e.score).unwrap_or(0);
        let lives = entity
            .and_then(|e| e.lives)
            .map_or(0, |lives| lives.remaining.clamp(0, i32::from(u8::MAX)) as u8);

        let mut flags = GameStateFlags::empty();
        flags.set(GameStateFlags::BOSS_WARNING, stage.boss_warning);
        flags.set(GameStateFlags::GAME_OVER, game_over);
        flags.set(GameStateFlags::STAGE_CLEARED, stage_cleared);

        GameStateData {
            score,
            lives,
            wave_number: stage.wave,
            flags,
        }
    }

    fn next_free_id(&mut self, world: &World) -> NetworkId {
        loop {
            let candidate = self.ids.allocate();
            if world.by_network_id(candidate).is_none() {
                return candidate;
            }
        }
    }
}

fn spawn_data(network_id: NetworkId, entity: &Entity) -> EntitySpawnData {
    let (entity_type, sub_type) = entity.kind();
    let position = entity.position.unwrap_or_default();
    let velocity = entity.velocity.unwrap_or_default();
    EntitySpawnData {
        entity_id: network_id.raw(),
        entity_type,
        sub_type,
        x: position.x,
        y: position.y,
        vx: velocity.x,
        vy: velocity.y,
    }
}
