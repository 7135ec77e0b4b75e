use std::collections::{BTreeMap, HashMap};

use glam::Vec2;

use crate::net::DestroyReason;

use super::entity::{Entity, MapBounds};
use super::ids::{LocalId, NetworkId};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KillEvent {
    /// Player id credited with the kill, 0 when nobody is.
    pub killer: u32,
    pub score_value: u32,
    pub was_boss: bool,
    pub position: Vec2,
}

/// Authoritative entity store. Entities are addressed by [`LocalId`]; the
/// subset that is replicated is also reachable by [`NetworkId`].
#[derive(Debug, Default)]
pub struct World {
    entities: BTreeMap<LocalId, Entity>,
    by_network: HashMap<NetworkId, LocalId>,
    next_local: u32,
    despawned: Vec<(NetworkId, DestroyReason)>,
    kills: Vec<KillEvent>,
}

impl World {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spawn(&mut self, entity: Entity) -> LocalId {
        self.next_local = self.next_local.wrapping_add(1);
        let id = LocalId(self.next_local);

        // a pre-set network id still has to land in the lookup table
        if let Some(network_id) = entity.network_id {
            self.by_network.insert(network_id, id);
        }
        self.entities.insert(id, entity);
        id
    }

    pub fn spawn_with(&mut self, build: impl FnOnce(&mut Entity)) -> LocalId {
        let mut entity = Entity::new();
        build(&mut entity);
        self.spawn(entity)
    }

    pub fn get(&self, id: LocalId) -> Option<&Entity> {
        self.entities.get(&id)
    }

    pub fn get_mut(&mut self, id: LocalId) -> Option<&mut Entity> {
        self.entities.get_mut(&id)
    }

    pub fn is_valid(&self, id: LocalId) -> bool {
        self.entities.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (LocalId, &Entity)> {
        self.entities.iter().map(|(&id, entity)| (id, entity))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (LocalId, &mut Entity)> {
        self.entities.iter_mut().map(|(&id, entity)| (id, entity))
    }

    /// Ids of every entity matching `filter`, collected so the caller can
    /// mutate the store while walking them.
    pub fn view(&self, filter: impl Fn(&Entity) -> bool) -> Vec<LocalId> {
        self.entities
            .iter()
            .filter(|(_, entity)| filter(entity))
            .map(|(&id, _)| id)
            .collect()
    }

    /// Removes the entity. Replicated entities leave a record so the
    /// broadcast pass can announce why they went away.
    pub fn despawn(&mut self, id: LocalId, reason: DestroyReason) -> Option<Entity> {
        let entity = self.entities.remove(&id)?;
        if let Some(network_id) = entity.network_id {
            self.by_network.remove(&network_id);
            self.despawned.push((network_id, reason));
        }
        Some(entity)
    }

    /// Removes the entity without a despawn record. For stores nobody
    /// replicates from, such as a client's mirror world.
    pub fn remove(&mut self, id: LocalId) -> Option<Entity> {
        let entity = self.entities.remove(&id)?;
        if let Some(network_id) = entity.network_id {
            self.by_network.remove(&network_id);
        }
        Some(entity)
    }

    pub fn retain(&mut self, keep: impl Fn(&Entity) -> bool, reason: DestroyReason) -> usize {
        let doomed = self.view(|entity| !keep(entity));
        for id in &doomed {
            self.despawn(*id, reason);
        }
        doomed.len()
    }

    /// Drops everything without recording despawns.
    pub fn clear(&mut self) {
        self.entities.clear();
        self.by_network.clear();
        self.despawned.clear();
        self.kills.clear();
    }

    /// Fails if the entity is gone, already has an id, or the id is taken.
    pub fn assign_network_id(&mut self, id: LocalId, network_id: NetworkId) -> bool {
        if self.by_network.contains_key(&network_id) {
            return false;
        }
        let Some(entity) = self.entities.get_mut(&id) else {
            return false;
        };
        if entity.network_id.is_some() {
            return false;
        }
        entity.network_id = Some(network_id);
        self.by_network.insert(network_id, id);
        true
    }

    pub fn by_network_id(&self, network_id: NetworkId) -> Option<LocalId> {
        self.by_network.get(&network_id).copied()
    }

    pub fn network_ids(&self) -> impl Iterator<Item = NetworkId> + '_ {
        self.by_network.keys().copied()
    }

    pub fn despawn_reason(&self, network_id: NetworkId) -> Option<DestroyReason> {
        self.despawned
            .iter()
            .rev()
            .find(|(id, _)| *id == network_id)
            .map(|&(_, reason)| reason)
    }

    pub fn drain_despawns(&mut self) -> Vec<(NetworkId, DestroyReason)> {
        std::mem::take(&mut self.despawned)
    }

    pub fn push_kill(&mut self, kill: KillEvent) {
        self.kills.push(kill);
    }

    pub fn drain_kills(&mut self) -> Vec<KillEvent> {
        std::mem::take(&mut self.kills)
    }

    pub fn find_player(&self, player_id: u32) -> Option<LocalId> {
        self.by_network_id(NetworkId(player_id)).filter(|&id| {
            self.get(id)
                .and_then(|entity| entity.player)
                .is_some_and(|player| player.player_id == player_id)
        })
    }

    pub fn map_bounds(&self) -> MapBounds {
        self.entities
            .values()
            .find_map(|entity| entity.map_bounds)
            .unwrap_or_default()
    }
}
