use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use glam::Vec2;

use volley::net::{
    ChatMessageData, EntityDestroyData, EntityMoveData, EntitySpawnData, GameStateData,
    PlayerJoinData, PlayerMoveData, RoomInfoData,
};
use volley::world::{NetworkInterpolation, tag};
use volley::{Entity, Message, NetworkId, Packet, World};

use super::config::InterpolationConfig;

const MAX_QUEUED_PACKETS: usize = 4096;
const MAX_CHAT_LINES: usize = 32;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Hand-off between the socket task and the frame loop. The receive side
/// only validates and queues; decoding and world mutation happen on the
/// frame thread.
#[derive(Debug, Clone, Default)]
pub struct PacketInbox {
    queue: Arc<Mutex<VecDeque<Packet>>>,
}

impl PacketInbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false for datagrams that fail framing validation.
    pub fn push_datagram(&self, bytes: &[u8]) -> bool {
        if !Packet::validate(bytes) {
            log::debug!("Dropping malformed datagram ({} bytes)", bytes.len());
            return false;
        }
        let packet = Packet::deserialize(bytes);

        let mut queue = lock(&self.queue);
        if queue.len() >= MAX_QUEUED_PACKETS {
            queue.pop_front();
        }
        queue.push_back(packet);
        true
    }

    pub fn drain(&self) -> Vec<Packet> {
        lock(&self.queue).drain(..).collect()
    }

    pub fn len(&self) -> usize {
        lock(&self.queue).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Session-level state the server reports outside of entity replication.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionView {
    pub session_id: Option<u32>,
    pub player_count: u8,
    pub max_players: u8,
    pub slot: u8,
    pub started: bool,
    pub stage: u32,
    pub state: GameStateData,
    pub restart_votes: (u8, u8),
    pub map_size: Option<Vec2>,
    pub join_rejected: bool,
}

impl SessionView {
    pub fn game_over(&self) -> bool {
        self.state.flags.contains(volley::GameStateFlags::GAME_OVER)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyStats {
    pub applied: usize,
    pub undecodable: usize,
}

/// Applies server messages to the client world. Every handler tolerates
/// messages that arrive out of order or for ids it has never seen.
pub struct NetworkSystem {
    interpolation_speed: f32,
    local_player: Option<u32>,
    view: SessionView,
    roster: BTreeMap<u32, String>,
    rooms: BTreeMap<u32, RoomInfoData>,
    chat: VecDeque<ChatMessageData>,
    epoch: Instant,
    rtt: Option<Duration>,
}

impl NetworkSystem {
    pub fn new(config: &InterpolationConfig) -> Self {
        Self {
            interpolation_speed: config.speed,
            local_player: None,
            view: SessionView::default(),
            roster: BTreeMap::new(),
            rooms: BTreeMap::new(),
            chat: VecDeque::new(),
            epoch: Instant::now(),
            rtt: None,
        }
    }

    pub fn local_player(&self) -> Option<u32> {
        self.local_player
    }

    pub fn view(&self) -> &SessionView {
        &self.view
    }

    pub fn roster(&self) -> &BTreeMap<u32, String> {
        &self.roster
    }

    pub fn rooms(&self) -> impl Iterator<Item = &RoomInfoData> {
        self.rooms.values()
    }

    pub fn chat(&self) -> impl Iterator<Item = &ChatMessageData> {
        self.chat.iter()
    }

    pub fn rtt(&self) -> Option<Duration> {
        self.rtt
    }

    /// Milliseconds since this system was created, for ping payloads.
    pub fn timestamp_ms(&self, now: Instant) -> u32 {
        now.saturating_duration_since(self.epoch).as_millis() as u32
    }

    pub fn update(&mut self, inbox: &PacketInbox, world: &mut World, now: Instant) -> ApplyStats {
        let mut stats = ApplyStats::default();
        for packet in inbox.drain() {
            match Message::decode(&packet) {
                Ok(message) => {
                    self.apply(world, message, now);
                    stats.applied += 1;
                }
                Err(e) => {
                    log::warn!("Failed to decode {:?}: {}", packet.message_type(), e);
                    stats.undecodable += 1;
                }
            }
        }
        stats
    }

    pub fn apply(&mut self, world: &mut World, message: Message, now: Instant) {
        match message {
            Message::PlayerJoin(data) => self.on_player_join(data),
            Message::PlayerMove(data) => self.on_player_move(world, &data, now),
            Message::PlayerLeave(data) => {
                self.roster.remove(&data.player_id);
                if let Some(id) = world.by_network_id(NetworkId(data.player_id)) {
                    world.remove(id);
                }
                log::info!("Player {} left", data.player_id);
            }
            Message::EntitySpawn(data) => self.on_entity_spawn(world, &data, now),
            Message::EntityMove(data) => self.on_entity_move(world, &data, now),
            Message::EntityDestroy(data) => on_entity_destroy(world, &data),
            Message::GameStart(data) => {
                self.view.started = true;
                self.view.stage = data.stage;
                log::info!("Game started on stage {}", data.stage);
            }
            Message::GameState(data) => self.view.state = data,
            Message::Pong(data) => {
                let elapsed = self.timestamp_ms(now).wrapping_sub(data.timestamp_ms);
                self.rtt = Some(Duration::from_millis(u64::from(elapsed)));
            }
            Message::PlayerName(data) => {
                self.roster.insert(data.player_id, data.name);
            }
            Message::ChatMessage(data) => {
                log::info!("[chat] {}: {}", data.sender, data.text);
                if self.chat.len() >= MAX_CHAT_LINES {
                    self.chat.pop_front();
                }
                self.chat.push_back(data);
            }
            Message::RoomInfo(data) => {
                self.rooms.insert(data.session_id, data);
            }
            Message::LobbyUpdate(data) => {
                self.view.session_id = Some(data.session_id);
                self.view.player_count = data.player_count;
                self.view.max_players = data.max_players;
                self.view.slot = data.slot;
            }
            Message::RestartVoteStatus(data) => {
                self.view.restart_votes = (data.votes, data.required);
            }
            Message::MapResize(data) => {
                self.view.map_size = Some(Vec2::new(data.width, data.height));
            }
            Message::StageCleared(data) => {
                log::info!("Stage {} cleared, bonus {}", data.stage, data.bonus);
                self.view.stage = data.stage + 1;
            }
            other => log::debug!("Ignoring {:?} from server", other.message_type()),
        }
    }

    fn on_player_join(&mut self, data: PlayerJoinData) {
        if data.is_rejection() {
            log::warn!("Join to session {} rejected: room full", data.session_id);
            self.view.join_rejected = true;
            return;
        }
        // The assignment is always the first join the server sends us.
        if self.local_player.is_none() {
            log::info!(
                "Joined session {} as player {}",
                data.session_id,
                data.player_id
            );
            self.local_player = Some(data.player_id);
            self.view.session_id = Some(data.session_id);
            self.view.join_rejected = false;
        } else if self.local_player != Some(data.player_id) {
            log::info!("Player {} ({}) joined", data.player_id, data.name);
        }
        self.roster.insert(data.player_id, data.name);
    }

    fn on_player_move(&mut self, world: &mut World, data: &PlayerMoveData, now: Instant) {
        let local = self.local_player == Some(data.player_id);
        let speed = self.interpolation_speed;
        let network_id = NetworkId(data.player_id);

        let Some(id) = world.by_network_id(network_id) else {
            let id = world.spawn_with(|entity| {
                *entity = Entity::mirror(tag::PLAYER, data.position(), data.velocity());
                if !local {
                    entity.interpolation = Some(NetworkInterpolation::new(
                        data.position(),
                        data.velocity(),
                        speed,
                        now,
                    ));
                }
            });
            world.assign_network_id(id, network_id);
            return;
        };

        let Some(entity) = world.get_mut(id) else {
            return;
        };
        if local {
            entity.position = Some(data.position());
            entity.velocity = Some(data.velocity());
        } else {
            retarget(entity, data.position(), data.velocity(), speed, now);
        }
    }

    fn on_entity_spawn(&mut self, world: &mut World, data: &EntitySpawnData, now: Instant) {
        let network_id = NetworkId(data.entity_id);
        if let Some(id) = world.by_network_id(network_id) {
            if let Some(entity) = world.get_mut(id) {
                entity.tag = Some(tag::tag_for(data.entity_type, data.sub_type));
                retarget(entity, data.position(), data.velocity(), self.interpolation_speed, now);
            }
            return;
        }

        let tag = tag::tag_for(data.entity_type, data.sub_type);
        spawn_mirror(
            world,
            network_id,
            tag,
            data.position(),
            data.velocity(),
            self.interpolation_speed,
            now,
        );
    }

    fn on_entity_move(&mut self, world: &mut World, data: &EntityMoveData, now: Instant) {
        let network_id = NetworkId(data.entity_id);
        let speed = self.interpolation_speed;
        match world.by_network_id(network_id).and_then(|id| world.get_mut(id)) {
            Some(entity) => retarget(entity, data.position(), data.velocity(), speed, now),
            None => {
                // Tag is provisional until a spawn for this id arrives.
                log::debug!("Move for unknown entity {}, creating mirror", data.entity_id);
                spawn_mirror(
                    world,
                    network_id,
                    tag::MONSTER_BUG,
                    data.position(),
                    data.velocity(),
                    speed,
                    now,
                );
            }
        }
    }
}

fn on_entity_destroy(world: &mut World, data: &EntityDestroyData) {
    match world.by_network_id(NetworkId(data.entity_id)) {
        Some(id) => {
            log::debug!("Entity {} destroyed ({:?})", data.entity_id, data.reason);
            world.remove(id);
        }
        None => log::debug!("Destroy for unknown entity {}", data.entity_id),
    }
}

fn spawn_mirror(
    world: &mut World,
    network_id: NetworkId,
    tag: &'static str,
    position: Vec2,
    velocity: Vec2,
    speed: f32,
    now: Instant,
) {
    let id = world.spawn_with(|entity| {
        *entity = Entity::mirror(tag, position, velocity);
        entity.interpolation = Some(NetworkInterpolation::new(position, velocity, speed, now));
    });
    world.assign_network_id(id, network_id);
}

fn retarget(entity: &mut Entity, position: Vec2, velocity: Vec2, speed: f32, now: Instant) {
    match entity.interpolation.as_mut() {
        Some(interpolation) => interpolation.retarget(position, velocity, now),
        None => {
            entity.interpolation = Some(NetworkInterpolation::new(position, velocity, speed, now));
        }
    }
    if entity.position.is_none() {
        entity.position = Some(position);
    }
}
