use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use glam::Vec2;

use volley::net::{
    ChatMessageData, GameStartData, LobbyUpdateData, MapResizeData, Message, MessageBody,
    PlayerJoinData, PlayerLeaveData, PlayerNameData, PongData, RestartVoteStatusData,
    RoomInfoData, StageClearedData,
};
use volley::systems::stage_obstacles;
use volley::world::{Entity, LocalId, MapBounds, NetworkId, NetworkIdAllocator, World};
use volley::{DestroyReason, Packet, StageState, SystemManager, UdpServer};

use crate::broadcast::BroadcastSystem;
use crate::config::SessionConfig;
use crate::events::{DisconnectReason, EventLog, ServerEvent};

const COMPANION_OFFSET: Vec2 = Vec2::new(-40.0, 30.0);

/// Where session traffic goes. The server hands every session the same
/// socket; tests record instead.
pub trait PacketSink: Send + Sync {
    fn deliver(&self, packet: &Packet, to: SocketAddr);
}

impl PacketSink for UdpServer {
    fn deliver(&self, packet: &Packet, to: SocketAddr) {
        if let Err(e) = self.send_to(packet, to) {
            log::error!("Send to {} failed: {}", to, e);
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|p| p.into_inner())
}

#[derive(Debug, Clone)]
pub struct ClientInfo {
    pub addr: SocketAddr,
    pub player_id: u32,
    pub player_name: String,
    pub is_connected: bool,
    pub entity_id: Option<LocalId>,
    pub slot: u8,
    pub last_seen: Instant,
    pub restart_vote: bool,
}

#[derive(Debug)]
struct ScheduledSend {
    due: Instant,
    packet: Packet,
    to: SocketAddr,
}

struct ClientTable {
    clients: HashMap<SocketAddr, ClientInfo>,
    player_ids: NetworkIdAllocator,
    scheduled: Vec<ScheduledSend>,
    empty_since: Option<Instant>,
}

impl ClientTable {
    fn new() -> Self {
        Self {
            clients: HashMap::new(),
            player_ids: NetworkIdAllocator::players(),
            scheduled: Vec::new(),
            empty_since: None,
        }
    }

    fn connected(&self) -> impl Iterator<Item = &ClientInfo> {
        self.clients.values().filter(|client| client.is_connected)
    }

    fn connected_count(&self) -> u8 {
        self.connected().count().min(usize::from(u8::MAX)) as u8
    }

    fn free_slot(&self, max_players: u8) -> u8 {
        (0..max_players)
            .find(|slot| !self.clients.values().any(|client| client.slot == *slot))
            .unwrap_or(0)
    }
}

struct Simulation {
    world: World,
    systems: SystemManager,
    stage: StageState,
    broadcast: BroadcastSystem,
    server_ids: NetworkIdAllocator,
    started: bool,
    game_over: bool,
    tick: u64,
}

impl Simulation {
    fn new(map_size: Vec2) -> Self {
        let mut world = World::new();
        world.spawn(Entity::map_bounds(map_size));
        Self {
            world,
            systems: SystemManager::with_gameplay_systems(),
            stage: StageState::new(),
            broadcast: BroadcastSystem::new(),
            server_ids: NetworkIdAllocator::server(),
            started: false,
            game_over: false,
            tick: 0,
        }
    }

    fn spawn_player(&mut self, player_id: u32, slot: u8) -> LocalId {
        let id = self.world.spawn(Entity::player(player_id, slot));
        if !self.world.assign_network_id(id, NetworkId(player_id)) {
            log::warn!("Network id {} already taken, player is not addressable", player_id);
        }
        let position = self
            .world
            .get(id)
            .and_then(|entity| entity.position)
            .unwrap_or_default();
        self.world
            .spawn(Entity::companion(id, position, COMPANION_OFFSET));
        id
    }

    /// Spawner plus the stage layout, all in the server id domain.
    fn begin_stage(&mut self, seed: u32) {
        if self.world.view(|entity| entity.spawner.is_some()).is_empty() {
            self.world.spawn(Entity::enemy_spawner(seed));
        }
        self.spawn_stage_obstacles();
    }

    fn spawn_stage_obstacles(&mut self) {
        let bounds = self.world.map_bounds();
        for obstacle in stage_obstacles(self.stage.stage, &bounds) {
            let id = self.world.spawn(obstacle);
            let network_id = self.server_ids.allocate();
            self.world.assign_network_id(id, network_id);
        }
    }

    fn set_map_size(&mut self, size: Vec2) {
        for id in self.world.view(|entity| entity.map_bounds.is_some()) {
            if let Some(entity) = self.world.get_mut(id) {
                entity.map_bounds = Some(MapBounds::new(size));
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Stopped,
    Running,
    Stopping,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Continue,
    /// Nobody has been in the room for the empty timeout.
    Expired,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionInfo {
    pub id: u32,
    pub name: String,
    pub state: SessionState,
    pub player_count: u8,
    pub max_players: u8,
    pub started: bool,
    pub game_over: bool,
    pub stage: u32,
    pub entity_count: usize,
    pub tick: u64,
}

type StoppedCallback = Box<dyn FnOnce(u32) + Send>;
type ClientRemovedCallback = Box<dyn Fn(u32, SocketAddr) + Send + Sync>;

/// One room: its clients, its world and the thread that ticks it.
///
/// Lock order is `clients` then `sim`. Nothing holding `sim` ever takes
/// `clients`.
pub struct GameSession {
    id: u32,
    name: String,
    config: SessionConfig,
    sink: Arc<dyn PacketSink>,
    events: EventLog,
    clients: Mutex<ClientTable>,
    sim: Mutex<Simulation>,
    state: Mutex<SessionState>,
    running: AtomicBool,
    closed: AtomicBool,
    thread: Mutex<Option<JoinHandle<()>>>,
    on_stopped: Mutex<Option<StoppedCallback>>,
    on_client_removed: Mutex<Option<ClientRemovedCallback>>,
}

impl GameSession {
    pub fn new(
        id: u32,
        name: impl Into<String>,
        config: SessionConfig,
        sink: Arc<dyn PacketSink>,
        events: EventLog,
    ) -> Arc<Self> {
        let name = name.into();
        events.push(ServerEvent::SessionCreated {
            session_id: id,
            name: name.clone(),
        });
        log::info!("Session {} ({}) created", id, name);

        Arc::new(Self {
            id,
            name,
            sim: Mutex::new(Simulation::new(config.map_size)),
            config,
            sink,
            events,
            clients: Mutex::new(ClientTable::new()),
            state: Mutex::new(SessionState::Stopped),
            running: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            thread: Mutex::new(None),
            on_stopped: Mutex::new(None),
            on_client_removed: Mutex::new(None),
        })
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> SessionState {
        *lock(&self.state)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// A closed session never runs again; a join for its id gets a new one.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn set_on_stopped(&self, callback: impl FnOnce(u32) + Send + 'static) {
        *lock(&self.on_stopped) = Some(Box::new(callback));
    }

    /// Called with the session id and address of every client that leaves,
    /// whether by request or by timeout.
    pub fn set_on_client_removed(
        &self,
        callback: impl Fn(u32, SocketAddr) + Send + Sync + 'static,
    ) {
        *lock(&self.on_client_removed) = Some(Box::new(callback));
    }

    pub fn start(self: &Arc<Self>) {
        let mut state = lock(&self.state);
        if *state != SessionState::Stopped {
            return;
        }

        self.running.store(true, Ordering::Release);
        let session = Arc::clone(self);
        let spawned = thread::Builder::new()
            .name(format!("session-{}", self.id))
            .spawn(move || session.run());

        match spawned {
            Ok(handle) => {
                *lock(&self.thread) = Some(handle);
                *state = SessionState::Running;
                log::info!("Session {} running at {} Hz", self.id, self.config.tick_rate);
            }
            Err(e) => {
                self.running.store(false, Ordering::Release);
                log::error!("Session {} could not spawn its tick thread: {}", self.id, e);
                self.events.push(ServerEvent::Error {
                    message: format!("Session {} failed to start: {}", self.id, e),
                });
            }
        }
    }

    /// Safe to call more than once and from the session's own thread.
    pub fn stop(&self) {
        {
            let mut state = lock(&self.state);
            if *state == SessionState::Running {
                *state = SessionState::Stopping;
            }
        }
        self.running.store(false, Ordering::Release);

        let handle = lock(&self.thread).take();
        if let Some(handle) = handle {
            // the tick thread stops itself and cannot join itself
            if handle.thread().id() != thread::current().id() && handle.join().is_err() {
                log::error!("Session {} tick thread panicked", self.id);
            }
        }
        *lock(&self.state) = SessionState::Stopped;

        if !self.closed.swap(true, Ordering::AcqRel) {
            let clients = lock(&self.clients);
            for client in clients.clients.values() {
                self.events.push(ServerEvent::PlayerLeft {
                    session_id: self.id,
                    player_id: client.player_id,
                    reason: DisconnectReason::Shutdown,
                });
            }
            drop(clients);
            self.events.push(ServerEvent::SessionClosed {
                session_id: self.id,
            });
            log::info!("Session {} stopped", self.id);
        }

        let callback = lock(&self.on_stopped).take();
        if let Some(callback) = callback {
            callback(self.id);
        }
    }

    fn run(&self) {
        let period = self.config.tick_period();
        let mut last = Instant::now();

        while self.running.load(Ordering::Acquire) {
            let now = Instant::now();
            let elapsed = now.duration_since(last);
            if elapsed < period {
                thread::sleep(Duration::from_millis(1));
                continue;
            }
            last = now;

            let outcome = self.tick(now, elapsed.as_secs_f32());

            let took = now.elapsed();
            if took > self.config.lag_warning {
                log::warn!("Session {} tick took {}ms", self.id, took.as_millis());
                self.events.push(ServerEvent::LagSpike {
                    session_id: self.id,
                    tick_ms: took.as_millis() as u64,
                });
            }

            if outcome == TickOutcome::Expired {
                log::info!(
                    "Session {} empty for {}s, closing",
                    self.id,
                    self.config.empty_timeout.as_secs()
                );
                self.stop();
                break;
            }
        }
    }

    pub fn tick(&self, now: Instant, dt: f32) -> TickOutcome {
        let mut clients = lock(&self.clients);
        self.flush_scheduled(&mut clients, now);

        let timeout = self.config.client_timeout;
        let stale: Vec<SocketAddr> = clients
            .clients
            .values()
            .filter(|client| now.saturating_duration_since(client.last_seen) >= timeout)
            .map(|client| client.addr)
            .collect();

        let mut sim = lock(&self.sim);
        for addr in stale {
            self.disconnect(&mut clients, &mut sim, addr, DisconnectReason::Timeout, now);
        }

        if clients.clients.is_empty() {
            let since = *clients.empty_since.get_or_insert(now);
            if now.saturating_duration_since(since) >= self.config.empty_timeout {
                return TickOutcome::Expired;
            }
        } else {
            clients.empty_since = None;
        }

        if sim.started && !sim.game_over && self.everyone_is_out(&clients, &sim.world) {
            sim.game_over = true;
            let purged = sim
                .world
                .retain(|entity| entity.is_player() || entity.is_data_only(), DestroyReason::Purged);
            log::info!("Session {} game over, purged {} entities", self.id, purged);
            self.events.push(ServerEvent::GameOver {
                session_id: self.id,
            });
        }

        let sim = &mut *sim;
        if !sim.game_over {
            sim.systems.update(&mut sim.world, &mut sim.stage, dt);
        }

        let cleared = sim.stage.take_cleared();
        let stage_cleared = cleared.is_some();
        if let Some(cleared) = cleared {
            self.announce_stage_clear(&clients, cleared);
            sim.spawn_stage_obstacles();
        }

        let frame = sim.broadcast.replicate(&mut sim.world);
        log::trace!("Session {} tick {}: {} updates", self.id, sim.tick, frame.len());
        for destroy in &frame.destroys {
            self.send_all(&clients, destroy);
        }
        for spawn in &frame.spawns {
            self.send_all(&clients, spawn);
        }
        for player_move in &frame.player_moves {
            self.send_all(&clients, player_move);
        }
        for entity_move in &frame.entity_moves {
            self.send_all(&clients, entity_move);
        }

        for client in clients.connected() {
            let state = sim.broadcast.state_for(
                &sim.world,
                client.entity_id,
                &sim.stage,
                sim.game_over,
                stage_cleared,
            );
            self.send(&state, client.addr);
        }

        sim.tick += 1;
        TickOutcome::Continue
    }

    /// Applies one decoded message from `addr`. The caller has already
    /// validated and decoded the datagram.
    pub fn handle_message(&self, addr: SocketAddr, message: &Message, now: Instant) {
        let mut clients = lock(&self.clients);
        if let Some(client) = clients.clients.get_mut(&addr) {
            client.last_seen = now;
        }

        match message {
            Message::PlayerJoin(join) => self.handle_join(&mut clients, addr, join, now),
            Message::PlayerMove(data) => {
                let Some(entity_id) = clients.clients.get(&addr).and_then(|c| c.entity_id) else {
                    return;
                };
                let mut sim = lock(&self.sim);
                match sim.world.get_mut(entity_id) {
                    Some(entity) if entity.is_alive_player() => {
                        entity.velocity = Some(data.velocity());
                    }
                    _ => {}
                }
            }
            Message::PlayerShoot(data) => {
                let Some(entity_id) = clients.clients.get(&addr).and_then(|c| c.entity_id) else {
                    return;
                };
                let mut sim = lock(&self.sim);
                if let Some(weapon) = sim
                    .world
                    .get_mut(entity_id)
                    .and_then(|entity| entity.weapon.as_mut())
                {
                    weapon.is_shooting = data.is_shooting;
                    weapon.charge_level = data.charge_level;
                }
            }
            Message::PlayerLeave(_) => {
                let mut sim = lock(&self.sim);
                self.disconnect(&mut clients, &mut sim, addr, DisconnectReason::Graceful, now);
            }
            Message::Ping(ping) => {
                self.send(
                    &PongData {
                        timestamp_ms: ping.timestamp_ms,
                    },
                    addr,
                );
            }
            Message::PlayerName(data) => {
                let Some(client) = clients.clients.get_mut(&addr) else {
                    return;
                };
                client.player_name = data.name.clone();
                let rename = PlayerNameData {
                    player_id: client.player_id,
                    name: data.name.clone(),
                };
                log::info!("Session {}: player {} is now {}", self.id, rename.player_id, rename.name);
                self.send_all(&clients, &rename);
            }
            Message::ChatMessage(chat) => {
                let Some(client) = clients.clients.get(&addr) else {
                    return;
                };
                let relay = ChatMessageData {
                    player_id: client.player_id,
                    sender: client.player_name.clone(),
                    text: chat.text.clone(),
                };
                log::debug!("Session {} chat <{}> {}", self.id, relay.sender, relay.text);
                self.send_all(&clients, &relay);
            }
            Message::GameStart(_) => {
                if !clients.clients.contains_key(&addr) {
                    return;
                }
                let mut sim = lock(&self.sim);
                if sim.started {
                    log::debug!("Session {} already started", self.id);
                    return;
                }
                sim.started = true;
                sim.begin_stage(self.id);
                let start = GameStartData {
                    session_id: self.id,
                    stage: sim.stage.stage,
                };
                drop(sim);
                log::info!("Session {} started stage {}", self.id, start.stage);
                self.events.push(ServerEvent::GameStarted {
                    session_id: self.id,
                    stage: start.stage,
                });
                self.send_all(&clients, &start);
            }
            Message::RestartVote(vote) => self.handle_restart_vote(&mut clients, addr, vote.vote),
            Message::MapResize(resize) => {
                if !clients.clients.contains_key(&addr) {
                    return;
                }
                let size = Vec2::new(resize.width, resize.height);
                if !size.is_finite() || size.min_element() <= 0.0 {
                    log::warn!("Session {}: ignoring map size {:?} from {}", self.id, size, addr);
                    return;
                }
                lock(&self.sim).set_map_size(size);
                self.send_all(
                    &clients,
                    &MapResizeData {
                        width: size.x,
                        height: size.y,
                    },
                );
            }
            other => {
                log::debug!(
                    "Session {} ignoring {:?} from {}",
                    self.id,
                    other.message_type(),
                    addr
                );
            }
        }
    }

    pub fn has_client(&self, addr: SocketAddr) -> bool {
        lock(&self.clients).clients.contains_key(&addr)
    }

    pub fn player_count(&self) -> u8 {
        lock(&self.clients).connected_count()
    }

    pub fn room_info(&self) -> RoomInfoData {
        let player_count = self.player_count();
        let in_game = lock(&self.sim).started;
        RoomInfoData {
            session_id: self.id,
            player_count,
            max_players: self.config.max_players,
            in_game,
            name: self.name.clone(),
        }
    }

    pub fn info(&self) -> SessionInfo {
        let clients = lock(&self.clients);
        let sim = lock(&self.sim);
        SessionInfo {
            id: self.id,
            name: self.name.clone(),
            state: self.state(),
            player_count: clients.connected_count(),
            max_players: self.config.max_players,
            started: sim.started,
            game_over: sim.game_over,
            stage: sim.stage.stage,
            entity_count: sim.world.len(),
            tick: sim.tick,
        }
    }

    pub fn clients(&self) -> Vec<ClientInfo> {
        lock(&self.clients).clients.values().cloned().collect()
    }

    fn handle_join(
        &self,
        clients: &mut ClientTable,
        addr: SocketAddr,
        join: &PlayerJoinData,
        now: Instant,
    ) {
        if let Some(existing) = clients.clients.get(&addr) {
            log::debug!("Session {}: repeated join from {}", self.id, addr);
            self.send(
                &PlayerJoinData {
                    session_id: self.id,
                    player_id: existing.player_id,
                    name: existing.player_name.clone(),
                },
                addr,
            );
            return;
        }

        if clients.clients.len() >= usize::from(self.config.max_players) {
            log::warn!("Session {} is full, rejecting {}", self.id, addr);
            self.events.push(ServerEvent::JoinRejected {
                session_id: self.id,
                addr,
                reason: "room full".to_string(),
            });
            self.send(
                &PlayerJoinData {
                    session_id: self.id,
                    player_id: 0,
                    name: String::new(),
                },
                addr,
            );
            return;
        }

        let player_id = clients.player_ids.allocate().raw();
        let slot = clients.free_slot(self.config.max_players);
        let name = if join.name.is_empty() {
            format!("Player {}", player_id)
        } else {
            join.name.clone()
        };

        let mut sim = lock(&self.sim);
        let entity_id = sim.spawn_player(player_id, slot);
        let sync = sim.broadcast.initial_sync(&sim.world);
        let running_stage = sim.started.then_some(sim.stage.stage);
        drop(sim);

        let roster: Vec<PlayerJoinData> = clients
            .clients
            .values()
            .map(|client| PlayerJoinData {
                session_id: self.id,
                player_id: client.player_id,
                name: client.player_name.clone(),
            })
            .collect();

        clients.clients.insert(
            addr,
            ClientInfo {
                addr,
                player_id,
                player_name: name.clone(),
                is_connected: true,
                entity_id: Some(entity_id),
                slot,
                last_seen: now,
                restart_vote: false,
            },
        );
        clients.empty_since = None;

        log::info!(
            "Player {} ({}) joined session {} from {}",
            player_id,
            name,
            self.id,
            addr
        );
        self.events.push(ServerEvent::PlayerJoined {
            session_id: self.id,
            player_id,
            addr,
            name: name.clone(),
        });

        let assignment = PlayerJoinData {
            session_id: self.id,
            player_id,
            name,
        };
        self.send(&assignment, addr);
        if let Some(packet) = self.encode(&assignment) {
            for client in clients.connected().filter(|client| client.addr != addr) {
                self.sink.deliver(&packet, client.addr);
            }
        }
        for existing in &roster {
            self.send(existing, addr);
        }
        for spawn in &sync {
            self.send(spawn, addr);
        }
        if let Some(stage) = running_stage {
            self.send(
                &GameStartData {
                    session_id: self.id,
                    stage,
                },
                addr,
            );
        }
        self.send_lobby_update(clients);
    }

    /// Removes the client and its player. Returns false for an unknown
    /// address, so repeated leave notices are harmless.
    fn disconnect(
        &self,
        clients: &mut ClientTable,
        sim: &mut Simulation,
        addr: SocketAddr,
        reason: DisconnectReason,
        now: Instant,
    ) -> bool {
        let Some(client) = clients.clients.remove(&addr) else {
            return false;
        };

        if let Some(entity_id) = client.entity_id {
            let destroy_reason = match reason {
                DisconnectReason::Timeout => DestroyReason::Timeout,
                DisconnectReason::Graceful | DisconnectReason::Shutdown => DestroyReason::Purged,
            };
            sim.world.despawn(entity_id, destroy_reason);
        }

        match reason {
            DisconnectReason::Timeout => log::info!(
                "Player {} ({}) timed out of session {}",
                client.player_id,
                client.player_name,
                self.id
            ),
            _ => log::info!(
                "Player {} ({}) left session {}",
                client.player_id,
                client.player_name,
                self.id
            ),
        }
        self.events.push(ServerEvent::PlayerLeft {
            session_id: self.id,
            player_id: client.player_id,
            reason,
        });

        let leave = PlayerLeaveData {
            player_id: client.player_id,
        };
        if let Some(packet) = self.encode(&leave) {
            let survivors: Vec<SocketAddr> = clients.connected().map(|c| c.addr).collect();
            for &to in &survivors {
                self.sink.deliver(&packet, to);
            }
            for repeat in 1..self.config.leave_repeats {
                let due = now + self.config.leave_spacing * u32::from(repeat);
                for &to in &survivors {
                    clients.scheduled.push(ScheduledSend {
                        due,
                        packet: packet.clone(),
                        to,
                    });
                }
            }
        }
        self.send_lobby_update(clients);

        if let Some(callback) = lock(&self.on_client_removed).as_ref() {
            callback(self.id, addr);
        }
        true
    }

    fn handle_restart_vote(&self, clients: &mut ClientTable, addr: SocketAddr, vote: bool) {
        let mut sim = lock(&self.sim);
        if !sim.game_over {
            return;
        }
        let Some(client) = clients.clients.get_mut(&addr) else {
            return;
        };
        client.restart_vote = vote;

        let required = clients.connected_count();
        let votes = clients
            .connected()
            .filter(|client| client.restart_vote)
            .count() as u8;
        self.send_all(clients, &RestartVoteStatusData { votes, required });

        if required == 0 || votes < required {
            return;
        }

        log::info!("Session {} restarting by vote", self.id);
        sim.world
            .retain(|entity| entity.map_bounds.is_some(), DestroyReason::Purged);
        sim.stage.reset();
        sim.game_over = false;
        for client in clients.clients.values_mut() {
            client.restart_vote = false;
            client.entity_id = Some(sim.spawn_player(client.player_id, client.slot));
        }
        sim.begin_stage(self.id);

        let start = GameStartData {
            session_id: self.id,
            stage: sim.stage.stage,
        };
        drop(sim);
        self.events.push(ServerEvent::GameStarted {
            session_id: self.id,
            stage: start.stage,
        });
        self.send_all(clients, &start);
    }

    fn announce_stage_clear(&self, clients: &ClientTable, cleared: StageClearedData) {
        log::info!(
            "Session {} cleared stage {} (bonus {})",
            self.id,
            cleared.stage,
            cleared.bonus
        );
        self.events.push(ServerEvent::StageCleared {
            session_id: self.id,
            stage: cleared.stage,
            bonus: cleared.bonus,
        });
        self.send_all(clients, &cleared);
    }

    fn send_lobby_update(&self, clients: &ClientTable) {
        let player_count = clients.connected_count();
        for client in clients.connected() {
            self.send(
                &LobbyUpdateData {
                    session_id: self.id,
                    player_count,
                    max_players: self.config.max_players,
                    slot: client.slot,
                },
                client.addr,
            );
        }
    }

    fn flush_scheduled(&self, clients: &mut ClientTable, now: Instant) {
        let (due, pending): (Vec<_>, Vec<_>) = std::mem::take(&mut clients.scheduled)
            .into_iter()
            .partition(|send| send.due <= now);
        clients.scheduled = pending;
        for send in due {
            self.sink.deliver(&send.packet, send.to);
        }
    }

    fn everyone_is_out(&self, clients: &ClientTable, world: &World) -> bool {
        let mut players = clients.connected().filter_map(|client| client.entity_id).peekable();
        players.peek().is_some()
            && players.all(|id| {
                world
                    .get(id)
                    .is_some_and(|entity| entity.is_player() && !entity.is_alive_player())
            })
    }

    fn encode<M: MessageBody>(&self, body: &M) -> Option<Packet> {
        match body.to_packet() {
            Ok(packet) => Some(packet),
            Err(e) => {
                log::error!("Session {} failed to encode {:?}: {}", self.id, M::TYPE, e);
                None
            }
        }
    }

    fn send<M: MessageBody>(&self, body: &M, to: SocketAddr) {
        if let Some(packet) = self.encode(body) {
            self.sink.deliver(&packet, to);
        }
    }

    fn send_all<M: MessageBody>(&self, clients: &ClientTable, body: &M) {
        let Some(packet) = self.encode(body) else {
            return;
        };
        for client in clients.connected() {
            self.sink.deliver(&packet, client.addr);
        }
    }

    #[cfg(test)]
    pub(crate) fn with_world<R>(&self, f: impl FnOnce(&mut World) -> R) -> R {
        f(&mut lock(&self.sim).world)
    }
}

impl Drop for GameSession {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::AtomicU32;

    use volley::GameStateFlags;
    use volley::net::{PingData, PlayerMoveData, PlayerShootData, RestartVoteData};
    use volley::world::Lives;

    #[derive(Default)]
    pub(crate) struct RecordingSink {
        sent: Mutex<Vec<(SocketAddr, Packet)>>,
    }

    impl RecordingSink {
        pub(crate) fn take(&self) -> Vec<(SocketAddr, Message)> {
            lock(&self.sent)
                .drain(..)
                .map(|(to, packet)| (to, Message::decode(&packet).unwrap()))
                .collect()
        }
    }

    impl PacketSink for RecordingSink {
        fn deliver(&self, packet: &Packet, to: SocketAddr) {
            lock(&self.sent).push((to, packet.clone()));
        }
    }

    const DT: f32 = 1.0 / 60.0;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    fn session_with(max_players: u8) -> (Arc<GameSession>, Arc<RecordingSink>, EventLog) {
        let sink = Arc::new(RecordingSink::default());
        let events = EventLog::new();
        let config = SessionConfig {
            max_players,
            ..SessionConfig::default()
        };
        let session = GameSession::new(7, "test", config, sink.clone(), events.clone());
        (session, sink, events)
    }

    fn join(session: &GameSession, from: SocketAddr, name: &str, now: Instant) {
        session.handle_message(
            from,
            &Message::PlayerJoin(PlayerJoinData {
                session_id: 7,
                player_id: 0,
                name: name.to_string(),
            }),
            now,
        );
    }

    fn to(sent: &[(SocketAddr, Message)], who: SocketAddr) -> Vec<Message> {
        sent.iter()
            .filter(|(addr, _)| *addr == who)
            .map(|(_, message)| message.clone())
            .collect()
    }

    fn joins(messages: &[Message]) -> Vec<PlayerJoinData> {
        messages
            .iter()
            .filter_map(|message| match message {
                Message::PlayerJoin(data) => Some(data.clone()),
                _ => None,
            })
            .collect()
    }

    fn leaves(sent: &[(SocketAddr, Message)], who: SocketAddr) -> usize {
        to(sent, who)
            .iter()
            .filter(|message| matches!(message, Message::PlayerLeave(_)))
            .count()
    }

    #[test]
    fn join_assigns_sequential_ids_and_echoes() {
        let (session, sink, _) = session_with(4);
        let t0 = Instant::now();
        let (a, b) = (addr(5001), addr(5002));

        join(&session, a, "alice", t0);
        let sent = sink.take();
        assert_eq!(
            joins(&to(&sent, a)),
            vec![PlayerJoinData {
                session_id: 7,
                player_id: 1,
                name: "alice".into(),
            }]
        );
        assert!(to(&sent, a).iter().any(|m| matches!(
            m,
            Message::LobbyUpdate(LobbyUpdateData {
                session_id: 7,
                player_count: 1,
                ..
            })
        )));

        join(&session, b, "bob", t0);
        let sent = sink.take();
        let to_b = joins(&to(&sent, b));
        assert_eq!(to_b[0].player_id, 2);
        assert_eq!(to_b[0].session_id, 7);
        assert_eq!(to_b[1].player_id, 1);
        assert_eq!(to_b[1].name, "alice");
        let to_a = joins(&to(&sent, a));
        assert_eq!(to_a.len(), 1);
        assert_eq!(to_a[0].player_id, 2);
        assert_eq!(to_a[0].name, "bob");

        session.with_world(|world| {
            assert!(world.find_player(1).is_some());
            assert!(world.find_player(2).is_some());
        });
    }

    #[test]
    fn repeated_join_resends_assignment() {
        let (session, sink, _) = session_with(4);
        let t0 = Instant::now();
        join(&session, addr(5001), "alice", t0);
        sink.take();

        join(&session, addr(5001), "alice", t0);
        let sent = sink.take();
        assert_eq!(joins(&to(&sent, addr(5001)))[0].player_id, 1);
        assert_eq!(session.player_count(), 1);
    }

    #[test]
    fn full_room_rejects_without_entity() {
        let (session, sink, events) = session_with(2);
        let t0 = Instant::now();
        join(&session, addr(5001), "a", t0);
        join(&session, addr(5002), "b", t0);
        sink.take();

        join(&session, addr(5003), "c", t0);
        let sent = sink.take();
        let reply = joins(&to(&sent, addr(5003)));
        assert_eq!(reply.len(), 1);
        assert!(reply[0].is_rejection());
        assert!(to(&sent, addr(5001)).is_empty());
        session.with_world(|world| {
            assert_eq!(world.view(|e| e.is_player()).len(), 2);
        });
        assert!(events
            .drain()
            .iter()
            .any(|e| matches!(e, ServerEvent::JoinRejected { .. })));
    }

    #[test]
    fn moves_set_velocity_only() {
        let (session, _, _) = session_with(4);
        let t0 = Instant::now();
        let a = addr(5001);
        join(&session, a, "alice", t0);
        let start = session.with_world(|world| {
            let id = world.find_player(1).unwrap();
            world.get(id).unwrap().position.unwrap()
        });

        session.handle_message(
            a,
            &Message::PlayerMove(PlayerMoveData {
                player_id: 1,
                x: 999.0,
                y: 999.0,
                vx: 10.0,
                vy: 0.0,
            }),
            t0,
        );
        let before = session.with_world(|world| {
            let id = world.find_player(1).unwrap();
            world.get(id).unwrap().position.unwrap()
        });
        assert_eq!(before, start);

        session.tick(t0, 0.5);
        session.with_world(|world| {
            let id = world.find_player(1).unwrap();
            let entity = world.get(id).unwrap();
            assert_eq!(entity.position, Some(start + Vec2::new(5.0, 0.0)));
            assert_eq!(entity.velocity, Some(Vec2::new(10.0, 0.0)));
        });
    }

    #[test]
    fn shoot_arms_the_weapon() {
        let (session, _, _) = session_with(4);
        let t0 = Instant::now();
        join(&session, addr(5001), "alice", t0);
        session.handle_message(
            addr(5001),
            &Message::PlayerShoot(PlayerShootData {
                player_id: 1,
                is_shooting: true,
                charge_level: 2,
            }),
            t0,
        );
        session.with_world(|world| {
            let id = world.find_player(1).unwrap();
            let weapon = world.get(id).unwrap().weapon.unwrap();
            assert!(weapon.is_shooting);
            assert_eq!(weapon.charge_level, 2);
        });
    }

    #[test]
    fn timeout_removes_client_exactly_once() {
        let (session, sink, events) = session_with(4);
        let t0 = Instant::now();
        let (a, b) = (addr(5001), addr(5002));
        join(&session, a, "alice", t0);
        join(&session, b, "bob", t0);
        events.drain();

        let t5 = t0 + Duration::from_secs(5);
        session.handle_message(b, &Message::Ping(PingData { timestamp_ms: 1 }), t5);
        session.tick(t5, DT);
        sink.take();

        let t10 = t0 + Duration::from_secs(10);
        session.tick(t10, DT);
        assert_eq!(leaves(&sink.take(), b), 1);
        assert!(!session.has_client(a));
        assert!(session.has_client(b));
        session.with_world(|world| assert!(world.find_player(1).is_none()));

        let mut repeats = 0;
        for ms in [150, 250, 400, 1000] {
            session.tick(t10 + Duration::from_millis(ms), DT);
            let sent = sink.take();
            repeats += leaves(&sent, b);
            assert_eq!(leaves(&sent, a), 0);
        }
        assert_eq!(repeats, 2);

        let left: Vec<_> = events
            .drain()
            .into_iter()
            .filter(|e| matches!(e, ServerEvent::PlayerLeft { .. }))
            .collect();
        assert_eq!(
            left,
            vec![ServerEvent::PlayerLeft {
                session_id: 7,
                player_id: 1,
                reason: DisconnectReason::Timeout,
            }]
        );
    }

    #[test]
    fn removal_callback_fires_once_per_client() {
        let (session, _, _) = session_with(4);
        let removed = Arc::new(Mutex::new(Vec::new()));
        {
            let removed = Arc::clone(&removed);
            session.set_on_client_removed(move |id, addr| lock(&removed).push((id, addr)));
        }
        let t0 = Instant::now();
        let (a, b) = (addr(5001), addr(5002));
        join(&session, a, "alice", t0);
        join(&session, b, "bob", t0);

        let leave = Message::PlayerLeave(PlayerLeaveData { player_id: 2 });
        session.handle_message(b, &leave, t0);
        session.handle_message(b, &leave, t0);
        let t10 = t0 + Duration::from_secs(10);
        session.tick(t10, DT);
        session.tick(t10 + Duration::from_secs(1), DT);

        assert_eq!(*lock(&removed), vec![(7, b), (7, a)]);
    }

    #[test]
    fn duplicate_leave_is_idempotent() {
        let (session, sink, events) = session_with(4);
        let t0 = Instant::now();
        let (a, b) = (addr(5001), addr(5002));
        join(&session, a, "alice", t0);
        join(&session, b, "bob", t0);
        sink.take();
        events.drain();

        let leave = Message::PlayerLeave(PlayerLeaveData { player_id: 1 });
        session.handle_message(a, &leave, t0);
        session.handle_message(a, &leave, t0);

        assert_eq!(leaves(&sink.take(), b), 1);
        assert_eq!(session.player_count(), 1);
        assert_eq!(
            events
                .drain()
                .iter()
                .filter(|e| matches!(e, ServerEvent::PlayerLeft { .. }))
                .count(),
            1
        );
    }

    #[test]
    fn empty_session_expires_and_reports() {
        let (session, _, events) = session_with(4);
        let stopped = Arc::new(AtomicU32::new(0));
        let seen = Arc::clone(&stopped);
        session.set_on_stopped(move |id| seen.store(id, Ordering::SeqCst));

        let t0 = Instant::now();
        assert_eq!(session.tick(t0, DT), TickOutcome::Continue);
        assert_eq!(
            session.tick(t0 + Duration::from_secs(9), DT),
            TickOutcome::Continue
        );
        assert_eq!(
            session.tick(t0 + Duration::from_secs(10), DT),
            TickOutcome::Expired
        );

        session.stop();
        session.stop();
        assert_eq!(stopped.load(Ordering::SeqCst), 7);
        assert_eq!(session.state(), SessionState::Stopped);
        let closed = events
            .drain()
            .iter()
            .filter(|e| matches!(e, ServerEvent::SessionClosed { .. }))
            .count();
        assert_eq!(closed, 1);
    }

    #[test]
    fn occupied_session_does_not_expire() {
        let (session, _, _) = session_with(4);
        let t0 = Instant::now();
        session.tick(t0, DT);
        join(&session, addr(5001), "alice", t0);
        session.handle_message(
            addr(5001),
            &Message::Ping(PingData { timestamp_ms: 0 }),
            t0 + Duration::from_secs(9),
        );
        assert_eq!(
            session.tick(t0 + Duration::from_secs(12), DT),
            TickOutcome::Continue
        );
    }

    #[test]
    fn game_over_purges_and_flags_state() {
        let (session, sink, events) = session_with(4);
        let t0 = Instant::now();
        let a = addr(5001);
        join(&session, a, "alice", t0);
        session.handle_message(a, &Message::GameStart(GameStartData::default()), t0);
        session.tick(t0, DT);
        sink.take();

        session.with_world(|world| {
            let id = world.find_player(1).unwrap();
            world.get_mut(id).unwrap().lives = Some(Lives::new(0));
        });
        session.tick(t0, DT);

        session.with_world(|world| {
            assert!(world.iter().all(|(_, e)| e.is_player() || e.is_data_only()));
        });
        let states: Vec<_> = to(&sink.take(), a)
            .into_iter()
            .filter_map(|m| match m {
                Message::GameState(state) => Some(state),
                _ => None,
            })
            .collect();
        assert!(states[0].flags.contains(GameStateFlags::GAME_OVER));
        assert_eq!(states[0].lives, 0);

        session.tick(t0, DT);
        assert_eq!(
            events
                .drain()
                .iter()
                .filter(|e| matches!(e, ServerEvent::GameOver { .. }))
                .count(),
            1
        );
    }

    #[test]
    fn unanimous_restart_vote_resets_the_game() {
        let (session, sink, _) = session_with(4);
        let t0 = Instant::now();
        let a = addr(5001);
        join(&session, a, "alice", t0);
        session.handle_message(a, &Message::GameStart(GameStartData::default()), t0);
        session.with_world(|world| {
            let id = world.find_player(1).unwrap();
            world.get_mut(id).unwrap().lives = Some(Lives::new(0));
        });
        session.tick(t0, DT);
        assert!(session.info().game_over);
        sink.take();

        session.handle_message(
            a,
            &Message::RestartVote(RestartVoteData {
                player_id: 1,
                vote: true,
            }),
            t0,
        );
        let sent = to(&sink.take(), a);
        assert!(sent.contains(&Message::RestartVoteStatus(RestartVoteStatusData {
            votes: 1,
            required: 1,
        })));
        assert!(sent.iter().any(|m| matches!(m, Message::GameStart(_))));

        let info = session.info();
        assert!(!info.game_over);
        assert_eq!(info.stage, 1);
        session.with_world(|world| {
            let id = world.find_player(1).unwrap();
            assert_eq!(world.get(id).unwrap().lives.unwrap().remaining, 3);
            assert_eq!(world.view(|e| e.spawner.is_some()).len(), 1);
        });
    }

    #[test]
    fn ping_and_chat_are_answered() {
        let (session, sink, _) = session_with(4);
        let t0 = Instant::now();
        let (a, b) = (addr(5001), addr(5002));
        join(&session, a, "alice", t0);
        join(&session, b, "bob", t0);
        sink.take();

        session.handle_message(a, &Message::Ping(PingData { timestamp_ms: 42 }), t0);
        session.handle_message(
            a,
            &Message::ChatMessage(ChatMessageData {
                player_id: 99,
                sender: "mallory".into(),
                text: "hi".into(),
            }),
            t0,
        );
        let sent = sink.take();
        let expected = Message::ChatMessage(ChatMessageData {
            player_id: 1,
            sender: "alice".into(),
            text: "hi".into(),
        });
        assert_eq!(
            to(&sent, a),
            vec![Message::Pong(PongData { timestamp_ms: 42 }), expected.clone()]
        );
        assert_eq!(to(&sent, b), vec![expected]);
    }

    #[test]
    fn entities_are_spawned_once_across_ticks() {
        let (session, sink, _) = session_with(4);
        let t0 = Instant::now();
        let a = addr(5001);
        join(&session, a, "alice", t0);
        session.handle_message(a, &Message::GameStart(GameStartData::default()), t0);

        let mut seen = HashSet::new();
        for i in 0..240u64 {
            session.tick(t0 + Duration::from_millis(i * 16), DT);
            for message in to(&sink.take(), a) {
                if let Message::EntitySpawn(spawn) = message {
                    assert!(seen.insert(spawn.entity_id), "{} spawned twice", spawn.entity_id);
                }
            }
        }
        assert!(seen.iter().any(|&id| (10_000..20_000).contains(&id)));
        assert!(seen.iter().any(|&id| id >= 20_000));
    }

    #[test]
    fn late_joiner_gets_initial_sync_and_start() {
        let (session, sink, _) = session_with(4);
        let t0 = Instant::now();
        let (a, b) = (addr(5001), addr(5002));
        join(&session, a, "alice", t0);
        session.handle_message(a, &Message::GameStart(GameStartData::default()), t0);
        session.tick(t0, DT);
        sink.take();

        join(&session, b, "bob", t0);
        let to_b = to(&sink.take(), b);
        let spawns = to_b
            .iter()
            .filter(|m| matches!(m, Message::EntitySpawn(_)))
            .count();
        assert!(spawns > 0);
        assert!(to_b.contains(&Message::GameStart(GameStartData {
            session_id: 7,
            stage: 1,
        })));
    }

    #[test]
    fn map_resize_is_applied_and_relayed() {
        let (session, sink, _) = session_with(4);
        let t0 = Instant::now();
        join(&session, addr(5001), "alice", t0);
        sink.take();

        let resize = MapResizeData {
            width: 1920.0,
            height: 1080.0,
        };
        session.handle_message(addr(5001), &Message::MapResize(resize), t0);
        assert_eq!(to(&sink.take(), addr(5001)), vec![Message::MapResize(resize)]);
        session.with_world(|world| {
            assert_eq!(world.map_bounds().size(), Vec2::new(1920.0, 1080.0));
        });
    }
}
