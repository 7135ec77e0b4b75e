use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Instant;

use anyhow::{Context, Result};
use tokio::runtime::Handle;

use volley::net::{CreateRoomData, Message, MessageBody, PlayerJoinData, PlayerLeaveData};
use volley::{NetworkStats, Packet, UdpServer};

use crate::config::{ServerConfig, SessionConfig};
use crate::events::{EventLog, ServerEvent};
use crate::session::{GameSession, PacketSink, SessionInfo};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|p| p.into_inner())
}

/// Owns the session table and decides which session an inbound datagram
/// belongs to. Neither table lock is held while calling into a session.
pub struct Router {
    config: SessionConfig,
    sink: Arc<dyn PacketSink>,
    events: EventLog,
    sessions: Mutex<HashMap<u32, Arc<GameSession>>>,
    routes: Mutex<HashMap<SocketAddr, u32>>,
    accepting: AtomicBool,
    start_sessions: bool,
}

impl Router {
    pub fn new(
        config: SessionConfig,
        sink: Arc<dyn PacketSink>,
        events: EventLog,
        start_sessions: bool,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            sink,
            events,
            sessions: Mutex::new(HashMap::new()),
            routes: Mutex::new(HashMap::new()),
            accepting: AtomicBool::new(true),
            start_sessions,
        })
    }

    pub fn handle_datagram(self: &Arc<Self>, from: SocketAddr, bytes: &[u8], now: Instant) {
        if !self.accepting.load(Ordering::Acquire) {
            return;
        }
        if !Packet::validate(bytes) {
            log::trace!("Dropping malformed datagram ({} bytes) from {}", bytes.len(), from);
            return;
        }

        let packet = Packet::deserialize(bytes);
        let message = match Message::decode(&packet) {
            Ok(message) => message,
            Err(e) => {
                log::warn!("Undecodable packet from {}: {}", from, e);
                return;
            }
        };
        log::trace!("{:?} from {}", message.message_type(), from);

        match &message {
            Message::ListRooms(_) => {
                for session in self.live_sessions() {
                    self.reply(&session.room_info(), from);
                }
            }
            Message::CreateRoom(request) => {
                let session = self.create_room(request);
                self.reply(&session.room_info(), from);
            }
            Message::PlayerJoin(join) => self.join(from, join, &message, now),
            _ => {
                let Some(session) = self.route(from) else {
                    log::debug!("No session for {:?} from {}", message.message_type(), from);
                    return;
                };
                session.handle_message(from, &message, now);
                if matches!(message, Message::PlayerLeave(_)) {
                    lock(&self.routes).remove(&from);
                }
            }
        }
    }

    pub fn session(&self, id: u32) -> Option<Arc<GameSession>> {
        lock(&self.sessions).get(&id).cloned()
    }

    pub fn session_infos(&self) -> Vec<SessionInfo> {
        let mut infos: Vec<SessionInfo> = self
            .live_sessions()
            .iter()
            .map(|session| session.info())
            .collect();
        infos.sort_by_key(|info| info.id);
        infos
    }

    /// Stops accepting traffic and stops every session.
    pub fn shutdown(&self) {
        self.accepting.store(false, Ordering::Release);
        let sessions: Vec<Arc<GameSession>> =
            lock(&self.sessions).drain().map(|(_, session)| session).collect();
        lock(&self.routes).clear();
        for session in sessions {
            session.stop();
        }
    }

    fn join(
        self: &Arc<Self>,
        from: SocketAddr,
        join: &PlayerJoinData,
        message: &Message,
        now: Instant,
    ) {
        let previous = lock(&self.routes).get(&from).copied();
        if let Some(previous) = previous.filter(|&id| id != join.session_id) {
            if let Some(session) = self.session(previous) {
                let leave = Message::PlayerLeave(PlayerLeaveData { player_id: 0 });
                session.handle_message(from, &leave, now);
            }
        }

        let session = self.get_or_create(join.session_id);
        session.handle_message(from, message, now);
        if session.has_client(from) {
            lock(&self.routes).insert(from, session.id());
        } else {
            self.unroute(session.id(), from);
        }
    }

    fn get_or_create(self: &Arc<Self>, id: u32) -> Arc<GameSession> {
        let mut sessions = lock(&self.sessions);
        if let Some(session) = sessions.get(&id).filter(|session| !session.is_closed()) {
            return Arc::clone(session);
        }
        let name = format!("Room {}", id);
        self.spawn_session(&mut sessions, id, name, self.config.max_players)
    }

    fn create_room(self: &Arc<Self>, request: &CreateRoomData) -> Arc<GameSession> {
        let mut sessions = lock(&self.sessions);
        let id = (1..=u32::MAX)
            .find(|id| !sessions.contains_key(id))
            .unwrap_or(u32::MAX);
        let name = if request.name.is_empty() {
            format!("Room {}", id)
        } else {
            request.name.clone()
        };
        let max_players = match request.max_players {
            0 => self.config.max_players,
            n => n.min(self.config.max_players),
        };
        self.spawn_session(&mut sessions, id, name, max_players)
    }

    fn spawn_session(
        self: &Arc<Self>,
        sessions: &mut HashMap<u32, Arc<GameSession>>,
        id: u32,
        name: String,
        max_players: u8,
    ) -> Arc<GameSession> {
        let config = SessionConfig {
            max_players,
            ..self.config.clone()
        };
        let session =
            GameSession::new(id, name, config, Arc::clone(&self.sink), self.events.clone());

        let router: Weak<Router> = Arc::downgrade(self);
        session.set_on_stopped(move |id| {
            if let Some(router) = router.upgrade() {
                router.forget(id);
            }
        });
        let router: Weak<Router> = Arc::downgrade(self);
        session.set_on_client_removed(move |id, addr| {
            if let Some(router) = router.upgrade() {
                router.unroute(id, addr);
            }
        });

        sessions.insert(id, Arc::clone(&session));
        if self.start_sessions {
            session.start();
        }
        session
    }

    fn forget(&self, id: u32) {
        let removed = {
            let mut sessions = lock(&self.sessions);
            // a replacement under the same id stays
            let closed = sessions.get(&id).is_some_and(|session| session.is_closed());
            if closed {
                sessions.remove(&id)
            } else {
                None
            }
        };
        if removed.is_some() {
            lock(&self.routes).retain(|_, session_id| *session_id != id);
            log::debug!("Session {} removed from the table", id);
        }
    }

    /// Drops the route for `addr` if it still points at session `id`.
    fn unroute(&self, id: u32, addr: SocketAddr) {
        let mut routes = lock(&self.routes);
        if routes.get(&addr) == Some(&id) {
            routes.remove(&addr);
            log::trace!("Route for {} to session {} dropped", addr, id);
        }
    }

    fn route(&self, from: SocketAddr) -> Option<Arc<GameSession>> {
        let id = lock(&self.routes).get(&from).copied()?;
        self.session(id)
    }

    fn live_sessions(&self) -> Vec<Arc<GameSession>> {
        lock(&self.sessions)
            .values()
            .filter(|session| !session.is_closed())
            .cloned()
            .collect()
    }

    fn reply<M: MessageBody>(&self, body: &M, to: SocketAddr) {
        match body.to_packet() {
            Ok(packet) => self.sink.deliver(&packet, to),
            Err(e) => log::error!("Failed to encode {:?} for {}: {}", M::TYPE, to, e),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerStats {
    pub uptime_secs: u64,
    pub sessions: Vec<SessionInfo>,
    pub network: NetworkStats,
}

impl ServerStats {
    pub fn player_count(&self) -> usize {
        self.sessions
            .iter()
            .map(|session| usize::from(session.player_count))
            .sum()
    }

    pub fn entity_count(&self) -> usize {
        self.sessions.iter().map(|session| session.entity_count).sum()
    }
}

pub struct GameServer {
    transport: Arc<UdpServer>,
    router: Arc<Router>,
    events: EventLog,
    running: Arc<AtomicBool>,
    start_time: Instant,
}

impl GameServer {
    pub fn new(config: &ServerConfig, runtime: &Handle) -> Result<Self> {
        let addr = config.bind_addr()?;
        let transport = Arc::new(
            UdpServer::bind(addr, runtime).with_context(|| format!("starting server on {}", addr))?,
        );

        let events = EventLog::new();
        let sink: Arc<dyn PacketSink> = transport.clone();
        let router = Router::new(config.session_config(), sink, events.clone(), true);

        let receiver = Arc::clone(&router);
        transport.start_receive(move |from, bytes| {
            receiver.handle_datagram(from, bytes, Instant::now());
        })?;

        Ok(Self {
            transport,
            router,
            events,
            running: Arc::new(AtomicBool::new(true)),
            start_time: Instant::now(),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.transport.local_addr()
    }

    pub fn running(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    pub fn drain_events(&self) -> Vec<ServerEvent> {
        self.events.drain()
    }

    pub fn stats(&self) -> ServerStats {
        ServerStats {
            uptime_secs: self.start_time.elapsed().as_secs(),
            sessions: self.router.session_infos(),
            network: self.transport.stats(),
        }
    }

    pub fn shutdown(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.router.shutdown();
        self.transport.stop();
    }
}

impl Drop for GameServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}
