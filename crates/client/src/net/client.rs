use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use anyhow::{Context, Result, bail};
use glam::Vec2;
use tokio::runtime::{Builder, Runtime};

use volley::net::{PingData, PlayerJoinData, PlayerLeaveData};
use volley::{MessageBody, NetworkId, NetworkStats, UdpClient, World};

use super::config::ClientConfig;
use super::input::InputState;
use super::interpolation::{InterpolationStats, interpolate};
use super::network_system::{ApplyStats, NetworkSystem, PacketInbox};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Disconnected,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameReport {
    pub network: ApplyStats,
    pub interpolation: InterpolationStats,
}

/// Owns the socket, the mirror world and the systems that keep it in sync
/// with the server. The receive task only queues packets; everything else
/// runs on the caller's thread inside [`Client::frame`].
pub struct Client {
    transport: Option<UdpClient>,
    inbox: PacketInbox,
    socket_failed: Arc<AtomicBool>,
    network: NetworkSystem,
    world: World,
    config: ClientConfig,
    state: ConnectionState,
    last_input: Option<InputState>,
    last_ping: Option<Instant>,
    // Declared last so it outlives the transport.
    runtime: Runtime,
}

impl Client {
    pub fn connect(config: ClientConfig) -> Result<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("volley-client-net")
            .enable_all()
            .build()
            .context("starting network runtime")?;

        let transport = runtime
            .block_on(UdpClient::connect(&config.host, config.port))
            .with_context(|| format!("connecting to {}:{}", config.host, config.port))?;

        let inbox = PacketInbox::new();
        let socket_failed = Arc::new(AtomicBool::new(false));
        {
            let inbox = inbox.clone();
            let socket_failed = socket_failed.clone();
            transport.start_receive(
                move |bytes| {
                    inbox.push_datagram(bytes);
                },
                move |_| socket_failed.store(true, Ordering::Release),
            )?;
        }

        Ok(Self {
            transport: Some(transport),
            inbox,
            socket_failed,
            network: NetworkSystem::new(&config.interpolation),
            world: World::new(),
            config,
            state: ConnectionState::Connected,
            last_input: None,
            last_ping: None,
            runtime,
        })
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn network(&self) -> &NetworkSystem {
        &self.network
    }

    pub fn stats(&self) -> NetworkStats {
        self.transport
            .as_ref()
            .map(|transport| transport.stats())
            .unwrap_or_default()
    }

    pub fn join(&self) -> Result<()> {
        log::info!(
            "Joining session {} as '{}'",
            self.config.session_id,
            self.config.player_name
        );
        self.send(&PlayerJoinData {
            session_id: self.config.session_id,
            player_id: 0,
            name: self.config.player_name.clone(),
        })
    }

    /// Drains received packets into the mirror world and advances
    /// interpolation. Fails once the socket has died; the client is torn
    /// down at that point and stays disconnected.
    pub fn frame(&mut self, now: Instant, dt: f32) -> Result<FrameReport> {
        if self.socket_failed.load(Ordering::Acquire) {
            self.teardown();
            bail!("connection to {}:{} lost", self.config.host, self.config.port);
        }
        if !self.is_connected() {
            bail!("client is disconnected");
        }

        let network = self.network.update(&self.inbox, &mut self.world, now);
        let interpolation = interpolate(&mut self.world, now, dt, &self.config.interpolation);

        let ping_due = self
            .last_ping
            .is_none_or(|last| now.saturating_duration_since(last) >= self.config.ping_interval);
        if ping_due {
            self.last_ping = Some(now);
            self.send(&PingData {
                timestamp_ms: self.network.timestamp_ms(now),
            })?;
        }

        Ok(FrameReport {
            network,
            interpolation,
        })
    }

    /// Sends movement every frame and shooting only when it changes.
    pub fn send_input(&mut self, input: InputState) -> Result<()> {
        let Some(player_id) = self.network.local_player() else {
            return Ok(());
        };

        let position = self.local_position(player_id).unwrap_or(Vec2::ZERO);
        self.send(&input.to_move(player_id, position))?;

        let shoot_changed = self.last_input.is_none_or(|last| {
            last.shooting != input.shooting || last.charge_level != input.charge_level
        });
        if shoot_changed {
            self.send(&input.to_shoot(player_id))?;
        }
        self.last_input = Some(input);
        Ok(())
    }

    /// Flag raised on ctrl-c, for loops that want to leave cleanly.
    pub fn interrupt_flag(&self) -> Arc<AtomicBool> {
        let interrupted = Arc::new(AtomicBool::new(false));
        let flag = interrupted.clone();
        self.runtime.spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                log::error!("Failed to listen for ctrl-c: {}", e);
                return;
            }
            flag.store(true, Ordering::Release);
        });
        interrupted
    }

    pub fn send_message<M: MessageBody>(&self, message: &M) -> Result<()> {
        self.send(message)
    }

    /// Leaves the session and closes the socket. Safe to call more than once.
    pub fn disconnect(&mut self) {
        if !self.is_connected() {
            return;
        }
        if let Some(player_id) = self.network.local_player() {
            if let Err(e) = self.send(&PlayerLeaveData { player_id }) {
                log::warn!("Failed to send leave: {}", e);
            }
        }
        self.teardown();
    }

    pub fn local_position(&self, player_id: u32) -> Option<Vec2> {
        self.world
            .by_network_id(NetworkId(player_id))
            .and_then(|id| self.world.get(id))
            .and_then(|entity| entity.position)
    }

    fn send<M: MessageBody>(&self, message: &M) -> Result<()> {
        let Some(transport) = self.transport.as_ref() else {
            bail!("client is disconnected");
        };
        let packet = message.to_packet()?;
        transport.send(&packet)?;
        Ok(())
    }

    fn teardown(&mut self) {
        if let Some(transport) = self.transport.take() {
            transport.stop();
            log::info!("Disconnected from {}", transport.server_addr());
        }
        self.state = ConnectionState::Disconnected;
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{SocketAddr, UdpSocket};
    use std::time::Duration;

    use volley::net::EntitySpawnData;
    use volley::{EntityKind, Message, Packet};

    fn fake_server() -> (UdpSocket, u16) {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        socket
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let port = socket.local_addr().unwrap().port();
        (socket, port)
    }

    fn recv(socket: &UdpSocket) -> (Message, SocketAddr) {
        let mut buf = [0u8; 2048];
        let (len, from) = socket.recv_from(&mut buf).unwrap();
        let packet = Packet::deserialize(&buf[..len]);
        (Message::decode(&packet).unwrap(), from)
    }

    fn recv_until(socket: &UdpSocket, wanted: impl Fn(&Message) -> bool) -> Message {
        loop {
            let (message, _) = recv(socket);
            if wanted(&message) {
                return message;
            }
        }
    }

    fn send(socket: &UdpSocket, to: SocketAddr, message: &Message) {
        socket
            .send_to(&message.to_packet().unwrap().serialize(), to)
            .unwrap();
    }

    #[test]
    fn joins_mirrors_and_leaves() {
        let (server, port) = fake_server();
        let config = ClientConfig {
            port,
            session_id: 9,
            player_name: "tester".into(),
            ..ClientConfig::default()
        };
        let mut client = Client::connect(config).unwrap();
        client.join().unwrap();

        let (message, client_addr) = recv(&server);
        let Message::PlayerJoin(join) = message else {
            panic!("expected a join first");
        };
        assert_eq!(join.session_id, 9);
        assert_eq!(join.name, "tester");

        send(
            &server,
            client_addr,
            &Message::PlayerJoin(PlayerJoinData {
                session_id: 9,
                player_id: 1,
                name: "tester".into(),
            }),
        );
        send(
            &server,
            client_addr,
            &Message::EntitySpawn(EntitySpawnData {
                entity_id: 20000,
                entity_type: EntityKind::Obstacle,
                sub_type: 1,
                x: 500.0,
                y: 200.0,
                vx: -40.0,
                vy: 0.0,
            }),
        );

        let deadline = Instant::now() + Duration::from_secs(2);
        while client.world().by_network_id(NetworkId(20000)).is_none() {
            assert!(Instant::now() < deadline, "spawn never applied");
            client.frame(Instant::now(), 1.0 / 60.0).unwrap();
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(client.network().local_player(), Some(1));

        let input = InputState {
            velocity: Vec2::new(200.0, 0.0),
            ..InputState::default()
        };
        client.send_input(input).unwrap();
        let movement = recv_until(&server, |m| matches!(m, Message::PlayerMove(_)));
        let Message::PlayerMove(movement) = movement else {
            unreachable!();
        };
        assert_eq!(movement.velocity(), Vec2::new(200.0, 0.0));

        client.disconnect();
        assert!(!client.is_connected());
        let leave = recv_until(&server, |m| matches!(m, Message::PlayerLeave(_)));
        assert_eq!(leave, Message::PlayerLeave(PlayerLeaveData { player_id: 1 }));

        // A second disconnect sends nothing and frames now fail.
        client.disconnect();
        assert!(client.frame(Instant::now(), 0.0).is_err());
    }

    #[test]
    fn input_waits_for_assignment() {
        let (server, port) = fake_server();
        let mut client = Client::connect(ClientConfig {
            port,
            ..ClientConfig::default()
        })
        .unwrap();

        client.send_input(InputState::default()).unwrap();
        server
            .set_read_timeout(Some(Duration::from_millis(100)))
            .unwrap();
        let mut buf = [0u8; 64];
        assert!(server.recv_from(&mut buf).is_err());
        assert_eq!(client.stats().packets_sent, 0);
    }
}
