use std::io;
use std::net::{SocketAddr, UdpSocket as StdUdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::net::UdpSocket;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use super::protocol::{MAX_PACKET_SIZE, Packet};
use super::stats::{NetworkCounters, NetworkStats};

/// Datagrams larger than a packet are still read whole so they can be
/// rejected by validation instead of silently truncated.
pub const RECV_BUFFER_SIZE: usize = 2048;

pub type ServerPacketHandler = Arc<dyn Fn(SocketAddr, &[u8]) + Send + Sync>;
pub type ClientPacketHandler = Arc<dyn Fn(&[u8]) + Send + Sync>;
pub type ErrorHandler = Arc<dyn Fn(io::Error) + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("failed to resolve {host}:{port}: {source}")]
    Resolve {
        host: String,
        port: u16,
        #[source]
        source: io::Error,
    },
    #[error("{host}:{port} resolved to no addresses")]
    NoAddress { host: String, port: u16 },
    #[error("socket error: {0}")]
    Io(#[from] io::Error),
    #[error("receive loop already started")]
    AlreadyReceiving,
    #[error("transport stopped")]
    Stopped,
}

/// One receive task per socket. The std handle is kept for synchronous
/// fire-and-forget sends, the tokio clone is consumed by the receive loop.
struct SocketPair {
    send: StdUdpSocket,
    recv: Mutex<Option<UdpSocket>>,
}

impl SocketPair {
    fn new(socket: StdUdpSocket, runtime: &Handle) -> io::Result<Self> {
        socket.set_nonblocking(true)?;
        let send = socket.try_clone()?;
        let _guard = runtime.enter();
        let recv = UdpSocket::from_std(socket)?;
        Ok(Self {
            send,
            recv: Mutex::new(Some(recv)),
        })
    }

    fn take_recv(&self) -> Option<UdpSocket> {
        self.recv
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }
}

fn store_task(slot: &Mutex<Option<JoinHandle<()>>>, task: JoinHandle<()>) {
    *slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(task);
}

fn abort_task(slot: &Mutex<Option<JoinHandle<()>>>) {
    if let Some(task) = slot
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .take()
    {
        task.abort();
    }
}

pub struct UdpServer {
    sockets: SocketPair,
    local_addr: SocketAddr,
    runtime: Handle,
    running: Arc<AtomicBool>,
    counters: Arc<NetworkCounters>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl UdpServer {
    pub fn bind(addr: SocketAddr, runtime: &Handle) -> Result<Self, TransportError> {
        let socket =
            StdUdpSocket::bind(addr).map_err(|source| TransportError::Bind { addr, source })?;
        let local_addr = socket.local_addr()?;
        let sockets = SocketPair::new(socket, runtime)?;

        log::info!("UDP server bound to {}", local_addr);

        Ok(Self {
            sockets,
            local_addr,
            runtime: runtime.clone(),
            running: Arc::new(AtomicBool::new(true)),
            counters: Arc::new(NetworkCounters::default()),
            task: Mutex::new(None),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> NetworkStats {
        self.counters.snapshot()
    }

    /// Keeps one receive outstanding until [`UdpServer::stop`]. Socket errors
    /// are logged and the receive is re-armed.
    pub fn start_receive<F>(&self, on_packet: F) -> Result<(), TransportError>
    where
        F: Fn(SocketAddr, &[u8]) + Send + Sync + 'static,
    {
        if !self.is_running() {
            return Err(TransportError::Stopped);
        }
        let socket = self
            .sockets
            .take_recv()
            .ok_or(TransportError::AlreadyReceiving)?;

        let running = self.running.clone();
        let counters = self.counters.clone();
        let on_packet: ServerPacketHandler = Arc::new(on_packet);

        let task = self.runtime.spawn(async move {
            let mut buf = [0u8; RECV_BUFFER_SIZE];
            while running.load(Ordering::Acquire) {
                match socket.recv_from(&mut buf).await {
                    Ok((len, peer)) => {
                        if !running.load(Ordering::Acquire) {
                            break;
                        }
                        counters.record_received(len);
                        on_packet(peer, &buf[..len]);
                    }
                    Err(err) => {
                        if !running.load(Ordering::Acquire) {
                            break;
                        }
                        counters.record_receive_error();
                        log::error!("UDP server receive error: {}", err);
                    }
                }
            }
            log::debug!("UDP server receive loop finished");
        });

        store_task(&self.task, task);
        Ok(())
    }

    pub fn send_to(&self, packet: &Packet, addr: SocketAddr) -> Result<usize, TransportError> {
        if !self.is_running() {
            return Err(TransportError::Stopped);
        }
        let data = packet.serialize();
        debug_assert!(data.len() <= MAX_PACKET_SIZE);

        match self.sockets.send.send_to(&data, addr) {
            Ok(sent) => {
                self.counters.record_sent(sent);
                Ok(sent)
            }
            Err(err) => {
                self.counters.record_send_error();
                Err(err.into())
            }
        }
    }

    pub fn stop(&self) {
        if self.running.swap(false, Ordering::AcqRel) {
            abort_task(&self.task);
            log::info!("UDP server on {} stopped", self.local_addr);
        }
    }
}

impl Drop for UdpServer {
    fn drop(&mut self) {
        self.stop();
    }
}

pub struct UdpClient {
    sockets: SocketPair,
    server_addr: SocketAddr,
    runtime: Handle,
    running: Arc<AtomicBool>,
    counters: Arc<NetworkCounters>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl UdpClient {
    /// Resolves `host:port`, binds an ephemeral local port and connects the
    /// socket so only datagrams from the server are received.
    pub async fn connect(host: &str, port: u16) -> Result<Self, TransportError> {
        let mut addrs = tokio::net::lookup_host((host, port))
            .await
            .map_err(|source| TransportError::Resolve {
                host: host.to_string(),
                port,
                source,
            })?;
        let server_addr = addrs.next().ok_or_else(|| TransportError::NoAddress {
            host: host.to_string(),
            port,
        })?;

        let bind_addr: SocketAddr = if server_addr.is_ipv4() {
            SocketAddr::from(([0, 0, 0, 0], 0))
        } else {
            SocketAddr::from(([0u16; 8], 0))
        };
        let socket = StdUdpSocket::bind(bind_addr).map_err(|source| TransportError::Bind {
            addr: bind_addr,
            source,
        })?;
        socket.connect(server_addr)?;

        let runtime = Handle::current();
        let sockets = SocketPair::new(socket, &runtime)?;

        log::info!("UDP client connected to {}", server_addr);

        Ok(Self {
            sockets,
            server_addr,
            runtime,
            running: Arc::new(AtomicBool::new(true)),
            counters: Arc::new(NetworkCounters::default()),
            task: Mutex::new(None),
        })
    }

    pub fn server_addr(&self) -> SocketAddr {
        self.server_addr
    }

    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.sockets.send.local_addr()?)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> NetworkStats {
        self.counters.snapshot()
    }

    /// Any socket error other than the abort after [`UdpClient::stop`] ends
    /// the loop and is handed to `on_error` so the owner can tear down.
    pub fn start_receive<F, E>(&self, on_packet: F, on_error: E) -> Result<(), TransportError>
    where
        F: Fn(&[u8]) + Send + Sync + 'static,
        E: Fn(io::Error) + Send + Sync + 'static,
    {
        if !self.is_running() {
            return Err(TransportError::Stopped);
        }
        let socket = self
            .sockets
            .take_recv()
            .ok_or(TransportError::AlreadyReceiving)?;

        let running = self.running.clone();
        let counters = self.counters.clone();
        let on_packet: ClientPacketHandler = Arc::new(on_packet);
        let on_error: ErrorHandler = Arc::new(on_error);

        let task = self.runtime.spawn(async move {
            let mut buf = [0u8; RECV_BUFFER_SIZE];
            while running.load(Ordering::Acquire) {
                match socket.recv(&mut buf).await {
                    Ok(len) => {
                        if !running.load(Ordering::Acquire) {
                            break;
                        }
                        counters.record_received(len);
                        on_packet(&buf[..len]);
                    }
                    Err(err) => {
                        if !running.swap(false, Ordering::AcqRel) {
                            break;
                        }
                        counters.record_receive_error();
                        log::error!("UDP client receive error: {}", err);
                        on_error(err);
                        break;
                    }
                }
            }
            log::debug!("UDP client receive loop finished");
        });

        store_task(&self.task, task);
        Ok(())
    }

    pub fn send(&self, packet: &Packet) -> Result<usize, TransportError> {
        if !self.is_running() {
            return Err(TransportError::Stopped);
        }
        let data = packet.serialize();

        match self.sockets.send.send(&data) {
            Ok(sent) => {
                self.counters.record_sent(sent);
                Ok(sent)
            }
            Err(err) => {
                self.counters.record_send_error();
                Err(err.into())
            }
        }
    }

    pub fn stop(&self) {
        if self.running.swap(false, Ordering::AcqRel) {
            log::info!("UDP client to {} stopped", self.server_addr);
        }
        abort_task(&self.task);
    }
}

impl Drop for UdpClient {
    fn drop(&mut self) {
        self.stop();
    }
}
