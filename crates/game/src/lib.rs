pub mod net;
pub mod systems;
pub mod world;

pub use net::{
    CodecError, DEFAULT_PORT, DEFAULT_TICK_RATE, DestroyReason, EntityKind, GameStateFlags,
    MAX_PACKET_SIZE, Message, MessageBody, MessageType, NetworkStats, Packet, PacketHeader,
    TransportError, UdpClient, UdpServer,
};
pub use systems::{StageState, SystemManager};
pub use world::{Entity, LocalId, NetworkId, NetworkIdAllocator, World};
