mod codec;
mod message;
mod protocol;
mod stats;
mod transport;

pub use codec::{CodecError, Deserializer, Serializer, truncate_utf8};
pub use message::*;
pub use protocol::{
    DEFAULT_PORT, DEFAULT_TICK_RATE, HEADER_SIZE, MAX_MESSAGE_TYPE, MAX_PACKET_SIZE,
    MAX_PAYLOAD_SIZE, MessageType, Packet, PacketHeader,
};
pub use stats::{NetworkCounters, NetworkStats};
pub use transport::{RECV_BUFFER_SIZE, TransportError, UdpClient, UdpServer};
