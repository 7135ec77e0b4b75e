use bytemuck::{Pod, Zeroable};

pub const MAX_PACKET_SIZE: usize = 1024;
pub const HEADER_SIZE: usize = std::mem::size_of::<PacketHeader>();
pub const MAX_PAYLOAD_SIZE: usize = MAX_PACKET_SIZE - HEADER_SIZE;
pub const DEFAULT_PORT: u16 = 4242;
pub const DEFAULT_TICK_RATE: u32 = 60;

/// Highest message code `validate` accepts. Codes above the last defined
/// `MessageType` are reserved for session-layer growth.
pub const MAX_MESSAGE_TYPE: u16 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum MessageType {
    PlayerJoin = 1,
    PlayerMove = 2,
    PlayerShoot = 3,
    PlayerLeave = 4,
    EntitySpawn = 5,
    EntityMove = 6,
    EntityDestroy = 7,
    GameStart = 8,
    GameState = 9,
    Ping = 10,
    Pong = 11,
    PlayerName = 12,
    ChatMessage = 13,
    RoomInfo = 14,
    ListRooms = 15,
    CreateRoom = 16,
    LobbyUpdate = 17,
    RestartVote = 18,
    RestartVoteStatus = 19,
    MapResize = 20,
    StageCleared = 21,
}

impl MessageType {
    pub fn from_u16(value: u16) -> Option<Self> {
        let ty = match value {
            1 => Self::PlayerJoin,
            2 => Self::PlayerMove,
            3 => Self::PlayerShoot,
            4 => Self::PlayerLeave,
            5 => Self::EntitySpawn,
            6 => Self::EntityMove,
            7 => Self::EntityDestroy,
            8 => Self::GameStart,
            9 => Self::GameState,
            10 => Self::Ping,
            11 => Self::Pong,
            12 => Self::PlayerName,
            13 => Self::ChatMessage,
            14 => Self::RoomInfo,
            15 => Self::ListRooms,
            16 => Self::CreateRoom,
            17 => Self::LobbyUpdate,
            18 => Self::RestartVote,
            19 => Self::RestartVoteStatus,
            20 => Self::MapResize,
            21 => Self::StageCleared,
            _ => return None,
        };
        Some(ty)
    }

    #[inline]
    pub fn code(self) -> u16 {
        self as u16
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct PacketHeader {
    pub message_type: u16,
    pub payload_size: u16,
}

impl PacketHeader {
    pub fn new(message_type: MessageType, payload_size: u16) -> Self {
        Self {
            message_type: message_type.code(),
            payload_size,
        }
    }
}

/// One datagram: header plus opaque body. `payload_size` always equals
/// `body.len()` for packets built through [`Packet::new`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Packet {
    pub header: PacketHeader,
    pub body: Vec<u8>,
}

impl Packet {
    pub fn new(message_type: MessageType, body: Vec<u8>) -> Self {
        let payload_size = u16::try_from(body.len()).unwrap_or(u16::MAX);
        Self {
            header: PacketHeader::new(message_type, payload_size),
            body,
        }
    }

    pub fn message_type(&self) -> Option<MessageType> {
        MessageType::from_u16(self.header.message_type)
    }

    pub fn wire_len(&self) -> usize {
        HEADER_SIZE + self.body.len()
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(self.wire_len());
        data.extend_from_slice(bytemuck::bytes_of(&self.header));
        data.extend_from_slice(&self.body);
        data
    }

    /// Inverse of [`Packet::serialize`]. Input shorter than a header yields a
    /// zeroed packet; callers are expected to run [`Packet::validate`] first.
    pub fn deserialize(data: &[u8]) -> Self {
        if data.len() < HEADER_SIZE {
            return Self::default();
        }

        let header: PacketHeader = bytemuck::pod_read_unaligned(&data[..HEADER_SIZE]);
        let end = (HEADER_SIZE + header.payload_size as usize).min(data.len());
        Self {
            header,
            body: data[HEADER_SIZE..end].to_vec(),
        }
    }

    pub fn validate(data: &[u8]) -> bool {
        if data.is_empty() || data.len() < HEADER_SIZE || data.len() > MAX_PACKET_SIZE {
            return false;
        }

        let header: PacketHeader = bytemuck::pod_read_unaligned(&data[..HEADER_SIZE]);
        let payload_size = header.payload_size as usize;

        header.message_type != 0
            && header.message_type <= MAX_MESSAGE_TYPE
            && payload_size <= MAX_PAYLOAD_SIZE
            && data.len() == HEADER_SIZE + payload_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(message_type: u16, payload_size: u16, body: &[u8]) -> Vec<u8> {
        let header = PacketHeader {
            message_type,
            payload_size,
        };
        let mut data = bytemuck::bytes_of(&header).to_vec();
        data.extend_from_slice(body);
        data
    }

    #[test]
    fn header_is_four_bytes() {
        assert_eq!(HEADER_SIZE, 4);
        assert_eq!(MAX_PAYLOAD_SIZE, 1020);
    }

    #[test]
    fn test_packet_serialization() {
        let packet = Packet::new(MessageType::PlayerLeave, 7u32.to_ne_bytes().to_vec());
        let bytes = packet.serialize();

        assert_eq!(bytes.len(), HEADER_SIZE + 4);
        assert!(Packet::validate(&bytes));
        assert_eq!(Packet::deserialize(&bytes), packet);
    }

    #[test]
    fn short_input_deserializes_to_zeroed_packet() {
        let packet = Packet::deserialize(&[1, 0]);
        assert_eq!(packet, Packet::default());
        assert_eq!(packet.message_type(), None);
    }

    #[test]
    fn validate_rejects_malformed_input() {
        assert!(!Packet::validate(&[]));
        assert!(!Packet::validate(&[1, 0, 0]));
        // payload_size claims 4 bytes, only 2 present
        assert!(!Packet::validate(&raw(1, 4, &[0, 0])));
        // trailing garbage beyond payload_size
        assert!(!Packet::validate(&raw(1, 0, &[9])));
        assert!(!Packet::validate(&raw(0, 0, &[])));
        assert!(!Packet::validate(&raw(31, 0, &[])));
        assert!(!Packet::validate(&raw(u16::MAX, 0, &[])));
        let oversize = vec![0u8; MAX_PAYLOAD_SIZE + 1];
        assert!(!Packet::validate(&raw(1, oversize.len() as u16, &oversize)));
    }

    #[test]
    fn validate_accepts_reserved_range() {
        assert!(Packet::validate(&raw(1, 0, &[])));
        assert!(Packet::validate(&raw(30, 0, &[])));
        assert!(Packet::validate(&raw(
            2,
            MAX_PAYLOAD_SIZE as u16,
            &vec![0u8; MAX_PAYLOAD_SIZE]
        )));
    }

    #[test]
    fn message_type_codes_roundtrip() {
        for code in 1..=21u16 {
            let ty = MessageType::from_u16(code).unwrap();
            assert_eq!(ty.code(), code);
        }
        assert_eq!(MessageType::from_u16(0), None);
        assert_eq!(MessageType::from_u16(22), None);
    }
}
