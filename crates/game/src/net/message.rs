//! Fixed-layout message bodies. Field order in `write`/`read` is the wire
//! contract; reordering fields breaks every peer.

use bitflags::bitflags;
use glam::Vec2;

use super::codec::{CodecError, Deserializer, Serializer, truncate_utf8};
use super::protocol::{MessageType, Packet};

pub const MAX_NAME_LEN: usize = 32;
pub const MAX_CHAT_LEN: usize = 256;

pub trait MessageBody: Sized {
    const TYPE: MessageType;

    fn write(&self, s: &mut Serializer);
    fn read(d: &mut Deserializer<'_>) -> Result<Self, CodecError>;

    fn to_packet(&self) -> Result<Packet, CodecError> {
        let mut s = Serializer::new();
        self.write(&mut s);
        s.finish(Self::TYPE)
    }

    fn from_packet(packet: &Packet) -> Result<Self, CodecError> {
        if packet.header.message_type != Self::TYPE.code() {
            return Err(CodecError::UnexpectedType {
                expected: Self::TYPE,
                actual: packet.header.message_type,
            });
        }
        Self::read(&mut Deserializer::new(&packet.body))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum EntityKind {
    Player = 1,
    Enemy = 2,
    Projectile = 3,
    #[default]
    Obstacle = 4,
    Companion = 5,
    Boss = 6,
    Pickup = 7,
}

impl From<u8> for EntityKind {
    fn from(value: u8) -> Self {
        match value {
            1 => Self::Player,
            2 => Self::Enemy,
            3 => Self::Projectile,
            5 => Self::Companion,
            6 => Self::Boss,
            7 => Self::Pickup,
            _ => Self::Obstacle,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum DestroyReason {
    #[default]
    Timeout = 0,
    Killed = 1,
    OutOfBounds = 2,
    Collected = 3,
    Purged = 4,
}

impl From<u8> for DestroyReason {
    fn from(value: u8) -> Self {
        match value {
            1 => Self::Killed,
            2 => Self::OutOfBounds,
            3 => Self::Collected,
            4 => Self::Purged,
            _ => Self::Timeout,
        }
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct GameStateFlags: u8 {
        const BOSS_WARNING = 1 << 0;
        const GAME_OVER = 1 << 1;
        const STAGE_CLEARED = 1 << 2;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PlayerJoinData {
    pub session_id: u32,
    pub player_id: u32,
    pub name: String,
}

impl PlayerJoinData {
    pub fn is_rejection(&self) -> bool {
        self.player_id == 0
    }
}

impl MessageBody for PlayerJoinData {
    const TYPE: MessageType = MessageType::PlayerJoin;

    fn write(&self, s: &mut Serializer) {
        s.write_u32(self.session_id);
        s.write_u32(self.player_id);
        s.write_string(truncate_utf8(&self.name, MAX_NAME_LEN));
    }

    fn read(d: &mut Deserializer<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            session_id: d.read_u32("session_id")?,
            player_id: d.read_u32("player_id")?,
            name: d.read_string("name")?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PlayerMoveData {
    pub player_id: u32,
    pub x: f32,
    pub y: f32,
    pub vx: f32,
    pub vy: f32,
}

impl PlayerMoveData {
    pub fn position(&self) -> Vec2 {
        Vec2::new(self.x, self.y)
    }

    pub fn velocity(&self) -> Vec2 {
        Vec2::new(self.vx, self.vy)
    }
}

impl MessageBody for PlayerMoveData {
    const TYPE: MessageType = MessageType::PlayerMove;

    fn write(&self, s: &mut Serializer) {
        s.write_u32(self.player_id);
        s.write_f32(self.x);
        s.write_f32(self.y);
        s.write_f32(self.vx);
        s.write_f32(self.vy);
    }

    fn read(d: &mut Deserializer<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            player_id: d.read_u32("player_id")?,
            x: d.read_f32("x")?,
            y: d.read_f32("y")?,
            vx: d.read_f32("vx")?,
            vy: d.read_f32("vy")?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PlayerShootData {
    pub player_id: u32,
    pub is_shooting: bool,
    pub charge_level: u8,
}

impl MessageBody for PlayerShootData {
    const TYPE: MessageType = MessageType::PlayerShoot;

    fn write(&self, s: &mut Serializer) {
        s.write_u32(self.player_id);
        s.write_bool(self.is_shooting);
        s.write_u8(self.charge_level);
    }

    fn read(d: &mut Deserializer<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            player_id: d.read_u32("player_id")?,
            is_shooting: d.read_bool("is_shooting")?,
            charge_level: d.read_u8("charge_level")?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PlayerLeaveData {
    pub player_id: u32,
}

impl MessageBody for PlayerLeaveData {
    const TYPE: MessageType = MessageType::PlayerLeave;

    fn write(&self, s: &mut Serializer) {
        s.write_u32(self.player_id);
    }

    fn read(d: &mut Deserializer<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            player_id: d.read_u32("player_id")?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct EntitySpawnData {
    pub entity_id: u32,
    pub entity_type: EntityKind,
    pub sub_type: u8,
    pub x: f32,
    pub y: f32,
    pub vx: f32,
    pub vy: f32,
}

impl EntitySpawnData {
    pub fn position(&self) -> Vec2 {
        Vec2::new(self.x, self.y)
    }

    pub fn velocity(&self) -> Vec2 {
        Vec2::new(self.vx, self.vy)
    }
}

impl MessageBody for EntitySpawnData {
    const TYPE: MessageType = MessageType::EntitySpawn;

    fn write(&self, s: &mut Serializer) {
        s.write_u32(self.entity_id);
        s.write_u8(self.entity_type as u8);
        s.write_u8(self.sub_type);
        s.write_f32(self.x);
        s.write_f32(self.y);
        s.write_f32(self.vx);
        s.write_f32(self.vy);
    }

    fn read(d: &mut Deserializer<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            entity_id: d.read_u32("entity_id")?,
            entity_type: EntityKind::from(d.read_u8("entity_type")?),
            sub_type: d.read_u8("sub_type")?,
            x: d.read_f32("x")?,
            y: d.read_f32("y")?,
            vx: d.read_f32("vx")?,
            vy: d.read_f32("vy")?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct EntityMoveData {
    pub entity_id: u32,
    pub x: f32,
    pub y: f32,
    pub vx: f32,
    pub vy: f32,
}

impl EntityMoveData {
    pub fn position(&self) -> Vec2 {
        Vec2::new(self.x, self.y)
    }

    pub fn velocity(&self) -> Vec2 {
        Vec2::new(self.vx, self.vy)
    }
}

impl MessageBody for EntityMoveData {
    const TYPE: MessageType = MessageType::EntityMove;

    fn write(&self, s: &mut Serializer) {
        s.write_u32(self.entity_id);
        s.write_f32(self.x);
        s.write_f32(self.y);
        s.write_f32(self.vx);
        s.write_f32(self.vy);
    }

    fn read(d: &mut Deserializer<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            entity_id: d.read_u32("entity_id")?,
            x: d.read_f32("x")?,
            y: d.read_f32("y")?,
            vx: d.read_f32("vx")?,
            vy: d.read_f32("vy")?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EntityDestroyData {
    pub entity_id: u32,
    pub reason: DestroyReason,
}

impl MessageBody for EntityDestroyData {
    const TYPE: MessageType = MessageType::EntityDestroy;

    fn write(&self, s: &mut Serializer) {
        s.write_u32(self.entity_id);
        s.write_u8(self.reason as u8);
    }

    fn read(d: &mut Deserializer<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            entity_id: d.read_u32("entity_id")?,
            reason: DestroyReason::from(d.read_u8("reason")?),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GameStartData {
    pub session_id: u32,
    pub stage: u32,
}

impl MessageBody for GameStartData {
    const TYPE: MessageType = MessageType::GameStart;

    fn write(&self, s: &mut Serializer) {
        s.write_u32(self.session_id);
        s.write_u32(self.stage);
    }

    fn read(d: &mut Deserializer<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            session_id: d.read_u32("session_id")?,
            stage: d.read_u32("stage")?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GameStateData {
    pub score: u32,
    pub lives: u8,
    pub wave_number: u16,
    pub flags: GameStateFlags,
}

impl GameStateData {
    pub fn boss_warning(&self) -> bool {
        self.flags.contains(GameStateFlags::BOSS_WARNING)
    }
}

impl MessageBody for GameStateData {
    const TYPE: MessageType = MessageType::GameState;

    fn write(&self, s: &mut Serializer) {
        s.write_u32(self.score);
        s.write_u8(self.lives);
        s.write_u16(self.wave_number);
        s.write_u8(self.flags.bits());
    }

    fn read(d: &mut Deserializer<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            score: d.read_u32("score")?,
            lives: d.read_u8("lives")?,
            wave_number: d.read_u16("wave_number")?,
            flags: GameStateFlags::from_bits_retain(d.read_u8("flags")?),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PingData {
    pub timestamp_ms: u32,
}

impl MessageBody for PingData {
    const TYPE: MessageType = MessageType::Ping;

    fn write(&self, s: &mut Serializer) {
        s.write_u32(self.timestamp_ms);
    }

    fn read(d: &mut Deserializer<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            timestamp_ms: d.read_u32("timestamp_ms")?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PongData {
    pub timestamp_ms: u32,
}

impl MessageBody for PongData {
    const TYPE: MessageType = MessageType::Pong;

    fn write(&self, s: &mut Serializer) {
        s.write_u32(self.timestamp_ms);
    }

    fn read(d: &mut Deserializer<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            timestamp_ms: d.read_u32("timestamp_ms")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PlayerNameData {
    pub player_id: u32,
    pub name: String,
}

impl MessageBody for PlayerNameData {
    const TYPE: MessageType = MessageType::PlayerName;

    fn write(&self, s: &mut Serializer) {
        s.write_u32(self.player_id);
        s.write_string(truncate_utf8(&self.name, MAX_NAME_LEN));
    }

    fn read(d: &mut Deserializer<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            player_id: d.read_u32("player_id")?,
            name: d.read_string("name")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChatMessageData {
    pub player_id: u32,
    pub sender: String,
    pub text: String,
}

impl MessageBody for ChatMessageData {
    const TYPE: MessageType = MessageType::ChatMessage;

    fn write(&self, s: &mut Serializer) {
        s.write_u32(self.player_id);
        s.write_string(truncate_utf8(&self.sender, MAX_NAME_LEN));
        s.write_string(truncate_utf8(&self.text, MAX_CHAT_LEN));
    }

    fn read(d: &mut Deserializer<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            player_id: d.read_u32("player_id")?,
            sender: d.read_string("sender")?,
            text: d.read_string("text")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RoomInfoData {
    pub session_id: u32,
    pub player_count: u8,
    pub max_players: u8,
    pub in_game: bool,
    pub name: String,
}

impl MessageBody for RoomInfoData {
    const TYPE: MessageType = MessageType::RoomInfo;

    fn write(&self, s: &mut Serializer) {
        s.write_u32(self.session_id);
        s.write_u8(self.player_count);
        s.write_u8(self.max_players);
        s.write_bool(self.in_game);
        s.write_string(truncate_utf8(&self.name, MAX_NAME_LEN));
    }

    fn read(d: &mut Deserializer<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            session_id: d.read_u32("session_id")?,
            player_count: d.read_u8("player_count")?,
            max_players: d.read_u8("max_players")?,
            in_game: d.read_bool("in_game")?,
            name: d.read_string("name")?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ListRoomsData;

impl MessageBody for ListRoomsData {
    const TYPE: MessageType = MessageType::ListRooms;

    fn write(&self, _s: &mut Serializer) {}

    fn read(_d: &mut Deserializer<'_>) -> Result<Self, CodecError> {
        Ok(Self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CreateRoomData {
    pub max_players: u8,
    pub name: String,
}

impl MessageBody for CreateRoomData {
    const TYPE: MessageType = MessageType::CreateRoom;

    fn write(&self, s: &mut Serializer) {
        s.write_u8(self.max_players);
        s.write_string(truncate_utf8(&self.name, MAX_NAME_LEN));
    }

    fn read(d: &mut Deserializer<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            max_players: d.read_u8("max_players")?,
            name: d.read_string("name")?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LobbyUpdateData {
    pub session_id: u32,
    pub player_count: u8,
    pub max_players: u8,
    pub slot: u8,
}

impl MessageBody for LobbyUpdateData {
    const TYPE: MessageType = MessageType::LobbyUpdate;

    fn write(&self, s: &mut Serializer) {
        s.write_u32(self.session_id);
        s.write_u8(self.player_count);
        s.write_u8(self.max_players);
        s.write_u8(self.slot);
    }

    fn read(d: &mut Deserializer<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            session_id: d.read_u32("session_id")?,
            player_count: d.read_u8("player_count")?,
            max_players: d.read_u8("max_players")?,
            slot: d.read_u8("slot")?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RestartVoteData {
    pub player_id: u32,
    pub vote: bool,
}

impl MessageBody for RestartVoteData {
    const TYPE: MessageType = MessageType::RestartVote;

    fn write(&self, s: &mut Serializer) {
        s.write_u32(self.player_id);
        s.write_bool(self.vote);
    }

    fn read(d: &mut Deserializer<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            player_id: d.read_u32("player_id")?,
            vote: d.read_bool("vote")?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RestartVoteStatusData {
    pub votes: u8,
    pub required: u8,
}

impl MessageBody for RestartVoteStatusData {
    const TYPE: MessageType = MessageType::RestartVoteStatus;

    fn write(&self, s: &mut Serializer) {
        s.write_u8(self.votes);
        s.write_u8(self.required);
    }

    fn read(d: &mut Deserializer<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            votes: d.read_u8("votes")?,
            required: d.read_u8("required")?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MapResizeData {
    pub width: f32,
    pub height: f32,
}

impl MessageBody for MapResizeData {
    const TYPE: MessageType = MessageType::MapResize;

    fn write(&self, s: &mut Serializer) {
        s.write_f32(self.width);
        s.write_f32(self.height);
    }

    fn read(d: &mut Deserializer<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            width: d.read_f32("width")?,
            height: d.read_f32("height")?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StageClearedData {
    pub stage: u32,
    pub bonus: u32,
}

impl MessageBody for StageClearedData {
    const TYPE: MessageType = MessageType::StageCleared;

    fn write(&self, s: &mut Serializer) {
        s.write_u32(self.stage);
        s.write_u32(self.bonus);
    }

    fn read(d: &mut Deserializer<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            stage: d.read_u32("stage")?,
            bonus: d.read_u32("bonus")?,
        })
    }
}

/// Decoded form of any known packet. Message type is the sole discriminator.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    PlayerJoin(PlayerJoinData),
    PlayerMove(PlayerMoveData),
    PlayerShoot(PlayerShootData),
    PlayerLeave(PlayerLeaveData),
    EntitySpawn(EntitySpawnData),
    EntityMove(EntityMoveData),
    EntityDestroy(EntityDestroyData),
    GameStart(GameStartData),
    GameState(GameStateData),
    Ping(PingData),
    Pong(PongData),
    PlayerName(PlayerNameData),
    ChatMessage(ChatMessageData),
    RoomInfo(RoomInfoData),
    ListRooms(ListRoomsData),
    CreateRoom(CreateRoomData),
    LobbyUpdate(LobbyUpdateData),
    RestartVote(RestartVoteData),
    RestartVoteStatus(RestartVoteStatusData),
    MapResize(MapResizeData),
    StageCleared(StageClearedData),
}

impl Message {
    pub fn decode(packet: &Packet) -> Result<Self, CodecError> {
        let ty = packet
            .message_type()
            .ok_or(CodecError::UnknownMessageType(packet.header.message_type))?;
        let mut d = Deserializer::new(&packet.body);

        let message = match ty {
            MessageType::PlayerJoin => Self::PlayerJoin(PlayerJoinData::read(&mut d)?),
            MessageType::PlayerMove => Self::PlayerMove(PlayerMoveData::read(&mut d)?),
            MessageType::PlayerShoot => Self::PlayerShoot(PlayerShootData::read(&mut d)?),
            MessageType::PlayerLeave => Self::PlayerLeave(PlayerLeaveData::read(&mut d)?),
            MessageType::EntitySpawn => Self::EntitySpawn(EntitySpawnData::read(&mut d)?),
            MessageType::EntityMove => Self::EntityMove(EntityMoveData::read(&mut d)?),
            MessageType::EntityDestroy => Self::EntityDestroy(EntityDestroyData::read(&mut d)?),
            MessageType::GameStart => Self::GameStart(GameStartData::read(&mut d)?),
            MessageType::GameState => Self::GameState(GameStateData::read(&mut d)?),
            MessageType::Ping => Self::Ping(PingData::read(&mut d)?),
            MessageType::Pong => Self::Pong(PongData::read(&mut d)?),
            MessageType::PlayerName => Self::PlayerName(PlayerNameData::read(&mut d)?),
            MessageType::ChatMessage => Self::ChatMessage(ChatMessageData::read(&mut d)?),
            MessageType::RoomInfo => Self::RoomInfo(RoomInfoData::read(&mut d)?),
            MessageType::ListRooms => Self::ListRooms(ListRoomsData::read(&mut d)?),
            MessageType::CreateRoom => Self::CreateRoom(CreateRoomData::read(&mut d)?),
            MessageType::LobbyUpdate => Self::LobbyUpdate(LobbyUpdateData::read(&mut d)?),
            MessageType::RestartVote => Self::RestartVote(RestartVoteData::read(&mut d)?),
            MessageType::RestartVoteStatus => {
                Self::RestartVoteStatus(RestartVoteStatusData::read(&mut d)?)
            }
            MessageType::MapResize => Self::MapResize(MapResizeData::read(&mut d)?),
            MessageType::StageCleared => Self::StageCleared(StageClearedData::read(&mut d)?),
        };

        Ok(message)
    }

    pub fn message_type(&self) -> MessageType {
        match self {
            Self::PlayerJoin(_) => MessageType::PlayerJoin,
            Self::PlayerMove(_) => MessageType::PlayerMove,
            Self::PlayerShoot(_) => MessageType::PlayerShoot,
            Self::PlayerLeave(_) => MessageType::PlayerLeave,
            Self::EntitySpawn(_) => MessageType::EntitySpawn,
            Self::EntityMove(_) => MessageType::EntityMove,
            Self::EntityDestroy(_) => MessageType::EntityDestroy,
            Self::GameStart(_) => MessageType::GameStart,
            Self::GameState(_) => MessageType::GameState,
            Self::Ping(_) => MessageType::Ping,
            Self::Pong(_) => MessageType::Pong,
            Self::PlayerName(_) => MessageType::PlayerName,
            Self::ChatMessage(_) => MessageType::ChatMessage,
            Self::RoomInfo(_) => MessageType::RoomInfo,
            Self::ListRooms(_) => MessageType::ListRooms,
            Self::CreateRoom(_) => MessageType::CreateRoom,
            Self::LobbyUpdate(_) => MessageType::LobbyUpdate,
            Self::RestartVote(_) => MessageType::RestartVote,
            Self::RestartVoteStatus(_) => MessageType::RestartVoteStatus,
            Self::MapResize(_) => MessageType::MapResize,
            Self::StageCleared(_) => MessageType::StageCleared,
        }
    }

    pub fn to_packet(&self) -> Result<Packet, CodecError> {
        match self {
            Self::PlayerJoin(data) => data.to_packet(),
            Self::PlayerMove(data) => data.to_packet(),
            Self::PlayerShoot(data) => data.to_packet(),
            Self::PlayerLeave(data) => data.to_packet(),
            Self::EntitySpawn(data) => data.to_packet(),
            Self::EntityMove(data) => data.to_packet(),
            Self::EntityDestroy(data) => data.to_packet(),
            Self::GameStart(data) => data.to_packet(),
            Self::GameState(data) => data.to_packet(),
            Self::Ping(data) => data.to_packet(),
            Self::Pong(data) => data.to_packet(),
            Self::PlayerName(data) => data.to_packet(),
            Self::ChatMessage(data) => data.to_packet(),
            Self::RoomInfo(data) => data.to_packet(),
            Self::ListRooms(data) => data.to_packet(),
            Self::CreateRoom(data) => data.to_packet(),
            Self::LobbyUpdate(data) => data.to_packet(),
            Self::RestartVote(data) => data.to_packet(),
            Self::RestartVoteStatus(data) => data.to_packet(),
            Self::MapResize(data) => data.to_packet(),
            Self::StageCleared(data) => data.to_packet(),
        }
    }
}
