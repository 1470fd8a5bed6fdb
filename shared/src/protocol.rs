//! Wire protocol: message catalog and fixed-layout binary codec.
//!
//! Every packet is a one-byte type discriminant followed by a fixed-width
//! body. Bodies are serialised with `bincode` using big-endian (network
//! order) fixed-width integers, so each message type has exactly one valid
//! length. The fast-path (UDP) and control (TCP) channels use separate
//! discriminant sets but the same layout rules.

use crate::error::{DecodeError, EncodeError, FrameError};
use bincode::Options;
use bitflags::bitflags;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const PROTOCOL_VERSION: u16 = 1;
pub const MAX_PACKET_SIZE: usize = 1024;
pub const USERNAME_LEN: usize = 32;
pub const ERROR_MESSAGE_LEN: usize = 32;

pub const DEFAULT_TCP_PORT: u16 = 4242;
pub const DEFAULT_UDP_PORT: u16 = 5252;

fn wire_options() -> impl Options + Copy {
    bincode::DefaultOptions::new()
        .with_big_endian()
        .with_fixint_encoding()
}

bitflags! {
    /// Player actions held during one input tick. Bits are disjoint and combinable.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct InputFlags: u8 {
        const UP = 1 << 0;
        const DOWN = 1 << 1;
        const LEFT = 1 << 2;
        const RIGHT = 1 << 3;
        const SHOOT = 1 << 4;
        const CHARGE_SHOOT = 1 << 5;
    }
}

/// Serialises `InputFlags` as its raw byte; unknown bits are dropped on decode.
mod input_bits {
    use super::InputFlags;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(flags: &InputFlags, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(flags.bits())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<InputFlags, D::Error> {
        let bits = u8::deserialize(deserializer)?;
        Ok(InputFlags::from_bits_truncate(bits))
    }
}

/// Fast-path message kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum UdpMessageType {
    PlayerInput = 1,
    PlayerState = 2,
    EntitySpawn = 3,
    EntityUpdate = 4,
    EntityDestroy = 5,
    Ping = 6,
    Pong = 7,
    PlayerDisconnect = 8,
}

impl UdpMessageType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(UdpMessageType::PlayerInput),
            2 => Some(UdpMessageType::PlayerState),
            3 => Some(UdpMessageType::EntitySpawn),
            4 => Some(UdpMessageType::EntityUpdate),
            5 => Some(UdpMessageType::EntityDestroy),
            6 => Some(UdpMessageType::Ping),
            7 => Some(UdpMessageType::Pong),
            8 => Some(UdpMessageType::PlayerDisconnect),
            _ => None,
        }
    }

    /// Exact body length following the discriminant byte.
    pub fn body_size(self) -> usize {
        match self {
            UdpMessageType::PlayerInput => 9,
            UdpMessageType::PlayerState => 20,
            UdpMessageType::EntitySpawn => 26,
            UdpMessageType::EntityUpdate => 24,
            UdpMessageType::EntityDestroy => 8,
            UdpMessageType::Ping | UdpMessageType::Pong => 4,
            UdpMessageType::PlayerDisconnect => 4,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            UdpMessageType::PlayerInput => "PLAYER_INPUT",
            UdpMessageType::PlayerState => "PLAYER_STATE",
            UdpMessageType::EntitySpawn => "ENTITY_SPAWN",
            UdpMessageType::EntityUpdate => "ENTITY_UPDATE",
            UdpMessageType::EntityDestroy => "ENTITY_DESTROY",
            UdpMessageType::Ping => "PING",
            UdpMessageType::Pong => "PONG",
            UdpMessageType::PlayerDisconnect => "PLAYER_DISCONNECT",
        }
    }
}

/// Reliable-channel message kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ControlMessageType {
    ConnectRequest = 1,
    ConnectResponse = 2,
    ErrorResponse = 3,
}

impl ControlMessageType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(ControlMessageType::ConnectRequest),
            2 => Some(ControlMessageType::ConnectResponse),
            3 => Some(ControlMessageType::ErrorResponse),
            _ => None,
        }
    }

    pub fn body_size(self) -> usize {
        match self {
            ControlMessageType::ConnectRequest => 2 + USERNAME_LEN,
            ControlMessageType::ConnectResponse => 6,
            ControlMessageType::ErrorResponse => 1 + ERROR_MESSAGE_LEN,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ControlMessageType::ConnectRequest => "CONNECT_REQUEST",
            ControlMessageType::ConnectResponse => "CONNECT_RESPONSE",
            ControlMessageType::ErrorResponse => "ERROR_RESPONSE",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}

impl Position {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Velocity {
    pub dx: f32,
    pub dy: f32,
}

impl Velocity {
    pub fn new(dx: f32, dy: f32) -> Self {
        Self { dx, dy }
    }
}

/// Kinematic state of a replicated entity.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct EntityState {
    pub position: Position,
    pub velocity: Velocity,
}

/// Client commands for one input tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerInputPacket {
    pub player_id: u32,
    /// Monotonic per-client input counter; the ordering key for inputs.
    pub tick: u32,
    #[serde(with = "input_bits")]
    pub inputs: InputFlags,
}

/// Authoritative position of a player.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlayerStatePacket {
    pub player_id: u32,
    pub last_processed_tick: u32,
    pub timestamp: u32,
    pub position: Position,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EntitySpawnPacket {
    pub entity_id: u32,
    pub entity_type: u16,
    pub timestamp: u32,
    pub state: EntityState,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EntityUpdatePacket {
    pub entity_id: u32,
    pub timestamp: u32,
    pub state: EntityState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityDestroyPacket {
    pub entity_id: u32,
    pub timestamp: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingPacket {
    /// Sender's clock at send time.
    pub timestamp: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PongPacket {
    /// The ping's timestamp, echoed unchanged.
    pub timestamp: u32,
}

impl PongPacket {
    pub fn echo(ping: &PingPacket) -> Self {
        Self {
            timestamp: ping.timestamp,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerDisconnectPacket {
    pub player_id: u32,
}

/// Any packet carried on the fast-path channel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FastPacket {
    PlayerInput(PlayerInputPacket),
    PlayerState(PlayerStatePacket),
    EntitySpawn(EntitySpawnPacket),
    EntityUpdate(EntityUpdatePacket),
    EntityDestroy(EntityDestroyPacket),
    Ping(PingPacket),
    Pong(PongPacket),
    PlayerDisconnect(PlayerDisconnectPacket),
}

impl FastPacket {
    pub fn message_type(&self) -> UdpMessageType {
        match self {
            FastPacket::PlayerInput(_) => UdpMessageType::PlayerInput,
            FastPacket::PlayerState(_) => UdpMessageType::PlayerState,
            FastPacket::EntitySpawn(_) => UdpMessageType::EntitySpawn,
            FastPacket::EntityUpdate(_) => UdpMessageType::EntityUpdate,
            FastPacket::EntityDestroy(_) => UdpMessageType::EntityDestroy,
            FastPacket::Ping(_) => UdpMessageType::Ping,
            FastPacket::Pong(_) => UdpMessageType::Pong,
            FastPacket::PlayerDisconnect(_) => UdpMessageType::PlayerDisconnect,
        }
    }

    /// Player id carried by client-originated packets that identify their sender.
    pub fn claimed_player_id(&self) -> Option<u32> {
        match self {
            FastPacket::PlayerInput(input) => Some(input.player_id),
            FastPacket::PlayerDisconnect(disconnect) => Some(disconnect.player_id),
            _ => None,
        }
    }
}

/// Username as sent on the wire: NUL padded, at most `USERNAME_LEN - 1` bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectRequest {
    pub protocol_version: u16,
    pub username: [u8; USERNAME_LEN],
}

impl ConnectRequest {
    pub fn new(username: &str) -> Self {
        Self::with_version(PROTOCOL_VERSION, username)
    }

    pub fn with_version(protocol_version: u16, username: &str) -> Self {
        Self {
            protocol_version,
            username: pack_text(username),
        }
    }

    pub fn username(&self) -> String {
        unpack_text(&self.username)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectResponse {
    pub player_id: u32,
    pub udp_port: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub reason: u8,
    pub message: [u8; ERROR_MESSAGE_LEN],
}

impl ErrorResponse {
    pub fn new(reason: crate::error::RejectReason) -> Self {
        Self {
            reason: reason as u8,
            message: pack_text(reason.description()),
        }
    }

    pub fn reason(&self) -> Option<crate::error::RejectReason> {
        crate::error::RejectReason::from_u8(self.reason)
    }

    pub fn message(&self) -> String {
        unpack_text(&self.message)
    }
}

/// Any packet carried on the reliable control channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlPacket {
    ConnectRequest(ConnectRequest),
    ConnectResponse(ConnectResponse),
    ErrorResponse(ErrorResponse),
}

impl ControlPacket {
    pub fn message_type(&self) -> ControlMessageType {
        match self {
            ControlPacket::ConnectRequest(_) => ControlMessageType::ConnectRequest,
            ControlPacket::ConnectResponse(_) => ControlMessageType::ConnectResponse,
            ControlPacket::ErrorResponse(_) => ControlMessageType::ErrorResponse,
        }
    }
}

fn pack_text<const N: usize>(text: &str) -> [u8; N] {
    let mut out = [0u8; N];
    let bytes = text.as_bytes();
    let len = bytes.len().min(N - 1);
    out[..len].copy_from_slice(&bytes[..len]);
    out
}

fn unpack_text(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

fn encode_body<T: Serialize>(tag: u8, body: &T) -> Result<Vec<u8>, EncodeError> {
    let options = wire_options();
    let mut bytes = Vec::with_capacity(1 + options.serialized_size(body)? as usize);
    bytes.push(tag);
    options.serialize_into(&mut bytes, body)?;
    Ok(bytes)
}

fn decode_body<T: DeserializeOwned>(body: &[u8]) -> Result<T, DecodeError> {
    Ok(wire_options().deserialize(body)?)
}

fn check_body_len(kind: &'static str, expected: usize, actual: usize) -> Result<(), DecodeError> {
    if actual != expected {
        return Err(DecodeError::TruncatedMessage {
            kind,
            expected,
            actual,
        });
    }
    Ok(())
}

fn split_header(bytes: &[u8]) -> Result<(u8, &[u8]), DecodeError> {
    bytes
        .split_first()
        .map(|(&tag, body)| (tag, body))
        .ok_or(DecodeError::TruncatedMessage {
            kind: "header",
            expected: 1,
            actual: 0,
        })
}

/// Encodes a fast-path packet into its wire bytes.
pub fn encode(packet: &FastPacket) -> Result<Vec<u8>, EncodeError> {
    let tag = packet.message_type() as u8;
    match packet {
        FastPacket::PlayerInput(p) => encode_body(tag, p),
        FastPacket::PlayerState(p) => encode_body(tag, p),
        FastPacket::EntitySpawn(p) => encode_body(tag, p),
        FastPacket::EntityUpdate(p) => encode_body(tag, p),
        FastPacket::EntityDestroy(p) => encode_body(tag, p),
        FastPacket::Ping(p) => encode_body(tag, p),
        FastPacket::Pong(p) => encode_body(tag, p),
        FastPacket::PlayerDisconnect(p) => encode_body(tag, p),
    }
}

/// Decodes one fast-path datagram.
///
/// Fails with `UnknownType` if the discriminant is not a fast-path kind and
/// with `TruncatedMessage` if the body length is not exactly the fixed size
/// for that kind.
pub fn decode(bytes: &[u8]) -> Result<FastPacket, DecodeError> {
    let (tag, body) = split_header(bytes)?;
    let kind = UdpMessageType::from_u8(tag).ok_or(DecodeError::UnknownType(tag))?;
    check_body_len(kind.name(), kind.body_size(), body.len())?;

    let packet = match kind {
        UdpMessageType::PlayerInput => FastPacket::PlayerInput(decode_body(body)?),
        UdpMessageType::PlayerState => FastPacket::PlayerState(decode_body(body)?),
        UdpMessageType::EntitySpawn => FastPacket::EntitySpawn(decode_body(body)?),
        UdpMessageType::EntityUpdate => FastPacket::EntityUpdate(decode_body(body)?),
        UdpMessageType::EntityDestroy => FastPacket::EntityDestroy(decode_body(body)?),
        UdpMessageType::Ping => FastPacket::Ping(decode_body(body)?),
        UdpMessageType::Pong => FastPacket::Pong(decode_body(body)?),
        UdpMessageType::PlayerDisconnect => FastPacket::PlayerDisconnect(decode_body(body)?),
    };
    Ok(packet)
}

pub fn encode_control(packet: &ControlPacket) -> Result<Vec<u8>, EncodeError> {
    let tag = packet.message_type() as u8;
    match packet {
        ControlPacket::ConnectRequest(p) => encode_body(tag, p),
        ControlPacket::ConnectResponse(p) => encode_body(tag, p),
        ControlPacket::ErrorResponse(p) => encode_body(tag, p),
    }
}

pub fn decode_control(bytes: &[u8]) -> Result<ControlPacket, DecodeError> {
    let (tag, body) = split_header(bytes)?;
    let kind = ControlMessageType::from_u8(tag).ok_or(DecodeError::UnknownType(tag))?;
    check_body_len(kind.name(), kind.body_size(), body.len())?;
    decode_control_body(kind, body)
}

fn decode_control_body(kind: ControlMessageType, body: &[u8]) -> Result<ControlPacket, DecodeError> {
    let packet = match kind {
        ControlMessageType::ConnectRequest => ControlPacket::ConnectRequest(decode_body(body)?),
        ControlMessageType::ConnectResponse => ControlPacket::ConnectResponse(decode_body(body)?),
        ControlMessageType::ErrorResponse => ControlPacket::ErrorResponse(decode_body(body)?),
    };
    Ok(packet)
}

/// Reads one framed control packet from a stream.
///
/// Returns `Ok(None)` on a clean end of stream before a new packet starts.
/// An unknown discriminant leaves the stream unframed, so callers must close
/// the connection after any error.
pub async fn read_control<R>(reader: &mut R) -> Result<Option<ControlPacket>, FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut tag = [0u8; 1];
    if reader.read(&mut tag).await? == 0 {
        return Ok(None);
    }

    let kind = ControlMessageType::from_u8(tag[0]).ok_or(DecodeError::UnknownType(tag[0]))?;
    let mut body = vec![0u8; kind.body_size()];
    let mut filled = 0;
    while filled < body.len() {
        let read = reader.read(&mut body[filled..]).await?;
        if read == 0 {
            return Err(DecodeError::TruncatedMessage {
                kind: kind.name(),
                expected: body.len(),
                actual: filled,
            }
            .into());
        }
        filled += read;
    }

    Ok(Some(decode_control_body(kind, &body)?))
}

/// Writes one control packet and flushes the stream.
pub async fn write_control<W>(writer: &mut W, packet: &ControlPacket) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    let bytes = encode_control(packet)?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}
