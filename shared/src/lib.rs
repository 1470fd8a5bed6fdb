pub mod clock;
pub mod error;
pub mod protocol;
pub mod ring_buffer;

pub use clock::{Clock, ManualClock, SharedClock, TimeSource};
pub use error::{DecodeError, EncodeError, FrameError, HandshakeRejected, RejectReason};
pub use protocol::{
    decode, decode_control, encode, encode_control, read_control, write_control, ConnectRequest,
    ConnectResponse, ControlPacket, EntityDestroyPacket, EntitySpawnPacket, EntityState,
    EntityUpdatePacket, ErrorResponse, FastPacket, InputFlags, PingPacket, PlayerDisconnectPacket,
    PlayerInputPacket, PlayerStatePacket, PongPacket, Position, UdpMessageType, Velocity,
    MAX_PACKET_SIZE, PROTOCOL_VERSION,
};
pub use ring_buffer::RingBuffer;

/// Entity type tags carried in ENTITY_SPAWN.
pub const ENTITY_TYPE_PROJECTILE: u16 = 1;
pub const ENTITY_TYPE_ENEMY: u16 = 2;

/// Playfield used by the reference simulation.
pub const WORLD_WIDTH: f32 = 1920.0;
pub const WORLD_HEIGHT: f32 = 1080.0;
pub const PLAYER_SPAWN_X: f32 = 400.0;
pub const PLAYER_SPAWN_Y: f32 = 225.0;
