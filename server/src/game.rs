//! Authoritative simulation behind the network core.
//!
//! The network layer only frames and dispatches packets; everything that
//! decides game content lives behind [`SyncDriver`]. [`GameState`] is the
//! reference driver: players steered by input bitmasks, projectiles fired on
//! SHOOT and enemies drifting in from the right edge.

use log::{debug, info};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shared::{
    EntityDestroyPacket, EntitySpawnPacket, EntityState, EntityUpdatePacket, FastPacket,
    InputFlags, PlayerInputPacket, PlayerStatePacket, Position, Velocity, ENTITY_TYPE_ENEMY,
    ENTITY_TYPE_PROJECTILE, PLAYER_SPAWN_X, PLAYER_SPAWN_Y, WORLD_HEIGHT, WORLD_WIDTH,
};
use std::collections::{BTreeMap, HashMap};

pub const PLAYER_SPEED: f32 = 5.0;
pub const PROJECTILE_SPEED: f32 = 10.0;
pub const ENEMY_SPEED: f32 = -5.0;
pub const PROJECTILE_OFFSET_X: f32 = 25.0;
/// Entities are destroyed once x leaves [DESPAWN_MIN_X, WORLD_WIDTH].
pub const DESPAWN_MIN_X: f32 = -20.0;

/// A packet the driver wants sent.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    To { player_id: u32, packet: FastPacket },
    Broadcast { packet: FastPacket, exclude: Option<u32> },
}

impl Outbound {
    pub fn broadcast(packet: FastPacket) -> Self {
        Outbound::Broadcast {
            packet,
            exclude: None,
        }
    }

    pub fn packet(&self) -> &FastPacket {
        match self {
            Outbound::To { packet, .. } | Outbound::Broadcast { packet, .. } => packet,
        }
    }
}

/// The game-side collaborator fed by the processing loop.
///
/// Called only from the consumer side of the packet queue, never from a
/// network task, so implementations own their world state outright.
pub trait SyncDriver: Send {
    /// A session bound its fast-path address and may now receive packets.
    fn player_joined(&mut self, player_id: u32, now: u32) -> Vec<Outbound>;

    /// A session closed. The core already broadcasts PLAYER_DISCONNECT.
    fn player_left(&mut self, player_id: u32, now: u32) -> Vec<Outbound>;

    /// A decoded packet from a bound session (inputs and pings).
    fn handle_packet(&mut self, player_id: u32, packet: FastPacket, now: u32) -> Vec<Outbound>;

    /// Advances the simulation one tick.
    fn tick(&mut self, now: u32) -> Vec<Outbound>;
}

#[derive(Debug, Clone)]
pub struct Player {
    pub id: u32,
    pub position: Position,
    pub last_processed_tick: Option<u32>,
}

impl Player {
    pub fn new(id: u32) -> Self {
        Self {
            id,
            position: Position::new(PLAYER_SPAWN_X, PLAYER_SPAWN_Y),
            last_processed_tick: None,
        }
    }

    /// Applies an input unless an input with an equal or later tick already was.
    pub fn apply_input(&mut self, input: &PlayerInputPacket) -> bool {
        if let Some(last) = self.last_processed_tick {
            if !shared::clock::is_newer(input.tick, last) {
                return false;
            }
        }
        self.last_processed_tick = Some(input.tick);

        let flags = input.inputs;
        if flags.contains(InputFlags::UP) {
            self.position.y -= PLAYER_SPEED;
        }
        if flags.contains(InputFlags::DOWN) {
            self.position.y += PLAYER_SPEED;
        }
        if flags.contains(InputFlags::LEFT) {
            self.position.x -= PLAYER_SPEED;
        }
        if flags.contains(InputFlags::RIGHT) {
            self.position.x += PLAYER_SPEED;
        }
        self.position.x = self.position.x.clamp(0.0, WORLD_WIDTH);
        self.position.y = self.position.y.clamp(0.0, WORLD_HEIGHT);
        true
    }
}

#[derive(Debug, Clone)]
pub struct Entity {
    pub id: u32,
    pub entity_type: u16,
    pub state: EntityState,
}

impl Entity {
    pub fn advance(&mut self) {
        self.state.position.x += self.state.velocity.dx;
        self.state.position.y += self.state.velocity.dy;
    }

    pub fn is_out_of_bounds(&self) -> bool {
        let x = self.state.position.x;
        !(DESPAWN_MIN_X..=WORLD_WIDTH).contains(&x)
    }

    fn spawn_packet(&self, timestamp: u32) -> FastPacket {
        FastPacket::EntitySpawn(EntitySpawnPacket {
            entity_id: self.id,
            entity_type: self.entity_type,
            timestamp,
            state: self.state,
        })
    }
}

pub struct GameState {
    pub tick: u32,
    pub players: HashMap<u32, Player>,
    pub entities: BTreeMap<u32, Entity>,
    next_entity_id: u32,
    /// Ticks between enemy spawns; zero disables enemies.
    pub enemy_spawn_interval: u32,
    rng: StdRng,
}

impl GameState {
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    pub fn with_seed(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: StdRng) -> Self {
        Self {
            tick: 0,
            players: HashMap::new(),
            entities: BTreeMap::new(),
            next_entity_id: 1,
            enemy_spawn_interval: 120,
            rng,
        }
    }

    fn spawn_entity(&mut self, entity_type: u16, state: EntityState, now: u32) -> Outbound {
        let id = self.next_entity_id;
        self.next_entity_id = self.next_entity_id.wrapping_add(1).max(1);
        let entity = Entity {
            id,
            entity_type,
            state,
        };
        let packet = entity.spawn_packet(now);
        debug!("Spawned entity {} (type {})", id, entity_type);
        self.entities.insert(id, entity);
        Outbound::broadcast(packet)
    }

    fn spawn_projectile(&mut self, player_id: u32, now: u32) -> Option<Outbound> {
        let origin = self.players.get(&player_id)?.position;
        let state = EntityState {
            position: Position::new(origin.x + PROJECTILE_OFFSET_X, origin.y),
            velocity: Velocity::new(PROJECTILE_SPEED, 0.0),
        };
        Some(self.spawn_entity(ENTITY_TYPE_PROJECTILE, state, now))
    }

    fn spawn_enemy(&mut self, now: u32) -> Outbound {
        let y = self.rng.gen_range(40.0..(WORLD_HEIGHT - 40.0));
        let state = EntityState {
            position: Position::new(WORLD_WIDTH, y),
            velocity: Velocity::new(ENEMY_SPEED, 0.0),
        };
        self.spawn_entity(ENTITY_TYPE_ENEMY, state, now)
    }

    fn player_state_packet(player: &Player, now: u32) -> FastPacket {
        FastPacket::PlayerState(PlayerStatePacket {
            player_id: player.id,
            last_processed_tick: player.last_processed_tick.unwrap_or(0),
            timestamp: now,
            position: player.position,
        })
    }
}

impl Default for GameState {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncDriver for GameState {
    fn player_joined(&mut self, player_id: u32, now: u32) -> Vec<Outbound> {
        let player = Player::new(player_id);
        info!(
            "Added player {} at ({}, {})",
            player_id, player.position.x, player.position.y
        );
        self.players.insert(player_id, player);

        // late joiners need a spawn for everything already alive
        self.entities
            .values()
            .map(|entity| Outbound::To {
                player_id,
                packet: entity.spawn_packet(now),
            })
            .collect()
    }

    fn player_left(&mut self, player_id: u32, _now: u32) -> Vec<Outbound> {
        if self.players.remove(&player_id).is_some() {
            info!("Removed player {}", player_id);
        }
        Vec::new()
    }

    fn handle_packet(&mut self, player_id: u32, packet: FastPacket, now: u32) -> Vec<Outbound> {
        match packet {
            FastPacket::PlayerInput(input) => {
                let applied = match self.players.get_mut(&player_id) {
                    Some(player) => player.apply_input(&input),
                    None => false,
                };
                if !applied {
                    debug!("Discarded stale input tick {} from {}", input.tick, player_id);
                    return Vec::new();
                }
                if input.inputs.contains(InputFlags::SHOOT) {
                    return self.spawn_projectile(player_id, now).into_iter().collect();
                }
                Vec::new()
            }
            _ => Vec::new(),
        }
    }

    fn tick(&mut self, now: u32) -> Vec<Outbound> {
        self.tick = self.tick.wrapping_add(1);
        let mut out = Vec::new();

        if self.enemy_spawn_interval > 0 && self.tick % self.enemy_spawn_interval == 0 {
            out.push(self.spawn_enemy(now));
        }

        let mut destroyed = Vec::new();
        for entity in self.entities.values_mut() {
            entity.advance();
            if entity.is_out_of_bounds() {
                destroyed.push(entity.id);
            } else {
                out.push(Outbound::broadcast(FastPacket::EntityUpdate(
                    EntityUpdatePacket {
                        entity_id: entity.id,
                        timestamp: now,
                        state: entity.state,
                    },
                )));
            }
        }
        for entity_id in destroyed {
            self.entities.remove(&entity_id);
            out.push(Outbound::broadcast(FastPacket::EntityDestroy(
                EntityDestroyPacket {
                    entity_id,
                    timestamp: now,
                },
            )));
        }

        for player in self.players.values() {
            out.push(Outbound::broadcast(Self::player_state_packet(player, now)));
        }
        out
    }
}
