use log::debug;
use shared::clock::is_newer;
use shared::{EntityState, FastPacket, Position};
use std::collections::{HashMap, HashSet};

/// An entity the server has introduced with ENTITY_SPAWN.
#[derive(Debug, Clone, PartialEq)]
pub struct KnownEntity {
    pub entity_type: u16,
    pub state: EntityState,
    pub timestamp: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct KnownPlayer {
    pub position: Position,
    pub last_processed_tick: u32,
    pub timestamp: u32,
}

/// Client-side view of the world built from authoritative packets.
///
/// Snapshots may arrive late, twice or out of order. For every id only the
/// packet with the newest timestamp wins, and updates or destroys for ids
/// never spawned are dropped.
#[derive(Debug, Clone, Default)]
pub struct ClientWorld {
    pub entities: HashMap<u32, KnownEntity>,
    pub players: HashMap<u32, KnownPlayer>,
    // newest timestamp per destroyed id, so a late update cannot revive it
    destroyed: HashMap<u32, u32>,
    // player ids are never reused, so any state for these is stale
    departed: HashSet<u32>,
}

impl ClientWorld {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies one packet. Returns whether the world changed.
    pub fn apply(&mut self, packet: &FastPacket) -> bool {
        match packet {
            FastPacket::EntitySpawn(spawn) => {
                if let Some(&destroyed_at) = self.destroyed.get(&spawn.entity_id) {
                    if !is_newer(spawn.timestamp, destroyed_at) {
                        debug!("Ignoring stale spawn of destroyed entity {}", spawn.entity_id);
                        return false;
                    }
                    self.destroyed.remove(&spawn.entity_id);
                }
                if let Some(existing) = self.entities.get(&spawn.entity_id) {
                    if !is_newer(spawn.timestamp, existing.timestamp) {
                        return false;
                    }
                }
                self.entities.insert(
                    spawn.entity_id,
                    KnownEntity {
                        entity_type: spawn.entity_type,
                        state: spawn.state,
                        timestamp: spawn.timestamp,
                    },
                );
                true
            }
            FastPacket::EntityUpdate(update) => match self.entities.get_mut(&update.entity_id) {
                Some(entity) if is_newer(update.timestamp, entity.timestamp) => {
                    entity.state = update.state;
                    entity.timestamp = update.timestamp;
                    true
                }
                Some(_) => false,
                None => {
                    debug!("Dropping update for unknown entity {}", update.entity_id);
                    false
                }
            },
            FastPacket::EntityDestroy(destroy) => match self.entities.get(&destroy.entity_id) {
                Some(entity) if !is_newer(entity.timestamp, destroy.timestamp) => {
                    self.entities.remove(&destroy.entity_id);
                    self.destroyed.insert(destroy.entity_id, destroy.timestamp);
                    true
                }
                Some(_) => false,
                None => {
                    debug!("Dropping destroy for unknown entity {}", destroy.entity_id);
                    false
                }
            },
            FastPacket::PlayerState(state) => {
                if self.departed.contains(&state.player_id) {
                    debug!("Ignoring state for departed player {}", state.player_id);
                    return false;
                }
                if let Some(existing) = self.players.get(&state.player_id) {
                    if !is_newer(state.timestamp, existing.timestamp) {
                        return false;
                    }
                }
                self.players.insert(
                    state.player_id,
                    KnownPlayer {
                        position: state.position,
                        last_processed_tick: state.last_processed_tick,
                        timestamp: state.timestamp,
                    },
                );
                true
            }
            FastPacket::PlayerDisconnect(notice) => {
                self.departed.insert(notice.player_id);
                self.players.remove(&notice.player_id).is_some()
            }
            _ => false,
        }
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }
}
