//! Session registry for the multiplayer server
//!
//! This module owns every server-side session record:
//! - Player id assignment during the reliable-channel handshake
//! - Binding an established player to the fast-path address it sends from
//! - Liveness tracking (last-seen timestamps) and timeout eviction
//! - Capacity enforcement across pending and bound sessions
//!
//! Other components refer to sessions by player id or address only; the
//! records themselves never leave the registry except as owned copies
//! returned on removal.

use log::{debug, info, warn};
use shared::clock::elapsed_ms;
use shared::{FastPacket, RejectReason};
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};

/// A player that completed the handshake but has not yet been heard from on
/// the fast-path channel.
#[derive(Debug, Clone)]
pub struct PendingSession {
    pub player_id: u32,
    pub username: String,
    /// Host the handshake came from; only this host may bind the session.
    pub peer_ip: IpAddr,
    /// Handshake time; a pending session that never binds expires from here.
    pub created_at: u32,
}

/// An established session bound to a fast-path address.
#[derive(Debug, Clone)]
pub struct ClientInfo {
    /// Player id assigned at handshake
    pub player_id: u32,
    /// Address fast-path packets arrive from and are sent to
    pub addr: SocketAddr,
    pub username: String,
    /// Local clock time of the last accepted packet
    pub last_seen: u32,
    pub packets_received: u64,
    /// Highest input tick seen from this client
    pub last_input_tick: Option<u32>,
}

impl ClientInfo {
    pub fn new(pending: PendingSession, addr: SocketAddr, now: u32) -> Self {
        Self {
            player_id: pending.player_id,
            addr,
            username: pending.username,
            last_seen: now,
            packets_received: 0,
            last_input_tick: None,
        }
    }

    /// Records an accepted packet.
    pub fn touch(&mut self, packet: &FastPacket, now: u32) {
        self.last_seen = now;
        self.packets_received += 1;
        if let FastPacket::PlayerInput(input) = packet {
            let newer = match self.last_input_tick {
                Some(last) => shared::clock::is_newer(input.tick, last),
                None => true,
            };
            if newer {
                self.last_input_tick = Some(input.tick);
            }
        }
    }

    /// Checks if nothing has been received within the timeout window
    pub fn is_timed_out(&self, now: u32, timeout_ms: u32) -> bool {
        elapsed_ms(now, self.last_seen) > timeout_ms
    }
}

/// How the registry resolved the sender of a fast-path packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Sender already had a bound session.
    Known(u32),
    /// Packet claimed a pending player id and bound it to the sender's address.
    Bound(u32),
}

impl Admission {
    pub fn player_id(self) -> u32 {
        match self {
            Admission::Known(id) | Admission::Bound(id) => id,
        }
    }
}

/// Why a session left the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    Timeout,
    Disconnected,
    Kicked,
}

impl CloseReason {
    /// Code reported on the reliable channel, if the peer should be told.
    pub fn reject_reason(self) -> Option<RejectReason> {
        match self {
            CloseReason::Timeout => Some(RejectReason::SessionTimeout),
            CloseReason::Kicked => Some(RejectReason::Kicked),
            CloseReason::Disconnected => None,
        }
    }
}

/// A session that was removed, pending or bound.
#[derive(Debug, Clone)]
pub enum RemovedSession {
    Pending(PendingSession),
    Bound(ClientInfo),
}

impl RemovedSession {
    pub fn player_id(&self) -> u32 {
        match self {
            RemovedSession::Pending(pending) => pending.player_id,
            RemovedSession::Bound(info) => info.player_id,
        }
    }

    pub fn was_bound(&self) -> bool {
        matches!(self, RemovedSession::Bound(_))
    }
}

/// Owns all session records, keyed by fast-path address once bound.
///
/// The registry is the isolation boundary between clients: a packet from one
/// address can only ever touch the record bound to that address.
pub struct SessionRegistry {
    sessions: HashMap<SocketAddr, ClientInfo>,
    pending: HashMap<u32, PendingSession>,
    next_player_id: u32,
    max_clients: usize,
}

impl SessionRegistry {
    /// Player ids start from 1 and are never reused.
    pub fn new(max_clients: usize) -> Self {
        Self {
            sessions: HashMap::new(),
            pending: HashMap::new(),
            next_player_id: 1,
            max_clients,
        }
    }

    /// Reserves a fresh player id for a successful handshake from `peer_ip`.
    pub fn reserve(
        &mut self,
        username: &str,
        peer_ip: IpAddr,
        now: u32,
    ) -> Result<u32, RejectReason> {
        if self.len() >= self.max_clients {
            return Err(RejectReason::ServerFull);
        }

        let player_id = self.next_player_id;
        self.next_player_id = self.next_player_id.wrapping_add(1).max(1);

        info!("Reserved player {} for '{}'", player_id, username);
        self.pending.insert(
            player_id,
            PendingSession {
                player_id,
                username: username.to_string(),
                peer_ip,
                created_at: now,
            },
        );
        Ok(player_id)
    }

    /// Resolves the sender of a fast-path packet, refreshing its liveness.
    ///
    /// Returns None when the address has no session and the packet does not
    /// claim a pending player id reserved from the sender's host; such
    /// packets must be dropped.
    pub fn resolve(&mut self, addr: SocketAddr, packet: &FastPacket, now: u32) -> Option<Admission> {
        if let Some(info) = self.sessions.get_mut(&addr) {
            info.touch(packet, now);
            return Some(Admission::Known(info.player_id));
        }

        let claimed = packet.claimed_player_id()?;
        match self.pending.get(&claimed) {
            Some(pending) if pending.peer_ip.to_canonical() == addr.ip().to_canonical() => {}
            Some(pending) => {
                warn!(
                    "{} claimed player {} reserved by {}, ignoring",
                    addr, claimed, pending.peer_ip
                );
                return None;
            }
            None => return None,
        }
        let pending = self.pending.remove(&claimed)?;
        let mut info = ClientInfo::new(pending, addr, now);
        info.touch(packet, now);
        info!("Player {} bound to {}", info.player_id, addr);
        self.sessions.insert(addr, info);
        Some(Admission::Bound(claimed))
    }

    /// Removes a session by player id, whether pending or bound.
    pub fn remove_player(&mut self, player_id: u32) -> Option<RemovedSession> {
        if let Some(pending) = self.pending.remove(&player_id) {
            return Some(RemovedSession::Pending(pending));
        }
        let addr = self.addr_of(player_id)?;
        self.sessions.remove(&addr).map(RemovedSession::Bound)
    }

    /// Evicts every session silent for longer than `timeout_ms`.
    ///
    /// Each expired session is returned exactly once; the next sweep no
    /// longer sees it.
    pub fn sweep(&mut self, now: u32, timeout_ms: u32) -> Vec<RemovedSession> {
        let stale_addrs: Vec<SocketAddr> = self
            .sessions
            .iter()
            .filter(|(_, info)| info.is_timed_out(now, timeout_ms))
            .map(|(addr, _)| *addr)
            .collect();
        let stale_pending: Vec<u32> = self
            .pending
            .values()
            .filter(|pending| elapsed_ms(now, pending.created_at) > timeout_ms)
            .map(|pending| pending.player_id)
            .collect();

        let mut removed = Vec::with_capacity(stale_addrs.len() + stale_pending.len());
        for addr in stale_addrs {
            if let Some(info) = self.sessions.remove(&addr) {
                debug!("Session for player {} at {} timed out", info.player_id, addr);
                removed.push(RemovedSession::Bound(info));
            }
        }
        for player_id in stale_pending {
            if let Some(pending) = self.pending.remove(&player_id) {
                debug!("Pending player {} never bound, expiring", player_id);
                removed.push(RemovedSession::Pending(pending));
            }
        }
        removed
    }

    pub fn find_client_by_addr(&self, addr: SocketAddr) -> Option<u32> {
        self.sessions.get(&addr).map(|info| info.player_id)
    }

    pub fn addr_of(&self, player_id: u32) -> Option<SocketAddr> {
        self.sessions
            .values()
            .find(|info| info.player_id == player_id)
            .map(|info| info.addr)
    }

    pub fn client(&self, addr: SocketAddr) -> Option<&ClientInfo> {
        self.sessions.get(&addr)
    }

    /// Gets all bound player ids and their addresses, for broadcasting.
    pub fn get_client_addrs(&self) -> Vec<(u32, SocketAddr)> {
        self.sessions
            .values()
            .map(|info| (info.player_id, info.addr))
            .collect()
    }

    pub fn is_pending(&self, player_id: u32) -> bool {
        self.pending.contains_key(&player_id)
    }

    pub fn contains_player(&self, player_id: u32) -> bool {
        self.is_pending(player_id) || self.addr_of(player_id).is_some()
    }

    pub fn bound_count(&self) -> usize {
        self.sessions.len()
    }

    /// Returns the number of pending plus bound sessions
    pub fn len(&self) -> usize {
        self.sessions.len() + self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::{InputFlags, PingPacket, PlayerDisconnectPacket, PlayerInputPacket};

    fn test_addr() -> SocketAddr {
        "127.0.0.1:8080".parse().unwrap()
    }

    fn local() -> IpAddr {
        test_addr().ip()
    }

    fn test_addr2() -> SocketAddr {
        "127.0.0.1:8081".parse().unwrap()
    }

    fn input(player_id: u32, tick: u32) -> FastPacket {
        FastPacket::PlayerInput(PlayerInputPacket {
            player_id,
            tick,
            inputs: InputFlags::empty(),
        })
    }

    fn ping() -> FastPacket {
        FastPacket::Ping(PingPacket { timestamp: 1 })
    }

    #[test]
    fn test_registry_creation() {
        let registry = SessionRegistry::new(5);
        assert_eq!(registry.max_clients, 5);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_reserve_assigns_fresh_ids() {
        let mut registry = SessionRegistry::new(3);
        assert_eq!(registry.reserve("a", local(), 0), Ok(1));
        assert_eq!(registry.reserve("b", local(), 0), Ok(2));
        assert_eq!(registry.len(), 2);
        assert!(registry.is_pending(1));

        registry.remove_player(1);
        assert_eq!(registry.reserve("c", local(), 0), Ok(3));
    }

    #[test]
    fn test_reserve_at_capacity() {
        let mut registry = SessionRegistry::new(1);
        assert!(registry.reserve("a", local(), 0).is_ok());
        assert_eq!(registry.reserve("b", local(), 0), Err(RejectReason::ServerFull));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_unknown_address_is_rejected() {
        let mut registry = SessionRegistry::new(2);
        assert_eq!(registry.resolve(test_addr(), &ping(), 0), None);
        // claims an id nobody reserved
        assert_eq!(registry.resolve(test_addr(), &input(7, 1), 0), None);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_ping_cannot_bind_pending_session() {
        let mut registry = SessionRegistry::new(2);
        registry.reserve("a", local(), 0).unwrap();
        assert_eq!(registry.resolve(test_addr(), &ping(), 0), None);
        assert!(registry.is_pending(1));
    }

    #[test]
    fn test_input_binds_pending_session() {
        let mut registry = SessionRegistry::new(2);
        let id = registry.reserve("a", local(), 0).unwrap();

        assert_eq!(
            registry.resolve(test_addr(), &input(id, 1), 10),
            Some(Admission::Bound(id))
        );
        assert!(!registry.is_pending(id));
        assert_eq!(registry.find_client_by_addr(test_addr()), Some(id));
        assert_eq!(registry.addr_of(id), Some(test_addr()));

        assert_eq!(
            registry.resolve(test_addr(), &ping(), 20),
            Some(Admission::Known(id))
        );
        let info = registry.client(test_addr()).unwrap();
        assert_eq!(info.last_seen, 20);
        assert_eq!(info.packets_received, 2);
        assert_eq!(info.last_input_tick, Some(1));
        assert_eq!(info.username, "a");
    }

    #[test]
    fn test_bound_id_cannot_be_claimed_from_other_address() {
        let mut registry = SessionRegistry::new(2);
        let id = registry.reserve("a", local(), 0).unwrap();
        registry.resolve(test_addr(), &input(id, 1), 0);

        assert_eq!(registry.resolve(test_addr2(), &input(id, 2), 0), None);
        assert_eq!(registry.addr_of(id), Some(test_addr()));
    }

    #[test]
    fn test_pending_id_cannot_be_claimed_from_other_host() {
        let mut registry = SessionRegistry::new(2);
        let id = registry.reserve("victim", local(), 0).unwrap();
        let stranger: SocketAddr = "10.66.66.66:4444".parse().unwrap();

        assert_eq!(registry.resolve(stranger, &input(id, 1), 0), None);
        assert!(registry.is_pending(id));
        assert_eq!(registry.find_client_by_addr(stranger), None);

        assert_eq!(
            registry.resolve(test_addr(), &input(id, 1), 0),
            Some(Admission::Bound(id))
        );
        assert_eq!(registry.addr_of(id), Some(test_addr()));
    }

    #[test]
    fn test_last_input_tick_keeps_newest() {
        let mut registry = SessionRegistry::new(2);
        let id = registry.reserve("a", local(), 0).unwrap();
        registry.resolve(test_addr(), &input(id, 5), 0);
        registry.resolve(test_addr(), &input(id, 3), 0);
        assert_eq!(registry.client(test_addr()).unwrap().last_input_tick, Some(5));
    }

    #[test]
    fn test_disconnect_packet_binds_then_removes() {
        let mut registry = SessionRegistry::new(2);
        let id = registry.reserve("a", local(), 0).unwrap();
        let packet = FastPacket::PlayerDisconnect(PlayerDisconnectPacket { player_id: id });

        assert_eq!(
            registry.resolve(test_addr(), &packet, 0),
            Some(Admission::Bound(id))
        );
        let removed = registry.remove_player(id).unwrap();
        assert!(removed.was_bound());
        assert!(registry.is_empty());
        assert!(registry.remove_player(id).is_none());
    }

    #[test]
    fn test_sweep_evicts_exactly_once() {
        let mut registry = SessionRegistry::new(3);
        let quiet = registry.reserve("quiet", local(), 0).unwrap();
        let chatty = registry.reserve("chatty", local(), 0).unwrap();
        registry.resolve(test_addr(), &input(quiet, 1), 0);
        registry.resolve(test_addr2(), &input(chatty, 1), 0);

        assert!(registry.sweep(3000, 3000).is_empty());

        registry.resolve(test_addr2(), &ping(), 2500);
        let removed = registry.sweep(3001, 3000);
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].player_id(), quiet);

        assert!(registry.sweep(3002, 3000).is_empty());
        assert_eq!(registry.get_client_addrs(), vec![(chatty, test_addr2())]);
    }

    #[test]
    fn test_sweep_expires_unbound_pending() {
        let mut registry = SessionRegistry::new(1);
        let id = registry.reserve("ghost", local(), 100).unwrap();

        assert!(registry.sweep(3100, 3000).is_empty());
        let removed = registry.sweep(3101, 3000);
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].player_id(), id);
        assert!(!removed[0].was_bound());

        // slot freed
        assert!(registry.reserve("next", local(), 3101).is_ok());
    }

    #[test]
    fn test_timeout_survives_clock_wrap() {
        let mut registry = SessionRegistry::new(1);
        let id = registry.reserve("a", local(), u32::MAX - 10).unwrap();
        registry.resolve(test_addr(), &input(id, 1), u32::MAX - 10);
        assert!(registry.sweep(20, 3000).is_empty());
        assert_eq!(registry.sweep(3000, 3000).len(), 1);
    }

    #[test]
    fn test_close_reason_codes() {
        assert_eq!(
            CloseReason::Timeout.reject_reason(),
            Some(RejectReason::SessionTimeout)
        );
        assert_eq!(CloseReason::Kicked.reject_reason(), Some(RejectReason::Kicked));
        assert_eq!(CloseReason::Disconnected.reject_reason(), None);
    }
}
