//! Reliable control channel: handshake, fatal notices and kicks over TCP.
//!
//! Each accepted connection runs the handshake state machine
//! `Listening -> Handshaking -> Established -> Closed`. Only the first
//! ConnectRequest on a connection can yield a player id; the transport
//! provides ordering and delivery, so no reliability is layered on top.

use crate::client_manager::SessionRegistry;
use log::{debug, error, info, warn};
use shared::{
    read_control, write_control, ConnectRequest, ConnectResponse, ControlPacket, ErrorResponse,
    RejectReason, SharedClock,
};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::{JoinHandle, JoinSet};

/// Handshake progress of one control connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    Listening,
    Handshaking,
    Established { player_id: u32 },
    Closed,
}

/// What the connection task must do after feeding a packet to the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlStep {
    /// Request is well formed; reserve a player id and report back via `admit`.
    Admit(ConnectRequest),
    /// Send this reply; close the connection afterwards if `close` is set.
    Reply { packet: ControlPacket, close: bool },
    /// Nothing to do (connection already closed).
    Ignore,
}

/// Sent from the session lifecycle to an open control connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlNotice {
    /// Close the connection, telling the peer why if a reason is given.
    Close(Option<RejectReason>),
}

/// Open control connections of established players.
pub type ControlLinks = Arc<Mutex<HashMap<u32, mpsc::UnboundedSender<ControlNotice>>>>;

fn error_reply(reason: RejectReason, close: bool) -> ControlStep {
    ControlStep::Reply {
        packet: ControlPacket::ErrorResponse(ErrorResponse::new(reason)),
        close,
    }
}

/// Per-connection handshake state machine, free of I/O.
#[derive(Debug)]
pub struct ControlConnection {
    state: HandshakeState,
    protocol_version: u16,
    udp_port: u16,
}

impl ControlConnection {
    pub fn new(protocol_version: u16, udp_port: u16) -> Self {
        Self {
            state: HandshakeState::Listening,
            protocol_version,
            udp_port,
        }
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// Marks the connection accepted and waiting for its ConnectRequest.
    pub fn accept(&mut self) {
        if self.state == HandshakeState::Listening {
            self.state = HandshakeState::Handshaking;
        }
    }

    pub fn on_packet(&mut self, packet: ControlPacket) -> ControlStep {
        match (self.state, packet) {
            (HandshakeState::Closed, _) => ControlStep::Ignore,
            (HandshakeState::Listening, _) => {
                self.state = HandshakeState::Closed;
                error_reply(RejectReason::InvalidRequest, true)
            }
            (HandshakeState::Handshaking, ControlPacket::ConnectRequest(request)) => {
                if request.protocol_version != self.protocol_version {
                    self.state = HandshakeState::Closed;
                    return error_reply(RejectReason::VersionMismatch, true);
                }
                ControlStep::Admit(request)
            }
            (HandshakeState::Handshaking, _) => {
                self.state = HandshakeState::Closed;
                error_reply(RejectReason::InvalidRequest, true)
            }
            (HandshakeState::Established { .. }, ControlPacket::ConnectRequest(_)) => {
                error_reply(RejectReason::AlreadyConnected, false)
            }
            (HandshakeState::Established { .. }, _) => error_reply(RejectReason::InvalidRequest, false),
        }
    }

    /// Completes an `Admit` step with the registry's answer.
    pub fn admit(&mut self, result: Result<u32, RejectReason>) -> ControlStep {
        match result {
            Ok(player_id) => {
                self.state = HandshakeState::Established { player_id };
                ControlStep::Reply {
                    packet: ControlPacket::ConnectResponse(ConnectResponse {
                        player_id,
                        udp_port: self.udp_port,
                    }),
                    close: false,
                }
            }
            Err(reason) => {
                self.state = HandshakeState::Closed;
                error_reply(reason, true)
            }
        }
    }

    pub fn close(&mut self) {
        self.state = HandshakeState::Closed;
    }
}

struct ControlShared {
    registry: Arc<RwLock<SessionRegistry>>,
    clock: SharedClock,
    links: ControlLinks,
    protocol_version: u16,
    udp_port: u16,
}

/// Accepts control connections and runs one handshake task per connection.
pub struct ReliableServer {
    listener: TcpListener,
    shared: Arc<ControlShared>,
}

impl ReliableServer {
    pub async fn bind(
        addr: &str,
        registry: Arc<RwLock<SessionRegistry>>,
        clock: SharedClock,
        protocol_version: u16,
        udp_port: u16,
    ) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!("Control channel listening on {}", listener.local_addr()?);

        Ok(Self {
            listener,
            shared: Arc::new(ControlShared {
                registry,
                clock,
                links: Arc::new(Mutex::new(HashMap::new())),
                protocol_version,
                udp_port,
            }),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn links(&self) -> ControlLinks {
        Arc::clone(&self.shared.links)
    }

    /// Spawns the accept loop.
    ///
    /// Connection tasks live in a set owned by the loop, so aborting the
    /// returned handle also closes every open control connection.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut connections = JoinSet::new();
            loop {
                tokio::select! {
                    accepted = self.listener.accept() => match accepted {
                        Ok((stream, peer)) => {
                            debug!("Control connection from {}", peer);
                            connections.spawn(handle_connection(stream, peer, Arc::clone(&self.shared)));
                        }
                        Err(e) => {
                            error!("Error accepting control connection: {}", e);
                            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                        }
                    },

                    Some(finished) = connections.join_next(), if !connections.is_empty() => {
                        if let Err(e) = finished {
                            error!("Control connection task failed: {}", e);
                        }
                    }
                }
            }
        })
    }
}

async fn handle_connection(mut stream: TcpStream, peer: SocketAddr, shared: Arc<ControlShared>) {
    let mut connection = ControlConnection::new(shared.protocol_version, shared.udp_port);
    connection.accept();

    let (notice_tx, mut notice_rx) = mpsc::unbounded_channel();
    let (mut reader, mut writer) = stream.split();

    loop {
        tokio::select! {
            read = read_control(&mut reader) => {
                let packet = match read {
                    Ok(Some(packet)) => packet,
                    Ok(None) => {
                        debug!("Control connection {} closed by peer", peer);
                        break;
                    }
                    Err(e) => {
                        warn!("Bad control packet from {}: {}", peer, e);
                        let reply = ControlPacket::ErrorResponse(ErrorResponse::new(RejectReason::InvalidRequest));
                        let _ = write_control(&mut writer, &reply).await;
                        break;
                    }
                };

                let mut step = connection.on_packet(packet);
                if let ControlStep::Admit(request) = step {
                    let username = request.username();
                    let result = {
                        let now = shared.clock.now_ms();
                        let mut registry = shared.registry.write().await;
                        registry.reserve(&username, peer.ip(), now)
                    };
                    step = connection.admit(result);
                    match result {
                        Ok(player_id) => {
                            info!("Handshake from {} accepted: '{}' is player {}", peer, username, player_id);
                            shared.links.lock().await.insert(player_id, notice_tx.clone());
                        }
                        Err(reason) => warn!("Handshake from {} rejected: {}", peer, reason),
                    }
                }

                match step {
                    ControlStep::Reply { packet, close } => {
                        if let Err(e) = write_control(&mut writer, &packet).await {
                            error!("Failed to write control reply to {}: {}", peer, e);
                            break;
                        }
                        if close {
                            break;
                        }
                    }
                    ControlStep::Ignore | ControlStep::Admit(_) => {}
                }
            }

            notice = notice_rx.recv() => {
                if let Some(ControlNotice::Close(Some(reason))) = notice {
                    let reply = ControlPacket::ErrorResponse(ErrorResponse::new(reason));
                    let _ = write_control(&mut writer, &reply).await;
                }
                break;
            }
        }
    }

    if let HandshakeState::Established { player_id } = connection.state() {
        let mut links = shared.links.lock().await;
        // only drop our own link; a notice may already have removed it
        if links
            .get(&player_id)
            .map(|link| link.same_channel(&notice_tx))
            .unwrap_or(false)
        {
            links.remove(&player_id);
        }
    }
    connection.close();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(version: u16) -> ControlPacket {
        ControlPacket::ConnectRequest(ConnectRequest::with_version(version, "pilot"))
    }

    fn handshaking() -> ControlConnection {
        let mut connection = ControlConnection::new(1, 5252);
        connection.accept();
        connection
    }

    #[test]
    fn test_accept_moves_to_handshaking() {
        let mut connection = ControlConnection::new(1, 5252);
        assert_eq!(connection.state(), HandshakeState::Listening);
        connection.accept();
        assert_eq!(connection.state(), HandshakeState::Handshaking);
    }

    #[test]
    fn test_successful_handshake() {
        let mut connection = handshaking();
        let step = connection.on_packet(request(1));
        assert!(matches!(step, ControlStep::Admit(_)));

        let reply = connection.admit(Ok(3));
        assert_eq!(
            reply,
            ControlStep::Reply {
                packet: ControlPacket::ConnectResponse(ConnectResponse {
                    player_id: 3,
                    udp_port: 5252
                }),
                close: false,
            }
        );
        assert_eq!(connection.state(), HandshakeState::Established { player_id: 3 });
    }

    #[test]
    fn test_duplicate_request_rejected_without_new_id() {
        let mut connection = handshaking();
        connection.on_packet(request(1));
        connection.admit(Ok(3));

        let step = connection.on_packet(request(1));
        assert_eq!(step, error_reply(RejectReason::AlreadyConnected, false));
        assert_eq!(connection.state(), HandshakeState::Established { player_id: 3 });
    }

    #[test]
    fn test_version_mismatch_closes() {
        let mut connection = handshaking();
        let step = connection.on_packet(request(2));
        assert_eq!(step, error_reply(RejectReason::VersionMismatch, true));
        assert_eq!(connection.state(), HandshakeState::Closed);
    }

    #[test]
    fn test_capacity_rejection_closes() {
        let mut connection = handshaking();
        connection.on_packet(request(1));
        let step = connection.admit(Err(RejectReason::ServerFull));
        assert_eq!(step, error_reply(RejectReason::ServerFull, true));
        assert_eq!(connection.state(), HandshakeState::Closed);
    }

    #[test]
    fn test_server_packet_from_client_is_invalid() {
        let mut connection = handshaking();
        let bogus = ControlPacket::ConnectResponse(ConnectResponse {
            player_id: 1,
            udp_port: 1,
        });
        assert_eq!(
            connection.on_packet(bogus),
            error_reply(RejectReason::InvalidRequest, true)
        );
        assert_eq!(connection.on_packet(request(1)), ControlStep::Ignore);
    }

    #[tokio::test]
    async fn test_handshake_over_loopback() {
        let registry = Arc::new(RwLock::new(SessionRegistry::new(1)));
        let server = ReliableServer::bind(
            "127.0.0.1:0",
            Arc::clone(&registry),
            shared::Clock::shared(),
            1,
            6000,
        )
        .await
        .unwrap();
        let addr = server.local_addr().unwrap();
        let links = server.links();
        let accept_task = server.spawn();

        let mut stream = TcpStream::connect(addr).await.unwrap();
        write_control(&mut stream, &request(1)).await.unwrap();
        let reply = read_control(&mut stream).await.unwrap();
        assert_eq!(
            reply,
            Some(ControlPacket::ConnectResponse(ConnectResponse {
                player_id: 1,
                udp_port: 6000
            }))
        );
        assert!(registry.read().await.is_pending(1));
        assert!(links.lock().await.contains_key(&1));

        // second connection hits the capacity limit
        let mut second = TcpStream::connect(addr).await.unwrap();
        write_control(&mut second, &request(1)).await.unwrap();
        match read_control(&mut second).await.unwrap() {
            Some(ControlPacket::ErrorResponse(err)) => {
                assert_eq!(err.reason(), Some(RejectReason::ServerFull))
            }
            other => panic!("expected rejection, got {:?}", other),
        }
        assert_eq!(read_control(&mut second).await.unwrap(), None);

        // established connections go down with the accept loop
        accept_task.abort();
        let closed =
            tokio::time::timeout(std::time::Duration::from_secs(2), read_control(&mut stream)).await;
        assert!(matches!(closed, Ok(Ok(None)) | Ok(Err(_))));
    }
}
