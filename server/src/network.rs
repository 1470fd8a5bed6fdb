//! Server network layer: fast-path UDP traffic and the processing loop
//!
//! The receive task decodes datagrams, resolves the sender in the session
//! registry and pushes admitted packets onto a bounded queue. The processing
//! loop is the only consumer of that queue and the only caller of the
//! [`SyncDriver`]. Lifecycle events travel over an unbounded channel because
//! they must never be dropped.

use crate::client_manager::{Admission, CloseReason, RemovedSession, SessionRegistry};
use crate::config::ServerConfig;
use crate::game::{GameState, Outbound, SyncDriver};
use crate::tcp::{ControlLinks, ControlNotice, ReliableServer};
use log::{debug, error, info, warn};
use shared::{
    decode, encode, Clock, FastPacket, PlayerDisconnectPacket, PongPacket, RingBuffer,
    SharedClock, MAX_PACKET_SIZE,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, Notify, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, Interval, MissedTickBehavior};

pub type ServerResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

/// A decoded packet from a bound session, waiting in the packet queue.
#[derive(Debug, Clone, PartialEq)]
pub struct Inbound {
    pub player_id: u32,
    pub addr: SocketAddr,
    pub packet: FastPacket,
}

/// Messages sent from network tasks to the processing loop
#[derive(Debug)]
pub enum ServerMessage {
    SessionBound {
        player_id: u32,
        addr: SocketAddr,
    },
    /// Already removed from the registry by the sender of this message.
    SessionClosed {
        session: RemovedSession,
        reason: CloseReason,
    },
    Kick {
        player_id: u32,
    },
    Shutdown,
}

/// Messages sent from the processing loop to the sender task
#[derive(Debug)]
pub enum GameMessage {
    SendPacket {
        packet: FastPacket,
        addr: SocketAddr,
    },
    SendToPlayer {
        packet: FastPacket,
        player_id: u32,
    },
    BroadcastPacket {
        packet: FastPacket,
        exclude: Option<u32>,
    },
}

/// Control handle usable while [`Server::run`] owns the server.
#[derive(Debug, Clone)]
pub struct ServerHandle {
    server_tx: mpsc::UnboundedSender<ServerMessage>,
}

impl ServerHandle {
    /// Closes the player's session and tells its reliable connection why.
    pub fn kick(&self, player_id: u32) -> bool {
        self.server_tx
            .send(ServerMessage::Kick { player_id })
            .is_ok()
    }

    pub fn shutdown(&self) -> bool {
        self.server_tx.send(ServerMessage::Shutdown).is_ok()
    }
}

/// Tick timer for the processing loop. Missed ticks are skipped, since
/// catch-up ticks would share a timestamp.
fn tick_interval(period: Duration) -> Interval {
    let mut ticks = interval(period);
    ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticks
}

/// Main server coordinating both channels and the sync driver
pub struct Server {
    config: ServerConfig,
    socket: Arc<UdpSocket>,
    control: Option<ReliableServer>,
    control_addr: SocketAddr,
    links: ControlLinks,
    clients: Arc<RwLock<SessionRegistry>>,
    inbound: Arc<RingBuffer<Inbound>>,
    inbound_ready: Arc<Notify>,
    driver: Box<dyn SyncDriver>,
    clock: SharedClock,
    tasks: Vec<JoinHandle<()>>,

    // Communication channels
    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
    game_tx: mpsc::UnboundedSender<GameMessage>,
    game_rx: mpsc::UnboundedReceiver<GameMessage>,
}

impl Server {
    /// Binds both channels with the reference driver and a monotonic clock.
    pub async fn bind(config: ServerConfig) -> ServerResult<Self> {
        Self::new(config, Box::new(GameState::new()), Clock::shared()).await
    }

    pub async fn new(
        config: ServerConfig,
        driver: Box<dyn SyncDriver>,
        clock: SharedClock,
    ) -> ServerResult<Self> {
        let socket = Arc::new(UdpSocket::bind(config.udp_addr()).await?);
        let udp_port = socket.local_addr()?.port();
        info!("Fast-path channel listening on {}", socket.local_addr()?);

        let clients = Arc::new(RwLock::new(SessionRegistry::new(config.max_clients)));
        let control = ReliableServer::bind(
            &config.tcp_addr(),
            Arc::clone(&clients),
            Arc::clone(&clock),
            config.protocol_version,
            udp_port,
        )
        .await?;
        let control_addr = control.local_addr()?;
        let links = control.links();

        let (server_tx, server_rx) = mpsc::unbounded_channel();
        let (game_tx, game_rx) = mpsc::unbounded_channel();

        Ok(Server {
            config,
            socket,
            control: Some(control),
            control_addr,
            links,
            clients,
            inbound: Arc::new(RingBuffer::new()),
            inbound_ready: Arc::new(Notify::new()),
            driver,
            clock,
            tasks: Vec::new(),
            server_tx,
            server_rx,
            game_tx,
            game_rx,
        })
    }

    pub fn udp_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn tcp_addr(&self) -> SocketAddr {
        self.control_addr
    }

    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            server_tx: self.server_tx.clone(),
        }
    }

    pub fn registry(&self) -> Arc<RwLock<SessionRegistry>> {
        Arc::clone(&self.clients)
    }

    /// Spawns task that continuously listens for incoming datagrams
    fn spawn_network_receiver(&mut self) {
        let socket = Arc::clone(&self.socket);
        let clients = Arc::clone(&self.clients);
        let inbound = Arc::clone(&self.inbound);
        let inbound_ready = Arc::clone(&self.inbound_ready);
        let clock = Arc::clone(&self.clock);
        let server_tx = self.server_tx.clone();

        self.tasks.push(tokio::spawn(async move {
            let mut buffer = [0u8; MAX_PACKET_SIZE];

            loop {
                let (len, addr) = match socket.recv_from(&mut buffer).await {
                    Ok(received) => received,
                    Err(e) => {
                        error!("Error receiving packet: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        continue;
                    }
                };

                let packet = match decode(&buffer[..len]) {
                    Ok(packet) => packet,
                    Err(e) => {
                        warn!("Dropping datagram from {}: {}", addr, e);
                        continue;
                    }
                };

                let admission = {
                    let mut clients_guard = clients.write().await;
                    clients_guard.resolve(addr, &packet, clock.now_ms())
                };
                let Some(admission) = admission else {
                    warn!(
                        "Dropping {} from unknown peer {}",
                        packet.message_type().name(),
                        addr
                    );
                    continue;
                };

                let player_id = admission.player_id();
                if let Admission::Bound(_) = admission {
                    if server_tx
                        .send(ServerMessage::SessionBound { player_id, addr })
                        .is_err()
                    {
                        break;
                    }
                }

                if let FastPacket::PlayerDisconnect(_) = packet {
                    let removed = {
                        let mut clients_guard = clients.write().await;
                        clients_guard.remove_player(player_id)
                    };
                    if let Some(session) = removed {
                        let message = ServerMessage::SessionClosed {
                            session,
                            reason: CloseReason::Disconnected,
                        };
                        if server_tx.send(message).is_err() {
                            break;
                        }
                    }
                    continue;
                }

                if inbound.push(Inbound {
                    player_id,
                    addr,
                    packet,
                }) {
                    inbound_ready.notify_one();
                } else {
                    warn!("Packet queue full, dropping packet from player {}", player_id);
                }
            }
        }));
    }

    /// Spawns task that processes outgoing packet queue
    fn spawn_network_sender(&mut self) {
        let socket = Arc::clone(&self.socket);
        let clients = Arc::clone(&self.clients);
        let mut game_rx = std::mem::replace(&mut self.game_rx, mpsc::unbounded_channel().1);

        self.tasks.push(tokio::spawn(async move {
            while let Some(message) = game_rx.recv().await {
                match message {
                    GameMessage::SendPacket { packet, addr } => {
                        Self::send_packet_impl(&socket, &packet, addr).await;
                    }
                    GameMessage::SendToPlayer { packet, player_id } => {
                        let addr = {
                            let clients_guard = clients.read().await;
                            clients_guard.addr_of(player_id)
                        };
                        match addr {
                            Some(addr) => Self::send_packet_impl(&socket, &packet, addr).await,
                            None => debug!("Player {} is gone, dropping send", player_id),
                        }
                    }
                    GameMessage::BroadcastPacket { packet, exclude } => {
                        let client_addrs = {
                            let clients_guard = clients.read().await;
                            clients_guard.get_client_addrs()
                        };

                        for (player_id, addr) in client_addrs {
                            if Some(player_id) == exclude {
                                continue;
                            }
                            Self::send_packet_impl(&socket, &packet, addr).await;
                        }
                    }
                }
            }
        }));
    }

    /// Spawns task that evicts silent sessions on its own cadence
    fn spawn_timeout_checker(&mut self) {
        let clients = Arc::clone(&self.clients);
        let clock = Arc::clone(&self.clock);
        let server_tx = self.server_tx.clone();
        let sweep_interval = self.config.sweep_interval;
        let timeout_ms = self.config.session_timeout_ms();

        self.tasks.push(tokio::spawn(async move {
            let mut interval = interval(sweep_interval);

            loop {
                interval.tick().await;

                let timed_out = {
                    let mut clients_guard = clients.write().await;
                    clients_guard.sweep(clock.now_ms(), timeout_ms)
                };

                for session in timed_out {
                    let message = ServerMessage::SessionClosed {
                        session,
                        reason: CloseReason::Timeout,
                    };
                    if let Err(e) = server_tx.send(message) {
                        error!("Failed to send timeout message: {}", e);
                        return;
                    }
                }
            }
        }));
    }

    async fn send_packet_impl(socket: &UdpSocket, packet: &FastPacket, addr: SocketAddr) {
        let data = match encode(packet) {
            Ok(data) => data,
            Err(e) => {
                error!("Failed to encode {}: {}", packet.message_type().name(), e);
                return;
            }
        };
        if let Err(e) = socket.send_to(&data, addr).await {
            error!("Failed to send packet to {}: {}", addr, e);
        }
    }

    fn queue(&self, message: GameMessage) {
        if let Err(e) = self.game_tx.send(message) {
            error!("Failed to queue packet for sending: {}", e);
        }
    }

    fn dispatch(&self, outbound: Vec<Outbound>) {
        for out in outbound {
            let message = match out {
                Outbound::To { player_id, packet } => GameMessage::SendToPlayer { packet, player_id },
                Outbound::Broadcast { packet, exclude } => {
                    GameMessage::BroadcastPacket { packet, exclude }
                }
            };
            self.queue(message);
        }
    }

    /// Applies a lifecycle event. Returns false when the loop should stop.
    async fn handle_message(&mut self, message: ServerMessage) -> bool {
        match message {
            ServerMessage::SessionBound { player_id, addr } => {
                debug!("Player {} joined from {}", player_id, addr);
                let outbound = self.driver.player_joined(player_id, self.clock.now_ms());
                self.dispatch(outbound);
            }
            ServerMessage::SessionClosed { session, reason } => {
                self.close_session(session, reason).await;
            }
            ServerMessage::Kick { player_id } => {
                let removed = {
                    let mut clients = self.clients.write().await;
                    clients.remove_player(player_id)
                };
                match removed {
                    Some(session) => self.close_session(session, CloseReason::Kicked).await,
                    None => debug!("Kick for unknown player {}", player_id),
                }
            }
            ServerMessage::Shutdown => return false,
        }
        true
    }

    async fn close_session(&mut self, session: RemovedSession, reason: CloseReason) {
        let player_id = session.player_id();
        info!("Session for player {} closed ({:?})", player_id, reason);

        let link = self.links.lock().await.remove(&player_id);
        if let Some(link) = link {
            let _ = link.send(ControlNotice::Close(reason.reject_reason()));
        }

        // pending sessions never reached the driver or the other players
        if session.was_bound() {
            let outbound = self.driver.player_left(player_id, self.clock.now_ms());
            self.dispatch(outbound);
            self.queue(GameMessage::BroadcastPacket {
                packet: FastPacket::PlayerDisconnect(PlayerDisconnectPacket { player_id }),
                exclude: Some(player_id),
            });
        }
    }

    /// Drains pending lifecycle events and then the packet queue.
    async fn process_inbound(&mut self) -> bool {
        while let Ok(message) = self.server_rx.try_recv() {
            if !self.handle_message(message).await {
                return false;
            }
        }

        for Inbound {
            player_id,
            addr,
            packet,
        } in self.inbound.drain()
        {
            // the session may have closed after this packet was queued
            let current = self.clients.read().await.find_client_by_addr(addr);
            if current != Some(player_id) {
                debug!(
                    "Player {} is gone, dropping queued {}",
                    player_id,
                    packet.message_type().name()
                );
                continue;
            }

            let now = self.clock.now_ms();
            if let FastPacket::Ping(ping) = &packet {
                self.queue(GameMessage::SendPacket {
                    packet: FastPacket::Pong(PongPacket::echo(ping)),
                    addr,
                });
            }
            let outbound = self.driver.handle_packet(player_id, packet, now);
            self.dispatch(outbound);
        }
        true
    }

    /// Main server loop coordinating all operations
    pub async fn run(&mut self) -> ServerResult<()> {
        if let Some(control) = self.control.take() {
            self.tasks.push(control.spawn());
        }
        self.spawn_network_receiver();
        self.spawn_network_sender();
        self.spawn_timeout_checker();

        let mut tick_interval = tick_interval(self.config.tick_duration);
        let inbound_ready = Arc::clone(&self.inbound_ready);

        info!("Server started successfully");

        loop {
            let keep_running = tokio::select! {
                message = self.server_rx.recv() => match message {
                    Some(message) => self.handle_message(message).await,
                    None => false,
                },

                _ = inbound_ready.notified() => self.process_inbound().await,

                _ = tick_interval.tick() => {
                    let running = self.process_inbound().await;
                    let outbound = self.driver.tick(self.clock.now_ms());
                    self.dispatch(outbound);
                    running
                },
            };

            if !keep_running {
                info!("Server shutting down");
                break;
            }
        }

        for task in self.tasks.drain(..) {
            task.abort();
        }
        Ok(())
    }
}
