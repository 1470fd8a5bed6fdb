//! Client side of both channels.
//!
//! [`ReliableClient`] performs the handshake over TCP and later surfaces
//! fatal notices from the server. [`FastClient`] owns the UDP session: a
//! receive task decodes datagrams into a bounded queue and the caller drains
//! it, so socket reads never wait on game processing.

use crate::error::ClientError;
use log::{debug, info, warn};
use shared::clock::elapsed_ms;
use shared::{
    decode, encode, read_control, write_control, ConnectRequest, ConnectResponse, ControlPacket,
    FastPacket, HandshakeRejected, InputFlags, PingPacket, PlayerDisconnectPacket,
    PlayerInputPacket, RejectReason, RingBuffer, SharedClock, MAX_PACKET_SIZE, PROTOCOL_VERSION,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::Notify;
use tokio::task::JoinHandle;

fn rejected(reason: Option<RejectReason>, message: String) -> HandshakeRejected {
    HandshakeRejected {
        reason: reason.unwrap_or(RejectReason::InvalidRequest),
        message,
    }
}

/// Reliable control connection to the server.
pub struct ReliableClient {
    stream: TcpStream,
    server_addr: SocketAddr,
    session: Option<ConnectResponse>,
}

impl ReliableClient {
    pub async fn connect(server_addr: SocketAddr) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(server_addr).await?;
        stream.set_nodelay(true)?;
        debug!("Control channel connected to {}", server_addr);

        Ok(Self {
            stream,
            server_addr,
            session: None,
        })
    }

    pub fn server_addr(&self) -> SocketAddr {
        self.server_addr
    }

    pub fn session(&self) -> Option<ConnectResponse> {
        self.session
    }

    pub async fn handshake(&mut self, username: &str) -> Result<ConnectResponse, ClientError> {
        self.handshake_with_version(PROTOCOL_VERSION, username).await
    }

    /// Sends a ConnectRequest and waits for the server's verdict.
    pub async fn handshake_with_version(
        &mut self,
        protocol_version: u16,
        username: &str,
    ) -> Result<ConnectResponse, ClientError> {
        let request = ConnectRequest::with_version(protocol_version, username);
        self.send(&ControlPacket::ConnectRequest(request)).await?;

        match self.recv().await? {
            Some(ControlPacket::ConnectResponse(response)) => {
                info!(
                    "Connected as player {} (fast path on port {})",
                    response.player_id, response.udp_port
                );
                self.session = Some(response);
                Ok(response)
            }
            Some(ControlPacket::ErrorResponse(err)) => {
                Err(rejected(err.reason(), err.message()).into())
            }
            Some(other) => Err(ClientError::UnexpectedPacket(other.message_type().name())),
            None => Err(ClientError::ConnectionClosed),
        }
    }

    pub async fn send(&mut self, packet: &ControlPacket) -> Result<(), ClientError> {
        write_control(&mut self.stream, packet).await?;
        Ok(())
    }

    /// Next control packet, or `None` once the server closed the connection.
    pub async fn recv(&mut self) -> Result<Option<ControlPacket>, ClientError> {
        Ok(read_control(&mut self.stream).await?)
    }

    /// Waits until the server ends the session on this channel.
    ///
    /// Returns the notice the server sent, if any, before closing.
    pub async fn wait_for_close(&mut self) -> Result<Option<HandshakeRejected>, ClientError> {
        let mut notice = None;
        while let Some(packet) = self.recv().await? {
            match packet {
                ControlPacket::ErrorResponse(err) => {
                    let reason = rejected(err.reason(), err.message());
                    warn!("Server notice: {}", reason);
                    notice = Some(reason);
                }
                other => debug!("Ignoring {} after handshake", other.message_type().name()),
            }
        }
        self.session = None;
        Ok(notice)
    }
}

/// Fast-path session with the server.
pub struct FastClient {
    socket: Arc<UdpSocket>,
    player_id: u32,
    clock: SharedClock,
    inbound: Arc<RingBuffer<FastPacket>>,
    inbound_ready: Arc<Notify>,
    receiver: JoinHandle<()>,
    input_tick: u32,
    last_rtt_ms: Option<u32>,
    closed: bool,
}

impl FastClient {
    /// Opens the UDP session and announces it with an empty input so the
    /// server binds this address to the player id.
    pub async fn connect(
        server_addr: SocketAddr,
        session: &ConnectResponse,
        clock: SharedClock,
    ) -> Result<Self, ClientError> {
        let bind_addr: SocketAddr = if server_addr.is_ipv4() {
            SocketAddr::from(([0, 0, 0, 0], 0))
        } else {
            SocketAddr::from(([0u16; 8], 0))
        };
        let socket = UdpSocket::bind(bind_addr).await?;
        socket
            .connect(SocketAddr::new(server_addr.ip(), session.udp_port))
            .await?;
        let socket = Arc::new(socket);

        let inbound = Arc::new(RingBuffer::new());
        let inbound_ready = Arc::new(Notify::new());
        let receiver =
            Self::spawn_receiver(Arc::clone(&socket), Arc::clone(&inbound), Arc::clone(&inbound_ready));

        let client = Self {
            socket,
            player_id: session.player_id,
            clock,
            inbound,
            inbound_ready,
            receiver,
            input_tick: 0,
            last_rtt_ms: None,
            closed: false,
        };
        client.send_packet(&client.input_packet(InputFlags::empty())).await?;
        Ok(client)
    }

    fn spawn_receiver(
        socket: Arc<UdpSocket>,
        inbound: Arc<RingBuffer<FastPacket>>,
        inbound_ready: Arc<Notify>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut buffer = [0u8; MAX_PACKET_SIZE];
            loop {
                match socket.recv(&mut buffer).await {
                    Ok(len) => match decode(&buffer[..len]) {
                        Ok(packet) => {
                            if inbound.push(packet) {
                                inbound_ready.notify_one();
                            } else {
                                warn!("Receive queue full, dropping packet");
                            }
                        }
                        Err(e) => warn!("Dropping datagram from server: {}", e),
                    },
                    Err(e) => {
                        // ICMP port unreachable surfaces here on some platforms
                        debug!("Error receiving packet: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        })
    }

    pub fn player_id(&self) -> u32 {
        self.player_id
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ClientError> {
        Ok(self.socket.local_addr()?)
    }

    /// Round-trip time from the most recent pong.
    pub fn rtt_ms(&self) -> Option<u32> {
        self.last_rtt_ms
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn input_packet(&self, inputs: InputFlags) -> FastPacket {
        FastPacket::PlayerInput(PlayerInputPacket {
            player_id: self.player_id,
            tick: self.input_tick,
            inputs,
        })
    }

    pub async fn send_packet(&self, packet: &FastPacket) -> Result<(), ClientError> {
        let data = encode(packet)?;
        self.socket.send(&data).await?;
        Ok(())
    }

    /// Sends the next input sample and returns its tick.
    pub async fn send_input(&mut self, inputs: InputFlags) -> Result<u32, ClientError> {
        if self.closed {
            return Err(ClientError::NotConnected);
        }
        self.input_tick = self.input_tick.wrapping_add(1);
        self.send_packet(&self.input_packet(inputs)).await?;
        Ok(self.input_tick)
    }

    /// Sends a ping stamped with the local clock and returns the stamp.
    pub async fn ping(&self) -> Result<u32, ClientError> {
        let timestamp = self.clock.now_ms();
        self.send_packet(&FastPacket::Ping(PingPacket { timestamp }))
            .await?;
        Ok(timestamp)
    }

    /// Asks the server to end the session without waiting for a timeout.
    pub async fn disconnect(&mut self) -> Result<(), ClientError> {
        if self.closed {
            return Ok(());
        }
        self.send_packet(&FastPacket::PlayerDisconnect(PlayerDisconnectPacket {
            player_id: self.player_id,
        }))
        .await?;
        self.closed = true;
        info!("Player {} disconnected", self.player_id);
        Ok(())
    }

    fn observe(&mut self, packet: &FastPacket) {
        match packet {
            FastPacket::Pong(pong) => {
                let rtt = elapsed_ms(self.clock.now_ms(), pong.timestamp);
                debug!("RTT {} ms", rtt);
                self.last_rtt_ms = Some(rtt);
            }
            FastPacket::PlayerDisconnect(notice) if notice.player_id == self.player_id => {
                info!("Server ended the session for player {}", self.player_id);
                self.closed = true;
            }
            _ => {}
        }
    }

    /// Drains everything received so far without waiting.
    pub fn poll(&mut self) -> Vec<FastPacket> {
        let packets = self.inbound.drain();
        for packet in &packets {
            self.observe(packet);
        }
        packets
    }

    /// Waits until at least one packet is queued, then drains the queue.
    pub async fn recv(&mut self) -> Vec<FastPacket> {
        loop {
            let packets = self.poll();
            if !packets.is_empty() {
                return packets;
            }
            self.inbound_ready.notified().await;
        }
    }
}

impl Drop for FastClient {
    fn drop(&mut self) {
        self.receiver.abort();
    }
}
