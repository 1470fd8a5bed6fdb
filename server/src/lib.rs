//! # Sync Server Library
//!
//! This library provides the server half of the network synchronization
//! layer: a reliable handshake channel, a fast-path gameplay channel, and the
//! session bookkeeping that ties the two together. Game content is supplied
//! by a [`game::SyncDriver`] implementation; the network core never decides
//! what a packet means for the world.
//!
//! ## Channels
//!
//! ### Reliable Channel (`tcp`)
//! Clients open a TCP connection and send a ConnectRequest carrying their
//! protocol version and username. The server answers with a ConnectResponse
//! (player id and fast-path port) or an ErrorResponse naming the reason. The
//! same connection later carries fatal notices such as a timeout or a kick.
//!
//! ### Fast-path Channel (`network`)
//! Gameplay traffic travels over UDP in small fixed-size packets. Lost or
//! reordered datagrams are tolerated; receivers rely on timestamps and tick
//! numbers to ignore stale state.
//!
//! ## Session Lifecycle
//!
//! 1. A successful handshake reserves a player id as a pending session.
//! 2. The first input (or disconnect) carrying that id from a new address
//!    binds the session to the address.
//! 3. Every packet from the address refreshes its last-seen time.
//! 4. A voluntary disconnect, a kick, or silence longer than the session
//!    timeout closes the session exactly once. Remaining players receive a
//!    PLAYER_DISCONNECT.
//!
//! Packets from addresses without a session are dropped and logged.
//!
//! ## Architecture
//!
//! The server runs several cooperating tasks:
//! - **Control Acceptor**: one task per TCP connection running the handshake
//! - **Network Receiver**: decodes datagrams and pushes them onto a bounded
//!   packet queue
//! - **Network Sender**: encodes and sends queued outbound packets
//! - **Timeout Checker**: evicts silent sessions on a fixed cadence
//! - **Processing Loop**: the single consumer of the packet queue and the
//!   only caller of the sync driver
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::ServerConfig;
//! use server::network::Server;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//!     let mut server = Server::bind(ServerConfig::default()).await?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod client_manager;
pub mod config;
pub mod game;
pub mod network;
pub mod tcp;
