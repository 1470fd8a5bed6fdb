//! # Sync Client Library
//!
//! Client half of the network synchronization layer. A session is opened in
//! two steps:
//!
//! 1. [`network::ReliableClient`] connects over TCP and performs the
//!    handshake, receiving a player id and the server's fast-path port.
//! 2. [`network::FastClient`] opens the UDP session for that player id,
//!    sends inputs and pings, and queues everything the server broadcasts.
//!
//! Received snapshots are folded into a [`game::ClientWorld`], which keeps
//! only the newest state per entity and player and ignores updates for
//! entities it never saw spawn.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::game::ClientWorld;
//! use client::network::{FastClient, ReliableClient};
//! use shared::{Clock, InputFlags};
//!
//! # async fn run() -> Result<(), client::ClientError> {
//! let server = "127.0.0.1:4242".parse().expect("address");
//! let mut control = ReliableClient::connect(server).await?;
//! let session = control.handshake("pilot").await?;
//!
//! let mut fast = FastClient::connect(server, &session, Clock::shared()).await?;
//! let mut world = ClientWorld::new();
//!
//! fast.send_input(InputFlags::RIGHT | InputFlags::SHOOT).await?;
//! for packet in fast.recv().await {
//!     world.apply(&packet);
//! }
//! fast.disconnect().await?;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod game;
pub mod network;

pub use error::ClientError;
