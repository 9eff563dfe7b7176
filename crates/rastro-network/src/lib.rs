//! Network layer: the outbound GT06 tracker client and the inbound
//! GT06 server endpoint.
//!
//! Both sides share the codec and reassembler from `rastro-protocol`;
//! this crate adds connection ownership, the client's connection state
//! machine (connect → login → heartbeat/location loop → dispatch →
//! reconnect) and the server's per-connection acknowledgement rules.
//!
//! # Client example
//!
//! ```no_run
//! use rastro_core::{ClientConfig, Position};
//! use rastro_network::Gt06Client;
//!
//! # async fn example() -> rastro_core::Result<()> {
//! let config = ClientConfig::new("tracking.example.com", "356932080000000")?;
//! let client = Gt06Client::new(config)?;
//!
//! let mut events = client.subscribe();
//! client.connect();
//! client.send_position(Position::new(-23.55052, -46.63331));
//!
//! while let Ok(event) = events.recv().await {
//!     println!("{event:?}");
//! }
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod server;

pub use client::Gt06Client;
pub use server::{Gt06Server, Gt06ServerConfig, PeerId, PeerInfo, ServerEvent, ServerHandle};
