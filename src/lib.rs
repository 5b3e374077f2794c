//! # insteon-protocol
//!
//! Protocol engine for Insteon PowerLinc Modems (serial PLM) and Hubs (TCP port 9761).
//!
//! ## Layers
//! - [`core`]: addresses, flags, typed frames and the Tokio codec that splits the
//!   modem byte stream into them
//! - [`protocol`]: command catalogue, correlation of command codes to operation
//!   names, topic-based event bus and the dispatcher
//! - [`service`]: the supervised connection (write queue, NAK retransmit, reconnect)
//!   and the request/response coordinator
//! - [`aldb`]: link-database mirror with read/write strategies
//! - [`transport`]: TCP, Unix socket and in-memory links
//! - [`config`], [`error`], [`utils`]: configuration, error taxonomy, logging,
//!   metrics, clocks and deduplication
//!
//! ## Example
//! ```no_run
//! use insteon_protocol::config::EngineConfig;
//! use insteon_protocol::protocol::{Command, TopicPattern};
//! use insteon_protocol::service::{Connection, Coordinator};
//! use insteon_protocol::transport::TcpTransport;
//!
//! # async fn run() -> insteon_protocol::error::Result<()> {
//! let config = EngineConfig::from_env()?;
//! let connection = Connection::open(TcpTransport::new(&config.connection.address), &config);
//! let mut events = connection.bus().subscribe(TopicPattern::parse("*.*.on.*")?)?;
//!
//! let coordinator = Coordinator::new(connection.clone());
//! let address = "1a.2b.3c".parse()?;
//! let response = coordinator
//!     .send(&Command::On { address, group: 1, level: 0xFF, fast: false })
//!     .await?;
//! println!("{:?}", response.status);
//!
//! while let Some(event) = events.recv().await {
//!     println!("{}", event.topic);
//! }
//! # Ok(())
//! # }
//! ```

pub mod aldb;
pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod service;
pub mod transport;
pub mod utils;

pub use crate::config::EngineConfig;
pub use crate::core::address::Address;
pub use crate::core::codec::ModemCodec;
pub use crate::core::message::Message;
pub use crate::error::{ProtocolError, Result};
pub use crate::service::{Connection, Coordinator, Response, ResponseStatus};
