//! Single-peer Bitcoin gossip client.
//!
//! Connects to one node, negotiates a protocol version, asks for
//! everything the peer advertises, and streams the blocks and
//! transactions it receives to a [`Consumer`].
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::SystemTime;
//!
//! use btc_watchtower::wire::{Block, Network};
//! use btc_watchtower::{Consumer, Session, SessionConfig, TxWithContext};
//!
//! struct Print;
//!
//! impl Consumer for Print {
//!     fn on_block(&self, _received: SystemTime, block: &Block) {
//!         println!("block {}", block.hash());
//!     }
//!
//!     fn on_transaction(&self, tx: TxWithContext) {
//!         println!("tx {}", tx.tx.txid());
//!     }
//! }
//!
//! let session = Session::new(SessionConfig::new("127.0.0.1:18333", Network::Testnet3));
//! let err = session.run(Arc::new(Print)).unwrap_err();
//! eprintln!("{err}");
//! ```

pub mod config;
pub mod dispatch;
pub mod endpoint;
pub mod error;
pub mod handshake;
pub mod logging;
pub mod params;
pub mod pipeline;
pub mod script;
pub mod session;
pub mod wire;

pub use config::SessionConfig;
pub use endpoint::{Endpoint, Interrupt};
pub use error::{Result, WatchError};
pub use params::ConnParams;
pub use pipeline::{Consumer, TxWithContext};
pub use script::ScriptClass;
pub use session::Session;
