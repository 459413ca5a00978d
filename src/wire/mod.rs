//! Bitcoin P2P wire protocol.
//!
//! This module reads and writes Bitcoin P2P messages on any byte stream.
//!
//! It implements:
//! - Framing of the 24-byte message header (magic, command, length, checksum)
//! - Version-aware payload encoding and decoding for the messages the
//!   watchtower acts on (`version`, `verack`, `inv`, `getdata`, `tx`,
//!   `block`, `ping`, `pong`)
//! - Pass-through of every other command as raw bytes
//!
//! Protocol reference:
//! https://developer.bitcoin.org/reference/p2p_networking.html
pub mod codec;

pub mod decode;
pub mod encode;
pub mod message;
pub mod payload;

pub mod constants;

pub use codec::{read_message, write_message};
pub use constants::{Network, PROTOCOL_VERSION};
pub use message::{
    Block, BlockHeader, Command, Hash256, InvVector, InventoryType, Message, Transaction, TxIn,
    TxOut, VersionMessage,
};
