use sha2::{Digest, Sha256};
use std::fmt::{self, Debug, Display, Formatter};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use crate::wire::encode::Encode;

/// A raw Bitcoin P2P message frame.
///
/// This struct represents a message as transmitted on the wire
/// according to the Bitcoin P2P protocol (https://developer.bitcoin.org/reference/p2p_networking.html#message-headers).
///
/// A Bitcoin message frame consists of:
/// - 4-byte magic value (network identifier)
/// - 12-byte command
/// - 4-byte payload length
/// - 4-byte checksum
/// - variable-length payload (up to 32MB)
///
/// By the time a `RawMessage` exists the codec has already checked the
/// magic against the session network and the checksum against the payload;
/// the payload itself is still uninterpreted.
#[derive(Debug)]
pub struct RawMessage {
    pub command: Command,
    pub payload: Vec<u8>,
    pub magic: [u8; 4],
    pub checksum: [u8; 4],
}

/// A 32-byte double-SHA256 digest (block hash, txid, inventory hash).
///
/// Stored in wire (little-endian) order. `Display` reverses the bytes,
/// which is the form block explorers and `bitcoin-cli` print.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    /// Double SHA256 of `bytes`.
    ///
    /// Bitcoin uses this construction for block ids, txids and merkle
    /// nodes; it is consensus-critical.
    pub fn double_sha256(bytes: &[u8]) -> Self {
        let digest = Sha256::digest(Sha256::digest(bytes));
        let mut out = [0u8; 32];
        out.copy_from_slice(&digest);
        Hash256(out)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Parses the human-readable (byte-reversed) hex form.
    pub fn from_display_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s, &mut bytes)?;
        bytes.reverse();
        Ok(Hash256(bytes))
    }
}

impl Display for Hash256 {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let mut reversed = self.0;
        reversed.reverse();
        f.write_str(&hex::encode(reversed))
    }
}

impl Debug for Hash256 {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Hash256({self})")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    // Control
    Version,
    Verack,
    Addr,
    AddrV2,
    SendAddrV2,
    GetAddr,
    Ping,
    Pong,
    SendHeaders,
    SendCmpct,
    FeeFilter,
    Reject,
    WtxidRelay,
    // Data
    Inv,
    GetData,
    NotFound,
    GetBlocks,
    GetHeaders,
    Headers,
    Block,
    Tx,
    Mempool,
    MerkleBlock,
    CmpctBlock,

    /// Any other command, with its raw NUL-padded header field.
    Unknown([u8; 12]),
}

/// Wire name of every known command. `Unknown` is deliberately absent.
const COMMAND_NAMES: &[(Command, &str)] = &[
    (Command::Version, "version"),
    (Command::Verack, "verack"),
    (Command::Addr, "addr"),
    (Command::AddrV2, "addrv2"),
    (Command::SendAddrV2, "sendaddrv2"),
    (Command::GetAddr, "getaddr"),
    (Command::Ping, "ping"),
    (Command::Pong, "pong"),
    (Command::SendHeaders, "sendheaders"),
    (Command::SendCmpct, "sendcmpct"),
    (Command::FeeFilter, "feefilter"),
    (Command::Reject, "reject"),
    (Command::WtxidRelay, "wtxidrelay"),
    (Command::Inv, "inv"),
    (Command::GetData, "getdata"),
    (Command::NotFound, "notfound"),
    (Command::GetBlocks, "getblocks"),
    (Command::GetHeaders, "getheaders"),
    (Command::Headers, "headers"),
    (Command::Block, "block"),
    (Command::Tx, "tx"),
    (Command::Mempool, "mempool"),
    (Command::MerkleBlock, "merkleblock"),
    (Command::CmpctBlock, "cmpctblock"),
];

impl Command {
    /// ASCII name as it appears in the header, or `None` for `Unknown`.
    pub fn name(self) -> Option<&'static str> {
        COMMAND_NAMES
            .iter()
            .find(|(cmd, _)| *cmd == self)
            .map(|(_, name)| *name)
    }

    /// Resolves the 12-byte, NUL-padded command field of a header.
    pub fn from_bytes(bytes: &[u8; 12]) -> Self {
        let name = std::str::from_utf8(bytes)
            .unwrap_or("")
            .trim_end_matches(char::from(0));

        COMMAND_NAMES
            .iter()
            .find(|(_, n)| *n == name)
            .map(|(cmd, _)| *cmd)
            .unwrap_or(Command::Unknown(*bytes))
    }

    /// Returns the 12-byte command field as defined by the Bitcoin P2P protocol.
    ///
    /// `Unknown` gives back the field it was read from.
    pub fn as_bytes(self) -> [u8; 12] {
        if let Command::Unknown(raw) = self {
            return raw;
        }

        let mut padded = [0u8; 12];
        if let Some(name) = self.name() {
            padded[..name.len()].copy_from_slice(name.as_bytes());
        }
        padded
    }
}

impl Display for Command {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Command::Unknown(raw) => {
                let end = raw.iter().position(|b| *b == 0).unwrap_or(raw.len());
                f.write_str(&String::from_utf8_lossy(&raw[..end]))
            }
            known => f.write_str(known.name().unwrap_or_default()),
        }
    }
}

/// Service flags as defined by the Bitcoin P2P protocol.
///
/// This is a bitfield (`u64`) transmitted in the `version` message.
/// Unknown bits are preserved.
///
/// Official reference:
/// https://developer.bitcoin.org/reference/p2p_networking.html#version
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct Services(u64);

impl Services {
    /// Not a full node; we only listen.
    pub const NONE: Services = Services(0x00);

    /// NODE_NETWORK: full node, can be asked for full blocks.
    pub const NODE_NETWORK: Services = Services(0x01);

    /// NODE_WITNESS (BIP 144).
    pub const NODE_WITNESS: Services = Services(0x08);

    /// NODE_NETWORK_LIMITED (BIP 159): at least the last 288 blocks.
    pub const NODE_NETWORK_LIMITED: Services = Services(0x0400);

    pub const fn new(bits: u64) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u64 {
        self.0
    }

    pub const fn contains(self, other: Services) -> bool {
        (self.0 & other.0) == other.0
    }
}

impl Debug for Services {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let mut names = Vec::new();
        for (flag, name) in [
            (Self::NODE_NETWORK, "NODE_NETWORK"),
            (Self::NODE_WITNESS, "NODE_WITNESS"),
            (Self::NODE_NETWORK_LIMITED, "NODE_NETWORK_LIMITED"),
        ] {
            if self.contains(flag) {
                names.push(name);
            }
        }
        if names.is_empty() {
            names.push("NONE");
        }
        write!(f, "Services({}) [0x{:016x}]", names.join(" | "), self.0)
    }
}

/// Address as embedded in a `version` message (no timestamp).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetAddr {
    pub services: u64,
    pub ip: IpAddr,
    pub port: u16,
}

impl NetAddr {
    /// The all-zero address used when a side is unknown or irrelevant.
    pub fn unspecified() -> Self {
        Self {
            services: 0,
            ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 0,
        }
    }
}

impl From<SocketAddr> for NetAddr {
    fn from(addr: SocketAddr) -> Self {
        Self {
            services: 0,
            ip: addr.ip(),
            port: addr.port(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionMessage {
    pub version: i32,
    pub services: Services,
    pub timestamp: i64,
    pub addr_recv: NetAddr,
    pub addr_from: NetAddr,
    pub nonce: u64,
    pub user_agent: String,
    pub start_height: i32,
    pub relay: Option<bool>,
}

/// Inventory object types used in `inv`, `getdata`, and `notfound` messages.
///
/// Defined by the Bitcoin P2P protocol:
/// https://developer.bitcoin.org/reference/p2p_networking.html#data-messages
///
/// Serialized as little-endian u32. Types we do not know are carried
/// through untouched so a `getdata` can echo them back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InventoryType {
    Error,
    Tx,
    Block,
    FilteredBlock,
    CompactBlock,
    WitnessTx,
    WitnessBlock,
    WitnessFilteredBlock,
    Other(u32),
}

impl InventoryType {
    pub fn from_u32(value: u32) -> Self {
        match value {
            0 => InventoryType::Error,
            1 => InventoryType::Tx,
            2 => InventoryType::Block,
            3 => InventoryType::FilteredBlock,
            4 => InventoryType::CompactBlock,
            0x40000001 => InventoryType::WitnessTx,
            0x40000002 => InventoryType::WitnessBlock,
            0x40000003 => InventoryType::WitnessFilteredBlock,
            other => InventoryType::Other(other),
        }
    }

    pub fn as_u32(self) -> u32 {
        match self {
            InventoryType::Error => 0,
            InventoryType::Tx => 1,
            InventoryType::Block => 2,
            InventoryType::FilteredBlock => 3,
            InventoryType::CompactBlock => 4,
            InventoryType::WitnessTx => 0x40000001,
            InventoryType::WitnessBlock => 0x40000002,
            InventoryType::WitnessFilteredBlock => 0x40000003,
            InventoryType::Other(value) => value,
        }
    }
}

/// One advertised item: what kind of object and its hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InvVector {
    pub inv_type: InventoryType,
    pub hash: Hash256,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutPoint {
    pub txid: Hash256,
    pub vout: u32,
}

impl OutPoint {
    /// The null outpoint spent by a coinbase input.
    pub fn is_null(&self) -> bool {
        self.vout == u32::MAX && self.txid == Hash256::default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxIn {
    pub previous_output: OutPoint,
    pub script_sig: Vec<u8>,
    pub sequence: u32,
    /// Segregated witness stack (BIP 141); empty for legacy inputs.
    pub witness: Vec<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxOut {
    /// Amount in satoshis.
    pub value: i64,
    pub script_pubkey: Vec<u8>,
}

/// A decoded transaction.
///
/// Raw transaction format:
/// https://developer.bitcoin.org/reference/transactions.html#raw-transaction-format
///
/// Witness serialization (marker `0x00`, flag `0x01`, per-input witness
/// stacks before `lock_time`) follows BIP 144.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub version: i32,
    pub inputs: Vec<TxIn>,
    pub outputs: Vec<TxOut>,
    pub lock_time: u32,
}

impl Transaction {
    pub fn has_witness(&self) -> bool {
        self.inputs.iter().any(|input| !input.witness.is_empty())
    }

    /// A coinbase has exactly one input spending the null outpoint.
    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].previous_output.is_null()
    }

    /// Transaction id: double SHA256 of the serialization without witness data.
    pub fn txid(&self) -> Hash256 {
        Hash256::double_sha256(&self.to_bytes_legacy())
    }

    /// Witness transaction id (BIP 141); equals `txid` for legacy transactions.
    pub fn wtxid(&self) -> Hash256 {
        Hash256::double_sha256(&self.to_bytes())
    }

    /// Size of the full (witness-including) serialization.
    pub fn serialized_size(&self) -> usize {
        self.to_bytes().len()
    }
}

/// A Bitcoin block header (exactly 80 bytes on the wire).
///
/// Layout (little-endian fields unless otherwise noted):
///
/// ```text
/// 4  bytes  version
/// 32 bytes  previous block hash
/// 32 bytes  merkle root
/// 4  bytes  timestamp (Unix epoch)
/// 4  bytes  nBits (compact target encoding)
/// 4  bytes  nonce
/// ```
///
/// Reference:
/// https://developer.bitcoin.org/reference/block_chain.html#block-headers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockHeader {
    pub version: i32,
    pub prev_blockhash: Hash256,
    pub merkle_root: Hash256,
    pub time: u32,
    pub bits: u32,
    pub nonce: u32,
}

impl BlockHeader {
    /// Computes the block header hash (block ID): SHA256(SHA256(header_bytes)).
    ///
    /// The returned hash is in wire order; its `Display` form is the
    /// byte-reversed hex shown by block explorers.
    pub fn hash(&self) -> Hash256 {
        Hash256::double_sha256(&self.to_bytes())
    }
}

/// A block as received via the P2P `block` message.
///
/// ```text
/// block
///   block_header      (80 bytes)
///   txn_count         (CompactSize)
///   transactions[]
/// ```
///
/// `serialized_size` is the payload length as received, excluding the
/// 24-byte message header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
    pub serialized_size: usize,
}

impl Block {
    pub fn hash(&self) -> Hash256 {
        self.header.hash()
    }
}

/// A decoded Bitcoin P2P message.
///
/// Only the kinds the watchtower acts on are decoded into types. Every
/// other command keeps its raw payload so it can be logged, ignored, or
/// re-sent verbatim (e.g. as an extra post-handshake message).
///
/// See:
/// https://developer.bitcoin.org/reference/p2p_networking.html
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Version(VersionMessage),
    Verack,
    Inv(Vec<InvVector>),
    GetData(Vec<InvVector>),
    Tx(Transaction),
    Block(Block),
    /// Keepalive. The nonce is zero for peers at or below BIP 31.
    Ping(u64),
    Pong(u64),
    Other { command: Command, payload: Vec<u8> },
}

impl Message {
    pub fn command(&self) -> Command {
        match self {
            Message::Version(_) => Command::Version,
            Message::Verack => Command::Verack,
            Message::Inv(_) => Command::Inv,
            Message::GetData(_) => Command::GetData,
            Message::Tx(_) => Command::Tx,
            Message::Block(_) => Command::Block,
            Message::Ping(_) => Command::Ping,
            Message::Pong(_) => Command::Pong,
            Message::Other { command, .. } => *command,
        }
    }

    /// An empty-payload message such as `sendheaders` or `mempool`.
    pub fn bare(command: Command) -> Self {
        Message::Other {
            command,
            payload: Vec::new(),
        }
    }
}
