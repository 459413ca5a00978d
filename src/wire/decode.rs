use byteorder::{BigEndian, LittleEndian, ReadBytesExt};
use std::io::{self, Read};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use crate::wire::constants::{BIP0031_VERSION, MAX_INV_ENTRIES, MAX_PAYLOAD_SIZE};
use crate::wire::message::{
    Block, BlockHeader, Command, Hash256, InvVector, InventoryType, Message, NetAddr, OutPoint,
    RawMessage, Services, Transaction, TxIn, TxOut, VersionMessage,
};

/// Bitcoin Core's `MAX_SUBVERSION_LENGTH`.
const MAX_USER_AGENT_LEN: usize = 256;

/// Implemented by types that can be decoded from a raw Bitcoin message payload.
pub trait Decode: Sized {
    fn decode<R: Read>(r: &mut R) -> io::Result<Self>;
}

impl Message {
    /// Interprets a raw frame as read at protocol version `pver`.
    ///
    /// Commands the watchtower does not act on are returned as
    /// [`Message::Other`] with their payload untouched.
    ///
    /// The frame is already complete, so a payload that ends early is
    /// malformed data (`InvalidData`), not a closed stream.
    pub fn decode(raw: RawMessage, pver: i32) -> io::Result<Self> {
        let typed = decode_typed(raw.command, &raw.payload, pver).map_err(|e| {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                invalid_data(format!("{}: truncated payload", raw.command))
            } else {
                e
            }
        })?;

        match typed {
            Some(msg) => Ok(msg),
            None => Ok(Message::Other {
                command: raw.command,
                payload: raw.payload,
            }),
        }
    }
}

fn decode_typed(command: Command, payload: &[u8], pver: i32) -> io::Result<Option<Message>> {
    let mut r = payload;

    let msg = match command {
        Command::Version => Message::Version(VersionMessage::decode(&mut r)?),
        Command::Verack => Message::Verack,
        Command::Inv => Message::Inv(decode_inventory(&mut r)?),
        Command::GetData => Message::GetData(decode_inventory(&mut r)?),
        Command::Tx => Message::Tx(Transaction::decode(&mut r)?),
        Command::Block => {
            let mut block = Block::decode(&mut r)?;
            block.serialized_size = payload.len();
            Message::Block(block)
        }
        Command::Ping if pver > BIP0031_VERSION => Message::Ping(r.read_u64::<LittleEndian>()?),
        Command::Ping => Message::Ping(0),
        Command::Pong => Message::Pong(r.read_u64::<LittleEndian>()?),
        _ => return Ok(None),
    };

    Ok(Some(msg))
}

impl Decode for VersionMessage {
    fn decode<R: Read>(r: &mut R) -> io::Result<Self> {
        let version = r.read_i32::<LittleEndian>()?;
        let services = Services::new(r.read_u64::<LittleEndian>()?);
        let timestamp = r.read_i64::<LittleEndian>()?;
        let addr_recv = NetAddr::decode(r)?;
        let addr_from = NetAddr::decode(r)?;
        let nonce = r.read_u64::<LittleEndian>()?;

        let ua = read_var_bytes(r, MAX_USER_AGENT_LEN, "version: user_agent")?;
        let user_agent = String::from_utf8(ua).map_err(|e| invalid_data(e.to_string()))?;

        let start_height = r.read_i32::<LittleEndian>()?;

        // Pre-BIP37 peers stop after start_height.
        let relay = match r.read_u8() {
            Ok(b) => Some(b != 0),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => None,
            Err(e) => return Err(e),
        };

        Ok(VersionMessage {
            version,
            services,
            timestamp,
            addr_recv,
            addr_from,
            nonce,
            user_agent,
            start_height,
            relay,
        })
    }
}

impl Decode for NetAddr {
    fn decode<R: Read>(r: &mut R) -> io::Result<Self> {
        let services = r.read_u64::<LittleEndian>()?;

        let mut ip_bytes = [0u8; 16];
        r.read_exact(&mut ip_bytes)?;
        let port = r.read_u16::<BigEndian>()?;

        // IPv4 travels as ::ffff:a.b.c.d; some clients send 12 zero bytes instead.
        let v6 = Ipv6Addr::from(ip_bytes);
        let ip = if let Some(v4) = v6.to_ipv4_mapped() {
            IpAddr::V4(v4)
        } else if ip_bytes[..12] == [0u8; 12] {
            IpAddr::V4(Ipv4Addr::new(
                ip_bytes[12],
                ip_bytes[13],
                ip_bytes[14],
                ip_bytes[15],
            ))
        } else {
            IpAddr::V6(v6)
        };

        Ok(NetAddr { services, ip, port })
    }
}

fn decode_inventory<R: Read>(r: &mut R) -> io::Result<Vec<InvVector>> {
    let count = read_varint(r)? as usize;
    if count > MAX_INV_ENTRIES {
        return Err(invalid_data("inv: exceeds 50000-entry limit"));
    }

    let mut items = Vec::with_capacity(count);
    for _ in 0..count {
        let inv_type = InventoryType::from_u32(r.read_u32::<LittleEndian>()?);
        let hash = read_hash(r)?;
        items.push(InvVector { inv_type, hash });
    }
    Ok(items)
}

impl Decode for BlockHeader {
    fn decode<R: Read>(r: &mut R) -> io::Result<Self> {
        Ok(BlockHeader {
            version: r.read_i32::<LittleEndian>()?,
            prev_blockhash: read_hash(r)?,
            merkle_root: read_hash(r)?,
            time: r.read_u32::<LittleEndian>()?,
            bits: r.read_u32::<LittleEndian>()?,
            nonce: r.read_u32::<LittleEndian>()?,
        })
    }
}

/// `serialized_size` is left at zero; [`Message::decode`] fills it in from
/// the frame length.
impl Decode for Block {
    fn decode<R: Read>(r: &mut R) -> io::Result<Self> {
        let header = BlockHeader::decode(r)?;

        let count = read_varint(r)? as usize;
        let mut transactions = Vec::with_capacity(count.min(4096));
        for _ in 0..count {
            transactions.push(Transaction::decode(r)?);
        }

        Ok(Block {
            header,
            transactions,
            serialized_size: 0,
        })
    }
}

impl Decode for Transaction {
    fn decode<R: Read>(r: &mut R) -> io::Result<Self> {
        let version = r.read_i32::<LittleEndian>()?;

        // BIP 144: an input count of zero is the segwit marker, followed by flag 0x01.
        let mut input_count = read_varint(r)?;
        let segwit = input_count == 0;
        if segwit {
            let flag = r.read_u8()?;
            if flag != 0x01 {
                return Err(invalid_data(format!("tx: unsupported segwit flag {flag:#04x}")));
            }
            input_count = read_varint(r)?;
        }

        let mut inputs = Vec::with_capacity((input_count as usize).min(1024));
        for _ in 0..input_count {
            let txid = read_hash(r)?;
            let vout = r.read_u32::<LittleEndian>()?;
            let script_sig = read_var_bytes(r, MAX_PAYLOAD_SIZE, "tx: script_sig")?;
            let sequence = r.read_u32::<LittleEndian>()?;
            inputs.push(TxIn {
                previous_output: OutPoint { txid, vout },
                script_sig,
                sequence,
                witness: Vec::new(),
            });
        }

        let output_count = read_varint(r)?;
        let mut outputs = Vec::with_capacity((output_count as usize).min(1024));
        for _ in 0..output_count {
            let value = r.read_i64::<LittleEndian>()?;
            let script_pubkey = read_var_bytes(r, MAX_PAYLOAD_SIZE, "tx: script_pubkey")?;
            outputs.push(TxOut {
                value,
                script_pubkey,
            });
        }

        if segwit {
            for input in &mut inputs {
                let items = read_varint(r)?;
                let mut witness = Vec::with_capacity((items as usize).min(1024));
                for _ in 0..items {
                    witness.push(read_var_bytes(r, MAX_PAYLOAD_SIZE, "tx: witness item")?);
                }
                input.witness = witness;
            }
        }

        let lock_time = r.read_u32::<LittleEndian>()?;

        Ok(Transaction {
            version,
            inputs,
            outputs,
            lock_time,
        })
    }
}

fn invalid_data(msg: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.into())
}

fn read_hash<R: Read>(r: &mut R) -> io::Result<Hash256> {
    let mut bytes = [0u8; 32];
    r.read_exact(&mut bytes)?;
    Ok(Hash256(bytes))
}

/// CompactSize unsigned integer.
pub fn read_varint<R: Read>(r: &mut R) -> io::Result<u64> {
    match r.read_u8()? {
        0xFD => Ok(r.read_u16::<LittleEndian>()? as u64),
        0xFE => Ok(r.read_u32::<LittleEndian>()? as u64),
        0xFF => r.read_u64::<LittleEndian>(),
        n => Ok(n as u64),
    }
}

fn read_var_bytes<R: Read>(r: &mut R, max: usize, ctx: &'static str) -> io::Result<Vec<u8>> {
    let len = read_varint(r)? as usize;
    if len > max {
        return Err(invalid_data(format!("{ctx}: length {len} exceeds {max}")));
    }
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::encode::Encode;

    /// Encodes a single NetAddr field as used in version payloads.
    fn net_addr_bytes(services: u64, ip: [u8; 4], port: u16) -> Vec<u8> {
        let mut b = vec![];
        b.extend_from_slice(&services.to_le_bytes());
        b.extend_from_slice(&[0u8; 10]);
        b.extend_from_slice(&[0xFF, 0xFF]);
        b.extend_from_slice(&ip);
        b.extend_from_slice(&port.to_be_bytes());
        b
    }

    /// Realistic version payload for protocol v70016 (/Satoshi:25.0.0/).
    /// services = NODE_NETWORK(1) | NODE_WITNESS(8) | NODE_NETWORK_LIMITED(1024) = 1033
    fn version_payload_v70016() -> Vec<u8> {
        let mut p = vec![];
        p.extend_from_slice(&70016i32.to_le_bytes());
        p.extend_from_slice(&1033u64.to_le_bytes());
        p.extend_from_slice(&1700000000i64.to_le_bytes());
        p.extend(net_addr_bytes(1033, [192, 168, 1, 1], 18333)); // addr_recv
        p.extend(net_addr_bytes(1033, [10, 0, 0, 1], 18333)); // addr_from
        p.extend_from_slice(&0x1234567890abcdefu64.to_le_bytes()); // nonce
        let ua = b"/Satoshi:25.0.0/";
        p.push(ua.len() as u8);
        p.extend_from_slice(ua);
        p.extend_from_slice(&2_500_000i32.to_le_bytes()); // start_height
        p.push(1); // relay = true
        p
    }

    const GENESIS_COINBASE_HEX: &str = "01000000010000000000000000000000000000000000000000000000000000000000000000ffffffff4d04ffff001d0104455468652054696d65732030332f4a616e2f32303039204368616e63656c6c6f72206f6e206272696e6b206f66207365636f6e64206261696c6f757420666f722062616e6b73ffffffff0100f2052a01000000434104678afdb0fe5548271967f1a67130b7105cd6a828e03909a67962e0ea1f61deb649f6bc3f4cef38c4f35504e51ec112de5c384df7ba0b8d578a4c702b6bf11d5fac00000000";

    fn raw(command: Command, payload: Vec<u8>) -> RawMessage {
        RawMessage {
            command,
            payload,
            magic: [0; 4],
            checksum: [0; 4],
        }
    }

    #[test]
    fn decode_version_v70016_all_fields() {
        let msg = VersionMessage::decode(&mut version_payload_v70016().as_slice()).unwrap();

        assert_eq!(msg.version, 70016);
        assert_eq!(msg.services.bits(), 1033);
        assert_eq!(msg.timestamp, 1700000000);
        assert_eq!(msg.user_agent, "/Satoshi:25.0.0/");
        assert_eq!(msg.start_height, 2_500_000);
        assert_eq!(msg.relay, Some(true));
        assert_eq!(msg.addr_recv.ip, IpAddr::V4(Ipv4Addr::new(192, 168, 1, 1)));
        assert_eq!(msg.addr_from.ip, IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)));
    }

    #[test]
    fn decode_version_relay_absent_when_byte_missing() {
        let mut payload = version_payload_v70016();
        payload.pop();
        let msg = VersionMessage::decode(&mut payload.as_slice()).unwrap();
        assert_eq!(msg.relay, None);
    }

    #[test]
    fn decode_version_truncated_payload_returns_error() {
        let err = VersionMessage::decode(&mut [0u8; 10].as_slice()).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn decode_net_addr_ipv6() {
        // 2001:db8::1, documentation prefix (RFC 3849)
        let ip: [u8; 16] = [0x20, 0x01, 0x0d, 0xb8, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1];
        let mut b = vec![];
        b.extend_from_slice(&8u64.to_le_bytes());
        b.extend_from_slice(&ip);
        b.extend_from_slice(&8333u16.to_be_bytes());

        let addr = NetAddr::decode(&mut b.as_slice()).unwrap();
        assert_eq!(addr.port, 8333);
        assert_eq!(addr.ip, IpAddr::V6(Ipv6Addr::from(ip)));
    }

    #[test]
    fn decode_genesis_coinbase_transaction() {
        let bytes = hex::decode(GENESIS_COINBASE_HEX).unwrap();
        let tx = Transaction::decode(&mut bytes.as_slice()).unwrap();

        assert!(tx.is_coinbase());
        assert!(!tx.has_witness());
        assert_eq!(tx.outputs.len(), 1);
        assert_eq!(tx.outputs[0].value, 50 * 100_000_000);
        assert_eq!(
            tx.txid().to_string(),
            "4a5e1e4baab89f3a32518a88c31bc87f618f76673e2cc77ab2127b7afdeda33b"
        );
        assert_eq!(tx.serialized_size(), bytes.len());
    }

    #[test]
    fn decode_segwit_transaction_keeps_witness_out_of_txid() {
        let tx = Transaction {
            version: 2,
            inputs: vec![TxIn {
                previous_output: OutPoint {
                    txid: Hash256([0x33; 32]),
                    vout: 1,
                },
                script_sig: vec![],
                sequence: 0xFFFF_FFFD,
                witness: vec![vec![0x30; 71], vec![0x02; 33]],
            }],
            outputs: vec![TxOut {
                value: 12_345,
                script_pubkey: [vec![0x00, 0x14], vec![0xAB; 20]].concat(),
            }],
            lock_time: 0,
        };
        let bytes = tx.to_bytes();
        assert_eq!(&bytes[4..6], &[0x00, 0x01]);

        let decoded = Transaction::decode(&mut bytes.as_slice()).unwrap();
        assert_eq!(decoded, tx);
        assert_eq!(decoded.txid(), Hash256::double_sha256(&tx.to_bytes_legacy()));
        assert_ne!(decoded.txid(), decoded.wtxid());
    }

    #[test]
    fn decode_segwit_bad_flag_is_rejected() {
        let mut bytes = vec![];
        bytes.extend_from_slice(&2i32.to_le_bytes());
        bytes.extend_from_slice(&[0x00, 0x02]);
        let err = Transaction::decode(&mut bytes.as_slice()).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn decode_block_splits_transactions_in_order() {
        let coinbase = hex::decode(GENESIS_COINBASE_HEX).unwrap();
        let mut second = Transaction::decode(&mut coinbase.as_slice()).unwrap();
        second.lock_time = 42;

        let header = BlockHeader {
            version: 1,
            prev_blockhash: Hash256::default(),
            merkle_root: Hash256([0x22; 32]),
            time: 1231006505,
            bits: 0x1d00ffff,
            nonce: 2083236893,
        };

        let mut payload = header.to_bytes();
        payload.push(2);
        payload.extend(&coinbase);
        payload.extend(second.to_bytes());
        let len = payload.len();

        let Message::Block(block) = Message::decode(raw(Command::Block, payload), 70016).unwrap()
        else {
            panic!("expected Message::Block");
        };
        assert_eq!(block.header, header);
        assert_eq!(block.serialized_size, len);
        assert_eq!(block.transactions.len(), 2);
        assert_eq!(block.transactions[0].lock_time, 0);
        assert_eq!(block.transactions[1].lock_time, 42);
    }

    #[test]
    fn decode_inv_preserves_order_and_unknown_types() {
        let mut payload = vec![3];
        for (ty, fill) in [(1u32, 0xA1u8), (2, 0xB2), (0x77, 0xC3)] {
            payload.extend_from_slice(&ty.to_le_bytes());
            payload.extend_from_slice(&[fill; 32]);
        }

        let Message::Inv(items) = Message::decode(raw(Command::Inv, payload), 70016).unwrap()
        else {
            panic!("expected Message::Inv");
        };
        assert_eq!(items.len(), 3);
        assert_eq!(items[0].inv_type, InventoryType::Tx);
        assert_eq!(items[1].inv_type, InventoryType::Block);
        assert_eq!(items[2].inv_type, InventoryType::Other(0x77));
        assert_eq!(items[2].hash, Hash256([0xC3; 32]));
    }

    #[test]
    fn decode_inv_rejects_oversized_count() {
        let mut payload = vec![0xFE];
        payload.extend_from_slice(&50_001u32.to_le_bytes());
        assert!(Message::decode(raw(Command::Inv, payload), 70016).is_err());
    }

    #[test]
    fn short_payload_in_complete_frame_is_invalid_data() {
        let err = Message::decode(raw(Command::Version, vec![0; 10]), 70016).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);

        let err = Message::decode(raw(Command::Pong, vec![1, 2, 3]), 70016).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);

        // A version that stops after start_height is still valid.
        let mut payload = version_payload_v70016();
        payload.pop();
        let Message::Version(v) = Message::decode(raw(Command::Version, payload), 70016).unwrap()
        else {
            panic!("expected Message::Version");
        };
        assert_eq!(v.relay, None);
    }

    #[test]
    fn decode_ping_depends_on_protocol_version() {
        let modern = Message::decode(raw(Command::Ping, 9u64.to_le_bytes().to_vec()), 70016);
        assert_eq!(modern.unwrap(), Message::Ping(9));

        let legacy = Message::decode(raw(Command::Ping, vec![]), BIP0031_VERSION);
        assert_eq!(legacy.unwrap(), Message::Ping(0));
    }

    #[test]
    fn undecoded_command_holds_raw_bytes() {
        let msg = Message::decode(raw(Command::SendHeaders, vec![0xAB, 0xCD]), 70016).unwrap();
        assert_eq!(
            msg,
            Message::Other {
                command: Command::SendHeaders,
                payload: vec![0xAB, 0xCD],
            }
        );
    }
}
