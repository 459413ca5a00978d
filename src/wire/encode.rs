//! Payload serialization.
//!
//! Field layouts follow https://developer.bitcoin.org/reference/p2p_networking.html.
//! Integers are little-endian except ports, which are big-endian.

use byteorder::{BigEndian, LittleEndian, WriteBytesExt};
use std::io::{self, Write};
use std::net::IpAddr;

use crate::wire::constants::{BIP0031_VERSION, BIP0037_VERSION, MAX_INV_ENTRIES};
use crate::wire::message::{
    BlockHeader, InvVector, Message, NetAddr, Transaction, TxIn, TxOut, VersionMessage,
};

/// Implemented by types that can be written as (part of) a message payload.
pub trait Encode {
    fn encode<W: Write>(&self, w: &mut W) -> io::Result<()>;

    fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        // Writing into a Vec cannot fail.
        let _ = self.encode(&mut buf);
        buf
    }
}

impl Message {
    /// Serializes the payload for protocol version `pver`.
    ///
    /// - `ping` only carries its nonce above BIP 31.
    /// - `version` only carries the relay flag from BIP 37 on.
    pub fn encode_payload(&self, pver: i32) -> io::Result<Vec<u8>> {
        let mut buf = Vec::new();

        match self {
            Message::Version(v) => {
                v.encode(&mut buf)?;
                if pver >= BIP0037_VERSION {
                    buf.write_u8(u8::from(v.relay.unwrap_or(true)))?;
                }
            }
            Message::Verack => {}
            Message::Inv(items) | Message::GetData(items) => encode_inventory(&mut buf, items)?,
            Message::Tx(tx) => tx.encode(&mut buf)?,
            Message::Block(block) => {
                block.header.encode(&mut buf)?;
                write_varint(&mut buf, block.transactions.len() as u64)?;
                for tx in &block.transactions {
                    tx.encode(&mut buf)?;
                }
            }
            Message::Ping(nonce) => {
                if pver > BIP0031_VERSION {
                    buf.write_u64::<LittleEndian>(*nonce)?;
                }
            }
            Message::Pong(nonce) => buf.write_u64::<LittleEndian>(*nonce)?,
            Message::Other { payload, .. } => buf.extend_from_slice(payload),
        }

        Ok(buf)
    }
}

fn encode_inventory<W: Write>(w: &mut W, items: &[InvVector]) -> io::Result<()> {
    if items.len() > MAX_INV_ENTRIES {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "inv: exceeds 50000-entry limit",
        ));
    }

    write_varint(w, items.len() as u64)?;
    for item in items {
        w.write_u32::<LittleEndian>(item.inv_type.as_u32())?;
        w.write_all(item.hash.as_bytes())?;
    }
    Ok(())
}

/// Everything up to and including `start_height`; the relay flag is
/// version-dependent and appended by [`Message::encode_payload`].
impl Encode for VersionMessage {
    fn encode<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_i32::<LittleEndian>(self.version)?;
        w.write_u64::<LittleEndian>(self.services.bits())?;
        w.write_i64::<LittleEndian>(self.timestamp)?;
        self.addr_recv.encode(w)?;
        self.addr_from.encode(w)?;
        w.write_u64::<LittleEndian>(self.nonce)?;
        write_var_bytes(w, self.user_agent.as_bytes())?;
        w.write_i32::<LittleEndian>(self.start_height)?;
        Ok(())
    }
}

/// 26 bytes: services, 16-byte IPv6 (IPv4 as `::ffff:a.b.c.d`), port.
impl Encode for NetAddr {
    fn encode<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u64::<LittleEndian>(self.services)?;
        let ip = match self.ip {
            IpAddr::V4(v4) => v4.to_ipv6_mapped(),
            IpAddr::V6(v6) => v6,
        };
        w.write_all(&ip.octets())?;
        w.write_u16::<BigEndian>(self.port)?;
        Ok(())
    }
}

impl Encode for BlockHeader {
    fn encode<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_i32::<LittleEndian>(self.version)?;
        w.write_all(self.prev_blockhash.as_bytes())?;
        w.write_all(self.merkle_root.as_bytes())?;
        w.write_u32::<LittleEndian>(self.time)?;
        w.write_u32::<LittleEndian>(self.bits)?;
        w.write_u32::<LittleEndian>(self.nonce)?;
        Ok(())
    }
}

impl Encode for TxIn {
    fn encode<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(self.previous_output.txid.as_bytes())?;
        w.write_u32::<LittleEndian>(self.previous_output.vout)?;
        write_var_bytes(w, &self.script_sig)?;
        w.write_u32::<LittleEndian>(self.sequence)?;
        Ok(())
    }
}

impl Encode for TxOut {
    fn encode<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_i64::<LittleEndian>(self.value)?;
        write_var_bytes(w, &self.script_pubkey)?;
        Ok(())
    }
}

/// Uses the BIP 144 witness serialization whenever any input has witness data.
impl Encode for Transaction {
    fn encode<W: Write>(&self, w: &mut W) -> io::Result<()> {
        self.encode_with(w, self.has_witness())
    }
}

impl Transaction {
    fn encode_with<W: Write>(&self, w: &mut W, witness: bool) -> io::Result<()> {
        w.write_i32::<LittleEndian>(self.version)?;

        if witness {
            w.write_u8(0x00)?; // marker
            w.write_u8(0x01)?; // flag
        }

        write_varint(w, self.inputs.len() as u64)?;
        for input in &self.inputs {
            input.encode(w)?;
        }

        write_varint(w, self.outputs.len() as u64)?;
        for output in &self.outputs {
            output.encode(w)?;
        }

        if witness {
            for input in &self.inputs {
                write_varint(w, input.witness.len() as u64)?;
                for item in &input.witness {
                    write_var_bytes(w, item)?;
                }
            }
        }

        w.write_u32::<LittleEndian>(self.lock_time)?;
        Ok(())
    }

    /// Serialization without witness data, the preimage of the txid.
    pub fn to_bytes_legacy(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        let _ = self.encode_with(&mut buf, false);
        buf
    }
}

/// CompactSize unsigned integer.
pub fn write_varint<W: Write>(w: &mut W, value: u64) -> io::Result<()> {
    match value {
        0..=0xFC => w.write_u8(value as u8),
        0xFD..=0xFFFF => {
            w.write_u8(0xFD)?;
            w.write_u16::<LittleEndian>(value as u16)
        }
        0x1_0000..=0xFFFF_FFFF => {
            w.write_u8(0xFE)?;
            w.write_u32::<LittleEndian>(value as u32)
        }
        _ => {
            w.write_u8(0xFF)?;
            w.write_u64::<LittleEndian>(value)
        }
    }
}

pub fn write_var_bytes<W: Write>(w: &mut W, bytes: &[u8]) -> io::Result<()> {
    write_varint(w, bytes.len() as u64)?;
    w.write_all(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::message::{Hash256, InventoryType, Services};
    use std::net::{Ipv4Addr, SocketAddr};

    #[test]
    fn varint_boundaries_pick_the_right_width() {
        let cases: [(u64, usize); 6] = [
            (0, 1),
            (0xFC, 1),
            (0xFD, 3),
            (0xFFFF, 3),
            (0x1_0000, 5),
            (0x1_0000_0000, 9),
        ];
        for (value, len) in cases {
            let mut buf = Vec::new();
            write_varint(&mut buf, value).unwrap();
            assert_eq!(buf.len(), len, "value {value:#x}");
        }
    }

    #[test]
    fn ipv4_net_addr_uses_mapped_prefix() {
        let addr = NetAddr::from(SocketAddr::from((Ipv4Addr::new(8, 8, 4, 4), 18333)));
        let bytes = addr.to_bytes();

        assert_eq!(bytes.len(), 26);
        assert_eq!(&bytes[8..18], &[0u8; 10]);
        assert_eq!(&bytes[18..20], &[0xFF, 0xFF]);
        assert_eq!(&bytes[20..24], &[8, 8, 4, 4]);
        assert_eq!(&bytes[24..26], &18333u16.to_be_bytes());
    }

    #[test]
    fn ping_nonce_is_omitted_at_or_below_bip31() {
        let ping = Message::Ping(0xAABB);
        assert!(ping.encode_payload(BIP0031_VERSION).unwrap().is_empty());
        assert_eq!(
            ping.encode_payload(BIP0031_VERSION + 1).unwrap(),
            0xAABBu64.to_le_bytes()
        );
    }

    #[test]
    fn pong_payload_is_exactly_the_nonce() {
        let payload = Message::Pong(7).encode_payload(BIP0031_VERSION).unwrap();
        assert_eq!(payload, 7u64.to_le_bytes());
    }

    #[test]
    fn version_relay_flag_depends_on_protocol_version() {
        let msg = Message::Version(VersionMessage {
            version: 70016,
            services: Services::NONE,
            timestamp: 1_700_000_000,
            addr_recv: NetAddr::unspecified(),
            addr_from: NetAddr::unspecified(),
            nonce: 1,
            user_agent: "/watchtower:0.1.0/".into(),
            start_height: 100,
            relay: Some(true),
        });

        let modern = msg.encode_payload(BIP0037_VERSION).unwrap();
        let legacy = msg.encode_payload(BIP0037_VERSION - 1).unwrap();
        assert_eq!(modern.len(), legacy.len() + 1);
        assert_eq!(*modern.last().unwrap(), 1);
    }

    #[test]
    fn getdata_keeps_entry_order() {
        let items = vec![
            InvVector {
                inv_type: InventoryType::Tx,
                hash: Hash256([1; 32]),
            },
            InvVector {
                inv_type: InventoryType::Block,
                hash: Hash256([2; 32]),
            },
        ];
        let payload = Message::GetData(items).encode_payload(70016).unwrap();

        assert_eq!(payload[0], 2);
        assert_eq!(&payload[1..5], &1u32.to_le_bytes());
        assert_eq!(&payload[5..37], &[1u8; 32]);
        assert_eq!(&payload[37..41], &2u32.to_le_bytes());
        assert_eq!(&payload[41..73], &[2u8; 32]);
    }
}
