use byteorder::{LittleEndian, WriteBytesExt};
use sha2::{Digest, Sha256};
use std::io::{self, Read, Write};

use crate::wire::constants::{HEADER_SIZE, MAX_PAYLOAD_SIZE, Network};
use crate::wire::message::{Command, Message, RawMessage};

/// First 4 bytes of SHA256(SHA256(payload)).
pub fn checksum(payload: &[u8]) -> [u8; 4] {
    let digest = Sha256::digest(Sha256::digest(payload));
    let mut out = [0u8; 4];
    out.copy_from_slice(&digest[..4]);
    out
}

/// Reads one Bitcoin P2P message frame from any [`Read`] source.
///
/// This function:
/// 1. Reads the 24-byte Bitcoin message header
/// 2. Rejects a magic that does not belong to `network`
/// 3. Rejects payload lengths above [`MAX_PAYLOAD_SIZE`]
/// 4. Reads the payload and verifies the checksum
///
/// Unknown commands are not an error here; they come back as
/// [`Command::Unknown`] with their name and payload preserved.
///
/// # Example
///
/// ```
/// use std::io::Cursor;
/// use btc_watchtower::wire::{self, Command, Network};
///
/// let mut bytes = Vec::new();
/// wire::codec::write_raw(&mut bytes, Network::Mainnet, Command::Verack, &[]).unwrap();
///
/// let raw = wire::codec::read_raw(&mut Cursor::new(bytes), Network::Mainnet).unwrap();
/// assert_eq!(raw.command, Command::Verack);
/// assert!(raw.payload.is_empty());
/// ```
pub fn read_raw<R: Read>(reader: &mut R, network: Network) -> io::Result<RawMessage> {
    let mut header = [0u8; HEADER_SIZE];
    reader.read_exact(&mut header)?;

    let mut magic = [0u8; 4];
    magic.copy_from_slice(&header[0..4]);
    if magic != network.magic_bytes() {
        let got = u32::from_le_bytes(magic);
        let seen = Network::from_magic(got)
            .map(|n| n.name().to_string())
            .unwrap_or_else(|| format!("{got:#010x}"));
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("network magic mismatch: expected {network}, got {seen}"),
        ));
    }

    let mut cmd = [0u8; 12];
    cmd.copy_from_slice(&header[4..16]);
    let command = Command::from_bytes(&cmd);

    let mut len_bytes = [0u8; 4];
    len_bytes.copy_from_slice(&header[16..20]);
    let length = u32::from_le_bytes(len_bytes) as usize;
    if length > MAX_PAYLOAD_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("payload of {length} bytes exceeds {MAX_PAYLOAD_SIZE}"),
        ));
    }

    let mut expected = [0u8; 4];
    expected.copy_from_slice(&header[20..24]);

    let mut payload = vec![0u8; length];
    reader.read_exact(&mut payload)?;

    let actual = checksum(&payload);
    if actual != expected {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!(
                "checksum mismatch on {command}: header {}, payload {}",
                hex::encode(expected),
                hex::encode(actual)
            ),
        ));
    }

    Ok(RawMessage {
        command,
        payload,
        magic,
        checksum: expected,
    })
}

/// Writes a complete Bitcoin P2P message frame to the given writer.
///
/// ```text
/// +------------+--------------+---------------+------------+
/// | magic (4)  | command (12) | length (4 LE) | checksum(4)|
/// +------------+--------------+---------------+------------+
/// | payload (variable)                                ...  |
/// +----------------------------------------------------------
/// ```
///
/// Header and payload go out in a single `write_all` so a frame is never
/// interleaved with a partial write of another.
pub fn write_raw<W: Write>(
    writer: &mut W,
    network: Network,
    command: Command,
    payload: &[u8],
) -> io::Result<()> {
    if payload.len() > MAX_PAYLOAD_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("payload of {} bytes exceeds {MAX_PAYLOAD_SIZE}", payload.len()),
        ));
    }

    let mut frame = Vec::with_capacity(HEADER_SIZE + payload.len());
    frame.write_u32::<LittleEndian>(network.magic())?;
    frame.extend_from_slice(&command.as_bytes());
    frame.write_u32::<LittleEndian>(payload.len() as u32)?;
    frame.extend_from_slice(&checksum(payload));
    frame.extend_from_slice(payload);

    writer.write_all(&frame)?;
    writer.flush()
}

/// Reads and decodes one message at protocol version `pver` on `network`.
pub fn read_message<R: Read>(reader: &mut R, pver: i32, network: Network) -> io::Result<Message> {
    let raw = read_raw(reader, network)?;
    Message::decode(raw, pver)
}

/// Encodes and writes one message at protocol version `pver` on `network`.
pub fn write_message<W: Write>(
    writer: &mut W,
    pver: i32,
    network: Network,
    msg: &Message,
) -> io::Result<()> {
    let payload = msg.encode_payload(pver)?;
    write_raw(writer, network, msg.command(), &payload)
}
