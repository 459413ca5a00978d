use std::fmt;
use std::str::FromStr;

/// Current Bitcoin P2P protocol version announced in our `version` message.
///
/// This value is sent in the `version` message during handshake and is the
/// starting point for negotiation: if the peer announces something lower,
/// the session drops to the peer's version for the rest of the connection.
///
/// The protocol version is defined in Bitcoin Core:
/// https://github.com/bitcoin/bitcoin/blob/707ad466968b947b364cfc25bcb4d6895e799418/src/node/protocol_version.h#L12
///
/// It is serialized on the wire as a signed 32-bit little-endian integer.
///
/// You can find a list of notable versions here: https://developer.bitcoin.org/reference/p2p_networking.html#protocol-versions
pub const PROTOCOL_VERSION: i32 = 70016;

/// Last protocol version whose `ping` carries no nonce (BIP 31).
///
/// Above this version a `ping` payload is a single u64 nonce that the
/// receiver echoes back in `pong`.
pub const BIP0031_VERSION: i32 = 60000;

/// First protocol version whose `version` message carries the trailing
/// `relay` flag (BIP 37).
pub const BIP0037_VERSION: i32 = 70001;

/// Upper bound on a single message payload (32 MiB), as enforced by
/// Bitcoin Core's `MAX_SIZE`.
pub const MAX_PAYLOAD_SIZE: usize = 32 * 1024 * 1024;

/// Maximum number of entries in an `inv` / `getdata` message.
pub const MAX_INV_ENTRIES: usize = 50_000;

/// Size of the fixed message header: magic + command + length + checksum.
pub const HEADER_SIZE: usize = 24;

/// The network a session speaks.
///
/// The first 4 bytes of every Bitcoin P2P message identify the network and
/// act as a message boundary marker in the TCP stream. A frame carrying a
/// different magic than the session's network is rejected.
///
/// Bitcoin Core maps magic values to networks in `GetNetworkForMagic`:
/// https://github.com/bitcoin/bitcoin/blob/master/src/kernel/chainparams.cpp#L703-L723
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, clap::ValueEnum)]
pub enum Network {
    Mainnet,
    #[default]
    Testnet3,
    Testnet4,
    Signet,
    Regtest,
}

impl Network {
    /// Magic value as a little-endian u32 (what `write_u32::<LittleEndian>` puts on the wire).
    ///
    /// - Mainnet:  0xD9B4BEF9 (F9 BE B4 D9 in bytes)
    /// - Testnet3: 0x0709110B
    /// - Testnet4: 0x283F161C
    /// - Signet:   0x40CF030A
    /// - Regtest:  0xDAB5BFFA
    pub const fn magic(self) -> u32 {
        match self {
            Network::Mainnet => 0xD9B4BEF9,
            Network::Testnet3 => 0x0709110B,
            Network::Testnet4 => 0x283F161C,
            Network::Signet => 0x40CF030A,
            Network::Regtest => 0xDAB5BFFA,
        }
    }

    pub const fn magic_bytes(self) -> [u8; 4] {
        self.magic().to_le_bytes()
    }

    pub const fn default_port(self) -> u16 {
        match self {
            Network::Mainnet => 8333,
            Network::Testnet3 => 18333,
            Network::Testnet4 => 48333,
            Network::Signet => 38333,
            Network::Regtest => 18444,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Network::Mainnet => "mainnet",
            Network::Testnet3 => "testnet3",
            Network::Testnet4 => "testnet4",
            Network::Signet => "signet",
            Network::Regtest => "regtest",
        }
    }

    /// Looks a network up by the magic found in a frame header.
    pub fn from_magic(magic: u32) -> Option<Self> {
        [
            Network::Mainnet,
            Network::Testnet3,
            Network::Testnet4,
            Network::Signet,
            Network::Regtest,
        ]
        .into_iter()
        .find(|n| n.magic() == magic)
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Network {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mainnet" | "main" => Ok(Network::Mainnet),
            "testnet3" | "testnet" => Ok(Network::Testnet3),
            "testnet4" => Ok(Network::Testnet4),
            "signet" => Ok(Network::Signet),
            "regtest" => Ok(Network::Regtest),
            other => Err(format!("unknown network: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mainnet_magic_bytes_match_wire_order() {
        assert_eq!(Network::Mainnet.magic_bytes(), [0xF9, 0xBE, 0xB4, 0xD9]);
    }

    #[test]
    fn magic_lookup_round_trips_every_network() {
        for n in [
            Network::Mainnet,
            Network::Testnet3,
            Network::Testnet4,
            Network::Signet,
            Network::Regtest,
        ] {
            assert_eq!(Network::from_magic(n.magic()), Some(n));
            assert_eq!(n.name().parse::<Network>().unwrap(), n);
        }
        assert_eq!(Network::from_magic(0xDEADBEEF), None);
    }
}
