//! Standard output-script templates.
//!
//! Only the shape of a `script_pubkey` is inspected; nothing is executed
//! and signatures are never checked.

use std::fmt::{self, Display, Formatter};

use crate::wire::Transaction;

const OP_0: u8 = 0x00;
const OP_PUSHDATA1: u8 = 0x4c;
const OP_PUSHDATA2: u8 = 0x4d;
const OP_PUSHDATA4: u8 = 0x4e;
const OP_1: u8 = 0x51;
const OP_16: u8 = 0x60;
const OP_RETURN: u8 = 0x6a;
const OP_DUP: u8 = 0x76;
const OP_EQUAL: u8 = 0x87;
const OP_EQUALVERIFY: u8 = 0x88;
const OP_HASH160: u8 = 0xa9;
const OP_CHECKSIG: u8 = 0xac;
const OP_CHECKMULTISIG: u8 = 0xae;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScriptClass {
    /// `<pubkey> OP_CHECKSIG`
    PubKey,
    /// `OP_DUP OP_HASH160 <20> OP_EQUALVERIFY OP_CHECKSIG`
    PubKeyHash,
    /// `OP_HASH160 <20> OP_EQUAL` (BIP 16)
    ScriptHash,
    /// `OP_m <pubkey>... OP_n OP_CHECKMULTISIG`
    MultiSig,
    /// `OP_RETURN` followed only by pushes.
    NullData,
    /// `OP_0 <20>` (BIP 141)
    WitnessV0KeyHash,
    /// `OP_0 <32>` (BIP 141)
    WitnessV0ScriptHash,
    /// `OP_1 <32>` (BIP 341)
    WitnessV1Taproot,
    NonStandard,
}

impl ScriptClass {
    pub fn classify(script: &[u8]) -> Self {
        let Some(ops) = parse_pushes(script) else {
            return ScriptClass::NonStandard;
        };

        if is_pubkey_hash(script) {
            ScriptClass::PubKeyHash
        } else if is_script_hash(script) {
            ScriptClass::ScriptHash
        } else if script.len() == 22 && script[0] == OP_0 && script[1] == 20 {
            ScriptClass::WitnessV0KeyHash
        } else if script.len() == 34 && script[0] == OP_0 && script[1] == 32 {
            ScriptClass::WitnessV0ScriptHash
        } else if script.len() == 34 && script[0] == OP_1 && script[1] == 32 {
            ScriptClass::WitnessV1Taproot
        } else if is_pubkey(&ops) {
            ScriptClass::PubKey
        } else if is_multisig(&ops) {
            ScriptClass::MultiSig
        } else if is_null_data(&ops) {
            ScriptClass::NullData
        } else {
            ScriptClass::NonStandard
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ScriptClass::PubKey => "pubkey",
            ScriptClass::PubKeyHash => "pubkeyhash",
            ScriptClass::ScriptHash => "scripthash",
            ScriptClass::MultiSig => "multisig",
            ScriptClass::NullData => "nulldata",
            ScriptClass::WitnessV0KeyHash => "witness_v0_keyhash",
            ScriptClass::WitnessV0ScriptHash => "witness_v0_scripthash",
            ScriptClass::WitnessV1Taproot => "witness_v1_taproot",
            ScriptClass::NonStandard => "nonstandard",
        }
    }
}

/// Labels a whole transaction by its outputs.
///
/// Pay-to-pubkey-hash is the common case, so the first output of any other
/// class names the transaction. A transaction without outputs is
/// nonstandard.
pub fn transaction_kind(tx: &Transaction) -> ScriptClass {
    let mut classes = tx
        .outputs
        .iter()
        .map(|out| ScriptClass::classify(&out.script_pubkey))
        .peekable();

    if classes.peek().is_none() {
        return ScriptClass::NonStandard;
    }
    classes
        .find(|class| *class != ScriptClass::PubKeyHash)
        .unwrap_or(ScriptClass::PubKeyHash)
}

impl Display for ScriptClass {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One parsed script element.
#[derive(Debug, PartialEq, Eq)]
enum Op<'a> {
    Push(&'a [u8]),
    Code(u8),
}

/// Splits a script into opcodes and pushes. `None` if a push runs past
/// the end of the script.
fn parse_pushes(script: &[u8]) -> Option<Vec<Op<'_>>> {
    let mut ops = Vec::new();
    let mut i = 0;

    while i < script.len() {
        let opcode = script[i];
        i += 1;

        let len = match opcode {
            0x01..=0x4b => opcode as usize,
            OP_PUSHDATA1 => {
                let n = *script.get(i)? as usize;
                i += 1;
                n
            }
            OP_PUSHDATA2 => {
                let bytes = script.get(i..i + 2)?;
                i += 2;
                u16::from_le_bytes([bytes[0], bytes[1]]) as usize
            }
            OP_PUSHDATA4 => {
                let bytes = script.get(i..i + 4)?;
                i += 4;
                u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize
            }
            other => {
                ops.push(Op::Code(other));
                continue;
            }
        };

        let data = script.get(i..i.checked_add(len)?)?;
        i += len;
        ops.push(Op::Push(data));
    }

    Some(ops)
}

fn is_pubkey_hash(script: &[u8]) -> bool {
    script.len() == 25
        && script[0] == OP_DUP
        && script[1] == OP_HASH160
        && script[2] == 20
        && script[23] == OP_EQUALVERIFY
        && script[24] == OP_CHECKSIG
}

fn is_script_hash(script: &[u8]) -> bool {
    script.len() == 23 && script[0] == OP_HASH160 && script[1] == 20 && script[22] == OP_EQUAL
}

fn is_pubkey_len(data: &[u8]) -> bool {
    data.len() == 33 || data.len() == 65
}

fn is_pubkey(ops: &[Op<'_>]) -> bool {
    matches!(ops, [Op::Push(key), Op::Code(OP_CHECKSIG)] if is_pubkey_len(key))
}

fn small_int(op: &Op<'_>) -> Option<usize> {
    match op {
        Op::Code(code @ OP_1..=OP_16) => Some((code - OP_1 + 1) as usize),
        _ => None,
    }
}

fn is_multisig(ops: &[Op<'_>]) -> bool {
    let [first, keys @ .., last_n, Op::Code(OP_CHECKMULTISIG)] = ops else {
        return false;
    };
    let (Some(m), Some(n)) = (small_int(first), small_int(last_n)) else {
        return false;
    };

    m <= n
        && n == keys.len()
        && keys
            .iter()
            .all(|op| matches!(op, Op::Push(key) if is_pubkey_len(key)))
}

fn is_null_data(ops: &[Op<'_>]) -> bool {
    match ops {
        [Op::Code(OP_RETURN), rest @ ..] => rest
            .iter()
            .all(|op| matches!(op, Op::Push(_) | Op::Code(OP_0) | Op::Code(OP_1..=OP_16))),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hex(s: &str) -> Vec<u8> {
        hex::decode(s).unwrap()
    }

    #[test]
    fn classifies_standard_templates() {
        let cases = [
            ("76a91462e907b15cbf27d5425399ebf6f0fb50ebb88f1888ac", ScriptClass::PubKeyHash),
            ("a914748284390f9e263a4b766a75d0633c50426eb87587", ScriptClass::ScriptHash),
            ("0014751e76e8199196d454941c45d1b3a323f1433bd6", ScriptClass::WitnessV0KeyHash),
            (
                "00201863143c14c5166804bd19203356da136c985678cd4d27a1b8c6329604903262",
                ScriptClass::WitnessV0ScriptHash,
            ),
            (
                "5120a60869f0dbcf1dc659c9cecbaf8050135ea9e8cdc487053f1dc6880949dc684c",
                ScriptClass::WitnessV1Taproot,
            ),
            ("6a0b68656c6c6f20776f726c64", ScriptClass::NullData),
            ("6a", ScriptClass::NullData),
            ("51", ScriptClass::NonStandard),
        ];

        for (script, class) in cases {
            assert_eq!(ScriptClass::classify(&hex(script)), class, "{script}");
        }
    }

    #[test]
    fn genesis_coinbase_output_is_pay_to_pubkey() {
        let script = hex(concat!(
            "4104678afdb0fe5548271967f1a67130b7105cd6a828e03909a67962e0ea1f61deb649f6bc3f4cef38",
            "c4f35504e51ec112de5c384df7ba0b8d578a4c702b6bf11d5fac"
        ));
        assert_eq!(ScriptClass::classify(&script), ScriptClass::PubKey);
    }

    #[test]
    fn one_of_two_multisig() {
        let mut script = vec![OP_1];
        for fill in [2u8, 3] {
            script.push(33);
            script.push(fill);
            script.extend([fill; 32]);
        }
        script.extend([0x52, OP_CHECKMULTISIG]);
        assert_eq!(ScriptClass::classify(&script), ScriptClass::MultiSig);

        // Claims three keys but carries two.
        let last = script.len() - 2;
        script[last] = 0x53;
        assert_eq!(ScriptClass::classify(&script), ScriptClass::NonStandard);
    }

    #[test]
    fn truncated_push_is_nonstandard() {
        assert_eq!(ScriptClass::classify(&[0x14, 0xaa]), ScriptClass::NonStandard);
        assert_eq!(ScriptClass::classify(&[OP_PUSHDATA2, 0x01]), ScriptClass::NonStandard);
    }

    #[test]
    fn transaction_kind_prefers_the_unusual_output() {
        let out = |script: &str| crate::wire::TxOut {
            value: 1_000,
            script_pubkey: hex(script),
        };
        let p2pkh = "76a91462e907b15cbf27d5425399ebf6f0fb50ebb88f1888ac";
        let mut tx = Transaction {
            version: 1,
            inputs: vec![],
            outputs: vec![out(p2pkh), out(p2pkh)],
            lock_time: 0,
        };
        assert_eq!(transaction_kind(&tx), ScriptClass::PubKeyHash);

        tx.outputs.push(out("6a0b68656c6c6f20776f726c64"));
        assert_eq!(transaction_kind(&tx), ScriptClass::NullData);

        tx.outputs.clear();
        assert_eq!(transaction_kind(&tx), ScriptClass::NonStandard);
    }

    #[test]
    fn names_match_display() {
        assert_eq!(ScriptClass::WitnessV1Taproot.to_string(), "witness_v1_taproot");
        assert_eq!(ScriptClass::PubKeyHash.name(), "pubkeyhash");
    }
}
