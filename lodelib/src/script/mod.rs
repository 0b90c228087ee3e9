//! Script fragments the core produces and parses.
//!
//! Lodestone does not interpret scripts here (the script engine is an
//! external collaborator); this module only knows the handful of shapes
//! the block-production core must build and recognize: payment scripts,
//! coinbase scriptSigs, the canonical dwarf-creation output, and the
//! 144-byte hive proof.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::KeyId;

pub const OP_0: u8 = 0x00;
pub const OP_FALSE: u8 = 0x00;
pub const OP_PUSHDATA1: u8 = 0x4c;
pub const OP_TRUE: u8 = 0x51;
pub const OP_RETURN: u8 = 0x6a;
pub const OP_DUP: u8 = 0x76;
pub const OP_EQUALVERIFY: u8 = 0x88;
pub const OP_HASH160: u8 = 0xa9;
pub const OP_CHECKSIG: u8 = 0xac;
/// Marker opcode for dwarf-related outputs (unassigned in the base set).
pub const OP_DWARF: u8 = 0xc1;

/// Fixed length of a hive proof script.
pub const HIVE_PROOF_SCRIPT_LEN: usize = 144;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ScriptError {
    #[error("script too short: {0} bytes")]
    TooShort(usize),
    #[error("script does not match expected shape")]
    BadShape,
    #[error("address is not valid hex of a 20-byte key id")]
    BadAddress,
    #[error("txid field is not ASCII hex")]
    BadTxid,
}

/// A serialized script.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Script(pub Vec<u8>);

impl Script {
    pub fn new() -> Self {
        Script(Vec::new())
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Script(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Append a raw opcode.
    pub fn push_opcode(&mut self, op: u8) -> &mut Self {
        self.0.push(op);
        self
    }

    /// Append a data push with its length prefix.
    ///
    /// Only direct pushes (≤ 75 bytes) and `OP_PUSHDATA1` are needed by
    /// the shapes this crate builds.
    pub fn push_data(&mut self, data: &[u8]) -> &mut Self {
        if data.len() <= 75 {
            self.0.push(data.len() as u8);
        } else {
            self.0.push(OP_PUSHDATA1);
            self.0.push(data.len() as u8);
        }
        self.0.extend_from_slice(data);
        self
    }

    /// Append a minimally encoded script integer (little-endian, sign
    /// byte added when the high bit is set). Used for coinbase heights
    /// and extra-nonces.
    pub fn push_int(&mut self, value: u64) -> &mut Self {
        if value == 0 {
            self.0.push(OP_0);
            return self;
        }
        let mut bytes = Vec::new();
        let mut v = value;
        while v > 0 {
            bytes.push((v & 0xff) as u8);
            v >>= 8;
        }
        if bytes.last().map_or(false, |b| b & 0x80 != 0) {
            bytes.push(0);
        }
        self.push_data(&bytes)
    }

    /// Does this script start with the given prefix?
    pub fn starts_with(&self, prefix: &Script) -> bool {
        self.0.starts_with(&prefix.0)
    }
}

/// Standard pay-to-key-id script.
pub fn script_for_key_id(key_id: &KeyId) -> Script {
    let mut s = Script::new();
    s.push_opcode(OP_DUP).push_opcode(OP_HASH160);
    s.push_data(key_id);
    s.push_opcode(OP_EQUALVERIFY).push_opcode(OP_CHECKSIG);
    s
}

/// Extract the key id from a standard payment script, if it is one.
pub fn extract_key_id(script: &Script) -> Option<KeyId> {
    let b = script.as_bytes();
    if b.len() == 25
        && b[0] == OP_DUP
        && b[1] == OP_HASH160
        && b[2] == 20
        && b[23] == OP_EQUALVERIFY
        && b[24] == OP_CHECKSIG
    {
        let mut id = [0u8; 20];
        id.copy_from_slice(&b[3..23]);
        Some(id)
    } else {
        None
    }
}

/// Addresses are hex-encoded key ids.
pub fn script_for_address(address: &str) -> Result<Script, ScriptError> {
    let bytes = hex::decode(address).map_err(|_| ScriptError::BadAddress)?;
    let key_id: KeyId = bytes.try_into().map_err(|_| ScriptError::BadAddress)?;
    Ok(script_for_key_id(&key_id))
}

pub fn address_for_key_id(key_id: &KeyId) -> String {
    hex::encode(key_id)
}

/// The canonical dwarf-creation output script:
/// `<creation payment script> OP_DWARF <push: reward script>`.
///
/// The prefix pays the well-known creation address; the suffix names the
/// script that hive rewards for this DCT must pay.
pub fn dct_script(creation_script: &Script, reward_script: &Script) -> Script {
    let mut s = Script::from_bytes(creation_script.0.clone());
    s.push_opcode(OP_DWARF);
    s.push_data(reward_script.as_bytes());
    s
}

/// Check a script against the canonical DCT shape and extract the reward
/// script it names.
pub fn parse_dct_script(script: &Script, creation_script: &Script) -> Option<Script> {
    let b = script.as_bytes();
    let prefix = creation_script.as_bytes();
    if b.len() <= prefix.len() + 2 || !b.starts_with(prefix) {
        return None;
    }
    if b[prefix.len()] != OP_DWARF {
        return None;
    }
    let push_len = b[prefix.len() + 1] as usize;
    let reward_start = prefix.len() + 2;
    if push_len > 75 || b.len() != reward_start + push_len {
        return None;
    }
    Some(Script::from_bytes(b[reward_start..].to_vec()))
}

/// Coinbase scriptSig: block height, then either `OP_0` (fresh template)
/// or the current extra-nonce.
pub fn coinbase_script_sig(height: u64, extra_nonce: u64) -> Script {
    let mut s = Script::new();
    s.push_int(height);
    if extra_nonce == 0 {
        s.push_opcode(OP_0);
    } else {
        s.push_int(extra_nonce);
    }
    s
}

/// Parsed hive proof, as carried in `vout[0]` of a hive coinbase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HiveProof {
    /// Index of the winning dwarf within its DCT.
    pub dwarf_nonce: u32,
    /// Height the prover claims the DCT confirmed at.
    pub dct_height: u32,
    /// Whether the DCT carries a community contribution output.
    pub community_contrib: bool,
    /// DCT txid as 64 ASCII hex characters.
    pub txid_hex: String,
    /// Compact recoverable signature over the rand-string digest.
    pub signature: [u8; 65],
}

impl HiveProof {
    /// Serialize to the fixed 144-byte proof script.
    ///
    /// Layout (§ wire format): `OP_RETURN OP_DWARF 0x04 <nonce LE32>
    /// 0x04 <dctHeight LE32> <OP_TRUE|OP_FALSE> 0x40 <txid ascii64>
    /// 0x41 <sig 65>`.
    pub fn encode(&self) -> Script {
        let mut s = Script::new();
        s.push_opcode(OP_RETURN).push_opcode(OP_DWARF);
        s.push_data(&self.dwarf_nonce.to_le_bytes());
        s.push_data(&self.dct_height.to_le_bytes());
        s.push_opcode(if self.community_contrib { OP_TRUE } else { OP_FALSE });
        s.push_data(self.txid_hex.as_bytes());
        s.push_data(&self.signature);
        debug_assert_eq!(s.len(), HIVE_PROOF_SCRIPT_LEN);
        s
    }

    /// Parse a proof script at bit-exact offsets.
    ///
    /// Accepts scripts longer than 144 bytes (trailing bytes ignored), as
    /// the validator only requires a minimum length.
    pub fn decode(script: &Script) -> Result<Self, ScriptError> {
        let b = script.as_bytes();
        if b.len() < HIVE_PROOF_SCRIPT_LEN {
            return Err(ScriptError::TooShort(b.len()));
        }
        if b[0] != OP_RETURN || b[1] != OP_DWARF {
            return Err(ScriptError::BadShape);
        }
        if b[2] != 0x04 || b[7] != 0x04 || b[13] != 0x40 || b[78] != 0x41 {
            return Err(ScriptError::BadShape);
        }

        let dwarf_nonce = u32::from_le_bytes([b[3], b[4], b[5], b[6]]);
        let dct_height = u32::from_le_bytes([b[8], b[9], b[10], b[11]]);
        let community_contrib = b[12] == OP_TRUE;

        let txid_bytes = &b[14..78];
        if !txid_bytes.iter().all(|c| c.is_ascii_hexdigit()) {
            return Err(ScriptError::BadTxid);
        }
        // ASCII checked above, so this cannot fail
        let txid_hex = String::from_utf8_lossy(txid_bytes).into_owned();

        let mut signature = [0u8; 65];
        signature.copy_from_slice(&b[79..144]);

        Ok(HiveProof {
            dwarf_nonce,
            dct_height,
            community_contrib,
            txid_hex,
            signature,
        })
    }
}
