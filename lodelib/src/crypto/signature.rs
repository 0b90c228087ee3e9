//! Compact recoverable ECDSA signatures for dwarf proofs.
//!
//! A dwarf proof carries a 65-byte signature: one header byte encoding
//! the recovery id, then the 64-byte compact signature. Verifiers recover
//! the public key from the signature and match its key id against the
//! claimed reward address, so no pubkey travels in the proof.

use secp256k1::ecdsa::{RecoverableSignature, RecoveryId};
use secp256k1::{Message, PublicKey, Secp256k1, SecretKey};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::types::{Hash256, KeyId};

/// Header byte base: 27, plus 4 to flag a compressed pubkey.
const COMPACT_SIG_HEADER: u8 = 27 + 4;

#[derive(Debug, Error)]
pub enum SignatureError {
    #[error("invalid compact signature header byte {0}")]
    InvalidHeader(u8),
    #[error("secp256k1 error: {0}")]
    Secp(#[from] secp256k1::Error),
}

/// Sign a 32-byte digest, producing the 65-byte compact recoverable form.
pub fn sign_compact(key: &SecretKey, digest: &Hash256) -> Result<[u8; 65], SignatureError> {
    let secp = Secp256k1::signing_only();
    let msg = Message::from_digest_slice(digest)?;
    let sig = secp.sign_ecdsa_recoverable(&msg, key);
    let (recid, data) = sig.serialize_compact();

    let mut out = [0u8; 65];
    out[0] = COMPACT_SIG_HEADER + recid.to_i32() as u8;
    out[1..].copy_from_slice(&data);
    Ok(out)
}

/// Recover the signing public key from a 65-byte compact signature.
pub fn recover_compact(digest: &Hash256, sig: &[u8; 65]) -> Result<PublicKey, SignatureError> {
    let header = sig[0];
    if !(COMPACT_SIG_HEADER..COMPACT_SIG_HEADER + 4).contains(&header) {
        return Err(SignatureError::InvalidHeader(header));
    }
    let recid = RecoveryId::from_i32((header - COMPACT_SIG_HEADER) as i32)?;

    let secp = Secp256k1::verification_only();
    let msg = Message::from_digest_slice(digest)?;
    let recoverable = RecoverableSignature::from_compact(&sig[1..], recid)?;
    Ok(secp.recover_ecdsa(&msg, &recoverable)?)
}

/// Key id of a public key: first 20 bytes of double-SHA256 over the
/// compressed serialization.
pub fn key_id(pubkey: &PublicKey) -> KeyId {
    let first = Sha256::digest(pubkey.serialize());
    let second = Sha256::digest(first);
    let mut id = [0u8; 20];
    id.copy_from_slice(&second[..20]);
    id
}
