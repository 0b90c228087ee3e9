use crate::crypto::hash::double_sha256;
use crate::types::Hash256;

/// Merkle root over a list of transaction ids.
///
/// Pairs are combined with double-SHA256; an odd node at any level is
/// paired with itself. An empty list yields the zero hash (only the
/// degenerate no-transaction case, which real blocks never hit since the
/// coinbase is always present).
pub fn merkle_root(txids: &[Hash256]) -> Hash256 {
    if txids.is_empty() {
        return [0u8; 32];
    }

    let mut level: Vec<Hash256> = txids.to_vec();
    while level.len() > 1 {
        let mut next = Vec::with_capacity((level.len() + 1) / 2);
        for pair in level.chunks(2) {
            let left = pair[0];
            let right = if pair.len() == 2 { pair[1] } else { pair[0] };
            let mut concat = [0u8; 64];
            concat[..32].copy_from_slice(&left);
            concat[32..].copy_from_slice(&right);
            next.push(double_sha256(&concat));
        }
        level = next;
    }
    level[0]
}
