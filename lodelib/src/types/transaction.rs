use serde::{Deserialize, Serialize};
use std::fmt;

use crate::crypto::hash::double_sha256;
use crate::script::{parse_dct_script, Script};
use crate::types::units::{Amount, LOCKTIME_THRESHOLD};
use crate::types::Hash256;

/// Reference to a transaction output.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutPoint {
    /// Transaction id
    pub txid: Hash256,
    /// Output index in the transaction
    pub vout: u32,
}

impl OutPoint {
    pub fn new(txid: Hash256, vout: u32) -> Self {
        Self { txid, vout }
    }

    /// The null outpoint used by coinbase inputs.
    pub fn null() -> Self {
        Self {
            txid: [0u8; 32],
            vout: u32::MAX,
        }
    }

    pub fn is_null(&self) -> bool {
        self.txid == [0u8; 32] && self.vout == u32::MAX
    }
}

impl fmt::Display for OutPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", hex::encode(self.txid), self.vout)
    }
}

/// Transaction input spending a previous output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionInput {
    pub prevout: OutPoint,
    pub script_sig: Script,
    pub sequence: u32,
    /// Segregated witness stack; excluded from the txid.
    pub witness: Vec<Vec<u8>>,
}

impl TransactionInput {
    pub fn new(prevout: OutPoint, script_sig: Script, sequence: u32) -> Self {
        Self {
            prevout,
            script_sig,
            sequence,
            witness: Vec::new(),
        }
    }
}

/// Transaction output: an amount locked by a script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionOutput {
    pub value: Amount,
    pub script_pubkey: Script,
}

impl TransactionOutput {
    pub fn new(value: Amount, script_pubkey: Script) -> Self {
        Self { value, script_pubkey }
    }
}

/// A Lodestone transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub version: u32,
    pub inputs: Vec<TransactionInput>,
    pub outputs: Vec<TransactionOutput>,
    pub lock_time: u32,
}

impl Transaction {
    pub fn new(
        version: u32,
        inputs: Vec<TransactionInput>,
        outputs: Vec<TransactionOutput>,
        lock_time: u32,
    ) -> Self {
        Self {
            version,
            inputs,
            outputs,
            lock_time,
        }
    }

    /// Transaction id: double-SHA256 over the serialization with witness
    /// data stripped.
    pub fn txid(&self) -> Hash256 {
        if self.has_witness() {
            let mut stripped = self.clone();
            for input in &mut stripped.inputs {
                input.witness.clear();
            }
            double_sha256(&bincode::serialize(&stripped).unwrap_or_default())
        } else {
            double_sha256(&bincode::serialize(self).unwrap_or_default())
        }
    }

    /// Witness-inclusive id, used in the witness commitment.
    pub fn wtxid(&self) -> Hash256 {
        double_sha256(&bincode::serialize(self).unwrap_or_default())
    }

    pub fn txid_hex(&self) -> String {
        hex::encode(self.txid())
    }

    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].prevout.is_null()
    }

    pub fn has_witness(&self) -> bool {
        self.inputs.iter().any(|input| !input.witness.is_empty())
    }

    /// BIP113-style finality: `lock_time` is compared against the block
    /// height or the median-time-past cutoff, and max-sequence inputs
    /// disable the lock entirely.
    pub fn is_final(&self, block_height: u64, lock_time_cutoff: u64) -> bool {
        if self.lock_time == 0 {
            return true;
        }
        let cutoff = if self.lock_time < LOCKTIME_THRESHOLD {
            block_height
        } else {
            lock_time_cutoff
        };
        if u64::from(self.lock_time) < cutoff {
            return true;
        }
        self.inputs.iter().all(|input| input.sequence == u32::MAX)
    }

    /// Is this a dwarf-creation transaction, and if so how much did it
    /// pay for dwarves?
    ///
    /// A DCT's first output carries the canonical creation script shape
    /// and pays at least the cost of one dwarf.
    pub fn dct_payment(&self, creation_script: &Script, dwarf_cost: Amount) -> Option<Amount> {
        if self.is_coinbase() || self.outputs.is_empty() {
            return None;
        }
        let first = &self.outputs[0];
        parse_dct_script(&first.script_pubkey, creation_script)?;
        if first.value < dwarf_cost {
            return None;
        }
        Some(first.value)
    }

    /// Total sigop cost, scaled like weight. Only `OP_CHECKSIG`
    /// occurrences in output scripts are counted here; inputs are
    /// accounted by the mempool.
    pub fn legacy_sigop_count(&self) -> u64 {
        use crate::script::OP_CHECKSIG;
        self.outputs
            .iter()
            .map(|out| {
                out.script_pubkey
                    .as_bytes()
                    .iter()
                    .filter(|&&b| b == OP_CHECKSIG)
                    .count() as u64
            })
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::{dct_script, script_for_key_id};

    fn spend(seq: u32, lock_time: u32) -> Transaction {
        Transaction::new(
            1,
            vec![TransactionInput::new(OutPoint::new([1u8; 32], 0), Script::new(), seq)],
            vec![TransactionOutput::new(50, script_for_key_id(&[3u8; 20]))],
            lock_time,
        )
    }

    #[test]
    fn test_coinbase_detection() {
        let coinbase = Transaction::new(
            1,
            vec![TransactionInput::new(OutPoint::null(), Script::new(), 0)],
            vec![],
            0,
        );
        assert!(coinbase.is_coinbase());
        assert!(!spend(0, 0).is_coinbase());
    }

    #[test]
    fn test_txid_ignores_witness() {
        let mut tx = spend(0, 0);
        let bare_txid = tx.txid();
        tx.inputs[0].witness.push(vec![1, 2, 3]);
        assert_eq!(tx.txid(), bare_txid);
        assert_ne!(tx.wtxid(), bare_txid);
    }

    #[test]
    fn test_finality_by_height() {
        let tx = spend(0, 100);
        assert!(!tx.is_final(100, 0));
        assert!(tx.is_final(101, 0));
        // Max sequence disables the lock
        assert!(spend(u32::MAX, 100).is_final(100, 0));
    }

    #[test]
    fn test_finality_by_time() {
        let tx = spend(0, LOCKTIME_THRESHOLD + 500);
        assert!(!tx.is_final(1, u64::from(LOCKTIME_THRESHOLD) + 500));
        assert!(tx.is_final(1, u64::from(LOCKTIME_THRESHOLD) + 501));
    }

    #[test]
    fn test_dct_payment() {
        let creation = script_for_key_id(&[1u8; 20]);
        let reward = script_for_key_id(&[2u8; 20]);
        let mut tx = spend(0, 0);
        tx.outputs[0].script_pubkey = dct_script(&creation, &reward);
        tx.outputs[0].value = 10_000;

        assert_eq!(tx.dct_payment(&creation, 2_500), Some(10_000));
        // Below the cost of a single dwarf
        assert_eq!(tx.dct_payment(&creation, 20_000), None);
        // Plain payment is not a DCT
        assert_eq!(spend(0, 0).dct_payment(&creation, 1), None);
    }
}
