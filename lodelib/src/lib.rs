// Lodestone Blockchain Library
// Core consensus implementation for the Lodestone blockchain

// Enforce panic-free code in production
#![cfg_attr(not(test), warn(clippy::unwrap_used))]
#![cfg_attr(not(test), warn(clippy::expect_used))]
#![cfg_attr(not(test), warn(clippy::panic))]
#![cfg_attr(not(test), warn(clippy::unimplemented))]
#![cfg_attr(not(test), warn(clippy::todo))]
#![cfg_attr(not(test), warn(clippy::unreachable))]

// Public modules
pub mod chain;
pub mod consensus;
pub mod crypto;
pub mod errors;
pub mod hive_info;
pub mod mempool;
pub mod script;
pub mod types;
pub mod util;
pub mod validation;
pub mod wallet;

#[cfg(test)]
pub(crate) mod testutil;

// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// Re-export commonly used types
pub use crate::chain::{BlockReader, BlockSubmitter, HeaderIndex, IndexEntry, NetStatus, UtxoView};
pub use crate::consensus::params::ConsensusParams;
pub use crate::consensus::retarget::{check_pow, next_hive_work, next_pow_work};
pub use crate::errors::{LodeError, LodeResult};
pub use crate::mempool::{FeeRate, MempoolEntry, MempoolView};
pub use crate::script::Script;
pub use crate::types::block::{Block, BlockHeader, BlockVariantKind};
pub use crate::types::difficulty::{compact_to_target, target_to_compact};
pub use crate::types::transaction::{OutPoint, Transaction, TransactionInput, TransactionOutput};
pub use crate::validation::hive::check_hive_proof;
pub use crate::wallet::{DctInfo, DwarfStatus, WalletFacade};
