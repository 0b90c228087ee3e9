// Lodestone Miner Library
// Block production for the Lodestone blockchain: template assembly, the
// PoW nonce scan, and the hive dwarf engine.

// Enforce panic-free code in production
#![cfg_attr(not(test), warn(clippy::unwrap_used))]
#![cfg_attr(not(test), warn(clippy::expect_used))]
#![cfg_attr(not(test), warn(clippy::panic))]
#![cfg_attr(not(test), warn(clippy::unimplemented))]
#![cfg_attr(not(test), warn(clippy::todo))]
#![cfg_attr(not(test), warn(clippy::unreachable))]

pub mod mining;

pub use mining::hive::{HiveConfig, HiveEngine};
pub use mining::template::{AssemblerOptions, BlockAssembler, BlockTemplate, BlockVariant};
pub use mining::worker::{MinerConfig, PowMiner};
pub use mining::MiningError;
