/// Monetary amount in the smallest unit ("grains").
pub type Amount = u64;

/// Grains per LODE.
pub const COIN: Amount = 100_000_000;

/// Hard cap on block weight, in weight units.
pub const MAX_BLOCK_WEIGHT: u64 = 4_000_000;

/// Hard cap on block sigop cost.
pub const MAX_BLOCK_SIGOPS_COST: u64 = 80_000;

/// Weight of one non-witness byte.
pub const WITNESS_SCALE_FACTOR: u64 = 4;

/// Lock times below this are block heights, above are unix timestamps.
pub const LOCKTIME_THRESHOLD: u32 = 500_000_000;
