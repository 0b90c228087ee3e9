pub mod hive;

pub use hive::{check_hive_proof, HiveProofError};
