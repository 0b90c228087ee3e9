pub mod hive;
pub mod template;
pub mod worker;

#[cfg(test)]
pub(crate) mod testutil;

use thiserror::Error;

use lodelib::chain::ChainError;
use lodelib::types::difficulty::DifficultyError;
use lodelib::wallet::WalletError;

#[derive(Debug, Error)]
pub enum MiningError {
    #[error("chain: {0}")]
    Chain(#[from] ChainError),
    #[error("difficulty: {0}")]
    Difficulty(#[from] DifficultyError),
    #[error("wallet: {0}")]
    Wallet(#[from] WalletError),
    #[error("script: {0}")]
    Script(#[from] lodelib::script::ScriptError),
    #[error("self-built block failed validity check: {0}")]
    InvalidTemplate(String),
}
