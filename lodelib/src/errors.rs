use thiserror::Error;

/// Top-level error type for the Lodestone core.
#[derive(Debug, Error)]
pub enum LodeError {
    #[error("chain error: {0}")]
    Chain(#[from] crate::chain::ChainError),

    #[error("difficulty error: {0}")]
    Difficulty(#[from] crate::types::difficulty::DifficultyError),

    #[error("script error: {0}")]
    Script(#[from] crate::script::ScriptError),

    #[error("signature error: {0}")]
    Signature(#[from] crate::crypto::signature::SignatureError),

    #[error("wallet error: {0}")]
    Wallet(#[from] crate::wallet::WalletError),

    #[error("hive proof error: {0}")]
    HiveProof(#[from] crate::validation::hive::HiveProofError),

    #[error("{0}")]
    Other(String),
}

impl From<String> for LodeError {
    fn from(err: String) -> Self {
        LodeError::Other(err)
    }
}

impl From<&str> for LodeError {
    fn from(err: &str) -> Self {
        LodeError::Other(err.to_string())
    }
}

pub type LodeResult<T> = Result<T, LodeError>;
