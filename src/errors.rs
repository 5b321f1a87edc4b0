use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Failures surfaced by the tree and its stores. Proof verification outcomes
/// are not errors; see [`crate::proof::ProofCode`].
#[derive(Error, Debug)]
pub enum Error {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt store: {0}")]
    Corruption(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("value of {0} bytes does not fit a leaf record")]
    ValueTooLarge(usize),

    #[cfg(feature = "db_sled")]
    #[error("sled: {0}")]
    Sled(#[from] sled::Error),
}
