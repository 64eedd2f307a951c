//! Crate-wide error type and fatal/non-fatal policy (§7).

use thiserror::Error;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("tree error: {0}")]
    Tree(#[from] crate::tree::Error),

    #[error("payload decode error: {0}")]
    Wire(#[from] crate::wire::Error),

    #[error("config error: {0}")]
    Config(#[from] crate::config::Error),

    #[error("data for name {name} arrived before its tree/round was established")]
    MissingTree { name: String },

    #[error("data for sequence {seq} on flow {flow} has no outstanding state, dropping as duplicate")]
    UnknownSequence { seq: u64, flow: String },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    /// Per §7: a fatal error stops the node/simulation; everything else is
    /// logged and the offending packet dropped.
    pub fn is_fatal(&self) -> bool {
        match self {
            Error::Tree(_) => true,
            Error::Wire(_) => true,
            Error::Config(_) => true,
            Error::MissingTree { .. } => true,
            Error::UnknownSequence { .. } => false,
        }
    }
}
