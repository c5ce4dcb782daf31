use thiserror::Error;

/// Errors surfaced by the alignment and decoding cores.
///
/// Most internal plumbing goes through `anyhow`; this enum covers the kinds
/// callers are expected to match on.
#[derive(Debug, Error)]
pub enum G2pError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed input at line {0}")]
    MalformedInput(u64),
    #[error("input symbol not present in the model: {0}")]
    UnknownInputSymbol(String),
    #[error("no alignment path for pair {0}")]
    EmptyAlignment(usize),
    #[error("lattice contains a cycle")]
    CyclicLattice,
    #[error("numeric failure: {0}")]
    Numeric(String),
}
