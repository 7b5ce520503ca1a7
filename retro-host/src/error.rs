//! Host error types.
//!
//! Only [`LoadError`] is a recoverable, user-facing outcome. Everything else in
//! [`HostError`] points at a host integration bug (calling into the core in the wrong
//! lifecycle state) or at a broken / incompatible core library.

use crate::abi::{AvTimingViolation, MemoryRegion};
use crate::host::HostState;
use thiserror::Error;

/// Why `load_game` did not move the host into `GameLoaded`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LoadError {
    #[error("no content: descriptor has neither a path nor a non-empty buffer")]
    NoContent,
    #[error("core requires a filesystem path but the descriptor only carries a buffer")]
    PathRequired,
    #[error("content path contains an interior NUL byte")]
    InvalidPath,
    #[error("core rejected the content")]
    Rejected,
}

#[derive(Debug, Error)]
pub enum HostError {
    #[error("failed to open core library: {0}")]
    Library(#[source] libloading::Error),

    #[error("core library is missing required symbol `{name}`")]
    MissingSymbol {
        name: &'static str,
        #[source]
        source: libloading::Error,
    },

    #[error("core reports API version {found}, host expects {expected}")]
    ApiVersionMismatch { expected: u32, found: u32 },

    #[error("`{operation}` is not valid in state {state:?}")]
    InvalidState {
        operation: &'static str,
        state: HostState,
    },

    #[error("callbacks not registered: {missing}")]
    MissingCallbacks { missing: String },

    #[error("failed to load game: {0}")]
    Load(#[from] LoadError),

    #[error("core reported invalid AV info")]
    InvalidAvInfo(#[source] AvTimingViolation),

    #[error("core does not support `{0}`")]
    Unsupported(&'static str),

    #[error("core does not expose memory region {0:?}")]
    NoMemoryRegion(MemoryRegion),

    #[error("core failed to {0}")]
    CoreFailed(&'static str),
}

pub type HostResult<T> = Result<T, HostError>;
