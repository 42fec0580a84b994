//! Error types.
//!
//! Capacity exhaustion is signalled by the `NoObject` sentinel, not an
//! `Err`; programming errors are fatal and handled by `panic!`/`assert!` at
//! the point of violation. The one class that needs a real error type is
//! configuration validation, checked once before any `Heap` exists.

use crate::handle::{Kind, Nchunks};
use thiserror::Error;

/// Failures in building a [`crate::Config`]. Returned by
/// [`crate::ConfigBuilder::build`], before any `Heap` is constructed.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("off_bits must be in 3..=6, got {0}")]
    InvalidOffBits(u32),

    #[error("chunk_size must be a nonzero power of two, got {0}")]
    InvalidChunkSize(usize),

    #[error("n_types must be nonzero")]
    ZeroNTypes,

    #[error("at least one kind must be configured")]
    ZeroNKinds,

    #[error("too many kinds configured: {0} (kind must fit in a u8)")]
    TooManyKinds(usize),

    #[error("max_segments must be nonzero")]
    ZeroMaxSegments,

    #[error("kind {kind} has chunks={chunks}, exceeding n_off={n_off}")]
    KindChunksTooLarge {
        kind: Kind,
        chunks: Nchunks,
        n_off: u32,
    },
}

/// Failures constructing a [`crate::Heap`] from a valid [`crate::Config`].
/// Currently just wraps [`ConfigError`] — a `Vec`-backed segment table has
/// no other way to fail to initialize.
#[derive(Debug, Error)]
pub enum InitError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
}
