//! Error types for contract violations.
//!
//! Ordinary conflicts (occupied tag on insert, stale revision on update)
//! are reported as `false` by the mutating call, and absence is `None`.
//! The variants here are reserved for misuse that must be rejected
//! outright instead of clamped.

use thiserror::Error;

/// Contract violation reported by signatures, tag lookups and views.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EcsError {
    /// Bit index past the end of a signature.
    #[error("bit {pos} out of range for signature of length {len}")]
    BitOutOfRange { pos: usize, len: usize },

    /// Signatures only grow.
    #[error("cannot shrink signature from {from} to {to} bits")]
    ShrinkSignature { from: usize, to: usize },

    /// Tag requested for a type that was never registered.
    #[error("component type not registered: {0}")]
    UnregisteredType(&'static str),

    /// Flat component list does not match `entities * width`.
    #[error("view needs {entities} x {width} components, got {components}")]
    ViewShape {
        entities: usize,
        width: usize,
        components: usize,
    },
}

/// Result type for contract-checked operations.
pub type EcsResult<T> = Result<T, EcsError>;
