//! RedistError: unified error type for dataflow-redist public APIs.
//!
//! Every fallible operation of the crate returns this type. Errors fall in
//! three groups: usage/configuration errors that must abort the whole job
//! (see [`RedistError::is_fatal`]), recoverable data errors (type mismatch,
//! policy not supported) after which the container stays consistent, and
//! I/O errors from storage tiers.

use thiserror::Error;

/// Unified error type for redistribution, containers and datastreams.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RedistError {
    /// A field with this name is already in the container.
    #[error("field `{0}` already exists in the container")]
    DuplicateField(String),
    /// A field lookup failed where the field is mandatory.
    #[error("field `{0}` not found in the container")]
    MissingField(String),
    /// Role flag rejected (second ZCURVEKEY/ZCURVEINDEX or wrong payload type).
    #[error("invalid flag on field `{name}`: {reason}")]
    InvalidFlag { name: String, reason: String },
    /// Item arithmetic needed but the PRIVATE fields disagree on the count.
    #[error("container is not countable")]
    NotCountable,
    /// Split ranges do not cover exactly the items of the field.
    #[error("split ranges cover {got} items, field has {expected}")]
    RangeMismatch { expected: usize, got: usize },
    /// Merge or split between different field variants or element types.
    #[error("type mismatch: expected {expected}, got {got}")]
    TypeMismatch { expected: String, got: String },
    /// The policy is not defined for this field variant.
    #[error("policy {policy} is not supported by {field}")]
    PolicyUnsupported { policy: String, field: String },
    /// DEFAULT merge of two simple values that differ.
    #[error("simple values differ on DEFAULT merge: {0}")]
    MergeValueMismatch(String),
    /// ADD_VALUE merge of two integers whose sum does not fit the type.
    #[error("integer overflow on ADD_VALUE merge: {0}")]
    Overflow(String),
    /// Payload length is not a multiple of the elements-per-item stride,
    /// or two fields disagree on the stride.
    #[error("field `{name}`: {len} elements do not fit items of {element_per_items}")]
    ShapeMismatch {
        name: String,
        len: usize,
        element_per_items: usize,
    },
    /// Inconsistent component or stream configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// The Block strategy needs a `domain_block` field with global extents,
    /// global bbox and grid spacing.
    #[error("missing or incomplete domain block: {0}")]
    MissingDomainBlock(String),
    /// The Z-curve strategy needs a ZCURVEKEY field.
    #[error("no ZCURVEKEY field available")]
    MissingZCurveKey,
    /// The Z-curve strategy needs at least one point on every source.
    #[error("no particles to redistribute")]
    NoParticles,
    /// Encoding or decoding of a container failed.
    #[error("serialization error: {0}")]
    Serialization(String),
    /// Storage tier I/O error.
    #[error("storage error: {0}")]
    Storage(String),
    /// A frame was requested from the buffer but none is available.
    #[error("frame not available: {0}")]
    FrameUnavailable(String),
    /// Malformed or unexpected message on the wire.
    #[error("communication error with rank {peer}: {reason}")]
    CommError { peer: usize, reason: String },
}

impl RedistError {
    /// Errors after which the SPMD job cannot continue: the collectives that
    /// follow would deadlock. The caller aborts the job (see
    /// [`Communicator::abort`](crate::algs::communicator::Communicator::abort)).
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RedistError::NotCountable
                | RedistError::RangeMismatch { .. }
                | RedistError::InvalidConfig(_)
                | RedistError::MissingDomainBlock(_)
                | RedistError::MissingZCurveKey
                | RedistError::NoParticles
                | RedistError::CommError { .. }
        )
    }
}

impl From<bincode::Error> for RedistError {
    fn from(e: bincode::Error) -> Self {
        RedistError::Serialization(e.to_string())
    }
}

impl From<std::io::Error> for RedistError {
    fn from(e: std::io::Error) -> Self {
        RedistError::Storage(e.to_string())
    }
}
