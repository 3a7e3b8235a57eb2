//! Host-side error types for the hostbridge value space.
//!
//! `HostError` is raised by handle resolution, property access, memory
//! marshalling and host function invocation. Inside a guest import it is
//! turned into a trap; at the host call site it is recovered intact.

/// Error type for operations against the host value space.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum HostError {
    /// Memory access outside the guest's linear memory.
    #[error("out of bounds: {len} bytes at offset {offset} (memory size {size})")]
    OutOfBounds { offset: u64, len: u64, size: u64 },

    /// Non-zero handle with no live slot.
    #[error("invalid handle {0}")]
    InvalidHandle(u32),

    /// Diagnostic write to a descriptor other than stdout (1) or stderr (2).
    #[error("invalid descriptor {0} for write")]
    InvalidDescriptor(i32),

    /// A value of the wrong kind was supplied.
    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },

    /// Property access on an absent value.
    #[error("cannot access property '{key}' of absent value")]
    NullDereference { key: String },

    /// Array write past the largest length an array may grow to.
    #[error("array index {index} out of range (limit {limit})")]
    IndexOutOfRange { index: u64, limit: usize },

    /// The handle table reached its configured slot limit.
    #[error("handle limit of {0} slots reached")]
    HandleLimit(usize),

    /// The host call-frame region in guest memory is exhausted.
    #[error("call frame region exhausted: need {needed} bytes, {available} available")]
    FrameOverflow { needed: usize, available: usize },

    /// The invocation was cancelled before it completed.
    #[error("invocation cancelled")]
    Cancelled,

    /// A call into the guest failed.
    #[error("guest call failed: {0}")]
    Guest(String),

    /// Host function or internal failure not covered above.
    #[error("internal host error: {0}")]
    Internal(String),
}

impl HostError {
    /// Shorthand for a `TypeMismatch`.
    pub fn type_mismatch(expected: &'static str, found: &'static str) -> Self {
        Self::TypeMismatch { expected, found }
    }

    /// Create an out-of-bounds error for an access of `len` bytes at `offset`.
    pub fn out_of_bounds(offset: u64, len: u64, size: usize) -> Self {
        Self::OutOfBounds {
            offset,
            len,
            size: size as u64,
        }
    }
}
