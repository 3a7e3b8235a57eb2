//! Bridge error types.

use hostbridge_hostapi::HostError;

/// Top-level error type for the bridge crate.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// Wasmtime engine, compilation, or instantiation error.
    #[error("wasmtime error: {0}")]
    Wasmtime(#[from] anyhow::Error),

    /// Module validation failed (missing exports, bad imports, etc.).
    #[error("validation error: {0}")]
    ValidationError(String),

    /// Host value space error surfaced at the call site.
    #[error("host error: {0}")]
    HostError(#[from] HostError),

    /// Memory setup failed (missing export, grow failure).
    #[error("memory error: {0}")]
    MemoryError(String),

    /// A required guest export is missing.
    #[error("missing export: {0}")]
    MissingExport(String),

    /// Fuel exhausted during execution.
    #[error("fuel exhausted (instruction limit)")]
    FuelExhausted,

    /// WASM guest trapped.
    #[error("guest trapped: {0}")]
    GuestTrapped(String),
}

impl BridgeError {
    /// The host error carried by this error, if any.
    pub fn host_error(&self) -> Option<&HostError> {
        match self {
            Self::HostError(e) => Some(e),
            _ => None,
        }
    }
}
