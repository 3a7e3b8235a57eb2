//! Bridge configuration.

use hostbridge_hostapi::{HostConfig, HostError};
use wasmtime::{Val, ValType};

/// Pointer width of the guest, fixed for the lifetime of an instance.
///
/// Every pointer, length and handle crossing the import surface uses the
/// word type: `i32` for wasm32 guests, `i64` for memory64 guests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WordSize {
    #[default]
    W32,
    W64,
}

impl WordSize {
    /// Width in bytes.
    pub const fn bytes(self) -> usize {
        match self {
            Self::W32 => 4,
            Self::W64 => 8,
        }
    }

    pub fn val_type(self) -> ValType {
        match self {
            Self::W32 => ValType::I32,
            Self::W64 => ValType::I64,
        }
    }

    /// Encode a word as a WASM value. Truncates to 32 bits for `W32`, so
    /// `u64::MAX` becomes `-1` in either width.
    pub fn to_val(self, word: u64) -> Val {
        match self {
            Self::W32 => Val::I32(word as i32),
            Self::W64 => Val::I64(word as i64),
        }
    }

    /// Decode an integer WASM value as an unsigned word.
    pub fn from_val(val: &Val) -> Result<u64, HostError> {
        match val {
            Val::I32(v) => Ok(*v as u32 as u64),
            Val::I64(v) => Ok(*v as u64),
            _ => Err(HostError::type_mismatch("integer word", "non-integer value")),
        }
    }
}

/// Configuration for a bridge instance.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Guest pointer width.
    pub word_size: WordSize,

    /// Maximum linear memory pages (1 page = 64 KiB), frame region
    /// included. Default: 1000 pages.
    pub max_memory_pages: u64,

    /// Pages reserved after instantiation for host-written call frames.
    pub frame_region_pages: u64,

    /// Wasmtime fuel limit for the whole instance lifetime, if any.
    pub fuel_limit: Option<u64>,

    /// Host value space limits.
    pub host: HostConfig,

    /// Zero-argument entry point invoked once after instantiation.
    pub start_export: String,

    /// Export returning the guest's current execution context pointer.
    pub context_export: String,

    /// Exported indirect function table.
    pub table_export: String,

    /// Keep completed console lines in memory for inspection.
    pub capture_console: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            word_size: WordSize::W32,
            max_memory_pages: 1000,
            frame_region_pages: 1,
            fuel_limit: None,
            host: HostConfig::default(),
            start_export: "_start".into(),
            context_export: "default_context_ptr".into(),
            table_export: "__indirect_function_table".into(),
            capture_console: false,
        }
    }
}
