//! `hostbridge-hostapi`: the host value space of the hostbridge WASM bridge.
//!
//! This crate models everything on the host side of the boundary and is
//! independent of the WASM runtime. It provides:
//!
//! - `HostValue`: closed tagged variant over absent, number, text, object,
//!   array, function and element values
//! - `HandleTable`: integer handles for host values with LIFO slot reuse
//! - `accessor`: property and index get/set with receiver binding
//! - `FunctionRef` / `CallContext`: host closures and guest proxies
//! - `Invocation` / `CancelHandle`: suspending calls with cancellation
//! - `HostError`: error type shared with the bridge crate

pub mod error;
pub mod types;
pub mod value;
pub mod function;
pub mod handle_table;
pub mod accessor;
pub mod task;

// Re-export commonly used types at the crate root.
pub use error::HostError;
pub use types::HostConfig;
pub use value::{ArrayRef, ElementRef, HostValue, ObjectRef};
pub use function::{CallContext, FunctionBody, FunctionRef};
pub use handle_table::{Handle, HandleTable};
pub use task::{CancelHandle, Invocation, InvocationState};
