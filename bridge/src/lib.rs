//! `hostbridge`: Wasmtime-based foreign-value bridge for WASM guests.
//!
//! A guest module manipulates host values (objects, arrays, text, numbers,
//! functions and UI elements) through integer handles. This crate provides
//! the guest-facing import surface and the host-facing instance API:
//!
//! - **Handles:** per-instance handle table with LIFO slot reuse and
//!   pinned global/module roots
//! - **Memory:** bounds-checked typed views over guest linear memory,
//!   re-derived before every access
//! - **Functions:** proxies in both directions, including frame-convention
//!   guest functions, indirect-table entries and suspending invocations
//! - **Events:** guest callbacks on element events with explicit
//!   unsubscribe
//! - **Validation:** guest exports and imports checked before use
//!
//! The primary entry points are [`Bridge::instantiate`] and
//! [`BridgeInstance`].
//!
//! # Guest memory layout
//!
//! Host-written call frames live in `frame_region_pages` pages grown onto
//! guest memory right after instantiation, before `_start` runs. The guest
//! owns everything below that region. A guest allocator must track the
//! results of its own `memory.grow` calls; one that treats `memory.size`
//! as its heap end will overwrite frames written by the host.

pub mod error;
pub mod config;
pub mod memory;
pub mod console;
pub mod state;
pub mod proxy;
pub mod events;
pub mod validation;
pub mod linker;
pub mod runtime;

pub use config::{BridgeConfig, WordSize};
pub use console::{ConsoleLine, Stream};
pub use error::BridgeError;
pub use events::SubscriptionId;
pub use hostbridge_hostapi as hostapi;
pub use runtime::{Bridge, BridgeInstance};
pub use state::BridgeState;
