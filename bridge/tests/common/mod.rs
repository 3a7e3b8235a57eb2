//! Shared test helpers for integration tests.
//!
//! Provides the WAT import prelude for 32-bit guests, guest module
//! assembly, and bridge factory functions used across all integration
//! test files.

#![allow(dead_code)]

use hostbridge::hostapi::{FunctionRef, HostError, HostValue, ObjectRef};
use hostbridge::{Bridge, BridgeConfig, BridgeInstance};

/// Every `hostbridge` import, with 32-bit word signatures.
pub const IMPORTS_W32: &str = r#"
    (import "hostbridge" "alloc_string" (func $alloc_string (param i32 i32) (result i32)))
    (import "hostbridge" "alloc_int" (func $alloc_int (param i32) (result i32)))
    (import "hostbridge" "alloc_f64" (func $alloc_f64 (param i32) (result i32)))
    (import "hostbridge" "alloc_object" (func $alloc_object (result i32)))
    (import "hostbridge" "alloc_array" (func $alloc_array (result i32)))
    (import "hostbridge" "free" (func $free (param i32)))
    (import "hostbridge" "string_len" (func $string_len (param i32) (result i32)))
    (import "hostbridge" "read_string" (func $read_string (param i32 i32) (result i32)))
    (import "hostbridge" "read_int" (func $read_int (param i32 i32)))
    (import "hostbridge" "read_f64" (func $read_f64 (param i32 i32)))
    (import "hostbridge" "global_root" (func $global_root (result i32)))
    (import "hostbridge" "module_root" (func $module_root (result i32)))
    (import "hostbridge" "get" (func $get (param i32 i32 i32) (result i32)))
    (import "hostbridge" "set" (func $set (param i32 i32 i32 i32)))
    (import "hostbridge" "get_index" (func $get_index (param i32 i32) (result i32)))
    (import "hostbridge" "set_index" (func $set_index (param i32 i32 i32)))
    (import "hostbridge" "wrap_func" (func $wrap_func (param i32) (result i32)))
    (import "hostbridge" "unwrap_func" (func $unwrap_func (param i32) (result i32)))
    (import "hostbridge" "export_func" (func $export_func (param i32 i32) (result i32)))
    (import "hostbridge" "invoke" (func $invoke (param i32 i32 i32) (result i32)))
    (import "hostbridge" "invoke_await" (func $invoke_await (param i32 i32 i32) (result i32)))
    (import "hostbridge" "register_click_handler" (func $register_click_handler (param i32 i32) (result i32)))
    (import "hostbridge" "add_event_listener" (func $add_event_listener (param i32 i32 i32 i32) (result i32)))
    (import "hostbridge" "remove_event_listener" (func $remove_event_listener (param i32)))
    (import "hostbridge" "write" (func $write (param i32 i32 i32)))
    (import "hostbridge" "log_str" (func $log_str (param i32 i32)))
    (import "hostbridge" "log_int" (func $log_int (param i32)))
"#;

/// Assemble a 32-bit guest: the import prelude, one page of exported
/// memory, then `body`. The body must define the `_start` export.
pub fn guest(body: &str) -> String {
    format!(
        "(module\n{}\n(memory (export \"memory\") 1)\n{}\n)",
        IMPORTS_W32, body
    )
}

/// Compile a guest with the given configuration.
pub fn bridge_with_config(wat: &str, config: BridgeConfig) -> Bridge {
    Bridge::new(wat.as_bytes(), config).expect("guest should compile and validate")
}

/// Compile and instantiate a guest with default configuration.
pub fn instantiate(wat: &str) -> BridgeInstance {
    bridge_with_config(wat, BridgeConfig::default())
        .instantiate()
        .expect("guest should instantiate")
}

/// Compile and instantiate a guest against `global`.
pub fn instantiate_with_global(wat: &str, global: &ObjectRef) -> BridgeInstance {
    bridge_with_config(wat, BridgeConfig::default())
        .instantiate_with_global(global.clone())
        .expect("guest should instantiate")
}

/// Host function summing its numeric arguments.
pub fn sum_function() -> FunctionRef {
    FunctionRef::native("sum", |_, _, args| {
        let mut total = 0.0;
        for arg in args {
            total += arg.as_number()?;
        }
        Ok(HostValue::from(total))
    })
}

/// Number stored under `key` on `obj`.
pub fn number_at(obj: &ObjectRef, key: &str) -> f64 {
    obj.get(key)
        .as_number()
        .unwrap_or_else(|e: HostError| panic!("{} is not a number: {}", key, e))
}
