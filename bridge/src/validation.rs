//! Guest module validation against the bridge ABI.
//!
//! Checks, before instantiation:
//!
//! 1. `memory` is exported, and is 64-bit exactly when the word size is 8
//! 2. The start export exists with signature `() -> ()`
//! 3. The context export, if present, has signature `() -> word`
//! 4. The table export, if present, is a table
//! 5. All imports are functions from the `hostbridge` module; no WASI

use wasmtime::{ExternType, Module, ValType};

use crate::config::BridgeConfig;
use crate::error::BridgeError;
use crate::linker::IMPORT_MODULE;

/// Validate that a guest module can be driven by this configuration.
pub fn validate_module(module: &Module, config: &BridgeConfig) -> Result<(), BridgeError> {
    validate_exports(module, config)?;
    validate_imports(module)?;
    Ok(())
}

fn export_type(module: &Module, name: &str) -> Option<ExternType> {
    module.exports().find(|e| e.name() == name).map(|e| e.ty())
}

fn same_types(actual: impl Iterator<Item = ValType>, expected: &[ValType]) -> bool {
    let actual: Vec<ValType> = actual.collect();
    actual.len() == expected.len()
        && actual
            .iter()
            .zip(expected)
            .all(|(a, b)| ValType::eq(a, b))
}

fn validate_exports(module: &Module, config: &BridgeConfig) -> Result<(), BridgeError> {
    match export_type(module, "memory") {
        Some(ExternType::Memory(mem)) => {
            let wants_64 = config.word_size.bytes() == 8;
            if mem.is_64() != wants_64 {
                return Err(BridgeError::ValidationError(format!(
                    "memory is {}-bit but the configured word size is {} bytes",
                    if mem.is_64() { 64 } else { 32 },
                    config.word_size.bytes()
                )));
            }
        }
        _ => {
            return Err(BridgeError::ValidationError(
                "module must export 'memory'".into(),
            ));
        }
    }

    match export_type(module, &config.start_export) {
        Some(ExternType::Func(ft)) => {
            if !same_types(ft.params(), &[]) || !same_types(ft.results(), &[]) {
                return Err(BridgeError::ValidationError(format!(
                    "export '{}' must have signature () -> ()",
                    config.start_export
                )));
            }
        }
        Some(_) => {
            return Err(BridgeError::ValidationError(format!(
                "export '{}' must be a function",
                config.start_export
            )));
        }
        None => {
            return Err(BridgeError::ValidationError(format!(
                "missing required export: {}",
                config.start_export
            )));
        }
    }

    match export_type(module, &config.context_export) {
        None => {}
        Some(ExternType::Func(ft))
            if same_types(ft.params(), &[])
                && same_types(ft.results(), &[config.word_size.val_type()]) => {}
        Some(_) => {
            return Err(BridgeError::ValidationError(format!(
                "export '{}' must have signature () -> {}",
                config.context_export,
                config.word_size.val_type()
            )));
        }
    }

    match export_type(module, &config.table_export) {
        None | Some(ExternType::Table(_)) => {}
        Some(_) => {
            return Err(BridgeError::ValidationError(format!(
                "export '{}' must be a table",
                config.table_export
            )));
        }
    }

    Ok(())
}

/// Check that all imports come from `hostbridge` and none are WASI.
fn validate_imports(module: &Module) -> Result<(), BridgeError> {
    for import in module.imports() {
        let module_name = import.module();

        if module_name.starts_with("wasi") {
            return Err(BridgeError::ValidationError(format!(
                "WASI import not allowed: {}::{}",
                module_name,
                import.name()
            )));
        }

        if module_name != IMPORT_MODULE {
            return Err(BridgeError::ValidationError(format!(
                "import from unknown module '{}' (only '{}' allowed): {}",
                module_name,
                IMPORT_MODULE,
                import.name()
            )));
        }

        if !matches!(import.ty(), ExternType::Func(_)) {
            return Err(BridgeError::ValidationError(format!(
                "non-function import not allowed: {}::{}",
                module_name,
                import.name()
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WordSize;
    use wasmtime::{Config, Engine};

    fn compile(wat: &str) -> Module {
        Module::new(&Engine::default(), wat).unwrap()
    }

    fn assert_rejected(wat: &str) {
        let err = validate_module(&compile(wat), &BridgeConfig::default()).unwrap_err();
        assert!(matches!(err, BridgeError::ValidationError(_)), "{}", err);
    }

    #[test]
    fn test_validate_minimal_module() {
        let wat = r#"
            (module
                (memory (export "memory") 1)
                (func (export "_start"))
            )
        "#;
        validate_module(&compile(wat), &BridgeConfig::default()).unwrap();
    }

    #[test]
    fn test_accept_optional_exports() {
        let wat = r#"
            (module
                (import "hostbridge" "alloc_object" (func (result i32)))
                (memory (export "memory") 1)
                (table (export "__indirect_function_table") 2 funcref)
                (func (export "_start"))
                (func (export "default_context_ptr") (result i32)
                    i32.const 16)
            )
        "#;
        validate_module(&compile(wat), &BridgeConfig::default()).unwrap();
    }

    #[test]
    fn test_reject_missing_memory() {
        assert_rejected(r#"(module (func (export "_start")))"#);
    }

    #[test]
    fn test_reject_missing_start() {
        assert_rejected(r#"(module (memory (export "memory") 1))"#);
    }

    #[test]
    fn test_reject_wrong_start_signature() {
        assert_rejected(
            r#"
            (module
                (memory (export "memory") 1)
                (func (export "_start") (param i32))
            )
        "#,
        );
    }

    #[test]
    fn test_reject_wrong_context_signature() {
        assert_rejected(
            r#"
            (module
                (memory (export "memory") 1)
                (func (export "_start"))
                (func (export "default_context_ptr") (result i64)
                    i64.const 0)
            )
        "#,
        );
    }

    #[test]
    fn test_reject_wasi_import() {
        assert_rejected(
            r#"
            (module
                (import "wasi_snapshot_preview1" "fd_write"
                    (func (param i32 i32 i32 i32) (result i32)))
                (memory (export "memory") 1)
                (func (export "_start"))
            )
        "#,
        );
    }

    #[test]
    fn test_reject_unknown_module_import() {
        assert_rejected(
            r#"
            (module
                (import "env" "some_func" (func (result i32)))
                (memory (export "memory") 1)
                (func (export "_start"))
            )
        "#,
        );
    }

    #[test]
    fn test_word_size_must_match_memory() {
        let mut wasm_config = Config::new();
        wasm_config.wasm_memory64(true);
        let engine = Engine::new(&wasm_config).unwrap();
        let wat = r#"
            (module
                (memory (export "memory") i64 1)
                (func (export "_start"))
            )
        "#;
        let module = Module::new(&engine, wat).unwrap();

        let w64 = BridgeConfig {
            word_size: WordSize::W64,
            ..BridgeConfig::default()
        };
        validate_module(&module, &w64).unwrap();
        assert!(validate_module(&module, &BridgeConfig::default()).is_err());
    }
}
