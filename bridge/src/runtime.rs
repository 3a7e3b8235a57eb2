//! Bridge runtime: Wasmtime engine, module loading, and instantiation.
//!
//! `Bridge` compiles and validates a guest module once. Each call to
//! [`Bridge::instantiate`] creates an independent [`BridgeInstance`] with
//! its own store, handle table, frame region and event registry.

use std::path::Path;

use hostbridge_hostapi::{
    CancelHandle, ElementRef, FunctionRef, Handle, HostError, HostValue, Invocation, ObjectRef,
};
use tracing::debug;
use wasmtime::{
    AsContextMut, Config, Engine, Extern, Instance, Linker, Module, Store, StoreContextMut, Trap,
};

use crate::config::BridgeConfig;
use crate::console::ConsoleLine;
use crate::error::BridgeError;
use crate::events::{self, SubscriptionId};
use crate::linker::register_imports;
use crate::memory::{FrameStack, PAGE_SIZE};
use crate::proxy;
use crate::state::{with_view, with_view_mut, BridgeState, GuestExports};
use crate::validation::validate_module;

/// A compiled and validated guest module.
pub struct Bridge {
    engine: Engine,
    module: Module,
    config: BridgeConfig,
}

impl Bridge {
    /// Compile a guest from WASM bytecode (or WAT text).
    ///
    /// Validates the module's exports and imports before accepting.
    pub fn new(wasm_bytes: &[u8], config: BridgeConfig) -> Result<Self, BridgeError> {
        let engine = create_engine(&config)?;
        let module = Module::new(&engine, wasm_bytes)?;
        validate_module(&module, &config)?;
        Ok(Self {
            engine,
            module,
            config,
        })
    }

    /// Load from a `.wasm` file path.
    pub fn from_file(path: &Path, config: BridgeConfig) -> Result<Self, BridgeError> {
        let engine = create_engine(&config)?;
        let module = Module::from_file(&engine, path)?;
        validate_module(&module, &config)?;
        Ok(Self {
            engine,
            module,
            config,
        })
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Instantiate with a fresh, empty global scope.
    pub fn instantiate(&self) -> Result<BridgeInstance, BridgeError> {
        self.instantiate_with_global(ObjectRef::new())
    }

    /// Instantiate with `global` as the host's top-level scope and run the
    /// guest's start export.
    pub fn instantiate_with_global(&self, global: ObjectRef) -> Result<BridgeInstance, BridgeError> {
        // 1. Create bridge state with pinned roots
        let state = BridgeState::new(self.config.clone(), global)?;

        // 2. Create store with memory limits and optional fuel
        let mut store = Store::new(&self.engine, state);
        store.limiter(|state| &mut state.limits);
        if let Some(fuel) = self.config.fuel_limit {
            store.set_fuel(fuel)?;
        }

        // 3. Create linker and register imports
        let mut linker = Linker::new(&self.engine);
        register_imports(&mut linker, self.config.word_size)?;

        // 4. Instantiate module
        let instance = linker.instantiate(&mut store, &self.module)?;

        // 5. Reserve the frame region past the guest's own memory.
        // The guest must not treat `memory.size` as its heap end.
        let memory = instance
            .get_memory(&mut store, "memory")
            .ok_or_else(|| BridgeError::MissingExport("memory".into()))?;
        let base_pages = memory
            .grow(&mut store, self.config.frame_region_pages)
            .map_err(|e| BridgeError::MemoryError(format!("frame region grow: {}", e)))?;
        let frames = FrameStack::new(
            (base_pages as usize) * PAGE_SIZE,
            (self.config.frame_region_pages as usize) * PAGE_SIZE,
        );

        // 6. Attach guest exports
        let table = match instance.get_export(&mut store, &self.config.table_export) {
            Some(Extern::Table(t)) => Some(t),
            _ => None,
        };
        let context = instance.get_func(&mut store, &self.config.context_export);
        store.data_mut().attach(
            GuestExports {
                instance,
                memory,
                table,
                context,
            },
            frames,
        );
        publish_exports(&mut store, instance)?;

        // 7. Run the start export
        let start = instance.get_typed_func::<(), ()>(&mut store, &self.config.start_export)?;
        handle_trap(start.call(&mut store, ()))?;
        debug!(
            live = store.data().table.live_count(),
            "guest started"
        );

        Ok(BridgeInstance { store, instance })
    }
}

/// Create a Wasmtime engine for this configuration.
fn create_engine(config: &BridgeConfig) -> Result<Engine, BridgeError> {
    let mut wasm_config = Config::new();

    // Fuel metering, only when a limit is set
    wasm_config.consume_fuel(config.fuel_limit.is_some());

    // memory64 guests for 8-byte words
    wasm_config.wasm_memory64(config.word_size.bytes() == 8);
    wasm_config.wasm_threads(false);

    Ok(Engine::new(&wasm_config)?)
}

/// Fill `module_root.exports` with a raw function value per guest export.
fn publish_exports(store: &mut Store<BridgeState>, instance: Instance) -> Result<(), BridgeError> {
    let names: Vec<String> = instance
        .exports(&mut *store)
        .filter_map(|e| {
            let name = e.name().to_string();
            e.into_func().map(|_| name)
        })
        .collect();
    let exports = store.data().exports()?;
    for name in names {
        exports.set(name.as_str(), HostValue::from(FunctionRef::guest_export(name.as_str())));
    }
    Ok(())
}

/// Convert a failed guest call to `BridgeError`.
///
/// Host errors raised by imports → `BridgeError::HostError`
/// Fuel exhaustion → `BridgeError::FuelExhausted`
/// Other traps → `BridgeError::GuestTrapped`
fn handle_trap<R>(result: Result<R, anyhow::Error>) -> Result<R, BridgeError> {
    result.map_err(|e| {
        if let Some(host) = e.downcast_ref::<HostError>() {
            BridgeError::HostError(host.clone())
        } else if let Some(Trap::OutOfFuel) = e.downcast_ref::<Trap>() {
            BridgeError::FuelExhausted
        } else {
            BridgeError::GuestTrapped(format!("{:#}", e))
        }
    })
}

/// A running guest instance and its bridge state.
pub struct BridgeInstance {
    store: Store<BridgeState>,
    instance: Instance,
}

impl BridgeInstance {
    fn cx(&mut self) -> StoreContextMut<'_, BridgeState> {
        self.store.as_context_mut()
    }

    pub fn state(&self) -> &BridgeState {
        self.store.data()
    }

    pub fn instance(&self) -> Instance {
        self.instance
    }

    /// The host's top-level scope.
    pub fn global(&self) -> &ObjectRef {
        self.state().global()
    }

    pub fn global_root(&self) -> Handle {
        self.state().global_root()
    }

    pub fn module_root(&self) -> Handle {
        self.state().module_root()
    }

    // ── Handles ──

    pub fn alloc(&mut self, value: HostValue) -> Result<Handle, BridgeError> {
        Ok(self.store.data_mut().table.alloc(value)?)
    }

    pub fn free(&mut self, handle: Handle) -> Result<(), BridgeError> {
        Ok(self.store.data_mut().table.free(handle)?)
    }

    pub fn get(&self, handle: Handle) -> Result<HostValue, BridgeError> {
        Ok(self.state().table.get(handle)?)
    }

    /// Resolve and release `handle`.
    pub fn take(&mut self, handle: Handle) -> Result<HostValue, BridgeError> {
        Ok(self.store.data_mut().table.take(handle)?)
    }

    /// Number of live handles, pinned roots included.
    pub fn live_handles(&self) -> usize {
        self.state().table.live_count()
    }

    // ── Functions ──

    /// Raw function value for guest export `name`, from the module root.
    pub fn export(&self, name: &str) -> Result<FunctionRef, BridgeError> {
        let value = self.state().exports()?.get(name);
        if value.is_absent() {
            return Err(BridgeError::MissingExport(name.to_string()));
        }
        Ok(value.as_function()?.clone())
    }

    /// Frame-convention proxy for guest export `name`.
    pub fn wrap_guest_function(&mut self, name: &str) -> Result<FunctionRef, BridgeError> {
        let raw = self.export(name)?;
        let mut cx = self.cx();
        let raw_handle = cx.data_mut().table.alloc(HostValue::from(raw))?;
        let wrapped = proxy::wrap_guest_function(&mut cx, raw_handle);
        cx.data_mut().table.free(raw_handle)?;
        let value = cx.data_mut().table.take(wrapped?)?;
        Ok(value.as_function()?.clone())
    }

    /// Host function value for guest table entry `table_index`.
    pub fn export_as_callable(
        &mut self,
        table_index: u32,
        context: u64,
    ) -> Result<FunctionRef, BridgeError> {
        let mut cx = self.cx();
        let handle = proxy::export_as_callable(&mut cx, table_index, context)?;
        let value = cx.data_mut().table.take(handle)?;
        Ok(value.as_function()?.clone())
    }

    /// Call `func` and return a handle to its result. The caller owns it.
    pub fn call(&mut self, func: &FunctionRef, args: &[HostValue]) -> Result<Handle, BridgeError> {
        let result = proxy::call_function(&mut self.cx(), func, args);
        Ok(result?)
    }

    /// Call `func` and return its result value.
    pub fn call_value(
        &mut self,
        func: &FunctionRef,
        args: &[HostValue],
    ) -> Result<HostValue, BridgeError> {
        let handle = self.call(func, args)?;
        self.take(handle)
    }

    /// Start `func` without waiting for it. Pair with
    /// [`await_invocation`](Self::await_invocation).
    pub fn invoke_async(
        &mut self,
        func: &FunctionRef,
        args: &[HostValue],
    ) -> Result<(Invocation, CancelHandle), BridgeError> {
        let invocation = proxy::start_invocation(&mut self.cx(), func, args)?;
        let cancel = invocation.canceller();
        Ok((invocation, cancel))
    }

    /// Drive `invocation` to completion and return a handle to its result.
    pub fn await_invocation(&mut self, invocation: Invocation) -> Result<Handle, BridgeError> {
        Ok(proxy::await_invocation(&mut self.cx(), invocation)?)
    }

    // ── Events ──

    /// Fire `event` on `target`. Returns how many callbacks ran.
    pub fn dispatch_event(
        &mut self,
        target: &ElementRef,
        event: &str,
        payload: HostValue,
    ) -> Result<usize, BridgeError> {
        Ok(events::dispatch_event(&mut self.cx(), target, event, &payload)?)
    }

    /// Fire a `click` on `target` with a fresh `{ type, target }` event.
    pub fn click(&mut self, target: &ElementRef) -> Result<usize, BridgeError> {
        let event = ObjectRef::new();
        event.set("type", HostValue::from("click"));
        event.set("target", HostValue::from(target.clone()));
        self.dispatch_event(target, "click", HostValue::from(event))
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.store.data_mut().events.unsubscribe(id)
    }

    // ── Console ──

    /// Captured guest console lines (with `capture_console`).
    pub fn console_lines(&self) -> &[ConsoleLine] {
        self.state().console.lines()
    }

    pub fn flush_console(&mut self) {
        self.store.data_mut().console.flush();
    }

    // ── Memory ──

    pub fn read_bytes(&mut self, ptr: u64, len: u64) -> Result<Vec<u8>, BridgeError> {
        let cx = self.cx();
        Ok(with_view(&cx, |view| view.read_bytes(ptr, len).map(<[u8]>::to_vec))?)
    }

    pub fn write_bytes(&mut self, ptr: u64, bytes: &[u8]) -> Result<(), BridgeError> {
        let mut cx = self.cx();
        Ok(with_view_mut(&mut cx, |view| view.write_bytes(ptr, bytes))?)
    }

    pub fn read_string(&mut self, ptr: u64, len: u64) -> Result<String, BridgeError> {
        let cx = self.cx();
        Ok(with_view(&cx, |view| view.read_string(ptr, len))?)
    }

    /// Remaining fuel, when metering is enabled.
    pub fn fuel(&self) -> Option<u64> {
        self.store.get_fuel().ok()
    }
}
