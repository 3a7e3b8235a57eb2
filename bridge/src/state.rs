//! Per-instance bridge state held in the Wasmtime `Store`.
//!
//! `BridgeState` owns the handle table, the frame region, the console
//! buffers and the event registry for exactly one guest instance. Every
//! import receives it through the `Caller`, so independent instances never
//! share handles.

use hostbridge_hostapi::{Handle, HandleTable, HostError, HostValue, ObjectRef};
use wasmtime::{Func, Instance, Memory, StoreContextMut, StoreLimits, StoreLimitsBuilder, Table};

use crate::config::BridgeConfig;
use crate::console::Console;
use crate::events::EventRegistry;
use crate::memory::{FrameStack, MemoryView, MemoryViewMut, PAGE_SIZE};

/// Guest exports the bridge needs on every crossing.
#[derive(Debug, Clone, Copy)]
pub struct GuestExports {
    pub instance: Instance,
    pub memory: Memory,
    pub table: Option<Table>,
    pub context: Option<Func>,
}

/// Per-instance mutable state held in the Wasmtime `Store`.
pub struct BridgeState {
    /// Handles for every host value visible to the guest.
    pub table: HandleTable,
    pub config: BridgeConfig,
    /// Host-written call frames inside guest memory.
    pub frames: FrameStack,
    pub console: Console,
    pub events: EventRegistry,
    pub limits: StoreLimits,
    /// Set once the module is instantiated.
    guest: Option<GuestExports>,
    global: ObjectRef,
    global_root: Handle,
    module_root: Handle,
}

impl BridgeState {
    /// Create state with the pinned global and module roots.
    pub fn new(config: BridgeConfig, global: ObjectRef) -> Result<Self, HostError> {
        let mut table = HandleTable::new(&config.host);
        let global_root = table.alloc_pinned(HostValue::from(global.clone()))?;
        let module = ObjectRef::new();
        module.set("exports", HostValue::object());
        let module_root = table.alloc_pinned(HostValue::from(module))?;

        let max_bytes = (config.max_memory_pages as usize).saturating_mul(PAGE_SIZE);
        let limits = StoreLimitsBuilder::new().memory_size(max_bytes).build();
        let console = Console::new(config.capture_console);

        Ok(Self {
            table,
            config,
            // Placeholder; the runtime reserves the real region after instantiation.
            frames: FrameStack::new(0, 0),
            console,
            events: EventRegistry::default(),
            limits,
            guest: None,
            global,
            global_root,
            module_root,
        })
    }

    pub(crate) fn attach(&mut self, guest: GuestExports, frames: FrameStack) {
        self.guest = Some(guest);
        self.frames = frames;
    }

    pub fn guest(&self) -> Result<&GuestExports, HostError> {
        self.guest
            .as_ref()
            .ok_or_else(|| HostError::Internal("guest not instantiated".into()))
    }

    pub fn memory(&self) -> Result<Memory, HostError> {
        self.guest().map(|g| g.memory)
    }

    /// The host's top-level scope.
    pub fn global(&self) -> &ObjectRef {
        &self.global
    }

    pub fn global_root(&self) -> Handle {
        self.global_root
    }

    pub fn module_root(&self) -> Handle {
        self.module_root
    }

    /// The `exports` object under the module root.
    pub fn exports(&self) -> Result<ObjectRef, HostError> {
        let module = self.table.get(self.module_root)?;
        Ok(module.as_object()?.get("exports").as_object()?.clone())
    }
}

/// Run `f` against a freshly derived read-only view of guest memory.
pub fn with_view<R>(
    cx: &StoreContextMut<'_, BridgeState>,
    f: impl FnOnce(&MemoryView<'_>) -> Result<R, HostError>,
) -> Result<R, HostError> {
    let memory = cx.data().memory()?;
    let word = cx.data().config.word_size;
    let view = MemoryView::new(memory.data(cx), word);
    f(&view)
}

/// Run `f` against a freshly derived mutable view of guest memory.
pub fn with_view_mut<R>(
    cx: &mut StoreContextMut<'_, BridgeState>,
    f: impl FnOnce(&mut MemoryViewMut<'_>) -> Result<R, HostError>,
) -> Result<R, HostError> {
    let memory = cx.data().memory()?;
    let word = cx.data().config.word_size;
    let mut view = MemoryViewMut::new(memory.data_mut(cx), word);
    f(&mut view)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roots_are_pinned() {
        let global = ObjectRef::new();
        let mut state = BridgeState::new(BridgeConfig::default(), global.clone()).unwrap();
        assert_eq!(state.global_root(), Handle::new(1));
        assert_eq!(state.module_root(), Handle::new(2));

        state.table.free(state.global_root()).unwrap();
        let root = state.table.get(state.global_root()).unwrap();
        assert!(root.as_object().unwrap().ptr_eq(&global));
    }

    #[test]
    fn test_module_root_has_exports() {
        let state = BridgeState::new(BridgeConfig::default(), ObjectRef::new()).unwrap();
        assert!(state.exports().unwrap().is_empty());
    }

    #[test]
    fn test_memory_before_attach() {
        let state = BridgeState::new(BridgeConfig::default(), ObjectRef::new()).unwrap();
        assert!(state.memory().is_err());
    }
}
