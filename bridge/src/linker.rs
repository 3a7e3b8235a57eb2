//! Host import registration via the Wasmtime linker.
//!
//! Registers every `hostbridge` import with word-sized dynamic signatures.
//! Each import:
//! 1. Decodes its word arguments
//! 2. Resolves handles and reads guest memory through a fresh view
//! 3. Performs the operation against `BridgeState`
//! 4. Returns a word result, or traps with the `HostError`

use hostbridge_hostapi::{accessor, Handle, HostError, HostValue};
use tracing::debug;
use wasmtime::{AsContextMut, FuncType, Linker, StoreContextMut, ValType};

use crate::config::WordSize;
use crate::error::BridgeError;
use crate::events::{self, SubscriptionId};
use crate::proxy;
use crate::state::{with_view, with_view_mut, BridgeState};

/// Import module name for every bridge import.
pub const IMPORT_MODULE: &str = "hostbridge";

type Cx<'a, 'b> = &'a mut StoreContextMut<'b, BridgeState>;

/// Import body: word arguments in, optional word result out.
type ImportFn = fn(Cx<'_, '_>, &[u64]) -> Result<Option<u64>, HostError>;

/// Register all `hostbridge` imports with the linker.
pub fn register_imports(linker: &mut Linker<BridgeState>, word: WordSize) -> Result<(), BridgeError> {
    let w = || word.val_type();
    let words = |n: usize| vec![w(); n];

    // Allocation
    define(linker, word, "alloc_string", words(2), true, alloc_string)?;
    define(linker, word, "alloc_int", words(1), true, alloc_int)?;
    define(linker, word, "alloc_f64", words(1), true, alloc_f64)?;
    define(linker, word, "alloc_object", words(0), true, alloc_object)?;
    define(linker, word, "alloc_array", words(0), true, alloc_array)?;
    define(linker, word, "free", words(1), false, free)?;

    // Reading values back
    define(linker, word, "string_len", words(1), true, string_len)?;
    define(linker, word, "read_string", words(2), true, read_string)?;
    define(linker, word, "read_int", words(2), false, read_int)?;
    define(linker, word, "read_f64", words(2), false, read_f64)?;

    // Roots and members
    define(linker, word, "global_root", words(0), true, global_root)?;
    define(linker, word, "module_root", words(0), true, module_root)?;
    define(linker, word, "get", words(3), true, get)?;
    define(linker, word, "set", words(4), false, set)?;
    define(linker, word, "get_index", words(2), true, get_index)?;
    define(linker, word, "set_index", words(3), false, set_index)?;

    // Functions
    define(linker, word, "wrap_func", words(1), true, wrap_func)?;
    define(linker, word, "unwrap_func", words(1), true, unwrap_func)?;
    define(linker, word, "export_func", words(2), true, export_func)?;
    define(linker, word, "invoke", words(3), true, invoke)?;
    define(linker, word, "invoke_await", words(3), true, invoke_await)?;

    // Events
    define(linker, word, "register_click_handler", words(2), true, register_click_handler)?;
    define(linker, word, "add_event_listener", words(4), true, add_event_listener)?;
    define(linker, word, "remove_event_listener", words(1), false, remove_event_listener)?;

    // Console
    define(linker, word, "write", vec![ValType::I32, w(), w()], false, write)?;
    define(linker, word, "log_str", words(2), false, log_str)?;
    define(linker, word, "log_int", vec![ValType::I32], false, log_int)?;
    Ok(())
}

fn define(
    linker: &mut Linker<BridgeState>,
    word: WordSize,
    name: &'static str,
    params: Vec<ValType>,
    returns: bool,
    body: ImportFn,
) -> Result<(), BridgeError> {
    let results = returns.then(|| word.val_type());
    let ty = FuncType::new(linker.engine(), params, results);
    linker.func_new(IMPORT_MODULE, name, ty, move |mut caller, params, results| {
        let args = params
            .iter()
            .map(WordSize::from_val)
            .collect::<Result<Vec<_>, _>>()
            .map_err(anyhow::Error::new)?;
        let mut cx = caller.as_context_mut();
        match body(&mut cx, &args) {
            Ok(out) => {
                if let Some(slot) = results.first_mut() {
                    *slot = word.to_val(out.unwrap_or(0));
                }
                Ok(())
            }
            Err(e) => {
                debug!(import = name, error = %e, "import trapped");
                Err(anyhow::Error::new(e))
            }
        }
    })?;
    Ok(())
}

fn handle(word: u64) -> Result<Handle, HostError> {
    Handle::from_word(word)
}

fn alloc(cx: Cx<'_, '_>, value: HostValue) -> Result<Option<u64>, HostError> {
    let handle = cx.data_mut().table.alloc(value)?;
    debug!(handle = %handle, "alloc");
    Ok(Some(handle.to_word()))
}

/// Decode a UTF-8 key or name from guest memory.
fn read_text(cx: Cx<'_, '_>, ptr: u64, len: u64) -> Result<String, HostError> {
    with_view(cx, |view| view.read_string(ptr, len))
}

// ── Allocation ──

fn alloc_string(cx: Cx<'_, '_>, args: &[u64]) -> Result<Option<u64>, HostError> {
    let text = read_text(cx, args[0], args[1])?;
    alloc(cx, HostValue::Text(text))
}

fn alloc_int(cx: Cx<'_, '_>, args: &[u64]) -> Result<Option<u64>, HostError> {
    let n = with_view(cx, |view| view.read_int(args[0]))?;
    alloc(cx, HostValue::Number(n as f64))
}

fn alloc_f64(cx: Cx<'_, '_>, args: &[u64]) -> Result<Option<u64>, HostError> {
    let n = with_view(cx, |view| view.read::<f64>(args[0]))?;
    alloc(cx, HostValue::Number(n))
}

fn alloc_object(cx: Cx<'_, '_>, _args: &[u64]) -> Result<Option<u64>, HostError> {
    alloc(cx, HostValue::object())
}

fn alloc_array(cx: Cx<'_, '_>, _args: &[u64]) -> Result<Option<u64>, HostError> {
    alloc(cx, HostValue::array())
}

fn free(cx: Cx<'_, '_>, args: &[u64]) -> Result<Option<u64>, HostError> {
    let h = handle(args[0])?;
    cx.data_mut().table.free(h)?;
    debug!(handle = %h, "free");
    Ok(None)
}

// ── Reading values back ──

/// Byte length of a text value; `-1` for any other kind.
fn string_len(cx: Cx<'_, '_>, args: &[u64]) -> Result<Option<u64>, HostError> {
    let value = cx.data().table.get(handle(args[0])?)?;
    Ok(Some(match value {
        HostValue::Text(s) => s.len() as u64,
        _ => u64::MAX,
    }))
}

fn read_string(cx: Cx<'_, '_>, args: &[u64]) -> Result<Option<u64>, HostError> {
    let value = cx.data().table.get(handle(args[0])?)?;
    let text = value.as_text()?;
    let written = with_view_mut(cx, |view| view.write_string(args[1], text))?;
    Ok(Some(written as u64))
}

fn read_int(cx: Cx<'_, '_>, args: &[u64]) -> Result<Option<u64>, HostError> {
    let n = cx.data().table.get(handle(args[0])?)?.as_number()?;
    with_view_mut(cx, |view| view.write_int(args[1], n as i64))?;
    Ok(None)
}

fn read_f64(cx: Cx<'_, '_>, args: &[u64]) -> Result<Option<u64>, HostError> {
    let n = cx.data().table.get(handle(args[0])?)?.as_number()?;
    with_view_mut(cx, |view| view.write::<f64>(args[1], n))?;
    Ok(None)
}

// ── Roots and members ──

fn global_root(cx: Cx<'_, '_>, _args: &[u64]) -> Result<Option<u64>, HostError> {
    Ok(Some(cx.data().global_root().to_word()))
}

fn module_root(cx: Cx<'_, '_>, _args: &[u64]) -> Result<Option<u64>, HostError> {
    Ok(Some(cx.data().module_root().to_word()))
}

fn get(cx: Cx<'_, '_>, args: &[u64]) -> Result<Option<u64>, HostError> {
    let target = cx.data().table.get(handle(args[0])?)?;
    let key = read_text(cx, args[1], args[2])?;
    let value = accessor::get_property(&target, &key)?;
    alloc(cx, value)
}

fn set(cx: Cx<'_, '_>, args: &[u64]) -> Result<Option<u64>, HostError> {
    let target = cx.data().table.get(handle(args[0])?)?;
    let key = read_text(cx, args[1], args[2])?;
    let value = cx.data().table.get(handle(args[3])?)?;
    accessor::set_property(&target, &key, value)?;
    Ok(None)
}

fn get_index(cx: Cx<'_, '_>, args: &[u64]) -> Result<Option<u64>, HostError> {
    let target = cx.data().table.get(handle(args[0])?)?;
    let value = accessor::get_index(&target, args[1])?;
    alloc(cx, value)
}

fn set_index(cx: Cx<'_, '_>, args: &[u64]) -> Result<Option<u64>, HostError> {
    let target = cx.data().table.get(handle(args[0])?)?;
    let value = cx.data().table.get(handle(args[2])?)?;
    accessor::set_index(&target, args[1], value)?;
    Ok(None)
}

// ── Functions ──

fn wrap_func(cx: Cx<'_, '_>, args: &[u64]) -> Result<Option<u64>, HostError> {
    let h = proxy::wrap_guest_function(cx, handle(args[0])?)?;
    Ok(Some(h.to_word()))
}

fn unwrap_func(cx: Cx<'_, '_>, args: &[u64]) -> Result<Option<u64>, HostError> {
    let h = proxy::unwrap_to_handle(cx, handle(args[0])?)?;
    Ok(Some(h.to_word()))
}

fn export_func(cx: Cx<'_, '_>, args: &[u64]) -> Result<Option<u64>, HostError> {
    let index = u32::try_from(args[0])
        .map_err(|_| HostError::Internal(format!("table index {} out of range", args[0])))?;
    let h = proxy::export_as_callable(cx, index, args[1])?;
    Ok(Some(h.to_word()))
}

fn invoke(cx: Cx<'_, '_>, args: &[u64]) -> Result<Option<u64>, HostError> {
    let callable = proxy::unwrap_host_function(cx, handle(args[0])?)?;
    let h = callable.call_frame(cx, args[1], args[2])?;
    Ok(Some(h.to_word()))
}

/// Like `invoke`, but suspends the guest until an asynchronous host
/// function settles.
fn invoke_await(cx: Cx<'_, '_>, args: &[u64]) -> Result<Option<u64>, HostError> {
    let callable = proxy::unwrap_host_function(cx, handle(args[0])?)?;
    let call_args = proxy::resolve_frame(cx, args[1], args[2])?;
    let invocation = proxy::start_invocation(cx, callable.target(), &call_args)?;
    let h = proxy::await_invocation(cx, invocation)?;
    Ok(Some(h.to_word()))
}

// ── Events ──

fn register_click_handler(cx: Cx<'_, '_>, args: &[u64]) -> Result<Option<u64>, HostError> {
    let id = events::register_click_handler(cx, handle(args[0])?, handle(args[1])?)?;
    Ok(Some(id.get()))
}

fn add_event_listener(cx: Cx<'_, '_>, args: &[u64]) -> Result<Option<u64>, HostError> {
    let event = read_text(cx, args[1], args[2])?;
    let id = events::add_event_listener(cx, handle(args[0])?, &event, handle(args[3])?)?;
    Ok(Some(id.get()))
}

fn remove_event_listener(cx: Cx<'_, '_>, args: &[u64]) -> Result<Option<u64>, HostError> {
    if let Some(id) = SubscriptionId::from_word(args[0]) {
        if !cx.data_mut().events.unsubscribe(id) {
            debug!(subscription = %id, "unsubscribe of inactive subscription");
        }
    }
    Ok(None)
}

// ── Console ──

fn write(cx: Cx<'_, '_>, args: &[u64]) -> Result<Option<u64>, HostError> {
    let fd = args[0] as u32 as i32;
    crate::console::Stream::from_descriptor(fd)?;
    let text = read_text(cx, args[1], args[2])?;
    cx.data_mut().console.write(fd, &text)?;
    Ok(None)
}

fn log_str(cx: Cx<'_, '_>, args: &[u64]) -> Result<Option<u64>, HostError> {
    let text = read_text(cx, args[0], args[1])?;
    cx.data_mut().console.log(&text);
    Ok(None)
}

fn log_int(cx: Cx<'_, '_>, args: &[u64]) -> Result<Option<u64>, HostError> {
    let n = args[0] as u32 as i32;
    cx.data_mut().console.log(&n.to_string());
    Ok(None)
}
