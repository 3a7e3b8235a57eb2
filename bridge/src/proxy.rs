//! Function proxies across the guest/host boundary.
//!
//! Every call in either direction goes through [`call_function`], which
//! dispatches on the function body. Guest-backed bodies are resolved
//! against the live instance at call time. Argument handles created for a
//! call are freed on every exit path, so a failed or trapped call never
//! leaks handles.

use futures::executor::block_on;
use hostbridge_hostapi::{
    CallContext, FunctionBody, FunctionRef, Handle, HostError, HostValue, Invocation,
};
use tracing::debug;
use wasmtime::{Func, Ref, StoreContextMut, Trap, Val, ValType};

use crate::config::WordSize;
use crate::state::{with_view, with_view_mut, BridgeState};

/// Map a failed guest call back to a host error.
///
/// Host errors raised by nested imports travel through the guest as trap
/// payloads and are recovered unchanged.
pub fn guest_error(err: anyhow::Error) -> HostError {
    if let Some(host) = err.downcast_ref::<HostError>() {
        return host.clone();
    }
    if let Some(Trap::OutOfFuel) = err.downcast_ref::<Trap>() {
        return HostError::Guest("out of fuel".into());
    }
    HostError::Guest(format!("{:#}", err))
}

/// Look up a guest function export by name.
pub fn guest_func(cx: &mut StoreContextMut<'_, BridgeState>, name: &str) -> Result<Func, HostError> {
    let instance = cx.data().guest()?.instance;
    instance
        .get_func(&mut *cx, name)
        .ok_or_else(|| HostError::Internal(format!("guest export `{}` not found", name)))
}

/// Call a guest function with raw values.
pub fn call_guest(
    cx: &mut StoreContextMut<'_, BridgeState>,
    func: Func,
    params: &[Val],
) -> Result<Vec<Val>, HostError> {
    let result_count = func.ty(&*cx).results().len();
    let mut results = vec![Val::I32(0); result_count];
    func.call(&mut *cx, params, &mut results)
        .map_err(guest_error)?;
    Ok(results)
}

/// Adapts the store to [`CallContext`] for native host functions.
struct StoreCallContext<'a, 'b> {
    cx: &'a mut StoreContextMut<'b, BridgeState>,
}

impl CallContext for StoreCallContext<'_, '_> {
    fn call(&mut self, func: &FunctionRef, args: &[HostValue]) -> Result<HostValue, HostError> {
        let handle = call_function(&mut *self.cx, func, args)?;
        self.cx.data_mut().table.take(handle)
    }
}

/// Invoke `func` with positional `args` and return a handle to the result.
///
/// The caller owns the returned handle; `Handle::NONE` means absent.
pub fn call_function(
    cx: &mut StoreContextMut<'_, BridgeState>,
    func: &FunctionRef,
    args: &[HostValue],
) -> Result<Handle, HostError> {
    debug!(function = func.name(), args = args.len(), "call");
    match func.body() {
        FunctionBody::Native(f) => {
            let receiver = func.receiver();
            let value = {
                let mut ctx = StoreCallContext { cx: &mut *cx };
                f(&mut ctx, &receiver, args)?
            };
            cx.data_mut().table.alloc(value)
        }
        FunctionBody::NativeAsync(_) => {
            let invocation = start_invocation(cx, func, args)?;
            await_invocation(cx, invocation)
        }
        FunctionBody::GuestExport(name) => {
            let value = call_raw_export(cx, name, args)?;
            cx.data_mut().table.alloc(value)
        }
        FunctionBody::WrappedGuest(name) => call_wrapped(cx, name, args),
        FunctionBody::ExportedEntry {
            table_index,
            context,
        } => call_exported_entry(cx, *table_index, *context, args),
        FunctionBody::Unwrapped(inner) => {
            let resolved = args
                .iter()
                .map(|arg| match arg {
                    HostValue::Absent => Ok(HostValue::Absent),
                    HostValue::Number(n) => cx.data().table.get(Handle::from_number(*n)?),
                    other => Err(HostError::type_mismatch("handle", other.kind())),
                })
                .collect::<Result<Vec<_>, _>>()?;
            call_function(cx, inner, &resolved)
        }
    }
}

/// Call a guest export with its own signature, converting numbers.
fn call_raw_export(
    cx: &mut StoreContextMut<'_, BridgeState>,
    name: &str,
    args: &[HostValue],
) -> Result<HostValue, HostError> {
    let func = guest_func(cx, name)?;
    let ty = func.ty(&*cx);
    let params = ty
        .params()
        .enumerate()
        .map(|(i, vt)| {
            let n = match args.get(i) {
                Some(arg) => arg.as_number()?,
                None => 0.0,
            };
            match vt {
                ValType::I32 => Ok(Val::I32(n as i32)),
                ValType::I64 => Ok(Val::I64(n as i64)),
                ValType::F32 => Ok(Val::F32((n as f32).to_bits())),
                ValType::F64 => Ok(Val::F64(n.to_bits())),
                _ => Err(HostError::type_mismatch("numeric parameter", "reference")),
            }
        })
        .collect::<Result<Vec<_>, _>>()?;
    let results = call_guest(cx, func, &params)?;
    Ok(match results.first() {
        Some(Val::I32(v)) => HostValue::Number(*v as f64),
        Some(Val::I64(v)) => HostValue::Number(*v as f64),
        Some(Val::F32(bits)) => HostValue::Number(f32::from_bits(*bits) as f64),
        Some(Val::F64(bits)) => HostValue::Number(f64::from_bits(*bits)),
        _ => HostValue::Absent,
    })
}

fn call_wrapped(
    cx: &mut StoreContextMut<'_, BridgeState>,
    export: &str,
    args: &[HostValue],
) -> Result<Handle, HostError> {
    let func = guest_func(cx, export)?;
    let handles = cx.data_mut().table.alloc_all(args)?;
    let result = call_with_frame(cx, func, &handles);
    cx.data_mut().table.free_all(&handles);
    result
}

/// Write `handles` into a fresh frame and call `func(frame_ptr, count)`.
fn call_with_frame(
    cx: &mut StoreContextMut<'_, BridgeState>,
    func: Func,
    handles: &[Handle],
) -> Result<Handle, HostError> {
    let mark = cx.data().frames.mark();
    let result = push_and_call(cx, func, handles);
    cx.data_mut().frames.release(mark);
    result
}

fn push_and_call(
    cx: &mut StoreContextMut<'_, BridgeState>,
    func: Func,
    handles: &[Handle],
) -> Result<Handle, HostError> {
    let word = cx.data().config.word_size;
    let ptr = cx.data_mut().frames.push(handles.len() * word.bytes())?;
    with_view_mut(cx, |view| view.write_frame(ptr, handles))?;
    let results = call_guest(
        cx,
        func,
        &[word.to_val(ptr), word.to_val(handles.len() as u64)],
    )?;
    match results.first() {
        Some(val) => Handle::from_word(WordSize::from_val(val)?),
        None => Ok(Handle::NONE),
    }
}

fn table_entry(cx: &mut StoreContextMut<'_, BridgeState>, index: u32) -> Result<Func, HostError> {
    let table = cx
        .data()
        .guest()?
        .table
        .ok_or_else(|| HostError::Internal("guest exports no function table".into()))?;
    match table.get(&mut *cx, u64::from(index)) {
        Some(Ref::Func(Some(func))) => Ok(func),
        _ => Err(HostError::Internal(format!(
            "table entry {} is not a function",
            index
        ))),
    }
}

fn call_exported_entry(
    cx: &mut StoreContextMut<'_, BridgeState>,
    table_index: u32,
    context: u64,
    args: &[HostValue],
) -> Result<Handle, HostError> {
    let func = table_entry(cx, table_index)?;
    let word = cx.data().config.word_size;
    let packed = cx.data_mut().table.alloc(HostValue::from(args.to_vec()))?;
    let result = call_guest(
        cx,
        func,
        &[word.to_val(packed.to_word()), word.to_val(context)],
    );
    cx.data_mut().table.free(packed)?;
    result.map(|_| Handle::NONE)
}

/// Wrap the raw guest export behind `handle` as a frame-convention
/// function value and return a handle to it.
pub fn wrap_guest_function(
    cx: &mut StoreContextMut<'_, BridgeState>,
    handle: Handle,
) -> Result<Handle, HostError> {
    let value = cx.data().table.get(handle)?;
    let wrapped = match value.as_function()?.body() {
        FunctionBody::GuestExport(name) => FunctionRef::wrapped_guest(name.as_str()),
        _ => return Err(HostError::type_mismatch("guest export", "host function")),
    };
    cx.data_mut().table.alloc(HostValue::from(wrapped))
}

/// Guest-side view of a host function, called with a frame of handles.
#[derive(Debug, Clone)]
pub struct GuestCallable {
    target: FunctionRef,
}

impl GuestCallable {
    pub fn target(&self) -> &FunctionRef {
        &self.target
    }

    /// Resolve the `count` handles at `ptr`, call the target, and return a
    /// handle to its result.
    pub fn call_frame(
        &self,
        cx: &mut StoreContextMut<'_, BridgeState>,
        ptr: u64,
        count: u64,
    ) -> Result<Handle, HostError> {
        let args = resolve_frame(cx, ptr, count)?;
        call_function(cx, &self.target, &args)
    }
}

pub fn unwrap_host_function(
    cx: &StoreContextMut<'_, BridgeState>,
    handle: Handle,
) -> Result<GuestCallable, HostError> {
    let value = cx.data().table.get(handle)?;
    Ok(GuestCallable {
        target: value.as_function()?.clone(),
    })
}

/// Handle to a function value taking handles as its arguments.
pub fn unwrap_to_handle(
    cx: &mut StoreContextMut<'_, BridgeState>,
    handle: Handle,
) -> Result<Handle, HostError> {
    let callable = unwrap_host_function(cx, handle)?;
    let unwrapped = FunctionRef::unwrapped(callable.target);
    cx.data_mut().table.alloc(HostValue::from(unwrapped))
}

/// Expose guest table entry `table_index` as a host function value bound
/// to `context`.
pub fn export_as_callable(
    cx: &mut StoreContextMut<'_, BridgeState>,
    table_index: u32,
    context: u64,
) -> Result<Handle, HostError> {
    table_entry(cx, table_index)?;
    let func = FunctionRef::exported_entry(table_index, context);
    cx.data_mut().table.alloc(HostValue::from(func))
}

/// Host values referenced by the call frame at `ptr`.
pub fn resolve_frame(
    cx: &StoreContextMut<'_, BridgeState>,
    ptr: u64,
    count: u64,
) -> Result<Vec<HostValue>, HostError> {
    let handles = with_view(cx, |view| view.read_frame(ptr, count))?;
    handles.iter().map(|h| cx.data().table.get(*h)).collect()
}

/// Start `func` as an invocation. Synchronous bodies run to completion
/// immediately.
pub fn start_invocation(
    cx: &mut StoreContextMut<'_, BridgeState>,
    func: &FunctionRef,
    args: &[HostValue],
) -> Result<Invocation, HostError> {
    match func.body() {
        FunctionBody::NativeAsync(f) => Ok(Invocation::new(f(&func.receiver(), args))),
        _ => {
            let result = call_function(cx, func, args)
                .and_then(|handle| cx.data_mut().table.take(handle));
            Ok(Invocation::ready(result))
        }
    }
}

/// Drive `invocation` to completion and allocate its result handle.
///
/// A cancelled invocation allocates nothing.
pub fn await_invocation(
    cx: &mut StoreContextMut<'_, BridgeState>,
    invocation: Invocation,
) -> Result<Handle, HostError> {
    let value = block_on(invocation)?;
    cx.data_mut().table.alloc(value)
}
