//! Callable host values.
//!
//! A `FunctionRef` is either a host closure or a proxy for a guest entry
//! point. Guest-backed bodies only name their target (export name or
//! table index); the bridge resolves them against the live instance at
//! call time, so this crate stays independent of the WASM runtime.

use std::fmt;
use std::rc::Rc;

use futures::future::LocalBoxFuture;

use crate::error::HostError;
use crate::value::HostValue;

/// Re-entry point handed to native host functions.
///
/// Lets a host closure call any other function value, including guest
/// proxies, while the bridge is in the middle of a boundary crossing.
pub trait CallContext {
    /// Invoke `func` with positional `args` and return its result.
    fn call(&mut self, func: &FunctionRef, args: &[HostValue]) -> Result<HostValue, HostError>;
}

/// Synchronous host closure: `(ctx, receiver, args) -> result`.
pub type NativeFn =
    dyn Fn(&mut dyn CallContext, &HostValue, &[HostValue]) -> Result<HostValue, HostError>;

/// Asynchronous host closure: `(receiver, args) -> future`.
pub type NativeAsyncFn =
    dyn Fn(&HostValue, &[HostValue]) -> LocalBoxFuture<'static, Result<HostValue, HostError>>;

/// What a function value does when invoked.
pub enum FunctionBody {
    /// Host closure.
    Native(Box<NativeFn>),
    /// Host closure completing later; driven by the suspending invoke path.
    NativeAsync(Box<NativeAsyncFn>),
    /// Raw guest export, called with its own signature.
    GuestExport(String),
    /// Guest export following the frame convention
    /// `(frame_ptr, count) -> result_handle`.
    WrappedGuest(String),
    /// Guest indirect-table entry called as `(args_handle, context)`.
    ExportedEntry { table_index: u32, context: u64 },
    /// Host function taking handles instead of values.
    Unwrapped(FunctionRef),
}

struct HostFunction {
    name: String,
    body: FunctionBody,
}

/// Shared reference to a callable, optionally bound to a receiver.
#[derive(Clone)]
pub struct FunctionRef {
    func: Rc<HostFunction>,
    receiver: Option<Rc<HostValue>>,
}

impl FunctionRef {
    fn with_body(name: impl Into<String>, body: FunctionBody) -> Self {
        Self {
            func: Rc::new(HostFunction {
                name: name.into(),
                body,
            }),
            receiver: None,
        }
    }

    /// Wrap a synchronous host closure.
    pub fn native<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&mut dyn CallContext, &HostValue, &[HostValue]) -> Result<HostValue, HostError>
            + 'static,
    {
        Self::with_body(name, FunctionBody::Native(Box::new(f)))
    }

    /// Wrap an asynchronous host closure.
    pub fn native_async<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&HostValue, &[HostValue]) -> LocalBoxFuture<'static, Result<HostValue, HostError>>
            + 'static,
    {
        Self::with_body(name, FunctionBody::NativeAsync(Box::new(f)))
    }

    /// Refer to a raw guest export by name.
    pub fn guest_export(name: impl Into<String>) -> Self {
        let name = name.into();
        Self::with_body(name.clone(), FunctionBody::GuestExport(name))
    }

    /// Host-callable proxy for a frame-convention guest export.
    pub fn wrapped_guest(export: impl Into<String>) -> Self {
        let export = export.into();
        Self::with_body(
            format!("wrapped:{}", export),
            FunctionBody::WrappedGuest(export),
        )
    }

    /// Host-callable proxy for a guest table entry with a fixed context.
    pub fn exported_entry(table_index: u32, context: u64) -> Self {
        Self::with_body(
            format!("table[{}]", table_index),
            FunctionBody::ExportedEntry {
                table_index,
                context,
            },
        )
    }

    /// Handle-taking view of `inner`.
    pub fn unwrapped(inner: FunctionRef) -> Self {
        let name = format!("unwrapped:{}", inner.name());
        Self::with_body(name, FunctionBody::Unwrapped(inner))
    }

    /// Same function with `receiver` bound as its `this` value.
    pub fn bind(&self, receiver: HostValue) -> Self {
        Self {
            func: Rc::clone(&self.func),
            receiver: Some(Rc::new(receiver)),
        }
    }

    pub fn name(&self) -> &str {
        &self.func.name
    }

    pub fn body(&self) -> &FunctionBody {
        &self.func.body
    }

    /// Bound receiver, or `Absent` for an unbound function.
    pub fn receiver(&self) -> HostValue {
        self.receiver
            .as_deref()
            .cloned()
            .unwrap_or(HostValue::Absent)
    }

    /// True if the body runs inside the guest.
    pub fn is_guest(&self) -> bool {
        matches!(
            self.body(),
            FunctionBody::GuestExport(_)
                | FunctionBody::WrappedGuest(_)
                | FunctionBody::ExportedEntry { .. }
        )
    }
}

impl PartialEq for FunctionRef {
    /// Same underlying function and equal receivers.
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.func, &other.func) && self.receiver() == other.receiver()
    }
}

impl fmt::Debug for FunctionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionRef")
            .field("name", &self.name())
            .field("bound", &self.receiver.is_some())
            .finish()
    }
}
