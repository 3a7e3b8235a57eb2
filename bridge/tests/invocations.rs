//! Suspending invocation tests: `invoke_await` from the guest, host-side
//! async invocations and cancellation.

mod common;

use std::cell::Cell;
use std::thread;
use std::time::Duration;

use futures::channel::oneshot;
use futures::FutureExt;
use hostbridge::hostapi::{FunctionRef, HostError, HostValue, InvocationState, ObjectRef};

use common::*;

/// Async host function resolving with whatever arrives on `rx`.
fn receive_once(rx: oneshot::Receiver<f64>) -> FunctionRef {
    let rx = Cell::new(Some(rx));
    FunctionRef::native_async("fetch", move |_, _| {
        let rx = rx.take();
        async move {
            match rx {
                Some(rx) => rx
                    .await
                    .map(HostValue::from)
                    .map_err(|_| HostError::Cancelled),
                None => Err(HostError::Internal("fetch already used".into())),
            }
        }
        .boxed_local()
    })
}

fn ready_value(n: i32) -> FunctionRef {
    FunctionRef::native_async("ready", move |_, _| {
        futures::future::ready(Ok(HostValue::from(n))).boxed_local()
    })
}

const AWAIT_GUEST: &str = r#"
    (data (i32.const 16) "fetch")
    (data (i32.const 32) "fetched")
    (func (export "_start"))
    (func (export "fetch_and_store")
        (local $f i32) (local $r i32)
        (local.set $f (call $get (call $global_root) (i32.const 16) (i32.const 5)))
        (local.set $r (call $invoke_await (local.get $f) (i32.const 0) (i32.const 0)))
        (call $set (call $global_root) (i32.const 32) (i32.const 7) (local.get $r))
        (call $free (local.get $r))
        (call $free (local.get $f)))
"#;

#[test]
fn test_guest_awaits_host_completion() {
    let (tx, rx) = oneshot::channel();
    let global = ObjectRef::new();
    global.set("fetch", HostValue::from(receive_once(rx)));
    let mut instance = instantiate_with_global(&guest(AWAIT_GUEST), &global);
    let run = instance.export("fetch_and_store").unwrap();

    let sender = thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        tx.send(42.0).unwrap();
    });
    instance.call(&run, &[]).unwrap();
    sender.join().unwrap();

    assert_eq!(number_at(&global, "fetched"), 42.0);
    assert_eq!(instance.live_handles(), 2);
}

#[test]
fn test_guest_await_of_sync_function() {
    let global = ObjectRef::new();
    global.set("fetch", HostValue::from(sum_function()));
    let mut instance = instantiate_with_global(&guest(AWAIT_GUEST), &global);
    let run = instance.export("fetch_and_store").unwrap();

    instance.call(&run, &[]).unwrap();

    assert_eq!(number_at(&global, "fetched"), 0.0);
}

#[test]
fn test_guest_await_failure_traps() {
    let (tx, rx) = oneshot::channel::<f64>();
    drop(tx);
    let global = ObjectRef::new();
    global.set("fetch", HostValue::from(receive_once(rx)));
    let mut instance = instantiate_with_global(&guest(AWAIT_GUEST), &global);
    let run = instance.export("fetch_and_store").unwrap();

    let err = instance.call(&run, &[]).unwrap_err();

    assert_eq!(err.host_error(), Some(&HostError::Cancelled));
    assert!(global.get("fetched").is_absent());
}

#[test]
fn test_cancel_before_completion_allocates_nothing() {
    let (_tx, rx) = oneshot::channel();
    let mut instance = instantiate(&guest(AWAIT_GUEST));
    let before = instance.live_handles();

    let (invocation, cancel) = instance.invoke_async(&receive_once(rx), &[]).unwrap();
    assert!(cancel.cancel());
    assert_eq!(cancel.state(), InvocationState::Cancelled);

    let err = instance.await_invocation(invocation).unwrap_err();
    assert_eq!(err.host_error(), Some(&HostError::Cancelled));
    assert_eq!(instance.live_handles(), before);
}

#[test]
fn test_cancel_after_completion_is_noop() {
    let mut instance = instantiate(&guest(AWAIT_GUEST));
    let before = instance.live_handles();

    let (invocation, cancel) = instance.invoke_async(&ready_value(1), &[]).unwrap();
    let handle = instance.await_invocation(invocation).unwrap();

    assert!(!cancel.cancel());
    assert_eq!(cancel.state(), InvocationState::Completed);
    assert_eq!(instance.live_handles(), before + 1);
    assert_eq!(instance.take(handle).unwrap(), HostValue::from(1));
}

#[test]
fn test_call_drives_async_function() {
    let mut instance = instantiate(&guest(AWAIT_GUEST));
    let value = instance.call_value(&ready_value(9), &[]).unwrap();
    assert_eq!(value, HostValue::from(9));
}
