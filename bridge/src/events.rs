//! Event subscriptions from the guest on host elements.
//!
//! The guest registers a raw export as the callback for an event on an
//! element. When the host fires that event, each matching callback is
//! called as `(event_handle, context_ptr)`, where the context pointer is
//! fetched from the guest at dispatch time. The event handle lives only
//! for the duration of the callback.

use std::fmt;
use std::num::NonZeroU64;

use hostbridge_hostapi::{ElementRef, FunctionBody, FunctionRef, Handle, HostError, HostValue};
use tracing::debug;
use wasmtime::StoreContextMut;

use crate::config::WordSize;
use crate::proxy::{call_guest, guest_func};
use crate::state::BridgeState;

/// Disposer returned by event registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(NonZeroU64);

impl SubscriptionId {
    pub fn get(self) -> u64 {
        self.0.get()
    }

    /// Decode a guest word; `0` is never a valid subscription.
    pub fn from_word(word: u64) -> Option<Self> {
        NonZeroU64::new(word).map(Self)
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub#{}", self.0)
    }
}

#[derive(Debug, Clone)]
struct Subscription {
    id: SubscriptionId,
    target: ElementRef,
    event: String,
    /// Name of the guest export to call.
    callback: String,
}

/// Active subscriptions in registration order.
#[derive(Debug)]
pub struct EventRegistry {
    subscriptions: Vec<Subscription>,
    next_id: NonZeroU64,
}

impl Default for EventRegistry {
    fn default() -> Self {
        Self {
            subscriptions: Vec::new(),
            next_id: NonZeroU64::MIN,
        }
    }
}

impl EventRegistry {
    /// Register `callback` for `event` on `target`.
    ///
    /// The callback must be a raw guest export.
    pub fn subscribe(
        &mut self,
        target: ElementRef,
        event: impl Into<String>,
        callback: &FunctionRef,
    ) -> Result<SubscriptionId, HostError> {
        let callback = match callback.body() {
            FunctionBody::GuestExport(name) => name.clone(),
            _ => return Err(HostError::type_mismatch("guest export", "host function")),
        };
        let id = SubscriptionId(self.next_id);
        self.next_id = self.next_id.saturating_add(1);
        self.subscriptions.push(Subscription {
            id,
            target,
            event: event.into(),
            callback,
        });
        Ok(id)
    }

    /// Remove a subscription. Returns false if it was not active.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.subscriptions.len();
        self.subscriptions.retain(|s| s.id != id);
        self.subscriptions.len() != before
    }

    pub fn is_active(&self, id: SubscriptionId) -> bool {
        self.subscriptions.iter().any(|s| s.id == id)
    }

    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    /// Snapshot of `(id, callback)` pairs for `event` on `target`.
    fn matching(&self, target: &ElementRef, event: &str) -> Vec<(SubscriptionId, String)> {
        self.subscriptions
            .iter()
            .filter(|s| s.event == event && s.target.ptr_eq(target))
            .map(|s| (s.id, s.callback.clone()))
            .collect()
    }
}

/// Subscribe the guest export behind `callback` to `event` on the element
/// behind `target`.
pub fn add_event_listener(
    cx: &mut StoreContextMut<'_, BridgeState>,
    target: Handle,
    event: &str,
    callback: Handle,
) -> Result<SubscriptionId, HostError> {
    let state = cx.data_mut();
    let element = state.table.get(target)?.as_element()?.clone();
    let callback = state.table.get(callback)?;
    let id = state
        .events
        .subscribe(element, event, callback.as_function()?)?;
    debug!(subscription = %id, event, "subscribed");
    Ok(id)
}

pub fn register_click_handler(
    cx: &mut StoreContextMut<'_, BridgeState>,
    target: Handle,
    callback: Handle,
) -> Result<SubscriptionId, HostError> {
    add_event_listener(cx, target, "click", callback)
}

/// The guest's current execution context pointer, or `0` if the guest
/// doesn't export one.
fn context_ptr(cx: &mut StoreContextMut<'_, BridgeState>) -> Result<u64, HostError> {
    let Some(func) = cx.data().guest()?.context else {
        return Ok(0);
    };
    let results = call_guest(cx, func, &[])?;
    match results.first() {
        Some(val) => WordSize::from_val(val),
        None => Ok(0),
    }
}

/// Fire `event` on `target` with `payload`. Returns how many callbacks ran.
///
/// Stops at the first failing callback; its event handle is still freed.
pub fn dispatch_event(
    cx: &mut StoreContextMut<'_, BridgeState>,
    target: &ElementRef,
    event: &str,
    payload: &HostValue,
) -> Result<usize, HostError> {
    let word = cx.data().config.word_size;
    let matching = cx.data().events.matching(target, event);
    let mut fired = 0;
    for (id, callback) in matching {
        // An earlier callback may have unsubscribed this one.
        if !cx.data().events.is_active(id) {
            continue;
        }
        let event_handle = cx.data_mut().table.alloc(payload.clone())?;
        let result = context_ptr(cx).and_then(|context| {
            let func = guest_func(cx, &callback)?;
            call_guest(
                cx,
                func,
                &[word.to_val(event_handle.to_word()), word.to_val(context)],
            )
        });
        cx.data_mut().table.free(event_handle)?;
        result?;
        debug!(subscription = %id, event, "dispatched");
        fired += 1;
    }
    Ok(fired)
}
