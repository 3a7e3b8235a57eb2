//! Suspending invocations with explicit cancellation.
//!
//! An `Invocation` is a future over the result of an asynchronous host
//! function. A `CancelHandle` obtained from it can cancel the invocation
//! from elsewhere. Exactly one of "completed" or "cancelled" wins, so at
//! most one result is ever delivered.

use std::cell::Cell;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

use futures::future::LocalBoxFuture;
use futures::task::AtomicWaker;

use crate::error::HostError;
use crate::value::HostValue;

/// Lifecycle of an invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationState {
    Pending,
    Completed,
    Cancelled,
}

/// State shared between an invocation and its cancel handles.
#[derive(Debug)]
struct Shared {
    state: Cell<InvocationState>,
    waker: AtomicWaker,
}

impl Shared {
    fn get(&self) -> InvocationState {
        self.state.get()
    }
}

/// Future resolving to the value produced by an asynchronous host call.
pub struct Invocation {
    inner: Option<LocalBoxFuture<'static, Result<HostValue, HostError>>>,
    shared: Rc<Shared>,
}

impl Invocation {
    pub fn new(future: LocalBoxFuture<'static, Result<HostValue, HostError>>) -> Self {
        Self {
            inner: Some(future),
            shared: Rc::new(Shared {
                state: Cell::new(InvocationState::Pending),
                waker: AtomicWaker::new(),
            }),
        }
    }

    /// Invocation whose underlying operation already finished.
    pub fn ready(result: Result<HostValue, HostError>) -> Self {
        Self::new(Box::pin(futures::future::ready(result)))
    }

    /// Disposer that cancels this invocation.
    pub fn canceller(&self) -> CancelHandle {
        CancelHandle {
            shared: Rc::clone(&self.shared),
        }
    }

    pub fn state(&self) -> InvocationState {
        self.shared.get()
    }
}

impl Future for Invocation {
    type Output = Result<HostValue, HostError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        // A cancel after this point wakes the task that is polling now.
        self.shared.waker.register(cx.waker());
        if self.shared.get() == InvocationState::Cancelled {
            self.inner = None;
            return Poll::Ready(Err(HostError::Cancelled));
        }
        let Some(inner) = self.inner.as_mut() else {
            return Poll::Ready(Err(HostError::Internal(
                "invocation polled after completion".into(),
            )));
        };
        let result = match inner.as_mut().poll(cx) {
            Poll::Pending => return Poll::Pending,
            Poll::Ready(result) => result,
        };
        self.inner = None;
        // A cancel issued while the inner future was being polled still wins.
        if self.shared.get() == InvocationState::Cancelled {
            return Poll::Ready(Err(HostError::Cancelled));
        }
        self.shared.state.set(InvocationState::Completed);
        Poll::Ready(result)
    }
}

impl fmt::Debug for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Invocation")
            .field("state", &self.shared.get())
            .finish()
    }
}

/// Cancels a pending [`Invocation`].
#[derive(Debug, Clone)]
pub struct CancelHandle {
    shared: Rc<Shared>,
}

impl CancelHandle {
    /// Cancel the invocation.
    ///
    /// Returns `true` if this call won the race and no result will be
    /// delivered; `false` if the invocation had already completed or was
    /// already cancelled. A task awaiting the invocation is woken and
    /// observes `Cancelled` on its next poll.
    pub fn cancel(&self) -> bool {
        if self.shared.get() != InvocationState::Pending {
            return false;
        }
        self.shared.state.set(InvocationState::Cancelled);
        self.shared.waker.wake();
        true
    }

    pub fn state(&self) -> InvocationState {
        self.shared.get()
    }
}
