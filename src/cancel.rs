// SPDX-License-Identifier: MIT OR Apache-2.0

//! Cancellation and deadlines for the immutable chain.
//!
//! Local values never influence anything in here; an overlay neither cancels
//! nor extends a context.

use std::fmt::Display;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, OnceLock, Weak};
use std::task::{Poll, Waker};

use crate::deadline;
use crate::spinlock::RwSpinlock;
use crate::sys::Instant;

/// Why a context was cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ContextError {
    /// A [`CancelHandle`] for this context or an ancestor was used.
    Canceled,
    /// The context's deadline passed.
    DeadlineExceeded,
}

impl Display for ContextError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContextError::Canceled => f.write_str("context canceled"),
            ContextError::DeadlineExceeded => f.write_str("context deadline exceeded"),
        }
    }
}

impl std::error::Error for ContextError {}

#[derive(Debug, Default)]
struct Waiters {
    wakers: Vec<Waker>,
    children: Vec<Weak<CancelState>>,
}

#[derive(Debug)]
pub(crate) struct CancelState {
    deadline: Option<Instant>,
    /// Registration with the deadline watcher, if any.
    watch_id: Option<u64>,
    err: OnceLock<ContextError>,
    waiters: RwSpinlock<Waiters>,
}

impl CancelState {
    pub(crate) fn new(deadline: Option<Instant>, watch_id: Option<u64>) -> CancelState {
        CancelState {
            deadline,
            watch_id,
            err: OnceLock::new(),
            waiters: RwSpinlock::new(Waiters::default()),
        }
    }

    #[inline]
    pub(crate) fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    #[inline]
    pub(crate) fn err(&self) -> Option<ContextError> {
        self.err.get().copied()
    }

    /// Cancels this state and, transitively, every child. Only the first call has an effect.
    pub(crate) fn cancel(&self, err: ContextError) {
        if self.err.set(err).is_err() {
            return;
        }
        if let Some(id) = self.watch_id {
            deadline::complete(id);
        }
        let Waiters { wakers, children } = std::mem::take(&mut *self.waiters.write());
        for waker in wakers {
            waker.wake();
        }
        for child in children {
            if let Some(child) = child.upgrade() {
                child.cancel(err);
            }
        }
    }

    /// Arranges for `child` to be cancelled with this state.
    pub(crate) fn adopt(&self, child: &Arc<CancelState>) {
        {
            let mut waiters = self.waiters.write();
            if self.err.get().is_none() {
                waiters.children.retain(|c| c.strong_count() > 0);
                waiters.children.push(Arc::downgrade(child));
                return;
            }
        }
        if let Some(err) = self.err() {
            child.cancel(err);
        }
    }

    fn poll_done(&self, waker: &Waker) -> Poll<ContextError> {
        if let Some(err) = self.err() {
            return Poll::Ready(err);
        }
        let mut waiters = self.waiters.write();
        // cancel() sets err before taking the lock, so this check can't miss it
        if let Some(err) = self.err() {
            return Poll::Ready(err);
        }
        if !waiters.wakers.iter().any(|w| w.will_wake(waker)) {
            waiters.wakers.push(waker.clone());
        }
        Poll::Pending
    }
}

impl Drop for CancelState {
    fn drop(&mut self) {
        // a cancelled state already told the watcher
        if let (Some(id), None) = (self.watch_id, self.err.get()) {
            deadline::complete(id);
        }
    }
}

/// Cancels the context returned alongside it.
///
/// Cancelling is idempotent and also cancels every context derived from the
/// cancelled one. Dropping the handle does not cancel.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    state: Arc<CancelState>,
}

impl CancelHandle {
    pub(crate) fn new(state: Arc<CancelState>) -> CancelHandle {
        CancelHandle { state }
    }

    /// Cancels with [`ContextError::Canceled`]. Later calls do nothing.
    pub fn cancel(&self) {
        self.state.cancel(ContextError::Canceled);
    }
}

/// Resolves once a context is cancelled, yielding the reason.
///
/// A context with no cancellation in its chain (such as
/// [`Context::background`](crate::Context::background)) produces a `Done`
/// that never resolves.
#[derive(Debug, Clone)]
pub struct Done {
    state: Option<Arc<CancelState>>,
}

impl Done {
    pub(crate) fn new(state: Option<Arc<CancelState>>) -> Done {
        Done { state }
    }

    /// Non-blocking check.
    pub fn is_done(&self) -> bool {
        self.err().is_some()
    }

    /// The cancellation reason, once there is one.
    pub fn err(&self) -> Option<ContextError> {
        self.state.as_ref().and_then(|s| s.err())
    }
}

impl Future for Done {
    type Output = ContextError;

    fn poll(self: Pin<&mut Self>, cx: &mut std::task::Context<'_>) -> Poll<Self::Output> {
        match &self.state {
            Some(state) => state.poll_done(cx.waker()),
            None => Poll::Pending,
        }
    }
}
