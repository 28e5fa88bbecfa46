// SPDX-License-Identifier: MIT OR Apache-2.0

//! Task-scoped execution units.

use std::future::Future;
use std::pin::Pin;
use std::task::Poll;

use crate::unit::{TaskScope, UnitId};

/// A [`Future`] wrapper that makes the wrapped future its own execution unit.
///
/// Executors with thread pools may poll one task from several threads, and
/// may poll several tasks from one thread. Neither matches what a local
/// overlay needs, which is one stable owner per task. `ApplyUnit` allocates a
/// [`UnitId`] when it is created and installs it around every poll, so code
/// inside the future sees the same unit wherever it runs, and never the unit
/// of the thread that happens to poll it.
///
/// # Examples
///
/// ```rust
/// use localwise::{ApplyUnit, Context};
///
/// # async fn example() {
/// let ctx = Context::local();
/// ctx.with_local_value("scratch", 1u32);
///
/// let shared = ctx.clone();
/// ApplyUnit::new(async move {
///     // a different unit from the one that owns `ctx`
///     let local = shared.localize();
///     assert!(local.value("scratch").is_none());
///     local.with_local_value("scratch", 2u32);
/// })
/// .await;
///
/// assert_eq!(ctx.value_as::<u32>("scratch").as_deref(), Some(&1));
/// # }
/// ```
///
/// # Implementation Details
///
/// `ApplyUnit` implements [`Future`] by:
/// 1. Saving the thread's current task scope
/// 2. Installing its own unit as the task scope
/// 3. Polling the inner future
/// 4. Restoring the saved scope, even if the poll panics
pub struct ApplyUnit<F> {
    unit: UnitId,
    future: F,
}

impl<F> ApplyUnit<F> {
    /// Wraps `future` in a brand new execution unit.
    pub fn new(future: F) -> Self {
        Self {
            unit: UnitId::fresh(),
            future,
        }
    }

    /// The unit the wrapped future runs as.
    pub fn unit(&self) -> UnitId {
        self.unit
    }
}

impl<F> Future for ApplyUnit<F>
where
    F: Future,
{
    type Output = F::Output;

    fn poll(self: Pin<&mut Self>, cx: &mut std::task::Context<'_>) -> Poll<Self::Output> {
        let (unit, fut) = unsafe {
            let d = self.get_unchecked_mut();
            (d.unit, Pin::new_unchecked(&mut d.future))
        };
        let _scope = TaskScope::enter(unit);
        fut.poll(cx)
    }
}
