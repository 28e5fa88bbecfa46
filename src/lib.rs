//SPDX-License-Identifier: MIT OR Apache-2.0
/*!
# localwise

localwise layers values that are local to one thread or task on top of an
immutable context chain that everybody shares.

# The problem

A request handler fans out to a dozen threads. They all need the same
request-scoped data (a deadline, a cancellation signal, a request id), so you
pass them a shared, immutable context. But each of them also wants a bit of
private scratch state attached to that same context: a buffer, a counter, a
memo table. Stuff that is not thread-safe and should never be.

Putting that state in the shared context races. Keeping it somewhere else
means threading a second parameter everywhere. And if one thread hands its
context to another, the scratch state it carries is now shared by accident.

# The model

* The **immutable chain** ([`Context::with_value`], [`Context::with_cancel`],
  [`Context::with_deadline`]) is append-only and safe to read from any unit.
* A **local overlay** is created by [`Context::localize`] and belongs to the
  execution unit that created it. Only that unit may read or write it
  ([`Context::with_local_value`], [`Context::value`]).
* **Localizing** is the one boundary-crossing step. It shadows every local
  key inherited from the parent, so nothing private leaks into the new unit,
  unless the value opted in with [`Snapshot`].
* Lookup checks the overlay first, then the immutable chain.

```rust
use localwise::Context;

let ctx = Context::background().with_value("immutable", "X");

std::thread::spawn(move || {
    let local = ctx.localize();
    local.with_local_value("k", "Y");
    assert_eq!(local.value_as::<&str>("k").as_deref(), Some(&"Y"));
    assert_eq!(local.value_as::<&str>("immutable").as_deref(), Some(&"X"));
    assert!(ctx.value("k").is_none());
})
.join()
.unwrap();
```

# Misuse is loud

Touching another unit's overlay, writing locals to a context that was never
localized, or localizing twice on one unit all panic with a [`Violation`].
These are bugs in the caller, so there is nothing to retry. Each violation is
also logged through logwise before the panic.

# Execution units

A unit is a thread by default. Async code can make each task its own unit by
wrapping it in [`ApplyUnit`], which keeps the task's identity stable while an
executor moves it between threads. The [`spawn`] module runs a job on a new
thread with the context already localized.

Unit identity sits behind the [`UnitIdentity`] trait. The `unchecked` cargo
feature replaces it with [`ConstantIdentity`], removing the affinity checks
for builds that have been validated without it.

*/

mod cancel;
pub mod context;
mod deadline;
mod key;
pub mod spawn;
mod spinlock;
mod sys;
mod unit;
mod violation;

logwise::declare_logging_domain!();

pub use cancel::{CancelHandle, ContextError, Done};
pub use context::{
    ApplyUnit, Context, background, localize, value, with_local_value, with_value,
};
pub use key::{Key, Snapshot, Value};
pub use sys::{Duration, Instant};
pub use unit::{ConstantIdentity, ThreadIdentity, UnitId, UnitIdentity, current_unit};
pub use violation::Violation;
