// SPDX-License-Identifier: MIT OR Apache-2.0

//! Running work on a new execution unit.
//!
//! [`run`] is the reference way to cross a unit boundary: it spawns a thread,
//! [localizes](crate::Context::localize) the context exactly once on that
//! thread, and hands the localized context to the job. The job's outcome
//! comes back on a channel, wrapped in a [`Completion`].
//!
//! Panics inside the job, including [`Violation`](crate::Violation)s such as
//! localizing a second time, are caught and reported as
//! [`RunError::Panicked`] rather than tearing down the caller.
//!
//! ```rust
//! use localwise::{Context, spawn};
//! use std::time::Duration;
//!
//! let ctx = Context::background().with_value("job", 7u32);
//! let completion = spawn::run(&ctx, |ctx| {
//!     ctx.with_local_value("scratch", "mine");
//!     Ok::<u32, std::io::Error>(*ctx.value_as::<u32>("job").unwrap() * 6)
//! });
//! let outcome = completion.wait_timeout(Duration::from_secs(5)).unwrap();
//! assert_eq!(outcome.unwrap(), 42);
//! ```

use std::any::Any;
use std::fmt::{Debug, Display};
use std::panic::AssertUnwindSafe;

use logwise::privacy::IPromiseItsNotPrivate;
use wasm_safe_mutex::mpsc;

use crate::context::Context;
use crate::sys::{Duration, Instant};
use crate::violation::Violation;

/// Why a spawned job did not produce a value.
#[derive(Debug)]
pub enum RunError<E> {
    /// The job returned `Err`.
    Failed(E),
    /// The job panicked. Carries the panic message.
    Panicked(String),
}

impl<E: Display> Display for RunError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunError::Failed(e) => write!(f, "job failed: {e}"),
            RunError::Panicked(message) => write!(f, "job panicked: {message}"),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for RunError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RunError::Failed(e) => Some(e),
            RunError::Panicked(_) => None,
        }
    }
}

/// Why [`Completion::wait_timeout`] returned without an outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitError {
    /// The timeout elapsed before the job reported.
    Timeout,
    /// The job will never report, e.g. because its thread could not be spawned.
    Disconnected,
}

impl Display for WaitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WaitError::Timeout => f.write_str("timed out waiting for job"),
            WaitError::Disconnected => f.write_str("job exited without reporting"),
        }
    }
}

impl std::error::Error for WaitError {}

/// The eventual outcome of a job started with [`run`] or [`exec`].
pub struct Completion<T, E> {
    receiver: mpsc::Receiver<Result<T, RunError<E>>>,
}

impl<T, E> Debug for Completion<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Completion").finish_non_exhaustive()
    }
}

impl<T, E> Completion<T, E> {
    /// Blocks until the job reports.
    ///
    /// Fails only with [`WaitError::Disconnected`].
    pub fn wait(&self) -> Result<Result<T, RunError<E>>, WaitError> {
        self.receiver
            .recv_sync()
            .map_err(|_: mpsc::RecvError| WaitError::Disconnected)
    }

    /// Blocks until the job reports or `timeout` elapses.
    ///
    /// A timeout too large to represent as an [`Instant`] waits like [`wait`](Completion::wait).
    pub fn wait_timeout(&self, timeout: Duration) -> Result<Result<T, RunError<E>>, WaitError> {
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            return self.wait();
        };
        match self.receiver.recv_sync_timeout(deadline) {
            Ok(outcome) => Ok(outcome),
            Err(mpsc::RecvTimeoutError::Timeout) => Err(WaitError::Timeout),
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(WaitError::Disconnected),
        }
    }
}

/// A job that can be handed to [`exec`].
pub trait Runnable: Send + 'static {
    /// What a successful run produces.
    type Output: Send + 'static;
    /// What a failed run reports, as [`RunError::Failed`].
    type Error: Send + 'static;

    /// Does the work. `ctx` is already localized to the new unit.
    fn run(self, ctx: Context) -> Result<Self::Output, Self::Error>;
}

/// Runs `job` on a new thread with `ctx` localized to that thread.
pub fn run<F, T, E>(ctx: &Context, job: F) -> Completion<T, E>
where
    F: FnOnce(Context) -> Result<T, E> + Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
{
    let (sender, receiver) = mpsc::channel();
    let ctx = ctx.clone();
    spawn_unit(move || {
        let outcome = std::panic::catch_unwind(AssertUnwindSafe(move || job(ctx.localize())));
        let result = match outcome {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(RunError::Failed(e)),
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                logwise::warn_sync!(
                    "spawned job panicked: {message}",
                    message = IPromiseItsNotPrivate(message.clone())
                );
                Err(RunError::Panicked(message))
            }
        };
        let _ = sender.send_sync(result);
    });
    Completion { receiver }
}

/// [`run`] for a [`Runnable`].
pub fn exec<R: Runnable>(ctx: &Context, runnable: R) -> Completion<R::Output, R::Error> {
    run(ctx, move |ctx| runnable.run(ctx))
}

fn spawn_unit(f: impl FnOnce() + Send + 'static) {
    #[cfg(not(target_arch = "wasm32"))]
    let spawned = std::thread::Builder::new()
        .name("localwise-unit".to_string())
        .spawn(f)
        .map(|_| ());

    #[cfg(target_arch = "wasm32")]
    let spawned: std::io::Result<()> = {
        wasm_thread::spawn(f);
        Ok(())
    };

    if let Err(e) = spawned {
        logwise::warn_sync!(
            "could not spawn unit: {error}",
            error = IPromiseItsNotPrivate(e.to_string())
        );
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(violation) = payload.downcast_ref::<Violation>() {
        violation.to_string()
    } else if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
