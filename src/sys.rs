// SPDX-License-Identifier: MIT OR Apache-2.0

//! Platform-specific time types.
//!
//! Deadlines are expressed as [`Instant`]s. On native platforms these come
//! from `std::time`, while on WASM they come from `web_time`, since
//! `std::time::Instant::now` panics on `wasm32-unknown-unknown`.
//!
//! Both types are re-exported at the crate root so that callers of
//! [`with_deadline`](crate::Context::with_deadline) and [`with_timeout`](crate::Context::with_timeout)
//! name the same type the crate compares against.

#[cfg(not(target_arch = "wasm32"))]
pub use std::time::{Duration, Instant};
#[cfg(target_arch = "wasm32")]
pub use web_time::{Duration, Instant};
