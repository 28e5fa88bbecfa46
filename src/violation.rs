// SPDX-License-Identifier: MIT OR Apache-2.0

//! Misuse of local values.
//!
//! Every variant here is a programmer error, not a condition to retry, so
//! the crate never returns one. They are logged and then raised with
//! [`std::panic::panic_any`], which lets a test or a task runner recover the
//! typed payload:
//!
//! ```
//! use localwise::{Context, Violation};
//!
//! let ctx = Context::background();
//! let payload = std::panic::catch_unwind(|| ctx.with_local_value("k", 1)).unwrap_err();
//! assert_eq!(payload.downcast_ref::<Violation>(), Some(&Violation::NotLocalized));
//! ```

use std::fmt::Display;

use logwise::privacy::IPromiseItsNotPrivate;

use crate::unit::UnitId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum Violation {
    /// A local overlay was read or written by a unit other than its owner.
    ThreadAffinity { owner: UnitId, current: UnitId },
    /// `localize` was called on a context already localized to this unit.
    DoubleLocalization { unit: UnitId },
    /// A local value was written to a context that was never localized.
    NotLocalized,
}

impl Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Violation::ThreadAffinity { owner, current } => write!(
                f,
                "local values owned by {owner} accessed from {current}; localize the context on {current} first"
            ),
            Violation::DoubleLocalization { unit } => {
                write!(f, "context localized twice on {unit}")
            }
            Violation::NotLocalized => {
                f.write_str("context is not localized; call localize() before writing local values")
            }
        }
    }
}

impl std::error::Error for Violation {}

impl Violation {
    #[track_caller]
    pub(crate) fn raise(self) -> ! {
        let location = std::panic::Location::caller();
        logwise::error_sync!(
            "localwise violation: {message} at {file}:{line}",
            message = IPromiseItsNotPrivate(self.to_string()),
            file = IPromiseItsNotPrivate(location.file()),
            line = location.line()
        );
        std::panic::panic_any(self)
    }
}
