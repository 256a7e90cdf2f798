//! Logging for the sonar crates.
//!
//! Runtime code logs through the severity macros re-exported here and never
//! names a backend: the application decides at build time whether records go
//! to the `log` facade (host builds), to `defmt` (wire-format target
//! builds), or nowhere at all.

#[cfg(all(feature = "defmt", feature = "log"))]
compile_error!("the defmt and log features are mutually exclusive");

#[cfg(feature = "defmt")]
pub use defmt::{debug, error, info, trace, warn};

#[cfg(feature = "log")]
pub use log::{debug, error, info, trace, warn};

/// Swallows a record, arguments unevaluated. Stands in for every severity
/// macro when no logging backend is compiled in.
#[cfg(not(any(feature = "defmt", feature = "log")))]
#[macro_export]
macro_rules! silent {
    ($($record:tt)*) => {};
}

#[cfg(not(any(feature = "defmt", feature = "log")))]
pub use crate::{
    silent as debug, silent as error, silent as info, silent as trace, silent as warn,
};
