//! Time structures.
//!
//! - [`Instant`] is a point in time, microseconds since boot.
//! - [`Duration`] is a span between instants.
//!
//! Both are 32-bit microsecond tick counts. Instants wrap after about 71
//! minutes; ordering and subtraction are wrap-aware, so two instants must be
//! within half the wrap range of each other to compare meaningfully.

pub mod export {
    pub use fugit::ExtU32;
}

/// Microseconds since boot, wrapping after about 71 minutes.
pub type Instant = fugit::TimerInstantU32<1_000_000>;

/// An interval between two instants, in microseconds.
pub type Duration = fugit::TimerDurationU32<1_000_000>;
