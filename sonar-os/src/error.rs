//! Fault taxonomy of the runtime.
//!
//! The runtime does not propagate errors: every fault below is a programming
//! or capacity error with no recovery path, so it halts the program. The only
//! non-fatal condition, canceling a task that already ran, is reported as a
//! value (see [`scheduler::CancelOutcome`]).
//!
//! [`scheduler::CancelOutcome`]: crate::scheduler::CancelOutcome

use sonar_util::error;

/// Unrecoverable runtime faults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Fault {
    /// A fixed-capacity queue (task queue, pending ring, snapshot ring) is
    /// full.
    CapacityExceeded,
    /// `cancel` was handed an id that was never issued.
    UnknownTaskId,
    /// A promise was resolved a second time.
    DoubleResolve,
    /// A second handler was attached to a promise or stream, or a second
    /// change callback to the same pin.
    DoubleAttach,
    /// An edge primitive found the pin already at the level it was to wait
    /// for, or an unknown pin was named.
    Precondition,
}

impl core::fmt::Display for Fault {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let name = match self {
            Fault::CapacityExceeded => "capacity exceeded",
            Fault::UnknownTaskId => "unknown task id",
            Fault::DoubleResolve => "promise resolved twice",
            Fault::DoubleAttach => "handler attached twice",
            Fault::Precondition => "precondition violated",
        };
        f.write_str(name)
    }
}

/// Halts on an unrecoverable fault.
///
/// On the host this unwinds through the panic machinery so the failing test
/// aborts; on target hardware the application's panic handler is expected to
/// disable interrupts and trap.
#[track_caller]
pub fn fatal(fault: Fault) -> ! {
    error!("fatal: {}", fault);
    panic!("fatal: {}", fault);
}
