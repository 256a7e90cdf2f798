//! Process-wide execution-context indicator.
//!
//! A single bit of state saying whether the code currently running was
//! entered from an interrupt vector. Interrupt bindings set it for the span
//! of the handler through a scope guard; consumers such as the logger pick
//! between synchronous and deferred paths based on it.

use portable_atomic::{AtomicU8, Ordering};

/// Execution context of the current code path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ThreadId {
    Main = 0,
    Interrupt = 1,
}

static THREAD_ID: AtomicU8 = AtomicU8::new(ThreadId::Main as u8);

pub fn current() -> ThreadId {
    if THREAD_ID.load(Ordering::Relaxed) == ThreadId::Interrupt as u8 {
        ThreadId::Interrupt
    } else {
        ThreadId::Main
    }
}

pub fn is_interrupt() -> bool {
    current() == ThreadId::Interrupt
}

/// Marks the current context as interrupt until the returned scope drops.
///
/// The previous value is restored on every exit path; scopes nest.
#[must_use = "the indicator is reset when the scope drops"]
pub fn interrupt_scope() -> Scope {
    Scope {
        previous: THREAD_ID.swap(ThreadId::Interrupt as u8, Ordering::Relaxed),
    }
}

pub struct Scope {
    previous: u8,
}

impl Drop for Scope {
    fn drop(&mut self) {
        THREAD_ID.store(self.previous, Ordering::Relaxed);
    }
}
