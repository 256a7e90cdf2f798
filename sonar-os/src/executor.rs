//! Deferred execution of posted work.

use alloc::boxed::Box;
use alloc::rc::Rc;

/// A unit of posted work.
pub type Job = Box<dyn FnOnce() + 'static>;

/// Capacity to run a job later, in main context, never inline.
///
/// Everything a job refers to must stay valid until it runs, which happens at
/// some unspecified later point; jobs therefore own their captures.
pub trait Execute {
    /// Queues `job` to run asynchronously, after `post` returns. Jobs posted
    /// from the same context at the same instant run in FIFO order; each job
    /// runs exactly once.
    fn post(&self, job: Job);
}

/// Shared handle to an executor.
pub type Executor = Rc<dyn Execute>;
