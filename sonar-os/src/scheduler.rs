//! Cooperative scheduler of future-dated tasks.
//!
//! Runs given pieces of code at given times in the future. The scheduler has
//! no thread of its own: the application calls [`Scheduler::run`] and tasks
//! execute sequentially in that caller's thread, each running to completion
//! before the next is considered. A task that would run long must split
//! itself and reschedule its continuation, as though it yielded.
//!
//! Tasks may schedule further tasks and cancel pending ones while running.
//! New tasks enter a pending ring first and merge into the time-ordered
//! queue at the top of the next loop iteration. Scheduling is a main-context
//! operation; interrupt context hands work over through its own snapshot
//! ring (see [`pin_monitor`]) which the loop drains via the installed pump.
//!
//! Two tasks with distinct due times run in due order. Tasks sharing a due
//! time run in insertion order, a periodic task's re-queue counting as a new
//! insertion.
//!
//! [`pin_monitor`]: crate::pin_monitor

use alloc::boxed::Box;
use alloc::rc::Rc;
use core::cell::{Cell, RefCell};

use heapless::binary_heap::{BinaryHeap, Min};
use heapless::{Deque, Vec};
use sonar_util::{debug, trace};

use crate::clock::Clock;
use crate::error::{fatal, Fault};
use crate::executor::{Execute, Executor, Job};
use crate::promise::Promise;
use crate::time::{Duration, Instant};

/// Most tasks the scheduler holds at any one time.
pub const MAX_TASKS: usize = 32;
/// Most tasks scheduled but not yet merged into the queue.
pub const MAX_NEW_TASKS: usize = 16;

/// Identifier of a scheduled task, unique within one scheduler lifetime.
///
/// Ids come from a monotone counter. The counter wrapping is tolerated
/// because ids are only ever compared for identity, never for order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TaskId(u32);

impl core::fmt::Display for TaskId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Outcome of [`Scheduler::cancel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CancelOutcome {
    /// The task was pending (or mid-run) and will not fire again.
    Canceled,
    /// The task had already run to completion; nothing was removed.
    AlreadyFinished,
}

enum TaskKind {
    OneShot(Box<dyn FnOnce() + 'static>),
    Periodic {
        period: Duration,
        run: Box<dyn FnMut() + 'static>,
    },
}

struct Task {
    id: TaskId,
    due: Instant,
    /// Insertion counter, the tiebreak for equal due times.
    seq: u32,
    kind: TaskKind,
}

impl PartialEq for Task {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for Task {}

impl PartialOrd for Task {
    fn partial_cmp(&self, other: &Self) -> Option<core::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Task {
    fn cmp(&self, other: &Self) -> core::cmp::Ordering {
        self.due.cmp(&other.due).then(self.seq.cmp(&other.seq))
    }
}

struct Queue {
    tasks: BinaryHeap<Task, Min, MAX_TASKS>,
    new_tasks: Deque<Task, MAX_NEW_TASKS>,
    seq: u32,
}

impl Queue {
    fn bump_seq(&mut self) -> u32 {
        let seq = self.seq;
        self.seq = self.seq.wrapping_add(1);
        seq
    }

    /// Removes the task with `id` from the queue or the pending ring.
    fn remove(&mut self, id: TaskId) -> bool {
        let mut kept: Vec<Task, MAX_TASKS> = Vec::new();
        let mut found = false;
        while let Some(task) = self.tasks.pop() {
            if task.id == id {
                found = true;
            } else if kept.push(task).is_err() {
                fatal(Fault::CapacityExceeded);
            }
        }
        for task in kept {
            if self.tasks.push(task).is_err() {
                fatal(Fault::CapacityExceeded);
            }
        }
        if found {
            return true;
        }
        for _ in 0..self.new_tasks.len() {
            match self.new_tasks.pop_front() {
                Some(task) if task.id == id => found = true,
                Some(task) => {
                    if self.new_tasks.push_back(task).is_err() {
                        fatal(Fault::CapacityExceeded);
                    }
                }
                None => {}
            }
        }
        found
    }
}

struct Core<C> {
    clock: C,
    queue: RefCell<Queue>,
    next_id: Cell<u32>,
    /// Id of the task being dispatched right now, if any.
    running: Cell<Option<TaskId>>,
    /// The running task was canceled; a periodic must not re-queue.
    cancel_running: Cell<bool>,
    stopping: Cell<bool>,
    pump: RefCell<Option<Box<dyn FnMut() + 'static>>>,
}

/// Cheap handle to one scheduler; clones share the task queue.
pub struct Scheduler<C: Clock> {
    core: Rc<Core<C>>,
}

impl<C: Clock> Clone for Scheduler<C> {
    fn clone(&self) -> Self {
        Scheduler {
            core: self.core.clone(),
        }
    }
}

impl<C: Clock> Scheduler<C> {
    pub fn new(clock: C) -> Self {
        Scheduler {
            core: Rc::new(Core {
                clock,
                queue: RefCell::new(Queue {
                    tasks: BinaryHeap::new(),
                    new_tasks: Deque::new(),
                    seq: 0,
                }),
                next_id: Cell::new(0),
                running: Cell::new(None),
                cancel_running: Cell::new(false),
                stopping: Cell::new(false),
                pump: RefCell::new(None),
            }),
        }
    }

    /// The scheduler's clock.
    pub fn now(&self) -> Instant {
        self.core.clock.now()
    }

    /// Schedules `f` to run once, `delay` from now.
    pub fn run_after(&self, delay: Duration, f: impl FnOnce() + 'static) -> TaskId {
        let due = self.now() + delay;
        self.schedule(due, TaskKind::OneShot(Box::new(f)))
    }

    /// Schedules `f` to run repeatedly every `period`, starting one period
    /// from now.
    ///
    /// The next due time advances by exactly one period per firing regardless
    /// of how long the firing took, preserving long-term cadence. A scheduler
    /// that falls behind runs the task back to back until it catches up;
    /// firings are not coalesced.
    pub fn run_every(&self, period: Duration, f: impl FnMut() + 'static) -> TaskId {
        let due = self.now() + period;
        self.schedule(
            due,
            TaskKind::Periodic {
                period,
                run: Box::new(f),
            },
        )
    }

    /// Like [`run_every`], canceling itself the first time `predicate`
    /// returns true.
    ///
    /// [`run_every`]: Scheduler::run_every
    pub fn run_every_until(
        &self,
        period: Duration,
        mut predicate: impl FnMut() -> bool + 'static,
    ) -> TaskId {
        let own_id: Rc<Cell<Option<TaskId>>> = Rc::new(Cell::new(None));
        let id_cell = own_id.clone();
        let scheduler = self.clone();
        let id = self.run_every(period, move || {
            if predicate() {
                // Filled before the first firing can happen: the task reaches
                // the queue no earlier than the next loop iteration.
                if let Some(id) = id_cell.get() {
                    scheduler.cancel(id);
                }
            }
        });
        own_id.set(Some(id));
        id
    }

    /// A promise resolved `delay` from now.
    ///
    /// Like [`run_after`] but decouples the wait from the action taken
    /// afterwards, so dependent work can be chained:
    /// `scheduler.after(d).then(f).then_void(g)`.
    ///
    /// [`run_after`]: Scheduler::run_after
    pub fn after(&self, delay: Duration) -> Promise<()> {
        let (promise, resolver) = Promise::pending(self.executor());
        self.run_after(delay, move || resolver.resolve(()));
        promise
    }

    /// Polls `poll` every `period` until it yields a value, then resolves the
    /// returned promise with it and stops polling.
    pub fn run_every_until_resolved<T: 'static>(
        &self,
        period: Duration,
        mut poll: impl FnMut() -> Option<T> + 'static,
    ) -> Promise<T> {
        let (promise, resolver) = Promise::pending(self.executor());
        let mut resolver = Some(resolver);
        self.run_every_until(period, move || match poll() {
            Some(value) => {
                if let Some(resolver) = resolver.take() {
                    resolver.resolve(value);
                }
                true
            }
            None => false,
        });
        promise
    }

    /// Removes a pending task.
    ///
    /// Canceling the currently running task keeps the current firing (it runs
    /// to completion) but removes every later one. Canceling a task that
    /// already finished is a no-op reported as
    /// [`CancelOutcome::AlreadyFinished`]; canceling an id that was never
    /// issued is fatal.
    pub fn cancel(&self, id: TaskId) -> CancelOutcome {
        if self.core.running.get() == Some(id) {
            self.core.cancel_running.set(true);
            debug!("task {} canceled mid-run", id);
            return CancelOutcome::Canceled;
        }
        if self.core.queue.borrow_mut().remove(id) {
            debug!("task {} canceled", id);
            CancelOutcome::Canceled
        } else if id.0 < self.core.next_id.get() {
            // Identity check only: ids are unordered, and once the id counter
            // has wrapped this degrades to treating stale ids as finished.
            CancelOutcome::AlreadyFinished
        } else {
            fatal(Fault::UnknownTaskId)
        }
    }

    /// Runs scheduled tasks, including any they add, until none remain or
    /// [`stop`] is called. A periodic task persists, so it keeps the loop
    /// running until it is canceled. Typically this is the application's main
    /// event loop and does not return.
    ///
    /// [`stop`]: Scheduler::stop
    pub fn run(&self) {
        loop {
            if self.core.stopping.get() {
                break;
            }
            self.pump_interrupts();
            self.merge_new_tasks();
            let now = self.now();
            let due = {
                let mut queue = self.core.queue.borrow_mut();
                if queue.tasks.is_empty() {
                    break;
                }
                if queue.tasks.peek().is_some_and(|top| top.due <= now) {
                    queue.tasks.pop()
                } else {
                    None
                }
            };
            if let Some(task) = due {
                self.dispatch(task);
            }
        }
        self.core.stopping.set(false);
    }

    /// Runs for at most `duration`, then stops. Pending tasks stay queued.
    pub fn run_for(&self, duration: Duration) {
        let scheduler = self.clone();
        self.run_after(duration, move || scheduler.stop());
        self.run();
    }

    /// Makes [`run`] return at the start of its next iteration. The running
    /// task completes first.
    ///
    /// [`run`]: Scheduler::run
    pub fn stop(&self) {
        self.core.stopping.set(true);
    }

    /// An executor handle that posts jobs as zero-delay tasks on this
    /// scheduler.
    pub fn executor(&self) -> Executor {
        Rc::new(self.clone())
    }

    /// Installs the interrupt pump, called once per loop iteration to drain
    /// interrupt-published work into the queue. At most one pump.
    pub fn set_interrupt_pump(&self, pump: impl FnMut() + 'static) {
        let mut slot = self.core.pump.borrow_mut();
        if slot.is_some() {
            fatal(Fault::DoubleAttach);
        }
        *slot = Some(Box::new(pump));
    }

    fn pump_interrupts(&self) {
        // Taken out while it runs so the pump can post tasks freely.
        let pump = self.core.pump.borrow_mut().take();
        if let Some(mut pump) = pump {
            pump();
            *self.core.pump.borrow_mut() = Some(pump);
        }
    }

    fn merge_new_tasks(&self) {
        let mut queue = self.core.queue.borrow_mut();
        let Queue {
            tasks, new_tasks, ..
        } = &mut *queue;
        while let Some(task) = new_tasks.pop_front() {
            if tasks.push(task).is_err() {
                fatal(Fault::CapacityExceeded);
            }
        }
    }

    fn schedule(&self, due: Instant, kind: TaskKind) -> TaskId {
        let id = TaskId(self.core.next_id.get());
        self.core.next_id.set(id.0.wrapping_add(1));
        let mut queue = self.core.queue.borrow_mut();
        let seq = queue.bump_seq();
        if queue.new_tasks.push_back(Task { id, due, seq, kind }).is_err() {
            fatal(Fault::CapacityExceeded);
        }
        debug!(
            "task {} scheduled, {} queued, {} new",
            id,
            queue.tasks.len(),
            queue.new_tasks.len()
        );
        id
    }

    fn dispatch(&self, task: Task) {
        self.core.running.set(Some(task.id));
        self.core.cancel_running.set(false);
        match task.kind {
            TaskKind::OneShot(run) => {
                trace!("task {} fires", task.id);
                run();
            }
            TaskKind::Periodic { period, mut run } => {
                trace!("task {} fires, period {}", task.id, period.ticks());
                run();
                if !self.core.cancel_running.get() {
                    let due = task.due + period;
                    let mut queue = self.core.queue.borrow_mut();
                    let seq = queue.bump_seq();
                    let requeued = Task {
                        id: task.id,
                        due,
                        seq,
                        kind: TaskKind::Periodic { period, run },
                    };
                    if queue.tasks.push(requeued).is_err() {
                        fatal(Fault::CapacityExceeded);
                    }
                }
            }
        }
        self.core.running.set(None);
        self.core.cancel_running.set(false);
    }
}

impl<C: Clock> Execute for Scheduler<C> {
    fn post(&self, job: Job) {
        let due = self.now();
        self.schedule(due, TaskKind::OneShot(job));
    }
}
