//! Bridges pin-change interrupts into main-context callbacks and promises.
//!
//! The interrupt half and the mainline half share nothing but a static
//! [`SnapshotQueue`]. An interrupt binding captures the clock and the levels
//! of the watched pins into a plain-data [`PinStateSnapshot`] and publishes
//! it; the pump installed on the scheduler drains the queue once per loop
//! iteration and posts one task per snapshot. Those tasks compare the
//! snapshot against the last known levels and fire the registered change
//! callbacks.
//!
//! The callback table is only ever touched on the main line. Interrupt
//! context reads the clock, reads pins, and pushes into the ring; nothing
//! else.

use alloc::boxed::Box;
use alloc::rc::Rc;
use core::cell::RefCell;

use critical_section::Mutex;
use heapless::{Deque, Vec};

use crate::clock::Clock;
use crate::error::{fatal, Fault};
use crate::executor::Executor;
use crate::hal::{Hal, PinId, PinMode, PinState};
use crate::promise::Promise;
use crate::scheduler::Scheduler;
use crate::time::{Duration, Instant};

/// Most pins one monitor can watch.
pub const MAX_PINS: usize = 4;
/// Snapshots that can be in flight between interrupt and main context.
pub const SNAPSHOT_QUEUE_DEPTH: usize = 8;

/// Levels of the watched pins captured at one instant in interrupt context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PinStateSnapshot {
    pub at: Instant,
    pub states: Vec<(PinId, PinState), MAX_PINS>,
}

/// Captures the current levels of `pins`, clock first. Called by interrupt
/// bindings; the caller is expected to hold an interrupt thread scope.
pub fn snapshot<C: Clock, H: Hal>(clock: &C, hal: &H, pins: &[PinId]) -> PinStateSnapshot {
    let at = clock.now();
    let mut states = Vec::new();
    for &pin in pins {
        if states.push((pin, hal.read_pin(pin))).is_err() {
            fatal(Fault::CapacityExceeded);
        }
    }
    PinStateSnapshot { at, states }
}

/// Ring carrying snapshots from interrupt context to the single main-line
/// consumer. Lives in a `static`; every access is a bounded critical
/// section.
pub struct SnapshotQueue {
    ring: Mutex<RefCell<Deque<PinStateSnapshot, SNAPSHOT_QUEUE_DEPTH>>>,
}

impl SnapshotQueue {
    pub const fn new() -> Self {
        SnapshotQueue {
            ring: Mutex::new(RefCell::new(Deque::new())),
        }
    }

    /// Publishes a snapshot from interrupt context. A full ring means the
    /// main line cannot keep up with the interrupt rate; that is fatal.
    pub fn publish(&self, snapshot: PinStateSnapshot) {
        critical_section::with(|cs| {
            if self.ring.borrow_ref_mut(cs).push_back(snapshot).is_err() {
                fatal(Fault::CapacityExceeded);
            }
        });
    }

    /// Takes the oldest pending snapshot. Main context.
    pub fn take(&self) -> Option<PinStateSnapshot> {
        critical_section::with(|cs| self.ring.borrow_ref_mut(cs).pop_front())
    }
}

impl Default for SnapshotQueue {
    fn default() -> Self {
        SnapshotQueue::new()
    }
}

type ChangeCallback = Box<dyn FnOnce(PinState, Instant) + 'static>;

struct Watch {
    pin: PinId,
    last_state: PinState,
    callback: Option<ChangeCallback>,
}

struct MonitorCore<H> {
    hal: H,
    executor: Executor,
    watches: RefCell<Vec<Watch, MAX_PINS>>,
}

/// Main-line half of the bridge. Cheap handle; clones share the watch table.
pub struct PinMonitor<H: Hal> {
    core: Rc<MonitorCore<H>>,
}

impl<H: Hal> Clone for PinMonitor<H> {
    fn clone(&self) -> Self {
        PinMonitor {
            core: self.core.clone(),
        }
    }
}

impl<H: Hal> PinMonitor<H> {
    /// Creates the monitor and installs its pump on `scheduler`: each loop
    /// iteration drains `queue` and posts one dispatch task per snapshot,
    /// preserving publish order.
    pub fn new<C: Clock>(
        scheduler: &Scheduler<C>,
        hal: H,
        queue: &'static SnapshotQueue,
    ) -> Self {
        let monitor = PinMonitor {
            core: Rc::new(MonitorCore {
                hal,
                executor: scheduler.executor(),
                watches: RefCell::new(Vec::new()),
            }),
        };
        let pump = monitor.clone();
        scheduler.set_interrupt_pump(move || {
            while let Some(snapshot) = queue.take() {
                let monitor = pump.clone();
                pump.core
                    .executor
                    .post(Box::new(move || monitor.handle_snapshot(snapshot)));
            }
        });
        monitor
    }

    /// Starts watching `pins`: input mode, then an initial level snapshot so
    /// the first observed level is not reported as a change. The platform
    /// glue must separately enable the pin-change interrupt for each pin.
    pub fn watch(&self, pins: &[PinId]) {
        let mut watches = self.core.watches.borrow_mut();
        for &pin in pins {
            self.core.hal.set_pin_mode(pin, PinMode::Input);
            let last_state = self.core.hal.read_pin(pin);
            let watch = Watch {
                pin,
                last_state,
                callback: None,
            };
            if watches.push(watch).is_err() {
                fatal(Fault::CapacityExceeded);
            }
        }
    }

    /// Registers a one-shot callback fired on the next observed change of
    /// `pin` with the new level and the snapshot instant. The callback is
    /// taken out of the table before it runs, so it may register its
    /// successor. At most one callback per pin at a time.
    pub fn once_changed(&self, pin: PinId, callback: impl FnOnce(PinState, Instant) + 'static) {
        let mut watches = self.core.watches.borrow_mut();
        let Some(watch) = watches.iter_mut().find(|watch| watch.pin == pin) else {
            fatal(Fault::Precondition);
        };
        if watch.callback.is_some() {
            fatal(Fault::DoubleAttach);
        }
        watch.callback = Some(Box::new(callback));
    }

    /// Resolves with the instant the pin is next observed high. The pin must
    /// currently read low.
    pub fn once_high(&self, pin: PinId) -> Promise<Instant> {
        if self.core.hal.read_pin(pin) != PinState::Low {
            fatal(Fault::Precondition);
        }
        let (promise, resolver) = Promise::pending(self.core.executor.clone());
        self.once_changed(pin, move |_state, at| resolver.resolve(at));
        promise
    }

    /// Counterpart of [`once_high`]; the pin must currently read high.
    ///
    /// [`once_high`]: PinMonitor::once_high
    pub fn once_low(&self, pin: PinId) -> Promise<Instant> {
        if self.core.hal.read_pin(pin) != PinState::High {
            fatal(Fault::Precondition);
        }
        let (promise, resolver) = Promise::pending(self.core.executor.clone());
        self.once_changed(pin, move |_state, at| resolver.resolve(at));
        promise
    }

    /// Resolves with the duration of the next spike on `pin`: the time from
    /// the observed rise to the observed fall.
    pub fn once_spikes(&self, pin: PinId) -> Promise<Duration> {
        let monitor = self.clone();
        self.once_high(pin).and_then(move |went_high| {
            monitor
                .once_low(pin)
                .then(move |went_low| went_low - went_high)
        })
    }

    fn handle_snapshot(&self, snapshot: PinStateSnapshot) {
        let mut fired: Vec<(ChangeCallback, PinState), MAX_PINS> = Vec::new();
        {
            let mut watches = self.core.watches.borrow_mut();
            for &(pin, state) in snapshot.states.iter() {
                if let Some(watch) = watches.iter_mut().find(|watch| watch.pin == pin) {
                    if state != watch.last_state {
                        watch.last_state = state;
                        if let Some(callback) = watch.callback.take() {
                            let _ = fired.push((callback, state));
                        }
                    }
                }
            }
        }
        // The table borrow is released: callbacks may register successors.
        for (callback, state) in fired {
            callback(state, snapshot.at);
        }
    }
}
