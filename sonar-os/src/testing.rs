//! Test doubles for the runtime: a deterministic clock, a recording pin HAL
//! and a sequential executor.
//!
//! These are ordinary library types so dependent crates can drive their own
//! hardware-free tests with them; nothing here touches real hardware.

use alloc::collections::VecDeque;
use alloc::rc::Rc;
use alloc::vec::Vec;
use core::cell::{Cell, RefCell};

use crate::clock::Clock;
use crate::executor::{Execute, Executor, Job};
use crate::hal::{Hal, PinId, PinMode, PinState};
use crate::time::Instant;

/// Microseconds the fake clock advances per tick, matching the 4 µs
/// resolution of the on-board timer.
const TICK_MICROS: u32 = 4;
/// Reads per tick. Ticking only every hundredth read gives the scheduler
/// room for its bookkeeping reads without visibly advancing time, so tests
/// can pin down event timing exactly.
const READS_PER_TICK: u32 = 100;

struct FakeClockState {
    now: Cell<u32>,
    reads: Cell<u32>,
}

/// Deterministic clock: advances 4 µs every hundredth read.
pub struct FakeClock {
    state: Rc<FakeClockState>,
}

impl Clone for FakeClock {
    fn clone(&self) -> Self {
        FakeClock {
            state: self.state.clone(),
        }
    }
}

impl FakeClock {
    pub fn new() -> Self {
        FakeClock::starting_at(0)
    }

    /// A clock whose first reads return `micros`. Useful for driving the
    /// counter across its wrap.
    pub fn starting_at(micros: u32) -> Self {
        FakeClock {
            state: Rc::new(FakeClockState {
                now: Cell::new(micros),
                reads: Cell::new(0),
            }),
        }
    }

    /// Current time without counting as a read.
    pub fn ticks(&self) -> u32 {
        self.state.now.get()
    }
}

impl Default for FakeClock {
    fn default() -> Self {
        FakeClock::new()
    }
}

impl Clock for FakeClock {
    fn now(&self) -> Instant {
        let reads = self.state.reads.get() + 1;
        if reads == READS_PER_TICK {
            self.state.reads.set(0);
            self.state
                .now
                .set(self.state.now.get().wrapping_add(TICK_MICROS));
        } else {
            self.state.reads.set(reads);
        }
        Instant::from_ticks(self.state.now.get())
    }
}

struct FakePinRecord {
    pin: PinId,
    state: PinState,
    writes: Vec<(u32, PinState)>,
}

struct FakeHalState {
    pins: RefCell<Vec<FakePinRecord>>,
    clock: FakeClock,
}

/// Pin HAL double. Reads return levels the test imposes with
/// [`FakeHal::set_pin_state`]; writes are recorded with timestamps rather
/// than fed back into reads, so a test observes exactly what the firmware
/// drove onto the pin and when.
pub struct FakeHal {
    state: Rc<FakeHalState>,
}

impl Clone for FakeHal {
    fn clone(&self) -> Self {
        FakeHal {
            state: self.state.clone(),
        }
    }
}

impl FakeHal {
    pub fn new(clock: FakeClock) -> Self {
        FakeHal {
            state: Rc::new(FakeHalState {
                pins: RefCell::new(Vec::new()),
                clock,
            }),
        }
    }

    /// Imposes the level subsequently returned by `read_pin`.
    pub fn set_pin_state(&self, pin: PinId, state: PinState) {
        let mut pins = self.state.pins.borrow_mut();
        match pins.iter_mut().find(|record| record.pin == pin) {
            Some(record) => record.state = state,
            None => pins.push(FakePinRecord {
                pin,
                state,
                writes: Vec::new(),
            }),
        }
    }

    /// Write calls recorded for `pin` as (microseconds, level) pairs.
    pub fn writes(&self, pin: PinId) -> Vec<(u32, PinState)> {
        self.state
            .pins
            .borrow()
            .iter()
            .find(|record| record.pin == pin)
            .map(|record| record.writes.clone())
            .unwrap_or_default()
    }
}

impl Hal for FakeHal {
    fn set_pin_mode(&self, _pin: PinId, _mode: PinMode) {}

    fn read_pin(&self, pin: PinId) -> PinState {
        self.state
            .pins
            .borrow()
            .iter()
            .find(|record| record.pin == pin)
            .map(|record| record.state)
            .unwrap_or(PinState::Low)
    }

    fn write_pin(&self, pin: PinId, state: PinState) {
        let at = self.state.clock.now().ticks();
        let mut pins = self.state.pins.borrow_mut();
        match pins.iter_mut().find(|record| record.pin == pin) {
            Some(record) => record.writes.push((at, state)),
            None => pins.push(FakePinRecord {
                pin,
                state: PinState::Low,
                writes: alloc::vec![(at, state)],
            }),
        }
    }
}

/// Executor that queues jobs and runs them on demand in the test's only
/// thread, in FIFO order.
pub struct SequentialExecutor {
    jobs: Rc<RefCell<VecDeque<Job>>>,
}

impl Clone for SequentialExecutor {
    fn clone(&self) -> Self {
        SequentialExecutor {
            jobs: self.jobs.clone(),
        }
    }
}

impl SequentialExecutor {
    pub fn new() -> Self {
        SequentialExecutor {
            jobs: Rc::new(RefCell::new(VecDeque::new())),
        }
    }

    /// Runs queued jobs, including any they queue, until none remain.
    pub fn run_until_idle(&self) {
        loop {
            let job = self.jobs.borrow_mut().pop_front();
            match job {
                Some(job) => job(),
                None => break,
            }
        }
    }

    pub fn handle(&self) -> Executor {
        Rc::new(self.clone())
    }
}

impl Default for SequentialExecutor {
    fn default() -> Self {
        SequentialExecutor::new()
    }
}

impl Execute for SequentialExecutor {
    fn post(&self, job: Job) {
        self.jobs.borrow_mut().push_back(job);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fake_clock_ticks_every_hundredth_read() {
        let clock = FakeClock::new();
        for _ in 0..99 {
            assert_eq!(clock.now().ticks(), 0);
        }
        assert_eq!(clock.now().ticks(), 4);
        assert_eq!(clock.now().ticks(), 4);
    }

    #[test]
    fn fake_hal_records_writes_with_time() {
        let clock = FakeClock::new();
        let hal = FakeHal::new(clock.clone());

        hal.write_pin(1, PinState::High);
        for _ in 0..100 {
            let _ = clock.now();
        }
        hal.write_pin(1, PinState::Low);

        let writes = hal.writes(1);
        assert_eq!(writes[0], (0, PinState::High));
        assert_eq!(writes[1].1, PinState::Low);
        assert!(writes[1].0 >= 4);
    }

    #[test]
    fn imposed_levels_are_read_back() {
        let clock = FakeClock::new();
        let hal = FakeHal::new(clock);

        assert_eq!(hal.read_pin(5), PinState::Low);
        hal.set_pin_state(5, PinState::High);
        assert_eq!(hal.read_pin(5), PinState::High);
    }
}
