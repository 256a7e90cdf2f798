//! ATmega328P backend (Arduino Uno/Nano class boards, 16 MHz).
//!
//! Provides the hardware clock on timer 0, the register-level pin HAL for
//! ports B and D, pin-change interrupt plumbing including the vector bodies,
//! and a busy-wait USART0 sink for serial reporting.
//!
//! Timer 0 runs from the /64 prescaler, so one timer tick is 4 µs and one
//! overflow is 1024 µs. The overflow counter lives in software and is
//! combined with the running count under a critical section so the composite
//! value cannot tear.

use core::cell::{Cell, RefCell};

use avr_device::atmega328p::{EXINT, PORTB, PORTD, TC0, USART0};
use critical_section::Mutex;
use heapless::Vec;

use crate::clock::Clock;
use crate::error::{fatal, Fault};
use crate::hal::{Hal, PinId, PinMode, PinState};
use crate::pin_monitor::{self, SnapshotQueue, MAX_PINS};
use crate::thread;
use crate::time::Instant;
use sonar_util::sink::Sink;

const CPU_HZ: u32 = 16_000_000;
/// Timer 0 tick length with the /64 prescaler at 16 MHz.
const MICROS_PER_TIMER0_TICK: u32 = 4;

static TIMER0_OVERFLOWS: Mutex<Cell<u32>> = Mutex::new(Cell::new(0));

/// Starts timer 0 free-running with the /64 prescaler and its overflow
/// interrupt enabled. Call once at boot, before the first clock read.
pub fn init_timer0() {
    let tc0 = unsafe { &*TC0::ptr() };
    tc0.tccr0a().reset();
    tc0.tccr0b().write(|w| w.cs0().prescale_64());
    tc0.timsk0().write(|w| w.toie0().set_bit());
}

#[avr_device::interrupt(atmega328p)]
fn TIMER0_OVF() {
    let _scope = thread::interrupt_scope();
    critical_section::with(|cs| {
        let overflows = TIMER0_OVERFLOWS.borrow(cs);
        overflows.set(overflows.get().wrapping_add(1));
    });
}

/// Microsecond clock assembled from the timer 0 overflow counter and the
/// running timer count.
#[derive(Clone, Copy)]
pub struct HwClock;

impl Clock for HwClock {
    fn now(&self) -> Instant {
        let ticks = critical_section::with(|cs| {
            let tc0 = unsafe { &*TC0::ptr() };
            let low = tc0.tcnt0().read().bits() as u32;
            let high = TIMER0_OVERFLOWS.borrow(cs).get();
            (high << 8) | low
        });
        Instant::from_ticks(ticks.wrapping_mul(MICROS_PER_TIMER0_TICK))
    }
}

/// Register-level pin access: pins 0..=7 on port D, 8..=13 on port B.
#[derive(Clone, Copy)]
pub struct AvrPins;

fn pin_mask(pin: PinId) -> u8 {
    match pin {
        0..=7 => 1 << pin,
        8..=13 => 1 << (pin - 8),
        _ => fatal(Fault::Precondition),
    }
}

impl Hal for AvrPins {
    fn set_pin_mode(&self, pin: PinId, mode: PinMode) {
        let mask = pin_mask(pin);
        let output = matches!(mode, PinMode::Output);
        let pullup = matches!(mode, PinMode::InputPullup);
        critical_section::with(|_| {
            if pin < 8 {
                let port = unsafe { &*PORTD::ptr() };
                port.ddrd().modify(|r, w| unsafe {
                    w.bits(if output { r.bits() | mask } else { r.bits() & !mask })
                });
                if !output {
                    port.portd().modify(|r, w| unsafe {
                        w.bits(if pullup { r.bits() | mask } else { r.bits() & !mask })
                    });
                }
            } else {
                let port = unsafe { &*PORTB::ptr() };
                port.ddrb().modify(|r, w| unsafe {
                    w.bits(if output { r.bits() | mask } else { r.bits() & !mask })
                });
                if !output {
                    port.portb().modify(|r, w| unsafe {
                        w.bits(if pullup { r.bits() | mask } else { r.bits() & !mask })
                    });
                }
            }
        });
    }

    fn read_pin(&self, pin: PinId) -> PinState {
        let mask = pin_mask(pin);
        let level = if pin < 8 {
            unsafe { &*PORTD::ptr() }.pind().read().bits() & mask
        } else {
            unsafe { &*PORTB::ptr() }.pinb().read().bits() & mask
        };
        if level != 0 {
            PinState::High
        } else {
            PinState::Low
        }
    }

    fn write_pin(&self, pin: PinId, state: PinState) {
        let mask = pin_mask(pin);
        let high = state == PinState::High;
        critical_section::with(|_| {
            if pin < 8 {
                unsafe { &*PORTD::ptr() }.portd().modify(|r, w| unsafe {
                    w.bits(if high { r.bits() | mask } else { r.bits() & !mask })
                });
            } else {
                unsafe { &*PORTB::ptr() }.portb().modify(|r, w| unsafe {
                    w.bits(if high { r.bits() | mask } else { r.bits() & !mask })
                });
            }
        });
    }
}

static PIN_EVENTS: SnapshotQueue = SnapshotQueue::new();

/// The queue the pin-change vectors publish snapshots into. Hand this to
/// [`PinMonitor::new`].
///
/// [`PinMonitor::new`]: crate::pin_monitor::PinMonitor::new
pub fn pin_events() -> &'static SnapshotQueue {
    &PIN_EVENTS
}

static WATCHED: Mutex<RefCell<Vec<PinId, MAX_PINS>>> = Mutex::new(RefCell::new(Vec::new()));

/// Enables the pin-change interrupt for each of `pins` and records them for
/// the vector bodies to snapshot. Call after [`PinMonitor::watch`] so the
/// initial levels are already known.
///
/// [`PinMonitor::watch`]: crate::pin_monitor::PinMonitor::watch
pub fn watch_pins(pins: &[PinId]) {
    critical_section::with(|cs| {
        let mut watched = WATCHED.borrow_ref_mut(cs);
        for &pin in pins {
            if watched.push(pin).is_err() {
                fatal(Fault::CapacityExceeded);
            }
        }
        let exint = unsafe { &*EXINT::ptr() };
        for &pin in pins {
            match pin {
                // PCINT16..23: pin-change group 2.
                0..=7 => {
                    exint
                        .pcmsk2()
                        .modify(|r, w| unsafe { w.bits(r.bits() | (1 << pin)) });
                    exint.pcifr().modify(|r, w| unsafe { w.bits(r.bits() | 0b100) });
                    exint.pcicr().modify(|r, w| unsafe { w.bits(r.bits() | 0b100) });
                }
                // PCINT0..5: pin-change group 0.
                8..=13 => {
                    exint
                        .pcmsk0()
                        .modify(|r, w| unsafe { w.bits(r.bits() | (1 << (pin - 8))) });
                    exint.pcifr().modify(|r, w| unsafe { w.bits(r.bits() | 0b001) });
                    exint.pcicr().modify(|r, w| unsafe { w.bits(r.bits() | 0b001) });
                }
                _ => fatal(Fault::Precondition),
            }
        }
    });
}

fn on_pin_change() {
    let _scope = thread::interrupt_scope();
    let pins = critical_section::with(|cs| WATCHED.borrow_ref(cs).clone());
    PIN_EVENTS.publish(pin_monitor::snapshot(&HwClock, &AvrPins, &pins));
}

#[avr_device::interrupt(atmega328p)]
fn PCINT0() {
    on_pin_change();
}

#[avr_device::interrupt(atmega328p)]
fn PCINT2() {
    on_pin_change();
}

/// Busy-wait USART0 byte sink, 8N1.
pub struct Usart0;

impl Usart0 {
    /// Configures USART0 for `baud` and enables the transmitter.
    pub fn init(baud: u32) -> Self {
        let usart = unsafe { &*USART0::ptr() };
        let ubrr = (CPU_HZ / 16 / baud - 1) as u16;
        usart.ubrr0().write(|w| unsafe { w.bits(ubrr) });
        usart.ucsr0c().write(|w| w.ucsz0().chr8());
        usart.ucsr0b().write(|w| w.txen0().set_bit());
        Usart0
    }
}

impl Sink for Usart0 {
    fn write(&mut self, bytes: &[u8]) {
        let usart = unsafe { &*USART0::ptr() };
        for &byte in bytes {
            while usart.ucsr0a().read().udre0().bit_is_clear() {}
            usart.udr0().write(|w| unsafe { w.bits(byte) });
        }
    }
}
