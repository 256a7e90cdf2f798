//! Top-level board application: continuously reads the distance sensors and
//! reports every reading over the serial port.

use alloc::rc::Rc;
use core::cell::RefCell;
use core::fmt::Write as _;

use heapless::String;
use sonar_os::clock::Clock;
use sonar_os::hal::{Hal, InputPin, OutputPin, PinId};
use sonar_os::scheduler::Scheduler;
use sonar_util::sink::Sink;

use crate::distance_sensor::{DistanceSensor, Reading};

/// Most sensors one board carries, one per face.
pub const MAX_SENSORS: usize = 4;

/// Wiring of one sensor: name plus trigger/echo pin pair.
pub struct SensorConfig {
    pub id: &'static str,
    pub trig: PinId,
    pub echo: PinId,
}

/// The board application. Owns the sensors and the serial report sink.
pub struct Robot<C: Clock, H: Hal, S: Sink + 'static> {
    sensors: heapless::Vec<DistanceSensor<C, H>, MAX_SENSORS>,
    serial: Rc<RefCell<S>>,
}

impl<C: Clock, H: Hal, S: Sink + 'static> Robot<C, H, S> {
    pub fn new(scheduler: &Scheduler<C>, hal: H, serial: S, configs: &[SensorConfig]) -> Self {
        let mut sensors = heapless::Vec::new();
        for config in configs.iter().take(MAX_SENSORS) {
            let sensor = DistanceSensor::new(
                config.id,
                scheduler,
                OutputPin::new(hal.clone(), config.trig),
                InputPin::new(hal.clone(), config.echo),
            );
            let _ = sensors.push(sensor);
        }
        Robot {
            sensors,
            serial: Rc::new(RefCell::new(serial)),
        }
    }

    /// Registers every sensor's reading stream with the serial reporter.
    /// The scheduler loop does the rest; this returns immediately.
    pub fn run(&self) {
        for sensor in &self.sensors {
            let id = sensor.id();
            let serial = self.serial.clone();
            sensor.stream_readings().on_each(move |reading: Reading| {
                let mut line: String<64> = String::new();
                // A reading that does not fit the line is dropped whole.
                if write!(
                    line,
                    "sensor={} time={} distance={}\n",
                    id, reading.time_usec, reading.distance_mm
                )
                .is_ok()
                {
                    let mut serial = serial.borrow_mut();
                    serial.write(line.as_bytes());
                    serial.flush();
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec::Vec;
    use sonar_os::hal::PinState;
    use sonar_os::testing::{FakeClock, FakeHal};
    use sonar_os::time::export::ExtU32;

    #[derive(Clone, Default)]
    struct TestSerial {
        bytes: Rc<RefCell<Vec<u8>>>,
    }

    impl Sink for TestSerial {
        fn write(&mut self, bytes: &[u8]) {
            self.bytes.borrow_mut().extend_from_slice(bytes);
        }
    }

    #[test]
    fn readings_are_reported_as_serial_lines() {
        let clock = FakeClock::new();
        let scheduler = Scheduler::new(clock.clone());
        let hal = FakeHal::new(clock);
        let serial = TestSerial::default();

        let robot = Robot::new(
            &scheduler,
            hal.clone(),
            serial.clone(),
            &[SensorConfig {
                id: "front",
                trig: 1,
                echo: 2,
            }],
        );
        robot.run();

        let echo = hal.clone();
        scheduler.run_after(1000.micros(), move || echo.set_pin_state(2, PinState::High));
        let echo = hal.clone();
        scheduler.run_after(2000.micros(), move || echo.set_pin_state(2, PinState::Low));
        scheduler.run_for(2200.micros());

        let bytes = serial.bytes.borrow();
        let report = core::str::from_utf8(&bytes).unwrap();
        assert_eq!(report, "sensor=front time=16 distance=171\n");
    }

    #[test]
    fn each_sensor_reports_under_its_own_name() {
        let clock = FakeClock::new();
        let scheduler = Scheduler::new(clock.clone());
        let hal = FakeHal::new(clock);
        let serial = TestSerial::default();

        let robot = Robot::new(
            &scheduler,
            hal.clone(),
            serial.clone(),
            &[
                SensorConfig {
                    id: "front",
                    trig: 1,
                    echo: 2,
                },
                SensorConfig {
                    id: "right",
                    trig: 3,
                    echo: 4,
                },
            ],
        );
        robot.run();

        // Only the right-hand sensor sees an echo.
        let echo = hal.clone();
        scheduler.run_after(1000.micros(), move || echo.set_pin_state(4, PinState::High));
        let echo = hal.clone();
        scheduler.run_after(1400.micros(), move || echo.set_pin_state(4, PinState::Low));
        scheduler.run_for(2000.micros());

        let bytes = serial.bytes.borrow();
        let report = core::str::from_utf8(&bytes).unwrap();
        assert!(report.starts_with("sensor=right time="));
        assert!(report.ends_with("\n"));
        assert!(!report.contains("sensor=front"));
    }
}
