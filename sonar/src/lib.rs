//! Firmware for an ultrasonic distance-sensing board: HC-SR04 drivers whose
//! readings stream over a serial port, built on the cooperative runtime in
//! `sonar-os`.

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

pub mod distance_sensor;
pub mod robot;

pub use sonar_os as os;
pub use sonar_util as util;
