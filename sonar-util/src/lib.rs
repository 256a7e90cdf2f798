//! Generic utilities the sonar crates depend upon but that are not part of
//! the runtime itself: the backend-agnostic logging facade, the structured
//! log record model with its binary and text codecs, and the double-buffered
//! byte sink feeding a serial transport.

#![cfg_attr(not(feature = "std"), no_std)]

pub mod buffered;
pub mod log;
pub mod record;
pub mod sink;
pub mod text;
pub mod wire;

pub use crate::log::*;
