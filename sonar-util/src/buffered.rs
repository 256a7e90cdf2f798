//! Double-buffered sink and the serial logger built on it.
//!
//! Records are staged in one fixed buffer while the other drains to the
//! underlying transport, so a flush never stalls new writes. Everything is
//! single-threaded; "concurrent" here means writes issued by the transport's
//! own callbacks while a drain is in progress.

use heapless::Vec;

use crate::record::{Record, Severity, ThreadTag};
use crate::sink::Sink;
use crate::wire;

/// A sink staging writes in two fixed `N`-byte buffers in front of `inner`.
///
/// Writes larger than a whole buffer bypass staging and go straight to the
/// transport.
pub struct BufferedSink<S: Sink, const N: usize> {
    inner: S,
    buffers: [Vec<u8, N>; 2],
    active: usize,
}

impl<S: Sink, const N: usize> BufferedSink<S, N> {
    pub fn new(inner: S) -> Self {
        BufferedSink {
            inner,
            buffers: [Vec::new(), Vec::new()],
            active: 0,
        }
    }

    /// Bytes currently staged and not yet handed to the transport.
    pub fn staged(&self) -> usize {
        self.buffers[self.active].len()
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S: Sink, const N: usize> Sink for BufferedSink<S, N> {
    fn write(&mut self, bytes: &[u8]) {
        if bytes.len() > N {
            self.flush();
            self.inner.write(bytes);
            return;
        }
        if self.buffers[self.active].len() + bytes.len() > N {
            self.flush();
        }
        // Cannot overflow: the buffer was just drained if needed.
        let _ = self.buffers[self.active].extend_from_slice(bytes);
    }

    fn flush(&mut self) {
        let draining = self.active;
        // Swap first: writes issued while draining land in the other buffer.
        self.active ^= 1;
        let full = core::mem::take(&mut self.buffers[draining]);
        if !full.is_empty() {
            self.inner.write(&full);
            self.inner.flush();
        }
    }
}

/// Serial logger emitting binary-framed records through a [`BufferedSink`].
///
/// A fatal record reported from the main line is written and flushed
/// synchronously, because a halt follows and buffered bytes would be lost.
/// Everything else, including interrupt-context reports, is staged and left
/// for a later [`SerialLogger::flush`], typically driven by a periodic task.
pub struct SerialLogger<S: Sink, const N: usize> {
    sink: BufferedSink<S, N>,
}

impl<S: Sink, const N: usize> SerialLogger<S, N> {
    pub fn new(transport: S) -> Self {
        SerialLogger {
            sink: BufferedSink::new(transport),
        }
    }

    pub fn emit(&mut self, record: &Record<'_>) {
        wire::encode(record, &mut StageOnly(&mut self.sink));
        if record.severity == Severity::Fatal && record.thread == ThreadTag::Main {
            self.sink.flush();
        }
    }

    pub fn flush(&mut self) {
        self.sink.flush();
    }

    pub fn into_transport(self) -> S {
        self.sink.into_inner()
    }
}

/// Suppresses the per-record flush of the codec so records stay staged.
struct StageOnly<'a, S: Sink>(&'a mut S);

impl<S: Sink> Sink for StageOnly<'_, S> {
    fn write(&mut self, bytes: &[u8]) {
        self.0.write(bytes);
    }
}
