//! Byte sinks.

/// Destination for encoded records and report lines, typically a UART.
///
/// Implementations must not block for longer than the transport needs to
/// accept the bytes; callers on the main line rely on writes completing
/// quickly.
pub trait Sink {
    fn write(&mut self, bytes: &[u8]);

    /// Pushes any transport buffers out. Defaults to a no-op.
    fn flush(&mut self) {}
}

impl<S: Sink + ?Sized> Sink for &mut S {
    fn write(&mut self, bytes: &[u8]) {
        (**self).write(bytes)
    }

    fn flush(&mut self) {
        (**self).flush()
    }
}
