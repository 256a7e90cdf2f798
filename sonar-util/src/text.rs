//! Human-readable record rendering.
//!
//! One line per record:
//!
//! ```text
//! I0000.000016* file.rs:42: args
//! ```
//!
//! severity letter, seconds and microseconds since boot, a `*` marker for
//! interrupt context, then the source location and the arguments back to
//! back.

use core::fmt::Write as _;

use crate::record::{Record, Severity, ThreadTag, Value};
use crate::sink::Sink;

struct FmtSink<'a, S: Sink>(&'a mut S);

impl<S: Sink> core::fmt::Write for FmtSink<'_, S> {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        self.0.write(s.as_bytes());
        Ok(())
    }
}

/// Renders one record into `sink` as a single line and flushes it.
pub fn render<S: Sink>(record: &Record<'_>, sink: &mut S) {
    let mut out = FmtSink(sink);

    let severity = match record.severity {
        Severity::Fatal => 'F',
        Severity::Info => 'I',
    };
    let thread = match record.thread {
        ThreadTag::Main => ' ',
        ThreadTag::Interrupt => '*',
    };
    // Infallible: FmtSink never reports an error.
    let _ = write!(
        out,
        "{}{:04}.{:06}{} {}:{}: ",
        severity,
        record.micros / 1_000_000,
        record.micros % 1_000_000,
        thread,
        record.file,
        record.line,
    );
    for arg in record.args {
        let _ = match arg {
            Value::U8(v) => write!(out, "{}", v),
            Value::U16(v) => write!(out, "{}", v),
            Value::U32(v) => write!(out, "{}", v),
            Value::Str(s) => write!(out, "{}", s),
        };
    }
    sink.write(b"\n");
    sink.flush();
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;

    #[derive(Default)]
    struct CaptureSink(std::vec::Vec<u8>);

    impl Sink for CaptureSink {
        fn write(&mut self, bytes: &[u8]) {
            self.0.extend_from_slice(bytes);
        }
    }

    fn rendered(record: &Record<'_>) -> std::string::String {
        let mut sink = CaptureSink::default();
        render(record, &mut sink);
        std::string::String::from_utf8(sink.0).unwrap()
    }

    #[test]
    fn renders_main_context_line() {
        let record = Record {
            micros: 16,
            file: "sensor.rs",
            line: 42,
            thread: ThreadTag::Main,
            severity: Severity::Info,
            args: &[Value::U16(171), Value::Str("mm")],
        };

        assert_eq!(rendered(&record), "I0000.000016  sensor.rs:42: 171mm\n");
    }

    #[test]
    fn marks_interrupt_context_and_fatal() {
        let record = Record {
            micros: 3_000_004,
            file: "isr.rs",
            line: 7,
            thread: ThreadTag::Interrupt,
            severity: Severity::Fatal,
            args: &[Value::Str("ring full")],
        };

        assert_eq!(rendered(&record), "F0003.000004* isr.rs:7: ring full\n");
    }
}
