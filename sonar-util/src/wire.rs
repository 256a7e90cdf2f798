//! Binary record framing.
//!
//! Frame layout, all integers little-endian:
//!
//! ```text
//! u16  frame size (bytes following this field)
//! u32  micros
//! u8   file name length, then that many bytes
//! u16  line number
//! u8   severity
//! u8   argument count
//!      per argument: u8 type tag, then the payload
//!      (u8/u16/u32 raw; strings as u8 length + bytes)
//! ```
//!
//! The thread tag is not framed; interrupt provenance only matters for the
//! text rendering on the host side.

use crate::record::{Record, Value};
use crate::sink::Sink;

/// Bytes the encoded record occupies after the leading size field.
pub fn encoded_size(record: &Record<'_>) -> usize {
    let header = 4 + (1 + record.file.len()) + 2 + 1;
    let args: usize = record.args.iter().map(|arg| 1 + payload_size(arg)).sum();
    header + 1 + args
}

fn payload_size(value: &Value<'_>) -> usize {
    match value {
        Value::U8(_) => 1,
        Value::U16(_) => 2,
        Value::U32(_) => 4,
        Value::Str(s) => 1 + s.len(),
    }
}

/// Encodes one record into `sink` and flushes it.
pub fn encode<S: Sink>(record: &Record<'_>, sink: &mut S) {
    sink.write(&(encoded_size(record) as u16).to_le_bytes());

    sink.write(&record.micros.to_le_bytes());
    write_str(record.file, sink);
    sink.write(&record.line.to_le_bytes());
    sink.write(&[record.severity as u8]);

    sink.write(&[record.args.len() as u8]);
    for arg in record.args {
        sink.write(&[arg.tag()]);
        match arg {
            Value::U8(v) => sink.write(&[*v]),
            Value::U16(v) => sink.write(&v.to_le_bytes()),
            Value::U32(v) => sink.write(&v.to_le_bytes()),
            Value::Str(s) => write_str(s, sink),
        }
    }

    sink.flush();
}

fn write_str<S: Sink>(s: &str, sink: &mut S) {
    sink.write(&[s.len() as u8]);
    sink.write(s.as_bytes());
}
