//! In-memory stream and packet fixtures shared by the unit tests.

use crate::parsers::express_parser::{encode, Cell, ExpressScanPacket, EXPRESS_PACKET_CELLS};
use std::collections::VecDeque;
use std::io;

/// A `Read + Write` stream replaying scripted input and recording what is written.
///
/// An exhausted input behaves like a serial port with nothing to read: every read
/// returns `TimedOut`.
#[derive(Debug, Default)]
pub struct ScriptedStream {
    input: VecDeque<u8>,
    chunk: usize,
    accept_at_most: Option<usize>,
    failing_writes: usize,
    written: Vec<u8>,
}

impl ScriptedStream {
    pub fn new(input: &[u8]) -> ScriptedStream {
        ScriptedStream {
            input: input.iter().copied().collect(),
            chunk: usize::MAX,
            ..Default::default()
        }
    }

    /// Deliver at most `chunk` bytes per read call.
    pub fn chunked(mut self, chunk: usize) -> ScriptedStream {
        self.chunk = chunk.max(1);
        self
    }

    /// Accept at most `n` bytes per write call.
    pub fn accept_at_most(mut self, n: usize) -> ScriptedStream {
        self.accept_at_most = Some(n);
        self
    }

    /// Make the next `n` write calls fail with a broken pipe.
    pub fn failing_writes(mut self, n: usize) -> ScriptedStream {
        self.failing_writes = n;
        self
    }

    pub fn written(&self) -> Vec<u8> {
        self.written.clone()
    }
}

impl io::Read for ScriptedStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.input.is_empty() {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "no scripted data"));
        }
        let n = buf.len().min(self.chunk).min(self.input.len());
        for (slot, byte) in buf.iter_mut().zip(self.input.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl io::Write for ScriptedStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.failing_writes > 0 {
            self.failing_writes -= 1;
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "scripted failure"));
        }
        let n = self.accept_at_most.map_or(buf.len(), |max| max.min(buf.len()));
        self.written.extend_from_slice(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// A packet whose cells all report 1000 mm with the same angle correction.
pub fn packet(start_angle: f32, angle_correction: f32) -> ExpressScanPacket {
    ExpressScanPacket {
        start_angle,
        new_scan: false,
        cells: [Cell {
            distance: 1000,
            angle_correction,
        }; EXPRESS_PACKET_CELLS],
    }
}

/// Wire bytes of consecutive packets.
pub fn stream_of(packets: &[ExpressScanPacket]) -> Vec<u8> {
    packets.iter().flat_map(encode).collect()
}

/// A 7-byte response descriptor.
pub fn descriptor(len: u32, send_mode: u8, data_type: u8) -> Vec<u8> {
    let word = len | ((send_mode as u32) << 30);
    let mut bytes = vec![0xA5, 0x5A];
    bytes.extend_from_slice(&word.to_le_bytes());
    bytes.push(data_type);
    bytes
}
