use crate::base::error::Result;
use std::time::Duration;

/// A duplex byte stream with blocking, deadline-bounded reads.
///
/// This is the only seam between the protocol engine and the physical link.
/// `Channel` implements it for any `Read + Write` stream.
pub trait ByteChannel {
    /// Reads exactly `len` bytes, waiting at most `timeout` for all of them.
    ///
    /// Fails with `Error::ShortRead` if the deadline passes first.
    fn read_exact_timeout(&mut self, len: usize, timeout: Duration) -> Result<Vec<u8>>;

    /// Reads a single byte, waiting at most `timeout`.
    ///
    /// Fails with `Error::ChannelTimeout` if nothing arrives in time.
    fn read_byte(&mut self, timeout: Duration) -> Result<u8>;

    /// Writes `bytes` once and returns how many of them the link accepted.
    fn write_bytes(&mut self, bytes: &[u8]) -> Result<usize>;
}

impl<C: ByteChannel + ?Sized> ByteChannel for &mut C {
    fn read_exact_timeout(&mut self, len: usize, timeout: Duration) -> Result<Vec<u8>> {
        (**self).read_exact_timeout(len, timeout)
    }

    fn read_byte(&mut self, timeout: Duration) -> Result<u8> {
        (**self).read_byte(timeout)
    }

    fn write_bytes(&mut self, bytes: &[u8]) -> Result<usize> {
        (**self).write_bytes(bytes)
    }
}
