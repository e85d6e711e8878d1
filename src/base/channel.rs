use crate::base::error::{Error, Result};
use crate::base::traits::ByteChannel;
use log::{error, trace};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Shared flag used to abandon blocking reads from another thread.
///
/// Clone it, hand one copy to the channel and keep the other one wherever the
/// shutdown decision is made (a signal handler, a supervisor thread...).
#[derive(Debug, Clone, Default)]
pub struct StopToken {
    flag: Arc<AtomicBool>,
}

impl StopToken {
    /// Creates a token in the running state.
    pub fn new() -> StopToken {
        StopToken::default()
    }

    /// Requests every read waiting on this token to give up.
    pub fn stop(&self) {
        trace!("Stop requested");
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Returns `true` once `stop()` has been called.
    pub fn is_stopped(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Channel sends and receives raw bytes via stream with bounded waits
///
/// The stream should be configured with a short read timeout (a few milliseconds)
/// so that the overall deadline and the stop token are checked regularly.
///
/// # Examples
/// ```ignore
/// let serial_port = serialport::new("/dev/ttyUSB0", 115200)
///     .timeout(Duration::from_millis(5))
///     .open()?;
/// let mut channel = Channel::new(serial_port);
///
/// channel.write_bytes(&[0xA5, 0x25]).unwrap();
/// ```
#[derive(Debug)]
pub struct Channel<T: ?Sized> {
    stream: Box<T>,
    stop_token: Option<StopToken>,
}

impl<T: ?Sized> Channel<T>
where
    T: io::Read + io::Write,
{
    /// Create a new `Channel` over a stream
    pub fn new(stream: Box<T>) -> Channel<T> {
        trace!("Creating new Channel");
        Channel {
            stream,
            stop_token: None,
        }
    }

    /// Create a new `Channel` whose reads are abandoned when `token` is stopped
    pub fn with_stop_token(stream: Box<T>, token: StopToken) -> Channel<T> {
        trace!("Creating new Channel with stop token");
        Channel {
            stream,
            stop_token: Some(token),
        }
    }

    /// Returns the underlying stream
    pub fn into_inner(self) -> Box<T> {
        self.stream
    }

    fn check_stop(&self) -> Result<()> {
        match &self.stop_token {
            Some(token) if token.is_stopped() => {
                trace!("Stop token set, abandoning read");
                Err(Error::Cancelled)
            }
            _ => Ok(()),
        }
    }

    /// Fill `buf` completely or until `deadline`, returning how many bytes were read.
    fn fill_until(&mut self, buf: &mut [u8], deadline: Instant) -> Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            self.check_stop()?;
            match self.stream.read(&mut buf[filled..]) {
                Ok(0) => {}
                Ok(n) => {
                    filled += n;
                    trace!("Read {} bytes ({}/{})", n, filled, buf.len());
                    continue;
                }
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::TimedOut
                            | io::ErrorKind::WouldBlock
                            | io::ErrorKind::Interrupted
                    ) => {}
                Err(e) => {
                    error!("IO error reading from stream: {}", e);
                    return Err(e.into());
                }
            }
            if Instant::now() >= deadline {
                trace!("Read deadline reached with {}/{} bytes", filled, buf.len());
                break;
            }
        }
        Ok(filled)
    }
}

impl<T: ?Sized> ByteChannel for Channel<T>
where
    T: io::Read + io::Write,
{
    fn read_exact_timeout(&mut self, len: usize, timeout: Duration) -> Result<Vec<u8>> {
        trace!("read_exact_timeout: {} bytes, timeout {:?}", len, timeout);
        let deadline = Instant::now() + timeout;
        let mut buf = vec![0; len];
        let received = self.fill_until(&mut buf, deadline)?;
        if received < len {
            return Err(Error::ShortRead {
                expected: len,
                received,
            });
        }
        Ok(buf)
    }

    fn read_byte(&mut self, timeout: Duration) -> Result<u8> {
        let deadline = Instant::now() + timeout;
        let mut buf = [0u8; 1];
        match self.fill_until(&mut buf, deadline)? {
            1 => Ok(buf[0]),
            _ => Err(Error::ChannelTimeout),
        }
    }

    fn write_bytes(&mut self, bytes: &[u8]) -> Result<usize> {
        trace!("Writing {} bytes: {:02X?}", bytes.len(), bytes);
        let written = self.stream.write(bytes)?;
        self.stream.flush()?;
        trace!("Wrote {} bytes", written);
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedStream;

    const SHORT: Duration = Duration::from_millis(20);

    #[test]
    fn reads_exact_across_chunks() {
        let stream = ScriptedStream::new(&[1, 2, 3, 4, 5]).chunked(2);
        let mut channel = Channel::new(Box::new(stream));
        assert_eq!(channel.read_exact_timeout(4, SHORT).unwrap(), vec![1, 2, 3, 4]);
        assert_eq!(channel.read_byte(SHORT).unwrap(), 5);
    }

    #[test]
    fn short_read_reports_received_count() {
        let mut channel = Channel::new(Box::new(ScriptedStream::new(&[9, 9, 9])));
        match channel.read_exact_timeout(7, SHORT) {
            Err(Error::ShortRead { expected, received }) => {
                assert_eq!(expected, 7);
                assert_eq!(received, 3);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn empty_stream_times_out_on_byte_read() {
        let mut channel = Channel::new(Box::new(ScriptedStream::new(&[])));
        assert!(matches!(channel.read_byte(SHORT), Err(Error::ChannelTimeout)));
    }

    #[test]
    fn stopped_token_cancels_reads() {
        let token = StopToken::new();
        let mut channel =
            Channel::with_stop_token(Box::new(ScriptedStream::new(&[1, 2])), token.clone());
        token.stop();
        assert!(matches!(
            channel.read_exact_timeout(2, SHORT),
            Err(Error::Cancelled)
        ));
    }

    #[test]
    fn write_reports_accepted_bytes() {
        let stream = ScriptedStream::new(&[]).accept_at_most(1);
        let mut channel = Channel::new(Box::new(stream));
        assert_eq!(channel.write_bytes(&[0xA5, 0x25]).unwrap(), 1);
        assert_eq!(channel.into_inner().written(), &[0xA5]);
    }
}
