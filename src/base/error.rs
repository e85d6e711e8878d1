use std::error;
use std::fmt;
use std::io;

/// Represents errors that can occur while talking to an RPLIDAR.
#[derive(Debug)]
pub enum Error {
    /// The execution of operation failed. Contains a description of the failure.
    OperationFail { description: String },

    /// A single transmission of a request frame was rejected or only partially written.
    /// Retried by the command client; never returned once a later attempt succeeds.
    TransmitFailure { written: usize, expected: usize },

    /// Every attempt to transmit a request failed. The link is considered unusable.
    CommandChannelFailure { opcode: u8, attempts: usize },

    /// No byte arrived before the read deadline.
    ChannelTimeout,

    /// Fewer bytes than requested arrived before the read deadline.
    ShortRead { expected: usize, received: usize },

    /// Sync nibbles of an express scan packet did not match.
    WrongFlag,

    /// Checksum carried by an express scan packet did not match its content.
    ChecksumMismatch { received: u8, computed: u8 },

    /// The response descriptor did not start with the expected sync bytes.
    MalformedDescriptor,

    /// The response descriptor declared a payload size other than the one expected.
    UnexpectedDescriptor { expected: usize, received: usize },

    /// Some of the repeated motor PWM commands could not be sent.
    MotorCommandFailed { failed: usize, attempts: usize },

    /// The decoding data is invalid according to current protocol. Contains a description of the protocol error.
    ProtocolError { description: String },

    /// A blocking read was abandoned because the stop token was triggered.
    Cancelled,

    /// An I/O error occurred while communicating with the underlying stream (e.g., serial port).
    IoError(io::Error),
}

impl Error {
    /// Returns `true` when the error means the physical link cannot be trusted anymore
    /// and the caller should shut down instead of retrying.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::CommandChannelFailure { .. })
    }

    /// Returns `true` for timeouts, which leave the channel usable.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::ChannelTimeout | Error::ShortRead { .. })
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::OperationFail { description } => write!(f, "operation failed: {}", description),
            Error::TransmitFailure { written, expected } => {
                write!(f, "packet send incomplete: {} of {} bytes", written, expected)
            }
            Error::CommandChannelFailure { opcode, attempts } => write!(
                f,
                "could not send packet for opcode {:02X} after {} attempts",
                opcode, attempts
            ),
            Error::ChannelTimeout => write!(f, "channel read timeout"),
            Error::ShortRead { expected, received } => {
                write!(f, "short read: expected {} bytes, got {}", expected, received)
            }
            Error::WrongFlag => write!(f, "express packet sync flags mismatch"),
            Error::ChecksumMismatch { received, computed } => write!(
                f,
                "express packet checksum mismatch: received {:02X}, computed {:02X}",
                received, computed
            ),
            Error::MalformedDescriptor => write!(f, "malformed response descriptor"),
            Error::UnexpectedDescriptor { expected, received } => write!(
                f,
                "unexpected response size: expected {}, got {}",
                expected, received
            ),
            Error::MotorCommandFailed { failed, attempts } => write!(
                f,
                "{} of {} motor PWM commands failed",
                failed, attempts
            ),
            Error::ProtocolError { description } => write!(f, "protocol error: {}", description),
            Error::Cancelled => write!(f, "operation cancelled"),
            Error::IoError(err) => write!(f, "io error: {}", err),
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Error::IoError(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::IoError(err)
    }
}

/// A specialized `Result` type for RPLIDAR operations.
pub type Result<T> = std::result::Result<T, Error>;
