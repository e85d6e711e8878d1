use crate::cmds::Opcode;

/// A request ready to be put on the wire.
///
/// Built by `CommandFramer::build`, which has already validated the payload size
/// and computed the checksum. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestFrame {
    opcode: Opcode,
    payload: Vec<u8>,
    bytes: Vec<u8>,
}

impl RequestFrame {
    pub(crate) fn new(opcode: Opcode, payload: &[u8], bytes: Vec<u8>) -> RequestFrame {
        RequestFrame {
            opcode,
            payload: payload.to_vec(),
            bytes,
        }
    }

    /// The command this frame carries.
    #[inline]
    pub fn opcode(&self) -> Opcode {
        self.opcode
    }

    /// The payload as given to the framer, without header or checksum.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// The encoded frame: sync byte, command, and for payload commands the length,
    /// payload and checksum.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// How the device will deliver the response that follows a descriptor.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SendMode {
    /// One response payload follows.
    Single,
    /// Response payloads of the declared size repeat until the device is stopped.
    Multiple,
    /// Modes the protocol keeps reserved.
    Reserved(u8),
}

impl From<u8> for SendMode {
    fn from(bits: u8) -> SendMode {
        match bits {
            0 => SendMode::Single,
            1 => SendMode::Multiple,
            other => SendMode::Reserved(other),
        }
    }
}

/// The header the device sends in front of every response payload.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ResponseDescriptor {
    /// Size of each response payload in bytes.
    pub len: usize,
    /// Single or repeated delivery.
    pub send_mode: SendMode,
    /// Answer type identifier (see `answers`).
    pub data_type: u8,
}
