use crate::base::{Error, RequestFrame, ResponseDescriptor, Result, SendMode};
use crate::checksum::Checksum;
use crate::cmds::Opcode;
use byteorder::{ByteOrder, LittleEndian};
use log::{error, trace};

const RPLIDAR_CMD_SYNC_BYTE: u8 = 0xA5;
const RPLIDAR_CMDFLAG_HAS_PAYLOAD: u8 = 0x80;

const RPLIDAR_ANS_SYNC_BYTES: [u8; 2] = [0xA5, 0x5A];

const RPLIDAR_ANS_HEADER_SIZE_MASK: u32 = 0x3FFFFFFF;
const RPLIDAR_ANS_HEADER_SUBTYPE_SHIFT: usize = 30;

/// The size of a response descriptor, sync bytes included.
pub const RPLIDAR_DESCRIPTOR_SIZE: usize = 7;

const RPLIDAR_MAX_PAYLOAD_SIZE: usize = 255;

/// Encodes request frames and decodes response descriptors of the RPLIDAR
/// host communication protocol.
///
/// The framer is a pure transform: it performs no I/O and keeps no state.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CommandFramer;

impl CommandFramer {
    /// Creates a new `CommandFramer`.
    pub fn new() -> CommandFramer {
        CommandFramer
    }

    /// Builds the wire frame for `opcode` carrying `payload`.
    ///
    /// Commands without payload are sent as the sync byte followed by the opcode.
    /// Commands with payload add the payload flag, the payload length, the payload
    /// bytes and an XOR checksum of everything before it.
    pub fn build(&self, opcode: Opcode, payload: &[u8]) -> Result<RequestFrame> {
        trace!(
            "Building frame: opcode={:02X}, payload_len={}",
            opcode.code(),
            payload.len()
        );
        if payload.len() > RPLIDAR_MAX_PAYLOAD_SIZE {
            error!(
                "Payload too large: {} bytes (max {})",
                payload.len(),
                RPLIDAR_MAX_PAYLOAD_SIZE
            );
            return Err(Error::OperationFail {
                description: "payload too big".to_owned(),
            });
        }

        if payload.is_empty() {
            let bytes = vec![RPLIDAR_CMD_SYNC_BYTE, opcode.code()];
            return Ok(RequestFrame::new(opcode, payload, bytes));
        }

        let mut bytes = Vec::with_capacity(4 + payload.len());
        bytes.push(RPLIDAR_CMD_SYNC_BYTE);
        bytes.push(opcode.code() | RPLIDAR_CMDFLAG_HAS_PAYLOAD);
        bytes.push(payload.len() as u8);
        bytes.extend_from_slice(payload);
        let checksum = Checksum::of(&bytes);
        bytes.push(checksum);
        trace!("Encoded frame: {:02X?}", bytes);

        Ok(RequestFrame::new(opcode, payload, bytes))
    }

    /// Parses the descriptor the device sends in front of a response.
    ///
    /// Layout: two sync bytes, a little-endian `u32` holding the payload size in its
    /// low 30 bits and the send mode in its top 2 bits, then the answer type.
    pub fn parse_descriptor(&self, bytes: &[u8]) -> Result<ResponseDescriptor> {
        if bytes.len() < RPLIDAR_DESCRIPTOR_SIZE {
            error!(
                "Descriptor too short: {} bytes (need {})",
                bytes.len(),
                RPLIDAR_DESCRIPTOR_SIZE
            );
            return Err(Error::MalformedDescriptor);
        }
        if bytes[0..2] != RPLIDAR_ANS_SYNC_BYTES {
            error!(
                "Descriptor sync mismatch: got {:02X} {:02X}",
                bytes[0], bytes[1]
            );
            return Err(Error::MalformedDescriptor);
        }

        let size_q30_subtype = LittleEndian::read_u32(&bytes[2..6]);
        let descriptor = ResponseDescriptor {
            len: (size_q30_subtype & RPLIDAR_ANS_HEADER_SIZE_MASK) as usize,
            send_mode: SendMode::from((size_q30_subtype >> RPLIDAR_ANS_HEADER_SUBTYPE_SHIFT) as u8),
            data_type: bytes[6],
        };
        trace!("Parsed descriptor: {:?}", descriptor);
        Ok(descriptor)
    }
}
