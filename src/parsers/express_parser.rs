use crate::base::Error;
use crate::checksum::Checksum;
use byteorder::{ByteOrder, LittleEndian};
use log::trace;
use std::fmt;

/// Size of one express scan packet on the wire.
pub const EXPRESS_PACKET_SIZE: usize = 84;

/// Measurements carried by one packet.
pub const EXPRESS_PACKET_CELLS: usize = 32;

/// Expected value of the upper nibble of the first sync/checksum byte.
pub const RPLIDAR_RESP_MEASUREMENT_EXP_SYNC_1: u8 = 0xA;
/// Expected value of the upper nibble of the second sync/checksum byte.
pub const RPLIDAR_RESP_MEASUREMENT_EXP_SYNC_2: u8 = 0x5;

const START_ANGLE_OFFSET: usize = 2;
const CABINS_OFFSET: usize = 4;
const CABIN_SIZE: usize = 5;
const START_FLAG: u16 = 0x8000;
const START_ANGLE_MASK: u16 = 0x7FFF;
const ANGLE_Q6_SCALE: f32 = 64.0;
const OFFSET_Q3_SCALE: f32 = 8.0;

/// Why a raw block could not be turned into an `ExpressScanPacket`.
///
/// Every variant is recoverable: the stream has to be resynchronized, nothing more.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The block is not `EXPRESS_PACKET_SIZE` bytes long.
    InvalidLength(usize),
    /// The sync nibbles of bytes 0 and 1 do not match.
    WrongFlag,
    /// The checksum carried in bytes 0 and 1 does not match the packet content.
    ChecksumMismatch { received: u8, computed: u8 },
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::InvalidLength(len) => write!(
                f,
                "express packet length {} (expected {})",
                len, EXPRESS_PACKET_SIZE
            ),
            DecodeError::WrongFlag => write!(f, "express packet sync flags mismatch"),
            DecodeError::ChecksumMismatch { received, computed } => write!(
                f,
                "express packet checksum mismatch: received {:02X}, computed {:02X}",
                received, computed
            ),
        }
    }
}

impl std::error::Error for DecodeError {}

impl From<DecodeError> for Error {
    fn from(err: DecodeError) -> Error {
        match err {
            DecodeError::InvalidLength(_) => Error::ProtocolError {
                description: err.to_string(),
            },
            DecodeError::WrongFlag => Error::WrongFlag,
            DecodeError::ChecksumMismatch { received, computed } => {
                Error::ChecksumMismatch { received, computed }
            }
        }
    }
}

/// One measurement slot of an express packet.
#[derive(Debug, Copy, Clone, Default, PartialEq)]
pub struct Cell {
    /// Distance in millimeters, 0 when there was no return.
    pub distance: u16,
    /// Fine angle correction in degrees, subtracted from the interpolated angle.
    pub angle_correction: f32,
}

/// A decoded express scan packet.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpressScanPacket {
    /// Angle of the first cell, in degrees (1/64° resolution).
    pub start_angle: f32,
    /// Set on the first packet sent after the scan was started.
    pub new_scan: bool,
    /// The 32 measurement cells in emission order.
    pub cells: [Cell; EXPRESS_PACKET_CELLS],
}

/// Checksum received in the low nibbles of the two sync bytes.
#[inline]
fn received_checksum(raw: &[u8]) -> u8 {
    (raw[0] & 0x0F) | ((raw[1] & 0x0F) << 4)
}

/// Splits a cabin into its two cells.
///
/// Each distance word holds the distance in its upper 14 bits, bit 0 is the fifth
/// bit of the angle correction magnitude and bit 1 its sign. The low four bits of
/// each correction come from the shared offset byte.
#[inline]
fn parse_cabin(cabin: &[u8]) -> [Cell; 2] {
    let distance_angle_1 = LittleEndian::read_u16(&cabin[0..2]);
    let distance_angle_2 = LittleEndian::read_u16(&cabin[2..4]);
    let offset_angles_q3 = cabin[4];

    [
        parse_cell(distance_angle_1, offset_angles_q3 & 0x0F),
        parse_cell(distance_angle_2, offset_angles_q3 >> 4),
    ]
}

#[inline]
fn parse_cell(distance_angle: u16, offset_nibble: u8) -> Cell {
    let magnitude_q3 = (((distance_angle & 0x1) as u8) << 4) | offset_nibble;
    let magnitude = magnitude_q3 as f32 / OFFSET_Q3_SCALE;
    let angle_correction = if distance_angle & 0x2 != 0 {
        -magnitude
    } else {
        magnitude
    };
    Cell {
        distance: distance_angle >> 2,
        angle_correction,
    }
}

/// Decodes one raw express scan packet.
///
/// Checks are applied in order: block length, sync nibbles, then checksum.
/// Nothing is read past the end of `raw`.
pub fn decode(raw: &[u8]) -> Result<ExpressScanPacket, DecodeError> {
    if raw.len() != EXPRESS_PACKET_SIZE {
        return Err(DecodeError::InvalidLength(raw.len()));
    }

    let sync1 = raw[0] >> 4;
    let sync2 = raw[1] >> 4;
    if sync1 != RPLIDAR_RESP_MEASUREMENT_EXP_SYNC_1 || sync2 != RPLIDAR_RESP_MEASUREMENT_EXP_SYNC_2 {
        trace!("Sync nibbles mismatch: {:X} {:X}", sync1, sync2);
        return Err(DecodeError::WrongFlag);
    }

    let received = received_checksum(raw);
    let computed = Checksum::of(&raw[START_ANGLE_OFFSET..]);
    if received != computed {
        trace!(
            "Checksum: received {:02X}, computed {:02X}",
            received,
            computed
        );
        return Err(DecodeError::ChecksumMismatch { received, computed });
    }

    let start_angle_sync_q6 =
        LittleEndian::read_u16(&raw[START_ANGLE_OFFSET..START_ANGLE_OFFSET + 2]);
    let mut cells = [Cell::default(); EXPRESS_PACKET_CELLS];
    for (pair, cabin) in cells
        .chunks_exact_mut(2)
        .zip(raw[CABINS_OFFSET..].chunks_exact(CABIN_SIZE))
    {
        pair.copy_from_slice(&parse_cabin(cabin));
    }

    let packet = ExpressScanPacket {
        start_angle: (start_angle_sync_q6 & START_ANGLE_MASK) as f32 / ANGLE_Q6_SCALE,
        new_scan: start_angle_sync_q6 & START_FLAG != 0,
        cells,
    };
    trace!(
        "Decoded express packet: start_angle={:.3}, new_scan={}",
        packet.start_angle,
        packet.new_scan
    );
    Ok(packet)
}

/// Encodes a packet back to its wire form. Only used to build test fixtures.
///
/// Angles must be multiples of 1/64° and corrections multiples of 1/8° within ±3.875°
/// for `decode(&encode(p)) == p` to hold.
#[cfg(test)]
pub(crate) fn encode(packet: &ExpressScanPacket) -> Vec<u8> {
    let mut raw = vec![0u8; EXPRESS_PACKET_SIZE];
    let mut angle_q6 = (packet.start_angle * ANGLE_Q6_SCALE).round() as u16 & START_ANGLE_MASK;
    if packet.new_scan {
        angle_q6 |= START_FLAG;
    }
    LittleEndian::write_u16(&mut raw[START_ANGLE_OFFSET..START_ANGLE_OFFSET + 2], angle_q6);

    for (pair, cabin) in packet
        .cells
        .chunks_exact(2)
        .zip(raw[CABINS_OFFSET..].chunks_exact_mut(CABIN_SIZE))
    {
        let mut offsets = 0u8;
        for (i, cell) in pair.iter().enumerate() {
            let magnitude_q3 = (cell.angle_correction.abs() * OFFSET_Q3_SCALE).round() as u16 & 0x1F;
            let sign = if cell.angle_correction < 0.0 { 0x2 } else { 0x0 };
            let word = (cell.distance << 2) | sign | (magnitude_q3 >> 4);
            LittleEndian::write_u16(&mut cabin[i * 2..i * 2 + 2], word);
            offsets |= ((magnitude_q3 & 0x0F) as u8) << (4 * i);
        }
        cabin[4] = offsets;
    }

    let checksum = Checksum::of(&raw[START_ANGLE_OFFSET..]);
    raw[0] = (RPLIDAR_RESP_MEASUREMENT_EXP_SYNC_1 << 4) | (checksum & 0x0F);
    raw[1] = (RPLIDAR_RESP_MEASUREMENT_EXP_SYNC_2 << 4) | (checksum >> 4);
    raw
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::packet;

    fn sample_packet() -> ExpressScanPacket {
        let mut p = packet(123.5, 0.0);
        for (i, cell) in p.cells.iter_mut().enumerate() {
            cell.distance = (i as u16) * 511 + 7;
            cell.angle_correction = (i as f32 - 15.0) / 8.0 * if i % 3 == 0 { -1.0 } else { 1.0 };
        }
        p.cells[5].distance = 0;
        p.cells[6].distance = 0x3FFF;
        p.cells[7].angle_correction = -3.875;
        p.cells[8].angle_correction = 3.875;
        p
    }

    #[test]
    fn decode_of_encoded_packet_is_identity() {
        let p = sample_packet();
        assert_eq!(decode(&encode(&p)).unwrap(), p);

        let mut flagged = packet(359.984375, 1.5);
        flagged.new_scan = true;
        assert_eq!(decode(&encode(&flagged)).unwrap(), flagged);
    }

    #[test]
    fn decodes_known_cabin_layout() {
        let mut raw = vec![0u8; EXPRESS_PACKET_SIZE];
        // 90° in Q6 with the start flag
        raw[2] = 0x80;
        raw[3] = 0x96;
        // cell 0: 1000 mm, correction -(16 + 3)/8; cell 1: 250 mm, correction +5/8
        LittleEndian::write_u16(&mut raw[4..6], (1000 << 2) | 0x2 | 0x1);
        LittleEndian::write_u16(&mut raw[6..8], 250 << 2);
        raw[8] = 0x53;
        let checksum = Checksum::of(&raw[2..]);
        raw[0] = 0xA0 | (checksum & 0x0F);
        raw[1] = 0x50 | (checksum >> 4);

        let p = decode(&raw).unwrap();
        assert_eq!(p.start_angle, 90.0);
        assert!(p.new_scan);
        assert_eq!(p.cells[0].distance, 1000);
        assert_eq!(p.cells[0].angle_correction, -19.0 / 8.0);
        assert_eq!(p.cells[1].distance, 250);
        assert_eq!(p.cells[1].angle_correction, 5.0 / 8.0);
        assert_eq!(p.cells[2], Cell::default());
    }

    #[test]
    fn corrupted_sync_nibbles_are_wrong_flag() {
        let good = encode(&sample_packet());
        for nibble in 0..16u8 {
            if nibble != RPLIDAR_RESP_MEASUREMENT_EXP_SYNC_1 {
                let mut raw = good.clone();
                raw[0] = (nibble << 4) | (raw[0] & 0x0F);
                assert_eq!(decode(&raw), Err(DecodeError::WrongFlag));
            }
            if nibble != RPLIDAR_RESP_MEASUREMENT_EXP_SYNC_2 {
                let mut raw = good.clone();
                raw[1] = (nibble << 4) | (raw[1] & 0x0F);
                assert_eq!(decode(&raw), Err(DecodeError::WrongFlag));
            }
        }
    }

    #[test]
    fn tampered_payload_is_checksum_mismatch() {
        let good = encode(&sample_packet());
        for index in [2, 3, 4, 40, 83] {
            let mut raw = good.clone();
            raw[index] ^= 0x10;
            assert!(matches!(
                decode(&raw),
                Err(DecodeError::ChecksumMismatch { .. })
            ));
        }
        let mut raw = good;
        raw[0] ^= 0x01;
        assert!(matches!(
            decode(&raw),
            Err(DecodeError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn wrong_length_never_panics() {
        assert_eq!(decode(&[]), Err(DecodeError::InvalidLength(0)));
        assert_eq!(decode(&[0xA0, 0x50]), Err(DecodeError::InvalidLength(2)));
        assert_eq!(
            decode(&[0u8; EXPRESS_PACKET_SIZE + 1]),
            Err(DecodeError::InvalidLength(EXPRESS_PACKET_SIZE + 1))
        );
    }

    #[test]
    fn converts_into_driver_error() {
        assert!(matches!(Error::from(DecodeError::WrongFlag), Error::WrongFlag));
        assert!(matches!(
            Error::from(DecodeError::ChecksumMismatch {
                received: 1,
                computed: 2
            }),
            Error::ChecksumMismatch {
                received: 1,
                computed: 2
            }
        ));
    }
}
