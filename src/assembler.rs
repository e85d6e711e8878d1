use crate::base::{ByteChannel, Result};
use crate::parsers::express_parser::{
    decode, DecodeError, ExpressScanPacket, EXPRESS_PACKET_CELLS, EXPRESS_PACKET_SIZE,
    RPLIDAR_RESP_MEASUREMENT_EXP_SYNC_1, RPLIDAR_RESP_MEASUREMENT_EXP_SYNC_2,
};
use crate::types::{DriverConfig, FullScan, Measurement};
use crate::utils::{angle_diff, wrap_360};
use log::{trace, warn};
use std::time::Duration;

/// A rotation can only end when the look-ahead packet starts below this angle...
const TURN_NEXT_START_MAX: f32 = 5.0;
/// ...and the last emitted cell was interpolated above this one.
const TURN_LAST_ANGLE_MIN: f32 = 355.0;

/// Where the assembler is in the packet stream.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AssemblerState {
    /// Nothing decoded yet since the last reset.
    AwaitingFirstPacket,
    /// Block-aligned reads.
    Decoding,
    /// Looking for a sync byte one byte at a time.
    Resyncing,
}

/// Counters describing the health of the packet stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanStats {
    pub packets_decoded: u64,
    pub wrong_flag: u64,
    pub checksum_mismatch: u64,
    pub resyncs: u64,
    pub bytes_skipped: u64,
    pub scans_completed: u64,
}

/// Angle of cell `index` before its correction is applied: the span between the
/// two packet start angles is shared evenly between the 32 cells.
#[inline]
pub fn interpolated_angle(start_angle: f32, next_start_angle: f32, index: usize) -> f32 {
    let step = angle_diff(start_angle, next_start_angle) / EXPRESS_PACKET_CELLS as f32;
    wrap_360(start_angle + step * (index + 1) as f32)
}

/// The measurement produced by cell `index` of `packet`, given the start angle of
/// the packet that follows it.
#[inline]
pub fn measurement_at(packet: &ExpressScanPacket, next_start_angle: f32, index: usize) -> Measurement {
    let cell = &packet.cells[index];
    Measurement {
        angle: wrap_360(
            interpolated_angle(packet.start_angle, next_start_angle, index) - cell.angle_correction,
        ),
        distance: cell.distance,
    }
}

/// Turns the express packet stream into full rotations.
///
/// The assembler keeps the packet being emitted and the one after it, because
/// per-cell angles are only known relative to the following packet's start angle.
/// The first packet after a reset is therefore never emitted on its own.
///
/// Protocol corruption (wrong sync nibbles, bad checksum) is handled here by
/// resynchronizing and never reaches the caller. Read timeouts are returned
/// after switching to resynchronization, so the next call picks up cleanly.
#[derive(Debug)]
pub struct ScanAssembler {
    state: AssemblerState,
    current_packet: Option<ExpressScanPacket>,
    next_packet: Option<ExpressScanPacket>,
    cell_index: usize,
    scan: FullScan,
    /// Tail of a rejected block that starts with a plausible sync pair.
    carry_over: Vec<u8>,
    timeout: Duration,
    max_scan_len: usize,
    stats: ScanStats,
}

impl Default for ScanAssembler {
    fn default() -> Self {
        Self::new()
    }
}

impl ScanAssembler {
    /// Creates an assembler with the default configuration.
    pub fn new() -> ScanAssembler {
        ScanAssembler::with_config(&DriverConfig::default())
    }

    /// Creates an assembler using the read timeout and scan cap of `config`.
    pub fn with_config(config: &DriverConfig) -> ScanAssembler {
        trace!("Creating new ScanAssembler with {:?}", config);
        ScanAssembler {
            state: AssemblerState::AwaitingFirstPacket,
            current_packet: None,
            next_packet: None,
            cell_index: 0,
            scan: FullScan::default(),
            carry_over: Vec::new(),
            timeout: config.timeout,
            max_scan_len: config.max_scan_len,
            stats: ScanStats::default(),
        }
    }

    pub fn state(&self) -> AssemblerState {
        self.state
    }

    pub fn stats(&self) -> &ScanStats {
        &self.stats
    }

    /// Drops packets and partial scan, as at the start of a new scan cycle.
    /// Statistics are kept.
    pub fn reset(&mut self) {
        trace!("Resetting ScanAssembler");
        self.state = AssemblerState::AwaitingFirstPacket;
        self.current_packet = None;
        self.next_packet = None;
        self.cell_index = 0;
        self.scan = FullScan::default();
        self.carry_over.clear();
    }

    /// Blocks until the next rotation is complete and returns it.
    ///
    /// The first rotation after a reset usually starts mid-turn.
    /// On a read error the measurements collected so far are kept and the next
    /// call continues the same rotation.
    pub fn next_full_scan<C: ByteChannel + ?Sized>(&mut self, channel: &mut C) -> Result<FullScan> {
        loop {
            let measurement = match (&self.current_packet, &self.next_packet) {
                (Some(current), Some(next)) if self.cell_index < EXPRESS_PACKET_CELLS => {
                    measurement_at(current, next.start_angle, self.cell_index)
                }
                _ => {
                    self.advance(channel)?;
                    continue;
                }
            };
            self.cell_index += 1;
            self.scan.push(measurement);

            if self.turn_completed() {
                trace!(
                    "Turn boundary after {:.3}°, {} measurements",
                    measurement.angle,
                    self.scan.len()
                );
                return Ok(self.take_scan());
            }
            if self.scan.len() >= self.max_scan_len {
                warn!(
                    "No turn boundary within {} measurements, handing over scan",
                    self.max_scan_len
                );
                return Ok(self.take_scan());
            }
        }
    }

    fn take_scan(&mut self) -> FullScan {
        self.stats.scans_completed += 1;
        std::mem::take(&mut self.scan)
    }

    /// The rotation ends on the last cell before the interpolated angle wraps past 360°.
    ///
    /// Corrected angles are not monotonic, so the wrap is detected on the
    /// interpolated ones. These only wrap inside a packet: the last cell lands
    /// exactly on the next packet's start angle.
    fn turn_completed(&self) -> bool {
        let (current, next) = match (&self.current_packet, &self.next_packet) {
            (Some(current), Some(next)) => (current, next),
            _ => return false,
        };
        if next.start_angle >= TURN_NEXT_START_MAX
            || self.cell_index == 0
            || self.cell_index >= EXPRESS_PACKET_CELLS
        {
            return false;
        }
        let emitted = interpolated_angle(current.start_angle, next.start_angle, self.cell_index - 1);
        let following = interpolated_angle(current.start_angle, next.start_angle, self.cell_index);
        emitted > TURN_LAST_ANGLE_MIN && following < emitted
    }

    /// Reads and decodes packets until one can be promoted, so that both
    /// `current_packet` and `next_packet` are populated and `cell_index` is 0.
    fn advance<C: ByteChannel + ?Sized>(&mut self, channel: &mut C) -> Result<()> {
        loop {
            let raw = match self.read_block(channel) {
                Ok(raw) => raw,
                Err(e) => {
                    trace!("Read failed ({}), will resynchronize", e);
                    self.state = AssemblerState::Resyncing;
                    return Err(e);
                }
            };

            match decode(&raw) {
                Ok(packet) => {
                    self.stats.packets_decoded += 1;
                    if self.state == AssemblerState::Resyncing {
                        trace!("Resynchronized on packet at {:.3}°", packet.start_angle);
                    }
                    self.state = AssemblerState::Decoding;
                    self.current_packet = self.next_packet.replace(packet);
                    self.cell_index = 0;
                    if self.current_packet.is_some() {
                        return Ok(());
                    }
                    trace!("First packet kept as look-ahead only");
                }
                Err(e) => self.on_decode_error(e, &raw),
            }
        }
    }

    fn on_decode_error(&mut self, err: DecodeError, raw: &[u8]) {
        match err {
            DecodeError::WrongFlag => self.stats.wrong_flag += 1,
            DecodeError::ChecksumMismatch { .. } => self.stats.checksum_mismatch += 1,
            DecodeError::InvalidLength(_) => {}
        }
        if self.state == AssemblerState::Resyncing {
            trace!("Still out of sync: {}", err);
        } else {
            warn!("Dropping express packet ({}), resynchronizing", err);
        }
        self.state = AssemblerState::Resyncing;

        if let Some(offset) = find_sync(raw) {
            trace!("Sync pair at offset {} of the rejected block", offset);
            self.stats.bytes_skipped += offset as u64;
            self.carry_over = raw[offset..].to_vec();
        }
    }

    /// Reads one packet-sized block. While resynchronizing, the block starts with the
    /// carried-over tail of the rejected one if it had a sync pair. Otherwise single
    /// bytes are read and dropped until one carries the first sync nibble.
    fn read_block<C: ByteChannel + ?Sized>(&mut self, channel: &mut C) -> Result<Vec<u8>> {
        if self.state != AssemblerState::Resyncing {
            return channel.read_exact_timeout(EXPRESS_PACKET_SIZE, self.timeout);
        }

        self.stats.resyncs += 1;
        if !self.carry_over.is_empty() {
            let mut raw = std::mem::take(&mut self.carry_over);
            let rest = channel.read_exact_timeout(EXPRESS_PACKET_SIZE - raw.len(), self.timeout)?;
            raw.extend_from_slice(&rest);
            return Ok(raw);
        }

        let mut skipped = 0u64;
        let first = loop {
            let byte = channel.read_byte(self.timeout)?;
            if byte >> 4 == RPLIDAR_RESP_MEASUREMENT_EXP_SYNC_1 {
                break byte;
            }
            skipped += 1;
            self.stats.bytes_skipped += 1;
        };
        trace!("Sync byte {:02X} found after skipping {} bytes", first, skipped);

        let rest = channel.read_exact_timeout(EXPRESS_PACKET_SIZE - 1, self.timeout)?;
        let mut raw = Vec::with_capacity(EXPRESS_PACKET_SIZE);
        raw.push(first);
        raw.extend_from_slice(&rest);
        Ok(raw)
    }
}

/// Offset of the first byte after the head of `raw` that could start a packet:
/// both sync nibbles match, or the first one does on the very last byte.
fn find_sync(raw: &[u8]) -> Option<usize> {
    (1..raw.len()).find(|&i| {
        raw[i] >> 4 == RPLIDAR_RESP_MEASUREMENT_EXP_SYNC_1
            && raw
                .get(i + 1)
                .map_or(true, |b| b >> 4 == RPLIDAR_RESP_MEASUREMENT_EXP_SYNC_2)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::{Channel, Error};
    use crate::parsers::express_parser::encode;
    use crate::test_support::{packet, stream_of, ScriptedStream};

    fn config() -> DriverConfig {
        DriverConfig::default().with_timeout(Duration::from_millis(20))
    }

    fn channel(bytes: Vec<u8>) -> Channel<ScriptedStream> {
        Channel::new(Box::new(ScriptedStream::new(&bytes)))
    }

    fn strictly_increasing(scan: &FullScan) -> bool {
        scan.measurements().windows(2).all(|w| w[0].angle < w[1].angle)
    }

    #[test]
    fn interpolation_is_bounded_and_monotonic() {
        for &(a, b) in &[(10.0f32, 40.0f32), (350.0, 10.0), (200.0, 199.5), (0.0, 0.0)] {
            let span = angle_diff(a, b);
            let mut previous = 0.0f32;
            for index in 0..EXPRESS_PACKET_CELLS {
                let offset = angle_diff(a, interpolated_angle(a, b, index));
                assert!(offset >= previous, "{} -> {}: cell {}", a, b, index);
                assert!(offset <= span + 1e-3, "{} -> {}: cell {}", a, b, index);
                previous = offset;
            }
            assert!((previous - span).abs() < 1e-3);
        }
    }

    #[test]
    fn correction_is_subtracted_and_wrapped() {
        let p = packet(0.0, 1.5);
        let m = measurement_at(&p, 32.0, 0);
        assert_eq!(m.angle, 359.5);
        assert_eq!(m.distance, 1000);
        let m = measurement_at(&packet(100.0, -2.0), 132.0, 3);
        assert_eq!(m.angle, 106.0);
    }

    #[test]
    fn one_rotation_yields_one_full_scan() {
        let packets = [
            packet(5.0, 3.0),
            packet(95.0, 3.0),
            packet(185.0, 3.0),
            packet(275.0, 3.0),
            packet(2.0, 3.0),
        ];
        let mut channel = channel(stream_of(&packets));
        let mut assembler = ScanAssembler::with_config(&config());

        // 275 -> 2 wraps between the last two cells: 359.28125° then 2°
        let scan = assembler.next_full_scan(&mut channel).unwrap();
        assert_eq!(scan.len(), 32 * 3 + 31);
        assert!(strictly_increasing(&scan));
        assert_eq!(scan.measurements()[0].angle, 5.0 + 90.0 / 32.0 - 3.0);
        assert_eq!(scan.measurements().last().map(|m| m.angle), Some(356.28125));
        assert_eq!(assembler.stats().packets_decoded, 5);
        assert_eq!(assembler.stats().scans_completed, 1);

        assert!(matches!(
            assembler.next_full_scan(&mut channel),
            Err(Error::ShortRead { .. })
        ));
        assert_eq!(assembler.state(), AssemblerState::Resyncing);
    }

    #[test]
    fn turn_boundary_fires_once_per_wrap() {
        // 326 -> 2 spans 36°, so the cells run 327.125 .. 359.75 then wrap to 0.875
        let packets = [
            packet(290.0, 0.0),
            packet(326.0, 0.0),
            packet(2.0, 0.0),
            packet(38.0, 0.0),
            packet(74.0, 0.0),
        ];
        let mut channel = channel(stream_of(&packets));
        let mut assembler = ScanAssembler::with_config(&config());

        let scan = assembler.next_full_scan(&mut channel).unwrap();
        assert_eq!(scan.len(), 32 + 30);
        assert!(strictly_increasing(&scan));
        assert_eq!(scan.measurements().last().map(|m| m.angle), Some(359.75));

        // the rest of the stream never wraps again
        assert!(assembler.next_full_scan(&mut channel).is_err());
        assert_eq!(assembler.stats().scans_completed, 1);
    }

    #[test]
    fn alternating_corrections_end_rotation_once() {
        let mut wobbly = packet(326.0, 0.0);
        for (i, cell) in wobbly.cells.iter_mut().enumerate() {
            cell.angle_correction = if i % 2 == 0 { -1.0 } else { 1.0 };
        }
        let packets = [
            packet(290.0, 0.0),
            wobbly,
            packet(2.0, 0.0),
            packet(38.0, 0.0),
            packet(74.0, 0.0),
        ];
        let mut channel = channel(stream_of(&packets));
        let mut assembler = ScanAssembler::with_config(&config());

        let scan = assembler.next_full_scan(&mut channel).unwrap();
        assert_eq!(scan.len(), 32 + 30);
        // cell 29 of packet 326 is interpolated at 359.75° and corrected by +1°
        assert_eq!(scan.measurements().last().map(|m| m.angle), Some(358.75));
        assert!(assembler.next_full_scan(&mut channel).is_err());
        assert_eq!(assembler.stats().scans_completed, 1);
    }

    #[test]
    fn scans_continue_across_rotations() {
        let starts = [180.0, 270.0, 0.0, 90.0, 180.0, 270.0, 0.0, 90.0];
        let packets: Vec<_> = starts.iter().map(|&a| packet(a, 0.0)).collect();
        let mut channel = channel(stream_of(&packets));
        let mut assembler = ScanAssembler::with_config(&config());

        // the last cell of packet 270 lands on 0° and opens the next rotation
        let first = assembler.next_full_scan(&mut channel).unwrap();
        assert_eq!(first.len(), 63);
        let second = assembler.next_full_scan(&mut channel).unwrap();
        assert_eq!(second.len(), 128);
        assert!(strictly_increasing(&second));
        assert_eq!(second.measurements()[0].angle, 0.0);
    }

    #[test]
    fn resumes_after_corrupted_packet() {
        let mut bytes = stream_of(&[packet(0.0, 0.0), packet(30.0, 0.0)]);
        let mut corrupted = encode(&packet(60.0, 0.0));
        corrupted[40] ^= 0xFF;
        bytes.extend(corrupted);
        bytes.extend(stream_of(&[
            packet(90.0, 0.0),
            packet(300.0, 0.0),
            packet(330.0, 0.0),
            packet(2.0, 0.0),
        ]));
        let mut channel = channel(bytes);
        let mut assembler = ScanAssembler::with_config(&config());

        let scan = assembler.next_full_scan(&mut channel).unwrap();
        let stats = assembler.stats();
        assert_eq!(stats.checksum_mismatch, 1);
        assert_eq!(stats.resyncs, 1);
        assert_eq!(stats.bytes_skipped, 0);
        assert_eq!(stats.packets_decoded, 6);
        assert_eq!(assembler.state(), AssemblerState::Decoding);
        // packet 30 interpolates straight to packet 90
        assert_eq!(scan.measurements()[32].angle, 30.0 + 60.0 / 32.0);
        assert!(strictly_increasing(&scan));
    }

    #[test]
    fn skips_garbage_until_sync_byte() {
        let mut bytes = vec![0u8; EXPRESS_PACKET_SIZE + 5];
        bytes.extend(stream_of(&[
            packet(270.0, 0.0),
            packet(300.0, 0.0),
            packet(330.0, 0.0),
            packet(1.0, 0.0),
        ]));
        let mut channel = channel(bytes);
        let mut assembler = ScanAssembler::with_config(&config());

        let scan = assembler.next_full_scan(&mut channel).unwrap();
        assert_eq!(assembler.stats().wrong_flag, 1);
        assert_eq!(assembler.stats().bytes_skipped, 5);
        assert_eq!(assembler.stats().packets_decoded, 4);
        assert_eq!(scan.measurements()[0].angle, 270.0 + 30.0 / 32.0);
    }

    #[test]
    fn false_sync_byte_keeps_following_packet() {
        let mut bytes = vec![0u8; EXPRESS_PACKET_SIZE];
        bytes.push(0xA3);
        bytes.extend(stream_of(&[
            packet(270.0, 0.0),
            packet(300.0, 0.0),
            packet(330.0, 0.0),
            packet(1.0, 0.0),
        ]));
        let mut channel = channel(bytes);
        let mut assembler = ScanAssembler::with_config(&config());

        let scan = assembler.next_full_scan(&mut channel).unwrap();
        let stats = assembler.stats();
        assert_eq!(stats.wrong_flag, 2);
        assert_eq!(stats.bytes_skipped, 1);
        assert_eq!(stats.packets_decoded, 4);
        assert_eq!(scan.measurements()[0].angle, 270.0 + 30.0 / 32.0);
    }

    #[test]
    fn sync_search_needs_both_nibbles() {
        assert_eq!(find_sync(&[0xA1, 0x00, 0xA2, 0x53]), Some(2));
        assert_eq!(find_sync(&[0xA1, 0xA0, 0x0F]), None);
        assert_eq!(find_sync(&[0xA1, 0x00, 0xA7]), Some(2));
        assert_eq!(find_sync(&[0xA1]), None);
    }

    #[test]
    fn timeout_keeps_partial_scan() {
        let mut channel = channel(stream_of(&[
            packet(100.0, 0.0),
            packet(200.0, 0.0),
            packet(300.0, 0.0),
        ]));
        let mut assembler = ScanAssembler::with_config(&config());

        assert!(assembler.next_full_scan(&mut channel).unwrap_err().is_timeout());
        assert_eq!(assembler.state(), AssemblerState::Resyncing);

        // 300 -> 1 wraps on the last cell, after 359.09375°
        let mut channel = self::channel(stream_of(&[packet(1.0, 0.0)]));
        let scan = assembler.next_full_scan(&mut channel).unwrap();
        assert_eq!(scan.len(), 32 + 32 + 31);
        assert!(strictly_increasing(&scan));
        assert_eq!(assembler.stats().resyncs, 1);
        assert_eq!(assembler.stats().bytes_skipped, 0);
    }

    #[test]
    fn caps_scan_without_turn_boundary() {
        let packets = [packet(10.0, 0.0), packet(20.0, 0.0), packet(30.0, 0.0)];
        let mut channel = channel(stream_of(&packets));
        let mut assembler = ScanAssembler::with_config(&config().with_max_scan_len(40));

        assert_eq!(assembler.next_full_scan(&mut channel).unwrap().len(), 40);
        assert!(assembler.next_full_scan(&mut channel).is_err());
    }

    #[test]
    fn reset_discards_look_ahead() {
        let mut channel = channel(stream_of(&[packet(10.0, 0.0), packet(20.0, 0.0)]));
        let mut assembler = ScanAssembler::with_config(&config());
        assert!(assembler.next_full_scan(&mut channel).is_err());
        assembler.reset();
        assert_eq!(assembler.state(), AssemblerState::AwaitingFirstPacket);
        assert_eq!(assembler.stats().packets_decoded, 2);
    }
}
