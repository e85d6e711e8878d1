//! # Rplidar Express
//!
//! `rplidar_express` drives Slamtec RPLIDAR sensors in legacy express scan mode.
//! It frames host commands, queries the device status, controls the motor through
//! the accessory board PWM command, and turns the stream of 84-byte express packets
//! into complete rotations of `(angle, distance)` measurements.
//!
//! The physical link is abstracted by [`ByteChannel`]; [`Channel`] implements it for
//! any `Read + Write` stream such as a serial port opened elsewhere.

extern crate byteorder;
extern crate log;

pub mod answers;
pub mod assembler;
pub mod base;
mod checksum;
pub mod cmds;
mod internals;
pub mod parsers;
mod protocol;
pub mod types;
pub mod utils;

#[cfg(test)]
mod test_support;

pub use crate::answers::{DeviceStatus, HealthData, HealthStatus, InfoData, SampleRateData};
pub use crate::assembler::{AssemblerState, ScanAssembler, ScanStats};
pub use crate::base::{
    ByteChannel, Channel, Error, RequestFrame, ResponseDescriptor, Result, SendMode, StopToken,
};
pub use crate::cmds::Opcode;
pub use crate::protocol::{CommandFramer, RPLIDAR_DESCRIPTOR_SIZE};
pub use crate::types::{DriverConfig, FullScan, Measurement};

use crate::answers::*;
use crate::cmds::*;
use crate::parsers::express_parser::EXPRESS_PACKET_SIZE;
use byteorder::{ByteOrder, LittleEndian};
use log::{error, trace, warn};
use std::time::Duration;

/// Request/response client for an RPLIDAR.
///
/// The protocol is half-duplex: a request is written, then its response is read,
/// and nothing else may be sent meanwhile. While an express scan runs the device
/// streams packets without further requests, which is why [`ScanSession`] borrows
/// the client mutably until it is stopped.
#[derive(Debug)]
pub struct CommandClient<C: ByteChannel> {
    channel: C,
    framer: CommandFramer,
    config: DriverConfig,
}

impl<C: ByteChannel> CommandClient<C> {
    /// Constructs a new `CommandClient` over `channel` with the default configuration.
    ///
    /// # Example
    /// ```ignore
    /// # use rplidar_express::{Channel, CommandClient};
    /// # use std::time::Duration;
    /// # fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// let serial_port = serialport::new("/dev/ttyUSB0", 115200)
    ///     .timeout(Duration::from_millis(5))
    ///     .open()?;
    /// let mut client = CommandClient::new(Channel::new(serial_port));
    /// let status = client.status()?;
    /// println!("{} health {}", status.info, status.health.status);
    /// # Ok(())
    /// # }
    /// ```
    pub fn new(channel: C) -> CommandClient<C> {
        CommandClient::with_config(channel, DriverConfig::default())
    }

    /// Constructs a new `CommandClient` with explicit tunables.
    pub fn with_config(channel: C, config: DriverConfig) -> CommandClient<C> {
        trace!("Creating new CommandClient with {:?}", config);
        CommandClient {
            channel,
            framer: CommandFramer::new(),
            config,
        }
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    pub fn channel_mut(&mut self) -> &mut C {
        &mut self.channel
    }

    /// Returns the underlying channel
    pub fn into_inner(self) -> C {
        self.channel
    }

    /// Writes `frame` once. A write accepting fewer bytes than the frame holds
    /// counts as a failed transmission.
    fn transmit(&mut self, frame: &RequestFrame) -> Result<()> {
        let bytes = frame.as_bytes();
        let written = self.channel.write_bytes(bytes)?;
        if written != bytes.len() {
            return Err(Error::TransmitFailure {
                written,
                expected: bytes.len(),
            });
        }
        Ok(())
    }

    /// Sends a request, retrying failed transmissions.
    ///
    /// Gives up with the fatal `Error::CommandChannelFailure` once every attempt failed.
    fn send(&mut self, opcode: Opcode, payload: &[u8]) -> Result<()> {
        let frame = self.framer.build(opcode, payload)?;
        let attempts = self.config.send_attempts;
        for attempt in 1..=attempts {
            match self.transmit(&frame) {
                Ok(()) => {
                    trace!("Sent {:?} ({:02X?})", opcode, frame.as_bytes());
                    return Ok(());
                }
                Err(e) => warn!(
                    "Failed to send {:?} command ({}), attempt {}/{}",
                    opcode, e, attempt, attempts
                ),
            }
        }
        error!(
            "Giving up on {:?} command after {} attempts, command channel is unusable",
            opcode, attempts
        );
        Err(Error::CommandChannelFailure {
            opcode: opcode.code(),
            attempts,
        })
    }

    fn read_descriptor(&mut self, timeout: Duration) -> Result<ResponseDescriptor> {
        let raw = self
            .channel
            .read_exact_timeout(RPLIDAR_DESCRIPTOR_SIZE, timeout)?;
        self.framer.parse_descriptor(&raw)
    }

    /// Sends a request without payload and returns the data of its single response,
    /// which must be exactly `size` bytes long.
    fn query(
        &mut self,
        opcode: Opcode,
        answer_type: u8,
        size: usize,
        timeout: Duration,
    ) -> Result<Vec<u8>> {
        self.send(opcode, &[])?;
        let descriptor = self.read_descriptor(timeout)?;
        if descriptor.data_type != answer_type {
            error!(
                "Unexpected response type for {:?}: got {:02X}, expected {:02X}",
                opcode, descriptor.data_type, answer_type
            );
            return Err(Error::ProtocolError {
                description: format!(
                    "unexpected response type: expected {:02X}, got {:02X}",
                    answer_type, descriptor.data_type
                ),
            });
        }
        if descriptor.len != size {
            error!(
                "Unexpected response size for {:?}: got {}, expected {}",
                opcode, descriptor.len, size
            );
            return Err(Error::ProtocolError {
                description: format!(
                    "invalid data size for {:?}: expected {}, got {}",
                    opcode, size, descriptor.len
                ),
            });
        }
        let data = self.channel.read_exact_timeout(size, timeout)?;
        trace!("Received {} bytes for {:?}", data.len(), opcode);
        Ok(data)
    }

    /// Gets the health status of the RPLIDAR.
    /// Uses the configured timeout.
    pub fn get_health(&mut self) -> Result<HealthData> {
        self.get_health_with_timeout(self.config.timeout)
    }

    /// Gets the health status with a specified timeout.
    ///
    /// # Arguments
    ///
    /// * `timeout` - The maximum duration to wait for each part of the response.
    pub fn get_health_with_timeout(&mut self, timeout: Duration) -> Result<HealthData> {
        trace!("Getting health with timeout: {:?}", timeout);
        let data = self.query(
            Opcode::GetHealth,
            RPLIDAR_ANS_TYPE_DEVHEALTH,
            HealthData::SIZE,
            timeout,
        )?;
        HealthData::parse(&data)
    }

    /// Gets the device information (model, firmware, hardware, serial number).
    /// Uses the configured timeout.
    pub fn get_info(&mut self) -> Result<InfoData> {
        self.get_info_with_timeout(self.config.timeout)
    }

    /// Gets the device information with a specified timeout.
    pub fn get_info_with_timeout(&mut self, timeout: Duration) -> Result<InfoData> {
        trace!("Getting device info with timeout: {:?}", timeout);
        let data = self.query(Opcode::GetInfo, RPLIDAR_ANS_TYPE_DEVINFO, InfoData::SIZE, timeout)?;
        InfoData::parse(&data)
    }

    /// Gets the sampling periods of standard and express scans.
    pub fn get_samplerate(&mut self) -> Result<SampleRateData> {
        self.get_samplerate_with_timeout(self.config.timeout)
    }

    pub fn get_samplerate_with_timeout(&mut self, timeout: Duration) -> Result<SampleRateData> {
        trace!("Getting sample rate with timeout: {:?}", timeout);
        let data = self.query(
            Opcode::GetSampleRate,
            RPLIDAR_ANS_TYPE_SAMPLE_RATE,
            SampleRateData::SIZE,
            timeout,
        )?;
        SampleRateData::parse(&data)
    }

    /// Queries device information, health and sample rate in that order.
    pub fn status(&mut self) -> Result<DeviceStatus> {
        let info = self.get_info()?;
        let health = self.get_health()?;
        let sample_rate = self.get_samplerate()?;
        trace!("Device status: {} health {}", info, health.status);
        Ok(DeviceStatus {
            info,
            health,
            sample_rate,
        })
    }

    /// Sets the motor's PWM duty cycle through the accessory board.
    ///
    /// Values above 1023 are clamped. The board never answers.
    pub fn set_pwm(&mut self, pwm: u16) -> Result<()> {
        let pwm = pwm.min(RPLIDAR_MAX_MOTOR_PWM);
        trace!("Setting motor PWM to {}", pwm);
        let mut payload = [0; 2];
        LittleEndian::write_u16(&mut payload, pwm);
        self.send(Opcode::SetPwm, &payload)
    }

    /// Sends `pwm` as many times as configured and returns how many sends failed.
    ///
    /// A fatal error aborts the repetitions and is returned as is.
    fn repeat_pwm(&mut self, pwm: u16) -> Result<usize> {
        let repeats = self.config.pwm_repeats;
        let mut failed = 0;
        for n in 1..=repeats {
            match self.set_pwm(pwm) {
                Ok(()) => {}
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!("PWM command {}/{} failed: {}", n, repeats, e);
                    failed += 1;
                }
            }
        }
        Ok(failed)
    }

    /// Spins the motor up with the configured PWM value.
    ///
    /// Recoverable failures of individual PWM commands are logged and otherwise
    /// ignored. A dead command channel is still reported.
    pub fn start_motor(&mut self) -> Result<()> {
        let pwm = self.config.motor_pwm;
        trace!("Starting motor with PWM {}", pwm);
        let failed = self.repeat_pwm(pwm)?;
        if failed > 0 {
            warn!(
                "{} of {} PWM commands failed while starting the motor",
                failed, self.config.pwm_repeats
            );
        }
        Ok(())
    }

    /// Stops the motor by setting the PWM to 0.
    ///
    /// Every repetition is attempted after a recoverable failure, and
    /// `Error::MotorCommandFailed` is returned if any of them failed. A dead
    /// command channel aborts at once with its fatal error.
    pub fn stop_motor(&mut self) -> Result<()> {
        trace!("Stopping motor");
        let attempts = self.config.pwm_repeats;
        match self.repeat_pwm(0)? {
            0 => Ok(()),
            failed => {
                error!("{} of {} motor stop commands failed", failed, attempts);
                Err(Error::MotorCommandFailed { failed, attempts })
            }
        }
    }

    /// Requests a legacy express scan and checks the descriptor that precedes the
    /// packet stream.
    ///
    /// The packets themselves are read by a [`ScanAssembler`]; most callers want
    /// [`start_scanning`](CommandClient::start_scanning) instead.
    pub fn start_express_scan(&mut self) -> Result<()> {
        trace!("Starting express scan");
        self.send(Opcode::ExpressScan, &RPLIDAR_PAYLOAD_EXPRESS_SCAN)?;
        let descriptor = self.read_descriptor(self.config.timeout)?;
        if descriptor.len != EXPRESS_PACKET_SIZE {
            error!(
                "Express scan descriptor declares {} byte packets, expected {}",
                descriptor.len, EXPRESS_PACKET_SIZE
            );
            return Err(Error::UnexpectedDescriptor {
                expected: EXPRESS_PACKET_SIZE,
                received: descriptor.len,
            });
        }
        if descriptor.data_type != RPLIDAR_ANS_TYPE_MEASUREMENT_CAPSULED {
            warn!(
                "Express scan descriptor has answer type {:02X}",
                descriptor.data_type
            );
        }
        trace!("Express scan started ({:?})", descriptor.send_mode);
        Ok(())
    }

    /// Sends the stop command, halting any ongoing measurement. Nothing is read back.
    pub fn stop_scan(&mut self) -> Result<()> {
        trace!("Sending STOP command");
        self.send(Opcode::Stop, &[])
    }

    /// Starts an express scan and returns the session that reads its rotations.
    pub fn start_scanning(&mut self) -> Result<ScanSession<'_, C>> {
        self.start_express_scan()?;
        let assembler = ScanAssembler::with_config(&self.config);
        Ok(ScanSession {
            client: self,
            assembler,
        })
    }
}

/// A running express scan.
///
/// Holds the client for as long as packets are streaming. Call [`stop`](ScanSession::stop)
/// to end the scan and get the client back; dropping the session leaves the device
/// streaming.
#[derive(Debug)]
pub struct ScanSession<'a, C: ByteChannel> {
    client: &'a mut CommandClient<C>,
    assembler: ScanAssembler,
}

impl<'a, C: ByteChannel> ScanSession<'a, C> {
    /// Blocks until the next full rotation is available.
    ///
    /// Timeouts are returned as errors; calling again resynchronizes and continues
    /// the rotation in progress.
    pub fn next_full_scan(&mut self) -> Result<FullScan> {
        self.assembler.next_full_scan(&mut self.client.channel)
    }

    pub fn stats(&self) -> &ScanStats {
        self.assembler.stats()
    }

    pub fn state(&self) -> AssemblerState {
        self.assembler.state()
    }

    /// Sends the stop command and ends the session.
    pub fn stop(self) -> Result<()> {
        trace!(
            "Stopping scan after {} rotations",
            self.assembler.stats().scans_completed
        );
        self.client.stop_scan()
    }
}
