use crate::base::{Error, Result};
use byteorder::{ByteOrder, LittleEndian};
use std::fmt;

/// Response type identifier for device information.
pub const RPLIDAR_ANS_TYPE_DEVINFO: u8 = 0x4;

/// Response type identifier for device health status.
pub const RPLIDAR_ANS_TYPE_DEVHEALTH: u8 = 0x6;

/// Response type identifier for the sampling periods.
pub const RPLIDAR_ANS_TYPE_SAMPLE_RATE: u8 = 0x15;

/// Response type identifier for capsuled (express) measurement data.
/// Added in firmware version 1.17.
pub const RPLIDAR_ANS_TYPE_MEASUREMENT_CAPSULED: u8 = 0x82;

// health status

/// Health status code indicating the LIDAR is operating correctly.
pub const RPLIDAR_HEALTH_STATUS_OK: u8 = 0;

/// Health status code indicating a non-critical warning. The LIDAR might still function.
pub const RPLIDAR_HEALTH_STATUS_WARNING: u8 = 1;

/// Health status code indicating a critical error. The LIDAR is likely non-operational.
pub const RPLIDAR_HEALTH_STATUS_ERROR: u8 = 2;

fn check_len(data: &[u8], expected: usize, what: &str) -> Result<()> {
    if data.len() != expected {
        return Err(Error::ProtocolError {
            description: format!(
                "invalid data size for {}: expected {}, got {}",
                what,
                expected,
                data.len()
            ),
        });
    }
    Ok(())
}

/// Health state reported by the device.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum HealthStatus {
    /// The device reports it is operating correctly.
    Ok,
    /// The device reports a warning condition and may deteriorate.
    Warning,
    /// The device reports a critical error and is likely not operational.
    Error,
    /// A status code this driver does not know.
    Unknown(u8),
}

impl From<u8> for HealthStatus {
    fn from(code: u8) -> HealthStatus {
        match code {
            RPLIDAR_HEALTH_STATUS_OK => HealthStatus::Ok,
            RPLIDAR_HEALTH_STATUS_WARNING => HealthStatus::Warning,
            RPLIDAR_HEALTH_STATUS_ERROR => HealthStatus::Error,
            other => HealthStatus::Unknown(other),
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthStatus::Ok => write!(f, "OK"),
            HealthStatus::Warning => write!(f, "WARNING"),
            HealthStatus::Error => write!(f, "ERROR"),
            HealthStatus::Unknown(code) => write!(f, "UNKNOWN({})", code),
        }
    }
}

/// Device health status received from the RPLIDAR.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct HealthData {
    /// Health state.
    pub status: HealthStatus,
    /// Error code associated with the status (meaningful for Warning or Error).
    pub error_code: u16,
}

impl HealthData {
    /// Size of the health response payload.
    pub const SIZE: usize = 3;

    /// Parses the raw health response.
    pub fn parse(data: &[u8]) -> Result<HealthData> {
        check_len(data, Self::SIZE, "HealthData")?;
        Ok(HealthData {
            status: HealthStatus::from(data[0]),
            error_code: LittleEndian::read_u16(&data[1..3]),
        })
    }
}

/// Device information received from the RPLIDAR.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct InfoData {
    /// Model ID: major model in the high nibble, sub model in the low nibble.
    pub model: u8,
    /// Firmware minor version.
    pub firmware_minor: u8,
    /// Firmware major version.
    pub firmware_major: u8,
    /// Hardware version.
    pub hardware: u8,
    /// 16-byte unique serial number.
    pub serial_number: [u8; 16],
}

impl InfoData {
    /// Size of the device info response payload.
    pub const SIZE: usize = 20;

    /// Parses the raw device info response.
    pub fn parse(data: &[u8]) -> Result<InfoData> {
        check_len(data, Self::SIZE, "InfoData")?;
        let mut serial_number = [0u8; 16];
        serial_number.copy_from_slice(&data[4..20]);
        Ok(InfoData {
            model: data[0],
            firmware_minor: data[1],
            firmware_major: data[2],
            hardware: data[3],
            serial_number,
        })
    }

    /// Model name such as `A2M8`.
    pub fn model_name(&self) -> String {
        format!("A{}M{}", self.model >> 4, self.model & 0x0F)
    }

    /// Firmware version as `major.minor`, minor zero padded (`1.29`, `1.05`).
    pub fn firmware_version(&self) -> String {
        format!("{}.{:02}", self.firmware_major, self.firmware_minor)
    }

    /// Serial number as an uppercase hex string.
    pub fn serial_number_hex(&self) -> String {
        self.serial_number
            .iter()
            .map(|b| format!("{:02X}", b))
            .collect()
    }
}

impl fmt::Display for InfoData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "RPLidar {} (firmware {}, hardware {}, S/N {})",
            self.model_name(),
            self.firmware_version(),
            self.hardware,
            self.serial_number_hex()
        )
    }
}

/// Sampling periods of the two scan modes, in microseconds per sample.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SampleRateData {
    /// Period of a standard scan sample.
    pub standard_us: u16,
    /// Period of an express scan sample.
    pub express_us: u16,
}

impl SampleRateData {
    /// Size of the sample rate response payload.
    pub const SIZE: usize = 4;

    /// Parses the raw sample rate response.
    pub fn parse(data: &[u8]) -> Result<SampleRateData> {
        check_len(data, Self::SIZE, "SampleRateData")?;
        Ok(SampleRateData {
            standard_us: LittleEndian::read_u16(&data[0..2]),
            express_us: LittleEndian::read_u16(&data[2..4]),
        })
    }
}

/// Everything the device reports about itself at start-up.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct DeviceStatus {
    pub info: InfoData,
    pub health: HealthData,
    pub sample_rate: SampleRateData,
}
