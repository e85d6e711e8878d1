/// Request opcodes understood by the device.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    /// Stop the measurement process. No response.
    Stop = 0x25,

    /// Request device information (model, firmware, hardware, serial number).
    GetInfo = 0x50,

    /// Request the device's health status.
    GetHealth = 0x52,

    /// Request the sampling periods of standard and express scans.
    GetSampleRate = 0x59,

    /// Start an express scan. Requires a 5-byte payload.
    /// Added in firmware version 1.17.
    ExpressScan = 0x82,

    /// Set the motor PWM duty cycle via the accessory board (A2 models).
    /// Requires a 2-byte payload containing the PWM value (u16 little-endian).
    SetPwm = 0xF0,
}

impl Opcode {
    /// The byte sent on the wire.
    #[inline]
    pub fn code(self) -> u8 {
        self as u8
    }
}

/// Payload of `Opcode::ExpressScan` selecting the legacy express mode:
/// work mode 0, no flags, no parameter.
pub const RPLIDAR_PAYLOAD_EXPRESS_SCAN: [u8; 5] = [0; 5];

/// Highest duty cycle accepted by `Opcode::SetPwm`.
pub const RPLIDAR_MAX_MOTOR_PWM: u16 = 1023;
