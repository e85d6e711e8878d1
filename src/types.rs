use crate::internals::*;
use std::time::Duration;

/// A single polar measurement.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Measurement {
    /// Angle in degrees, in `[0, 360)`, relative to the scanner's zero direction.
    pub angle: f32,
    /// Distance in millimeters. 0 means the laser got no return.
    pub distance: u16,
}

impl Measurement {
    /// Returns `true` if the device reported a return for this angle.
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.distance != 0
    }
}

/// The measurements of one complete rotation, in the order they were produced.
///
/// Angles increase monotonically from the first measurement to the last one.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FullScan {
    measurements: Vec<Measurement>,
}

impl FullScan {
    pub(crate) fn push(&mut self, measurement: Measurement) {
        self.measurements.push(measurement);
    }

    /// Number of measurements in the scan.
    pub fn len(&self) -> usize {
        self.measurements.len()
    }

    /// Returns `true` if the scan holds no measurement.
    pub fn is_empty(&self) -> bool {
        self.measurements.is_empty()
    }

    /// All measurements, including those without a return.
    pub fn measurements(&self) -> &[Measurement] {
        &self.measurements
    }

    /// Iterates over all measurements.
    pub fn iter(&self) -> std::slice::Iter<'_, Measurement> {
        self.measurements.iter()
    }

    /// Iterates over measurements that have a return.
    pub fn valid(&self) -> impl Iterator<Item = &Measurement> {
        self.measurements.iter().filter(|m| m.is_valid())
    }

    /// Consumes the scan and returns its measurements.
    pub fn into_measurements(self) -> Vec<Measurement> {
        self.measurements
    }
}

impl<'a> IntoIterator for &'a FullScan {
    type Item = &'a Measurement;
    type IntoIter = std::slice::Iter<'a, Measurement>;

    fn into_iter(self) -> Self::IntoIter {
        self.measurements.iter()
    }
}

/// Tunables of the command client and the scan assembler.
#[derive(Debug, Clone, PartialEq)]
pub struct DriverConfig {
    /// Deadline for each response or packet read.
    pub timeout: Duration,

    /// Duty cycle applied by `start_motor()` (0-1023).
    pub motor_pwm: u16,

    /// How many PWM commands `start_motor()` and `stop_motor()` send.
    pub pwm_repeats: usize,

    /// Transmissions attempted per request before giving up on the link.
    pub send_attempts: usize,

    /// A rotation is handed over once it holds this many measurements,
    /// even if no turn boundary was seen.
    pub max_scan_len: usize,
}

impl DriverConfig {
    /// Overrides the read deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> DriverConfig {
        self.timeout = timeout;
        self
    }

    /// Overrides the duty cycle used to start the motor.
    pub fn with_motor_pwm(mut self, motor_pwm: u16) -> DriverConfig {
        self.motor_pwm = motor_pwm;
        self
    }

    /// Overrides the number of repeated PWM commands.
    pub fn with_pwm_repeats(mut self, pwm_repeats: usize) -> DriverConfig {
        self.pwm_repeats = pwm_repeats;
        self
    }

    /// Overrides the number of transmission attempts per request.
    pub fn with_send_attempts(mut self, send_attempts: usize) -> DriverConfig {
        self.send_attempts = send_attempts.max(1);
        self
    }

    /// Overrides the measurement cap of a single rotation.
    pub fn with_max_scan_len(mut self, max_scan_len: usize) -> DriverConfig {
        self.max_scan_len = max_scan_len.max(1);
        self
    }
}

impl Default for DriverConfig {
    fn default() -> DriverConfig {
        DriverConfig {
            timeout: RPLIDAR_DEFAULT_TIMEOUT,
            motor_pwm: RPLIDAR_DEFAULT_MOTOR_PWM,
            pwm_repeats: RPLIDAR_DEFAULT_PWM_REPEATS,
            send_attempts: RPLIDAR_DEFAULT_SEND_ATTEMPTS,
            max_scan_len: RPLIDAR_DEFAULT_MAX_SCAN_LEN,
        }
    }
}
