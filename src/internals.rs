use std::time::Duration;

/// Default timeout duration for waiting for responses from the RPLIDAR.
pub const RPLIDAR_DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

/// Default upper bound on the measurements collected for one rotation.
pub const RPLIDAR_DEFAULT_MAX_SCAN_LEN: usize = 8192;

/// Default PWM value used when starting the motor with `start_motor()`.
pub const RPLIDAR_DEFAULT_MOTOR_PWM: u16 = 660;

/// How many times motor PWM commands are repeated. The accessory board never
/// acknowledges them.
pub const RPLIDAR_DEFAULT_PWM_REPEATS: usize = 5;

/// Transmissions attempted for one request before the link is declared dead.
pub const RPLIDAR_DEFAULT_SEND_ATTEMPTS: usize = 5;
