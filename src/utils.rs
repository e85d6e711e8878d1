/// Normalizes an angle in degrees into `[0, 360)`.
///
/// Works for negative inputs too, which happens when a cell's angle correction
/// pushes a measurement just below 0°.
#[inline]
pub fn wrap_360(angle: f32) -> f32 {
    let wrapped = angle.rem_euclid(360.0);
    // rem_euclid can round up to exactly 360.0 for tiny negative inputs
    if wrapped >= 360.0 {
        0.0
    } else {
        wrapped
    }
}

/// Angle travelled from `from` to `to` in the direction of rotation, in `[0, 360)`.
///
/// # Arguments
///
/// * `from` - start angle of the current packet, in degrees.
/// * `to` - start angle of the following packet, in degrees.
#[inline]
pub fn angle_diff(from: f32, to: f32) -> f32 {
    if to >= from {
        to - from
    } else {
        360.0 + to - from
    }
}
