//! Small numeric helpers shared by the Tracer and Movement Controller.

use cgmath::Vector3;

pub const PI2: f32 = std::f32::consts::PI * 2.0;

/// Normalizes an angle in radians to `[0, 2*PI)`.
pub fn normalize_angle(angle: f32) -> f32 {
    let a = angle % PI2;
    if a < 0.0 {
        a + PI2
    } else {
        a
    }
}

/// Camera yaw/pitch, in radians, always kept normalized to `[0, 2*PI)`.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Angles {
    pub yaw: f32,
    pub pitch: f32,
}

impl Angles {
    pub fn zero() -> Angles {
        Angles { yaw: 0.0, pitch: 0.0 }
    }

    pub fn new(yaw: f32, pitch: f32) -> Angles {
        Angles {
            yaw: normalize_angle(yaw),
            pitch: normalize_angle(pitch),
        }
    }
}

/// Rotates a local `{forward, strafe, up}` wish vector into map space, matching the sign
/// convention used by the movement controller's "rotate input" step: rotations are applied as
/// `2*PI - angle`, and pitch is ignored unless `apply_pitch` is set (noclip only).
pub fn rotate_wish_vector(local: Vector3<f32>, angles: Angles, apply_pitch: bool) -> Vector3<f32> {
    let yaw = PI2 - angles.yaw;
    let (yaw_sin, yaw_cos) = (yaw.sin(), yaw.cos());

    let (pitch_sin, pitch_cos) = if apply_pitch {
        let pitch = PI2 - angles.pitch;
        (pitch.sin(), pitch.cos())
    } else {
        (0.0, 1.0)
    };

    // Forward/strafe live in the horizontal plane rotated by yaw; pitch tilts forward motion
    // into the vertical axis when applied (noclip flying).
    let forward_xy = Vector3::new(yaw_cos, yaw_sin, 0.0);
    let strafe_xy = Vector3::new(-yaw_sin, yaw_cos, 0.0);

    let forward = Vector3::new(
        forward_xy.x * pitch_cos,
        forward_xy.y * pitch_cos,
        -pitch_sin,
    );

    forward * local.x + strafe_xy * local.y + Vector3::new(0.0, 0.0, local.z)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_angle_wraps_into_range() {
        assert!((normalize_angle(PI2 + 0.5) - 0.5).abs() < 1e-5);
        assert!((normalize_angle(-0.5) - (PI2 - 0.5)).abs() < 1e-5);
        assert!(normalize_angle(0.0) >= 0.0);
    }

    #[test]
    fn zero_angles_forward_is_positive_x() {
        let v = rotate_wish_vector(Vector3::new(1.0, 0.0, 0.0), Angles::zero(), false);
        assert!((v.x - 1.0).abs() < 1e-4);
        assert!(v.y.abs() < 1e-4);
        assert!(v.z.abs() < 1e-4);
    }
}
