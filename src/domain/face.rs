//! Face metrics
//!
//! Turns one set of normalized face-mesh landmarks (478 points, x/y in
//! image-relative units, z relative depth) into the channel values of a
//! [`SensorFrame`]. The landmark detector itself lives outside this crate.

use crate::domain::models::SensorFrame;
use serde::Deserialize;

#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
pub struct Landmark {
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub z: f64,
}

/// Mesh indices used by the measurements
mod idx {
    pub const NOSE_TIP: usize = 1;
    pub const FOREHEAD: usize = 10;
    pub const UPPER_LIP: usize = 13;
    pub const LOWER_LIP: usize = 14;
    pub const RIGHT_EYE_OUTER: usize = 33;
    pub const MOUTH_LEFT: usize = 61;
    pub const RIGHT_EYE_INNER: usize = 133;
    pub const RIGHT_EYE_BOTTOM: usize = 145;
    pub const CHIN: usize = 152;
    pub const RIGHT_EYE_TOP: usize = 159;
    pub const LEFT_EYE_OUTER: usize = 263;
    pub const MOUTH_RIGHT: usize = 291;
    pub const LEFT_EYE_INNER: usize = 362;
    pub const LEFT_EYE_BOTTOM: usize = 374;
    pub const LEFT_EYE_TOP: usize = 386;
}

/// Smallest landmark set that covers every index above
pub const MIN_LANDMARKS: usize = idx::LEFT_EYE_TOP + 1;

/// Round half up, matching the producer the firmware was tuned against.
fn round_half_up(v: f64) -> i32 {
    (v + 0.5).floor() as i32
}

/// A zero-width ratio is infinite and saturates at `max`; `0 / 0` is NaN and
/// lands on 0 through the float-to-int cast.
fn scaled(v: f64, scale: f64, max: i32) -> i32 {
    round_half_up(v * scale).clamp(0, max)
}

fn eye_openness(top: Landmark, bottom: Landmark, inner: Landmark, outer: Landmark) -> i32 {
    let height = (top.y - bottom.y).abs();
    let width = (inner.x - outer.x).abs();
    scaled(height / width, 100.0, 99)
}

/// Compute a full frame from one face. Returns `None` when the mesh is too
/// short to contain all measured points.
pub fn measure(landmarks: &[Landmark]) -> Option<SensorFrame> {
    if landmarks.len() < MIN_LANDMARKS {
        return None;
    }
    let lm = |i: usize| landmarks[i];

    let nose = lm(idx::NOSE_TIP);
    let right_eye = lm(idx::RIGHT_EYE_OUTER);
    let left_eye = lm(idx::LEFT_EYE_OUTER);

    let face_distance = round_half_up(100.0 + nose.z * 500.0).clamp(0, 180);
    let face_yaw = scaled(right_eye.z - left_eye.z + 0.12, 440.0, 99);
    let face_pitch = scaled(lm(idx::FOREHEAD).z - lm(idx::CHIN).z + 0.2, 275.0, 99);
    let face_roll = scaled(right_eye.y - left_eye.y + 0.2, 27.0, 9);

    let mouth_openness = scaled((lm(idx::LOWER_LIP).y - lm(idx::UPPER_LIP).y).abs(), 1500.0, 99);

    let right_eye_openness = eye_openness(
        lm(idx::RIGHT_EYE_TOP),
        lm(idx::RIGHT_EYE_BOTTOM),
        lm(idx::RIGHT_EYE_INNER),
        right_eye,
    );
    let left_eye_openness = eye_openness(
        lm(idx::LEFT_EYE_TOP),
        lm(idx::LEFT_EYE_BOTTOM),
        lm(idx::LEFT_EYE_INNER),
        left_eye,
    );

    // Mouth width relative to eye span, so distance to the camera cancels out
    let mouth_width = (lm(idx::MOUTH_RIGHT).x - lm(idx::MOUTH_LEFT).x).abs();
    let face_width = (left_eye.x - right_eye.x).abs();
    let smile = scaled(mouth_width / face_width - 0.35, 30.0, 9);

    Some(SensorFrame {
        face_visible: 1,
        face_x: round_half_up(nose.x * 100.0),
        face_y: round_half_up(nose.y * 100.0),
        face_distance,
        face_yaw,
        face_pitch,
        mouth_openness,
        left_eye_openness,
        right_eye_openness,
        face_roll,
        smile,
    })
}

/// Keeps the last measured frame so a lost face only clears `face_visible`.
#[derive(Debug, Default)]
pub struct FaceTracker {
    last: SensorFrame,
}

impl FaceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one detector result. `None` means no face in view.
    pub fn update(&mut self, landmarks: Option<&[Landmark]>) -> Option<SensorFrame> {
        match landmarks {
            Some(points) => {
                self.last = measure(points)?;
            }
            None => {
                self.last.face_visible = 0;
            }
        }
        Some(self.last)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn neutral_face() -> Vec<Landmark> {
        let mut points = vec![Landmark::default(); 478];
        points[idx::NOSE_TIP] = Landmark { x: 0.5, y: 0.45, z: -0.04 };
        points[idx::RIGHT_EYE_OUTER] = Landmark { x: 0.40, y: 0.40, z: 0.0 };
        points[idx::LEFT_EYE_OUTER] = Landmark { x: 0.60, y: 0.40, z: 0.0 };
        points[idx::RIGHT_EYE_INNER] = Landmark { x: 0.46, y: 0.40, z: 0.0 };
        points[idx::LEFT_EYE_INNER] = Landmark { x: 0.54, y: 0.40, z: 0.0 };
        points[idx::RIGHT_EYE_TOP] = Landmark { x: 0.43, y: 0.39, z: 0.0 };
        points[idx::RIGHT_EYE_BOTTOM] = Landmark { x: 0.43, y: 0.408, z: 0.0 };
        points[idx::LEFT_EYE_TOP] = Landmark { x: 0.57, y: 0.39, z: 0.0 };
        points[idx::LEFT_EYE_BOTTOM] = Landmark { x: 0.57, y: 0.402, z: 0.0 };
        points[idx::FOREHEAD] = Landmark { x: 0.5, y: 0.2, z: 0.0 };
        points[idx::CHIN] = Landmark { x: 0.5, y: 0.7, z: 0.0 };
        points[idx::UPPER_LIP] = Landmark { x: 0.5, y: 0.6, z: 0.0 };
        points[idx::LOWER_LIP] = Landmark { x: 0.5, y: 0.62, z: 0.0 };
        points[idx::MOUTH_LEFT] = Landmark { x: 0.45, y: 0.61, z: 0.0 };
        points[idx::MOUTH_RIGHT] = Landmark { x: 0.55, y: 0.61, z: 0.0 };
        points
    }

    #[test]
    fn neutral_face_measurements() {
        let frame = measure(&neutral_face()).unwrap();
        assert_eq!(frame.face_visible, 1);
        assert_eq!(frame.face_x, 50);
        assert_eq!(frame.face_y, 45);
        // 100 - 0.04 * 500
        assert_eq!(frame.face_distance, 80);
        // (0 + 0.12) * 440 = 52.8
        assert_eq!(frame.face_yaw, 53);
        // 0.2 * 275 = 55
        assert_eq!(frame.face_pitch, 55);
        // 0.2 * 27 = 5.4
        assert_eq!(frame.face_roll, 5);
        // 0.02 * 1500
        assert_eq!(frame.mouth_openness, 30);
        // 0.018 / 0.06
        assert_eq!(frame.right_eye_openness, 30);
        // 0.012 / 0.06
        assert_eq!(frame.left_eye_openness, 20);
        // (0.1 / 0.2 - 0.35) * 30 = 4.5
        assert_eq!(frame.smile, 5);
    }

    #[test]
    fn channels_saturate_at_their_ranges() {
        let mut points = neutral_face();
        points[idx::RIGHT_EYE_OUTER].z = 1.0;
        points[idx::FOREHEAD].z = -1.0;
        points[idx::LOWER_LIP].y = 0.9;
        points[idx::RIGHT_EYE_OUTER].y = 0.9;
        let frame = measure(&points).unwrap();
        assert_eq!(frame.face_yaw, 99);
        assert_eq!(frame.face_pitch, 0);
        assert_eq!(frame.mouth_openness, 99);
        assert_eq!(frame.face_roll, 9);
    }

    #[test]
    fn zero_width_ratios_saturate() {
        let mut points = neutral_face();
        points[idx::RIGHT_EYE_INNER].x = points[idx::RIGHT_EYE_OUTER].x;
        points[idx::LEFT_EYE_OUTER].x = points[idx::RIGHT_EYE_OUTER].x;
        let frame = measure(&points).unwrap();
        assert_eq!(frame.right_eye_openness, 99);
        assert_eq!(frame.smile, 9);
    }

    #[test]
    fn collapsed_eye_reads_closed() {
        let mut points = neutral_face();
        points[idx::LEFT_EYE_INNER].x = points[idx::LEFT_EYE_OUTER].x;
        points[idx::LEFT_EYE_BOTTOM].y = points[idx::LEFT_EYE_TOP].y;
        assert_eq!(measure(&points).unwrap().left_eye_openness, 0);
    }

    #[test]
    fn short_mesh_is_rejected() {
        assert!(measure(&vec![Landmark::default(); 100]).is_none());
    }

    #[test]
    fn lost_face_keeps_last_values() {
        let mut tracker = FaceTracker::new();
        let seen = tracker.update(Some(&neutral_face())).unwrap();
        let lost = tracker.update(None).unwrap();
        assert_eq!(lost.face_visible, 0);
        assert_eq!(lost.face_x, seen.face_x);
        assert_eq!(lost.smile, seen.smile);
    }
}
