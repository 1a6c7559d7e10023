//! Frame input from the vision process.
//!
//! Reads newline-delimited JSON. Each line is either a full frame
//! (`{"face_x": 50, ...}`) or raw landmarks
//! (`{"landmarks": [{"x":..,"y":..,"z":..}, ...]}` or `[x, y, z]` triples,
//! `null` when no face is in view). The newest frame is published on a watch channel.

use crate::domain::face::{FaceTracker, Landmark, MIN_LANDMARKS};
use crate::domain::models::SensorFrame;
use crate::infrastructure::bluetooth::error::TransportError;
use serde::Deserialize;
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tracing::{info, warn};

/// Parse one input line. Blank lines yield `Ok(None)`.
pub fn parse_line(
    tracker: &mut FaceTracker,
    line: &str,
) -> Result<Option<SensorFrame>, TransportError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }

    let decode = |e: serde_json::Error| TransportError::Decode(e.to_string());
    let value: Value = serde_json::from_str(line).map_err(decode)?;

    let frame = match value.get("landmarks") {
        Some(Value::Null) => tracker.update(None),
        Some(points) => {
            let points = Vec::<Landmark>::deserialize(points).map_err(decode)?;
            tracker.update(Some(&points))
        }
        None => Some(SensorFrame::deserialize(&value).map_err(decode)?),
    };

    frame.map(Some).ok_or_else(|| {
        TransportError::Decode(format!("need at least {} landmarks", MIN_LANDMARKS))
    })
}

/// Publish frames from `reader` until EOF. Malformed lines are skipped.
pub async fn pump_lines<R>(reader: R, frames: &watch::Sender<SensorFrame>) -> std::io::Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    let mut tracker = FaceTracker::new();
    let mut lines = reader.lines();
    let mut published = 0;

    while let Some(line) = lines.next_line().await? {
        match parse_line(&mut tracker, &line) {
            Ok(Some(frame)) => {
                frames.send_replace(frame);
                published += 1;
            }
            Ok(None) => {}
            Err(e) => warn!("Skipping input line: {}", e),
        }
    }
    Ok(published)
}

pub async fn run_stdin(frames: watch::Sender<SensorFrame>) -> anyhow::Result<()> {
    info!("Reading frames from stdin");
    let published = pump_lines(BufReader::new(tokio::io::stdin()), &frames).await?;
    info!("Frame input closed after {} frames", published);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_lines_pass_through() {
        let mut tracker = FaceTracker::new();
        let frame = parse_line(&mut tracker, r#"{"face_visible":1,"face_x":12,"smile":4}"#)
            .unwrap()
            .unwrap();
        assert_eq!(frame.face_x, 12);
        assert_eq!(frame.smile, 4);
    }

    #[test]
    fn null_landmarks_clear_visibility() {
        let mut tracker = FaceTracker::new();
        let frame = parse_line(&mut tracker, r#"{"landmarks": null}"#).unwrap().unwrap();
        assert_eq!(frame.face_visible, 0);
    }

    #[test]
    fn short_landmark_list_is_a_decode_error() {
        let mut tracker = FaceTracker::new();
        let line = r#"{"landmarks": [{"x":0.5,"y":0.5,"z":0.0}]}"#;
        assert!(matches!(
            parse_line(&mut tracker, line),
            Err(TransportError::Decode(_))
        ));
    }

    #[test]
    fn full_landmark_list_is_measured() {
        let mut tracker = FaceTracker::new();
        let points: Vec<Value> = (0..478)
            .map(|_| serde_json::json!({"x": 0.5, "y": 0.5, "z": 0.0}))
            .collect();
        let line = serde_json::json!({ "landmarks": points }).to_string();
        let frame = parse_line(&mut tracker, &line).unwrap().unwrap();
        assert_eq!(frame.face_visible, 1);
        assert_eq!(frame.face_x, 50);
    }

    #[test]
    fn landmark_triples_are_accepted() {
        let mut tracker = FaceTracker::new();
        let points: Vec<Value> = (0..478).map(|_| serde_json::json!([0.5, 0.5, 0.0])).collect();
        let line = serde_json::json!({ "landmarks": points }).to_string();
        let frame = parse_line(&mut tracker, &line).unwrap().unwrap();
        assert_eq!(frame.face_y, 50);
    }

    #[tokio::test]
    async fn pump_skips_bad_lines() {
        let input: &[u8] = b"{\"face_x\":1}\nnot json\n\n{\"face_x\":7}\n";
        let (tx, rx) = watch::channel(SensorFrame::default());

        let published = pump_lines(input, &tx).await.unwrap();
        assert_eq!(published, 2);
        assert_eq!(rx.borrow().face_x, 7);
    }
}
