//! Binary sensor frames as sent on the device stream.
//!
//! ```text
//! offset  size  field
//! 0       2     magic 0xAA 0x55
//! 2       1     reserved
//! 3       1     packet type (0x01 ranging, 0x02 magnetic, 0x03 acoustic)
//! 4       16    scan id
//! 20      4     latitude  (i32 BE, degrees * 1e6)
//! 24      4     longitude (i32 BE, degrees * 1e6)
//! 28      4     altitude  (i32 BE, metres * 1e2)
//! 32      1     signal quality
//! 33      ..    payload
//! ```

use crate::interface::reading::SensorType;
use crate::prelude::{FusionError, FusionResult};
use uuid::Uuid;

pub const FRAME_MAGIC: [u8; 2] = [0xAA, 0x55];
pub const HEADER_LEN: usize = 33;

const SCAN_ID_OFFSET: usize = 4;
const METADATA_OFFSET: usize = 20;
const COORDINATE_SCALE: f64 = 1_000_000.0;
const ALTITUDE_SCALE: f64 = 100.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameMetadata {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
    pub signal_quality: u8,
}

/// A decoded frame before conditioning.
#[derive(Debug, Clone, PartialEq)]
pub struct RawFrame {
    pub scan_id: Uuid,
    pub sensor_type: SensorType,
    pub metadata: FrameMetadata,
    pub payload: Vec<u8>,
}

fn read_i32(bytes: &[u8], offset: usize) -> i32 {
    let mut word = [0u8; 4];
    word.copy_from_slice(&bytes[offset..offset + 4]);
    i32::from_be_bytes(word)
}

pub fn decode_frame(bytes: &[u8]) -> FusionResult<RawFrame> {
    if bytes.len() < HEADER_LEN {
        return Err(FusionError::MalformedFrame(format!(
            "frame of {} bytes is shorter than the {} byte header",
            bytes.len(),
            HEADER_LEN
        )));
    }
    if bytes[..2] != FRAME_MAGIC {
        return Err(FusionError::MalformedFrame(format!(
            "bad magic {:02X}{:02X}",
            bytes[0], bytes[1]
        )));
    }
    let sensor_type = SensorType::from_packet_type(bytes[3]).ok_or_else(|| {
        FusionError::MalformedFrame(format!("unknown packet type 0x{:02X}", bytes[3]))
    })?;

    let mut scan_id = [0u8; 16];
    scan_id.copy_from_slice(&bytes[SCAN_ID_OFFSET..SCAN_ID_OFFSET + 16]);

    let metadata = FrameMetadata {
        latitude: read_i32(bytes, METADATA_OFFSET) as f64 / COORDINATE_SCALE,
        longitude: read_i32(bytes, METADATA_OFFSET + 4) as f64 / COORDINATE_SCALE,
        altitude: read_i32(bytes, METADATA_OFFSET + 8) as f64 / ALTITUDE_SCALE,
        signal_quality: bytes[METADATA_OFFSET + 12],
    };

    Ok(RawFrame {
        scan_id: Uuid::from_bytes(scan_id),
        sensor_type,
        metadata,
        payload: bytes[HEADER_LEN..].to_vec(),
    })
}

pub fn encode_frame(frame: &RawFrame) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(HEADER_LEN + frame.payload.len());
    bytes.extend_from_slice(&FRAME_MAGIC);
    bytes.push(0);
    bytes.push(frame.sensor_type.packet_type());
    bytes.extend_from_slice(frame.scan_id.as_bytes());
    let scaled = |value: f64, scale: f64| (value * scale).round() as i32;
    bytes.extend_from_slice(&scaled(frame.metadata.latitude, COORDINATE_SCALE).to_be_bytes());
    bytes.extend_from_slice(&scaled(frame.metadata.longitude, COORDINATE_SCALE).to_be_bytes());
    bytes.extend_from_slice(&scaled(frame.metadata.altitude, ALTITUDE_SCALE).to_be_bytes());
    bytes.push(frame.metadata.signal_quality);
    bytes.extend_from_slice(&frame.payload);
    bytes
}

/// Packs samples as big-endian f32, the payload encoding of every sensor.
pub fn encode_samples(samples: &[f32]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_be_bytes()).collect()
}

pub fn decode_samples(payload: &[u8]) -> FusionResult<Vec<f32>> {
    if payload.is_empty() {
        return Err(FusionError::MalformedFrame("empty payload".into()));
    }
    if payload.len() % 4 != 0 {
        return Err(FusionError::MalformedFrame(format!(
            "payload length {} is not a multiple of 4",
            payload.len()
        )));
    }
    let samples: Vec<f32> = payload
        .chunks_exact(4)
        .map(|chunk| f32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect();
    if let Some(index) = samples.iter().position(|sample| !sample.is_finite()) {
        return Err(FusionError::MalformedFrame(format!(
            "sample {} is not finite",
            index
        )));
    }
    Ok(samples)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_frame() -> RawFrame {
        RawFrame {
            scan_id: Uuid::new_v4(),
            sensor_type: SensorType::Magnetic,
            metadata: FrameMetadata {
                latitude: 48.4647123,
                longitude: 35.0461987,
                altitude: 132.456,
                signal_quality: 200,
            },
            payload: encode_samples(&[1.0, -2.5, 3.25]),
        }
    }

    #[test]
    fn coordinates_survive_within_one_scaled_unit() {
        let frame = sample_frame();
        let decoded = decode_frame(&encode_frame(&frame)).unwrap();
        assert_eq!(decoded.scan_id, frame.scan_id);
        assert_eq!(decoded.sensor_type, SensorType::Magnetic);
        assert!((decoded.metadata.latitude - frame.metadata.latitude).abs() <= 1e-6);
        assert!((decoded.metadata.longitude - frame.metadata.longitude).abs() <= 1e-6);
        assert!((decoded.metadata.altitude - frame.metadata.altitude).abs() <= 1e-2);
        assert_eq!(decoded.metadata.signal_quality, 200);
        assert_eq!(decode_samples(&decoded.payload).unwrap(), vec![1.0, -2.5, 3.25]);
    }

    #[test]
    fn non_finite_samples_are_malformed() {
        for bad in [f32::NAN, f32::INFINITY, f32::NEG_INFINITY] {
            let payload = encode_samples(&[0.5, bad]);
            assert!(matches!(decode_samples(&payload), Err(FusionError::MalformedFrame(_))));
        }
    }

    #[test]
    fn southern_western_coordinates_keep_sign() {
        let mut frame = sample_frame();
        frame.metadata.latitude = -33.918861;
        frame.metadata.longitude = -70.654839;
        let decoded = decode_frame(&encode_frame(&frame)).unwrap();
        assert!((decoded.metadata.latitude + 33.918861).abs() <= 1e-6);
        assert!((decoded.metadata.longitude + 70.654839).abs() <= 1e-6);
    }

    #[test]
    fn rejects_wrong_magic() {
        let mut bytes = encode_frame(&sample_frame());
        bytes[0] = 0xAB;
        assert!(matches!(decode_frame(&bytes), Err(FusionError::MalformedFrame(_))));
    }

    #[test]
    fn rejects_short_buffer() {
        let bytes = encode_frame(&sample_frame());
        assert!(matches!(
            decode_frame(&bytes[..HEADER_LEN - 1]),
            Err(FusionError::MalformedFrame(_))
        ));
    }

    #[test]
    fn rejects_unknown_packet_type() {
        let mut bytes = encode_frame(&sample_frame());
        bytes[3] = 0x07;
        assert!(matches!(decode_frame(&bytes), Err(FusionError::MalformedFrame(_))));
    }

    #[test]
    fn misaligned_payload_is_malformed() {
        assert!(decode_samples(&[0, 1, 2]).is_err());
        assert!(decode_samples(&[]).is_err());
    }
}
