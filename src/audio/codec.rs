//! # Sample Codec
//!
//! Converts between normalized float samples (the engine's representation,
//! range [-1.0, 1.0]) and the bytes put on the wire.
//!
//! ## Formats:
//! - **Int16**: 16-bit signed little-endian PCM. Scaling is asymmetric so that
//!   both full-scale ends are reachable: negatives use 0x8000, positives 0x7fff.
//! - **Float32**: raw native-endian f32 storage, passed through untouched. Used
//!   when both ends live in the same process, so every bit must survive.

use crate::error::{BridgeError, BridgeResult};
use byteorder::{ByteOrder, LittleEndian};

const NEGATIVE_SCALE: f32 = 0x8000 as f32;
const POSITIVE_SCALE: f32 = 0x7fff as f32;

/// Wire representation of a sample buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleFormat {
    Int16,
    Float32,
}

impl SampleFormat {
    /// Bytes per sample on the wire.
    pub fn sample_width(&self) -> usize {
        match self {
            SampleFormat::Int16 => 2,
            SampleFormat::Float32 => 4,
        }
    }

    /// Encode float samples into wire bytes.
    pub fn encode(&self, samples: &[f32]) -> Vec<u8> {
        match self {
            SampleFormat::Int16 => encode_pcm16(samples),
            SampleFormat::Float32 => bytemuck::cast_slice::<f32, u8>(samples).to_vec(),
        }
    }

    /// Decode wire bytes back into float samples.
    ///
    /// Fails with [`BridgeError::MalformedBuffer`] when the byte length is not
    /// a whole number of samples.
    pub fn decode(&self, bytes: &[u8]) -> BridgeResult<Vec<f32>> {
        check_width(bytes, self.sample_width())?;
        match self {
            SampleFormat::Int16 => decode_pcm16(bytes),
            SampleFormat::Float32 => Ok(bytes
                .chunks_exact(4)
                .map(bytemuck::pod_read_unaligned::<f32>)
                .collect()),
        }
    }
}

/// Encode float samples as 16-bit signed little-endian PCM.
///
/// Each sample is clamped to [-1, 1] and truncated toward zero after scaling.
pub fn encode_pcm16(samples: &[f32]) -> Vec<u8> {
    let pcm = to_pcm16(samples);
    let mut bytes = vec![0u8; pcm.len() * 2];
    LittleEndian::write_i16_into(&pcm, &mut bytes);
    bytes
}

/// Scale float samples to 16-bit integers without packing them.
pub fn to_pcm16(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|&sample| {
            let s = sample.clamp(-1.0, 1.0);
            let scaled = if s < 0.0 { s * NEGATIVE_SCALE } else { s * POSITIVE_SCALE };
            scaled as i16
        })
        .collect()
}

/// Inverse of [`to_pcm16`] for a single sample.
pub fn from_pcm16(x: i16) -> f32 {
    if x < 0 {
        // -(0x10000 - raw) / 0x8000 with raw the unsigned bit pattern
        -((0x10000 - (x as u16) as i32) as f32) / NEGATIVE_SCALE
    } else {
        x as f32 / POSITIVE_SCALE
    }
}

/// Decode 16-bit signed little-endian PCM into float samples.
pub fn decode_pcm16(bytes: &[u8]) -> BridgeResult<Vec<f32>> {
    check_width(bytes, 2)?;

    let mut pcm = vec![0i16; bytes.len() / 2];
    LittleEndian::read_i16_into(bytes, &mut pcm);

    Ok(pcm.into_iter().map(from_pcm16).collect())
}

fn check_width(bytes: &[u8], sample_width: usize) -> BridgeResult<()> {
    if bytes.len() % sample_width != 0 {
        return Err(BridgeError::MalformedBuffer {
            len: bytes.len(),
            sample_width,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_scale_encoding() {
        let bytes = encode_pcm16(&[1.0, -1.0, 0.0, 2.0, -3.0]);
        let mut pcm = vec![0i16; 5];
        LittleEndian::read_i16_into(&bytes, &mut pcm);
        assert_eq!(pcm, vec![32767, -32768, 0, 32767, -32768]);
    }

    #[test]
    fn test_round_trip_within_one_step() {
        let mut s = -1.0f32;
        while s <= 1.0 {
            let decoded = decode_pcm16(&encode_pcm16(&[s])).unwrap();
            let diff = (decoded[0] - s).abs();
            // truncation loses under one step of the scale used on that side:
            // 1/32768 below zero, 1/32767 above
            let step = if s < 0.0 { 1.0 / 32768.0 } else { 1.0 / 32767.0 };
            assert!(diff <= step, "sample {} came back as {}", s, decoded[0]);
            s += 0.0137;
        }
    }

    #[test]
    fn test_negative_round_trip_within_quantization_step() {
        let step = 1.0 / 32768.0;
        for i in 0..=1000 {
            let s = -(i as f32) / 1000.0;
            let decoded = decode_pcm16(&encode_pcm16(&[s])).unwrap();
            assert!((decoded[0] - s).abs() <= step, "sample {} came back as {}", s, decoded[0]);
        }
    }

    #[test]
    fn test_extremes_decode_consistently() {
        let decoded = decode_pcm16(&encode_pcm16(&[-1.0, 1.0, 0.0])).unwrap();
        assert_eq!(decoded, vec![-1.0, 1.0, 0.0]);
    }

    #[test]
    fn test_odd_length_is_malformed() {
        let err = decode_pcm16(&[0u8; 7]).unwrap_err();
        assert_eq!(err, BridgeError::MalformedBuffer { len: 7, sample_width: 2 });
    }

    #[test]
    fn test_float32_passthrough_preserves_bits() {
        let samples = vec![0.123_456_79f32, -0.999_999, f32::MIN_POSITIVE, 1.5];
        let bytes = SampleFormat::Float32.encode(&samples);
        assert_eq!(bytes.len(), 16);

        let decoded = SampleFormat::Float32.decode(&bytes).unwrap();
        let original_bits: Vec<u32> = samples.iter().map(|s| s.to_bits()).collect();
        let decoded_bits: Vec<u32> = decoded.iter().map(|s| s.to_bits()).collect();
        assert_eq!(original_bits, decoded_bits);

        assert!(SampleFormat::Float32.decode(&bytes[..6]).is_err());
    }

    #[test]
    fn test_float32_decode_from_unaligned_bytes() {
        let samples = [0.5f32, -0.25, 0.125];
        let mut shifted = vec![0u8];
        shifted.extend_from_slice(&SampleFormat::Float32.encode(&samples));

        let decoded = SampleFormat::Float32.decode(&shifted[1..]).unwrap();
        assert_eq!(decoded, samples.to_vec());
    }
}
