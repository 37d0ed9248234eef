//! PCM16 codec — float/int conversion and base64 media chunks.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};

use attune_core::error::{AttuneError, Result};

/// Capture sample rate (speech input, mono).
pub const INPUT_SAMPLE_RATE: u32 = 16_000;

/// Synthesis sample rate (model output, mono).
pub const OUTPUT_SAMPLE_RATE: u32 = 24_000;

/// MIME type carried by outbound capture chunks.
pub const INPUT_MIME_TYPE: &str = "audio/pcm;rate=16000";

/// A base64 PCM16 payload as it travels on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaChunk {
    pub mime_type: String,
    pub data: String,
}

impl MediaChunk {
    /// Encode a capture frame for transmission.
    pub fn from_samples(samples: &[f32]) -> Self {
        Self {
            mime_type: INPUT_MIME_TYPE.to_string(),
            data: encode_base64(&samples_to_pcm16(samples)),
        }
    }
}

/// Base64 for wire transport. Exact round-trip for arbitrary bytes.
pub fn encode_base64(bytes: &[u8]) -> String {
    BASE64.encode(bytes)
}

pub fn decode_base64(text: &str) -> Result<Vec<u8>> {
    BASE64
        .decode(text)
        .map_err(|e| AttuneError::Decode(format!("invalid base64: {e}")))
}

/// Convert float samples in [-1, 1] to little-endian PCM16 bytes.
///
/// Out-of-range input is clamped, never wrapped.
pub fn samples_to_pcm16(samples: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        let value = (sample * 32768.0).clamp(-32768.0, 32767.0) as i16;
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

/// Convert little-endian PCM16 bytes back to float samples.
///
/// An odd byte count means a truncated or corrupt payload and is rejected.
pub fn pcm16_to_samples(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % 2 != 0 {
        return Err(AttuneError::Decode(format!(
            "PCM16 payload has odd length {}",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(2)
        .map(|pair| f32::from(i16::from_le_bytes([pair[0], pair[1]])) / 32768.0)
        .collect())
}

/// De-interleave channel-major PCM16 bytes into per-channel float buffers.
///
/// Byte length must be a whole number of sample frames.
pub fn pcm16_to_channels(bytes: &[u8], channels: usize) -> Result<Vec<Vec<f32>>> {
    if channels == 0 {
        return Err(AttuneError::Decode("zero channels".into()));
    }
    if bytes.len() % (channels * 2) != 0 {
        return Err(AttuneError::Decode(format!(
            "PCM16 payload of {} bytes is not a whole number of {channels}-channel frames",
            bytes.len()
        )));
    }
    let interleaved = pcm16_to_samples(bytes)?;
    let frames = interleaved.len() / channels;
    let mut out: Vec<Vec<f32>> = (0..channels).map(|_| Vec::with_capacity(frames)).collect();
    for (i, sample) in interleaved.into_iter().enumerate() {
        out[i % channels].push(sample);
    }
    Ok(out)
}

/// Decode a base64 PCM16 payload to mono float samples.
pub fn decode_base64_pcm(data: &str) -> Result<Vec<f32>> {
    pcm16_to_samples(&decode_base64(data)?)
}

/// Linear-interpolation resample, used for bell and ambient assets whose
/// source rate differs from the output rate.
pub fn resample_linear(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if samples.is_empty() || from_rate == to_rate {
        return samples.to_vec();
    }
    let ratio = f64::from(from_rate) / f64::from(to_rate);
    let out_len = (samples.len() as f64 / ratio).floor() as usize;
    let mut out = Vec::with_capacity(out_len);
    for i in 0..out_len {
        let pos = i as f64 * ratio;
        let idx = pos as usize;
        let frac = (pos - idx as f64) as f32;
        let a = samples[idx];
        let b = samples.get(idx + 1).copied().unwrap_or(a);
        out.push(a + (b - a) * frac);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pcm16_clamps_out_of_range() {
        let bytes = samples_to_pcm16(&[0.0, 1.5, -1.5]);
        let samples = pcm16_to_samples(&bytes).unwrap();
        assert_eq!(samples[0], 0.0);
        assert!((samples[1] - 32767.0 / 32768.0).abs() < 1e-6);
        assert_eq!(samples[2], -1.0);
    }

    #[test]
    fn test_pcm16_round_trip() {
        let original = vec![0.0, 0.25, -0.5, 0.999];
        let decoded = pcm16_to_samples(&samples_to_pcm16(&original)).unwrap();
        for (a, b) in original.iter().zip(&decoded) {
            assert!((a - b).abs() < 1.0 / 32768.0);
        }
    }

    #[test]
    fn test_odd_length_rejected() {
        assert!(pcm16_to_samples(&[0x00, 0x01, 0x02]).is_err());
    }

    #[test]
    fn test_base64_round_trip_arbitrary_bytes() {
        let bytes: Vec<u8> = (0..=255).collect();
        assert_eq!(decode_base64(&encode_base64(&bytes)).unwrap(), bytes);
        assert!(decode_base64("###").is_err());
    }

    #[test]
    fn test_stereo_deinterleave() {
        // L/R frames: (0.25, -0.25), (0.5, -0.5)
        let bytes = samples_to_pcm16(&[0.25, -0.25, 0.5, -0.5]);
        let channels = pcm16_to_channels(&bytes, 2).unwrap();
        assert_eq!(channels.len(), 2);
        assert!((channels[0][0] - 0.25).abs() < 1.0 / 32768.0);
        assert!((channels[0][1] - 0.5).abs() < 1.0 / 32768.0);
        assert!((channels[1][0] + 0.25).abs() < 1.0 / 32768.0);
    }

    #[test]
    fn test_deinterleave_rejects_partial_frames() {
        // 6 bytes = 3 samples, not a whole number of stereo frames
        assert!(pcm16_to_channels(&[0u8; 6], 2).is_err());
        assert!(pcm16_to_channels(&[0u8; 4], 0).is_err());
    }

    #[test]
    fn test_media_chunk_wire_shape() {
        let chunk = MediaChunk::from_samples(&[0.5; 4]);
        assert_eq!(chunk.mime_type, "audio/pcm;rate=16000");
        let json = serde_json::to_value(&chunk).unwrap();
        assert!(json["mimeType"].is_string());
        assert!(json["data"].is_string());

        let decoded = decode_base64_pcm(&chunk.data).unwrap();
        assert_eq!(decoded.len(), 4);
    }

    #[test]
    fn test_decode_rejects_bad_base64() {
        assert!(decode_base64_pcm("not!!base64").is_err());
    }

    #[test]
    fn test_resample_halves_length() {
        let input: Vec<f32> = (0..480).map(|i| i as f32 / 480.0).collect();
        let out = resample_linear(&input, 48_000, 24_000);
        assert_eq!(out.len(), 240);
        // Interpolated output still spans the same ramp
        assert!(out[0].abs() < 1e-6);
        assert!((out[239] - input[478]).abs() < 0.01);
    }
}
