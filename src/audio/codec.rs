//! Wire encoding for audio: normalized f32 ↔ 16-bit PCM (little-endian) ↔ base64

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use super::backend::AudioFrame;
use crate::error::{Result, VoiceError};

/// One transport-encoded unit of audio (base64 text of PCM16LE bytes)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EncodedChunk(pub String);

impl EncodedChunk {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<String> for EncodedChunk {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Convert normalized samples to PCM16LE bytes
///
/// Samples are scaled by 32767 and rounded. Out-of-range samples are clamped
/// rather than wrapped; a clipping microphone signal is not an error.
pub fn pcm16_bytes(samples: &[f32]) -> Vec<u8> {
    samples
        .iter()
        .map(|&s| (s * 32767.0).round().clamp(-32768.0, 32767.0) as i16)
        .flat_map(i16::to_le_bytes)
        .collect()
}

/// Encode a frame for the outbound channel
pub fn encode(frame: &AudioFrame) -> EncodedChunk {
    EncodedChunk(STANDARD.encode(pcm16_bytes(&frame.samples)))
}

/// Undo the base64 transport encoding (byte-exact)
pub fn decode(chunk: &EncodedChunk) -> Result<Vec<u8>> {
    STANDARD
        .decode(chunk.as_str())
        .map_err(|e| VoiceError::MalformedAudio(format!("invalid base64: {}", e)))
}

/// Interpret PCM16LE bytes as a playable frame
pub fn decode_audio_data(bytes: &[u8], sample_rate: u32, channels: u16) -> Result<AudioFrame> {
    if channels == 0 {
        return Err(VoiceError::MalformedAudio(
            "channel count must be at least 1".to_string(),
        ));
    }

    let stride = 2 * channels as usize;
    if bytes.len() % stride != 0 {
        return Err(VoiceError::MalformedAudio(format!(
            "{} bytes is not a multiple of {} ({} channel(s) of 16-bit PCM)",
            bytes.len(),
            stride,
            channels
        )));
    }

    let samples = bytes
        .chunks_exact(2)
        .map(|pair| f32::from(i16::from_le_bytes([pair[0], pair[1]])) / 32768.0)
        .collect();

    Ok(AudioFrame::new(samples, sample_rate, channels))
}

/// Decode a received chunk straight into a frame
pub fn decode_chunk(chunk: &EncodedChunk, sample_rate: u32, channels: u16) -> Result<AudioFrame> {
    let bytes = decode(chunk)?;
    decode_audio_data(&bytes, sample_rate, channels)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mono(samples: Vec<f32>) -> AudioFrame {
        AudioFrame::new(samples, 16000, 1)
    }

    fn first_sample(chunk: &EncodedChunk) -> i16 {
        let bytes = decode(chunk).unwrap();
        i16::from_le_bytes([bytes[0], bytes[1]])
    }

    // Encoding scales by 32767 and decoding divides by 32768, so the error is
    // half a step of rounding plus the scale mismatch.
    #[test]
    fn test_roundtrip_within_quantization_bound() {
        let samples: Vec<f32> = (0..=200).map(|i| -1.0 + i as f32 * 0.01).collect();
        let chunk = encode(&mono(samples.clone()));
        let decoded = decode_chunk(&chunk, 16000, 1).unwrap();

        assert_eq!(decoded.samples.len(), samples.len());
        for (original, restored) in samples.iter().zip(&decoded.samples) {
            assert!(
                (original - restored).abs() <= 1.5 / 32768.0 + 1e-6,
                "{} vs {}",
                original,
                restored
            );
        }
    }

    #[test]
    fn test_clamps_out_of_range_samples() {
        assert_eq!(
            first_sample(&encode(&mono(vec![1.5]))),
            first_sample(&encode(&mono(vec![1.0])))
        );
        assert_eq!(
            first_sample(&encode(&mono(vec![-1.5]))),
            first_sample(&encode(&mono(vec![-1.0])))
        );
        assert_eq!(first_sample(&encode(&mono(vec![1.5]))), i16::MAX);
    }

    #[test]
    fn test_little_endian_layout() {
        let bytes = pcm16_bytes(&[1.0, 0.0]);
        assert_eq!(bytes, vec![0xFF, 0x7F, 0x00, 0x00]);
    }

    #[test]
    fn test_decode_is_byte_exact() {
        let chunk = EncodedChunk(STANDARD.encode([1u8, 2, 3, 250]));
        assert_eq!(decode(&chunk).unwrap(), vec![1, 2, 3, 250]);
    }

    #[test]
    fn test_odd_byte_length_is_malformed() {
        let result = decode_audio_data(&[0, 1, 2], 24000, 1);
        assert!(matches!(result, Err(VoiceError::MalformedAudio(_))));
    }

    #[test]
    fn test_stereo_requires_whole_sample_pairs() {
        assert!(decode_audio_data(&[0, 0, 0, 0, 0, 0], 24000, 2).is_err());
        let frame = decode_audio_data(&[0, 0, 0, 0], 24000, 2).unwrap();
        assert_eq!(frame.frame_count(), 1);
    }

    #[test]
    fn test_invalid_base64_is_malformed() {
        let result = decode(&EncodedChunk("not base64!!".to_string()));
        assert!(matches!(result, Err(VoiceError::MalformedAudio(_))));
    }

    #[test]
    fn test_decoded_frame_carries_format() {
        let frame = decode_audio_data(&[0x00, 0x80], 24000, 1).unwrap();
        assert_eq!(frame.sample_rate, 24000);
        assert_eq!(frame.channels, 1);
        assert_eq!(frame.samples, vec![-1.0]);
    }
}
