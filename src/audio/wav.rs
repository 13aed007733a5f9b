//! # WAV Envelope Parsing and Downsampling
//!
//! The voice-AI service emits audio clips as base64 WAV containers at its own
//! native sample rate. This module unwraps the envelope, decimates the PCM to
//! the telephony rate, and hands the samples to the μ-law encoder.
//!
//! ## Format Notes:
//! - The "RIFF" magic at offset 0 is mandatory; anything else is rejected as
//!   a conversion failure rather than passed through.
//! - The `data` subchunk is located by a linear scan from offset 36. The AI
//!   service's WAV output is not guaranteed to have zero extension chunks, so
//!   the canonical 44-byte header must never be assumed.

use crate::audio::codec;
use byteorder::{LittleEndian, ReadBytesExt};
use std::io::{Cursor, Read};

/// A parsed WAV clip: format fields plus the decoded PCM samples.
#[derive(Debug, Clone, PartialEq)]
pub struct WavAudio {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
    pub samples: Vec<i16>,
}

/// Parse a WAV container into format fields and 16-bit samples.
///
/// Returns `None` for anything that is not a WAV buffer with a locatable
/// `data` subchunk. Fields are read at their fixed fmt-chunk offsets
/// (channels at 22, sample rate at 24, bit depth at 34).
pub fn parse_wav(bytes: &[u8]) -> Option<WavAudio> {
    if bytes.len() < 44 || &bytes[0..4] != b"RIFF" {
        return None;
    }

    let mut cursor = Cursor::new(bytes);
    cursor.set_position(22);
    let channels = cursor.read_u16::<LittleEndian>().ok()?;
    let sample_rate = cursor.read_u32::<LittleEndian>().ok()?;
    cursor.set_position(34);
    let bits_per_sample = cursor.read_u16::<LittleEndian>().ok()?;

    // Walk the subchunks from offset 36 until the data chunk appears.
    cursor.set_position(36);
    let data_len = loop {
        let mut chunk_id = [0u8; 4];
        cursor.read_exact(&mut chunk_id).ok()?;
        let chunk_size = cursor.read_u32::<LittleEndian>().ok()? as usize;
        if &chunk_id == b"data" {
            break chunk_size;
        }
        let next = cursor.position().checked_add(chunk_size as u64)?;
        if next > bytes.len() as u64 {
            return None;
        }
        cursor.set_position(next);
    };

    // Tolerate a declared length that overruns the buffer; take what exists.
    let available = bytes.len() - cursor.position() as usize;
    let pcm_len = data_len.min(available) / 2 * 2;
    let mut samples = Vec::with_capacity(pcm_len / 2);
    let mut remaining = pcm_len;
    while remaining >= 2 {
        samples.push(cursor.read_i16::<LittleEndian>().ok()?);
        remaining -= 2;
    }

    Some(WavAudio {
        sample_rate,
        channels,
        bits_per_sample,
        samples,
    })
}

/// Nearest-sample decimation: output sample `i` is input sample
/// `floor(i * from_rate / to_rate)`.
///
/// A proper polyphase resampler would sound marginally better but costs CPU
/// the gateway cannot spend mid-call; decimation keeps per-chunk latency
/// flat.
pub fn downsample(samples: &[i16], from_rate: u32, to_rate: u32) -> Vec<i16> {
    if from_rate == 0 || to_rate == 0 {
        return Vec::new();
    }
    if from_rate == to_rate {
        return samples.to_vec();
    }

    let out_len = (samples.len() as u64 * to_rate as u64 / from_rate as u64) as usize;
    let mut out = Vec::with_capacity(out_len);
    for i in 0..out_len {
        let src = (i as u64 * from_rate as u64 / to_rate as u64) as usize;
        out.push(samples[src]);
    }
    out
}

/// Convert an AI WAV clip into μ-law bytes at the telephony rate.
///
/// Any step that cannot produce valid output returns an empty vector, which
/// callers must treat as "drop this chunk". The session is configured for
/// mono linear16, so clips that arrive in any other shape are conversion
/// failures, not candidates for pass-through.
pub fn wav_to_mulaw(bytes: &[u8], target_rate: u32) -> Vec<u8> {
    let Some(wav) = parse_wav(bytes) else {
        return Vec::new();
    };
    if wav.bits_per_sample != 16 || wav.channels != 1 || wav.sample_rate == 0 {
        return Vec::new();
    }

    let decimated = downsample(&wav.samples, wav.sample_rate, target_rate);
    codec::encode_mulaw(&decimated)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build a synthetic WAV buffer. When `extension_chunk` is set, a
    /// non-canonical subchunk is inserted before `data` so the linear scan
    /// gets exercised.
    fn make_wav(sample_rate: u32, channels: u16, bits: u16, samples: &[i16], extension_chunk: bool) -> Vec<u8> {
        let mut pcm = Vec::with_capacity(samples.len() * 2);
        for s in samples {
            pcm.extend_from_slice(&s.to_le_bytes());
        }

        let mut buf = Vec::new();
        buf.extend_from_slice(b"RIFF");
        buf.extend_from_slice(&0u32.to_le_bytes()); // riff size, unchecked
        buf.extend_from_slice(b"WAVE");
        buf.extend_from_slice(b"fmt ");
        buf.extend_from_slice(&16u32.to_le_bytes());
        buf.extend_from_slice(&1u16.to_le_bytes()); // PCM format tag
        buf.extend_from_slice(&channels.to_le_bytes());
        buf.extend_from_slice(&sample_rate.to_le_bytes());
        let byte_rate = sample_rate * channels as u32 * bits as u32 / 8;
        buf.extend_from_slice(&byte_rate.to_le_bytes());
        buf.extend_from_slice(&(channels * bits / 8).to_le_bytes());
        buf.extend_from_slice(&bits.to_le_bytes());
        if extension_chunk {
            buf.extend_from_slice(b"LIST");
            buf.extend_from_slice(&6u32.to_le_bytes());
            buf.extend_from_slice(&[0u8; 6]);
        }
        buf.extend_from_slice(b"data");
        buf.extend_from_slice(&(pcm.len() as u32).to_le_bytes());
        buf.extend_from_slice(&pcm);
        buf
    }

    #[test]
    fn test_rejects_non_riff_input() {
        assert!(parse_wav(&[]).is_none());
        assert!(parse_wav(b"not a wav file at all, nowhere near").is_none());
        let mut almost = make_wav(8000, 1, 16, &[0; 8], false);
        almost[0] = b'X';
        assert!(parse_wav(&almost).is_none());
    }

    #[test]
    fn test_parses_canonical_header() {
        let samples: Vec<i16> = (0..16).collect();
        let wav = parse_wav(&make_wav(16000, 1, 16, &samples, false)).unwrap();
        assert_eq!(wav.sample_rate, 16000);
        assert_eq!(wav.channels, 1);
        assert_eq!(wav.bits_per_sample, 16);
        assert_eq!(wav.samples, samples);
    }

    #[test]
    fn test_locates_data_past_extension_chunk() {
        let samples: Vec<i16> = vec![100, -100, 200, -200];
        let wav = parse_wav(&make_wav(24000, 1, 16, &samples, true)).unwrap();
        assert_eq!(wav.sample_rate, 24000);
        assert_eq!(wav.samples, samples);
    }

    #[test]
    fn test_downsample_halves_sample_count() {
        // 16000Hz -> 8000Hz must yield exactly floor(N / 2) samples.
        for n in [0usize, 1, 2, 7, 160, 161] {
            let samples: Vec<i16> = (0..n as i16).collect();
            let out = downsample(&samples, 16000, 8000);
            assert_eq!(out.len(), n / 2, "wrong length for n = {n}");
            for (i, s) in out.iter().enumerate() {
                assert_eq!(*s as usize, i * 2);
            }
        }
    }

    #[test]
    fn test_downsample_identity_at_equal_rates() {
        let samples: Vec<i16> = vec![5, 6, 7];
        assert_eq!(downsample(&samples, 8000, 8000), samples);
        assert!(downsample(&samples, 0, 8000).is_empty());
        assert!(downsample(&samples, 8000, 0).is_empty());
    }

    #[test]
    fn test_wav_to_mulaw_drops_unsupported_shapes() {
        let samples: Vec<i16> = vec![0; 32];
        assert!(wav_to_mulaw(&make_wav(16000, 2, 16, &samples, false), 8000).is_empty());
        assert!(wav_to_mulaw(&make_wav(16000, 1, 8, &samples, false), 8000).is_empty());
        assert!(wav_to_mulaw(b"garbage", 8000).is_empty());
    }

    #[test]
    fn test_wav_to_mulaw_decimates_and_encodes() {
        let samples: Vec<i16> = vec![0; 320];
        let out = wav_to_mulaw(&make_wav(16000, 1, 16, &samples, false), 8000);
        assert_eq!(out.len(), 160);
        assert!(out.iter().all(|&b| b == 0xFF), "zero samples encode to 0xFF");
    }
}
