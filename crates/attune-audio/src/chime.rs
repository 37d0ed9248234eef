//! Meditation bell — fetched once, decoded, and scheduled on demand.

use std::io::Cursor;

use tracing::debug;

use attune_core::error::{AttuneError, Result};

use crate::codec::resample_linear;
use crate::playback::PlaybackScheduler;

/// Default bell asset.
pub const BELL_URL: &str = "https://cdn.freesound.org/sounds/meditation-bell.mp3";

/// Decoded bell audio at the scheduler's sample rate.
pub struct Chime {
    samples: Vec<f32>,
}

impl Chime {
    /// Fetch and decode the bell, resampled to `target_rate`.
    pub async fn load(client: &reqwest::Client, url: &str, target_rate: u32) -> Result<Self> {
        let bytes = client
            .get(url)
            .send()
            .await
            .map_err(|e| AttuneError::Audio(format!("bell fetch: {e}")))?
            .error_for_status()
            .map_err(|e| AttuneError::Audio(format!("bell fetch: {e}")))?
            .bytes()
            .await
            .map_err(|e| AttuneError::Audio(format!("bell fetch: {e}")))?;

        let (samples, source_rate) = decode_mp3(&bytes)?;
        let samples = resample_linear(&samples, source_rate, target_rate);
        debug!(samples = samples.len(), source_rate, "bell loaded");
        Ok(Self { samples })
    }

    /// Build a chime from already-decoded samples at the target rate.
    pub fn from_samples(samples: Vec<f32>) -> Self {
        Self { samples }
    }

    /// Ring the bell now, over whatever is playing. The cue slot keeps it
    /// out of the speech queue, so it neither waits behind buffered
    /// synthesis nor gets flushed by a barge-in.
    pub fn ring(&self, scheduler: &PlaybackScheduler) {
        scheduler.play_cue(self.samples.clone());
    }

    pub fn duration_secs(&self, sample_rate: u32) -> f64 {
        self.samples.len() as f64 / f64::from(sample_rate)
    }
}

/// Decode MP3 bytes to mono f32 samples, returning the source sample rate.
pub fn decode_mp3(data: &[u8]) -> Result<(Vec<f32>, u32)> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(data));
    let mut samples = Vec::new();
    let mut sample_rate = 0u32;

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                sample_rate = frame.sample_rate as u32;
                if frame.channels == 2 {
                    samples.extend(frame.data.chunks(2).map(|pair| {
                        let left = f32::from(pair[0]) / 32768.0;
                        let right = f32::from(pair.get(1).copied().unwrap_or(pair[0])) / 32768.0;
                        (left + right) * 0.5
                    }));
                } else {
                    samples.extend(frame.data.iter().map(|&s| f32::from(s) / 32768.0));
                }
            }
            Err(minimp3::Error::Eof) => break,
            Err(e) => return Err(AttuneError::Decode(format!("mp3: {e}"))),
        }
    }

    if samples.is_empty() {
        return Err(AttuneError::Decode("mp3 stream held no audio".into()));
    }
    Ok((samples, sample_rate))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ring_plays_over_queued_speech() {
        let scheduler = PlaybackScheduler::with_sample_rate(1_000);
        scheduler.schedule(vec![0.1; 100]);

        let chime = Chime::from_samples(vec![0.2; 50]);
        chime.ring(&scheduler);

        let mut out = vec![0.0; 2];
        scheduler.render(&mut out);
        assert!((out[0] - 0.3).abs() < 1e-6, "bell rings immediately");
    }

    #[test]
    fn test_ring_outlives_barge_in() {
        let scheduler = PlaybackScheduler::with_sample_rate(1_000);
        scheduler.schedule(vec![0.1; 100]);

        let chime = Chime::from_samples(vec![0.2; 50]);
        chime.ring(&scheduler);
        scheduler.interrupt_all();

        let mut out = vec![0.0; 2];
        scheduler.render(&mut out);
        assert!((out[0] - 0.2).abs() < 1e-6, "flush leaves the bell ringing");
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode_mp3(&[0u8; 32]).is_err());
    }
}
