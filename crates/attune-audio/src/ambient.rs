//! Ambient atmosphere player — one looping bed under everything else.

use tracing::{debug, info};

use attune_core::error::{AttuneError, Result};
use attune_core::modules::AMBIENT_TRACKS;
use attune_core::types::AmbientTrack;

use crate::chime::decode_mp3;
use crate::codec::resample_linear;
use crate::playback::PlaybackScheduler;

const DEFAULT_VOLUME: f32 = 0.3;

/// Plays at most one ambient track, looped through the scheduler's bed slot.
/// Selecting a new track replaces the current one.
pub struct AmbientPlayer {
    scheduler: PlaybackScheduler,
    client: reqwest::Client,
    current: Option<&'static str>,
    volume: f32,
}

impl AmbientPlayer {
    pub fn new(scheduler: PlaybackScheduler, client: reqwest::Client) -> Self {
        Self {
            scheduler,
            client,
            current: None,
            volume: DEFAULT_VOLUME,
        }
    }

    /// ID of the playing track, if any.
    pub fn current(&self) -> Option<&'static str> {
        self.current
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    /// Fetch, decode, and start looping the given track.
    pub async fn play(&mut self, track_id: &str) -> Result<()> {
        let track = AMBIENT_TRACKS
            .iter()
            .find(|t| t.id == track_id)
            .ok_or_else(|| AttuneError::Audio(format!("unknown ambient track: {track_id}")))?;

        let samples = self.fetch_track(track).await?;
        self.scheduler.set_bed(samples, self.volume);
        self.current = Some(track.id);
        info!(track = track.id, "ambient track playing");
        Ok(())
    }

    /// Stop the bed entirely.
    pub fn stop(&mut self) {
        if self.current.take().is_some() {
            self.scheduler.clear_bed();
            debug!("ambient playback stopped");
        }
    }

    /// Adjust loudness of the current (and any future) track.
    pub fn set_volume(&mut self, volume: f32) {
        self.volume = volume.clamp(0.0, 1.0);
        self.scheduler.set_bed_volume(self.volume);
    }

    async fn fetch_track(&self, track: &AmbientTrack) -> Result<Vec<f32>> {
        let bytes = self
            .client
            .get(track.url)
            .send()
            .await
            .map_err(|e| AttuneError::Audio(format!("ambient fetch: {e}")))?
            .error_for_status()
            .map_err(|e| AttuneError::Audio(format!("ambient fetch: {e}")))?
            .bytes()
            .await
            .map_err(|e| AttuneError::Audio(format!("ambient fetch: {e}")))?;

        let (samples, source_rate) = decode_mp3(&bytes)?;
        Ok(resample_linear(
            &samples,
            source_rate,
            self.scheduler.sample_rate(),
        ))
    }
}
