//! Playback scheduling — gapless queueing of synthesis audio at 24 kHz.
//!
//! The scheduler keeps a monotonic clock in seconds and a `next_free_time`
//! cursor. Each chunk is scheduled at `max(next_free_time, clock)` so
//! consecutive chunks are sample-contiguous while a late arrival after a gap
//! starts immediately instead of in the past. The device callback (or a test)
//! pumps `render`, which advances the clock.

use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::SampleRate;
use tracing::{debug, error};

use attune_core::error::{AttuneError, Result};

use crate::codec::OUTPUT_SAMPLE_RATE;

/// Receipt for one scheduled chunk.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaybackHandle {
    pub id: u64,
    /// Clock time this chunk begins, in seconds.
    pub start_at: f64,
    /// Chunk length in seconds.
    pub duration: f64,
}

struct Source {
    id: u64,
    samples: Vec<f32>,
    pos: usize,
    start_at: f64,
}

/// Looping background bed mixed under scheduled speech.
struct Bed {
    samples: Vec<f32>,
    pos: usize,
    volume: f32,
}

/// One-shot cue mixed over the queue, starting immediately.
struct Cue {
    samples: Vec<f32>,
    pos: usize,
}

struct SchedulerState {
    clock: f64,
    next_free_time: f64,
    next_id: u64,
    sources: Vec<Source>,
    bed: Option<Bed>,
    cues: Vec<Cue>,
}

/// Shared playback queue. Clones refer to the same queue.
#[derive(Clone)]
pub struct PlaybackScheduler {
    state: Arc<Mutex<SchedulerState>>,
    sample_rate: u32,
}

impl PlaybackScheduler {
    pub fn new() -> Self {
        Self::with_sample_rate(OUTPUT_SAMPLE_RATE)
    }

    pub fn with_sample_rate(sample_rate: u32) -> Self {
        Self {
            state: Arc::new(Mutex::new(SchedulerState {
                clock: 0.0,
                next_free_time: 0.0,
                next_id: 0,
                sources: Vec::new(),
                bed: None,
                cues: Vec::new(),
            })),
            sample_rate,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Current clock position in seconds.
    pub fn clock(&self) -> f64 {
        self.lock().clock
    }

    /// Number of chunks scheduled but not yet fully played.
    pub fn pending(&self) -> usize {
        self.lock().sources.len()
    }

    /// Queue a chunk for gapless playback. Empty chunks are ignored and get a
    /// zero-length handle at the current cursor.
    pub fn schedule(&self, samples: Vec<f32>) -> PlaybackHandle {
        let mut state = self.lock();
        let start_at = state.next_free_time.max(state.clock);
        let duration = samples.len() as f64 / f64::from(self.sample_rate);
        let id = state.next_id;
        state.next_id += 1;
        state.next_free_time = start_at + duration;
        if !samples.is_empty() {
            state.sources.push(Source {
                id,
                samples,
                pos: 0,
                start_at,
            });
        }
        PlaybackHandle {
            id,
            start_at,
            duration,
        }
    }

    /// Play a one-shot cue starting now, outside the speech queue. Cues
    /// neither wait for `next_free_time` nor move it, and a barge-in does
    /// not cancel them.
    pub fn play_cue(&self, samples: Vec<f32>) {
        if samples.is_empty() {
            return;
        }
        self.lock().cues.push(Cue { samples, pos: 0 });
    }

    /// True while any cue still has samples left.
    pub fn cue_playing(&self) -> bool {
        !self.lock().cues.is_empty()
    }

    /// Drop every queued chunk and rewind the cursor to now, so the next
    /// chunk after a barge-in starts immediately. Cues and the bed keep
    /// playing. Returns how many chunks were cancelled.
    pub fn interrupt_all(&self) -> usize {
        let mut state = self.lock();
        let cancelled = state.sources.len();
        state.sources.clear();
        state.next_free_time = state.clock;
        if cancelled > 0 {
            debug!(cancelled, "playback interrupted");
        }
        cancelled
    }

    /// Install (or replace) the looping ambient bed.
    pub fn set_bed(&self, samples: Vec<f32>, volume: f32) {
        let mut state = self.lock();
        if samples.is_empty() {
            state.bed = None;
        } else {
            state.bed = Some(Bed {
                samples,
                pos: 0,
                volume: volume.clamp(0.0, 1.0),
            });
        }
    }

    pub fn set_bed_volume(&self, volume: f32) {
        if let Some(bed) = self.lock().bed.as_mut() {
            bed.volume = volume.clamp(0.0, 1.0);
        }
    }

    pub fn clear_bed(&self) {
        self.lock().bed = None;
    }

    pub fn has_bed(&self) -> bool {
        self.lock().bed.is_some()
    }

    /// Fill `out` with the next mono samples and advance the clock.
    ///
    /// Called from the device callback; also callable directly, which is how
    /// the scheduling arithmetic is exercised without a device.
    pub fn render(&self, out: &mut [f32]) {
        let mut state = self.lock();
        let dt = 1.0 / f64::from(self.sample_rate);

        for slot in out.iter_mut() {
            let t = state.clock;
            let mut mixed = 0.0f32;
            for source in state.sources.iter_mut() {
                // Epsilon absorbs clock drift from repeated dt accumulation
                if t >= source.start_at - 1e-9 && source.pos < source.samples.len() {
                    mixed += source.samples[source.pos];
                    source.pos += 1;
                }
            }
            for cue in state.cues.iter_mut() {
                mixed += cue.samples[cue.pos];
                cue.pos += 1;
            }
            state.cues.retain(|c| c.pos < c.samples.len());
            if let Some(bed) = state.bed.as_mut() {
                mixed += bed.samples[bed.pos] * bed.volume;
                bed.pos = (bed.pos + 1) % bed.samples.len();
            }
            *slot = mixed.clamp(-1.0, 1.0);
            state.clock += dt;
        }

        state.sources.retain(|s| s.pos < s.samples.len());
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SchedulerState> {
        // A panic while holding the lock is unrecoverable anyway
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for PlaybackScheduler {
    fn default() -> Self {
        Self::new()
    }
}

/// Speaker output thread pumping a scheduler.
///
/// Dropping the sink stops the stream; the scheduler itself survives.
pub struct PlaybackSink {
    stop_tx: Option<std_mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl PlaybackSink {
    /// Open the default output device at the scheduler's rate and start
    /// pumping it.
    pub fn start(scheduler: PlaybackScheduler) -> Result<Self> {
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();
        let (ready_tx, ready_rx) = std_mpsc::channel::<Result<()>>();

        let thread = std::thread::Builder::new()
            .name("attune-speaker".into())
            .spawn(move || {
                let stream = match build_output_stream(&scheduler) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(AttuneError::Playback(e.to_string())));
                    return;
                }
                let _ = ready_tx.send(Ok(()));
                let _ = stop_rx.recv();
                drop(stream);
                debug!("speaker output stopped");
            })
            .map_err(|e| AttuneError::Playback(format!("playback thread: {e}")))?;

        match ready_rx.recv_timeout(Duration::from_secs(5)) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(AttuneError::Playback("playback thread did not start".into())),
        }

        Ok(Self {
            stop_tx: Some(stop_tx),
            thread: Some(thread),
        })
    }

    pub fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for PlaybackSink {
    fn drop(&mut self) {
        self.stop();
    }
}

fn build_output_stream(scheduler: &PlaybackScheduler) -> Result<cpal::Stream> {
    let rate = scheduler.sample_rate();
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| AttuneError::Playback("no output device available".into()))?;

    let supported = device
        .supported_output_configs()
        .map_err(|e| AttuneError::Playback(e.to_string()))?
        .find(|c| {
            c.channels() <= 2
                && c.min_sample_rate() <= SampleRate(rate)
                && c.max_sample_rate() >= SampleRate(rate)
        })
        .ok_or_else(|| AttuneError::Playback("no suitable output config".into()))?;

    let config = supported.with_sample_rate(SampleRate(rate)).config();
    let channels = config.channels as usize;

    debug!(
        device = device.name().unwrap_or_default(),
        sample_rate = rate,
        channels,
        "speaker output starting"
    );

    let scheduler = scheduler.clone();
    let mut mono = Vec::new();
    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                mono.resize(data.len() / channels, 0.0);
                scheduler.render(&mut mono);
                for (frame, &sample) in data.chunks_mut(channels).zip(&mono) {
                    frame.fill(sample);
                }
            },
            |err| {
                error!(error = %err, "speaker output error");
            },
            None,
        )
        .map_err(|e| AttuneError::Playback(e.to_string()))?;

    Ok(stream)
}
