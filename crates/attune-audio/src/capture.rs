//! Microphone capture — fixed-size frames with level metering.
//!
//! cpal streams are not `Send`, so the input stream lives on a dedicated
//! thread. Frames cross to the async side over an unbounded channel; the
//! device callback never blocks.

use std::sync::mpsc as std_mpsc;
use std::thread::JoinHandle;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::SampleRate;
use tokio::sync::mpsc;
use tracing::{debug, error};

use attune_core::error::{AttuneError, Result};

use crate::codec::INPUT_SAMPLE_RATE;

/// One assembled capture frame, ready for encoding.
#[derive(Debug, Clone)]
pub struct CaptureFrame {
    pub samples: Vec<f32>,
    pub rms: f32,
    pub peak: f32,
}

impl CaptureFrame {
    /// Whether this frame counts as voice activity at the given peak
    /// threshold.
    pub fn is_active(&self, threshold: f32) -> bool {
        self.peak > threshold
    }
}

/// Accumulates raw device callbacks into fixed-size frames.
///
/// Device buffer sizes rarely match the frame size, so a push may complete
/// zero, one, or several frames; the remainder carries over.
#[derive(Debug)]
pub struct FrameAssembler {
    frame_samples: usize,
    pending: Vec<f32>,
}

impl FrameAssembler {
    pub fn new(frame_samples: usize) -> Self {
        Self {
            frame_samples,
            pending: Vec::with_capacity(frame_samples),
        }
    }

    /// Feed raw samples; returns every frame completed by this push.
    pub fn push(&mut self, samples: &[f32]) -> Vec<CaptureFrame> {
        self.pending.extend_from_slice(samples);
        let mut frames = Vec::new();
        while self.pending.len() >= self.frame_samples {
            let rest = self.pending.split_off(self.frame_samples);
            let samples = std::mem::replace(&mut self.pending, rest);
            frames.push(meter(samples));
        }
        frames
    }

    /// Samples buffered but not yet forming a full frame.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

fn meter(samples: Vec<f32>) -> CaptureFrame {
    let mut sum_sq = 0.0f64;
    let mut peak = 0.0f32;
    for &s in &samples {
        sum_sq += f64::from(s) * f64::from(s);
        peak = peak.max(s.abs());
    }
    let rms = if samples.is_empty() {
        0.0
    } else {
        (sum_sq / samples.len() as f64).sqrt() as f32
    };
    CaptureFrame { samples, rms, peak }
}

/// Handle to a running microphone capture thread.
///
/// Dropping the handle stops the stream.
pub struct MicCapture {
    stop_tx: Option<std_mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl MicCapture {
    /// Open the default input device at 16 kHz mono and start streaming
    /// frames of `frame_samples` samples.
    pub fn start(frame_samples: usize) -> Result<(Self, mpsc::UnboundedReceiver<CaptureFrame>)> {
        let (frame_tx, frame_rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();
        let (ready_tx, ready_rx) = std_mpsc::channel::<Result<()>>();

        let thread = std::thread::Builder::new()
            .name("attune-mic".into())
            .spawn(move || {
                let stream = match build_input_stream(frame_samples, frame_tx) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(AttuneError::Capture(e.to_string())));
                    return;
                }
                let _ = ready_tx.send(Ok(()));
                // Park until stop is requested or the handle is dropped
                let _ = stop_rx.recv();
                drop(stream);
                debug!("microphone capture stopped");
            })
            .map_err(|e| AttuneError::Capture(format!("capture thread: {e}")))?;

        match ready_rx.recv_timeout(Duration::from_secs(5)) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(AttuneError::Capture("capture thread did not start".into())),
        }

        Ok((
            Self {
                stop_tx: Some(stop_tx),
                thread: Some(thread),
            },
            frame_rx,
        ))
    }

    /// Stop the stream and join the capture thread.
    pub fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for MicCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

fn build_input_stream(
    frame_samples: usize,
    frame_tx: mpsc::UnboundedSender<CaptureFrame>,
) -> Result<cpal::Stream> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| AttuneError::Capture("no input device available".into()))?;

    let supported = device
        .supported_input_configs()
        .map_err(|e| AttuneError::Capture(e.to_string()))?
        .find(|c| {
            c.channels() == 1
                && c.min_sample_rate() <= SampleRate(INPUT_SAMPLE_RATE)
                && c.max_sample_rate() >= SampleRate(INPUT_SAMPLE_RATE)
        })
        .ok_or_else(|| AttuneError::Capture("no 16 kHz mono input config".into()))?;

    let config = supported
        .with_sample_rate(SampleRate(INPUT_SAMPLE_RATE))
        .config();

    debug!(
        device = device.name().unwrap_or_default(),
        sample_rate = INPUT_SAMPLE_RATE,
        frame_samples,
        "microphone capture starting"
    );

    let mut assembler = FrameAssembler::new(frame_samples);
    let stream = device
        .build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                for frame in assembler.push(data) {
                    // Receiver gone means the session is tearing down
                    if frame_tx.send(frame).is_err() {
                        break;
                    }
                }
            },
            |err| {
                error!(error = %err, "microphone capture error");
            },
            None,
        )
        .map_err(|e| AttuneError::Capture(e.to_string()))?;

    Ok(stream)
}
