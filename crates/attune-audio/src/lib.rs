//! Audio plumbing for Attune: PCM codec, microphone capture, and the gapless
//! playback scheduler, plus the bell and ambient-bed players built on top.

pub mod ambient;
pub mod capture;
pub mod chime;
pub mod codec;
pub mod playback;

pub use ambient::AmbientPlayer;
pub use capture::{CaptureFrame, FrameAssembler, MicCapture};
pub use chime::Chime;
pub use codec::{INPUT_SAMPLE_RATE, MediaChunk, OUTPUT_SAMPLE_RATE};
pub use playback::{PlaybackHandle, PlaybackScheduler, PlaybackSink};
