//! Live voice session — the state machine between microphone, socket, and
//! speaker.
//!
//! At most one session exists at a time. The run loop multiplexes capture
//! frames, downstream server events, a once-per-second idle tick, and the
//! cancellation token; every branch goes through the same teardown so stop is
//! idempotent whether the user hung up, the socket died, or an error fired.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use attune_audio::capture::{CaptureFrame, MicCapture};
use attune_audio::chime::{BELL_URL, Chime};
use attune_audio::codec::MediaChunk;
use attune_audio::playback::PlaybackScheduler;
use attune_core::config::Config;
use attune_core::error::{AttuneError, Result};
use attune_core::modules::compose_system_instruction;
use attune_core::store::ProfileStore;
use attune_core::types::{SessionNote, SessionStatus};
use attune_providers::live::{self, LiveConfig, LiveLink, ServerEvent};
use attune_providers::tools::{self, ToolKind};

/// Injected when the room has been quiet for the configured window.
pub const IDLE_NUDGE_TEXT: &str = "[Facilitator Note: 10 seconds of silence. \
     Transition to closing the circle smoothly, following the gentle pace \
     instructions.]";

/// What the UI layer sees from a running session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Status(SessionStatus),
    /// RMS level of the latest capture frame, for the visualizer.
    Level(f32),
    /// Incremental transcription of the model's speech.
    Transcription(String),
    /// The spoken turn ended; the transcript line resets.
    TranscriptionCleared,
    NoteArchived(SessionNote),
    BellRung,
    Error(String),
    /// Terminal event; the session is torn down.
    Ended,
}

/// Tracks quiet time and decides when to nudge the model toward closing.
///
/// Firing resets the window, so a silent room is nudged once per interval
/// rather than once per tick.
#[derive(Debug)]
pub struct IdleMonitor {
    window: Duration,
    last_activity: Instant,
}

impl IdleMonitor {
    pub fn new(window: Duration, now: Instant) -> Self {
        Self {
            window,
            last_activity: now,
        }
    }

    /// Voice activity or server traffic observed.
    pub fn record_activity(&mut self, now: Instant) {
        self.last_activity = now;
    }

    /// True when the quiet window has elapsed. Resets the window on fire.
    pub fn should_nudge(&mut self, now: Instant) -> bool {
        if now.duration_since(self.last_activity) > self.window {
            self.last_activity = now;
            true
        } else {
            false
        }
    }
}

struct RunDeps {
    link: Arc<dyn LiveLink>,
    scheduler: PlaybackScheduler,
    chime: Option<Chime>,
    store: ProfileStore,
    events: mpsc::UnboundedSender<SessionEvent>,
    activity_threshold: f32,
    idle_window: Duration,
}

/// Owns the single-session invariant and the microphone lifetime. The
/// speaker sink pumping the shared scheduler belongs to the caller, since
/// previews and ambient playback use it outside any session.
pub struct VoiceController {
    config: Config,
    store: ProfileStore,
    scheduler: PlaybackScheduler,
    client: reqwest::Client,
    active: Arc<AtomicBool>,
    cancel: tokio::sync::Mutex<Option<CancellationToken>>,
}

impl VoiceController {
    pub fn new(config: Config, store: ProfileStore, scheduler: PlaybackScheduler) -> Self {
        Self {
            config,
            store,
            scheduler,
            client: reqwest::Client::new(),
            active: Arc::new(AtomicBool::new(false)),
            cancel: tokio::sync::Mutex::new(None),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Start a session. Fails if one is already running; the caller must stop
    /// it first.
    pub async fn start(&self) -> Result<mpsc::UnboundedReceiver<SessionEvent>> {
        let guard = SessionGuard::acquire(&self.active)?;

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let _ = event_tx.send(SessionEvent::Status(SessionStatus::Connecting));

        let api_key = self.config.resolve_api_key().ok_or_else(|| {
            AttuneError::Config("no API key: set GEMINI_API_KEY or provider.api_key".into())
        })?;

        let voice_settings = self.store.load_voice_settings().await;
        let active_modules = self.store.load_active_modules().await;
        let display_name = self.store.load_display_name().await;
        let system_instruction =
            compose_system_instruction(&active_modules, display_name.as_deref());

        // Microphone first: a missing device should fail before we open the
        // socket. The caller owns the speaker sink pumping the scheduler.
        let (mic, frame_rx) = MicCapture::start(self.config.voice.frame_samples)?;

        let chime = match Chime::load(&self.client, BELL_URL, self.scheduler.sample_rate()).await {
            Ok(chime) => Some(chime),
            Err(e) => {
                // The session is still viable without the bell
                warn!(error = %e, "bell unavailable for this session");
                None
            }
        };

        let live_config = LiveConfig {
            base_url: self.config.base_url().to_string(),
            api_key,
            model: self.config.live_model().to_string(),
            system_instruction,
            voice_name: voice_settings.voice_name.clone(),
        };
        let (link, server_rx) = live::connect(&live_config).await?;

        let cancel = CancellationToken::new();
        *self.cancel.lock().await = Some(cancel.clone());

        let deps = RunDeps {
            link: Arc::new(link),
            scheduler: self.scheduler.clone(),
            chime,
            store: self.store.clone(),
            events: event_tx,
            activity_threshold: self.config.voice.activity_threshold,
            idle_window: Duration::from_secs(self.config.voice.idle_nudge_secs),
        };

        info!(voice = %voice_settings.voice_name, "voice session starting");

        tokio::spawn(async move {
            run_loop(deps, frame_rx, server_rx, cancel).await;
            // Capture thread stops when its handle drops, after the loop exits
            drop(mic);
            drop(guard);
        });

        Ok(event_rx)
    }

    /// Request teardown. Safe to call repeatedly or with no session running.
    pub async fn stop(&self) {
        if let Some(cancel) = self.cancel.lock().await.take() {
            cancel.cancel();
        }
    }
}

/// Releases the single-session flag on drop, however the loop exits.
struct SessionGuard {
    active: Arc<AtomicBool>,
}

impl SessionGuard {
    fn acquire(active: &Arc<AtomicBool>) -> Result<Self> {
        if active.swap(true, Ordering::SeqCst) {
            return Err(AttuneError::Session(
                "a voice session is already active".into(),
            ));
        }
        Ok(Self {
            active: Arc::clone(active),
        })
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.active.store(false, Ordering::SeqCst);
    }
}

async fn run_loop(
    deps: RunDeps,
    mut frames: mpsc::UnboundedReceiver<CaptureFrame>,
    mut server: mpsc::UnboundedReceiver<ServerEvent>,
    cancel: CancellationToken,
) {
    let mut idle = IdleMonitor::new(deps.idle_window, Instant::now());
    let mut tick = interval(Duration::from_secs(1));
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = deps.events.send(SessionEvent::Status(SessionStatus::Closing));
                let _ = deps.link.close();
                break;
            }

            frame = frames.recv() => {
                let Some(frame) = frame else {
                    // Capture thread died; end the session
                    let _ = deps.events.send(SessionEvent::Error("microphone stopped".into()));
                    let _ = deps.link.close();
                    break;
                };
                if frame.is_active(deps.activity_threshold) {
                    idle.record_activity(Instant::now());
                }
                let _ = deps.events.send(SessionEvent::Level(frame.rms));
                if let Err(e) = deps.link.send_audio(MediaChunk::from_samples(&frame.samples)) {
                    let _ = deps.events.send(SessionEvent::Error(e.to_string()));
                    break;
                }
            }

            event = server.recv() => {
                let Some(event) = event else {
                    break;
                };
                idle.record_activity(Instant::now());
                if handle_server_event(&deps, event).await.is_break() {
                    break;
                }
            }

            _ = tick.tick() => {
                if idle.should_nudge(Instant::now()) {
                    debug!("silence window elapsed, nudging toward close");
                    if deps.link.send_text(IDLE_NUDGE_TEXT).is_err() {
                        break;
                    }
                }
            }
        }
    }

    deps.scheduler.interrupt_all();
    let _ = deps.events.send(SessionEvent::Status(SessionStatus::Idle));
    let _ = deps.events.send(SessionEvent::Ended);
    info!("voice session ended");
}

async fn handle_server_event(deps: &RunDeps, event: ServerEvent) -> std::ops::ControlFlow<()> {
    use std::ops::ControlFlow;

    match event {
        ServerEvent::Ready => {
            let _ = deps.events.send(SessionEvent::Status(SessionStatus::Active));
        }
        ServerEvent::Audio(samples) => {
            deps.scheduler.schedule(samples);
        }
        ServerEvent::Transcription(text) => {
            let _ = deps.events.send(SessionEvent::Transcription(text));
        }
        ServerEvent::TurnComplete => {
            let _ = deps.events.send(SessionEvent::TranscriptionCleared);
        }
        ServerEvent::Interrupted => {
            deps.scheduler.interrupt_all();
        }
        ServerEvent::ToolCall { id, name, args } => {
            dispatch_tool(deps, id.as_deref(), &name, &args).await;
        }
        ServerEvent::Closed { reason } => {
            if let Some(reason) = reason {
                let _ = deps.events.send(SessionEvent::Error(reason));
            }
            return ControlFlow::Break(());
        }
    }
    ControlFlow::Continue(())
}

/// Resolve and act on a tool call, always answering the model. A rejected
/// call gets an error result instead of silence so the dialogue can recover.
async fn dispatch_tool(deps: &RunDeps, id: Option<&str>, name: &str, args: &serde_json::Value) {
    let result = match tools::resolve(name, args) {
        Ok(ToolKind::WriteNote(note)) => match deps.store.add_note(note.clone()).await {
            Ok(()) => {
                info!(themes = ?note.presenting_themes, "session note archived");
                let _ = deps.events.send(SessionEvent::NoteArchived(note));
                "Note archived.".to_string()
            }
            Err(e) => {
                warn!(error = %e, "failed to archive note");
                format!("Error: {e}")
            }
        },
        Ok(ToolKind::RingBell) => match &deps.chime {
            Some(chime) => {
                chime.ring(&deps.scheduler);
                let _ = deps.events.send(SessionEvent::BellRung);
                "Bell rung.".to_string()
            }
            None => "Error: bell unavailable.".to_string(),
        },
        Err(e) => {
            warn!(tool = name, error = %e, "rejected tool call");
            format!("Error: {e}")
        }
    };
    let _ = deps.link.send_tool_response(id, name, &result);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    /// Records upstream traffic instead of speaking to a socket.
    #[derive(Default)]
    struct RecordingLink {
        audio: Mutex<Vec<MediaChunk>>,
        texts: Mutex<Vec<String>>,
        tool_responses: Mutex<Vec<(Option<String>, String, String)>>,
        closed: AtomicBool,
    }

    impl LiveLink for RecordingLink {
        fn send_audio(&self, chunk: MediaChunk) -> Result<()> {
            self.audio.lock().unwrap().push(chunk);
            Ok(())
        }
        fn send_text(&self, text: &str) -> Result<()> {
            self.texts.lock().unwrap().push(text.to_string());
            Ok(())
        }
        fn send_tool_response(&self, id: Option<&str>, name: &str, result: &str) -> Result<()> {
            self.tool_responses.lock().unwrap().push((
                id.map(String::from),
                name.to_string(),
                result.to_string(),
            ));
            Ok(())
        }
        fn close(&self) -> Result<()> {
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Harness {
        link: Arc<RecordingLink>,
        scheduler: PlaybackScheduler,
        frame_tx: mpsc::UnboundedSender<CaptureFrame>,
        server_tx: mpsc::UnboundedSender<ServerEvent>,
        event_rx: mpsc::UnboundedReceiver<SessionEvent>,
        cancel: CancellationToken,
        _dir: tempfile::TempDir,
        store: ProfileStore,
        loop_handle: tokio::task::JoinHandle<()>,
    }

    async fn harness() -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let store = ProfileStore::open(dir.path()).await.unwrap();
        let link = Arc::new(RecordingLink::default());
        let scheduler = PlaybackScheduler::with_sample_rate(1_000);
        let (frame_tx, frame_rx) = mpsc::unbounded_channel();
        let (server_tx, server_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let deps = RunDeps {
            link: link.clone() as Arc<dyn LiveLink>,
            scheduler: scheduler.clone(),
            chime: Some(Chime::from_samples(vec![0.1; 10])),
            store: store.clone(),
            events: event_tx,
            activity_threshold: 0.05,
            idle_window: Duration::from_secs(10),
        };

        let loop_handle = tokio::spawn(run_loop(deps, frame_rx, server_rx, cancel.clone()));
        // Let the spawned loop reach its first await so its timers exist
        // before tests manipulate the (possibly paused) clock.
        tokio::task::yield_now().await;

        Harness {
            link,
            scheduler,
            frame_tx,
            server_tx,
            event_rx,
            cancel,
            _dir: dir,
            store,
            loop_handle,
        }
    }

    fn frame(samples: Vec<f32>) -> CaptureFrame {
        let peak = samples.iter().fold(0.0f32, |p, s| p.max(s.abs()));
        let rms = (samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32).sqrt();
        CaptureFrame { samples, rms, peak }
    }

    async fn next_event(rx: &mut mpsc::UnboundedReceiver<SessionEvent>) -> SessionEvent {
        tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timed out waiting for session event")
            .expect("event channel closed")
    }

    #[tokio::test]
    async fn test_capture_frames_are_forwarded() {
        let mut h = harness().await;

        h.frame_tx.send(frame(vec![0.5; 4])).unwrap();
        match next_event(&mut h.event_rx).await {
            SessionEvent::Level(rms) => assert!((rms - 0.5).abs() < 1e-6),
            other => panic!("expected level, got {other:?}"),
        }

        tokio::task::yield_now().await;
        let sent = h.link.audio.lock().unwrap().clone();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].mime_type, "audio/pcm;rate=16000");

        h.cancel.cancel();
        h.loop_handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_ready_transitions_to_active() {
        let mut h = harness().await;
        h.server_tx.send(ServerEvent::Ready).unwrap();
        assert_eq!(
            next_event(&mut h.event_rx).await,
            SessionEvent::Status(SessionStatus::Active)
        );
        h.cancel.cancel();
        h.loop_handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_audio_is_scheduled_and_interrupt_flushes() {
        let mut h = harness().await;

        h.server_tx.send(ServerEvent::Audio(vec![0.2; 100])).unwrap();
        h.server_tx.send(ServerEvent::Audio(vec![0.3; 100])).unwrap();
        tokio::task::yield_now().await;
        assert_eq!(h.scheduler.pending(), 2);

        h.server_tx.send(ServerEvent::Interrupted).unwrap();
        tokio::task::yield_now().await;
        assert_eq!(h.scheduler.pending(), 0);

        h.cancel.cancel();
        h.loop_handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_transcription_flow() {
        let mut h = harness().await;

        h.server_tx
            .send(ServerEvent::Transcription("hello there".into()))
            .unwrap();
        h.server_tx.send(ServerEvent::TurnComplete).unwrap();

        assert_eq!(
            next_event(&mut h.event_rx).await,
            SessionEvent::Transcription("hello there".into())
        );
        assert_eq!(
            next_event(&mut h.event_rx).await,
            SessionEvent::TranscriptionCleared
        );

        h.cancel.cancel();
        h.loop_handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_note_tool_archives_and_responds() {
        let mut h = harness().await;

        h.server_tx
            .send(ServerEvent::ToolCall {
                id: Some("fc-1".into()),
                name: "writesessionnote".into(),
                args: json!({
                    "json": {
                        "dateTimeUTC": "2025-06-01T12:00:00Z",
                        "presentingThemes": ["grief"],
                        "summary": "Sat with the loss."
                    }
                }),
            })
            .unwrap();

        match next_event(&mut h.event_rx).await {
            SessionEvent::NoteArchived(note) => assert_eq!(note.summary, "Sat with the loss."),
            other => panic!("expected archived note, got {other:?}"),
        }

        let notes = h.store.load_notes().await;
        assert_eq!(notes.len(), 1);

        let responses = h.link.tool_responses.lock().unwrap().clone();
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].0.as_deref(), Some("fc-1"));
        assert_eq!(responses[0].2, "Note archived.");

        h.cancel.cancel();
        h.loop_handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_invalid_note_rejected_with_error_response() {
        let mut h = harness().await;

        h.server_tx
            .send(ServerEvent::ToolCall {
                id: None,
                name: "writesessionnote".into(),
                args: json!({ "json": { "summary": "missing everything else" } }),
            })
            .unwrap();
        tokio::task::yield_now().await;

        assert!(h.store.load_notes().await.is_empty());
        let responses = h.link.tool_responses.lock().unwrap().clone();
        assert_eq!(responses.len(), 1);
        assert!(responses[0].2.starts_with("Error:"));

        h.cancel.cancel();
        h.loop_handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_bell_tool_rings_outside_the_speech_queue() {
        let mut h = harness().await;

        h.server_tx.send(ServerEvent::Audio(vec![0.2; 100])).unwrap();
        h.server_tx
            .send(ServerEvent::ToolCall {
                id: Some("fc-2".into()),
                name: "play_bell".into(),
                args: json!({}),
            })
            .unwrap();

        assert_eq!(next_event(&mut h.event_rx).await, SessionEvent::BellRung);
        // The bell is a cue, not a queue entry; speech alone is pending
        assert_eq!(h.scheduler.pending(), 1);
        assert!(h.scheduler.cue_playing());

        // A barge-in after "Bell rung." was acknowledged must not revoke it
        h.server_tx.send(ServerEvent::Interrupted).unwrap();
        tokio::task::yield_now().await;
        assert_eq!(h.scheduler.pending(), 0);
        assert!(h.scheduler.cue_playing());

        h.cancel.cancel();
        h.loop_handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_nudge_fires_once_per_window() {
        let mut h = harness().await;

        tokio::time::advance(Duration::from_secs(11)).await;
        tokio::task::yield_now().await;
        assert_eq!(h.link.texts.lock().unwrap().len(), 1);
        assert_eq!(h.link.texts.lock().unwrap()[0], IDLE_NUDGE_TEXT);

        // Window reset on fire: one more second of quiet is not enough
        tokio::time::advance(Duration::from_secs(2)).await;
        tokio::task::yield_now().await;
        assert_eq!(h.link.texts.lock().unwrap().len(), 1);

        h.cancel.cancel();
        h.loop_handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_activity_defers_idle_nudge() {
        let mut h = harness().await;

        tokio::time::advance(Duration::from_secs(8)).await;
        h.frame_tx.send(frame(vec![0.5; 4])).unwrap();
        tokio::task::yield_now().await;

        tokio::time::advance(Duration::from_secs(8)).await;
        tokio::task::yield_now().await;
        assert!(h.link.texts.lock().unwrap().is_empty());

        h.cancel.cancel();
        h.loop_handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_cancel_closes_link_and_ends() {
        let mut h = harness().await;

        h.cancel.cancel();
        h.loop_handle.await.unwrap();

        assert!(h.link.closed.load(Ordering::SeqCst));
        let mut saw_closing = false;
        let mut saw_ended = false;
        while let Ok(event) = h.event_rx.try_recv() {
            match event {
                SessionEvent::Status(SessionStatus::Closing) => saw_closing = true,
                SessionEvent::Ended => saw_ended = true,
                _ => {}
            }
        }
        assert!(saw_closing && saw_ended);
    }

    #[tokio::test]
    async fn test_socket_close_ends_session() {
        let mut h = harness().await;

        h.server_tx
            .send(ServerEvent::Closed {
                reason: Some("server hung up".into()),
            })
            .unwrap();
        h.loop_handle.await.unwrap();

        let mut saw_error = false;
        let mut saw_ended = false;
        while let Ok(event) = h.event_rx.try_recv() {
            match event {
                SessionEvent::Error(reason) => {
                    assert_eq!(reason, "server hung up");
                    saw_error = true;
                }
                SessionEvent::Ended => saw_ended = true,
                _ => {}
            }
        }
        assert!(saw_error && saw_ended);
    }

    #[tokio::test]
    async fn test_stop_is_idempotent_without_a_session() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProfileStore::open(dir.path()).await.unwrap();
        let controller = VoiceController::new(
            Config::default(),
            store,
            PlaybackScheduler::with_sample_rate(1_000),
        );

        assert!(!controller.is_active());
        controller.stop().await;
        controller.stop().await;
        assert!(!controller.is_active());
    }

    #[test]
    fn test_session_guard_enforces_single_session() {
        let active = Arc::new(AtomicBool::new(false));
        let guard = SessionGuard::acquire(&active).unwrap();
        assert!(SessionGuard::acquire(&active).is_err());
        drop(guard);
        assert!(SessionGuard::acquire(&active).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_monitor_arithmetic() {
        let start = Instant::now();
        let mut monitor = IdleMonitor::new(Duration::from_secs(10), start);

        assert!(!monitor.should_nudge(start + Duration::from_secs(10)));
        assert!(monitor.should_nudge(start + Duration::from_secs(11)));
        // Reset on fire
        assert!(!monitor.should_nudge(start + Duration::from_secs(12)));

        monitor.record_activity(start + Duration::from_secs(20));
        assert!(!monitor.should_nudge(start + Duration::from_secs(29)));
        assert!(monitor.should_nudge(start + Duration::from_secs(31)));
    }
}
