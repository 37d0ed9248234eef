//! Terminal surfaces — home menu, chat REPL, voice room, journal, settings.

use std::io::Write as _;
use std::time::Duration;

use dialoguer::theme::ColorfulTheme;
use dialoguer::{Confirm, Input, MultiSelect, Select};
use tracing::debug;

use attune_audio::ambient::AmbientPlayer;
use attune_audio::playback::{PlaybackScheduler, PlaybackSink};
use attune_core::config::Config;
use attune_core::error::Result;
use attune_core::modules::{
    AMBIENT_TRACKS, CRISIS_NOTICE, SPECIALIST_MODULES, available_voices, voices_for,
};
use attune_core::store::ProfileStore;
use attune_core::types::{Accent, Gender, SessionStatus, VoiceSettings};
use attune_providers::chat::ChatClient;
use attune_providers::tts::TtsClient;
use attune_session::chat::ChatSession;
use attune_session::voice::{SessionEvent, VoiceController};

pub struct App {
    config: Config,
    store: ProfileStore,
    scheduler: PlaybackScheduler,
    sink: Option<PlaybackSink>,
    ambient: AmbientPlayer,
    controller: VoiceController,
    theme: ColorfulTheme,
}

impl App {
    pub async fn open(config: Config) -> Result<Self> {
        let store = ProfileStore::open_default().await?;
        let scheduler = PlaybackScheduler::new();
        let ambient = AmbientPlayer::new(scheduler.clone(), reqwest::Client::new());
        let controller = VoiceController::new(config.clone(), store.clone(), scheduler.clone());
        Ok(Self {
            config,
            store,
            scheduler,
            sink: None,
            ambient,
            controller,
            theme: ColorfulTheme::default(),
        })
    }

    /// Start the speaker thread on first use. Everything audible shares one
    /// sink and one scheduler.
    fn ensure_sink(&mut self) -> Result<()> {
        if self.sink.is_none() {
            self.sink = Some(PlaybackSink::start(self.scheduler.clone())?);
        }
        Ok(())
    }

    fn api_key(&self) -> Option<String> {
        let key = self.config.resolve_api_key();
        if key.is_none() {
            println!("No API key found. Set GEMINI_API_KEY or add provider.api_key to your config.");
        }
        key
    }

    // --- Home ---

    pub async fn home(&mut self) -> Result<()> {
        self.welcome().await?;

        loop {
            let items = [
                "Chat",
                "Voice session",
                "Journal",
                "Settings",
                "Attunements",
                "Ambient sound",
                "Crisis resources",
                "Quit",
            ];
            let choice = Select::with_theme(&self.theme)
                .with_prompt("Attune")
                .items(&items)
                .default(0)
                .interact()
                .map_err(anyhow::Error::from)?;

            match choice {
                0 => self.chat().await?,
                1 => self.voice().await?,
                2 => self.journal().await?,
                3 => self.settings().await?,
                4 => self.attunements().await?,
                5 => self.ambient().await?,
                6 => println!("\n{CRISIS_NOTICE}\n"),
                _ => break,
            }
        }
        Ok(())
    }

    /// First-run name prompt. Leaving it blank keeps things anonymous.
    async fn welcome(&mut self) -> Result<()> {
        if self.store.load_display_name().await.is_some() {
            return Ok(());
        }
        println!("Welcome to Attune.");
        let name: String = Input::with_theme(&self.theme)
            .with_prompt("What name should I use for you? (leave blank to skip)")
            .allow_empty(true)
            .interact_text()
            .map_err(anyhow::Error::from)?;
        if !name.trim().is_empty() {
            self.store.save_display_name(&name).await?;
        }
        Ok(())
    }

    // --- Chat ---

    pub async fn chat(&mut self) -> Result<()> {
        let Some(api_key) = self.api_key() else {
            return Ok(());
        };
        let client = ChatClient::new(self.config.base_url(), &api_key, self.config.chat_model());
        let mut session = ChatSession::open(client, self.store.clone()).await;

        println!("Type your message; an empty line ends the conversation.\n");
        loop {
            let line: String = Input::with_theme(&self.theme)
                .with_prompt("you")
                .allow_empty(true)
                .interact_text()
                .map_err(anyhow::Error::from)?;
            if line.trim().is_empty() {
                break;
            }

            match session.send(&line).await {
                Ok(reply) => {
                    if let Some(text) = reply.text {
                        println!("\nattune  {text}\n");
                    }
                    for note in reply.archived_notes {
                        println!("  ✳ session note archived: {}", note.summary);
                    }
                }
                Err(e) => println!("  ! {e}"),
            }
        }
        Ok(())
    }

    // --- Voice ---

    pub async fn voice(&mut self) -> Result<()> {
        if self.api_key().is_none() {
            return Ok(());
        }
        self.ensure_sink()?;

        let mut events = match self.controller.start().await {
            Ok(events) => events,
            Err(e) => {
                println!("Could not start the session: {e}");
                return Ok(());
            }
        };

        println!("Voice session starting. Press Enter to end it.\n");

        let (enter_tx, mut enter_rx) = tokio::sync::oneshot::channel::<()>();
        std::thread::spawn(move || {
            let mut line = String::new();
            let _ = std::io::stdin().read_line(&mut line);
            let _ = enter_tx.send(());
        });

        let mut stopping = false;
        loop {
            tokio::select! {
                _ = &mut enter_rx, if !stopping => {
                    stopping = true;
                    self.controller.stop().await;
                }
                event = events.recv() => {
                    let Some(event) = event else { break };
                    match event {
                        SessionEvent::Status(SessionStatus::Connecting) => {
                            println!("… connecting");
                        }
                        SessionEvent::Status(SessionStatus::Active) => {
                            println!("● listening");
                        }
                        SessionEvent::Status(_) => {}
                        SessionEvent::Level(rms) => {
                            render_level(rms);
                        }
                        SessionEvent::Transcription(text) => {
                            print!("{text}");
                            let _ = std::io::stdout().flush();
                        }
                        SessionEvent::TranscriptionCleared => {
                            println!();
                        }
                        SessionEvent::NoteArchived(note) => {
                            println!("\n  ✳ session note archived: {}", note.summary);
                        }
                        SessionEvent::BellRung => {
                            println!("\n  🔔");
                        }
                        SessionEvent::Error(e) => {
                            println!("\n  ! {e}");
                        }
                        SessionEvent::Ended => {
                            println!("\nSession ended.");
                            break;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    // --- Journal ---

    pub async fn journal(&mut self) -> Result<()> {
        loop {
            let notes = self.store.load_notes().await;
            if notes.is_empty() {
                println!("The journal is empty.");
                return Ok(());
            }

            let mut items: Vec<String> = notes
                .iter()
                .map(|n| format!("{}  —  {}", n.date_time_utc, n.presenting_themes.join(", ")))
                .collect();
            items.push("Clear all".into());
            items.push("Back".into());

            let choice = Select::with_theme(&self.theme)
                .with_prompt("Journal (newest first)")
                .items(&items)
                .default(0)
                .interact()
                .map_err(anyhow::Error::from)?;

            if choice == notes.len() {
                self.journal_clear().await?;
                continue;
            }
            if choice > notes.len() {
                return Ok(());
            }

            let note = &notes[choice];
            println!("\n{}", serde_json::to_string_pretty(note)?);
            let delete = Confirm::with_theme(&self.theme)
                .with_prompt("Delete this note?")
                .default(false)
                .interact()
                .map_err(anyhow::Error::from)?;
            if delete {
                self.store.delete_note(choice).await?;
                println!("Deleted.");
            }
        }
    }

    pub async fn journal_list(&self) -> Result<()> {
        let notes = self.store.load_notes().await;
        if notes.is_empty() {
            println!("The journal is empty.");
            return Ok(());
        }
        for (i, note) in notes.iter().enumerate() {
            println!(
                "{:>3}. {}  [{}]\n     {}",
                i + 1,
                note.date_time_utc,
                note.presenting_themes.join(", "),
                note.summary
            );
        }
        Ok(())
    }

    pub async fn journal_delete(&self, number: usize) -> Result<()> {
        if number == 0 {
            println!("Note numbers start at 1.");
            return Ok(());
        }
        self.store.delete_note(number - 1).await?;
        println!("Deleted note {number}.");
        Ok(())
    }

    pub async fn journal_clear(&self) -> Result<()> {
        let confirmed = Confirm::with_theme(&self.theme)
            .with_prompt("Delete every journal note?")
            .default(false)
            .interact()
            .map_err(anyhow::Error::from)?;
        if confirmed {
            self.store.clear_notes().await?;
            println!("Journal cleared.");
        }
        Ok(())
    }

    // --- Settings ---

    pub async fn settings(&mut self) -> Result<()> {
        let current = self.store.load_voice_settings().await;
        println!("Current voice: {}", current.voice_name);

        let genders = [Gender::Feminine, Gender::Masculine, Gender::Neutral];
        let gender_idx = Select::with_theme(&self.theme)
            .with_prompt("Voice character")
            .items(&["Feminine", "Masculine", "Neutral"])
            .default(genders.iter().position(|g| *g == current.gender).unwrap_or(0))
            .interact()
            .map_err(anyhow::Error::from)?;
        let gender = genders[gender_idx];

        let accents = [Accent::Us, Accent::Uk];
        let accent_idx = Select::with_theme(&self.theme)
            .with_prompt("Accent")
            .items(&["US", "UK"])
            .default(accents.iter().position(|a| *a == current.accent).unwrap_or(0))
            .interact()
            .map_err(anyhow::Error::from)?;
        let accent = accents[accent_idx];

        let matching = voices_for(gender, accent);
        if matching.is_empty() {
            println!("No voice matches that combination yet.");
            return Ok(());
        }

        let labels: Vec<&str> = matching.iter().map(|v| v.label).collect();
        let voice_idx = Select::with_theme(&self.theme)
            .with_prompt("Voice")
            .items(&labels)
            .default(0)
            .interact()
            .map_err(anyhow::Error::from)?;
        let chosen = matching[voice_idx].settings.clone();

        if Confirm::with_theme(&self.theme)
            .with_prompt("Preview this voice?")
            .default(true)
            .interact()
            .map_err(anyhow::Error::from)?
        {
            self.preview_voice(&chosen).await;
        }

        self.store.save_voice_settings(&chosen).await?;
        println!("Voice set to {}.", chosen.voice_name);
        Ok(())
    }

    async fn preview_voice(&mut self, settings: &VoiceSettings) {
        let Some(api_key) = self.api_key() else { return };
        if let Err(e) = self.ensure_sink() {
            println!("  ! no audio output: {e}");
            return;
        }

        let tts = TtsClient::new(self.config.base_url(), &api_key, self.config.tts_model());
        let text = format!(
            "Hello, I'm {}. I'm here whenever you'd like to talk.",
            settings.voice_name
        );
        match tts.synthesize(&text, &settings.voice_name).await {
            Ok(samples) => {
                let handle = self.scheduler.schedule(samples);
                tokio::time::sleep(Duration::from_secs_f64(handle.duration + 0.2)).await;
            }
            Err(e) => println!("  ! preview failed: {e}"),
        }
    }

    // --- Attunements ---

    pub async fn attunements(&mut self) -> Result<()> {
        let active = self.store.load_active_modules().await;

        let items: Vec<String> = SPECIALIST_MODULES
            .iter()
            .map(|m| format!("{} {} — {}", m.icon, m.name, m.description))
            .collect();
        let defaults: Vec<bool> = SPECIALIST_MODULES
            .iter()
            .map(|m| active.iter().any(|id| id == m.id))
            .collect();

        let selected = MultiSelect::with_theme(&self.theme)
            .with_prompt("Attunement modules (space toggles, enter saves)")
            .items(&items)
            .defaults(&defaults)
            .interact()
            .map_err(anyhow::Error::from)?;

        let ids: Vec<String> = selected
            .into_iter()
            .map(|i| SPECIALIST_MODULES[i].id.to_string())
            .collect();
        debug!(?ids, "active modules updated");
        self.store.save_active_modules(&ids).await?;
        println!("{} module(s) active.", ids.len());
        Ok(())
    }

    // --- Ambient ---

    pub async fn ambient(&mut self) -> Result<()> {
        loop {
            let mut items: Vec<String> = AMBIENT_TRACKS
                .iter()
                .map(|t| format!("{} {} — {}", t.icon, t.name, t.description))
                .collect();
            items.push("Volume".into());
            items.push("Stop".into());
            items.push("Back".into());

            let choice = Select::with_theme(&self.theme)
                .with_prompt(match self.ambient.current() {
                    Some(id) => format!("Ambient (playing: {id})"),
                    None => "Ambient".to_string(),
                })
                .items(&items)
                .default(0)
                .interact()
                .map_err(anyhow::Error::from)?;

            if choice < AMBIENT_TRACKS.len() {
                if let Err(e) = self.ensure_sink() {
                    println!("  ! no audio output: {e}");
                    continue;
                }
                match self.ambient.play(AMBIENT_TRACKS[choice].id).await {
                    Ok(()) => println!("Playing {}.", AMBIENT_TRACKS[choice].name),
                    Err(e) => println!("  ! {e}"),
                }
            } else if choice == AMBIENT_TRACKS.len() {
                let volume: String = Input::with_theme(&self.theme)
                    .with_prompt("Volume (0-100)")
                    .interact_text()
                    .map_err(anyhow::Error::from)?;
                if let Ok(percent) = volume.trim().parse::<u32>() {
                    self.ambient.set_volume(percent.min(100) as f32 / 100.0);
                }
            } else if choice == AMBIENT_TRACKS.len() + 1 {
                self.ambient.stop();
            } else {
                return Ok(());
            }
        }
    }

    pub fn ambient_list() {
        for track in AMBIENT_TRACKS {
            println!("{}  {} ({}) — {}", track.icon, track.name, track.id, track.description);
        }
    }

    // --- Status ---

    pub async fn status(&self) {
        let notes = self.store.load_notes().await;
        let modules = self.store.load_active_modules().await;
        let voice = self.store.load_voice_settings().await;
        let name = self.store.load_display_name().await;

        println!("Profile: {}", self.store.dir().display());
        println!("Display name: {}", name.as_deref().unwrap_or("(not set)"));
        println!("Voice: {}", voice.voice_name);
        println!(
            "Active modules: {}",
            if modules.is_empty() {
                "(none)".to_string()
            } else {
                modules.join(", ")
            }
        );
        println!("Journal notes: {}", notes.len());
        println!(
            "API key: {}",
            if self.config.resolve_api_key().is_some() {
                "configured"
            } else {
                "missing"
            }
        );
        println!(
            "Known voices: {}",
            available_voices()
                .iter()
                .map(|v| v.settings.voice_name.clone())
                .collect::<Vec<_>>()
                .join(", ")
        );
    }
}

/// One-line level meter, redrawn in place while the microphone is live.
fn render_level(rms: f32) {
    let width = (rms * 60.0).min(20.0) as usize;
    print!("\r[{:<20}]", "#".repeat(width));
    let _ = std::io::stdout().flush();
}
