//! Profile store — durable journal notes and user preferences.
//!
//! Each key is its own file under the data directory so a corrupt entry only
//! loses that key. Writes go through a temp file and rename so a crash never
//! leaves a half-written snapshot behind.

use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::warn;

use crate::error::{AttuneError, Result};
use crate::types::{SessionNote, VoiceSettings};

const NOTES_FILE: &str = "notes.json";
const VOICE_SETTINGS_FILE: &str = "voice_settings.json";
const ACTIVE_MODULES_FILE: &str = "active_modules.json";
const DISPLAY_NAME_FILE: &str = "display_name";

#[derive(Debug, Clone)]
pub struct ProfileStore {
    dir: PathBuf,
}

impl ProfileStore {
    /// Open a store rooted at `dir`, creating the directory if needed.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    /// Open the default store under `~/.attune/`.
    pub async fn open_default() -> Result<Self> {
        Self::open(crate::config::data_dir()).await
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    // --- Session notes -----------------------------------------------------

    /// All journal notes, newest first. A missing or unreadable file yields an
    /// empty journal rather than an error.
    pub async fn load_notes(&self) -> Vec<SessionNote> {
        self.load_json(NOTES_FILE).await.unwrap_or_default()
    }

    /// Prepend a note (journal renders newest first) and persist the full
    /// snapshot.
    pub async fn add_note(&self, note: SessionNote) -> Result<()> {
        let mut notes = self.load_notes().await;
        notes.insert(0, note);
        self.save_json(NOTES_FILE, &notes).await
    }

    /// Delete the note at `index` (journal order). Out-of-range indices are
    /// rejected.
    pub async fn delete_note(&self, index: usize) -> Result<()> {
        let mut notes = self.load_notes().await;
        if index >= notes.len() {
            return Err(AttuneError::Store(format!(
                "note index {index} out of range ({} notes)",
                notes.len()
            )));
        }
        notes.remove(index);
        self.save_json(NOTES_FILE, &notes).await
    }

    /// Delete every journal note.
    pub async fn clear_notes(&self) -> Result<()> {
        self.save_json(NOTES_FILE, &Vec::<SessionNote>::new()).await
    }

    // --- Preferences -------------------------------------------------------

    /// Persisted voice persona, or the default when unset or unreadable.
    pub async fn load_voice_settings(&self) -> VoiceSettings {
        self.load_json(VOICE_SETTINGS_FILE).await.unwrap_or_default()
    }

    pub async fn save_voice_settings(&self, settings: &VoiceSettings) -> Result<()> {
        self.save_json(VOICE_SETTINGS_FILE, settings).await
    }

    /// IDs of the active specialist modules, in the order they were enabled.
    pub async fn load_active_modules(&self) -> Vec<String> {
        self.load_json(ACTIVE_MODULES_FILE).await.unwrap_or_default()
    }

    pub async fn save_active_modules(&self, ids: &[String]) -> Result<()> {
        self.save_json(ACTIVE_MODULES_FILE, &ids).await
    }

    /// Preferred display name, if the user has set one.
    pub async fn load_display_name(&self) -> Option<String> {
        let path = self.dir.join(DISPLAY_NAME_FILE);
        match fs::read_to_string(&path).await {
            Ok(name) => {
                let name = name.trim().to_string();
                (!name.is_empty()).then_some(name)
            }
            Err(_) => None,
        }
    }

    pub async fn save_display_name(&self, name: &str) -> Result<()> {
        self.write_atomic(DISPLAY_NAME_FILE, name.trim().as_bytes())
            .await
    }

    // --- Internals ---------------------------------------------------------

    async fn load_json<T: serde::de::DeserializeOwned>(&self, file: &str) -> Option<T> {
        let path = self.dir.join(file);
        let data = fs::read_to_string(&path).await.ok()?;
        match serde_json::from_str(&data) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(file, error = %e, "ignoring unreadable profile entry");
                None
            }
        }
    }

    async fn save_json<T: serde::Serialize>(&self, file: &str, value: &T) -> Result<()> {
        let data = serde_json::to_string_pretty(value)?;
        self.write_atomic(file, data.as_bytes()).await
    }

    async fn write_atomic(&self, file: &str, data: &[u8]) -> Result<()> {
        let path = self.dir.join(file);
        let tmp = self.dir.join(format!("{file}.tmp"));
        fs::write(&tmp, data).await?;
        fs::rename(&tmp, &path).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Accent, Gender};

    fn note(summary: &str) -> SessionNote {
        SessionNote {
            date_time_utc: "2025-06-01T12:00:00Z".into(),
            presenting_themes: vec!["stress".into()],
            summary: summary.into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_notes_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProfileStore::open(dir.path()).await.unwrap();

        store.add_note(note("first")).await.unwrap();
        store.add_note(note("second")).await.unwrap();

        let notes = store.load_notes().await;
        assert_eq!(notes.len(), 2);
        assert_eq!(notes[0].summary, "second");
        assert_eq!(notes[1].summary, "first");
    }

    #[tokio::test]
    async fn test_delete_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProfileStore::open(dir.path()).await.unwrap();

        store.add_note(note("a")).await.unwrap();
        store.add_note(note("b")).await.unwrap();

        store.delete_note(0).await.unwrap();
        let notes = store.load_notes().await;
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].summary, "a");

        assert!(store.delete_note(5).await.is_err());

        store.clear_notes().await.unwrap();
        assert!(store.load_notes().await.is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_notes_fall_back_to_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProfileStore::open(dir.path()).await.unwrap();

        std::fs::write(dir.path().join(NOTES_FILE), "{not json").unwrap();
        assert!(store.load_notes().await.is_empty());

        // A corrupt journal does not poison other keys
        store
            .save_voice_settings(&VoiceSettings::default())
            .await
            .unwrap();
        assert_eq!(store.load_voice_settings().await, VoiceSettings::default());
    }

    #[tokio::test]
    async fn test_voice_settings_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProfileStore::open(dir.path()).await.unwrap();

        assert_eq!(store.load_voice_settings().await, VoiceSettings::default());

        let chosen = VoiceSettings {
            voice_name: "Paddy".into(),
            gender: Gender::Masculine,
            accent: Accent::Uk,
        };
        store.save_voice_settings(&chosen).await.unwrap();
        assert_eq!(store.load_voice_settings().await, chosen);
    }

    #[tokio::test]
    async fn test_active_modules_and_display_name() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProfileStore::open(dir.path()).await.unwrap();

        assert!(store.load_active_modules().await.is_empty());
        store
            .save_active_modules(&["integration".into(), "sharing".into()])
            .await
            .unwrap();
        assert_eq!(
            store.load_active_modules().await,
            vec!["integration", "sharing"]
        );

        assert_eq!(store.load_display_name().await, None);
        store.save_display_name("  Robin ").await.unwrap();
        assert_eq!(store.load_display_name().await.as_deref(), Some("Robin"));
    }
}
