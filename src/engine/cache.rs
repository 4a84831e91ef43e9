// On-disk track cache. One audio file plus one JSON metadata record per track id.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::{AUDIO_EXTENSION, METADATA_EXTENSION, TEMP_EXTENSIONS};

/// Metadata stored beside each cached audio file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackMetadata {
    pub title: String,
    pub artist: String,
    #[serde(rename = "duration", alias = "duration_seconds", default)]
    pub duration_seconds: u64,
    #[serde(rename = "video_id", alias = "id")]
    pub id: String,
}

/// A complete cache entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedTrack {
    pub audio_path: PathBuf,
    pub metadata: TrackMetadata,
}

/// What is on disk for a given id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEntryState {
    Absent,
    /// Audio was renamed into place but its metadata is missing or unreadable.
    AudioOnly,
    Complete(CachedTrack),
}

/// Result of a two-step store.
#[derive(Debug)]
pub enum StoreOutcome {
    Complete(CachedTrack),
    /// Audio is in place; writing the metadata record failed.
    AudioOnly {
        audio_path: PathBuf,
        error: anyhow::Error,
    },
}

/// Track ids become file names, so only a conservative alphabet is accepted.
pub fn is_valid_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 64
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

#[derive(Debug, Clone)]
pub struct TrackCache {
    dir: PathBuf,
}

impl TrackCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn ensure_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        Ok(())
    }

    pub fn audio_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", id, AUDIO_EXTENSION))
    }

    pub fn metadata_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", id, METADATA_EXTENSION))
    }

    /// Temporary file the retrieval engine leaves after transcoding.
    pub fn temp_audio_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}_temp.{}", id, AUDIO_EXTENSION))
    }

    /// Output template handed to the retrieval engine.
    pub fn temp_template(&self, id: &str) -> String {
        self.dir
            .join(format!("{}_temp.%(ext)s", id))
            .to_string_lossy()
            .into_owned()
    }

    /// Inspect the entry for `id`. Never fails: I/O and parse errors read as absence.
    pub fn state(&self, id: &str) -> CacheEntryState {
        if !is_valid_id(id) {
            return CacheEntryState::Absent;
        }

        let audio_path = self.audio_path(id);
        match fs::metadata(&audio_path) {
            Ok(m) if m.is_file() && m.len() > 0 => {}
            _ => return CacheEntryState::Absent,
        }

        match self.read_metadata(id) {
            Ok(metadata) => CacheEntryState::Complete(CachedTrack {
                audio_path,
                metadata,
            }),
            Err(e) => {
                debug!("[{}] cached audio without usable metadata: {}", id, e);
                CacheEntryState::AudioOnly
            }
        }
    }

    /// A complete entry for `id`, or `None`.
    pub fn lookup(&self, id: &str) -> Option<CachedTrack> {
        match self.state(id) {
            CacheEntryState::Complete(track) => Some(track),
            CacheEntryState::AudioOnly | CacheEntryState::Absent => None,
        }
    }

    fn read_metadata(&self, id: &str) -> Result<TrackMetadata> {
        let raw = fs::read(self.metadata_path(id))?;
        let metadata: TrackMetadata = serde_json::from_slice(&raw)?;
        if metadata.id != id {
            return Err(anyhow!("metadata belongs to {}", metadata.id));
        }
        Ok(metadata)
    }

    /// Write `audio` for `id` via a temporary file, then its metadata.
    pub fn store(&self, id: &str, audio: &[u8], metadata: &TrackMetadata) -> Result<CachedTrack> {
        if !is_valid_id(id) {
            return Err(anyhow!("invalid track id {:?}", id));
        }
        self.ensure_dir()?;
        let temp = self.temp_audio_path(id);
        fs::write(&temp, audio)?;
        match self.store_file(id, &temp, metadata)? {
            StoreOutcome::Complete(track) => Ok(track),
            StoreOutcome::AudioOnly { error, .. } => Err(error),
        }
    }

    /// Rename `temp` into place as the audio for `id`, then write its metadata.
    ///
    /// A failed rename is an error; a failed metadata write leaves a legal
    /// `AudioOnly` entry and is reported through [`StoreOutcome::AudioOnly`].
    pub fn store_file(&self, id: &str, temp: &Path, metadata: &TrackMetadata) -> Result<StoreOutcome> {
        if !is_valid_id(id) {
            return Err(anyhow!("invalid track id {:?}", id));
        }
        let audio_path = self.audio_path(id);
        fs::rename(temp, &audio_path)?;
        info!("[{}] renamed {} to {}", id, temp.display(), audio_path.display());

        match self.write_metadata(id, metadata) {
            Ok(()) => Ok(StoreOutcome::Complete(CachedTrack {
                audio_path,
                metadata: metadata.clone(),
            })),
            Err(error) => {
                warn!("[{}] failed to save metadata: {}", id, error);
                Ok(StoreOutcome::AudioOnly { audio_path, error })
            }
        }
    }

    fn write_metadata(&self, id: &str, metadata: &TrackMetadata) -> Result<()> {
        let path = self.metadata_path(id);
        let tmp = self.dir.join(format!("{}.{}.tmp", id, METADATA_EXTENSION));
        let written = (|| -> Result<()> {
            let mut file = fs::File::create(&tmp)?;
            serde_json::to_writer_pretty(&mut file, metadata)?;
            file.write_all(b"\n")?;
            file.sync_all()?;
            fs::rename(&tmp, &path)?;
            Ok(())
        })();
        if written.is_err() && tmp.is_file() {
            if let Err(e) = fs::remove_file(&tmp) {
                warn!("[{}] could not remove {}: {}", id, tmp.display(), e);
            }
        }
        written?;
        debug!("[{}] saved metadata to {}", id, path.display());
        Ok(())
    }

    /// Whether `file_name` is an intermediate artifact of a download for `id`.
    fn is_temp_artifact(id: &str, file_name: &str) -> bool {
        if file_name == format!("{}.{}.tmp", id, METADATA_EXTENSION) {
            return true;
        }
        let Some(rest) = file_name.strip_prefix(&format!("{}_temp.", id)) else {
            return false;
        };
        TEMP_EXTENSIONS.contains(&rest)
            || rest.ends_with(".part")
            || rest.ends_with(".ytdl")
            || rest.contains(".part-Frag")
    }

    /// Remove every intermediate artifact for `id`. Returns how many were removed.
    pub fn cleanup_partials(&self, id: &str) -> usize {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(_) => return 0,
        };

        let mut removed = 0;
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if !Self::is_temp_artifact(id, name) {
                continue;
            }
            match fs::remove_file(entry.path()) {
                Ok(()) => {
                    debug!("[{}] removed partial {}", id, name);
                    removed += 1;
                }
                Err(e) => warn!("[{}] could not remove partial {}: {}", id, name, e),
            }
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_ids() {
        assert!(is_valid_id("abc123"));
        assert!(is_valid_id("7wtfhZwyrcc"));
        assert!(is_valid_id("a-b_c"));
        assert!(!is_valid_id(""));
        assert!(!is_valid_id("../etc/passwd"));
        assert!(!is_valid_id("a b"));
    }

    #[test]
    fn test_temp_artifact_names() {
        assert!(TrackCache::is_temp_artifact("abc", "abc_temp.webm"));
        assert!(TrackCache::is_temp_artifact("abc", "abc_temp.part"));
        assert!(TrackCache::is_temp_artifact("abc", "abc_temp.webm.part"));
        assert!(!TrackCache::is_temp_artifact("abc", "abc.mp3"));
        assert!(!TrackCache::is_temp_artifact("abc", "abcd_temp.webm"));
        assert!(TrackCache::is_temp_artifact("abc", "abc.json.tmp"));
        assert!(!TrackCache::is_temp_artifact("abc", "abc.json"));
    }

    #[test]
    fn test_metadata_json_keys() {
        let meta = TrackMetadata {
            title: "Believer".into(),
            artist: "Imagine Dragons".into(),
            duration_seconds: 204,
            id: "abc123".into(),
        };
        let v: serde_json::Value = serde_json::to_value(&meta).unwrap();
        assert_eq!(v["duration"], 204);
        assert_eq!(v["video_id"], "abc123");

        let alt: TrackMetadata = serde_json::from_str(
            r#"{"title":"t","artist":"a","duration_seconds":3,"id":"x"}"#,
        )
        .unwrap();
        assert_eq!(alt.duration_seconds, 3);
        assert_eq!(alt.id, "x");
    }
}
