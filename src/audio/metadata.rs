//! Track metadata extraction
//!
//! File sources are scanned once with lofty when they are opened. Stream
//! sources start empty and pick up artist/title if tag frames show up in the
//! first bytes the decoder sees.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use lofty::file::{AudioFile, TaggedFile, TaggedFileExt};
use lofty::probe::Probe;
use lofty::tag::{Accessor, Tag, TagType};

use super::decoder::StreamTags;

/// Artist, title and duration of the current track
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackMetadata {
    pub artist: Option<String>,
    pub title: Option<String>,
    /// Unknown for live streams
    pub duration: Option<Duration>,
}

impl TrackMetadata {
    /// Read tags and duration from an audio file
    ///
    /// ID3v2 wins over ID3v1; other containers use their primary tag.
    pub fn from_file(path: &Path) -> Result<Self> {
        let tagged_file = Probe::open(path)
            .context("Failed to open audio file")?
            .read()
            .context("Failed to read audio file")?;

        let duration = tagged_file.properties().duration();
        let mut metadata = Self {
            duration: (!duration.is_zero()).then_some(duration),
            ..Default::default()
        };

        if let Some(tag) = preferred_tag(&tagged_file) {
            metadata.artist = tag.artist().map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
            metadata.title = tag.title().map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
        }

        Ok(metadata)
    }

    /// Metadata for a live stream (no duration)
    pub fn from_stream_tags(tags: &StreamTags) -> Self {
        Self {
            artist: tags.artist.clone(),
            title: tags.title.clone(),
            duration: None,
        }
    }

    pub fn has_tags(&self) -> bool {
        self.artist.is_some() || self.title.is_some()
    }

    /// Title for display, falling back to the file name when untagged
    pub fn display_title(&self, path: &Path) -> String {
        match (&self.artist, &self.title) {
            (Some(artist), Some(title)) => format!("{} - {}", artist, title),
            (None, Some(title)) => title.clone(),
            _ => path
                .file_stem()
                .and_then(|s| s.to_str())
                .map(|s| s.to_string())
                .unwrap_or_else(|| path.display().to_string()),
        }
    }
}

fn preferred_tag(tagged_file: &TaggedFile) -> Option<&Tag> {
    tagged_file
        .tag(TagType::Id3v2)
        .or_else(|| tagged_file.tag(TagType::Id3v1))
        .or_else(|| tagged_file.primary_tag())
        .or_else(|| tagged_file.first_tag())
}

/// Best-effort metadata for a file; failures are logged and yield defaults
pub fn read_file_metadata(path: &Path) -> TrackMetadata {
    match TrackMetadata::from_file(path) {
        Ok(metadata) => metadata,
        Err(e) => {
            tracing::warn!("Failed to read metadata from {:?}: {:#}", path, e);
            TrackMetadata::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::decoder::tests::write_wav;
    use std::path::PathBuf;

    #[test]
    fn test_untagged_wav_has_duration_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plain.wav");
        write_wav(&path, 8000, 1, 3.0);

        let metadata = TrackMetadata::from_file(&path).unwrap();
        assert!(!metadata.has_tags());
        let secs = metadata.duration.unwrap().as_secs_f32();
        assert!((secs - 3.0).abs() < 0.1, "duration {}", secs);
    }

    #[test]
    fn test_unreadable_file_falls_back_to_default() {
        let metadata = read_file_metadata(Path::new("/nonexistent/file.mp3"));
        assert_eq!(metadata, TrackMetadata::default());
    }

    #[test]
    fn test_display_title_fallbacks() {
        let path = PathBuf::from("/music/01 Intro.mp3");

        let untagged = TrackMetadata::default();
        assert_eq!(untagged.display_title(&path), "01 Intro");

        let titled = TrackMetadata {
            title: Some("Intro".to_string()),
            ..Default::default()
        };
        assert_eq!(titled.display_title(&path), "Intro");

        let full = TrackMetadata {
            artist: Some("Band".to_string()),
            title: Some("Intro".to_string()),
            duration: None,
        };
        assert_eq!(full.display_title(&path), "Band - Intro");
    }

    #[test]
    fn test_from_stream_tags_has_no_duration() {
        let tags = StreamTags {
            artist: Some("DJ".to_string()),
            title: None,
        };
        let metadata = TrackMetadata::from_stream_tags(&tags);
        assert_eq!(metadata.artist.as_deref(), Some("DJ"));
        assert!(metadata.duration.is_none());
    }
}
