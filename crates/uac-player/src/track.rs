//! Track identity and supported formats.

use std::fmt;
use std::path::Path;

/// Absolute path of a playable file. Equality is exact string match.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TrackReference(String);

impl TrackReference {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    /// Build the reference for `name` inside `dir`.
    pub fn in_dir(dir: &Path, name: &str) -> Self {
        Self(dir.join(name).to_string_lossy().into_owned())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_path(&self) -> &Path {
        Path::new(&self.0)
    }

    /// Detected format, or `None` when the extension is not supported.
    pub fn format(&self) -> Option<AudioFormat> {
        AudioFormat::from_path(self.as_path())
    }
}

impl fmt::Display for TrackReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TrackReference {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// A request for the pipeline to play one track.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlaybackRequest {
    pub track: TrackReference,
}

impl PlaybackRequest {
    pub fn new(track: TrackReference) -> Self {
        Self { track }
    }
}

/// Compressed formats the decoder collaborator understands.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AudioFormat {
    /// MPEG-1/2/2.5 Layer III.
    Mp3,
    /// AAC in an ADTS stream.
    Aac,
}

impl AudioFormat {
    /// Detect the format from a file extension (case-insensitive).
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?;
        Self::from_extension(ext)
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "mp3" => Some(Self::Mp3),
            "aac" => Some(Self::Aac),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Mp3 => "MP3",
            Self::Aac => "AAC",
        }
    }
}

/// True when `name` carries a recognized audio extension.
pub fn is_audio_file_name(name: &str) -> bool {
    AudioFormat::from_path(Path::new(name)).is_some()
}
