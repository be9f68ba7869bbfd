//! Content type detection used to pick a starting compression level.
//!
//! Animation compresses much better than live action at equal perceived
//! quality, so it starts at a higher level and gets the encoder's animation tune.

use std::path::Path;

const ANIMATION_KEYWORDS: &[&str] = &["animation", "animated", "anime", "cartoon", "pixar", "disney"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentType {
    Animation,
    LiveAction,
}

impl ContentType {
    /// Classifies a file from its name; anything unrecognized is live action
    pub fn detect(path: &Path) -> Self {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_lowercase())
            .unwrap_or_default();

        if ANIMATION_KEYWORDS.iter().any(|k| name.contains(k)) {
            Self::Animation
        } else {
            Self::LiveAction
        }
    }

    /// Offset applied to the codec's default level
    pub fn level_offset(&self) -> i16 {
        match self {
            Self::Animation => 2,
            Self::LiveAction => -3,
        }
    }

    pub fn tune(&self) -> Option<&'static str> {
        match self {
            Self::Animation => Some("animation"),
            Self::LiveAction => None,
        }
    }
}

/// Offset for the source resolution: 4K tolerates more compression, SD less
pub fn resolution_offset(height: u32) -> i16 {
    match height {
        h if h >= 2160 => 2,
        h if h > 0 && h <= 480 => -2,
        _ => 0,
    }
}
