//! Stem roles and the per-song stem set

use std::collections::BTreeMap;
use std::fmt;

use rf_core::AudioBuffer;
use serde::{Deserialize, Serialize};

use crate::config::MixConfig;
use crate::error::{MixError, MixResult};

/// Role of an isolated stem within a song
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StemRole {
    /// Lead vocal, the loudness anchor
    Vocal,
    /// Drums and percussion
    Drums,
    /// Bass
    Bass,
    /// Everything else (instrumental remainder)
    Other,
}

impl StemRole {
    /// All roles in mixing order
    pub const ALL: [StemRole; 4] = [
        StemRole::Vocal,
        StemRole::Drums,
        StemRole::Bass,
        StemRole::Other,
    ];

    /// Lowercase name used in reports and file names
    pub fn name(self) -> &'static str {
        match self {
            StemRole::Vocal => "vocal",
            StemRole::Drums => "drums",
            StemRole::Bass => "bass",
            StemRole::Other => "other",
        }
    }

    /// Match a file stem such as `vocals` or `Drums` to a role
    pub fn from_file_stem(stem: &str) -> Option<Self> {
        match stem.trim().to_ascii_lowercase().as_str() {
            "vocal" | "vocals" | "vox" => Some(StemRole::Vocal),
            "drums" | "drum" => Some(StemRole::Drums),
            "bass" => Some(StemRole::Bass),
            "other" | "instrumental" | "music" => Some(StemRole::Other),
            _ => None,
        }
    }

    /// Drums and bass follow the vocal sidechain
    pub fn is_ducked(self) -> bool {
        matches!(self, StemRole::Drums | StemRole::Bass)
    }
}

impl fmt::Display for StemRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One decoded stem
#[derive(Debug, Clone)]
pub struct Stem {
    /// Stem role
    pub role: StemRole,
    /// Decoded samples
    pub buffer: AudioBuffer,
}

impl Stem {
    /// Create stem
    pub fn new(role: StemRole, buffer: AudioBuffer) -> Self {
        Self { role, buffer }
    }

    /// Duration in seconds
    pub fn duration(&self) -> f64 {
        self.buffer.duration()
    }
}

/// Up to one stem per role for a single song
#[derive(Debug, Clone, Default)]
pub struct StemSet {
    stems: BTreeMap<StemRole, Stem>,
}

impl StemSet {
    /// Empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, stem: Stem) -> Self {
        self.insert(stem);
        self
    }

    /// Insert or replace the stem for its role
    pub fn insert(&mut self, stem: Stem) -> Option<Stem> {
        self.stems.insert(stem.role, stem)
    }

    /// Stem for a role
    pub fn get(&self, role: StemRole) -> Option<&Stem> {
        self.stems.get(&role)
    }

    /// Stems in role order
    pub fn iter(&self) -> impl Iterator<Item = &Stem> {
        self.stems.values()
    }

    /// Roles present
    pub fn roles(&self) -> Vec<StemRole> {
        self.stems.keys().copied().collect()
    }

    /// Number of stems
    pub fn len(&self) -> usize {
        self.stems.len()
    }

    /// True when no stems are present
    pub fn is_empty(&self) -> bool {
        self.stems.is_empty()
    }

    /// Channel count shared by the stems (0 when empty)
    pub fn channels(&self) -> usize {
        self.stems.values().next().map_or(0, |s| s.buffer.channels)
    }

    /// Length of the longest stem in frames
    pub fn max_frames(&self) -> usize {
        self.stems.values().map(|s| s.buffer.frames()).max().unwrap_or(0)
    }

    /// Check required roles and the shared sample format
    pub fn validate(&self, config: &MixConfig) -> MixResult<()> {
        if let Some(&role) = config.required_stems.iter().find(|r| !self.stems.contains_key(r)) {
            return Err(MixError::MissingStem { role });
        }
        if self.stems.is_empty() {
            return Err(MixError::InvalidConfig("stem set is empty".into()));
        }

        let channels = self.channels();
        for stem in self.stems.values() {
            let buffer = &stem.buffer;
            if buffer.sample_rate != config.sample_rate {
                return Err(MixError::FormatMismatch {
                    role: stem.role,
                    detail: format!(
                        "sample rate {} Hz, engine runs at {} Hz",
                        buffer.sample_rate, config.sample_rate
                    ),
                });
            }
            if buffer.channels != channels || buffer.channels == 0 {
                return Err(MixError::FormatMismatch {
                    role: stem.role,
                    detail: format!("{} channels, expected {}", buffer.channels, channels),
                });
            }
        }

        Ok(())
    }
}

impl FromIterator<Stem> for StemSet {
    fn from_iter<I: IntoIterator<Item = Stem>>(iter: I) -> Self {
        let mut set = StemSet::new();
        for stem in iter {
            set.insert(stem);
        }
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stem(role: StemRole, channels: usize, sample_rate: u32) -> Stem {
        Stem::new(role, AudioBuffer::silence(channels, sample_rate, 480))
    }

    fn full_set() -> StemSet {
        StemRole::ALL.iter().map(|&r| stem(r, 2, 48000)).collect()
    }

    #[test]
    fn test_role_from_file_stem() {
        assert_eq!(StemRole::from_file_stem("vocals"), Some(StemRole::Vocal));
        assert_eq!(StemRole::from_file_stem("Drums"), Some(StemRole::Drums));
        assert_eq!(StemRole::from_file_stem("instrumental"), Some(StemRole::Other));
        assert_eq!(StemRole::from_file_stem("click"), None);
    }

    #[test]
    fn test_validate_full_set() {
        assert!(full_set().validate(&MixConfig::default()).is_ok());
    }

    #[test]
    fn test_validate_missing_stem() {
        let set: StemSet = [StemRole::Vocal, StemRole::Bass, StemRole::Other]
            .iter()
            .map(|&r| stem(r, 2, 48000))
            .collect();

        match set.validate(&MixConfig::default()) {
            Err(MixError::MissingStem { role }) => assert_eq!(role, StemRole::Drums),
            other => panic!("expected MissingStem, got {other:?}"),
        }
    }

    #[test]
    fn test_validate_optional_stems() {
        let config = MixConfig {
            required_stems: vec![StemRole::Vocal],
            ..Default::default()
        };
        let set = StemSet::new().with(stem(StemRole::Vocal, 1, 48000));
        assert!(set.validate(&config).is_ok());
    }

    #[test]
    fn test_validate_format_mismatch() {
        let mut set = full_set();
        set.insert(stem(StemRole::Bass, 2, 44100));
        assert!(matches!(
            set.validate(&MixConfig::default()),
            Err(MixError::FormatMismatch { role: StemRole::Bass, .. })
        ));

        let mut set = full_set();
        set.insert(stem(StemRole::Other, 1, 48000));
        assert!(matches!(
            set.validate(&MixConfig::default()),
            Err(MixError::FormatMismatch { .. })
        ));
    }
}
