//! Scale resolution: tonic + interval set -> one pitch per grid row

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

// ============================================================================
// Note names and pitches
// ============================================================================

/// The twelve pitch classes, spelled with sharps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NoteName {
    C,
    CSharp,
    D,
    DSharp,
    E,
    F,
    FSharp,
    G,
    GSharp,
    A,
    ASharp,
    B,
}

impl NoteName {
    const ALL: [NoteName; 12] = [
        Self::C,
        Self::CSharp,
        Self::D,
        Self::DSharp,
        Self::E,
        Self::F,
        Self::FSharp,
        Self::G,
        Self::GSharp,
        Self::A,
        Self::ASharp,
        Self::B,
    ];

    /// Pitch class for any semitone count (wraps mod 12)
    pub fn from_semitone(semitone: u8) -> Self {
        Self::ALL[(semitone % 12) as usize]
    }

    pub fn semitone(&self) -> u8 {
        *self as u8
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::C => "C",
            Self::CSharp => "C#",
            Self::D => "D",
            Self::DSharp => "D#",
            Self::E => "E",
            Self::F => "F",
            Self::FSharp => "F#",
            Self::G => "G",
            Self::GSharp => "G#",
            Self::A => "A",
            Self::ASharp => "A#",
            Self::B => "B",
        }
    }
}

/// A note name in a specific octave (scientific pitch notation, C4 = middle C)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Pitch {
    pub name: NoteName,
    pub octave: i8,
}

impl Pitch {
    pub fn new(name: NoteName, octave: i8) -> Self {
        Self { name, octave }
    }

    /// MIDI note number (C4 = 60). May fall outside 0-127 for extreme octaves.
    pub fn midi_note(&self) -> i16 {
        (self.octave as i16 + 1) * 12 + self.name.semitone() as i16
    }

    /// Equal-tempered frequency in Hz (A4 = 440)
    pub fn frequency(&self) -> f32 {
        440.0 * 2.0_f32.powf((self.midi_note() as f32 - 69.0) / 12.0)
    }
}

impl fmt::Display for Pitch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.name.name(), self.octave)
    }
}

// ============================================================================
// Scale presets
// ============================================================================

/// Scale/mode types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ScaleMode {
    Major,
    Minor,
    Dorian,
    Phrygian,
    Lydian,
    Mixolydian,
    Locrian,
    HarmonicMinor,
    MelodicMinor,
    Pentatonic,
    /// C D F G A when rooted on C
    #[default]
    SuspendedPentatonic,
    MinorPentatonic,
    Blues,
    Chromatic,
}

impl ScaleMode {
    /// Get scale intervals (semitones from root)
    pub fn intervals(&self) -> &'static [u8] {
        match self {
            Self::Major => &[0, 2, 4, 5, 7, 9, 11],
            Self::Minor => &[0, 2, 3, 5, 7, 8, 10],
            Self::Dorian => &[0, 2, 3, 5, 7, 9, 10],
            Self::Phrygian => &[0, 1, 3, 5, 7, 8, 10],
            Self::Lydian => &[0, 2, 4, 6, 7, 9, 11],
            Self::Mixolydian => &[0, 2, 4, 5, 7, 9, 10],
            Self::Locrian => &[0, 1, 3, 5, 6, 8, 10],
            Self::HarmonicMinor => &[0, 2, 3, 5, 7, 8, 11],
            Self::MelodicMinor => &[0, 2, 3, 5, 7, 9, 11],
            Self::Pentatonic => &[0, 2, 4, 7, 9],
            Self::SuspendedPentatonic => &[0, 2, 5, 7, 9],
            Self::MinorPentatonic => &[0, 3, 5, 7, 10],
            Self::Blues => &[0, 3, 5, 6, 7, 10],
            Self::Chromatic => &[0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11],
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Major => "Major",
            Self::Minor => "Minor",
            Self::Dorian => "Dorian",
            Self::Phrygian => "Phrygian",
            Self::Lydian => "Lydian",
            Self::Mixolydian => "Mixolydian",
            Self::Locrian => "Locrian",
            Self::HarmonicMinor => "Harmonic Minor",
            Self::MelodicMinor => "Melodic Minor",
            Self::Pentatonic => "Pentatonic",
            Self::SuspendedPentatonic => "Suspended Pentatonic",
            Self::MinorPentatonic => "Minor Pentatonic",
            Self::Blues => "Blues",
            Self::Chromatic => "Chromatic",
        }
    }
}

/// Scale selection: a named preset or an explicit interval list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScaleSpec {
    Preset(ScaleMode),
    Custom(Vec<u8>),
}

impl Default for ScaleSpec {
    fn default() -> Self {
        Self::Preset(ScaleMode::default())
    }
}

impl ScaleSpec {
    pub fn intervals(&self) -> &[u8] {
        match self {
            Self::Preset(mode) => mode.intervals(),
            Self::Custom(intervals) => intervals,
        }
    }
}

// ============================================================================
// Resolver
// ============================================================================

/// One pitch per grid row. Row 0 holds the highest pitch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scale {
    pitches: Vec<Pitch>,
}

impl Scale {
    /// Resolve `height` pitches from a tonic (0-11) and an ascending interval
    /// list (each 0-11). Intervals that push `tonic + interval` past 11 land in
    /// the next octave, so ascending index always means ascending pitch before
    /// the rows are flipped top-to-bottom.
    pub fn resolve(
        tonic: u8,
        intervals: &[u8],
        height: usize,
        base_octave: i8,
    ) -> Result<Self, ConfigError> {
        validate_scale(tonic, intervals)?;
        if height == 0 {
            return Err(ConfigError::ZeroDimension { width: 0, height });
        }

        let n = intervals.len();
        let octave_offset = intervals
            .iter()
            .position(|&interval| tonic + interval >= 12)
            .map(|wrap| n - wrap)
            .unwrap_or(0);

        let mut pitches: Vec<Pitch> = (0..height)
            .map(|i| {
                let name = NoteName::from_semitone(tonic + intervals[i % n]);
                let octave = base_octave as i64 + ((i + octave_offset) / n) as i64;
                Pitch::new(name, octave.clamp(i8::MIN as i64, i8::MAX as i64) as i8)
            })
            .collect();
        pitches.reverse();

        Ok(Self { pitches })
    }

    pub fn from_spec(
        tonic: u8,
        spec: &ScaleSpec,
        height: usize,
        base_octave: i8,
    ) -> Result<Self, ConfigError> {
        Self::resolve(tonic, spec.intervals(), height, base_octave)
    }

    pub fn len(&self) -> usize {
        self.pitches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pitches.is_empty()
    }

    /// Pitch for a grid row
    pub fn get(&self, row: usize) -> Option<Pitch> {
        self.pitches.get(row).copied()
    }

    pub fn pitches(&self) -> &[Pitch] {
        &self.pitches
    }
}

/// Check a tonic and interval list without resolving anything
pub fn validate_scale(tonic: u8, intervals: &[u8]) -> Result<(), ConfigError> {
    if tonic > 11 {
        return Err(ConfigError::TonicOutOfRange(tonic));
    }
    if intervals.is_empty() {
        return Err(ConfigError::EmptyIntervals);
    }
    if let Some(&bad) = intervals.iter().find(|&&i| i > 11) {
        return Err(ConfigError::IntervalOutOfRange(bad));
    }
    if intervals.windows(2).any(|w| w[0] >= w[1]) {
        return Err(ConfigError::IntervalsNotAscending(intervals.to_vec()));
    }
    Ok(())
}
