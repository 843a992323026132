use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::history::Timestamped;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChordQuality {
    Major,
    Minor,
}

impl ChordQuality {
    /// +1 for major, -1 for minor.
    pub fn tonality(self) -> f64 {
        match self {
            ChordQuality::Major => 1.0,
            ChordQuality::Minor => -1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Chord {
    pub timestamp: f64,
    /// Pitch class of the lowest sounding note, 0 = C.
    pub root: u8,
    pub quality: ChordQuality,
}

impl Timestamped for Chord {
    fn timestamp(&self) -> f64 {
        self.timestamp
    }
}

const NOTE_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

pub fn note_name(note: u8) -> &'static str {
    NOTE_NAMES[(note % 12) as usize]
}

pub fn octave(note: u8) -> i8 {
    (note / 12) as i8 - 1
}

/// Classifies the sounding pitches by the smallest interval above the lowest
/// note that is a third or a seventh: 4 or 11 semitones give major, 3 or 10
/// give minor. Returns the root pitch class and the quality.
pub fn classify(pitches: impl IntoIterator<Item = u8>) -> Option<(u8, ChordQuality)> {
    let pitches: BTreeSet<u8> = pitches.into_iter().collect();
    if pitches.len() < 2 {
        return None;
    }
    let root = *pitches.first()?;
    let intervals: BTreeSet<u8> = pitches.iter().map(|p| (p - root) % 12).collect();

    intervals.iter().find_map(|interval| match interval {
        4 | 11 => Some((root % 12, ChordQuality::Major)),
        3 | 10 => Some((root % 12, ChordQuality::Minor)),
        _ => None,
    })
}
