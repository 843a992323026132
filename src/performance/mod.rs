pub mod chord;
mod highlight;
mod history;
mod tracker;

pub use chord::{Chord, ChordQuality};
pub use highlight::{Highlight, HighlightDetector, HighlightEvent, HighlightKind};
pub use history::{TimedRing, Timestamped};
pub use tracker::{ActiveNote, NoteEvent, PerformanceTracker};
