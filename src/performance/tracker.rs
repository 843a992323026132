use ringbuf::HeapRb;
use ringbuf::traits::{Consumer, RingBuffer};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::chord::{self, Chord};
use super::highlight::{Highlight, HighlightDetector};
use super::history::{TimedRing, Timestamped};
use crate::config::{HighlightConfig, TrackerConfig};
use crate::events::{PerformanceEvent, TimedEvent};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NoteEvent {
    pub note: u8,
    pub timestamp: f64,
    pub velocity: u8,
}

impl Timestamped for NoteEvent {
    fn timestamp(&self) -> f64 {
        self.timestamp
    }
}

/// A sounding note. It stays active after release while held by the pedal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActiveNote {
    pub start_time: f64,
    pub velocity: u8,
    pub pedal: bool,
    pub pressed: bool,
}

pub struct PerformanceTracker {
    history: TimedRing<NoteEvent>,
    chords: TimedRing<Chord>,
    active: BTreeMap<u8, ActiveNote>,
    durations: HeapRb<f64>,
    pedal_down: bool,
    detector: HighlightDetector,
}

impl PerformanceTracker {
    pub fn new(config: &TrackerConfig, highlight: HighlightConfig) -> Self {
        Self {
            history: TimedRing::new(config.history_capacity, config.retention),
            chords: TimedRing::new(config.history_capacity, config.retention),
            active: BTreeMap::new(),
            durations: HeapRb::new(config.duration_history.max(1)),
            pedal_down: false,
            detector: HighlightDetector::new(highlight),
        }
    }

    pub fn handle(&mut self, event: TimedEvent) -> Option<Highlight> {
        match event.event {
            PerformanceEvent::NoteOn { note, velocity } => {
                return self.note_on(note, velocity, event.timestamp);
            }
            PerformanceEvent::NoteOff { note } => self.note_off(note, event.timestamp),
            PerformanceEvent::PedalOn => self.pedal_on(),
            PerformanceEvent::PedalOff => self.pedal_off(),
        }
        None
    }

    /// Records the onset. A key that is already sounding is not restarted
    /// and cannot raise a highlight or a chord.
    pub fn note_on(&mut self, note: u8, velocity: u8, now: f64) -> Option<Highlight> {
        self.history.push(NoteEvent {
            note,
            timestamp: now,
            velocity,
        });
        if self.active.contains_key(&note) {
            return None;
        }
        self.active.insert(
            note,
            ActiveNote {
                start_time: now,
                velocity,
                pedal: self.pedal_down,
                pressed: true,
            },
        );

        let highlight = self.detector.evaluate(&self.history);

        if let Some((root, quality)) = chord::classify(self.active.keys().copied()) {
            tracing::debug!(
                root = chord::note_name(root),
                ?quality,
                "chord at {}{}",
                chord::note_name(note),
                chord::octave(note)
            );
            self.chords.push(Chord {
                timestamp: now,
                root,
                quality,
            });
        }

        highlight
    }

    pub fn note_off(&mut self, note: u8, now: f64) {
        let Some(active) = self.active.get_mut(&note) else {
            return;
        };
        active.pressed = false;
        if !active.pedal {
            self.durations.push_overwrite(now - active.start_time);
            self.active.remove(&note);
        }
    }

    pub fn pedal_on(&mut self) {
        self.pedal_down = true;
        for active in self.active.values_mut() {
            active.pedal = true;
        }
    }

    pub fn pedal_off(&mut self) {
        self.pedal_down = false;
        self.active.retain(|_, active| {
            active.pedal = false;
            active.pressed
        });
    }

    pub fn reset(&mut self) {
        self.history.clear();
        self.chords.clear();
        self.active.clear();
        self.durations.clear();
        self.pedal_down = false;
    }

    pub fn snapshot(&self) -> Vec<NoteEvent> {
        self.history.to_vec()
    }

    pub fn chords(&self) -> Vec<Chord> {
        self.chords.to_vec()
    }

    pub fn note_durations(&self) -> Vec<f64> {
        self.durations.iter().copied().collect()
    }

    pub fn active_notes(&self) -> &BTreeMap<u8, ActiveNote> {
        &self.active
    }

    pub fn pedal_down(&self) -> bool {
        self.pedal_down
    }

    pub fn note_count(&self) -> usize {
        self.history.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::performance::chord::ChordQuality;
    use crate::performance::highlight::HighlightKind;

    fn tracker() -> PerformanceTracker {
        PerformanceTracker::new(&TrackerConfig::default(), HighlightConfig::default())
    }

    #[test]
    fn release_removes_unpedalled_note_and_records_duration() {
        let mut t = tracker();
        t.note_on(60, 80, 1.0);
        assert!(t.active_notes()[&60].pressed);
        t.note_off(60, 1.5);
        assert!(t.active_notes().is_empty());
        assert_eq!(t.note_durations(), [0.5]);
    }

    #[test]
    fn pedal_sustains_released_notes() {
        let mut t = tracker();
        t.note_on(60, 80, 1.0);
        t.note_on(64, 80, 1.1);
        t.pedal_on();
        t.note_off(60, 1.5);
        assert_eq!(
            t.active_notes()[&60],
            ActiveNote {
                start_time: 1.0,
                velocity: 80,
                pedal: true,
                pressed: false
            }
        );

        t.pedal_off();
        assert!(!t.active_notes().contains_key(&60));
        assert!(!t.active_notes()[&64].pedal);
        assert!(t.active_notes()[&64].pressed);
        assert!(t.note_durations().is_empty());
    }

    #[test]
    fn note_struck_while_pedal_is_down_is_sustained() {
        let mut t = tracker();
        t.pedal_on();
        t.note_on(67, 70, 2.0);
        assert!(t.active_notes()[&67].pedal);
        t.note_off(67, 2.4);
        assert!(t.active_notes().contains_key(&67));
    }

    #[test]
    fn no_entry_is_both_released_and_unpedalled() {
        let mut t = tracker();
        let script: &[PerformanceEvent] = &[
            PerformanceEvent::NoteOn { note: 60, velocity: 70 },
            PerformanceEvent::PedalOn,
            PerformanceEvent::NoteOn { note: 62, velocity: 70 },
            PerformanceEvent::NoteOff { note: 60 },
            PerformanceEvent::NoteOff { note: 70 },
            PerformanceEvent::PedalOff,
            PerformanceEvent::NoteOff { note: 62 },
            PerformanceEvent::NoteOn { note: 62, velocity: 70 },
            PerformanceEvent::PedalOn,
            PerformanceEvent::NoteOff { note: 62 },
        ];
        for (i, &event) in script.iter().enumerate() {
            t.handle(TimedEvent {
                timestamp: i as f64 * 0.1,
                event,
            });
            assert!(
                t.active_notes().values().all(|a| a.pressed || a.pedal),
                "after {event:?}"
            );
        }
    }

    #[test]
    fn repeated_note_on_is_recorded_but_not_restarted() {
        let mut t = tracker();
        t.note_on(60, 80, 1.0);
        t.note_on(60, 100, 1.2);
        assert_eq!(t.note_count(), 2);
        assert_eq!(t.active_notes()[&60].start_time, 1.0);
        assert_eq!(t.active_notes()[&60].velocity, 80);
    }

    #[test]
    fn stray_note_off_is_ignored() {
        let mut t = tracker();
        t.note_off(42, 1.0);
        assert!(t.active_notes().is_empty());
        assert!(t.note_durations().is_empty());
    }

    #[test]
    fn chords_follow_the_active_set() {
        let mut t = tracker();
        t.note_on(57, 70, 1.0);
        assert!(t.chords().is_empty());
        t.note_on(60, 70, 1.1);
        t.note_on(64, 70, 1.2);
        let chords = t.chords();
        assert_eq!(chords.len(), 2);
        assert_eq!(chords[1].root, 9);
        assert_eq!(chords[1].quality, ChordQuality::Minor);
        assert_eq!(chords[1].timestamp, 1.2);
    }

    #[test]
    fn highlight_raised_from_note_on() {
        let mut t = tracker();
        for (i, note) in [60, 62, 64, 65].into_iter().enumerate() {
            assert_eq!(t.note_on(note, 50, 9.0 + i as f64 * 0.2), None);
        }
        let highlight = t.note_on(72, 110, 10.0).unwrap();
        assert_eq!(highlight.event.kind, HighlightKind::VelocityOutlier);
    }

    #[test]
    fn reset_clears_everything() {
        let mut t = tracker();
        t.pedal_on();
        t.note_on(60, 80, 1.0);
        t.note_on(64, 80, 1.0);
        t.reset();
        assert!(t.snapshot().is_empty());
        assert!(t.chords().is_empty());
        assert!(t.active_notes().is_empty());
        assert!(!t.pedal_down());
    }

    #[test]
    fn duration_history_is_bounded() {
        let mut t = tracker();
        for i in 0..40 {
            let start = i as f64;
            t.note_on(60, 80, start);
            t.note_off(60, start + 0.25);
        }
        assert_eq!(t.note_durations().len(), 30);
    }
}
