use serde::{Deserialize, Serialize};

use super::history::TimedRing;
use super::tracker::NoteEvent;
use crate::config::HighlightConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HighlightKind {
    VelocityOutlier,
    BurstIntensity,
}

impl HighlightKind {
    /// Numeric code used in the session record.
    pub fn code(self) -> u8 {
        match self {
            HighlightKind::VelocityOutlier => 0,
            HighlightKind::BurstIntensity => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HighlightEvent {
    pub timestamp: f64,
    pub kind: HighlightKind,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Highlight {
    pub event: HighlightEvent,
    /// Velocity ratio for outliers, intensity ratio for bursts.
    pub factor: f64,
}

#[derive(Debug, Clone)]
pub struct HighlightDetector {
    config: HighlightConfig,
}

impl HighlightDetector {
    pub fn new(config: HighlightConfig) -> Self {
        Self { config }
    }

    /// Checks the newest note in `history` against the notes played shortly
    /// before it. At most one rule fires: a velocity outlier wins over a
    /// burst.
    pub fn evaluate(&self, history: &TimedRing<NoteEvent>) -> Option<Highlight> {
        if history.len() < self.config.min_history {
            return None;
        }
        let played = *history.last()?;
        let now = played.timestamp;

        let recent: Vec<f64> = history
            .since(now - self.config.window)
            .map(|note| note.velocity as f64)
            .collect();
        // the played note is always the newest entry of the window
        let previous = &recent[..recent.len().saturating_sub(1)];
        if previous.is_empty() {
            return None;
        }

        let count = previous.len() as f64;
        let mean = previous.iter().sum::<f64>() / count;
        let variance = previous.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / count;
        let velocity = played.velocity as f64;

        if velocity > mean + self.config.stddev_factor * variance.sqrt() {
            return Some(Highlight {
                event: HighlightEvent {
                    timestamp: now,
                    kind: HighlightKind::VelocityOutlier,
                },
                factor: velocity / mean,
            });
        }

        let intensity: f64 = history
            .since(now - self.config.burst_window)
            .map(|note| note.velocity as f64)
            .sum();
        if intensity > self.config.burst_threshold {
            return Some(Highlight {
                event: HighlightEvent {
                    timestamp: now,
                    kind: HighlightKind::BurstIntensity,
                },
                factor: intensity / self.config.burst_threshold,
            });
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn history(notes: &[(f64, u8)]) -> TimedRing<NoteEvent> {
        let mut ring = TimedRing::new(64, 60.0);
        for &(timestamp, velocity) in notes {
            ring.push(NoteEvent {
                note: 60,
                timestamp,
                velocity,
            });
        }
        ring
    }

    fn detector() -> HighlightDetector {
        HighlightDetector::new(HighlightConfig::default())
    }

    #[test]
    fn loud_note_after_quiet_passage_is_an_outlier() {
        let ring = history(&[(9.0, 50), (9.2, 52), (9.4, 48), (9.6, 50), (10.0, 100)]);
        let highlight = detector().evaluate(&ring).unwrap();
        assert_eq!(highlight.event.kind, HighlightKind::VelocityOutlier);
        assert_eq!(highlight.event.timestamp, 10.0);
        assert!((highlight.factor - 2.0).abs() < 1e-9);
    }

    #[test]
    fn dense_cluster_is_a_burst() {
        // the outlier rule cannot fire: the played note is the quietest
        let ring = history(&[
            (9.0, 120),
            (9.95, 110),
            (9.96, 110),
            (9.97, 110),
            (10.0, 100),
        ]);
        let highlight = detector().evaluate(&ring).unwrap();
        assert_eq!(highlight.event.kind, HighlightKind::BurstIntensity);
        assert!((highlight.factor - 430.0 / 400.0).abs() < 1e-9);
        assert_eq!(highlight.event.kind.code(), 1);
    }

    #[test]
    fn steady_playing_does_not_fire() {
        let ring = history(&[(9.0, 64), (9.3, 64), (9.6, 64), (9.8, 64), (10.0, 64)]);
        assert_eq!(detector().evaluate(&ring), None);
    }

    #[test]
    fn needs_enough_history() {
        let ring = history(&[(9.0, 10), (9.5, 10), (9.8, 10), (10.0, 127)]);
        assert_eq!(detector().evaluate(&ring), None);
    }

    #[test]
    fn no_notes_in_window_besides_played() {
        let ring = history(&[(1.0, 10), (2.0, 10), (3.0, 10), (4.0, 10), (10.0, 127)]);
        assert_eq!(detector().evaluate(&ring), None);
    }
}
