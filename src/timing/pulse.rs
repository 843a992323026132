use std::time::Duration;

use crate::lighting::Hsv;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PulsePhase {
    Idle,
    On1,
    Off1,
    On2,
    Off2,
}

impl PulsePhase {
    pub fn next(self) -> Self {
        match self {
            PulsePhase::Idle => PulsePhase::On1,
            PulsePhase::On1 => PulsePhase::Off1,
            PulsePhase::Off1 => PulsePhase::On2,
            PulsePhase::On2 => PulsePhase::Off2,
            PulsePhase::Off2 => PulsePhase::Idle,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PulseStep {
    pub phase: PulsePhase,
    pub color: Hsv,
    pub hold: Duration,
}

/// One highlight flash: color, black, dimmed echo, black, each held for an
/// eighth note at the current tempo.
#[derive(Debug, Clone)]
pub struct Pulse {
    phase: PulsePhase,
    highlight: Hsv,
    echo_intensity: f64,
    eighth: Duration,
}

/// Length of an eighth note, or `None` while the tempo is unknown.
pub fn eighth_note(bpm: Option<u32>) -> Option<Duration> {
    match bpm {
        Some(bpm) if bpm > 0 => Some(Duration::from_secs_f64(60.0 / bpm as f64 / 2.0)),
        _ => None,
    }
}

impl Pulse {
    pub fn new(highlight: Hsv, bpm: Option<u32>, echo_intensity: f64) -> Option<Self> {
        Some(Self {
            phase: PulsePhase::Idle,
            highlight,
            echo_intensity,
            eighth: eighth_note(bpm)?,
        })
    }

    pub fn phase(&self) -> PulsePhase {
        self.phase
    }

    pub fn total(&self) -> Duration {
        self.eighth * 4
    }
}

impl Iterator for Pulse {
    type Item = PulseStep;

    fn next(&mut self) -> Option<PulseStep> {
        self.phase = self.phase.next();
        let color = match self.phase {
            PulsePhase::Idle => return None,
            PulsePhase::On1 => self.highlight,
            PulsePhase::On2 => self.highlight.dimmed(self.echo_intensity),
            PulsePhase::Off1 | PulsePhase::Off2 => Hsv::BLACK,
        };
        Some(PulseStep {
            phase: self.phase,
            color,
            hold: self.eighth,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_at_120_bpm_lasts_one_second() {
        let highlight = Hsv::new(0.0, 0.0, 100.0);
        let pulse = Pulse::new(highlight, Some(120), 0.66).unwrap();
        assert_eq!(pulse.total(), Duration::from_secs(1));

        let steps: Vec<_> = pulse.collect();
        let phases: Vec<_> = steps.iter().map(|s| s.phase).collect();
        assert_eq!(
            phases,
            [
                PulsePhase::On1,
                PulsePhase::Off1,
                PulsePhase::On2,
                PulsePhase::Off2
            ]
        );
        assert_eq!(steps[0].color, highlight);
        assert_eq!(steps[1].color, Hsv::BLACK);
        assert!((steps[2].color.val - 66.0).abs() < 1e-9);
        assert_eq!(steps[3].color, Hsv::BLACK);
        let total: Duration = steps.iter().map(|s| s.hold).sum();
        assert_eq!(total, Duration::from_secs(1));
    }

    #[test]
    fn returns_to_idle_after_cycle() {
        let mut pulse = Pulse::new(Hsv::BLACK, Some(90), 0.66).unwrap();
        assert_eq!(pulse.by_ref().count(), 4);
        assert_eq!(pulse.phase(), PulsePhase::Idle);
    }

    #[test]
    fn unknown_or_zero_tempo_yields_no_pulse() {
        assert!(Pulse::new(Hsv::BLACK, None, 0.66).is_none());
        assert!(Pulse::new(Hsv::BLACK, Some(0), 0.66).is_none());
        assert_eq!(eighth_note(Some(60)), Some(Duration::from_millis(500)));
    }
}
