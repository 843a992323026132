use std::time::{Duration, Instant};

use crate::lighting::Hsv;

/// Outcome of advancing a fade by one tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FadeStep {
    /// Already at the target; nothing to emit.
    Idle,
    /// Intermediate color on the way to the target.
    Step(Hsv),
    /// Target reached on this tick.
    Arrived(Hsv),
}

/// Linear HSV interpolation toward a deadline, one tick at a time.
///
/// Retargeting while a fade is running continues from the current color,
/// not from where the previous fade started.
#[derive(Debug, Clone, Copy)]
pub struct Fade {
    current: Hsv,
    target: Hsv,
    deadline: Instant,
    tick: Duration,
}

impl Fade {
    pub fn new(initial: Hsv, tick: Duration) -> Self {
        Self {
            current: initial,
            target: initial,
            deadline: Instant::now(),
            tick,
        }
    }

    pub fn retarget(&mut self, target: Hsv, duration: Duration, now: Instant) {
        self.target = target;
        self.deadline = now + duration;
    }

    pub fn is_idle(&self) -> bool {
        self.current == self.target
    }

    pub fn current(&self) -> Hsv {
        self.current
    }

    pub fn advance(&mut self, now: Instant) -> FadeStep {
        if self.is_idle() {
            return FadeStep::Idle;
        }

        let remaining = self.deadline.saturating_duration_since(now);
        if remaining <= self.tick {
            self.current = self.target;
            return FadeStep::Arrived(self.current);
        }

        let steps = remaining.as_secs_f64() / self.tick.as_secs_f64();
        let toward = |from: f64, to: f64| from + (to - from) / steps;
        self.current = Hsv {
            hue: toward(self.current.hue, self.target.hue),
            sat: toward(self.current.sat, self.target.sat),
            val: toward(self.current.val, self.target.val),
        };
        FadeStep::Step(self.current)
    }
}
