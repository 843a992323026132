mod clock;
mod fade;
mod pulse;
mod signal;

pub use clock::Clock;
pub use fade::{Fade, FadeStep};
pub use pulse::{Pulse, PulsePhase, PulseStep, eighth_note};
pub use signal::Signal;
