use arc_swap::ArcSwap;
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::color::{Hsv, Rgb};
use super::transport::FrameSink;
use crate::analysis::MoodSample;
use crate::config::{self, LightingConfig};
use crate::error::{Error, Result};
use crate::timing::{Fade, FadeStep, Pulse};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceMode {
    /// Follows the mood.
    Normal,
    /// Flashes on highlights.
    Highlight,
}

impl FromStr for DeviceMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "normal" => Ok(DeviceMode::Normal),
            "highlight" => Ok(DeviceMode::Highlight),
            _ => Err(Error::InvalidDevice(s.to_string())),
        }
    }
}

impl fmt::Display for DeviceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceMode::Normal => f.write_str("normal"),
            DeviceMode::Highlight => f.write_str("highlight"),
        }
    }
}

const PRESETS: [(&str, [&str; 3]); 5] = [
    ("pop1", ["#7e288c", "#ffb51d", "#0ef51a"]),
    ("pop2", ["#9c7508", "#12f315", "#e4360a"]),
    ("R&B", ["#6e2695", "#e9004b", "#ca9915"]),
    ("rock", ["#9b2d68", "#3ee609", "#ca9915"]),
    ("funk", ["#7c7e2b", "#24dc2b", "#c80066"]),
];

/// Colors of one fixture: the flash color of highlight pulses and the two
/// mood anchors, `low` for negative valence and `high` for positive.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ColorScheme {
    pub highlight: Hsv,
    pub low: Hsv,
    pub high: Hsv,
}

impl Default for ColorScheme {
    fn default() -> Self {
        Self {
            highlight: Hsv::new(0.0, 0.0, 100.0),
            low: Hsv::new(0.0, 100.0, 50.0),
            high: Hsv::new(60.0, 100.0, 100.0),
        }
    }
}

impl ColorScheme {
    pub fn from_rgb(highlight: Rgb, low: Rgb, high: Rgb) -> Self {
        Self {
            highlight: highlight.to_hsv(),
            low: low.to_hsv(),
            high: high.to_hsv(),
        }
    }

    pub fn preset(name: &str) -> Result<Self> {
        let (_, [highlight, low, high]) = PRESETS
            .iter()
            .find(|(preset, _)| preset.eq_ignore_ascii_case(name))
            .ok_or_else(|| Error::UnknownScheme(name.to_string()))?;
        let parse =
            |hex: &str| Rgb::from_hex(hex).ok_or_else(|| Error::UnknownScheme(name.to_string()));
        Ok(Self::from_rgb(parse(highlight)?, parse(low)?, parse(high)?))
    }

    pub fn preset_names() -> impl Iterator<Item = &'static str> {
        PRESETS.iter().map(|(name, _)| *name)
    }

    /// Hue and saturation move between the anchors with valence, value
    /// follows arousal.
    pub fn mood_color(&self, mood: MoodSample, value_scale: f64, value_offset: f64) -> Hsv {
        let (low, high) = (self.low, self.high);
        Hsv::new(
            (high.hue - low.hue) / 2.0 * mood.valence + (high.hue + low.hue) / 2.0,
            (high.sat - low.sat) / 2.0 * mood.valence + (high.sat + low.sat) / 2.0,
            value_scale * mood.arousal + value_offset,
        )
    }

    /// Color a mood fixture rests at before the first mood arrives.
    pub fn resting(&self) -> Hsv {
        self.low.midpoint(self.high)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FadeCommand {
    SetTarget { target: Hsv, duration: Duration },
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PulseCommand {
    Trigger { bpm: Option<u32> },
    Shutdown,
}

/// A fixture on three consecutive DMX channels, driven by its own fade
/// actor and, in highlight mode, a pulse actor feeding that fade actor.
pub struct Device {
    id: String,
    start_channel: u16,
    mode: DeviceMode,
    scheme: Arc<RwLock<ColorScheme>>,
    current: Arc<ArcSwap<Hsv>>,
    running: Arc<AtomicBool>,
    fade_tx: Sender<FadeCommand>,
    pulse_tx: Option<Sender<PulseCommand>>,
    workers: Vec<JoinHandle<()>>,
}

struct FadeActor {
    start_channel: u16,
    sink: FrameSink,
    current: Arc<ArcSwap<Hsv>>,
    running: Arc<AtomicBool>,
    tick: Duration,
}

struct PulseActor {
    scheme: Arc<RwLock<ColorScheme>>,
    running: Arc<AtomicBool>,
    fade_tx: Sender<FadeCommand>,
    echo_intensity: f64,
    intro_flash: Duration,
}

impl Device {
    pub fn spawn(
        id: &str,
        start_channel: u16,
        mode: DeviceMode,
        sink: FrameSink,
        config: &LightingConfig,
    ) -> Result<Self> {
        let scheme = ColorScheme::default();
        let initial = match mode {
            DeviceMode::Normal => Hsv::new(scheme.resting().hue, 0.0, 0.0),
            DeviceMode::Highlight => Hsv::BLACK,
        };
        let scheme = Arc::new(RwLock::new(scheme));
        let current = Arc::new(ArcSwap::from_pointee(initial));
        let running = Arc::new(AtomicBool::new(true));
        let (fade_tx, fade_rx) = channel::unbounded();

        let mut device = Self {
            id: id.to_string(),
            start_channel,
            mode,
            scheme: scheme.clone(),
            current: current.clone(),
            running: running.clone(),
            fade_tx: fade_tx.clone(),
            pulse_tx: None,
            workers: Vec::new(),
        };

        let actor = FadeActor {
            start_channel,
            sink,
            current,
            running: running.clone(),
            tick: config::seconds(config.tick).max(Duration::from_millis(1)),
        };
        let handle = thread::Builder::new()
            .name(format!("fade-{id}"))
            .spawn(move || actor.run(initial, fade_rx))?;
        device.workers.push(handle);

        match mode {
            DeviceMode::Normal => {
                let resting = scheme.read().resting();
                device.set_target(resting, config::seconds(config.startup_fade));
            }
            DeviceMode::Highlight => {
                let (pulse_tx, pulse_rx) = channel::unbounded();
                let actor = PulseActor {
                    scheme,
                    running,
                    fade_tx,
                    echo_intensity: config.echo_intensity,
                    intro_flash: config::seconds(config.intro_flash),
                };
                let handle = thread::Builder::new()
                    .name(format!("pulse-{id}"))
                    .spawn(move || actor.run(pulse_rx))?;
                device.workers.push(handle);
                device.pulse_tx = Some(pulse_tx);
            }
        }

        tracing::info!(id, start_channel, %mode, "device added");
        Ok(device)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn start_channel(&self) -> u16 {
        self.start_channel
    }

    pub fn mode(&self) -> DeviceMode {
        self.mode
    }

    pub fn scheme(&self) -> ColorScheme {
        *self.scheme.read()
    }

    pub fn set_scheme(&self, scheme: ColorScheme) {
        *self.scheme.write() = scheme;
    }

    pub fn current(&self) -> Hsv {
        **self.current.load()
    }

    pub fn set_target(&self, target: Hsv, duration: Duration) {
        let _ = self
            .fade_tx
            .send(FadeCommand::SetTarget { target, duration });
    }

    /// Starts a highlight pulse at `bpm`. Ignored by mood fixtures.
    pub fn trigger_pulse(&self, bpm: Option<u32>) {
        if let Some(pulse_tx) = &self.pulse_tx {
            let _ = pulse_tx.send(PulseCommand::Trigger { bpm });
        }
    }

    /// Tells both actors to stop without waiting for them.
    pub fn request_stop(&self) {
        self.running.store(false, Ordering::Release);
        let _ = self.fade_tx.send(FadeCommand::Shutdown);
        if let Some(pulse_tx) = &self.pulse_tx {
            let _ = pulse_tx.send(PulseCommand::Shutdown);
        }
    }

    pub fn join(&mut self) {
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                tracing::warn!(id = %self.id, "device actor panicked");
            }
        }
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        self.request_stop();
        self.join();
    }
}

impl FadeActor {
    fn run(self, initial: Hsv, rx: Receiver<FadeCommand>) {
        let mut fade = Fade::new(initial, self.tick);
        let mut next_tick = Instant::now();

        loop {
            let command = if fade.is_idle() {
                match rx.recv() {
                    Ok(command) => Some(command),
                    Err(_) => break,
                }
            } else {
                match rx.recv_deadline(next_tick) {
                    Ok(command) => Some(command),
                    Err(RecvTimeoutError::Timeout) => None,
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            };
            if !self.running.load(Ordering::Acquire) {
                break;
            }

            match command {
                Some(FadeCommand::SetTarget { target, duration }) => {
                    fade.retarget(target, duration, Instant::now());
                }
                Some(FadeCommand::Shutdown) => break,
                None => {}
            }

            let now = Instant::now();
            match fade.advance(now) {
                FadeStep::Idle => {}
                FadeStep::Step(hsv) | FadeStep::Arrived(hsv) => self.emit(hsv),
            }
            next_tick = now + self.tick;
        }
    }

    fn emit(&self, hsv: Hsv) {
        let rgb = hsv.to_rgb();
        tracing::trace!(channel = self.start_channel, %rgb, "frame");
        self.current.store(Arc::new(hsv));
        self.sink.write(self.start_channel, rgb);
    }
}

impl PulseActor {
    fn run(self, rx: Receiver<PulseCommand>) {
        let low = self.scheme.read().low;
        self.show(low, self.intro_flash);
        if !self.hold(&rx, self.intro_flash) {
            return;
        }
        self.show(Hsv::BLACK, self.intro_flash);

        while let Ok(command) = rx.recv() {
            if !self.running.load(Ordering::Acquire) {
                break;
            }
            let PulseCommand::Trigger { bpm } = command else {
                break;
            };

            let highlight = self.scheme.read().highlight;
            let Some(pulse) = Pulse::new(highlight, bpm, self.echo_intensity) else {
                tracing::trace!(?bpm, "pulse dropped without tempo");
                continue;
            };
            tracing::debug!(?bpm, total = ?pulse.total(), "pulse");
            for step in pulse {
                self.show(step.color, Duration::ZERO);
                if !self.hold(&rx, step.hold) {
                    return;
                }
            }
        }
    }

    fn show(&self, color: Hsv, duration: Duration) {
        let _ = self.fade_tx.send(FadeCommand::SetTarget {
            target: color,
            duration,
        });
    }

    /// Sleeps for `duration`, discarding triggers that arrive meanwhile.
    /// Returns `false` when the actor has to stop.
    fn hold(&self, rx: &Receiver<PulseCommand>, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            match rx.recv_deadline(deadline) {
                Ok(PulseCommand::Trigger { .. }) => {
                    if !self.running.load(Ordering::Acquire) {
                        return false;
                    }
                }
                Ok(PulseCommand::Shutdown) | Err(RecvTimeoutError::Disconnected) => return false,
                Err(RecvTimeoutError::Timeout) => return self.running.load(Ordering::Acquire),
            }
        }
    }
}
