use arc_swap::ArcSwapOption;
use crossbeam::channel::{self, Receiver, Sender};
use crossbeam::select;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::thread::{self, JoinHandle};

use crate::analysis::{MoodEstimator, MoodSample, TempoEstimator};
use crate::config::{self, Config};
use crate::error::Result;
use crate::events::{PerformanceEvent, TimedEvent};
use crate::performance::{Highlight, HighlightEvent, PerformanceTracker};
use crate::timing::{Clock, Signal};

/// Latest estimates, shared between the analysis loops and the lighting
/// engine.
#[derive(Clone, Default)]
pub struct PerformanceSignals {
    inner: Arc<SignalsInner>,
}

#[derive(Default)]
struct SignalsInner {
    /// 0 while unknown.
    bpm: AtomicU32,
    mood: ArcSwapOption<MoodSample>,
    highlight_factor: Mutex<Option<f64>>,
    mood_updated: Signal,
    highlighted: Signal,
}

impl PerformanceSignals {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bpm(&self) -> Option<u32> {
        match self.inner.bpm.load(Ordering::Acquire) {
            0 => None,
            bpm => Some(bpm),
        }
    }

    pub fn mood(&self) -> Option<MoodSample> {
        self.inner.mood.load_full().map(|mood| *mood)
    }

    pub fn highlight_factor(&self) -> Option<f64> {
        *self.inner.highlight_factor.lock()
    }

    pub fn publish_bpm(&self, bpm: u32) {
        self.inner.bpm.store(bpm, Ordering::Release);
    }

    /// Stores the sample and wakes the mood listener.
    pub fn publish_mood(&self, mood: MoodSample) {
        self.inner.mood.store(Some(Arc::new(mood)));
        self.inner.mood_updated.set();
    }

    /// Stores the magnitude and wakes the highlight listener.
    pub fn publish_highlight(&self, factor: f64) {
        *self.inner.highlight_factor.lock() = Some(factor);
        self.inner.highlighted.set();
    }

    pub fn mood_updated(&self) -> &Signal {
        &self.inner.mood_updated
    }

    pub fn highlighted(&self) -> &Signal {
        &self.inner.highlighted
    }

    pub fn reset(&self) {
        self.inner.bpm.store(0, Ordering::Release);
        self.inner.mood.store(None);
        *self.inner.highlight_factor.lock() = None;
        self.inner.mood_updated.clear();
        self.inner.highlighted.clear();
    }
}

/// Everything measured during one take, bounded by `capacity` per list.
#[derive(Debug, Clone)]
pub struct SessionLog {
    arousal: VecDeque<f64>,
    valence: VecDeque<f64>,
    tempos: VecDeque<u32>,
    highlights: VecDeque<HighlightEvent>,
    capacity: usize,
}

fn push_bounded<T>(list: &mut VecDeque<T>, capacity: usize, item: T) {
    if list.len() >= capacity {
        list.pop_front();
    }
    list.push_back(item);
}

fn render_list<T>(items: &VecDeque<T>, render: impl Fn(&T) -> String) -> String {
    let rendered: Vec<String> = items.iter().map(render).collect();
    format!("[{}]", rendered.join(", "))
}

impl SessionLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            arousal: VecDeque::new(),
            valence: VecDeque::new(),
            tempos: VecDeque::new(),
            highlights: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn push_mood(&mut self, mood: MoodSample) {
        push_bounded(&mut self.arousal, self.capacity, mood.arousal);
        push_bounded(&mut self.valence, self.capacity, mood.valence);
    }

    pub fn push_tempo(&mut self, bpm: u32) {
        push_bounded(&mut self.tempos, self.capacity, bpm);
    }

    pub fn push_highlight(&mut self, event: HighlightEvent) {
        push_bounded(&mut self.highlights, self.capacity, event);
    }

    pub fn tempos(&self) -> impl Iterator<Item = u32> + '_ {
        self.tempos.iter().copied()
    }

    pub fn highlights(&self) -> impl Iterator<Item = &HighlightEvent> {
        self.highlights.iter()
    }

    pub fn has_tempo(&self) -> bool {
        !self.tempos.is_empty()
    }

    pub fn clear(&mut self) {
        self.arousal.clear();
        self.valence.clear();
        self.tempos.clear();
        self.highlights.clear();
    }

    /// `arousal;valence;tempos;highlights`, each a bracketed list.
    pub fn record_line(&self) -> String {
        [
            render_list(&self.arousal, |v| format!("{v:?}")),
            render_list(&self.valence, |v| format!("{v:?}")),
            render_list(&self.tempos, |bpm| bpm.to_string()),
            render_list(&self.highlights, |h| {
                format!("({:?}, {})", h.timestamp, h.kind.code())
            }),
        ]
        .join(";")
    }
}

struct Shared {
    clock: Clock,
    tracker: Mutex<PerformanceTracker>,
    log: Mutex<SessionLog>,
    signals: PerformanceSignals,
    new_note: Signal,
    active: AtomicBool,
}

/// A running performance: the tracker fed from MIDI plus the tempo and mood
/// loops publishing into [`PerformanceSignals`].
pub struct PerformanceSession {
    shared: Arc<Shared>,
    shutdown_tx: Mutex<Option<Sender<()>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl PerformanceSession {
    pub fn start(config: &Config) -> Result<Self> {
        let shared = Arc::new(Shared {
            clock: Clock::start(),
            tracker: Mutex::new(PerformanceTracker::new(
                &config.tracker,
                config.highlight.clone(),
            )),
            log: Mutex::new(SessionLog::new(config.tracker.session_log_capacity)),
            signals: PerformanceSignals::new(),
            new_note: Signal::new(),
            active: AtomicBool::new(true),
        });
        let (shutdown_tx, shutdown_rx) = channel::bounded::<()>(0);

        let session = Self {
            shared: shared.clone(),
            shutdown_tx: Mutex::new(Some(shutdown_tx)),
            workers: Mutex::new(Vec::new()),
        };

        let tempo = TempoEstimator::new(config.tempo.clone());
        let tempo_shared = shared.clone();
        let tempo_shutdown = shutdown_rx.clone();
        let handle = thread::Builder::new()
            .name("tempo".into())
            .spawn(move || tempo_loop(tempo_shared, tempo, tempo_shutdown))?;
        session.workers.lock().push(handle);

        let mood = MoodEstimator::new(config.mood.clone());
        let handle = thread::Builder::new()
            .name("mood".into())
            .spawn(move || mood_loop(shared, mood, shutdown_rx))?;
        session.workers.lock().push(handle);

        tracing::info!("performance session started");
        Ok(session)
    }

    /// Seconds since the session started.
    pub fn now(&self) -> f64 {
        self.shared.clock.now()
    }

    pub fn signals(&self) -> PerformanceSignals {
        self.shared.signals.clone()
    }

    pub fn bpm(&self) -> Option<u32> {
        self.shared.signals.bpm()
    }

    pub fn mood(&self) -> Option<MoodSample> {
        self.shared.signals.mood()
    }

    pub fn highlight_factor(&self) -> Option<f64> {
        self.shared.signals.highlight_factor()
    }

    /// Decodes and applies a raw MIDI message. Returns the decoded event, or
    /// `None` when the message is not a note or pedal message.
    pub fn handle_raw(&self, message: &[u8]) -> Option<PerformanceEvent> {
        let Some(event) = PerformanceEvent::decode(message) else {
            tracing::trace!(?message, "ignored MIDI message");
            return None;
        };
        self.handle_event(event);
        Some(event)
    }

    pub fn handle_event(&self, event: PerformanceEvent) -> Option<Highlight> {
        self.handle_timed(TimedEvent {
            timestamp: self.now(),
            event,
        })
    }

    pub fn handle_timed(&self, event: TimedEvent) -> Option<Highlight> {
        let highlight = self.shared.tracker.lock().handle(event);

        if matches!(event.event, PerformanceEvent::NoteOn { .. }) {
            self.shared.new_note.set();
        }
        if let Some(highlight) = highlight {
            tracing::debug!(
                kind = ?highlight.event.kind,
                factor = highlight.factor,
                "highlight"
            );
            self.shared.log.lock().push_highlight(highlight.event);
            self.shared.signals.publish_highlight(highlight.factor);
        }
        highlight
    }

    pub fn record_line(&self) -> String {
        self.shared.log.lock().record_line()
    }

    pub fn with_log<R>(&self, f: impl FnOnce(&SessionLog) -> R) -> R {
        f(&self.shared.log.lock())
    }

    pub fn with_tracker<R>(&self, f: impl FnOnce(&PerformanceTracker) -> R) -> R {
        f(&self.shared.tracker.lock())
    }

    /// Clears the tracker, the session log and every published estimate.
    pub fn reset(&self) {
        self.shared.tracker.lock().reset();
        self.shared.log.lock().clear();
        self.shared.signals.reset();
        tracing::info!("tracker reset");
    }

    /// Closes the current take. Once a tempo has been measured the record
    /// line is appended to `path` (when given) and the session is reset.
    /// Returns whether the take was closed.
    pub fn finish_take(&self, path: Option<&Path>) -> Result<bool> {
        let line = {
            let log = self.shared.log.lock();
            if !log.has_tempo() {
                return Ok(false);
            }
            log.record_line()
        };

        if let Some(path) = path {
            let mut file = OpenOptions::new().create(true).append(true).open(path)?;
            writeln!(file, "{line}")?;
            tracing::info!(path = %path.display(), "session record written");
        }
        self.reset();
        Ok(true)
    }

    pub fn is_active(&self) -> bool {
        self.shared.active.load(Ordering::Acquire)
    }

    /// Stops both analysis loops. Safe to call more than once.
    pub fn shutdown(&self) {
        self.shared.active.store(false, Ordering::Release);
        // dropping the sender disconnects every waiting loop
        drop(self.shutdown_tx.lock().take());

        let workers: Vec<_> = self.workers.lock().drain(..).collect();
        if workers.is_empty() {
            return;
        }
        for worker in workers {
            if worker.join().is_err() {
                tracing::warn!("analysis worker panicked");
            }
        }
        tracing::info!("performance session stopped");
    }
}

impl Drop for PerformanceSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn tempo_loop(shared: Arc<Shared>, estimator: TempoEstimator, shutdown: Receiver<()>) {
    let cadence = config::seconds(estimator.config().cadence);
    while shared.active.load(Ordering::Acquire) {
        let notes = shared.tracker.lock().snapshot();
        if let Some(bpm) = estimator.estimate(&notes, shared.clock.now()) {
            if shared.signals.bpm() != Some(bpm) {
                tracing::debug!(bpm, "tempo");
            }
            shared.signals.publish_bpm(bpm);
            shared.log.lock().push_tempo(bpm);
        }

        select! {
            recv(shutdown) -> _ => break,
            default(cadence) => {}
        }
    }
}

fn mood_loop(shared: Arc<Shared>, estimator: MoodEstimator, shutdown: Receiver<()>) {
    let rate_limit = config::seconds(estimator.config().rate_limit);
    while shared.active.load(Ordering::Acquire) {
        let reading = {
            let tracker = shared.tracker.lock();
            estimator.estimate(
                &tracker.snapshot(),
                &tracker.chords(),
                &tracker.note_durations(),
                shared.signals.bpm(),
                shared.clock.now(),
            )
        };

        match reading {
            Some(reading) => {
                tracing::debug!(
                    arousal = reading.sample.arousal,
                    valence = reading.sample.valence,
                    tonality = reading.features.val_tonality,
                    "mood"
                );
                shared.log.lock().push_mood(reading.sample);
                shared.signals.publish_mood(reading.sample);
                select! {
                    recv(shutdown) -> _ => break,
                    default(rate_limit) => {}
                }
            }
            None => {
                select! {
                    recv(shutdown) -> _ => break,
                    recv(shared.new_note.receiver()) -> _ => {}
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::performance::HighlightKind;

    #[test]
    fn record_line_matches_list_rendering() {
        let mut log = SessionLog::new(16);
        log.push_mood(MoodSample {
            arousal: 0.25,
            valence: -0.5,
        });
        log.push_mood(MoodSample {
            arousal: 1.0,
            valence: 0.0,
        });
        log.push_tempo(120);
        log.push_tempo(118);
        log.push_highlight(HighlightEvent {
            timestamp: 12.5,
            kind: HighlightKind::VelocityOutlier,
        });
        log.push_highlight(HighlightEvent {
            timestamp: 13.0,
            kind: HighlightKind::BurstIntensity,
        });
        assert_eq!(
            log.record_line(),
            "[0.25, 1.0];[-0.5, 0.0];[120, 118];[(12.5, 0), (13.0, 1)]"
        );
    }

    #[test]
    fn empty_log_renders_empty_lists() {
        assert_eq!(SessionLog::new(4).record_line(), "[];[];[];[]");
    }

    #[test]
    fn log_lists_are_bounded() {
        let mut log = SessionLog::new(3);
        for bpm in 100..110 {
            log.push_tempo(bpm);
        }
        assert_eq!(log.tempos().collect::<Vec<_>>(), [107, 108, 109]);
    }

    #[test]
    fn signals_publish_and_reset() {
        let signals = PerformanceSignals::new();
        assert_eq!(signals.bpm(), None);
        signals.publish_bpm(96);
        signals.publish_mood(MoodSample {
            arousal: 0.1,
            valence: 0.2,
        });
        signals.publish_highlight(1.5);
        assert_eq!(signals.bpm(), Some(96));
        assert!(signals.mood_updated().is_set());
        assert!(signals.highlighted().is_set());
        assert_eq!(signals.highlight_factor(), Some(1.5));

        signals.reset();
        assert_eq!(signals.bpm(), None);
        assert_eq!(signals.mood(), None);
        assert_eq!(signals.highlight_factor(), None);
        assert!(!signals.mood_updated().is_set());
    }

    fn wait_until(timeout: std::time::Duration, mut done: impl FnMut() -> bool) -> bool {
        let deadline = std::time::Instant::now() + timeout;
        while std::time::Instant::now() < deadline {
            if done() {
                return true;
            }
            thread::sleep(std::time::Duration::from_millis(5));
        }
        done()
    }

    fn note_on(session: &PerformanceSession, note: u8, velocity: u8, at: f64) -> Option<Highlight> {
        session.handle_timed(TimedEvent {
            timestamp: at,
            event: PerformanceEvent::NoteOn { note, velocity },
        })
    }

    /// Six quarter notes at 60 BPM, the last one a moment ago.
    fn play_steady_phrase(session: &PerformanceSession) {
        let now = session.now();
        for k in 0..6 {
            let at = now - 5.2 + k as f64;
            note_on(session, 60 + k as u8 * 2, 70, at);
            session.handle_timed(TimedEvent {
                timestamp: at + 0.4,
                event: PerformanceEvent::NoteOff { note: 60 + k as u8 * 2 },
            });
        }
    }

    #[test]
    fn raw_messages_feed_the_tracker() {
        let session = PerformanceSession::start(&Config::default()).unwrap();
        assert_eq!(
            session.handle_raw(&[0x90, 60, 100]),
            Some(PerformanceEvent::NoteOn {
                note: 60,
                velocity: 100
            })
        );
        assert_eq!(session.handle_raw(&[0xF8]), None);
        assert_eq!(session.handle_raw(&[0xB0, 64, 127]), Some(PerformanceEvent::PedalOn));
        session.with_tracker(|tracker| {
            assert_eq!(tracker.note_count(), 1);
            assert!(tracker.pedal_down());
        });
        session.shutdown();
    }

    #[test]
    fn tempo_then_mood_are_published() {
        let session = PerformanceSession::start(&Config::default()).unwrap();
        play_steady_phrase(&session);

        assert!(wait_until(std::time::Duration::from_secs(2), || session.bpm().is_some()));
        let bpm = session.bpm().unwrap();
        assert!((55..=125).contains(&bpm), "estimated {bpm}");

        // the mood loop sleeps until the next note once tempo is known
        note_on(&session, 67, 80, session.now());
        assert!(wait_until(std::time::Duration::from_secs(2), || session.mood().is_some()));
        let mood = session.mood().unwrap();
        assert!((-1.0..=1.0).contains(&mood.arousal));
        assert!((-1.0..=1.0).contains(&mood.valence));
        assert!(session.with_log(|log| log.has_tempo()));
        session.shutdown();
    }

    #[test]
    fn loud_note_publishes_highlight() {
        let session = PerformanceSession::start(&Config::default()).unwrap();
        let now = session.now();
        for k in 0..5 {
            assert!(note_on(&session, 60 + k, 40, now - 1.5 + k as f64 * 0.2).is_none());
        }
        let highlight = note_on(&session, 72, 100, now).unwrap();
        assert_eq!(highlight.event.kind, HighlightKind::VelocityOutlier);
        assert!((highlight.factor - 2.5).abs() < 1e-9);
        assert_eq!(session.highlight_factor(), Some(highlight.factor));
        assert!(session.signals().highlighted().is_set());
        assert_eq!(session.with_log(|log| log.highlights().count()), 1);
    }

    #[test]
    fn finishing_a_take_writes_the_record() {
        let session = PerformanceSession::start(&Config::default()).unwrap();
        let path = std::env::temp_dir().join(format!("pianolight-take-{}.csv", std::process::id()));
        let _ = std::fs::remove_file(&path);

        assert!(!session.finish_take(Some(&path)).unwrap());
        assert!(!path.exists());

        play_steady_phrase(&session);
        assert!(wait_until(std::time::Duration::from_secs(2), || session.bpm().is_some()));
        assert!(session.finish_take(Some(&path)).unwrap());

        let written = std::fs::read_to_string(&path).unwrap();
        assert_eq!(written.lines().count(), 1);
        assert_eq!(written.trim_end().split(';').count(), 4);
        assert!(written.starts_with('['));
        session.with_tracker(|tracker| assert_eq!(tracker.note_count(), 0));
        std::fs::remove_file(&path).unwrap();
        session.shutdown();
    }

    #[test]
    fn shutdown_is_idempotent() {
        let session = PerformanceSession::start(&Config::default()).unwrap();
        session.shutdown();
        assert!(!session.is_active());
        session.shutdown();
    }
}
