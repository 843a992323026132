use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub midi: MidiConfig,
    pub dmx: DmxConfig,
    pub tracker: TrackerConfig,
    pub tempo: TempoConfig,
    pub mood: MoodConfig,
    pub highlight: HighlightConfig,
    pub lighting: LightingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MidiConfig {
    /// Port index or a substring of the port name. First port when unset.
    pub port: Option<String>,
    /// A note-on of this key closes the take: the session record is written
    /// and the tracker is reset.
    pub end_note: Option<u8>,
    pub session_log: Option<PathBuf>,
}

impl Default for MidiConfig {
    fn default() -> Self {
        Self {
            port: None,
            end_note: Some(21),
            session_log: Some(PathBuf::from("mood_data.csv")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DmxConfig {
    pub port: PathBuf,
    /// Run with a null transport when the interface cannot be opened.
    pub allow_missing_hardware: bool,
}

impl Default for DmxConfig {
    fn default() -> Self {
        let port = if cfg!(windows) { "COM4" } else { "/dev/ttyUSB0" };
        Self {
            port: PathBuf::from(port),
            allow_missing_hardware: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub history_capacity: usize,
    /// Seconds of note and chord history kept. Must cover the longest
    /// analysis window.
    pub retention: f64,
    pub duration_history: usize,
    pub session_log_capacity: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            history_capacity: 4096,
            retention: 6.0,
            duration_history: 30,
            session_log_capacity: 100_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TempoConfig {
    pub sampling_rate: f64,
    /// Onset signal length in samples.
    pub window: usize,
    /// Seconds between two analysis cycles.
    pub cadence: f64,
    pub min_onsets: usize,
    pub min_bpm: f64,
    pub max_bpm: f64,
    pub num_peaks: usize,
    pub min_peak_distance: usize,
    pub cleared_lags: usize,
    /// Estimates below this are doubled.
    pub octave_threshold: u32,
}

impl Default for TempoConfig {
    fn default() -> Self {
        Self {
            sampling_rate: 344.0,
            window: 2048,
            cadence: 0.37,
            min_onsets: 4,
            min_bpm: 55.0,
            max_bpm: 210.0,
            num_peaks: 5,
            min_peak_distance: 20,
            cleared_lags: 5,
            octave_threshold: 58,
        }
    }
}

impl TempoConfig {
    pub fn window_seconds(&self) -> f64 {
        self.window as f64 / self.sampling_rate
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MoodConfig {
    pub window: f64,
    pub min_notes: usize,
    /// Minimum seconds between two published mood samples.
    pub rate_limit: f64,
    pub velocity_center: f64,
    pub velocity_scale: f64,
    pub pitch_center: f64,
    pub pitch_scale: f64,
    pub std_center: f64,
    pub std_scale: f64,
    pub centroid_center: f64,
    pub centroid_scale: f64,
    /// Fraction of an eighth note below which onsets count as one hit.
    pub eighth_offset: f64,
    pub chord_window: f64,
}

impl Default for MoodConfig {
    fn default() -> Self {
        Self {
            window: 6.0,
            min_notes: 2,
            rate_limit: 0.5,
            velocity_center: 63.5,
            velocity_scale: 6.35,
            pitch_center: 44.0,
            pitch_scale: 4.4,
            std_center: 10.0,
            std_scale: 5.0,
            centroid_center: 60.0,
            centroid_scale: 10.0,
            eighth_offset: 0.9,
            chord_window: 2.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HighlightConfig {
    pub min_history: usize,
    pub window: f64,
    pub stddev_factor: f64,
    pub burst_window: f64,
    pub burst_threshold: f64,
}

impl Default for HighlightConfig {
    fn default() -> Self {
        Self {
            min_history: 5,
            window: 2.0,
            stddev_factor: 1.2,
            burst_window: 0.1,
            burst_threshold: 400.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LightingConfig {
    /// Fade tick in seconds.
    pub tick: f64,
    pub mood_fade: f64,
    pub startup_fade: f64,
    pub intro_flash: f64,
    /// Value multiplier of the second flash of a highlight pulse.
    pub echo_intensity: f64,
    pub value_scale: f64,
    pub value_offset: f64,
    /// Upper bound on waiting for queued frames at shutdown.
    pub settle: f64,
}

impl Default for LightingConfig {
    fn default() -> Self {
        Self {
            tick: 0.005,
            mood_fade: 0.4,
            startup_fade: 1.0,
            intro_flash: 0.5,
            echo_intensity: 0.66,
            value_scale: 45.0,
            value_offset: 55.0,
            settle: 0.05,
        }
    }
}

/// Converts config seconds to a `Duration`, mapping negative or invalid
/// values to zero.
pub fn seconds(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(Duration::ZERO)
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|source| Error::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        ron::from_str(&text).map_err(|source| Error::ConfigParse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        fs::write(path, self.to_ron()?)?;
        Ok(())
    }

    pub fn to_ron(&self) -> Result<String> {
        Ok(ron::ser::to_string_pretty(
            self,
            ron::ser::PrettyConfig::default(),
        )?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_falls_back_to_defaults() {
        let config: Config =
            ron::from_str("(tempo: (cadence: 0.5), lighting: (tick: 0.01))").unwrap();
        assert_eq!(config.tempo.cadence, 0.5);
        assert_eq!(config.tempo.window, 2048);
        assert_eq!(config.lighting.tick, 0.01);
        assert_eq!(config.lighting.mood_fade, 0.4);
        assert_eq!(config.highlight.burst_threshold, 400.0);
    }

    #[test]
    fn pretty_output_parses_back() {
        let mut config = Config::default();
        config.midi.port = Some("Digital Piano".into());
        let text = config.to_ron().unwrap();
        let parsed: Config = ron::from_str(&text).unwrap();
        assert_eq!(parsed.midi.port.as_deref(), Some("Digital Piano"));
        assert_eq!(parsed.mood.velocity_scale, 6.35);
    }

    #[test]
    fn tempo_window_is_about_six_seconds() {
        let tempo = TempoConfig::default();
        assert!((tempo.window_seconds() - 5.953).abs() < 1e-3);
    }

    #[test]
    fn negative_seconds_become_zero() {
        assert_eq!(seconds(-1.0), Duration::ZERO);
        assert_eq!(seconds(f64::NAN), Duration::ZERO);
        assert_eq!(seconds(0.25), Duration::from_millis(250));
    }
}
