use serde::{Deserialize, Serialize};

use crate::config::MoodConfig;
use crate::performance::{Chord, ChordQuality, NoteEvent};

/// Point on the arousal/valence plane, both axes in `[-1, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MoodSample {
    pub arousal: f64,
    pub valence: f64,
}

/// Every normalised feature behind a [`MoodSample`].
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MoodFeatures {
    pub aro_hits: f64,
    pub aro_max_velocity: f64,
    pub aro_avg_velocity: f64,
    pub aro_weighted_velocity: f64,
    pub val_range: f64,
    pub val_high: f64,
    pub val_low: f64,
    pub val_std_notes: f64,
    pub val_centroid: f64,
    /// +1 major, -1 minor, 0 without recent chords. Not part of valence.
    pub val_tonality: f64,
    /// Mean held duration relative to the beat, squashed into `(0, 1)`.
    /// Unset until a note has been released.
    pub articulation: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MoodReading {
    pub sample: MoodSample,
    pub features: MoodFeatures,
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Logistic curve rescaled to `(-1, 1)`.
pub fn sigmoid_unit(x: f64) -> f64 {
    sigmoid(x) * 2.0 - 1.0
}

fn clip_unit(x: f64) -> f64 {
    x.clamp(-1.0, 1.0)
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

fn std_dev(values: &[f64]) -> f64 {
    let m = mean(values);
    (values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64).sqrt()
}

#[derive(Debug, Clone)]
pub struct MoodEstimator {
    config: MoodConfig,
}

impl MoodEstimator {
    pub fn new(config: MoodConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MoodConfig {
        &self.config
    }

    /// Arousal from loudness and note density, valence from register and
    /// pitch spread. Needs a known tempo and enough recent notes.
    pub fn estimate(
        &self,
        notes: &[NoteEvent],
        chords: &[Chord],
        durations: &[f64],
        bpm: Option<u32>,
        now: f64,
    ) -> Option<MoodReading> {
        let bpm = bpm.filter(|&bpm| bpm > 0)? as f64;
        let cfg = &self.config;

        let played: Vec<&NoteEvent> = notes
            .iter()
            .filter(|n| n.timestamp > now - cfg.window)
            .collect();
        if played.len() < cfg.min_notes.max(1) {
            return None;
        }

        let velocities: Vec<f64> = played.iter().map(|n| n.velocity as f64).collect();
        let pitches: Vec<f64> = played.iter().map(|n| n.note as f64).collect();

        let beat = 60.0 / bpm;
        let velocity_norm = |v: f64| sigmoid_unit((v - cfg.velocity_center) / cfg.velocity_scale);
        let pitch_norm = |p: f64| sigmoid_unit((p - cfg.pitch_center) / cfg.pitch_scale);

        // arousal
        let mut timings: Vec<f64> = played.iter().map(|n| n.timestamp).collect();
        timings.sort_by(f64::total_cmp);
        let min_gap = beat / 2.0 * cfg.eighth_offset;
        let hits = 1 + timings.windows(2).filter(|w| w[1] - w[0] > min_gap).count();
        let quarters = cfg.window / beat;
        let aro_hits = clip_unit(2.0 / quarters * hits as f64 - 2.0);

        let max_velocity = velocities.iter().copied().fold(f64::MIN, f64::max);
        let avg_velocity = mean(&velocities);
        let aro_max_velocity = velocity_norm(max_velocity);
        let aro_avg_velocity = velocity_norm(avg_velocity);

        let loudest_at = played
            .iter()
            .find(|n| n.velocity as f64 == max_velocity)
            .map_or(now, |n| n.timestamp);
        let since_loudest = (loudest_at - now).abs() + 1e-5;
        let weight = (-since_loudest.ln() / 2.0 + 1.0).clamp(0.0, 1.0);
        let weighted_velocity = (avg_velocity + max_velocity * weight) / (1.0 + weight);
        let aro_weighted_velocity = velocity_norm(weighted_velocity);

        // valence
        let lowest = pitches.iter().copied().fold(f64::MAX, f64::min);
        let highest = pitches.iter().copied().fold(f64::MIN, f64::max);
        let val_range = pitch_norm(highest - lowest);
        let val_high = pitch_norm(highest);
        let val_low = pitch_norm(lowest);
        let val_std_notes = clip_unit((std_dev(&pitches) - cfg.std_center) / cfg.std_scale);

        let total_velocity: f64 = velocities.iter().sum();
        let centroid = if total_velocity > 0.0 {
            pitches.iter().zip(&velocities).map(|(p, v)| p * v).sum::<f64>() / total_velocity
        } else {
            mean(&pitches)
        };
        let val_centroid = clip_unit((centroid - cfg.centroid_center) / cfg.centroid_scale);

        let features = MoodFeatures {
            aro_hits,
            aro_max_velocity,
            aro_avg_velocity,
            aro_weighted_velocity,
            val_range,
            val_high,
            val_low,
            val_std_notes,
            val_centroid,
            val_tonality: self.tonality(chords, now),
            articulation: articulation(durations, beat),
        };
        let sample = MoodSample {
            arousal: (aro_hits + aro_max_velocity + aro_avg_velocity + aro_weighted_velocity) / 4.0,
            valence: (val_range + val_high + val_low + val_centroid + val_std_notes) / 5.0,
        };

        Some(MoodReading { sample, features })
    }

    /// Majority quality of the chords in the trailing chord window; a tie
    /// goes to the most recent chord.
    fn tonality(&self, chords: &[Chord], now: f64) -> f64 {
        let recent: Vec<&Chord> = chords
            .iter()
            .filter(|c| c.timestamp > now - self.config.chord_window)
            .collect();
        let majors = recent
            .iter()
            .filter(|c| c.quality == ChordQuality::Major)
            .count();
        let minors = recent.len() - majors;

        match majors.cmp(&minors) {
            std::cmp::Ordering::Greater => ChordQuality::Major.tonality(),
            std::cmp::Ordering::Less => ChordQuality::Minor.tonality(),
            std::cmp::Ordering::Equal => recent.last().map_or(0.0, |c| c.quality.tonality()),
        }
    }
}

fn articulation(durations: &[f64], beat: f64) -> Option<f64> {
    if durations.is_empty() {
        return None;
    }
    Some(sigmoid(mean(durations) / beat))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn note(note: u8, timestamp: f64, velocity: u8) -> NoteEvent {
        NoteEvent {
            note,
            timestamp,
            velocity,
        }
    }

    fn chord(timestamp: f64, quality: ChordQuality) -> Chord {
        Chord {
            timestamp,
            root: 0,
            quality,
        }
    }

    fn estimator() -> MoodEstimator {
        MoodEstimator::new(MoodConfig::default())
    }

    #[test]
    fn golden_two_note_phrase() {
        let notes = [note(60, 9.0, 64), note(64, 9.5, 64)];
        let reading = estimator()
            .estimate(&notes, &[], &[], Some(120), 10.0)
            .unwrap();

        let velocity = sigmoid_unit((64.0 - 63.5) / 6.35);
        let weight = (-(1.0f64 + 1e-5).ln() / 2.0 + 1.0).clamp(0.0, 1.0);
        let weighted = sigmoid_unit(((64.0 + 64.0 * weight) / (1.0 + weight) - 63.5) / 6.35);
        // two separate onsets against twelve expected quarters
        let hits = (2.0 / 12.0 * 2.0 - 2.0f64).clamp(-1.0, 1.0);
        let arousal = (hits + velocity + velocity + weighted) / 4.0;

        let range = sigmoid_unit((4.0 - 44.0) / 4.4);
        let high = sigmoid_unit((64.0 - 44.0) / 4.4);
        let low = sigmoid_unit((60.0 - 44.0) / 4.4);
        let spread = ((2.0 - 10.0) / 5.0f64).clamp(-1.0, 1.0);
        let centroid = ((62.0 - 60.0) / 10.0f64).clamp(-1.0, 1.0);
        let valence = (range + high + low + centroid + spread) / 5.0;

        let f = reading.features;
        assert_eq!(f.aro_hits, -1.0);
        assert_eq!(f.val_std_notes, -1.0);
        assert!((f.val_centroid - 0.2).abs() < 1e-12);
        assert!((f.aro_weighted_velocity - weighted).abs() < 1e-12);
        assert!((reading.sample.arousal - arousal).abs() < 1e-12);
        assert!((reading.sample.valence - valence).abs() < 1e-12);
        assert_eq!(f.val_tonality, 0.0);
        assert_eq!(f.articulation, None);
    }

    #[test]
    fn deterministic_for_fixed_input() {
        let notes: Vec<NoteEvent> = (0..12)
            .map(|i| {
                note(
                    48 + (i * 5 % 24) as u8,
                    4.5 + i as f64 * 0.4,
                    40 + (i * 7 % 80) as u8,
                )
            })
            .collect();
        let a = estimator().estimate(&notes, &[], &[0.3, 0.4], Some(96), 10.0);
        let b = estimator().estimate(&notes, &[], &[0.3, 0.4], Some(96), 10.0);
        assert_eq!(a, b);
        let sample = a.unwrap().sample;
        assert!((-1.0..=1.0).contains(&sample.arousal));
        assert!((-1.0..=1.0).contains(&sample.valence));
    }

    #[test]
    fn simultaneous_onsets_count_as_one_hit() {
        let chord_notes = [note(60, 9.0, 80), note(64, 9.01, 80), note(67, 9.02, 80)];
        let single = [note(60, 9.0, 80), note(60, 9.5, 80)];
        let est = estimator();
        let stacked = est.estimate(&chord_notes, &[], &[], Some(120), 10.0).unwrap();
        let spread = est.estimate(&single, &[], &[], Some(120), 10.0).unwrap();
        // one hit: 2/12 - 2, clipped
        assert_eq!(stacked.features.aro_hits, -1.0);
        assert_eq!(spread.features.aro_hits, -1.0);

        let dense: Vec<NoteEvent> = (0..24).map(|i| note(60, 4.1 + i as f64 * 0.24, 80)).collect();
        let busy = est.estimate(&dense, &[], &[], Some(120), 10.0).unwrap();
        assert_eq!(busy.features.aro_hits, 1.0);
    }

    #[test]
    fn needs_tempo_and_notes() {
        let notes = [note(60, 9.0, 64), note(64, 9.5, 64)];
        let est = estimator();
        assert_eq!(est.estimate(&notes, &[], &[], None, 10.0), None);
        assert_eq!(est.estimate(&notes, &[], &[], Some(0), 10.0), None);
        assert_eq!(est.estimate(&notes[..1], &[], &[], Some(120), 10.0), None);
        assert_eq!(est.estimate(&notes, &[], &[], Some(120), 20.0), None);
    }

    #[test]
    fn tonality_majority_with_latest_tie_break() {
        let est = estimator();
        let minor_heavy = [
            chord(9.0, ChordQuality::Minor),
            chord(9.2, ChordQuality::Minor),
            chord(9.4, ChordQuality::Major),
        ];
        assert_eq!(est.tonality(&minor_heavy, 10.0), -1.0);

        let tied = [chord(9.0, ChordQuality::Minor), chord(9.5, ChordQuality::Major)];
        assert_eq!(est.tonality(&tied, 10.0), 1.0);

        let stale = [chord(5.0, ChordQuality::Major)];
        assert_eq!(est.tonality(&stale, 10.0), 0.0);
    }

    #[test]
    fn articulation_from_durations() {
        assert_eq!(articulation(&[], 0.5), None);
        let legato = articulation(&[0.5, 0.5], 0.5).unwrap();
        assert!((legato - sigmoid(1.0)).abs() < 1e-12);
    }
}
