use crate::config::TempoConfig;
use crate::performance::NoteEvent;

/// Harmonic factors and weights of the pulse trains matched against the
/// autocorrelation.
const PULSE_HARMONICS: [(f64, f64); 3] = [(1.0, 1.0), (1.5, 0.5), (2.0, 0.5)];
const PULSES_PER_TRAIN: usize = 4;

/// Beat tracking by autocorrelation of the recent onset signal.
///
/// Onsets in the trailing window are quantised into a velocity-weighted
/// impulse signal. Its autocorrelation, enhanced with 2x and 4x time
/// stretches of itself, is searched for periodicity peaks inside the
/// configured BPM range; each candidate lag is scored by cross-correlating a
/// pulse train at that lag, and the best one becomes the tempo.
#[derive(Debug, Clone)]
pub struct TempoEstimator {
    config: TempoConfig,
}

impl TempoEstimator {
    pub fn new(config: TempoConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TempoConfig {
        &self.config
    }

    /// Tempo in BPM from the notes played before `now`, or `None` when there
    /// are too few onsets or no periodicity in range.
    pub fn estimate(&self, notes: &[NoteEvent], now: f64) -> Option<u32> {
        let start = now - self.config.window_seconds();
        let onsets: Vec<&NoteEvent> = notes.iter().filter(|n| n.timestamp > start).collect();
        if onsets.len() < self.config.min_onsets {
            return None;
        }

        let impulses = self.onset_signal(&onsets);
        let mut corr = autocorrelate(&impulses, self.config.window)?;
        for lag in corr.iter_mut().take(self.config.cleared_lags) {
            *lag = 0.0;
        }
        let enhanced = enhance_harmonics(&corr);

        let candidates = self.candidate_peaks(&enhanced);
        let lag = best_lag(&enhanced, &candidates)?;
        let bpm = (60.0 * self.config.sampling_rate / lag as f64) as u32;
        tracing::trace!(?candidates, lag, bpm, "tempo analysis");

        Some(octave_correct(bpm, self.config.octave_threshold))
    }

    /// Sparse impulse signal: sample index to velocity. A later onset on the
    /// same sample replaces the earlier one.
    fn onset_signal(&self, onsets: &[&NoteEvent]) -> Vec<(usize, f64)> {
        let Some(first) = onsets.first() else {
            return Vec::new();
        };
        let mut samples: Vec<(usize, f64)> = Vec::with_capacity(onsets.len());
        for onset in onsets {
            let offset = ((onset.timestamp - first.timestamp) * self.config.sampling_rate).floor();
            if offset < 0.0 || offset >= self.config.window as f64 {
                continue;
            }
            let index = offset as usize;
            match samples.iter_mut().find(|(i, _)| *i == index) {
                Some(sample) => sample.1 = onset.velocity as f64,
                None => samples.push((index, onset.velocity as f64)),
            }
        }
        samples.sort_by_key(|(i, _)| *i);
        samples
    }

    /// Local maxima inside the lag range, strongest first.
    fn candidate_peaks(&self, enhanced: &[f64]) -> Vec<usize> {
        let min_lag = 60.0 * self.config.sampling_rate / self.config.max_bpm;
        let max_lag = 60.0 * self.config.sampling_rate / self.config.min_bpm;

        let mut peaks: Vec<usize> = find_peaks(enhanced, self.config.min_peak_distance)
            .into_iter()
            .filter(|&p| (p as f64) > min_lag && (p as f64) < max_lag)
            .collect();
        peaks.sort_by(|&a, &b| enhanced[b].total_cmp(&enhanced[a]));
        peaks.truncate(self.config.num_peaks);
        peaks
    }
}

/// Doubles estimates below `threshold` so slow readings land an octave up.
pub fn octave_correct(bpm: u32, threshold: u32) -> u32 {
    if bpm < threshold { bpm * 2 } else { bpm }
}

/// Non-negative half of the autocorrelation of a sparse signal of length
/// `len`, normalised by its maximum.
fn autocorrelate(samples: &[(usize, f64)], len: usize) -> Option<Vec<f64>> {
    let mut corr = vec![0.0; len];
    for (k, &(i, x)) in samples.iter().enumerate() {
        for &(j, y) in &samples[k..] {
            corr[j - i] += x * y;
        }
    }
    let max = corr.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if max.is_nan() || max <= 0.0 {
        return None;
    }
    for value in &mut corr {
        *value /= max;
    }
    Some(corr)
}

/// `corr + corr(t/2) + corr(t/4)`: the signal plus its linear 2x and 4x
/// time stretches, truncated to the original length.
fn enhance_harmonics(corr: &[f64]) -> Vec<f64> {
    let len = corr.len();
    if len < 2 {
        return corr.to_vec();
    }
    let last = (len - 1) as f64;
    let interp = |position: f64| {
        let lo = position.floor() as usize;
        let hi = (lo + 1).min(len - 1);
        let frac = position - lo as f64;
        corr[lo] + (corr[hi] - corr[lo]) * frac
    };
    let step2 = last / (2 * len - 1) as f64;
    let step4 = last / (4 * len - 1) as f64;

    (0..len)
        .map(|i| corr[i] + interp(i as f64 * step2) + interp(i as f64 * step4))
        .collect()
}

/// Local maxima (plateaus report their middle sample) thinned so that no
/// two peaks are closer than `distance`, keeping the higher one.
fn find_peaks(x: &[f64], distance: usize) -> Vec<usize> {
    let mut peaks = Vec::new();
    if x.len() < 3 {
        return peaks;
    }

    let last = x.len() - 1;
    let mut i = 1;
    while i < last {
        if x[i - 1] < x[i] {
            let mut ahead = i + 1;
            while ahead < last && x[ahead] == x[i] {
                ahead += 1;
            }
            if x[ahead] < x[i] {
                peaks.push((i + ahead - 1) / 2);
                i = ahead;
            }
        }
        i += 1;
    }

    if distance <= 1 {
        return peaks;
    }
    let mut by_height: Vec<usize> = (0..peaks.len()).collect();
    by_height.sort_by(|&a, &b| x[peaks[a]].total_cmp(&x[peaks[b]]));

    let mut keep = vec![true; peaks.len()];
    for &j in by_height.iter().rev() {
        if !keep[j] {
            continue;
        }
        for k in (0..j).rev() {
            if peaks[j] - peaks[k] >= distance {
                break;
            }
            keep[k] = false;
        }
        for k in j + 1..peaks.len() {
            if peaks[k] - peaks[j] >= distance {
                break;
            }
            keep[k] = false;
        }
    }

    peaks
        .into_iter()
        .zip(keep)
        .filter_map(|(peak, kept)| kept.then_some(peak))
        .collect()
}

/// Impulse positions and weights of the combined pulse train for `lag`.
fn pulse_train(lag: usize, len: usize) -> Vec<(usize, f64)> {
    let mut train: Vec<(usize, f64)> = Vec::new();
    for (factor, weight) in PULSE_HARMONICS {
        let mut positions: Vec<usize> = (0..PULSES_PER_TRAIN)
            .map(|k| ((lag * k) as f64 * factor) as usize)
            .filter(|&p| p < len)
            .collect();
        positions.dedup();
        for position in positions {
            match train.iter_mut().find(|(p, _)| *p == position) {
                Some(impulse) => impulse.1 += weight,
                None => train.push((position, weight)),
            }
        }
    }
    train
}

/// Candidate lag whose pulse train correlates best, scored by the maximum
/// plus the variance of the full cross-correlation.
fn best_lag(enhanced: &[f64], candidates: &[usize]) -> Option<usize> {
    let len = enhanced.len() as isize;
    let mut best = None;
    let mut highest = 0.0;

    for &lag in candidates {
        let train = pulse_train(lag, enhanced.len());
        let cross: Vec<f64> = (-(len - 1)..len)
            .map(|shift| {
                train
                    .iter()
                    .filter_map(|&(p, w)| {
                        let at = p as isize + shift;
                        (0..len).contains(&at).then(|| w * enhanced[at as usize])
                    })
                    .sum()
            })
            .collect();

        let count = cross.len() as f64;
        let mean = cross.iter().sum::<f64>() / count;
        let variance = cross.iter().map(|c| (c - mean).powi(2)).sum::<f64>() / count;
        let max = cross.iter().copied().fold(f64::NEG_INFINITY, f64::max);

        let score = max + variance;
        if score > highest {
            highest = score;
            best = Some(lag);
        }
    }
    best
}
