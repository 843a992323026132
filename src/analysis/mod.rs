mod mood;
mod tempo;

pub use mood::{MoodEstimator, MoodFeatures, MoodReading, MoodSample, sigmoid_unit};
pub use tempo::{TempoEstimator, octave_correct};
