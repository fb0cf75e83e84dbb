//! Energy-based phrase endpointing
//!
//! Decides when a spoken command has started and finished by tracking RMS
//! energy over incoming blocks of samples.

use std::time::Duration;

/// Minimum duration of speech for a phrase (in samples at 16kHz)
const MIN_SPEECH_SAMPLES: usize = 4800; // 0.3 seconds

/// Silence duration that ends a phrase (in samples at 16kHz)
const SILENCE_SAMPLES: usize = 8000; // 0.5 seconds

/// Verdict after a block of samples
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    /// No speech yet
    Waiting,
    /// Speech in progress
    Speaking,
    /// Phrase finished (trailing silence or phrase limit)
    Complete,
    /// No speech began before the timeout
    TimedOut,
}

/// Tracks speech activity for one phrase
#[derive(Debug)]
pub struct Endpointer {
    threshold: f32,
    timeout_samples: usize,
    phrase_limit_samples: usize,
    max_duration: Duration,
    state: Endpoint,
    speech: Vec<f32>,
    voiced: usize,
    silence: usize,
    waited: usize,
}

impl Endpointer {
    /// Create an endpointer for audio at `sample_rate`
    ///
    /// Speech must begin within `timeout` and is cut off after `phrase_limit`.
    #[must_use]
    pub fn new(threshold: f32, sample_rate: u32, timeout: Duration, phrase_limit: Duration) -> Self {
        Self {
            threshold,
            timeout_samples: duration_to_samples(timeout, sample_rate),
            phrase_limit_samples: duration_to_samples(phrase_limit, sample_rate),
            max_duration: timeout + phrase_limit,
            state: Endpoint::Waiting,
            speech: Vec::new(),
            voiced: 0,
            silence: 0,
            waited: 0,
        }
    }

    /// Feed a block of samples and return the current verdict
    pub fn push(&mut self, samples: &[f32]) -> Endpoint {
        if samples.is_empty() {
            return self.state;
        }

        let energy = rms_energy(samples);
        let is_speech = energy > self.threshold;

        match self.state {
            Endpoint::Waiting => {
                if is_speech {
                    self.state = Endpoint::Speaking;
                    self.speech.clear();
                    self.speech.extend_from_slice(samples);
                    self.voiced = samples.len();
                    self.silence = 0;
                    tracing::trace!(energy, "speech started");
                } else {
                    self.waited += samples.len();
                    if self.waited >= self.timeout_samples {
                        tracing::debug!("no speech before timeout");
                        self.state = Endpoint::TimedOut;
                    }
                }
            }
            Endpoint::Speaking => {
                self.speech.extend_from_slice(samples);

                if is_speech {
                    self.voiced += samples.len();
                    self.silence = 0;
                } else {
                    self.silence += samples.len();
                }

                if self.silence > SILENCE_SAMPLES && self.voiced > MIN_SPEECH_SAMPLES {
                    tracing::debug!(samples = self.speech.len(), "phrase complete");
                    self.state = Endpoint::Complete;
                } else if self.speech.len() >= self.phrase_limit_samples {
                    tracing::debug!(samples = self.speech.len(), "phrase limit reached");
                    self.state = Endpoint::Complete;
                } else if self.silence > SILENCE_SAMPLES * 2 {
                    // A click or cough, not a phrase
                    tracing::trace!("speech too short, waiting again");
                    self.waited += self.speech.len();
                    self.speech.clear();
                    self.voiced = 0;
                    self.silence = 0;
                    self.state = if self.waited >= self.timeout_samples {
                        Endpoint::TimedOut
                    } else {
                        Endpoint::Waiting
                    };
                }
            }
            Endpoint::Complete | Endpoint::TimedOut => {}
        }

        self.state
    }

    #[must_use]
    pub const fn state(&self) -> Endpoint {
        self.state
    }

    /// Whether any speech has been accumulated
    #[must_use]
    pub fn has_speech(&self) -> bool {
        !self.speech.is_empty()
    }

    /// Take the accumulated speech
    pub fn take_speech(&mut self) -> Vec<f32> {
        std::mem::take(&mut self.speech)
    }

    /// Longest this endpointer can run before reaching a verdict
    #[must_use]
    pub const fn max_duration(&self) -> Duration {
        self.max_duration
    }
}

/// Calculate RMS energy of audio samples
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn rms_energy(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

#[allow(clippy::cast_possible_truncation)]
fn duration_to_samples(duration: Duration, sample_rate: u32) -> usize {
    (duration.as_millis() * u128::from(sample_rate) / 1000) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_energy_calculation() {
        let silence = vec![0.0f32; 100];
        assert!(rms_energy(&silence) < 0.001);

        let loud = vec![0.5f32; 100];
        assert!(rms_energy(&loud) > 0.4);

        assert!(rms_energy(&[]) < f32::EPSILON);
    }

    #[test]
    fn test_duration_to_samples() {
        assert_eq!(duration_to_samples(Duration::from_secs(1), 16000), 16000);
        assert_eq!(duration_to_samples(Duration::from_millis(250), 16000), 4000);
    }

    #[test]
    fn test_empty_block_keeps_state() {
        let mut endpointer =
            Endpointer::new(0.03, 16000, Duration::from_secs(1), Duration::from_secs(5));
        assert_eq!(endpointer.push(&[]), Endpoint::Waiting);
    }
}
