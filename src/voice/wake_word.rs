//! Wake word classification
//!
//! Wraps a rustpotter detector behind [`WakeClassifier`]. Builds without the
//! `wake-word` feature have no classifier and refuse to start the pipeline.

use std::path::Path;

use super::traits::WakeClassifier;
use crate::Result;

#[cfg(feature = "wake-word")]
mod detector {
    use std::path::Path;

    use rustpotter::{Rustpotter, RustpotterConfig, SampleFormat};

    use crate::voice::capture::SAMPLE_RATE;
    use crate::voice::traits::{AudioFrame, WakeClassifier};
    use crate::{Error, Result};

    /// Classifies frames with a rustpotter wake word model
    pub struct RustpotterClassifier {
        detector: Rustpotter,
        keywords: Vec<String>,
    }

    impl RustpotterClassifier {
        /// Load the model at `path`
        ///
        /// # Errors
        ///
        /// Returns error if the detector or model cannot be loaded
        pub fn new(path: &Path, threshold: f32) -> Result<Self> {
            let mut config = RustpotterConfig::default();
            config.fmt.sample_rate = SAMPLE_RATE as usize;
            config.fmt.channels = 1;
            config.fmt.sample_format = SampleFormat::I16;
            config.detector.threshold = threshold;

            let mut detector = Rustpotter::new(&config)
                .map_err(|e| Error::WakeWord(format!("failed to create detector: {e}")))?;

            let keyword = path
                .file_stem()
                .map_or_else(|| "wake".to_string(), |s| s.to_string_lossy().into_owned());
            let path_str = path
                .to_str()
                .ok_or_else(|| Error::WakeWord(format!("non-UTF-8 model path {}", path.display())))?;

            detector
                .add_wakeword_from_file(&keyword, path_str)
                .map_err(|e| Error::WakeWord(format!("failed to load {}: {e}", path.display())))?;

            tracing::info!(
                keyword,
                frame_length = detector.get_samples_per_frame(),
                "wake word model loaded"
            );

            Ok(Self {
                detector,
                keywords: vec![keyword],
            })
        }
    }

    impl WakeClassifier for RustpotterClassifier {
        fn frame_length(&self) -> usize {
            self.detector.get_samples_per_frame()
        }

        fn sample_rate(&self) -> u32 {
            SAMPLE_RATE
        }

        fn classify(&mut self, frame: &AudioFrame) -> Option<usize> {
            let detection = self.detector.process_samples::<i16>(frame.samples().to_vec())?;
            tracing::debug!(
                name = %detection.name,
                score = detection.score,
                "wake word scored"
            );
            self.keywords
                .iter()
                .position(|k| *k == detection.name)
                .or(Some(0))
        }
    }
}

#[cfg(feature = "wake-word")]
pub use detector::RustpotterClassifier;

/// Load the wake classifier for `model`
///
/// # Errors
///
/// Returns error if no model is configured, the model cannot be loaded, or
/// the build lacks the `wake-word` feature
pub fn load_classifier(model: Option<&Path>, threshold: f32) -> Result<Box<dyn WakeClassifier>> {
    let Some(path) = model else {
        return Err(crate::Error::WakeWord(
            "no wake word model configured (set voice.wake_model)".to_string(),
        ));
    };

    #[cfg(feature = "wake-word")]
    {
        if !path.exists() {
            return Err(crate::Error::WakeWord(format!(
                "wake word model not found: {}",
                path.display()
            )));
        }
        Ok(Box::new(RustpotterClassifier::new(path, threshold)?))
    }

    #[cfg(not(feature = "wake-word"))]
    {
        let _ = threshold;
        Err(crate::Error::WakeWord(format!(
            "cannot load {}: built without the wake-word feature",
            path.display()
        )))
    }
}
