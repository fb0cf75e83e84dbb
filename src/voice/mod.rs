//! Voice processing module
//!
//! Collaborator contracts plus their concrete adapters: microphone capture,
//! wake word classification, phrase endpointing, Whisper STT, `OpenAI` TTS
//! and speaker playback.

mod capture;
mod endpoint;
mod playback;
mod stt;
mod traits;
mod tts;
mod wake_word;

pub use capture::{AudioCapture, MicrophoneSource, SAMPLE_RATE, f32_to_i16, samples_to_wav};
pub use endpoint::{Endpoint, Endpointer, rms_energy};
pub use playback::{AudioPlayback, PLAYBACK_SAMPLE_RATE, PlaybackEnd, decode_mp3};
pub use stt::{SpeechToText, WhisperCapture};
pub use traits::{
    AudioFrame, AudioSource, ChunkStream, CommandCapture, LanguageModel, SpeechEngine, Utterance,
    WakeClassifier, WakeEvent,
};
pub use tts::{OpenAiSpeechEngine, TextToSpeech};
#[cfg(feature = "wake-word")]
pub use wake_word::RustpotterClassifier;
pub use wake_word::load_classifier;
