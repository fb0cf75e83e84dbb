//! Interject - an interruptible, streaming voice assistant core
//!
//! A wake word can cut the assistant off at any point: in-flight speech is
//! stopped, queued sentences are dropped, the model stream is abandoned, and
//! the assistant is listening again within a bounded time.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                    Collaborators                     │
//! │   Mic  │  Wake model  │  Whisper  │  TTS  │  Ollama  │
//! └────────────────────┬────────────────────────────────┘
//!                      │ traits in `voice`
//! ┌────────────────────▼────────────────────────────────┐
//! │                     Pipeline                         │
//! │  Listener │ Handler │ Generator │ Segmenter │ Queue  │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │               InterruptCoordinator                   │
//! │        session id │ cancel signal │ state            │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod error;
pub mod llm;
pub mod pipeline;
pub mod voice;

pub use config::Config;
pub use error::{Error, Result};
pub use llm::OllamaModel;
pub use pipeline::{
    Assistant, Collaborators, ConversationMemory, InterruptCoordinator, PipelineState,
    PipelineStatus, SentenceSegmenter, SessionId, SpeechOutputQueue, Turn,
};
