//! Echo - speech pipeline core for a desktop voice assistant
//!
//! This library provides:
//! - Voice activity framing of microphone audio into utterances
//! - Named voice profiles with a switchable current profile
//! - Queued speech synthesis with a local fallback engine
//! - Offline-then-online speech recognition under a deadline
//! - A continuous listening loop with session timeout and stop
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │              Presentation (GUI / CLI)               │
//! └──────────────▲─────────────────────┬────────────────┘
//!         events │                     │ speak / listen
//! ┌──────────────┴─────────────────────▼────────────────┐
//! │                   SpeechService                     │
//! │  Registry │ Synthesizer │ Recognizer │ Listener     │
//! └──────────────────────────┬──────────────────────────┘
//!                            │
//! ┌──────────────────────────▼──────────────────────────┐
//! │                      Engines                        │
//! │  espeak-ng │ OpenAI │ ElevenLabs │ whisper │ cpal   │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod error;
pub mod events;
pub mod service;
pub mod voice;

pub use config::Config;
pub use error::{Error, Result};
pub use events::{AssistantEvent, EventBus};
pub use service::{SpeechService, SpeechServiceBuilder};
