//! Speech recognition dispatcher
//!
//! Tries the local engine first and the hosted one second. Recognition never
//! fails from the caller's point of view: every error, blank transcript or
//! timeout collapses into an empty [`RecognitionResult`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::Result;
use crate::voice::segment::AudioSegment;

/// Recognizer that runs on this machine
#[async_trait]
pub trait OfflineTranscriber: Send + Sync {
    /// Engine name for logs
    fn name(&self) -> &'static str;

    /// Transcribe a captured utterance
    async fn transcribe(&self, segment: &AudioSegment) -> Result<String>;
}

/// Recognizer behind a network API
#[async_trait]
pub trait OnlineTranscriber: Send + Sync {
    /// Engine name for logs
    fn name(&self) -> &'static str;

    /// Transcribe WAV bytes (16 kHz, mono, 16-bit)
    async fn transcribe(&self, wav: &[u8]) -> Result<String>;
}

/// Text recognized from one utterance; empty when nothing was understood
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecognitionResult {
    /// Trimmed transcript
    pub text: String,
}

impl RecognitionResult {
    /// Whether nothing was recognized
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

/// Offline-then-online recognition with an overall deadline
#[derive(Clone, Default)]
pub struct SpeechRecognizer {
    offline: Option<Arc<dyn OfflineTranscriber>>,
    online: Option<Arc<dyn OnlineTranscriber>>,
}

impl SpeechRecognizer {
    /// Create a recognizer; either engine may be absent
    #[must_use]
    pub fn new(
        offline: Option<Arc<dyn OfflineTranscriber>>,
        online: Option<Arc<dyn OnlineTranscriber>>,
    ) -> Self {
        Self { offline, online }
    }

    /// Whether any engine is configured
    #[must_use]
    pub const fn has_engines(&self) -> bool {
        self.offline.is_some() || self.online.is_some()
    }

    /// Recognize `segment` within `timeout`
    ///
    /// On expiry the in-flight engine call is dropped and the result is empty.
    pub async fn recognize(&self, segment: &AudioSegment, timeout: Duration) -> RecognitionResult {
        if segment.is_empty() {
            return RecognitionResult::default();
        }

        match tokio::time::timeout(timeout, self.recognize_inner(segment)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(
                    timeout_ms = timeout.as_millis(),
                    audio_ms = segment.duration().as_millis(),
                    "speech recognition timed out"
                );
                RecognitionResult::default()
            }
        }
    }

    async fn recognize_inner(&self, segment: &AudioSegment) -> RecognitionResult {
        if let Some(offline) = &self.offline {
            match offline.transcribe(segment).await {
                Ok(text) if !text.trim().is_empty() => {
                    tracing::debug!(engine = offline.name(), chars = text.len(), "recognized offline");
                    return RecognitionResult {
                        text: text.trim().to_string(),
                    };
                }
                Ok(_) => {
                    tracing::debug!(engine = offline.name(), "offline transcript was blank");
                }
                Err(e) => {
                    tracing::warn!(
                        engine = offline.name(),
                        audio_ms = segment.duration().as_millis(),
                        error = %e,
                        "offline recognition failed"
                    );
                }
            }
        }

        let Some(online) = &self.online else {
            return RecognitionResult::default();
        };

        let wav = match segment.to_wav() {
            Ok(wav) => wav,
            Err(e) => {
                tracing::warn!(error = %e, "failed to encode utterance");
                return RecognitionResult::default();
            }
        };

        match online.transcribe(&wav).await {
            Ok(text) => {
                tracing::debug!(engine = online.name(), chars = text.len(), "recognized online");
                RecognitionResult {
                    text: text.trim().to_string(),
                }
            }
            Err(e) => {
                tracing::warn!(
                    engine = online.name(),
                    audio_bytes = wav.len(),
                    error = %e,
                    "online recognition failed"
                );
                RecognitionResult::default()
            }
        }
    }
}
