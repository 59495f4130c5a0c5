//! Continuous press-to-talk listening
//!
//! A session pulls frames from a [`FrameSource`], segments them with an
//! [`AudioFrameClassifier`] and publishes each recognized utterance. It ends
//! when the caller stops it, when no utterance arrives within the session
//! timeout, or when the source runs dry.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::ListenConfig;
use crate::events::{AssistantEvent, EventBus};
use crate::voice::recognition::SpeechRecognizer;
use crate::voice::segment::{AudioSegment, PcmFrame};
use crate::voice::vad::{AudioFrameClassifier, SpeechState, VoiceActivityDetector};
use crate::{Error, Result};

/// Builds a fresh detector for each session
pub type DetectorFactory = Arc<dyn Fn() -> Box<dyn VoiceActivityDetector> + Send + Sync>;

/// Supplier of fixed-size PCM frames
#[async_trait]
pub trait FrameSource: Send {
    /// Next frame, or `None` once the source is exhausted
    async fn next_frame(&mut self) -> Result<Option<PcmFrame>>;
}

struct SessionControl {
    id: u64,
    cancel: CancellationToken,
}

type SessionSlot = Arc<Mutex<Option<SessionControl>>>;

/// How a session ended on its own
enum SessionEnd {
    TimedOut,
    SourceEnded(String),
}

/// Runs at most one listening session at a time
pub struct ContinuousListener {
    recognizer: SpeechRecognizer,
    detectors: DetectorFactory,
    config: ListenConfig,
    events: EventBus,
    session: SessionSlot,
    next_id: AtomicU64,
}

impl ContinuousListener {
    #[must_use]
    pub fn new(
        recognizer: SpeechRecognizer,
        detectors: DetectorFactory,
        config: ListenConfig,
        events: EventBus,
    ) -> Self {
        Self {
            recognizer,
            detectors,
            config,
            events,
            session: Arc::new(Mutex::new(None)),
            next_id: AtomicU64::new(1),
        }
    }

    /// Start a session reading from `source`
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionActive`] if a session is already running
    pub fn start(&self, source: Box<dyn FrameSource>) -> Result<()> {
        let cancel = CancellationToken::new();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        {
            let mut slot = self.session.lock().unwrap_or_else(PoisonError::into_inner);
            if slot.is_some() {
                return Err(Error::SessionActive);
            }
            *slot = Some(SessionControl {
                id,
                cancel: cancel.clone(),
            });
        }

        tracing::info!(
            session = id,
            timeout_secs = self.config.session_timeout.as_secs(),
            "listening session started"
        );
        self.events
            .publish(AssistantEvent::ListeningChanged { listening: true });

        let session = Session {
            id,
            cancel,
            classifier: AudioFrameClassifier::new((self.detectors)()),
            recognizer: self.recognizer.clone(),
            config: self.config.clone(),
            events: self.events.clone(),
            slot: Arc::clone(&self.session),
        };
        tokio::spawn(session.run(source));
        Ok(())
    }

    /// Stop the running session
    ///
    /// Returns false if no session was active. A recognition already in
    /// flight finishes in the background and its result is discarded.
    pub fn stop(&self) -> bool {
        let control = self
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(control) = control else {
            return false;
        };

        control.cancel.cancel();
        tracing::info!(session = control.id, "listening session stopped");
        self.events.publish(AssistantEvent::SessionStopped);
        self.events
            .publish(AssistantEvent::ListeningChanged { listening: false });
        true
    }

    /// Whether a session is running
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

struct Session {
    id: u64,
    cancel: CancellationToken,
    classifier: AudioFrameClassifier,
    recognizer: SpeechRecognizer,
    config: ListenConfig,
    events: EventBus,
    slot: SessionSlot,
}

/// What came of one finished segment
enum Heard {
    Utterance,
    Nothing,
    Cancelled,
}

impl Session {
    async fn run(mut self, mut source: Box<dyn FrameSource>) {
        let mut last_interaction = Instant::now();

        let end = loop {
            if self.cancel.is_cancelled() {
                return;
            }

            let deadline = last_interaction + self.config.session_timeout;
            let speaking = self.classifier.is_speaking();

            let frame = tokio::select! {
                () = self.cancel.cancelled() => return,
                () = tokio::time::sleep_until(deadline), if !speaking => break SessionEnd::TimedOut,
                frame = source.next_frame() => frame,
            };

            match frame {
                Ok(Some(frame)) => match self.classifier.classify(&frame) {
                    Ok(SpeechState::Ended(segment)) => match self.hear(&segment).await {
                        Heard::Utterance => last_interaction = Instant::now(),
                        Heard::Nothing => {}
                        Heard::Cancelled => return,
                    },
                    Ok(state) => {
                        tracing::trace!(session = self.id, state = state.label(), "frame classified");
                    }
                    Err(e) => {
                        tracing::warn!(session = self.id, error = %e, "dropping frame");
                    }
                },
                Ok(None) => {
                    if let Some(segment) = self.classifier.flush() {
                        if let Heard::Cancelled = self.hear(&segment).await {
                            return;
                        }
                    }
                    break SessionEnd::SourceEnded("audio source exhausted".to_string());
                }
                Err(e) => {
                    tracing::warn!(session = self.id, error = %e, "audio source failed");
                    break SessionEnd::SourceEnded(e.to_string());
                }
            }
        };

        self.finish(end);
    }

    /// Recognize a segment and publish the utterance
    ///
    /// The recognition call itself is never interrupted; a stop that lands
    /// while it runs discards the result.
    async fn hear(&mut self, segment: &AudioSegment) -> Heard {
        tracing::debug!(
            session = self.id,
            audio_ms = segment.duration().as_millis(),
            "utterance captured"
        );
        let result = self
            .recognizer
            .recognize(segment, self.config.recognition_timeout)
            .await;

        // Held across the publish so a concurrent stop lands strictly after it
        let slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if self.cancel.is_cancelled() || slot.as_ref().map(|control| control.id) != Some(self.id) {
            tracing::debug!(session = self.id, "discarding recognition after stop");
            return Heard::Cancelled;
        }
        if result.is_empty() {
            return Heard::Nothing;
        }

        tracing::info!(session = self.id, chars = result.text.len(), "user utterance");
        self.events
            .publish(AssistantEvent::UserUtterance { text: result.text });
        Heard::Utterance
    }

    /// Clear the session slot and announce why the session ended
    ///
    /// Nothing is published if `stop` already claimed the slot.
    fn finish(self, end: SessionEnd) {
        {
            let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
            if slot.as_ref().map(|control| control.id) != Some(self.id) {
                return;
            }
            *slot = None;
        }

        match end {
            SessionEnd::TimedOut => {
                tracing::info!(session = self.id, "listening session timed out");
                self.events.publish(AssistantEvent::SessionTimedOut);
            }
            SessionEnd::SourceEnded(reason) => {
                tracing::info!(session = self.id, reason = %reason, "listening session ended");
                self.events.publish(AssistantEvent::SessionEnded { reason });
            }
        }
        self.events
            .publish(AssistantEvent::ListeningChanged { listening: false });
    }
}
