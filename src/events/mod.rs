//! Domain events published by the speech core
//!
//! The presentation layer subscribes to an [`EventBus`] instead of being
//! called back from worker threads. Publishing is best-effort: with no
//! subscribers the event is dropped and a trace line is logged.

use serde::Serialize;
use tokio::sync::broadcast;

/// Buffered events per subscriber before the slowest one starts lagging
const CHANNEL_CAPACITY: usize = 256;

/// Event emitted by the speech core for UI listeners
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AssistantEvent {
    /// The current voice profile changed
    ProfileChanged {
        /// Name of the newly current profile
        name: String,
    },
    /// A listening session recognised a user utterance
    UserUtterance {
        /// Transcribed text (trimmed, never empty)
        text: String,
    },
    /// The listening session ended after the inactivity timeout
    SessionTimedOut,
    /// The listening session was stopped by the caller
    SessionStopped,
    /// The listening session ended because its audio source failed or ran dry
    SessionEnded {
        /// Human-readable cause
        reason: String,
    },
    /// Listening turned on or off
    ListeningChanged {
        /// Whether a session is now active
        listening: bool,
    },
    /// Speech synthesis failed even after the baseline fallback
    SynthesisFailed {
        /// Engine that produced the terminal failure
        engine: String,
        /// Error message
        error: String,
    },
}

impl AssistantEvent {
    /// Stable event name, e.g. `"user_utterance"`
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::ProfileChanged { .. } => "profile_changed",
            Self::UserUtterance { .. } => "user_utterance",
            Self::SessionTimedOut => "session_timed_out",
            Self::SessionStopped => "session_stopped",
            Self::SessionEnded { .. } => "session_ended",
            Self::ListeningChanged { .. } => "listening_changed",
            Self::SynthesisFailed { .. } => "synthesis_failed",
        }
    }
}

/// Fan-out channel for [`AssistantEvent`]s
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<AssistantEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    /// Create a bus with no subscribers
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Subscribe to all events published from now on
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<AssistantEvent> {
        self.tx.subscribe()
    }

    /// Publish an event to every current subscriber
    pub fn publish(&self, event: AssistantEvent) {
        let name = event.name();
        match self.tx.send(event) {
            Ok(receivers) => tracing::debug!(event = name, receivers, "published event"),
            Err(_) => tracing::trace!(event = name, "no event subscribers"),
        }
    }

    /// Number of live subscribers
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
