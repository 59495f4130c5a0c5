//! Speech synthesis dispatcher
//!
//! `speak` requests are queued FIFO onto a single worker task, so utterances
//! never overlap on the output device. A request whose engine fails is
//! retried once on the baseline engine before it is reported as failed.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::events::{AssistantEvent, EventBus};
use crate::voice::profile::{Engine, VoiceProfile, VoiceRegistry};
use crate::{Error, Result};

/// An engine that turns text into audible speech
#[async_trait]
pub trait SynthesisBackend: Send + Sync {
    /// Engine this backend implements
    fn engine(&self) -> Engine;

    /// Speak `text` with `profile`, returning once playback has finished
    async fn speak(&self, text: &str, profile: &VoiceProfile) -> Result<()>;
}

/// How a synthesis request completed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SynthesisOutcome {
    /// The text was spoken
    Spoken {
        /// Engine that produced the audio
        engine: Engine,
        /// Whether the profile's own engine failed and baseline took over
        fell_back: bool,
    },
    /// Blank text; nothing to say
    Empty,
}

/// Completion handle for one `speak` request
#[derive(Debug)]
pub struct SynthesisHandle {
    rx: oneshot::Receiver<Result<SynthesisOutcome>>,
}

impl SynthesisHandle {
    fn ready(outcome: SynthesisOutcome) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(Ok(outcome));
        Self { rx }
    }

    /// Wait for the request to be spoken
    ///
    /// # Errors
    ///
    /// Returns the baseline engine's error if every attempt failed, or
    /// [`Error::ServiceStopped`] if the worker exited first
    pub async fn wait(self) -> Result<SynthesisOutcome> {
        self.rx.await.map_err(|_| Error::ServiceStopped)?
    }
}

struct SynthesisRequest {
    text: String,
    profile: Arc<VoiceProfile>,
    reply: oneshot::Sender<Result<SynthesisOutcome>>,
}

/// Queues speech requests onto one background worker
pub struct SpeechSynthesizer {
    tx: Mutex<Option<mpsc::Sender<SynthesisRequest>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    registry: Arc<VoiceRegistry>,
}

impl SpeechSynthesizer {
    /// Start the worker task
    ///
    /// At most `capacity` requests wait in the queue; further `speak` calls
    /// suspend until the worker catches up. Must be called inside a Tokio
    /// runtime.
    #[must_use]
    pub fn spawn(
        backends: Vec<Arc<dyn SynthesisBackend>>,
        registry: Arc<VoiceRegistry>,
        events: EventBus,
        capacity: usize,
    ) -> Self {
        let backends: HashMap<Engine, Arc<dyn SynthesisBackend>> = backends
            .into_iter()
            .map(|backend| (backend.engine(), backend))
            .collect();

        let (tx, rx) = mpsc::channel(capacity.max(1));
        let worker = tokio::spawn(run_worker(rx, backends, events));

        tracing::debug!(capacity, "synthesis worker started");
        Self {
            tx: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(worker)),
            registry,
        }
    }

    /// Queue `text` for speech
    ///
    /// With no `profile` the registry's current profile is captured now, so
    /// a later switch does not affect this request. Returns once the request
    /// is queued; await the handle to wait for playback.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ServiceStopped`] after [`shutdown`](Self::shutdown)
    pub async fn speak(
        &self,
        text: &str,
        profile: Option<Arc<VoiceProfile>>,
    ) -> Result<SynthesisHandle> {
        if text.trim().is_empty() {
            return Ok(SynthesisHandle::ready(SynthesisOutcome::Empty));
        }

        let profile = profile.unwrap_or_else(|| self.registry.current());
        let tx = self
            .tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(Error::ServiceStopped)?;

        let (reply, rx) = oneshot::channel();
        tx.send(SynthesisRequest {
            text: text.to_string(),
            profile,
            reply,
        })
        .await
        .map_err(|_| Error::ServiceStopped)?;

        Ok(SynthesisHandle { rx })
    }

    /// Stop accepting requests and wait for queued ones to finish
    pub async fn shutdown(&self) {
        drop(self.tx.lock().unwrap_or_else(PoisonError::into_inner).take());

        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                tracing::error!(error = %e, "synthesis worker panicked");
            }
            tracing::debug!("synthesis worker stopped");
        }
    }
}

async fn run_worker(
    mut rx: mpsc::Receiver<SynthesisRequest>,
    backends: HashMap<Engine, Arc<dyn SynthesisBackend>>,
    events: EventBus,
) {
    while let Some(request) = rx.recv().await {
        let result = synthesize(&backends, &request.text, &request.profile).await;

        if let Err(e) = &result {
            tracing::error!(
                profile = %request.profile.name,
                chars = request.text.chars().count(),
                kind = e.kind(),
                error = %e,
                "speech synthesis failed"
            );
            events.publish(AssistantEvent::SynthesisFailed {
                engine: Engine::Baseline.to_string(),
                error: e.to_string(),
            });
        }

        // The caller may have dropped its handle
        let _ = request.reply.send(result);
    }
}

/// Speak with the profile's engine, falling back to baseline once
async fn synthesize(
    backends: &HashMap<Engine, Arc<dyn SynthesisBackend>>,
    text: &str,
    profile: &VoiceProfile,
) -> Result<SynthesisOutcome> {
    match attempt(backends, profile.engine, text, profile).await {
        Ok(()) => {
            return Ok(SynthesisOutcome::Spoken {
                engine: profile.engine,
                fell_back: false,
            });
        }
        Err(e) if profile.engine == Engine::Baseline => return Err(e),
        Err(e) => {
            tracing::warn!(
                engine = %profile.engine,
                chars = text.chars().count(),
                error = %e,
                "synthesis engine failed, falling back to baseline"
            );
        }
    }

    attempt(backends, Engine::Baseline, text, profile).await?;
    Ok(SynthesisOutcome::Spoken {
        engine: Engine::Baseline,
        fell_back: true,
    })
}

async fn attempt(
    backends: &HashMap<Engine, Arc<dyn SynthesisBackend>>,
    engine: Engine,
    text: &str,
    profile: &VoiceProfile,
) -> Result<()> {
    let backend = backends
        .get(&engine)
        .ok_or_else(|| Error::provider(engine.as_str(), "engine not configured"))?;

    tracing::debug!(engine = %engine, profile = %profile.name, chars = text.chars().count(), "speaking");
    backend.speak(text, profile).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voice::profile::DEFAULT_PROFILE;

    struct Silent(Engine);

    #[async_trait]
    impl SynthesisBackend for Silent {
        fn engine(&self) -> Engine {
            self.0
        }

        async fn speak(&self, _text: &str, _profile: &VoiceProfile) -> Result<()> {
            Ok(())
        }
    }

    fn registry() -> Arc<VoiceRegistry> {
        Arc::new(
            VoiceRegistry::new(
                VoiceProfile::new(DEFAULT_PROFILE, Engine::Baseline),
                EventBus::new(),
            )
            .unwrap(),
        )
    }

    #[tokio::test]
    async fn blank_text_skips_the_queue() {
        let synth = SpeechSynthesizer::spawn(Vec::new(), registry(), EventBus::new(), 4);
        let outcome = synth.speak("  \n", None).await.unwrap().wait().await.unwrap();
        assert_eq!(outcome, SynthesisOutcome::Empty);
        synth.shutdown().await;
    }

    #[tokio::test]
    async fn missing_engine_falls_back_to_baseline() {
        let synth = SpeechSynthesizer::spawn(
            vec![Arc::new(Silent(Engine::Baseline))],
            registry(),
            EventBus::new(),
            4,
        );
        let profile = Arc::new(VoiceProfile::new("fast", Engine::CloudA));

        let outcome = synth
            .speak("hello", Some(profile))
            .await
            .unwrap()
            .wait()
            .await
            .unwrap();
        assert_eq!(
            outcome,
            SynthesisOutcome::Spoken {
                engine: Engine::Baseline,
                fell_back: true
            }
        );
        synth.shutdown().await;
    }

    #[tokio::test]
    async fn speak_after_shutdown_fails() {
        let synth = SpeechSynthesizer::spawn(Vec::new(), registry(), EventBus::new(), 4);
        synth.shutdown().await;
        assert!(matches!(
            synth.speak("hello", None).await,
            Err(Error::ServiceStopped)
        ));
    }
}
