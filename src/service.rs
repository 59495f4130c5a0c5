//! Speech service: owns the registry, the synthesis worker and the listener
//!
//! Constructed explicitly by the host application and torn down with
//! [`SpeechService::shutdown`].

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::config::Config;
use crate::events::{AssistantEvent, EventBus};
use crate::voice::capture::MicrophoneSource;
use crate::voice::listen::{ContinuousListener, DetectorFactory, FrameSource};
use crate::voice::local::{EspeakBackend, WhisperCliTranscriber};
use crate::voice::playback::{AudioOutput, SpeakerOutput};
use crate::voice::profile::{VoiceProfile, VoiceRegistry};
use crate::voice::recognition::{
    OfflineTranscriber, OnlineTranscriber, RecognitionResult, SpeechRecognizer,
};
use crate::voice::segment::AudioSegment;
use crate::voice::stt::SpeechToText;
use crate::voice::synthesis::{SpeechSynthesizer, SynthesisBackend, SynthesisHandle};
use crate::voice::tts::{CloudSpeech, TextToSpeech};
use crate::voice::vad::build_detector;
use crate::{Error, Result};

/// Running speech core
pub struct SpeechService {
    config: Config,
    events: EventBus,
    registry: Arc<VoiceRegistry>,
    synthesizer: SpeechSynthesizer,
    recognizer: SpeechRecognizer,
    listener: ContinuousListener,
    skipped_profiles: Vec<Error>,
}

impl SpeechService {
    /// Start the service with the engines available on this machine
    ///
    /// Engines that cannot be set up (no output device, binary not on
    /// `PATH`, missing key) are logged and left out; synthesis then falls
    /// back to whatever remains.
    ///
    /// # Errors
    ///
    /// Returns error if the profile registry cannot be built
    pub fn start(config: Config) -> Result<Self> {
        let mut builder = Self::builder(config.clone());

        match SpeakerOutput::new() {
            Ok(speaker) => {
                let output: Arc<dyn AudioOutput> = Arc::new(speaker);
                for backend in synthesis_backends(&config, &output) {
                    builder = builder.synthesis_backend(backend);
                }
            }
            Err(e) => tracing::warn!(error = %e, "no audio output, speech synthesis disabled"),
        }

        if let Some(offline) = offline_transcriber(&config) {
            builder = builder.offline_transcriber(offline);
        }
        if let Some(online) = online_transcriber(&config) {
            builder = builder.online_transcriber(online);
        }

        builder.build()
    }

    /// Assemble a service from explicit parts
    #[must_use]
    pub fn builder(config: Config) -> SpeechServiceBuilder {
        SpeechServiceBuilder::new(config)
    }

    /// Configuration the service was started with
    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// Event bus for UI listeners
    #[must_use]
    pub const fn events(&self) -> &EventBus {
        &self.events
    }

    /// Subscribe to domain events
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<AssistantEvent> {
        self.events.subscribe()
    }

    /// Voice profile registry
    #[must_use]
    pub const fn registry(&self) -> &Arc<VoiceRegistry> {
        &self.registry
    }

    /// Optional profiles that could not be registered at startup
    #[must_use]
    pub fn skipped_profiles(&self) -> &[Error] {
        &self.skipped_profiles
    }

    /// Queue `text` for speech with `profile`, or the current profile
    ///
    /// # Errors
    ///
    /// Returns [`Error::ServiceStopped`] after shutdown
    pub async fn speak(
        &self,
        text: &str,
        profile: Option<Arc<VoiceProfile>>,
    ) -> Result<SynthesisHandle> {
        self.synthesizer.speak(text, profile).await
    }

    /// Make `name` the current voice profile
    pub fn switch_profile(&self, name: &str) -> bool {
        self.registry.switch(name)
    }

    /// Recognize a single utterance outside a listening session
    pub async fn recognize(&self, segment: &AudioSegment) -> RecognitionResult {
        self.recognizer
            .recognize(segment, self.config.listen.recognition_timeout)
            .await
    }

    /// Start a listening session on `source`
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionActive`] if a session is already running
    pub fn start_listening(&self, source: Box<dyn FrameSource>) -> Result<()> {
        self.listener.start(source)
    }

    /// Start a listening session on the default microphone
    ///
    /// # Errors
    ///
    /// Returns error if the microphone cannot be opened or a session is
    /// already running
    pub fn start_listening_microphone(&self) -> Result<()> {
        if self.listener.is_active() {
            return Err(Error::SessionActive);
        }
        self.listener.start(Box::new(MicrophoneSource::open()?))
    }

    /// Stop the listening session; false if none was running
    pub fn stop_listening(&self) -> bool {
        self.listener.stop()
    }

    /// Whether a listening session is running
    #[must_use]
    pub fn is_listening(&self) -> bool {
        self.listener.is_active()
    }

    /// Stop listening and drain the synthesis queue
    pub async fn shutdown(&self) {
        self.listener.stop();
        self.synthesizer.shutdown().await;
        tracing::info!("speech service stopped");
    }
}

/// Builder for [`SpeechService`] with injectable engines
pub struct SpeechServiceBuilder {
    config: Config,
    events: EventBus,
    backends: Vec<Arc<dyn SynthesisBackend>>,
    offline: Option<Arc<dyn OfflineTranscriber>>,
    online: Option<Arc<dyn OnlineTranscriber>>,
    detectors: Option<DetectorFactory>,
}

impl SpeechServiceBuilder {
    fn new(config: Config) -> Self {
        Self {
            config,
            events: EventBus::new(),
            backends: Vec::new(),
            offline: None,
            online: None,
            detectors: None,
        }
    }

    /// Publish on an existing event bus
    #[must_use]
    pub fn events(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    /// Add a synthesis engine; a later one for the same engine replaces it
    #[must_use]
    pub fn synthesis_backend(mut self, backend: Arc<dyn SynthesisBackend>) -> Self {
        self.backends.push(backend);
        self
    }

    /// Set the local recognizer
    #[must_use]
    pub fn offline_transcriber(mut self, transcriber: Arc<dyn OfflineTranscriber>) -> Self {
        self.offline = Some(transcriber);
        self
    }

    /// Set the hosted recognizer
    #[must_use]
    pub fn online_transcriber(mut self, transcriber: Arc<dyn OnlineTranscriber>) -> Self {
        self.online = Some(transcriber);
        self
    }

    /// Override the voice activity detector built for each session
    #[must_use]
    pub fn detectors(mut self, detectors: DetectorFactory) -> Self {
        self.detectors = Some(detectors);
        self
    }

    /// Build the registry and spawn the synthesis worker
    ///
    /// Must be called inside a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns error if the configuration is invalid or the profile
    /// registry cannot be built
    pub fn build(self) -> Result<SpeechService> {
        let Self {
            config,
            events,
            backends,
            offline,
            online,
            detectors,
        } = self;
        config.validate()?;

        let (registry, skipped_profiles) = VoiceRegistry::with_defaults(
            &config.api_keys,
            config.profiles.clone(),
            events.clone(),
        )?;
        if let Some(name) = &config.default_profile {
            if !registry.switch(name) {
                tracing::warn!(profile = %name, "configured default profile is not registered");
            }
        }
        let registry = Arc::new(registry);

        let synthesizer = SpeechSynthesizer::spawn(
            backends,
            Arc::clone(&registry),
            events.clone(),
            config.tts.queue_capacity,
        );

        let recognizer = SpeechRecognizer::new(offline, online);
        if !recognizer.has_engines() {
            tracing::warn!("no speech recognition engine configured");
        }

        let detectors = detectors.unwrap_or_else(|| {
            let vad = config.vad.clone();
            let factory: DetectorFactory = Arc::new(move || build_detector(&vad));
            factory
        });
        let listener = ContinuousListener::new(
            recognizer.clone(),
            detectors,
            config.listen.clone(),
            events.clone(),
        );

        tracing::info!(
            profiles = registry.len(),
            current = %registry.current().name,
            "speech service started"
        );

        Ok(SpeechService {
            config,
            events,
            registry,
            synthesizer,
            recognizer,
            listener,
            skipped_profiles,
        })
    }
}

fn synthesis_backends(
    config: &Config,
    output: &Arc<dyn AudioOutput>,
) -> Vec<Arc<dyn SynthesisBackend>> {
    let mut backends: Vec<Arc<dyn SynthesisBackend>> = Vec::new();

    match EspeakBackend::new(&config.tts.espeak_binary, Arc::clone(output)) {
        Ok(espeak) => backends.push(Arc::new(espeak)),
        Err(e) => tracing::warn!(error = %e, "baseline speech engine unavailable"),
    }

    if let Some(key) = &config.api_keys.openai {
        match TextToSpeech::new_openai(key.clone(), config.tts.openai_model.clone()) {
            Ok(tts) => backends.push(Arc::new(CloudSpeech::new(tts, Arc::clone(output)))),
            Err(e) => tracing::warn!(error = %e, "OpenAI TTS unavailable"),
        }
    }

    if let Some(key) = &config.api_keys.elevenlabs {
        match TextToSpeech::new_elevenlabs(key.clone(), config.tts.elevenlabs_model.clone()) {
            Ok(tts) => backends.push(Arc::new(CloudSpeech::new(tts, Arc::clone(output)))),
            Err(e) => tracing::warn!(error = %e, "ElevenLabs TTS unavailable"),
        }
    }

    backends
}

fn offline_transcriber(config: &Config) -> Option<Arc<dyn OfflineTranscriber>> {
    if !config.stt.offline_enabled {
        return None;
    }
    let Some(model) = &config.stt.whisper_model else {
        tracing::debug!("no whisper model configured, offline recognition disabled");
        return None;
    };

    match WhisperCliTranscriber::new(&config.stt.whisper_binary, model, config.stt.language.clone())
    {
        Ok(whisper) => Some(Arc::new(whisper)),
        Err(e) => {
            tracing::warn!(error = %e, "offline recognition unavailable");
            None
        }
    }
}

fn online_transcriber(config: &Config) -> Option<Arc<dyn OnlineTranscriber>> {
    let provider = config.stt.online_provider?;
    match SpeechToText::from_keys(provider, &config.api_keys, config.stt.online_model.clone()) {
        Ok(stt) => Some(Arc::new(stt)),
        Err(e) => {
            tracing::warn!(error = %e, "online recognition unavailable");
            None
        }
    }
}
