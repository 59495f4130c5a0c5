//! Hosted text-to-speech (TTS) engines

use std::sync::Arc;

use async_trait::async_trait;

use crate::voice::playback::{AudioOutput, decode_mp3};
use crate::voice::profile::{Engine, VoiceProfile};
use crate::voice::synthesis::SynthesisBackend;
use crate::{Error, Result};

/// TTS provider backend
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum TtsProvider {
    OpenAI,
    ElevenLabs,
}

impl TtsProvider {
    const fn engine(self) -> Engine {
        match self {
            Self::OpenAI => Engine::CloudA,
            Self::ElevenLabs => Engine::CloudB,
        }
    }
}

/// Synthesizes speech from text via a hosted API
pub struct TextToSpeech {
    client: reqwest::Client,
    api_key: String,
    default_voice: String,
    default_model: String,
    provider: TtsProvider,
}

impl TextToSpeech {
    /// Create a new TTS instance using `OpenAI`
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new_openai(api_key: String, model: String) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config("OpenAI API key required for TTS".to_string()));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            default_voice: "alloy".to_string(),
            default_model: model,
            provider: TtsProvider::OpenAI,
        })
    }

    /// Create a new TTS instance using ElevenLabs
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new_elevenlabs(api_key: String, model: String) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config(
                "ElevenLabs API key required for TTS".to_string(),
            ));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            // "Rachel", the stock ElevenLabs voice
            default_voice: "21m00Tcm4TlvDq8ikWAM".to_string(),
            default_model: model,
            provider: TtsProvider::ElevenLabs,
        })
    }

    /// Engine this instance serves
    #[must_use]
    pub const fn engine(&self) -> Engine {
        self.provider.engine()
    }

    /// Synthesize text to speech with the profile's voice settings
    ///
    /// # Returns
    ///
    /// Audio bytes (MP3 format)
    ///
    /// # Errors
    ///
    /// Returns error if synthesis fails
    pub async fn synthesize(&self, text: &str, profile: &VoiceProfile) -> Result<Vec<u8>> {
        let voice = profile.setting("voice").unwrap_or(&self.default_voice);
        let model = profile.setting("model").unwrap_or(&self.default_model);

        match self.provider {
            TtsProvider::OpenAI => {
                self.synthesize_openai(text, voice, model, profile.speed)
                    .await
            }
            TtsProvider::ElevenLabs => self.synthesize_elevenlabs(text, voice, model).await,
        }
    }

    /// Synthesize using OpenAI TTS
    async fn synthesize_openai(
        &self,
        text: &str,
        voice: &str,
        model: &str,
        speed: f32,
    ) -> Result<Vec<u8>> {
        #[derive(serde::Serialize)]
        struct TtsRequest<'a> {
            model: &'a str,
            input: &'a str,
            voice: &'a str,
            speed: f32,
            response_format: &'a str,
        }

        let request = TtsRequest {
            model,
            input: text,
            voice,
            speed: speed.clamp(0.25, 4.0),
            response_format: "mp3",
        };

        let response = self
            .client
            .post("https://api.openai.com/v1/audio/speech")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::provider(self.engine().as_str(), e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::provider(
                self.engine().as_str(),
                format!("OpenAI TTS error {status}: {body}"),
            ));
        }

        let audio = response.bytes().await?;
        Ok(audio.to_vec())
    }

    /// Synthesize using ElevenLabs TTS
    async fn synthesize_elevenlabs(&self, text: &str, voice: &str, model: &str) -> Result<Vec<u8>> {
        #[derive(serde::Serialize)]
        struct ElevenLabsRequest<'a> {
            text: &'a str,
            model_id: &'a str,
        }

        let url = format!("https://api.elevenlabs.io/v1/text-to-speech/{voice}");

        let request = ElevenLabsRequest {
            text,
            model_id: model,
        };

        let response = self
            .client
            .post(&url)
            .header("xi-api-key", &self.api_key)
            .header("Content-Type", "application/json")
            .header("Accept", "audio/mpeg")
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::provider(self.engine().as_str(), e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::provider(
                self.engine().as_str(),
                format!("ElevenLabs TTS error {status}: {body}"),
            ));
        }

        let audio = response.bytes().await?;
        Ok(audio.to_vec())
    }
}

/// Cloud TTS wired to an audio output
pub struct CloudSpeech {
    tts: TextToSpeech,
    output: Arc<dyn AudioOutput>,
}

impl CloudSpeech {
    /// Pair a TTS client with the device it plays on
    #[must_use]
    pub fn new(tts: TextToSpeech, output: Arc<dyn AudioOutput>) -> Self {
        Self { tts, output }
    }
}

#[async_trait]
impl SynthesisBackend for CloudSpeech {
    fn engine(&self) -> Engine {
        self.tts.engine()
    }

    async fn speak(&self, text: &str, profile: &VoiceProfile) -> Result<()> {
        let mp3 = self.tts.synthesize(text, profile).await?;
        tracing::debug!(engine = %self.engine(), bytes = mp3.len(), "received synthesized audio");

        let audio = decode_mp3(&mp3)
            .map_err(|e| Error::provider(self.engine().as_str(), e.to_string()))?
            .with_volume(profile.volume);
        self.output.play(audio).await
    }
}
