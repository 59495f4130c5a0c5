//! Hosted speech-to-text (STT) engines

use async_trait::async_trait;

use crate::config::{ApiKeys, OnlineSttProvider};
use crate::voice::recognition::OnlineTranscriber;
use crate::{Error, Result};

/// Response from Whisper-style transcription APIs (`OpenAI`, `OpenRouter`)
#[derive(serde::Deserialize)]
struct WhisperResponse {
    #[serde(default)]
    text: String,
}

/// Response from Deepgram transcription API
#[derive(serde::Deserialize)]
struct DeepgramResponse {
    results: DeepgramResults,
}

#[derive(serde::Deserialize)]
struct DeepgramResults {
    channels: Vec<DeepgramChannel>,
}

#[derive(serde::Deserialize)]
struct DeepgramChannel {
    alternatives: Vec<DeepgramAlternative>,
}

#[derive(serde::Deserialize)]
struct DeepgramAlternative {
    transcript: String,
}

const OPENAI_TRANSCRIPTIONS_URL: &str = "https://api.openai.com/v1/audio/transcriptions";
const OPENROUTER_TRANSCRIPTIONS_URL: &str = "https://openrouter.ai/api/v1/audio/transcriptions";

/// Transcribes speech to text via a hosted API
pub struct SpeechToText {
    client: reqwest::Client,
    api_key: String,
    model: String,
    provider: OnlineSttProvider,
}

impl SpeechToText {
    /// Create an STT client for `provider`
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new(provider: OnlineSttProvider, api_key: String, model: String) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config(format!(
                "{} API key required for transcription",
                provider_name(provider)
            )));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            model,
            provider,
        })
    }

    /// Create an STT client using the key configured for `provider`
    ///
    /// # Errors
    ///
    /// Returns error if that provider's key is not configured
    pub fn from_keys(provider: OnlineSttProvider, keys: &ApiKeys, model: String) -> Result<Self> {
        let key = match provider {
            OnlineSttProvider::Whisper => keys.openai.clone(),
            OnlineSttProvider::Deepgram => keys.deepgram.clone(),
            OnlineSttProvider::OpenRouter => keys.openrouter.clone(),
        };
        Self::new(provider, key.unwrap_or_default(), model)
    }

    /// Transcribe audio to text
    ///
    /// # Arguments
    ///
    /// * `audio` - WAV audio bytes
    ///
    /// # Errors
    ///
    /// Returns error if transcription fails
    pub async fn transcribe(&self, audio: &[u8]) -> Result<String> {
        match self.provider {
            OnlineSttProvider::Whisper => {
                self.transcribe_whisper(OPENAI_TRANSCRIPTIONS_URL, audio)
                    .await
            }
            OnlineSttProvider::OpenRouter => {
                self.transcribe_whisper(OPENROUTER_TRANSCRIPTIONS_URL, audio)
                    .await
            }
            OnlineSttProvider::Deepgram => self.transcribe_deepgram(audio).await,
        }
    }

    fn error(&self, message: impl Into<String>) -> Error {
        Error::provider(provider_name(self.provider), message)
    }

    /// Transcribe using a Whisper-compatible multipart endpoint
    async fn transcribe_whisper(&self, url: &str, audio: &[u8]) -> Result<String> {
        tracing::debug!(
            provider = provider_name(self.provider),
            audio_bytes = audio.len(),
            "starting Whisper transcription"
        );

        let form = reqwest::multipart::Form::new()
            .part(
                "file",
                reqwest::multipart::Part::bytes(audio.to_vec())
                    .file_name("audio.wav")
                    .mime_str("audio/wav")
                    .map_err(|e| self.error(e.to_string()))?,
            )
            .text("model", self.model.clone());

        let response = self
            .client
            .post(url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .multipart(form)
            .send()
            .await
            .map_err(|e| self.error(e.to_string()))?;

        let status = response.status();
        tracing::debug!(status = %status, "received response");

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(self.error(format!("API error {status}: {body}")));
        }

        let result: WhisperResponse = response
            .json()
            .await
            .map_err(|e| self.error(format!("failed to parse response: {e}")))?;

        tracing::debug!(chars = result.text.len(), "transcription complete");
        Ok(result.text)
    }

    /// Transcribe using Deepgram
    async fn transcribe_deepgram(&self, audio: &[u8]) -> Result<String> {
        tracing::debug!(audio_bytes = audio.len(), "starting Deepgram transcription");

        let url = format!(
            "https://api.deepgram.com/v1/listen?model={}&punctuate=true",
            self.model
        );

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Token {}", self.api_key))
            .header("Content-Type", "audio/wav")
            .body(audio.to_vec())
            .send()
            .await
            .map_err(|e| self.error(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(self.error(format!("API error {status}: {body}")));
        }

        let result: DeepgramResponse = response
            .json()
            .await
            .map_err(|e| self.error(format!("failed to parse response: {e}")))?;

        let transcript = result
            .results
            .channels
            .first()
            .and_then(|c| c.alternatives.first())
            .map(|a| a.transcript.clone())
            .unwrap_or_default();

        tracing::debug!(chars = transcript.len(), "transcription complete");
        Ok(transcript)
    }
}

const fn provider_name(provider: OnlineSttProvider) -> &'static str {
    match provider {
        OnlineSttProvider::Whisper => "openai-whisper",
        OnlineSttProvider::Deepgram => "deepgram",
        OnlineSttProvider::OpenRouter => "openrouter-whisper",
    }
}

#[async_trait]
impl OnlineTranscriber for SpeechToText {
    fn name(&self) -> &'static str {
        provider_name(self.provider)
    }

    async fn transcribe(&self, wav: &[u8]) -> Result<String> {
        Self::transcribe(self, wav).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_keys_requires_matching_key() {
        let keys = ApiKeys {
            openrouter: Some("or-key".to_string()),
            ..ApiKeys::default()
        };

        let stt = SpeechToText::from_keys(
            OnlineSttProvider::OpenRouter,
            &keys,
            "openai/whisper".to_string(),
        )
        .unwrap();
        assert_eq!(OnlineTranscriber::name(&stt), "openrouter-whisper");

        assert!(
            SpeechToText::from_keys(OnlineSttProvider::Deepgram, &keys, "nova-2".to_string())
                .is_err()
        );
    }

    #[test]
    fn whisper_response_tolerates_missing_text() {
        let parsed: WhisperResponse = serde_json::from_str("{}").unwrap();
        assert!(parsed.text.is_empty());
    }
}
