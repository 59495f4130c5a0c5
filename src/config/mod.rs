//! Configuration management for the Echo speech core

pub mod file;

use std::path::PathBuf;
use std::time::Duration;

use crate::voice::VoiceProfile;
use crate::{Error, Result};

use file::EchoConfigFile;

/// Speech core configuration
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// API keys for hosted engines
    pub api_keys: ApiKeys,

    /// Voice activity detection
    pub vad: VadConfig,

    /// Listening session timing
    pub listen: ListenConfig,

    /// Speech-to-text engines
    pub stt: SttConfig,

    /// Text-to-speech engines
    pub tts: TtsConfig,

    /// Profile selected at startup (falls back to "default")
    pub default_profile: Option<String>,

    /// Profiles registered in addition to the built-in set
    pub profiles: Vec<VoiceProfile>,
}

/// API keys for external services
#[derive(Debug, Clone, Default)]
pub struct ApiKeys {
    /// `OpenAI` API key (Whisper and TTS)
    pub openai: Option<String>,

    /// `ElevenLabs` API key (TTS)
    pub elevenlabs: Option<String>,

    /// `Deepgram` API key (STT)
    pub deepgram: Option<String>,

    /// `OpenRouter` API key (Whisper transcription)
    /// See: <https://openrouter.ai/keys>
    pub openrouter: Option<String>,
}

/// Voice activity detector choice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VadBackend {
    /// `earshot` WebRTC-style detector
    #[default]
    Earshot,
    /// RMS energy threshold
    Energy,
}

impl VadBackend {
    /// Parse a backend name
    ///
    /// # Errors
    ///
    /// Returns error for unknown names
    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "earshot" | "webrtc" => Ok(Self::Earshot),
            "energy" | "rms" => Ok(Self::Energy),
            other => Err(Error::Config(format!("unknown VAD backend: {other}"))),
        }
    }
}

/// Voice activity detection settings
#[derive(Debug, Clone)]
pub struct VadConfig {
    /// Detector implementation
    pub backend: VadBackend,

    /// Silent frames (30ms each) tolerated inside one utterance
    pub hangover_frames: u32,

    /// RMS threshold for the energy backend (0.0..1.0)
    pub energy_threshold: f32,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            backend: VadBackend::Earshot,
            hangover_frames: 10,
            energy_threshold: 0.03,
        }
    }
}

/// Listening session timing
#[derive(Debug, Clone)]
pub struct ListenConfig {
    /// Inactivity before a session times out
    pub session_timeout: Duration,

    /// Budget for recognising one utterance
    pub recognition_timeout: Duration,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            session_timeout: Duration::from_secs(15),
            recognition_timeout: Duration::from_secs(5),
        }
    }
}

/// Hosted transcription provider
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnlineSttProvider {
    /// `OpenAI` Whisper
    Whisper,
    /// Deepgram
    Deepgram,
    /// `OpenRouter` Whisper
    OpenRouter,
}

impl OnlineSttProvider {
    /// Default model id for the provider
    #[must_use]
    pub const fn default_model(self) -> &'static str {
        match self {
            Self::Whisper => "whisper-1",
            Self::Deepgram => "nova-2",
            Self::OpenRouter => "openai/whisper",
        }
    }

    /// Pick a provider by name, or the first one with a key for "auto"
    ///
    /// Returns `Ok(None)` for "none" or when "auto" finds no key.
    ///
    /// # Errors
    ///
    /// Returns error for unknown names
    pub fn resolve(name: &str, keys: &ApiKeys) -> Result<Option<Self>> {
        match name.trim().to_lowercase().as_str() {
            "auto" => Ok(if keys.openai.is_some() {
                Some(Self::Whisper)
            } else if keys.deepgram.is_some() {
                Some(Self::Deepgram)
            } else if keys.openrouter.is_some() {
                Some(Self::OpenRouter)
            } else {
                None
            }),
            "whisper" | "openai" => Ok(Some(Self::Whisper)),
            "deepgram" => Ok(Some(Self::Deepgram)),
            "openrouter" => Ok(Some(Self::OpenRouter)),
            "none" | "off" => Ok(None),
            other => Err(Error::Config(format!("unknown STT provider: {other}"))),
        }
    }
}

/// Speech-to-text settings
#[derive(Debug, Clone)]
pub struct SttConfig {
    /// Hosted fallback engine, if any
    pub online_provider: Option<OnlineSttProvider>,

    /// Model id for the hosted engine
    pub online_model: String,

    /// Run the local whisper CLI first
    pub offline_enabled: bool,

    /// Local whisper CLI binary
    pub whisper_binary: String,

    /// Model file for the whisper CLI
    pub whisper_model: Option<PathBuf>,

    /// Recognition language ("en", "auto", ...)
    pub language: String,
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            online_provider: None,
            online_model: OnlineSttProvider::Whisper.default_model().to_string(),
            offline_enabled: true,
            whisper_binary: "whisper-cli".to_string(),
            whisper_model: None,
            language: "en".to_string(),
        }
    }
}

/// Text-to-speech settings
#[derive(Debug, Clone)]
pub struct TtsConfig {
    /// espeak-ng binary for the baseline engine
    pub espeak_binary: String,

    /// `OpenAI` model used when a profile names none
    pub openai_model: String,

    /// `ElevenLabs` model used when a profile names none
    pub elevenlabs_model: String,

    /// Pending synthesis requests before `speak` waits for room
    pub queue_capacity: usize,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            espeak_binary: "espeak-ng".to_string(),
            openai_model: "tts-1".to_string(),
            elevenlabs_model: "eleven_monolingual_v1".to_string(),
            queue_capacity: 64,
        }
    }
}

impl Config {
    /// Load configuration (env > `~/.config/echo/config.toml` > defaults)
    ///
    /// # Errors
    ///
    /// Returns error if a value is present but invalid
    pub fn load() -> Result<Self> {
        Self::from_sources(file::load_config_file(), |key| std::env::var(key).ok())
    }

    /// Build configuration from a parsed file and an environment lookup
    ///
    /// # Errors
    ///
    /// Returns error if a value is present but invalid
    pub fn from_sources<F>(fc: EchoConfigFile, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        // API keys (env > toml > None)
        let api_keys = ApiKeys {
            openai: env("OPENAI_API_KEY").or(fc.api_keys.openai),
            elevenlabs: env("ELEVENLABS_API_KEY").or(fc.api_keys.elevenlabs),
            deepgram: env("DEEPGRAM_API_KEY").or(fc.api_keys.deepgram),
            openrouter: env("OPENROUTER_API_KEY").or(fc.api_keys.openrouter),
        };

        let vad = VadConfig {
            backend: fc
                .vad
                .backend
                .as_deref()
                .map(VadBackend::parse)
                .transpose()?
                .unwrap_or(defaults.vad.backend),
            hangover_frames: fc.vad.hangover_frames.unwrap_or(defaults.vad.hangover_frames),
            energy_threshold: fc
                .vad
                .energy_threshold
                .unwrap_or(defaults.vad.energy_threshold),
        };

        let listen = ListenConfig {
            session_timeout: env("ECHO_SESSION_TIMEOUT_SECS")
                .and_then(|s| s.parse().ok())
                .or(fc.voice.session_timeout_secs)
                .map_or(defaults.listen.session_timeout, Duration::from_secs),
            recognition_timeout: fc
                .voice
                .recognition_timeout_secs
                .map_or(defaults.listen.recognition_timeout, Duration::from_secs),
        };

        // STT (env > toml > default)
        let provider_name = env("ECHO_STT_PROVIDER")
            .or(fc.stt.online_provider)
            .unwrap_or_else(|| "auto".to_string());
        let online_provider = OnlineSttProvider::resolve(&provider_name, &api_keys)?;
        let online_model = fc.stt.online_model.unwrap_or_else(|| {
            online_provider
                .unwrap_or(OnlineSttProvider::Whisper)
                .default_model()
                .to_string()
        });
        let stt = SttConfig {
            online_provider,
            online_model,
            offline_enabled: fc.stt.offline_enabled.unwrap_or(defaults.stt.offline_enabled),
            whisper_binary: env("ECHO_WHISPER_BINARY")
                .or(fc.stt.whisper_binary)
                .unwrap_or(defaults.stt.whisper_binary),
            whisper_model: env("ECHO_WHISPER_MODEL")
                .or(fc.stt.whisper_model)
                .map(PathBuf::from),
            language: fc.stt.language.unwrap_or(defaults.stt.language),
        };

        let tts = TtsConfig {
            espeak_binary: fc.tts.espeak_binary.unwrap_or(defaults.tts.espeak_binary),
            openai_model: fc.tts.openai_model.unwrap_or(defaults.tts.openai_model),
            elevenlabs_model: fc
                .tts
                .elevenlabs_model
                .unwrap_or(defaults.tts.elevenlabs_model),
            queue_capacity: fc.tts.queue_capacity.unwrap_or(defaults.tts.queue_capacity),
        };

        let config = Self {
            api_keys,
            vad,
            listen,
            stt,
            tts,
            default_profile: env("ECHO_PROFILE").or(fc.voice.default_profile),
            profiles: fc.voice.profiles,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges
    ///
    /// # Errors
    ///
    /// Returns error describing the first invalid value
    pub fn validate(&self) -> Result<()> {
        if self.tts.queue_capacity == 0 {
            return Err(Error::Config(
                "tts.queue_capacity must be greater than 0".to_string(),
            ));
        }
        if self.listen.session_timeout.is_zero() {
            return Err(Error::Config(
                "voice.session_timeout_secs must be greater than 0".to_string(),
            ));
        }
        if self.listen.recognition_timeout.is_zero() {
            return Err(Error::Config(
                "voice.recognition_timeout_secs must be greater than 0".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&self.vad.energy_threshold) {
            return Err(Error::Config(format!(
                "vad.energy_threshold {} must be in [0.0, 1.0)",
                self.vad.energy_threshold
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_without_sources() {
        let config = Config::from_sources(EchoConfigFile::default(), env_from(&[])).unwrap();
        assert_eq!(config.listen.session_timeout, Duration::from_secs(15));
        assert_eq!(config.listen.recognition_timeout, Duration::from_secs(5));
        assert_eq!(config.vad.backend, VadBackend::Earshot);
        assert_eq!(config.stt.online_provider, None);
        assert_eq!(config.tts.queue_capacity, 64);
    }

    #[test]
    fn derived_default_is_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert!(config.default_profile.is_none());
        assert!(config.profiles.is_empty());
        assert_eq!(config.tts.queue_capacity, 64);
    }

    #[test]
    fn env_overrides_file() {
        let fc = file::parse_config(
            r#"
            [api_keys]
            openai = "from-file"

            [voice]
            session_timeout_secs = 30
            default_profile = "fast"
            "#,
        )
        .unwrap();

        let config = Config::from_sources(
            fc,
            env_from(&[
                ("OPENAI_API_KEY", "from-env"),
                ("ECHO_SESSION_TIMEOUT_SECS", "45"),
            ]),
        )
        .unwrap();

        assert_eq!(config.api_keys.openai.as_deref(), Some("from-env"));
        assert_eq!(config.listen.session_timeout, Duration::from_secs(45));
        assert_eq!(config.default_profile.as_deref(), Some("fast"));
        assert_eq!(config.stt.online_provider, Some(OnlineSttProvider::Whisper));
        assert_eq!(config.stt.online_model, "whisper-1");
    }

    #[test]
    fn auto_provider_follows_available_keys() {
        let config = Config::from_sources(
            EchoConfigFile::default(),
            env_from(&[("OPENROUTER_API_KEY", "or-key")]),
        )
        .unwrap();
        assert_eq!(config.stt.online_provider, Some(OnlineSttProvider::OpenRouter));
        assert_eq!(config.stt.online_model, "openai/whisper");
    }

    #[test]
    fn rejects_unknown_names_and_bad_values() {
        let fc = file::parse_config("[vad]\nbackend = \"magic\"").unwrap();
        assert!(Config::from_sources(fc, env_from(&[])).is_err());

        let fc = file::parse_config("[tts]\nqueue_capacity = 0").unwrap();
        assert!(Config::from_sources(fc, env_from(&[])).is_err());

        assert!(
            Config::from_sources(
                EchoConfigFile::default(),
                env_from(&[("ECHO_STT_PROVIDER", "carrier-pigeon")])
            )
            .is_err()
        );
    }
}
