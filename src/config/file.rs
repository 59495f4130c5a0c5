//! TOML configuration file loading
//!
//! Supports `~/.config/echo/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::Result;
use crate::voice::VoiceProfile;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct EchoConfigFile {
    /// API keys for hosted speech engines
    #[serde(default)]
    pub api_keys: ApiKeysFileConfig,

    /// Voice profiles and session behaviour
    #[serde(default)]
    pub voice: VoiceFileConfig,

    /// Voice activity detection
    #[serde(default)]
    pub vad: VadFileConfig,

    /// Speech-to-text engines
    #[serde(default)]
    pub stt: SttFileConfig,

    /// Text-to-speech engines
    #[serde(default)]
    pub tts: TtsFileConfig,
}

/// API keys configuration
#[derive(Debug, Default, Deserialize)]
pub struct ApiKeysFileConfig {
    pub openai: Option<String>,
    pub elevenlabs: Option<String>,
    pub deepgram: Option<String>,
    pub openrouter: Option<String>,
}

/// Voice profiles and listening sessions
#[derive(Debug, Default, Deserialize)]
pub struct VoiceFileConfig {
    /// Profile selected at startup
    pub default_profile: Option<String>,

    /// Seconds without an utterance before a listening session ends
    pub session_timeout_secs: Option<u64>,

    /// Seconds allowed for recognising one utterance
    pub recognition_timeout_secs: Option<u64>,

    /// Extra profiles registered after the built-in ones
    #[serde(default)]
    pub profiles: Vec<VoiceProfile>,
}

/// Voice activity detection
#[derive(Debug, Default, Deserialize)]
pub struct VadFileConfig {
    /// "earshot" or "energy"
    pub backend: Option<String>,

    /// Silent frames tolerated inside one utterance
    pub hangover_frames: Option<u32>,

    /// RMS threshold for the energy backend
    pub energy_threshold: Option<f32>,
}

/// Speech-to-text engines
#[derive(Debug, Default, Deserialize)]
pub struct SttFileConfig {
    /// "auto", "whisper", "deepgram", "openrouter" or "none"
    pub online_provider: Option<String>,

    /// Model id for the online provider
    pub online_model: Option<String>,

    /// Enable the local whisper CLI
    pub offline_enabled: Option<bool>,

    /// Local whisper CLI binary
    pub whisper_binary: Option<String>,

    /// Model file passed to the whisper CLI
    pub whisper_model: Option<String>,

    /// Recognition language ("en", "auto", ...)
    pub language: Option<String>,
}

/// Text-to-speech engines
#[derive(Debug, Default, Deserialize)]
pub struct TtsFileConfig {
    /// espeak-ng binary
    pub espeak_binary: Option<String>,

    /// Default `OpenAI` TTS model
    pub openai_model: Option<String>,

    /// Default `ElevenLabs` model
    pub elevenlabs_model: Option<String>,

    /// Pending synthesis requests before `speak` waits
    pub queue_capacity: Option<usize>,
}

/// Parse config file contents
///
/// # Errors
///
/// Returns error if the TOML is malformed
pub fn parse_config(content: &str) -> Result<EchoConfigFile> {
    Ok(toml::from_str(content)?)
}

/// Load the TOML config file from the standard path
///
/// Returns `EchoConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> EchoConfigFile {
    config_file_path().map_or_else(EchoConfigFile::default, |path| load_config_from(&path))
}

/// Load a TOML config file from an explicit path
///
/// Returns `EchoConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_from(path: &Path) -> EchoConfigFile {
    if !path.exists() {
        return EchoConfigFile::default();
    }

    match std::fs::read_to_string(path) {
        Ok(content) => match parse_config(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                EchoConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            EchoConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/echo/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("echo").join("config.toml"))
}
