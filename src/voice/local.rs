//! Engines that run on this machine: espeak-ng synthesis and a whisper CLI
//! for recognition

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use crate::voice::playback::{AudioOutput, decode_wav};
use crate::voice::profile::{Engine, VoiceProfile};
use crate::voice::recognition::OfflineTranscriber;
use crate::voice::segment::AudioSegment;
use crate::voice::synthesis::SynthesisBackend;
use crate::{Error, Result};

/// espeak-ng words per minute at speed 1.0
const ESPEAK_BASE_WPM: f32 = 175.0;

/// espeak-ng pitch (0-99) at pitch 1.0
const ESPEAK_BASE_PITCH: f32 = 50.0;

const ESPEAK_TIMEOUT: Duration = Duration::from_secs(10);

/// Baseline synthesis via the `espeak-ng` binary
pub struct EspeakBackend {
    binary: PathBuf,
    output: Arc<dyn AudioOutput>,
}

impl EspeakBackend {
    /// Locate `binary` on `PATH`
    ///
    /// # Errors
    ///
    /// Returns error if the binary cannot be found
    pub fn new(binary: &str, output: Arc<dyn AudioOutput>) -> Result<Self> {
        let binary = which::which(binary)
            .map_err(|e| Error::Config(format!("{binary} not found: {e}")))?;
        tracing::debug!(binary = %binary.display(), "espeak-ng available");
        Ok(Self { binary, output })
    }

    /// Render `text` to WAV bytes
    ///
    /// # Errors
    ///
    /// Returns error if espeak-ng fails or runs too long
    pub async fn render(&self, text: &str, profile: &VoiceProfile) -> Result<Vec<u8>> {
        let child = Command::new(&self.binary)
            .args(espeak_args(profile))
            .arg(espeak_text(text))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let output = tokio::time::timeout(ESPEAK_TIMEOUT, child.wait_with_output())
            .await
            .map_err(|_| {
                Error::provider(
                    Engine::Baseline.as_str(),
                    format!("timed out after {}s", ESPEAK_TIMEOUT.as_secs()),
                )
            })??;

        if !output.status.success() {
            return Err(Error::provider(
                Engine::Baseline.as_str(),
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }

        Ok(output.stdout)
    }
}

#[async_trait]
impl SynthesisBackend for EspeakBackend {
    fn engine(&self) -> Engine {
        Engine::Baseline
    }

    async fn speak(&self, text: &str, profile: &VoiceProfile) -> Result<()> {
        let wav = self.render(text, profile).await?;
        let audio = decode_wav(&wav)?;
        self.output.play(audio).await
    }
}

/// Command-line options for a profile
///
/// Volume is mapped onto espeak's amplitude (0-200, 100 is normal). A
/// profile's `voice` setting is only honored when the profile targets the
/// baseline engine; cloud profiles falling back here use their language.
fn espeak_args(profile: &VoiceProfile) -> Vec<String> {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let wpm = (ESPEAK_BASE_WPM * profile.speed).clamp(80.0, 450.0) as u32;
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let pitch = (ESPEAK_BASE_PITCH * profile.pitch).clamp(0.0, 99.0) as u32;
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let amplitude = (100.0 * profile.volume).clamp(0.0, 200.0) as u32;

    let voice = match (profile.engine, profile.setting("voice")) {
        (Engine::Baseline, Some(voice)) => voice.to_string(),
        _ => match profile.gender_hint.as_str() {
            "female" => format!("{}+f3", profile.language),
            "male" => format!("{}+m3", profile.language),
            _ => profile.language.clone(),
        },
    };

    vec![
        "--stdout".to_string(),
        "-s".to_string(),
        wpm.to_string(),
        "-p".to_string(),
        pitch.to_string(),
        "-a".to_string(),
        amplitude.to_string(),
        "-v".to_string(),
        voice,
    ]
}

/// Keep text from being parsed as an option
fn espeak_text(text: &str) -> String {
    if text.starts_with('-') {
        format!(" {text}")
    } else {
        text.to_string()
    }
}

/// Offline recognition via a whisper.cpp-compatible CLI
pub struct WhisperCliTranscriber {
    binary: PathBuf,
    model: PathBuf,
    language: String,
}

impl WhisperCliTranscriber {
    /// Locate `binary` on `PATH` and check the model file
    ///
    /// # Errors
    ///
    /// Returns error if the binary or the model file is missing
    pub fn new(binary: &str, model: &Path, language: impl Into<String>) -> Result<Self> {
        let binary = which::which(binary)
            .map_err(|e| Error::Config(format!("{binary} not found: {e}")))?;
        if !model.is_file() {
            return Err(Error::Config(format!(
                "whisper model not found: {}",
                model.display()
            )));
        }

        Ok(Self {
            binary,
            model: model.to_path_buf(),
            language: language.into(),
        })
    }
}

#[async_trait]
impl OfflineTranscriber for WhisperCliTranscriber {
    fn name(&self) -> &'static str {
        "whisper-cli"
    }

    async fn transcribe(&self, segment: &AudioSegment) -> Result<String> {
        let wav = segment.to_wav()?;
        let mut file = tempfile::Builder::new()
            .prefix("echo-utterance-")
            .suffix(".wav")
            .tempfile()?;
        file.write_all(&wav)?;
        file.flush()?;

        tracing::debug!(
            path = %file.path().display(),
            audio_ms = segment.duration().as_millis(),
            "running whisper CLI"
        );

        let output = Command::new(&self.binary)
            .arg("-m")
            .arg(&self.model)
            .arg("-f")
            .arg(file.path())
            .args(["-l", self.language.as_str(), "-nt", "-np"])
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await?;

        if !output.status.success() {
            return Err(Error::provider(
                "whisper-cli",
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }

        Ok(parse_whisper_output(&String::from_utf8_lossy(&output.stdout)))
    }
}

/// Join the transcript lines printed by whisper-cli
fn parse_whisper_output(stdout: &str) -> String {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !is_non_speech_marker(line))
        .collect::<Vec<_>>()
        .join(" ")
}

/// whisper prints `[BLANK_AUDIO]`, `(music)` and similar for non-speech
fn is_non_speech_marker(line: &str) -> bool {
    (line.starts_with('[') && line.ends_with(']')) || (line.starts_with('(') && line.ends_with(')'))
}
