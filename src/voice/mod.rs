//! Voice processing module
//!
//! Frame classification, voice profiles, synthesis and recognition
//! dispatch, continuous listening, and the engine and device adapters
//! behind them.

pub mod capture;
pub mod listen;
pub mod local;
pub mod playback;
pub mod profile;
pub mod recognition;
pub mod segment;
pub mod stt;
pub mod synthesis;
pub mod tts;
pub mod vad;

pub use capture::MicrophoneSource;
pub use listen::{ContinuousListener, DetectorFactory, FrameSource};
pub use local::{EspeakBackend, WhisperCliTranscriber};
pub use playback::{AudioOutput, DecodedAudio, SpeakerOutput, decode_mp3, decode_wav};
pub use profile::{DEFAULT_PROFILE, Engine, VoiceProfile, VoiceRegistry, builtin_profiles};
pub use recognition::{OfflineTranscriber, OnlineTranscriber, RecognitionResult, SpeechRecognizer};
pub use segment::{AudioSegment, FRAME_MILLIS, FRAME_SAMPLES, PcmFrame, SAMPLE_RATE, samples_to_wav};
pub use stt::SpeechToText;
pub use synthesis::{SpeechSynthesizer, SynthesisBackend, SynthesisHandle, SynthesisOutcome};
pub use tts::{CloudSpeech, TextToSpeech};
pub use vad::{
    AudioFrameClassifier, EarshotDetector, EnergyDetector, HangoverDetector, SpeechState,
    VoiceActivityDetector, build_detector, calculate_energy,
};
