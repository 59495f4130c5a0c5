//! Voice activity detection and speech segmentation
//!
//! A [`VoiceActivityDetector`] gives a binary speech/silence verdict for one
//! frame. The [`AudioFrameClassifier`] wraps that verdict in a small state
//! machine that groups consecutive speech frames into an [`AudioSegment`].

use crate::config::{VadBackend, VadConfig};
use crate::voice::segment::{AudioSegment, FRAME_SAMPLES, PcmFrame, SAMPLE_RATE};
use crate::{Error, Result};

/// Per-frame speech/silence verdict
pub trait VoiceActivityDetector: Send {
    /// Return true if the frame contains speech
    fn is_speech(&mut self, frame: &[i16], sample_rate: u32) -> bool;

    /// Clear any internal history
    fn reset(&mut self) {}

    /// Detector name for logging
    fn name(&self) -> &'static str;
}

/// RMS energy threshold detector
#[derive(Debug, Clone)]
pub struct EnergyDetector {
    threshold: f32,
}

impl EnergyDetector {
    /// Create a detector that reports speech above `threshold` RMS (0.0..1.0 scale)
    #[must_use]
    pub const fn new(threshold: f32) -> Self {
        Self { threshold }
    }
}

impl VoiceActivityDetector for EnergyDetector {
    fn is_speech(&mut self, frame: &[i16], _sample_rate: u32) -> bool {
        calculate_energy(frame) > self.threshold
    }

    fn name(&self) -> &'static str {
        "energy"
    }
}

/// WebRTC-style detector backed by `earshot`
pub struct EarshotDetector {
    detector: earshot::VoiceActivityDetector,
}

impl EarshotDetector {
    /// Create a detector with the quality-oriented profile
    #[must_use]
    pub fn new() -> Self {
        Self {
            detector: earshot::VoiceActivityDetector::new(
                earshot::VoiceActivityProfile::QUALITY,
            ),
        }
    }
}

impl Default for EarshotDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl VoiceActivityDetector for EarshotDetector {
    fn is_speech(&mut self, frame: &[i16], sample_rate: u32) -> bool {
        if sample_rate != SAMPLE_RATE {
            tracing::warn!(sample_rate, "earshot only supports 16kHz, treating frame as silence");
            return false;
        }

        match self.detector.predict_16khz(frame) {
            Ok(speech) => speech,
            Err(_) => {
                tracing::trace!(samples = frame.len(), "earshot rejected frame");
                false
            }
        }
    }

    fn reset(&mut self) {
        self.detector.reset();
    }

    fn name(&self) -> &'static str {
        "earshot"
    }
}

/// Keeps reporting speech for a few frames after the inner detector goes quiet
///
/// Bridges the short pauses between words so one utterance is not split into
/// several segments.
pub struct HangoverDetector<D> {
    inner: D,
    hangover_frames: u32,
    remaining: u32,
}

impl<D: VoiceActivityDetector> HangoverDetector<D> {
    /// Wrap `inner`, holding speech for `hangover_frames` silent frames
    pub const fn new(inner: D, hangover_frames: u32) -> Self {
        Self {
            inner,
            hangover_frames,
            remaining: 0,
        }
    }
}

impl<D: VoiceActivityDetector> VoiceActivityDetector for HangoverDetector<D> {
    fn is_speech(&mut self, frame: &[i16], sample_rate: u32) -> bool {
        if self.inner.is_speech(frame, sample_rate) {
            self.remaining = self.hangover_frames;
            true
        } else if self.remaining > 0 {
            self.remaining -= 1;
            true
        } else {
            false
        }
    }

    fn reset(&mut self) {
        self.remaining = 0;
        self.inner.reset();
    }

    fn name(&self) -> &'static str {
        self.inner.name()
    }
}

/// Build the detector chain described by the config
#[must_use]
pub fn build_detector(config: &VadConfig) -> Box<dyn VoiceActivityDetector> {
    match config.backend {
        VadBackend::Earshot => Box::new(HangoverDetector::new(
            EarshotDetector::new(),
            config.hangover_frames,
        )),
        VadBackend::Energy => Box::new(HangoverDetector::new(
            EnergyDetector::new(config.energy_threshold),
            config.hangover_frames,
        )),
    }
}

/// Classifier output for one frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpeechState {
    /// No speech, none in progress
    Silent,
    /// Speech began with this frame
    Started,
    /// Speech continues
    Continuing,
    /// Speech stopped; carries the completed segment
    Ended(AudioSegment),
}

impl SpeechState {
    /// Short label for logging
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Silent => "silent",
            Self::Started => "started",
            Self::Continuing => "continuing",
            Self::Ended(_) => "ended",
        }
    }
}

/// Groups speech frames into segments
///
/// | speaking | verdict | emits      | buffer          |
/// |----------|---------|------------|-----------------|
/// | no       | speech  | Started    | reset, append   |
/// | yes      | speech  | Continuing | append          |
/// | yes      | silence | Ended      | flush, clear    |
/// | no       | silence | Silent     | untouched       |
pub struct AudioFrameClassifier {
    detector: Box<dyn VoiceActivityDetector>,
    is_speaking: bool,
    buffer: Vec<PcmFrame>,
}

impl AudioFrameClassifier {
    /// Create a classifier around a detector
    #[must_use]
    pub fn new(detector: Box<dyn VoiceActivityDetector>) -> Self {
        Self {
            detector,
            is_speaking: false,
            buffer: Vec::new(),
        }
    }

    /// Classify one 30ms frame
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidFrame`] unless the frame has exactly
    /// [`FRAME_SAMPLES`] samples
    pub fn classify(&mut self, frame: &[i16]) -> Result<SpeechState> {
        if frame.len() != FRAME_SAMPLES {
            return Err(Error::InvalidFrame {
                expected: FRAME_SAMPLES,
                actual: frame.len(),
            });
        }

        let speech = self.detector.is_speech(frame, SAMPLE_RATE);

        let state = match (self.is_speaking, speech) {
            (false, true) => {
                self.is_speaking = true;
                self.buffer.clear();
                self.buffer.push(frame.to_vec());
                tracing::trace!(detector = self.detector.name(), "speech started");
                SpeechState::Started
            }
            (true, true) => {
                self.buffer.push(frame.to_vec());
                SpeechState::Continuing
            }
            (true, false) => {
                self.is_speaking = false;
                let segment = AudioSegment::from_frames(std::mem::take(&mut self.buffer));
                tracing::debug!(
                    frames = segment.frame_count(),
                    duration_ms = segment.duration().as_millis(),
                    "speech segment complete"
                );
                SpeechState::Ended(segment)
            }
            (false, false) => SpeechState::Silent,
        };

        Ok(state)
    }

    /// Close an open segment without waiting for silence
    pub fn flush(&mut self) -> Option<AudioSegment> {
        if !self.is_speaking {
            return None;
        }
        self.is_speaking = false;
        Some(AudioSegment::from_frames(std::mem::take(&mut self.buffer)))
    }

    /// Drop any open segment and clear detector history
    pub fn reset(&mut self) {
        self.is_speaking = false;
        self.buffer.clear();
        self.detector.reset();
    }

    /// Check if a segment is currently open
    #[must_use]
    pub const fn is_speaking(&self) -> bool {
        self.is_speaking
    }

    /// Frames buffered in the open segment
    #[must_use]
    pub fn buffered_frames(&self) -> usize {
        self.buffer.len()
    }
}

/// Calculate RMS energy of i16 samples on a 0.0..1.0 scale
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn calculate_energy(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f32 = samples
        .iter()
        .map(|&s| {
            let v = f32::from(s) / 32768.0;
            v * v
        })
        .sum();
    (sum_squares / samples.len() as f32).sqrt()
}
