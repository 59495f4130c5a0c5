//! PCM frames and speech segments

use std::time::Duration;

use crate::{Error, Result};

/// Sample rate for all captured speech (16kHz mono)
pub const SAMPLE_RATE: u32 = 16000;

/// Duration of one classifier frame in milliseconds
pub const FRAME_MILLIS: u64 = 30;

/// Samples in one 30ms frame at 16kHz
pub const FRAME_SAMPLES: usize = 480;

/// One fixed-size frame of 16-bit mono PCM
pub type PcmFrame = Vec<i16>;

/// Contiguous speech captured between a `Started` and an `Ended` verdict
///
/// Frames are kept in capture order. The recognition dispatcher consumes a
/// segment by value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AudioSegment {
    frames: Vec<PcmFrame>,
}

impl AudioSegment {
    /// Build a segment from already-validated frames
    #[must_use]
    pub const fn from_frames(frames: Vec<PcmFrame>) -> Self {
        Self { frames }
    }

    /// Frames in capture order
    #[must_use]
    pub fn frames(&self) -> &[PcmFrame] {
        &self.frames
    }

    /// Number of frames
    #[must_use]
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Total number of samples
    #[must_use]
    pub fn sample_count(&self) -> usize {
        self.frames.iter().map(Vec::len).sum()
    }

    /// Check if the segment holds no audio
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sample_count() == 0
    }

    /// Audio duration at [`SAMPLE_RATE`]
    #[must_use]
    pub fn duration(&self) -> Duration {
        let millis = self.sample_count() as u64 * 1000 / u64::from(SAMPLE_RATE);
        Duration::from_millis(millis)
    }

    /// All samples flattened into one buffer
    #[must_use]
    pub fn samples(&self) -> Vec<i16> {
        self.frames.concat()
    }

    /// Samples scaled to f32 in [-1.0, 1.0)
    #[must_use]
    pub fn samples_f32(&self) -> Vec<f32> {
        self.frames
            .iter()
            .flatten()
            .map(|&s| f32::from(s) / 32768.0)
            .collect()
    }

    /// Encode as a 16-bit mono WAV at [`SAMPLE_RATE`]
    ///
    /// # Errors
    ///
    /// Returns error if WAV encoding fails
    pub fn to_wav(&self) -> Result<Vec<u8>> {
        samples_to_wav(&self.samples(), SAMPLE_RATE)
    }
}

/// Encode i16 samples as mono WAV bytes for STT engines
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[i16], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| Error::Audio(e.to_string()))?;

        for &sample in samples {
            writer
                .write_sample(sample)
                .map_err(|e| Error::Audio(e.to_string()))?;
        }

        writer.finalize().map_err(|e| Error::Audio(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}

/// Convert an f32 sample in [-1.0, 1.0] to i16
#[allow(clippy::cast_possible_truncation)]
#[must_use]
pub fn f32_to_i16(sample: f32) -> i16 {
    (sample * 32767.0).clamp(-32768.0, 32767.0) as i16
}
