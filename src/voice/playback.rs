//! Audio playback to speakers

use std::borrow::Cow;
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};

use crate::{Error, Result};

/// Mono f32 PCM ready for an output device
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    /// Samples in [-1.0, 1.0]
    pub samples: Vec<f32>,
    /// Sample rate in Hz
    pub sample_rate: u32,
}

impl DecodedAudio {
    /// Playback length
    #[must_use]
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(self.samples.len() as u64 * 1000 / u64::from(self.sample_rate))
    }

    /// Scale amplitude by `volume` (clamped to [0, 1])
    #[must_use]
    pub fn with_volume(mut self, volume: f32) -> Self {
        let volume = volume.clamp(0.0, 1.0);
        if (volume - 1.0).abs() > f32::EPSILON {
            for sample in &mut self.samples {
                *sample *= volume;
            }
        }
        self
    }
}

/// Destination for synthesized speech
#[async_trait]
pub trait AudioOutput: Send + Sync {
    /// Play audio to completion
    async fn play(&self, audio: DecodedAudio) -> Result<()>;
}

/// Plays audio on the default output device
///
/// The cpal stream is built per utterance on a blocking thread, since cpal
/// streams are not `Send`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SpeakerOutput;

impl SpeakerOutput {
    /// Create a speaker output, checking that an output device exists
    ///
    /// # Errors
    ///
    /// Returns error if no output device is available
    pub fn new() -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Audio("no output device available".to_string()))?;

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            "audio playback initialized"
        );
        Ok(Self)
    }
}

#[async_trait]
impl AudioOutput for SpeakerOutput {
    async fn play(&self, audio: DecodedAudio) -> Result<()> {
        tokio::task::spawn_blocking(move || play_samples_blocking(&audio))
            .await
            .map_err(|e| Error::Audio(format!("playback task failed: {e}")))?
    }
}

/// Find an output config at `sample_rate`, preferring mono
fn output_config(device: &cpal::Device, sample_rate: u32) -> Result<StreamConfig> {
    let rate = SampleRate(sample_rate);
    let pick = |channels: u16| {
        device.supported_output_configs().ok()?.find(|c| {
            c.channels() == channels && c.min_sample_rate() <= rate && c.max_sample_rate() >= rate
        })
    };

    pick(1)
        .or_else(|| pick(2))
        .map(|c| c.with_sample_rate(rate).config())
        .ok_or_else(|| Error::Audio(format!("no output config for {sample_rate} Hz")))
}

/// Play samples in a blocking manner
fn play_samples_blocking(audio: &DecodedAudio) -> Result<()> {
    if audio.samples.is_empty() {
        return Ok(());
    }

    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| Error::Audio("no output device".to_string()))?;

    let config = output_config(&device, audio.sample_rate)?;
    let channels = config.channels as usize;

    let samples = Arc::new(audio.samples.clone());
    let position = Arc::new(AtomicUsize::new(0));
    let finished = Arc::new(AtomicBool::new(false));
    let stream_error = Arc::new(Mutex::new(None::<String>));

    let stream = {
        let samples = Arc::clone(&samples);
        let position = Arc::clone(&position);
        let finished = Arc::clone(&finished);
        let stream_error = Arc::clone(&stream_error);

        device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    for frame in data.chunks_mut(channels) {
                        let pos = position.load(Ordering::Relaxed);
                        let sample = samples.get(pos).copied().unwrap_or_else(|| {
                            finished.store(true, Ordering::Relaxed);
                            0.0
                        });
                        frame.fill(sample);
                        if pos < samples.len() {
                            position.store(pos + 1, Ordering::Relaxed);
                        }
                    }
                },
                move |err| {
                    tracing::error!(error = %err, "audio playback error");
                    if let Ok(mut slot) = stream_error.lock() {
                        *slot = Some(err.to_string());
                    }
                },
                None,
            )
            .map_err(|e| Error::Audio(e.to_string()))?
    };

    stream.play().map_err(|e| Error::Audio(e.to_string()))?;

    // Poll for completion with timeout
    let start = Instant::now();
    let timeout = audio.duration() + Duration::from_millis(500);
    while !finished.load(Ordering::Relaxed) {
        if start.elapsed() > timeout {
            break;
        }
        std::thread::sleep(Duration::from_millis(50));
    }

    // Let the device drain its last buffer
    std::thread::sleep(Duration::from_millis(100));
    drop(stream);

    if let Some(err) = stream_error.lock().ok().and_then(|mut slot| slot.take()) {
        return Err(Error::Audio(err));
    }

    tracing::debug!(samples = samples.len(), "playback complete");
    Ok(())
}

/// Decode MP3 bytes to mono f32 samples
///
/// # Errors
///
/// Returns error if the data is not valid MP3
pub fn decode_mp3(mp3_data: &[u8]) -> Result<DecodedAudio> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(mp3_data));
    let mut samples = Vec::new();
    let mut sample_rate = 0;

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                sample_rate = u32::try_from(frame.sample_rate).unwrap_or(sample_rate);
                if frame.channels == 2 {
                    // Stereo: average channels
                    samples.extend(frame.data.chunks(2).map(|chunk| {
                        let left = f32::from(chunk[0]) / 32768.0;
                        let right = f32::from(chunk.get(1).copied().unwrap_or(chunk[0])) / 32768.0;
                        f32::midpoint(left, right)
                    }));
                } else {
                    samples.extend(frame.data.iter().map(|&s| f32::from(s) / 32768.0));
                }
            }
            Err(minimp3::Error::Eof) => break,
            Err(e) => return Err(Error::Audio(format!("MP3 decode error: {e}"))),
        }
    }

    if samples.is_empty() {
        return Err(Error::Audio("MP3 contained no audio frames".to_string()));
    }

    Ok(DecodedAudio {
        samples,
        sample_rate,
    })
}

/// Decode WAV bytes to mono f32 samples
///
/// # Errors
///
/// Returns error if the data is not a readable WAV
pub fn decode_wav(wav_data: &[u8]) -> Result<DecodedAudio> {
    let wav_data = fix_streamed_lengths(wav_data);
    let reader = hound::WavReader::new(Cursor::new(&*wav_data))
        .map_err(|e| Error::Audio(e.to_string()))?;
    let spec = reader.spec();
    let channels = usize::from(spec.channels.max(1));

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| Error::Audio(e.to_string()))?,
        hound::SampleFormat::Int => {
            #[allow(clippy::cast_precision_loss)]
            let scale = (1_i64 << spec.bits_per_sample.saturating_sub(1)) as f32;
            #[allow(clippy::cast_precision_loss)]
            let samples = reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| Error::Audio(e.to_string()))?;
            samples
        }
    };

    // Convert to mono if stereo
    #[allow(clippy::cast_precision_loss)]
    let samples = if channels > 1 {
        interleaved
            .chunks(channels)
            .map(|chunk| chunk.iter().sum::<f32>() / chunk.len() as f32)
            .collect()
    } else {
        interleaved
    };

    Ok(DecodedAudio {
        samples,
        sample_rate: spec.sample_rate,
    })
}

/// Clamp RIFF and `data` chunk sizes to the bytes actually present
///
/// A WAV written to a pipe (`espeak-ng --stdout`) cannot seek back to fill in
/// its lengths, so both are left at a placeholder far past the end of the
/// buffer. The `data` size is rounded down to whole sample frames.
fn fix_streamed_lengths(wav_data: &[u8]) -> Cow<'_, [u8]> {
    if wav_data.len() < 12 || &wav_data[0..4] != b"RIFF" || &wav_data[8..12] != b"WAVE" {
        return Cow::Borrowed(wav_data);
    }
    let Ok(total) = u32::try_from(wav_data.len()) else {
        return Cow::Borrowed(wav_data);
    };

    let mut fixed = wav_data.to_vec();
    let mut changed = false;

    let riff_len = total - 8;
    if read_u32(&fixed, 4) > riff_len {
        fixed[4..8].copy_from_slice(&riff_len.to_le_bytes());
        changed = true;
    }

    let mut block_align = 1;
    let mut offset = 12;
    while offset + 8 <= fixed.len() {
        let size = read_u32(&fixed, offset + 4);
        let body = offset + 8;
        let available = u32::try_from(fixed.len() - body).unwrap_or(u32::MAX);

        match &fixed[offset..offset + 4] {
            b"fmt " if body + 14 <= fixed.len() => {
                block_align = u32::from(u16::from_le_bytes([fixed[body + 12], fixed[body + 13]]))
                    .max(1);
            }
            b"data" => {
                if size > available {
                    let size = available - available % block_align;
                    fixed[offset + 4..body].copy_from_slice(&size.to_le_bytes());
                    changed = true;
                }
                break;
            }
            _ => {}
        }

        let Ok(size) = usize::try_from(size) else {
            break;
        };
        offset = body.saturating_add(size).saturating_add(size & 1);
    }

    if changed {
        Cow::Owned(fixed)
    } else {
        Cow::Borrowed(wav_data)
    }
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wav_decodes_to_mono() {
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 22050,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            for _ in 0..100 {
                writer.write_sample(16384_i16).unwrap();
                writer.write_sample(0_i16).unwrap();
            }
            writer.finalize().unwrap();
        }

        let audio = decode_wav(&cursor.into_inner()).unwrap();
        assert_eq!(audio.sample_rate, 22050);
        assert_eq!(audio.samples.len(), 100);
        assert!((audio.samples[0] - 0.25).abs() < 0.01);
    }

    /// 16-bit mono WAV as espeak-ng writes it to a pipe
    fn streamed_wav(samples: &[i16], sample_rate: u32) -> Vec<u8> {
        const PLACEHOLDER: u32 = 0x7fff_f000;
        let mut wav = Vec::with_capacity(44 + samples.len() * 2);
        wav.extend_from_slice(b"RIFF");
        wav.extend_from_slice(&PLACEHOLDER.to_le_bytes());
        wav.extend_from_slice(b"WAVEfmt ");
        wav.extend_from_slice(&16_u32.to_le_bytes());
        wav.extend_from_slice(&1_u16.to_le_bytes());
        wav.extend_from_slice(&1_u16.to_le_bytes());
        wav.extend_from_slice(&sample_rate.to_le_bytes());
        wav.extend_from_slice(&(sample_rate * 2).to_le_bytes());
        wav.extend_from_slice(&2_u16.to_le_bytes());
        wav.extend_from_slice(&16_u16.to_le_bytes());
        wav.extend_from_slice(b"data");
        wav.extend_from_slice(&PLACEHOLDER.to_le_bytes());
        for sample in samples {
            wav.extend_from_slice(&sample.to_le_bytes());
        }
        wav
    }

    #[test]
    fn streamed_wav_with_placeholder_lengths_decodes() {
        let samples = vec![8192_i16; 22050];
        let audio = decode_wav(&streamed_wav(&samples, 22050)).unwrap();

        assert_eq!(audio.sample_rate, 22050);
        assert_eq!(audio.samples.len(), 22050);
        assert!((audio.samples[0] - 0.25).abs() < 0.01);
        assert_eq!(audio.duration(), Duration::from_secs(1));
    }

    #[test]
    fn streamed_wav_drops_trailing_partial_sample() {
        let mut wav = streamed_wav(&[1000, 2000, 3000], 16000);
        wav.push(0x7f);
        let audio = decode_wav(&wav).unwrap();
        assert_eq!(audio.samples.len(), 3);
    }

    #[test]
    fn finalized_wav_is_left_alone() {
        let wav = crate::voice::segment::samples_to_wav(&[0; 480], 16000).unwrap();
        assert!(matches!(fix_streamed_lengths(&wav), Cow::Borrowed(_)));
    }

    #[test]
    fn garbage_is_not_wav() {
        assert!(decode_wav(b"not a wav file").is_err());
    }

    #[test]
    fn garbage_is_not_mp3() {
        assert!(decode_mp3(&[0u8; 64]).is_err());
    }

    #[test]
    fn volume_scales_samples() {
        let audio = DecodedAudio {
            samples: vec![0.5, -0.5],
            sample_rate: 16000,
        }
        .with_volume(0.5);
        assert_eq!(audio.samples, vec![0.25, -0.25]);
    }
}
