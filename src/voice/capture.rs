//! Audio capture from microphone

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};
use tokio::sync::mpsc;

use crate::voice::listen::FrameSource;
use crate::voice::segment::{FRAME_SAMPLES, PcmFrame, SAMPLE_RATE, f32_to_i16};
use crate::{Error, Result};

/// Frames buffered between the capture thread and the listener (~3 s)
const FRAME_QUEUE: usize = 100;

/// Microphone frames for a listening session
///
/// The cpal stream lives on its own thread because cpal streams are not
/// `Send`. Frames are dropped, not queued without bound, when the consumer
/// falls behind. Dropping the source stops capture.
pub struct MicrophoneSource {
    rx: mpsc::Receiver<Result<PcmFrame>>,
    stop: Arc<AtomicBool>,
}

impl MicrophoneSource {
    /// Open the default input device and start capturing
    ///
    /// Blocks briefly while the device opens.
    ///
    /// # Errors
    ///
    /// Returns error if no input device supports 16 kHz capture
    pub fn open() -> Result<Self> {
        let (tx, rx) = mpsc::channel(FRAME_QUEUE);
        let (ready_tx, ready_rx) = std::sync::mpsc::channel();
        let stop = Arc::new(AtomicBool::new(false));

        let thread_stop = Arc::clone(&stop);
        std::thread::Builder::new()
            .name("echo-capture".to_string())
            .spawn(move || capture_thread(&tx, &thread_stop, &ready_tx))?;

        ready_rx
            .recv()
            .map_err(|_| Error::Audio("capture thread exited during setup".to_string()))??;

        Ok(Self { rx, stop })
    }
}

impl Drop for MicrophoneSource {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}

#[async_trait]
impl FrameSource for MicrophoneSource {
    async fn next_frame(&mut self) -> Result<Option<PcmFrame>> {
        self.rx.recv().await.transpose()
    }
}

/// Find a 16 kHz input config, preferring mono
fn input_config(device: &cpal::Device) -> Result<StreamConfig> {
    let rate = SampleRate(SAMPLE_RATE);
    let supported: Vec<_> = device
        .supported_input_configs()
        .map_err(|e| Error::Audio(e.to_string()))?
        .filter(|c| c.min_sample_rate() <= rate && c.max_sample_rate() >= rate)
        .collect();

    supported
        .iter()
        .find(|c| c.channels() == 1)
        .or_else(|| supported.first())
        .map(|c| c.clone().with_sample_rate(rate).config())
        .ok_or_else(|| Error::Audio("no 16 kHz input config found".to_string()))
}

fn capture_thread(
    tx: &mpsc::Sender<Result<PcmFrame>>,
    stop: &AtomicBool,
    ready: &std::sync::mpsc::Sender<Result<()>>,
) {
    let stream = match open_stream(tx.clone()) {
        Ok(stream) => stream,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };
    let _ = ready.send(Ok(()));
    tracing::debug!("audio capture started");

    while !stop.load(Ordering::Relaxed) && !tx.is_closed() {
        std::thread::sleep(Duration::from_millis(50));
    }

    drop(stream);
    tracing::debug!("audio capture stopped");
}

fn open_stream(tx: mpsc::Sender<Result<PcmFrame>>) -> Result<cpal::Stream> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| Error::Audio("no input device available".to_string()))?;
    let config = input_config(&device)?;
    let channels = usize::from(config.channels.max(1));

    tracing::debug!(
        device = device.name().unwrap_or_default(),
        sample_rate = SAMPLE_RATE,
        channels,
        "audio capture initialized"
    );

    let error_tx = tx.clone();
    let mut framer = Framer::default();
    let stream = device
        .build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                for frame in framer.push(data, channels) {
                    if let Err(mpsc::error::TrySendError::Full(_)) = tx.try_send(Ok(frame)) {
                        tracing::trace!("listener lagging, dropped audio frame");
                    }
                }
            },
            move |err| {
                tracing::error!(error = %err, "audio capture error");
                let _ = error_tx.try_send(Err(Error::Audio(err.to_string())));
            },
            None,
        )
        .map_err(|e| Error::Audio(e.to_string()))?;

    stream.play().map_err(|e| Error::Audio(e.to_string()))?;
    Ok(stream)
}

/// Downmixes interleaved f32 input and cuts it into fixed-size i16 frames
#[derive(Default)]
struct Framer {
    pending: Vec<i16>,
}

impl Framer {
    #[allow(clippy::cast_precision_loss)]
    fn push(&mut self, data: &[f32], channels: usize) -> Vec<PcmFrame> {
        self.pending.extend(
            data.chunks(channels)
                .map(|chunk| f32_to_i16(chunk.iter().sum::<f32>() / chunk.len() as f32)),
        );

        let mut frames = Vec::new();
        while self.pending.len() >= FRAME_SAMPLES {
            let rest = self.pending.split_off(FRAME_SAMPLES);
            frames.push(std::mem::replace(&mut self.pending, rest));
        }
        frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn framer_emits_full_frames_only() {
        let mut framer = Framer::default();
        assert!(framer.push(&[0.0; 300], 1).is_empty());

        let frames = framer.push(&[0.5; 700], 1);
        assert_eq!(frames.len(), 2);
        assert!(frames.iter().all(|f| f.len() == FRAME_SAMPLES));
        assert_eq!(frames[0][0], 0);
        assert!(frames[1][0] > 0);
        assert_eq!(framer.pending.len(), 40);
    }

    #[test]
    fn framer_downmixes_stereo() {
        let mut framer = Framer::default();
        let stereo: Vec<f32> = std::iter::repeat([0.5, -0.5])
            .take(FRAME_SAMPLES)
            .flatten()
            .collect();
        let frames = framer.push(&stereo, 2);
        assert_eq!(frames.len(), 1);
        assert!(frames[0].iter().all(|&s| s == 0));
    }
}
