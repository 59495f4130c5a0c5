//! Shared test utilities
#![allow(dead_code)]

use std::collections::VecDeque;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Notify, broadcast};

use echo_voice::voice::{
    AudioSegment, DetectorFactory, EnergyDetector, Engine, FRAME_SAMPLES, FrameSource,
    OfflineTranscriber, OnlineTranscriber, PcmFrame, SAMPLE_RATE, SynthesisBackend,
    VoiceActivityDetector, VoiceProfile,
};
use echo_voice::{AssistantEvent, Error, Result};

/// One 30 ms frame of a 440 Hz tone, loud enough for the energy detector
pub fn speech_frame() -> PcmFrame {
    (0..FRAME_SAMPLES)
        .map(|i| {
            let t = i as f32 / SAMPLE_RATE as f32;
            (0.3 * (2.0 * std::f32::consts::PI * 440.0 * t).sin() * 32767.0) as i16
        })
        .collect()
}

/// One 30 ms frame of silence
pub fn silent_frame() -> PcmFrame {
    vec![0; FRAME_SAMPLES]
}

/// Frames for `speech` speech frames followed by `silence` silent ones
pub fn utterance(speech: usize, silence: usize) -> Vec<PcmFrame> {
    std::iter::repeat_with(speech_frame)
        .take(speech)
        .chain(std::iter::repeat_with(silent_frame).take(silence))
        .collect()
}

/// Energy detector without hangover, so frames map one-to-one to verdicts
pub fn energy_detectors() -> DetectorFactory {
    Arc::new(|| Box::new(EnergyDetector::new(0.03)) as Box<dyn VoiceActivityDetector>)
}

/// Drain every event already published
pub fn drain(rx: &mut broadcast::Receiver<AssistantEvent>) -> Vec<AssistantEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Wait for the next event, panicking after a (virtual) minute
pub async fn next_event(rx: &mut broadcast::Receiver<AssistantEvent>) -> AssistantEvent {
    tokio::time::timeout(Duration::from_secs(60), rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event bus closed")
}

/// Frame source replaying a fixed list
///
/// Once the list is spent it either ends or, with `hold_open`, waits forever.
pub struct VecFrameSource {
    frames: VecDeque<PcmFrame>,
    hold_open: bool,
    lead_in: Option<Duration>,
}

impl VecFrameSource {
    pub fn new(frames: Vec<PcmFrame>) -> Self {
        Self {
            frames: frames.into(),
            hold_open: false,
            lead_in: None,
        }
    }

    pub fn held_open(frames: Vec<PcmFrame>) -> Self {
        Self {
            hold_open: true,
            ..Self::new(frames)
        }
    }

    /// Wait `delay` before the first frame
    pub fn starting_after(mut self, delay: Duration) -> Self {
        self.lead_in = Some(delay);
        self
    }
}

#[async_trait]
impl FrameSource for VecFrameSource {
    async fn next_frame(&mut self) -> Result<Option<PcmFrame>> {
        if let Some(delay) = self.lead_in {
            tokio::time::sleep(delay).await;
            self.lead_in = None;
        }
        match self.frames.pop_front() {
            Some(frame) => Ok(Some(frame)),
            None if self.hold_open => std::future::pending().await,
            None => Ok(None),
        }
    }
}

/// Frame source that fails immediately
pub struct BrokenSource;

#[async_trait]
impl FrameSource for BrokenSource {
    async fn next_frame(&mut self) -> Result<Option<PcmFrame>> {
        Err(Error::Audio("device unplugged".to_string()))
    }
}

/// Shared log of (engine, text) synthesis attempts
pub type SpeechLog = Arc<Mutex<Vec<(Engine, String)>>>;

/// Synthesis backend that records every attempt
pub struct RecordingBackend {
    engine: Engine,
    log: SpeechLog,
    fail: bool,
    delay: Duration,
}

impl RecordingBackend {
    pub fn new(engine: Engine, log: &SpeechLog) -> Self {
        Self {
            engine,
            log: Arc::clone(log),
            fail: false,
            delay: Duration::ZERO,
        }
    }

    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl SynthesisBackend for RecordingBackend {
    fn engine(&self) -> Engine {
        self.engine
    }

    async fn speak(&self, text: &str, _profile: &VoiceProfile) -> Result<()> {
        self.log
            .lock()
            .unwrap()
            .push((self.engine, text.to_string()));
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail {
            return Err(Error::provider(self.engine.as_str(), "simulated outage"));
        }
        Ok(())
    }
}

/// What a scripted transcriber answers
#[derive(Clone)]
pub enum Reply {
    Text(&'static str),
    Fail,
}

/// Transcriber with a canned reply, usable as either engine kind
pub struct ScriptedTranscriber {
    reply: Reply,
    delay: Duration,
    calls: AtomicUsize,
    started: Notify,
    last_wav: Mutex<Option<Vec<u8>>>,
}

impl ScriptedTranscriber {
    pub fn new(reply: Reply) -> Self {
        Self {
            reply,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            started: Notify::new(),
            last_wav: Mutex::new(None),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Resolves once a transcription has begun
    pub async fn started(&self) {
        self.started.notified().await;
    }

    /// Spec of the last WAV handed to the online path
    pub fn last_wav_spec(&self) -> Option<hound::WavSpec> {
        let wav = self.last_wav.lock().unwrap().clone()?;
        hound::WavReader::new(Cursor::new(wav))
            .ok()
            .map(|r| r.spec())
    }

    async fn answer(&self) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.started.notify_one();
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match &self.reply {
            Reply::Text(text) => Ok((*text).to_string()),
            Reply::Fail => Err(Error::provider("scripted", "no service")),
        }
    }
}

#[async_trait]
impl OfflineTranscriber for ScriptedTranscriber {
    fn name(&self) -> &'static str {
        "scripted-offline"
    }

    async fn transcribe(&self, _segment: &AudioSegment) -> Result<String> {
        self.answer().await
    }
}

#[async_trait]
impl OnlineTranscriber for ScriptedTranscriber {
    fn name(&self) -> &'static str {
        "scripted-online"
    }

    async fn transcribe(&self, wav: &[u8]) -> Result<String> {
        *self.last_wav.lock().unwrap() = Some(wav.to_vec());
        self.answer().await
    }
}
