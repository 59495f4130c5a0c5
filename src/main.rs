use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

use echo_voice::voice::{
    FrameSource, MicrophoneSource, SAMPLE_RATE, SynthesisOutcome, build_detector,
    calculate_energy,
};
use echo_voice::{AssistantEvent, Config, SpeechService};

/// Echo - speech core of a desktop voice assistant
#[derive(Parser)]
#[command(name = "echo", version, about)]
struct Cli {
    /// Voice profile to use (e.g., "fast")
    #[arg(short, long, env = "ECHO_PROFILE")]
    profile: Option<String>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Speak text aloud
    Say {
        /// Text to speak
        #[arg(default_value = "Hello! This is a test of the text to speech system.")]
        text: String,
    },
    /// List voice profiles
    Voices,
    /// Listen continuously and print what is heard
    Listen,
    /// Test microphone input and voice activity detection
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "warn,echo_voice=info",
        1 => "info,echo_voice=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = Config::load()?;
    if cli.profile.is_some() {
        config.default_profile = cli.profile;
    }

    match cli.command {
        Command::Say { text } => say(config, &text).await,
        Command::Voices => voices(config).await,
        Command::Listen => listen(config).await,
        Command::TestMic { duration } => test_mic(&config, duration).await,
    }
}

/// Speak text with the selected profile
async fn say(config: Config, text: &str) -> anyhow::Result<()> {
    let service = SpeechService::start(config)?;
    let profile = service.registry().current();
    println!("Speaking with profile \"{}\" ({})", profile.name, profile.engine);

    let result = service.speak(text, None).await?.wait().await;
    service.shutdown().await;

    match result? {
        SynthesisOutcome::Spoken { engine, fell_back } if fell_back => {
            println!("Spoken by {engine} after the profile's engine failed");
        }
        SynthesisOutcome::Spoken { engine, .. } => println!("Spoken by {engine}"),
        SynthesisOutcome::Empty => println!("Nothing to say"),
    }
    Ok(())
}

/// Print the registered profiles, marking the current one
async fn voices(config: Config) -> anyhow::Result<()> {
    let service = SpeechService::start(config)?;
    let registry = service.registry();
    let current = registry.current();

    for name in registry.names() {
        if let Some(profile) = registry.get(&name) {
            let marker = if profile.name == current.name { '*' } else { ' ' };
            println!(
                "{marker} {:<12} {:<16} {:<6} speed {:.2} pitch {:.2} volume {:.2}",
                profile.name,
                profile.engine,
                profile.language,
                profile.speed,
                profile.pitch,
                profile.volume
            );
        }
    }

    for skipped in service.skipped_profiles() {
        println!("  (skipped: {skipped})");
    }

    service.shutdown().await;
    Ok(())
}

/// Run a listening session on the microphone until it ends or Ctrl+C
async fn listen(config: Config) -> anyhow::Result<()> {
    let service = SpeechService::start(config)?;
    let mut events = service.subscribe();

    service.start_listening_microphone()?;
    println!(
        "Listening (stops after {}s of silence, Ctrl+C to stop)...",
        service.config().listen.session_timeout.as_secs()
    );

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                service.stop_listening();
            }
            event = events.recv() => match event {
                Ok(AssistantEvent::UserUtterance { text }) => println!("> {text}"),
                Ok(AssistantEvent::SessionTimedOut) => {
                    println!("[Voice session timed out]");
                    break;
                }
                Ok(AssistantEvent::SessionStopped) => {
                    println!("[Voice session stopped]");
                    break;
                }
                Ok(AssistantEvent::SessionEnded { reason }) => {
                    println!("[Voice session ended: {reason}]");
                    break;
                }
                Ok(_) => {}
                Err(RecvError::Lagged(n)) => tracing::warn!(skipped = n, "event receiver lagged"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    service.shutdown().await;
    Ok(())
}

/// Test microphone input
async fn test_mic(config: &Config, duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let mut source = MicrophoneSource::open()?;
    let mut detector = build_detector(&config.vad);
    println!("Sample rate: {SAMPLE_RATE} Hz, VAD: {}", detector.name());
    println!("---");

    let frames_per_second = 1000 / echo_voice::voice::FRAME_MILLIS;
    for i in 0..duration {
        let mut energy_sum = 0.0_f32;
        let mut speech_frames = 0_u64;
        let mut frames = 0_u64;

        while frames < frames_per_second {
            let frame = tokio::time::timeout(Duration::from_secs(2), source.next_frame())
                .await
                .map_err(|_| anyhow::anyhow!("no audio received from microphone"))??;
            let Some(frame) = frame else {
                anyhow::bail!("microphone stream ended");
            };

            energy_sum += calculate_energy(&frame);
            if detector.is_speech(&frame, SAMPLE_RATE) {
                speech_frames += 1;
            }
            frames += 1;
        }

        #[allow(clippy::cast_precision_loss)]
        let energy = energy_sum / frames as f32;

        // Visual meter
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (energy * 100.0).min(50.0) as usize;
        let meter: String = "█".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!(
            "[{:2}s] RMS: {:.4} | speech {:3}% | [{}]",
            i + 1,
            energy,
            speech_frames * 100 / frames,
            meter
        );
    }

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working!");
    println!("If RMS stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: pactl info | grep 'Default Source'");
    println!("  3. Run: arecord -l (to list devices)");

    Ok(())
}
