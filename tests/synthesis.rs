//! Speech synthesis dispatcher integration tests

use std::sync::{Arc, Mutex};
use std::time::Duration;

use echo_voice::config::ApiKeys;
use echo_voice::voice::{
    DEFAULT_PROFILE, Engine, SpeechSynthesizer, SynthesisOutcome, VoiceProfile, VoiceRegistry,
};
use echo_voice::{AssistantEvent, Config, Error, EventBus, SpeechService};
use tokio_test::{assert_err, assert_ok, assert_pending, task};

mod common;

use common::{RecordingBackend, SpeechLog};

fn registry(events: &EventBus) -> Arc<VoiceRegistry> {
    let registry = VoiceRegistry::new(
        VoiceProfile::new(DEFAULT_PROFILE, Engine::Baseline),
        events.clone(),
    )
    .unwrap();
    registry
        .register(VoiceProfile::new("fast", Engine::CloudA))
        .unwrap();
    Arc::new(registry)
}

fn new_log() -> SpeechLog {
    Arc::new(Mutex::new(Vec::new()))
}

#[tokio::test(start_paused = true)]
async fn test_requests_play_in_order_with_fallback() {
    let events = EventBus::new();
    let registry = registry(&events);
    let log = new_log();

    let synth = SpeechSynthesizer::spawn(
        vec![
            Arc::new(RecordingBackend::new(Engine::CloudA, &log).failing()),
            Arc::new(
                RecordingBackend::new(Engine::Baseline, &log).with_delay(Duration::from_millis(200)),
            ),
        ],
        Arc::clone(&registry),
        events,
        8,
    );

    let fast = registry.get("fast");
    let a = synth.speak("A", fast).await.unwrap();
    let b = synth.speak("B", None).await.unwrap();
    let c = synth.speak("C", None).await.unwrap();

    assert_eq!(
        a.wait().await.unwrap(),
        SynthesisOutcome::Spoken {
            engine: Engine::Baseline,
            fell_back: true
        }
    );
    assert_eq!(
        b.wait().await.unwrap(),
        SynthesisOutcome::Spoken {
            engine: Engine::Baseline,
            fell_back: false
        }
    );
    c.wait().await.unwrap();

    assert_eq!(
        *log.lock().unwrap(),
        vec![
            (Engine::CloudA, "A".to_string()),
            (Engine::Baseline, "A".to_string()),
            (Engine::Baseline, "B".to_string()),
            (Engine::Baseline, "C".to_string()),
        ]
    );
    synth.shutdown().await;
}

#[tokio::test]
async fn test_baseline_failure_reports_synthesis_failed() {
    let events = EventBus::new();
    let mut rx = events.subscribe();
    let log = new_log();

    let synth = SpeechSynthesizer::spawn(
        vec![Arc::new(RecordingBackend::new(Engine::Baseline, &log).failing())],
        registry(&events),
        events.clone(),
        8,
    );

    let handle = assert_ok!(synth.speak("hello", None).await);
    let err = assert_err!(handle.wait().await);
    assert!(matches!(err, Error::Provider { .. }));

    match common::next_event(&mut rx).await {
        AssistantEvent::SynthesisFailed { engine, error } => {
            assert_eq!(engine, Engine::Baseline.as_str());
            assert!(error.contains("simulated outage"));
        }
        other => panic!("unexpected event: {other:?}"),
    }

    // Baseline is only tried once
    assert_eq!(log.lock().unwrap().len(), 1);
    synth.shutdown().await;
}

#[tokio::test]
async fn test_cloud_and_baseline_failure_tries_each_once() {
    let events = EventBus::new();
    let log = new_log();
    let registry = registry(&events);

    let synth = SpeechSynthesizer::spawn(
        vec![
            Arc::new(RecordingBackend::new(Engine::CloudA, &log).failing()),
            Arc::new(RecordingBackend::new(Engine::Baseline, &log).failing()),
        ],
        Arc::clone(&registry),
        events,
        8,
    );

    let result = synth
        .speak("hello", registry.get("fast"))
        .await
        .unwrap()
        .wait()
        .await;
    assert!(result.is_err());
    assert_eq!(log.lock().unwrap().len(), 2);
    synth.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_profile_is_captured_at_submission() {
    let events = EventBus::new();
    let registry = registry(&events);
    let log = new_log();

    let synth = SpeechSynthesizer::spawn(
        vec![
            Arc::new(RecordingBackend::new(Engine::CloudA, &log)),
            Arc::new(
                RecordingBackend::new(Engine::Baseline, &log).with_delay(Duration::from_secs(1)),
            ),
        ],
        Arc::clone(&registry),
        events,
        8,
    );

    let first = synth.speak("first", None).await.unwrap();
    let second = synth.speak("second", None).await.unwrap();
    assert!(registry.switch("fast"));
    let third = synth.speak("third", None).await.unwrap();

    first.wait().await.unwrap();
    second.wait().await.unwrap();
    third.wait().await.unwrap();

    let engines: Vec<Engine> = log.lock().unwrap().iter().map(|(e, _)| *e).collect();
    assert_eq!(engines, vec![Engine::Baseline, Engine::Baseline, Engine::CloudA]);
    synth.shutdown().await;
}

#[tokio::test]
async fn test_blank_text_never_reaches_a_backend() {
    let events = EventBus::new();
    let log = new_log();
    let synth = SpeechSynthesizer::spawn(
        vec![Arc::new(RecordingBackend::new(Engine::Baseline, &log))],
        registry(&events),
        events,
        8,
    );

    for text in ["", "   ", "\n\t"] {
        let outcome = synth.speak(text, None).await.unwrap().wait().await.unwrap();
        assert_eq!(outcome, SynthesisOutcome::Empty);
    }
    assert!(log.lock().unwrap().is_empty());
    synth.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_drains_queued_requests() {
    let events = EventBus::new();
    let log = new_log();
    let synth = SpeechSynthesizer::spawn(
        vec![Arc::new(
            RecordingBackend::new(Engine::Baseline, &log).with_delay(Duration::from_millis(500)),
        )],
        registry(&events),
        events,
        8,
    );

    let handles = futures::future::join_all(
        ["one", "two", "three"].map(|text| synth.speak(text, None)),
    )
    .await;
    synth.shutdown().await;

    for handle in handles {
        handle.unwrap().wait().await.unwrap();
    }
    assert_eq!(log.lock().unwrap().len(), 3);
}

#[tokio::test]
async fn test_full_queue_suspends_speak() {
    let events = EventBus::new();
    let log = new_log();
    let synth = SpeechSynthesizer::spawn(
        vec![Arc::new(RecordingBackend::new(Engine::Baseline, &log))],
        registry(&events),
        events,
        1,
    );

    // The worker has not run yet, so the first request fills the queue
    let first = assert_ok!(synth.speak("first", None).await);
    let mut second = task::spawn(synth.speak("second", None));
    assert_pending!(second.poll());

    assert_ok!(first.wait().await);
    let second = assert_ok!(second.await);
    assert_ok!(second.wait().await);

    assert_eq!(
        *log.lock().unwrap(),
        vec![
            (Engine::Baseline, "first".to_string()),
            (Engine::Baseline, "second".to_string()),
        ]
    );
    synth.shutdown().await;
}

#[tokio::test]
async fn test_service_speaks_with_configured_default_profile() {
    let log = new_log();
    let config = Config {
        api_keys: ApiKeys {
            openai: Some("sk-test".to_string()),
            ..ApiKeys::default()
        },
        default_profile: Some("fast".to_string()),
        ..Config::default()
    };

    let service = SpeechService::builder(config)
        .synthesis_backend(Arc::new(RecordingBackend::new(Engine::CloudA, &log)))
        .synthesis_backend(Arc::new(RecordingBackend::new(Engine::Baseline, &log)))
        .build()
        .unwrap();

    assert_eq!(service.registry().current().name, "fast");
    assert_eq!(service.skipped_profiles().len(), 1);

    let outcome = service
        .speak("hi there", None)
        .await
        .unwrap()
        .wait()
        .await
        .unwrap();
    assert_eq!(
        outcome,
        SynthesisOutcome::Spoken {
            engine: Engine::CloudA,
            fell_back: false
        }
    );

    assert!(service.switch_profile(DEFAULT_PROFILE));
    service.shutdown().await;
    assert!(matches!(
        service.speak("late", None).await,
        Err(Error::ServiceStopped)
    ));
}
