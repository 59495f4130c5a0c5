//! Voice profiles and the registry holding the current one

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};

use crate::config::ApiKeys;
use crate::events::{AssistantEvent, EventBus};
use crate::{Error, Result};

/// Name of the profile every registry starts with
pub const DEFAULT_PROFILE: &str = "default";

/// Synthesis engine a profile speaks with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Engine {
    /// Local espeak-ng; always available, used as the fallback
    Baseline,
    /// `OpenAI` speech endpoint
    #[serde(rename = "cloud_a", alias = "openai")]
    CloudA,
    /// `ElevenLabs` text-to-speech
    #[serde(rename = "cloud_b", alias = "elevenlabs")]
    CloudB,
}

impl Engine {
    /// Engine name used in logs and events
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Baseline => "espeak-ng",
            Self::CloudA => "openai-tts",
            Self::CloudB => "elevenlabs-tts",
        }
    }
}

impl std::fmt::Display for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Named voice configuration
///
/// Immutable once registered; switching profiles only moves the registry's
/// current pointer.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct VoiceProfile {
    /// Unique registry key
    pub name: String,

    /// Synthesis engine
    pub engine: Engine,

    /// BCP-47-ish language tag (e.g. "en", "en-us")
    #[serde(default = "default_language")]
    pub language: String,

    /// Free-form hint ("female", "male", "neutral")
    #[serde(default = "default_gender")]
    pub gender_hint: String,

    /// Speech rate multiplier
    #[serde(default = "default_one")]
    pub speed: f32,

    /// Pitch multiplier
    #[serde(default = "default_one")]
    pub pitch: f32,

    /// Output volume in [0, 1]
    #[serde(default = "default_one")]
    pub volume: f32,

    /// Engine-specific settings (`voice`, `model`)
    #[serde(default)]
    pub engine_settings: BTreeMap<String, String>,
}

fn default_language() -> String {
    "en".to_string()
}

fn default_gender() -> String {
    "neutral".to_string()
}

const fn default_one() -> f32 {
    1.0
}

impl VoiceProfile {
    /// Create a profile with neutral prosody
    pub fn new(name: impl Into<String>, engine: Engine) -> Self {
        Self {
            name: name.into(),
            engine,
            language: default_language(),
            gender_hint: default_gender(),
            speed: 1.0,
            pitch: 1.0,
            volume: 1.0,
            engine_settings: BTreeMap::new(),
        }
    }

    /// Set the language tag
    #[must_use]
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    /// Set the gender hint
    #[must_use]
    pub fn with_gender(mut self, gender: impl Into<String>) -> Self {
        self.gender_hint = gender.into();
        self
    }

    /// Set speed, pitch and volume
    #[must_use]
    pub const fn with_prosody(mut self, speed: f32, pitch: f32, volume: f32) -> Self {
        self.speed = speed;
        self.pitch = pitch;
        self.volume = volume;
        self
    }

    /// Add an engine-specific setting
    #[must_use]
    pub fn with_setting(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.engine_settings.insert(key.into(), value.into());
        self
    }

    /// Look up an engine-specific setting
    #[must_use]
    pub fn setting(&self, key: &str) -> Option<&str> {
        self.engine_settings.get(key).map(String::as_str)
    }

    /// Check field ranges
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidProfile`] for an empty name, non-positive
    /// speed or pitch, or volume outside [0, 1]
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: &str| Error::InvalidProfile {
            name: self.name.clone(),
            reason: reason.to_string(),
        };

        if self.name.trim().is_empty() {
            return Err(invalid("name must not be empty"));
        }
        if !(self.speed.is_finite() && self.speed > 0.0) {
            return Err(invalid("speed must be positive"));
        }
        if !(self.pitch.is_finite() && self.pitch > 0.0) {
            return Err(invalid("pitch must be positive"));
        }
        if !(0.0..=1.0).contains(&self.volume) {
            return Err(invalid("volume must be between 0.0 and 1.0"));
        }
        Ok(())
    }
}

/// Built-in profile set: baseline default plus one profile per configured cloud engine
#[must_use]
pub fn builtin_profiles() -> Vec<VoiceProfile> {
    vec![
        VoiceProfile::new(DEFAULT_PROFILE, Engine::Baseline)
            .with_language("en")
            .with_setting("voice", "en-us"),
        VoiceProfile::new("fast", Engine::CloudA)
            .with_gender("female")
            .with_prosody(1.25, 1.0, 1.0)
            .with_setting("voice", "nova")
            .with_setting("model", "tts-1"),
        VoiceProfile::new("natural", Engine::CloudB)
            .with_gender("female")
            .with_setting("voice", "21m00Tcm4TlvDq8ikWAM")
            .with_setting("model", "eleven_monolingual_v1"),
    ]
}

struct RegistryState {
    profiles: HashMap<String, Arc<VoiceProfile>>,
    current: Arc<VoiceProfile>,
}

/// Holds named profiles and the current selection
///
/// Readers get an `Arc` snapshot, so a concurrent switch is seen either
/// entirely or not at all.
pub struct VoiceRegistry {
    state: RwLock<RegistryState>,
    events: EventBus,
}

impl VoiceRegistry {
    /// Create a registry whose only profile, and current selection, is `default`
    ///
    /// # Errors
    ///
    /// Returns error if the default profile is invalid
    pub fn new(default: VoiceProfile, events: EventBus) -> Result<Self> {
        default.validate()?;
        let default = Arc::new(default);
        let mut profiles = HashMap::new();
        profiles.insert(default.name.clone(), Arc::clone(&default));

        Ok(Self {
            state: RwLock::new(RegistryState {
                profiles,
                current: default,
            }),
            events,
        })
    }

    /// Create a registry from the built-in set plus `extra` profiles
    ///
    /// Cloud profiles whose API key is missing, and extra profiles that fail
    /// validation or collide, are skipped. Each skipped profile is returned
    /// with its reason so the caller can surface it.
    ///
    /// # Errors
    ///
    /// Returns error only if the built-in default profile cannot be created
    pub fn with_defaults(
        keys: &ApiKeys,
        extra: Vec<VoiceProfile>,
        events: EventBus,
    ) -> Result<(Self, Vec<Error>)> {
        let mut builtins = builtin_profiles().into_iter();
        let default = builtins.next().ok_or(Error::NoProfile)?;
        let registry = Self::new(default, events)?;
        let mut skipped = Vec::new();

        for profile in builtins.chain(extra) {
            let result = match profile.engine {
                Engine::CloudA if keys.openai.is_none() => Err(Error::Config(format!(
                    "profile {} needs OPENAI_API_KEY",
                    profile.name
                ))),
                Engine::CloudB if keys.elevenlabs.is_none() => Err(Error::Config(format!(
                    "profile {} needs ELEVENLABS_API_KEY",
                    profile.name
                ))),
                _ => registry.register(profile),
            };

            if let Err(e) = result {
                tracing::warn!(error = %e, "skipping voice profile");
                skipped.push(e);
            }
        }

        Ok((registry, skipped))
    }

    /// Add a profile
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateProfile`] if the name is taken, or
    /// [`Error::InvalidProfile`] if validation fails
    pub fn register(&self, profile: VoiceProfile) -> Result<()> {
        profile.validate()?;
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);

        if state.profiles.contains_key(&profile.name) {
            return Err(Error::DuplicateProfile(profile.name));
        }

        tracing::debug!(name = %profile.name, engine = %profile.engine, "registered voice profile");
        state
            .profiles
            .insert(profile.name.clone(), Arc::new(profile));
        Ok(())
    }

    /// Make `name` the current profile
    ///
    /// Returns false, leaving the selection unchanged, if no such profile exists.
    pub fn switch(&self, name: &str) -> bool {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let Some(profile) = state.profiles.get(name).cloned() else {
            tracing::debug!(name, "unknown voice profile");
            return false;
        };
        state.current = profile;

        // Published under the lock so events follow the order of switches
        tracing::info!(name, "switched voice profile");
        self.events.publish(AssistantEvent::ProfileChanged {
            name: name.to_string(),
        });
        true
    }

    /// Snapshot of the current profile
    #[must_use]
    pub fn current(&self) -> Arc<VoiceProfile> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&state.current)
    }

    /// Look up a profile by name
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<VoiceProfile>> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.profiles.get(name).cloned()
    }

    /// Registered profile names, sorted
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = state.profiles.keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of registered profiles
    #[must_use]
    pub fn len(&self) -> usize {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .profiles
            .len()
    }

    /// Always false: the default profile cannot be removed
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> VoiceRegistry {
        VoiceRegistry::new(
            VoiceProfile::new(DEFAULT_PROFILE, Engine::Baseline),
            EventBus::new(),
        )
        .unwrap()
    }

    #[test]
    fn rejects_bad_ranges() {
        let p = VoiceProfile::new("x", Engine::Baseline).with_prosody(0.0, 1.0, 1.0);
        assert!(matches!(p.validate(), Err(Error::InvalidProfile { .. })));

        let p = VoiceProfile::new("x", Engine::Baseline).with_prosody(1.0, -1.0, 1.0);
        assert!(p.validate().is_err());

        let p = VoiceProfile::new("x", Engine::Baseline).with_prosody(1.0, 1.0, 1.5);
        assert!(p.validate().is_err());

        let p = VoiceProfile::new(" ", Engine::Baseline);
        assert!(p.validate().is_err());

        let p = VoiceProfile::new("x", Engine::Baseline).with_prosody(f32::NAN, 1.0, 1.0);
        assert!(p.validate().is_err());
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let registry = registry();
        let err = registry
            .register(VoiceProfile::new(DEFAULT_PROFILE, Engine::CloudA))
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateProfile(name) if name == DEFAULT_PROFILE));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn switch_publishes_profile_changed() {
        let events = EventBus::new();
        let mut rx = events.subscribe();
        let registry =
            VoiceRegistry::new(VoiceProfile::new(DEFAULT_PROFILE, Engine::Baseline), events)
                .unwrap();
        registry
            .register(VoiceProfile::new("fast", Engine::CloudA))
            .unwrap();

        assert!(registry.switch("fast"));
        assert_eq!(
            rx.try_recv().unwrap(),
            AssistantEvent::ProfileChanged {
                name: "fast".to_string()
            }
        );

        assert!(!registry.switch("missing"));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn last_profile_changed_matches_current() {
        let events = EventBus::new();
        let mut rx = events.subscribe();
        let registry = Arc::new(
            VoiceRegistry::new(VoiceProfile::new(DEFAULT_PROFILE, Engine::Baseline), events)
                .unwrap(),
        );
        for name in ["fast", "natural", "slow"] {
            registry
                .register(VoiceProfile::new(name, Engine::Baseline))
                .unwrap();
        }

        let threads: Vec<_> = ["fast", "natural", "slow", DEFAULT_PROFILE]
            .into_iter()
            .map(|name| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        assert!(registry.switch(name));
                    }
                })
            })
            .collect();
        for thread in threads {
            thread.join().unwrap();
        }

        let mut last = None;
        while let Ok(event) = rx.try_recv() {
            last = Some(event);
        }
        assert_eq!(
            last,
            Some(AssistantEvent::ProfileChanged {
                name: registry.current().name.clone()
            })
        );
    }

    #[test]
    fn defaults_skip_cloud_profiles_without_keys() {
        let (registry, skipped) =
            VoiceRegistry::with_defaults(&ApiKeys::default(), Vec::new(), EventBus::new())
                .unwrap();
        assert_eq!(registry.names(), vec![DEFAULT_PROFILE.to_string()]);
        assert_eq!(skipped.len(), 2);
        assert_eq!(registry.current().engine, Engine::Baseline);
    }

    #[test]
    fn defaults_include_cloud_profiles_with_keys() {
        let keys = ApiKeys {
            openai: Some("sk-test".to_string()),
            elevenlabs: Some("el-test".to_string()),
            ..ApiKeys::default()
        };
        let extra = vec![VoiceProfile::new("slow", Engine::Baseline).with_prosody(0.8, 1.0, 0.9)];
        let (registry, skipped) =
            VoiceRegistry::with_defaults(&keys, extra, EventBus::new()).unwrap();

        assert!(skipped.is_empty());
        assert_eq!(registry.names(), vec!["default", "fast", "natural", "slow"]);
        assert_eq!(registry.get("natural").unwrap().engine, Engine::CloudB);
    }

    #[test]
    fn profile_deserializes_with_defaults() {
        let profile: VoiceProfile = toml::from_str(
            r#"
            name = "butler"
            engine = "openai"
            speed = 0.9
            [engine_settings]
            voice = "onyx"
            "#,
        )
        .unwrap();

        assert_eq!(profile.engine, Engine::CloudA);
        assert_eq!(profile.language, "en");
        assert!((profile.volume - 1.0).abs() < f32::EPSILON);
        assert_eq!(profile.setting("voice"), Some("onyx"));
    }
}
