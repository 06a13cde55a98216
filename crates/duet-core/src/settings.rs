//! Engine settings and validation.
//!
//! All tunables the engine reads live here, grouped by component. Every
//! section uses `#[serde(default)]` so a partial JSON file only overrides the
//! fields it names.

use serde::{Deserialize, Serialize};

/// Default minimum words before a sentence-terminated chunk is spoken.
pub const DEFAULT_MIN_SENTENCE_WORDS: usize = 5;

/// Default unsent length (characters) that triggers a fallback chunk.
pub const DEFAULT_FALLBACK_CHARS: usize = 200;

/// Default barge-in debounce window.
pub const DEFAULT_VAD_DEBOUNCE_MS: u64 = 200;

/// Default number of consecutive recognizer failures before halting.
pub const DEFAULT_RECOGNIZER_FAILURE_THRESHOLD: u32 = 4;

/// How streamed text is cut into speech chunks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ChunkingSettings {
    /// Minimum words in a sentence-terminated candidate.
    pub min_sentence_words: usize,
    /// Unsent characters before a fallback chunk is cut.
    pub fallback_chars: usize,
    /// Minimum words in a fallback chunk.
    pub fallback_min_words: usize,
}

impl Default for ChunkingSettings {
    fn default() -> Self {
        Self {
            min_sentence_words: DEFAULT_MIN_SENTENCE_WORDS,
            fallback_chars: DEFAULT_FALLBACK_CHARS,
            fallback_min_words: 10,
        }
    }
}

/// Barge-in voice-activity detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct VadSettings {
    /// RMS energy above which a frame counts as speech.
    pub energy_threshold: f32,
    /// Continuous speech required before raising `start`.
    pub debounce_ms: u64,
    /// Weight of the newest frame in the rolling energy average (0, 1].
    pub smoothing: f32,
}

impl Default for VadSettings {
    fn default() -> Self {
        Self {
            energy_threshold: 0.02,
            debounce_ms: DEFAULT_VAD_DEBOUNCE_MS,
            smoothing: 0.4,
        }
    }
}

/// Avatar animation timing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AnimationSettings {
    /// Estimated speaking time per character when the backend gives none.
    pub ms_per_char: u64,
    pub min_trigger_ms: u64,
    pub max_trigger_ms: u64,
    /// Blend time for the return-to-idle pose.
    pub idle_blend_ms: u64,
}

impl Default for AnimationSettings {
    fn default() -> Self {
        Self {
            ms_per_char: 65,
            min_trigger_ms: 400,
            max_trigger_ms: 20_000,
            idle_blend_ms: 300,
        }
    }
}

/// Speech recognition and turn-taking behavior.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RecognitionSettings {
    /// Recognizer language code (e.g. `"en"`).
    pub language: String,
    /// Start (and rest) in wake-word listening instead of idle.
    pub wake_word_mode: bool,
    /// Consecutive recognizer failures before voice input is halted.
    pub failure_threshold: u32,
}

impl Default for RecognitionSettings {
    fn default() -> Self {
        Self {
            language: "en".to_string(),
            wake_word_mode: false,
            failure_threshold: DEFAULT_RECOGNIZER_FAILURE_THRESHOLD,
        }
    }
}

/// Complete engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineSettings {
    pub chunking: ChunkingSettings,
    pub vad: VadSettings,
    pub animation: AnimationSettings,
    pub recognition: RecognitionSettings,
}

impl EngineSettings {
    /// Parse settings from JSON and validate them.
    pub fn from_json(json: &str) -> Result<Self, SettingsError> {
        let settings: Self =
            serde_json::from_str(json).map_err(|e| SettingsError::Parse(e.to_string()))?;
        validate_settings(&settings)?;
        Ok(settings)
    }
}

/// Settings validation error.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SettingsError {
    #[error("Invalid settings JSON: {0}")]
    Parse(String),

    #[error("Minimum sentence words must be at least 1, got {0}")]
    InvalidSentenceWords(usize),

    #[error("Fallback chunk length must be between 40 and 2000 characters, got {0}")]
    InvalidFallbackChars(usize),

    #[error("VAD energy threshold must be in (0, 1], got {0}")]
    InvalidEnergyThreshold(f32),

    #[error("VAD smoothing must be in (0, 1], got {0}")]
    InvalidSmoothing(f32),

    #[error("VAD debounce must be at most 2000 ms, got {0}")]
    InvalidDebounce(u64),

    #[error("Animation trigger bounds are inverted: min {min} > max {max}")]
    InvalidTriggerBounds { min: u64, max: u64 },

    #[error("Recognizer failure threshold must be at least 1")]
    InvalidFailureThreshold,

    #[error("Recognizer language cannot be empty")]
    EmptyLanguage,
}

/// Validate settings values.
pub fn validate_settings(settings: &EngineSettings) -> Result<(), SettingsError> {
    let chunking = &settings.chunking;
    if chunking.min_sentence_words == 0 {
        return Err(SettingsError::InvalidSentenceWords(0));
    }
    if !(40..=2000).contains(&chunking.fallback_chars) {
        return Err(SettingsError::InvalidFallbackChars(chunking.fallback_chars));
    }

    let vad = &settings.vad;
    if !(vad.energy_threshold > 0.0 && vad.energy_threshold <= 1.0) {
        return Err(SettingsError::InvalidEnergyThreshold(vad.energy_threshold));
    }
    if !(vad.smoothing > 0.0 && vad.smoothing <= 1.0) {
        return Err(SettingsError::InvalidSmoothing(vad.smoothing));
    }
    if vad.debounce_ms > 2000 {
        return Err(SettingsError::InvalidDebounce(vad.debounce_ms));
    }

    let animation = &settings.animation;
    if animation.min_trigger_ms > animation.max_trigger_ms {
        return Err(SettingsError::InvalidTriggerBounds {
            min: animation.min_trigger_ms,
            max: animation.max_trigger_ms,
        });
    }

    let recognition = &settings.recognition;
    if recognition.failure_threshold == 0 {
        return Err(SettingsError::InvalidFailureThreshold);
    }
    if recognition.language.trim().is_empty() {
        return Err(SettingsError::EmptyLanguage);
    }

    Ok(())
}
