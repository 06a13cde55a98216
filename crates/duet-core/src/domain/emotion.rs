//! Emotion labels attached to speech chunks.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Best-effort emotion label for a piece of assistant text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Emotion {
    #[default]
    Neutral,
    Happy,
    Sad,
    Angry,
    Surprised,
    Fearful,
}

impl Emotion {
    /// Stable lowercase label (matches the serde representation).
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Neutral => "neutral",
            Self::Happy => "happy",
            Self::Sad => "sad",
            Self::Angry => "angry",
            Self::Surprised => "surprised",
            Self::Fearful => "fearful",
        }
    }
}

impl fmt::Display for Emotion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An emotion together with an intensity in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct EmotionScore {
    pub emotion: Emotion,
    pub intensity: f32,
}

impl EmotionScore {
    /// Build a score, clamping the intensity into `[0, 1]`.
    ///
    /// NaN intensities collapse to `0.0`.
    pub fn new(emotion: Emotion, intensity: f32) -> Self {
        let intensity = if intensity.is_nan() {
            0.0
        } else {
            intensity.clamp(0.0, 1.0)
        };
        Self { emotion, intensity }
    }

    pub const fn neutral() -> Self {
        Self {
            emotion: Emotion::Neutral,
            intensity: 0.0,
        }
    }

    /// Keep whichever of the two scores is stronger. Ties keep `self`.
    #[must_use]
    pub fn stronger(self, other: Self) -> Self {
        if other.intensity > self.intensity {
            other
        } else {
            self
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intensity_is_clamped() {
        assert!((EmotionScore::new(Emotion::Happy, 4.0).intensity - 1.0).abs() < f32::EPSILON);
        assert!(EmotionScore::new(Emotion::Sad, -1.0).intensity.abs() < f32::EPSILON);
        assert!(EmotionScore::new(Emotion::Sad, f32::NAN).intensity.abs() < f32::EPSILON);
    }

    #[test]
    fn stronger_prefers_higher_intensity() {
        let a = EmotionScore::new(Emotion::Happy, 0.3);
        let b = EmotionScore::new(Emotion::Angry, 0.6);
        assert_eq!(a.stronger(b).emotion, Emotion::Angry);
        assert_eq!(b.stronger(a).emotion, Emotion::Angry);
    }

    #[test]
    fn labels_match_serde() {
        let json = serde_json::to_string(&Emotion::Surprised).unwrap();
        assert_eq!(json, format!("\"{}\"", Emotion::Surprised.as_str()));
    }
}
