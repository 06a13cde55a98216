//! Emotion classifier port.

use crate::domain::EmotionScore;
use crate::error::PortError;

/// Black-box classifier for emotion words in text.
///
/// Must be cheap and synchronous; it runs inside text normalization on the
/// engine loop.
pub trait EmotionClassifier: Send + Sync {
    fn classify(&self, text: &str) -> Result<EmotionScore, PortError>;
}

/// Classifier that always answers neutral. Used when no lexicon is wired in.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeutralClassifier;

impl EmotionClassifier for NeutralClassifier {
    fn classify(&self, _text: &str) -> Result<EmotionScore, PortError> {
        Ok(EmotionScore::neutral())
    }
}
