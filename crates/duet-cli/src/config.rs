//! Settings loading for the CLI.
//!
//! Settings come from an optional JSON file; command-line flags win over
//! file values. The merged result is validated before the engine sees it.

use std::path::{Path, PathBuf};

use duet_core::{EngineSettings, SettingsError, validate_settings};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid settings in {path}: {source}")]
    Settings {
        path: PathBuf,
        #[source]
        source: SettingsError,
    },

    #[error(transparent)]
    Invalid(#[from] SettingsError),
}

/// Values given on the command line.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub wake_word: bool,
    pub language: Option<String>,
}

pub fn load_settings(
    path: Option<&Path>,
    overrides: &Overrides,
) -> Result<EngineSettings, ConfigError> {
    let mut settings = match path {
        Some(path) => read_file(path)?,
        None => EngineSettings::default(),
    };

    if overrides.wake_word {
        settings.recognition.wake_word_mode = true;
    }
    if let Some(language) = &overrides.language {
        settings.recognition.language.clone_from(language);
    }

    validate_settings(&settings)?;
    Ok(settings)
}

fn read_file(path: &Path) -> Result<EngineSettings, ConfigError> {
    let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let settings = EngineSettings::from_json(&json).map_err(|source| ConfigError::Settings {
        path: path.to_path_buf(),
        source,
    })?;
    tracing::debug!(path = %path.display(), "Loaded settings file");
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn settings_file(json: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(json.as_bytes()).unwrap();
        file
    }

    #[test]
    fn defaults_without_file() {
        let settings = load_settings(None, &Overrides::default()).unwrap();
        assert_eq!(settings.recognition.language, "en");
        assert!(!settings.recognition.wake_word_mode);
    }

    #[test]
    fn file_values_are_read() {
        let file = settings_file(
            r#"{ "vad": { "debounceMs": 120 }, "recognition": { "language": "fr" } }"#,
        );
        let settings = load_settings(Some(file.path()), &Overrides::default()).unwrap();
        assert_eq!(settings.vad.debounce_ms, 120);
        assert_eq!(settings.recognition.language, "fr");
        assert_eq!(settings.chunking.min_sentence_words, 5);
    }

    #[test]
    fn flags_override_file() {
        let file =
            settings_file(r#"{ "recognition": { "language": "fr", "wakeWordMode": false } }"#);
        let overrides = Overrides {
            wake_word: true,
            language: Some("es".to_string()),
        };
        let settings = load_settings(Some(file.path()), &overrides).unwrap();
        assert!(settings.recognition.wake_word_mode);
        assert_eq!(settings.recognition.language, "es");
    }

    #[test]
    fn missing_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.json");
        let err = load_settings(Some(&path), &Overrides::default()).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn invalid_values_are_rejected() {
        let file = settings_file(r#"{ "chunking": { "fallbackChars": 5 } }"#);
        let err = load_settings(Some(file.path()), &Overrides::default()).unwrap_err();
        assert!(matches!(err, ConfigError::Settings { .. }));

        let overrides = Overrides {
            wake_word: false,
            language: Some("  ".to_string()),
        };
        let err = load_settings(None, &overrides).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(SettingsError::EmptyLanguage)));
    }
}
