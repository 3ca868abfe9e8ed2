//! Settings file (`config.toml`) with environment overrides

use crate::error::{Error, Result};
use crate::failsafe::FailSafe;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_VISION_MODEL: &str = "gpt-4o";
pub const DEFAULT_VISION_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";
/// Minimum template similarity counted as a match
pub const DEFAULT_TEMPLATE_THRESHOLD: f64 = 0.8;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub vision: VisionSettings,
    pub template: TemplateSettings,
    pub playback: PlaybackSettings,
    pub failsafe: FailSafe,
    pub recorder: RecorderSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VisionSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub model: String,
    pub endpoint: String,
    pub timeout_secs: u64,
    pub max_tokens: u32,
    /// Found replies below this confidence count as not found
    pub min_confidence: f64,
}

impl Default for VisionSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            model: DEFAULT_VISION_MODEL.to_string(),
            endpoint: DEFAULT_VISION_ENDPOINT.to_string(),
            timeout_secs: 60,
            max_tokens: 500,
            min_confidence: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TemplateSettings {
    pub threshold: f64,
    /// Search stride in pixels
    pub step: u32,
}

impl Default for TemplateSettings {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_TEMPLATE_THRESHOLD,
            step: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackSettings {
    pub speed: f64,
    pub start_delay_ms: u64,
}

impl Default for PlaybackSettings {
    fn default() -> Self {
        Self {
            speed: 1.0,
            start_delay_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderSettings {
    /// Minimum distance in pixels between recorded moves; 0 keeps every move
    pub move_threshold: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
}

impl Settings {
    /// `$CONFIG_DIR/autoclick/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("autoclick").join("config.toml"))
    }

    /// Load from `path` (or the default location), then apply the environment.
    /// A missing file yields defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path.map(Path::to_path_buf).or_else(Self::default_path);
        let mut settings = match path {
            Some(p) if p.exists() => {
                let text = std::fs::read_to_string(&p)?;
                let s: Settings = toml::from_str(&text)
                    .map_err(|e| Error::config_invalid(format!("{}: {}", p.display(), e)))?;
                tracing::debug!(path = %p.display(), "loaded settings");
                s
            }
            _ => Self::default(),
        };
        settings.apply_env(|k| std::env::var(k).ok());
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::config_invalid(e.to_string()))
    }

    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(key) = var("OPENAI_API_KEY").filter(|k| !k.is_empty()) {
            self.vision.api_key = Some(key);
        }
        if let Some(model) = var("AUTOCLICK_VISION_MODEL").filter(|m| !m.is_empty()) {
            self.vision.model = model;
        }
        if let Some(file) = var("AUTOCLICK_LOG_FILE").filter(|f| !f.is_empty()) {
            self.logging.file = Some(PathBuf::from(file));
        }
    }

    pub fn validate(&self) -> Result<()> {
        let t = self.template.threshold;
        if !(0.0..=1.0).contains(&t) {
            return Err(Error::config_invalid(format!(
                "template.threshold must be in [0, 1], got {}",
                t
            )));
        }
        if self.template.step == 0 {
            return Err(Error::config_invalid("template.step must be at least 1"));
        }
        if !(self.playback.speed.is_finite() && self.playback.speed > 0.0) {
            return Err(Error::config_invalid(format!(
                "playback.speed must be positive, got {}",
                self.playback.speed
            )));
        }
        if self.vision.timeout_secs == 0 {
            return Err(Error::config_invalid("vision.timeout_secs must be positive"));
        }
        if !(0.0..=1.0).contains(&self.vision.min_confidence) {
            return Err(Error::config_invalid("vision.min_confidence must be in [0, 1]"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::failsafe::Corner;

    #[test]
    fn partial_file_keeps_defaults() {
        let s = Settings::from_toml(
            r#"
            [template]
            threshold = 0.9

            [failsafe]
            corner = "bottom-right"
            "#,
        )
        .unwrap();
        assert_eq!(s.template.threshold, 0.9);
        assert_eq!(s.template.step, 1);
        assert_eq!(s.failsafe.corner, Corner::BottomRight);
        assert!(s.failsafe.enabled);
        assert_eq!(s.vision.model, DEFAULT_VISION_MODEL);
    }

    #[test]
    fn env_overrides() {
        let mut s = Settings::default();
        s.apply_env(|k| match k {
            "OPENAI_API_KEY" => Some("sk-test".to_string()),
            "AUTOCLICK_VISION_MODEL" => Some(String::new()),
            _ => None,
        });
        assert_eq!(s.vision.api_key.as_deref(), Some("sk-test"));
        assert_eq!(s.vision.model, DEFAULT_VISION_MODEL);
    }

    #[test]
    fn validation_rejects_bad_values() {
        let mut s = Settings::default();
        s.template.threshold = 1.5;
        assert!(s.validate().is_err());
        let mut s = Settings::default();
        s.playback.speed = 0.0;
        assert!(s.validate().is_err());
        assert!(Settings::default().validate().is_ok());
    }

    #[test]
    fn load_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let s = Settings::load(Some(&dir.path().join("nope.toml"))).unwrap();
        assert_eq!(s.template, TemplateSettings::default());
    }

    #[test]
    fn load_reports_bad_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[template\nthreshold = ").unwrap();
        let err = Settings::load(Some(&path)).unwrap_err();
        assert!(err.is(crate::ErrorCode::ConfigInvalid));
    }
}
