use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::engine::EngineOptions;
pub use crate::error::ConfigError;
use crate::fade::FadeCurve;

/// Runtime settings for the show runner and the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// How often the runner ticks the engine.
    pub tick_rate_hz: u32,
    /// Curve used for fades typed at the console without one.
    pub default_fade_curve: FadeCurve,
    /// A second Stop during a fade-out stops at once.
    pub stop_escalates_fade_out: bool,
    /// Buffered events per observer before the slowest starts dropping.
    pub event_capacity: usize,
    pub log_level: String,
    /// How often the runner publishes an active-cue snapshot.
    pub status_interval_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            tick_rate_hz: 60,
            default_fade_curve: FadeCurve::Linear,
            stop_escalates_fade_out: true,
            event_capacity: 1024,
            log_level: "info".to_string(),
            status_interval_ms: 1000,
        }
    }
}

impl Settings {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.tick_rate_hz.max(1) as f64)
    }

    pub fn status_interval(&self) -> Duration {
        Duration::from_millis(self.status_interval_ms.max(1))
    }

    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            stop_escalates_fade_out: self.stop_escalates_fade_out,
            event_capacity: self.event_capacity,
        }
    }
}

/// Configuration manager for encore settings
/// Separates the schema (what may be set) from the persisted values. Settings
/// live in `<config dir>/encore/config.json` unless a path is given.
pub struct ConfigManager {
    config_path: PathBuf,
    settings: Settings,
}

/// Available configuration options with validation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigSchema {
    pub playback: PlaybackConfigSchema,
    pub observers: ObserverConfigSchema,
    pub logging: LoggingConfigSchema,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackConfigSchema {
    pub tick_rate_hz: ConfigOption<u32>,
    pub default_fade_curve: ConfigOption<String>,
    pub stop_escalates_fade_out: ConfigOption<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObserverConfigSchema {
    pub event_capacity: ConfigOption<usize>,
    pub status_interval_ms: ConfigOption<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfigSchema {
    pub log_level: ConfigOption<String>,
}

/// Configuration option with validation and available choices
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigOption<T> {
    pub default: T,
    pub valid_range: Option<(T, T)>,
    pub valid_choices: Option<Vec<T>>,
    pub description: String,
    pub requires_restart: bool,
}

/// Persisted configuration file format
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigFile {
    pub version: String,
    pub settings: Settings,
    pub created_at: String,
    pub modified_at: String,
}

fn check_range<T: PartialOrd + std::fmt::Display>(
    errors: &mut Vec<String>,
    name: &str,
    option: &ConfigOption<T>,
    value: &T,
) {
    if let Some((min, max)) = &option.valid_range {
        if value < min || value > max {
            errors.push(format!("{} must be between {} and {}", name, min, max));
        }
    }
}

impl ConfigManager {
    /// Create a new configuration manager
    /// If no path is provided, defaults to [`ConfigManager::default_path`]
    pub fn new(config_path: Option<PathBuf>) -> Self {
        Self {
            config_path: config_path.unwrap_or_else(Self::default_path),
            settings: Settings::default(),
        }
    }

    /// `<config dir>/encore/config.json`, or `config.json` in the working
    /// directory when the platform has no config dir.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .map(|dir| dir.join("encore").join("config.json"))
            .unwrap_or_else(|| PathBuf::from("config.json"))
    }

    /// Load settings from the configuration file, creating it with defaults
    /// if it does not exist yet.
    pub fn load(&mut self) -> Result<Settings, ConfigError> {
        if !self.config_path.exists() {
            self.save()?;
            return Ok(self.settings.clone());
        }

        let content = fs::read_to_string(&self.config_path)
            .map_err(|e| ConfigError::ReadError(e.to_string()))?;

        let config_file: ConfigFile =
            serde_json::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        if config_file.version != env!("CARGO_PKG_VERSION") {
            log::warn!(
                "Config file version {} doesn't match application version {}. Using defaults for new settings.",
                config_file.version,
                env!("CARGO_PKG_VERSION")
            );
        }

        Self::validate_settings(&config_file.settings).map_err(ConfigError::ValidationError)?;
        self.settings = config_file.settings;
        Ok(self.settings.clone())
    }

    /// Save current settings to configuration file
    pub fn save(&self) -> Result<(), ConfigError> {
        if let Some(parent) = self.config_path.parent() {
            if parent != Path::new("") && parent != Path::new(".") {
                fs::create_dir_all(parent).map_err(|e| ConfigError::WriteError(e.to_string()))?;
            }
        }

        let now = chrono::Utc::now().to_rfc3339();
        let created_at = fs::read_to_string(&self.config_path)
            .ok()
            .and_then(|content| serde_json::from_str::<ConfigFile>(&content).ok())
            .map(|existing| existing.created_at)
            .unwrap_or_else(|| now.clone());

        let config_file = ConfigFile {
            version: env!("CARGO_PKG_VERSION").to_string(),
            settings: self.settings.clone(),
            created_at,
            modified_at: now,
        };

        let content = serde_json::to_string_pretty(&config_file)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        fs::write(&self.config_path, content)
            .map_err(|e| ConfigError::WriteError(e.to_string()))?;

        Ok(())
    }

    /// Validate, then update settings and save to file
    pub fn update_settings(&mut self, settings: Settings) -> Result<(), ConfigError> {
        Self::validate_settings(&settings).map_err(ConfigError::ValidationError)?;
        self.settings = settings;
        self.save()
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Get configuration schema with available options
    pub fn schema() -> ConfigSchema {
        let defaults = Settings::default();
        ConfigSchema {
            playback: PlaybackConfigSchema {
                tick_rate_hz: ConfigOption {
                    default: defaults.tick_rate_hz,
                    valid_range: Some((30, 240)),
                    valid_choices: None,
                    description: "Engine ticks per second; higher is smoother, not more accurate"
                        .to_string(),
                    requires_restart: true,
                },
                default_fade_curve: ConfigOption {
                    default: defaults.default_fade_curve.as_str().to_string(),
                    valid_range: None,
                    valid_choices: Some(
                        [
                            FadeCurve::Linear,
                            FadeCurve::QuadraticIn,
                            FadeCurve::QuadraticOut,
                            FadeCurve::Logarithmic,
                            FadeCurve::SCurve,
                        ]
                        .iter()
                        .map(|curve| curve.as_str().to_string())
                        .collect(),
                    ),
                    description: "Curve for operator fades given without one".to_string(),
                    requires_restart: false,
                },
                stop_escalates_fade_out: ConfigOption {
                    default: defaults.stop_escalates_fade_out,
                    valid_range: None,
                    valid_choices: None,
                    description: "Stop during a fade-out cuts the fade short".to_string(),
                    requires_restart: true,
                },
            },
            observers: ObserverConfigSchema {
                event_capacity: ConfigOption {
                    default: defaults.event_capacity,
                    valid_range: Some((16, 65536)),
                    valid_choices: None,
                    description: "Events buffered per observer before it starts missing some"
                        .to_string(),
                    requires_restart: true,
                },
                status_interval_ms: ConfigOption {
                    default: defaults.status_interval_ms,
                    valid_range: Some((100, 10_000)),
                    valid_choices: None,
                    description: "Interval between active cue snapshots in milliseconds"
                        .to_string(),
                    requires_restart: false,
                },
            },
            logging: LoggingConfigSchema {
                log_level: ConfigOption {
                    default: defaults.log_level,
                    valid_range: None,
                    valid_choices: Some(
                        ["error", "warn", "info", "debug", "trace"]
                            .iter()
                            .map(|level| level.to_string())
                            .collect(),
                    ),
                    description: "Default log filter, overridden by RUST_LOG".to_string(),
                    requires_restart: true,
                },
            },
        }
    }

    /// Validate settings against schema, collecting every violation
    pub fn validate_settings(settings: &Settings) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();
        let schema = Self::schema();

        check_range(
            &mut errors,
            "tick_rate_hz",
            &schema.playback.tick_rate_hz,
            &settings.tick_rate_hz,
        );
        check_range(
            &mut errors,
            "event_capacity",
            &schema.observers.event_capacity,
            &settings.event_capacity,
        );
        check_range(
            &mut errors,
            "status_interval_ms",
            &schema.observers.status_interval_ms,
            &settings.status_interval_ms,
        );

        if let Err(reason) = settings.default_fade_curve.validate() {
            errors.push(format!("default_fade_curve: {}", reason));
        }

        if let Some(choices) = &schema.logging.log_level.valid_choices {
            if !choices.contains(&settings.log_level.to_lowercase()) {
                errors.push(format!("log_level must be one of: {:?}", choices));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Reset settings to defaults
    pub fn reset_to_defaults(&mut self) -> Result<(), ConfigError> {
        self.settings = Settings::default();
        self.save()
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::fade::Breakpoint;

    #[test]
    fn test_config_manager_new() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test_config.json");

        let manager = ConfigManager::new(Some(config_path.clone()));
        assert_eq!(manager.config_path(), config_path);
        assert_eq!(manager.settings(), &Settings::default());
    }

    #[test]
    fn test_load_creates_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nested").join("config.json");

        let mut manager = ConfigManager::new(Some(config_path.clone()));
        assert_eq!(manager.load().unwrap(), Settings::default());
        assert!(config_path.exists());
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test_config.json");

        let mut manager = ConfigManager::new(Some(config_path.clone()));
        let settings = Settings {
            tick_rate_hz: 120,
            default_fade_curve: FadeCurve::SCurve,
            ..Settings::default()
        };
        manager.update_settings(settings.clone()).unwrap();

        let mut manager2 = ConfigManager::new(Some(config_path));
        let loaded_settings = manager2.load().unwrap();

        assert_eq!(loaded_settings, settings);
    }

    #[test]
    fn test_save_keeps_created_at() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.json");

        let mut manager = ConfigManager::new(Some(config_path.clone()));
        manager.save().unwrap();
        let first: ConfigFile =
            serde_json::from_str(&fs::read_to_string(&config_path).unwrap()).unwrap();

        manager.reset_to_defaults().unwrap();
        let second: ConfigFile =
            serde_json::from_str(&fs::read_to_string(&config_path).unwrap()).unwrap();
        assert_eq!(first.created_at, second.created_at);
    }

    #[test]
    fn test_partial_file_takes_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.json");
        let json = r#"{
            "version": "0.0.0",
            "settings": { "tick_rate_hz": 90 },
            "created_at": "2026-01-01T00:00:00Z",
            "modified_at": "2026-01-01T00:00:00Z"
        }"#;
        fs::write(&config_path, json).unwrap();

        let mut manager = ConfigManager::new(Some(config_path));
        let settings = manager.load().unwrap();
        assert_eq!(settings.tick_rate_hz, 90);
        assert_eq!(settings.event_capacity, 1024);
    }

    #[test]
    fn test_validation_collects_every_error() {
        let mut settings = Settings::default();
        assert!(ConfigManager::validate_settings(&settings).is_ok());

        settings.tick_rate_hz = 10;
        settings.event_capacity = 4;
        settings.log_level = "loud".to_string();
        settings.default_fade_curve =
            FadeCurve::Breakpoints(vec![Breakpoint::new(0.7, 0.5), Breakpoint::new(0.2, 0.1)]);
        let errors = ConfigManager::validate_settings(&settings).unwrap_err();
        assert_eq!(errors.len(), 4);
    }

    #[test]
    fn test_invalid_file_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.json");
        let mut manager = ConfigManager::new(Some(config_path.clone()));
        manager.save().unwrap();

        let bad = fs::read_to_string(&config_path)
            .unwrap()
            .replace("\"tick_rate_hz\": 60", "\"tick_rate_hz\": 1000");
        fs::write(&config_path, bad).unwrap();

        assert!(matches!(
            manager.load(),
            Err(ConfigError::ValidationError(errors)) if errors.len() == 1
        ));
    }

    #[test]
    fn test_schema_defaults_match_settings() {
        let schema = ConfigManager::schema();
        let defaults = Settings::default();

        assert_eq!(schema.playback.tick_rate_hz.default, defaults.tick_rate_hz);
        assert_eq!(schema.observers.event_capacity.default, defaults.event_capacity);
        assert!(schema
            .playback
            .default_fade_curve
            .valid_choices
            .unwrap()
            .contains(&"Linear".to_string()));
    }
}
