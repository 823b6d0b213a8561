//! Configuration management for the Vitrine daemon.
//!
//! Configuration is loaded from TOML files in the following locations (in order):
//! 1. `%APPDATA%/vitrine/config.toml` (Windows standard)
//! 2. `~/.config/vitrine/config.toml` (Unix-style, for WSL compatibility)
//! 3. `./config.toml` (current directory, for development)

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use vitrine_core_surface::GeometryOverride;

/// Main configuration structure for the Vitrine daemon.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Display selection and probing.
    pub display: DisplayConfig,
    /// Surface and drift-correction tuning.
    pub surface: SurfaceConfig,
    /// Content source and renderer command.
    pub content: ContentConfig,
    /// Behavior configuration.
    pub behavior: BehaviorConfig,
}

/// Display-related configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    /// Fixed surface geometry for devices with known panel dimensions.
    /// When set, it wins over whatever the display probe reports.
    pub fixed: Option<FixedGeometry>,

    /// How many times to retry the display probe when the host reports
    /// zero screens (panels can enumerate late at boot).
    #[serde(default = "default_probe_retries")]
    pub probe_retries: u32,

    /// Delay between probe attempts in milliseconds.
    #[serde(default = "default_probe_retry_delay")]
    pub probe_retry_delay_ms: u64,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            fixed: None,
            probe_retries: default_probe_retries(),
            probe_retry_delay_ms: default_probe_retry_delay(),
        }
    }
}

/// Fixed panel geometry.
///
/// # Example Config
///
/// ```toml
/// [display.fixed]
/// width = 1080
/// height = 1920
/// ```
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FixedGeometry {
    pub width: i32,
    pub height: i32,
    #[serde(default)]
    pub x: i32,
    #[serde(default)]
    pub y: i32,
}

impl From<FixedGeometry> for GeometryOverride {
    fn from(fixed: FixedGeometry) -> Self {
        GeometryOverride {
            width: fixed.width,
            height: fixed.height,
            x: fixed.x,
            y: fixed.y,
        }
    }
}

/// Surface and drift-correction configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SurfaceConfig {
    /// Delay before the one extra geometry re-application after the surface
    /// is shown, in milliseconds. Some compositors silently re-snap a window
    /// shortly after it appears; this pass catches them.
    #[serde(default = "default_settle_delay")]
    pub settle_delay_ms: u64,
}

impl Default for SurfaceConfig {
    fn default() -> Self {
        Self {
            settle_delay_ms: default_settle_delay(),
        }
    }
}

/// Content hosting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContentConfig {
    /// Location reference handed to the renderer (URL or file path).
    #[serde(default = "default_content_source")]
    pub source: String,

    /// Renderer command line. `{source}` is replaced with the content
    /// source and `{hwnd}` with the surface's window handle; without a
    /// `{source}` placeholder the source is appended as the last argument.
    /// Empty means no content is hosted (the surface shows its background).
    #[serde(default)]
    pub command: Vec<String>,
}

impl Default for ContentConfig {
    fn default() -> Self {
        Self {
            source: default_content_source(),
            command: Vec::new(),
        }
    }
}

/// Behavior-related configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BehaviorConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for BehaviorConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

// Default value functions for serde
fn default_probe_retries() -> u32 {
    3
}

fn default_probe_retry_delay() -> u64 {
    2000
}

fn default_settle_delay() -> u64 {
    500
}

fn default_content_source() -> String {
    "index.html".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

/// A validation warning for a config field that was clamped or looks wrong.
#[derive(Debug, Clone)]
pub struct ConfigWarning {
    pub field: &'static str,
    pub message: String,
}

impl Config {
    /// Load configuration from standard locations.
    ///
    /// Returns default config if no file is found.
    pub fn load() -> Result<Self> {
        let paths = config_paths();

        for path in &paths {
            if path.exists() {
                tracing::info!("Loading config from: {}", path.display());
                return Self::load_from_path(path);
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Load configuration from a specific path.
    pub fn load_from_path(path: &PathBuf) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// The fixed geometry as the core override type, when configured.
    pub fn override_geometry(&self) -> Option<GeometryOverride> {
        self.display.fixed.map(GeometryOverride::from)
    }

    /// Clamp out-of-range values in place and report what was adjusted.
    /// Startup never fails on a bad value; the device must come up.
    pub fn validate(&mut self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        if self.surface.settle_delay_ms > 10_000 {
            warnings.push(ConfigWarning {
                field: "surface.settle_delay_ms",
                message: format!("{} clamped to 10000", self.surface.settle_delay_ms),
            });
            self.surface.settle_delay_ms = 10_000;
        }

        if self.display.probe_retries > 100 {
            warnings.push(ConfigWarning {
                field: "display.probe_retries",
                message: format!("{} clamped to 100", self.display.probe_retries),
            });
            self.display.probe_retries = 100;
        }

        if self.display.probe_retry_delay_ms < 100 {
            warnings.push(ConfigWarning {
                field: "display.probe_retry_delay_ms",
                message: format!("{} raised to 100", self.display.probe_retry_delay_ms),
            });
            self.display.probe_retry_delay_ms = 100;
        }

        if let Some(fixed) = &self.display.fixed {
            if fixed.width <= 0 || fixed.height <= 0 {
                warnings.push(ConfigWarning {
                    field: "display.fixed",
                    message: format!(
                        "{}x{} is not a usable panel size; ignoring the fixed geometry",
                        fixed.width, fixed.height
                    ),
                });
                self.display.fixed = None;
            }
        }

        if !self.content.command.is_empty() && self.content.source.is_empty() {
            warnings.push(ConfigWarning {
                field: "content.source",
                message: "renderer command configured but content source is empty".to_string(),
            });
        }

        warnings
    }
}

/// Get all possible config file paths in priority order.
pub fn config_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    // 1. Windows standard: %APPDATA%/vitrine/config.toml
    if let Some(proj_dirs) = ProjectDirs::from("", "", "vitrine") {
        paths.push(proj_dirs.config_dir().join("config.toml"));
    }

    // 2. Unix-style: ~/.config/vitrine/config.toml
    if let Some(base_dirs) = directories::BaseDirs::new() {
        paths.push(
            base_dirs
                .home_dir()
                .join(".config")
                .join("vitrine")
                .join("config.toml"),
        );
    }

    // 3. Current directory: ./config.toml
    paths.push(PathBuf::from("config.toml"));

    paths
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.display.fixed.is_none());
        assert_eq!(config.display.probe_retries, 3);
        assert_eq!(config.display.probe_retry_delay_ms, 2000);
        assert_eq!(config.surface.settle_delay_ms, 500);
        assert!(config.content.command.is_empty());
        assert_eq!(config.behavior.log_level, "info");
    }

    #[test]
    fn test_config_partial_parse() {
        // Config with only some fields should use defaults for the rest
        let toml_str = r#"
            [surface]
            settle_delay_ms = 750
        "#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.surface.settle_delay_ms, 750);
        assert_eq!(config.display.probe_retries, 3); // default
        assert_eq!(config.behavior.log_level, "info"); // default
    }

    #[test]
    fn test_fixed_geometry_parse_with_default_origin() {
        let toml_str = r#"
            [display.fixed]
            width = 1080
            height = 1920
        "#;
        let config: Config = toml::from_str(toml_str).unwrap();
        let fixed = config.display.fixed.unwrap();
        assert_eq!(fixed.width, 1080);
        assert_eq!(fixed.height, 1920);
        assert_eq!(fixed.x, 0);
        assert_eq!(fixed.y, 0);

        let override_geom = config.override_geometry().unwrap();
        assert_eq!(override_geom.width, 1080);
        assert_eq!(override_geom.height, 1920);
    }

    #[test]
    fn test_content_config_parse() {
        let toml_str = r#"
            [content]
            source = "https://kiosk.local/board"
            command = ["renderer.exe", "--embed", "{hwnd}", "{source}"]
        "#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.content.source, "https://kiosk.local/board");
        assert_eq!(config.content.command.len(), 4);
    }

    #[test]
    fn test_config_serialization_roundtrip() {
        let config = Config::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.surface.settle_delay_ms, config.surface.settle_delay_ms);
        assert_eq!(parsed.display.probe_retries, config.display.probe_retries);
    }

    #[test]
    fn test_validate_clamps_settle_delay() {
        let mut config = Config::default();
        config.surface.settle_delay_ms = 60_000;
        let warnings = config.validate();
        assert_eq!(config.surface.settle_delay_ms, 10_000);
        assert!(warnings.iter().any(|w| w.field == "surface.settle_delay_ms"));
    }

    #[test]
    fn test_validate_raises_probe_delay_floor() {
        let mut config = Config::default();
        config.display.probe_retry_delay_ms = 5;
        let warnings = config.validate();
        assert_eq!(config.display.probe_retry_delay_ms, 100);
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn test_validate_rejects_degenerate_fixed_geometry() {
        let mut config = Config::default();
        config.display.fixed = Some(FixedGeometry {
            width: 0,
            height: 1920,
            x: 0,
            y: 0,
        });
        let warnings = config.validate();
        assert!(config.display.fixed.is_none());
        assert!(warnings.iter().any(|w| w.field == "display.fixed"));
    }

    #[test]
    fn test_validate_clean_config_has_no_warnings() {
        let mut config = Config::default();
        assert!(config.validate().is_empty());
    }

    #[test]
    fn test_config_paths_not_empty() {
        let paths = config_paths();
        assert!(!paths.is_empty());
    }
}
