// =============================================================================
// CONFIGURATION - Load settings from config.toml
// =============================================================================
//
// Every field has a default, so a missing file or a partial file still yields
// a complete Config.

use anyhow::{Context, Result};
use ash::vk;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Default config file, looked up in the working directory
pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

/// Upper bound on frames in flight; more buys nothing for a single triangle
pub const MAX_FRAMES_IN_FLIGHT: usize = 4;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub graphics: GraphicsConfig,
    pub shaders: ShaderConfig,
    pub debug: DebugConfig,
}

/// Window settings
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub resizable: bool,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "Atom3D".to_string(),
            width: 800,
            height: 600,
            resizable: false,
        }
    }
}

/// Graphics settings
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct GraphicsConfig {
    /// Preferred present mode; FIFO is used when the surface lacks it
    pub present_mode: String,
    pub clear_color: [f32; 4],
    pub max_frames_in_flight: usize,
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            present_mode: "mailbox".to_string(),
            clear_color: [0.0, 0.0, 0.0, 1.0],
            max_frames_in_flight: 1,
        }
    }
}

/// Paths to precompiled SPIR-V
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct ShaderConfig {
    pub vertex: PathBuf,
    pub fragment: PathBuf,
}

impl Default for ShaderConfig {
    fn default() -> Self {
        Self {
            vertex: PathBuf::from("shaders/triangle.vert.spv"),
            fragment: PathBuf::from("shaders/triangle.frag.spv"),
        }
    }
}

/// Debug settings
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct DebugConfig {
    /// Only honored in debug builds
    pub validation_layers: bool,
    pub show_fps: bool,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            validation_layers: true,
            show_fps: true,
        }
    }
}

impl Config {
    /// Load configuration.
    ///
    /// An explicit `path` must exist and parse. Without one, config.toml is
    /// optional and any problem with it falls back to defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => {
                anyhow::ensure!(path.is_file(), "Config file not found: {:?}", path);
                Self::load_from_path(path)
            }
            None => Ok(Self::load_default()),
        }
    }

    /// Load config.toml from the working directory, falling back to defaults on any error
    pub fn load_default() -> Self {
        let path = Path::new(DEFAULT_CONFIG_PATH);
        Self::load_from_path(path).unwrap_or_else(|e| {
            log::warn!("Failed to load {:?}: {:#}. Using defaults.", path, e);
            Config::default()
        })
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config = Self::from_toml(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        log::info!("Loaded configuration from {:?}", path);
        log::debug!("Config: {:?}", config);

        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Preferred present mode as a Vulkan enum
    pub fn present_mode(&self) -> vk::PresentModeKHR {
        match self.graphics.present_mode.to_lowercase().as_str() {
            "immediate" => vk::PresentModeKHR::IMMEDIATE,
            "mailbox" => vk::PresentModeKHR::MAILBOX,
            "fifo" => vk::PresentModeKHR::FIFO,
            "fifo_relaxed" => vk::PresentModeKHR::FIFO_RELAXED,
            _ => {
                log::warn!(
                    "Unknown present mode '{}', defaulting to MAILBOX",
                    self.graphics.present_mode
                );
                vk::PresentModeKHR::MAILBOX
            }
        }
    }

    /// Frames in flight, clamped to `1..=MAX_FRAMES_IN_FLIGHT`
    pub fn frames_in_flight(&self) -> usize {
        self.graphics.max_frames_in_flight.clamp(1, MAX_FRAMES_IN_FLIGHT)
    }

    /// Validation is a debug-build feature
    pub fn validation_enabled(&self) -> bool {
        cfg!(debug_assertions) && self.debug.validation_layers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.window.title, "Atom3D");
        assert_eq!((config.window.width, config.window.height), (800, 600));
        assert!(!config.window.resizable);
        assert_eq!(config.frames_in_flight(), 1);
    }

    #[test]
    fn partial_sections_keep_remaining_defaults() {
        let config = Config::from_toml(
            r#"
            [window]
            title = "Triangle"

            [graphics]
            clear_color = [0.1, 0.2, 0.3, 1.0]
            "#,
        )
        .unwrap();

        assert_eq!(config.window.title, "Triangle");
        assert_eq!(config.window.width, 800);
        assert_eq!(config.graphics.clear_color, [0.1, 0.2, 0.3, 1.0]);
        assert_eq!(config.graphics.present_mode, "mailbox");
        assert_eq!(config.shaders, ShaderConfig::default());
    }

    #[test]
    fn shader_paths_are_configurable() {
        let config = Config::from_toml(
            r#"
            [shaders]
            vertex = "GLSL/vert.spv"
            fragment = "GLSL/frag.spv"
            "#,
        )
        .unwrap();

        assert_eq!(config.shaders.vertex, PathBuf::from("GLSL/vert.spv"));
        assert_eq!(config.shaders.fragment, PathBuf::from("GLSL/frag.spv"));
    }

    #[test]
    fn malformed_toml_is_an_error() {
        assert!(Config::from_toml("[window\ntitle = ").is_err());
        assert!(Config::from_toml("[window]\nwidth = \"wide\"").is_err());
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let path = std::env::temp_dir().join("atom3d-config-that-does-not-exist.toml");
        let config = Config::load_from_path(&path).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn load_reads_file_from_disk() {
        let path = std::env::temp_dir().join(format!("atom3d-config-{}.toml", std::process::id()));
        std::fs::write(&path, "[debug]\nshow_fps = false\n").unwrap();

        let config = Config::load(Some(path.as_path()));
        std::fs::remove_file(&path).unwrap();

        let config = config.unwrap();
        assert!(!config.debug.show_fps);
        assert!(config.debug.validation_layers);
    }

    #[test]
    fn explicit_missing_path_is_an_error() {
        let err = Config::load(Some(Path::new("--help"))).unwrap_err();
        assert!(format!("{err:#}").contains("--help"), "{err:#}");

        let path = std::env::temp_dir().join("atom3d-explicit-config-that-does-not-exist.toml");
        assert!(Config::load(Some(path.as_path())).is_err());
    }

    #[test]
    fn explicit_path_with_bad_toml_is_an_error() {
        let path = std::env::temp_dir().join(format!("atom3d-bad-config-{}.toml", std::process::id()));
        std::fs::write(&path, "[graphics]\nmax_frames_in_flight = \"two\"\n").unwrap();

        let result = Config::load(Some(path.as_path()));
        std::fs::remove_file(&path).unwrap();

        assert!(result.is_err());
    }

    #[test]
    fn present_mode_names_map_to_vulkan() {
        let mut config = Config::default();
        for (name, mode) in [
            ("immediate", vk::PresentModeKHR::IMMEDIATE),
            ("Mailbox", vk::PresentModeKHR::MAILBOX),
            ("FIFO", vk::PresentModeKHR::FIFO),
            ("fifo_relaxed", vk::PresentModeKHR::FIFO_RELAXED),
            ("vsync-ish", vk::PresentModeKHR::MAILBOX),
        ] {
            config.graphics.present_mode = name.to_string();
            assert_eq!(config.present_mode(), mode, "{name}");
        }
    }

    #[test]
    fn frames_in_flight_is_clamped() {
        let mut config = Config::default();
        config.graphics.max_frames_in_flight = 0;
        assert_eq!(config.frames_in_flight(), 1);
        config.graphics.max_frames_in_flight = 3;
        assert_eq!(config.frames_in_flight(), 3);
        config.graphics.max_frames_in_flight = 64;
        assert_eq!(config.frames_in_flight(), MAX_FRAMES_IN_FLIGHT);
    }
}
