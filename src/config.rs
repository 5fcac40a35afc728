// =============================================================================
// CONFIGURATION - Load settings from config.toml
// =============================================================================
//
// Every section falls back to its defaults, so a missing file or a partial
// file still yields a complete configuration.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::backend::selector::RequiredFeature;

/// Root configuration structure
#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub graphics: GraphicsConfig,
    pub device: DeviceConfig,
    pub shaders: ShaderConfig,
    pub debug: DebugConfig,
}

/// Window settings
#[derive(Debug, Deserialize, Clone)]
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
            title: "vFrame".to_string(),
            width: 800,
            height: 600,
            resizable: true,
        }
    }
}

/// Graphics settings
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct GraphicsConfig {
    /// Preferred present mode; FIFO is used when the surface lacks it
    pub present_mode: String,
    pub clear_color: [f32; 4],
    /// Upper bound for fence and acquire waits. Unset means wait forever.
    pub fence_timeout_ms: Option<u64>,
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            present_mode: "mailbox".to_string(),
            clear_color: [0.1, 0.1, 0.1, 1.0],
            fence_timeout_ms: None,
        }
    }
}

/// Physical device selection policy
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DeviceConfig {
    /// Devices missing any of these score 0
    pub required_features: Vec<RequiredFeature>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            required_features: vec![RequiredFeature::GeometryShader],
        }
    }
}

/// Compiled shader locations
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ShaderConfig {
    pub vertex: String,
    pub fragment: String,
    pub entry_point: String,
}

impl Default for ShaderConfig {
    fn default() -> Self {
        Self {
            vertex: "shaders/strip.vert.spv".to_string(),
            fragment: "shaders/strip.frag.spv".to_string(),
            entry_point: "main".to_string(),
        }
    }
}

/// Debug settings
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DebugConfig {
    pub validation_layers: bool,
    pub log_level: String,
    pub show_fps: bool,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            validation_layers: true,
            log_level: "info".to_string(),
            show_fps: true,
        }
    }
}

impl Config {
    /// Load configuration from file, falling back to defaults if not found
    pub fn load() -> Self {
        Self::load_from_path("config.toml").unwrap_or_else(|e| {
            log::warn!("Failed to load config.toml: {:#}. Using defaults.", e);
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

        let config = Self::from_toml_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        log::info!("Loaded configuration from {:?}", path);
        log::debug!("Config: {:?}", config);

        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Get the preferred present mode as a Vulkan enum
    pub fn preferred_present_mode(&self) -> ash::vk::PresentModeKHR {
        match self.graphics.present_mode.to_lowercase().as_str() {
            "immediate" => ash::vk::PresentModeKHR::IMMEDIATE,
            "mailbox" => ash::vk::PresentModeKHR::MAILBOX,
            "fifo" => ash::vk::PresentModeKHR::FIFO,
            "fifo_relaxed" => ash::vk::PresentModeKHR::FIFO_RELAXED,
            _ => {
                log::warn!(
                    "Unknown present mode '{}', defaulting to MAILBOX",
                    self.graphics.present_mode
                );
                ash::vk::PresentModeKHR::MAILBOX
            }
        }
    }

    pub fn fence_timeout(&self) -> Option<Duration> {
        self.graphics.fence_timeout_ms.map(Duration::from_millis)
    }

    /// Validation is only ever enabled in debug builds
    pub fn validation_enabled(&self) -> bool {
        cfg!(debug_assertions) && self.debug.validation_layers
    }
}
