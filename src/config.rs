// =============================================================================
// CONFIGURATION - Load settings from swarm.toml
// =============================================================================
//
// Every section is optional; missing keys take the defaults below. The
// helpers turn sections into the create-info structs the device expects.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

use crate::types::{
    DeviceCreateInfo, InstanceCreateInfo, PresentMode, RenderPassCreateInfo, SwapchainCreateInfo,
    TextureFormat,
};

pub const CONFIG_FILE: &str = "swarm.toml";

/// Root configuration structure
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub instance: InstanceConfig,
    pub device: DeviceConfig,
    pub swapchain: SwapchainConfig,
    pub frame: FrameConfig,
    pub debug: DebugConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct InstanceConfig {
    pub application_name: String,
    pub application_version: u32,
}

impl Default for InstanceConfig {
    fn default() -> Self {
        Self {
            application_name: "swarm".to_string(),
            application_version: 0,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub prefer_discrete_gpu: bool,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            prefer_discrete_gpu: true,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SwapchainConfig {
    pub present_mode: String,
    pub width: u32,
    pub height: u32,
}

impl Default for SwapchainConfig {
    fn default() -> Self {
        Self {
            present_mode: "fifo".to_string(),
            width: 1280,
            height: 720,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct FrameConfig {
    pub frames_in_flight: usize,
    pub clear_color: [f32; 4],
    pub clear_depth: f32,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            frames_in_flight: crate::frame::DEFAULT_FRAMES_IN_FLIGHT,
            clear_color: [0.0, 0.0, 0.0, 1.0],
            clear_depth: 1.0,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    pub validation_layers: bool,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            validation_layers: true,
        }
    }
}

impl Config {
    /// Load `swarm.toml` from the working directory, falling back to
    /// defaults if it is missing or broken.
    pub fn load() -> Self {
        Self::load_from_path(CONFIG_FILE).unwrap_or_else(|e| {
            log::warn!("Failed to load {}: {:#}. Using defaults.", CONFIG_FILE, e);
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

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        log::info!("Loaded configuration from {:?}", path);
        log::debug!("Config: {:?}", config);

        Ok(config)
    }

    pub fn present_mode(&self) -> PresentMode {
        match self.swapchain.present_mode.to_lowercase().as_str() {
            "immediate" => PresentMode::Immediate,
            "mailbox" => PresentMode::Mailbox,
            "fifo" => PresentMode::Fifo,
            "fifo_relaxed" => PresentMode::FifoRelaxed,
            _ => {
                log::warn!(
                    "Unknown present mode '{}', defaulting to FIFO",
                    self.swapchain.present_mode
                );
                PresentMode::Fifo
            }
        }
    }

    /// Validation is only ever enabled in debug builds.
    pub fn instance_info(&self) -> InstanceCreateInfo {
        InstanceCreateInfo {
            application_name: self.instance.application_name.clone(),
            application_version: self.instance.application_version,
            debug: cfg!(debug_assertions) && self.debug.validation_layers,
        }
    }

    pub fn device_info(&self) -> DeviceCreateInfo {
        DeviceCreateInfo {
            prefer_discrete_gpu: self.device.prefer_discrete_gpu,
        }
    }

    pub fn swapchain_info(&self) -> SwapchainCreateInfo {
        SwapchainCreateInfo {
            width: self.swapchain.width,
            height: self.swapchain.height,
            present_mode: self.present_mode(),
        }
    }

    pub fn render_pass_info(&self, depth_format: Option<TextureFormat>) -> RenderPassCreateInfo {
        RenderPassCreateInfo {
            depth_format,
            clear_color: self.frame.clear_color,
            clear_depth: self.frame.clear_depth,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from_path(dir.path().join(CONFIG_FILE)).unwrap();
        assert_eq!(config.frame.frames_in_flight, 1);
        assert_eq!(config.present_mode(), PresentMode::Fifo);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[swapchain]\npresent_mode = \"Mailbox\"\nwidth = 800\n\n[frame]\nframes_in_flight = 2"
        )
        .unwrap();

        let config = Config::load_from_path(file.path()).unwrap();
        let swapchain = config.swapchain_info();
        assert_eq!(swapchain.present_mode, PresentMode::Mailbox);
        assert_eq!((swapchain.width, swapchain.height), (800, 720));
        assert_eq!(config.frame.frames_in_flight, 2);
        assert_eq!(config.instance.application_name, "swarm");
    }

    #[test]
    fn unknown_present_mode_falls_back_to_fifo() {
        let mut config = Config::default();
        config.swapchain.present_mode = "triple".to_string();
        assert_eq!(config.present_mode(), PresentMode::Fifo);
    }

    #[test]
    fn malformed_file_reports_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[frame\nclear_depth = ").unwrap();

        let err = Config::load_from_path(file.path()).unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to parse config file"));
    }

    #[test]
    fn render_pass_info_uses_frame_section() {
        let mut config = Config::default();
        config.frame.clear_color = [0.1, 0.2, 0.8, 1.0];
        let info = config.render_pass_info(Some(TextureFormat::D32Sfloat));
        assert_eq!(info.clear_color, [0.1, 0.2, 0.8, 1.0]);
        assert_eq!(info.clear_depth, 1.0);
        assert_eq!(info.depth_format, Some(TextureFormat::D32Sfloat));
    }
}
