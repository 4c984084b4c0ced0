//! Plotter configuration: serial link, kinematic limits, inks and tool slots.
//!
//! ## Example: TOML Configuration
//!
//! ```toml
//! [serial]
//! port = "/dev/ttyUSB0"
//! baud = 115200
//!
//! [plotter]
//! is_core_xy = true
//! drawing_xy_max_speed = 60.0
//! flying_xy_max_speed = 180.0
//! xy_acceleration = 1200.0
//!
//! [[inks]]
//! name = "black"
//! color = 0x000000
//!
//! [[tools]]
//! ink = "black"
//! parking_x = 5.0
//! parking_y = 310.0
//! loading_instructions = "G0 X5 Y310\nG4P0;TOOL:0\n"
//! unloading_instructions = "G0 X5 Y310\nG4P0;TOOL:-1\n"
//! ```
//!
//! The kinematic limits in `[plotter]` are read once at startup; a subset of them
//! (see [`PlotterSetting`]) is later overridden by the values the device reports
//! in its `$$` configuration dump.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Main configuration struct: serial link, plotter kinematics, inks and tools.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub serial: SerialConfig,
    #[serde(default)]
    pub plotter: PlotterSettings,
    #[serde(default)]
    pub inks: Vec<InkConfig>,
    #[serde(default)]
    pub tools: Vec<ToolConfig>,
}

/// Serial link and streaming loop configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SerialConfig {
    #[serde(default)]
    pub port: String,
    #[serde(default = "default_baud")]
    pub baud: u32,
    /// Capacity of the device receive buffer, in bytes
    #[serde(default = "default_rx_buffer_size")]
    pub rx_buffer_size: usize,
    #[serde(default = "default_status_interval_ms")]
    pub status_interval_ms: u64,
    #[serde(default = "default_loop_delay_ms")]
    pub loop_delay_ms: u64,
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: "".to_string(),
            baud: default_baud(),
            rx_buffer_size: default_rx_buffer_size(),
            status_interval_ms: default_status_interval_ms(),
            loop_delay_ms: default_loop_delay_ms(),
            event_capacity: default_event_capacity(),
        }
    }
}

/// Kinematic limits and fixed positions of the plotter.
///
/// Speeds are in mm/s, accelerations in mm/s², positions in mm.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PlotterSettings {
    #[serde(default)]
    pub is_core_xy: bool,
    #[serde(default = "default_drawing_xy_max_speed")]
    pub drawing_xy_max_speed: f64,
    #[serde(default = "default_flying_xy_max_speed")]
    pub flying_xy_max_speed: f64,
    #[serde(default = "default_jog_speed")]
    pub jog_speed: f64,
    #[serde(default = "default_xy_acceleration")]
    pub xy_acceleration: f64,
    #[serde(default = "default_z_acceleration")]
    pub z_acceleration: f64,
    #[serde(default = "default_z_max_speed")]
    pub z_max_speed: f64,
    #[serde(default)]
    pub drawing_area_width: f64,
    #[serde(default)]
    pub drawing_area_height: f64,
    #[serde(default)]
    pub drawing_area_x: f64,
    #[serde(default)]
    pub drawing_area_y: f64,
    #[serde(default)]
    pub parking_x: f64,
    #[serde(default)]
    pub parking_y: f64,
    #[serde(default = "default_parking_z")]
    pub parking_z: f64,
    #[serde(default)]
    pub reachable_area_width: f64,
    #[serde(default)]
    pub reachable_area_height: f64,
}

impl Default for PlotterSettings {
    fn default() -> Self {
        Self {
            is_core_xy: false,
            drawing_xy_max_speed: default_drawing_xy_max_speed(),
            flying_xy_max_speed: default_flying_xy_max_speed(),
            jog_speed: default_jog_speed(),
            xy_acceleration: default_xy_acceleration(),
            z_acceleration: default_z_acceleration(),
            z_max_speed: default_z_max_speed(),
            drawing_area_width: 0.0,
            drawing_area_height: 0.0,
            drawing_area_x: 0.0,
            drawing_area_y: 0.0,
            parking_x: 0.0,
            parking_y: 0.0,
            parking_z: default_parking_z(),
            reachable_area_width: 0.0,
            reachable_area_height: 0.0,
        }
    }
}

/// Settings that the device configuration dump may override at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlotterSetting {
    FlyingXyMaxSpeed,
    ZMaxSpeed,
    XyAcceleration,
    ZAcceleration,
    ReachableAreaWidth,
    ReachableAreaHeight,
}

impl PlotterSetting {
    /// Map a GRBL `$<id>` setting number to the plotter setting it drives.
    pub fn from_grbl_id(id: u32) -> Option<Self> {
        match id {
            110 | 111 => Some(Self::FlyingXyMaxSpeed),
            112 => Some(Self::ZMaxSpeed),
            120 | 121 => Some(Self::XyAcceleration),
            122 => Some(Self::ZAcceleration),
            130 => Some(Self::ReachableAreaWidth),
            131 => Some(Self::ReachableAreaHeight),
            _ => None,
        }
    }

    /// True for settings the device reports in mm/min instead of mm/s.
    pub fn is_speed(&self) -> bool {
        matches!(self, Self::FlyingXyMaxSpeed | Self::ZMaxSpeed)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::FlyingXyMaxSpeed => "flying_xy_max_speed",
            Self::ZMaxSpeed => "z_max_speed",
            Self::XyAcceleration => "xy_acceleration",
            Self::ZAcceleration => "z_acceleration",
            Self::ReachableAreaWidth => "reachable_area_width",
            Self::ReachableAreaHeight => "reachable_area_height",
        }
    }
}

impl std::fmt::Display for PlotterSetting {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl PlotterSettings {
    pub fn value(&self, setting: PlotterSetting) -> f64 {
        match setting {
            PlotterSetting::FlyingXyMaxSpeed => self.flying_xy_max_speed,
            PlotterSetting::ZMaxSpeed => self.z_max_speed,
            PlotterSetting::XyAcceleration => self.xy_acceleration,
            PlotterSetting::ZAcceleration => self.z_acceleration,
            PlotterSetting::ReachableAreaWidth => self.reachable_area_width,
            PlotterSetting::ReachableAreaHeight => self.reachable_area_height,
        }
    }

    /// Override a setting for the current session. Returns true if the value changed.
    pub fn override_setting(&mut self, setting: PlotterSetting, value: f64) -> bool {
        let previous = self.value(setting);
        if previous == value {
            return false;
        }
        tracing::info!("Overriding {}, set at {} instead of {}", setting, value, previous);
        let slot = match setting {
            PlotterSetting::FlyingXyMaxSpeed => &mut self.flying_xy_max_speed,
            PlotterSetting::ZMaxSpeed => &mut self.z_max_speed,
            PlotterSetting::XyAcceleration => &mut self.xy_acceleration,
            PlotterSetting::ZAcceleration => &mut self.z_acceleration,
            PlotterSetting::ReachableAreaWidth => &mut self.reachable_area_width,
            PlotterSetting::ReachableAreaHeight => &mut self.reachable_area_height,
        };
        *slot = value;
        true
    }

    pub fn validate(&self) -> Result<(), String> {
        let limits = [
            ("drawing_xy_max_speed", self.drawing_xy_max_speed),
            ("flying_xy_max_speed", self.flying_xy_max_speed),
            ("xy_acceleration", self.xy_acceleration),
            ("z_acceleration", self.z_acceleration),
            ("z_max_speed", self.z_max_speed),
        ];
        for (name, value) in limits {
            if !(value > 0.0) {
                return Err(format!("{} must be > 0 (got {})", name, value));
            }
        }
        Ok(())
    }
}

/// A drawing ink. The color doubles as the `T<n>` tool id in instruction streams.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct InkConfig {
    pub name: String,
    pub color: u32,
}

/// A tool slot holding the pen for one ink.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ToolConfig {
    pub ink: String,
    #[serde(default)]
    pub parking_x: f64,
    #[serde(default)]
    pub parking_y: f64,
    #[serde(default)]
    pub loading_instructions: String,
    #[serde(default)]
    pub unloading_instructions: String,
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.plotter.validate().map_err(ConfigError::Invalid)?;
        if self.serial.rx_buffer_size < 2 {
            return Err(ConfigError::Invalid("serial.rx_buffer_size must be >= 2".to_string()));
        }
        if self.serial.event_capacity == 0 {
            return Err(ConfigError::Invalid("serial.event_capacity must be > 0".to_string()));
        }
        let mut colors = HashSet::new();
        let mut names = HashSet::new();
        for ink in &self.inks {
            if !colors.insert(ink.color) {
                return Err(ConfigError::Invalid(format!(
                    "ink '{}' reuses color 0x{:06x}, already registered",
                    ink.name, ink.color
                )));
            }
            if !names.insert(ink.name.as_str()) {
                return Err(ConfigError::Invalid(format!("duplicate ink name '{}'", ink.name)));
            }
        }
        let mut equipped = HashSet::new();
        for tool in &self.tools {
            if !names.contains(tool.ink.as_str()) {
                return Err(ConfigError::Invalid(format!("tool references unknown ink '{}'", tool.ink)));
            }
            if !equipped.insert(tool.ink.as_str()) {
                return Err(ConfigError::Invalid(format!("ink '{}' is mapped to several tools", tool.ink)));
            }
        }
        Ok(())
    }
}

fn default_baud() -> u32 { 115200 }
fn default_rx_buffer_size() -> usize { 128 }
fn default_status_interval_ms() -> u64 { 100 }
fn default_loop_delay_ms() -> u64 { 1 }
fn default_event_capacity() -> usize { 256 }
fn default_drawing_xy_max_speed() -> f64 { 50.0 }
fn default_flying_xy_max_speed() -> f64 { 150.0 }
fn default_jog_speed() -> f64 { 50.0 }
fn default_xy_acceleration() -> f64 { 1000.0 }
fn default_z_acceleration() -> f64 { 500.0 }
fn default_z_max_speed() -> f64 { 20.0 }
fn default_parking_z() -> f64 { 30.0 }

pub fn load_config(path: &str) -> Result<Config, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
        tracing::error!("Failed to read config file '{}': {}", path, e);
        ConfigError::Io(e)
    })?;
    let config: Config = toml::from_str(&contents).map_err(|e| {
        tracing::error!("Failed to parse config TOML: {}", e);
        ConfigError::Toml(e)
    })?;
    config.validate()?;
    Ok(config)
}
