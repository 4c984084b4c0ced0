// plotter_shared: configuration, kinematics and tool definitions shared by the host and its tests

pub mod config;
pub mod kinematics;
pub mod tool;

pub use config::{
    Config, ConfigError, InkConfig, PlotterSetting, PlotterSettings, SerialConfig, ToolConfig, load_config,
};
pub use kinematics::{AxisLimits, axis_travel_duration, speed_to_feedrate, xyz_travel_duration};
pub use tool::{Ink, Tool, ToolRegistry, ToolSlot};

/// A 3-axis position in mm (X, Y, Z).
pub type Position = [f64; 3];
