// src/lib.rs - plotter-rs: G-code streaming engine for pen plotters
pub mod gcode;
pub mod hardware;
pub mod job;
pub mod streaming;

pub use plotter_shared;
pub use plotter_shared::{Config, Ink, PlotterSettings, Position, Tool, ToolRegistry};
