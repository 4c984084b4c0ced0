// src/gcode/generator.rs - Synthesis of the G-code lines the host sends on its own behalf

use plotter_shared::{PlotterSettings, Tool, speed_to_feedrate};

/// Response acknowledging one buffered instruction
pub const ACK: &str = "ok";
/// Prefix of a device error response
pub const ERROR_PREFIX: &str = "error";
/// Real-time status query; bypasses the receive buffer and gets no ACK
pub const STATUS_QUERY: &str = "?";
pub const READ_CONFIGURATION: &str = "$$";
pub const HOME: &str = "$H";
pub const UNLOCK: &str = "$X";
pub const RESET: &str = "\x18";
pub const FEED_HOLD: &str = "!";
pub const FEED_RESUME: &str = "~";
/// Banner printed by the device once it is ready to receive instructions
pub const READY_BANNER: &str = "[MSG:'$H'|'$X' to unlock]";
/// Dwell carrying the id of the tool now on the carriage, ACKed once the swap is physically done
pub const TOOL_CHANGE_NOTIFICATION_PREFIX: &str = "G4P0;TOOL:";
/// Height of the retraction issued when a job is stopped, in mm
pub const PAUSE_SAFE_HEIGHT: f64 = 30.0;

fn move_line(code: &str, feedrate: f64, x: Option<f64>, y: Option<f64>, z: Option<f64>) -> String {
    let mut line = format!("{} F{:.0}", code, feedrate);
    for (letter, value) in [('X', x), ('Y', y), ('Z', z)] {
        if let Some(value) = value {
            line.push_str(&format!(" {}{:.4}", letter, value));
        }
    }
    line
}

/// `G0` move at the flying speed. Axes left as `None` are not moved.
pub fn fast_linear_move(x: Option<f64>, y: Option<f64>, z: Option<f64>, settings: &PlotterSettings) -> String {
    let feedrate = speed_to_feedrate(settings.flying_xy_max_speed, settings.is_core_xy);
    move_line("G0", feedrate, x, y, z)
}

/// `G1` move at the drawing speed. Axes left as `None` are not moved.
pub fn loaded_linear_move(x: Option<f64>, y: Option<f64>, z: Option<f64>, settings: &PlotterSettings) -> String {
    let feedrate = speed_to_feedrate(settings.drawing_xy_max_speed, settings.is_core_xy);
    move_line("G1", feedrate, x, y, z)
}

/// Relative fast move wrapped in `G91`/`G90`, one instruction per line.
pub fn relative_fast_move(dx: f64, dy: f64, dz: f64, settings: &PlotterSettings) -> String {
    let feedrate = speed_to_feedrate(settings.flying_xy_max_speed, settings.is_core_xy);
    format!("G91\nX{:.4} Y{:.4} Z{:.4} F{:.0}\nG90\n", dx, dy, dz, feedrate)
}

pub fn jog_motion(dx: f64, dy: f64, dz: f64, feedrate: f64) -> String {
    format!("$J=G21 G91 X{:.4} Y{:.4} Z{:.4} F{:.0}\n", dx, dy, dz, feedrate)
}

/// Move to the configured parking position in a single fast move.
pub fn park(settings: &PlotterSettings) -> String {
    fast_linear_move(Some(settings.parking_x), Some(settings.parking_y), Some(settings.parking_z), settings)
}

/// The notification line reporting `tool` as loaded; `-1` stands for the empty carriage.
pub fn tool_change_notification(tool: &Tool) -> String {
    let id = tool.ink().map(|ink| i64::from(ink.color)).unwrap_or(-1);
    format!("{}{}", TOOL_CHANGE_NOTIFICATION_PREFIX, id)
}

/// Text swapping `from` for `to`: the unload sequence of the first followed by
/// the load sequence of the second. Sentinel tools contribute nothing.
pub fn tool_change_sequence(from: &Tool, to: &Tool) -> String {
    let mut gcode = String::new();
    if let Some(slot) = from.slot() {
        gcode.push_str(&slot.unload_instructions);
        if !gcode.is_empty() && !gcode.ends_with('\n') {
            gcode.push('\n');
        }
    }
    if let Some(slot) = to.slot() {
        gcode.push_str(&slot.load_instructions);
    }
    gcode
}
