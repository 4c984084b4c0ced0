// src/streaming/protocol.rs - Parsing of device responses
//! Status frames follow the GRBL 1.1 real-time report format:
//! `<Idle|MPos:0.000,0.000,0.000|FS:0,0|WCO:0.000,0.000,0.000>`.

use plotter_shared::Position;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PlotterStatus {
    Disconnected,
    Idle,
    Run,
    Hold,
    Jog,
    Alarm,
    Door,
    Check,
    Home,
    Sleep,
    Simulating,
}

impl PlotterStatus {
    /// Map a GRBL machine state, sub-state suffix (`Hold:0`) removed.
    pub fn from_machine_state(state: &str) -> Option<Self> {
        match state {
            "Idle" => Some(Self::Idle),
            "Run" => Some(Self::Run),
            "Hold" => Some(Self::Hold),
            "Jog" => Some(Self::Jog),
            "Alarm" => Some(Self::Alarm),
            "Door" => Some(Self::Door),
            "Check" => Some(Self::Check),
            "Home" => Some(Self::Home),
            "Sleep" => Some(Self::Sleep),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum JobPauseStatus {
    Ongoing,
    EmergencyPaused,
    CleanlyPaused,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProtocolError {
    #[error("Malformed status report '{0}'")]
    MalformedStatus(String),
    #[error("Malformed setting line '{0}'")]
    MalformedSetting(String),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct StatusReport {
    pub machine_state: String,
    /// `None` when the machine state is not one we know
    pub status: Option<PlotterStatus>,
    pub machine_position: Option<Position>,
    pub work_position: Option<Position>,
    pub work_coordinate_offset: Option<Position>,
    pub feedrate: f64,
    pub endstops: [bool; 3],
}

impl StatusReport {
    /// Work and machine positions, deriving the missing one from `wco`.
    pub fn positions(&self, wco: Position) -> Option<(Position, Position)> {
        match (self.work_position, self.machine_position) {
            (Some(work), Some(machine)) => Some((work, machine)),
            (None, Some(m)) => Some(([m[0] - wco[0], m[1] - wco[1], m[2] - wco[2]], m)),
            (Some(w), None) => Some((w, [w[0] + wco[0], w[1] + wco[1], w[2] + wco[2]])),
            (None, None) => None,
        }
    }
}

fn parse_triplet(value: &str, frame: &str) -> Result<Position, ProtocolError> {
    let malformed = || ProtocolError::MalformedStatus(frame.to_string());
    let mut out = [0.0; 3];
    let mut parts = value.split(',');
    for slot in out.iter_mut() {
        *slot = parts.next().ok_or_else(malformed)?.trim().parse().map_err(|_| malformed())?;
    }
    Ok(out)
}

pub fn parse_status_report(frame: &str) -> Result<StatusReport, ProtocolError> {
    let malformed = || ProtocolError::MalformedStatus(frame.to_string());
    let body = frame.strip_prefix('<').and_then(|f| f.strip_suffix('>')).ok_or_else(malformed)?;
    let mut fields = body.split('|');
    let state = fields.next().unwrap_or("");
    let state = state.split(':').next().unwrap_or(state);

    let mut report = StatusReport {
        machine_state: state.to_string(),
        status: PlotterStatus::from_machine_state(state),
        ..Default::default()
    };
    for field in fields {
        let Some((key, value)) = field.split_once(':') else {
            continue;
        };
        match key {
            "MPos" => report.machine_position = Some(parse_triplet(value, frame)?),
            "WPos" => report.work_position = Some(parse_triplet(value, frame)?),
            "WCO" => report.work_coordinate_offset = Some(parse_triplet(value, frame)?),
            "F" | "FS" => {
                let feed = value.split(',').next().unwrap_or("");
                report.feedrate = feed.trim().parse().map_err(|_| malformed())?;
            }
            "Pn" => {
                for (axis, letter) in ['X', 'Y', 'Z'].into_iter().enumerate() {
                    report.endstops[axis] = value.contains(letter);
                }
            }
            _ => {}
        }
    }
    Ok(report)
}

/// Parse a `$<id>=<value>` configuration line.
pub fn parse_setting_line(line: &str) -> Result<(u32, f64), ProtocolError> {
    let malformed = || ProtocolError::MalformedSetting(line.to_string());
    let (id, value) = line.strip_prefix('$').and_then(|l| l.split_once('=')).ok_or_else(malformed)?;
    let id = id.trim().parse().map_err(|_| malformed())?;
    let value = value.trim().parse().map_err(|_| malformed())?;
    Ok((id, value))
}
