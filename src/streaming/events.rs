// src/streaming/events.rs - Notifications flowing from the engine to observers
use super::protocol::PlotterStatus;
use crate::job::{JobProgress, JobSummary};
use plotter_shared::{PlotterSetting, Position, Tool};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub struct Telemetry {
    pub work_position: Position,
    pub machine_position: Position,
    pub feedrate: f64,
    pub endstops: [bool; 3],
}

#[derive(Debug, Clone)]
pub enum EngineEvent {
    StatusChanged(PlotterStatus),
    /// Fired once the device confirmed the swap, not when it was requested
    LoadedToolChanged(Tool),
    Telemetry(Telemetry),
    SettingChanged { setting: PlotterSetting, value: f64 },
    JobStarted(JobSummary),
    Progress(JobProgress),
    JobCompleted(JobSummary),
    JobAborted { job_id: Uuid, reason: String },
    /// An `error`/`ALARM` response, with the line it answered
    DeviceError { instruction: String, message: String },
}
