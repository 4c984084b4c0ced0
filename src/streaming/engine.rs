// src/streaming/engine.rs - Protocol engine streaming jobs to the plotter
//! The engine owns every piece of mutable streaming state and is driven by
//! repeated calls to [`StreamingEngine::step`]. Each step reads whatever the
//! device sent, handles complete response lines, dispatches as many
//! instructions as the device receive buffer can take, and polls status.
//!
//! Out-of-band instructions (tool swaps, feed hold/resume, retractions) go
//! through a priority queue drained ahead of the active job. Both share the
//! same [`SendWindow`] accounting.

use super::StreamingError;
use super::events::{EngineEvent, Telemetry};
use super::protocol::{self, JobPauseStatus, PlotterStatus};
use super::window::{Origin, SendWindow};
use crate::gcode::{Command, Instruction, InstructionContext, generator};
use crate::hardware::{Transport, TransportError};
use crate::job::{Job, JobProgress, JobSummary};
use plotter_shared::{PlotterSetting, PlotterSettings, Position, SerialConfig, Tool, ToolRegistry};
use serde::Serialize;
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use uuid::Uuid;

const READ_CHUNK: usize = 256;

#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Capacity of the device receive buffer, in bytes
    pub rx_buffer_size: usize,
    pub status_interval: Duration,
    pub loop_delay: Duration,
    pub event_capacity: usize,
}

impl From<&SerialConfig> for EngineOptions {
    fn from(config: &SerialConfig) -> Self {
        Self {
            rx_buffer_size: config.rx_buffer_size,
            status_interval: Duration::from_millis(config.status_interval_ms),
            loop_delay: Duration::from_millis(config.loop_delay_ms.max(1)),
            event_capacity: config.event_capacity.max(1),
        }
    }
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self::from(&SerialConfig::default())
    }
}

enum Connection {
    None,
    Real(Box<dyn Transport>),
    Virtual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectionKind {
    None,
    Real,
    Virtual,
}

/// Read-only view of the engine, refreshed by the engine task.
#[derive(Debug, Clone)]
pub struct EngineSnapshot {
    pub connection: ConnectionKind,
    pub status: PlotterStatus,
    pub loaded_tool: Tool,
    pub pause: JobPauseStatus,
    pub outstanding_bytes: usize,
    pub queued_priority_instructions: usize,
    pub active_job: Option<JobProgress>,
    pub completed_jobs: Vec<JobSummary>,
    pub settings: PlotterSettings,
}

impl Default for EngineSnapshot {
    fn default() -> Self {
        Self {
            connection: ConnectionKind::None,
            status: PlotterStatus::Disconnected,
            loaded_tool: Tool::Undefined,
            pause: JobPauseStatus::Ongoing,
            outstanding_bytes: 0,
            queued_priority_instructions: 0,
            active_job: None,
            completed_jobs: Vec::new(),
            settings: PlotterSettings::default(),
        }
    }
}

fn notified_tool(instruction: &Instruction) -> Option<Tool> {
    match instruction.command() {
        Command::ToolChangeNotification(tool) => Some(tool.clone()),
        _ => None,
    }
}

pub struct StreamingEngine {
    settings: PlotterSettings,
    tools: ToolRegistry,
    options: EngineOptions,
    connection: Connection,
    status: PlotterStatus,
    /// Tool physically on the carriage, as last confirmed by the device
    loaded_tool: Tool,
    /// Tool that will be on the carriage once queued swaps complete
    scheduled_tool: Tool,
    active_job: Option<Job>,
    completed_jobs: Vec<Job>,
    completed_summaries: Vec<JobSummary>,
    priority: VecDeque<Instruction>,
    window: SendWindow,
    rx_buffer: String,
    pause: JobPauseStatus,
    work_coordinate_offset: Position,
    last_status_request: Option<Instant>,
    events: mpsc::Sender<EngineEvent>,
}

impl StreamingEngine {
    pub fn new(
        settings: PlotterSettings,
        tools: ToolRegistry,
        options: EngineOptions,
        events: mpsc::Sender<EngineEvent>,
    ) -> Self {
        Self {
            settings,
            tools,
            window: SendWindow::new(options.rx_buffer_size),
            options,
            connection: Connection::None,
            status: PlotterStatus::Disconnected,
            loaded_tool: Tool::Undefined,
            scheduled_tool: Tool::Undefined,
            active_job: None,
            completed_jobs: Vec::new(),
            completed_summaries: Vec::new(),
            priority: VecDeque::new(),
            rx_buffer: String::new(),
            pause: JobPauseStatus::Ongoing,
            work_coordinate_offset: [0.0; 3],
            last_status_request: None,
            events,
        }
    }

    /// Build an engine together with the receiving end of its event channel.
    pub fn with_channel(
        settings: PlotterSettings,
        tools: ToolRegistry,
        options: EngineOptions,
    ) -> (Self, mpsc::Receiver<EngineEvent>) {
        let (tx, rx) = mpsc::channel(options.event_capacity.max(1));
        (Self::new(settings, tools, options, tx), rx)
    }

    pub fn context(&self) -> InstructionContext<'_> {
        InstructionContext::new(&self.settings, &self.tools)
    }

    fn emit(&self, event: EngineEvent) {
        match self.events.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                tracing::warn!("Event channel full, dropping {:?}", event);
            }
            // nobody is listening
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }

    fn set_status(&mut self, status: PlotterStatus) {
        if self.status != status {
            tracing::info!("Plotter status {:?} -> {:?}", self.status, status);
            self.status = status;
            self.emit(EngineEvent::StatusChanged(status));
        }
    }

    // ---- connection ----

    pub fn connect_transport(&mut self, transport: Box<dyn Transport>) -> Result<(), StreamingError> {
        if self.is_connected() {
            return Err(StreamingError::AlreadyConnected);
        }
        tracing::info!("Connected to {}", transport.name());
        self.connection = Connection::Real(transport);
        self.last_status_request = None;
        Ok(())
    }

    /// Connect to a simulated device that acknowledges every instruction at once.
    pub fn connect_virtual(&mut self) -> Result<(), StreamingError> {
        if self.is_connected() {
            return Err(StreamingError::AlreadyConnected);
        }
        tracing::info!("Connected to virtual plotter");
        self.connection = Connection::Virtual;
        self.last_status_request = None;
        self.set_status(PlotterStatus::Simulating);
        Ok(())
    }

    pub async fn disconnect(&mut self) -> Result<(), StreamingError> {
        if let Connection::Real(transport) = &mut self.connection {
            if let Err(e) = transport.close().await {
                tracing::warn!("Failed to close {}: {}", transport.name(), e);
            }
        }
        self.reset_connection("disconnected");
        Ok(())
    }

    /// Drop the link and every piece of accounting tied to it.
    fn reset_connection(&mut self, reason: &str) {
        self.connection = Connection::None;
        self.window.clear();
        self.priority.clear();
        self.rx_buffer.clear();
        self.pause = JobPauseStatus::Ongoing;
        self.last_status_request = None;
        self.scheduled_tool = self.loaded_tool.clone();
        if let Some(job) = self.active_job.take() {
            tracing::warn!("Job {} aborted: {}", job.id(), reason);
            self.emit(EngineEvent::JobAborted { job_id: job.id(), reason: reason.to_string() });
        }
        self.set_status(PlotterStatus::Disconnected);
    }

    // ---- protocol loop ----

    /// Run one iteration of the protocol loop. Never blocks for long.
    pub async fn step(&mut self) {
        if !self.is_connected() {
            return;
        }
        if let Err(e) = self.try_step().await {
            tracing::error!("Transport lost: {}", e);
            self.reset_connection("transport lost");
        }
    }

    async fn try_step(&mut self) -> Result<(), TransportError> {
        self.read_transport().await?;
        self.process_rx_lines();
        self.dispatch().await?;
        self.poll_status().await?;
        self.check_completion();
        Ok(())
    }

    async fn read_transport(&mut self) -> Result<(), TransportError> {
        if let Connection::Real(transport) = &mut self.connection {
            let mut buf = [0u8; READ_CHUNK];
            let n = transport.read_available(&mut buf).await?;
            if n > 0 {
                self.rx_buffer.push_str(&String::from_utf8_lossy(&buf[..n]));
            }
        }
        Ok(())
    }

    fn process_rx_lines(&mut self) {
        while let Some(pos) = self.rx_buffer.find('\n') {
            let line: String = self.rx_buffer.drain(..=pos).collect();
            let line = line.trim();
            if !line.is_empty() {
                self.handle_line(line);
            }
        }
    }

    fn handle_line(&mut self, line: &str) {
        tracing::trace!("RX: {}", line);
        if line == generator::ACK {
            self.retire_head(None);
        } else if line.starts_with(generator::ERROR_PREFIX) {
            // the device answers each line with either ok or error
            self.retire_head(Some(line));
        } else if line == generator::READY_BANNER {
            self.on_device_restart();
        } else if line.starts_with('<') {
            self.on_status_report(line);
        } else if line.starts_with('$')
            && self.window.head().is_some_and(|sent| sent.line == generator::READ_CONFIGURATION)
        {
            self.on_setting_line(line);
        } else if line.starts_with("ALARM") {
            let instruction = self.window.head().map(|s| s.line.clone()).unwrap_or_default();
            tracing::warn!("Plotter alarm: {}", line);
            self.emit(EngineEvent::DeviceError { instruction, message: line.to_string() });
        } else {
            tracing::debug!("Unhandled response: {}", line);
        }
    }

    /// The device discards its receive buffer and any feed hold when it restarts.
    fn on_device_restart(&mut self) {
        if !self.window.is_empty() || !self.priority.is_empty() {
            tracing::warn!(
                "Plotter restarted, dropping {} outstanding bytes and {} priority instructions",
                self.window.outstanding(),
                self.priority.len()
            );
        }
        self.window.clear();
        self.priority.clear();
        self.pause = JobPauseStatus::Ongoing;
        self.scheduled_tool = self.loaded_tool.clone();
        self.check_completion();

        tracing::info!("Plotter ready, reading its configuration");
        if let Err(e) = self.read_configuration() {
            tracing::warn!("Could not read plotter configuration: {}", e);
        }
    }

    fn retire_head(&mut self, error: Option<&str>) {
        let Some(sent) = self.window.ack() else {
            tracing::warn!("Unexpected response with nothing outstanding");
            return;
        };
        let now = Instant::now();
        tracing::debug!("Retired '{}' ({} bytes outstanding)", sent.line, self.window.outstanding());

        let confirmed = match &sent.origin {
            Origin::Job { job_id, index } => self
                .active_job
                .as_mut()
                .filter(|job| job.id() == *job_id)
                .and_then(|job| job.instruction_mut(*index))
                .and_then(|instruction| {
                    instruction.mark_acked(now);
                    notified_tool(instruction)
                }),
            Origin::Priority(instruction) => notified_tool(instruction),
        };

        match error {
            Some(message) => {
                tracing::warn!("Error for instruction {}: {}", sent.line, message);
                self.emit(EngineEvent::DeviceError { instruction: sent.line, message: message.to_string() });
            }
            None => {
                if let Some(tool) = confirmed {
                    self.confirm_loaded_tool(tool);
                }
            }
        }
        self.check_completion();
    }

    fn confirm_loaded_tool(&mut self, tool: Tool) {
        if tool.is_undefined() {
            tracing::warn!("Device confirmed an unknown tool, loaded tool stays {}", self.loaded_tool);
            return;
        }
        tracing::info!("Loaded tool: {}", tool);
        self.loaded_tool = tool.clone();
        self.emit(EngineEvent::LoadedToolChanged(tool));
    }

    fn on_status_report(&mut self, line: &str) {
        let report = match protocol::parse_status_report(line) {
            Ok(report) => report,
            Err(e) => {
                tracing::warn!("{}", e);
                return;
            }
        };
        if let Some(wco) = report.work_coordinate_offset {
            self.work_coordinate_offset = wco;
        }
        match report.status {
            Some(status) => self.set_status(status),
            None => tracing::warn!("Unknown machine state '{}'", report.machine_state),
        }
        if let Some((work_position, machine_position)) = report.positions(self.work_coordinate_offset) {
            self.emit(EngineEvent::Telemetry(Telemetry {
                work_position,
                machine_position,
                feedrate: report.feedrate,
                endstops: report.endstops,
            }));
        }
    }

    fn on_setting_line(&mut self, line: &str) {
        let (id, value) = match protocol::parse_setting_line(line) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::debug!("{}", e);
                return;
            }
        };
        let Some(setting) = PlotterSetting::from_grbl_id(id) else {
            tracing::trace!("Ignoring setting ${}", id);
            return;
        };
        // mm/min on the device, mm/s here
        let value = if setting.is_speed() { value / 60.0 } else { value };
        if self.settings.override_setting(setting, value) {
            self.emit(EngineEvent::SettingChanged { setting, value });
        }
    }

    async fn dispatch(&mut self) -> Result<(), TransportError> {
        let mut job_progressed = false;
        loop {
            let now = Instant::now();

            if let Some(instruction) = self.priority.front() {
                if let Command::ToolChange(tool) = instruction.command() {
                    let tool = tool.clone();
                    self.priority.pop_front();
                    self.schedule_tool_change(tool);
                    continue;
                }
                let line = instruction.to_stream([0.0; 2], &self.settings);
                if SendWindow::wire_len(&line) > self.window.capacity() {
                    tracing::error!("Instruction '{}' does not fit in the device buffer, skipped", line);
                    self.priority.pop_front();
                    continue;
                }
                if !self.window.fits(&line) {
                    break;
                }
                let Some(instruction) = self.priority.pop_front() else {
                    break;
                };
                tracing::debug!("Priority: {}", line);
                self.send_line(line, Origin::Priority(instruction), now).await?;
                continue;
            }

            if self.pause != JobPauseStatus::Ongoing {
                break;
            }
            let Some(job) = self.active_job.as_mut() else {
                break;
            };
            let Some(instruction) = job.current_instruction() else {
                break;
            };
            if let Command::ToolChange(tool) = instruction.command() {
                let tool = tool.clone();
                job.next_instruction();
                self.schedule_tool_change(tool);
                continue;
            }
            let line = instruction.to_stream(job.translation(), &self.settings);
            if SendWindow::wire_len(&line) > self.window.capacity() {
                tracing::error!("Instruction '{}' does not fit in the device buffer, skipped", line);
                job.next_instruction();
                continue;
            }
            if !self.window.fits(&line) {
                break;
            }
            let job_id = job.id();
            let index = job.cursor();
            job.mark_started();
            if let Some(instruction) = job.instruction_mut(index) {
                instruction.mark_sent(now);
            }
            job.next_instruction();
            self.send_line(line, Origin::Job { job_id, index }, now).await?;
            job_progressed = true;
        }

        if job_progressed {
            if let Some(job) = &self.active_job {
                self.emit(EngineEvent::Progress(job.progress()));
            }
        }
        Ok(())
    }

    async fn send_line(&mut self, line: String, origin: Origin, now: Instant) -> Result<(), TransportError> {
        let bytes = format!("{}\n", line);
        if !self.window.try_push(line, origin, now) {
            tracing::error!("Refusing to overflow the device buffer with '{}'", bytes.trim_end());
            return Ok(());
        }
        match &mut self.connection {
            Connection::Real(transport) => transport.write_all(bytes.as_bytes()).await?,
            Connection::Virtual => self.rx_buffer.push_str("ok\r\n"),
            Connection::None => return Err(TransportError::Closed),
        }
        tracing::trace!("TX: {}", bytes.trim_end());
        Ok(())
    }

    /// Queue the swap from the scheduled tool to `tool`. The loaded tool only
    /// changes once the device acknowledges the notification in the load sequence.
    fn schedule_tool_change(&mut self, tool: Tool) {
        if tool.is_undefined() {
            tracing::warn!("Tool change to an undefined tool ignored");
            return;
        }
        if tool == self.scheduled_tool {
            tracing::debug!("Tool {} already scheduled", tool);
            return;
        }
        tracing::info!("Tool change {} -> {}", self.scheduled_tool, tool);
        let gcode = generator::tool_change_sequence(&self.scheduled_tool, &tool);
        self.enqueue_priority_lines(&gcode);
        self.scheduled_tool = tool;
    }

    fn enqueue_priority_lines(&mut self, gcode: &str) {
        for line in gcode.split('\n').map(str::trim).filter(|l| !l.is_empty()) {
            let instruction = Instruction::detached(line, &self.context());
            self.priority.push_back(instruction);
        }
    }

    async fn poll_status(&mut self) -> Result<(), TransportError> {
        let now = Instant::now();
        if self
            .last_status_request
            .is_some_and(|at| now.duration_since(at) < self.options.status_interval)
        {
            return Ok(());
        }
        self.last_status_request = Some(now);

        if let Connection::Real(transport) = &mut self.connection {
            transport.write_all(generator::STATUS_QUERY.as_bytes()).await?;
        } else if matches!(self.connection, Connection::Virtual) {
            let position = self.active_job.as_ref().and_then(|job| {
                let end = job.current_instruction()?.end_position()?;
                let translation = job.translation();
                Some([end[0] + translation[0], end[1] + translation[1], end[2]])
            });
            if let Some(work_position) = position {
                self.emit(EngineEvent::Telemetry(Telemetry {
                    work_position,
                    machine_position: work_position,
                    feedrate: 0.0,
                    endstops: [false; 3],
                }));
            }
        }
        Ok(())
    }

    fn check_completion(&mut self) {
        let Some(job) = &self.active_job else {
            return;
        };
        if !job.is_done() {
            return;
        }
        if self.window.outstanding() > 0 || !self.priority.is_empty() {
            tracing::trace!(
                "Job {} sent, waiting for {} bytes and {} priority instructions",
                job.id(),
                self.window.outstanding(),
                self.priority.len()
            );
            return;
        }
        if let Some(job) = self.active_job.take() {
            let summary = job.summary();
            tracing::info!("Job {} completed ({} instructions)", job.id(), job.len());
            self.emit(EngineEvent::JobCompleted(summary.clone()));
            self.completed_jobs.push(job);
            self.completed_summaries.push(summary);
        }
    }

    // ---- operations ----

    pub fn start_job(&mut self, job: Job) -> Result<Uuid, StreamingError> {
        if let Err(e) = job.check_compatibility() {
            tracing::warn!("Job {} incompatible with plotter: {}", job.id(), e);
            return Err(StreamingError::IncompatibleJob(e));
        }
        if self.loaded_tool.is_undefined() && !job.can_run_with_unknown_tool() {
            tracing::warn!("Job {} needs the loaded tool to be defined first", job.id());
            return Err(StreamingError::UnknownLoadedTool);
        }
        if let Some(active) = &self.active_job {
            tracing::warn!("Cannot start job {} while job {} is running", job.id(), active.id());
            return Err(StreamingError::JobAlreadyActive);
        }
        if !self.is_connected() {
            return Err(StreamingError::NotConnected);
        }
        let id = job.id();
        tracing::info!(
            "Starting job {} ({} instructions, {:.1}s estimated)",
            id,
            job.len(),
            job.total_estimated_duration()
        );
        self.scheduled_tool = self.loaded_tool.clone();
        self.release_hold();
        self.emit(EngineEvent::JobStarted(job.summary()));
        self.active_job = Some(job);
        Ok(id)
    }

    /// Start a job swapping the loaded tool for `tool`. `Ok(None)` when nothing needs to move.
    pub fn start_change_tool_job(&mut self, tool: Tool) -> Result<Option<Uuid>, StreamingError> {
        if self.loaded_tool.is_undefined() {
            tracing::warn!("Cannot change tool until the initially loaded tool is defined");
            return Err(StreamingError::UnknownLoadedTool);
        }
        if tool.is_undefined() || tool == self.loaded_tool {
            tracing::info!("No tool change needed ({} loaded)", self.loaded_tool);
            return Ok(None);
        }
        let gcode = generator::tool_change_sequence(&self.loaded_tool, &tool);
        let job = Job::parse(&gcode, &self.loaded_tool, false, &self.context());
        self.start_job(job).map(Some)
    }

    pub fn set_initially_loaded_tool(&mut self, tool: Tool) -> Result<(), StreamingError> {
        if !self.loaded_tool.is_undefined() {
            tracing::warn!("The loaded tool is known ({}), start a tool change job instead", self.loaded_tool);
            return Err(StreamingError::LoadedToolAlreadyKnown);
        }
        tracing::info!("Initially loaded tool: {}", tool);
        self.loaded_tool = tool.clone();
        self.scheduled_tool = tool.clone();
        self.emit(EngineEvent::LoadedToolChanged(tool));
        Ok(())
    }

    fn start_maintenance_job(&mut self, gcode: &str) -> Result<Uuid, StreamingError> {
        let job = Job::parse(gcode, &self.loaded_tool, true, &self.context());
        self.start_job(job)
    }

    pub fn jog(&mut self, dx: f64, dy: f64, dz: f64, feedrate: f64) -> Result<Uuid, StreamingError> {
        self.start_maintenance_job(&generator::jog_motion(dx, dy, dz, feedrate))
    }

    pub fn home(&mut self) -> Result<Uuid, StreamingError> {
        self.start_maintenance_job(generator::HOME)
    }

    pub fn unlock(&mut self) -> Result<Uuid, StreamingError> {
        self.start_maintenance_job(generator::UNLOCK)
    }

    pub fn reset(&mut self) -> Result<Uuid, StreamingError> {
        self.start_maintenance_job(generator::RESET)
    }

    pub fn park(&mut self) -> Result<Uuid, StreamingError> {
        let gcode = generator::park(&self.settings);
        self.start_maintenance_job(&gcode)
    }

    pub fn read_configuration(&mut self) -> Result<Uuid, StreamingError> {
        self.start_maintenance_job(generator::READ_CONFIGURATION)
    }

    /// Clean pause. The instruction sequence is a plain feed hold until a
    /// retract-and-wait sequence is validated on hardware.
    pub fn pause_job(&mut self) -> Result<(), StreamingError> {
        if self.active_job.is_none() {
            return Err(StreamingError::NoActiveJob);
        }
        if self.pause == JobPauseStatus::Ongoing {
            tracing::info!("Pausing job");
            self.enqueue_priority_lines(generator::FEED_HOLD);
            self.pause = JobPauseStatus::CleanlyPaused;
        }
        Ok(())
    }

    pub fn emergency_pause(&mut self) -> Result<(), StreamingError> {
        if !self.is_connected() {
            return Err(StreamingError::NotConnected);
        }
        if self.pause == JobPauseStatus::Ongoing {
            tracing::warn!("Emergency pause");
            self.enqueue_priority_lines(generator::FEED_HOLD);
            self.pause = JobPauseStatus::EmergencyPaused;
        }
        Ok(())
    }

    pub fn resume_job(&mut self) -> Result<(), StreamingError> {
        self.release_hold();
        Ok(())
    }

    /// Cancel the rest of the active job and lift the pen out of the way.
    /// Lines already on the device still run.
    pub fn stop_job(&mut self) -> Result<(), StreamingError> {
        let Some(job) = self.active_job.as_mut() else {
            return Err(StreamingError::NoActiveJob);
        };
        tracing::info!("Stopping job {} at instruction {}/{}", job.id(), job.cursor(), job.len());
        job.cancel_job();
        self.release_hold();
        let retraction = generator::relative_fast_move(0.0, 0.0, generator::PAUSE_SAFE_HEIGHT, &self.settings);
        self.enqueue_priority_lines(&retraction);
        Ok(())
    }

    /// Queue a resume for any feed hold still in effect.
    fn release_hold(&mut self) {
        if self.pause != JobPauseStatus::Ongoing {
            tracing::info!("Releasing {:?} feed hold", self.pause);
            self.enqueue_priority_lines(generator::FEED_RESUME);
            self.pause = JobPauseStatus::Ongoing;
        }
    }

    pub fn clear_completed_jobs(&mut self) {
        self.completed_jobs.clear();
        self.completed_summaries.clear();
    }

    /// CSV comparison of estimated and measured durations for a completed job.
    pub fn duration_report(&self, job_id: Uuid) -> Option<Result<String, csv::Error>> {
        let job = self.completed_jobs.iter().find(|job| job.id() == job_id)?;
        let mut out = Vec::new();
        Some(job.write_duration_report(&mut out).map(|()| String::from_utf8_lossy(&out).into_owned()))
    }

    // ---- accessors ----

    pub fn is_connected(&self) -> bool {
        !matches!(self.connection, Connection::None)
    }

    pub fn connection_kind(&self) -> ConnectionKind {
        match self.connection {
            Connection::None => ConnectionKind::None,
            Connection::Real(_) => ConnectionKind::Real,
            Connection::Virtual => ConnectionKind::Virtual,
        }
    }

    pub fn status(&self) -> PlotterStatus {
        self.status
    }

    pub fn loaded_tool(&self) -> &Tool {
        &self.loaded_tool
    }

    pub fn pause_status(&self) -> JobPauseStatus {
        self.pause
    }

    pub fn active_job(&self) -> Option<&Job> {
        self.active_job.as_ref()
    }

    pub fn completed_jobs(&self) -> &[Job] {
        &self.completed_jobs
    }

    pub fn settings(&self) -> &PlotterSettings {
        &self.settings
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    pub fn outstanding_bytes(&self) -> usize {
        self.window.outstanding()
    }

    pub fn buffer_capacity(&self) -> usize {
        self.window.capacity()
    }

    pub fn queued_priority_instructions(&self) -> usize {
        self.priority.len()
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        EngineSnapshot {
            connection: self.connection_kind(),
            status: self.status,
            loaded_tool: self.loaded_tool.clone(),
            pause: self.pause,
            outstanding_bytes: self.window.outstanding(),
            queued_priority_instructions: self.priority.len(),
            active_job: self.active_job.as_ref().map(Job::progress),
            completed_jobs: self.completed_summaries.clone(),
            settings: self.settings.clone(),
        }
    }
}
