// src/streaming/mod.rs - Streaming engine and the async handle driving it
//! [`StreamingManager`] spawns a [`StreamingEngine`] on its own task and talks
//! to it through a request channel. Callers read state from a shared snapshot
//! refreshed by the engine task, and observe it through a bounded event channel.

pub mod engine;
pub mod events;
pub mod protocol;
pub mod window;

pub use engine::{ConnectionKind, EngineOptions, EngineSnapshot, StreamingEngine};
pub use events::{EngineEvent, Telemetry};
pub use protocol::{JobPauseStatus, PlotterStatus, ProtocolError};
pub use window::SendWindow;

use crate::hardware::{self, SerialTransport, Transport, TransportError};
use crate::job::{Job, JobError};
use plotter_shared::{PlotterSettings, Tool, ToolRegistry};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{RwLock, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StreamingError {
    #[error("Not connected to a plotter")]
    NotConnected,
    #[error("Already connected")]
    AlreadyConnected,
    #[error("A job is already running")]
    JobAlreadyActive,
    #[error("No job is running")]
    NoActiveJob,
    #[error("The loaded tool is unknown")]
    UnknownLoadedTool,
    #[error("The loaded tool is already known")]
    LoadedToolAlreadyKnown,
    #[error("Job incompatible with plotter: {0}")]
    IncompatibleJob(#[from] JobError),
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("Streaming engine stopped")]
    EngineStopped,
}

type Reply<T> = oneshot::Sender<Result<T, StreamingError>>;

/// Requests sent from a [`StreamingManager`] handle to the engine task.
pub enum EngineRequest {
    ConnectTransport { transport: Box<dyn Transport>, respond_to: Reply<()> },
    ConnectVirtual { respond_to: Reply<()> },
    Disconnect { respond_to: Reply<()> },
    StartJob { job: Box<Job>, respond_to: Reply<Uuid> },
    StartChangeToolJob { tool: Tool, respond_to: Reply<Option<Uuid>> },
    SetInitiallyLoadedTool { tool: Tool, respond_to: Reply<()> },
    Jog { dx: f64, dy: f64, dz: f64, feedrate: f64, respond_to: Reply<Uuid> },
    Home { respond_to: Reply<Uuid> },
    Unlock { respond_to: Reply<Uuid> },
    Reset { respond_to: Reply<Uuid> },
    Park { respond_to: Reply<Uuid> },
    ReadConfiguration { respond_to: Reply<Uuid> },
    PauseJob { respond_to: Reply<()> },
    EmergencyPause { respond_to: Reply<()> },
    ResumeJob { respond_to: Reply<()> },
    StopJob { respond_to: Reply<()> },
    ClearCompletedJobs { respond_to: Reply<()> },
    DurationReport { job_id: Uuid, respond_to: Reply<Option<String>> },
    ParseJob { text: String, can_run_with_unknown_tool: bool, respond_to: Reply<Job> },
}

async fn handle_request(engine: &mut StreamingEngine, request: EngineRequest) {
    // a dropped receiver only means the caller stopped waiting
    match request {
        EngineRequest::ConnectTransport { transport, respond_to } => {
            let _ = respond_to.send(engine.connect_transport(transport));
        }
        EngineRequest::ConnectVirtual { respond_to } => {
            let _ = respond_to.send(engine.connect_virtual());
        }
        EngineRequest::Disconnect { respond_to } => {
            let _ = respond_to.send(engine.disconnect().await);
        }
        EngineRequest::StartJob { job, respond_to } => {
            let _ = respond_to.send(engine.start_job(*job));
        }
        EngineRequest::StartChangeToolJob { tool, respond_to } => {
            let _ = respond_to.send(engine.start_change_tool_job(tool));
        }
        EngineRequest::SetInitiallyLoadedTool { tool, respond_to } => {
            let _ = respond_to.send(engine.set_initially_loaded_tool(tool));
        }
        EngineRequest::Jog { dx, dy, dz, feedrate, respond_to } => {
            let _ = respond_to.send(engine.jog(dx, dy, dz, feedrate));
        }
        EngineRequest::Home { respond_to } => {
            let _ = respond_to.send(engine.home());
        }
        EngineRequest::Unlock { respond_to } => {
            let _ = respond_to.send(engine.unlock());
        }
        EngineRequest::Reset { respond_to } => {
            let _ = respond_to.send(engine.reset());
        }
        EngineRequest::Park { respond_to } => {
            let _ = respond_to.send(engine.park());
        }
        EngineRequest::ReadConfiguration { respond_to } => {
            let _ = respond_to.send(engine.read_configuration());
        }
        EngineRequest::PauseJob { respond_to } => {
            let _ = respond_to.send(engine.pause_job());
        }
        EngineRequest::EmergencyPause { respond_to } => {
            let _ = respond_to.send(engine.emergency_pause());
        }
        EngineRequest::ResumeJob { respond_to } => {
            let _ = respond_to.send(engine.resume_job());
        }
        EngineRequest::StopJob { respond_to } => {
            let _ = respond_to.send(engine.stop_job());
        }
        EngineRequest::ClearCompletedJobs { respond_to } => {
            engine.clear_completed_jobs();
            let _ = respond_to.send(Ok(()));
        }
        EngineRequest::DurationReport { job_id, respond_to } => {
            let report = match engine.duration_report(job_id) {
                Some(Ok(csv)) => Some(csv),
                Some(Err(e)) => {
                    tracing::warn!("Failed to build duration report for job {}: {}", job_id, e);
                    None
                }
                None => None,
            };
            let _ = respond_to.send(Ok(report));
        }
        EngineRequest::ParseJob { text, can_run_with_unknown_tool, respond_to } => {
            let job = Job::parse(&text, engine.loaded_tool(), can_run_with_unknown_tool, &engine.context());
            let _ = respond_to.send(Ok(job));
        }
    }
}

/// Handle to a streaming engine running on its own task.
pub struct StreamingManager {
    requests: mpsc::Sender<EngineRequest>,
    snapshot: Arc<RwLock<EngineSnapshot>>,
    tools: ToolRegistry,
    baud: u32,
    task: JoinHandle<()>,
}

impl StreamingManager {
    /// Spawn the engine task. Must be called from within a tokio runtime.
    pub fn spawn(
        settings: PlotterSettings,
        tools: ToolRegistry,
        options: EngineOptions,
        baud: u32,
    ) -> (Self, mpsc::Receiver<EngineEvent>) {
        let (mut engine, events) = StreamingEngine::with_channel(settings, tools.clone(), options);
        let (requests, mut request_rx) = mpsc::channel::<EngineRequest>(32);
        let snapshot = Arc::new(RwLock::new(engine.snapshot()));
        let shared = snapshot.clone();

        let task = tokio::spawn(async move {
            let mut tick = interval(engine.options().loop_delay.max(Duration::from_millis(1)));
            tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    request = request_rx.recv() => match request {
                        Some(request) => handle_request(&mut engine, request).await,
                        None => break,
                    },
                    _ = tick.tick() => engine.step().await,
                }
                *shared.write().await = engine.snapshot();
            }
            if engine.is_connected() {
                let _ = engine.disconnect().await;
            }
            *shared.write().await = engine.snapshot();
            tracing::debug!("Streaming engine task stopped");
        });

        (Self { requests, snapshot, tools, baud, task }, events)
    }

    async fn call<T>(&self, make: impl FnOnce(Reply<T>) -> EngineRequest) -> Result<T, StreamingError> {
        let (tx, rx) = oneshot::channel();
        self.requests.send(make(tx)).await.map_err(|_| StreamingError::EngineStopped)?;
        rx.await.map_err(|_| StreamingError::EngineStopped)?
    }

    pub fn available_ports() -> Vec<String> {
        hardware::available_ports()
    }

    /// Open a serial port and hand it to the engine.
    pub async fn connect(&self, port: &str) -> Result<(), StreamingError> {
        let transport = SerialTransport::open(port, self.baud)?;
        self.connect_transport(Box::new(transport)).await
    }

    pub async fn connect_transport(&self, transport: Box<dyn Transport>) -> Result<(), StreamingError> {
        self.call(|respond_to| EngineRequest::ConnectTransport { transport, respond_to }).await
    }

    pub async fn connect_virtual(&self) -> Result<(), StreamingError> {
        self.call(|respond_to| EngineRequest::ConnectVirtual { respond_to }).await
    }

    pub async fn disconnect(&self) -> Result<(), StreamingError> {
        self.call(|respond_to| EngineRequest::Disconnect { respond_to }).await
    }

    pub async fn start_job(&self, job: Job) -> Result<Uuid, StreamingError> {
        self.call(|respond_to| EngineRequest::StartJob { job: Box::new(job), respond_to }).await
    }

    pub async fn start_change_tool_job(&self, tool: Tool) -> Result<Option<Uuid>, StreamingError> {
        self.call(|respond_to| EngineRequest::StartChangeToolJob { tool, respond_to }).await
    }

    pub async fn set_initially_loaded_tool(&self, tool: Tool) -> Result<(), StreamingError> {
        self.call(|respond_to| EngineRequest::SetInitiallyLoadedTool { tool, respond_to }).await
    }

    pub async fn jog(&self, dx: f64, dy: f64, dz: f64, feedrate: f64) -> Result<Uuid, StreamingError> {
        self.call(|respond_to| EngineRequest::Jog { dx, dy, dz, feedrate, respond_to }).await
    }

    pub async fn home(&self) -> Result<Uuid, StreamingError> {
        self.call(|respond_to| EngineRequest::Home { respond_to }).await
    }

    pub async fn unlock(&self) -> Result<Uuid, StreamingError> {
        self.call(|respond_to| EngineRequest::Unlock { respond_to }).await
    }

    pub async fn reset(&self) -> Result<Uuid, StreamingError> {
        self.call(|respond_to| EngineRequest::Reset { respond_to }).await
    }

    pub async fn park(&self) -> Result<Uuid, StreamingError> {
        self.call(|respond_to| EngineRequest::Park { respond_to }).await
    }

    pub async fn read_configuration(&self) -> Result<Uuid, StreamingError> {
        self.call(|respond_to| EngineRequest::ReadConfiguration { respond_to }).await
    }

    pub async fn pause_job(&self) -> Result<(), StreamingError> {
        self.call(|respond_to| EngineRequest::PauseJob { respond_to }).await
    }

    pub async fn emergency_pause(&self) -> Result<(), StreamingError> {
        self.call(|respond_to| EngineRequest::EmergencyPause { respond_to }).await
    }

    pub async fn resume_job(&self) -> Result<(), StreamingError> {
        self.call(|respond_to| EngineRequest::ResumeJob { respond_to }).await
    }

    pub async fn stop_job(&self) -> Result<(), StreamingError> {
        self.call(|respond_to| EngineRequest::StopJob { respond_to }).await
    }

    pub async fn clear_completed_jobs(&self) -> Result<(), StreamingError> {
        self.call(|respond_to| EngineRequest::ClearCompletedJobs { respond_to }).await
    }

    pub async fn duration_report(&self, job_id: Uuid) -> Result<Option<String>, StreamingError> {
        self.call(|respond_to| EngineRequest::DurationReport { job_id, respond_to }).await
    }

    pub async fn snapshot(&self) -> EngineSnapshot {
        self.snapshot.read().await.clone()
    }

    pub async fn status(&self) -> PlotterStatus {
        self.snapshot.read().await.status
    }

    pub async fn loaded_tool(&self) -> Tool {
        self.snapshot.read().await.loaded_tool.clone()
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Parse a job against the engine's current settings and loaded tool.
    pub async fn parse_job(&self, text: &str, can_run_with_unknown_tool: bool) -> Result<Job, StreamingError> {
        let text = text.to_string();
        self.call(|respond_to| EngineRequest::ParseJob { text, can_run_with_unknown_tool, respond_to }).await
    }

    /// Stop the engine task, disconnecting first.
    pub async fn shutdown(self) {
        drop(self.requests);
        if let Err(e) = self.task.await {
            tracing::error!("Streaming engine task failed: {}", e);
        }
    }
}
