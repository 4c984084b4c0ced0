// tests/streaming.rs - Protocol engine against a scripted device
mod common;

use common::{BLACK, FakeDevice, RED, drain, options, registry, settings};
use plotter_rs::Tool;
use plotter_rs::job::{Job, JobError};
use plotter_rs::streaming::{
    EngineEvent, JobPauseStatus, PlotterStatus, StreamingEngine, StreamingError, StreamingManager,
};
use std::time::Duration;
use tokio::sync::mpsc;

fn connected(device: &FakeDevice, rx_buffer_size: usize) -> (StreamingEngine, mpsc::Receiver<EngineEvent>) {
    let (mut engine, events) = StreamingEngine::with_channel(settings(), registry(), options(rx_buffer_size));
    engine.connect_transport(device.transport()).unwrap();
    (engine, events)
}

fn job(engine: &StreamingEngine, text: &str) -> Job {
    Job::parse(text, engine.loaded_tool(), false, &engine.context())
}

fn tool(engine: &StreamingEngine, color: u32) -> Tool {
    let ink = engine.tools().ink_by_color(color).unwrap();
    engine.tools().tool_by_ink(ink)
}

async fn run_until_idle(engine: &mut StreamingEngine, device: &FakeDevice) {
    for _ in 0..100 {
        device.ack_all();
        engine.step().await;
        if engine.active_job().is_none() && engine.outstanding_bytes() == 0 {
            return;
        }
    }
    panic!("engine never went idle");
}

fn ten_lines() -> String {
    (10..20).map(|i| format!("G1 X{i} Y{i}\n")).collect()
}

#[tokio::test]
async fn acks_retire_lines_in_send_order() {
    let device = FakeDevice::new();
    let (mut engine, _events) = connected(&device, 128);
    engine.set_initially_loaded_tool(Tool::None).unwrap();
    let job = job(&engine, "G0 X1 Y1\nG1 X2 Y2\nG1 X3 Y3");
    engine.start_job(job).unwrap();

    engine.step().await;
    let lines = device.lines();
    assert_eq!(lines, vec![
        "G0 F9000 X1.0000 Y1.0000 Z0.0000",
        "G1 F3000 X2.0000 Y2.0000 Z0.0000",
        "G1 F3000 X3.0000 Y3.0000 Z0.0000",
    ]);
    let total: usize = lines.iter().map(|l| l.len() + 1).sum();
    assert_eq!(engine.outstanding_bytes(), total);

    device.ack(1);
    engine.step().await;
    assert_eq!(engine.outstanding_bytes(), total - (lines[0].len() + 1));
    let active = engine.active_job().unwrap();
    assert!(active.instructions()[0].acked_at().is_some());
    assert!(active.instructions()[1].acked_at().is_none());

    device.ack(2);
    engine.step().await;
    assert_eq!(engine.outstanding_bytes(), 0);
    assert!(engine.active_job().is_none());
    assert_eq!(engine.completed_jobs().len(), 1);
    assert!(engine.completed_jobs()[0].instructions().iter().all(|i| i.measured_duration().is_some()));
}

#[tokio::test]
async fn dispatch_stops_at_buffer_capacity() {
    let device = FakeDevice::new();
    let (mut engine, _events) = connected(&device, 128);
    engine.set_initially_loaded_tool(Tool::None).unwrap();
    let job = job(&engine, &ten_lines());
    engine.start_job(job).unwrap();

    // each rendered line takes 35 bytes
    engine.step().await;
    assert_eq!(device.lines().len(), 3);
    assert_eq!(engine.outstanding_bytes(), 105);
    assert_eq!(engine.active_job().unwrap().cursor(), 3);

    engine.step().await;
    assert_eq!(device.lines().len(), 3);

    device.ack(1);
    engine.step().await;
    assert_eq!(device.lines().len(), 4);
    assert_eq!(engine.outstanding_bytes(), 105);
    assert_eq!(device.occupancy(), engine.outstanding_bytes());
}

#[tokio::test]
async fn loaded_tool_changes_only_when_notification_is_acked() {
    let device = FakeDevice::new();
    let (mut engine, mut events) = connected(&device, 128);
    let black = tool(&engine, BLACK);
    let red = tool(&engine, RED);
    engine.set_initially_loaded_tool(black.clone()).unwrap();
    let job = job(&engine, "G1 X1 Y1\nT16711680\nG1 X2 Y2");
    engine.start_job(job).unwrap();
    drain(&mut events);

    engine.step().await;
    assert_eq!(device.lines(), vec![
        "G1 F3000 X1.0000 Y1.0000 Z0.0000",
        "G0 X5 Y300",
        "G4P0;TOOL:-1",
        "G0 X15 Y300",
        "G4P0;TOOL:16711680",
        "G1 F3000 X2.0000 Y2.0000 Z0.0000",
    ]);
    assert_eq!(engine.loaded_tool(), &black);

    device.ack(2);
    engine.step().await;
    assert_eq!(engine.loaded_tool(), &black);

    device.ack(1);
    engine.step().await;
    assert_eq!(engine.loaded_tool(), &Tool::None);

    device.ack(1);
    engine.step().await;
    assert_eq!(engine.loaded_tool(), &Tool::None);

    device.ack(1);
    engine.step().await;
    assert_eq!(engine.loaded_tool(), &red);

    device.ack(1);
    engine.step().await;
    assert!(engine.active_job().is_none());

    let changes: Vec<Tool> = drain(&mut events)
        .into_iter()
        .filter_map(|event| match event {
            EngineEvent::LoadedToolChanged(tool) => Some(tool),
            _ => None,
        })
        .collect();
    assert_eq!(changes, vec![Tool::None, red]);
}

#[tokio::test]
async fn virtual_plotter_runs_job_to_completion() {
    let (mut engine, mut events) = StreamingEngine::with_channel(settings(), registry(), options(128));
    engine.connect_virtual().unwrap();
    assert_eq!(engine.status(), PlotterStatus::Simulating);
    let black = tool(&engine, BLACK);
    let red = tool(&engine, RED);
    engine.set_initially_loaded_tool(black).unwrap();
    let text = format!("{}T16711680\n{}", ten_lines(), ten_lines());
    let job = job(&engine, &text);
    let job_id = engine.start_job(job).unwrap();

    for _ in 0..200 {
        engine.step().await;
        if engine.active_job().is_none() {
            break;
        }
    }
    assert!(engine.active_job().is_none());
    assert_eq!(engine.completed_jobs().len(), 1);
    assert_eq!(engine.loaded_tool(), &red);
    assert_eq!(engine.outstanding_bytes(), 0);

    let completed = drain(&mut events)
        .into_iter()
        .any(|event| matches!(event, EngineEvent::JobCompleted(summary) if summary.id == job_id));
    assert!(completed);

    let report = engine.duration_report(job_id).unwrap().unwrap();
    assert_eq!(report.lines().count(), 1 + 21);
    assert!(report.starts_with("id,instruction_type,instruction,estimated_duration,measured_duration"));
}

#[tokio::test]
async fn error_response_is_reported_and_streaming_continues() {
    let device = FakeDevice::new();
    let (mut engine, mut events) = connected(&device, 128);
    engine.set_initially_loaded_tool(Tool::None).unwrap();
    let job = job(&engine, "G0 X1 Y1\nG0 X2 Y2");
    engine.start_job(job).unwrap();
    engine.step().await;
    let first = device.lines()[0].clone();

    device.respond("error:20\r\nok\r\n");
    engine.step().await;

    assert!(engine.is_connected());
    assert_eq!(engine.outstanding_bytes(), 0);
    assert_eq!(engine.completed_jobs().len(), 1);
    let errors: Vec<(String, String)> = drain(&mut events)
        .into_iter()
        .filter_map(|event| match event {
            EngineEvent::DeviceError { instruction, message } => Some((instruction, message)),
            _ => None,
        })
        .collect();
    assert_eq!(errors, vec![(first, "error:20".to_string())]);
}

#[tokio::test]
async fn transport_loss_resets_streaming_state() {
    let device = FakeDevice::new();
    let (mut engine, mut events) = connected(&device, 128);
    device.respond("<Idle|MPos:0.000,0.000,0.000|FS:0,0>\r\n");
    engine.step().await;
    assert_eq!(engine.status(), PlotterStatus::Idle);

    engine.set_initially_loaded_tool(Tool::None).unwrap();
    let job = job(&engine, &ten_lines());
    let job_id = engine.start_job(job).unwrap();
    engine.step().await;
    engine.emergency_pause().unwrap();
    assert!(engine.outstanding_bytes() > 0);
    drain(&mut events);

    device.cut();
    engine.step().await;

    assert!(!engine.is_connected());
    assert_eq!(engine.status(), PlotterStatus::Disconnected);
    assert_eq!(engine.outstanding_bytes(), 0);
    assert_eq!(engine.queued_priority_instructions(), 0);
    assert_eq!(engine.pause_status(), JobPauseStatus::Ongoing);
    assert!(engine.active_job().is_none());
    assert!(engine.completed_jobs().is_empty());

    let events = drain(&mut events);
    assert!(events.iter().any(|e| matches!(e, EngineEvent::JobAborted { job_id: id, .. } if *id == job_id)));
    assert!(events.iter().any(|e| matches!(e, EngineEvent::StatusChanged(PlotterStatus::Disconnected))));

    let replacement = FakeDevice::new();
    engine.connect_transport(replacement.transport()).unwrap();
    let job = crate::job(&engine, "G0 X1 Y1");
    engine.start_job(job).unwrap();
    engine.step().await;
    assert_eq!(replacement.lines().len(), 1);
}

#[tokio::test]
async fn disconnect_closes_transport() {
    let device = FakeDevice::new();
    let (mut engine, _events) = connected(&device, 128);
    engine.disconnect().await.unwrap();
    assert!(device.is_closed());
    assert!(!engine.is_connected());
    assert!(matches!(engine.connect_virtual(), Ok(())));
    assert!(matches!(engine.connect_virtual(), Err(StreamingError::AlreadyConnected)));
}

#[tokio::test]
async fn status_reports_update_status_and_telemetry() {
    let device = FakeDevice::new();
    let (mut engine, mut events) = connected(&device, 128);

    device.respond("<Run|MPos:10.000,20.000,0.000|FS:500,0|WCO:1.000,2.000,0.000>\r\n");
    engine.step().await;
    device.respond("<Run|MPos:11.000,20.000,0.000|FS:500,0>\r\n");
    engine.step().await;

    assert_eq!(engine.status(), PlotterStatus::Run);
    let events = drain(&mut events);
    let statuses: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            EngineEvent::StatusChanged(status) => Some(*status),
            _ => None,
        })
        .collect();
    assert_eq!(statuses, vec![PlotterStatus::Run]);

    let positions: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            EngineEvent::Telemetry(t) => Some(t.work_position),
            _ => None,
        })
        .collect();
    assert_eq!(positions, vec![[9.0, 18.0, 0.0], [10.0, 18.0, 0.0]]);
    assert!(device.status_queries() >= 1);
}

#[tokio::test]
async fn configuration_dump_overrides_settings() {
    let device = FakeDevice::new();
    let (mut engine, mut events) = connected(&device, 128);

    // the ready banner triggers a configuration read
    device.respond("\r\nGrbl 1.1h ['$' for help]\r\n[MSG:'$H'|'$X' to unlock]\r\n");
    engine.step().await;
    assert_eq!(device.lines(), vec!["$$"]);

    device.respond("$110=6000.000\r\n$120=800.000\r\n$999=1\r\nok\r\n");
    engine.step().await;

    assert_eq!(engine.settings().flying_xy_max_speed, 100.0);
    assert_eq!(engine.settings().xy_acceleration, 800.0);
    assert!(engine.active_job().is_none());
    let changed = drain(&mut events)
        .into_iter()
        .filter(|e| matches!(e, EngineEvent::SettingChanged { .. }))
        .count();
    assert_eq!(changed, 2);
}

#[tokio::test]
async fn start_job_refusals() {
    let (mut engine, _events) = StreamingEngine::with_channel(settings(), registry(), options(128));
    let maintenance = Job::parse("G0 X1 Y1", engine.loaded_tool(), true, &engine.context());
    assert!(matches!(engine.start_job(maintenance), Err(StreamingError::NotConnected)));

    let device = FakeDevice::new();
    engine.connect_transport(device.transport()).unwrap();

    let relative = job(&engine, "G91\nG0 X1 Y1");
    assert!(matches!(
        engine.start_job(relative),
        Err(StreamingError::IncompatibleJob(JobError::RelativeCoordinates { line: 1 }))
    ));

    let drawing = job(&engine, "G0 X1 Y1");
    assert!(matches!(engine.start_job(drawing), Err(StreamingError::UnknownLoadedTool)));
    assert!(matches!(engine.start_change_tool_job(Tool::None), Err(StreamingError::UnknownLoadedTool)));

    engine.set_initially_loaded_tool(Tool::None).unwrap();
    assert!(matches!(
        engine.set_initially_loaded_tool(Tool::None),
        Err(StreamingError::LoadedToolAlreadyKnown)
    ));

    let drawing = job(&engine, "G0 X1 Y1");
    engine.start_job(drawing).unwrap();
    let second = job(&engine, "G0 X2 Y2");
    assert!(matches!(engine.start_job(second), Err(StreamingError::JobAlreadyActive)));
    assert!(matches!(engine.home(), Err(StreamingError::JobAlreadyActive)));
    assert!(matches!(engine.park(), Err(StreamingError::JobAlreadyActive)));
    assert!(matches!(engine.jog(1.0, 0.0, 0.0, 600.0), Err(StreamingError::JobAlreadyActive)));
}

#[tokio::test]
async fn change_tool_job_swaps_tools() {
    let device = FakeDevice::new();
    let (mut engine, _events) = connected(&device, 128);
    let black = tool(&engine, BLACK);
    let red = tool(&engine, RED);
    engine.set_initially_loaded_tool(black.clone()).unwrap();

    assert!(matches!(engine.start_change_tool_job(black), Ok(None)));
    assert!(matches!(engine.start_change_tool_job(red.clone()), Ok(Some(_))));
    run_until_idle(&mut engine, &device).await;

    assert_eq!(engine.loaded_tool(), &red);
    // job lines are re-rendered, unlike the raw priority queue
    assert_eq!(device.lines(), vec![
        "G0 F9000 X5.0000 Y300.0000 Z0.0000",
        "G4P0;TOOL:-1",
        "G0 F9000 X15.0000 Y300.0000 Z0.0000",
        "G4P0;TOOL:16711680",
    ]);
}

#[tokio::test]
async fn emergency_pause_holds_job_lines_until_resume() {
    let device = FakeDevice::new();
    let (mut engine, _events) = connected(&device, 128);
    engine.set_initially_loaded_tool(Tool::None).unwrap();
    let job = job(&engine, &ten_lines());
    engine.start_job(job).unwrap();
    engine.step().await;
    assert_eq!(device.lines().len(), 3);

    engine.emergency_pause().unwrap();
    assert_eq!(engine.pause_status(), JobPauseStatus::EmergencyPaused);
    device.ack(2);
    engine.step().await;
    let lines = device.lines();
    assert_eq!(lines.len(), 4);
    assert_eq!(lines[3], "!");
    assert_eq!(engine.active_job().unwrap().cursor(), 3);

    engine.resume_job().unwrap();
    assert_eq!(engine.pause_status(), JobPauseStatus::Ongoing);
    engine.step().await;
    let lines = device.lines();
    assert_eq!(lines[4], "~");
    assert!(lines[5].starts_with("G1 F3000 X13.0000"));

    run_until_idle(&mut engine, &device).await;
    assert_eq!(engine.completed_jobs().len(), 1);
}

#[tokio::test]
async fn new_job_releases_a_stale_feed_hold() {
    let device = FakeDevice::new();
    let (mut engine, _events) = connected(&device, 128);
    engine.set_initially_loaded_tool(Tool::None).unwrap();

    // hold with nothing running, then home
    engine.emergency_pause().unwrap();
    engine.step().await;
    engine.home().unwrap();
    assert_eq!(engine.pause_status(), JobPauseStatus::Ongoing);
    run_until_idle(&mut engine, &device).await;
    assert_eq!(device.lines(), vec!["!", "~", "$H"]);

    // hold landing after the last line went out
    let first = job(&engine, "G0 X1 Y1");
    engine.start_job(first).unwrap();
    engine.step().await;
    engine.emergency_pause().unwrap();
    run_until_idle(&mut engine, &device).await;
    assert_eq!(engine.completed_jobs().len(), 2);
    assert_eq!(engine.pause_status(), JobPauseStatus::EmergencyPaused);

    let second = job(&engine, "G0 X2 Y2");
    engine.start_job(second).unwrap();
    run_until_idle(&mut engine, &device).await;
    let lines = device.lines();
    assert_eq!(&lines[3..], [
        "G0 F9000 X1.0000 Y1.0000 Z0.0000",
        "!",
        "~",
        "G0 F9000 X2.0000 Y2.0000 Z0.0000",
    ]);
    assert_eq!(engine.completed_jobs().len(), 3);
}

#[tokio::test]
async fn tool_change_to_unknown_color_is_skipped() {
    let device = FakeDevice::new();
    let (mut engine, mut events) = connected(&device, 128);
    let black = tool(&engine, BLACK);
    engine.set_initially_loaded_tool(black.clone()).unwrap();
    drain(&mut events);

    // blue has an ink but no slot, 123456 is no ink at all
    let job = job(&engine, "G1 X1 Y1\nT255\nT123456\nG1 X2 Y2");
    assert!(job.is_compatible_with_plotter());
    engine.start_job(job).unwrap();
    run_until_idle(&mut engine, &device).await;

    let lines = device.lines();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].starts_with("G1 F3000 X1.0000 Y1.0000"));
    assert!(lines[1].starts_with("G1 F3000 X2.0000 Y2.0000"));
    assert_eq!(engine.loaded_tool(), &black);
    assert_eq!(engine.completed_jobs().len(), 1);

    let events = drain(&mut events);
    assert!(!events.iter().any(|e| matches!(e, EngineEvent::LoadedToolChanged(_))));
    assert!(!events.iter().any(|e| matches!(e, EngineEvent::JobAborted { .. })));
}

#[tokio::test]
async fn device_restart_clears_unacknowledged_reset() {
    let device = FakeDevice::new();
    let (mut engine, _events) = connected(&device, 128);
    engine.set_initially_loaded_tool(Tool::None).unwrap();
    engine.reset().unwrap();
    engine.step().await;
    assert_eq!(device.lines(), vec!["\x18"]);
    assert_eq!(engine.outstanding_bytes(), 2);

    // the device drops its buffer and never answers the reset line
    device.respond("\r\nGrbl 1.1h ['$' for help]\r\n[MSG:'$H'|'$X' to unlock]\r\n");
    engine.step().await;

    assert_eq!(engine.completed_jobs().len(), 1);
    assert_eq!(device.lines(), vec!["\x18", "$$"]);
    assert_eq!(engine.outstanding_bytes(), 3);

    device.respond("ok\r\n");
    engine.step().await;
    assert!(engine.active_job().is_none());
    assert_eq!(engine.completed_jobs().len(), 2);
    assert!(engine.home().is_ok());
}

#[tokio::test]
async fn pause_requests_need_a_job_or_a_connection() {
    let (mut engine, _events) = StreamingEngine::with_channel(settings(), registry(), options(128));
    assert!(matches!(engine.emergency_pause(), Err(StreamingError::NotConnected)));
    engine.connect_virtual().unwrap();
    assert!(matches!(engine.pause_job(), Err(StreamingError::NoActiveJob)));
    assert!(matches!(engine.stop_job(), Err(StreamingError::NoActiveJob)));
    assert!(engine.emergency_pause().is_ok());
}

#[tokio::test]
async fn stop_job_retracts_the_pen() {
    let device = FakeDevice::new();
    let (mut engine, _events) = connected(&device, 128);
    engine.set_initially_loaded_tool(Tool::None).unwrap();
    let job = job(&engine, &ten_lines());
    engine.start_job(job).unwrap();
    engine.step().await;

    engine.stop_job().unwrap();
    assert!(engine.active_job().unwrap().is_done());
    run_until_idle(&mut engine, &device).await;

    let lines = device.lines();
    assert_eq!(lines.len(), 6);
    assert_eq!(&lines[3..], ["G91", "X0.0000 Y0.0000 Z30.0000 F9000", "G90"]);
    assert_eq!(engine.completed_jobs().len(), 1);
}

#[tokio::test]
async fn manager_streams_to_virtual_plotter() {
    let tools = registry();
    let black = tools.tool_by_ink(tools.ink_by_color(BLACK).unwrap());
    let (manager, mut events) = StreamingManager::spawn(settings(), tools, options(128), 115_200);

    manager.connect_virtual().await.unwrap();
    manager.set_initially_loaded_tool(black).await.unwrap();
    let job = manager.parse_job(&ten_lines(), false).await.unwrap();
    let job_id = manager.start_job(job).await.unwrap();

    let completed = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await {
                Some(EngineEvent::JobCompleted(summary)) if summary.id == job_id => return summary,
                Some(_) => {}
                None => panic!("engine stopped"),
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(completed.instructions, 10);

    assert!(manager.duration_report(job_id).await.unwrap().is_some());
    assert!(matches!(manager.pause_job().await, Err(StreamingError::NoActiveJob)));

    manager.disconnect().await.unwrap();
    manager.shutdown().await;
}
