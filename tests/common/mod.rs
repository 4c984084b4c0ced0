// Shared helpers for integration tests: a scripted in-memory device and a small tool setup
#![allow(dead_code)]

use async_trait::async_trait;
use plotter_rs::hardware::{Transport, TransportError};
use plotter_rs::plotter_shared::{InkConfig, ToolConfig};
use plotter_rs::streaming::{EngineEvent, EngineOptions};
use plotter_rs::{PlotterSettings, ToolRegistry};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

pub const BLACK: u32 = 0x000000;
pub const RED: u32 = 0xff0000;
pub const BLUE: u32 = 0x0000ff;

#[derive(Default)]
struct DeviceState {
    incoming: VecDeque<u8>,
    written: Vec<String>,
    acked: usize,
    cut: bool,
    closed: bool,
}

/// In-memory plotter: tests script its responses and inspect what the host wrote.
#[derive(Clone, Default)]
pub struct FakeDevice {
    state: Arc<Mutex<DeviceState>>,
}

struct FakeTransport {
    device: FakeDevice,
}

impl FakeDevice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn transport(&self) -> Box<dyn Transport> {
        Box::new(FakeTransport { device: self.clone() })
    }

    pub fn respond(&self, text: &str) {
        self.state.lock().unwrap().incoming.extend(text.bytes());
    }

    /// Acknowledge the `count` oldest unacknowledged lines.
    pub fn ack(&self, count: usize) {
        self.state.lock().unwrap().acked += count;
        self.respond(&"ok\r\n".repeat(count));
    }

    pub fn unacked(&self) -> usize {
        self.lines().len() - self.state.lock().unwrap().acked
    }

    pub fn ack_all(&self) {
        self.ack(self.unacked());
    }

    /// Bytes sitting in the device receive buffer: written lines not yet acknowledged.
    pub fn occupancy(&self) -> usize {
        let acked = self.state.lock().unwrap().acked;
        self.lines().iter().skip(acked).map(|line| line.len() + 1).sum()
    }

    /// Make every further read or write fail, as an unplugged cable would.
    pub fn cut(&self) {
        self.state.lock().unwrap().cut = true;
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }

    /// Buffered lines written by the host, status queries excluded.
    pub fn lines(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .written
            .iter()
            .filter(|chunk| chunk.as_str() != "?")
            .map(|chunk| chunk.trim_end_matches('\n').to_string())
            .collect()
    }

    pub fn status_queries(&self) -> usize {
        self.state.lock().unwrap().written.iter().filter(|c| c.as_str() == "?").count()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn read_available(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let mut state = self.device.state.lock().unwrap();
        if state.cut {
            return Err(TransportError::Closed);
        }
        let n = buf.len().min(state.incoming.len());
        for (slot, byte) in buf.iter_mut().zip(state.incoming.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    async fn write_all(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        let mut state = self.device.state.lock().unwrap();
        if state.cut {
            return Err(TransportError::Closed);
        }
        state.written.push(String::from_utf8_lossy(bytes).into_owned());
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.device.state.lock().unwrap().closed = true;
        Ok(())
    }

    fn name(&self) -> String {
        "fake".to_string()
    }
}

pub fn load_sequence(color: u32, parking_x: f64) -> String {
    format!("G0 X{parking_x} Y300\nG4P0;TOOL:{color}\n")
}

pub fn unload_sequence(parking_x: f64) -> String {
    format!("G0 X{parking_x} Y300\nG4P0;TOOL:-1\n")
}

/// Black and red inks with tool slots, blue ink without one.
pub fn registry() -> ToolRegistry {
    let inks = vec![
        InkConfig { name: "black".into(), color: BLACK },
        InkConfig { name: "red".into(), color: RED },
        InkConfig { name: "blue".into(), color: BLUE },
    ];
    let tools = [("black", BLACK, 5.0), ("red", RED, 15.0)]
        .into_iter()
        .map(|(ink, color, x)| ToolConfig {
            ink: ink.into(),
            parking_x: x,
            parking_y: 300.0,
            loading_instructions: load_sequence(color, x),
            unloading_instructions: unload_sequence(x),
        })
        .collect::<Vec<_>>();
    ToolRegistry::from_config(&inks, &tools).unwrap()
}

pub fn settings() -> PlotterSettings {
    PlotterSettings::default()
}

/// Options that keep status polling out of the way of the test script.
pub fn options(rx_buffer_size: usize) -> EngineOptions {
    EngineOptions {
        rx_buffer_size,
        status_interval: Duration::from_secs(3600),
        loop_delay: Duration::from_millis(1),
        event_capacity: 4096,
    }
}

pub fn drain(events: &mut mpsc::Receiver<EngineEvent>) -> Vec<EngineEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}
