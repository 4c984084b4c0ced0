// src/hardware/serial.rs - Serial port transport
use super::{Transport, TransportError};
use async_trait::async_trait;
use serial2_tokio::SerialPort;
use std::time::Duration;
use tokio::time::timeout;

const READ_TIMEOUT: Duration = Duration::from_millis(1);

pub struct SerialTransport {
    port: Option<SerialPort>,
    path: String,
}

impl SerialTransport {
    pub fn open(path: &str, baud: u32) -> Result<Self, TransportError> {
        tracing::info!("Opening serial port {} at {} baud", path, baud);
        let port = SerialPort::open(path, baud)?;
        Ok(Self { port: Some(port), path: path.to_string() })
    }
}

#[async_trait]
impl Transport for SerialTransport {
    async fn read_available(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let port = self.port.as_ref().ok_or(TransportError::Closed)?;
        match timeout(READ_TIMEOUT, port.read(buf)).await {
            Ok(Ok(0)) => Err(TransportError::Closed),
            Ok(Ok(n)) => Ok(n),
            Ok(Err(e)) => Err(TransportError::Io(e)),
            // nothing arrived in time
            Err(_) => Ok(0),
        }
    }

    async fn write_all(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        let port = self.port.as_ref().ok_or(TransportError::Closed)?;
        port.write_all(bytes).await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if self.port.take().is_some() {
            tracing::info!("Closed serial port {}", self.path);
        }
        Ok(())
    }

    fn name(&self) -> String {
        self.path.clone()
    }
}

/// Serial ports present on this machine.
pub fn available_ports() -> Vec<String> {
    match SerialPort::available_ports() {
        Ok(paths) => paths.iter().map(|p| p.display().to_string()).collect(),
        Err(e) => {
            tracing::warn!("Failed to enumerate serial ports: {}", e);
            vec![]
        }
    }
}
