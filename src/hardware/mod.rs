// src/hardware/mod.rs - Byte-stream transports between the host and the plotter
pub mod serial;

pub use serial::{SerialTransport, available_ports};

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Serial port error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Transport closed")]
    Closed,
}

/// A bidirectional byte stream to the device.
///
/// Implementations must not block: `read_available` returns `Ok(0)` when no
/// byte arrives within a short delay, and an error only when the link is gone.
#[async_trait]
pub trait Transport: Send {
    async fn read_available(&mut self, buf: &mut [u8]) -> Result<usize, TransportError>;
    async fn write_all(&mut self, bytes: &[u8]) -> Result<(), TransportError>;
    async fn close(&mut self) -> Result<(), TransportError>;
    fn name(&self) -> String;
}
