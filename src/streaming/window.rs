// src/streaming/window.rs - Flow control over the device receive buffer
use crate::gcode::Instruction;
use std::collections::VecDeque;
use std::time::Instant;
use uuid::Uuid;

/// Where a line on the wire came from.
#[derive(Debug, Clone)]
pub enum Origin {
    /// Instruction `index` of the job `job_id`
    Job { job_id: Uuid, index: usize },
    /// An out-of-band instruction from the priority queue
    Priority(Instruction),
}

#[derive(Debug, Clone)]
pub struct SentInstruction {
    /// The exact line written, without its newline
    pub line: String,
    pub origin: Origin,
    pub sent_at: Instant,
}

/// Tracks lines sent but not yet acknowledged.
///
/// `outstanding` mirrors the occupancy of the device receive buffer and never
/// exceeds `capacity`: a line that does not fit is refused.
#[derive(Debug)]
pub struct SendWindow {
    capacity: usize,
    outstanding: usize,
    sent: VecDeque<SentInstruction>,
}

impl SendWindow {
    pub fn new(capacity: usize) -> Self {
        Self { capacity, outstanding: 0, sent: VecDeque::new() }
    }

    /// Bytes a line occupies on the device, newline included.
    pub fn wire_len(line: &str) -> usize {
        line.len() + 1
    }

    pub fn fits(&self, line: &str) -> bool {
        self.outstanding + Self::wire_len(line) <= self.capacity
    }

    /// Record `line` as sent. Returns false, recording nothing, if it does not fit.
    pub fn try_push(&mut self, line: String, origin: Origin, sent_at: Instant) -> bool {
        if !self.fits(&line) {
            return false;
        }
        self.outstanding += Self::wire_len(&line);
        self.sent.push_back(SentInstruction { line, origin, sent_at });
        true
    }

    /// Retire the oldest sent line.
    pub fn ack(&mut self) -> Option<SentInstruction> {
        let sent = self.sent.pop_front()?;
        self.outstanding -= Self::wire_len(&sent.line);
        Some(sent)
    }

    pub fn head(&self) -> Option<&SentInstruction> {
        self.sent.front()
    }

    pub fn clear(&mut self) {
        self.sent.clear();
        self.outstanding = 0;
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn outstanding(&self) -> usize {
        self.outstanding
    }

    pub fn len(&self) -> usize {
        self.sent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sent.is_empty()
    }
}
