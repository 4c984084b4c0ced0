// src/job.rs - A parsed drawing job and its O(1) progress bookkeeping
//! A [`Job`] is parsed once and never re-parsed: moving it on the drawing area
//! only changes its translation, applied when instructions are streamed.
//!
//! Per-ink accounting keeps one index range per ink. A job that comes back to
//! an ink after using another one overwrites the earlier range, so multi-pass
//! inks only report their last pass.

use crate::gcode::{Instruction, InstructionContext, InstructionKind};
use chrono::{DateTime, Utc};
use plotter_shared::{Ink, Position, Tool};
use serde::Serialize;
use std::io;
use std::time::Instant;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum JobError {
    #[error("line {line}: inches units are not supported")]
    InchesUnits { line: usize },
    #[error("line {line}: relative coordinates are not supported")]
    RelativeCoordinates { line: usize },
    #[error("line {line}: unknown instruction '{raw}'")]
    UnknownInstruction { line: usize, raw: String },
}

/// Half-open instruction index range `[first, last)` during which an ink was loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct InkRange {
    pub first: usize,
    pub last: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InkProgress {
    pub ink: Ink,
    pub executed_instructions: usize,
    pub drawn_distance: f64,
    /// Seconds
    pub remaining_duration: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobProgress {
    pub job_id: Uuid,
    pub executed_instructions: usize,
    pub total_instructions: usize,
    pub drawn_distance: f64,
    pub remaining_duration: f64,
    pub elapsed_secs: u64,
    pub inks: Vec<InkProgress>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobSummary {
    pub id: Uuid,
    pub instructions: usize,
    pub min: [f64; 2],
    pub max: [f64; 2],
    pub width: f64,
    pub height: f64,
    pub drawn_distance: f64,
    pub estimated_duration: f64,
    pub inks: Vec<InkProgress>,
    pub compatible: bool,
    pub started_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
struct DurationRecord<'a> {
    id: usize,
    instruction_type: &'static str,
    instruction: &'a str,
    estimated_duration: f64,
    measured_duration: Option<f64>,
    measured_over_estimated: Option<f64>,
    x_distance: f64,
    y_distance: f64,
    z_distance: f64,
    total_distance: f64,
}

#[derive(Debug, Clone)]
pub struct Job {
    id: Uuid,
    instructions: Vec<Instruction>,
    /// Source line (1-based) of each instruction
    line_numbers: Vec<usize>,
    can_run_with_unknown_tool: bool,
    min: [f64; 2],
    max: [f64; 2],
    drawn_length_at: Vec<f64>,
    estimated_duration_at: Vec<f64>,
    ink_ranges: Vec<(Ink, InkRange)>,
    cursor: usize,
    translation: [f64; 2],
    started: Option<Instant>,
    started_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Parse a job from newline-delimited instruction text.
    ///
    /// `initial_tool` is the tool assumed on the carriage when the job starts.
    /// Jobs allowed to run with an unknown tool are the short maintenance ones
    /// (jogs, homing, configuration reads).
    pub fn parse(text: &str, initial_tool: &Tool, can_run_with_unknown_tool: bool, ctx: &InstructionContext<'_>) -> Self {
        let lines: Vec<(usize, &str)> = text
            .split('\n')
            .enumerate()
            .map(|(i, line)| (i + 1, line.trim()))
            .filter(|(_, line)| !line.is_empty())
            .collect();
        let n = lines.len();

        let mut job = Self {
            id: Uuid::new_v4(),
            instructions: Vec::with_capacity(n),
            line_numbers: Vec::with_capacity(n),
            can_run_with_unknown_tool,
            min: [0.0; 2],
            max: [0.0; 2],
            drawn_length_at: Vec::with_capacity(n + 1),
            estimated_duration_at: Vec::with_capacity(n + 1),
            ink_ranges: Vec::new(),
            cursor: 0,
            translation: [0.0; 2],
            started: None,
            started_at: None,
        };
        job.drawn_length_at.push(0.0);
        job.estimated_duration_at.push(0.0);

        let mut current_tool = initial_tool.clone();
        if let Some(ink) = current_tool.ink() {
            job.set_ink_range(ink.clone(), InkRange { first: 0, last: n });
        }

        let mut position: Position = [0.0; 3];
        let mut anchored = false;
        let mut drawn = 0.0;
        let mut duration = 0.0;
        for (index, (line_number, raw)) in lines.into_iter().enumerate() {
            let mut instruction = Instruction::parse(raw, Some(position), ctx);
            if instruction.is_motion() && !instruction.is_z_axis_only_motion() {
                if !anchored {
                    // the first real motion defines where the drawing starts, not the origin
                    if let Some(end) = instruction.end_position() {
                        job.min = [end[0], end[1]];
                        job.max = [end[0], end[1]];
                        anchored = true;
                        instruction = Instruction::parse(raw, Some(end), ctx);
                    }
                }
                if let Some(end) = instruction.end_position() {
                    job.min = [job.min[0].min(end[0]), job.min[1].min(end[1])];
                    job.max = [job.max[0].max(end[0]), job.max[1].max(end[1])];
                }
            }
            if let Some(end) = instruction.end_position() {
                position = end;
            }

            if instruction.is_drawing_motion() {
                drawn += instruction.motion_length();
            }
            duration += instruction.estimated_duration();
            job.drawn_length_at.push(drawn);
            job.estimated_duration_at.push(duration);

            if instruction.kind() == InstructionKind::ToolChange {
                if let Some(ink) = current_tool.ink() {
                    let ink = ink.clone();
                    if let Some((_, range)) = job.ink_ranges.iter_mut().find(|(i, _)| *i == ink) {
                        range.last = index;
                    }
                }
                current_tool = instruction.tool_to_load().cloned().unwrap_or_default();
                if let Some(ink) = current_tool.ink() {
                    job.set_ink_range(ink.clone(), InkRange { first: index, last: n });
                }
            }

            job.instructions.push(instruction);
            job.line_numbers.push(line_number);
        }

        tracing::debug!(
            "Parsed job {} ({} instructions, {} inks, {:.1}s estimated)",
            job.id,
            n,
            job.ink_ranges.len(),
            duration
        );
        job
    }

    // keeps the ink at its first-seen position, like an insertion-ordered map
    fn set_ink_range(&mut self, ink: Ink, range: InkRange) {
        match self.ink_ranges.iter_mut().find(|(i, _)| *i == ink) {
            Some((_, existing)) => *existing = range,
            None => self.ink_ranges.push((ink, range)),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    pub fn can_run_with_unknown_tool(&self) -> bool {
        self.can_run_with_unknown_tool
    }

    /// First instruction the plotter cannot run, if any.
    pub fn check_compatibility(&self) -> Result<(), JobError> {
        for (instruction, &line) in self.instructions.iter().zip(&self.line_numbers) {
            match instruction.kind() {
                InstructionKind::UseInches => return Err(JobError::InchesUnits { line }),
                InstructionKind::UseRelativeCoordinates => return Err(JobError::RelativeCoordinates { line }),
                InstructionKind::Unknown => {
                    return Err(JobError::UnknownInstruction { line, raw: instruction.raw().to_string() });
                }
                _ => {}
            }
        }
        Ok(())
    }

    pub fn is_compatible_with_plotter(&self) -> bool {
        match self.check_compatibility() {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("Incompatible job {}: {}", self.id, e);
                false
            }
        }
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn is_done(&self) -> bool {
        self.cursor >= self.instructions.len()
    }

    pub fn current_instruction(&self) -> Option<&Instruction> {
        self.instructions.get(self.cursor)
    }

    pub fn instruction_mut(&mut self, index: usize) -> Option<&mut Instruction> {
        self.instructions.get_mut(index)
    }

    pub fn next_instruction(&mut self) {
        if self.cursor < self.instructions.len() {
            self.cursor += 1;
        }
    }

    pub fn cancel_job(&mut self) {
        self.cursor = self.instructions.len();
    }

    /// Record the moment the first instruction left the host. Later calls are ignored.
    pub fn mark_started(&mut self) {
        if self.started.is_none() {
            self.started = Some(Instant::now());
            self.started_at = Some(Utc::now());
        }
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    /// Whole seconds since the first instruction was sent.
    pub fn elapsed_secs(&self) -> u64 {
        self.started.map(|t| t.elapsed().as_secs()).unwrap_or(0)
    }

    pub fn set_translation(&mut self, translation: [f64; 2]) {
        self.translation = translation;
    }

    pub fn translation(&self) -> [f64; 2] {
        self.translation
    }

    pub fn min_position(&self) -> [f64; 2] {
        self.min
    }

    pub fn max_position(&self) -> [f64; 2] {
        self.max
    }

    pub fn width(&self) -> f64 {
        self.max[0] - self.min[0]
    }

    pub fn height(&self) -> f64 {
        self.max[1] - self.min[1]
    }

    pub fn translated_origin(&self) -> [f64; 2] {
        [self.min[0] + self.translation[0], self.min[1] + self.translation[1]]
    }

    pub fn total_drawn_distance(&self) -> f64 {
        self.drawn_length_at[self.len()]
    }

    pub fn drawn_distance(&self) -> f64 {
        self.drawn_length_at[self.cursor]
    }

    pub fn total_estimated_duration(&self) -> f64 {
        self.estimated_duration_at[self.len()]
    }

    pub fn estimated_remaining_duration(&self) -> f64 {
        self.estimated_duration_at[self.len()] - self.estimated_duration_at[self.cursor]
    }

    /// Inks in the order they are first loaded.
    pub fn ordered_inks(&self) -> Vec<Ink> {
        self.ink_ranges.iter().map(|(ink, _)| ink.clone()).collect()
    }

    pub fn ink_range(&self, ink: &Ink) -> Option<InkRange> {
        self.ink_ranges.iter().find(|(i, _)| i == ink).map(|(_, range)| *range)
    }

    pub fn instructions_per_ink(&self) -> Vec<(Ink, &[Instruction])> {
        self.ink_ranges
            .iter()
            .map(|(ink, r)| (ink.clone(), &self.instructions[r.first..r.last]))
            .collect()
    }

    pub fn executed_instructions_per_ink_at(&self, cursor: usize) -> Vec<(Ink, usize)> {
        self.ink_ranges
            .iter()
            .map(|(ink, r)| {
                let count = if cursor < r.first {
                    0
                } else if cursor < r.last {
                    cursor - r.first
                } else {
                    r.last - r.first
                };
                (ink.clone(), count)
            })
            .collect()
    }

    pub fn drawn_distance_per_ink_at(&self, cursor: usize) -> Vec<(Ink, f64)> {
        let pre = &self.drawn_length_at;
        self.ink_ranges
            .iter()
            .map(|(ink, r)| {
                let distance = if cursor < r.first {
                    0.0
                } else if cursor < r.last {
                    pre[cursor] - pre[r.first]
                } else {
                    pre[r.last] - pre[r.first]
                };
                (ink.clone(), distance)
            })
            .collect()
    }

    pub fn estimated_remaining_duration_per_ink_at(&self, cursor: usize) -> Vec<(Ink, f64)> {
        let pre = &self.estimated_duration_at;
        self.ink_ranges
            .iter()
            .map(|(ink, r)| {
                let remaining = if cursor < r.first {
                    pre[r.last] - pre[r.first]
                } else if cursor < r.last {
                    pre[r.last] - pre[cursor]
                } else {
                    0.0
                };
                (ink.clone(), remaining)
            })
            .collect()
    }

    pub fn executed_instructions_per_ink(&self) -> Vec<(Ink, usize)> {
        self.executed_instructions_per_ink_at(self.cursor)
    }

    pub fn drawn_distance_per_ink(&self) -> Vec<(Ink, f64)> {
        self.drawn_distance_per_ink_at(self.cursor)
    }

    pub fn estimated_remaining_duration_per_ink(&self) -> Vec<(Ink, f64)> {
        self.estimated_remaining_duration_per_ink_at(self.cursor)
    }

    pub fn instruction_count_per_ink(&self) -> Vec<(Ink, usize)> {
        self.executed_instructions_per_ink_at(self.len())
    }

    pub fn drawing_distance_per_ink(&self) -> Vec<(Ink, f64)> {
        self.drawn_distance_per_ink_at(self.len())
    }

    pub fn estimated_duration_per_ink(&self) -> Vec<(Ink, f64)> {
        self.estimated_remaining_duration_per_ink_at(0)
    }

    fn ink_progress_at(&self, cursor: usize) -> Vec<InkProgress> {
        let counts = self.executed_instructions_per_ink_at(cursor);
        let distances = self.drawn_distance_per_ink_at(cursor);
        let remaining = self.estimated_remaining_duration_per_ink_at(cursor);
        counts
            .into_iter()
            .zip(distances)
            .zip(remaining)
            .map(|(((ink, executed_instructions), (_, drawn_distance)), (_, remaining_duration))| InkProgress {
                ink,
                executed_instructions,
                drawn_distance,
                remaining_duration,
            })
            .collect()
    }

    pub fn progress(&self) -> JobProgress {
        JobProgress {
            job_id: self.id,
            executed_instructions: self.cursor,
            total_instructions: self.len(),
            drawn_distance: self.drawn_distance(),
            remaining_duration: self.estimated_remaining_duration(),
            elapsed_secs: self.elapsed_secs(),
            inks: self.ink_progress_at(self.cursor),
        }
    }

    /// Totals for the whole job, as if nothing had run yet.
    pub fn summary(&self) -> JobSummary {
        JobSummary {
            id: self.id,
            instructions: self.len(),
            min: self.min,
            max: self.max,
            width: self.width(),
            height: self.height(),
            drawn_distance: self.total_drawn_distance(),
            estimated_duration: self.total_estimated_duration(),
            inks: self
                .ink_progress_at(self.len())
                .into_iter()
                .zip(self.estimated_duration_per_ink())
                .map(|(mut p, (_, total))| {
                    p.remaining_duration = total;
                    p
                })
                .collect(),
            compatible: self.check_compatibility().is_ok(),
            started_at: self.started_at,
        }
    }

    /// Write one CSV record per instruction comparing estimated and measured durations, in seconds.
    pub fn write_duration_report<W: io::Write>(&self, writer: W) -> Result<(), csv::Error> {
        let mut wtr = csv::Writer::from_writer(writer);
        for (id, instruction) in self.instructions.iter().enumerate() {
            let estimated = instruction.estimated_duration();
            let measured = instruction.measured_duration().map(|d| d.as_secs_f64());
            let vector = instruction.motion_vector();
            wtr.serialize(DurationRecord {
                id,
                instruction_type: instruction.kind().name(),
                instruction: instruction.raw(),
                estimated_duration: estimated,
                measured_duration: measured,
                measured_over_estimated: measured.filter(|_| estimated > 0.0).map(|m| m / estimated),
                x_distance: vector[0],
                y_distance: vector[1],
                z_distance: vector[2],
                total_distance: instruction.motion_length(),
            })?;
        }
        wtr.flush()?;
        Ok(())
    }
}
