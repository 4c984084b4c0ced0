// src/gcode/instruction.rs - One parsed protocol line and its derived motion data
//! Instructions are classified once, at parse time, into a [`Command`] carrying
//! exactly the data its kind needs. Positions are absolute, in mm, before the
//! owning job's placement translation is applied.

use super::generator::{self, TOOL_CHANGE_NOTIFICATION_PREFIX};
use plotter_shared::{AxisLimits, PlotterSettings, Position, Tool, ToolRegistry, xyz_travel_duration};
use serde::Serialize;
use std::fmt;
use std::time::{Duration, Instant};

/// Read-only collaborators needed to parse instructions.
#[derive(Debug, Clone, Copy)]
pub struct InstructionContext<'a> {
    pub settings: &'a PlotterSettings,
    pub tools: &'a ToolRegistry,
}

impl<'a> InstructionContext<'a> {
    pub fn new(settings: &'a PlotterSettings, tools: &'a ToolRegistry) -> Self {
        Self { settings, tools }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InstructionKind {
    FastLinearMove,
    LoadedLinearMove,
    SetFeedrate,
    UseInches,
    UseMillimeters,
    UseAbsoluteCoordinates,
    UseRelativeCoordinates,
    Jog,
    Home,
    Unlock,
    Reset,
    FeedHold,
    FeedResume,
    ReadConfiguration,
    Comment,
    ToolChange,
    ToolChangeNotification,
    Unknown,
}

impl InstructionKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::FastLinearMove => "fast_linear_move",
            Self::LoadedLinearMove => "loaded_linear_move",
            Self::SetFeedrate => "set_feedrate",
            Self::UseInches => "use_inches",
            Self::UseMillimeters => "use_millimeters",
            Self::UseAbsoluteCoordinates => "use_absolute_coordinates",
            Self::UseRelativeCoordinates => "use_relative_coordinates",
            Self::Jog => "jog",
            Self::Home => "home",
            Self::Unlock => "unlock",
            Self::Reset => "reset",
            Self::FeedHold => "feed_hold",
            Self::FeedResume => "feed_resume",
            Self::ReadConfiguration => "read_configuration",
            Self::Comment => "comment",
            Self::ToolChange => "tool_change",
            Self::ToolChangeNotification => "tool_change_notification",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for InstructionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

enum Pattern {
    Exact(&'static str),
    Prefix(&'static str),
}

impl Pattern {
    fn matches(&self, code: &str) -> bool {
        match self {
            Pattern::Exact(s) => code == *s,
            Pattern::Prefix(s) => code.starts_with(s),
        }
    }
}

/// Matched in order against the first word of a line.
const DISPATCH_TABLE: &[(Pattern, InstructionKind)] = &[
    (Pattern::Exact("G0"), InstructionKind::FastLinearMove),
    (Pattern::Exact("G00"), InstructionKind::FastLinearMove),
    (Pattern::Exact("G1"), InstructionKind::LoadedLinearMove),
    (Pattern::Exact("G01"), InstructionKind::LoadedLinearMove),
    (Pattern::Prefix("F"), InstructionKind::SetFeedrate),
    (Pattern::Exact("G20"), InstructionKind::UseInches),
    (Pattern::Exact("G21"), InstructionKind::UseMillimeters),
    (Pattern::Exact("G90"), InstructionKind::UseAbsoluteCoordinates),
    (Pattern::Exact("G91"), InstructionKind::UseRelativeCoordinates),
    (Pattern::Prefix("$J="), InstructionKind::Jog),
    (Pattern::Exact(generator::HOME), InstructionKind::Home),
    (Pattern::Exact(generator::UNLOCK), InstructionKind::Unlock),
    (Pattern::Exact(generator::RESET), InstructionKind::Reset),
    (Pattern::Exact(generator::FEED_HOLD), InstructionKind::FeedHold),
    (Pattern::Exact(generator::FEED_RESUME), InstructionKind::FeedResume),
    (Pattern::Exact(generator::READ_CONFIGURATION), InstructionKind::ReadConfiguration),
    (Pattern::Prefix(";"), InstructionKind::Comment),
    (Pattern::Prefix("T"), InstructionKind::ToolChange),
    (Pattern::Prefix(TOOL_CHANGE_NOTIFICATION_PREFIX), InstructionKind::ToolChangeNotification),
];

fn classify(code: &str) -> InstructionKind {
    DISPATCH_TABLE
        .iter()
        .find(|(pattern, _)| pattern.matches(code))
        .map(|(_, kind)| *kind)
        .unwrap_or(InstructionKind::Unknown)
}

/// A `G0`/`G1` move.
#[derive(Debug, Clone, PartialEq)]
pub struct LinearMove {
    pub fast: bool,
    /// Axis words present in the text, X/Y/Z
    pub axes: [Option<f64>; 3],
    /// Absent for detached instructions, which have no known start position
    pub end: Option<Position>,
    pub length: f64,
    /// Estimated duration in seconds
    pub duration: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    LinearMove(LinearMove),
    SetFeedrate(Option<f64>),
    UseInches,
    UseMillimeters,
    UseAbsoluteCoordinates,
    UseRelativeCoordinates,
    Jog,
    Home,
    Unlock,
    Reset,
    FeedHold,
    FeedResume,
    ReadConfiguration,
    Comment,
    ToolChange(Tool),
    ToolChangeNotification(Tool),
    Unknown,
}

impl Command {
    pub fn kind(&self) -> InstructionKind {
        match self {
            Command::LinearMove(m) if m.fast => InstructionKind::FastLinearMove,
            Command::LinearMove(_) => InstructionKind::LoadedLinearMove,
            Command::SetFeedrate(_) => InstructionKind::SetFeedrate,
            Command::UseInches => InstructionKind::UseInches,
            Command::UseMillimeters => InstructionKind::UseMillimeters,
            Command::UseAbsoluteCoordinates => InstructionKind::UseAbsoluteCoordinates,
            Command::UseRelativeCoordinates => InstructionKind::UseRelativeCoordinates,
            Command::Jog => InstructionKind::Jog,
            Command::Home => InstructionKind::Home,
            Command::Unlock => InstructionKind::Unlock,
            Command::Reset => InstructionKind::Reset,
            Command::FeedHold => InstructionKind::FeedHold,
            Command::FeedResume => InstructionKind::FeedResume,
            Command::ReadConfiguration => InstructionKind::ReadConfiguration,
            Command::Comment => InstructionKind::Comment,
            Command::ToolChange(_) => InstructionKind::ToolChange,
            Command::ToolChangeNotification(_) => InstructionKind::ToolChangeNotification,
            Command::Unknown => InstructionKind::Unknown,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Instruction {
    raw: String,
    start: Option<Position>,
    command: Command,
    sent_at: Option<Instant>,
    acked_at: Option<Instant>,
}

fn parse_axes(words: &[&str]) -> Option<[Option<f64>; 3]> {
    let mut axes = [None; 3];
    for word in words.iter().skip(1) {
        let word = word.to_ascii_uppercase();
        let axis = match word.chars().next() {
            Some('X') => 0,
            Some('Y') => 1,
            Some('Z') => 2,
            _ => continue,
        };
        axes[axis] = Some(word[1..].parse::<f64>().ok()?);
    }
    Some(axes)
}

fn parse_tool_id(text: &str, ctx: &InstructionContext<'_>) -> Option<Tool> {
    text.trim().parse::<i64>().ok().map(|id| ctx.tools.tool_for_color_id(id))
}

impl Instruction {
    /// Parse `raw`, starting at `start`.
    ///
    /// A `None` start makes a detached instruction: it carries no end position,
    /// length or duration and is always streamed as written.
    pub fn parse(raw: &str, start: Option<Position>, ctx: &InstructionContext<'_>) -> Self {
        let raw = raw.trim().to_string();
        let words: Vec<&str> = raw.split(' ').filter(|w| !w.is_empty()).collect();
        let code = words.first().copied().unwrap_or("");

        let command = match classify(code) {
            kind @ (InstructionKind::FastLinearMove | InstructionKind::LoadedLinearMove) => {
                let fast = kind == InstructionKind::FastLinearMove;
                match parse_axes(&words) {
                    Some(axes) => Command::LinearMove(Self::linear_move(fast, axes, start, ctx.settings)),
                    None => Command::Unknown,
                }
            }
            InstructionKind::SetFeedrate => Command::SetFeedrate(code[1..].parse().ok()),
            InstructionKind::UseInches => Command::UseInches,
            InstructionKind::UseMillimeters => Command::UseMillimeters,
            InstructionKind::UseAbsoluteCoordinates => Command::UseAbsoluteCoordinates,
            InstructionKind::UseRelativeCoordinates => Command::UseRelativeCoordinates,
            InstructionKind::Jog => Command::Jog,
            InstructionKind::Home => Command::Home,
            InstructionKind::Unlock => Command::Unlock,
            InstructionKind::Reset => Command::Reset,
            InstructionKind::FeedHold => Command::FeedHold,
            InstructionKind::FeedResume => Command::FeedResume,
            InstructionKind::ReadConfiguration => Command::ReadConfiguration,
            InstructionKind::Comment => Command::Comment,
            InstructionKind::ToolChange => match parse_tool_id(&code[1..], ctx) {
                Some(tool) => Command::ToolChange(tool),
                None => Command::Unknown,
            },
            InstructionKind::ToolChangeNotification => {
                match parse_tool_id(&code[TOOL_CHANGE_NOTIFICATION_PREFIX.len()..], ctx) {
                    Some(tool) => Command::ToolChangeNotification(tool),
                    None => Command::Unknown,
                }
            }
            InstructionKind::Unknown => Command::Unknown,
        };

        Self { raw, start, command, sent_at: None, acked_at: None }
    }

    /// Parse an instruction outside of any job.
    pub fn detached(raw: &str, ctx: &InstructionContext<'_>) -> Self {
        Self::parse(raw, None, ctx)
    }

    fn linear_move(fast: bool, axes: [Option<f64>; 3], start: Option<Position>, settings: &PlotterSettings) -> LinearMove {
        let Some(start) = start else {
            return LinearMove { fast, axes, end: None, length: 0.0, duration: 0.0 };
        };
        let mut end = start;
        for (axis, value) in axes.iter().enumerate() {
            if let Some(value) = value {
                end[axis] = *value;
            }
        }
        let length = ((end[0] - start[0]).powi(2) + (end[1] - start[1]).powi(2) + (end[2] - start[2]).powi(2)).sqrt();
        let xy_speed = if fast { settings.flying_xy_max_speed } else { settings.drawing_xy_max_speed };
        let duration = xyz_travel_duration(
            start,
            end,
            AxisLimits::new(settings.xy_acceleration, xy_speed),
            AxisLimits::new(settings.z_acceleration, settings.z_max_speed),
            settings.is_core_xy,
        );
        LinearMove { fast, axes, end: Some(end), length, duration }
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn command(&self) -> &Command {
        &self.command
    }

    pub fn kind(&self) -> InstructionKind {
        self.command.kind()
    }

    pub fn start_position(&self) -> Option<Position> {
        self.start
    }

    /// Where the carriage is once this instruction has run. Non-motions end where they start.
    pub fn end_position(&self) -> Option<Position> {
        match &self.command {
            Command::LinearMove(m) => m.end,
            _ => self.start,
        }
    }

    pub fn is_motion(&self) -> bool {
        self.is_linear_motion()
    }

    pub fn is_linear_motion(&self) -> bool {
        matches!(self.command, Command::LinearMove(_))
    }

    pub fn is_fast_motion(&self) -> bool {
        matches!(&self.command, Command::LinearMove(m) if m.fast)
    }

    /// True when only the pen height changes.
    pub fn is_z_axis_only_motion(&self) -> bool {
        match (&self.command, self.start) {
            (Command::LinearMove(LinearMove { end: Some(end), .. }), Some(start)) => {
                start[0] == end[0] && start[1] == end[1] && start[2] != end[2]
            }
            _ => false,
        }
    }

    /// True for a loaded move in the XY plane with the pen down (Z = 0 at both ends).
    pub fn is_drawing_motion(&self) -> bool {
        let (Command::LinearMove(m), Some(start)) = (&self.command, self.start) else {
            return false;
        };
        let Some(end) = m.end else {
            return false;
        };
        if !self.is_z_axis_only_motion() && start[2] == 0.0 && end[2] == 0.0 {
            !m.fast
        } else {
            if !m.fast {
                tracing::warn!("Loaded movement higher than floor level: {}", self.raw);
            }
            false
        }
    }

    pub fn motion_length(&self) -> f64 {
        match &self.command {
            Command::LinearMove(m) => m.length,
            _ => 0.0,
        }
    }

    /// Estimated duration in seconds.
    pub fn estimated_duration(&self) -> f64 {
        match &self.command {
            Command::LinearMove(m) => m.duration,
            _ => 0.0,
        }
    }

    /// Displacement from start to end; zero for non-motions and detached instructions.
    pub fn motion_vector(&self) -> [f64; 3] {
        match (self.start, self.end_position()) {
            (Some(start), Some(end)) => [end[0] - start[0], end[1] - start[1], end[2] - start[2]],
            _ => [0.0; 3],
        }
    }

    /// The tool a tool change requests, or a notification confirms.
    pub fn tool_to_load(&self) -> Option<&Tool> {
        match &self.command {
            Command::ToolChange(tool) | Command::ToolChangeNotification(tool) => Some(tool),
            _ => None,
        }
    }

    /// The line to put on the wire, without its trailing newline.
    ///
    /// Linear moves are re-rendered at their end position shifted by the job
    /// placement `translation` (X and Y only); everything else streams raw.
    pub fn to_stream(&self, translation: [f64; 2], settings: &PlotterSettings) -> String {
        match &self.command {
            Command::LinearMove(LinearMove { fast, end: Some(end), .. }) => {
                let x = Some(end[0] + translation[0]);
                let y = Some(end[1] + translation[1]);
                let z = Some(end[2]);
                if *fast {
                    generator::fast_linear_move(x, y, z, settings)
                } else {
                    generator::loaded_linear_move(x, y, z, settings)
                }
            }
            _ => self.raw.clone(),
        }
    }

    pub fn mark_sent(&mut self, at: Instant) {
        self.sent_at = Some(at);
    }

    pub fn mark_acked(&mut self, at: Instant) {
        self.acked_at = Some(at);
    }

    pub fn sent_at(&self) -> Option<Instant> {
        self.sent_at
    }

    pub fn acked_at(&self) -> Option<Instant> {
        self.acked_at
    }

    /// Time between dispatch and acknowledgement, once both happened.
    pub fn measured_duration(&self) -> Option<Duration> {
        match (self.sent_at, self.acked_at) {
            (Some(sent), Some(acked)) => Some(acked.saturating_duration_since(sent)),
            _ => None,
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}
