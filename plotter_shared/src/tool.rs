// plotter_shared/src/tool.rs - Inks, tool slots and the registry mapping colors to tools

use crate::config::{ConfigError, InkConfig, ToolConfig};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// A drawing ink, identified by its RGB color.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Ink {
    pub name: String,
    pub color: u32,
}

impl Ink {
    pub fn new(name: impl Into<String>, color: u32) -> Self {
        Self { name: name.into(), color }
    }
}

impl fmt::Display for Ink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (#{:06x})", self.name, self.color)
    }
}

/// A physical pen holder: where it parks and how to pick it up or put it back.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolSlot {
    pub ink: Ink,
    pub parking_x: f64,
    pub parking_y: f64,
    pub load_instructions: String,
    pub unload_instructions: String,
}

/// The tool on the carriage, or requested by an instruction.
///
/// `Undefined` means nothing is known; `None` means the carriage is
/// known to be empty.
#[derive(Debug, Clone, Default)]
pub enum Tool {
    #[default]
    Undefined,
    None,
    Actual(Arc<ToolSlot>),
}

impl Tool {
    pub fn is_actual(&self) -> bool {
        matches!(self, Tool::Actual(_))
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Tool::Undefined)
    }

    pub fn ink(&self) -> Option<&Ink> {
        match self {
            Tool::Actual(slot) => Some(&slot.ink),
            _ => None,
        }
    }

    pub fn slot(&self) -> Option<&ToolSlot> {
        match self {
            Tool::Actual(slot) => Some(slot),
            _ => None,
        }
    }
}

impl PartialEq for Tool {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Tool::Undefined, Tool::Undefined) | (Tool::None, Tool::None) => true,
            (Tool::Actual(a), Tool::Actual(b)) => a.ink == b.ink,
            _ => false,
        }
    }
}

impl fmt::Display for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tool::Undefined => f.write_str("undefined"),
            Tool::None => f.write_str("none"),
            Tool::Actual(slot) => write!(f, "{}", slot.ink),
        }
    }
}

/// Registry of known inks and the tools carrying them.
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    inks: Vec<Ink>,
    by_color: HashMap<u32, usize>,
    tools: HashMap<u32, Tool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(inks: &[InkConfig], tools: &[ToolConfig]) -> Result<Self, ConfigError> {
        let mut registry = Self::new();
        for ink in inks {
            registry.add_ink(Ink::new(ink.name.clone(), ink.color))?;
        }
        for tool in tools {
            let ink = registry
                .ink_by_name(&tool.ink)
                .cloned()
                .ok_or_else(|| ConfigError::Invalid(format!("tool references unknown ink '{}'", tool.ink)))?;
            registry.add_tool(ToolSlot {
                ink,
                parking_x: tool.parking_x,
                parking_y: tool.parking_y,
                load_instructions: tool.loading_instructions.clone(),
                unload_instructions: tool.unloading_instructions.clone(),
            });
        }
        Ok(registry)
    }

    pub fn add_ink(&mut self, ink: Ink) -> Result<(), ConfigError> {
        if self.by_color.contains_key(&ink.color) {
            return Err(ConfigError::Invalid(format!(
                "color #{:06x} of ink '{}' is already registered",
                ink.color, ink.name
            )));
        }
        self.by_color.insert(ink.color, self.inks.len());
        self.inks.push(ink);
        Ok(())
    }

    /// Register a tool slot, replacing any previous slot for the same ink.
    pub fn add_tool(&mut self, slot: ToolSlot) -> Tool {
        let tool = Tool::Actual(Arc::new(slot));
        if let Some(ink) = tool.ink() {
            self.tools.insert(ink.color, tool.clone());
        }
        tool
    }

    pub fn inks(&self) -> &[Ink] {
        &self.inks
    }

    pub fn ink_by_color(&self, color: u32) -> Option<&Ink> {
        self.by_color.get(&color).map(|&i| &self.inks[i])
    }

    pub fn ink_by_name(&self, name: &str) -> Option<&Ink> {
        self.inks.iter().find(|ink| ink.name == name)
    }

    /// The tool carrying `ink`, or `Tool::Undefined` if no slot holds it.
    pub fn tool_by_ink(&self, ink: &Ink) -> Tool {
        self.tools.get(&ink.color).cloned().unwrap_or_default()
    }

    /// Resolve the numeric argument of a `T<n>` instruction.
    ///
    /// Negative ids select the empty carriage; an id that matches no known
    /// ink color, or an ink without a tool slot, yields `Tool::Undefined`.
    pub fn tool_for_color_id(&self, id: i64) -> Tool {
        if id < 0 {
            return Tool::None;
        }
        let ink = u32::try_from(id).ok().and_then(|color| self.ink_by_color(color));
        match ink {
            Some(ink) => self.tool_by_ink(ink),
            None => {
                tracing::warn!("Unknown ink color {} (#{:06x}) in tool instruction", id, id);
                Tool::Undefined
            }
        }
    }
}
