// src/gcode/mod.rs - Instruction parsing and G-code synthesis
pub mod generator;
pub mod instruction;

pub use instruction::{Command, Instruction, InstructionContext, InstructionKind, LinearMove};
