// Machine description
pub mod arch;
pub mod config;
pub mod isa;
pub mod memory;
pub mod state;
pub mod symbol;
pub use arch::ArchWidth;
pub use config::MachineConfig;

// Parsing
mod lexer;
mod parser;
pub use parser::AsmParser;
mod air;
pub use air::{Air, ENTRY_LABEL};

// Binary images
mod image;
pub use image::ProgramImage;
mod disasm;
pub use disasm::{disassemble, DecodedInstruction, Disassembly};

// Running
mod runtime;
pub use runtime::{RunEnvironment, Status, StepObserver};
pub mod console;
pub mod debugger;
pub mod interrupt;
pub mod output;
pub mod storage;

mod error;
mod span;
pub use error::{Error, ErrorKind, Result};
pub use span::Span;

/// Amount of lines to show as context, each side of focus line (line containing span).
pub const DIAGNOSTIC_CONTEXT_LINES: usize = 8;

/// Assemble source text into a program image for the configured machine.
pub fn assemble(src: &str, config: &MachineConfig) -> Result<ProgramImage> {
    AsmParser::new(src, config)?.parse()?.emit()
}
