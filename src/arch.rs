use std::fmt;

use crate::error::{Error, ErrorKind, Result};
use crate::isa::{self, InstrInfo};

/// Architecture width selector, stored as the first metadata byte of a program image.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum ArchWidth {
    Bits8,
    #[default]
    Bits16,
    Bits32,
    Bits64,
}

impl ArchWidth {
    pub fn marker(self) -> u8 {
        match self {
            ArchWidth::Bits8 => 8,
            ArchWidth::Bits16 => 16,
            ArchWidth::Bits32 => 32,
            ArchWidth::Bits64 => 64,
        }
    }

    pub fn from_marker(marker: u8) -> Result<Self> {
        match marker {
            8 => Ok(ArchWidth::Bits8),
            16 => Ok(ArchWidth::Bits16),
            32 => Ok(ArchWidth::Bits32),
            64 => Ok(ArchWidth::Bits64),
            _ => Err(Error::new(
                ErrorKind::UnsupportedArchitecture,
                format!("Unknown architecture marker {}", marker),
            )),
        }
    }

    /// Capabilities for this width. Only the 16-bit machine has an execution engine.
    pub fn architecture(self) -> Result<&'static dyn Architecture> {
        match self {
            ArchWidth::Bits16 => Ok(&Sixteen),
            other => Err(Error::new(
                ErrorKind::UnsupportedArchitecture,
                format!("The {}-bit architecture is not implemented", other.marker()),
            )),
        }
    }
}

impl fmt::Display for ArchWidth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-bit", self.marker())
    }
}

/// What the assembler, loader and engine need to know about a machine width.
pub trait Architecture: fmt::Debug + Sync {
    fn width(&self) -> ArchWidth;

    /// Largest memory the address registers can span.
    fn max_memory(&self) -> usize;

    fn instruction_set(&self) -> &'static [InstrInfo];

    fn by_opcode(&self, opcode: u8) -> Option<&'static InstrInfo> {
        self.instruction_set()
            .iter()
            .find(|info| info.opcode() == opcode)
    }

    fn by_mnemonic(&self, mnemonic: &str) -> Option<&'static InstrInfo> {
        self.instruction_set()
            .iter()
            .find(|info| info.mnemonic.eq_ignore_ascii_case(mnemonic))
    }
}

#[derive(Debug)]
pub struct Sixteen;

impl Architecture for Sixteen {
    fn width(&self) -> ArchWidth {
        ArchWidth::Bits16
    }

    fn max_memory(&self) -> usize {
        u16::MAX as usize
    }

    fn instruction_set(&self) -> &'static [InstrInfo] {
        &isa::INSTRUCTIONS
    }

    // Dense table
    fn by_opcode(&self, opcode: u8) -> Option<&'static InstrInfo> {
        isa::by_opcode(opcode)
    }
}
