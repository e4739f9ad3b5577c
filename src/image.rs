use log::debug;

use crate::arch::ArchWidth;
use crate::error::{undefined_opcode, Error, ErrorKind, Result};
use crate::isa::{MEMORY_SECTION_END, TEXT_SECTION_END};

/// Bytes after the memory image: architecture marker and little-endian entry offset.
const METADATA_LEN: usize = 3;

/// Assembled program: encoded instructions, initial memory and where to start.
///
/// ```text
/// [rom..] 0xFF [memory..] 0xFE [arch] [entry lo] [entry hi]
/// ```
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ProgramImage {
    pub rom: Vec<u8>,
    /// Initial memory contents from address 0, trailing zeros trimmed.
    pub memory: Vec<u8>,
    pub arch: ArchWidth,
    /// ROM offset of `MAIN`.
    pub entry: u16,
}

impl ProgramImage {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.rom.len() + self.memory.len() + 2 + METADATA_LEN);
        bytes.extend_from_slice(&self.rom);
        bytes.push(TEXT_SECTION_END);
        bytes.extend_from_slice(&self.memory);
        bytes.push(MEMORY_SECTION_END);
        bytes.push(self.arch.marker());
        bytes.extend_from_slice(&self.entry.to_le_bytes());
        bytes
    }

    /// Split a binary back into its sections.
    ///
    /// The ROM is walked instruction by instruction, so a sentinel byte inside an operand
    /// never ends the section early.
    pub fn from_bytes(bytes: &[u8]) -> Result<ProgramImage> {
        // Smallest image: both sentinels and the metadata
        if bytes.len() < 2 + METADATA_LEN {
            return Err(malformed(format!(
                "Image is {} bytes, too short to hold its metadata",
                bytes.len()
            )));
        }
        let meta_start = bytes.len() - METADATA_LEN;
        if bytes[meta_start - 1] != MEMORY_SECTION_END {
            return Err(malformed("Image has no memory section end marker"));
        }
        let arch = ArchWidth::from_marker(bytes[meta_start])?;
        let arch_info = arch.architecture()?;
        let entry = u16::from_le_bytes([bytes[meta_start + 1], bytes[meta_start + 2]]);

        let body = &bytes[..meta_start - 1];
        let mut pos = 0;
        loop {
            let Some(&opcode) = body.get(pos) else {
                return Err(malformed("Image has no text section end marker"));
            };
            if opcode == TEXT_SECTION_END {
                break;
            }
            let info = arch_info
                .by_opcode(opcode)
                .ok_or_else(|| undefined_opcode(opcode))?;
            pos += info.len();
            if pos > body.len() {
                return Err(malformed(format!(
                    "Instruction `{}` at the end of the ROM is truncated",
                    info.mnemonic
                )));
            }
        }

        let rom = body[..pos].to_vec();
        let memory = body[pos + 1..].to_vec();
        if entry as usize >= rom.len() {
            return Err(Error::new(
                ErrorKind::EntryPointNotFound,
                format!(
                    "Entry point 0x{:04x} is outside of the {}-byte ROM",
                    entry,
                    rom.len()
                ),
            ));
        }

        debug!(
            "image: {} ROM bytes, {} memory bytes, {}, entry 0x{:04x}",
            rom.len(),
            memory.len(),
            arch,
            entry
        );
        Ok(ProgramImage {
            rom,
            memory,
            arch,
            entry,
        })
    }
}

fn malformed(message: impl Into<String>) -> Error {
    Error::new(ErrorKind::MalformedImage, message)
}
