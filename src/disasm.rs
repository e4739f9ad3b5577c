use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{self, Write};

use log::debug;

use crate::air::ENTRY_LABEL;
use crate::arch::Architecture;
use crate::error::{undefined_opcode, Error, ErrorKind, Result};
use crate::image::ProgramImage;
use crate::isa::{InstrInfo, Operand, OPERAND_LEN};
use crate::symbol::Mode;

/// A single decoded instruction and where it starts in the ROM.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct DecodedInstruction {
    pub offset: u16,
    pub info: &'static InstrInfo,
    pub operands: Vec<Operand>,
}

/// Raw form with addresses in place of names.
impl fmt::Display for DecodedInstruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}  {}", self.offset, self.info.mnemonic)?;
        for operand in &self.operands {
            write!(f, " {}", operand)?;
        }
        Ok(())
    }
}

/// Program image split into its decoded instructions.
#[derive(Clone, Debug)]
pub struct Disassembly {
    pub image: ProgramImage,
    pub instructions: Vec<DecodedInstruction>,
}

/// Decode a program binary. This is a linear sweep of the ROM; the only symbols recovered
/// are the entry point and the targets of label operands.
pub fn disassemble(bytes: &[u8]) -> Result<Disassembly> {
    let image = ProgramImage::from_bytes(bytes)?;
    let arch = image.arch.architecture()?;
    let instructions = decode_rom(&image.rom, arch)?;
    debug!("disassembled {} instructions", instructions.len());
    Ok(Disassembly {
        image,
        instructions,
    })
}

/// Decode every instruction of a ROM section.
pub fn decode_rom(rom: &[u8], arch: &dyn Architecture) -> Result<Vec<DecodedInstruction>> {
    let mut instructions = Vec::new();
    let mut pos = 0;
    while pos < rom.len() {
        let info = arch
            .by_opcode(rom[pos])
            .ok_or_else(|| undefined_opcode(rom[pos]))?;
        let Some(bytes) = rom.get(pos + 1..pos + info.len()) else {
            return Err(Error::new(
                ErrorKind::MalformedImage,
                format!("Instruction `{}` at 0x{:04x} is truncated", info.mnemonic, pos),
            ));
        };
        let operands = bytes
            .chunks_exact(OPERAND_LEN)
            .map(|pair| Operand::decode(pair[0], pair[1]))
            .collect::<Result<Vec<_>>>()?;
        instructions.push(DecodedInstruction {
            offset: pos as u16,
            info,
            operands,
        });
        pos += info.len();
    }
    Ok(instructions)
}

impl Disassembly {
    /// ROM offsets named by label operands, and the entry point.
    fn labels(&self) -> BTreeMap<u16, String> {
        let mut labels = BTreeMap::new();
        for operand in self.operands() {
            if operand.mode == Mode::Label {
                let offset = operand.value as u16;
                labels.insert(offset, format!("L_{:04x}", offset));
            }
        }
        labels.insert(self.image.entry, ENTRY_LABEL.to_string());
        labels
    }

    fn operands(&self) -> impl Iterator<Item = &Operand> {
        self.instructions
            .iter()
            .flat_map(|instr| instr.operands.iter())
    }

    /// Initial memory bytes from `address` up to the next null.
    fn group_at(&self, address: usize) -> &[u8] {
        let memory = &self.image.memory;
        let start = address.min(memory.len());
        let end = memory[start..]
            .iter()
            .position(|byte| *byte == 0)
            .map_or(memory.len(), |len| start + len);
        &memory[start..end]
    }

    /// Variables to declare: every data operand target, plus any non-zero memory that
    /// neither a variable nor a string literal accounts for.
    fn variables(&self) -> BTreeMap<usize, String> {
        let mut variables = BTreeMap::new();
        let mut strings = BTreeSet::new();
        for operand in self.operands() {
            let address = operand.value as usize;
            match operand.mode {
                Mode::Data => {
                    variables.insert(address, format!("data_{:04x}", address));
                }
                Mode::Str => {
                    strings.insert(address);
                }
                _ => {}
            }
        }

        let mut covered = vec![false; self.image.memory.len()];
        for address in variables.keys().chain(strings.iter()) {
            let len = self.group_at(*address).len();
            for flag in covered.iter_mut().skip(*address).take(len + 1) {
                *flag = true;
            }
        }
        let mut address = 0;
        while address < self.image.memory.len() {
            if self.image.memory[address] != 0 && !covered[address] {
                let len = self.group_at(address).len();
                variables.insert(address, format!("mem_{:04x}", address));
                address += len;
            } else {
                address += 1;
            }
        }
        variables
    }

    /// Source text the assembler accepts and that encodes to the same instructions.
    pub fn to_source(&self) -> String {
        let labels = self.labels();
        let variables = self.variables();
        let mut out = String::new();
        let _ = writeln!(
            out,
            "; {} program, {} ROM bytes, entry 0x{:04x}",
            self.image.arch,
            self.image.rom.len(),
            self.image.entry
        );

        if !variables.is_empty() {
            out.push_str(".DATA\n");
            for (address, name) in &variables {
                let _ = writeln!(out, "org {}", address);
                let group = self.group_at(*address);
                if group.is_empty() {
                    let _ = writeln!(out, "{}", name);
                } else {
                    let _ = writeln!(out, "{} {}", name, data_literal(group));
                }
            }
            out.push_str("end\n\n");
        }

        for instr in &self.instructions {
            if let Some(label) = labels.get(&instr.offset) {
                let _ = writeln!(out, ".{}", label);
            }
            out.push_str("    ");
            out.push_str(instr.info.mnemonic);
            for operand in &instr.operands {
                out.push(' ');
                out.push_str(&self.render_operand(operand, &labels, &variables));
            }
            out.push('\n');
        }
        // Targets past the last instruction
        let end = self.image.rom.len() as u16;
        for (offset, label) in labels.range(end..) {
            if *offset == end {
                let _ = writeln!(out, ".{}", label);
            }
        }
        out
    }

    fn render_operand(
        &self,
        operand: &Operand,
        labels: &BTreeMap<u16, String>,
        variables: &BTreeMap<usize, String>,
    ) -> String {
        let address = operand.value as usize;
        match operand.mode {
            Mode::Data => match variables.get(&address) {
                Some(name) => format!("@{}", name),
                None => format!("@data_{:04x}", address),
            },
            Mode::Str => quoted(self.group_at(address)),
            Mode::Label => match labels.get(&(operand.value as u16)) {
                Some(name) => name.clone(),
                None => format!("L_{:04x}", operand.value),
            },
            _ => operand.to_string(),
        }
    }
}

impl fmt::Display for Disassembly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_source())
    }
}

/// Printable text as a string literal, anything else as a byte list.
fn data_literal(bytes: &[u8]) -> String {
    let printable = bytes
        .iter()
        .all(|byte| (0x20..=0x7e).contains(byte) || matches!(byte, b'\n' | b'\t' | b'\r'));
    if printable {
        quoted(bytes)
    } else {
        bytes
            .iter()
            .map(|byte| byte.to_string())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

fn quoted(bytes: &[u8]) -> String {
    let mut out = String::from("\"");
    for byte in bytes {
        match byte {
            b'"' => out.push_str("\\\""),
            b'\\' => out.push_str("\\\\"),
            b'\n' => out.push_str("\\n"),
            b'\t' => out.push_str("\\t"),
            b'\r' => out.push_str("\\r"),
            _ => out.push(*byte as char),
        }
    }
    out.push('"');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MachineConfig;
    use crate::isa::Opcode;

    fn assemble(src: &str) -> ProgramImage {
        crate::assemble(src, &MachineConfig::default()).unwrap()
    }

    const PROGRAM: &str = "\
.DATA
org 32
greeting \"hi there\"
count 3
end
.MAIN
    mov %cl @count
.again
    lea %di \"tick\\n\"
    mov %al INT_PRINT_STRING
    int
    dec %cl
    jne again
    call done
    halt
.done
    ret
";

    #[test]
    fn decodes_rom() {
        let image = assemble(".MAIN\nmov %ax $1\njmp MAIN");
        let dis = disassemble(&image.to_bytes()).unwrap();
        assert_eq!(dis.instructions.len(), 2);
        assert_eq!(dis.instructions[1].offset, 5);
        assert_eq!(dis.instructions[1].info.op, Opcode::Jmp);
        assert_eq!(dis.instructions[0].to_string(), "0000  mov %ax $1");
    }

    #[test]
    fn source_reassembles_identically() {
        let image = assemble(PROGRAM);
        let dis = disassemble(&image.to_bytes()).unwrap();
        let source = dis.to_source();
        assert!(source.contains(".MAIN\n"));
        assert!(source.contains("@data_0029"));
        assert!(source.contains("\"tick\\n\""));
        let again = assemble(&source);
        assert_eq!(again, image);
    }

    #[test]
    fn unreferenced_memory_is_kept() {
        let image = assemble(".DATA\norg 8\nv 1 2\nend\n.MAIN\nmov %al &8\nhalt");
        let source = disassemble(&image.to_bytes()).unwrap().to_source();
        assert!(source.contains("mem_0008 1 2"));
        assert_eq!(assemble(&source).memory, image.memory);
    }

    #[test]
    fn rejects_truncated_rom() {
        let arch = crate::arch::ArchWidth::Bits16.architecture().unwrap();
        let err = decode_rom(&[Opcode::Mov as u8, 1, 0], arch).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedImage);
        let err = decode_rom(&[Opcode::Not as u8, 9, 0], arch).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidAddressingMode);
    }

    #[test]
    fn literals() {
        assert_eq!(data_literal(b"abc"), "\"abc\"");
        assert_eq!(data_literal(b"ok\n"), "\"ok\\n\"");
        assert_eq!(data_literal(&[1, 2]), "1 2");
        assert_eq!(quoted(b"a\"b\n"), "\"a\\\"b\\n\"");
    }
}
