use log::debug;

use crate::arch::Architecture;
use crate::error::{Error, ErrorKind, Result};
use crate::image::ProgramImage;
use crate::isa::InstrInfo;
use crate::lexer::{parse_int, Token, TokenKind};
use crate::memory::Memory;
use crate::symbol::{new_table, FxMap, Mode, Register};

/// Label that execution starts from.
pub const ENTRY_LABEL: &str = "MAIN";

/// Assembly intermediate representation: statements measured by pass 1, the symbol tables
/// and the memory image built from `.DATA` blocks.
#[derive(Debug)]
pub struct Air {
    arch: &'static dyn Architecture,
    stmts: Vec<AirStmt>,
    functions: FxMap<String, u16>,
    data_map: FxMap<String, u16>,
    mem: Memory,
    /// First byte after the data blocks; string literals are pooled from here
    pool_start: usize,
    rom_len: usize,
}

/// Single buffered code statement with its ROM offset.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct AirStmt {
    pub line: usize,
    pub offset: u16,
    pub tokens: Vec<Token>,
}

/// Each distinct string literal is written to memory once.
struct StringPool {
    next: usize,
    interned: FxMap<String, u16>,
}

impl Air {
    pub(crate) fn new(
        arch: &'static dyn Architecture,
        stmts: Vec<AirStmt>,
        functions: FxMap<String, u16>,
        data_map: FxMap<String, u16>,
        mem: Memory,
        pool_start: usize,
        rom_len: usize,
    ) -> Self {
        Air {
            arch,
            stmts,
            functions,
            data_map,
            mem,
            pool_start,
            rom_len,
        }
    }

    pub fn functions(&self) -> &FxMap<String, u16> {
        &self.functions
    }

    pub fn data_map(&self) -> &FxMap<String, u16> {
        &self.data_map
    }

    pub fn memory(&self) -> &Memory {
        &self.mem
    }

    pub fn rom_len(&self) -> usize {
        self.rom_len
    }

    /// Pass 2: resolve mnemonics and operands now that every symbol is known.
    pub fn emit(mut self) -> Result<ProgramImage> {
        let Some(&entry) = self.functions.get(ENTRY_LABEL) else {
            return Err(Error::new(
                ErrorKind::EntryPointNotFound,
                format!("Program has no `.{}` label", ENTRY_LABEL),
            ));
        };
        if entry as usize >= self.rom_len {
            return Err(Error::new(
                ErrorKind::EntryPointNotFound,
                format!("`.{}` is not followed by any instruction", ENTRY_LABEL),
            ));
        }

        let mut pool = StringPool {
            next: self.pool_start,
            interned: new_table(),
        };
        let stmts = std::mem::take(&mut self.stmts);
        let mut rom = Vec::with_capacity(self.rom_len);
        for stmt in &stmts {
            debug_assert_eq!(rom.len(), stmt.offset as usize);
            self.encode(stmt, &mut pool, &mut rom)
                .map_err(|e| e.with_line(stmt.line))?;
        }

        debug!(
            "pass 2: {} bytes of ROM, {} pooled strings, entry at 0x{:04x}",
            rom.len(),
            pool.interned.len(),
            entry
        );
        Ok(ProgramImage {
            rom,
            memory: self.mem.image().to_vec(),
            arch: self.arch.width(),
            entry,
        })
    }

    fn encode(&mut self, stmt: &AirStmt, pool: &mut StringPool, rom: &mut Vec<u8>) -> Result<()> {
        let (mnemonic, operands) = stmt
            .tokens
            .split_first()
            .ok_or_else(|| Error::new(ErrorKind::UndefinedInstruction, "Empty statement"))?;
        let info = self.instruction(mnemonic)?;
        if operands.len() != info.operands as usize {
            return Err(Error::new(
                ErrorKind::InvalidOperandCount,
                format!(
                    "`{}` takes {} operand(s), found {}",
                    info.mnemonic,
                    info.operands,
                    operands.len()
                ),
            )
            .with_span(mnemonic.span));
        }

        rom.push(info.opcode());
        for token in operands {
            let (mode, value) = self
                .encode_operand(token, pool)
                .map_err(|e| e.with_span(token.span))?;
            rom.push(mode.tag());
            rom.push(value);
        }
        Ok(())
    }

    fn instruction(&self, token: &Token) -> Result<&'static InstrInfo> {
        if token.kind == TokenKind::Word {
            if let Some(info) = self.arch.by_mnemonic(&token.text) {
                return Ok(info);
            }
        }
        Err(Error::new(
            ErrorKind::UndefinedInstruction,
            format!("Unknown instruction `{}`", token.text),
        )
        .with_span(token.span))
    }

    fn encode_operand(&mut self, token: &Token, pool: &mut StringPool) -> Result<(Mode, u8)> {
        if token.kind == TokenKind::Str {
            let address = pool.intern(&mut self.mem, &token.text)?;
            return Ok((Mode::Str, fit_value(address as u32, &token.text)?));
        }

        let mut chars = token.text.chars();
        let mode = chars.next().map_or(Mode::Label, Mode::from_prefix);
        let value = match mode {
            Mode::Register => register_or_literal(chars.as_str(), true)?,
            Mode::Direct | Mode::Indirect | Mode::Immediate => {
                register_or_literal(chars.as_str(), false)?
            }
            Mode::Data => {
                let name = chars.as_str();
                match self.data_map.get(name) {
                    Some(&address) => address as u32,
                    None => {
                        return Err(Error::new(
                            ErrorKind::NullDataPointer,
                            format!("Variable `{}` is not defined", name),
                        ))
                    }
                }
            }
            Mode::Label => {
                // `call .name` and `call name` are both accepted
                let name = token.text.strip_prefix('.').unwrap_or(&token.text);
                match self.functions.get(name) {
                    Some(&offset) => offset as u32,
                    None => {
                        return Err(Error::new(
                            ErrorKind::NullFunctionPointer,
                            format!("Label `{}` is not defined", name),
                        ))
                    }
                }
            }
            // Quoted tokens never reach here as words
            Mode::Str => {
                return Err(Error::new(
                    ErrorKind::InvalidLiteral,
                    format!("Malformed string operand `{}`", token.text),
                ))
            }
        };
        Ok((mode, fit_value(value, &token.text)?))
    }
}

impl StringPool {
    fn intern(&mut self, mem: &mut Memory, text: &str) -> Result<u16> {
        if let Some(&address) = self.interned.get(text) {
            return Ok(address);
        }
        let bytes = text
            .chars()
            .map(|ch| u8::try_from(ch as u32))
            .collect::<std::result::Result<Vec<u8>, _>>()
            .map_err(|_| {
                Error::new(
                    ErrorKind::InvalidLiteral,
                    format!("String literal \"{}\" has characters outside one byte", text),
                )
            })?;
        let address = self.next;
        let end = mem.write_cstring(address, &bytes)?;
        self.next = end + 1;
        self.interned.insert(text.to_string(), address as u16);
        Ok(address as u16)
    }
}

/// Value after a `%`, `&`, `*` or `$` prefix: a register name or a number.
///
/// For register operands a number must be a valid register id.
fn register_or_literal(text: &str, register_only: bool) -> Result<u32> {
    if let Ok(reg) = text.parse::<Register>() {
        return Ok(reg.id() as u32);
    }
    match parse_int(text) {
        Some(id) if register_only => match u8::try_from(id).ok().and_then(Register::from_id) {
            Some(reg) => Ok(reg.id() as u32),
            None => Err(Error::new(
                ErrorKind::InvalidRegisterCode,
                format!("`{}` is not a register id", text),
            )),
        },
        Some(value) => Ok(value),
        None => Err(Error::new(
            ErrorKind::InvalidRegisterCode,
            format!("`{}` is neither a number nor a register", text),
        )),
    }
}

fn fit_value(value: u32, text: &str) -> Result<u8> {
    u8::try_from(value).map_err(|_| {
        Error::new(
            ErrorKind::OperandOutOfRange,
            format!("`{}` resolves to {}, which does not fit in a byte", text, value),
        )
    })
}

#[cfg(test)]
mod tests {
    use crate::config::MachineConfig;
    use crate::error::ErrorKind;
    use crate::isa::{Opcode, TEXT_SECTION_END};
    use crate::parser::AsmParser;
    use crate::symbol::{Mode, Register};

    use super::*;

    fn assemble(src: &str) -> Result<ProgramImage> {
        AsmParser::new(src, &MachineConfig::default())?.parse()?.emit()
    }

    #[test]
    fn single_halt() {
        let image = assemble(".MAIN\nhalt").unwrap();
        assert_eq!(image.rom, vec![Opcode::Halt as u8]);
        assert_eq!(image.entry, 0);
        let bytes = image.to_bytes();
        assert_eq!(bytes[0], Opcode::Halt as u8);
        assert_eq!(bytes[1], TEXT_SECTION_END);
    }

    #[test]
    fn operands_are_tagged() {
        let image = assemble(
            ".DATA\norg 16\nv 7\nend\n.MAIN\nmov %ax $5\nmov &3 *4\nmov %bl @v\njmp MAIN",
        )
        .unwrap();
        assert_eq!(
            image.rom,
            vec![
                Opcode::Mov as u8,
                Mode::Register.tag(),
                Register::Ax.id(),
                Mode::Immediate.tag(),
                5,
                Opcode::Mov as u8,
                Mode::Direct.tag(),
                3,
                Mode::Indirect.tag(),
                4,
                Opcode::Mov as u8,
                Mode::Register.tag(),
                Register::Bl.id(),
                Mode::Data.tag(),
                16,
                Opcode::Jmp as u8,
                Mode::Label.tag(),
                0,
            ]
        );
    }

    #[test]
    fn string_literals_are_pooled() {
        let image = assemble(".DATA\nmsg \"ab\"\nend\n.MAIN\nlea %di \"xy\"\nlea %dp \"xy\"\nhalt").unwrap();
        // "ab\0" occupies 0..3, the pool starts at 3
        assert_eq!(image.rom[3..5], [Mode::Str.tag(), 3]);
        assert_eq!(image.rom[8..10], [Mode::Str.tag(), 3]);
        assert_eq!(image.memory, b"ab\0xy".to_vec());
    }

    #[test]
    fn forward_labels() {
        let image = assemble(".MAIN\ncall func\nhalt\n.func\nret").unwrap();
        assert_eq!(image.rom[..3], [Opcode::Call as u8, Mode::Label.tag(), 4]);
    }

    #[test]
    fn missing_symbols() {
        let err = assemble(".MAIN\ncall undefined_label").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NullFunctionPointer);
        assert_eq!(err.line(), Some(2));
        assert!(err.span().is_some());
        let err = assemble(".MAIN\nmov %al @nothing").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NullDataPointer);
        let err = assemble("halt").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::EntryPointNotFound);
        let err = assemble("halt\n.MAIN").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::EntryPointNotFound);
    }

    #[test]
    fn operand_errors() {
        let err = assemble(".MAIN\nmvo %ax $1").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UndefinedInstruction);
        let err = assemble(".MAIN\nmov %zz $1").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidRegisterCode);
        let err = assemble(".MAIN\nmov %30 $1").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidRegisterCode);
        let err = assemble(".MAIN\nmov %ax $300").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OperandOutOfRange);
        let err = assemble(".MAIN\nhalt %ax").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidOperandCount);
        let err = assemble(".MAIN\nmov %ax").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidOperandCount);
    }

    #[test]
    fn register_names_as_values() {
        let image = assemble(".MAIN\nmov %ax $dx\nmov %12 $1").unwrap();
        assert_eq!(image.rom[3..5], [Mode::Immediate.tag(), Register::Dx.id()]);
        assert_eq!(image.rom[5..8], [Opcode::Mov as u8, Mode::Register.tag(), 12]);
    }
}
