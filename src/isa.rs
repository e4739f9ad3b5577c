use std::fmt;

use crate::error::{Error, ErrorKind, Result};
use crate::symbol::{Mode, Register};

/// Marks the end of the ROM section in a program image. Never assigned to an instruction.
pub const TEXT_SECTION_END: u8 = 0xFF;
/// Marks the end of the initial memory image in a program image.
pub const MEMORY_SECTION_END: u8 = 0xFE;

/// Bytes taken by a single encoded operand: mode tag and value.
pub const OPERAND_LEN: usize = 2;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[repr(u8)]
pub enum Opcode {
    Nop = 0x00,
    Halt = 0x01,
    Mov = 0x02,
    Add = 0x03,
    Sub = 0x04,
    Mul = 0x05,
    Div = 0x06,
    Mod = 0x07,
    And = 0x08,
    Or = 0x09,
    Xor = 0x0A,
    Not = 0x0B,
    Shl = 0x0C,
    Shr = 0x0D,
    Inc = 0x0E,
    Dec = 0x0F,
    Cmp = 0x10,
    Jmp = 0x11,
    Je = 0x12,
    Jne = 0x13,
    Jl = 0x14,
    Jg = 0x15,
    Jle = 0x16,
    Jge = 0x17,
    Jc = 0x18,
    Jo = 0x19,
    Call = 0x1A,
    Ret = 0x1B,
    Push = 0x1C,
    Pop = 0x1D,
    Int = 0x1E,
    Sti = 0x1F,
    Cli = 0x20,
    Tron = 0x21,
    Troff = 0x22,
    Lea = 0x23,
}

/// Static description of one instruction.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct InstrInfo {
    pub op: Opcode,
    pub mnemonic: &'static str,
    pub operands: u8,
}

impl InstrInfo {
    const fn new(op: Opcode, mnemonic: &'static str, operands: u8) -> Self {
        InstrInfo {
            op,
            mnemonic,
            operands,
        }
    }

    pub fn opcode(&self) -> u8 {
        self.op as u8
    }

    /// Cost units: 1 for the opcode, 2 for each operand.
    pub fn cycles(&self) -> u32 {
        1 + 2 * self.operands as u32
    }

    /// Encoded length in bytes.
    pub fn len(&self) -> usize {
        1 + OPERAND_LEN * self.operands as usize
    }
}

/// Encoded length of a statement, judged from its token count alone.
pub fn statement_len(tokens: usize) -> Option<usize> {
    match tokens {
        1..=3 => Some(1 + OPERAND_LEN * (tokens - 1)),
        _ => None,
    }
}

/// Operand as stored after an opcode.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Operand {
    pub mode: Mode,
    pub value: u8,
}

impl Operand {
    pub fn decode(tag: u8, value: u8) -> Result<Operand> {
        let mode = Mode::try_from(tag).map_err(|_| {
            Error::new(
                ErrorKind::InvalidAddressingMode,
                format!("Unknown addressing mode tag 0x{:02x}", tag),
            )
        })?;
        Ok(Operand { mode, value })
    }

    pub fn register(&self) -> Option<Register> {
        match self.mode {
            Mode::Register => Register::from_id(self.value),
            _ => None,
        }
    }
}

/// Raw form, used in traces and the debugger.
impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.mode {
            Mode::Register => match self.register() {
                Some(reg) => write!(f, "%{}", reg),
                None => write!(f, "%{}", self.value),
            },
            Mode::Direct => write!(f, "&{}", self.value),
            Mode::Indirect => write!(f, "*{}", self.value),
            Mode::Immediate => write!(f, "${}", self.value),
            Mode::Data => write!(f, "@[{}]", self.value),
            Mode::Str => write!(f, "str@{}", self.value),
            Mode::Label => write!(f, "0x{:04x}", self.value),
        }
    }
}

#[rustfmt::skip]
pub static INSTRUCTIONS: [InstrInfo; 36] = [
    InstrInfo::new(Opcode::Nop,   "nop",   0),
    InstrInfo::new(Opcode::Halt,  "halt",  0),
    InstrInfo::new(Opcode::Mov,   "mov",   2),
    InstrInfo::new(Opcode::Add,   "add",   2),
    InstrInfo::new(Opcode::Sub,   "sub",   2),
    InstrInfo::new(Opcode::Mul,   "mul",   2),
    InstrInfo::new(Opcode::Div,   "div",   2),
    InstrInfo::new(Opcode::Mod,   "mod",   2),
    InstrInfo::new(Opcode::And,   "and",   2),
    InstrInfo::new(Opcode::Or,    "or",    2),
    InstrInfo::new(Opcode::Xor,   "xor",   2),
    InstrInfo::new(Opcode::Not,   "not",   1),
    InstrInfo::new(Opcode::Shl,   "shl",   2),
    InstrInfo::new(Opcode::Shr,   "shr",   2),
    InstrInfo::new(Opcode::Inc,   "inc",   1),
    InstrInfo::new(Opcode::Dec,   "dec",   1),
    InstrInfo::new(Opcode::Cmp,   "cmp",   2),
    InstrInfo::new(Opcode::Jmp,   "jmp",   1),
    InstrInfo::new(Opcode::Je,    "je",    1),
    InstrInfo::new(Opcode::Jne,   "jne",   1),
    InstrInfo::new(Opcode::Jl,    "jl",    1),
    InstrInfo::new(Opcode::Jg,    "jg",    1),
    InstrInfo::new(Opcode::Jle,   "jle",   1),
    InstrInfo::new(Opcode::Jge,   "jge",   1),
    InstrInfo::new(Opcode::Jc,    "jc",    1),
    InstrInfo::new(Opcode::Jo,    "jo",    1),
    InstrInfo::new(Opcode::Call,  "call",  1),
    InstrInfo::new(Opcode::Ret,   "ret",   0),
    InstrInfo::new(Opcode::Push,  "push",  1),
    InstrInfo::new(Opcode::Pop,   "pop",   1),
    InstrInfo::new(Opcode::Int,   "int",   0),
    InstrInfo::new(Opcode::Sti,   "sti",   0),
    InstrInfo::new(Opcode::Cli,   "cli",   0),
    InstrInfo::new(Opcode::Tron,  "tron",  0),
    InstrInfo::new(Opcode::Troff, "troff", 0),
    InstrInfo::new(Opcode::Lea,   "lea",   2),
];

/// Opcodes are dense, so the table doubles as an index.
pub fn by_opcode(opcode: u8) -> Option<&'static InstrInfo> {
    INSTRUCTIONS.get(opcode as usize)
}

pub fn by_mnemonic(mnemonic: &str) -> Option<&'static InstrInfo> {
    INSTRUCTIONS
        .iter()
        .find(|info| info.mnemonic.eq_ignore_ascii_case(mnemonic))
}
