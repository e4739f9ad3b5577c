use std::fmt;

use miette::{miette, LabeledSpan, Report, Severity};

use crate::span::Span;

pub type Result<T> = std::result::Result<T, Error>;

/// Every way the assembler, loader or engine can refuse to continue.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    // Memory and registers
    InvalidMemoryAddress,
    InvalidMemoryLayout,
    CpuSizeViolation,
    ProtectedRegisterWrite,

    // Assembler
    UndefinedInstruction,
    NullDataPointer,
    NullFunctionPointer,
    InvalidRegisterCode,
    EntryPointNotFound,
    InvalidLiteral,
    InvalidOperandCount,
    OperandOutOfRange,
    DuplicateSymbol,
    UnterminatedString,
    MalformedData,

    // Program image
    MalformedImage,
    UnsupportedArchitecture,

    // Runtime
    InvalidInterrupt,
    InvalidAddressingMode,
    InvalidOperand,
    DivisionByZero,
    StackOverflow,
    StackUnderflow,
    InvalidCodeAddress,
    ConsoleClosed,
    StorageFailure,
    EngineNotRunnable,
}

impl ErrorKind {
    /// Stable diagnostic code, shown by the host next to the message.
    pub fn code(self) -> &'static str {
        match self {
            Self::InvalidMemoryAddress => "mem::invalid_address",
            Self::InvalidMemoryLayout => "mem::invalid_layout",
            Self::CpuSizeViolation => "cpu::size_violation",
            Self::ProtectedRegisterWrite => "cpu::protected_register",
            Self::UndefinedInstruction => "asm::undefined_instruction",
            Self::NullDataPointer => "asm::null_data_pointer",
            Self::NullFunctionPointer => "asm::null_function_pointer",
            Self::InvalidRegisterCode => "asm::invalid_register",
            Self::EntryPointNotFound => "asm::entry_point",
            Self::InvalidLiteral => "asm::bad_lit",
            Self::InvalidOperandCount => "asm::operand_count",
            Self::OperandOutOfRange => "asm::operand_range",
            Self::DuplicateSymbol => "asm::duplicate_symbol",
            Self::UnterminatedString => "asm::str_lit",
            Self::MalformedData => "asm::data",
            Self::MalformedImage => "image::malformed",
            Self::UnsupportedArchitecture => "image::architecture",
            Self::InvalidInterrupt => "run::invalid_interrupt",
            Self::InvalidAddressingMode => "run::addressing_mode",
            Self::InvalidOperand => "run::invalid_operand",
            Self::DivisionByZero => "run::division_by_zero",
            Self::StackOverflow => "run::stack_overflow",
            Self::StackUnderflow => "run::stack_underflow",
            Self::InvalidCodeAddress => "run::code_address",
            Self::ConsoleClosed => "run::console_closed",
            Self::StorageFailure => "run::storage",
            Self::EngineNotRunnable => "run::not_runnable",
        }
    }

    /// Process exit status reported by the host for this kind of failure.
    pub fn status_code(self) -> i32 {
        match self {
            Self::InvalidMemoryAddress => 10,
            Self::InvalidMemoryLayout => 11,
            Self::CpuSizeViolation => 12,
            Self::ProtectedRegisterWrite => 13,
            Self::UndefinedInstruction
            | Self::NullDataPointer
            | Self::NullFunctionPointer
            | Self::InvalidRegisterCode
            | Self::EntryPointNotFound
            | Self::InvalidLiteral
            | Self::InvalidOperandCount
            | Self::OperandOutOfRange
            | Self::DuplicateSymbol
            | Self::UnterminatedString
            | Self::MalformedData => 20,
            Self::MalformedImage | Self::UnsupportedArchitecture => 30,
            Self::InvalidInterrupt => 40,
            Self::InvalidAddressingMode | Self::InvalidOperand => 41,
            Self::DivisionByZero => 42,
            Self::StackOverflow | Self::StackUnderflow => 43,
            Self::InvalidCodeAddress => 44,
            Self::ConsoleClosed => 45,
            Self::StorageFailure => 46,
            Self::EngineNotRunnable => 47,
        }
    }

    fn help(self) -> Option<&'static str> {
        let help = match self {
            Self::UndefinedInstruction => "check the list of available instructions in the documentation",
            Self::NullDataPointer => "data references must name a variable declared inside a `.DATA` block",
            Self::NullFunctionPointer => "labels are declared on their own line as `.name`",
            Self::InvalidRegisterCode => "registers are al..fh, ax..fx, pc, sp, ss, se, di and dp",
            Self::EntryPointNotFound => "every program needs a `.MAIN` label",
            Self::InvalidLiteral => "literals are decimal, 0x-prefixed hex or quoted characters, 0 to 255",
            Self::InvalidOperandCount => "check the operands for this instruction",
            Self::OperandOutOfRange => "operand values are stored in a single byte; use a register or indirect address",
            Self::DuplicateSymbol => "labels and variables may only be defined once per file",
            Self::UnterminatedString => "make sure to close string literals with a \" character",
            Self::MalformedData => "a data block is `.DATA`, optional `org <addr>`, `name values...` lines and `end`",
            _ => return None,
        };
        Some(help)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// A diagnostic with its kind, a message and, for assembler errors, where it happened.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Error {
    kind: ErrorKind,
    message: String,
    line: Option<usize>,
    span: Option<Span>,
}

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Error {
            kind,
            message: message.into(),
            line: None,
            span: None,
        }
    }

    /// Attach a 1-based source line, keeping one that is already set.
    pub fn with_line(mut self, line: usize) -> Self {
        self.line.get_or_insert(line);
        self
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span.get_or_insert(span);
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn line(&self) -> Option<usize> {
        self.line
    }

    pub fn span(&self) -> Option<Span> {
        self.span
    }

    /// Render for the terminal, pointing into `src` when the error has a span.
    pub fn to_report(&self, src: Option<&str>) -> Report {
        let labels = match self.span {
            Some(span) => vec![LabeledSpan::at(span, self.kind.to_string())],
            None => Vec::new(),
        };
        let report = match self.kind.help() {
            Some(help) => miette!(
                severity = Severity::Error,
                code = self.kind.code(),
                help = help,
                labels = labels,
                "{}",
                self
            ),
            None => miette!(
                severity = Severity::Error,
                code = self.kind.code(),
                labels = labels,
                "{}",
                self
            ),
        };
        match (src, self.span) {
            (Some(src), Some(_)) => report.with_source_code(src.to_string()),
            _ => report,
        }
    }
}

impl std::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.line {
            Some(line) => write!(f, "line {}: {}", line, self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

// Constructors for the failures raised from more than one module.

pub fn invalid_address(address: usize, last: u16) -> Error {
    Error::new(
        ErrorKind::InvalidMemoryAddress,
        format!(
            "Memory address 0x{:04x} is outside of [0x0000, 0x{:04x}]",
            address, last
        ),
    )
}

pub fn size_violation(name: &str, value: u32, max: u16) -> Error {
    Error::new(
        ErrorKind::CpuSizeViolation,
        format!(
            "Value {} does not fit register `{}` (maximum {})",
            value, name, max
        ),
    )
}

pub fn undefined_opcode(opcode: u8) -> Error {
    Error::new(
        ErrorKind::UndefinedInstruction,
        format!("Encountered undefined opcode 0x{:02x}", opcode),
    )
}
