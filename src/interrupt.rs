use std::io;

use log::{debug, warn};

use crate::console::Console;
use crate::error::{Error, ErrorKind, Result};
use crate::lexer::parse_int;
use crate::state::RunState;
use crate::storage::Storage;
use crate::symbol::{Flag, Register};

/// Interrupt classes, selected by `al` when `int` executes.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum Interrupt {
    StringInput = 1,
    NumberInput = 2,
    Debug = 3,
    StringConcat = 4,
    StringCopy = 5,
    MemoryCopy = 6,
    File = 7,
    PrintString = 8,
    PrintNumber = 9,
    PrintChar = 10,
}

impl Interrupt {
    pub const ALL: [Interrupt; 10] = [
        Interrupt::StringInput,
        Interrupt::NumberInput,
        Interrupt::Debug,
        Interrupt::StringConcat,
        Interrupt::StringCopy,
        Interrupt::MemoryCopy,
        Interrupt::File,
        Interrupt::PrintString,
        Interrupt::PrintNumber,
        Interrupt::PrintChar,
    ];

    pub fn from_code(code: u8) -> Option<Interrupt> {
        Self::ALL.iter().copied().find(|int| *int as u8 == code)
    }

    /// Source name usable in place of the number.
    pub fn signal_name(self) -> &'static str {
        match self {
            Interrupt::StringInput => "INT_STRING_INPUT",
            Interrupt::NumberInput => "INT_NUMBER_INPUT",
            Interrupt::Debug => "INT_DEBUG",
            Interrupt::StringConcat => "INT_STRING_CONCAT",
            Interrupt::StringCopy => "INT_STRING_COPY",
            Interrupt::MemoryCopy => "INT_MEMORY_COPY",
            Interrupt::File => "INT_FILE",
            Interrupt::PrintString => "INT_PRINT_STRING",
            Interrupt::PrintNumber => "INT_PRINT_NUMBER",
            Interrupt::PrintChar => "INT_PRINT_CHAR",
        }
    }
}

/// FILE interrupt sub-operations, selected by `bl`.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum FileOp {
    Read = 0,
    Save = 1,
    Append = 2,
    Delete = 3,
}

impl FileOp {
    pub const ALL: [FileOp; 4] = [FileOp::Read, FileOp::Save, FileOp::Append, FileOp::Delete];

    pub fn from_code(code: u8) -> Option<FileOp> {
        Self::ALL.iter().copied().find(|op| *op as u8 == code)
    }

    pub fn signal_name(self) -> &'static str {
        match self {
            FileOp::Read => "FILE_READ",
            FileOp::Save => "FILE_SAVE",
            FileOp::Append => "FILE_APPEND",
            FileOp::Delete => "FILE_DELETE",
        }
    }
}

/// Value of a named signal such as `INT_PRINT_STRING` or `FILE_SAVE`.
pub fn named_signal(name: &str) -> Option<u8> {
    Interrupt::ALL
        .iter()
        .find(|int| int.signal_name() == name)
        .map(|int| *int as u8)
        .or_else(|| {
            FileOp::ALL
                .iter()
                .find(|op| op.signal_name() == name)
                .map(|op| *op as u8)
        })
}

/// What the engine should do after an interrupt returns.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Outcome {
    Handled,
    /// Suspend and open the debugger prompt.
    Debug,
    /// Unknown class or file operation; already reported, execution continues.
    Invalid(Error),
}

/// Everything an interrupt handler may touch, borrowed from the engine for one `int`.
pub struct Dispatcher<'a> {
    pub state: &'a mut RunState,
    pub console: &'a mut dyn Console,
    pub storage: &'a mut dyn Storage,
}

impl<'a> Dispatcher<'a> {
    pub fn new(
        state: &'a mut RunState,
        console: &'a mut dyn Console,
        storage: &'a mut dyn Storage,
    ) -> Self {
        Dispatcher {
            state,
            console,
            storage,
        }
    }

    pub fn dispatch(&mut self) -> Result<Outcome> {
        let code = self.state.reg(Register::Al) as u8;
        let Some(interrupt) = Interrupt::from_code(code) else {
            let err = Error::new(
                ErrorKind::InvalidInterrupt,
                format!("invalid interrupt {}", code),
            );
            return self.report_invalid(err);
        };
        debug!("interrupt {} ({})", code, interrupt.signal_name());

        match interrupt {
            Interrupt::StringInput => self.string_input()?,
            Interrupt::NumberInput => self.number_input()?,
            Interrupt::Debug => return Ok(Outcome::Debug),
            Interrupt::StringConcat => {
                let mut joined = self.cstring_at(Register::Di)?;
                joined.extend(self.cstring_at(Register::Dp)?);
                let dest = self.state.reg(Register::Bx) as usize;
                self.state.mem_mut().write_cstring(dest, &joined)?;
            }
            Interrupt::StringCopy => {
                let string = self.cstring_at(Register::Di)?;
                let dest = self.state.reg(Register::Dp) as usize;
                self.state.mem_mut().write_cstring(dest, &string)?;
            }
            Interrupt::MemoryCopy => {
                let len = self.state.reg(Register::Cx) as usize;
                let src = self.state.reg(Register::Di) as usize;
                let dest = self.state.reg(Register::Dp) as usize;
                // Copy out first so overlapping ranges behave
                let bytes = self.state.mem().slice(src, len)?.to_vec();
                self.state.mem_mut().load(dest, &bytes)?;
            }
            Interrupt::File => return self.file(),
            Interrupt::PrintString => {
                let string = self.cstring_at(Register::Di)?;
                self.write(&latin1(&string))?;
            }
            Interrupt::PrintNumber => {
                let value = self.state.reg(Register::Dx);
                self.write(&value.to_string())?;
            }
            Interrupt::PrintChar => {
                let ch = self.state.reg(Register::Dl) as u8 as char;
                self.write(&ch.to_string())?;
            }
        }
        Ok(Outcome::Handled)
    }

    /// Recoverable: reported on the console, execution goes on.
    fn report_invalid(&mut self, err: Error) -> Result<Outcome> {
        warn!("{} ({})", err.message(), err.kind().code());
        self.write(&format!("{}\n", err.message()))?;
        Ok(Outcome::Invalid(err))
    }

    /// Line of input stored at `di`; `dp` receives the address of its terminator.
    /// Asks again while the line has characters that do not fit a byte.
    fn string_input(&mut self) -> Result<()> {
        let bytes = loop {
            let line = self.read_line("")?;
            match line
                .chars()
                .map(|ch| u8::try_from(u32::from(ch)).map_err(|_| ch))
                .collect::<std::result::Result<Vec<u8>, char>>()
            {
                Ok(bytes) => break bytes,
                Err(ch) => self.write(&format!(
                    "`{}` is not a single-byte character, try again\n",
                    ch
                ))?,
            }
        };
        let dest = self.state.reg(Register::Di) as usize;
        let end = self.state.mem_mut().write_cstring(dest, &bytes)?;
        self.state.write_register(Register::Dp, end as u32)
    }

    /// Number into `dx`. Asks again until the input parses.
    fn number_input(&mut self) -> Result<()> {
        loop {
            let line = self.read_line("")?;
            match parse_number(line.trim()) {
                Some(value) => return self.state.write_register(Register::Dx, value as u32),
                None => self.write(&format!("`{}` is not a number, try again\n", line.trim()))?,
            }
        }
    }

    /// Operation in `bl`, path string at `cx`, buffer at `di`, length in `dp`.
    fn file(&mut self) -> Result<Outcome> {
        let code = self.state.reg(Register::Bl) as u8;
        let Some(op) = FileOp::from_code(code) else {
            let err = Error::new(
                ErrorKind::InvalidInterrupt,
                format!("invalid file operation {}", code),
            );
            return self.report_invalid(err);
        };
        let name = latin1(&self.cstring_at(Register::Cx)?);
        let buffer = self.state.reg(Register::Di) as usize;
        debug!("file {} `{}`", op.signal_name(), name);

        match op {
            FileOp::Read => match self.storage.read_file(&name).map_err(storage_error(&name))? {
                Some(bytes) => {
                    self.state.mem_mut().load(buffer, &bytes)?;
                    self.state.write_register(Register::Dp, bytes.len() as u32)?;
                    self.state.set_flag(Flag::Error, false);
                }
                None => {
                    self.state.write_register(Register::Dp, 0)?;
                    self.state.set_flag(Flag::Error, true);
                }
            },
            FileOp::Save | FileOp::Append => {
                let len = self.state.reg(Register::Dp) as usize;
                let bytes = self.state.mem().slice(buffer, len)?.to_vec();
                let result = if op == FileOp::Save {
                    self.storage.save_file(&name, &bytes)
                } else {
                    self.storage.append_file(&name, &bytes)
                };
                result.map_err(storage_error(&name))?;
            }
            FileOp::Delete => self
                .storage
                .delete_file(&name)
                .map_err(storage_error(&name))?,
        }
        Ok(Outcome::Handled)
    }

    fn cstring_at(&self, reg: Register) -> Result<Vec<u8>> {
        self.state.mem().read_cstring(self.state.reg(reg) as usize)
    }

    fn read_line(&mut self, prompt: &str) -> Result<String> {
        match self.console.read_line(prompt) {
            Ok(Some(line)) => Ok(line),
            Ok(None) => Err(Error::new(
                ErrorKind::ConsoleClosed,
                "Program requested input after the end of input",
            )),
            Err(err) => Err(console_error(err)),
        }
    }

    fn write(&mut self, string: &str) -> Result<()> {
        self.console.write_str(string).map_err(console_error)
    }
}

/// Unsigned decimal, `0x` hex, or a negative decimal stored as two's complement.
fn parse_number(text: &str) -> Option<u16> {
    if let Some(abs) = text.strip_prefix('-') {
        let abs = parse_int(abs)?;
        return (abs <= 0x8000).then(|| (abs as u16).wrapping_neg());
    }
    parse_int(text).and_then(|value| u16::try_from(value).ok())
}

/// Memory bytes shown as characters, one per byte.
fn latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|byte| *byte as char).collect()
}

fn console_error(err: io::Error) -> Error {
    Error::new(ErrorKind::ConsoleClosed, format!("Console failed: {}", err))
}

fn storage_error(name: &str) -> impl Fn(io::Error) -> Error + '_ {
    move |err| {
        Error::new(
            ErrorKind::StorageFailure,
            format!("File `{}` could not be accessed: {}", name, err),
        )
    }
}
