use std::fmt;

use colored::Colorize;
use log::debug;

use crate::console::Console;
use crate::error::{Error, ErrorKind, Result};
use crate::lexer::parse_int;
use crate::output;
use crate::state::RunState;

/// Bytes shown by `memory` when no length is given.
const DEFAULT_DUMP_LEN: u16 = 64;

const PROMPT: &str = "Command: ";

const HELP: &str = "\
help                     show this list
registers                dump every register
flags                    show the status flags
memory <addr> [len]      hex dump of memory, addresses in decimal or 0x hex
stack                    show the stack pointer and active calls
step                     run one instruction, then return here
go                       resume execution
quit                     stop the program
";

/// How execution continues after the prompt closes.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Resume {
    /// Break again after the next instruction
    Step,
    Go,
    /// Halt the program
    Quit,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Command {
    Help,
    Registers,
    Flags,
    Memory { address: u16, len: u16 },
    Stack,
    Step,
    Go,
    Quit,
}

/// Error parsing a command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CommandError {
    InvalidCommand {
        command_name: String,
    },
    MissingArgument {
        command_name: &'static str,
        argument_name: &'static str,
    },
    TooManyArguments {
        command_name: &'static str,
        expected_count: u8,
    },
    MalformedInteger {
        argument_name: &'static str,
        value: String,
    },
}

impl std::error::Error for CommandError {}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidCommand { command_name } => {
                write!(f, "Not a command: `{}`. Type `help` for a list", command_name)
            }
            Self::MissingArgument {
                command_name,
                argument_name,
            } => write!(f, "`{}` is missing argument <{}>", command_name, argument_name),
            Self::TooManyArguments {
                command_name,
                expected_count,
            } => write!(
                f,
                "`{}` takes at most {} argument(s)",
                command_name, expected_count
            ),
            Self::MalformedInteger {
                argument_name,
                value,
            } => write!(
                f,
                "Argument <{}> should be an integer from 0 to 65535, found `{}`",
                argument_name, value
            ),
        }
    }
}

impl TryFrom<&str> for Command {
    type Error = CommandError;

    /// Assumes line is non-empty.
    fn try_from(line: &str) -> std::result::Result<Self, Self::Error> {
        let mut args = line.split_whitespace();
        let name = args.next().unwrap_or_default().to_ascii_lowercase();
        let args: Vec<&str> = args.collect();

        let (command, name, max_args) = match name.as_str() {
            "help" | "h" => (Command::Help, "help", 0),
            "registers" | "r" => (Command::Registers, "registers", 0),
            "flags" | "f" => (Command::Flags, "flags", 0),
            "stack" => (Command::Stack, "stack", 0),
            "step" | "s" => (Command::Step, "step", 0),
            "go" | "g" | "continue" | "c" => (Command::Go, "go", 0),
            "quit" | "q" => (Command::Quit, "quit", 0),
            "memory" | "m" => {
                let Some(address) = args.first() else {
                    return Err(CommandError::MissingArgument {
                        command_name: "memory",
                        argument_name: "addr",
                    });
                };
                let address = integer_argument("addr", address)?;
                let len = match args.get(1) {
                    Some(len) => integer_argument("len", len)?,
                    None => DEFAULT_DUMP_LEN,
                };
                (Command::Memory { address, len }, "memory", 2)
            }
            _ => {
                return Err(CommandError::InvalidCommand {
                    command_name: name.clone(),
                });
            }
        };

        if args.len() > max_args as usize {
            return Err(CommandError::TooManyArguments {
                command_name: name,
                expected_count: max_args,
            });
        }
        Ok(command)
    }
}

fn integer_argument(
    argument_name: &'static str,
    value: &str,
) -> std::result::Result<u16, CommandError> {
    parse_int(value)
        .and_then(|value| u16::try_from(value).ok())
        .ok_or_else(|| CommandError::MalformedInteger {
            argument_name,
            value: value.to_string(),
        })
}

/// Interactive prompt opened by the debug interrupt, `tron` or a pending `step`.
pub struct Debugger<'a> {
    state: &'a RunState,
    console: &'a mut dyn Console,
}

impl<'a> Debugger<'a> {
    pub fn new(state: &'a RunState, console: &'a mut dyn Console) -> Self {
        Debugger { state, console }
    }

    /// Read and run commands until one resumes execution. End of input resumes.
    pub fn session(&mut self) -> Result<Resume> {
        let banner = format!("Debugger at 0x{:04x}. Type `help` for commands.", self.state.pc());
        self.write(&format!("{}\n", banner.blue()))?;

        loop {
            let line = match self.console.read_line(PROMPT) {
                Ok(Some(line)) => line,
                Ok(None) => {
                    debug!("debugger input closed, resuming");
                    return Ok(Resume::Go);
                }
                Err(err) => {
                    return Err(Error::new(
                        ErrorKind::ConsoleClosed,
                        format!("Console failed: {}", err),
                    ))
                }
            };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let command = match Command::try_from(line) {
                Ok(command) => command,
                Err(err) => {
                    self.write(&format!("{}\n", err.to_string().red()))?;
                    continue;
                }
            };
            debug!("debugger command {:?}", command);

            match command {
                Command::Help => self.write(HELP)?,
                Command::Registers => self.write(&output::registers(self.state))?,
                Command::Flags => self.write(&output::flags(self.state))?,
                Command::Memory { address, len } => {
                    match output::memory(self.state.mem(), address as usize, len as usize) {
                        Ok(dump) => self.write(&dump)?,
                        // Reported to the user, the machine keeps running
                        Err(err) => self.write(&format!("{}\n", err.message().red()))?,
                    }
                }
                Command::Stack => self.write(&output::call_stack(self.state))?,
                Command::Step => return Ok(Resume::Step),
                Command::Go => return Ok(Resume::Go),
                Command::Quit => return Ok(Resume::Quit),
            }
        }
    }

    fn write(&mut self, string: &str) -> Result<()> {
        self.console.write_str(string).map_err(|err| {
            Error::new(ErrorKind::ConsoleClosed, format!("Console failed: {}", err))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::console::ScriptedConsole;
    use crate::memory::Layout;
    use crate::output::Decolored;
    use crate::symbol::Register;

    #[test]
    fn parses_commands() {
        assert_eq!(Command::try_from("help"), Ok(Command::Help));
        assert_eq!(Command::try_from("  GO "), Ok(Command::Go));
        assert_eq!(
            Command::try_from("memory 0x10 4"),
            Ok(Command::Memory { address: 16, len: 4 })
        );
        assert_eq!(
            Command::try_from("m 32"),
            Ok(Command::Memory {
                address: 32,
                len: DEFAULT_DUMP_LEN
            })
        );
    }

    #[test]
    fn command_errors() {
        assert_eq!(
            Command::try_from("jump"),
            Err(CommandError::InvalidCommand {
                command_name: "jump".to_string()
            })
        );
        assert_eq!(
            Command::try_from("memory"),
            Err(CommandError::MissingArgument {
                command_name: "memory",
                argument_name: "addr"
            })
        );
        assert_eq!(
            Command::try_from("step 2"),
            Err(CommandError::TooManyArguments {
                command_name: "step",
                expected_count: 0
            })
        );
        assert!(matches!(
            Command::try_from("memory 70000"),
            Err(CommandError::MalformedInteger { .. })
        ));
    }

    #[test]
    fn session_runs_until_resume() {
        let mut state = RunState::new(Layout::new(64, 25, 25, 0xFFFF).unwrap(), false);
        state.write_register(Register::Ax, 7).unwrap();
        state.mem_mut().write_cstring(0, b"ok").unwrap();
        let console = ScriptedConsole::new(["", "bogus", "memory 0 2", "memory 100", "step"]);
        let mut handle = console.clone();

        let resume = Debugger::new(&state, &mut handle).session().unwrap();
        assert_eq!(resume, Resume::Step);
        let text: String = Decolored::new(&console.output()).collect();
        assert!(text.contains("Not a command: `bogus`"));
        assert!(text.contains("0x0000  6f 6b"));
        assert!(text.contains("outside of"));
        assert_eq!(console.remaining_input(), 0);
    }

    #[test]
    fn end_of_input_resumes() {
        let state = RunState::new(Layout::new(64, 25, 25, 0xFFFF).unwrap(), false);
        let mut console = ScriptedConsole::new(Vec::<String>::new());
        assert_eq!(
            Debugger::new(&state, &mut console).session().unwrap(),
            Resume::Go
        );
    }
}
