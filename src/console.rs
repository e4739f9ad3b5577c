use std::cell::RefCell;
use std::collections::VecDeque;
use std::io::{self, BufRead, IsTerminal, Write};
use std::rc::Rc;

use console::Term;

/// Transport for everything a running program reads from or prints to a user.
pub trait Console {
    /// Show `prompt` and read one line without its line ending.
    /// `None` indicates EOF.
    fn read_line(&mut self, prompt: &str) -> io::Result<Option<String>>;

    fn write_str(&mut self, string: &str) -> io::Result<()>;
}

/// Standard input and output of the host process.
#[derive(Debug)]
pub enum TerminalConsole {
    /// Interactive terminal
    Terminal(Term),
    /// Stdin which is not attached to a terminal, i.e. piped.
    Stdin(io::Stdin),
}

impl TerminalConsole {
    pub fn new() -> Self {
        let stdin = io::stdin();
        if stdin.is_terminal() {
            TerminalConsole::Terminal(Term::stdout())
        } else {
            TerminalConsole::Stdin(stdin)
        }
    }
}

impl Default for TerminalConsole {
    fn default() -> Self {
        Self::new()
    }
}

impl Console for TerminalConsole {
    fn read_line(&mut self, prompt: &str) -> io::Result<Option<String>> {
        match self {
            Self::Terminal(term) => {
                term.write_str(prompt)?;
                term.flush()?;
                term.read_line().map(Some)
            }
            Self::Stdin(stdin) => {
                let mut stdout = io::stdout();
                write!(stdout, "{}", prompt)?;
                stdout.flush()?;

                let mut buffer = String::new();
                if stdin.lock().read_line(&mut buffer)? == 0 {
                    return Ok(None);
                }
                let line = buffer.trim_end_matches(['\n', '\r']).to_string();
                // Echo input for non-terminal source, so transcripts read the same
                if !prompt.is_empty() {
                    writeln!(stdout, "{}", line)?;
                }
                Ok(Some(line))
            }
        }
    }

    fn write_str(&mut self, string: &str) -> io::Result<()> {
        match self {
            Self::Terminal(term) => {
                term.write_str(string)?;
                term.flush()
            }
            Self::Stdin(_) => {
                let mut stdout = io::stdout();
                stdout.write_all(string.as_bytes())?;
                stdout.flush()
            }
        }
    }
}

/// In-memory console fed from a list of lines. Clones share input and output, so a copy
/// can be handed to an engine and inspected afterwards.
#[derive(Clone, Debug, Default)]
pub struct ScriptedConsole {
    inner: Rc<RefCell<Script>>,
}

#[derive(Debug, Default)]
struct Script {
    input: VecDeque<String>,
    output: String,
}

impl ScriptedConsole {
    pub fn new<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let script = Script {
            input: lines.into_iter().map(Into::into).collect(),
            output: String::new(),
        };
        ScriptedConsole {
            inner: Rc::new(RefCell::new(script)),
        }
    }

    /// Everything written so far, prompts included.
    pub fn output(&self) -> String {
        self.inner.borrow().output.clone()
    }

    pub fn remaining_input(&self) -> usize {
        self.inner.borrow().input.len()
    }
}

impl Console for ScriptedConsole {
    fn read_line(&mut self, prompt: &str) -> io::Result<Option<String>> {
        let mut script = self.inner.borrow_mut();
        script.output.push_str(prompt);
        Ok(script.input.pop_front())
    }

    fn write_str(&mut self, string: &str) -> io::Result<()> {
        self.inner.borrow_mut().output.push_str(string);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scripted_clones_share_buffers() {
        let console = ScriptedConsole::new(["first", "second"]);
        let mut handle = console.clone();
        assert_eq!(handle.read_line("> ").unwrap().as_deref(), Some("first"));
        handle.write_str("ok\n").unwrap();
        assert_eq!(console.output(), "> ok\n");
        assert_eq!(console.remaining_input(), 1);
        assert_eq!(handle.read_line("").unwrap().as_deref(), Some("second"));
        assert_eq!(handle.read_line("").unwrap(), None);
    }
}
