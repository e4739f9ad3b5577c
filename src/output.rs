use std::cell::RefCell;
use std::fmt::Write;
use std::str::Chars;

use colored::Colorize;

use crate::error::Result;
use crate::memory::Memory;
use crate::state::RunState;
use crate::symbol::{Flag, Register};

/// Bytes per row of a memory dump.
const DUMP_WIDTH: usize = 16;

thread_local! {
    static IS_MINIMAL: RefCell<bool> = const { RefCell::new(false) };
}

/// Plain output without colors or box drawing, suited for blackbox tests.
pub fn set_minimal(new_value: bool) -> bool {
    IS_MINIMAL.with(|value| value.replace(new_value))
}

pub fn is_minimal() -> bool {
    IS_MINIMAL.with(|value| *value.borrow())
}

fn finish(string: String) -> String {
    if is_minimal() {
        Decolored::new(&string).collect()
    } else {
        string
    }
}

/// Register table: pairs with their halves, then the dedicated word registers.
pub fn registers(state: &RunState) -> String {
    let mut out = String::new();
    if is_minimal() {
        for reg in Register::ALL {
            let _ = writeln!(out, "{} {}", reg, state.reg(reg));
        }
        return out;
    }

    out.push_str(&format!("{}\n", "┌──────────────────────────────────────────┐".dimmed()));
    out.push_str(&format!(
        "{}      {}{}\n",
        "│".dimmed(),
        "hex      uint     int   high  low  ".italic(),
        "│".dimmed()
    ));
    for pair in Register::PAIRS {
        let value = state.reg(pair);
        let (low, high) = pair.halves().unwrap_or((pair, pair));
        let _ = writeln!(
            out,
            "{} {}  0x{:04x}  {:>6}  {:>6}   0x{:02x}  0x{:02x} {}",
            "│".dimmed(),
            pair.name().bold(),
            value,
            value,
            value as i16,
            state.reg(high),
            state.reg(low),
            "│".dimmed()
        );
    }
    for reg in [
        Register::Pc,
        Register::Sp,
        Register::Ss,
        Register::Se,
        Register::Di,
        Register::Dp,
    ] {
        let value = state.reg(reg);
        let _ = writeln!(
            out,
            "{} {}  0x{:04x}  {:>6}  {:>6}               {}",
            "│".dimmed(),
            reg.name().bold(),
            value,
            value,
            value as i16,
            "│".dimmed()
        );
    }
    out.push_str(&format!("{}\n", "└──────────────────────────────────────────┘".dimmed()));
    out
}

/// One letter per flag, upper case when set.
pub fn flags(state: &RunState) -> String {
    let letters: String = Flag::ALL
        .iter()
        .map(|flag| {
            let letter = flag.letter();
            if state.flag(*flag) {
                letter.to_string().bold().to_string()
            } else {
                letter.to_ascii_lowercase().to_string().dimmed().to_string()
            }
        })
        .collect();
    finish(format!("flags {} (0b{:07b})\n", letters, state.flags()))
}

/// Hex dump with a character column.
pub fn memory(mem: &Memory, address: usize, len: usize) -> Result<String> {
    let bytes = mem.slice(address, len)?;
    let mut out = String::new();
    for (row, chunk) in bytes.chunks(DUMP_WIDTH).enumerate() {
        let start = address + row * DUMP_WIDTH;
        let hex = chunk
            .iter()
            .map(|byte| format!("{:02x}", byte))
            .collect::<Vec<_>>()
            .join(" ");
        let text: String = chunk
            .iter()
            .map(|byte| match byte {
                0x20..=0x7e => *byte as char,
                _ => '.',
            })
            .collect();
        let _ = writeln!(
            out,
            "{}  {:<width$}  {}",
            format!("0x{:04x}", start).bold(),
            hex,
            text.dimmed(),
            width = DUMP_WIDTH * 3 - 1
        );
    }
    Ok(finish(out))
}

/// Return addresses of active calls, innermost first.
pub fn call_stack(state: &RunState) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "sp 0x{:04x}  segment 0x{:04x}..=0x{:04x}",
        state.reg(Register::Sp),
        state.reg(Register::Ss),
        state.reg(Register::Se)
    );
    if state.call_stack().is_empty() {
        out.push_str(&format!("{}\n", "(no active calls)".dimmed()));
    }
    for (depth, addr) in state.call_stack().iter().rev().enumerate() {
        let _ = writeln!(out, "#{:<3} return to 0x{:04x}", depth, addr);
    }
    finish(out)
}

/// Characters of a string with ANSI color sequences removed.
pub struct Decolored<'a> {
    chars: Chars<'a>,
}

impl<'a> Decolored<'a> {
    pub fn new(string: &'a str) -> Self {
        Self {
            chars: string.chars(),
        }
    }
}

impl<'a> Iterator for Decolored<'a> {
    type Item = char;
    fn next(&mut self) -> Option<Self::Item> {
        while let Some(ch) = self.chars.next() {
            // Skip everything between '\x1b' and 'm' (inclusive)
            if ch == '\x1b' {
                while self.chars.next().is_some_and(|ch| ch != 'm') {}
                continue;
            }
            return Some(ch);
        }
        None
    }
}
