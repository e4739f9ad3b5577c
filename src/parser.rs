use log::debug;

use crate::air::{Air, AirStmt};
use crate::arch::Architecture;
use crate::config::MachineConfig;
use crate::error::{Error, ErrorKind, Result};
use crate::isa::statement_len;
use crate::lexer::{self, parse_int, Line, Token, TokenKind};
use crate::memory::{Layout, Memory};
use crate::symbol::{new_table, FxMap};

const DATA_DIRECTIVE: &str = ".DATA";
const DATA_END: &str = "end";
const ORIGIN: &str = "org";

/// First assembler pass: lays out `.DATA` blocks and assigns ROM offsets to labels.
///
/// Code statements are only measured here; they are encoded by [`Air::emit`] once every
/// label is known.
pub struct AsmParser {
    lines: Vec<Line>,
    arch: &'static dyn Architecture,
    mem: Memory,
    functions: FxMap<String, u16>,
    data_map: FxMap<String, u16>,
    stmts: Vec<AirStmt>,
    /// Bytes of ROM emitted so far
    offset: usize,
    /// Open `.DATA` block, if any
    data: Option<DataCursor>,
    /// One past the highest address written by a data block
    data_end: usize,
}

/// Write position inside a `.DATA` block. `org` sets an absolute base and restarts the
/// offset at zero.
#[derive(Clone, Copy, Debug, Default)]
struct DataCursor {
    base: usize,
    offset: usize,
}

impl DataCursor {
    fn address(&self) -> usize {
        self.base + self.offset
    }
}

impl AsmParser {
    pub fn new(src: &str, config: &MachineConfig) -> Result<Self> {
        let arch = config.arch.architecture()?;
        let layout = Layout::new(
            config.memory_size,
            config.stack_percent,
            config.data_percent,
            arch.max_memory(),
        )?;
        Ok(AsmParser {
            lines: lexer::preprocess(src)?,
            arch,
            mem: Memory::new(layout),
            functions: new_table(),
            data_map: new_table(),
            stmts: Vec::new(),
            offset: 0,
            data: None,
            data_end: 0,
        })
    }

    /// Run pass 1 over every line.
    pub fn parse(mut self) -> Result<Air> {
        let lines = std::mem::take(&mut self.lines);
        let mut last_line = 0;
        for line in lines {
            last_line = line.number;
            let number = line.number;
            self.parse_line(line).map_err(|e| e.with_line(number))?;
        }
        if self.data.is_some() {
            return Err(Error::new(
                ErrorKind::MalformedData,
                "Data block is missing its closing `end`",
            )
            .with_line(last_line));
        }

        debug!(
            "pass 1: {} statements, {} bytes of ROM, {} labels, {} variables",
            self.stmts.len(),
            self.offset,
            self.functions.len(),
            self.data_map.len()
        );
        Ok(Air::new(
            self.arch,
            self.stmts,
            self.functions,
            self.data_map,
            self.mem,
            self.data_end,
            self.offset,
        ))
    }

    fn parse_line(&mut self, line: Line) -> Result<()> {
        let Line { number, tokens } = line;

        if self.data.is_some() {
            return self.parse_data(&tokens);
        }

        let first = &tokens[0];
        if first.kind == TokenKind::Word && first.text.eq_ignore_ascii_case(DATA_DIRECTIVE) {
            self.data = Some(DataCursor::default());
            return self.parse_data(&tokens[1..]);
        }

        let mut rest = &tokens[..];
        if let Some(name) = label_name(first) {
            self.insert_function(name, first)?;
            rest = &tokens[1..];
        }
        if rest.is_empty() {
            return Ok(());
        }
        self.measure_statement(number, rest.to_vec())
    }

    fn insert_function(&mut self, name: &str, token: &Token) -> Result<()> {
        if !is_identifier(name) {
            return Err(Error::new(
                ErrorKind::MalformedData,
                format!("`{}` is not a valid label name", name),
            )
            .with_span(token.span));
        }
        if self.functions.contains_key(name) {
            return Err(Error::new(
                ErrorKind::DuplicateSymbol,
                format!("Label `{}` is defined more than once", name),
            )
            .with_span(token.span));
        }
        self.functions.insert(name.to_string(), self.offset as u16);
        Ok(())
    }

    /// Statement length depends only on its token count.
    fn measure_statement(&mut self, line: usize, tokens: Vec<Token>) -> Result<()> {
        let Some(len) = statement_len(tokens.len()) else {
            return Err(Error::new(
                ErrorKind::InvalidOperandCount,
                format!(
                    "Statements take at most two operands, found {}",
                    tokens.len() - 1
                ),
            )
            .with_span(tokens[3].span));
        };
        if tokens[0].kind != TokenKind::Word {
            return Err(Error::new(
                ErrorKind::UndefinedInstruction,
                "Lines should start with an instruction or label",
            )
            .with_span(tokens[0].span));
        }
        if self.offset + len > u16::MAX as usize {
            return Err(Error::new(
                ErrorKind::OperandOutOfRange,
                "Program does not fit in the code space",
            )
            .with_span(tokens[0].span));
        }

        self.stmts.push(AirStmt {
            line,
            offset: self.offset as u16,
            tokens,
        });
        self.offset += len;
        Ok(())
    }

    /// Handle the tokens of one line inside a `.DATA` block.
    fn parse_data(&mut self, tokens: &[Token]) -> Result<()> {
        let Some(first) = tokens.first() else {
            return Ok(());
        };

        if first.is_word(DATA_END) {
            return self.close_data(&tokens[1..]);
        }

        if first.is_word(ORIGIN) {
            let Some(value) = tokens.get(1) else {
                return Err(Error::new(ErrorKind::MalformedData, "`org` expects an address")
                    .with_span(first.span));
            };
            let base = data_value(value, u16::MAX as u32)? as usize;
            if base > self.mem.layout().last_addressable() as usize {
                return Err(crate::error::invalid_address(
                    base,
                    self.mem.layout().last_addressable(),
                )
                .with_span(value.span));
            }
            self.data = Some(DataCursor { base, offset: 0 });
            return self.parse_data(&tokens[2..]);
        }

        if first.kind != TokenKind::Word || !is_identifier(&first.text) {
            return Err(Error::new(
                ErrorKind::MalformedData,
                format!("Expected a variable name, found `{}`", first.text),
            )
            .with_span(first.span));
        }
        if self.data_map.contains_key(&first.text) {
            return Err(Error::new(
                ErrorKind::DuplicateSymbol,
                format!("Variable `{}` is defined more than once", first.text),
            )
            .with_span(first.span));
        }
        let start = self.data_cursor().address();
        self.data_map.insert(first.text.clone(), start as u16);

        let mut values = &tokens[1..];
        let mut closed = None;
        if let Some(pos) = values.iter().position(|t| t.is_word(DATA_END)) {
            closed = Some(&values[pos + 1..]);
            values = &values[..pos];
        }
        self.write_values(values)?;

        match closed {
            Some(rest) => self.close_data(rest),
            None => Ok(()),
        }
    }

    /// Strings are copied character by character, runs of numbers value by value;
    /// each group ends with a null byte.
    fn write_values(&mut self, values: &[Token]) -> Result<()> {
        let mut group: Vec<u8> = Vec::new();
        let mut in_numbers = false;
        for token in values {
            match token.kind {
                TokenKind::Str => {
                    if in_numbers {
                        self.write_group(&group, token)?;
                        group.clear();
                        in_numbers = false;
                    }
                    let bytes = string_bytes(token)?;
                    self.write_group(&bytes, token)?;
                }
                _ => {
                    group.push(data_value(token, u8::MAX as u32)? as u8);
                    in_numbers = true;
                }
            }
        }
        if in_numbers || values.is_empty() {
            // Also covers a bare name: a lone terminator
            let anchor = values.last();
            self.write_group_at(&group, anchor)?;
        }
        Ok(())
    }

    fn write_group(&mut self, bytes: &[u8], token: &Token) -> Result<()> {
        self.write_group_at(bytes, Some(token))
    }

    fn write_group_at(&mut self, bytes: &[u8], token: Option<&Token>) -> Result<()> {
        let address = self.data_cursor().address();
        let end = self.mem.write_cstring(address, bytes).map_err(|e| match token {
            Some(token) => e.with_span(token.span),
            None => e,
        })?;
        if let Some(cursor) = self.data.as_mut() {
            cursor.offset += bytes.len() + 1;
        }
        self.data_end = self.data_end.max(end + 1);
        Ok(())
    }

    fn close_data(&mut self, rest: &[Token]) -> Result<()> {
        self.data = None;
        if let Some(extra) = rest.first() {
            return Err(Error::new(
                ErrorKind::MalformedData,
                format!("Unexpected `{}` after `end`", extra.text),
            )
            .with_span(extra.span));
        }
        if self.data_end > self.mem.layout().data_start() as usize {
            debug!(
                "data block ends at 0x{:04x}, past the data segment start 0x{:04x}",
                self.data_end,
                self.mem.layout().data_start()
            );
        }
        Ok(())
    }

    fn data_cursor(&self) -> DataCursor {
        self.data.unwrap_or_default()
    }
}

/// `.name` at the start of a line.
fn label_name(token: &Token) -> Option<&str> {
    if token.kind != TokenKind::Word {
        return None;
    }
    token.text.strip_prefix('.').filter(|name| !name.is_empty())
}

pub(crate) fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Data and `org` values: `$n` (canonical literal) or a bare number.
fn data_value(token: &Token, max: u32) -> Result<u32> {
    let text = token.text.strip_prefix('$').unwrap_or(&token.text);
    match parse_int(text) {
        Some(value) if token.kind == TokenKind::Word && value <= max => Ok(value),
        _ => Err(Error::new(
            ErrorKind::InvalidLiteral,
            format!("Expected a value from 0 to {}, found `{}`", max, token.text),
        )
        .with_span(token.span)),
    }
}

fn string_bytes(token: &Token) -> Result<Vec<u8>> {
    token
        .text
        .chars()
        .map(|ch| {
            u8::try_from(ch as u32).map_err(|_| {
                Error::new(
                    ErrorKind::InvalidLiteral,
                    format!("Character `{}` does not fit in a byte", ch),
                )
                .with_span(token.span)
            })
        })
        .collect()
}
