use crate::error::{invalid_address, Error, ErrorKind, Result};

/// Smallest memory that still fits a non-empty data and stack segment.
pub const MIN_MEMORY: usize = 16;

/// Segment boundaries computed from the configured size and percentages.
///
/// ```text
/// 0 .. data_start          program-loaded data (.DATA, string pool)
/// data_start .. stack_start data segment
/// stack_start .. size       stack, grows downward from the top
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Layout {
    size: usize,
    data_start: u16,
    stack_start: u16,
}

impl Layout {
    pub fn new(size: usize, stack_percent: u8, data_percent: u8, max: usize) -> Result<Layout> {
        if !(MIN_MEMORY..=max).contains(&size) {
            return Err(Error::new(
                ErrorKind::InvalidMemoryLayout,
                format!(
                    "Memory size {} is outside of the supported range {}..={}",
                    size, MIN_MEMORY, max
                ),
            ));
        }
        if stack_percent > 100 || data_percent > 100 {
            return Err(Error::new(
                ErrorKind::InvalidMemoryLayout,
                format!(
                    "Segment percentages must be at most 100 (stack {}, data {})",
                    stack_percent, data_percent
                ),
            ));
        }

        // Each segment holds at least one byte and leaves at least one byte
        let stack_size = (size * stack_percent as usize / 100).clamp(1, size - 1);
        let data_size = (size * data_percent as usize / 100).clamp(1, size - 1);
        let stack_start = size - stack_size;
        let data_start = stack_start as isize - data_size as isize;
        if data_start < 0 {
            return Err(Error::new(
                ErrorKind::InvalidMemoryLayout,
                format!(
                    "Stack ({}%) and data ({}%) segments do not fit in {} bytes",
                    stack_percent, data_percent, size
                ),
            ));
        }

        Ok(Layout {
            size,
            data_start: data_start as u16,
            stack_start: stack_start as u16,
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn data_start(&self) -> u16 {
        self.data_start
    }

    pub fn stack_start(&self) -> u16 {
        self.stack_start
    }

    pub fn last_addressable(&self) -> u16 {
        (self.size - 1) as u16
    }
}

/// Flat byte-addressed memory. Every access is checked against the layout.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Memory {
    layout: Layout,
    bytes: Box<[u8]>,
}

impl Memory {
    pub fn new(layout: Layout) -> Self {
        Memory {
            layout,
            bytes: vec![0; layout.size()].into_boxed_slice(),
        }
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// Zero every byte.
    pub fn clear(&mut self) {
        self.bytes.fill(0);
    }

    fn check(&self, address: usize) -> Result<usize> {
        if address <= self.layout.last_addressable() as usize {
            Ok(address)
        } else {
            Err(invalid_address(address, self.layout.last_addressable()))
        }
    }

    pub fn read_byte(&self, address: usize) -> Result<u8> {
        let address = self.check(address)?;
        Ok(self.bytes[address])
    }

    pub fn write_byte(&mut self, address: usize, value: u8) -> Result<()> {
        let address = self.check(address)?;
        self.bytes[address] = value;
        Ok(())
    }

    /// Little-endian; both bytes must be addressable.
    pub fn read_word(&self, address: usize) -> Result<u16> {
        self.check(address + 1)?;
        let low = self.read_byte(address)?;
        let high = self.read_byte(address + 1)?;
        Ok(u16::from_le_bytes([low, high]))
    }

    pub fn write_word(&mut self, address: usize, value: u16) -> Result<()> {
        self.check(address)?;
        self.check(address + 1)?;
        let [low, high] = value.to_le_bytes();
        self.bytes[address] = low;
        self.bytes[address + 1] = high;
        Ok(())
    }

    /// Read a null-terminated string starting at `address`, without the terminator.
    pub fn read_cstring(&self, address: usize) -> Result<Vec<u8>> {
        let mut bytes = Vec::new();
        for addr in address.. {
            match self.read_byte(addr)? {
                0 => break,
                byte => bytes.push(byte),
            }
        }
        Ok(bytes)
    }

    /// Write `bytes` and a null terminator. Returns the address of the terminator.
    pub fn write_cstring(&mut self, address: usize, bytes: &[u8]) -> Result<usize> {
        // Check the whole range first so a failing write leaves memory untouched
        self.check(address + bytes.len())?;
        self.load(address, bytes)?;
        let end = address + bytes.len();
        self.bytes[end] = 0;
        Ok(end)
    }

    /// Copy a block of bytes into memory at `address`.
    pub fn load(&mut self, address: usize, bytes: &[u8]) -> Result<()> {
        if bytes.is_empty() {
            return Ok(());
        }
        self.check(address + bytes.len() - 1)?;
        self.bytes[address..address + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    pub fn slice(&self, address: usize, len: usize) -> Result<&[u8]> {
        if len == 0 {
            return Ok(&[]);
        }
        self.check(address)?;
        self.check(address + len - 1)?;
        Ok(&self.bytes[address..address + len])
    }

    /// Memory contents with trailing zero bytes removed.
    pub fn image(&self) -> &[u8] {
        let end = self
            .bytes
            .iter()
            .rposition(|byte| *byte != 0)
            .map_or(0, |last| last + 1);
        &self.bytes[..end]
    }
}
