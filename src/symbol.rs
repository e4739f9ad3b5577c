use std::fmt;
use std::str::FromStr;

use fxhash::FxBuildHasher;
use indexmap::IndexMap;

/// Symbol table of name -> address, in definition order.
pub type FxMap<K, V> = IndexMap<K, V, FxBuildHasher>;

pub fn new_table<V>() -> FxMap<String, V> {
    IndexMap::with_hasher(FxBuildHasher::default())
}

/// Width of a register slot or memory access.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Width {
    Byte,
    Word,
}

impl Width {
    pub fn max(self) -> u16 {
        match self {
            Width::Byte => 0xFF,
            Width::Word => 0xFFFF,
        }
    }

    pub fn bits(self) -> u32 {
        match self {
            Width::Byte => 8,
            Width::Word => 16,
        }
    }

    /// Mask for the most significant bit.
    pub fn sign_bit(self) -> u16 {
        1 << (self.bits() - 1)
    }
}

/// Represents the CPU registers. Discriminants are the encoded register ids.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
#[repr(u8)]
pub enum Register {
    Al = 0,
    Ah,
    Bl,
    Bh,
    Cl,
    Ch,
    Dl,
    Dh,
    El,
    Eh,
    Fl,
    Fh,
    Ax,
    Bx,
    Cx,
    Dx,
    Ex,
    Fx,
    /// Program counter, only writable through the generic path when configured.
    Pc,
    /// Stack pointer
    Sp,
    /// Stack segment base
    Ss,
    /// Stack segment end
    Se,
    /// Index register, I/O destination and source addressing.
    Di,
    /// Index register, I/O length and second address.
    Dp,
}

pub const REGISTER_COUNT: usize = 24;

impl Register {
    pub const ALL: [Register; REGISTER_COUNT] = [
        Register::Al,
        Register::Ah,
        Register::Bl,
        Register::Bh,
        Register::Cl,
        Register::Ch,
        Register::Dl,
        Register::Dh,
        Register::El,
        Register::Eh,
        Register::Fl,
        Register::Fh,
        Register::Ax,
        Register::Bx,
        Register::Cx,
        Register::Dx,
        Register::Ex,
        Register::Fx,
        Register::Pc,
        Register::Sp,
        Register::Ss,
        Register::Se,
        Register::Di,
        Register::Dp,
    ];

    pub const PAIRS: [Register; 6] = [
        Register::Ax,
        Register::Bx,
        Register::Cx,
        Register::Dx,
        Register::Ex,
        Register::Fx,
    ];

    pub fn from_id(id: u8) -> Option<Register> {
        Self::ALL.get(id as usize).copied()
    }

    pub fn id(self) -> u8 {
        self as u8
    }

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn width(self) -> Width {
        if (self as u8) < Register::Ax as u8 {
            Width::Byte
        } else {
            Width::Word
        }
    }

    /// Byte register -> owning pair and whether it is the high half.
    pub fn owning_pair(self) -> Option<(Register, bool)> {
        let id = self as u8;
        if id >= Register::Ax as u8 {
            return None;
        }
        let pair = Register::from_id(Register::Ax as u8 + id / 2)?;
        Some((pair, id % 2 == 1))
    }

    /// Pair register -> (low, high) byte registers.
    pub fn halves(self) -> Option<(Register, Register)> {
        let id = self as u8;
        if !(Register::Ax as u8..=Register::Fx as u8).contains(&id) {
            return None;
        }
        let low = (id - Register::Ax as u8) * 2;
        Some((Register::from_id(low)?, Register::from_id(low + 1)?))
    }

    pub fn name(self) -> &'static str {
        match self {
            Register::Al => "al",
            Register::Ah => "ah",
            Register::Bl => "bl",
            Register::Bh => "bh",
            Register::Cl => "cl",
            Register::Ch => "ch",
            Register::Dl => "dl",
            Register::Dh => "dh",
            Register::El => "el",
            Register::Eh => "eh",
            Register::Fl => "fl",
            Register::Fh => "fh",
            Register::Ax => "ax",
            Register::Bx => "bx",
            Register::Cx => "cx",
            Register::Dx => "dx",
            Register::Ex => "ex",
            Register::Fx => "fx",
            Register::Pc => "pc",
            Register::Sp => "sp",
            Register::Ss => "ss",
            Register::Se => "se",
            Register::Di => "di",
            Register::Dp => "dp",
        }
    }
}

impl FromStr for Register {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.to_ascii_lowercase();
        Register::ALL
            .iter()
            .find(|reg| reg.name() == s)
            .copied()
            .ok_or(())
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Status flags set by arithmetic, compare and control instructions.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum Flag {
    Negative = 0b0000_0001,
    Carry = 0b0000_0010,
    Overflow = 0b0000_0100,
    Zero = 0b0000_1000,
    /// Interrupt enable
    Interrupt = 0b0001_0000,
    /// Break into the debugger after every instruction
    Trap = 0b0010_0000,
    Error = 0b0100_0000,
}

impl Flag {
    pub const ALL: [Flag; 7] = [
        Flag::Negative,
        Flag::Carry,
        Flag::Overflow,
        Flag::Zero,
        Flag::Interrupt,
        Flag::Trap,
        Flag::Error,
    ];

    pub fn letter(self) -> char {
        match self {
            Flag::Negative => 'N',
            Flag::Carry => 'C',
            Flag::Overflow => 'V',
            Flag::Zero => 'Z',
            Flag::Interrupt => 'I',
            Flag::Trap => 'T',
            Flag::Error => 'E',
        }
    }
}

/// Addressing-mode tag stored in front of every operand value.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[repr(u8)]
pub enum Mode {
    Register = 0x01,
    Direct = 0x02,
    Indirect = 0x03,
    Immediate = 0x04,
    Data = 0x05,
    Str = 0x06,
    Label = 0x07,
}

impl Mode {
    pub fn tag(self) -> u8 {
        self as u8
    }

    /// Source prefix character, if the mode has one.
    pub fn prefix(self) -> Option<char> {
        match self {
            Mode::Register => Some('%'),
            Mode::Direct => Some('&'),
            Mode::Indirect => Some('*'),
            Mode::Immediate => Some('$'),
            Mode::Data => Some('@'),
            Mode::Str => Some('"'),
            Mode::Label => None,
        }
    }

    /// Select a mode by the first character of an operand token.
    pub fn from_prefix(ch: char) -> Mode {
        match ch {
            '%' => Mode::Register,
            '&' => Mode::Direct,
            '*' => Mode::Indirect,
            '$' => Mode::Immediate,
            '@' => Mode::Data,
            '"' => Mode::Str,
            _ => Mode::Label,
        }
    }
}

impl TryFrom<u8> for Mode {
    type Error = ();

    fn try_from(tag: u8) -> Result<Self, Self::Error> {
        match tag {
            0x01 => Ok(Mode::Register),
            0x02 => Ok(Mode::Direct),
            0x03 => Ok(Mode::Indirect),
            0x04 => Ok(Mode::Immediate),
            0x05 => Ok(Mode::Data),
            0x06 => Ok(Mode::Str),
            0x07 => Ok(Mode::Label),
            _ => Err(()),
        }
    }
}
