use crate::error::{size_violation, Error, ErrorKind, Result};
use crate::memory::{Layout, Memory};
use crate::symbol::{Flag, Register, Width, REGISTER_COUNT};

/// Register file, flags and memory of one machine.
///
/// Byte registers and their pair are stored separately and rewritten together on every
/// write, so `pair == (high << 8) | low` holds after any successful write.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct RunState {
    reg: [u16; REGISTER_COUNT],
    flags: u8,
    mem: Memory,
    /// Return addresses of active `call`s, innermost last. Mirrors the memory stack.
    call_stack: Vec<u16>,
    allow_pc_write: bool,
}

impl RunState {
    pub fn new(layout: Layout, allow_pc_write: bool) -> Self {
        RunState {
            reg: [0; REGISTER_COUNT],
            flags: 0,
            mem: Memory::new(layout),
            call_stack: Vec::new(),
            allow_pc_write,
        }
    }

    /// Return to the power-on state: registers, flags and memory zeroed, `pc` at 0.
    pub fn reset(&mut self) {
        self.reg = [0; REGISTER_COUNT];
        self.flags = 0;
        self.mem.clear();
        self.call_stack.clear();
    }

    pub fn reg(&self, reg: Register) -> u16 {
        self.reg[reg.index()]
    }

    /// Write through the generic path: width and `pc` protection are enforced.
    pub fn write_register(&mut self, reg: Register, value: u32) -> Result<()> {
        if reg == Register::Pc && !self.allow_pc_write {
            return Err(Error::new(
                ErrorKind::ProtectedRegisterWrite,
                "Writing `pc` directly is disabled",
            ));
        }
        let max = reg.width().max();
        if value > max as u32 {
            return Err(size_violation(reg.name(), value, max));
        }
        self.set_reg(reg, value as u16);
        Ok(())
    }

    /// Assumes `value` already fits `reg`.
    fn set_reg(&mut self, reg: Register, value: u16) {
        debug_assert!(value <= reg.width().max(), "unchecked register overflow");
        self.reg[reg.index()] = value;
        if let Some((low, high)) = reg.halves() {
            self.reg[low.index()] = value & 0xFF;
            self.reg[high.index()] = value >> 8;
        } else if let Some((pair, is_high)) = reg.owning_pair() {
            let old = self.reg[pair.index()];
            self.reg[pair.index()] = if is_high {
                (old & 0x00FF) | (value << 8)
            } else {
                (old & 0xFF00) | value
            };
        }
    }

    pub fn pc(&self) -> u16 {
        self.reg(Register::Pc)
    }

    /// Engine-internal control transfer; not subject to the write protection.
    pub fn set_pc(&mut self, pc: u16) {
        self.reg[Register::Pc.index()] = pc;
    }

    pub fn flag(&self, flag: Flag) -> bool {
        self.flags & flag as u8 != 0
    }

    pub fn set_flag(&mut self, flag: Flag, value: bool) {
        if value {
            self.flags |= flag as u8;
        } else {
            self.flags &= !(flag as u8);
        }
    }

    pub fn flags(&self) -> u8 {
        self.flags
    }

    /// Update zero and negative from a result of the given width.
    pub fn set_result_flags(&mut self, value: u16, width: Width) {
        self.set_flag(Flag::Zero, value == 0);
        self.set_flag(Flag::Negative, value & width.sign_bit() != 0);
    }

    pub fn mem(&self) -> &Memory {
        &self.mem
    }

    pub fn mem_mut(&mut self) -> &mut Memory {
        &mut self.mem
    }

    pub fn layout(&self) -> &Layout {
        self.mem.layout()
    }

    pub fn read_byte(&self, address: usize) -> Result<u8> {
        self.mem.read_byte(address)
    }

    pub fn write_byte(&mut self, address: usize, value: u8) -> Result<()> {
        self.mem.write_byte(address, value)
    }

    pub fn read_word(&self, address: usize) -> Result<u16> {
        self.mem.read_word(address)
    }

    pub fn write_word(&mut self, address: usize, value: u16) -> Result<()> {
        self.mem.write_word(address, value)
    }

    /// Point the stack registers at the stack segment, leaving the stack empty.
    pub fn init_stack(&mut self) {
        let layout = *self.layout();
        self.reg[Register::Ss.index()] = layout.stack_start();
        self.reg[Register::Se.index()] = layout.last_addressable();
        self.reg[Register::Sp.index()] = layout.size() as u16;
    }

    pub fn push_word(&mut self, value: u16) -> Result<()> {
        let sp = self.reg(Register::Sp) as usize;
        let ss = self.reg(Register::Ss) as usize;
        if sp < ss + 2 {
            return Err(Error::new(
                ErrorKind::StackOverflow,
                format!("Stack overflow: push below segment base 0x{:04x}", ss),
            ));
        }
        let sp = sp - 2;
        self.mem.write_word(sp, value)?;
        self.reg[Register::Sp.index()] = sp as u16;
        Ok(())
    }

    pub fn pop_word(&mut self) -> Result<u16> {
        let sp = self.reg(Register::Sp) as usize;
        let se = self.reg(Register::Se) as usize;
        if sp + 2 > se + 1 {
            return Err(Error::new(
                ErrorKind::StackUnderflow,
                "Stack underflow: pop from an empty stack",
            ));
        }
        let value = self.mem.read_word(sp)?;
        self.reg[Register::Sp.index()] = (sp + 2) as u16;
        Ok(value)
    }

    pub fn call_stack(&self) -> &[u16] {
        &self.call_stack
    }

    pub fn enter_call(&mut self, return_addr: u16) -> Result<()> {
        self.push_word(return_addr)?;
        self.call_stack.push(return_addr);
        Ok(())
    }

    pub fn leave_call(&mut self) -> Result<u16> {
        let addr = self.pop_word()?;
        self.call_stack.pop();
        Ok(addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> RunState {
        RunState::new(Layout::new(256, 25, 25, 0xFFFF).unwrap(), false)
    }

    fn assert_paired(state: &RunState) {
        for pair in Register::PAIRS {
            let (low, high) = pair.halves().unwrap();
            assert_eq!(
                state.reg(pair),
                (state.reg(high) << 8) | state.reg(low),
                "{} out of sync",
                pair
            );
        }
    }

    #[test]
    fn byte_register_limits() {
        let mut state = state();
        let err = state.write_register(Register::Al, 256).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CpuSizeViolation);
        state.write_register(Register::Al, 255).unwrap();
        assert_eq!(state.reg(Register::Al), 255);
        let err = state.write_register(Register::Ax, 65536).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CpuSizeViolation);
    }

    #[test]
    fn pairs_follow_halves() {
        let mut state = state();
        state.write_register(Register::Bx, 0x1234).unwrap();
        assert_eq!(state.reg(Register::Bl), 0x34);
        assert_eq!(state.reg(Register::Bh), 0x12);
        state.write_register(Register::Bh, 0xAB).unwrap();
        assert_eq!(state.reg(Register::Bx), 0xAB34);
        state.write_register(Register::Bl, 0x01).unwrap();
        assert_eq!(state.reg(Register::Bx), 0xAB01);
        assert_paired(&state);
    }

    #[test]
    fn pc_is_protected() {
        let mut state = state();
        let err = state.write_register(Register::Pc, 4).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProtectedRegisterWrite);
        let mut state = RunState::new(Layout::new(256, 25, 25, 0xFFFF).unwrap(), true);
        state.write_register(Register::Pc, 4).unwrap();
        assert_eq!(state.pc(), 4);
    }

    #[test]
    fn reset_is_idempotent() {
        let mut state = state();
        state.write_register(Register::Cx, 99).unwrap();
        state.set_flag(Flag::Carry, true);
        state.write_byte(3, 1).unwrap();
        state.set_pc(12);
        state.reset();
        let once = (state.reg, state.flags, state.mem.clone());
        state.reset();
        assert_eq!((state.reg, state.flags, state.mem.clone()), once);
        assert!(state.reg.iter().all(|value| *value == 0));
        assert_eq!(state.flags(), 0);
        assert!(state.mem().image().is_empty());
    }

    #[test]
    fn stack_bounds() {
        let mut state = state();
        state.init_stack();
        assert_eq!(state.reg(Register::Ss), 192);
        assert_eq!(state.reg(Register::Sp), 256);
        assert_eq!(
            state.pop_word().unwrap_err().kind(),
            ErrorKind::StackUnderflow
        );
        for i in 0..32 {
            state.push_word(i).unwrap();
        }
        assert_eq!(
            state.push_word(0).unwrap_err().kind(),
            ErrorKind::StackOverflow
        );
        assert_eq!(state.pop_word().unwrap(), 31);
    }

    #[test]
    fn call_stack_mirrors_memory() {
        let mut state = state();
        state.init_stack();
        state.enter_call(10).unwrap();
        state.enter_call(20).unwrap();
        assert_eq!(state.call_stack(), &[10, 20]);
        assert_eq!(state.leave_call().unwrap(), 20);
        assert_eq!(state.call_stack(), &[10]);
    }
}
