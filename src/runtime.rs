use std::thread;

use log::{debug, info, log_enabled, trace, warn, Level};

use crate::arch::Architecture;
use crate::config::MachineConfig;
use crate::console::{Console, TerminalConsole};
use crate::debugger::{Debugger, Resume};
use crate::disasm::DecodedInstruction;
use crate::error::{undefined_opcode, Error, ErrorKind, Result};
use crate::image::ProgramImage;
use crate::interrupt::{Dispatcher, Outcome};
use crate::isa::{InstrInfo, Opcode, Operand};
use crate::memory::Layout;
use crate::state::RunState;
use crate::storage::{MemStorage, Storage};
use crate::symbol::{Flag, Mode, Register, Width};

/// Lifecycle of the program inside a [`RunEnvironment`].
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Status {
    /// Nothing loaded, or reset since
    Unloaded,
    Loaded,
    Running,
    /// Reached `halt` or quit from the debugger
    Halted,
    /// Stopped by a diagnostic; only `reset` or `load` leave this state
    Faulted,
}

impl Status {
    pub fn is_runnable(self) -> bool {
        matches!(self, Status::Loaded | Status::Running)
    }
}

/// Notified after every PC increment, e.g. to refresh a view of the machine.
pub trait StepObserver {
    fn on_step(&mut self, state: &RunState);
}

impl<F: FnMut(&RunState)> StepObserver for F {
    fn on_step(&mut self, state: &RunState) {
        self(state)
    }
}

/// Arithmetic and logic operations sharing the flag rules.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum AluOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    And,
    Or,
    Xor,
    Shl,
    Shr,
}

/// Represents complete program state during runtime, along with the collaborators an
/// executing program can reach.
pub struct RunEnvironment {
    config: MachineConfig,
    arch: &'static dyn Architecture,
    state: RunState,
    rom: Vec<u8>,
    console: Box<dyn Console>,
    storage: Box<dyn Storage>,
    observer: Option<Box<dyn StepObserver>>,
    status: Status,
    /// Fault messages, tagged with the faulting instruction address
    output: Vec<String>,
    status_code: i32,
    cycles: u64,
    instructions: u64,
    /// Address of the instruction being executed
    current: u16,
    /// Open the debugger after the next instruction
    break_pending: bool,
    /// The debugger already ran during this instruction
    debugged: bool,
}

impl RunEnvironment {
    /// Fails with `InvalidMemoryLayout` when the segment percentages do not fit.
    pub fn new(config: MachineConfig) -> Result<Self> {
        let arch = config.arch.architecture()?;
        let layout = Layout::new(
            config.memory_size,
            config.stack_percent,
            config.data_percent,
            arch.max_memory(),
        )?;
        debug!(
            "machine: {} bytes, data at 0x{:04x}, stack at 0x{:04x}, {}",
            layout.size(),
            layout.data_start(),
            layout.stack_start(),
            arch.width()
        );
        Ok(RunEnvironment {
            state: RunState::new(layout, config.allow_pc_write),
            config,
            arch,
            rom: Vec::new(),
            console: Box::new(TerminalConsole::new()),
            storage: Box::new(MemStorage::new()),
            observer: None,
            status: Status::Unloaded,
            output: Vec::new(),
            status_code: 0,
            cycles: 0,
            instructions: 0,
            current: 0,
            break_pending: false,
            debugged: false,
        })
    }

    pub fn with_console(mut self, console: impl Console + 'static) -> Self {
        self.console = Box::new(console);
        self
    }

    pub fn with_storage(mut self, storage: impl Storage + 'static) -> Self {
        self.storage = Box::new(storage);
        self
    }

    pub fn with_observer(mut self, observer: impl StepObserver + 'static) -> Self {
        self.observer = Some(Box::new(observer));
        self
    }

    /// Copy a program into ROM and memory and point `pc` at its entry.
    pub fn load(&mut self, image: &ProgramImage) -> Result<()> {
        if image.arch != self.arch.width() {
            return Err(Error::new(
                ErrorKind::UnsupportedArchitecture,
                format!(
                    "Program was built for the {} machine, this one is {}",
                    image.arch,
                    self.arch.width()
                ),
            ));
        }
        if image.memory.len() > self.state.layout().size() {
            return Err(Error::new(
                ErrorKind::InvalidMemoryLayout,
                format!(
                    "Program memory image of {} bytes does not fit in {} bytes",
                    image.memory.len(),
                    self.state.layout().size()
                ),
            ));
        }
        if image.entry as usize >= image.rom.len() {
            return Err(Error::new(
                ErrorKind::EntryPointNotFound,
                format!("Entry point 0x{:04x} is outside of the ROM", image.entry),
            ));
        }

        self.reset();
        self.state.mem_mut().load(0, &image.memory)?;
        self.rom = image.rom.clone();
        self.state.init_stack();
        self.state.set_pc(image.entry);
        self.status = Status::Loaded;
        debug!(
            "loaded {} ROM bytes and {} memory bytes, entry 0x{:04x}",
            self.rom.len(),
            image.memory.len(),
            image.entry
        );
        Ok(())
    }

    /// Advance `pc` by one byte, notify the observer and pace execution.
    pub fn step(&mut self) -> Result<u16> {
        self.ensure_runnable()?;
        self.advance()
    }

    /// Fetch the (mode, value) pair following the current position.
    pub fn next_operand(&mut self) -> Result<Operand> {
        self.ensure_runnable()?;
        self.fetch_operand()
    }

    /// Execute a single instruction. Any diagnostic faults the machine.
    pub fn step_instruction(&mut self) -> Result<Status> {
        self.ensure_runnable()?;
        self.status = Status::Running;
        if let Err(err) = self.execute_next() {
            self.fault(&err);
            return Err(err);
        }
        Ok(self.status)
    }

    /// Run until `halt` or a fault.
    pub fn run(&mut self) -> Result<Status> {
        loop {
            if self.step_instruction()? != Status::Running {
                return Ok(self.status);
            }
        }
    }

    /// Run at most `max` instructions. Returns `Running` if the budget ran out first.
    pub fn run_for(&mut self, max: u64) -> Result<Status> {
        self.ensure_runnable()?;
        for _ in 0..max {
            if self.step_instruction()? != Status::Running {
                break;
            }
        }
        Ok(self.status)
    }

    /// Power-on state: registers, flags and memory zeroed, `pc` at 0, no program.
    pub fn reset(&mut self) {
        self.state.reset();
        self.rom.clear();
        self.status = Status::Unloaded;
        self.output.clear();
        self.status_code = 0;
        self.cycles = 0;
        self.instructions = 0;
        self.current = 0;
        self.break_pending = false;
        self.debugged = false;
    }

    pub fn status(&self) -> Status {
        self.status
    }

    /// Fault messages of the current run.
    pub fn output(&self) -> &[String] {
        &self.output
    }

    /// Zero unless the run faulted.
    pub fn status_code(&self) -> i32 {
        self.status_code
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    pub fn instructions(&self) -> u64 {
        self.instructions
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    pub fn config(&self) -> &MachineConfig {
        &self.config
    }

    pub fn rom(&self) -> &[u8] {
        &self.rom
    }

    fn fetch(&self, address: u16) -> Result<u8> {
        self.rom.get(address as usize).copied().ok_or_else(|| {
            Error::new(
                ErrorKind::InvalidCodeAddress,
                format!(
                    "Code address 0x{:04x} is outside of the {}-byte ROM",
                    address,
                    self.rom.len()
                ),
            )
        })
    }

    fn ensure_runnable(&self) -> Result<()> {
        if self.status.is_runnable() {
            return Ok(());
        }
        Err(Error::new(
            ErrorKind::EngineNotRunnable,
            format!("Cannot execute while {:?}", self.status),
        ))
    }

    fn advance(&mut self) -> Result<u16> {
        let pc = self.state.pc().checked_add(1).ok_or_else(|| {
            Error::new(ErrorKind::InvalidCodeAddress, "Program counter ran past 0xffff")
        })?;
        self.state.set_pc(pc);
        if let Some(observer) = self.observer.as_mut() {
            observer.on_step(&self.state);
        }
        if !self.config.step_delay.is_zero() {
            thread::sleep(self.config.step_delay);
        }
        Ok(pc)
    }

    fn fetch_operand(&mut self) -> Result<Operand> {
        let pc = self.advance()?;
        let tag = self.fetch(pc)?;
        let pc = self.advance()?;
        let value = self.fetch(pc)?;
        Operand::decode(tag, value)
    }

    fn fault(&mut self, err: &Error) {
        self.status = Status::Faulted;
        self.status_code = err.kind().status_code();
        let line = format!("[0x{:04x}] {}", self.current, err.message());
        warn!("fault: {} ({})", line, err.kind().code());
        self.output.push(line);
    }

    fn execute_next(&mut self) -> Result<()> {
        self.current = self.state.pc();
        self.debugged = false;
        let opcode = self.fetch(self.current)?;
        let info = self
            .arch
            .by_opcode(opcode)
            .ok_or_else(|| undefined_opcode(opcode))?;
        let operands = (0..info.operands)
            .map(|_| self.fetch_operand())
            .collect::<Result<Vec<_>>>()?;
        // Past the last operand byte: the next instruction
        self.advance()?;
        self.cycles += info.cycles() as u64;
        self.instructions += 1;

        if log_enabled!(Level::Trace) {
            let decoded = DecodedInstruction {
                offset: self.current,
                info,
                operands: operands.clone(),
            };
            trace!("{}", decoded);
        }

        self.execute(info, &operands)?;

        let wants_break = self.break_pending || self.state.flag(Flag::Trap);
        if self.status == Status::Running && wants_break && !self.debugged {
            self.break_pending = false;
            self.open_debugger()?;
        }
        Ok(())
    }

    fn execute(&mut self, info: &InstrInfo, operands: &[Operand]) -> Result<()> {
        let width = access_width(info.op, operands);
        match info.op {
            Opcode::Nop => {}
            Opcode::Halt => {
                self.status = Status::Halted;
                info!(
                    "halted after {} instructions ({} cycles)",
                    self.instructions, self.cycles
                );
            }
            Opcode::Mov => {
                let value = self.read(&operands[1], width)?;
                self.write(&operands[0], width, value)?;
            }
            Opcode::Add
            | Opcode::Sub
            | Opcode::Mul
            | Opcode::Div
            | Opcode::Mod
            | Opcode::And
            | Opcode::Or
            | Opcode::Xor
            | Opcode::Shl
            | Opcode::Shr => {
                let a = self.read(&operands[0], width)?;
                let b = self.read(&operands[1], width)?;
                let result = self.alu(alu_op(info.op), a, b, width)?;
                self.write(&operands[0], width, result)?;
            }
            Opcode::Cmp => {
                let a = self.read(&operands[0], width)?;
                let b = self.read(&operands[1], width)?;
                self.alu(AluOp::Sub, a, b, width)?;
            }
            Opcode::Not => {
                let a = self.read(&operands[0], width)?;
                let result = !a & width.max();
                self.state.set_result_flags(result, width);
                self.state.set_flag(Flag::Carry, false);
                self.state.set_flag(Flag::Overflow, false);
                self.write(&operands[0], width, result)?;
            }
            Opcode::Inc | Opcode::Dec => {
                let a = self.read(&operands[0], width)?;
                let op = if info.op == Opcode::Inc {
                    AluOp::Add
                } else {
                    AluOp::Sub
                };
                let result = self.alu(op, a, 1, width)?;
                self.write(&operands[0], width, result)?;
            }
            Opcode::Jmp
            | Opcode::Je
            | Opcode::Jne
            | Opcode::Jl
            | Opcode::Jg
            | Opcode::Jle
            | Opcode::Jge
            | Opcode::Jc
            | Opcode::Jo => {
                if self.condition(info.op) {
                    let target = self.read(&operands[0], Width::Word)?;
                    self.state.set_pc(target);
                }
            }
            Opcode::Call => {
                let target = self.read(&operands[0], Width::Word)?;
                let return_addr = self.state.pc();
                self.state.enter_call(return_addr)?;
                self.state.set_pc(target);
            }
            Opcode::Ret => {
                let return_addr = self.state.leave_call()?;
                self.state.set_pc(return_addr);
            }
            Opcode::Push => {
                let value = self.read(&operands[0], Width::Word)?;
                self.state.push_word(value)?;
            }
            Opcode::Pop => {
                let value = self.state.pop_word()?;
                self.write(&operands[0], Width::Word, value)?;
            }
            Opcode::Int => self.interrupt()?,
            Opcode::Sti => self.state.set_flag(Flag::Interrupt, true),
            Opcode::Cli => self.state.set_flag(Flag::Interrupt, false),
            Opcode::Tron => self.state.set_flag(Flag::Trap, true),
            Opcode::Troff => self.state.set_flag(Flag::Trap, false),
            Opcode::Lea => {
                let address = self.address_of(&operands[1])?;
                self.write(&operands[0], Width::Word, address)?;
            }
        }
        Ok(())
    }

    fn register(&self, operand: &Operand) -> Result<Register> {
        operand.register().ok_or_else(|| {
            Error::new(
                ErrorKind::InvalidRegisterCode,
                format!("Register id {} does not exist", operand.value),
            )
        })
    }

    fn load_width(&self, address: usize, width: Width) -> Result<u16> {
        match width {
            Width::Byte => self.state.read_byte(address).map(u16::from),
            Width::Word => self.state.read_word(address),
        }
    }

    fn store_width(&mut self, address: usize, width: Width, value: u16) -> Result<()> {
        match width {
            Width::Byte => {
                debug_assert!(value <= 0xFF, "byte store of a wide value");
                self.state.write_byte(address, value as u8)
            }
            Width::Word => self.state.write_word(address, value),
        }
    }

    fn read(&self, operand: &Operand, width: Width) -> Result<u16> {
        let value = operand.value as usize;
        match operand.mode {
            Mode::Register => Ok(self.state.reg(self.register(operand)?)),
            Mode::Direct | Mode::Data => self.load_width(value, width),
            Mode::Indirect => {
                let pointer = self.state.read_word(value)?;
                self.load_width(pointer as usize, width)
            }
            // Label offsets and pooled string addresses read as their value
            Mode::Immediate | Mode::Label | Mode::Str => Ok(operand.value as u16),
        }
    }

    fn write(&mut self, operand: &Operand, width: Width, value: u16) -> Result<()> {
        let address = operand.value as usize;
        match operand.mode {
            Mode::Register => {
                let reg = self.register(operand)?;
                self.state.write_register(reg, value as u32)
            }
            Mode::Direct | Mode::Data => self.store_width(address, width, value),
            Mode::Indirect => {
                let pointer = self.state.read_word(address)?;
                self.store_width(pointer as usize, width, value)
            }
            Mode::Immediate | Mode::Label | Mode::Str => Err(Error::new(
                ErrorKind::InvalidOperand,
                format!("Operand `{}` cannot be written to", operand),
            )),
        }
    }

    /// Effective address for `lea`.
    fn address_of(&self, operand: &Operand) -> Result<u16> {
        match operand.mode {
            Mode::Direct | Mode::Data | Mode::Str => Ok(operand.value as u16),
            Mode::Indirect => self.state.read_word(operand.value as usize),
            Mode::Register | Mode::Immediate | Mode::Label => Err(Error::new(
                ErrorKind::InvalidOperand,
                format!("Operand `{}` has no memory address", operand),
            )),
        }
    }

    /// Compute, update flags and return the result wrapped to `width`.
    fn alu(&mut self, op: AluOp, a: u16, b: u16, width: Width) -> Result<u16> {
        let mask = width.max() as u32;
        let sign = width.sign_bit() as u32;
        let bits = width.bits();
        let (a, b) = (a as u32 & mask, b as u32 & mask);

        let (result, carry, overflow) = match op {
            AluOp::Add => {
                let sum = a + b;
                let result = sum & mask;
                (result, sum > mask, (a ^ result) & (b ^ result) & sign != 0)
            }
            AluOp::Sub => {
                let result = a.wrapping_sub(b) & mask;
                (result, b > a, (a ^ b) & (a ^ result) & sign != 0)
            }
            AluOp::Mul => {
                let product = a * b;
                (product & mask, product > mask, product > mask)
            }
            AluOp::Div | AluOp::Mod => {
                if b == 0 {
                    return Err(Error::new(
                        ErrorKind::DivisionByZero,
                        format!("Division of {} by zero", a),
                    ));
                }
                let result = if op == AluOp::Div { a / b } else { a % b };
                (result, false, false)
            }
            AluOp::And => (a & b, false, false),
            AluOp::Or => (a | b, false, false),
            AluOp::Xor => (a ^ b, false, false),
            AluOp::Shl => {
                let result = if b >= bits { 0 } else { (a << b) & mask };
                let carry = b > 0 && b <= bits && (a >> (bits - b)) & 1 == 1;
                (result, carry, false)
            }
            AluOp::Shr => {
                let result = if b >= bits { 0 } else { a >> b };
                let carry = b > 0 && b <= bits && (a >> (b - 1)) & 1 == 1;
                (result, carry, false)
            }
        };

        let result = result as u16;
        self.state.set_result_flags(result, width);
        self.state.set_flag(Flag::Carry, carry);
        self.state.set_flag(Flag::Overflow, overflow);
        Ok(result)
    }

    fn condition(&self, op: Opcode) -> bool {
        let zero = self.state.flag(Flag::Zero);
        let negative = self.state.flag(Flag::Negative);
        let overflow = self.state.flag(Flag::Overflow);
        let carry = self.state.flag(Flag::Carry);
        match op {
            Opcode::Je => zero,
            Opcode::Jne => !zero,
            Opcode::Jl => negative != overflow,
            Opcode::Jg => !zero && negative == overflow,
            Opcode::Jle => zero || negative != overflow,
            Opcode::Jge => negative == overflow,
            Opcode::Jc => carry,
            Opcode::Jo => overflow,
            _ => true,
        }
    }

    fn interrupt(&mut self) -> Result<()> {
        let outcome = Dispatcher::new(
            &mut self.state,
            self.console.as_mut(),
            self.storage.as_mut(),
        )
        .dispatch()?;
        match outcome {
            Outcome::Handled | Outcome::Invalid(_) => Ok(()),
            Outcome::Debug => self.open_debugger(),
        }
    }

    fn open_debugger(&mut self) -> Result<()> {
        self.debugged = true;
        let resume = Debugger::new(&self.state, self.console.as_mut()).session()?;
        match resume {
            Resume::Step => self.break_pending = true,
            Resume::Go => {}
            Resume::Quit => {
                self.status = Status::Halted;
                info!("stopped from the debugger at 0x{:04x}", self.state.pc());
            }
        }
        Ok(())
    }
}

/// The first register operand decides the width; `push` and `pop` always move words.
fn access_width(op: Opcode, operands: &[Operand]) -> Width {
    if matches!(op, Opcode::Push | Opcode::Pop) {
        return Width::Word;
    }
    operands
        .iter()
        .find_map(Operand::register)
        .map_or(Width::Byte, Register::width)
}

fn alu_op(op: Opcode) -> AluOp {
    match op {
        Opcode::Sub => AluOp::Sub,
        Opcode::Mul => AluOp::Mul,
        Opcode::Div => AluOp::Div,
        Opcode::Mod => AluOp::Mod,
        Opcode::And => AluOp::And,
        Opcode::Or => AluOp::Or,
        Opcode::Xor => AluOp::Xor,
        Opcode::Shl => AluOp::Shl,
        Opcode::Shr => AluOp::Shr,
        _ => AluOp::Add,
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use super::*;
    use crate::assemble;
    use crate::console::ScriptedConsole;
    use crate::storage::MemStorage;

    fn machine(src: &str, input: &[&str]) -> (RunEnvironment, ScriptedConsole) {
        let config = MachineConfig::default();
        let image = assemble(src, &config).unwrap();
        let console = ScriptedConsole::new(input.iter().copied());
        let mut env = RunEnvironment::new(config)
            .unwrap()
            .with_console(console.clone())
            .with_storage(MemStorage::new());
        env.load(&image).unwrap();
        (env, console)
    }

    fn run(src: &str) -> RunEnvironment {
        let (mut env, _) = machine(src, &[]);
        assert_eq!(env.run().unwrap(), Status::Halted);
        env
    }

    #[test]
    fn load_sets_stack_and_entry() {
        let (env, _) = machine("nop\n.MAIN\nhalt", &[]);
        let state = env.state();
        assert_eq!(state.pc(), 1);
        assert_eq!(state.reg(Register::Sp), 4096);
        assert_eq!(state.reg(Register::Ss), 3072);
        assert_eq!(state.reg(Register::Se), 4095);
        assert_eq!(env.status(), Status::Loaded);
    }

    #[test]
    fn step_counts_bytes() {
        let (mut env, _) = machine(".MAIN\nmov %ax $2\nhalt", &[]);
        assert_eq!(env.step().unwrap(), 1);
        let (mut env, _) = machine(".MAIN\nmov %ax $2\nhalt", &[]);
        env.step_instruction().unwrap();
        assert_eq!(env.state().pc(), 5);
        assert_eq!(env.state().reg(Register::Ax), 2);
        assert_eq!(env.cycles(), 5);
        assert_eq!(env.instructions(), 1);
    }

    #[test]
    fn arithmetic_flags() {
        let env = run(".MAIN\nmov %al $200\nadd %al $100\nhalt");
        assert_eq!(env.state().reg(Register::Al), 44);
        assert!(env.state().flag(Flag::Carry));
        assert!(!env.state().flag(Flag::Zero));

        let env = run(".MAIN\nmov %al $127\ninc %al\nhalt");
        assert_eq!(env.state().reg(Register::Al), 128);
        assert!(env.state().flag(Flag::Overflow));
        assert!(env.state().flag(Flag::Negative));

        let env = run(".MAIN\nmov %bl $3\nsub %bl $3\nhalt");
        assert!(env.state().flag(Flag::Zero));
        assert!(!env.state().flag(Flag::Carry));

        let env = run(".MAIN\nmov %ax $255\nmul %ax $255\nshl %cl $1\nhalt");
        assert_eq!(env.state().reg(Register::Ax), 65025);

        let env = run(".MAIN\nmov %dl $129\nshr %dl $1\nhalt");
        assert_eq!(env.state().reg(Register::Dl), 64);
        assert!(env.state().flag(Flag::Carry));
    }

    #[test]
    fn word_arithmetic_uses_pairs() {
        let env = run(".MAIN\nmov %ax $255\ninc %ax\nmov %bx %ax\nnot %bx\nhalt");
        assert_eq!(env.state().reg(Register::Ax), 256);
        assert_eq!(env.state().reg(Register::Ah), 1);
        assert_eq!(env.state().reg(Register::Al), 0);
        assert_eq!(env.state().reg(Register::Bx), 0xFEFF);
    }

    #[test]
    fn conditional_jumps() {
        let src = "\
.MAIN
    mov %cx $0
.loop
    inc %cx
    cmp %cx $5
    jl loop
    halt
";
        let env = run(src);
        assert_eq!(env.state().reg(Register::Cx), 5);
        assert_eq!(env.instructions(), 1 + 5 * 3 + 1);
    }

    #[test]
    fn calls_and_stack() {
        let src = "\
.MAIN
    push $7
    call double
    pop %ax
    halt
.double
    mov %bl $21
    add %bl %bl
    ret
";
        let env = run(src);
        assert_eq!(env.state().reg(Register::Ax), 7);
        assert_eq!(env.state().reg(Register::Bl), 42);
        assert_eq!(env.state().reg(Register::Sp), 4096);
        assert!(env.state().call_stack().is_empty());
    }

    #[test]
    fn memory_modes() {
        let src = "\
.DATA
org 16
value 9
ptr 32 0
end
.MAIN
    mov %al @value
    mov &32 $5
    mov %bl *18
    lea %di @ptr
    halt
";
        let env = run(src);
        assert_eq!(env.state().reg(Register::Al), 9);
        assert_eq!(env.state().reg(Register::Bl), 5);
        assert_eq!(env.state().reg(Register::Di), 18);
    }

    #[test]
    fn print_interrupts() {
        let src = "\
.MAIN
    lea %di \"hello \"
    mov %al INT_PRINT_STRING
    int
    mov %dx $42
    mov %al INT_PRINT_NUMBER
    int
    mov %al $99
    int
    halt
";
        let (mut env, console) = machine(src, &[]);
        assert_eq!(env.run().unwrap(), Status::Halted);
        assert_eq!(console.output(), "hello 42invalid interrupt 99\n");
        assert_eq!(env.status_code(), 0);
    }

    #[test]
    fn faults_stop_the_machine() {
        let (mut env, _) = machine(".MAIN\nmov %al $1\ndiv %al $0\nhalt", &[]);
        let err = env.run().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DivisionByZero);
        assert_eq!(env.status(), Status::Faulted);
        assert_eq!(env.status_code(), ErrorKind::DivisionByZero.status_code());
        assert_eq!(env.output().len(), 1);
        assert!(env.output()[0].starts_with("[0x0005]"));
        let err = env.step_instruction().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::EngineNotRunnable);
        assert_eq!(env.status(), Status::Faulted);
    }

    #[test]
    fn faulted_machine_does_not_advance() {
        let steps = Rc::new(Cell::new(0));
        let seen = steps.clone();
        let config = MachineConfig::default();
        let image = assemble(".MAIN\nmov %al $1\ndiv %al $0\nhalt", &config).unwrap();
        let mut env = RunEnvironment::new(config)
            .unwrap()
            .with_console(ScriptedConsole::default())
            .with_observer(move |_: &RunState| seen.set(seen.get() + 1));
        env.load(&image).unwrap();
        assert_eq!(env.run().unwrap_err().kind(), ErrorKind::DivisionByZero);

        let pc = env.state().pc();
        let observed = steps.get();
        assert_eq!(env.step().unwrap_err().kind(), ErrorKind::EngineNotRunnable);
        assert_eq!(env.next_operand().unwrap_err().kind(), ErrorKind::EngineNotRunnable);
        assert_eq!(env.state().pc(), pc);
        assert_eq!(steps.get(), observed);
    }

    #[test]
    fn runtime_violations() {
        let (mut env, _) = machine(".MAIN\nmov %ax $255\ninc %ax\nmov %al %ax\nhalt", &[]);
        assert_eq!(env.run().unwrap_err().kind(), ErrorKind::CpuSizeViolation);

        let (mut env, _) = machine(".MAIN\nmov $1 %al\nhalt", &[]);
        assert_eq!(env.run().unwrap_err().kind(), ErrorKind::InvalidOperand);

        let (mut env, _) = machine(".MAIN\nmov %pc $0\nhalt", &[]);
        assert_eq!(env.run().unwrap_err().kind(), ErrorKind::ProtectedRegisterWrite);

        let (mut env, _) = machine(".MAIN\nret", &[]);
        assert_eq!(env.run().unwrap_err().kind(), ErrorKind::StackUnderflow);

        // Falls off the end of the ROM
        let (mut env, _) = machine(".MAIN\nnop", &[]);
        assert_eq!(env.run().unwrap_err().kind(), ErrorKind::InvalidCodeAddress);
    }

    #[test]
    fn debugger_step_and_trap() {
        let src = "\
.MAIN
    mov %al INT_DEBUG
    int
    mov %bl $1
    mov %bl $2
    halt
";
        let (mut env, console) = machine(src, &["registers", "step", "go"]);
        assert_eq!(env.run().unwrap(), Status::Halted);
        assert_eq!(console.remaining_input(), 0);
        assert_eq!(console.output().matches("Debugger at").count(), 2);

        let (mut env, console) = machine(".MAIN\ntron\nnop\ntroff\nhalt", &["go", "go", "go"]);
        assert_eq!(env.run().unwrap(), Status::Halted);
        // After `tron` and `nop`; `troff` clears the flag before the check
        assert_eq!(console.remaining_input(), 1);

        let (mut env, _) = machine(".MAIN\ntron\nnop\nhalt", &["quit"]);
        assert_eq!(env.run().unwrap(), Status::Halted);
        assert_eq!(env.state().pc(), 1);
    }

    #[test]
    fn observer_and_budget() {
        let steps = Rc::new(Cell::new(0));
        let seen = steps.clone();
        let config = MachineConfig::default();
        let image = assemble(".MAIN\n.spin\njmp spin", &config).unwrap();
        let mut env = RunEnvironment::new(config)
            .unwrap()
            .with_console(ScriptedConsole::default())
            .with_observer(move |_: &RunState| seen.set(seen.get() + 1));
        env.load(&image).unwrap();
        assert_eq!(env.run_for(10).unwrap(), Status::Running);
        assert_eq!(env.instructions(), 10);
        assert_eq!(steps.get(), 30);
    }

    #[test]
    fn reset_unloads() {
        let mut env = run(".MAIN\nmov %cx $9\nhalt");
        env.reset();
        assert_eq!(env.status(), Status::Unloaded);
        assert_eq!(env.state().reg(Register::Cx), 0);
        assert_eq!(env.state().pc(), 0);
        assert_eq!(env.run().unwrap_err().kind(), ErrorKind::EngineNotRunnable);
    }

    #[test]
    fn rejects_bad_layout() {
        let config = MachineConfig {
            stack_percent: 80,
            data_percent: 40,
            ..MachineConfig::default()
        };
        assert_eq!(
            RunEnvironment::new(config).err().map(|e| e.kind()),
            Some(ErrorKind::InvalidMemoryLayout)
        );
    }
}
