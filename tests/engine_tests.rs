use proptest::prelude::*;

use tinycpu::console::ScriptedConsole;
use tinycpu::isa::{Opcode, MEMORY_SECTION_END, TEXT_SECTION_END};
use tinycpu::memory::{Layout, Memory, MIN_MEMORY};
use tinycpu::state::RunState;
use tinycpu::storage::MemStorage;
use tinycpu::symbol::Register;
use tinycpu::{AsmParser, ErrorKind, MachineConfig, RunEnvironment, Status};

fn config() -> MachineConfig {
    MachineConfig::default()
}

fn state() -> RunState {
    RunState::new(Layout::new(4096, 25, 25, 0xFFFF).unwrap(), false)
}

#[test]
fn single_halt_image() {
    let image = tinycpu::assemble(".MAIN\nhalt", &config()).unwrap();
    assert_eq!(image.rom, vec![Opcode::Halt as u8]);
    assert_eq!(image.entry, 0);
    let bytes = image.to_bytes();
    assert_eq!(bytes[0], Opcode::Halt as u8);
    assert_eq!(bytes[1], TEXT_SECTION_END);
    assert_eq!(bytes[bytes.len() - 4], MEMORY_SECTION_END);
}

#[test]
fn data_block_fills_memory() {
    let air = AsmParser::new(".DATA\nmsg \"hi\"\nend\n.MAIN\nhalt", &config())
        .unwrap()
        .parse()
        .unwrap();
    let origin = air.data_map()["msg"];
    assert_eq!(origin, 0);
    assert_eq!(air.memory().slice(0, 3).unwrap(), b"hi\0");
    let image = air.emit().unwrap();
    assert_eq!(image.memory, b"hi".to_vec());
}

#[test]
fn byte_register_width() {
    let mut state = state();
    let err = state.write_register(Register::Al, 256).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CpuSizeViolation);
    state.write_register(Register::Al, 255).unwrap();
    assert_eq!(state.reg(Register::Al), 255);
}

#[test]
fn last_addressable_location() {
    let layout = Layout::new(4096, 25, 25, 0xFFFF).unwrap();
    let mem = Memory::new(layout);
    let last = layout.last_addressable() as usize;
    assert!(mem.read_byte(last).is_ok());
    assert_eq!(
        mem.read_byte(last + 1).unwrap_err().kind(),
        ErrorKind::InvalidMemoryAddress
    );
}

#[test]
fn unresolved_label() {
    let err = tinycpu::assemble(".MAIN\ncall undefined_label\nhalt", &config()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NullFunctionPointer);
    assert_eq!(err.line(), Some(2));
}

#[test]
fn binary_image_runs() {
    let src = "\
.DATA
name \"counter\"
end
.MAIN
    mov %cx $3
.loop
    mov %dx %cx
    mov %al INT_PRINT_NUMBER
    int
    dec %cx
    jne loop
    halt
";
    let bytes = tinycpu::assemble(src, &config()).unwrap().to_bytes();
    let image = tinycpu::ProgramImage::from_bytes(&bytes).unwrap();
    let console = ScriptedConsole::default();
    let mut env = RunEnvironment::new(config())
        .unwrap()
        .with_console(console.clone())
        .with_storage(MemStorage::new());
    env.load(&image).unwrap();
    assert_eq!(env.run().unwrap(), Status::Halted);
    assert_eq!(console.output(), "321");
    assert_eq!(env.state().mem().read_cstring(0).unwrap(), b"counter");
}

#[test]
fn file_round_trip() {
    let src = "\
.DATA
file \"notes.txt\"
text \"saved\"
buffer 0 0 0 0 0 0 0 0
end
.MAIN
    lea %cx @file
    lea %di @text
    mov %dp $5
    mov %bl FILE_SAVE
    mov %al INT_FILE
    int
    lea %cx @file
    lea %di @buffer
    mov %bl FILE_READ
    int
    halt
";
    let storage = MemStorage::new();
    let mut env = RunEnvironment::new(config())
        .unwrap()
        .with_console(ScriptedConsole::default())
        .with_storage(storage.clone());
    env.load(&tinycpu::assemble(src, &config()).unwrap()).unwrap();
    assert_eq!(env.run().unwrap(), Status::Halted);
    assert_eq!(storage.get("notes.txt"), Some(b"saved".to_vec()));
    assert_eq!(env.state().reg(Register::Dp), 5);
    assert_eq!(env.state().mem().read_cstring(16).unwrap(), b"saved");
}

proptest! {
    #[test]
    fn pairs_track_their_halves(writes in prop::collection::vec((0u8..18, any::<u16>()), 1..64)) {
        let mut state = state();
        for (id, value) in writes {
            let reg = Register::from_id(id).unwrap();
            let value = value & reg.width().max();
            state.write_register(reg, value as u32).unwrap();
            for pair in Register::PAIRS {
                let (low, high) = pair.halves().unwrap();
                prop_assert_eq!(state.reg(pair), (state.reg(high) << 8) | state.reg(low));
            }
        }
    }

    #[test]
    fn memory_bounds(size in MIN_MEMORY..=0xFFFFusize, address in 0usize..0x1_0000, value: u8) {
        let layout = Layout::new(size, 25, 25, 0xFFFF).unwrap();
        let mut mem = Memory::new(layout);
        let in_bounds = address <= layout.last_addressable() as usize;
        prop_assert_eq!(mem.read_byte(address).is_ok(), in_bounds);
        match mem.write_byte(address, value) {
            Ok(()) => prop_assert!(in_bounds),
            Err(err) => {
                prop_assert!(!in_bounds);
                prop_assert_eq!(err.kind(), ErrorKind::InvalidMemoryAddress);
            }
        }
    }

    #[test]
    fn layouts_are_ordered(size in MIN_MEMORY..=0xFFFFusize, stack in 0u8..=100, data_share: u8) {
        let data = data_share % (101 - stack);
        let layout = Layout::new(size, stack, data, 0xFFFF).unwrap();
        prop_assert!(layout.data_start() < layout.stack_start());
        prop_assert!((layout.stack_start() as usize) < size);
    }

    #[test]
    fn reset_is_idempotent(values in prop::collection::vec(any::<u8>(), 18)) {
        let src = ".MAIN\nmov %ax $1\nmov &40 $9\nhalt";
        let mut env = RunEnvironment::new(config())
            .unwrap()
            .with_console(ScriptedConsole::default());
        env.load(&tinycpu::assemble(src, &config()).unwrap()).unwrap();
        env.run().unwrap();

        let mut state = env.state().clone();
        for (id, value) in values.iter().enumerate() {
            let reg = Register::from_id(id as u8).unwrap();
            state.write_register(reg, (*value as u32) & reg.width().max() as u32).unwrap();
        }
        state.reset();
        let once = state.clone();
        state.reset();
        prop_assert_eq!(&state, &once);
        prop_assert!(Register::ALL.iter().all(|reg| state.reg(*reg) == 0));
        prop_assert_eq!(state.flags(), 0);
        prop_assert!(state.mem().image().iter().all(|byte| *byte == 0));

        env.reset();
        let first = env.state().clone();
        env.reset();
        prop_assert_eq!(env.state(), &first);
        prop_assert_eq!(env.state().pc(), 0);
        prop_assert_eq!(env.status(), Status::Unloaded);
    }
}
