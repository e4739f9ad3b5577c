use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use assert_cmd::prelude::*;
use predicates::prelude::*;

use tinycpu::console::ScriptedConsole;
use tinycpu::storage::MemStorage;
use tinycpu::{MachineConfig, RunEnvironment, Status};

/// Fresh scratch directory per test.
fn scratch(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("tinycpu-{}-{}", name, std::process::id()));
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(&dir).unwrap();
    dir
}

fn sample_files() -> Vec<PathBuf> {
    let files: Vec<PathBuf> = glob::glob("tests/files/*.asm")
        .unwrap()
        .map(|entry| entry.unwrap())
        .collect();
    assert!(!files.is_empty(), "no sample programs found");
    files
}

fn expected_output(path: &Path) -> String {
    fs::read_to_string(path.with_extension("out")).unwrap()
}

#[test]
fn runs_without_arguments() {
    let mut cmd = Command::cargo_bin("tinycpu").unwrap();
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("tinycpu v"));
}

#[test]
fn sample_programs_produce_expected_output() {
    for path in sample_files() {
        let src = fs::read_to_string(&path).unwrap();
        let config = MachineConfig::default();
        let image = tinycpu::assemble(&src, &config)
            .unwrap_or_else(|err| panic!("{}: {}", path.display(), err));
        let console = ScriptedConsole::default();
        let mut env = RunEnvironment::new(config)
            .unwrap()
            .with_console(console.clone())
            .with_storage(MemStorage::new());
        env.load(&image).unwrap();
        assert_eq!(env.run().unwrap(), Status::Halted, "{}", path.display());
        assert_eq!(console.output(), expected_output(&path), "{}", path.display());
    }
}

#[test]
fn sample_programs_survive_disassembly() {
    for path in sample_files() {
        let config = MachineConfig::default();
        let image = tinycpu::assemble(&fs::read_to_string(&path).unwrap(), &config).unwrap();
        let first = tinycpu::disassemble(&image.to_bytes()).unwrap();
        let again = tinycpu::assemble(&first.to_source(), &config)
            .unwrap_or_else(|err| panic!("{}: {}\n{}", path.display(), err, first));
        let second = tinycpu::disassemble(&again.to_bytes()).unwrap();

        assert_eq!(first.instructions.len(), second.instructions.len());
        for (a, b) in first.instructions.iter().zip(&second.instructions) {
            assert_eq!(a.info.op, b.info.op, "{}", path.display());
            let modes = |instr: &tinycpu::DecodedInstruction| {
                instr.operands.iter().map(|op| op.mode).collect::<Vec<_>>()
            };
            assert_eq!(modes(a), modes(b), "{}", path.display());
        }
        assert_eq!(again.entry, image.entry);
    }
}

#[test]
fn run_minimal() {
    let mut cmd = Command::cargo_bin("tinycpu").unwrap();
    cmd.arg("run")
        .arg("tests/files/countdown.asm")
        .arg("--minimal")
        .assert()
        .success()
        .stdout("5\n4\n3\n2\n1\n");
}

#[test]
fn run_path_without_subcommand() {
    let mut cmd = Command::cargo_bin("tinycpu").unwrap();
    cmd.arg("tests/files/hello.asm")
        .assert()
        .success()
        .stdout(predicate::str::contains("Hello, world!"))
        .stdout(predicate::str::contains("Halted"));
}

#[test]
fn compile_then_run_binary() {
    let dir = scratch("compile");
    let bin = dir.join("hello.bin");
    Command::cargo_bin("tinycpu")
        .unwrap()
        .args(["compile", "tests/files/hello.asm"])
        .arg(&bin)
        .assert()
        .success()
        .stdout(predicate::str::contains("Saved"));
    assert!(bin.exists());

    Command::cargo_bin("tinycpu")
        .unwrap()
        .arg("run")
        .arg(&bin)
        .arg("--minimal")
        .assert()
        .success()
        .stdout("Hello, world!\n");

    Command::cargo_bin("tinycpu")
        .unwrap()
        .arg("disassemble")
        .arg(&bin)
        .assert()
        .success()
        .stdout(predicate::str::contains(".MAIN"))
        .stdout(predicate::str::contains("\"Hello, world!\\n\""));
    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn check_reports_errors() {
    let dir = scratch("check");
    let bad = dir.join("bad.asm");
    fs::write(&bad, ".MAIN\n    call nowhere\n    halt\n").unwrap();
    Command::cargo_bin("tinycpu")
        .unwrap()
        .arg("check")
        .arg(&bad)
        .assert()
        .failure()
        .stderr(predicate::str::contains("nowhere"));

    Command::cargo_bin("tinycpu")
        .unwrap()
        .args(["check", "tests/files/strings.asm"])
        .assert()
        .success()
        .stdout(predicate::str::contains("no errors found"));
    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn runtime_fault_exits_non_zero() {
    let dir = scratch("fault");
    let src = dir.join("fault.asm");
    fs::write(&src, ".MAIN\n    mov %al $1\n    div %al $0\n    halt\n").unwrap();
    Command::cargo_bin("tinycpu")
        .unwrap()
        .arg("run")
        .arg(&src)
        .assert()
        .failure()
        .stderr(predicate::str::contains("[0x0005]"));
    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn file_interrupt_uses_storage_dir() {
    let dir = scratch("storage");
    let src = dir.join("save.asm");
    fs::write(
        &src,
        "\
.DATA
name \"log.txt\"
text \"hello\"
end
.MAIN
    lea %cx @name
    lea %di @text
    mov %dp $5
    mov %bl FILE_SAVE
    mov %al INT_FILE
    int
    halt
",
    )
    .unwrap();
    Command::cargo_bin("tinycpu")
        .unwrap()
        .arg("run")
        .arg(&src)
        .arg("--storage")
        .arg(&dir)
        .assert()
        .success();
    assert_eq!(fs::read(dir.join("log.txt")).unwrap(), b"hello");
    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn step_limit_stops_loops() {
    let dir = scratch("limit");
    let src = dir.join("spin.asm");
    fs::write(&src, ".MAIN\n.spin\n    jmp spin\n").unwrap();
    Command::cargo_bin("tinycpu")
        .unwrap()
        .arg("run")
        .arg(&src)
        .args(["--max-steps", "50"])
        .assert()
        .success()
        .stdout(predicate::str::contains("step limit"));

    Command::cargo_bin("tinycpu")
        .unwrap()
        .args(["run", "tests/files/hello.asm"])
        .args(["--max-steps", "0"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Stopped"))
        .stdout(predicate::str::contains("Halted").not())
        .stdout(predicate::str::contains("Hello").not());
    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn rejects_bad_layout_flags() {
    Command::cargo_bin("tinycpu")
        .unwrap()
        .args(["run", "tests/files/hello.asm"])
        .args(["--stack-percent", "80", "--data-percent", "40"])
        .assert()
        .failure();
}
