use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use log::LevelFilter;
use miette::{bail, IntoDiagnostic, Result};
use simple_logger::SimpleLogger;

use tinycpu::storage::{DirStorage, MemStorage};
use tinycpu::{output, MachineConfig, ProgramImage, RunEnvironment, Status};

/// tinycpu assembles, disassembles and runs programs for a small 16-bit teaching CPU.
#[derive(Parser)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Quickly provide a `.asm` or `.bin` file to run
    path: Option<PathBuf>,

    /// Log more; repeat for debug and per-instruction trace output
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Command {
    /// Run text `.asm` or binary `.bin` file directly and output to terminal
    Run {
        /// `.asm` or `.bin` file to run
        name: PathBuf,
        #[command(flatten)]
        machine: MachineArgs,
        /// Produce minimal output, suited for blackbox tests
        #[arg(short, long)]
        minimal: bool,
    },
    /// Create binary `.bin` file to run later
    Compile {
        /// `.asm` file to compile
        name: PathBuf,
        /// Destination to output .bin file
        dest: Option<PathBuf>,
        #[command(flatten)]
        machine: MachineArgs,
    },
    /// Turn a binary `.bin` file back into assembly text
    Disassemble {
        /// `.bin` file to read
        name: PathBuf,
        /// Destination to output .asm file, standard output if omitted
        dest: Option<PathBuf>,
    },
    /// Check a `.asm` file without running or outputting binary
    Check {
        /// File to check
        name: PathBuf,
        #[command(flatten)]
        machine: MachineArgs,
    },
}

/// Machine parameters shared by the commands that assemble or run.
#[derive(Args, Clone, Debug, Default)]
struct MachineArgs {
    /// Total memory in bytes
    #[arg(long)]
    memory_size: Option<usize>,
    /// Share of memory used by the stack, in percent
    #[arg(long)]
    stack_percent: Option<u8>,
    /// Share of memory used by the data segment, in percent
    #[arg(long)]
    data_percent: Option<u8>,
    /// Pause after every program counter increment
    #[arg(long)]
    delay_ms: Option<u64>,
    /// Let programs write `pc` like any other register
    #[arg(long)]
    allow_pc_write: bool,
    /// Directory backing the file interrupt, in-memory files if omitted
    #[arg(long)]
    storage: Option<PathBuf>,
    /// Stop after this many instructions
    #[arg(long)]
    max_steps: Option<u64>,
}

impl MachineArgs {
    /// Environment first, flags override.
    fn config(&self) -> MachineConfig {
        let mut config = MachineConfig::from_env();
        if let Some(size) = self.memory_size {
            config.memory_size = size;
        }
        if let Some(percent) = self.stack_percent {
            config.stack_percent = percent;
        }
        if let Some(percent) = self.data_percent {
            config.data_percent = percent;
        }
        if let Some(ms) = self.delay_ms {
            config.step_delay = Duration::from_millis(ms);
        }
        if self.allow_pc_write {
            config.allow_pc_write = true;
        }
        config
    }
}

fn main() -> miette::Result<()> {
    use MsgColor::*;
    let cli = Cli::parse();
    init_logging(cli.verbose)?;

    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new() //
                .context_lines(tinycpu::DIAGNOSTIC_CONTEXT_LINES)
                .build(),
        )
    }))?;

    let Some(command) = cli.command else {
        if let Some(path) = cli.path {
            return run(&path, &MachineArgs::default(), false);
        }
        println!("\n~ tinycpu v{VERSION} ~");
        println!("{}", LOGO.truecolor(120, 200, 160).bold());
        println!("{SHORT_INFO}");
        std::process::exit(0);
    };

    match command {
        Command::Run {
            name,
            machine,
            minimal,
        } => run(&name, &machine, minimal),
        Command::Compile {
            name,
            dest,
            machine,
        } => {
            file_message(Green, "Assembling", &name);
            let image = assemble_file(&name, &machine.config())?;
            let dest = dest.unwrap_or_else(|| name.with_extension("bin"));
            fs::write(&dest, image.to_bytes()).into_diagnostic()?;
            message(
                Green,
                "Finished",
                &format!("{} ROM bytes, entry 0x{:04x}", image.rom.len(), image.entry),
            );
            file_message(Green, "Saved", &dest);
            Ok(())
        }
        Command::Disassemble { name, dest } => {
            let bytes = fs::read(&name).into_diagnostic()?;
            let disassembly = tinycpu::disassemble(&bytes).unwrap_or_else(|err| fail(&err, None));
            let text = disassembly.to_source();
            match dest {
                Some(dest) => {
                    fs::write(&dest, text).into_diagnostic()?;
                    file_message(Green, "Saved", &dest);
                }
                None => print!("{}", text),
            }
            Ok(())
        }
        Command::Check { name, machine } => {
            file_message(Green, "Checking", &name);
            let _ = assemble_file(&name, &machine.config())?;
            message(Green, "Success", "no errors found!");
            Ok(())
        }
    }
}

/// `-v` count picks the level, `TINYCPU_TRACE=1` forces per-instruction tracing.
fn init_logging(verbose: u8) -> Result<()> {
    let level = if tinycpu::config::is_trace_enabled() {
        LevelFilter::Trace
    } else {
        match verbose {
            0 => LevelFilter::Warn,
            1 => LevelFilter::Info,
            2 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    };
    SimpleLogger::new()
        .with_level(level)
        .without_timestamps()
        .init()
        .into_diagnostic()
}

#[allow(unused)]
enum MsgColor {
    Green,
    Cyan,
    Red,
}

fn file_message(color: MsgColor, left: &str, right: &Path) {
    let right = format!("target {}", right.display());
    message(color, left, &right);
}

fn message(color: MsgColor, left: &str, right: &str) {
    if output::is_minimal() {
        return;
    }
    let left = match color {
        MsgColor::Green => left.green(),
        MsgColor::Cyan => left.cyan(),
        MsgColor::Red => left.red(),
    };
    println!("{left:>12} {right}");
}

/// Render a diagnostic and leave with its status code.
fn fail(err: &tinycpu::Error, src: Option<&str>) -> ! {
    eprintln!("{:?}", err.to_report(src));
    std::process::exit(err.kind().status_code())
}

fn assemble_file(name: &Path, config: &MachineConfig) -> Result<ProgramImage> {
    let src = fs::read_to_string(name).into_diagnostic()?;
    Ok(tinycpu::assemble(&src, config).unwrap_or_else(|err| fail(&err, Some(&src))))
}

fn run(name: &Path, machine: &MachineArgs, minimal: bool) -> Result<()> {
    output::set_minimal(minimal);
    let config = machine.config();
    let image = match name.extension().and_then(|ext| ext.to_str()) {
        Some("asm") => {
            file_message(MsgColor::Green, "Assembling", name);
            assemble_file(name, &config)?
        }
        Some("bin") => {
            file_message(MsgColor::Green, "Loading", name);
            let bytes = fs::read(name).into_diagnostic()?;
            ProgramImage::from_bytes(&bytes).unwrap_or_else(|err| fail(&err, None))
        }
        Some(_) => bail!("File has unknown extension. Exiting..."),
        None => bail!("File has no extension. Exiting..."),
    };

    let program = RunEnvironment::new(config).unwrap_or_else(|err| fail(&err, None));
    let mut program = match &machine.storage {
        Some(dir) => program.with_storage(DirStorage::new(dir)),
        None => program.with_storage(MemStorage::new()),
    };
    program.load(&image).unwrap_or_else(|err| fail(&err, None));

    message(MsgColor::Green, "Running", "loaded program");
    let result = match machine.max_steps {
        Some(max) => program.run_for(max),
        None => program.run(),
    };
    match result {
        Ok(Status::Halted) => {
            message(
                MsgColor::Green,
                "Halted",
                &format!(
                    "{} instructions, {} cycles",
                    program.instructions(),
                    program.cycles()
                ),
            );
            Ok(())
        }
        Ok(_) => {
            message(
                MsgColor::Cyan,
                "Stopped",
                &format!("step limit of {} instructions reached", program.instructions()),
            );
            Ok(())
        }
        Err(err) => {
            for line in program.output() {
                eprintln!("{}", line.red());
            }
            eprintln!("{:?}", err.to_report(None));
            std::process::exit(program.status_code())
        }
    }
}

const LOGO: &str = r#"
  _   _
 | |_(_)_ __  _   _  ___ _ __  _   _
 | __| | '_ \| | | |/ __| '_ \| | | |
 | |_| | | | | |_| | (__| |_) | |_| |
  \__|_|_| |_|\__, |\___| .__/ \__,_|
              |___/     |_|          "#;

const SHORT_INFO: &str = r"
Welcome to tinycpu, an assembler, disassembler and emulator
for a small 16-bit educational CPU.
Please use `-h` or `--help` to access the usage instructions and documentation.
";

const VERSION: &str = env!("CARGO_PKG_VERSION");
