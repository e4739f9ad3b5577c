use std::ffi::OsStr;
use std::time::Duration;

use crate::arch::ArchWidth;

/// Engine construction parameters.
///
/// Defaults are overridden by the host: first from the environment
/// (see [`MachineConfig::from_env`]), then from command-line flags.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MachineConfig {
    /// Total memory in bytes.
    pub memory_size: usize,
    /// Share of memory reserved for the stack at the top, in percent.
    pub stack_percent: u8,
    /// Share of memory reserved for the data segment below the stack, in percent.
    pub data_percent: u8,
    pub arch: ArchWidth,
    /// Pause applied after every PC increment.
    pub step_delay: Duration,
    /// Allow `pc` to be written through the generic register path.
    pub allow_pc_write: bool,
}

impl Default for MachineConfig {
    fn default() -> Self {
        MachineConfig {
            memory_size: 4096,
            stack_percent: 25,
            data_percent: 25,
            arch: ArchWidth::Bits16,
            step_delay: Duration::ZERO,
            allow_pc_write: false,
        }
    }
}

impl MachineConfig {
    /// Default configuration with environment overrides applied.
    ///
    /// - `TINYCPU_PC_WRITE=1` enables direct `pc` writes.
    /// - `TINYCPU_DELAY_MS=<n>` sets the step delay.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if var_is("TINYCPU_PC_WRITE", "1") {
            config.allow_pc_write = true;
        }
        if let Some(ms) = std::env::var("TINYCPU_DELAY_MS")
            .ok()
            .and_then(|value| value.trim().parse::<u64>().ok())
        {
            config.step_delay = Duration::from_millis(ms);
        }
        config
    }
}

/// `TINYCPU_TRACE=1` logs every executed instruction.
pub fn is_trace_enabled() -> bool {
    var_is("TINYCPU_TRACE", "1")
}

fn var_is(name: impl AsRef<OsStr>, value: impl AsRef<str>) -> bool {
    std::env::var(name.as_ref()).is_ok_and(|v| v == value.as_ref())
}
