//! Emulator configuration.
//!
//! Two on-disk formats:
//!
//! - **Text** (`config.txt`): one `key value` pair per line, whitespace
//!   separated. `#` starts a comment; string values may be quoted.
//! - **JSON**: any path ending in `.json`, same keys as the text format.
//!
//! Keys absent from either format keep their defaults. [`Config::validate`]
//! enforces the numeric constraints; the loaders call it before returning.
//!
//! ```text
//! num-cpu 4
//! scheduler "rr"
//! quantum-cycles 5
//! batch-process-freq 1
//! min-ins 1000
//! max-ins 2000
//! delay-per-exec 0
//! max-overall-mem 16384
//! mem-per-frame 16
//! min-mem-per-proc 4096
//! max-mem-per-proc 4096
//! ```

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::memory::{AllocatorKind, MemoryManager};
use crate::scheduler::{SchedulerConfig, SchedulingPolicy};

/// Upper bound on `num-cpu`.
pub const MAX_CPUS: u32 = 128;

/// Scheduling discipline as named in configuration files.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerKind {
    Fcfs,
    Rr,
}

impl fmt::Display for SchedulerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fcfs => f.write_str("fcfs"),
            Self::Rr => f.write_str("rr"),
        }
    }
}

/// Configuration load or validation failure.
#[derive(Debug)]
#[non_exhaustive]
pub enum ConfigError {
    /// Reading the file failed.
    Io { path: PathBuf, source: io::Error },
    /// JSON syntax or type error.
    Json(serde_json::Error),
    /// Text format: key not recognized.
    UnknownKey { key: String, line: usize },
    /// Text format: key without a value.
    MissingValue { key: String, line: usize },
    /// Text format: value does not parse for its key.
    InvalidValue { key: String, value: String, line: usize },
    /// Values parse but violate a constraint.
    Invalid { reason: String },
}

impl ConfigError {
    fn invalid(reason: impl Into<String>) -> Self {
        Self::Invalid {
            reason: reason.into(),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io { path, source } => write!(f, "cannot read {}: {source}", path.display()),
            Self::Json(err) => write!(f, "invalid JSON config: {err}"),
            Self::UnknownKey { key, line } => write!(f, "line {line}: unknown key `{key}`"),
            Self::MissingValue { key, line } => write!(f, "line {line}: key `{key}` has no value"),
            Self::InvalidValue { key, value, line } => {
                write!(f, "line {line}: invalid value `{value}` for `{key}`")
            }
            Self::Invalid { reason } => write!(f, "invalid configuration: {reason}"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Json(err) => Some(err),
            _ => None,
        }
    }
}

/// Emulator parameters.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct Config {
    /// Emulated cores.
    pub num_cpu: u32,
    pub scheduler: SchedulerKind,
    /// Round-robin slice length in instructions.
    pub quantum_cycles: u32,
    /// Batch spawner cadence, in spawner ticks.
    pub batch_process_freq: u32,
    /// Instruction count range for generated processes.
    pub min_ins: u32,
    pub max_ins: u32,
    /// Milliseconds slept after every instruction.
    pub delay_per_exec: u32,
    /// Memory arena size in bytes.
    pub max_overall_mem: u32,
    pub mem_per_frame: u32,
    /// Footprint range for generated processes (powers of two).
    pub min_mem_per_proc: u32,
    pub max_mem_per_proc: u32,
    /// Explicit allocator; derived from the frame size when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allocator: Option<AllocatorKind>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            num_cpu: 4,
            scheduler: SchedulerKind::Rr,
            quantum_cycles: 5,
            batch_process_freq: 1,
            min_ins: 1000,
            max_ins: 2000,
            delay_per_exec: 0,
            max_overall_mem: 16384,
            mem_per_frame: 16,
            min_mem_per_proc: 4096,
            max_mem_per_proc: 4096,
            allocator: None,
        }
    }
}

#[inline]
fn in_mem_range(x: u32) -> bool {
    x >= 2 && x.is_power_of_two()
}

fn strip_quotes(s: &str) -> &str {
    let b = s.as_bytes();
    if b.len() >= 2 && ((b[0] == b'"' && b[b.len() - 1] == b'"') || (b[0] == b'\'' && b[b.len() - 1] == b'\'')) {
        &s[1..s.len() - 1]
    } else {
        s
    }
}

impl Config {
    /// Load from `path`, picking the format by extension, and validate.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        if is_json {
            Self::from_json_str(&text)
        } else {
            Self::parse_text(&text)
        }
    }

    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let cfg: Self = serde_json::from_str(text).map_err(ConfigError::Json)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Parse the `key value` text format and validate.
    pub fn parse_text(text: &str) -> Result<Self, ConfigError> {
        let mut cfg = Self::default();
        for (idx, raw) in text.lines().enumerate() {
            let line = idx + 1;
            let content = raw.split('#').next().unwrap_or("").trim();
            if content.is_empty() {
                continue;
            }
            let mut parts = content.split_whitespace();
            let Some(key) = parts.next() else {
                continue;
            };
            let Some(value) = parts.next() else {
                return Err(ConfigError::MissingValue {
                    key: key.to_string(),
                    line,
                });
            };
            cfg.set(key, strip_quotes(value), line)?;
        }
        cfg.validate()?;
        Ok(cfg)
    }

    fn set(&mut self, key: &str, value: &str, line: usize) -> Result<(), ConfigError> {
        let bad = || ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
            line,
        };
        let num = || value.parse::<u32>().map_err(|_| bad());
        match key {
            "num-cpu" => self.num_cpu = num()?,
            "scheduler" => {
                self.scheduler = match value.to_ascii_lowercase().as_str() {
                    "fcfs" => SchedulerKind::Fcfs,
                    "rr" => SchedulerKind::Rr,
                    _ => return Err(bad()),
                }
            }
            "quantum-cycles" => self.quantum_cycles = num()?,
            "batch-process-freq" => self.batch_process_freq = num()?,
            "min-ins" => self.min_ins = num()?,
            "max-ins" => self.max_ins = num()?,
            "delay-per-exec" | "delays-per-exec" => self.delay_per_exec = num()?,
            "max-overall-mem" => self.max_overall_mem = num()?,
            "mem-per-frame" => self.mem_per_frame = num()?,
            "min-mem-per-proc" => self.min_mem_per_proc = num()?,
            "max-mem-per-proc" => self.max_mem_per_proc = num()?,
            "allocator" => {
                self.allocator = Some(match value.to_ascii_lowercase().as_str() {
                    "flat" => AllocatorKind::Flat,
                    "paging" => AllocatorKind::Paging,
                    _ => return Err(bad()),
                })
            }
            _ => {
                return Err(ConfigError::UnknownKey {
                    key: key.to_string(),
                    line,
                })
            }
        }
        Ok(())
    }

    /// Check every constraint; the first violation wins.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=MAX_CPUS).contains(&self.num_cpu) {
            return Err(ConfigError::invalid(format!(
                "num-cpu must be in 1..={MAX_CPUS}, got {}",
                self.num_cpu
            )));
        }
        if self.quantum_cycles == 0 {
            return Err(ConfigError::invalid("quantum-cycles must be >= 1"));
        }
        if self.batch_process_freq == 0 {
            return Err(ConfigError::invalid("batch-process-freq must be >= 1"));
        }
        if self.min_ins == 0 {
            return Err(ConfigError::invalid("min-ins must be >= 1"));
        }
        if self.max_ins < self.min_ins {
            return Err(ConfigError::invalid(format!(
                "max-ins ({}) is below min-ins ({})",
                self.max_ins, self.min_ins
            )));
        }
        for (key, v) in [
            ("max-overall-mem", self.max_overall_mem),
            ("mem-per-frame", self.mem_per_frame),
            ("min-mem-per-proc", self.min_mem_per_proc),
            ("max-mem-per-proc", self.max_mem_per_proc),
        ] {
            if !in_mem_range(v) {
                return Err(ConfigError::invalid(format!(
                    "{key} must be a power of two >= 2, got {v}"
                )));
            }
        }
        if self.mem_per_frame > self.max_overall_mem {
            return Err(ConfigError::invalid("mem-per-frame exceeds max-overall-mem"));
        }
        if self.max_mem_per_proc < self.min_mem_per_proc {
            return Err(ConfigError::invalid("max-mem-per-proc is below min-mem-per-proc"));
        }
        if self.max_mem_per_proc > self.max_overall_mem {
            return Err(ConfigError::invalid(
                "max-mem-per-proc exceeds max-overall-mem; such a process could never run",
            ));
        }
        Ok(())
    }

    /// Explicit allocator, else paging when frames are smaller than memory.
    pub fn allocator_kind(&self) -> AllocatorKind {
        self.allocator.unwrap_or(if self.mem_per_frame < self.max_overall_mem {
            AllocatorKind::Paging
        } else {
            AllocatorKind::Flat
        })
    }

    pub fn memory_manager(&self) -> MemoryManager {
        let total = self.max_overall_mem as usize;
        match self.allocator_kind() {
            AllocatorKind::Flat => MemoryManager::flat(total),
            AllocatorKind::Paging => MemoryManager::paging(total, self.mem_per_frame as usize),
        }
    }

    pub fn policy(&self) -> Result<SchedulingPolicy, ConfigError> {
        match self.scheduler {
            SchedulerKind::Fcfs => Ok(SchedulingPolicy::Fcfs),
            SchedulerKind::Rr => SchedulingPolicy::round_robin(self.quantum_cycles)
                .ok_or_else(|| ConfigError::invalid("quantum-cycles must be >= 1")),
        }
    }

    /// Scheduler parameters derived from this configuration.
    pub fn scheduler_config(&self) -> Result<SchedulerConfig, ConfigError> {
        self.validate()?;
        Ok(SchedulerConfig::new(self.num_cpu as usize, self.policy()?)
            .with_instruction_delay(Duration::from_millis(u64::from(self.delay_per_exec))))
    }
}
