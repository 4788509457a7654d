//! Configuration types for exprbox.
//!
//! `SandboxConfig` is the top-level `exprbox.toml`. Every field has a
//! default, so an empty file (or no file) yields a working setup.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::bridge::BridgeKind;

/// Limits and switches applied to one bridge instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Memory budget for the isolated context, in MB (default: 128).
    #[serde(default = "default_memory_limit_mb")]
    pub memory_limit_mb: u64,
    /// Wall-clock budget per execution, in milliseconds (default: 5000).
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Forwards in-isolate `console` output to the host log. Never enable in production.
    #[serde(default)]
    pub debug: bool,
    /// Loop iterations allowed per execution before it is treated as runaway CPU.
    #[serde(default = "default_max_loop_iterations")]
    pub max_loop_iterations: u64,
    #[serde(default = "default_max_recursion_depth")]
    pub max_recursion_depth: usize,
    /// Longest accepted compiled expression, in bytes.
    #[serde(default = "default_max_code_length")]
    pub max_code_length: usize,
    /// Largest serialized result an execution may return, in bytes.
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,
}

fn default_memory_limit_mb() -> u64 {
    128
}

fn default_timeout_ms() -> u64 {
    5_000
}

fn default_max_loop_iterations() -> u64 {
    10_000_000
}

fn default_max_recursion_depth() -> usize {
    512
}

fn default_max_code_length() -> usize {
    64 * 1024
}

fn default_max_output_bytes() -> usize {
    8 * 1024 * 1024
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            memory_limit_mb: default_memory_limit_mb(),
            timeout_ms: default_timeout_ms(),
            debug: false,
            max_loop_iterations: default_max_loop_iterations(),
            max_recursion_depth: default_max_recursion_depth(),
            max_code_length: default_max_code_length(),
            max_output_bytes: default_max_output_bytes(),
        }
    }
}

impl BridgeConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn memory_limit_bytes(&self) -> u64 {
        self.memory_limit_mb * 1024 * 1024
    }
}

/// Evaluator tuning knobs that can live in a config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluatorSettings {
    #[serde(default = "default_enable_cache")]
    pub enable_cache: bool,
    /// Compiled-expression cache capacity (default: 1000).
    #[serde(default = "default_max_cache_size")]
    pub max_cache_size: usize,
}

fn default_enable_cache() -> bool {
    true
}

fn default_max_cache_size() -> usize {
    1_000
}

impl Default for EvaluatorSettings {
    fn default() -> Self {
        Self {
            enable_cache: default_enable_cache(),
            max_cache_size: default_max_cache_size(),
        }
    }
}

/// How the process backend launches its runner child.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunnerSettings {
    /// Runner executable. Defaults to the current executable.
    #[serde(default)]
    pub program: Option<PathBuf>,
    /// Arguments passed to the runner. Defaults to `["runner"]` when empty.
    #[serde(default)]
    pub args: Vec<String>,
}

/// Top-level configuration loaded from `exprbox.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SandboxConfig {
    #[serde(default)]
    pub backend: BridgeKind,
    /// Permit backends that cannot enforce the memory cap or kill a runaway
    /// execution (`isolate`, `worker`, `in_process`). Only for trusted
    /// expressions and tests.
    #[serde(default)]
    pub allow_unconfined: bool,
    #[serde(default)]
    pub bridge: BridgeConfig,
    #[serde(default)]
    pub evaluator: EvaluatorSettings,
    #[serde(default)]
    pub runner: RunnerSettings,
}
