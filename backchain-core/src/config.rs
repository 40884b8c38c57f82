use serde::{Deserialize, Serialize};

use std::collections::HashSet;
use std::env;

pub const DEFAULT_COMPLETION_CHECK_CYCLES: usize = 3;
pub const DEFAULT_STACK_LIMIT: usize = 250_000;

#[derive(Debug, Copy, Clone, PartialOrd, Ord, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
}

impl LogLevel {
    pub fn should_print_on_level(&self, level: LogLevel) -> bool {
        *self <= level
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub log_level: Option<LogLevel>,
    /// Print log lines immediately instead of queueing them.
    pub log_stderr: bool,
    /// Generator pumps between batched completion checks. Zero disables batching.
    pub completion_check_cycles: usize,
    /// Maximum number of choice frames one interpreter may hold.
    pub stack_limit: usize,
    /// Count clause entries for `Engine::profile`.
    pub profile: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            log_level: None,
            log_stderr: false,
            completion_check_cycles: DEFAULT_COMPLETION_CHECK_CYCLES,
            stack_limit: DEFAULT_STACK_LIMIT,
            profile: false,
        }
    }
}

impl EngineConfig {
    /// Read `BACKCHAIN_LOG`, `BACKCHAIN_COMPLETION_CYCLES`, `BACKCHAIN_STACK_LIMIT`
    /// and `BACKCHAIN_PROFILE`; anything unset or unparsable keeps its default.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.set_logging_options(env::var("BACKCHAIN_LOG").ok());
        if let Some(cycles) = parse_var("BACKCHAIN_COMPLETION_CYCLES") {
            config.completion_check_cycles = cycles;
        }
        if let Some(limit) = parse_var("BACKCHAIN_STACK_LIMIT") {
            config.stack_limit = limit;
        }
        config.profile = matches!(
            env::var("BACKCHAIN_PROFILE").as_deref(),
            Ok("1") | Ok("true")
        );
        config
    }

    pub fn set_logging_options(&mut self, backchain_log: Option<String>) {
        let backchain_log = backchain_log.unwrap_or_default();
        let log_vars: HashSet<String> = backchain_log
            .split(',')
            .filter(|v| !v.is_empty())
            .map(|s| s.trim().to_lowercase())
            .collect();

        self.log_stderr = log_vars.contains("now");
        self.log_level = None;

        // The values `off` and `0` mute all logging and take precedence over any other coexisting value.
        if !log_vars.is_empty()
            && log_vars.is_disjoint(&HashSet::from(["off".to_string(), "0".to_string()]))
        {
            self.log_level = if log_vars.contains(&LogLevel::Trace.to_string()) {
                Some(LogLevel::Trace)
            } else if log_vars.contains(&LogLevel::Debug.to_string()) {
                Some(LogLevel::Debug)
            } else {
                Some(LogLevel::Info)
            }
        }
    }
}

fn parse_var(name: &str) -> Option<usize> {
    env::var(name).ok().and_then(|v| v.trim().parse().ok())
}
