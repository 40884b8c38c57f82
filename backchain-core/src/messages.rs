use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::config::{EngineConfig, LogLevel};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum MessageKind {
    Print,
    Warning,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub kind: MessageKind,
    pub msg: String,
}

#[derive(Clone, Debug)]
pub struct MessageQueue {
    messages: Arc<Mutex<VecDeque<Message>>>,
}

impl MessageQueue {
    pub fn new() -> Self {
        Self {
            messages: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    pub fn next(&self) -> Option<Message> {
        if let Ok(mut messages) = self.messages.lock() {
            messages.pop_front()
        } else {
            None
        }
    }

    pub fn push(&self, kind: MessageKind, msg: String) {
        if let Ok(mut messages) = self.messages.lock() {
            messages.push_back(Message { kind, msg });
        }
    }

}

impl Default for MessageQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Trace output shared by every interpreter in an engine.
///
/// Lines either go straight to stderr or are queued for the host to drain
/// with `Engine::next_message`.
#[derive(Clone, Debug)]
pub struct Logger {
    level: Option<LogLevel>,
    stderr: bool,
    messages: MessageQueue,
}

impl Logger {
    pub fn new(config: &EngineConfig, messages: MessageQueue) -> Self {
        Self {
            level: config.log_level,
            stderr: config.log_stderr,
            messages,
        }
    }

    pub fn enabled(&self, level: LogLevel) -> bool {
        matches!(self.level, Some(configured) if configured.should_print_on_level(level))
    }

    pub fn log<F, R>(&self, level: LogLevel, message_fn: F)
    where
        F: FnOnce() -> R,
        R: AsRef<str>,
    {
        if !self.enabled(level) {
            return;
        }
        let message = message_fn();
        for line in message.as_ref().split('\n') {
            let msg = format!("[backchain][{}] {}", level, line);
            if self.stderr {
                eprintln!("{}", msg);
            } else {
                self.messages.push(MessageKind::Print, msg);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn logger(level: Option<LogLevel>) -> (Logger, MessageQueue) {
        let messages = MessageQueue::new();
        let config = EngineConfig {
            log_level: level,
            ..EngineConfig::default()
        };
        (Logger::new(&config, messages.clone()), messages)
    }

    #[test]
    fn test_log_levels() {
        let (log, messages) = logger(Some(LogLevel::Debug));
        log.log(LogLevel::Trace, || "hidden");
        log.log(LogLevel::Debug, || "shown");
        log.log(LogLevel::Info, || "also\nsplit");
        let lines: Vec<String> = std::iter::from_fn(|| messages.next())
            .map(|m| m.msg)
            .collect();
        assert_eq!(
            lines,
            vec![
                "[backchain][debug] shown",
                "[backchain][info] also",
                "[backchain][info] split"
            ]
        );
    }

    #[test]
    fn test_muted_logger_is_lazy() {
        let (log, messages) = logger(None);
        log.log(LogLevel::Info, || -> String { panic!("formatted while muted") });
        assert!(messages.next().is_none());
    }
}
