//! Progress events emitted by the orchestrator and the submission client.

use std::fmt::Display;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    JobStarted,
    JobSucceeded,
    JobFailed,
    Submitted,
    SubmissionFailed,
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for log::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Debug => log::Level::Debug,
            LogLevel::Info => log::Level::Info,
            LogLevel::Warn => log::Level::Warn,
            LogLevel::Error => log::Level::Error,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    /// Proving worker, by slot in the batch.
    Prover(usize),
    Submitter,
}

impl Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Source::Prover(slot) => write!(f, "Prover {slot}"),
            Source::Submitter => write!(f, "Submitter"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Event {
    pub source: Source,
    pub msg: String,
    pub timestamp: String,
    pub event_type: EventType,
    pub log_level: LogLevel,
}

impl Event {
    fn new(source: Source, msg: String, event_type: EventType, log_level: LogLevel) -> Self {
        Self {
            source,
            msg,
            timestamp: chrono::Local::now().format("%H:%M:%S").to_string(),
            event_type,
            log_level,
        }
    }

    pub fn prover(slot: usize, msg: String, event_type: EventType) -> Self {
        let level = match event_type {
            EventType::JobFailed => LogLevel::Warn,
            EventType::JobStarted | EventType::Shutdown => LogLevel::Debug,
            _ => LogLevel::Info,
        };
        Self::new(Source::Prover(slot), msg, event_type, level)
    }

    pub fn submitter(msg: String, event_type: EventType) -> Self {
        let level = match event_type {
            EventType::SubmissionFailed => LogLevel::Warn,
            _ => LogLevel::Info,
        };
        Self::new(Source::Submitter, msg, event_type, level)
    }

    /// Forwards the event to the `log` facade at its own level.
    pub fn log(&self) {
        let level: log::Level = self.log_level.into();
        log::log!(level, "{self}");
    }
}

/// Outcome counts gathered while draining an event channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EventTally {
    pub succeeded: usize,
    pub failed: usize,
    pub shutdown: bool,
}

impl EventTally {
    pub fn record(&mut self, event: &Event) {
        match event.event_type {
            EventType::JobSucceeded | EventType::Submitted => self.succeeded += 1,
            EventType::JobFailed | EventType::SubmissionFailed => self.failed += 1,
            EventType::Shutdown => self.shutdown = true,
            EventType::JobStarted => {}
        }
    }
}

impl Display for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} [{}] {}", self.source, self.timestamp, self.msg)
    }
}
