//! Bridge from the consensus layer's verbosity-gated logging onto a
//! leveled, field-structured host logger.
//!
//! A [`Logger`] carries an optional host destination, a set of static
//! fields and two numbers: the configured `verbosity` and the V-level of
//! the current view. `v(level)` returns a new view, so callers can hand out
//! `logger.v(2)` for chatty diagnostics without touching the base logger.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

/// Host severities, most severe first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Level {
    Panic,
    Fatal,
    Error,
    Warn,
    Info,
    Debug,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Level::Panic => "panic",
            Level::Fatal => "fatal",
            Level::Error => "error",
            Level::Warn => "warn",
            Level::Info => "info",
            Level::Debug => "debug",
        };
        f.write_str(name)
    }
}

/// Static key/value pairs attached to every record
pub type Fields = BTreeMap<String, String>;

/// Host logger capability
pub trait StructuredLogger: fmt::Debug + Send + Sync {
    /// Check if records of this severity are kept
    fn enabled(&self, level: Level) -> bool;

    fn log(&self, level: Level, fields: &Fields, args: fmt::Arguments<'_>);
}

/// Host logger forwarding records to `tracing`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TracingLogger {
    threshold: Level,
}

impl TracingLogger {
    pub fn new(threshold: Level) -> Self {
        TracingLogger { threshold }
    }

    pub fn threshold(&self) -> Level {
        self.threshold
    }
}

impl Default for TracingLogger {
    fn default() -> Self {
        TracingLogger::new(Level::Info)
    }
}

struct DisplayFields<'a>(&'a Fields);

impl fmt::Display for DisplayFields<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (key, value) in self.0 {
            write!(f, " {}={}", key, value)?;
        }
        Ok(())
    }
}

impl StructuredLogger for TracingLogger {
    fn enabled(&self, level: Level) -> bool {
        level <= self.threshold
    }

    fn log(&self, level: Level, fields: &Fields, args: fmt::Arguments<'_>) {
        let fields = DisplayFields(fields);
        match level {
            Level::Panic | Level::Fatal => error!(severity = %level, "{}{}", args, fields),
            Level::Error => error!("{}{}", args, fields),
            Level::Warn => warn!("{}{}", args, fields),
            Level::Info => info!("{}{}", args, fields),
            Level::Debug => debug!("{}{}", args, fields),
        }
    }
}

/// Verbosity gate
pub trait Verbose {
    fn enabled(&self) -> bool;
}

/// Logging interface used by the consensus layer
pub trait RaftLog: Verbose {
    fn infof(&self, args: fmt::Arguments<'_>);
    fn warningf(&self, args: fmt::Arguments<'_>);
    fn errorf(&self, args: fmt::Arguments<'_>);
    fn fatalf(&self, args: fmt::Arguments<'_>);
    fn panicf(&self, args: fmt::Arguments<'_>);

    /// A view at the given V-level
    fn v(&self, level: u32) -> Self
    where
        Self: Sized;

    fn info(&self, msg: &str) {
        self.infof(format_args!("{}", msg));
    }

    fn warning(&self, msg: &str) {
        self.warningf(format_args!("{}", msg));
    }

    fn error(&self, msg: &str) {
        self.errorf(format_args!("{}", msg));
    }

    fn fatal(&self, msg: &str) {
        self.fatalf(format_args!("{}", msg));
    }

    fn panic(&self, msg: &str) {
        self.panicf(format_args!("{}", msg));
    }
}

/// Adapter implementing [`RaftLog`] on top of a [`StructuredLogger`]
#[derive(Debug, Clone, Default)]
pub struct Logger {
    destination: Option<Arc<dyn StructuredLogger>>,
    fields: Fields,
    verbosity: u32,
    verbosity_field: Option<String>,
    level: u32,
}

impl Logger {
    pub fn new(destination: Arc<dyn StructuredLogger>) -> Self {
        Logger {
            destination: Some(destination),
            ..Default::default()
        }
    }

    /// Logger writing to `tracing` at info and above
    pub fn tracing() -> Self {
        Logger::new(Arc::new(TracingLogger::default()))
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.fields.insert(key.into(), value.to_string());
        self
    }

    pub fn with_verbosity(mut self, verbosity: u32) -> Self {
        self.verbosity = verbosity;
        self
    }

    /// Record the V-level of each record under `field`
    pub fn with_verbosity_field(mut self, field: impl Into<String>) -> Self {
        self.verbosity_field = Some(field.into());
        self
    }

    pub fn set_destination(&mut self, destination: Arc<dyn StructuredLogger>) {
        self.destination = Some(destination);
    }

    pub fn has_destination(&self) -> bool {
        self.destination.is_some()
    }

    pub fn fields(&self) -> &Fields {
        &self.fields
    }

    pub fn verbosity(&self) -> u32 {
        self.verbosity
    }

    /// V-level of this view
    pub fn level(&self) -> u32 {
        self.level
    }

    fn emit(&self, level: Level, args: fmt::Arguments<'_>) {
        if !Verbose::enabled(self) {
            return;
        }
        let Some(destination) = &self.destination else {
            return;
        };
        if !destination.enabled(level) {
            return;
        }

        match &self.verbosity_field {
            Some(field) => {
                let mut fields = self.fields.clone();
                fields.insert(field.clone(), self.level.to_string());
                destination.log(level, &fields, args);
            }
            None => destination.log(level, &self.fields, args),
        }
    }
}

impl Verbose for Logger {
    fn enabled(&self) -> bool {
        self.destination.is_some() && self.level <= self.verbosity
    }
}

impl RaftLog for Logger {
    fn infof(&self, args: fmt::Arguments<'_>) {
        self.emit(Level::Info, args);
    }

    fn warningf(&self, args: fmt::Arguments<'_>) {
        self.emit(Level::Warn, args);
    }

    fn errorf(&self, args: fmt::Arguments<'_>) {
        self.emit(Level::Error, args);
    }

    fn fatalf(&self, args: fmt::Arguments<'_>) {
        self.emit(Level::Fatal, args);
    }

    fn panicf(&self, args: fmt::Arguments<'_>) {
        self.emit(Level::Panic, args);
    }

    fn v(&self, level: u32) -> Self {
        Logger {
            level,
            ..self.clone()
        }
    }
}

impl<T: Verbose> Verbose for Option<T> {
    fn enabled(&self) -> bool {
        self.as_ref().is_some_and(Verbose::enabled)
    }
}

// An absent bridge drops everything.
impl<T: RaftLog> RaftLog for Option<T> {
    fn infof(&self, args: fmt::Arguments<'_>) {
        if let Some(logger) = self {
            logger.infof(args);
        }
    }

    fn warningf(&self, args: fmt::Arguments<'_>) {
        if let Some(logger) = self {
            logger.warningf(args);
        }
    }

    fn errorf(&self, args: fmt::Arguments<'_>) {
        if let Some(logger) = self {
            logger.errorf(args);
        }
    }

    fn fatalf(&self, args: fmt::Arguments<'_>) {
        if let Some(logger) = self {
            logger.fatalf(args);
        }
    }

    fn panicf(&self, args: fmt::Arguments<'_>) {
        if let Some(logger) = self {
            logger.panicf(args);
        }
    }

    fn v(&self, level: u32) -> Self {
        self.as_ref().map(|logger| logger.v(level))
    }
}
