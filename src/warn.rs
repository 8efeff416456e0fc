//! Non-fatal warnings and the pluggable sink they are reported through.
//!
//! The build keeps going after any of these; the sink exists so front-ends
//! can collect, reformat, or suppress them.

use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum Warning {
    /// A persisted signature record could not be read or parsed.  The prior
    /// record is discarded and the affected paths rebuild from scratch.
    CorruptSigRecord { path: String },

    /// An implicit dependency could not be resolved while scanning; the
    /// build continues without that edge.
    Dependency { node: String, message: String },

    /// A builder call supplied a misspelled override key (e.g. "sources"
    /// for "source"); the override is ignored.
    MisleadingKeyword { given: String, suggestion: String },
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Warning::CorruptSigRecord { path } => {
                write!(f, "ignoring corrupt signature record: {}", path)
            }
            Warning::Dependency { node, message } => {
                write!(f, "{}: {}", node, message)
            }
            Warning::MisleadingKeyword { given, suggestion } => {
                write!(
                    f,
                    "ignoring unknown keyword {:?}; did you mean {:?}?",
                    given, suggestion
                )
            }
        }
    }
}

pub trait WarningSink {
    fn warn(&mut self, warning: Warning);
}

/// Default sink: forwards to the `log` facade.
#[derive(Default)]
pub struct LogSink;

impl WarningSink for LogSink {
    fn warn(&mut self, warning: Warning) {
        log::warn!("{}", warning);
    }
}

/// Collects warnings in memory; used by tests and batch front-ends.
#[derive(Default)]
pub struct CollectedWarnings(pub Vec<Warning>);

impl WarningSink for CollectedWarnings {
    fn warn(&mut self, warning: Warning) {
        self.0.push(warning);
    }
}
