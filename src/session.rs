//! The per-invocation build context.
//!
//! One `BuildSession` owns the signature store, the calculator options, the
//! warning sink, and the cache hooks for a single build invocation.  It is
//! created at the start of a run and passed explicitly to everything that
//! needs persistence; there are no process-wide singletons.

use crate::db::SigStore;
use crate::hash::Calculator;
use crate::warn::{LogSink, Warning, WarningSink};

/// Hooks for an external build cache.  `retrieve` returning true means the
/// target was satisfied from the cache and its action can be skipped.
pub trait Cache {
    fn retrieve(&mut self, target: &str) -> bool;
    fn push(&mut self, target: &str);
}

/// The default cache: never hits.
pub struct NoCache;

impl Cache for NoCache {
    fn retrieve(&mut self, _target: &str) -> bool {
        false
    }

    fn push(&mut self, _target: &str) {}
}

pub struct BuildSession {
    pub store: SigStore,
    pub calc: Calculator,
    pub warnings: Box<dyn WarningSink>,
    pub cache: Box<dyn Cache>,
}

impl BuildSession {
    pub fn new(store: SigStore, calc: Calculator) -> BuildSession {
        BuildSession {
            store,
            calc,
            warnings: Box::new(LogSink),
            cache: Box::new(NoCache),
        }
    }

    pub fn with_warnings(mut self, warnings: Box<dyn WarningSink>) -> BuildSession {
        self.warnings = warnings;
        self
    }

    pub fn with_cache(mut self, cache: Box<dyn Cache>) -> BuildSession {
        self.cache = cache;
        self
    }

    pub fn warn(&mut self, warning: Warning) {
        self.warnings.warn(warning);
    }

    /// Forward warnings buffered inside the store to the sink.
    pub fn flush_warnings(&mut self) {
        for w in self.store.take_warnings() {
            self.warnings.warn(w);
        }
    }

    /// End of run: drain pending warnings and persist dirty records.
    pub fn finish(&mut self) {
        self.flush_warnings();
        self.store.write();
    }
}
