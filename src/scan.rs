//! The implicit-dependency scanner boundary.
//!
//! Concrete scanners (C `#include` extraction and friends) live outside the
//! engine.  The core only needs: given a node's path, produce the dependency
//! paths discovered in its content.  Unlocatable includes are reported
//! through the warning sink and otherwise skipped.

use crate::fs::FileSystem;
use crate::warn::WarningSink;

pub trait Scanner {
    /// Scan `path` for implicit dependency paths.  Returning an error marks
    /// the scanned node as failed-to-scan; the scheduler attributes the
    /// error to that node when its task is prepared.
    fn scan(
        &self,
        path: &str,
        fs: &dyn FileSystem,
        warnings: &mut dyn WarningSink,
    ) -> anyhow::Result<Vec<String>>;
}

/// A scanner that never finds anything; the default when the caller has no
/// language-specific scanning to do.
pub struct NullScanner;

impl Scanner for NullScanner {
    fn scan(
        &self,
        _path: &str,
        _fs: &dyn FileSystem,
        _warnings: &mut dyn WarningSink,
    ) -> anyhow::Result<Vec<String>> {
        Ok(Vec::new())
    }
}
