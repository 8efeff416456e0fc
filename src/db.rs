//! The signature database: per-node records persisted across runs, used to
//! decide which targets are already up to date.
//!
//! Records are keyed by (directory, filename).  Two interchangeable
//! backends: one record file per directory, or one aggregate file for the
//! whole tree.  Nothing here is correctness-critical for the *current* run;
//! a record that cannot be read is discarded (forcing a rebuild decision
//! from scratch) and a record that cannot be written is dropped silently.

use crate::hash::Sig;
use crate::warn::Warning;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::PathBuf;

/// The unit persisted per node path.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SigRecord {
    /// Last observed modification time.
    #[serde(default)]
    pub timestamp: Option<i64>,
    /// Build signature: hash over child signatures plus the action
    /// signature that produced this node.
    #[serde(default)]
    pub bsig: Option<Sig>,
    /// Content signature: hash of the node's own bytes.
    #[serde(default)]
    pub csig: Option<Sig>,
    /// Implicit dependency paths discovered at last build; a scan hint for
    /// the next run.
    #[serde(default)]
    pub implicit: Vec<String>,
    /// String form of the action that produced this node.
    #[serde(default)]
    pub bact: String,
    /// Signature of that action.
    #[serde(default)]
    pub bactsig: Option<Sig>,
}

type DirEntries = FxHashMap<String, SigRecord>;

struct DirRecords {
    entries: DirEntries,
    dirty: bool,
}

enum Backend {
    /// One record file named `filename` inside each directory.
    PerDirectory { filename: String },
    /// One aggregate file keyed by directory path.
    Aggregate { path: PathBuf, loaded: bool },
}

/// The signature store.  Exclusively owns the in-memory record cache;
/// nodes hold no references and query by path.
pub struct SigStore {
    backend: Backend,
    dirs: FxHashMap<String, DirRecords>,
    /// Non-fatal problems found while loading, drained by the session.
    warnings: Vec<Warning>,
}

/// Default name for per-directory record files.
pub const DEFAULT_RECORD_FILE: &str = ".sigmake";

impl SigStore {
    /// A store writing one record file into each directory it tracks.
    pub fn per_directory(filename: impl Into<String>) -> SigStore {
        SigStore {
            backend: Backend::PerDirectory {
                filename: filename.into(),
            },
            dirs: FxHashMap::default(),
            warnings: Vec::new(),
        }
    }

    /// A store keeping every directory's records in one aggregate file.
    pub fn aggregate(path: impl Into<PathBuf>) -> SigStore {
        SigStore {
            backend: Backend::Aggregate {
                path: path.into(),
                loaded: false,
            },
            dirs: FxHashMap::default(),
            warnings: Vec::new(),
        }
    }

    /// Fetch the record for a path, creating an empty default on first
    /// access.  Never fails: unreadable/corrupt prior records degrade to
    /// "no prior record" with a warning.
    pub fn get(&mut self, dir: &str, file: &str) -> SigRecord {
        self.load_dir(dir);
        self.dirs
            .get(dir)
            .and_then(|d| d.entries.get(file))
            .cloned()
            .unwrap_or_default()
    }

    pub fn set_csig(&mut self, dir: &str, file: &str, csig: Sig) {
        let entry = self.entry_mut(dir, file);
        entry.csig = Some(csig);
    }

    pub fn set_timestamp(&mut self, dir: &str, file: &str, timestamp: i64) {
        let entry = self.entry_mut(dir, file);
        entry.timestamp = Some(timestamp);
    }

    pub fn set_binfo(
        &mut self,
        dir: &str,
        file: &str,
        bsig: Sig,
        implicit: Vec<String>,
        bact: String,
        bactsig: Sig,
    ) {
        let entry = self.entry_mut(dir, file);
        entry.bsig = Some(bsig);
        entry.implicit = implicit;
        entry.bact = bact;
        entry.bactsig = Some(bactsig);
    }

    /// The implicit dependency paths recorded at last build, for callers
    /// that want to pre-seed scanning.
    pub fn get_implicit(&mut self, dir: &str, file: &str) -> Vec<String> {
        self.get(dir, file).implicit
    }

    fn entry_mut(&mut self, dir: &str, file: &str) -> &mut SigRecord {
        self.load_dir(dir);
        let d = self
            .dirs
            .entry(dir.to_string())
            .or_insert_with(|| DirRecords {
                entries: FxHashMap::default(),
                dirty: false,
            });
        d.dirty = true;
        d.entries.entry(file.to_string()).or_default()
    }

    pub fn take_warnings(&mut self) -> Vec<Warning> {
        std::mem::take(&mut self.warnings)
    }

    fn load_dir(&mut self, dir: &str) {
        enum Plan {
            PerDir(String),
            Aggregate(PathBuf),
        }
        let plan = match &mut self.backend {
            Backend::PerDirectory { filename } => {
                if self.dirs.contains_key(dir) {
                    return;
                }
                Plan::PerDir(format!("{}/{}", dir, filename))
            }
            Backend::Aggregate { path, loaded } => {
                if *loaded {
                    return;
                }
                *loaded = true;
                Plan::Aggregate(path.clone())
            }
        };
        match plan {
            Plan::PerDir(path) => {
                let entries = match std::fs::read(&path) {
                    Ok(bytes) => match serde_json::from_slice::<DirEntries>(&bytes) {
                        Ok(entries) => entries,
                        Err(err) => {
                            log::warn!("corrupt record file {}: {}", path, err);
                            self.warnings.push(Warning::CorruptSigRecord { path });
                            DirEntries::default()
                        }
                    },
                    Err(_) => DirEntries::default(),
                };
                self.dirs.insert(
                    dir.to_string(),
                    DirRecords {
                        entries,
                        dirty: false,
                    },
                );
            }
            Plan::Aggregate(path) => {
                let all: FxHashMap<String, DirEntries> = match std::fs::read(&path) {
                    Ok(bytes) => match serde_json::from_slice(&bytes) {
                        Ok(all) => all,
                        Err(err) => {
                            log::warn!("corrupt record file {}: {}", path.display(), err);
                            self.warnings.push(Warning::CorruptSigRecord {
                                path: path.display().to_string(),
                            });
                            FxHashMap::default()
                        }
                    },
                    Err(_) => FxHashMap::default(),
                };
                for (dir, entries) in all {
                    self.dirs.insert(
                        dir,
                        DirRecords {
                            entries,
                            dirty: false,
                        },
                    );
                }
            }
        }
    }

    /// Persist all dirty records.  Safe to call once at the end of a run;
    /// persistence failures never fail the build, since the recorded state
    /// only speeds up the *next* run.
    pub fn write(&mut self) {
        match &self.backend {
            Backend::PerDirectory { filename } => {
                let filename = filename.clone();
                for (dir, recs) in self.dirs.iter_mut() {
                    if !recs.dirty {
                        continue;
                    }
                    let data = match serde_json::to_vec(&recs.entries) {
                        Ok(data) => data,
                        Err(err) => {
                            log::warn!("serializing records for {}: {}", dir, err);
                            continue;
                        }
                    };
                    let target = format!("{}/{}", dir, filename);
                    write_record_file(&target, dir, &data);
                    recs.dirty = false;
                }
            }
            Backend::Aggregate { path, .. } => {
                if !self.dirs.values().any(|d| d.dirty) {
                    return;
                }
                let all: FxHashMap<&String, &DirEntries> =
                    self.dirs.iter().map(|(k, v)| (k, &v.entries)).collect();
                let data = match serde_json::to_vec(&all) {
                    Ok(data) => data,
                    Err(err) => {
                        log::warn!("serializing records: {}", err);
                        return;
                    }
                };
                let target = path.display().to_string();
                let dir = path
                    .parent()
                    .map(|p| p.display().to_string())
                    .filter(|p| !p.is_empty())
                    .unwrap_or_else(|| ".".to_string());
                write_record_file(&target, &dir, &data);
                for recs in self.dirs.values_mut() {
                    recs.dirty = false;
                }
            }
        }
    }
}

/// Write a record file as durably as the directory allows: temporary file
/// plus rename first, then a direct in-place write, and if the directory is
/// effectively read-only, skip the write entirely.
fn write_record_file(target: &str, dir: &str, data: &[u8]) {
    let temp = format!("{}/.sigtmp.{}", dir, std::process::id());
    let wrote_temp = std::fs::File::create(&temp)
        .and_then(|mut f| f.write_all(data))
        .is_ok();
    if wrote_temp && std::fs::rename(&temp, target).is_ok() {
        return;
    }
    if std::fs::write(target, data).is_err() {
        log::debug!("record file {} not writable; skipping", target);
    }
    let _ = std::fs::remove_file(&temp);
}
