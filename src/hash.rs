//! Signature computation.
//!
//! Two signatures per node: the content signature (csig) identifies the
//! node's own bytes; the build signature (bsig) identifies the inputs that
//! produced the node, as an ordered hash over child signatures plus the
//! action signature.  Comparing a freshly computed bsig against the stored
//! one tells us whether a builder needs to run again, without trusting
//! timestamps alone.

use crate::db::SigStore;
use crate::error::{Error, Result};
use crate::fs::{FileSystem, MTime};
use crate::graph::{Graph, NodeId, NodeKind};
use crate::paths::split_dir_file;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

const UNIT_SEPARATOR: u8 = 0x1F;

/// A signature value.  Compared for equality only; persisted as hex.
#[derive(Copy, Clone, Eq, PartialEq)]
pub struct Sig([u8; 32]);

impl Sig {
    pub fn of_bytes(data: &[u8]) -> Sig {
        Sig(*blake3::hash(data).as_bytes())
    }

    pub fn of_str(data: &str) -> Sig {
        Sig::of_bytes(data.as_bytes())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        let mut s = String::with_capacity(64);
        for b in &self.0 {
            s.push_str(&format!("{:02x}", b));
        }
        s
    }

    pub fn from_hex(hex: &str) -> Option<Sig> {
        if hex.len() != 64 {
            return None;
        }
        let mut out = [0u8; 32];
        for (i, chunk) in hex.as_bytes().chunks(2).enumerate() {
            let s = std::str::from_utf8(chunk).ok()?;
            out[i] = u8::from_str_radix(s, 16).ok()?;
        }
        Some(Sig(out))
    }
}

impl std::fmt::Debug for Sig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Sig({}..)", &self.to_hex()[..8])
    }
}

impl Serialize for Sig {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Sig {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Sig, D::Error> {
        let s = String::deserialize(deserializer)?;
        Sig::from_hex(&s).ok_or_else(|| D::Error::custom("malformed signature"))
    }
}

/// An incremental hasher for composite signatures.
pub struct SigHasher(blake3::Hasher);

impl SigHasher {
    pub fn new() -> SigHasher {
        SigHasher(blake3::Hasher::new())
    }

    pub fn write_sig(&mut self, sig: &Sig) {
        self.0.update(sig.as_bytes());
        self.0.update(&[UNIT_SEPARATOR]);
    }

    pub fn write_str(&mut self, s: &str) {
        self.0.update(s.as_bytes());
        self.0.update(&[UNIT_SEPARATOR]);
    }

    pub fn finish(self) -> Sig {
        Sig(*self.0.finalize().as_bytes())
    }
}

impl Default for SigHasher {
    fn default() -> Self {
        SigHasher::new()
    }
}

/// Default timestamp-trust threshold: two days, like the classic default
/// for long-lived trees.
pub const DEFAULT_MAX_DRIFT: i64 = 2 * 24 * 60 * 60;

/// Computes signatures and currency decisions, backed by the signature
/// store.
pub struct Calculator {
    /// A stored csig is trusted without re-reading content only when the
    /// recorded timestamp still matches and is older than `now - max_drift`.
    /// Negative disables trusting stored content signatures entirely.
    pub max_drift: i64,
}

impl Default for Calculator {
    fn default() -> Self {
        Calculator {
            max_drift: DEFAULT_MAX_DRIFT,
        }
    }
}

impl Calculator {
    pub fn new(max_drift: i64) -> Calculator {
        Calculator { max_drift }
    }

    /// The signature of this node's own content.  Cached on the node for
    /// the rest of the run.
    pub fn content_signature(
        &self,
        graph: &mut Graph,
        id: NodeId,
        store: &mut SigStore,
        fs: &dyn FileSystem,
    ) -> Result<Sig> {
        if let Some(csig) = graph.node(id).csig {
            return Ok(csig);
        }
        let (name, kind) = {
            let node = graph.node(id);
            (node.name.clone(), node.kind)
        };
        let csig = match kind {
            // Value and alias nodes have no on-disk bytes; their identity
            // is the name/text itself.
            NodeKind::Value | NodeKind::Alias | NodeKind::Dir => Sig::of_str(&name),
            NodeKind::Entry | NodeKind::File => self.file_csig(&name, store, fs)?,
        };
        graph.node_mut(id).csig = Some(csig);
        Ok(csig)
    }

    fn file_csig(&self, name: &str, store: &mut SigStore, fs: &dyn FileSystem) -> Result<Sig> {
        let ts = match fs
            .stat(name)
            .map_err(|err| Error::build(name, format!("stat: {}", err)))?
        {
            MTime::Stamp(ts) => ts,
            MTime::Missing => {
                return Err(Error::build(name, "no such file while computing signature"))
            }
        };
        let (dir, file) = split_dir_file(name);
        // Trust the stored csig only when the timestamp still matches and
        // enough wall-clock time has passed that a same-second content
        // change cannot hide behind an identical stamp.  Negative elapsed
        // time (clock skew) never trusts.
        let elapsed = fs.now() - ts;
        let trustable = self.max_drift >= 0 && elapsed > self.max_drift;
        if trustable {
            let rec = store.get(dir, file);
            if rec.timestamp == Some(ts) {
                if let Some(csig) = rec.csig {
                    return Ok(csig);
                }
            }
        }
        let data = fs
            .read(name)
            .map_err(|err| Error::build(name, format!("read: {}", err)))?;
        let csig = Sig::of_bytes(&data);
        if trustable {
            // Refresh the stored pair now so future runs can trust it.
            store.set_csig(dir, file, csig);
            store.set_timestamp(dir, file, ts);
        }
        Ok(csig)
    }

    /// The signature a parent should fold in for this child: the build
    /// signature for derived nodes, the content signature otherwise.  Only
    /// valid once the child has been visited.
    pub fn node_signature(
        &self,
        graph: &mut Graph,
        id: NodeId,
        store: &mut SigStore,
        fs: &dyn FileSystem,
    ) -> Result<Sig> {
        if graph.node(id).is_derived() {
            if let Some(bsig) = graph.node(id).bsig {
                return Ok(bsig);
            }
            let (dir, file) = {
                let name = &graph.node(id).name;
                let (d, f) = split_dir_file(name);
                (d.to_string(), f.to_string())
            };
            if let Some(bsig) = store.get(&dir, &file).bsig {
                graph.node_mut(id).bsig = Some(bsig);
                return Ok(bsig);
            }
            // Derived but no recorded build: fall back to identifying it
            // by content.
        }
        self.content_signature(graph, id, store, fs)
    }

    /// The build signature: an ordered hash over every child's signature
    /// plus the action signature.  Only valid once all children are
    /// finalized; an empty child list with no action hashes to a
    /// well-defined constant.
    pub fn build_signature(
        &self,
        graph: &mut Graph,
        id: NodeId,
        store: &mut SigStore,
        fs: &dyn FileSystem,
    ) -> Result<Sig> {
        let mut h = SigHasher::new();
        for child in graph.children(id) {
            let sig = self.node_signature(graph, child, store, fs)?;
            h.write_sig(&sig);
        }
        match graph.node(id).executor() {
            Some(exec) => {
                let bactsig = exec.signature();
                h.write_sig(&bactsig);
            }
            None => h.write_str(""),
        }
        Ok(h.finish())
    }

    /// Decide whether a node needs rebuilding, comparing the candidate
    /// build signature against the stored record.  A missing or
    /// differently-shaped old signature is "not current" (conservative),
    /// never an error.
    pub fn is_current(
        &self,
        graph: &Graph,
        id: NodeId,
        store: &mut SigStore,
        fs: &dyn FileSystem,
        candidate: Option<&Sig>,
    ) -> bool {
        let node = graph.node(id);
        if node.always_build {
            return false;
        }
        let (dir, file) = split_dir_file(&node.name);
        if !node.has_builder() {
            // Pure source short-circuit: unchanged timestamp means current,
            // no hash comparison needed.
            return match node.kind {
                NodeKind::Dir => true,
                NodeKind::Value | NodeKind::Alias => {
                    store.get(dir, file).csig == Some(Sig::of_str(&node.name))
                }
                NodeKind::Entry | NodeKind::File => match fs.stat(&node.name) {
                    Ok(MTime::Stamp(ts)) => store.get(dir, file).timestamp == Some(ts),
                    _ => false,
                },
            };
        }
        // Derived nodes must exist and their recorded build signature must
        // match what we would build them from now.
        if matches!(node.kind, NodeKind::Entry | NodeKind::File) {
            match fs.stat(&node.name) {
                Ok(MTime::Stamp(_)) => {}
                _ => return false,
            }
        }
        match (store.get(dir, file).bsig, candidate) {
            (Some(old), Some(new)) => old == *new,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_round_trip() {
        let sig = Sig::of_bytes(b"hello");
        let hex = sig.to_hex();
        assert_eq!(Sig::from_hex(&hex), Some(sig));
        assert_eq!(Sig::from_hex("zz"), None);
        assert_eq!(Sig::from_hex(&hex[..10]), None);
    }

    #[test]
    fn content_addressed() {
        assert_eq!(Sig::of_bytes(b"abc"), Sig::of_bytes(b"abc"));
        assert_ne!(Sig::of_bytes(b"abc"), Sig::of_bytes(b"abd"));
    }

    #[test]
    fn composite_order_matters() {
        let a = Sig::of_str("a");
        let b = Sig::of_str("b");
        let mut h1 = SigHasher::new();
        h1.write_sig(&a);
        h1.write_sig(&b);
        let mut h2 = SigHasher::new();
        h2.write_sig(&b);
        h2.write_sig(&a);
        assert_ne!(h1.finish(), h2.finish());
    }

    #[test]
    fn separator_prevents_joining() {
        // "ab" + "c" must not hash like "a" + "bc".
        let mut h1 = SigHasher::new();
        h1.write_str("ab");
        h1.write_str("c");
        let mut h2 = SigHasher::new();
        h2.write_str("a");
        h2.write_str("bc");
        assert_ne!(h1.finish(), h2.finish());
    }

    #[test]
    fn serde_round_trip() {
        let sig = Sig::of_str("x");
        let json = serde_json::to_string(&sig).unwrap();
        let back: Sig = serde_json::from_str(&json).unwrap();
        assert_eq!(sig, back);
        assert!(serde_json::from_str::<Sig>("\"nonsense\"").is_err());
    }
}
