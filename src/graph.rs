//! The dependency graph: an arena of nodes joined by child edges.
//!
//! Nodes are addressed by `NodeId` indexes into the arena.  Forward edges
//! (`sources`, `implicit`) are owned lists of ids; `waiting_parents` is a
//! non-owning back-reference set used purely for scheduler wakeup.

use crate::action::Executor;
use crate::error::{Error, Result};
use crate::fs::FileSystem;
use crate::hash::Sig;
use crate::paths::{canon_path, suffix_of};
use crate::scan::Scanner;
use crate::warn::WarningSink;
use rustc_hash::FxHashMap;
use std::rc::Rc;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(&self) -> usize {
        self.0
    }
}

/// Node lifecycle states.  A node only ever advances forward through these;
/// `Graph::clear` is the sole way back to `Unvisited`.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum NodeState {
    Unvisited,
    /// Known to the scheduler, blocked on unfinished children.
    Pending,
    /// Selected for (re)build; its action has not yet completed.
    Executing,
    /// Terminal: found current, action not invoked.
    UpToDate,
    /// Terminal: action ran and succeeded.
    Executed,
    /// Terminal: action ran and failed, or a dependency failed.
    Failed,
}

impl NodeState {
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            NodeState::UpToDate | NodeState::Executed | NodeState::Failed
        )
    }

    fn may_advance_to(&self, next: NodeState) -> bool {
        use NodeState::*;
        match (self, next) {
            (Unvisited, Pending) | (Unvisited, Executing) => true,
            // Source files and current targets can finalize without ever
            // being blocked.
            (Unvisited, UpToDate) | (Unvisited, Failed) => true,
            (Pending, Executing) | (Pending, UpToDate) | (Pending, Failed) => true,
            (Executing, Executed) | (Executing, Failed) => true,
            _ => false,
        }
    }
}

/// What a node denotes.  `Entry` is an on-disk name not yet known to be a
/// file or directory; `disambiguate` resolves it once the filesystem state
/// is knowable.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum NodeKind {
    Entry,
    File,
    Dir,
    Alias,
    Value,
}

pub struct Node {
    pub name: String,
    pub kind: NodeKind,
    sources: Vec<NodeId>,
    /// Children discovered by scanning; None until the scan has run.
    implicit: Option<Vec<NodeId>>,
    side_effects: Vec<NodeId>,
    side_effect_of: Option<NodeId>,
    alt_targets: Vec<NodeId>,
    state: NodeState,
    executor: Option<Rc<Executor>>,
    explicit_builder: bool,
    pub always_build: bool,
    pub precious: bool,
    pub no_clean: bool,
    pub pseudo: bool,
    /// Content signature computed this run.
    pub(crate) csig: Option<Sig>,
    /// Build signature computed or restored this run.
    pub(crate) bsig: Option<Sig>,
    /// Error captured while discovering this node's children, re-surfaced
    /// when the node's task is prepared.
    pub(crate) scan_error: Option<Error>,
    /// Unfinished children blocking this node.
    pub(crate) ref_count: usize,
    /// Nodes blocked on this one; existence of the edge only, never
    /// lifetime.
    pub(crate) waiting_parents: Vec<NodeId>,
}

impl Node {
    fn new(name: String, kind: NodeKind) -> Node {
        Node {
            name,
            kind,
            sources: Vec::new(),
            implicit: None,
            side_effects: Vec::new(),
            side_effect_of: None,
            alt_targets: Vec::new(),
            state: NodeState::Unvisited,
            executor: None,
            explicit_builder: false,
            always_build: false,
            precious: false,
            no_clean: false,
            pseudo: false,
            csig: None,
            bsig: None,
            scan_error: None,
            ref_count: 0,
            waiting_parents: Vec::new(),
        }
    }

    pub fn state(&self) -> NodeState {
        self.state
    }

    /// The file suffix of this node's name, with leading dot, or "".
    pub fn suffix(&self) -> &str {
        suffix_of(&self.name)
    }

    pub fn sources(&self) -> &[NodeId] {
        &self.sources
    }

    pub fn side_effects(&self) -> &[NodeId] {
        &self.side_effects
    }

    pub fn alt_targets(&self) -> &[NodeId] {
        &self.alt_targets
    }

    /// The primary node this one is a byproduct of, if any.
    pub fn side_effect_of(&self) -> Option<NodeId> {
        self.side_effect_of
    }

    pub fn has_builder(&self) -> bool {
        self.executor.is_some()
    }

    pub fn has_explicit_builder(&self) -> bool {
        self.executor.is_some() && self.explicit_builder
    }

    /// Derived nodes are build products: anything with a builder, or
    /// produced as a side effect of one.
    pub fn is_derived(&self) -> bool {
        self.executor.is_some() || self.side_effect_of.is_some()
    }

    pub fn executor(&self) -> Option<&Rc<Executor>> {
        self.executor.as_ref()
    }

    /// Whether the one-time scan for this run has happened.
    pub fn scanned(&self) -> bool {
        self.implicit.is_some()
    }
}

pub struct Graph {
    nodes: Vec<Node>,
    by_name: FxHashMap<String, NodeId>,
}

impl Graph {
    pub fn new() -> Graph {
        Graph {
            nodes: Vec::new(),
            by_name: FxHashMap::default(),
        }
    }

    fn add_node(&mut self, name: String, kind: NodeKind) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node::new(name, kind));
        id
    }

    /// Intern a path, creating an `Entry` node on first sight.
    pub fn file_id(&mut self, path: &str) -> NodeId {
        self.node_id(path, NodeKind::Entry)
    }

    /// Intern a name with an explicit kind.  An existing `Entry` node is
    /// narrowed to the requested kind; any other kind conflict is left
    /// alone (first registration wins).
    pub fn node_id(&mut self, name: &str, kind: NodeKind) -> NodeId {
        let canon = if kind == NodeKind::Value {
            name.to_string()
        } else {
            canon_path(name)
        };
        match self.by_name.get(&canon) {
            Some(&id) => {
                if kind != NodeKind::Entry && self.nodes[id.index()].kind == NodeKind::Entry {
                    self.nodes[id.index()].kind = kind;
                }
                id
            }
            None => {
                let id = self.add_node(canon.clone(), kind);
                self.by_name.insert(canon, id);
                id
            }
        }
    }

    /// An in-memory value node; its "content" is the name string itself.
    pub fn value_id(&mut self, text: &str) -> NodeId {
        self.node_id(text, NodeKind::Value)
    }

    pub fn lookup(&self, name: &str) -> Option<NodeId> {
        self.by_name.get(&canon_path(name)).copied()
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.index()]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn add_source(&mut self, id: NodeId, child: NodeId) {
        let node = &mut self.nodes[id.index()];
        if !node.sources.contains(&child) {
            node.sources.push(child);
        }
    }

    /// Register `side` as a byproduct of building `primary`.  Duplicate
    /// registration under the same primary is a no-op; a second primary
    /// claiming the same side effect in one run is rejected.
    pub fn add_side_effect(&mut self, primary: NodeId, side: NodeId) -> Result<()> {
        match self.nodes[side.index()].side_effect_of {
            Some(owner) if owner == primary => Ok(()),
            Some(owner) => Err(Error::user(format!(
                "side effect `{}' claimed by both `{}' and `{}'",
                self.nodes[side.index()].name,
                self.nodes[owner.index()].name,
                self.nodes[primary.index()].name,
            ))),
            None => {
                self.nodes[side.index()].side_effect_of = Some(primary);
                self.nodes[primary.index()].side_effects.push(side);
                Ok(())
            }
        }
    }

    /// Declare substitute targets to be built before `id` whenever `id` is
    /// scheduled.
    pub fn add_alt_target(&mut self, id: NodeId, alt: NodeId) {
        let node = &mut self.nodes[id.index()];
        if !node.alt_targets.contains(&alt) {
            node.alt_targets.push(alt);
        }
    }

    pub fn set_executor(&mut self, id: NodeId, executor: Rc<Executor>) {
        self.nodes[id.index()].executor = Some(executor);
    }

    pub fn set_explicit(&mut self, id: NodeId, explicit: bool) {
        self.nodes[id.index()].explicit_builder = explicit;
    }

    /// All children: explicit sources plus whatever scanning discovered.
    /// Valid to call before the scan; callers that need the scan to have
    /// happened go through `scan` first.
    pub fn children(&self, id: NodeId) -> Vec<NodeId> {
        let node = &self.nodes[id.index()];
        let mut out = node.sources.clone();
        if let Some(implicit) = &node.implicit {
            for &dep in implicit {
                if !out.contains(&dep) {
                    out.push(dep);
                }
            }
        }
        out
    }

    /// Run the one-time implicit-dependency scan for this node: walk its
    /// sources (and whatever they pull in, transitively) through the
    /// scanner, attaching every discovered dependency as an implicit child
    /// of this node so the build signature sees it directly.
    ///
    /// Idempotent within a run: after the first call (even one discovering
    /// nothing) subsequent calls return immediately.
    pub fn scan(
        &mut self,
        id: NodeId,
        scanner: &dyn Scanner,
        fs: &dyn FileSystem,
        warnings: &mut dyn WarningSink,
    ) -> Result<()> {
        if self.nodes[id.index()].scanned() {
            return Ok(());
        }
        if !self.nodes[id.index()].has_builder() {
            // Source files have no inputs of their own to track.
            self.nodes[id.index()].implicit = Some(Vec::new());
            return Ok(());
        }
        let mut work: Vec<NodeId> = self.nodes[id.index()].sources.clone();
        let mut seen: Vec<NodeId> = work.clone();
        let mut implicit: Vec<NodeId> = Vec::new();
        while let Some(n) = work.pop() {
            let (name, kind) = {
                let node = &self.nodes[n.index()];
                (node.name.clone(), node.kind)
            };
            if !matches!(kind, NodeKind::Entry | NodeKind::File) {
                continue;
            }
            // A dependency that doesn't exist yet (e.g. a derived source
            // not built in this run) is skipped; scans recompute per run.
            if !matches!(fs.stat(&name), Ok(m) if m.exists()) {
                continue;
            }
            let deps = match scanner.scan(&name, fs, warnings) {
                Ok(deps) => deps,
                Err(err) => {
                    self.nodes[id.index()].implicit = Some(implicit);
                    return Err(Error::Dependency {
                        target: self.nodes[id.index()].name.clone(),
                        message: format!("scanning `{}': {}", name, err),
                    });
                }
            };
            for dep in deps {
                let did = self.file_id(&dep);
                if !seen.contains(&did) {
                    seen.push(did);
                    work.push(did);
                }
                if !implicit.contains(&did) && !self.nodes[id.index()].sources.contains(&did) {
                    implicit.push(did);
                }
            }
        }
        self.nodes[id.index()].implicit = Some(implicit);
        Ok(())
    }

    /// Resolve an `Entry` node to a file or directory now that the
    /// filesystem state is knowable.  Idempotent.
    pub fn disambiguate(&mut self, id: NodeId, fs: &dyn FileSystem) {
        let node = &mut self.nodes[id.index()];
        if node.kind != NodeKind::Entry {
            return;
        }
        node.kind = if fs.is_dir(&node.name) {
            NodeKind::Dir
        } else {
            NodeKind::File
        };
    }

    pub fn set_state(&mut self, id: NodeId, next: NodeState) {
        let node = &mut self.nodes[id.index()];
        assert!(
            node.state.may_advance_to(next),
            "node `{}' state may not move {:?} -> {:?}",
            node.name,
            node.state,
            next
        );
        node.state = next;
    }

    /// Reset per-run state (visited flags, signature caches, scan results,
    /// scheduler bookkeeping) without touching graph edges.  Supports
    /// repeated builds within one long-lived process.
    pub fn clear(&mut self, id: NodeId) {
        let node = &mut self.nodes[id.index()];
        node.state = NodeState::Unvisited;
        node.implicit = None;
        node.csig = None;
        node.bsig = None;
        node.scan_error = None;
        node.ref_count = 0;
        node.waiting_parents.clear();
    }

    pub fn clear_all(&mut self) {
        for i in 0..self.nodes.len() {
            self.clear(NodeId(i));
        }
    }
}
