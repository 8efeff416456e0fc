//! The taskmaster: walks the dependency graph from the requested targets,
//! discovers children lazily (triggering scans), decides per node whether a
//! rebuild is needed, and drives each task through its state machine.
//!
//! Scheduling is single-threaded cooperative: callers pull tasks out of
//! `next_task` (or use `run`) one at a time.  The bookkeeping is arranged so
//! a parallel front-end can split prepare/execute/executed across workers:
//! dependents are only unblocked from `executed`, never from `execute`.

use crate::action::ExitRequest;
use crate::error::{Error, Result};
use crate::fs::{FileSystem, MTime};
use crate::graph::{Graph, NodeId, NodeKind, NodeState};
use crate::hash::Sig;
use crate::paths::split_dir_file;
use crate::scan::Scanner;
use crate::session::BuildSession;
use std::collections::VecDeque;
use std::io::Write;

/// Counts and failures from one driving-loop run.
#[derive(Debug, Default)]
pub struct BuildStats {
    /// Tasks whose action actually ran.
    pub executed: usize,
    /// Nodes found current without running their action.
    pub up_to_date: usize,
    /// Failed targets with the error attributed to each.
    pub failed: Vec<(String, Error)>,
}

impl BuildStats {
    pub fn success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// One scheduling step for a primary target and its declared side effects.
pub struct Task {
    node: NodeId,
    targets: Vec<NodeId>,
    out_of_date: Vec<NodeId>,
    bsig: Option<Sig>,
    exc: Option<Error>,
    cached: bool,
    postprocessed: bool,
}

impl Task {
    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn targets(&self) -> &[NodeId] {
        &self.targets
    }

    /// True when every target was found current and the action is skipped.
    pub fn is_up_to_date(&self) -> bool {
        self.out_of_date.is_empty()
    }

    /// Pre-build step: re-raise any error captured during child discovery,
    /// then check sources and target locations for every co-produced node.
    pub fn prepare(&mut self, tm: &mut Taskmaster) -> Result<()> {
        if let Some(err) = self.exc.take() {
            return Err(err);
        }
        for &t in &self.targets {
            tm.prepare_node(t)?;
        }
        Ok(())
    }

    /// Run the bound action, or satisfy the target from the external cache.
    /// A cache hit only marks the task as retrieved; `executed` does the
    /// bookkeeping, so dependents are never unblocked before the records
    /// are restored.
    pub fn execute(&mut self, tm: &mut Taskmaster) -> Result<()> {
        if self.out_of_date.is_empty() {
            return Ok(());
        }
        let name = tm.graph.node(self.node).name.clone();
        if tm.graph.node(self.node).has_builder() && tm.session.cache.retrieve(&name) {
            tm.trace_msg(&format!("'{}': retrieved from cache", name));
            self.cached = true;
            return Ok(());
        }
        if let Some(exec) = tm.graph.node(self.node).executor().cloned() {
            tm.trace_msg(&format!("'{}': executing", name));
            exec.execute(tm.fs).map_err(|err| {
                if let Some(&ExitRequest(status)) = err.downcast_ref::<ExitRequest>() {
                    Error::Exit {
                        target: name.clone(),
                        status,
                    }
                } else {
                    Error::wrap(name.clone(), err)
                }
            })?;
        }
        Ok(())
    }

    /// Success bookkeeping: persist records for everything built, then wake
    /// the waiting parents.
    pub fn executed(&mut self, tm: &mut Taskmaster) -> Result<()> {
        for &t in &self.targets {
            if self.out_of_date.contains(&t) {
                tm.built(t, self.bsig.as_ref())?;
                if !self.cached {
                    let name = tm.graph.node(t).name.clone();
                    tm.session.cache.push(&name);
                }
            } else {
                tm.visited(t);
            }
        }
        tm.unblock_parents(&self.targets);
        Ok(())
    }

    /// Failure bookkeeping: fail-stop or fail-continue per configuration.
    /// Waiting parents are never unblocked; with fail-continue they are
    /// marked failed so independent subtrees keep going.
    pub fn failed(&mut self, tm: &mut Taskmaster) {
        if tm.fail_fast {
            self.fail_stop(tm);
        } else {
            self.fail_continue(tm);
        }
    }

    /// Mark this task failed and stop handing out new work.
    pub fn fail_stop(&mut self, tm: &mut Taskmaster) {
        self.mark_failed(tm);
        tm.stop();
    }

    /// Mark this task and every transitively waiting parent failed; the
    /// rest of the graph continues to build.
    pub fn fail_continue(&mut self, tm: &mut Taskmaster) {
        self.mark_failed(tm);
    }

    fn mark_failed(&mut self, tm: &mut Taskmaster) {
        for &t in &self.targets {
            if !tm.graph.node(t).state().is_final() {
                tm.graph.set_state(t, NodeState::Failed);
            }
        }
        tm.propagate_failure(&self.targets);
    }

    /// Release scheduler bookkeeping.  Runs exactly once per task, on both
    /// success and failure paths.
    pub fn postprocess(&mut self, tm: &mut Taskmaster) {
        if self.postprocessed {
            return;
        }
        self.postprocessed = true;
        for &t in &self.targets {
            tm.graph.node_mut(t).waiting_parents.clear();
        }
    }
}

pub type OrderFn<'a> = Box<dyn FnMut(&mut Vec<NodeId>) + 'a>;

pub struct Taskmaster<'a> {
    graph: &'a mut Graph,
    session: &'a mut BuildSession,
    fs: &'a dyn FileSystem,
    scanner: &'a dyn Scanner,
    order: Option<OrderFn<'a>>,
    trace: Option<Box<dyn Write + 'a>>,
    candidates: Vec<NodeId>,
    ready: VecDeque<NodeId>,
    stopped: bool,
    ready_all: bool,
    fail_fast: bool,
}

impl<'a> Taskmaster<'a> {
    pub fn new(
        graph: &'a mut Graph,
        session: &'a mut BuildSession,
        fs: &'a dyn FileSystem,
        scanner: &'a dyn Scanner,
        targets: &[NodeId],
    ) -> Taskmaster<'a> {
        // The candidate list is a stack; reverse so the first requested
        // target is considered first.
        let candidates: Vec<NodeId> = targets.iter().rev().copied().collect();
        Taskmaster {
            graph,
            session,
            fs,
            scanner,
            order: None,
            trace: None,
            candidates,
            ready: VecDeque::new(),
            stopped: false,
            ready_all: false,
            fail_fast: false,
        }
    }

    /// Install a sibling-ordering function applied to every batch of nodes
    /// becoming ready.
    pub fn with_order(mut self, order: impl FnMut(&mut Vec<NodeId>) + 'a) -> Taskmaster<'a> {
        self.order = Some(Box::new(order));
        self
    }

    /// Install a sink receiving one human-readable line per scheduling
    /// decision.
    pub fn with_trace(mut self, sink: impl Write + 'a) -> Taskmaster<'a> {
        self.trace = Some(Box::new(sink));
        self
    }

    /// Mark every target of each task out of date instead of consulting
    /// the calculator; for front-ends that force all candidates through
    /// their actions at once.
    pub fn make_ready_all(mut self) -> Taskmaster<'a> {
        self.ready_all = true;
        self
    }

    /// Stop handing out new unrelated work after the first failure.
    pub fn fail_fast(mut self) -> Taskmaster<'a> {
        self.fail_fast = true;
        self
    }

    /// Stop dispatching: no new task will be created from undispatched
    /// candidates.  Already-created tasks still drain to postprocess.
    pub fn stop(&mut self) {
        self.stopped = true;
        self.candidates.clear();
        self.ready.clear();
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Select the next node whose children are all finalized and wrap it in
    /// a task, or None when no further progress is possible.
    pub fn next_task(&mut self) -> Result<Option<Task>> {
        loop {
            if self.stopped {
                return Ok(None);
            }
            if self.ready.is_empty() {
                self.find_next_ready()?;
            }
            let node = match self.ready.pop_front() {
                Some(n) => n,
                None => return Ok(None),
            };
            if self.graph.node(node).state().is_final() {
                // Finalized while queued (e.g. failure propagation).
                continue;
            }
            return Ok(Some(self.make_ready(node)));
        }
    }

    /// The driving loop for the serial case: pull tasks and take each
    /// through prepare/execute/executed/postprocess, always postprocessing
    /// regardless of outcome.
    pub fn run(&mut self) -> Result<BuildStats> {
        let mut stats = BuildStats::default();
        while let Some(mut task) = self.next_task()? {
            let result = task.prepare(self).and_then(|()| task.execute(self));
            match result.and_then(|()| task.executed(self)) {
                Ok(()) => {
                    if task.is_up_to_date() {
                        stats.up_to_date += 1;
                    } else {
                        stats.executed += 1;
                    }
                }
                Err(err) => {
                    let name = self.graph.node(task.node()).name.clone();
                    self.trace_msg(&format!("'{}': failed: {}", name, err));
                    task.failed(self);
                    stats.failed.push((name, err));
                }
            }
            task.postprocess(self);
            self.session.flush_warnings();
        }
        self.session.flush_warnings();
        Ok(stats)
    }

    fn push_ready(&mut self, mut batch: Vec<NodeId>) {
        if let Some(order) = &mut self.order {
            order(&mut batch);
        }
        self.ready.extend(batch);
    }

    /// Walk the candidate stack until at least one node is ready or the
    /// stack is exhausted.  Children are discovered (and scanned) here;
    /// cycles are reported here with the full path.
    fn find_next_ready(&mut self) -> Result<()> {
        while self.ready.is_empty() {
            let node = match self.candidates.last() {
                Some(&n) => n,
                None => return Ok(()),
            };
            if self.graph.node(node).state() != NodeState::Unvisited {
                // Finalized, blocked, or already dispatched; drop it.
                self.candidates.pop();
                continue;
            }
            self.graph.disambiguate(node, self.fs);

            let scan_err = {
                let warnings = &mut *self.session.warnings;
                self.graph.scan(node, self.scanner, self.fs, warnings).err()
            };
            let name = self.graph.node(node).name.clone();
            if let Some(err) = scan_err {
                // Capture per node; re-surfaced when the task is prepared
                // so the failure is attributed to this target.
                self.trace_msg(&format!("considering '{}': scan failed, error deferred", name));
                self.graph.node_mut(node).scan_error = Some(err);
                self.candidates.pop();
                self.push_ready(vec![node]);
                continue;
            }

            // Alternates are built before the node itself, so they block
            // alongside the children.  A side effect waits for its owning
            // primary, whose action is what produces it.
            let mut edges: Vec<NodeId> = self.graph.node(node).alt_targets().to_vec();
            if let Some(owner) = self.graph.node(node).side_effect_of() {
                if !edges.contains(&owner) {
                    edges.push(owner);
                }
            }
            for c in self.graph.children(node) {
                if !edges.contains(&c) {
                    edges.push(c);
                }
            }
            let blocking: Vec<NodeId> = edges
                .iter()
                .copied()
                .filter(|&c| !self.graph.node(c).state().is_final())
                .collect();

            for &c in &blocking {
                if c == node || self.graph.node(c).state() == NodeState::Pending {
                    if let Some(path) = self.find_cycle(c, node) {
                        let mut names: Vec<&str> =
                            path.iter().map(|&n| self.graph.node(n).name.as_str()).collect();
                        names.push(self.graph.node(path[0]).name.as_str());
                        return Err(Error::user(format!(
                            "dependency cycle found: {}",
                            names.join(" -> ")
                        )));
                    }
                }
            }

            let summary: Vec<&str> = edges
                .iter()
                .map(|&c| self.graph.node(c).name.as_str())
                .collect();
            if blocking.is_empty() {
                self.trace_msg(&format!(
                    "considering '{}': children: {:?}: ready",
                    name, summary
                ));
                self.candidates.pop();
                self.push_ready(vec![node]);
            } else {
                self.trace_msg(&format!(
                    "considering '{}': children: {:?}: blocked on {} unfinished",
                    name,
                    summary,
                    blocking.len()
                ));
                self.graph.set_state(node, NodeState::Pending);
                self.graph.node_mut(node).ref_count = blocking.len();
                for &c in &blocking {
                    let wp = &mut self.graph.node_mut(c).waiting_parents;
                    if !wp.contains(&node) {
                        wp.push(node);
                    }
                }
                self.candidates.pop();
                let mut push_list = blocking;
                if let Some(order) = &mut self.order {
                    order(&mut push_list);
                }
                for &c in push_list.iter().rev() {
                    self.candidates.push(c);
                }
            }
        }
        Ok(())
    }

    /// A path from `from` to `to` along dependency edges, if one exists.
    /// Children along a live cycle have all been scanned already, so the
    /// walk sees the full edge set it needs.
    fn find_cycle(&self, from: NodeId, to: NodeId) -> Option<Vec<NodeId>> {
        fn dfs(
            g: &Graph,
            cur: NodeId,
            to: NodeId,
            visited: &mut Vec<NodeId>,
            path: &mut Vec<NodeId>,
        ) -> bool {
            path.push(cur);
            if cur == to {
                return true;
            }
            visited.push(cur);
            let mut edges = g.node(cur).alt_targets().to_vec();
            for c in g.children(cur) {
                if !edges.contains(&c) {
                    edges.push(c);
                }
            }
            for c in edges {
                if !visited.contains(&c) && dfs(g, c, to, visited, path) {
                    return true;
                }
            }
            path.pop();
            false
        }
        let mut path = Vec::new();
        let mut visited = Vec::new();
        if dfs(self.graph, from, to, &mut visited, &mut path) {
            Some(path)
        } else {
            None
        }
    }

    /// Decide which of the task's targets actually need their action run,
    /// marking the rest up to date without invoking anything.
    fn make_ready(&mut self, node: NodeId) -> Task {
        let mut exc = self.graph.node_mut(node).scan_error.take();
        let mut targets = vec![node];
        for &se in self.graph.node(node).side_effects() {
            if !targets.contains(&se) {
                targets.push(se);
            }
        }
        targets.retain(|&t| !self.graph.node(t).state().is_final());

        let bsig = if exc.is_none() && self.graph.node(node).has_builder() {
            let sess = &mut *self.session;
            match sess
                .calc
                .build_signature(self.graph, node, &mut sess.store, self.fs)
            {
                Ok(sig) => Some(sig),
                Err(err) => {
                    exc = Some(err);
                    None
                }
            }
        } else {
            None
        };

        let current = exc.is_none() && !self.ready_all && {
            let sess = &mut *self.session;
            sess.calc
                .is_current(self.graph, node, &mut sess.store, self.fs, bsig.as_ref())
        };

        let name = self.graph.node(node).name.clone();
        let mut out_of_date = Vec::new();
        for &t in &targets {
            if current {
                self.graph.set_state(t, NodeState::UpToDate);
            } else {
                self.graph.set_state(t, NodeState::Executing);
                out_of_date.push(t);
            }
        }
        self.trace_msg(&format!(
            "'{}': {}",
            name,
            if current { "up to date" } else { "out of date" }
        ));

        Task {
            node,
            targets,
            out_of_date,
            bsig,
            exc,
            cached: false,
            postprocessed: false,
        }
    }

    /// Per-node pre-build checks: the node itself (if it's a plain source)
    /// and every non-derived child must be present on disk, and a file
    /// target's directory must exist.
    fn prepare_node(&mut self, t: NodeId) -> Result<()> {
        let (name, kind, has_builder, derived, pseudo) = {
            let n = self.graph.node(t);
            (n.name.clone(), n.kind, n.has_builder(), n.is_derived(), n.pseudo)
        };
        if !derived && !pseudo && matches!(kind, NodeKind::Entry | NodeKind::File) {
            if let Ok(MTime::Missing) = self.fs.stat(&name) {
                return Err(Error::build(
                    name,
                    "not found and no builder knows how to make it",
                ));
            }
        }
        if has_builder && matches!(kind, NodeKind::Entry | NodeKind::File) {
            let (dir, _) = split_dir_file(&name);
            if dir != "." {
                // Best effort; the action will fail louder if it matters.
                let _ = self.fs.mkdirs(dir);
            }
        }
        for c in self.graph.children(t) {
            let child = self.graph.node(c);
            if child.is_derived() || !matches!(child.kind, NodeKind::Entry | NodeKind::File) {
                continue;
            }
            if let Ok(MTime::Missing) = self.fs.stat(&child.name) {
                return Err(Error::build(
                    name,
                    format!(
                        "source `{}' not found and no builder knows how to make it",
                        child.name
                    ),
                ));
            }
        }
        Ok(())
    }

    /// Persist the record for a freshly built target and finalize its
    /// state.
    fn built(&mut self, t: NodeId, bsig: Option<&Sig>) -> Result<()> {
        self.graph.set_state(t, NodeState::Executed);
        let (name, kind, pseudo) = {
            let n = self.graph.node(t);
            (n.name.clone(), n.kind, n.pseudo)
        };
        let (dir, file) = split_dir_file(&name);
        let sess = &mut *self.session;
        self.graph.node_mut(t).csig = None;

        match kind {
            NodeKind::Value | NodeKind::Alias => {
                let csig = Sig::of_str(&name);
                sess.store.set_csig(dir, file, csig);
                self.graph.node_mut(t).csig = Some(csig);
            }
            NodeKind::Dir => {}
            NodeKind::Entry | NodeKind::File => {
                match self.fs.stat(&name) {
                    Ok(MTime::Stamp(ts)) => {
                        let data = self
                            .fs
                            .read(&name)
                            .map_err(|err| Error::build(&name, format!("read: {}", err)))?;
                        let csig = Sig::of_bytes(&data);
                        sess.store.set_csig(dir, file, csig);
                        sess.store.set_timestamp(dir, file, ts);
                        self.graph.node_mut(t).csig = Some(csig);
                    }
                    Ok(MTime::Missing) if pseudo => {}
                    Ok(MTime::Missing) => {
                        return Err(Error::build(&name, "action did not create the target"));
                    }
                    Err(err) => {
                        return Err(Error::build(&name, format!("stat: {}", err)));
                    }
                }
            }
        }

        if let (Some(bsig), true) = (bsig, self.graph.node(t).has_builder()) {
            let graph = &self.graph;
            let implicit_names: Vec<String> = graph
                .children(t)
                .iter()
                .filter(|&&c| !graph.node(t).sources().contains(&c))
                .map(|&c| graph.node(c).name.clone())
                .collect();
            let (bact, bactsig) = {
                let exec = self.graph.node(t).executor().unwrap();
                (exec.describe(), exec.signature())
            };
            sess.store
                .set_binfo(dir, file, *bsig, implicit_names, bact, bactsig);
            self.graph.node_mut(t).bsig = Some(*bsig);
        }
        Ok(())
    }

    /// Observer hook for nodes finalized without building.
    fn visited(&mut self, t: NodeId) {
        let name = &self.graph.node(t).name;
        log::debug!("visited: {}", name);
    }

    /// Decrement the ref count of everything waiting on these targets and
    /// queue the parents that just became unblocked.
    fn unblock_parents(&mut self, targets: &[NodeId]) {
        let mut woken = Vec::new();
        for &t in targets {
            let parents = self.graph.node(t).waiting_parents.clone();
            for p in parents {
                let pn = self.graph.node_mut(p);
                if pn.ref_count > 0 {
                    pn.ref_count -= 1;
                }
                if pn.ref_count == 0
                    && pn.state() == NodeState::Pending
                    && !woken.contains(&p)
                {
                    woken.push(p);
                }
            }
        }
        if !woken.is_empty() {
            self.push_ready(woken);
        }
    }

    /// Mark every node transitively waiting on `targets` as failed; they
    /// stay blocked for the rest of this run.
    fn propagate_failure(&mut self, targets: &[NodeId]) {
        let mut stack: Vec<NodeId> = targets.to_vec();
        while let Some(n) = stack.pop() {
            let parents = self.graph.node(n).waiting_parents.clone();
            for p in parents {
                if !self.graph.node(p).state().is_final() {
                    self.graph.set_state(p, NodeState::Failed);
                    stack.push(p);
                }
            }
        }
    }

    fn trace_msg(&mut self, msg: &str) {
        if let Some(w) = &mut self.trace {
            let _ = writeln!(w, "Taskmaster: {}", msg);
        }
    }
}
