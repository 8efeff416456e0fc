//! Engine tests against an in-memory filesystem with a controllable clock.

use sigmake::action::{Action, ExitRequest};
use sigmake::builder::Builder;
use sigmake::db::{SigStore, DEFAULT_RECORD_FILE};
use sigmake::env::{Env, Vars};
use sigmake::error::Error;
use sigmake::fs::{FileSystem, MTime};
use sigmake::graph::{Graph, NodeId, NodeState};
use sigmake::hash::Calculator;
use sigmake::scan::{NullScanner, Scanner};
use sigmake::session::{BuildSession, Cache};
use sigmake::warn::{Warning, WarningSink};
use sigmake::work::{BuildStats, Taskmaster};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

struct FileEntry {
    content: Vec<u8>,
    mtime: i64,
}

/// Implementation of fs::FileSystem that is memory-backed, with a test
/// clock and per-path read counting.
struct TestFileSystem {
    files: RefCell<HashMap<String, FileEntry>>,
    clock: Cell<i64>,
    reads: RefCell<HashMap<String, usize>>,
}

impl TestFileSystem {
    fn new() -> Rc<Self> {
        Rc::new(TestFileSystem {
            files: RefCell::new(HashMap::new()),
            clock: Cell::new(1_000_000),
            reads: RefCell::new(HashMap::new()),
        })
    }

    fn add(&self, path: &str, content: impl Into<Vec<u8>>) {
        self.files.borrow_mut().insert(
            path.to_string(),
            FileEntry {
                content: content.into(),
                mtime: self.clock.get(),
            },
        );
    }

    /// Update a file's mtime without modifying its content.
    fn touch(&self, path: &str) {
        let mut files = self.files.borrow_mut();
        let entry = files.get_mut(path).expect("touch of missing file");
        entry.mtime = self.clock.get();
    }

    fn tick(&self, secs: i64) {
        self.clock.set(self.clock.get() + secs);
    }

    fn read_count(&self, path: &str) -> usize {
        self.reads.borrow().get(path).copied().unwrap_or(0)
    }

    fn contents(&self, path: &str) -> Option<Vec<u8>> {
        self.files.borrow().get(path).map(|f| f.content.clone())
    }
}

impl FileSystem for TestFileSystem {
    fn read(&self, path: &str) -> std::io::Result<Vec<u8>> {
        *self.reads.borrow_mut().entry(path.to_string()).or_insert(0) += 1;
        match self.files.borrow().get(path) {
            Some(file) => Ok(file.content.clone()),
            None => Err(std::io::Error::from(std::io::ErrorKind::NotFound)),
        }
    }

    fn stat(&self, path: &str) -> std::io::Result<MTime> {
        Ok(match self.files.borrow().get(path) {
            Some(file) => MTime::Stamp(file.mtime),
            None => MTime::Missing,
        })
    }

    fn write(&self, path: &str, data: &[u8]) -> std::io::Result<()> {
        self.add(path, data.to_vec());
        Ok(())
    }

    fn mkdirs(&self, _dir: &str) -> std::io::Result<()> {
        Ok(())
    }

    fn now(&self) -> i64 {
        self.clock.get()
    }
}

#[derive(Clone, Default)]
struct SharedWarnings(Rc<RefCell<Vec<Warning>>>);

impl WarningSink for SharedWarnings {
    fn warn(&mut self, warning: Warning) {
        self.0.borrow_mut().push(warning);
    }
}

/// An action that concatenates its sources into every target, counting
/// invocations.
fn cat_action(counter: &Rc<Cell<usize>>) -> Action {
    let counter = counter.clone();
    Action::function("cat", move |ctx| {
        counter.set(counter.get() + 1);
        let mut data = Vec::new();
        for s in ctx.sources {
            data.extend(ctx.fs.read(s)?);
        }
        for t in ctx.targets {
            ctx.fs.write(t, &data)?;
        }
        Ok(())
    })
}

fn plain_env() -> Rc<dyn Env> {
    Rc::new(Vars::new())
}

fn mem_session() -> BuildSession {
    BuildSession::new(
        SigStore::per_directory(DEFAULT_RECORD_FILE),
        Calculator::default(),
    )
}

fn run_build(
    fs: &TestFileSystem,
    graph: &mut Graph,
    session: &mut BuildSession,
    targets: &[NodeId],
) -> BuildStats {
    let scanner = NullScanner;
    let mut tm = Taskmaster::new(graph, session, fs, &scanner, targets);
    tm.run().expect("build failed fatally")
}

/// Declare `target: cat(sources)` and return the target node.
fn cat_target(
    graph: &mut Graph,
    counter: &Rc<Cell<usize>>,
    target: &str,
    sources: &[&str],
) -> NodeId {
    let mut w = SharedWarnings::default();
    Builder::new("Cat", cat_action(counter))
        .build(graph, &plain_env(), Some(target), sources, &mut w)
        .expect("builder call failed")[0]
}

#[test]
fn build_then_rebuild_without_changes_is_stable() {
    let fs = TestFileSystem::new();
    fs.add("n1", "one ");
    fs.add("n2", "two");
    let counter = Rc::new(Cell::new(0));
    let mut session = mem_session();

    let mut graph = Graph::new();
    let n3 = cat_target(&mut graph, &counter, "n3", &["n1", "n2"]);
    let stats = run_build(&fs, &mut graph, &mut session, &[n3]);
    assert!(stats.success());
    assert_eq!(counter.get(), 1);
    assert_eq!(fs.contents("n3").unwrap(), b"one two".to_vec());

    // Rerun with a rebuilt graph and no file changes: zero action
    // invocations the second time.
    let mut graph = Graph::new();
    let n3 = cat_target(&mut graph, &counter, "n3", &["n1", "n2"]);
    let stats = run_build(&fs, &mut graph, &mut session, &[n3]);
    assert!(stats.success());
    assert_eq!(counter.get(), 1);
    assert_eq!(stats.executed, 0);
    assert_eq!(stats.up_to_date, 3);
    assert_eq!(graph.node(n3).state(), NodeState::UpToDate);
}

#[test]
fn source_change_triggers_rebuild() {
    let fs = TestFileSystem::new();
    fs.add("in", "v1");
    let counter = Rc::new(Cell::new(0));
    let mut session = mem_session();

    let mut graph = Graph::new();
    let out = cat_target(&mut graph, &counter, "out", &["in"]);
    run_build(&fs, &mut graph, &mut session, &[out]);
    assert_eq!(counter.get(), 1);

    fs.tick(10);
    fs.add("in", "v2");
    let mut graph = Graph::new();
    let out = cat_target(&mut graph, &counter, "out", &["in"]);
    let stats = run_build(&fs, &mut graph, &mut session, &[out]);
    assert_eq!(counter.get(), 2);
    assert_eq!(graph.node(out).state(), NodeState::Executed);
    assert!(stats.executed >= 1);
    assert_eq!(fs.contents("out").unwrap(), b"v2".to_vec());
}

#[test]
fn clear_supports_in_process_rerun() {
    let fs = TestFileSystem::new();
    fs.add("in", "data");
    let counter = Rc::new(Cell::new(0));
    let mut session = mem_session();

    let mut graph = Graph::new();
    let out = cat_target(&mut graph, &counter, "out", &["in"]);
    run_build(&fs, &mut graph, &mut session, &[out]);
    assert_eq!(counter.get(), 1);

    // Same long-lived graph, reset per-run state, go again.
    graph.clear_all();
    let stats = run_build(&fs, &mut graph, &mut session, &[out]);
    assert_eq!(counter.get(), 1);
    assert_eq!(stats.executed, 0);
    assert_eq!(graph.node(out).state(), NodeState::UpToDate);
}

#[test]
fn touched_but_unmodified_source_rehashes_once() {
    let fs = TestFileSystem::new();
    fs.add("in", "same bytes");
    let counter = Rc::new(Cell::new(0));
    let mut session = BuildSession::new(
        SigStore::per_directory(DEFAULT_RECORD_FILE),
        Calculator::new(0),
    );

    let mut graph = Graph::new();
    let out = cat_target(&mut graph, &counter, "out", &["in"]);
    run_build(&fs, &mut graph, &mut session, &[out]);
    assert_eq!(counter.get(), 1);

    // Touch without modifying: the timestamp no longer matches the
    // record, so the content must be re-hashed, but exactly once, and the
    // unchanged hash keeps the target up to date.
    fs.tick(100);
    fs.touch("in");
    let before = fs.read_count("in");
    let mut graph = Graph::new();
    let out = cat_target(&mut graph, &counter, "out", &["in"]);
    run_build(&fs, &mut graph, &mut session, &[out]);
    assert_eq!(counter.get(), 1, "action must not rerun for unchanged content");
    assert_eq!(graph.node(out).state(), NodeState::UpToDate);
    assert_eq!(fs.read_count("in"), before + 1, "exactly one re-hash");

    // With the timestamp unchanged and older than max_drift, the stored
    // content signature is trusted without reading the file at all.
    fs.tick(50);
    let before = fs.read_count("in");
    let mut graph = Graph::new();
    let out = cat_target(&mut graph, &counter, "out", &["in"]);
    run_build(&fs, &mut graph, &mut session, &[out]);
    assert_eq!(graph.node(out).state(), NodeState::UpToDate);
    assert_eq!(fs.read_count("in"), before, "stored csig trusted, no read");
}

#[test]
fn negative_max_drift_never_trusts_stored_csig() {
    let fs = TestFileSystem::new();
    fs.add("in", "bytes");
    let counter = Rc::new(Cell::new(0));
    let mut session = BuildSession::new(
        SigStore::per_directory(DEFAULT_RECORD_FILE),
        Calculator::new(-1),
    );

    let mut graph = Graph::new();
    let out = cat_target(&mut graph, &counter, "out", &["in"]);
    run_build(&fs, &mut graph, &mut session, &[out]);

    fs.tick(1_000_000);
    let before = fs.read_count("in");
    let mut graph = Graph::new();
    let out = cat_target(&mut graph, &counter, "out", &["in"]);
    run_build(&fs, &mut graph, &mut session, &[out]);
    assert_eq!(graph.node(out).state(), NodeState::UpToDate);
    assert!(fs.read_count("in") > before, "content must be re-read");
}

#[test]
fn cycle_is_reported_with_full_path() {
    let fs = TestFileSystem::new();
    let mut graph = Graph::new();
    let n1 = graph.file_id("n1");
    let n2 = graph.file_id("n2");
    let n3 = graph.file_id("n3");
    graph.add_source(n1, n2);
    graph.add_source(n2, n3);
    graph.add_source(n3, n1);

    let mut session = mem_session();
    let scanner = NullScanner;
    let mut tm = Taskmaster::new(&mut graph, &mut session, &*fs, &scanner, &[n3]);
    let err = tm.run().unwrap_err();
    let msg = format!("{}", err);
    assert!(matches!(err, Error::User(_)), "expected a user error: {}", msg);
    assert!(
        msg.contains("n3 -> n1 -> n2 -> n3"),
        "cycle path missing from: {}",
        msg
    );
}

/// A scanner that fails for one particular path.
struct FailingScanner(&'static str);

impl Scanner for FailingScanner {
    fn scan(
        &self,
        path: &str,
        _fs: &dyn FileSystem,
        _warnings: &mut dyn WarningSink,
    ) -> anyhow::Result<Vec<String>> {
        if path == self.0 {
            anyhow::bail!("simulated scan failure");
        }
        Ok(Vec::new())
    }
}

#[test]
fn independent_subtree_survives_scan_failure() {
    let fs = TestFileSystem::new();
    fs.add("a.src", "a");
    fs.add("b.src", "b");
    let a_counter = Rc::new(Cell::new(0));
    let b_counter = Rc::new(Cell::new(0));

    let mut graph = Graph::new();
    let a = cat_target(&mut graph, &a_counter, "a.out", &["a.src"]);
    let b = cat_target(&mut graph, &b_counter, "b.out", &["b.src"]);

    let mut session = mem_session();
    let scanner = FailingScanner("a.src");
    let mut tm = Taskmaster::new(&mut graph, &mut session, &*fs, &scanner, &[a, b]);
    let stats = tm.run().unwrap();
    drop(tm);

    assert_eq!(stats.failed.len(), 1);
    assert_eq!(stats.failed[0].0, "a.out");
    assert!(matches!(stats.failed[0].1, Error::Dependency { .. }));
    let msg = format!("{}", stats.failed[0].1);
    assert!(msg.contains("a.src"), "failing file missing from: {}", msg);
    assert_eq!(graph.node(a).state(), NodeState::Failed);
    assert_eq!(a_counter.get(), 0, "the failed subtree must not build");
    assert_eq!(b_counter.get(), 1, "the independent subtree must build");
    assert_eq!(graph.node(b).state(), NodeState::Executed);
    assert_eq!(fs.contents("b.out").unwrap(), b"b".to_vec());
}

#[test]
fn fail_fast_stops_dispatch() {
    let fs = TestFileSystem::new();
    fs.add("a.src", "a");
    fs.add("b.src", "b");
    let a_counter = Rc::new(Cell::new(0));
    let b_counter = Rc::new(Cell::new(0));

    let mut graph = Graph::new();
    let a = cat_target(&mut graph, &a_counter, "a.out", &["a.src"]);
    let b = cat_target(&mut graph, &b_counter, "b.out", &["b.src"]);

    let mut session = mem_session();
    let scanner = FailingScanner("a.src");
    let mut tm =
        Taskmaster::new(&mut graph, &mut session, &*fs, &scanner, &[a, b]).fail_fast();
    let stats = tm.run().unwrap();
    assert!(tm.is_stopped());
    assert_eq!(stats.failed.len(), 1);
    assert_eq!(b_counter.get(), 0, "no new work after a fail-fast failure");
}

#[test]
fn side_effects_finalize_with_their_primary() {
    let fs = TestFileSystem::new();
    fs.add("in", "x");
    let counter = Rc::new(Cell::new(0));
    let counter2 = counter.clone();
    let action = Action::function("emit_with_map", move |ctx| {
        counter2.set(counter2.get() + 1);
        ctx.fs.write("out", b"out")?;
        ctx.fs.write("out.map", b"map")?;
        Ok(())
    });

    let mut graph = Graph::new();
    let mut w = SharedWarnings::default();
    let out = Builder::new("Emit", action)
        .build(&mut graph, &plain_env(), Some("out"), &["in"], &mut w)
        .unwrap()[0];
    let map = graph.file_id("out.map");
    graph.add_side_effect(out, map).unwrap();

    let mut session = mem_session();
    run_build(&fs, &mut graph, &mut session, &[out]);
    assert_eq!(counter.get(), 1);
    assert_eq!(graph.node(out).state(), NodeState::Executed);
    assert_eq!(graph.node(map).state(), NodeState::Executed);
    assert!(graph.node(map).is_derived());
}

#[test]
fn alternate_targets_build_before_the_original() {
    let fs = TestFileSystem::new();
    fs.add("in", "x");
    let log: Rc<RefCell<Vec<&'static str>>> = Rc::new(RefCell::new(Vec::new()));

    let log_a = log.clone();
    let alt_action = Action::function("alt", move |ctx| {
        log_a.borrow_mut().push("alt");
        ctx.fs.write(&ctx.targets[0], b"alt")?;
        Ok(())
    });
    let log_m = log.clone();
    let main_action = Action::function("main", move |ctx| {
        log_m.borrow_mut().push("main");
        ctx.fs.write(&ctx.targets[0], b"main")?;
        Ok(())
    });

    let mut graph = Graph::new();
    let mut w = SharedWarnings::default();
    let env = plain_env();
    let alt = Builder::new("Alt", alt_action)
        .build(&mut graph, &env, Some("alt.out"), &["in"], &mut w)
        .unwrap()[0];
    let main = Builder::new("Main", main_action)
        .build(&mut graph, &env, Some("main.out"), &["in"], &mut w)
        .unwrap()[0];
    graph.add_alt_target(main, alt);

    let mut session = mem_session();
    run_build(&fs, &mut graph, &mut session, &[main]);
    assert_eq!(*log.borrow(), vec!["alt", "main"]);
}

#[test]
fn always_build_ignores_matching_signatures() {
    let fs = TestFileSystem::new();
    fs.add("in", "x");
    let counter = Rc::new(Cell::new(0));
    let mut session = mem_session();

    let mut graph = Graph::new();
    let out = cat_target(&mut graph, &counter, "out", &["in"]);
    run_build(&fs, &mut graph, &mut session, &[out]);
    assert_eq!(counter.get(), 1);

    let mut graph = Graph::new();
    let out = cat_target(&mut graph, &counter, "out", &["in"]);
    graph.node_mut(out).always_build = true;
    run_build(&fs, &mut graph, &mut session, &[out]);
    assert_eq!(counter.get(), 2);
}

#[test]
fn make_ready_all_forces_every_target() {
    let fs = TestFileSystem::new();
    fs.add("in", "x");
    let counter = Rc::new(Cell::new(0));
    let mut session = mem_session();

    let mut graph = Graph::new();
    let out = cat_target(&mut graph, &counter, "out", &["in"]);
    run_build(&fs, &mut graph, &mut session, &[out]);
    assert_eq!(counter.get(), 1);

    let mut graph = Graph::new();
    let out = cat_target(&mut graph, &counter, "out", &["in"]);
    let scanner = NullScanner;
    let mut tm =
        Taskmaster::new(&mut graph, &mut session, &*fs, &scanner, &[out]).make_ready_all();
    tm.run().unwrap();
    assert_eq!(counter.get(), 2, "everything rebuilds under make_ready_all");
}

#[test]
fn missing_source_is_attributed_to_the_target() {
    let fs = TestFileSystem::new();
    let counter = Rc::new(Cell::new(0));
    let mut graph = Graph::new();
    let out = cat_target(&mut graph, &counter, "out", &["never-created.c"]);

    let mut session = mem_session();
    let stats = run_build(&fs, &mut graph, &mut session, &[out]);
    assert_eq!(counter.get(), 0);
    assert_eq!(stats.failed.len(), 1);
    let msg = format!("{}", stats.failed[0].1);
    assert!(msg.contains("never-created.c"), "{}", msg);
    assert!(msg.contains("not found"), "{}", msg);
}

#[test]
fn explicit_exit_carries_node_and_status() {
    let fs = TestFileSystem::new();
    fs.add("in", "x");
    let action = Action::function("bail_out", |_ctx| Err(anyhow::Error::new(ExitRequest(3))));

    let mut graph = Graph::new();
    let mut w = SharedWarnings::default();
    let out = Builder::new("Exiter", action)
        .build(&mut graph, &plain_env(), Some("out"), &["in"], &mut w)
        .unwrap()[0];

    let mut session = mem_session();
    let stats = run_build(&fs, &mut graph, &mut session, &[out]);
    assert_eq!(stats.failed.len(), 1);
    match &stats.failed[0].1 {
        Error::Exit { target, status } => {
            assert_eq!(target, "out");
            assert_eq!(*status, 3);
        }
        other => panic!("expected an exit error, got {}", other),
    }
    assert_eq!(graph.node(out).state(), NodeState::Failed);
}

#[test]
fn action_errors_are_wrapped_uniformly() {
    let fs = TestFileSystem::new();
    fs.add("in", "x");
    let action = Action::function("explode", |_ctx| anyhow::bail!("flux capacitor missing"));

    let mut graph = Graph::new();
    let mut w = SharedWarnings::default();
    let out = Builder::new("Boom", action)
        .build(&mut graph, &plain_env(), Some("out"), &["in"], &mut w)
        .unwrap()[0];

    let mut session = mem_session();
    let stats = run_build(&fs, &mut graph, &mut session, &[out]);
    assert_eq!(stats.failed.len(), 1);
    match &stats.failed[0].1 {
        Error::Build { target, message, .. } => {
            assert_eq!(target, "out");
            assert!(message.contains("flux capacitor"), "{}", message);
        }
        other => panic!("expected a build error, got {}", other),
    }
}

#[test]
fn order_function_controls_sibling_order() {
    let order_log: Rc<RefCell<Vec<String>>> = Rc::new(RefCell::new(Vec::new()));
    let logging_action = |log: &Rc<RefCell<Vec<String>>>| {
        let log = log.clone();
        Action::function("log_target", move |ctx| {
            log.borrow_mut().push(ctx.targets[0].clone());
            ctx.fs.write(&ctx.targets[0], b"x")?;
            Ok(())
        })
    };

    let build = |reverse: bool, log: &Rc<RefCell<Vec<String>>>| {
        let fs = TestFileSystem::new();
        fs.add("in", "x");
        let mut graph = Graph::new();
        let mut w = SharedWarnings::default();
        let env = plain_env();
        let x = Builder::new("X", logging_action(log))
            .build(&mut graph, &env, Some("x.out"), &["in"], &mut w)
            .unwrap()[0];
        let y = Builder::new("Y", logging_action(log))
            .build(&mut graph, &env, Some("y.out"), &["in"], &mut w)
            .unwrap()[0];
        let top = graph.file_id("top");
        graph.add_source(top, x);
        graph.add_source(top, y);
        graph.node_mut(top).pseudo = true;
        let mut session = mem_session();
        let scanner = NullScanner;
        if reverse {
            let mut tm = Taskmaster::new(&mut graph, &mut session, &*fs, &scanner, &[top])
                .with_order(|nodes: &mut Vec<NodeId>| nodes.reverse());
            tm.run().unwrap();
        } else {
            let mut tm = Taskmaster::new(&mut graph, &mut session, &*fs, &scanner, &[top]);
            tm.run().unwrap();
        }
    };

    build(false, &order_log);
    assert_eq!(*order_log.borrow(), vec!["x.out", "y.out"]);
    order_log.borrow_mut().clear();
    build(true, &order_log);
    assert_eq!(*order_log.borrow(), vec!["y.out", "x.out"]);
}

#[test]
fn trace_records_scheduling_decisions() {
    let fs = TestFileSystem::new();
    fs.add("in", "x");
    let counter = Rc::new(Cell::new(0));
    let mut graph = Graph::new();
    let out = cat_target(&mut graph, &counter, "out", &["in"]);

    let mut session = mem_session();
    let mut buf: Vec<u8> = Vec::new();
    {
        let scanner = NullScanner;
        let mut tm = Taskmaster::new(&mut graph, &mut session, &*fs, &scanner, &[out])
            .with_trace(&mut buf);
        tm.run().unwrap();
    }
    let trace = String::from_utf8(buf).unwrap();
    assert!(trace.contains("considering 'out'"), "{}", trace);
    assert!(trace.contains("\"in\""), "children summary missing: {}", trace);
    assert!(trace.contains("out of date"), "{}", trace);
}

struct FakeCache {
    fs: Rc<TestFileSystem>,
    content: &'static [u8],
    hits: Rc<Cell<usize>>,
    pushes: Rc<Cell<usize>>,
}

impl Cache for FakeCache {
    fn retrieve(&mut self, target: &str) -> bool {
        self.hits.set(self.hits.get() + 1);
        self.fs.write(target, self.content).unwrap();
        true
    }

    fn push(&mut self, _target: &str) {
        self.pushes.set(self.pushes.get() + 1);
    }
}

#[test]
fn cache_retrieval_skips_the_action() {
    let fs = TestFileSystem::new();
    fs.add("in", "v1");
    let counter = Rc::new(Cell::new(0));
    let hits = Rc::new(Cell::new(0));
    let pushes = Rc::new(Cell::new(0));

    let mut session = mem_session().with_cache(Box::new(FakeCache {
        fs: fs.clone(),
        content: b"cached bytes",
        hits: hits.clone(),
        pushes: pushes.clone(),
    }));

    let mut graph = Graph::new();
    let out = cat_target(&mut graph, &counter, "out", &["in"]);
    let stats = run_build(&fs, &mut graph, &mut session, &[out]);
    assert!(stats.success());
    assert_eq!(counter.get(), 0, "the action is skipped on a cache hit");
    assert_eq!(graph.node(out).state(), NodeState::Executed);
    assert_eq!(fs.contents("out").unwrap(), b"cached bytes".to_vec());
    // Dependent bookkeeping still ran: the record was persisted, so a
    // rerun is clean.
    let mut graph = Graph::new();
    let out = cat_target(&mut graph, &counter, "out", &["in"]);
    let stats = run_build(&fs, &mut graph, &mut session, &[out]);
    assert_eq!(graph.node(out).state(), NodeState::UpToDate);
    assert_eq!(stats.executed, 0);
}

#[test]
fn scan_discovers_implicit_dependencies() {
    // A toy "include" scanner: every line starting with `inc ` names a dep.
    struct IncScanner;
    impl Scanner for IncScanner {
        fn scan(
            &self,
            path: &str,
            fs: &dyn FileSystem,
            _warnings: &mut dyn WarningSink,
        ) -> anyhow::Result<Vec<String>> {
            let data = fs.read(path)?;
            let text = String::from_utf8_lossy(&data);
            Ok(text
                .lines()
                .filter_map(|l| l.strip_prefix("inc "))
                .map(|s| s.to_string())
                .collect())
        }
    }

    let fs = TestFileSystem::new();
    fs.add("main.c", "inc header.h\nbody");
    fs.add("header.h", "h1");
    let counter = Rc::new(Cell::new(0));

    let build_once = |fs: &Rc<TestFileSystem>,
                      counter: &Rc<Cell<usize>>,
                      session: &mut BuildSession| {
        let mut graph = Graph::new();
        let out = cat_target(&mut graph, counter, "main.o", &["main.c"]);
        let scanner = IncScanner;
        let mut tm = Taskmaster::new(&mut graph, session, &**fs, &scanner, &[out]);
        tm.run().unwrap()
    };

    let mut session = mem_session();
    build_once(&fs, &counter, &mut session);
    assert_eq!(counter.get(), 1);

    // Unchanged: no rebuild.
    build_once(&fs, &counter, &mut session);
    assert_eq!(counter.get(), 1);

    // Touching only the discovered header changes the build signature.
    fs.tick(10);
    fs.add("header.h", "h2");
    build_once(&fs, &counter, &mut session);
    assert_eq!(counter.get(), 2);

    // The implicit list is persisted as a hint for the next run.
    assert_eq!(
        session.store.get_implicit(".", "main.o"),
        vec!["header.h".to_string()]
    );
}
