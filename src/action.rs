//! Build actions: the concrete operations that turn sources into targets.
//!
//! An action is resolved once per builder construction into one of a small
//! set of variants; composite (by-suffix) actions are narrowed to a single
//! concrete variant at builder call time, so executors only ever hold
//! directly runnable actions.

use crate::env::{subst, Env};
use crate::fs::FileSystem;
use crate::hash::Sig;
use crate::smallmap::SmallMap;
use anyhow::bail;
use std::borrow::Cow;
use std::fmt;
use std::os::unix::process::ExitStatusExt;
use std::rc::Rc;

/// Raised (through anyhow) by an action that wants the whole invocation to
/// terminate with a status code, distinct from an ordinary build failure.
#[derive(Debug, Clone, Copy)]
pub struct ExitRequest(pub i32);

impl fmt::Display for ExitRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "explicit exit requested with status {}", self.0)
    }
}

impl std::error::Error for ExitRequest {}

/// What a function action sees when it runs.
pub struct ExecContext<'a> {
    pub targets: &'a [String],
    pub sources: &'a [String],
    pub env: &'a dyn Env,
    pub fs: &'a dyn FileSystem,
}

pub type ActionFn = Rc<dyn Fn(&ExecContext) -> anyhow::Result<()>>;
pub type GeneratorFn = Rc<dyn Fn(&[String], &[String], &dyn Env) -> Action>;

/// A callable action with a stable name; the name stands in for the
/// function body in action signatures.
#[derive(Clone)]
pub struct FunctionAction {
    pub name: String,
    pub func: ActionFn,
}

impl FunctionAction {
    pub fn new(name: impl Into<String>, func: ActionFn) -> FunctionAction {
        FunctionAction {
            name: name.into(),
            func,
        }
    }
}

impl fmt::Debug for FunctionAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FunctionAction({})", self.name)
    }
}

#[derive(Clone)]
pub enum Action {
    /// A single command line, run through the shell after substitution.
    Command(String),
    /// Several command lines run in order; the first failure stops the
    /// list.
    CommandList(Vec<String>),
    /// A callable.
    Function(FunctionAction),
    /// Dispatch on source suffix; narrowed at builder call time.
    BySuffix(SmallMap<String, Action>),
    /// Produces the real action from (targets, sources, env) when invoked.
    Generator(GeneratorFn),
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Command(c) => write!(f, "Command({:?})", c),
            Action::CommandList(cs) => write!(f, "CommandList({:?})", cs),
            Action::Function(func) => write!(f, "{:?}", func),
            Action::BySuffix(m) => {
                let keys: Vec<_> = m.keys().collect();
                write!(f, "BySuffix({:?})", keys)
            }
            Action::Generator(_) => write!(f, "Generator(..)"),
        }
    }
}

impl Action {
    pub fn function(
        name: impl Into<String>,
        func: impl Fn(&ExecContext) -> anyhow::Result<()> + 'static,
    ) -> Action {
        Action::Function(FunctionAction::new(name, Rc::new(func)))
    }

    /// The suffixes a composite action is registered for, in registration
    /// order; empty for non-composite actions.
    pub fn suffixes(&self) -> Vec<&str> {
        match self {
            Action::BySuffix(m) => m.keys().map(|k| k.as_str()).collect(),
            _ => Vec::new(),
        }
    }

    /// The sub-action registered for `suffix`, if this is a composite.
    pub fn for_suffix(&self, suffix: &str) -> Option<&Action> {
        match self {
            Action::BySuffix(m) => m.get(suffix),
            _ => None,
        }
    }

    /// The human-readable string form of the action, with variables
    /// substituted.  This is also what action signatures hash, so an edited
    /// command line invalidates previous builds.
    pub fn describe(&self, env: &dyn Env, targets: &[String], sources: &[String]) -> String {
        match self {
            Action::Command(c) => subst(env, c),
            Action::CommandList(cs) => {
                let lines: Vec<String> = cs.iter().map(|c| subst(env, c)).collect();
                lines.join("\n")
            }
            Action::Function(f) => format!("{}(target, source)", f.name),
            Action::BySuffix(_) => "<unresolved composite>".to_string(),
            Action::Generator(g) => g(targets, sources, env).describe(env, targets, sources),
        }
    }

    fn execute(&self, ctx: &ExecContext) -> anyhow::Result<()> {
        match self {
            Action::Command(c) => run_command(&subst(ctx.env, c)),
            Action::CommandList(cs) => {
                for c in cs {
                    run_command(&subst(ctx.env, c))?;
                }
                Ok(())
            }
            Action::Function(f) => (f.func)(ctx),
            Action::BySuffix(_) => bail!("composite action was never resolved to a sub-action"),
            Action::Generator(g) => {
                let action = g(ctx.targets, ctx.sources, ctx.env);
                action.execute(ctx)
            }
        }
    }
}

/// Executes a command line as a shell subprocess.
/// Returns an Err() describing the failure, including signal terminations.
fn run_command(cmdline: &str) -> anyhow::Result<()> {
    let out = std::process::Command::new("/bin/sh")
        .arg("-c")
        .arg(cmdline)
        .output()?;
    if out.status.success() {
        if !out.stdout.is_empty() {
            log::debug!("{}: {}", cmdline, String::from_utf8_lossy(&out.stdout));
        }
        return Ok(());
    }
    let mut detail = String::from_utf8_lossy(&out.stderr).trim().to_string();
    if detail.is_empty() {
        detail = String::from_utf8_lossy(&out.stdout).trim().to_string();
    }
    match out.status.signal() {
        Some(libc::SIGINT) => bail!("interrupted: {}", cmdline),
        Some(sig) => bail!("signal {}: {}", sig, cmdline),
        None => {
            let code = out.status.code().unwrap_or(-1);
            if detail.is_empty() {
                bail!("command exited {}: {}", code, cmdline)
            } else {
                bail!("command exited {}: {}: {}", code, cmdline, detail)
            }
        }
    }
}

/// Variables every action sees in addition to the caller's environment:
/// the target and source lists of the invocation at hand.
struct ExecVars<'a> {
    base: &'a dyn Env,
    targets: &'a [String],
    sources: &'a [String],
}

impl<'a> Env for ExecVars<'a> {
    fn get_var(&self, var: &str) -> Option<Cow<str>> {
        match var {
            "TARGET" => self.targets.first().map(|t| Cow::Borrowed(t.as_str())),
            "TARGETS" => Some(Cow::Owned(self.targets.join(" "))),
            "SOURCE" => self.sources.first().map(|s| Cow::Borrowed(s.as_str())),
            "SOURCES" => Some(Cow::Owned(self.sources.join(" "))),
            _ => self.base.get_var(var),
        }
    }
}

/// The binding of one action execution to the group of targets it
/// co-produces.  Shared (reference-counted) between all target nodes of
/// one builder call; a node exposes it via `set_executor`/`executor`.
pub struct Executor {
    action: Action,
    env: Rc<dyn Env>,
    targets: Vec<String>,
    sources: Vec<String>,
}

impl Executor {
    pub fn new(
        action: Action,
        env: Rc<dyn Env>,
        targets: Vec<String>,
        sources: Vec<String>,
    ) -> Executor {
        Executor {
            action,
            env,
            targets,
            sources,
        }
    }

    pub fn targets(&self) -> &[String] {
        &self.targets
    }

    pub fn sources(&self) -> &[String] {
        &self.sources
    }

    /// The string form of the bound action (the `bact` persisted in
    /// signature records).
    pub fn describe(&self) -> String {
        let vars = ExecVars {
            base: &*self.env,
            targets: &self.targets,
            sources: &self.sources,
        };
        self.action.describe(&vars, &self.targets, &self.sources)
    }

    /// The action signature (`bactsig`).
    pub fn signature(&self) -> Sig {
        Sig::of_str(&self.describe())
    }

    pub fn execute(&self, fs: &dyn FileSystem) -> anyhow::Result<()> {
        let vars = ExecVars {
            base: &*self.env,
            targets: &self.targets,
            sources: &self.sources,
        };
        let ctx = ExecContext {
            targets: &self.targets,
            sources: &self.sources,
            env: &vars,
            fs,
        };
        self.action.execute(&ctx)
    }
}

impl fmt::Debug for Executor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Executor({:?} -> {:?})", self.sources, self.targets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::Vars;

    fn executor(action: Action) -> Executor {
        let mut env = Vars::new();
        env.set("CC", "cc");
        Executor::new(
            action,
            Rc::new(env),
            vec!["out.o".to_string()],
            vec!["in.c".to_string(), "in2.c".to_string()],
        )
    }

    #[test]
    fn describe_command_substitutes() {
        let e = executor(Action::Command("$CC -o $TARGET $SOURCES".to_string()));
        assert_eq!(e.describe(), "cc -o out.o in.c in2.c");
    }

    #[test]
    fn describe_function_uses_name() {
        let e = executor(Action::function("link", |_| Ok(())));
        assert_eq!(e.describe(), "link(target, source)");
    }

    #[test]
    fn signature_tracks_command_edits() {
        let a = executor(Action::Command("cc -O0 $SOURCE".to_string()));
        let b = executor(Action::Command("cc -O2 $SOURCE".to_string()));
        assert_ne!(a.signature(), b.signature());
    }

    #[test]
    fn generator_resolves_for_description() {
        let gen: GeneratorFn = Rc::new(|targets, _sources, _env| {
            Action::Command(format!("gen {}", targets[0]))
        });
        let e = executor(Action::Generator(gen));
        assert_eq!(e.describe(), "gen out.o");
    }

    #[test]
    fn composite_lookup() {
        let mut m = SmallMap::new();
        m.insert(".c".to_string(), Action::Command("cc".to_string()));
        m.insert(".f".to_string(), Action::Command("f77".to_string()));
        let a = Action::BySuffix(m);
        assert_eq!(a.suffixes(), vec![".c", ".f"]);
        assert!(matches!(a.for_suffix(".f"), Some(Action::Command(c)) if c == "f77"));
        assert!(a.for_suffix(".x").is_none());
    }
}
