//! Builders: reusable rules mapping (target, source) declarations to bound
//! actions, with naming and chaining policy.
//!
//! A builder owns its action, optional prefix/suffix policy, a list of
//! chained source builders for routing mismatched sources, and an emitter
//! hook that may rewrite the target/source lists before anything is bound.
//! Calling a builder creates (or reuses) the named nodes, wires up child
//! edges, and attaches a shared executor to every target it binds.

use crate::action::{Action, Executor};
use crate::env::{subst, Env};
use crate::error::{Error, Result};
use crate::graph::{Graph, NodeId, NodeKind};
use crate::paths::{split_dir_file, strip_suffix, suffix_of};
use crate::smallmap::SmallMap;
use crate::warn::{Warning, WarningSink};
use std::rc::Rc;

/// A prefix or suffix policy: a literal (substituted), a callable, or a
/// table keyed by the first source's suffix with "" as the default key.
#[derive(Clone)]
pub enum Affix {
    None,
    Str(String),
    Call(Rc<dyn Fn(&dyn Env, &[String]) -> String>),
    BySuffix(SmallMap<String, String>),
}

impl Affix {
    fn resolve(&self, env: &dyn Env, sources: &[String]) -> String {
        match self {
            Affix::None => String::new(),
            Affix::Str(s) => subst(env, s),
            Affix::Call(f) => f(env, sources),
            Affix::BySuffix(m) => {
                let suf = sources.first().map(|s| suffix_of(s)).unwrap_or("");
                m.get(suf)
                    .or_else(|| m.get(""))
                    .cloned()
                    .unwrap_or_default()
            }
        }
    }
}

/// Ensure a computed suffix carries exactly one leading dot, unless it
/// starts with a variable-reference sigil, which is trusted verbatim.
fn adjust_suffix(suf: &str) -> String {
    if !suf.is_empty() && !suf.starts_with('.') && !suf.starts_with('$') {
        format!(".{}", suf)
    } else {
        suf.to_string()
    }
}

/// Add prefix/suffix to a file name where they are not already present.
/// The prefix applies to the basename, not the directory part.
fn adjustixes(path: &str, pre: &str, suf: &str) -> String {
    let (dir, file) = split_dir_file(path);
    let mut file = file.to_string();
    if !pre.is_empty() && !file.starts_with(pre) {
        file = format!("{}{}", pre, file);
    }
    // Only append a suffix if the file does not have one.
    if !suf.is_empty() && suffix_of(&file).is_empty() && !file.ends_with(suf) {
        file.push_str(suf);
    }
    join_dir(dir, &file)
}

fn join_dir(dir: &str, file: &str) -> String {
    match dir {
        "." => file.to_string(),
        "/" => format!("/{}", file),
        _ => format!("{}/{}", dir, file),
    }
}

/// An emitter may append to or replace the target/source lists, and may
/// create nodes of its own (whose builder assignment is preserved).
pub type EmitterFn =
    Rc<dyn Fn(&mut Vec<String>, &mut Vec<String>, &dyn Env, &mut Graph) -> Result<()>>;

#[derive(Clone)]
pub enum EmitterSpec {
    None,
    Call(EmitterFn),
    BySuffix(SmallMap<String, EmitterFn>),
}

/// Override keys passed alongside a builder call.  The engine itself only
/// inspects them for common misspellings; interpretation is up to actions.
pub type Overrides = SmallMap<String, String>;

pub struct Builder {
    name: String,
    action: Action,
    prefix: Affix,
    suffix: Affix,
    src_suffix: Vec<String>,
    src_builders: Vec<Rc<Builder>>,
    emitter: EmitterSpec,
    target_kind: NodeKind,
    source_kind: NodeKind,
    source_ext_match: bool,
}

impl Builder {
    pub fn new(name: impl Into<String>, action: Action) -> Builder {
        Builder {
            name: name.into(),
            action,
            prefix: Affix::None,
            suffix: Affix::None,
            src_suffix: Vec::new(),
            src_builders: Vec::new(),
            emitter: EmitterSpec::None,
            target_kind: NodeKind::Entry,
            source_kind: NodeKind::Entry,
            source_ext_match: true,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn prefix(mut self, prefix: impl Into<String>) -> Builder {
        self.prefix = Affix::Str(prefix.into());
        self
    }

    pub fn prefix_affix(mut self, prefix: Affix) -> Builder {
        self.prefix = prefix;
        self
    }

    pub fn suffix(mut self, suffix: impl Into<String>) -> Builder {
        self.suffix = Affix::Str(suffix.into());
        self
    }

    pub fn suffix_affix(mut self, suffix: Affix) -> Builder {
        self.suffix = suffix;
        self
    }

    pub fn src_suffix(mut self, suffix: impl Into<String>) -> Builder {
        self.src_suffix.push(suffix.into());
        self
    }

    /// Chain a builder that produces this builder's expected source suffix
    /// from sources it cannot consume directly.
    pub fn src_builder(mut self, builder: Rc<Builder>) -> Builder {
        self.src_builders.push(builder);
        self
    }

    pub fn emitter(mut self, emitter: EmitterFn) -> Builder {
        self.emitter = EmitterSpec::Call(emitter);
        self
    }

    pub fn emitter_by_suffix(mut self, emitters: SmallMap<String, EmitterFn>) -> Builder {
        self.emitter = EmitterSpec::BySuffix(emitters);
        self
    }

    pub fn target_kind(mut self, kind: NodeKind) -> Builder {
        self.target_kind = kind;
        self
    }

    pub fn source_kind(mut self, kind: NodeKind) -> Builder {
        self.source_kind = kind;
        self
    }

    /// Permit mixed source suffixes on a composite action; dispatch then
    /// falls back to the first *registered* suffix present among the
    /// sources, which keeps the pick deterministic across runs.
    pub fn source_ext_match(mut self, matched: bool) -> Builder {
        self.source_ext_match = matched;
        self
    }

    /// The suffixes this builder consumes directly.
    fn own_src_suffixes(&self, env: &dyn Env) -> Vec<String> {
        self.src_suffix
            .iter()
            .map(|s| subst(env, &adjust_suffix(s)))
            .collect()
    }

    /// The effective target suffix: dot-adjusted before substitution, so a
    /// configured `$VAR` suffix is trusted verbatim.
    fn resolved_suffix(&self, env: &dyn Env, sources: &[String]) -> String {
        match &self.suffix {
            Affix::Str(s) => subst(env, &adjust_suffix(s)),
            other => adjust_suffix(&other.resolve(env, sources)),
        }
    }

    /// Direct suffixes plus everything reachable through chained source
    /// builders.
    pub fn src_suffixes(&self, env: &dyn Env) -> Vec<String> {
        let mut out = self.own_src_suffixes(env);
        for bld in &self.src_builders {
            for suf in bld.src_suffixes(env) {
                if !out.contains(&suf) {
                    out.push(suf);
                }
            }
        }
        out
    }

    fn src_builder_for(&self, env: &dyn Env, suffix: &str) -> Option<&Rc<Builder>> {
        self.src_builders
            .iter()
            .find(|b| b.src_suffixes(env).iter().any(|s| s == suffix))
    }

    fn emitter_for(&self, sources: &[String]) -> Option<EmitterFn> {
        match &self.emitter {
            EmitterSpec::None => None,
            EmitterSpec::Call(f) => Some(f.clone()),
            EmitterSpec::BySuffix(m) => {
                let suf = sources.first().map(|s| suffix_of(s)).unwrap_or("");
                m.get(suf).or_else(|| m.get("")).cloned()
            }
        }
    }

    /// Convenience wrapper for the common single-target case.
    pub fn build(
        &self,
        graph: &mut Graph,
        env: &Rc<dyn Env>,
        target: Option<&str>,
        source: &[&str],
        warnings: &mut dyn WarningSink,
    ) -> Result<Vec<NodeId>> {
        self.call(
            graph,
            env,
            target.map(|t| vec![t.to_string()]),
            source.iter().map(|s| s.to_string()).collect(),
            &Overrides::new(),
            warnings,
        )
    }

    /// The core entry point: bind (target, source) through this builder,
    /// returning the target nodes it bound.
    pub fn call(
        &self,
        graph: &mut Graph,
        env: &Rc<dyn Env>,
        target: Option<Vec<String>>,
        source: Vec<String>,
        overrides: &Overrides,
        warnings: &mut dyn WarningSink,
    ) -> Result<Vec<NodeId>> {
        for (key, _) in overrides.iter() {
            let suggestion = match key.as_str() {
                "sources" => "source",
                "targets" => "target",
                _ => continue,
            };
            warnings.warn(Warning::MisleadingKeyword {
                given: key.clone(),
                suggestion: suggestion.to_string(),
            });
        }

        let slist = self.route_sources(graph, env, source, warnings)?;

        let pre = self.prefix.resolve(&**env, &slist);
        let suf = self.resolved_suffix(&**env, &slist);
        let own_sufs = self.own_src_suffixes(&**env);

        let mut tlist = match target {
            Some(ts) => ts.iter().map(|t| adjustixes(t, &pre, &suf)).collect(),
            None => vec![self.target_from_source(&slist, &pre, &suf)?],
        };

        // Append the expected source suffix to extension-less sources.
        let src_suf = own_sufs.first().map(|s| s.as_str()).unwrap_or("");
        let mut slist: Vec<String> = slist
            .iter()
            .map(|s| adjustixes(s, "", src_suf))
            .collect();

        if let Some(emit) = self.emitter_for(&slist) {
            emit(&mut tlist, &mut slist, &**env, graph)?;
        }

        let action = self.dispatch(&tlist, &slist)?;

        let tids: Vec<NodeId> = tlist
            .iter()
            .map(|t| graph.node_id(t, self.target_kind))
            .collect();
        let sids: Vec<NodeId> = slist
            .iter()
            .map(|s| graph.node_id(s, self.source_kind))
            .collect();
        let tnames: Vec<String> = tids.iter().map(|&t| graph.node(t).name.clone()).collect();
        let snames: Vec<String> = sids.iter().map(|&s| graph.node(s).name.clone()).collect();

        let exec = Rc::new(Executor::new(action, env.clone(), tnames, snames));
        for &t in &tids {
            for &s in &sids {
                graph.add_source(t, s);
            }
            // An assignment already made (e.g. by the emitter) wins.
            if !graph.node(t).has_explicit_builder() {
                graph.set_executor(t, exec.clone());
                graph.set_explicit(t, true);
            }
        }
        Ok(tids)
    }

    /// Route sources that this builder cannot consume directly through its
    /// chained source builders, depth-first per source.
    fn route_sources(
        &self,
        graph: &mut Graph,
        env: &Rc<dyn Env>,
        source: Vec<String>,
        warnings: &mut dyn WarningSink,
    ) -> Result<Vec<String>> {
        let own_sufs = self.own_src_suffixes(&**env);
        let mut out = Vec::new();
        for src in source {
            let suffix = suffix_of(&src).to_string();
            if !own_sufs.is_empty() && !own_sufs.contains(&suffix) {
                if let Some(bld) = self.src_builder_for(&**env, &suffix) {
                    let inter = format!(
                        "{}{}",
                        strip_suffix(&src),
                        bld.resolved_suffix(&**env, std::slice::from_ref(&src))
                    );
                    let tgts = bld.call(
                        graph,
                        env,
                        Some(vec![inter]),
                        vec![src],
                        &Overrides::new(),
                        warnings,
                    )?;
                    // Only pass along what this builder can consume.
                    for t in tgts {
                        let name = graph.node(t).name.clone();
                        if own_sufs.iter().any(|s| s == suffix_of(&name)) {
                            out.push(name);
                        }
                    }
                    continue;
                }
            }
            out.push(src);
        }
        Ok(out)
    }

    fn target_from_source(&self, slist: &[String], pre: &str, suf: &str) -> Result<String> {
        match slist.len() {
            0 => Err(Error::user(format!(
                "no target or sources given to builder `{}'",
                self.name
            ))),
            1 => {
                let (dir, file) = split_dir_file(&slist[0]);
                let stem = strip_suffix(file);
                if stem.is_empty() {
                    return Err(Error::user(format!(
                        "cannot derive a target name from source `{}' (builder `{}')",
                        slist[0], self.name
                    )));
                }
                Ok(join_dir(dir, &format!("{}{}{}", pre, stem, suf)))
            }
            _ => Err(Error::user(format!(
                "building from multiple sources requires an explicit target (builder `{}')",
                self.name
            ))),
        }
    }

    /// Narrow a composite action to the single sub-action the sources call
    /// for; any other action kind passes through unchanged.
    fn dispatch(&self, tlist: &[String], slist: &[String]) -> Result<Action> {
        let map = match &self.action {
            Action::BySuffix(m) => m,
            other => return Ok(other.clone()),
        };
        let tname = tlist.first().map(|t| t.as_str()).unwrap_or("?");
        let mut seen: Vec<&str> = Vec::new();
        for s in slist {
            let suf = suffix_of(s);
            if !suf.is_empty() && !seen.contains(&suf) {
                seen.push(suf);
            }
        }
        if seen.is_empty() {
            return Err(Error::user(format!(
                "While building `{}': Cannot deduce file suffix from sources {:?}",
                tname, slist
            )));
        }
        if seen.len() > 1 && self.source_ext_match {
            return Err(Error::user(format!(
                "While building `{}': Cannot build multiple sources with different extensions: {}",
                tname,
                seen.join(", ")
            )));
        }
        // First-registered suffix present among the sources wins; with
        // source_ext_match enabled there is exactly one candidate anyway.
        let chosen = map.keys().find(|k| seen.contains(&k.as_str()));
        match chosen {
            Some(key) => Ok(map.get(key.as_str()).cloned().unwrap_or_else(|| {
                unreachable!("suffix key vanished from composite table")
            })),
            None => {
                let accepted: Vec<&str> = map.keys().map(|k| k.as_str()).collect();
                Err(Error::user(format!(
                    "While building `{}': Don't know how to build from a source with suffix `{}'; accepted suffixes: {}",
                    tname,
                    seen[0],
                    accepted.join(", ")
                )))
            }
        }
    }
}
