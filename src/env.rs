//! The construction-variable boundary.
//!
//! The full substitution language lives outside the engine; all the core
//! needs is a way to look up variables and expand `$NAME`/`${NAME}`
//! references in command strings.

use rustc_hash::FxHashMap;
use std::borrow::Cow;

/// A variable lookup environment.
pub trait Env {
    fn get_var(&self, var: &str) -> Option<Cow<str>>;
}

/// Expand `$NAME` and `${NAME}` references in `input`.  `$$` produces a
/// literal `$`; unknown variables expand to the empty string.
pub fn subst(env: &dyn Env, input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.char_indices().peekable();
    while let Some((_, c)) = chars.next() {
        if c != '$' {
            out.push(c);
            continue;
        }
        match chars.peek() {
            Some(&(_, '$')) => {
                chars.next();
                out.push('$');
            }
            Some(&(start, '{')) => {
                chars.next();
                let rest = &input[start + 1..];
                match rest.find('}') {
                    Some(end) => {
                        if let Some(val) = env.get_var(&rest[..end]) {
                            out.push_str(&val);
                        }
                        for _ in 0..end + 1 {
                            chars.next();
                        }
                    }
                    // Unterminated reference; emit as-is.
                    None => out.push_str("${"),
                }
            }
            Some(&(start, c2)) if c2.is_ascii_alphanumeric() || c2 == '_' => {
                let rest = &input[start..];
                let end = rest
                    .find(|c: char| !c.is_ascii_alphanumeric() && c != '_')
                    .unwrap_or(rest.len());
                if let Some(val) = env.get_var(&rest[..end]) {
                    out.push_str(&val);
                }
                for _ in 0..end {
                    chars.next();
                }
            }
            _ => out.push('$'),
        }
    }
    out
}

/// Expand a command line and split it into an argument list.  Splitting is
/// on whitespace; quoting belongs to the out-of-scope substitution layer.
pub fn subst_argv(env: &dyn Env, cmdline: &str) -> Vec<String> {
    subst(env, cmdline)
        .split_whitespace()
        .map(|s| s.to_string())
        .collect()
}

/// A plain map-backed environment.
#[derive(Default)]
pub struct Vars(FxHashMap<String, String>);

impl Vars {
    pub fn new() -> Self {
        Vars::default()
    }

    pub fn set(&mut self, var: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.0.insert(var.into(), value.into());
        self
    }
}

impl Env for Vars {
    fn get_var(&self, var: &str) -> Option<Cow<str>> {
        self.0.get(var).map(|v| Cow::Borrowed(v.as_str()))
    }
}
