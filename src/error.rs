//! The error taxonomy.
//!
//! Expected failure modes travel as `Error` values through `Result`; panics
//! are reserved for corrupted internal invariants.  Whatever an action
//! raises is folded into `Error::Build` so callers always see a uniform
//! failure shape with the owning target attached.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// A mistake in the build description: ambiguous composite suffixes, a
    /// dependency cycle, a target that cannot be derived from its source.
    /// Always fatal to the affected subtree.
    #[error("{0}")]
    User(String),

    /// Scanning a node's children failed (e.g. the underlying file vanished
    /// mid-read).  Attributed to the node whose scan failed.
    #[error("{target}: dependency scan failed: {message}")]
    Dependency { target: String, message: String },

    /// An action failed while building a target.
    #[error("{target}: {message}")]
    Build {
        target: String,
        message: String,
        /// The original error, when the failure wrapped one.
        cause: Option<anyhow::Error>,
    },

    /// An action requested that the whole invocation terminate.
    #[error("{target}: explicit exit with status {status}")]
    Exit { target: String, status: i32 },
}

impl Error {
    pub fn user(msg: impl Into<String>) -> Error {
        Error::User(msg.into())
    }

    pub fn build(target: impl Into<String>, message: impl Into<String>) -> Error {
        Error::Build {
            target: target.into(),
            message: message.into(),
            cause: None,
        }
    }

    /// Fold an arbitrary action error into the uniform `Build` shape,
    /// keeping the original for callers that want the chain.
    pub fn wrap(target: impl Into<String>, err: anyhow::Error) -> Error {
        Error::Build {
            target: target.into(),
            message: format!("{}", err),
            cause: Some(err),
        }
    }

    /// The target this error is attributed to, if any.
    pub fn target(&self) -> Option<&str> {
        match self {
            Error::User(_) => None,
            Error::Dependency { target, .. }
            | Error::Build { target, .. }
            | Error::Exit { target, .. } => Some(target),
        }
    }

    /// The wrapped original error, when there is one.
    pub fn cause(&self) -> Option<&anyhow::Error> {
        match self {
            Error::Build { cause, .. } => cause.as_ref(),
            _ => None,
        }
    }
}
