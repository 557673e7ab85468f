//! Bridge error types
//!
//! Three families of failure meet in this crate and must stay apart:
//! - engine errors reported by lol_html (`Error::Engine`),
//! - errors raised by Lua handlers or the sink, carried as the raw Lua
//!   value in [`Failure::Host`] so they can be re-raised unmodified,
//! - bridge errors such as an invalid handler return value.

use mlua::Value;

use crate::handle::HandleKind;
use crate::registry::Slot;

/// Errors produced by the bridge itself.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A handle was used after the handler that received it returned.
    #[error("{kind} handle used after its handler returned")]
    UseAfterLifetime { kind: HandleKind },

    /// A handle was dereferenced as the wrong kind of engine object.
    #[error("expected a {expected} handle, got a {found} handle")]
    KindMismatch {
        expected: HandleKind,
        found: HandleKind,
    },

    /// A weak registry entry that should still be anchored has been collected.
    #[error("registry slot {0} no longer refers to a live value")]
    MissingRegistryEntry(Slot),

    /// A handler returned something other than nil, `CONTINUE` or `STOP`.
    #[error("invalid handler return value (expected nil, CONTINUE or STOP, got {0})")]
    InvalidHandlerReturn(String),

    /// The engine fired a callback while no `write`/`close` call was active.
    #[error("handler invoked outside of write or close")]
    NoActiveCall,

    #[error("session already ended")]
    SessionEnded,

    #[error("expected a rewriter builder in field \"builder\", got {0}")]
    NotABuilder(&'static str),

    #[error("rewriter re-entered from one of its own handlers")]
    Reentered,

    #[error("builder was already used to build a rewriter")]
    BuilderConsumed,

    #[error("field \"{0}\" cannot be called")]
    NotCallable(String),

    #[error("expected a selector or a selector string, got {0}")]
    NotASelector(&'static str),

    #[error("rewriter options must be a table, got {0}")]
    InvalidOptions(&'static str),

    #[error("option \"{0}\" must be a non-negative integer")]
    InvalidSize(&'static str),

    #[error("unsupported encoding: {0}")]
    UnsupportedEncoding(String),

    #[error("preallocated parsing buffer ({preallocated} bytes) exceeds the memory limit ({limit} bytes)")]
    PreallocationOverLimit { preallocated: usize, limit: usize },

    #[error("content is not valid UTF-8")]
    InvalidUtf8,

    #[error("the library is already loaded")]
    AlreadyLoaded,

    #[error("the library is not loaded in this Lua state")]
    NotLoaded,

    /// Error reported by the rewriting engine.
    #[error("{0}")]
    Engine(String),

    #[error(transparent)]
    Lua(#[from] mlua::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl From<Error> for mlua::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::Lua(err) => err,
            other => mlua::Error::external(other),
        }
    }
}

/// Why a `write` or `close` call (or a single dispatch) did not complete.
#[derive(Debug)]
pub enum Failure {
    /// A Lua handler or the sink raised; this is the raised value itself.
    Host(Value),
    /// The engine or the bridge failed.
    Bridge(Error),
}

impl From<Error> for Failure {
    fn from(err: Error) -> Self {
        Failure::Bridge(err)
    }
}

impl From<mlua::Error> for Failure {
    fn from(err: mlua::Error) -> Self {
        Failure::Bridge(Error::Lua(err))
    }
}

impl std::fmt::Display for Failure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Failure::Host(Value::String(message)) => {
                write!(f, "host error: {}", message.to_string_lossy())
            }
            Failure::Host(value) => write!(f, "host error ({})", value.type_name()),
            Failure::Bridge(err) => err.fmt(f),
        }
    }
}
