//! lolhtml-lua - Lua bindings for the lol_html streaming HTML rewriter
//!
//! This crate provides:
//! - Builders and selectors for registering Lua content handlers
//! - Rewriter sessions streaming input through lol_html into a Lua sink
//! - Scope-limited handles over the engine's doctype, comment, text, element
//!   and document end objects
//! - A weak registry tying engine callbacks back to their Lua owners
//!
//! The module table is built by [`open`]; the `module` feature exports it as
//! `luaopen_lolhtml`.

pub mod builder;
pub mod content;
pub mod dispatch;
pub mod error;
pub mod ffi;
pub mod handle;
pub mod options;
pub mod registry;
pub mod rewriter;
pub mod session;

pub use dispatch::{CONTINUE, STOP};
pub use error::{Error, Failure, Result};
pub use ffi::open;
pub use options::RewriterOptions;
pub use session::{Engine, Session, SessionState};
