//! Transient handle guard
//!
//! lol_html passes each content handler a `&mut` borrow that ends as soon as
//! the handler returns. The Lua value wrapping that borrow can outlive it (a
//! handler may stash its argument in a global), so the borrow is exposed as a
//! [`TransientHandle`]: a type-erased pointer plus a kind tag, cleared in place
//! when [`TransientHandle::scope`] returns.
//!
//! Every accessor goes through [`TransientHandle::with`], which fails with
//! [`Error::UseAfterLifetime`] once the pointer is cleared and with
//! [`Error::KindMismatch`] if the handle is read as the wrong engine type.

use std::cell::Cell;
use std::fmt;
use std::ptr::NonNull;
use std::rc::Rc;

use lol_html::html_content::{Comment, Doctype, DocumentEnd, Element, TextChunk};

use crate::error::{Error, Result};

/// Kind of engine object a handle points at
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HandleKind {
    Doctype,
    Comment,
    TextChunk,
    DocumentEnd,
    Element,
    AttributeIterator,
}

impl HandleKind {
    /// Name used for the Lua-facing type of this handle.
    pub fn type_name(self) -> &'static str {
        match self {
            HandleKind::Doctype => "lolhtml.doctype",
            HandleKind::Comment => "lolhtml.comment",
            HandleKind::TextChunk => "lolhtml.text_chunk",
            HandleKind::DocumentEnd => "lolhtml.doc_end",
            HandleKind::Element => "lolhtml.element",
            HandleKind::AttributeIterator => "lolhtml.attributes",
        }
    }
}

impl fmt::Display for HandleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HandleKind::Doctype => "doctype",
            HandleKind::Comment => "comment",
            HandleKind::TextChunk => "text chunk",
            HandleKind::DocumentEnd => "document end",
            HandleKind::Element => "element",
            HandleKind::AttributeIterator => "attribute iterator",
        })
    }
}

/// Engine object that can be lent to a handler through a [`TransientHandle`].
///
/// Each kind maps to exactly one type (modulo lifetimes), which is what makes
/// the pointer cast in [`TransientHandle::with`] sound.
pub trait Native {
    const KIND: HandleKind;
}

impl Native for Doctype<'_> {
    const KIND: HandleKind = HandleKind::Doctype;
}

impl Native for Comment<'_> {
    const KIND: HandleKind = HandleKind::Comment;
}

impl Native for TextChunk<'_> {
    const KIND: HandleKind = HandleKind::TextChunk;
}

impl Native for DocumentEnd<'_> {
    const KIND: HandleKind = HandleKind::DocumentEnd;
}

impl Native for Element<'_, '_> {
    const KIND: HandleKind = HandleKind::Element;
}

struct Target {
    kind: HandleKind,
    ptr: Cell<Option<NonNull<()>>>,
}

/// Scope-limited reference to an engine object
///
/// Clones share the same validity flag, so invalidating one invalidates all.
#[derive(Clone)]
pub struct TransientHandle(Rc<Target>);

impl TransientHandle {
    /// Lend `target` to `f` through a handle that is invalidated when `f`
    /// returns, unwinds included.
    pub fn scope<T: Native, R>(target: &mut T, f: impl FnOnce(TransientHandle) -> R) -> R {
        let handle = TransientHandle(Rc::new(Target {
            kind: T::KIND,
            ptr: Cell::new(Some(NonNull::from(target).cast())),
        }));
        let _invalidate = Invalidate(handle.clone());
        f(handle)
    }

    pub fn kind(&self) -> HandleKind {
        self.0.kind
    }

    /// Whether the handler that received this handle is still running.
    pub fn is_valid(&self) -> bool {
        self.0.ptr.get().is_some()
    }

    /// Run `f` against the engine object behind this handle.
    pub fn with<T: Native, R>(&self, f: impl FnOnce(&mut T) -> R) -> Result<R> {
        if self.0.kind != T::KIND {
            return Err(Error::KindMismatch {
                expected: T::KIND,
                found: self.0.kind,
            });
        }
        let ptr = self
            .0
            .ptr
            .get()
            .ok_or(Error::UseAfterLifetime { kind: self.0.kind })?;
        // SAFETY: the pointer is only set while `scope` holds the original
        // `&mut` borrow, and the kind check guarantees `T` is the type that was
        // lent (lifetimes aside). The reference does not escape `f`, and the
        // bridge is single-threaded, so no other access overlaps this one.
        let target = unsafe { ptr.cast::<T>().as_mut() };
        Ok(f(target))
    }

    fn invalidate(&self) {
        self.0.ptr.set(None);
    }
}

impl fmt::Display for TransientHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = if self.is_valid() { "live" } else { "expired" };
        write!(f, "{} ({state})", self.kind().type_name())
    }
}

impl fmt::Debug for TransientHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransientHandle")
            .field("kind", &self.kind())
            .field("valid", &self.is_valid())
            .finish()
    }
}

struct Invalidate(TransientHandle);

impl Drop for Invalidate {
    fn drop(&mut self) {
        self.0.invalidate();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Sample(u32);

    impl Native for Sample {
        const KIND: HandleKind = HandleKind::Comment;
    }

    struct OtherSample;

    impl Native for OtherSample {
        const KIND: HandleKind = HandleKind::Element;
    }

    #[test]
    fn test_access_inside_scope() {
        let mut sample = Sample(1);
        let read = TransientHandle::scope(&mut sample, |handle| {
            handle.with(|p: &mut Sample| p.0 += 1).unwrap();
            handle.with(|p: &mut Sample| p.0).unwrap()
        });
        assert_eq!(read, 2);
        assert_eq!(sample.0, 2);
    }

    #[test]
    fn test_use_after_scope_fails() {
        let mut sample = Sample(7);
        let escaped = TransientHandle::scope(&mut sample, |handle| handle);

        assert!(!escaped.is_valid());
        let err = escaped.with(|p: &mut Sample| p.0).unwrap_err();
        assert!(matches!(
            err,
            Error::UseAfterLifetime {
                kind: HandleKind::Comment
            }
        ));
    }

    #[test]
    fn test_clones_share_validity() {
        let mut sample = Sample(0);
        let clone = TransientHandle::scope(&mut sample, |handle| {
            let clone = handle.clone();
            assert!(clone.is_valid());
            clone
        });
        assert!(!clone.is_valid());
    }

    #[test]
    fn test_invalidated_on_unwind() {
        let mut sample = Sample(0);
        let mut escaped = None;
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            TransientHandle::scope(&mut sample, |handle| {
                escaped = Some(handle);
                panic!("handler blew up");
            })
        }));
        assert!(outcome.is_err());
        assert!(!escaped.unwrap().is_valid());
    }

    #[test]
    fn test_kind_mismatch_is_distinct() {
        let mut sample = Sample(0);
        TransientHandle::scope(&mut sample, |handle| {
            let err = handle.with(|_: &mut OtherSample| ()).unwrap_err();
            assert!(matches!(
                err,
                Error::KindMismatch {
                    expected: HandleKind::Element,
                    found: HandleKind::Comment
                }
            ));
        });
    }

    #[test]
    fn test_display_reports_state() {
        let mut sample = Sample(0);
        let escaped = TransientHandle::scope(&mut sample, |handle| {
            assert_eq!(handle.to_string(), "lolhtml.comment (live)");
            handle
        });
        assert_eq!(escaped.to_string(), "lolhtml.comment (expired)");
    }
}
