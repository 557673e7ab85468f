//! Lua-facing handles for document constructs
//!
//! Each handle type wraps a [`TransientHandle`] and exposes the accessor and
//! mutator methods of one lol_html content type. Accessors return plain
//! values; mutators return the handle itself, or `nil, message` when the
//! engine rejects the change.

mod comment;
mod doc_end;
mod doctype;
mod element;
mod text_chunk;

pub use comment::LuaComment;
pub use doc_end::LuaDocEnd;
pub use doctype::LuaDoctype;
pub use element::{LuaAttributes, LuaElement};
pub use text_chunk::LuaTextChunk;

use lol_html::html_content::ContentType;
use mlua::{AnyUserData, IntoLua, MetaMethod, String as LuaString, UserData, UserDataMethods};

use crate::error::Error;
use crate::handle::{Native, TransientHandle};

/// Userdata backed by a transient handle.
pub trait Transient: UserData + 'static {
    fn handle(&self) -> &TransientHandle;
}

/// Map the host's `is_html` flag onto the engine's content type.
pub(crate) fn content_type(is_html: bool) -> ContentType {
    if is_html {
        ContentType::Html
    } else {
        ContentType::Text
    }
}

/// Result shape shared by every mutator: `self` or `nil, message`.
pub(crate) fn self_or_err(
    ud: AnyUserData,
    outcome: Result<(), String>,
) -> (Option<AnyUserData>, Option<String>) {
    match outcome {
        Ok(()) => (Some(ud), None),
        Err(message) => (None, Some(message)),
    }
}

pub(crate) fn add_tostring<U: Transient, M: UserDataMethods<U>>(methods: &mut M) {
    methods.add_meta_method(MetaMethod::ToString, |_, this, ()| {
        Ok(this.handle().to_string())
    });
}

/// Method reading a value out of the engine object.
pub(crate) fn add_getter<U, T, R, M>(methods: &mut M, name: &'static str, get: fn(&mut T) -> R)
where
    U: Transient,
    T: Native + 'static,
    R: IntoLua + 'static,
    M: UserDataMethods<U>,
{
    methods.add_method(name, move |_, this, ()| Ok(this.handle().with(get)?));
}

/// Argument-less mutator that cannot be rejected, such as `remove`.
pub(crate) fn add_action<U, T, M>(methods: &mut M, name: &'static str, act: fn(&mut T))
where
    U: Transient,
    T: Native + 'static,
    M: UserDataMethods<U>,
{
    methods.add_function(name, move |_, ud: AnyUserData| {
        ud.borrow::<U>()?.handle().with(act)?;
        Ok(ud)
    });
}

/// Mutator taking one string that the engine may reject.
pub(crate) fn add_setter<U, T, M>(
    methods: &mut M,
    name: &'static str,
    set: fn(&mut T, &str) -> Result<(), String>,
) where
    U: Transient,
    T: Native + 'static,
    M: UserDataMethods<U>,
{
    methods.add_function(name, move |_, (ud, value): (AnyUserData, LuaString)| {
        let outcome = match value.to_str() {
            Ok(value) => ud.borrow::<U>()?.handle().with(|target: &mut T| set(target, &value))?,
            Err(_) => Err(Error::InvalidUtf8.to_string()),
        };
        Ok(self_or_err(ud, outcome))
    });
}

/// `before`/`after`/`replace` style insertion of text or HTML.
pub(crate) fn add_insertion<U, T, M>(
    methods: &mut M,
    name: &'static str,
    insert: fn(&mut T, &str, ContentType),
) where
    U: Transient,
    T: Native + 'static,
    M: UserDataMethods<U>,
{
    methods.add_function(
        name,
        move |_, (ud, content, is_html): (AnyUserData, LuaString, bool)| {
            let outcome = match content.to_str() {
                Ok(content) => {
                    ud.borrow::<U>()?
                        .handle()
                        .with(|target: &mut T| insert(target, &content, content_type(is_html)))?;
                    Ok(())
                }
                Err(_) => Err(Error::InvalidUtf8.to_string()),
            };
            Ok(self_or_err(ud, outcome))
        },
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_type_mapping() {
        assert!(matches!(content_type(true), ContentType::Html));
        assert!(matches!(content_type(false), ContentType::Text));
    }
}
