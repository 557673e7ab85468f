//! Text chunk handle

use lol_html::html_content::TextChunk;
use mlua::{UserData, UserDataMethods};

use super::{add_action, add_getter, add_insertion, add_tostring, Transient};
use crate::handle::TransientHandle;

/// Text chunk lent to a `text_handler`
///
/// The engine may split one text node into several chunks;
/// `is_last_in_text_node` tells the handler when a node is complete.
pub struct LuaTextChunk(TransientHandle);

impl LuaTextChunk {
    pub fn new(handle: TransientHandle) -> Self {
        Self(handle)
    }
}

impl Transient for LuaTextChunk {
    fn handle(&self) -> &TransientHandle {
        &self.0
    }
}

impl UserData for LuaTextChunk {
    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        add_getter(methods, "get_text", |t: &mut TextChunk<'static>| {
            t.as_str().to_owned()
        });
        add_getter(methods, "is_last_in_text_node", |t: &mut TextChunk<'static>| {
            t.last_in_text_node()
        });
        add_insertion(methods, "before", |t: &mut TextChunk<'static>, content, ty| {
            t.before(content, ty)
        });
        add_insertion(methods, "after", |t: &mut TextChunk<'static>, content, ty| {
            t.after(content, ty)
        });
        add_insertion(methods, "replace", |t: &mut TextChunk<'static>, content, ty| {
            t.replace(content, ty)
        });
        add_action(methods, "remove", |t: &mut TextChunk<'static>| t.remove());
        add_getter(methods, "is_removed", |t: &mut TextChunk<'static>| t.removed());
        add_tostring(methods);
    }
}
