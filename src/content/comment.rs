//! Comment handle

use lol_html::html_content::Comment;
use mlua::{UserData, UserDataMethods};

use super::{add_action, add_getter, add_insertion, add_setter, add_tostring, Transient};
use crate::handle::TransientHandle;

/// Comment lent to a `comment_handler`
pub struct LuaComment(TransientHandle);

impl LuaComment {
    pub fn new(handle: TransientHandle) -> Self {
        Self(handle)
    }
}

impl Transient for LuaComment {
    fn handle(&self) -> &TransientHandle {
        &self.0
    }
}

impl UserData for LuaComment {
    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        add_getter(methods, "get_text", |c: &mut Comment<'static>| c.text());
        add_setter(methods, "set_text", |c: &mut Comment<'static>, text| {
            c.set_text(text).map_err(|err| err.to_string())
        });
        add_insertion(methods, "before", |c: &mut Comment<'static>, content, ty| {
            c.before(content, ty)
        });
        add_insertion(methods, "after", |c: &mut Comment<'static>, content, ty| {
            c.after(content, ty)
        });
        add_insertion(methods, "replace", |c: &mut Comment<'static>, content, ty| {
            c.replace(content, ty)
        });
        add_action(methods, "remove", |c: &mut Comment<'static>| c.remove());
        add_getter(methods, "is_removed", |c: &mut Comment<'static>| c.removed());
        add_tostring(methods);
    }
}
