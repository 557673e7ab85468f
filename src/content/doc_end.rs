//! Document end handle

use lol_html::html_content::DocumentEnd;
use mlua::{UserData, UserDataMethods};

use super::{add_insertion, add_tostring, Transient};
use crate::handle::TransientHandle;

/// End of the document, lent to a `doc_end_handler`
pub struct LuaDocEnd(TransientHandle);

impl LuaDocEnd {
    pub fn new(handle: TransientHandle) -> Self {
        Self(handle)
    }
}

impl Transient for LuaDocEnd {
    fn handle(&self) -> &TransientHandle {
        &self.0
    }
}

impl UserData for LuaDocEnd {
    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        add_insertion(methods, "append", |end: &mut DocumentEnd<'static>, content, ty| {
            end.append(content, ty)
        });
        add_tostring(methods);
    }
}
