//! Doctype handle

use lol_html::html_content::Doctype;
use mlua::{UserData, UserDataMethods};

use super::{add_getter, add_tostring, Transient};
use crate::handle::TransientHandle;

/// Doctype lent to a `doctype_handler`; read-only
pub struct LuaDoctype(TransientHandle);

impl LuaDoctype {
    pub fn new(handle: TransientHandle) -> Self {
        Self(handle)
    }
}

impl Transient for LuaDoctype {
    fn handle(&self) -> &TransientHandle {
        &self.0
    }
}

impl UserData for LuaDoctype {
    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        add_getter(methods, "get_name", |d: &mut Doctype<'static>| d.name());
        add_getter(methods, "get_id", |d: &mut Doctype<'static>| d.public_id());
        add_getter(methods, "get_system_id", |d: &mut Doctype<'static>| d.system_id());
        add_tostring(methods);
    }
}
