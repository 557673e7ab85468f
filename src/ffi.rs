//! Lua module entry point
//!
//! [`open`] builds the `lolhtml` module table and installs the per-state
//! [`BridgeState`]. With the `module` feature the crate also exports
//! `luaopen_lolhtml`, so `require "lolhtml"` works from a stock interpreter.

use mlua::{AppDataRef, Function, Lua, RegistryKey, Table};

use crate::builder::{new_rewriter_builder, new_selector};
use crate::dispatch::{CONTINUE, STOP};
use crate::error::{Error, Result};
use crate::registry::WeakRegistry;
use crate::rewriter::{new_rewriter, raw_close, raw_write};

/// Session methods, written in Lua so a host error is re-raised as the very
/// value the handler or sink raised.
const SESSION_METHODS: &str = r#"
local raw_write, raw_close = ...

local function settle(ok, result, message)
    if not ok then
        error(result, 0)
    end
    if result == nil then
        return nil, message
    end
    return result
end

return {
    write = function(self, chunk)
        return settle(raw_write(self, chunk))
    end,
    close = function(self)
        return settle(raw_close(self))
    end,
}
"#;

/// Everything the bridge keeps per Lua state
pub struct BridgeState {
    pub registry: WeakRegistry,
    pcall: RegistryKey,
    session_methods: RegistryKey,
}

impl BridgeState {
    fn new(lua: &Lua) -> mlua::Result<Self> {
        let pcall: Function = lua.globals().get("pcall")?;
        let session_methods: Table = lua
            .load(SESSION_METHODS)
            .set_name("=lolhtml.session")
            .call((lua.create_function(raw_write)?, lua.create_function(raw_close)?))?;
        Ok(Self {
            registry: WeakRegistry::new(lua)?,
            pcall: lua.create_registry_value(pcall)?,
            session_methods: lua.create_registry_value(session_methods)?,
        })
    }

    /// The `pcall` captured when the module was opened.
    pub fn protected_call(&self, lua: &Lua) -> mlua::Result<Function> {
        lua.registry_value(&self.pcall)
    }

    pub fn session_method(&self, lua: &Lua, name: &str) -> mlua::Result<Function> {
        lua.registry_value::<Table>(&self.session_methods)?.get(name)
    }
}

/// Bridge state of `lua`, or [`Error::NotLoaded`].
pub(crate) fn bridge(lua: &Lua) -> Result<AppDataRef<'_, BridgeState>> {
    lua.app_data_ref::<BridgeState>().ok_or(Error::NotLoaded)
}

/// Build the `lolhtml` module table for `lua`.
pub fn open(lua: &Lua) -> mlua::Result<Table> {
    let _ = env_logger::try_init();

    if lua.app_data_ref::<BridgeState>().is_some() {
        return Err(Error::AlreadyLoaded.into());
    }
    lua.set_app_data(BridgeState::new(lua)?);

    let module = lua.create_table()?;
    module.set("new_rewriter_builder", lua.create_function(new_rewriter_builder)?)?;
    module.set("new_selector", lua.create_function(new_selector)?)?;
    module.set("new_rewriter", lua.create_function(new_rewriter)?)?;
    module.set("CONTINUE", CONTINUE)?;
    module.set("STOP", STOP)?;
    log::debug!("lolhtml {} loaded", env!("CARGO_PKG_VERSION"));
    Ok(module)
}

#[cfg(feature = "module")]
#[mlua::lua_module]
fn lolhtml(lua: &Lua) -> mlua::Result<Table> {
    open(lua)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_exports() {
        let lua = Lua::new();
        let module = open(&lua).unwrap();
        assert_eq!(module.get::<i64>("CONTINUE").unwrap(), 0);
        assert_eq!(module.get::<i64>("STOP").unwrap(), 1);
        for name in ["new_rewriter_builder", "new_selector", "new_rewriter"] {
            assert!(module.get::<Function>(name).is_ok(), "{name}");
        }
    }

    #[test]
    fn test_open_twice_fails() {
        let lua = Lua::new();
        open(&lua).unwrap();
        let err = open(&lua).unwrap_err();
        assert!(err.to_string().contains("the library is already loaded"));
    }

    #[test]
    fn test_bridge_requires_open() {
        let lua = Lua::new();
        assert!(matches!(bridge(&lua), Err(Error::NotLoaded)));
        open(&lua).unwrap();
        assert!(bridge(&lua).is_ok());
    }
}
