//! Rewriter sessions exposed to Lua
//!
//! `write` and `close` are thin Lua wrappers (see [`crate::ffi`]) around
//! [`raw_write`] and [`raw_close`], which report their outcome as
//! `(ok, result, message)`. The wrapper re-raises host errors itself, so the
//! original error value reaches the caller without passing through a Rust
//! error type.

use std::cell::RefCell;
use std::rc::Rc;

use lol_html::{HtmlRewriter, Settings};
use mlua::{
    AnyUserData, FromLua, Lua, MetaMethod, String as LuaString, Table, UserData, UserDataFields,
    UserDataMethods, Value,
};

use crate::builder::{is_callable, LuaBuilder};
use crate::dispatch::{DispatchContext, HostSink};
use crate::error::{Error, Failure, Result};
use crate::ffi::bridge;
use crate::options::RewriterOptions;
use crate::registry::Slot;
use crate::session::{Engine, Session, SessionState};

/// lol_html rewriter paired with the context its handlers report into
pub struct LolEngine {
    rewriter: HtmlRewriter<'static, HostSink>,
    ctx: Rc<DispatchContext>,
}

impl Engine for LolEngine {
    fn write(&mut self, chunk: &[u8]) -> Result<(), Failure> {
        let outcome = self.rewriter.write(chunk);
        self.ctx.settle(outcome)
    }

    fn end(self) -> Result<(), Failure> {
        let outcome = self.rewriter.end();
        self.ctx.settle(outcome)
    }
}

/// Rewriter session userdata
pub struct LuaRewriter {
    session: RefCell<Session<LolEngine>>,
    ctx: Rc<DispatchContext>,
    slot: Slot,
}

impl LuaRewriter {
    pub fn state(&self) -> Option<SessionState> {
        self.session.try_borrow().ok().map(|session| session.state())
    }

    pub fn slot(&self) -> Slot {
        self.slot
    }

    /// Number of handler invocations made by this session so far.
    pub fn dispatched(&self) -> u64 {
        self.ctx.dispatched()
    }

    /// Run `f` against the session with `lua` made available to handlers.
    fn run(
        &self,
        lua: &Lua,
        f: impl FnOnce(&mut Session<LolEngine>) -> Result<(), Failure>,
    ) -> Result<Result<(), Failure>> {
        let mut session = self
            .session
            .try_borrow_mut()
            .map_err(|_| Error::Reentered)?;
        let outcome = {
            let _active = self.ctx.enter(lua);
            f(&mut *session)
        };
        if session.state() != SessionState::Healthy {
            bridge(lua)?.registry.release(lua, self.slot)?;
        }
        Ok(outcome)
    }
}

impl Drop for LuaRewriter {
    fn drop(&mut self) {
        log::trace!("rewriter {}: freed", self.slot);
    }
}

/// Translate a session outcome into the `(ok, result, message)` triple.
fn respond(lua: &Lua, ud: AnyUserData, outcome: Result<(), Failure>) -> mlua::Result<(bool, Value, Value)> {
    match outcome {
        Ok(()) => Ok((true, Value::UserData(ud), Value::Nil)),
        Err(Failure::Host(raised)) => Ok((false, raised, Value::Nil)),
        Err(Failure::Bridge(err @ (Error::Engine(_) | Error::SessionEnded))) => {
            let message = lua.create_string(err.to_string())?;
            Ok((true, Value::Nil, Value::String(message)))
        }
        Err(Failure::Bridge(err)) => Err(err.into()),
    }
}

pub(crate) fn raw_write(
    lua: &Lua,
    (ud, chunk): (AnyUserData, LuaString),
) -> mlua::Result<(bool, Value, Value)> {
    let outcome = ud
        .borrow::<LuaRewriter>()?
        .run(lua, |session| session.write(&chunk.as_bytes()))?;
    respond(lua, ud, outcome)
}

pub(crate) fn raw_close(lua: &Lua, ud: AnyUserData) -> mlua::Result<(bool, Value, Value)> {
    let outcome = ud.borrow::<LuaRewriter>()?.run(lua, Session::end)?;
    respond(lua, ud, outcome)
}

impl UserData for LuaRewriter {
    fn add_fields<F: UserDataFields<Self>>(fields: &mut F) {
        fields.add_field_function_get("write", |lua, _| bridge(lua)?.session_method(lua, "write"));
        fields.add_field_function_get("close", |lua, _| bridge(lua)?.session_method(lua, "close"));
    }

    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        methods.add_method("state", |_, this, ()| {
            Ok(this.state().map_or("running".to_string(), |state| state.to_string()))
        });

        #[cfg(feature = "lua54")]
        methods.add_meta_method(MetaMethod::Close, |lua, this, _: Value| {
            if let Ok(mut session) = this.session.try_borrow_mut() {
                session.dispose();
                bridge(lua)?.registry.release(lua, this.slot)?;
            }
            Ok(())
        });

        methods.add_meta_method(MetaMethod::ToString, |_, this, ()| {
            let state = this.state().map_or("running".to_string(), |state| state.to_string());
            Ok(format!("lolhtml.rewriter ({state})"))
        });
    }
}

/// `lolhtml.new_rewriter(options)`: the session, or `nil, message`.
pub fn new_rewriter(lua: &Lua, table: Table) -> mlua::Result<(Option<AnyUserData>, Option<String>)> {
    let options = RewriterOptions::from_lua(Value::Table(table.clone()), lua)?;

    let builder = match table.get::<Value>("builder")? {
        Value::UserData(ud) if ud.is::<LuaBuilder>() => ud,
        other => return Err(Error::NotABuilder(other.type_name()).into()),
    };
    let sink: Value = table.get("sink")?;
    if !is_callable(&sink) {
        return Err(Error::NotCallable("sink".to_string()).into());
    }

    let settings = options.encoding().and_then(|encoding| {
        let memory_settings = options.memory_settings()?;
        Ok((encoding, memory_settings))
    });
    let (encoding, memory_settings) = match settings {
        Ok(settings) => settings,
        Err(err) => return Ok((None, Some(err.to_string()))),
    };

    let (builder_slot, registrations) = {
        let mut this = builder.borrow_mut::<LuaBuilder>()?;
        match this.consume() {
            Ok(registrations) => (this.slot(), registrations),
            Err(err) => return Ok((None, Some(err.to_string()))),
        }
    };

    let ctx = DispatchContext::new();
    let settings = Settings {
        element_content_handlers: registrations.element_handlers(builder_slot, &ctx),
        document_content_handlers: registrations
            .document_handlers(builder_slot, &ctx)
            .into_iter()
            .collect(),
        encoding,
        memory_settings,
        strict: options.strict,
        ..Settings::new()
    };
    let engine = LolEngine {
        rewriter: HtmlRewriter::new(settings, HostSink::new(Rc::clone(&ctx))),
        ctx: Rc::clone(&ctx),
    };

    let anchors = lua.create_table()?;
    anchors.raw_set("sink", sink)?;
    // The session keeps its builder, and so every callback, alive.
    anchors.raw_set("builder", builder)?;

    let ud = lua.create_userdata(LuaRewriter {
        session: RefCell::new(Session::new(engine)),
        ctx: Rc::clone(&ctx),
        slot: Slot::NONE,
    })?;
    ud.set_user_value(anchors)?;
    let slot = bridge(lua)?.registry.register(lua, ud.clone())?;
    ud.borrow_mut::<LuaRewriter>()?.slot = slot;
    ctx.set_session(slot);

    log::debug!(
        "rewriter {slot}: built from builder {builder_slot} ({} handler(s), encoding {})",
        registrations.handler_count(),
        options.encoding
    );
    Ok((Some(ud), None))
}
