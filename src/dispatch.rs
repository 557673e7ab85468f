//! Handler registration and dispatch
//!
//! A [`Registration`] is what lol_html's handler closures capture: the slot of
//! the owning builder plus the anchor index of the Lua callback inside that
//! builder's user value table. When the engine fires, [`dispatch`] resolves
//! the callback, lends the engine object through a transient handle, calls the
//! callback under `pcall` and turns the result into a [`Directive`].
//!
//! Failures never unwind through the engine. They are parked in the
//! [`DispatchContext`] and the engine is told to abort; the session picks the
//! parked failure up once `write`/`end` returns.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use lol_html::errors::RewritingError;
use lol_html::{HandlerResult, OutputSink};
use mlua::{Lua, Table, UserData, Value};

use crate::error::{Error, Failure, Result};
use crate::ffi::bridge;
use crate::handle::{Native, TransientHandle};
use crate::registry::{Slot, WeakRegistry};

/// Host-visible value of the continue sentinel
pub const CONTINUE: i64 = 0;
/// Host-visible value of the stop sentinel
pub const STOP: i64 = 1;

/// What the engine should do after a handler returns
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Directive {
    Continue,
    Stop,
}

impl Directive {
    /// Interpret a handler's return value.
    ///
    /// `nil` means continue; numbers must equal one of the two sentinels.
    pub fn from_return(value: &Value) -> Result<Self> {
        match value {
            Value::Nil => Ok(Directive::Continue),
            Value::Integer(code) => Self::from_code(*code),
            Value::Number(code) if code.fract() == 0.0 => Self::from_code(*code as i64),
            Value::Number(code) => Err(Error::InvalidHandlerReturn(format!("number {code}"))),
            other => Err(Error::InvalidHandlerReturn(other.type_name().to_string())),
        }
    }

    fn from_code(code: i64) -> Result<Self> {
        match code {
            CONTINUE => Ok(Directive::Continue),
            STOP => Ok(Directive::Stop),
            other => Err(Error::InvalidHandlerReturn(format!("number {other}"))),
        }
    }
}

/// Document construct a handler is registered for
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    Doctype,
    Comment,
    Text,
    Element,
    DocEnd,
}

impl EventKind {
    /// Field of the handler table that carries the callback for this event.
    pub fn field_name(self) -> &'static str {
        match self {
            EventKind::Doctype => "doctype_handler",
            EventKind::Comment => "comment_handler",
            EventKind::Text => "text_handler",
            EventKind::Element => "element_handler",
            EventKind::DocEnd => "doc_end_handler",
        }
    }
}

/// Index of a callback inside its builder's anchor table (1-indexed)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Anchor(pub u32);

/// Token captured by an engine handler closure
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Registration {
    pub kind: EventKind,
    pub builder: Slot,
    pub anchor: Anchor,
}

impl Registration {
    /// Find the Lua callback this registration points at.
    fn callback(&self, lua: &Lua, registry: &WeakRegistry) -> Result<Value> {
        let Some(Value::UserData(builder)) = registry.resolve(lua, self.builder)? else {
            log::warn!(
                "dispatch: builder {} was collected while its {:?} handler was registered",
                self.builder,
                self.kind
            );
            return Err(Error::MissingRegistryEntry(self.builder));
        };
        let anchors: Table = builder.user_value()?;
        match anchors.raw_get::<Value>(self.anchor.0)? {
            Value::Nil => Err(Error::MissingRegistryEntry(self.builder)),
            callback => Ok(callback),
        }
    }
}

/// Returned to the engine when a handler asked it to stop.
#[derive(Debug, thiserror::Error)]
#[error("the rewriter has been stopped")]
struct Stopped;

/// Returned to the engine when the real failure is parked in the context.
#[derive(Debug, thiserror::Error)]
#[error("a handler failed")]
struct Aborted;

/// State shared by one session and every closure it handed to the engine
#[derive(Default)]
pub struct DispatchContext {
    lua: RefCell<Option<Lua>>,
    session: Cell<Slot>,
    failure: RefCell<Option<Failure>>,
    dispatched: Cell<u64>,
}

impl DispatchContext {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    /// Make `lua` available to callbacks until the returned guard drops.
    pub fn enter(self: &Rc<Self>, lua: &Lua) -> ActiveCall {
        let previous = self.lua.replace(Some(lua.clone()));
        ActiveCall {
            ctx: Rc::clone(self),
            previous,
        }
    }

    fn lua(&self) -> Result<Lua> {
        self.lua.borrow().clone().ok_or(Error::NoActiveCall)
    }

    pub fn set_session(&self, slot: Slot) {
        self.session.set(slot);
    }

    /// Number of handler invocations so far.
    pub fn dispatched(&self) -> u64 {
        self.dispatched.get()
    }

    pub fn has_failed(&self) -> bool {
        self.failure.borrow().is_some()
    }

    /// Park `failure`; only the first one is kept.
    fn fail(&self, failure: Failure) {
        let mut parked = self.failure.borrow_mut();
        if parked.is_none() {
            log::debug!("dispatch: parking failure: {failure}");
            *parked = Some(failure);
        }
    }

    /// Combine the engine's own outcome with any parked failure.
    ///
    /// A parked failure wins: the engine only saw [`Aborted`], or nothing at
    /// all when the sink was the one that failed.
    pub fn settle(&self, outcome: std::result::Result<(), RewritingError>) -> Result<(), Failure> {
        if let Some(failure) = self.failure.borrow_mut().take() {
            return Err(failure);
        }
        outcome.map_err(|err| Failure::Bridge(Error::Engine(err.to_string())))
    }

    fn emit(&self, chunk: &[u8]) -> Result<(), Failure> {
        let lua = self.lua()?;
        let bridge = bridge(&lua)?;
        let slot = self.session.get();
        let Some(Value::UserData(session)) = bridge.registry.resolve(&lua, slot)? else {
            log::warn!("sink: session {slot} is no longer registered");
            return Err(Error::MissingRegistryEntry(slot).into());
        };
        let anchors: Table = session.user_value()?;
        let sink: Value = anchors.raw_get("sink")?;
        let chunk = lua.create_string(chunk)?;
        let (ok, raised): (bool, Value) = bridge.protected_call(&lua)?.call((sink, chunk))?;
        if ok {
            Ok(())
        } else {
            Err(Failure::Host(raised))
        }
    }
}

/// Guard returned by [`DispatchContext::enter`]
pub struct ActiveCall {
    ctx: Rc<DispatchContext>,
    previous: Option<Lua>,
}

impl Drop for ActiveCall {
    fn drop(&mut self) {
        *self.ctx.lua.borrow_mut() = self.previous.take();
    }
}

/// Run the Lua callback for `registration` against `target`.
///
/// `wrap` builds the Lua userdata exposing the handle to the callback.
pub fn dispatch<T, U>(
    ctx: &DispatchContext,
    registration: Registration,
    target: &mut T,
    wrap: fn(TransientHandle) -> U,
) -> HandlerResult
where
    T: Native,
    U: UserData + 'static,
{
    if ctx.has_failed() {
        return Err(Box::new(Aborted));
    }
    ctx.dispatched.set(ctx.dispatched.get() + 1);
    match invoke(ctx, registration, target, wrap) {
        Ok(Directive::Continue) => Ok(()),
        Ok(Directive::Stop) => {
            log::debug!("dispatch: {:?} handler requested stop", registration.kind);
            Err(Box::new(Stopped))
        }
        Err(failure) => {
            ctx.fail(failure);
            Err(Box::new(Aborted))
        }
    }
}

fn invoke<T, U>(
    ctx: &DispatchContext,
    registration: Registration,
    target: &mut T,
    wrap: fn(TransientHandle) -> U,
) -> Result<Directive, Failure>
where
    T: Native,
    U: UserData + 'static,
{
    let lua = ctx.lua()?;
    let bridge = bridge(&lua)?;
    let callback = registration.callback(&lua, &bridge.registry)?;
    let pcall = bridge.protected_call(&lua)?;

    let (ok, returned): (bool, Value) = TransientHandle::scope(target, |handle| {
        let handle = lua.create_userdata(wrap(handle))?;
        pcall.call::<(bool, Value)>((callback, handle))
    })?;

    if !ok {
        return Err(Failure::Host(returned));
    }
    Ok(Directive::from_return(&returned)?)
}

/// Output sink forwarding every produced chunk to the session's Lua sink
pub struct HostSink {
    ctx: Rc<DispatchContext>,
}

impl HostSink {
    pub fn new(ctx: Rc<DispatchContext>) -> Self {
        Self { ctx }
    }
}

impl OutputSink for HostSink {
    fn handle_chunk(&mut self, chunk: &[u8]) {
        // The engine signals the end of output with an empty chunk.
        if chunk.is_empty() || self.ctx.has_failed() {
            return;
        }
        if let Err(failure) = self.ctx.emit(chunk) {
            self.ctx.fail(failure);
        }
    }
}
