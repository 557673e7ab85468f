//! Builder and selector lifecycle
//!
//! A builder collects handler registrations until a rewriter is built from
//! it. Callbacks are never rooted from Rust: they sit in a Lua table stored as
//! the builder userdata's user value, and the Rust side only records
//! [`Registration`] tokens pointing into that table. Building consumes the
//! registrations; the builder userdata itself stays alive as long as the
//! rewriter, which anchors it.

use std::borrow::Cow;
use std::rc::Rc;

use lol_html::html_content::{Comment, Doctype, DocumentEnd, Element, TextChunk};
use lol_html::{DocumentContentHandlers, ElementContentHandlers, Selector};
use mlua::{AnyUserData, Lua, MetaMethod, Table, UserData, UserDataMethods, Value};

use crate::content::{LuaComment, LuaDocEnd, LuaDoctype, LuaElement, LuaTextChunk};
use crate::dispatch::{dispatch, Anchor, DispatchContext, EventKind, Registration};
use crate::error::{Error, Result};
use crate::ffi::bridge;
use crate::registry::Slot;

// ============================================================================
// Selectors
// ============================================================================

/// Compiled selector shared between every builder it is handed to
pub struct LuaSelector {
    source: String,
    compiled: Rc<Selector>,
}

impl LuaSelector {
    pub fn parse(source: &str) -> Result<Self> {
        let compiled = source
            .parse::<Selector>()
            .map_err(|err| Error::Engine(err.to_string()))?;
        Ok(Self {
            source: source.to_owned(),
            compiled: Rc::new(compiled),
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }
}

impl UserData for LuaSelector {
    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        methods.add_meta_method(MetaMethod::ToString, |_, this, ()| {
            Ok(format!("lolhtml.selector ({})", this.source))
        });
    }
}

/// `lolhtml.new_selector(source)`: the selector, or `nil, message`.
pub fn new_selector(_: &Lua, source: String) -> mlua::Result<(Option<LuaSelector>, Option<String>)> {
    match LuaSelector::parse(&source) {
        Ok(selector) => Ok((Some(selector), None)),
        Err(err) => Ok((None, Some(err.to_string()))),
    }
}

// ============================================================================
// Registrations
// ============================================================================

/// Document-wide handlers; at most one per event kind
#[derive(Debug, Default)]
struct DocumentHandlers {
    doctype: Option<Anchor>,
    comment: Option<Anchor>,
    text: Option<Anchor>,
    doc_end: Option<Anchor>,
}

impl DocumentHandlers {
    fn slot_mut(&mut self, kind: EventKind) -> Option<&mut Option<Anchor>> {
        match kind {
            EventKind::Doctype => Some(&mut self.doctype),
            EventKind::Comment => Some(&mut self.comment),
            EventKind::Text => Some(&mut self.text),
            EventKind::DocEnd => Some(&mut self.doc_end),
            EventKind::Element => None,
        }
    }
}

/// Handlers scoped to the matches of one selector
struct ElementHandlers {
    selector: Rc<Selector>,
    element: Option<Anchor>,
    comment: Option<Anchor>,
    text: Option<Anchor>,
}

/// Everything a builder has accumulated
#[derive(Default)]
pub struct Registrations {
    document: DocumentHandlers,
    elements: Vec<ElementHandlers>,
    anchors: u32,
}

impl Registrations {
    fn next_anchor(&mut self) -> Anchor {
        self.anchors += 1;
        Anchor(self.anchors)
    }

    /// Number of callbacks currently registered.
    pub fn handler_count(&self) -> usize {
        let doc = &self.document;
        let document = [doc.doctype, doc.comment, doc.text, doc.doc_end]
            .iter()
            .flatten()
            .count();
        let elements: usize = self
            .elements
            .iter()
            .map(|e| [e.element, e.comment, e.text].iter().flatten().count())
            .sum();
        document + elements
    }

    /// Build the engine's document handlers, dispatching through `ctx`.
    ///
    /// Event kinds without a callback get no engine handler at all, so the
    /// engine never calls back for them.
    pub fn document_handlers(
        &self,
        builder: Slot,
        ctx: &Rc<DispatchContext>,
    ) -> Option<DocumentContentHandlers<'static>> {
        let doc = &self.document;
        if doc.doctype.is_none() && doc.comment.is_none() && doc.text.is_none() && doc.doc_end.is_none() {
            return None;
        }
        let token = |kind, anchor| Registration {
            kind,
            builder,
            anchor,
        };
        let mut handlers = DocumentContentHandlers::default();
        if let Some(anchor) = doc.doctype {
            let (ctx, reg) = (Rc::clone(ctx), token(EventKind::Doctype, anchor));
            handlers = handlers.doctype(move |doctype: &mut Doctype<'_>| {
                dispatch(&ctx, reg, doctype, LuaDoctype::new)
            });
        }
        if let Some(anchor) = doc.comment {
            let (ctx, reg) = (Rc::clone(ctx), token(EventKind::Comment, anchor));
            handlers = handlers.comments(move |comment: &mut Comment<'_>| {
                dispatch(&ctx, reg, comment, LuaComment::new)
            });
        }
        if let Some(anchor) = doc.text {
            let (ctx, reg) = (Rc::clone(ctx), token(EventKind::Text, anchor));
            handlers = handlers.text(move |chunk: &mut TextChunk<'_>| {
                dispatch(&ctx, reg, chunk, LuaTextChunk::new)
            });
        }
        if let Some(anchor) = doc.doc_end {
            let (ctx, reg) = (Rc::clone(ctx), token(EventKind::DocEnd, anchor));
            handlers = handlers.end(move |end: &mut DocumentEnd<'_>| {
                dispatch(&ctx, reg, end, LuaDocEnd::new)
            });
        }
        Some(handlers)
    }

    /// Build the engine's selector-scoped handlers, in registration order.
    pub fn element_handlers(
        &self,
        builder: Slot,
        ctx: &Rc<DispatchContext>,
    ) -> Vec<(Cow<'static, Selector>, ElementContentHandlers<'static>)> {
        self.elements
            .iter()
            .map(|scoped| {
                let token = |kind, anchor| Registration {
                    kind,
                    builder,
                    anchor,
                };
                let mut handlers = ElementContentHandlers::default();
                if let Some(anchor) = scoped.element {
                    let (ctx, reg) = (Rc::clone(ctx), token(EventKind::Element, anchor));
                    handlers = handlers.element(move |el: &mut Element<'_, '_>| {
                        dispatch(&ctx, reg, el, LuaElement::new)
                    });
                }
                if let Some(anchor) = scoped.comment {
                    let (ctx, reg) = (Rc::clone(ctx), token(EventKind::Comment, anchor));
                    handlers = handlers.comments(move |comment: &mut Comment<'_>| {
                        dispatch(&ctx, reg, comment, LuaComment::new)
                    });
                }
                if let Some(anchor) = scoped.text {
                    let (ctx, reg) = (Rc::clone(ctx), token(EventKind::Text, anchor));
                    handlers = handlers.text(move |chunk: &mut TextChunk<'_>| {
                        dispatch(&ctx, reg, chunk, LuaTextChunk::new)
                    });
                }
                (Cow::Owned(Selector::clone(&scoped.selector)), handlers)
            })
            .collect()
    }
}

// ============================================================================
// Builder
// ============================================================================

enum BuilderState {
    Open(Registrations),
    Consumed,
}

/// Rewriter builder exposed to Lua
pub struct LuaBuilder {
    slot: Slot,
    state: BuilderState,
}

impl LuaBuilder {
    pub fn slot(&self) -> Slot {
        self.slot
    }

    pub fn is_consumed(&self) -> bool {
        matches!(self.state, BuilderState::Consumed)
    }

    fn registrations_mut(&mut self) -> Result<&mut Registrations> {
        match &mut self.state {
            BuilderState::Open(registrations) => Ok(registrations),
            BuilderState::Consumed => Err(Error::BuilderConsumed),
        }
    }

    /// Hand the registrations over to a rewriter. The builder becomes inert.
    pub fn consume(&mut self) -> Result<Registrations> {
        match std::mem::replace(&mut self.state, BuilderState::Consumed) {
            BuilderState::Open(registrations) => {
                log::debug!(
                    "builder {}: consumed with {} handler(s)",
                    self.slot,
                    registrations.handler_count()
                );
                Ok(registrations)
            }
            BuilderState::Consumed => Err(Error::BuilderConsumed),
        }
    }
}

impl Drop for LuaBuilder {
    fn drop(&mut self) {
        log::trace!("builder {}: freed", self.slot);
    }
}

/// `lolhtml.new_rewriter_builder()`
pub fn new_rewriter_builder(lua: &Lua, (): ()) -> mlua::Result<AnyUserData> {
    let ud = lua.create_userdata(LuaBuilder {
        slot: Slot::NONE,
        state: BuilderState::Open(Registrations::default()),
    })?;
    ud.set_user_value(lua.create_table()?)?;
    let slot = bridge(lua)?.registry.register(lua, ud.clone())?;
    ud.borrow_mut::<LuaBuilder>()?.slot = slot;
    log::debug!("builder {slot}: created");
    Ok(ud)
}

/// Whether `value` can be called from Lua.
pub(crate) fn is_callable(value: &Value) -> bool {
    let call = match value {
        Value::Function(_) => return true,
        Value::Table(table) => table
            .metatable()
            .and_then(|mt| mt.raw_get::<Value>("__call").ok()),
        Value::UserData(ud) => ud
            .metatable()
            .and_then(|mt| mt.get::<Value>("__call"))
            .ok(),
        _ => None,
    };
    call.is_some_and(|call| !call.is_nil())
}

/// Read the callbacks named by `kinds` out of a handler table.
///
/// Every present field is checked before anything is registered, so a bad
/// table leaves the builder untouched.
fn collect_callbacks(handlers: &Table, kinds: &[EventKind]) -> Result<Vec<(EventKind, Value)>> {
    let mut found = Vec::new();
    for &kind in kinds {
        let callback: Value = handlers.get(kind.field_name())?;
        if callback.is_nil() {
            continue;
        }
        if !is_callable(&callback) {
            return Err(Error::NotCallable(kind.field_name().to_owned()));
        }
        found.push((kind, callback));
    }
    Ok(found)
}

impl UserData for LuaBuilder {
    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        methods.add_function(
            "add_document_content_handlers",
            |_, (ud, handlers): (AnyUserData, Table)| {
                let callbacks = collect_callbacks(
                    &handlers,
                    &[
                        EventKind::Doctype,
                        EventKind::Comment,
                        EventKind::Text,
                        EventKind::DocEnd,
                    ],
                )?;
                let anchors: Table = ud.user_value()?;
                {
                    let mut this = ud.borrow_mut::<LuaBuilder>()?;
                    let slot = this.slot;
                    let registrations = this.registrations_mut()?;
                    for (kind, callback) in callbacks {
                        // Registering the same kind again replaces the callback in place.
                        let anchor = match registrations.document.slot_mut(kind).and_then(|s| *s) {
                            Some(anchor) => anchor,
                            None => registrations.next_anchor(),
                        };
                        if let Some(entry) = registrations.document.slot_mut(kind) {
                            *entry = Some(anchor);
                        }
                        anchors.raw_set(anchor.0, callback)?;
                        log::debug!("builder {slot}: document {kind:?} handler registered");
                    }
                }
                Ok(ud)
            },
        );

        methods.add_function(
            "add_element_content_handlers",
            |_, (ud, selector, handlers): (AnyUserData, Value, Table)| {
                let selector = match selector {
                    Value::UserData(selector) => {
                        Rc::clone(&selector.borrow::<LuaSelector>()?.compiled)
                    }
                    Value::String(source) => match LuaSelector::parse(&source.to_str()?) {
                        Ok(parsed) => parsed.compiled,
                        Err(err) => return Ok((None, Some(err.to_string()))),
                    },
                    other => return Err(Error::NotASelector(other.type_name()).into()),
                };
                let callbacks = collect_callbacks(
                    &handlers,
                    &[EventKind::Element, EventKind::Comment, EventKind::Text],
                )?;
                let anchors: Table = ud.user_value()?;
                {
                    let mut this = ud.borrow_mut::<LuaBuilder>()?;
                    let slot = this.slot;
                    let registrations = this.registrations_mut()?;
                    let mut scoped = ElementHandlers {
                        selector,
                        element: None,
                        comment: None,
                        text: None,
                    };
                    for (kind, callback) in callbacks {
                        let anchor = registrations.next_anchor();
                        match kind {
                            EventKind::Element => scoped.element = Some(anchor),
                            EventKind::Comment => scoped.comment = Some(anchor),
                            _ => scoped.text = Some(anchor),
                        }
                        anchors.raw_set(anchor.0, callback)?;
                    }
                    registrations.elements.push(scoped);
                    log::debug!(
                        "builder {slot}: element handlers registered ({} selector scope(s))",
                        registrations.elements.len()
                    );
                }
                Ok((Some(ud), None))
            },
        );

        methods.add_meta_method(MetaMethod::ToString, |_, this, ()| {
            let state = if this.is_consumed() { "consumed" } else { "open" };
            Ok(format!("lolhtml.builder ({state})"))
        });
    }
}
