//! Element handle and its attribute iterator

use std::collections::VecDeque;

use lol_html::html_content::Element;
use mlua::{AnyUserData, MetaMethod, MultiValue, String as LuaString, UserData, UserDataMethods};

use super::{
    add_action, add_getter, add_insertion, add_setter, add_tostring, self_or_err, Transient,
};
use crate::error::{Error, Result};
use crate::handle::{HandleKind, TransientHandle};

type El = Element<'static, 'static>;

/// Element lent to an `element_handler`
pub struct LuaElement(TransientHandle);

impl LuaElement {
    pub fn new(handle: TransientHandle) -> Self {
        Self(handle)
    }
}

impl Transient for LuaElement {
    fn handle(&self) -> &TransientHandle {
        &self.0
    }
}

impl UserData for LuaElement {
    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        add_getter(methods, "get_tag_name", |el: &mut El| el.tag_name());
        add_setter(methods, "set_tag_name", |el: &mut El, name| {
            el.set_tag_name(name).map_err(|err| err.to_string())
        });
        add_getter(methods, "get_namespace_uri", |el: &mut El| el.namespace_uri());
        add_getter(methods, "is_self_closing", |el: &mut El| el.is_self_closing());
        add_getter(methods, "can_have_content", |el: &mut El| el.can_have_content());

        methods.add_method("has_attribute", |_, this, name: String| {
            Ok(this.0.with(|el: &mut El| el.has_attribute(&name))?)
        });
        methods.add_method("get_attribute", |_, this, name: String| {
            Ok(this.0.with(|el: &mut El| el.get_attribute(&name))?)
        });
        methods.add_function(
            "set_attribute",
            |_, (ud, name, value): (AnyUserData, LuaString, LuaString)| {
                let outcome = match (name.to_str(), value.to_str()) {
                    (Ok(name), Ok(value)) => ud.borrow::<Self>()?.0.with(|el: &mut El| {
                        el.set_attribute(&name, &value)
                            .map_err(|err| err.to_string())
                    })?,
                    _ => Err(Error::InvalidUtf8.to_string()),
                };
                Ok(self_or_err(ud, outcome))
            },
        );
        methods.add_function("remove_attribute", |_, (ud, name): (AnyUserData, String)| {
            ud.borrow::<Self>()?
                .0
                .with(|el: &mut El| el.remove_attribute(&name))?;
            Ok(ud)
        });
        methods.add_method("attributes", |_, this, ()| {
            Ok(LuaAttributes::snapshot(&this.0)?)
        });

        add_insertion(methods, "before", |el: &mut El, content, ty| el.before(content, ty));
        add_insertion(methods, "after", |el: &mut El, content, ty| el.after(content, ty));
        add_insertion(methods, "prepend", |el: &mut El, content, ty| el.prepend(content, ty));
        add_insertion(methods, "append", |el: &mut El, content, ty| el.append(content, ty));
        add_insertion(methods, "set_inner_content", |el: &mut El, content, ty| {
            el.set_inner_content(content, ty)
        });
        add_insertion(methods, "replace", |el: &mut El, content, ty| el.replace(content, ty));
        add_action(methods, "remove", |el: &mut El| el.remove());
        add_action(methods, "remove_and_keep_content", |el: &mut El| {
            el.remove_and_keep_content()
        });
        add_getter(methods, "is_removed", |el: &mut El| el.removed());
        add_tostring(methods);
    }
}

/// Iterator over an element's attributes
///
/// Walks a snapshot taken when the iterator is created, so attribute changes
/// made while iterating neither skip nor repeat pairs. Shares the element's
/// handle and expires together with the element.
pub struct LuaAttributes {
    element: TransientHandle,
    pending: VecDeque<(String, String)>,
}

impl LuaAttributes {
    fn snapshot(element: &TransientHandle) -> Result<Self> {
        let pending: VecDeque<_> = element.with(|el: &mut El| {
            el.attributes()
                .iter()
                .map(|attr| (attr.name(), attr.value()))
                .collect()
        })?;
        Ok(Self {
            element: element.clone(),
            pending,
        })
    }

    /// Next `(name, value)` pair, or `None` at the end.
    pub fn advance(&mut self) -> Result<Option<(String, String)>> {
        if !self.element.is_valid() {
            return Err(Error::UseAfterLifetime {
                kind: HandleKind::AttributeIterator,
            });
        }
        Ok(self.pending.pop_front())
    }

    fn next_pair(&mut self) -> mlua::Result<(Option<String>, Option<String>)> {
        Ok(match self.advance()? {
            Some((name, value)) => (Some(name), Some(value)),
            None => (None, None),
        })
    }
}

impl UserData for LuaAttributes {
    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        methods.add_method_mut("next", |_, this, ()| this.next_pair());
        // Lets the iterator drive a generic `for` directly.
        methods.add_meta_method_mut(MetaMethod::Call, |_, this, _: MultiValue| this.next_pair());
        methods.add_meta_method(MetaMethod::ToString, |_, this, ()| {
            let state = if this.element.is_valid() { "live" } else { "expired" };
            Ok(format!(
                "{} ({state})",
                HandleKind::AttributeIterator.type_name()
            ))
        });
    }
}
