//! Weak object registry
//!
//! Maps integer slots to Lua values without keeping those values alive.
//! Engine callbacks only carry a slot, so the bridge can find the builder or
//! session a callback belongs to without rooting it from Rust, which would
//! hide reference cycles from the Lua collector.
//!
//! The backing table lives in the Lua registry with `__mode = "v"`. An entry
//! disappears whenever its value is collected; this is only noticed lazily,
//! when [`WeakRegistry::resolve`] finds nothing.

use std::cell::Cell;
use std::fmt;

use mlua::{IntoLua, Lua, RegistryKey, Table, Value};

/// Registry slot (1-indexed, 0 = none)
///
/// Slots are handed out monotonically and never reused, so a stale slot can
/// only ever resolve to nothing, never to an unrelated value.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Slot(pub u64);

impl Slot {
    pub const NONE: Slot = Slot(0);

    pub fn is_valid(self) -> bool {
        self.0 != 0
    }

    fn key(self) -> i64 {
        self.0 as i64
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Weak-valued slot table owned by one Lua state
pub struct WeakRegistry {
    table: RegistryKey,
    next: Cell<u64>,
}

impl WeakRegistry {
    /// Create the backing weak table inside `lua`.
    pub fn new(lua: &Lua) -> mlua::Result<Self> {
        let table = lua.create_table()?;
        let mode = lua.create_table()?;
        mode.raw_set("__mode", "v")?;
        table.set_metatable(Some(mode));
        Ok(Self {
            table: lua.create_registry_value(table)?,
            next: Cell::new(1),
        })
    }

    fn table(&self, lua: &Lua) -> mlua::Result<Table> {
        lua.registry_value(&self.table)
    }

    /// Store `value` under a fresh slot.
    ///
    /// Only fails if the Lua state cannot allocate.
    pub fn register(&self, lua: &Lua, value: impl IntoLua) -> mlua::Result<Slot> {
        let slot = Slot(self.next.get());
        self.next.set(slot.0 + 1);
        self.table(lua)?.raw_set(slot.key(), value)?;
        log::trace!("registry: registered slot {slot}");
        Ok(slot)
    }

    /// Look up the value stored under `slot`.
    ///
    /// Returns `None` if the slot was released or its value was collected.
    pub fn resolve(&self, lua: &Lua, slot: Slot) -> mlua::Result<Option<Value>> {
        if !slot.is_valid() {
            return Ok(None);
        }
        match self.table(lua)?.raw_get::<Value>(slot.key())? {
            Value::Nil => Ok(None),
            value => Ok(Some(value)),
        }
    }

    /// Forget `slot`. Releasing twice, or releasing a collected slot, is a no-op.
    pub fn release(&self, lua: &Lua, slot: Slot) -> mlua::Result<()> {
        if slot.is_valid() {
            self.table(lua)?.raw_set(slot.key(), Value::Nil)?;
            log::trace!("registry: released slot {slot}");
        }
        Ok(())
    }
}
