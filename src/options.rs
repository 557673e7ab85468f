//! Rewriter configuration
//!
//! Decoded from the options table given to `lolhtml.new_rewriter`. Only the
//! engine settings live here; the `builder` and `sink` fields are host values
//! and are picked up by the rewriter constructor itself.

use encoding_rs::Encoding;
use lol_html::{AsciiCompatibleEncoding, MemorySettings};
use mlua::{FromLua, Lua, Table, Value};

use crate::error::{Error, Result};

/// Engine settings for one rewriter
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RewriterOptions {
    pub encoding: String,
    pub preallocated_parsing_buffer_size: usize,
    pub max_allowed_memory_usage: usize,
    pub strict: bool,
}

impl Default for RewriterOptions {
    fn default() -> Self {
        Self {
            encoding: "utf-8".to_string(),
            preallocated_parsing_buffer_size: 1024,
            max_allowed_memory_usage: usize::MAX,
            strict: false,
        }
    }
}

impl RewriterOptions {
    /// Resolve the encoding label. Only ASCII-compatible encodings can be
    /// streamed by the engine.
    pub fn encoding(&self) -> Result<AsciiCompatibleEncoding> {
        Encoding::for_label(self.encoding.as_bytes())
            .and_then(AsciiCompatibleEncoding::new)
            .ok_or_else(|| Error::UnsupportedEncoding(self.encoding.clone()))
    }

    /// The engine panics on a preallocation above the limit, so that case is
    /// rejected here.
    pub fn memory_settings(&self) -> Result<MemorySettings> {
        if self.preallocated_parsing_buffer_size > self.max_allowed_memory_usage {
            return Err(Error::PreallocationOverLimit {
                preallocated: self.preallocated_parsing_buffer_size,
                limit: self.max_allowed_memory_usage,
            });
        }
        let mut settings = MemorySettings::default();
        settings.preallocated_parsing_buffer_size = self.preallocated_parsing_buffer_size;
        settings.max_allowed_memory_usage = self.max_allowed_memory_usage;
        Ok(settings)
    }
}

fn size_field(table: &Table, name: &'static str) -> Result<Option<usize>> {
    let size = match table.get::<Value>(name)? {
        Value::Nil => return Ok(None),
        Value::Integer(size) => size,
        Value::Number(size) if size.fract() == 0.0 && size <= i64::MAX as f64 => size as i64,
        _ => return Err(Error::InvalidSize(name)),
    };
    usize::try_from(size)
        .map(Some)
        .map_err(|_| Error::InvalidSize(name))
}

impl FromLua for RewriterOptions {
    fn from_lua(value: Value, _: &Lua) -> mlua::Result<Self> {
        let table = match value {
            Value::Table(table) => table,
            other => return Err(Error::InvalidOptions(other.type_name()).into()),
        };
        let mut options = Self::default();
        if let Some(label) = table.get::<Option<String>>("encoding")? {
            options.encoding = label;
        }
        if let Some(size) = size_field(&table, "preallocated_parsing_buffer_size")? {
            options.preallocated_parsing_buffer_size = size;
        }
        if let Some(size) = size_field(&table, "max_allowed_memory_usage")? {
            options.max_allowed_memory_usage = size;
        }
        options.strict = table.get::<Option<bool>>("strict")?.unwrap_or(false);
        Ok(options)
    }
}
