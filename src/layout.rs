//! Declarative fixed-layout structure descriptors.
//!
//! Every structure the controller exchanges is a packed little-endian (with
//! the odd big-endian field) byte image.  Instead of hand-written offset
//! arithmetic per structure, each one is described once as a static
//! [`Layout`] and interpreted by the single [`decode`]/[`encode`] pair:
//!
//! ```text
//!  Layout { size: 6, fields: [ Field("flags", @0, U32 LE),
//!                              Field("step",  @4, U8),
//!                              Field("ready", @5, Bool) ] }
//!
//!  bytes ──decode──▶ Record { flags: Uint, step: Uint, ready: Bool }
//!  Record ──encode──▶ bytes   (unset bytes stay zero)
//! ```
//!
//! Decoding ignores trailing bytes beyond `size` (newer firmware may append
//! fields); undersized input is a [`ProtocolError::Undersized`].

use core::fmt;

use crate::error::ProtocolError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    Little,
    Big,
}

/// Wire representation of one field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    U8,
    U16,
    U32,
    I8,
    I16,
    I32,
    F32,
    Bool,
    /// NUL-padded UTF-8 of fixed width.
    Text(usize),
}

impl FieldKind {
    pub const fn width(self) -> usize {
        match self {
            Self::U8 | Self::I8 | Self::Bool => 1,
            Self::U16 | Self::I16 => 2,
            Self::U32 | Self::I32 | Self::F32 => 4,
            Self::Text(len) => len,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field {
    pub name: &'static str,
    pub offset: usize,
    pub kind: FieldKind,
    pub endian: Endian,
}

impl Field {
    pub const fn le(name: &'static str, offset: usize, kind: FieldKind) -> Self {
        Self {
            name,
            offset,
            kind,
            endian: Endian::Little,
        }
    }

    pub const fn be(name: &'static str, offset: usize, kind: FieldKind) -> Self {
        Self {
            name,
            offset,
            kind,
            endian: Endian::Big,
        }
    }

    pub const fn end(&self) -> usize {
        self.offset + self.kind.width()
    }
}

/// A fixed-size structure description.
#[derive(Debug, PartialEq, Eq)]
pub struct Layout {
    pub name: &'static str,
    pub size: usize,
    pub fields: &'static [Field],
}

impl Layout {
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Every field inside `size`, none overlapping.
    pub fn is_well_formed(&self) -> bool {
        let mut spans: Vec<(usize, usize)> =
            self.fields.iter().map(|f| (f.offset, f.end())).collect();
        spans.sort_unstable();
        spans.iter().all(|&(_, end)| end <= self.size) && spans.windows(2).all(|w| w[0].1 <= w[1].0)
    }
}

/// A decoded field value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Uint(u32),
    Int(i32),
    Float(f32),
    Bool(bool),
    Text(String),
}

impl Value {
    pub fn as_u32(&self) -> Option<u32> {
        match self {
            Self::Uint(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f32(&self) -> Option<f32> {
        match self {
            Self::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uint(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v:.2}"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Text(v) => write!(f, "\"{v}\""),
        }
    }
}

/// Field values of one decoded structure, in layout order.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    layout: &'static Layout,
    values: Vec<Value>,
}

impl Record {
    /// All-zero record (what `decode` yields for a zeroed image).
    pub fn zeroed(layout: &'static Layout) -> Self {
        let values = layout.fields.iter().map(|f| zero_value(f.kind)).collect();
        Self { layout, values }
    }

    pub fn layout(&self) -> &'static Layout {
        self.layout
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        let index = self.layout.fields.iter().position(|f| f.name == name)?;
        self.values.get(index)
    }

    pub fn uint(&self, name: &str) -> Option<u32> {
        self.get(name).and_then(Value::as_u32)
    }

    pub fn text(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(Value::as_text)
    }

    /// Replace a field. The value must match the field's kind.
    pub fn set(&mut self, name: &str, value: Value) -> Result<(), ProtocolError> {
        let Some(index) = self.layout.fields.iter().position(|f| f.name == name) else {
            return Err(ProtocolError::FieldMismatch("unknown field"));
        };
        let field = &self.layout.fields[index];
        if core::mem::discriminant(&zero_value(field.kind)) != core::mem::discriminant(&value) {
            return Err(ProtocolError::FieldMismatch(field.name));
        }
        self.values[index] = value;
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &Value)> {
        self.layout.fields.iter().map(|f| f.name).zip(self.values.iter())
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {{", self.layout.name)?;
        for (i, (name, value)) in self.iter().enumerate() {
            let sep = if i == 0 { " " } else { ", " };
            write!(f, "{sep}{name}: {value}")?;
        }
        write!(f, " }}")
    }
}

fn zero_value(kind: FieldKind) -> Value {
    match kind {
        FieldKind::U8 | FieldKind::U16 | FieldKind::U32 => Value::Uint(0),
        FieldKind::I8 | FieldKind::I16 | FieldKind::I32 => Value::Int(0),
        FieldKind::F32 => Value::Float(0.0),
        FieldKind::Bool => Value::Bool(false),
        FieldKind::Text(_) => Value::Text(String::new()),
    }
}

// ── Decode ───────────────────────────────────────────────────

/// Interpret `bytes` through `layout`.
pub fn decode(layout: &'static Layout, bytes: &[u8]) -> Result<Record, ProtocolError> {
    if bytes.len() < layout.size {
        return Err(ProtocolError::Undersized {
            expected: layout.size,
            actual: bytes.len(),
        });
    }
    let values = layout
        .fields
        .iter()
        .map(|field| decode_field(field, &bytes[field.offset..field.end()]))
        .collect();
    Ok(Record { layout, values })
}

fn decode_field(field: &Field, raw: &[u8]) -> Value {
    let mut word = [0u8; 4];
    let width = raw.len().min(4);
    word[..width].copy_from_slice(&raw[..width]);
    if field.endian == Endian::Big {
        word[..width].reverse();
    }
    let unsigned = u32::from_le_bytes(word);

    match field.kind {
        FieldKind::U8 | FieldKind::U16 | FieldKind::U32 => Value::Uint(unsigned),
        FieldKind::I8 => Value::Int(i32::from(unsigned as u8 as i8)),
        FieldKind::I16 => Value::Int(i32::from(unsigned as u16 as i16)),
        FieldKind::I32 => Value::Int(unsigned as i32),
        FieldKind::F32 => Value::Float(f32::from_bits(unsigned)),
        FieldKind::Bool => Value::Bool(unsigned != 0),
        FieldKind::Text(_) => {
            let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
            Value::Text(String::from_utf8_lossy(&raw[..end]).into_owned())
        }
    }
}

// ── Encode ───────────────────────────────────────────────────

/// Produce the `layout.size`-byte image of `record`.
pub fn encode(record: &Record) -> Result<Vec<u8>, ProtocolError> {
    let layout = record.layout;
    let mut out = vec![0u8; layout.size];
    for (field, value) in layout.fields.iter().zip(&record.values) {
        encode_field(field, value, &mut out[field.offset..field.end()])?;
    }
    Ok(out)
}

fn encode_field(field: &Field, value: &Value, slot: &mut [u8]) -> Result<(), ProtocolError> {
    let range = || ProtocolError::FieldRange(field.name);
    let word: u32 = match (field.kind, value) {
        (FieldKind::U8, Value::Uint(v)) => u32::from(u8::try_from(*v).map_err(|_| range())?),
        (FieldKind::U16, Value::Uint(v)) => u32::from(u16::try_from(*v).map_err(|_| range())?),
        (FieldKind::U32, Value::Uint(v)) => *v,
        (FieldKind::I8, Value::Int(v)) => u32::from(i8::try_from(*v).map_err(|_| range())? as u8),
        (FieldKind::I16, Value::Int(v)) => {
            u32::from(i16::try_from(*v).map_err(|_| range())? as u16)
        }
        (FieldKind::I32, Value::Int(v)) => *v as u32,
        (FieldKind::F32, Value::Float(v)) => v.to_bits(),
        (FieldKind::Bool, Value::Bool(v)) => u32::from(*v),
        (FieldKind::Text(len), Value::Text(s)) => {
            // One byte is reserved for the terminator.
            if s.len() >= len {
                return Err(range());
            }
            slot[..s.len()].copy_from_slice(s.as_bytes());
            return Ok(());
        }
        _ => return Err(ProtocolError::FieldMismatch(field.name)),
    };

    let width = slot.len();
    let le = word.to_le_bytes();
    slot.copy_from_slice(&le[..width]);
    if field.endian == Endian::Big {
        slot.reverse();
    }
    Ok(())
}

// ── Tests ────────────────────────────────────────────────────
