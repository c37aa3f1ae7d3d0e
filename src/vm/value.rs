use std::fmt;

use super::dynstr::Str;

/// A tagged value: a signed 64-bit integer or an owning string handle.
///
/// Cloning a string value takes a new reference; dropping or overwriting it
/// releases one.
#[derive(Clone)]
pub enum Value<'img> {
    Int(i64),
    Str(Str<'img>),
}

impl Default for Value<'_> {
    fn default() -> Self {
        Value::Int(0)
    }
}

impl<'img> Value<'img> {
    /// A fresh string value with a single owner.
    pub fn string(bytes: impl Into<Vec<u8>>) -> Self {
        Value::Str(Str::new(bytes.into()))
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            Value::Str(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&Str<'img>> {
        match self {
            Value::Str(s) => Some(s),
            Value::Int(_) => None,
        }
    }

    pub fn is_sentinel(&self) -> bool {
        matches!(self, Value::Str(s) if s.is_sentinel())
    }

    /// Implicit integer coercion. A string converts to its byte length,
    /// never to the numeral it might spell.
    pub fn intcast(&self) -> i64 {
        match self {
            Value::Int(n) => *n,
            Value::Str(s) => s.len() as i64,
        }
    }

    /// Implicit string coercion. An integer converts to a new string holding
    /// its base-10 rendering.
    pub fn strcast(&self) -> Str<'img> {
        match self {
            Value::Int(n) => Str::new(n.to_string().into_bytes()),
            Value::Str(s) => s.clone(),
        }
    }

    /// Result of the TYPE instruction: -1 for the sentinel, 0 for integers,
    /// 1 for any other string.
    pub fn type_code(&self) -> i64 {
        match self {
            Value::Int(_) => 0,
            Value::Str(s) if s.is_sentinel() => -1,
            Value::Str(_) => 1,
        }
    }
}

/// Values compare by content; string identity (and so sentinel-ness) is
/// not part of equality.
impl PartialEq for Value<'_> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a.as_bytes() == b.as_bytes(),
            _ => false,
        }
    }
}

impl fmt::Debug for Value<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(n) => write!(f, "Int({})", n),
            Value::Str(s) => write!(f, "Str({:?})", s),
        }
    }
}
