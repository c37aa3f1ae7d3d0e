//! Reference-counted byte strings.
//!
//! A string value is either an immortal view into the literal table of the
//! loaded image, or a heap-allocated [`DynString`] shared through an [`Rc`].
//! Cloning a [`Str`] is the only way to take another reference and dropping
//! it is the only way to release one; immortal views are plain borrows, so
//! both operations are no-ops for them.

use std::fmt;
use std::rc::{Rc, Weak};

/// Heap storage for a dynamic string.
///
/// The payload is always followed by one zero byte that is not part of the
/// logical length.
pub struct DynString {
    buf: Box<[u8]>,
}

impl DynString {
    /// Allocate a zero-filled string of `len` bytes.
    pub fn make(len: usize) -> Self {
        Self {
            buf: vec![0u8; len + 1].into_boxed_slice(),
        }
    }

    /// Take ownership of `bytes` as the payload.
    pub fn from_vec(mut bytes: Vec<u8>) -> Self {
        bytes.push(0);
        Self {
            buf: bytes.into_boxed_slice(),
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len()]
    }

    /// Payload plus the trailing NUL.
    pub fn as_bytes_with_nul(&self) -> &[u8] {
        &self.buf
    }

    /// Mutable access to the payload, only available before the string is shared.
    pub fn payload_mut(&mut self) -> &mut [u8] {
        let len = self.len();
        &mut self.buf[..len]
    }
}

impl fmt::Debug for DynString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DynString({:?})", String::from_utf8_lossy(self.as_bytes()))
    }
}

/// An owning handle to a string value.
#[derive(Clone)]
pub enum Str<'img> {
    /// Entry `index` of the literal table. Never freed, never counted.
    Literal { index: usize, bytes: &'img [u8] },
    /// A string produced at run time, freed when the last handle drops.
    Dyn(Rc<DynString>),
}

impl<'img> Str<'img> {
    /// Wrap freshly produced bytes in a new string with one owner.
    pub fn new(bytes: Vec<u8>) -> Self {
        Str::Dyn(Rc::new(DynString::from_vec(bytes)))
    }

    pub fn from_dyn(s: DynString) -> Self {
        Str::Dyn(Rc::new(s))
    }

    pub fn literal(index: usize, bytes: &'img [u8]) -> Self {
        Str::Literal { index, bytes }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Str::Literal { bytes, .. } => bytes,
            Str::Dyn(s) => s.as_bytes(),
        }
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_immortal(&self) -> bool {
        matches!(self, Str::Literal { .. })
    }

    /// The canonical empty-string / error marker is literal 0, by identity.
    pub fn is_sentinel(&self) -> bool {
        matches!(self, Str::Literal { index: 0, .. })
    }

    /// Number of live owners, or `None` for immortal strings.
    pub fn ref_count(&self) -> Option<usize> {
        match self {
            Str::Literal { .. } => None,
            Str::Dyn(s) => Some(Rc::strong_count(s)),
        }
    }

    /// A non-owning handle that can tell whether the storage was freed.
    pub fn downgrade(&self) -> Option<Weak<DynString>> {
        match self {
            Str::Literal { .. } => None,
            Str::Dyn(s) => Some(Rc::downgrade(s)),
        }
    }

    /// Whether both handles refer to the same storage.
    pub fn same_storage(&self, other: &Str<'_>) -> bool {
        match (self, other) {
            (Str::Literal { index: a, .. }, Str::Literal { index: b, .. }) => a == b,
            (Str::Dyn(a), Str::Dyn(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for Str<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = String::from_utf8_lossy(self.as_bytes());
        match self {
            Str::Literal { index, .. } => write!(f, "Literal[{}]({:?})", index, text),
            Str::Dyn(_) => write!(f, "Dyn({:?})", text),
        }
    }
}
