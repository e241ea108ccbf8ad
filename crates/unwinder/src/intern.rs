//! Identifier interning for code objects.
//!
//! Names used by instructions (host functions, side-data fields, resolvable references) are
//! stored once per code object and referenced by `NameId`. Functions are referenced across
//! the program by `FunctionId`, an index into the program's function table.

use std::rc::Rc;

use ahash::AHashMap;

/// Index into a code object's name table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize)]
pub struct NameId(u16);

impl NameId {
    /// Returns the raw index value.
    #[inline]
    pub fn index(self) -> usize {
        usize::from(self.0)
    }
}

/// Unique identifier for functions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct FunctionId(u32);

impl FunctionId {
    /// Creates a FunctionId from a raw index value.
    ///
    /// The caller is responsible for ensuring the index is valid; the VM reports an
    /// internal error for ids that do not name a function.
    #[inline]
    #[must_use]
    pub fn from_index(index: u32) -> Self {
        Self(index)
    }

    /// Returns the raw index value.
    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Deduplicating name table used while building a code object.
#[derive(Debug, Default)]
pub(crate) struct Interns {
    names: Vec<Rc<str>>,
    lookup: AHashMap<Rc<str>, NameId>,
}

impl Interns {
    /// Returns the id of `name`, adding it to the table on first use.
    ///
    /// # Panics
    /// Panics if a single code object uses more than 65535 distinct names.
    pub fn intern(&mut self, name: &str) -> NameId {
        if let Some(&id) = self.lookup.get(name) {
            return id;
        }
        let id = NameId(u16::try_from(self.names.len()).expect("too many names in one code object"));
        let name: Rc<str> = Rc::from(name);
        self.names.push(name.clone());
        self.lookup.insert(name, id);
        id
    }

    pub fn into_names(self) -> Vec<Rc<str>> {
        self.names
    }
}
