//! Address to symbol name table.

use std::collections::BTreeMap;

use bbreplay_foundation::Address;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Symbol names keyed by code address, filled lazily from symbol records.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SymbolTable {
    names: BTreeMap<Address, String>,
}

impl SymbolTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or overwrites the name of `address`.
    ///
    /// Returns the previous name if it differed.
    pub fn insert(&mut self, address: Address, name: impl Into<String>) -> Option<String> {
        let name = name.into();
        match self.names.insert(address, name) {
            Some(old) if self.names.get(&address) != Some(&old) => Some(old),
            _ => None,
        }
    }

    /// Returns the name of `address`.
    #[must_use]
    pub fn get(&self, address: Address) -> Option<&str> {
        self.names.get(&address).map(String::as_str)
    }

    /// Returns the name of `address`, or its hex form.
    #[must_use]
    pub fn resolve(&self, address: Address) -> String {
        self.get(address)
            .map_or_else(|| address.to_string(), str::to_string)
    }

    /// Returns the number of symbols.
    #[must_use]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Returns true if no symbols are known.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Iterates symbols in address order.
    pub fn iter(&self) -> impl Iterator<Item = (Address, &str)> {
        self.names.iter().map(|(a, n)| (*a, n.as_str()))
    }
}

impl FromIterator<(Address, String)> for SymbolTable {
    fn from_iter<I: IntoIterator<Item = (Address, String)>>(iter: I) -> Self {
        Self {
            names: iter.into_iter().collect(),
        }
    }
}
