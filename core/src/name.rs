//! Interned 32-bit names.
//!
//! Passes and buffers are identified by [`Name`], a 32-bit xxh32 hash of a
//! string. Hashing keeps lookups cheap, but two distinct strings may map to
//! the same value; [`NameTable`] records the string behind every registered
//! hash and rejects a second string that lands on an occupied value.
//!
//! # Example
//!
//! ```
//! use strata_core::name::{Name, NameTable};
//!
//! let mut names = NameTable::new();
//! let gbuffer = names.intern("gbuffer").unwrap();
//! assert_eq!(gbuffer, Name::hash_str("gbuffer"));
//! assert_eq!(names.resolve(gbuffer), Some("gbuffer"));
//! ```

use std::collections::HashMap;
use std::fmt;

use thiserror::Error;
use xxhash_rust::xxh32::xxh32;

const NAME_SEED: u32 = 0;

/// A hashed identifier for a pass or buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Name(u32);

impl Name {
    /// Hash a string into a name.
    pub fn hash_str(value: &str) -> Self {
        Self(xxh32(value.as_bytes(), NAME_SEED))
    }

    /// Wrap a precomputed hash value.
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// The raw 32-bit hash.
    pub const fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:08x}", self.0)
    }
}

impl From<&str> for Name {
    fn from(value: &str) -> Self {
        Self::hash_str(value)
    }
}

/// Errors raised while registering names.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NameError {
    /// Two distinct strings share one hash value.
    #[error("name collision: \"{incoming}\" hashes to {name}, already used by \"{existing}\"")]
    Collision {
        name: Name,
        existing: String,
        incoming: String,
    },
}

/// Registry of the strings behind every name in use.
#[derive(Debug, Clone, Default)]
pub struct NameTable {
    strings: HashMap<Name, String>,
}

impl NameTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Hash `value` and register it.
    ///
    /// Interning the same string twice returns the same name.
    pub fn intern(&mut self, value: &str) -> Result<Name, NameError> {
        self.register(Name::hash_str(value), value)
    }

    /// Register `value` under an explicit name.
    ///
    /// Fails with [`NameError::Collision`] when `name` is already bound to a
    /// different string.
    pub fn register(&mut self, name: Name, value: &str) -> Result<Name, NameError> {
        self.check(name, value)?;
        self.strings
            .entry(name)
            .or_insert_with(|| value.to_string());
        Ok(name)
    }

    /// Register every entry, or none of them.
    ///
    /// Entries are checked against the table and against each other before
    /// anything is inserted, so a collision leaves the table unchanged.
    pub fn register_all(&mut self, entries: &[(Name, &str)]) -> Result<(), NameError> {
        for (i, &(name, value)) in entries.iter().enumerate() {
            self.check(name, value)?;
            if let Some(&(_, earlier)) = entries[..i]
                .iter()
                .find(|&&(other, existing)| other == name && existing != value)
            {
                return Err(collision(name, earlier, value));
            }
        }
        for &(name, value) in entries {
            self.strings
                .entry(name)
                .or_insert_with(|| value.to_string());
        }
        Ok(())
    }

    /// Check that `name` is free or already bound to `value`.
    pub fn check(&self, name: Name, value: &str) -> Result<(), NameError> {
        match self.strings.get(&name) {
            Some(existing) if existing != value => Err(collision(name, existing, value)),
            _ => Ok(()),
        }
    }

    /// Look up the string registered for `name`.
    pub fn resolve(&self, name: Name) -> Option<&str> {
        self.strings.get(&name).map(String::as_str)
    }

    /// Human-readable label: the registered string, or the hash.
    pub fn label(&self, name: Name) -> String {
        match self.resolve(name) {
            Some(value) => value.to_string(),
            None => name.to_string(),
        }
    }

    /// Check whether `name` has been registered.
    pub fn contains(&self, name: Name) -> bool {
        self.strings.contains_key(&name)
    }

    /// Number of registered names.
    pub fn len(&self) -> usize {
        self.strings.len()
    }

    /// Check if no names are registered.
    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }
}

fn collision(name: Name, existing: &str, incoming: &str) -> NameError {
    log::debug!("name {} collides: \"{}\" vs \"{}\"", name, existing, incoming);
    NameError::Collision {
        name,
        existing: existing.to_string(),
        incoming: incoming.to_string(),
    }
}
