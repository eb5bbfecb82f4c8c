//! Ref identifiers, element descriptors, and the versioned ref cache.
//!
//! A snapshot produces one `RefTable`; the `RefCache` holds exactly the most
//! recent one. Tables are replaced whole, never merged.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use tracing::{debug, info};

use super::error::{RefError, REF_PATTERN};

static REF_TOKEN: Lazy<Regex> = Lazy::new(|| Regex::new(REF_PATTERN).expect("valid ref pattern"));

/// Typed ref id. Displays as `e<N>`, N starts at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RefId(u32);

impl RefId {
    pub fn new(n: u32) -> Option<Self> {
        (n >= 1).then_some(Self(n))
    }

    /// Parse a bare key (`e12`). The `@` prefix must already be stripped.
    pub fn from_key(key: &str) -> Option<Self> {
        let digits = key.strip_prefix('e')?;
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        digits.parse::<u32>().ok().and_then(Self::new)
    }

    fn index(&self) -> usize {
        (self.0 - 1) as usize
    }
}

impl fmt::Display for RefId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "e{}", self.0)
    }
}

/// Validate a client-supplied token and return the bare lookup key.
///
/// `e12` and `@e12` both yield `e12`.
pub fn parse_token(token: &str) -> Result<&str, RefError> {
    if !REF_TOKEN.is_match(token) {
        return Err(RefError::InvalidRefFormat {
            token: token.to_string(),
        });
    }
    Ok(token.strip_prefix('@').unwrap_or(token))
}

/// Recipe for re-locating an element named by a ref.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ElementDescriptor {
    /// Role + accessible name, with an ordinal when the pair repeats.
    Semantic {
        role: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        nth: Option<usize>,
    },
    /// Raw selector for cursor-interactive elements with no reliable semantics.
    Structural {
        role: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        selector: String,
    },
}

impl ElementDescriptor {
    pub fn role(&self) -> &str {
        match self {
            ElementDescriptor::Semantic { role, .. } | ElementDescriptor::Structural { role, .. } => role,
        }
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            ElementDescriptor::Semantic { name, .. } | ElementDescriptor::Structural { name, .. } => {
                name.as_deref()
            }
        }
    }

    pub fn nth(&self) -> Option<usize> {
        match self {
            ElementDescriptor::Semantic { nth, .. } => *nth,
            ElementDescriptor::Structural { .. } => None,
        }
    }

    pub fn selector(&self) -> Option<&str> {
        match self {
            ElementDescriptor::Structural { selector, .. } => Some(selector),
            ElementDescriptor::Semantic { .. } => None,
        }
    }
}

/// Dense, ordered mapping `e1..eN -> descriptor` for one snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefTable {
    entries: Vec<ElementDescriptor>,
}

impl RefTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a descriptor under the next free id.
    pub fn push(&mut self, descriptor: ElementDescriptor) -> RefId {
        self.entries.push(descriptor);
        RefId(self.entries.len() as u32)
    }

    pub fn get(&self, id: RefId) -> Option<&ElementDescriptor> {
        self.entries.get(id.index())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (RefId, &ElementDescriptor)> {
        self.entries
            .iter()
            .enumerate()
            .map(|(i, d)| (RefId(i as u32 + 1), d))
    }

    pub fn ids(&self) -> Vec<String> {
        self.iter().map(|(id, _)| id.to_string()).collect()
    }
}

impl FromIterator<ElementDescriptor> for RefTable {
    fn from_iter<I: IntoIterator<Item = ElementDescriptor>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

// Serialized as a JSON object in id order: {"e1": {...}, "e2": {...}}.
impl Serialize for RefTable {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (id, descriptor) in self.iter() {
            map.serialize_entry(&id.to_string(), descriptor)?;
        }
        map.end()
    }
}

/// Holder of the current ref table for one page.
///
/// `version` counts replacements of the current table and drops back to 0 on
/// `invalidate`, so staleness checks must compare against the live value.
#[derive(Debug, Default)]
pub struct RefCache {
    table: RefTable,
    version: u64,
}

impl RefCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Swap in a new table wholesale and bump the version.
    pub fn replace(&mut self, table: RefTable) {
        self.version += 1;
        info!(refs = table.len(), version = self.version, "Ref table replaced");
        self.table = table;
    }

    /// Look up a bare key (`e3`). A leading `@` is tolerated.
    pub fn get(&self, key: &str) -> Result<&ElementDescriptor, RefError> {
        let bare = key.strip_prefix('@').unwrap_or(key);
        RefId::from_key(bare)
            .and_then(|id| self.table.get(id))
            .ok_or_else(|| RefError::RefNotFound {
                ref_id: bare.to_string(),
                available: self.list_available(),
                stale: false,
            })
    }

    pub fn is_valid(&self, key: &str) -> bool {
        self.get(key).is_ok()
    }

    pub fn list_available(&self) -> Vec<String> {
        self.table.ids()
    }

    /// Drop every ref; used when the document is replaced.
    pub fn invalidate(&mut self) {
        debug!(dropped = self.table.len(), "Invalidating ref cache");
        self.table = RefTable::new();
        self.version = 0;
    }

    pub fn version(&self) -> u64 {
        self.version
    }
}
