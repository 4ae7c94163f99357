//! Runtime helper registry.
//!
//! Maps helper names to their entry tags and synthesized bodies so that each
//! distinct helper is emitted exactly once per code image.

use quill_core::TypeHash;
use rustc_hash::FxHashMap;

use crate::asm::{AssemblyItem, Tag};

/// A synthesized helper routine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeHelper {
    /// Deterministic name derived from the operation and operand types.
    pub name: String,
    /// Entry tag.
    pub tag: Tag,
    /// Words the caller passes (return label excluded).
    pub params: usize,
    /// Words the helper leaves behind.
    pub returns: usize,
    /// Body items, starting with the entry tag. Empty while the body is
    /// being generated.
    pub body: Vec<AssemblyItem>,
}

/// Cache of helpers keyed by the hash of their name.
#[derive(Debug, Default, Clone)]
pub struct HelperRegistry {
    index: FxHashMap<TypeHash, usize>,
    helpers: Vec<RuntimeHelper>,
}

impl HelperRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Entry tag of an already requested helper.
    pub fn tag_of(&self, name: &str) -> Option<Tag> {
        self.index
            .get(&TypeHash::from_helper(name))
            .map(|i| self.helpers[*i].tag)
    }

    /// Reserve a helper before its body exists, so that recursive requests
    /// resolve to the same tag.
    pub fn reserve(&mut self, name: &str, tag: Tag, params: usize, returns: usize) {
        let key = TypeHash::from_helper(name);
        self.index.insert(key, self.helpers.len());
        self.helpers.push(RuntimeHelper {
            name: name.to_string(),
            tag,
            params,
            returns,
            body: Vec::new(),
        });
    }

    /// Drop a reservation whose body could not be generated.
    pub fn release(&mut self, name: &str) {
        let Some(index) = self.index.remove(&TypeHash::from_helper(name)) else {
            return;
        };
        self.helpers.remove(index);
        for position in self.index.values_mut() {
            if *position > index {
                *position -= 1;
            }
        }
    }

    /// Store the finished body of a reserved helper.
    pub fn finish(&mut self, name: &str, body: Vec<AssemblyItem>) {
        if let Some(index) = self.index.get(&TypeHash::from_helper(name)) {
            self.helpers[*index].body = body;
        }
    }

    /// Look up a helper by name.
    pub fn get(&self, name: &str) -> Option<&RuntimeHelper> {
        self.index
            .get(&TypeHash::from_helper(name))
            .map(|i| &self.helpers[*i])
    }

    /// Whether a helper was requested.
    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(&TypeHash::from_helper(name))
    }

    /// Helpers in request order.
    pub fn iter(&self) -> impl Iterator<Item = &RuntimeHelper> {
        self.helpers.iter()
    }

    /// Number of helpers.
    pub fn len(&self) -> usize {
        self.helpers.len()
    }

    /// Whether no helper was requested.
    pub fn is_empty(&self) -> bool {
        self.helpers.is_empty()
    }

    /// Move all bodies out, in request order.
    pub fn take_bodies(&mut self) -> Vec<AssemblyItem> {
        self.helpers
            .iter_mut()
            .flat_map(|h| std::mem::take(&mut h.body))
            .collect()
    }
}
