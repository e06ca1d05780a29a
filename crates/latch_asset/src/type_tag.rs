// type_tag.rs - Runtime tags for concrete resource types
//
// Tags are small integers handed out on first use, one per Rust type.
// They guard `get::<T>()` against reading a slot as the wrong type.

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::any::{type_name, TypeId};
use std::collections::HashMap;
use std::fmt;

/// Opaque identifier of a concrete resource type within this process.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct TypeTag(u32);

struct TagRegistry {
    by_type: HashMap<TypeId, TypeTag>,
    names: Vec<&'static str>,
}

static TAGS: Lazy<RwLock<TagRegistry>> = Lazy::new(|| {
    RwLock::new(TagRegistry {
        by_type: HashMap::new(),
        names: Vec::new(),
    })
});

impl TypeTag {
    /// Tag for `T`, assigning the next free one on first use.
    pub fn of<T: 'static>() -> Self {
        let id = TypeId::of::<T>();
        if let Some(tag) = TAGS.read().by_type.get(&id) {
            return *tag;
        }

        let mut tags = TAGS.write();
        if let Some(tag) = tags.by_type.get(&id) {
            return *tag;
        }
        let tag = TypeTag(tags.names.len() as u32);
        tags.names.push(type_name::<T>());
        tags.by_type.insert(id, tag);
        tag
    }

    /// Raw tag value.
    #[inline]
    pub fn raw(self) -> u32 {
        self.0
    }

    /// Rust type name the tag was assigned to.
    pub fn type_name(self) -> &'static str {
        TAGS.read()
            .names
            .get(self.0 as usize)
            .copied()
            .unwrap_or("<unknown>")
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.type_name(), self.0)
    }
}
