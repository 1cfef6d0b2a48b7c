//! Reference-counted arena backing all heap-only runtime values.

use crate::types::{TypeId, TypeRef};
use crate::value::Value;

/// Unique identifier for values stored inside the heap arena.
pub type HeapId = usize;

/// Destructor hook for native-class instances, invoked once when the object's
/// reference count reaches zero, before its attributes are released.
pub type DropHook = fn(&mut Vec<Value>);

/// HeapData captures every runtime value that must live in the arena.
#[derive(Debug)]
pub enum HeapData {
    /// Immutable byte string. The stored length is the byte length; a
    /// trailing NUL is not required.
    Str(Box<[u8]>),
    /// Fixed-length array with a fixed element type. The element type may
    /// itself be an array type (nesting).
    Array { elem: TypeRef, cells: Vec<Value> },
    /// Object instance: class identity plus one attribute slot per declared
    /// attribute.
    Object {
        class: TypeId,
        attrs: Vec<Value>,
        drop_hook: Option<DropHook>,
    },
}

impl HeapData {
    #[must_use]
    pub fn kind_str(&self) -> &'static str {
        match self {
            Self::Str(_) => "string",
            Self::Array { .. } => "array",
            Self::Object { .. } => "object",
        }
    }
}

/// A single entry inside the heap arena, storing refcount and payload.
#[derive(Debug)]
struct HeapEntry {
    refcount: usize,
    data: HeapData,
}

/// Reference-counted arena for strings, arrays and objects.
///
/// IDs are never reused during a script's lifetime; freed slots are left
/// empty. This keeps reference-identity checks simple without generation
/// counters. Every live owner of a value (register, global slot, array cell,
/// object attribute, call argument) holds exactly one reference.
#[derive(Debug, Default)]
pub struct Heap {
    entries: Vec<Option<HeapEntry>>,
}

impl Heap {
    /// Allocates a new heap value with a reference count of one.
    pub fn allocate(&mut self, data: HeapData) -> HeapId {
        let id = self.entries.len();
        self.entries.push(Some(HeapEntry { refcount: 1, data }));
        id
    }

    /// Increments the reference count for an existing heap value.
    ///
    /// # Panics
    /// Panics if the id is invalid or the value has already been freed.
    pub fn inc_ref(&mut self, id: HeapId) {
        let entry = self
            .entries
            .get_mut(id)
            .expect("Heap::inc_ref: slot missing")
            .as_mut()
            .expect("Heap::inc_ref: value already freed");
        entry.refcount += 1;
    }

    /// Decrements the reference count and frees the value (plus children)
    /// once it hits zero. Entire object graphs are released iteratively.
    ///
    /// # Panics
    /// Panics if the id is invalid or the value has already been freed.
    pub fn dec_ref(&mut self, id: HeapId) {
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let slot = self
                .entries
                .get_mut(current)
                .expect("Heap::dec_ref: slot missing");
            let entry = slot.as_mut().expect("Heap::dec_ref: value already freed");
            if entry.refcount > 1 {
                entry.refcount -= 1;
                continue;
            }
            if let Some(mut entry) = slot.take() {
                if let HeapData::Object {
                    drop_hook: Some(hook),
                    attrs,
                    ..
                } = &mut entry.data
                {
                    hook(attrs);
                }
                enqueue_children(&entry.data, &mut stack);
            }
        }
    }

    /// Returns an immutable reference to the heap data stored at `id`.
    ///
    /// # Panics
    /// Panics if the id is invalid or the value has already been freed.
    #[must_use]
    pub fn get(&self, id: HeapId) -> &HeapData {
        &self
            .entries
            .get(id)
            .expect("Heap::get: slot missing")
            .as_ref()
            .expect("Heap::get: value already freed")
            .data
    }

    /// Returns a mutable reference to the heap data stored at `id`.
    ///
    /// # Panics
    /// Panics if the id is invalid or the value has already been freed.
    pub fn get_mut(&mut self, id: HeapId) -> &mut HeapData {
        &mut self
            .entries
            .get_mut(id)
            .expect("Heap::get_mut: slot missing")
            .as_mut()
            .expect("Heap::get_mut: value already freed")
            .data
    }

    /// Convenience accessor for string data.
    #[must_use]
    pub fn str_bytes(&self, id: HeapId) -> &[u8] {
        match self.get(id) {
            HeapData::Str(bytes) => bytes,
            other => panic!("Heap::str_bytes: expected string, found {}", other.kind_str()),
        }
    }

    /// Current reference count of a live value; test hook.
    #[must_use]
    pub fn refcount(&self, id: HeapId) -> usize {
        self.entries
            .get(id)
            .and_then(Option::as_ref)
            .map_or(0, |e| e.refcount)
    }

    /// Number of live heap values; used by the conservation test hook.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.entries.iter().filter(|e| e.is_some()).count()
    }
}

/// Pushes any child ids referenced by `data` onto the stack so `dec_ref` can
/// drop whole graphs without recursion.
fn enqueue_children(data: &HeapData, stack: &mut Vec<HeapId>) {
    match data {
        HeapData::Str(_) => {}
        HeapData::Array { cells, .. } => {
            for cell in cells {
                if let Value::Ref(id) = cell {
                    stack.push(*id);
                }
            }
        }
        HeapData::Object { attrs, .. } => {
            for attr in attrs {
                if let Value::Ref(id) = attr {
                    stack.push(*id);
                }
            }
        }
    }
}
