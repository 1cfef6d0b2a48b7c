//! Runtime values and the host-side mirror type.
//!
//! A [`Value`] is exactly one of: null, bool, 64-bit int, 64-bit real, or a
//! reference to a heap cell (string, array or object). Booleans, ints and
//! reals are by-value; everything else is reference counted.
//!
//! NOTE: `Clone` is intentionally NOT derived. Use `clone_with_heap()` so the
//! reference count tracks every live owner, and `drop_with_heap()` before a
//! value is discarded or overwritten.

use crate::exception::{ExcKind, RuntimeError, RunResult};
use crate::heap::{Heap, HeapData, HeapId};
use crate::types::{self, TypeRef, TypeTable};

/// Primary tagged value type.
#[derive(Debug, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Real(f64),
    Ref(HeapId),
}

impl Value {
    /// Clones a value with proper heap reference counting.
    #[must_use]
    pub fn clone_with_heap(&self, heap: &mut Heap) -> Self {
        match self {
            Self::Ref(id) => {
                heap.inc_ref(*id);
                Self::Ref(*id)
            }
            Self::Null => Self::Null,
            Self::Bool(b) => Self::Bool(*b),
            Self::Int(v) => Self::Int(*v),
            Self::Real(v) => Self::Real(*v),
        }
    }

    /// Drops a value, decrementing its heap reference count if applicable.
    pub fn drop_with_heap(self, heap: &mut Heap) {
        if let Self::Ref(id) = self {
            heap.dec_ref(id);
        }
    }

    /// Copies the value without touching reference counts.
    ///
    /// For `Ref` variants the caller MUST `inc_ref` separately; this exists
    /// so container cells can be copied while the heap is borrowed.
    pub(crate) fn shallow_copy(&self) -> Self {
        match self {
            Self::Null => Self::Null,
            Self::Bool(b) => Self::Bool(*b),
            Self::Int(v) => Self::Int(*v),
            Self::Real(v) => Self::Real(*v),
            Self::Ref(id) => Self::Ref(*id),
        }
    }

    /// The heap id if this is a reference value.
    #[inline]
    pub fn ref_id(&self) -> Option<HeapId> {
        match self {
            Self::Ref(id) => Some(*id),
            _ => None,
        }
    }

    /// Runtime tag name, for diagnostics.
    #[must_use]
    pub fn kind_str(&self, heap: &Heap) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "Boolean",
            Self::Int(_) => "Integer",
            Self::Real(_) => "Real",
            Self::Ref(id) => heap.get(*id).kind_str(),
        }
    }

    /// Default value for a slot of the given static type: false/0/0.0 for the
    /// scalar cores, null for every reference type.
    pub fn default_for(ty: TypeRef, table: &TypeTable) -> Self {
        if table.is_reference(ty) {
            return Self::Null;
        }
        match ty.def {
            types::BOOLEAN => Self::Bool(false),
            types::INTEGER => Self::Int(0),
            types::REAL => Self::Real(0.0),
            _ => Self::Null,
        }
    }
}

/// Host-side value used for arguments and results crossing the embedding
/// boundary. Strings and arrays deep-convert; objects cross as opaque
/// [`ObjectHandle`]s rooted in the script's heap.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptValue {
    Null,
    Bool(bool),
    Int(i64),
    Real(f64),
    Str(String),
    Array(Vec<ScriptValue>),
    Object(ObjectHandle),
}

/// Opaque handle to a script object kept alive on the script's heap.
///
/// Obtained from `SpiderScript::construct` or a call returning an object;
/// release it with `SpiderScript::release` when done.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectHandle(pub(crate) HeapId);

impl ScriptValue {
    /// Converts into a runtime [`Value`], checking against the expected type.
    ///
    /// This is the boundary type check: mismatches raise a `type` runtime
    /// error rather than silently coercing.
    pub fn to_value(&self, expected: TypeRef, heap: &mut Heap, table: &TypeTable) -> RunResult<Value> {
        let mismatch = || RuntimeError::new(ExcKind::Type, "argument type mismatch at host boundary");
        if expected == TypeRef::UNDEF {
            return self.to_value_untyped(heap);
        }
        match self {
            Self::Null => {
                if table.is_reference(expected) {
                    Ok(Value::Null)
                } else {
                    Err(mismatch())
                }
            }
            Self::Bool(b) if expected == TypeRef::BOOLEAN => Ok(Value::Bool(*b)),
            Self::Int(v) if expected == TypeRef::INTEGER => Ok(Value::Int(*v)),
            Self::Real(v) if expected == TypeRef::REAL => Ok(Value::Real(*v)),
            Self::Str(s) if expected == TypeRef::STRING => Ok(Value::Ref(
                heap.allocate(HeapData::Str(s.as_bytes().to_vec().into_boxed_slice())),
            )),
            Self::Array(items) if expected.is_array() => {
                let elem = expected.element();
                let mut cells = Vec::with_capacity(items.len());
                for item in items {
                    match item.to_value(elem, heap, table) {
                        Ok(v) => cells.push(v),
                        Err(e) => {
                            for cell in cells {
                                cell.drop_with_heap(heap);
                            }
                            return Err(e);
                        }
                    }
                }
                Ok(Value::Ref(heap.allocate(HeapData::Array { elem, cells })))
            }
            Self::Object(handle) => {
                let matches = match heap.get(handle.0) {
                    HeapData::Object { class, .. } => expected.depth == 0 && expected.def == *class,
                    _ => false,
                };
                if matches {
                    heap.inc_ref(handle.0);
                    Ok(Value::Ref(handle.0))
                } else {
                    Err(mismatch())
                }
            }
            _ => Err(mismatch()),
        }
    }

    /// Conversion without an expected type, for `undef` host prototypes.
    fn to_value_untyped(&self, heap: &mut Heap) -> RunResult<Value> {
        match self {
            Self::Null => Ok(Value::Null),
            Self::Bool(b) => Ok(Value::Bool(*b)),
            Self::Int(v) => Ok(Value::Int(*v)),
            Self::Real(v) => Ok(Value::Real(*v)),
            Self::Str(s) => Ok(Value::Ref(
                heap.allocate(HeapData::Str(s.as_bytes().to_vec().into_boxed_slice())),
            )),
            Self::Object(handle) => {
                heap.inc_ref(handle.0);
                Ok(Value::Ref(handle.0))
            }
            Self::Array(_) => Err(RuntimeError::new(
                ExcKind::Type,
                "array arguments require a typed prototype",
            )),
        }
    }

    /// Converts a runtime value back into the host mirror.
    ///
    /// Consumes the value's reference: strings and arrays are deep-copied and
    /// released; objects keep their reference alive inside the returned
    /// handle.
    pub fn from_value(value: Value, heap: &mut Heap) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(b),
            Value::Int(v) => Self::Int(v),
            Value::Real(v) => Self::Real(v),
            Value::Ref(id) => {
                let converted = match heap.get(id) {
                    HeapData::Str(bytes) => Self::Str(String::from_utf8_lossy(bytes).into_owned()),
                    HeapData::Array { cells, .. } => {
                        let copies: Vec<Value> = cells.iter().map(Value::shallow_copy).collect();
                        // Children borrow their refcount from the array, which
                        // stays alive until the dec_ref below.
                        Self::Array(copies.into_iter().map(|c| Self::from_borrowed(c, heap)).collect())
                    }
                    HeapData::Object { .. } => {
                        // Transfer the reference into the handle.
                        return Self::Object(ObjectHandle(id));
                    }
                };
                heap.dec_ref(id);
                converted
            }
        }
    }

    /// Like `from_value` but does not consume a reference; used for array
    /// cells that stay owned by their array. Objects gain a reference so the
    /// returned handle stays valid independently.
    fn from_borrowed(value: Value, heap: &mut Heap) -> Self {
        match value {
            Value::Ref(id) => {
                if matches!(heap.get(id), HeapData::Object { .. }) {
                    heap.inc_ref(id);
                    Self::Object(ObjectHandle(id))
                } else {
                    let copy = Value::Ref(id);
                    heap.inc_ref(id);
                    Self::from_value(copy, heap)
                }
            }
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(b),
            Value::Int(v) => Self::Int(v),
            Value::Real(v) => Self::Real(v),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values_follow_type() {
        let table = TypeTable::new();
        assert_eq!(Value::default_for(TypeRef::INTEGER, &table), Value::Int(0));
        assert_eq!(Value::default_for(TypeRef::BOOLEAN, &table), Value::Bool(false));
        assert_eq!(Value::default_for(TypeRef::STRING, &table), Value::Null);
        assert_eq!(
            Value::default_for(TypeRef::INTEGER.array_of(), &table),
            Value::Null
        );
    }

    #[test]
    fn string_round_trip_preserves_refcounts() {
        let table = TypeTable::new();
        let mut heap = Heap::default();
        let v = ScriptValue::Str("ab".to_owned())
            .to_value(TypeRef::STRING, &mut heap, &table)
            .unwrap();
        assert_eq!(heap.live_count(), 1);
        let back = ScriptValue::from_value(v, &mut heap);
        assert_eq!(back, ScriptValue::Str("ab".to_owned()));
        assert_eq!(heap.live_count(), 0);
    }

    #[test]
    fn typed_array_conversion() {
        let table = TypeTable::new();
        let mut heap = Heap::default();
        let v = ScriptValue::Array(vec![ScriptValue::Int(1), ScriptValue::Int(2)])
            .to_value(TypeRef::INTEGER.array_of(), &mut heap, &table)
            .unwrap();
        match &v {
            Value::Ref(id) => match heap.get(*id) {
                HeapData::Array { elem, cells } => {
                    assert_eq!(*elem, TypeRef::INTEGER);
                    assert_eq!(cells.len(), 2);
                }
                _ => panic!("expected array"),
            },
            _ => panic!("expected ref"),
        }
        v.drop_with_heap(&mut heap);
        assert_eq!(heap.live_count(), 0);
    }

    #[test]
    fn boundary_mismatch_is_type_error() {
        let table = TypeTable::new();
        let mut heap = Heap::default();
        let err = ScriptValue::Int(1)
            .to_value(TypeRef::STRING, &mut heap, &table)
            .unwrap_err();
        assert_eq!(err.kind, ExcKind::Type);
    }
}
