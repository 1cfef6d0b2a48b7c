//! Type definitions and the per-script type table.
//!
//! Every type a script can mention is interned into a [`TypeTable`] and
//! referenced by a [`TypeId`]. A [`TypeRef`] pairs a definition with an array
//! depth, so `Integer[][]` is `(INTEGER, 2)`. Because definitions are
//! interned, `TypeRef` equality is identity equality.

use ahash::AHashMap;
use strum::Display;

/// Core scalar types built into the language.
///
/// `Undef` matches any type during prototype checks and exists only for host
/// declarations; it is not nameable in script source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, serde::Serialize, serde::Deserialize)]
pub enum CoreType {
    #[strum(serialize = "void")]
    Void,
    #[strum(serialize = "undefined")]
    Undef,
    #[strum(serialize = "Boolean")]
    Boolean,
    #[strum(serialize = "Integer")]
    Integer,
    #[strum(serialize = "Real")]
    Real,
    #[strum(serialize = "String")]
    String,
}

/// Index into a [`TypeTable`]'s definition storage.
///
/// Uses `u32` to keep `TypeRef` small; compiled bytecode stores these ids
/// directly, so the table must outlive the code compiled against it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct TypeId(u32);

impl TypeId {
    /// Returns the raw index value.
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Fixed ids for the core types, registered by `TypeTable::new` in this order.
pub const VOID: TypeId = TypeId(0);
pub const UNDEF: TypeId = TypeId(1);
pub const BOOLEAN: TypeId = TypeId(2);
pub const INTEGER: TypeId = TypeId(3);
pub const REAL: TypeId = TypeId(4);
pub const STRING: TypeId = TypeId(5);

/// A type definition: core scalar, host class, script class, or function
/// prototype.
///
/// `Native` and `Script` hold indexes into the variant's class table and the
/// script's class list respectively; the definitions themselves stay owned by
/// those tables.
#[derive(Debug, Clone, PartialEq)]
pub enum TypeDef {
    Core(CoreType),
    /// Index into the variant's native class table.
    Native(usize),
    /// Index into the script's class list.
    Script(usize),
    Function(Prototype),
}

/// A function's static signature: return type, ordered argument types and
/// variadic flag. `UNDEF` argument types match anything.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Prototype {
    pub ret: TypeRef,
    pub args: Vec<TypeRef>,
    pub variadic: bool,
}

/// A type reference: definition plus array depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct TypeRef {
    pub def: TypeId,
    pub depth: u8,
}

impl TypeRef {
    pub const VOID: Self = Self { def: VOID, depth: 0 };
    pub const UNDEF: Self = Self { def: UNDEF, depth: 0 };
    pub const BOOLEAN: Self = Self { def: BOOLEAN, depth: 0 };
    pub const INTEGER: Self = Self { def: INTEGER, depth: 0 };
    pub const REAL: Self = Self { def: REAL, depth: 0 };
    pub const STRING: Self = Self { def: STRING, depth: 0 };

    #[inline]
    pub fn new(def: TypeId) -> Self {
        Self { def, depth: 0 }
    }

    /// The array type with this as element type (`T` → `T[]`).
    #[inline]
    pub fn array_of(self) -> Self {
        Self {
            def: self.def,
            depth: self.depth + 1,
        }
    }

    /// The element type of this array (`T[]` → `T`).
    ///
    /// # Panics
    /// Panics if this is not an array type; callers check `depth` first.
    #[inline]
    pub fn element(self) -> Self {
        debug_assert!(self.depth > 0, "element() on non-array type");
        Self {
            def: self.def,
            depth: self.depth - 1,
        }
    }

    #[inline]
    pub fn is_array(self) -> bool {
        self.depth > 0
    }

    #[inline]
    pub fn is_core(self, core: TypeId) -> bool {
        self.depth == 0 && self.def == core
    }
}

/// The ordered set of type definitions referenced by a script and its
/// compiled code.
///
/// Core types occupy fixed ids (see [`VOID`] .. [`STRING`]); classes and
/// function prototypes are appended as they are declared or registered.
/// Names resolve through optional namespace prefixes (`ns@Name`) before the
/// global namespace.
#[derive(Debug)]
pub struct TypeTable {
    defs: Vec<TypeDef>,
    names: AHashMap<String, TypeId>,
}

impl TypeTable {
    /// Creates a table with the core types pre-registered at their fixed ids.
    pub fn new() -> Self {
        let mut table = Self {
            defs: Vec::with_capacity(8),
            names: AHashMap::new(),
        };
        for core in [
            CoreType::Void,
            CoreType::Undef,
            CoreType::Boolean,
            CoreType::Integer,
            CoreType::Real,
            CoreType::String,
        ] {
            table.defs.push(TypeDef::Core(core));
        }
        debug_assert_eq!(table.defs.len() - 1, STRING.index());
        // Undef is host-only and deliberately has no source-level name.
        table.names.insert("void".to_owned(), VOID);
        table.names.insert("Boolean".to_owned(), BOOLEAN);
        table.names.insert("Integer".to_owned(), INTEGER);
        table.names.insert("Real".to_owned(), REAL);
        table.names.insert("String".to_owned(), STRING);
        table
    }

    #[inline]
    pub fn get(&self, id: TypeId) -> &TypeDef {
        &self.defs[id.index()]
    }

    /// Registers a class definition under `name`, returning its new id.
    ///
    /// Returns `Err` with the existing id if the name is already taken.
    pub fn register_class(&mut self, name: &str, def: TypeDef) -> Result<TypeId, TypeId> {
        if let Some(&existing) = self.names.get(name) {
            return Err(existing);
        }
        let id = TypeId(self.defs.len() as u32);
        self.defs.push(def);
        self.names.insert(name.to_owned(), id);
        Ok(id)
    }

    /// Interns a function prototype, returning the id of an equal existing
    /// definition when there is one.
    pub fn register_prototype(&mut self, proto: Prototype) -> TypeId {
        let candidate = TypeDef::Function(proto);
        if let Some(pos) = self.defs.iter().position(|d| *d == candidate) {
            return TypeId(pos as u32);
        }
        let id = TypeId(self.defs.len() as u32);
        self.defs.push(candidate);
        id
    }

    /// Resolves a type name, walking the provided namespace prefixes first,
    /// then the global namespace.
    pub fn resolve(&self, namespaces: &[String], name: &str) -> Option<TypeId> {
        for ns in namespaces {
            let qualified = format!("{ns}@{name}");
            if let Some(&id) = self.names.get(&qualified) {
                return Some(id);
            }
        }
        self.names.get(name).copied()
    }

    /// True for any value kind represented as a pointer to a ref-counted heap
    /// cell: arrays, strings, objects and function pointers.
    pub fn is_reference(&self, ty: TypeRef) -> bool {
        if ty.depth > 0 {
            return true;
        }
        match self.get(ty.def) {
            TypeDef::Core(CoreType::String) => true,
            TypeDef::Core(_) => false,
            TypeDef::Native(_) | TypeDef::Script(_) | TypeDef::Function(_) => true,
        }
    }

    /// Whether a value of type `src` may be stored into a slot of type `dst`.
    ///
    /// Identical types always match; `UNDEF` on either side matches anything
    /// (host declarations); int→real widening is allowed iff the variant
    /// permits implicit casts. Null assignment is handled separately by the
    /// compiler since the null literal carries no type of its own.
    pub fn can_assign(&self, dst: TypeRef, src: TypeRef, implicit_casts: bool) -> bool {
        if dst == src || dst == TypeRef::UNDEF || src == TypeRef::UNDEF {
            return true;
        }
        if implicit_casts && dst == TypeRef::REAL && src == TypeRef::INTEGER {
            return true;
        }
        false
    }

    /// Display name of a type, with `[]` appended per array depth.
    pub fn name_of(&self, ty: TypeRef, class_name: impl Fn(&TypeDef) -> String) -> String {
        let mut name = match self.get(ty.def) {
            TypeDef::Core(core) => core.to_string(),
            def @ (TypeDef::Native(_) | TypeDef::Script(_)) => class_name(def),
            TypeDef::Function(_) => "function".to_owned(),
        };
        for _ in 0..ty.depth {
            name.push_str("[]");
        }
        name
    }
}

impl Default for TypeTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn core_types_have_fixed_ids() {
        let table = TypeTable::new();
        assert_eq!(table.resolve(&[], "Integer"), Some(INTEGER));
        assert_eq!(table.resolve(&[], "String"), Some(STRING));
        assert_eq!(table.resolve(&[], "void"), Some(VOID));
        // undefined is host-only
        assert_eq!(table.resolve(&[], "undefined"), None);
    }

    #[test]
    fn array_depth_round_trip() {
        let arr = TypeRef::INTEGER.array_of().array_of();
        assert_eq!(arr.depth, 2);
        assert_eq!(arr.element().element(), TypeRef::INTEGER);
        assert_ne!(arr, TypeRef::INTEGER.array_of());
    }

    #[test]
    fn reference_types() {
        let table = TypeTable::new();
        assert!(table.is_reference(TypeRef::STRING));
        assert!(table.is_reference(TypeRef::INTEGER.array_of()));
        assert!(!table.is_reference(TypeRef::INTEGER));
        assert!(!table.is_reference(TypeRef::BOOLEAN));
    }

    #[test]
    fn assignability() {
        let table = TypeTable::new();
        assert!(table.can_assign(TypeRef::INTEGER, TypeRef::INTEGER, false));
        assert!(!table.can_assign(TypeRef::REAL, TypeRef::INTEGER, false));
        assert!(table.can_assign(TypeRef::REAL, TypeRef::INTEGER, true));
        assert!(!table.can_assign(TypeRef::INTEGER, TypeRef::REAL, true));
        assert!(table.can_assign(TypeRef::UNDEF, TypeRef::STRING, false));
    }

    #[test]
    fn prototype_interning_dedupes() {
        let mut table = TypeTable::new();
        let proto = Prototype {
            ret: TypeRef::INTEGER,
            args: vec![TypeRef::STRING],
            variadic: false,
        };
        let a = table.register_prototype(proto.clone());
        let b = table.register_prototype(proto);
        assert_eq!(a, b);
    }

    #[test]
    fn namespaced_resolution_prefers_prefix() {
        let mut table = TypeTable::new();
        let id = table
            .register_class("gui@Window", TypeDef::Native(0))
            .unwrap();
        assert_eq!(table.resolve(&["gui".to_owned()], "Window"), Some(id));
        assert_eq!(table.resolve(&[], "Window"), None);
    }
}
