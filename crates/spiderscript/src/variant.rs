//! The host-facing variant record: native functions, native classes, named
//! constants and policy flags.
//!
//! Every table is owned by the variant passed to a script instance; there is
//! no process-wide registry. A native handler is a plain function taking the
//! host call context and the evaluated arguments, returning a value or a
//! runtime error that becomes the script's pending exception.

use crate::exception::RunResult;
use crate::heap::{DropHook, Heap, HeapData};
use crate::types::{Prototype, TypeId, TypeRef, TypeTable};
use crate::value::Value;

/// Context handed to native handlers: enough of the script state to read
/// arguments and allocate results.
pub struct HostCall<'a> {
    pub heap: &'a mut Heap,
    pub types: &'a TypeTable,
}

impl<'a> HostCall<'a> {
    /// Allocates a script string from UTF-8 text.
    pub fn alloc_str(&mut self, text: &str) -> Value {
        Value::Ref(
            self.heap
                .allocate(HeapData::Str(text.as_bytes().to_vec().into_boxed_slice())),
        )
    }

    /// Allocates a script string from raw bytes.
    pub fn alloc_bytes(&mut self, bytes: &[u8]) -> Value {
        Value::Ref(self.heap.allocate(HeapData::Str(bytes.to_vec().into_boxed_slice())))
    }

    /// Byte content of a string argument, if it is one.
    pub fn str_bytes(&self, value: &Value) -> Option<&[u8]> {
        match value {
            Value::Ref(id) => match self.heap.get(*id) {
                HeapData::Str(bytes) => Some(bytes),
                _ => None,
            },
            _ => None,
        }
    }

    /// Allocates an object of a native class with defaulted attributes.
    pub fn alloc_object(&mut self, class: TypeId, attrs: Vec<Value>, drop_hook: Option<DropHook>) -> Value {
        Value::Ref(self.heap.allocate(HeapData::Object {
            class,
            attrs,
            drop_hook,
        }))
    }
}

/// Handler signature for host-registered functions and methods.
///
/// Method handlers receive the object as the first argument. A nonzero-style
/// failure is expressed as `Err`, which the VM turns into the pending
/// exception and unwinds.
pub type NativeHandler = fn(&mut HostCall<'_>, &[Value]) -> RunResult<Value>;

/// A host-registered function.
#[derive(Clone)]
pub struct NativeFunction {
    /// Possibly `@`-qualified name (`sys@print`).
    pub name: String,
    pub proto: Prototype,
    pub handler: NativeHandler,
}

impl std::fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeFunction")
            .field("name", &self.name)
            .field("proto", &self.proto)
            .finish_non_exhaustive()
    }
}

impl NativeFunction {
    pub fn new(name: impl Into<String>, proto: Prototype, handler: NativeHandler) -> Self {
        Self {
            name: name.into(),
            proto,
            handler,
        }
    }
}

/// A declared attribute of a native class.
#[derive(Debug, Clone)]
pub struct NativeAttr {
    pub name: String,
    pub ty: TypeRef,
    pub read_only: bool,
}

/// A host-registered class: constructor, optional destructor hook,
/// attributes and methods.
#[derive(Debug, Clone)]
pub struct NativeClass {
    pub name: String,
    pub constructor: Option<NativeFunction>,
    pub destructor: Option<DropHook>,
    pub attributes: Vec<NativeAttr>,
    pub methods: Vec<NativeFunction>,
}

impl NativeClass {
    pub fn attr_index(&self, name: &str) -> Option<usize> {
        self.attributes.iter().position(|a| a.name == name)
    }

    pub fn method_index(&self, name: &str) -> Option<usize> {
        self.methods.iter().position(|m| m.name == name)
    }
}

/// A constant value supplied by the variant, loadable without the heap until
/// strings are involved.
#[derive(Debug, Clone, PartialEq)]
pub enum ConstValue {
    Bool(bool),
    Int(i64),
    Real(f64),
    Str(Vec<u8>),
}

impl ConstValue {
    /// Materializes the constant as a runtime value.
    pub fn to_value(&self, heap: &mut Heap) -> Value {
        match self {
            Self::Bool(b) => Value::Bool(*b),
            Self::Int(v) => Value::Int(*v),
            Self::Real(v) => Value::Real(*v),
            Self::Str(bytes) => Value::Ref(heap.allocate(HeapData::Str(bytes.clone().into_boxed_slice()))),
        }
    }
}

/// A named constant exposed to scripts as a read-only value.
#[derive(Debug, Clone)]
pub struct NamedConstant {
    pub name: String,
    pub ty: TypeRef,
    pub value: ConstValue,
}

/// A configured host dialect: the set of native functions, classes and
/// constants available to a script instance, plus policy flags and the error
/// sink.
pub struct Variant {
    pub name: String,
    /// Permit implicit int→real widening.
    pub implicit_casts: bool,
    /// Receives every formatted error message the script surfaces.
    pub error_sink: Option<fn(&str)>,
    pub functions: Vec<NativeFunction>,
    pub classes: Vec<NativeClass>,
    pub constants: Vec<NamedConstant>,
}

impl std::fmt::Debug for Variant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Variant")
            .field("name", &self.name)
            .field("implicit_casts", &self.implicit_casts)
            .field("functions", &self.functions.len())
            .field("classes", &self.classes.len())
            .field("constants", &self.constants.len())
            .finish()
    }
}

impl Variant {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            implicit_casts: false,
            error_sink: None,
            functions: Vec::new(),
            classes: Vec::new(),
            constants: Vec::new(),
        }
    }

    pub fn with_implicit_casts(mut self, allow: bool) -> Self {
        self.implicit_casts = allow;
        self
    }

    pub fn with_error_sink(mut self, sink: fn(&str)) -> Self {
        self.error_sink = Some(sink);
        self
    }

    pub fn with_function(mut self, function: NativeFunction) -> Self {
        self.functions.push(function);
        self
    }

    pub fn with_class(mut self, class: NativeClass) -> Self {
        self.classes.push(class);
        self
    }

    pub fn with_constant(mut self, constant: NamedConstant) -> Self {
        self.constants.push(constant);
        self
    }

    /// Resolves a function name against the namespaces along `path`: the
    /// fully qualified name first, then each shorter prefix, then the global
    /// namespace.
    pub fn find_function(&self, path: &[String], name: &str) -> Option<usize> {
        for prefix_len in (0..=path.len()).rev() {
            let candidate = qualified(&path[..prefix_len], name);
            if let Some(index) = self.functions.iter().position(|f| f.name == candidate) {
                return Some(index);
            }
        }
        None
    }

    /// Resolves a named constant the same way.
    pub fn find_constant(&self, path: &[String], name: &str) -> Option<usize> {
        for prefix_len in (0..=path.len()).rev() {
            let candidate = qualified(&path[..prefix_len], name);
            if let Some(index) = self.constants.iter().position(|c| c.name == candidate) {
                return Some(index);
            }
        }
        None
    }

    /// Routes a formatted message to the host's error callback, if any.
    pub fn emit_error(&self, message: &str) {
        if let Some(sink) = self.error_sink {
            sink(message);
        }
    }
}

fn qualified(path: &[String], name: &str) -> String {
    if path.is_empty() {
        name.to_owned()
    } else {
        format!("{}@{name}", path.join("@"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exception::RuntimeError;
    use crate::types::TypeRef;

    fn nop_handler(_ctx: &mut HostCall<'_>, _args: &[Value]) -> Result<Value, RuntimeError> {
        Ok(Value::Null)
    }

    #[test]
    fn function_lookup_walks_namespaces() {
        let proto = Prototype {
            ret: TypeRef::VOID,
            args: vec![],
            variadic: false,
        };
        let variant = Variant::new("test")
            .with_function(NativeFunction::new("sys@io@print", proto.clone(), nop_handler))
            .with_function(NativeFunction::new("print", proto, nop_handler));
        let path = vec!["sys".to_owned(), "io".to_owned()];
        assert_eq!(variant.find_function(&path, "print"), Some(0));
        assert_eq!(variant.find_function(&[], "print"), Some(1));
        assert_eq!(variant.find_function(&[], "missing"), None);
    }
}
