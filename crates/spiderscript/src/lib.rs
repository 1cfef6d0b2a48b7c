//! SpiderScript: an embeddable, statically-typed scripting language.
//!
//! The pipeline takes source text through a hand-written lexer, a
//! recursive-descent parser, a constant-folding AST optimizer and a
//! type-checked bytecode compiler targeting a register machine, then
//! executes it on an interpreter with reference-counted heap values,
//! structured exception unwinding and a host-registered FFI surface.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use spiderscript::{ScriptValue, SpiderScript, Variant};
//!
//! let variant = Arc::new(Variant::new("example"));
//! let mut script = SpiderScript::parse_buffer(
//!     variant,
//!     "Integer f(Integer n) { return n * 2 + 1; }",
//!     "example.ss",
//! )
//! .unwrap();
//! let result = script.call("f", &[ScriptValue::Int(20)]).unwrap();
//! assert_eq!(result, ScriptValue::Int(41));
//! ```

pub mod ast;
pub mod bytecode;
pub mod exception;
pub mod heap;
pub mod lexer;
pub mod optimize;
pub mod parser;
pub mod script;
pub mod types;
pub mod value;
pub mod variant;

pub use crate::exception::{CompileError, ExcKind, RuntimeError, ScriptError, SyntaxError};
pub use crate::parser::{IncludeLoader, NoIncludes};
pub use crate::script::SpiderScript;
pub use crate::types::{Prototype, TypeRef};
pub use crate::value::{ObjectHandle, ScriptValue, Value};
pub use crate::variant::{
    ConstValue, HostCall, NamedConstant, NativeAttr, NativeClass, NativeFunction, Variant,
};
