//! Bytecode: operation definitions, the emission builder, the AST compiler
//! and the register-machine interpreter.

pub mod builder;
pub mod compiler;
pub mod op;
pub mod vm;

pub use builder::FunctionBuilder;
pub use op::{Code, LabelId, Op, Reg};
