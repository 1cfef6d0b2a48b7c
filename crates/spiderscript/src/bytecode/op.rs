//! Bytecode operations and the compiled-function container.
//!
//! Each operation carries exactly the operand payload its encoding class
//! allows: nothing, up to three register indices, an integer or real
//! immediate, a string, a named access (name + slot), a resolved call id
//! with argument registers, or a jump label. Arithmetic is grouped into
//! typed families selected by the compiler from the operands' static types.

use strum::Display;

use crate::types::{CoreType, TypeId, TypeRef};

/// Index into a function's register file. Bounded by 64 per function.
pub type Reg = u8;

/// Index into a function's label table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct LabelId(pub u32);

impl LabelId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Integer binary operations (two's-complement, 64-bit, wrap-around).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, serde::Serialize, serde::Deserialize)]
#[strum(serialize_all = "lowercase")]
pub enum IntBinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    Rol,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// Real binary operations (IEEE 754 binary64).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, serde::Serialize, serde::Deserialize)]
#[strum(serialize_all = "lowercase")]
pub enum RealBinOp {
    Add,
    Sub,
    Mul,
    Div,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// String binary operations; comparison is lexicographic over bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, serde::Serialize, serde::Deserialize)]
#[strum(serialize_all = "lowercase")]
pub enum StrBinOp {
    Add,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// Boolean binary operations. `And`/`Or` appear only when the compiler could
/// not short-circuit (it always can for the source operators, so these are
/// mainly for hand-built code); `Xor` and `Eq` have no short-circuit form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, serde::Serialize, serde::Deserialize)]
#[strum(serialize_all = "lowercase")]
pub enum BoolBinOp {
    And,
    Or,
    Xor,
    Eq,
}

/// Integer unary operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, serde::Serialize, serde::Deserialize)]
#[strum(serialize_all = "lowercase")]
pub enum IntUniOp {
    Neg,
    BitNot,
}

/// Resolved call target embedded in call operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum CallTarget {
    /// Index into the script's function list.
    Script(u16),
    /// Index into the variant's native function table.
    Native(u16),
    /// Method of a script class: (class index, method index).
    ScriptMethod { class: u16, method: u16 },
    /// Method of a native class: (class index, method index).
    NativeMethod { class: u16, method: u16 },
}

/// One bytecode operation.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Op {
    Nop,

    /// Opens a variable-lifetime scope; registers tagged inside it are
    /// cleared when the scope closes (including during unwinding).
    EnterContext,
    LeaveContext,
    /// Names a register as a variable in the current context.
    TagRegister { reg: Reg, name: Box<str> },

    /// Binds a per-function global slot to a script global on first use.
    ImportGlobal {
        slot: u8,
        global: u16,
        name: Box<str>,
    },
    GetGlobal { dst: Reg, slot: u8 },
    SetGlobal { slot: u8, src: Reg },

    /// Loads null; the type records what the register statically holds.
    LoadNull { dst: Reg, ty: TypeRef },
    LoadBool { dst: Reg, value: bool },
    LoadInt { dst: Reg, value: i64 },
    LoadReal { dst: Reg, value: f64 },
    LoadString { dst: Reg, value: Box<[u8]> },

    Return { src: Reg },
    ClearReg { reg: Reg },
    Mov { dst: Reg, src: Reg },
    RefEq { dst: Reg, a: Reg, b: Reg },
    RefNe { dst: Reg, a: Reg, b: Reg },

    Jump { label: LabelId },
    JumpIf { label: LabelId, cond: Reg },
    JumpIfNot { label: LabelId, cond: Reg },

    CreateArray {
        dst: Reg,
        elem: TypeRef,
        len: Reg,
    },
    CreateObject {
        dst: Reg,
        class: TypeId,
        args: Box<[Reg]>,
    },
    CallFunction {
        dst: Reg,
        target: CallTarget,
        args: Box<[Reg]>,
    },
    CallMethod {
        dst: Reg,
        target: CallTarget,
        this: Reg,
        args: Box<[Reg]>,
    },

    GetIndex { dst: Reg, arr: Reg, index: Reg },
    SetIndex { arr: Reg, index: Reg, src: Reg },
    /// Attribute access by declared slot; the name is kept for diagnostics.
    GetElement {
        dst: Reg,
        obj: Reg,
        attr: u16,
        name: Box<str>,
    },
    SetElement {
        obj: Reg,
        attr: u16,
        src: Reg,
        name: Box<str>,
    },

    Cast { dst: Reg, to: CoreType, src: Reg },

    BinBool { op: BoolBinOp, dst: Reg, a: Reg, b: Reg },
    BinInt { op: IntBinOp, dst: Reg, a: Reg, b: Reg },
    BinReal { op: RealBinOp, dst: Reg, a: Reg, b: Reg },
    BinStr { op: StrBinOp, dst: Reg, a: Reg, b: Reg },
    NotBool { dst: Reg, src: Reg },
    UniInt { op: IntUniOp, dst: Reg, src: Reg },
    NegReal { dst: Reg, src: Reg },

    /// Pushes an exception handler (target label, saved context depth is the
    /// depth at execution time).
    ExceptionPush { label: LabelId },
    ExceptionPop,
    /// Branches to the label if an exception was caught, consuming it.
    ExceptionCheck { label: LabelId },
}

/// Operand encoding class of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    NoOperands,
    Registers,
    IntImmediate,
    RealImmediate,
    StringImmediate,
    NamedAccess,
    Call,
    Jump,
}

impl Op {
    /// The declared encoding class of this operation.
    pub fn encoding(&self) -> Encoding {
        match self {
            Self::Nop | Self::EnterContext | Self::LeaveContext | Self::ExceptionPop => Encoding::NoOperands,
            Self::TagRegister { .. }
            | Self::ImportGlobal { .. }
            | Self::GetElement { .. }
            | Self::SetElement { .. } => Encoding::NamedAccess,
            Self::GetGlobal { .. }
            | Self::SetGlobal { .. }
            | Self::Return { .. }
            | Self::ClearReg { .. }
            | Self::Mov { .. }
            | Self::RefEq { .. }
            | Self::RefNe { .. }
            | Self::GetIndex { .. }
            | Self::SetIndex { .. }
            | Self::Cast { .. }
            | Self::BinBool { .. }
            | Self::BinInt { .. }
            | Self::BinReal { .. }
            | Self::BinStr { .. }
            | Self::NotBool { .. }
            | Self::UniInt { .. }
            | Self::NegReal { .. }
            | Self::LoadNull { .. }
            | Self::CreateArray { .. } => Encoding::Registers,
            Self::LoadBool { .. } | Self::LoadInt { .. } => Encoding::IntImmediate,
            Self::LoadReal { .. } => Encoding::RealImmediate,
            Self::LoadString { .. } => Encoding::StringImmediate,
            Self::CreateObject { .. } | Self::CallFunction { .. } | Self::CallMethod { .. } => Encoding::Call,
            Self::Jump { .. }
            | Self::JumpIf { .. }
            | Self::JumpIfNot { .. }
            | Self::ExceptionPush { .. }
            | Self::ExceptionCheck { .. } => Encoding::Jump,
        }
    }

    /// Every register index this operation touches.
    pub fn registers(&self) -> Vec<Reg> {
        match self {
            Self::Nop
            | Self::EnterContext
            | Self::LeaveContext
            | Self::ExceptionPop
            | Self::ImportGlobal { .. }
            | Self::Jump { .. }
            | Self::ExceptionPush { .. }
            | Self::ExceptionCheck { .. } => Vec::new(),
            Self::TagRegister { reg, .. } | Self::ClearReg { reg } => vec![*reg],
            Self::GetGlobal { dst: reg, .. }
            | Self::SetGlobal { src: reg, .. }
            | Self::LoadNull { dst: reg, .. }
            | Self::LoadBool { dst: reg, .. }
            | Self::LoadInt { dst: reg, .. }
            | Self::LoadReal { dst: reg, .. }
            | Self::LoadString { dst: reg, .. }
            | Self::Return { src: reg }
            | Self::JumpIf { cond: reg, .. }
            | Self::JumpIfNot { cond: reg, .. } => vec![*reg],
            Self::Mov { dst, src }
            | Self::GetElement { dst, obj: src, .. }
            | Self::SetElement { obj: dst, src, .. }
            | Self::Cast { dst, src, .. }
            | Self::NotBool { dst, src }
            | Self::UniInt { dst, src, .. }
            | Self::NegReal { dst, src }
            | Self::CreateArray { dst, len: src, .. } => vec![*dst, *src],
            Self::RefEq { dst, a, b }
            | Self::RefNe { dst, a, b }
            | Self::GetIndex { dst, arr: a, index: b }
            | Self::SetIndex { arr: dst, index: a, src: b }
            | Self::BinBool { dst, a, b, .. }
            | Self::BinInt { dst, a, b, .. }
            | Self::BinReal { dst, a, b, .. }
            | Self::BinStr { dst, a, b, .. } => vec![*dst, *a, *b],
            Self::CreateObject { dst, args, .. } | Self::CallFunction { dst, args, .. } => {
                let mut regs = vec![*dst];
                regs.extend_from_slice(args);
                regs
            }
            Self::CallMethod { dst, this, args, .. } => {
                let mut regs = vec![*dst, *this];
                regs.extend_from_slice(args);
                regs
            }
        }
    }

    /// The jump label this operation targets, if any.
    pub fn label(&self) -> Option<LabelId> {
        match self {
            Self::Jump { label }
            | Self::JumpIf { label, .. }
            | Self::JumpIfNot { label, .. }
            | Self::ExceptionPush { label }
            | Self::ExceptionCheck { label } => Some(*label),
            _ => None,
        }
    }
}

/// A compiled function: register count, label table and operation sequence.
///
/// Compilation metadata (variable names, context depth) lives only in the
/// builder and is discarded once the code is built.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Code {
    ops: Vec<Op>,
    /// Label index → operation position. Targets may equal `ops.len()`,
    /// which falls off the end and returns.
    labels: Vec<u32>,
    max_registers: u8,
}

impl Code {
    pub fn new(ops: Vec<Op>, labels: Vec<u32>, max_registers: u8) -> Self {
        Self {
            ops,
            labels,
            max_registers,
        }
    }

    #[inline]
    pub fn ops(&self) -> &[Op] {
        &self.ops
    }

    #[inline]
    pub fn max_registers(&self) -> u8 {
        self.max_registers
    }

    /// Target position of a label.
    ///
    /// # Panics
    /// Panics if the label was never allocated; `validate` catches this for
    /// compiler output.
    #[inline]
    pub fn label_target(&self, label: LabelId) -> usize {
        self.labels[label.index()] as usize
    }

    /// Checks structural invariants: every jump targets an allocated label,
    /// every label target lies within the op sequence, and every operand
    /// register index is below the register count.
    pub fn validate(&self) -> Result<(), String> {
        for (position, target) in self.labels.iter().enumerate() {
            if *target as usize > self.ops.len() {
                return Err(format!(
                    "label {position} targets position {target} beyond {} ops",
                    self.ops.len()
                ));
            }
        }
        for (position, op) in self.ops.iter().enumerate() {
            if let Some(label) = op.label() {
                if label.index() >= self.labels.len() {
                    return Err(format!("op {position} jumps to unallocated label {}", label.0));
                }
            }
            for reg in op.registers() {
                if reg as usize >= self.max_registers as usize {
                    return Err(format!(
                        "op {position} touches register {reg} outside the {}-register frame",
                        self.max_registers
                    ));
                }
            }
        }
        Ok(())
    }
}
