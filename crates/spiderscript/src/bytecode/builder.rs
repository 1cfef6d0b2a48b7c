//! Low-level bytecode builder: labels, contexts, registers and globals.
//!
//! The builder owns the compilation-time metadata the finished [`Code`]
//! discards: the variable stack (with shadowing) per lexical context, the
//! register free list, and the per-function global slot table. Limits are
//! enforced here: 64 registers and 32 global slots per function.

use std::borrow::Cow;

use indexmap::IndexMap;

use super::op::{Code, LabelId, Op, Reg};
use crate::types::TypeRef;

/// Register-file size limit per function.
pub const MAX_REGISTERS: usize = 64;

/// Global-slot limit per function's view of the script globals.
pub const MAX_GLOBALS: usize = 32;

/// A named variable bound to a register inside one context.
#[derive(Debug)]
struct Variable {
    name: String,
    reg: Reg,
    ty: TypeRef,
}

/// One lexical context's variables.
#[derive(Debug, Default)]
struct ContextFrame {
    vars: Vec<Variable>,
}

/// Builder for one function's bytecode.
#[derive(Debug)]
pub struct FunctionBuilder {
    ops: Vec<Op>,
    labels: Vec<Option<u32>>,
    contexts: Vec<ContextFrame>,
    in_use: [bool; MAX_REGISTERS],
    high_water: u8,
    /// Slot table: insertion order is the slot index; values are script
    /// global indexes.
    globals: IndexMap<String, u16>,
}

impl Default for FunctionBuilder {
    fn default() -> Self {
        Self {
            ops: Vec::default(),
            labels: Vec::default(),
            contexts: Vec::default(),
            in_use: [false; MAX_REGISTERS],
            high_water: 0,
            globals: IndexMap::default(),
        }
    }
}

impl FunctionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one operation.
    pub fn emit(&mut self, op: Op) {
        self.ops.push(op);
    }

    /// Current operation position; useful only for tests.
    pub fn position(&self) -> usize {
        self.ops.len()
    }

    // ------------------------------------------------------------------
    // Labels
    // ------------------------------------------------------------------

    /// Allocates an unbound label.
    #[must_use]
    pub fn alloc_label(&mut self) -> LabelId {
        let id = LabelId(self.labels.len() as u32);
        self.labels.push(None);
        id
    }

    /// Binds a label to the current position.
    pub fn set_label(&mut self, label: LabelId) {
        let slot = &mut self.labels[label.index()];
        debug_assert!(slot.is_none(), "label bound twice");
        *slot = Some(self.ops.len() as u32);
    }

    // ------------------------------------------------------------------
    // Contexts and variables
    // ------------------------------------------------------------------

    /// Opens a variable context, emitting the matching runtime op.
    pub fn enter_context(&mut self) {
        self.contexts.push(ContextFrame::default());
        self.emit(Op::EnterContext);
    }

    /// Closes the innermost context: emits the runtime op and releases every
    /// register the context's variables held.
    pub fn leave_context(&mut self) {
        self.emit(Op::LeaveContext);
        let frame = self.contexts.pop().expect("leave_context without enter");
        for var in frame.vars {
            self.in_use[var.reg as usize] = false;
        }
    }

    /// Number of open contexts; loops record this to emit unwind ops for
    /// `break`/`continue` across scopes.
    pub fn context_depth(&self) -> usize {
        self.contexts.len()
    }

    /// Allocates a register for a scratch value.
    pub fn alloc_reg(&mut self) -> Result<Reg, Cow<'static, str>> {
        for (index, used) in self.in_use.iter_mut().enumerate() {
            if !*used {
                *used = true;
                let reg = index as Reg;
                if reg >= self.high_water {
                    self.high_water = reg + 1;
                }
                return Ok(reg);
            }
        }
        Err(format!("function requires more than {MAX_REGISTERS} registers").into())
    }

    /// Releases a scratch register for reuse.
    pub fn free_reg(&mut self, reg: Reg) {
        debug_assert!(self.in_use[reg as usize], "register freed twice");
        self.in_use[reg as usize] = false;
    }

    /// Allocates a register and names it as a variable in the current
    /// context, emitting the tag op. The register lives until the context
    /// closes; shadowing an outer name is allowed.
    pub fn define_var(&mut self, name: &str, ty: TypeRef) -> Result<Reg, Cow<'static, str>> {
        let reg = self.alloc_reg()?;
        let frame = self
            .contexts
            .last_mut()
            .expect("define_var outside any context");
        frame.vars.push(Variable {
            name: name.to_owned(),
            reg,
            ty,
        });
        self.emit(Op::TagRegister {
            reg,
            name: name.into(),
        });
        Ok(reg)
    }

    /// Finds a variable by name, innermost context first, latest definition
    /// first within a context (shadowing).
    pub fn lookup_var(&self, name: &str) -> Option<(Reg, TypeRef)> {
        for frame in self.contexts.iter().rev() {
            for var in frame.vars.iter().rev() {
                if var.name == name {
                    return Some((var.reg, var.ty));
                }
            }
        }
        None
    }

    // ------------------------------------------------------------------
    // Globals
    // ------------------------------------------------------------------

    /// Returns this function's slot for a script global, importing it on
    /// first use.
    pub fn import_global(&mut self, name: &str, global: u16) -> Result<u8, Cow<'static, str>> {
        if let Some(slot) = self.globals.get_index_of(name) {
            return Ok(slot as u8);
        }
        if self.globals.len() >= MAX_GLOBALS {
            return Err(format!("function imports more than {MAX_GLOBALS} globals").into());
        }
        let slot = self.globals.len() as u8;
        self.globals.insert(name.to_owned(), global);
        self.emit(Op::ImportGlobal {
            slot,
            global,
            name: name.into(),
        });
        Ok(slot)
    }

    // ------------------------------------------------------------------
    // Finish
    // ------------------------------------------------------------------

    /// Builds the final [`Code`].
    ///
    /// # Panics
    /// Panics if a label was allocated but never bound; the compiler binds
    /// every label it allocates.
    #[must_use]
    pub fn build(self) -> Code {
        let labels = self
            .labels
            .into_iter()
            .enumerate()
            .map(|(index, target)| target.unwrap_or_else(|| panic!("label {index} never bound")))
            .collect();
        Code::new(self.ops, labels, self.high_water.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::op::IntBinOp;

    #[test]
    fn emits_in_order() {
        let mut builder = FunctionBuilder::new();
        let dst = builder.alloc_reg().unwrap();
        builder.emit(Op::LoadInt { dst, value: 7 });
        builder.emit(Op::Return { src: dst });
        let code = builder.build();
        assert_eq!(
            code.ops(),
            &[Op::LoadInt { dst: 0, value: 7 }, Op::Return { src: 0 }]
        );
        code.validate().unwrap();
    }

    #[test]
    fn labels_bind_to_positions() {
        let mut builder = FunctionBuilder::new();
        let end = builder.alloc_label();
        let reg = builder.alloc_reg().unwrap();
        builder.emit(Op::Jump { label: end });
        builder.emit(Op::LoadInt { dst: reg, value: 1 });
        builder.set_label(end);
        builder.emit(Op::Return { src: reg });
        let code = builder.build();
        assert_eq!(code.label_target(end), 2);
        code.validate().unwrap();
    }

    #[test]
    fn register_reuse_after_free() {
        let mut builder = FunctionBuilder::new();
        let a = builder.alloc_reg().unwrap();
        let b = builder.alloc_reg().unwrap();
        assert_eq!((a, b), (0, 1));
        builder.free_reg(a);
        assert_eq!(builder.alloc_reg().unwrap(), 0);
        // High water mark counts the peak, not the current usage.
        let code = builder.build();
        assert_eq!(code.max_registers(), 2);
    }

    #[test]
    fn register_cap_is_64() {
        let mut builder = FunctionBuilder::new();
        for _ in 0..MAX_REGISTERS {
            builder.alloc_reg().unwrap();
        }
        assert!(builder.alloc_reg().is_err());
    }

    #[test]
    fn shadowing_finds_innermost() {
        let mut builder = FunctionBuilder::new();
        builder.enter_context();
        let outer = builder.define_var("x", TypeRef::INTEGER).unwrap();
        builder.enter_context();
        let inner = builder.define_var("x", TypeRef::STRING).unwrap();
        assert_ne!(outer, inner);
        assert_eq!(builder.lookup_var("x"), Some((inner, TypeRef::STRING)));
        builder.leave_context();
        assert_eq!(builder.lookup_var("x"), Some((outer, TypeRef::INTEGER)));
    }

    #[test]
    fn leaving_context_frees_variable_registers() {
        let mut builder = FunctionBuilder::new();
        builder.enter_context();
        let reg = builder.define_var("x", TypeRef::INTEGER).unwrap();
        builder.leave_context();
        assert_eq!(builder.alloc_reg().unwrap(), reg);
    }

    #[test]
    fn global_slots_dedupe_and_cap() {
        let mut builder = FunctionBuilder::new();
        let a = builder.import_global("g", 0).unwrap();
        let again = builder.import_global("g", 0).unwrap();
        assert_eq!(a, again);
        for i in 1..MAX_GLOBALS {
            builder.import_global(&format!("g{i}"), i as u16).unwrap();
        }
        assert!(builder.import_global("one_too_many", 99).is_err());
    }

    #[test]
    fn validate_rejects_out_of_range_register() {
        let code = Code::new(
            vec![Op::BinInt {
                op: IntBinOp::Add,
                dst: 9,
                a: 0,
                b: 1,
            }],
            vec![],
            2,
        );
        assert!(code.validate().is_err());
    }
}
