//! Type-checked AST-to-bytecode compiler.
//!
//! Compiles one function at a time: argument registers sit at the bottom of
//! the frame, then the walk produces, for every expression node, a
//! destination register and a static type. Statements produce no value.
//! Opcode families are selected from operand types; mixed Integer/Real
//! operands require an explicit cast unless the variant permits implicit
//! widening. The compiler aborts the function on its first error and the
//! caller moves on to the next function.

use crate::ast::{BinOp, CodeLoc, Expr, ExprLoc, Stmt, SwitchCase, UniOp};
use crate::bytecode::builder::FunctionBuilder;
use crate::bytecode::op::{
    BoolBinOp, CallTarget, Code, IntBinOp, IntUniOp, LabelId, Op, RealBinOp, Reg, StrBinOp,
};
use crate::exception::{CompileError, CompileResult};
use crate::script::{GlobalVar, ScriptClass, ScriptFunction};
use crate::types::{CoreType, TypeDef, TypeId, TypeRef, TypeTable};
use crate::variant::{ConstValue, Variant};

/// Everything name resolution can see while compiling one function.
pub struct CompileEnv<'a> {
    pub types: &'a TypeTable,
    pub functions: &'a [ScriptFunction],
    pub classes: &'a [ScriptClass],
    pub globals: &'a [GlobalVar],
    pub variant: &'a Variant,
}

/// The destination register and static type of a compiled expression.
///
/// `owned` marks scratch registers the consumer must release; variable
/// registers are borrowed and stay alive until their context closes.
#[derive(Debug, Clone, Copy)]
struct ExprResult {
    reg: Reg,
    ty: TypeRef,
    owned: bool,
}

fn owned(reg: Reg, ty: TypeRef) -> ExprResult {
    ExprResult { reg, ty, owned: true }
}

fn borrowed(reg: Reg, ty: TypeRef) -> ExprResult {
    ExprResult { reg, ty, owned: false }
}

/// A resolved storage location: the common shape behind assignment,
/// compound assignment, `++`/`--` and `delete`.
enum Place {
    Local { reg: Reg, ty: TypeRef },
    Global { slot: u8, ty: TypeRef },
    Attr { obj: ExprResult, slot: u16, ty: TypeRef, name: String },
    Cell { arr: ExprResult, index: ExprResult, ty: TypeRef },
}

impl Place {
    fn ty(&self) -> TypeRef {
        match self {
            Self::Local { ty, .. } | Self::Global { ty, .. } | Self::Attr { ty, .. } | Self::Cell { ty, .. } => *ty,
        }
    }
}

/// An active loop (or switch) for `break`/`continue` resolution.
struct LoopScope {
    tag: Option<String>,
    break_label: LabelId,
    /// `None` for switch scopes, which `continue` skips over.
    continue_label: Option<LabelId>,
    /// Context depth at the scope's body; jumps out emit `LeaveContext` for
    /// every context opened past this depth.
    depth: usize,
}

/// The static type of the `null` literal: matches any reference type at
/// store-check time and nothing else.
const NULL_TY: TypeRef = TypeRef::UNDEF;

pub struct Compiler<'a> {
    env: &'a CompileEnv<'a>,
    b: FunctionBuilder,
    ret: TypeRef,
    loops: Vec<LoopScope>,
}

impl<'a> Compiler<'a> {
    /// Compiles a function (or method, when `this_class` names the class the
    /// implicit `this` argument belongs to) into bytecode.
    pub fn compile_function(
        env: &'a CompileEnv<'a>,
        func: &ScriptFunction,
        this_class: Option<TypeId>,
    ) -> CompileResult<Code> {
        let mut c = Self {
            env,
            b: FunctionBuilder::new(),
            ret: func.ret,
            loops: Vec::new(),
        };
        c.b.enter_context();
        if let Some(class) = this_class {
            c.define_var(&func.pos, "this", TypeRef::new(class))?;
        }
        for (ty, name) in &func.args {
            c.define_var(&func.pos, name, *ty)?;
        }
        c.compile_stmt(&func.body)?;
        c.emit_default_return(&func.pos)?;
        Ok(c.b.build())
    }

    fn err(&self, pos: &CodeLoc, message: impl Into<std::borrow::Cow<'static, str>>) -> CompileError {
        CompileError::new(pos.file.as_ref(), pos.line, message)
    }

    fn type_name(&self, ty: TypeRef) -> String {
        self.env.types.name_of(ty, |def| match def {
            TypeDef::Native(i) => self.env.variant.classes[*i].name.clone(),
            TypeDef::Script(i) => self.env.classes[*i].name.clone(),
            _ => "?".to_owned(),
        })
    }

    fn alloc_reg(&mut self, pos: &CodeLoc) -> CompileResult<Reg> {
        self.b.alloc_reg().map_err(|m| CompileError::new(pos.file.as_ref(), pos.line, m))
    }

    fn define_var(&mut self, pos: &CodeLoc, name: &str, ty: TypeRef) -> CompileResult<Reg> {
        self.b.define_var(name, ty).map_err(|m| CompileError::new(pos.file.as_ref(), pos.line, m))
    }

    fn free(&mut self, result: ExprResult) {
        if result.owned {
            self.b.free_reg(result.reg);
        }
    }

    /// Emits one value-producing op into a fresh scratch register.
    fn load(&mut self, pos: &CodeLoc, ty: TypeRef, make: impl FnOnce(Reg) -> Op) -> CompileResult<ExprResult> {
        let dst = self.alloc_reg(pos)?;
        let op = make(dst);
        self.b.emit(op);
        Ok(owned(dst, ty))
    }

    /// Compiles the argument list, then emits a call-shaped op over the
    /// argument registers, releasing them afterwards.
    fn emit_call(
        &mut self,
        pos: &CodeLoc,
        args: &[ExprLoc],
        arg_tys: &[TypeRef],
        variadic: bool,
        callee: &str,
        ret: TypeRef,
        make: impl FnOnce(Reg, Box<[Reg]>) -> Op,
    ) -> CompileResult<ExprResult> {
        let arg_regs = self.compile_args(pos, args, arg_tys, variadic, callee)?;
        let dst = self.alloc_reg(pos)?;
        let regs: Box<[Reg]> = arg_regs.iter().map(|r| r.reg).collect();
        let op = make(dst, regs);
        self.b.emit(op);
        for r in arg_regs {
            self.free(r);
        }
        Ok(owned(dst, ret))
    }

    /// Makes `value` storable into a slot of type `dst`, emitting the
    /// implicit int→real widening cast when the variant permits it.
    fn coerce(&mut self, value: ExprResult, dst: TypeRef, pos: &CodeLoc) -> CompileResult<ExprResult> {
        if value.ty == NULL_TY {
            if self.env.types.is_reference(dst) || dst == TypeRef::UNDEF {
                return Ok(value);
            }
            return Err(self.err(pos, format!("cannot store null into {}", self.type_name(dst))));
        }
        if dst == value.ty || dst == TypeRef::UNDEF {
            return Ok(value);
        }
        if dst == TypeRef::REAL && value.ty == TypeRef::INTEGER && self.env.variant.implicit_casts {
            let dst_reg = self.alloc_reg(pos)?;
            self.b.emit(Op::Cast { dst: dst_reg, to: CoreType::Real, src: value.reg });
            self.free(value);
            return Ok(owned(dst_reg, TypeRef::REAL));
        }
        Err(self.err(
            pos,
            format!("type mismatch: expected {}, found {}", self.type_name(dst), self.type_name(value.ty)),
        ))
    }

    fn require_bool(&self, value: &ExprResult, pos: &CodeLoc, what: &str) -> CompileResult<()> {
        if value.ty == TypeRef::BOOLEAN {
            Ok(())
        } else {
            Err(self.err(pos, format!("{what} must be Boolean, found {}", self.type_name(value.ty))))
        }
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    fn compile_stmt(&mut self, stmt: &Stmt) -> CompileResult<()> {
        match stmt {
            Stmt::Nop => Ok(()),
            Stmt::Block(stmts) => {
                self.b.enter_context();
                for s in stmts {
                    self.compile_stmt(s)?;
                }
                self.b.leave_context();
                Ok(())
            }
            Stmt::VarDef { pos, ty, name, init } => self.compile_var_def(pos, *ty, name, init.as_ref()),
            Stmt::If { cond, then_body, else_body } => {
                let c = self.compile_expr(cond)?;
                self.require_bool(&c, &cond.pos, "the if condition")?;
                let else_label = self.b.alloc_label();
                self.b.emit(Op::JumpIfNot { label: else_label, cond: c.reg });
                self.free(c);
                self.compile_stmt(then_body)?;
                if let Some(else_body) = else_body {
                    let end = self.b.alloc_label();
                    self.b.emit(Op::Jump { label: end });
                    self.b.set_label(else_label);
                    self.compile_stmt(else_body)?;
                    self.b.set_label(end);
                } else {
                    self.b.set_label(else_label);
                }
                Ok(())
            }
            Stmt::Loop { tag, init, post_check, cond, increment, body, .. } => self.compile_loop(
                tag.as_deref(),
                init.as_deref(),
                *post_check,
                cond.as_ref(),
                increment.as_ref(),
                body,
            ),
            Stmt::Switch { pos, value, cases } => self.compile_switch(pos, value, cases),
            Stmt::Return { pos, value } => self.compile_return(pos, value.as_ref()),
            Stmt::Break { pos, tag } => self.compile_break(pos, tag.as_deref()),
            Stmt::Continue { pos, tag } => self.compile_continue(pos, tag.as_deref()),
            Stmt::Delete { pos, target } => self.compile_delete(pos, target),
            Stmt::Expr(expr) => {
                let r = self.compile_expr(expr)?;
                self.free(r);
                Ok(())
            }
        }
    }

    fn compile_var_def(&mut self, pos: &CodeLoc, ty: TypeRef, name: &str, init: Option<&ExprLoc>) -> CompileResult<()> {
        let reg = self.define_var(pos, name, ty)?;
        match init {
            Some(expr) => {
                if self.try_load_literal(reg, ty, expr)? {
                    return Ok(());
                }
                let value = self.compile_expr(expr)?;
                let value = self.coerce(value, ty, &expr.pos)?;
                self.b.emit(Op::Mov { dst: reg, src: value.reg });
                self.free(value);
            }
            None => self.emit_default(reg, ty),
        }
        Ok(())
    }

    /// Emits a literal initializer straight into the destination register,
    /// avoiding a scratch register. Returns false when the initializer is
    /// not a matching literal.
    fn try_load_literal(&mut self, dst: Reg, ty: TypeRef, expr: &ExprLoc) -> CompileResult<bool> {
        let op = match (&expr.expr, ty) {
            (Expr::Int(value), TypeRef::INTEGER) => Op::LoadInt { dst, value: *value },
            (Expr::Real(value), TypeRef::REAL) => Op::LoadReal { dst, value: *value },
            (Expr::Bool(value), TypeRef::BOOLEAN) => Op::LoadBool { dst, value: *value },
            (Expr::Int(value), TypeRef::REAL) if self.env.variant.implicit_casts => {
                Op::LoadReal { dst, value: *value as f64 }
            }
            (Expr::Str(bytes), TypeRef::STRING) => Op::LoadString { dst, value: bytes.clone().into_boxed_slice() },
            (Expr::Null, _) if self.env.types.is_reference(ty) => Op::LoadNull { dst, ty },
            _ => return Ok(false),
        };
        self.b.emit(op);
        Ok(true)
    }

    /// Default value for an uninitialized slot of the given type.
    fn emit_default(&mut self, dst: Reg, ty: TypeRef) {
        let op = match ty {
            TypeRef::INTEGER => Op::LoadInt { dst, value: 0 },
            TypeRef::REAL => Op::LoadReal { dst, value: 0.0 },
            TypeRef::BOOLEAN => Op::LoadBool { dst, value: false },
            other => Op::LoadNull { dst, ty: other },
        };
        self.b.emit(op);
    }

    fn emit_default_return(&mut self, pos: &CodeLoc) -> CompileResult<()> {
        let reg = self.alloc_reg(pos)?;
        self.emit_default(reg, self.ret);
        self.b.emit(Op::Return { src: reg });
        self.b.free_reg(reg);
        Ok(())
    }

    fn compile_loop(
        &mut self,
        tag: Option<&str>,
        init: Option<&Stmt>,
        post_check: bool,
        cond: Option<&ExprLoc>,
        increment: Option<&ExprLoc>,
        body: &Stmt,
    ) -> CompileResult<()> {
        self.b.enter_context();
        if let Some(init) = init {
            self.compile_stmt(init)?;
        }
        let header = self.b.alloc_label();
        let continue_label = self.b.alloc_label();
        let end = self.b.alloc_label();
        self.loops.push(LoopScope {
            tag: tag.map(str::to_owned),
            break_label: end,
            continue_label: Some(continue_label),
            depth: self.b.context_depth(),
        });

        if post_check {
            // do { body } while (cond);
            self.b.set_label(header);
            self.compile_stmt(body)?;
            self.b.set_label(continue_label);
            match cond {
                Some(cond_expr) => {
                    let c = self.compile_expr(cond_expr)?;
                    self.require_bool(&c, &cond_expr.pos, "the loop condition")?;
                    self.b.emit(Op::JumpIf { label: header, cond: c.reg });
                    self.free(c);
                }
                None => self.b.emit(Op::Jump { label: header }),
            }
            self.b.set_label(end);
        } else {
            // while / for
            self.b.set_label(header);
            if let Some(cond_expr) = cond {
                let c = self.compile_expr(cond_expr)?;
                self.require_bool(&c, &cond_expr.pos, "the loop condition")?;
                self.b.emit(Op::JumpIfNot { label: end, cond: c.reg });
                self.free(c);
            }
            self.compile_stmt(body)?;
            self.b.set_label(continue_label);
            if let Some(increment) = increment {
                let r = self.compile_expr(increment)?;
                self.free(r);
            }
            self.b.emit(Op::Jump { label: header });
            self.b.set_label(end);
        }

        self.loops.pop();
        self.b.leave_context();
        Ok(())
    }

    fn compile_switch(&mut self, pos: &CodeLoc, value: &ExprLoc, cases: &[SwitchCase]) -> CompileResult<()> {
        self.b.enter_context();
        let scrutinee = self.compile_expr(value)?;
        let end = self.b.alloc_label();
        self.loops.push(LoopScope {
            tag: None,
            break_label: end,
            continue_label: None,
            depth: self.b.context_depth(),
        });

        let labels: Vec<LabelId> = cases.iter().map(|_| self.b.alloc_label()).collect();
        let mut default_label = None;
        let cmp = self.alloc_reg(pos)?;
        for (case, label) in cases.iter().zip(&labels) {
            match &case.value {
                Some(case_value) => {
                    let v = self.compile_expr(case_value)?;
                    if v.ty != scrutinee.ty {
                        return Err(self.err(
                            &case_value.pos,
                            format!(
                                "case type {} does not match switch value type {}",
                                self.type_name(v.ty),
                                self.type_name(scrutinee.ty)
                            ),
                        ));
                    }
                    self.emit_equality(cmp, scrutinee.ty, scrutinee.reg, v.reg, &case_value.pos)?;
                    self.b.emit(Op::JumpIf { label: *label, cond: cmp });
                    self.free(v);
                }
                None => default_label = Some(*label),
            }
        }
        self.b.free_reg(cmp);
        self.b.emit(Op::Jump { label: default_label.unwrap_or(end) });

        // Case bodies are laid out in order and fall through.
        for (case, label) in cases.iter().zip(&labels) {
            self.b.set_label(*label);
            for s in &case.body {
                self.compile_stmt(s)?;
            }
        }

        self.b.set_label(end);
        self.loops.pop();
        self.free(scrutinee);
        self.b.leave_context();
        Ok(())
    }

    /// Typed equality for the switch dispatch chain.
    fn emit_equality(&mut self, dst: Reg, ty: TypeRef, a: Reg, b: Reg, pos: &CodeLoc) -> CompileResult<()> {
        let op = match ty {
            TypeRef::INTEGER => Op::BinInt { op: IntBinOp::Eq, dst, a, b },
            TypeRef::REAL => Op::BinReal { op: RealBinOp::Eq, dst, a, b },
            TypeRef::STRING => Op::BinStr { op: StrBinOp::Eq, dst, a, b },
            TypeRef::BOOLEAN => Op::BinBool { op: BoolBinOp::Eq, dst, a, b },
            other => {
                return Err(self.err(
                    pos,
                    format!("switch requires a core scalar value, found {}", self.type_name(other)),
                ))
            }
        };
        self.b.emit(op);
        Ok(())
    }

    fn compile_return(&mut self, pos: &CodeLoc, value: Option<&ExprLoc>) -> CompileResult<()> {
        match value {
            None => {
                if self.ret != TypeRef::VOID {
                    return Err(self.err(pos, format!("return requires a {} value", self.type_name(self.ret))));
                }
                let reg = self.alloc_reg(pos)?;
                self.b.emit(Op::LoadNull { dst: reg, ty: TypeRef::VOID });
                self.b.emit(Op::Return { src: reg });
                self.b.free_reg(reg);
            }
            Some(expr) => {
                if self.ret == TypeRef::VOID {
                    return Err(self.err(pos, "void function cannot return a value"));
                }
                let value = self.compile_expr(expr)?;
                let value = self.coerce(value, self.ret, &expr.pos)?;
                self.b.emit(Op::Return { src: value.reg });
                self.free(value);
            }
        }
        Ok(())
    }

    fn find_loop(&self, tag: Option<&str>, needs_continue: bool) -> Option<&LoopScope> {
        self.loops.iter().rev().find(|scope| {
            if needs_continue && scope.continue_label.is_none() {
                return false;
            }
            match tag {
                Some(tag) => scope.tag.as_deref() == Some(tag),
                None => true,
            }
        })
    }

    /// Emits the context unwinds needed to jump from the current depth out
    /// to a loop scope's depth.
    fn emit_unwind_to(&mut self, depth: usize) {
        for _ in depth..self.b.context_depth() {
            self.b.emit(Op::LeaveContext);
        }
    }

    fn compile_break(&mut self, pos: &CodeLoc, tag: Option<&str>) -> CompileResult<()> {
        let Some(scope) = self.find_loop(tag, false) else {
            return Err(match tag {
                Some(tag) => self.err(pos, format!("no enclosing loop tagged '{tag}'")),
                None => self.err(pos, "break outside of a loop or switch"),
            });
        };
        let (label, depth) = (scope.break_label, scope.depth);
        self.emit_unwind_to(depth);
        self.b.emit(Op::Jump { label });
        Ok(())
    }

    fn compile_continue(&mut self, pos: &CodeLoc, tag: Option<&str>) -> CompileResult<()> {
        let Some(scope) = self.find_loop(tag, true) else {
            return Err(match tag {
                Some(tag) => self.err(pos, format!("no enclosing loop tagged '{tag}'")),
                None => self.err(pos, "continue outside of a loop"),
            });
        };
        let (label, depth) = (scope.continue_label.expect("checked by find_loop"), scope.depth);
        self.emit_unwind_to(depth);
        self.b.emit(Op::Jump { label });
        Ok(())
    }

    /// `delete lvalue` stores null into a reference-typed location. On a
    /// non-reference location it is a no-op with a diagnostic.
    fn compile_delete(&mut self, pos: &CodeLoc, target: &ExprLoc) -> CompileResult<()> {
        let place = self.resolve_place(target, pos)?;
        let ty = place.ty();
        if !self.env.types.is_reference(ty) {
            self.env.variant.emit_error(&format!(
                "{}:{}: delete on a non-reference value has no effect",
                pos.file, pos.line
            ));
            self.free_place(place);
            return Ok(());
        }
        let reg = self.alloc_reg(pos)?;
        self.b.emit(Op::LoadNull { dst: reg, ty });
        self.write_place(&place, reg);
        self.b.free_reg(reg);
        self.free_place(place);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Storage locations
    // ------------------------------------------------------------------

    /// Resolves an lvalue expression, compiling the object/index
    /// subexpressions it hangs off and checking read-only flags.
    fn resolve_place(&mut self, target: &ExprLoc, pos: &CodeLoc) -> CompileResult<Place> {
        match &target.expr {
            Expr::Variable(name) => {
                if let Some((reg, ty)) = self.b.lookup_var(name) {
                    return Ok(Place::Local { reg, ty });
                }
                if let Some(global) = self.env.globals.iter().position(|g| g.name == *name) {
                    let ty = self.env.globals[global].ty;
                    let slot = self
                        .b
                        .import_global(name, global as u16)
                        .map_err(|m| CompileError::new(pos.file.as_ref(), pos.line, m))?;
                    return Ok(Place::Global { slot, ty });
                }
                Err(self.err(pos, format!("unknown variable '{name}'")))
            }
            Expr::Element { obj, name } => {
                let o = self.compile_expr(obj)?;
                let (slot, ty, read_only) = self.class_attr(o.ty, name, pos)?;
                if read_only {
                    return Err(self.err(pos, format!("attribute '{name}' is read-only")));
                }
                Ok(Place::Attr { obj: o, slot, ty, name: name.clone() })
            }
            Expr::Index { arr, index } => {
                let a = self.compile_expr(arr)?;
                if a.ty.depth == 0 {
                    return Err(self.err(pos, "the index operator requires an array"));
                }
                let ty = a.ty.element();
                let i = self.compile_expr(index)?;
                if i.ty != TypeRef::INTEGER {
                    return Err(self.err(&index.pos, "array index must be an Integer"));
                }
                Ok(Place::Cell { arr: a, index: i, ty })
            }
            _ => Err(self.err(pos, "invalid assignment target")),
        }
    }

    /// Loads the place's current value into a fresh scratch register.
    fn read_place(&mut self, place: &Place, pos: &CodeLoc) -> CompileResult<ExprResult> {
        let dst = self.alloc_reg(pos)?;
        let op = match place {
            Place::Local { reg, .. } => Op::Mov { dst, src: *reg },
            Place::Global { slot, .. } => Op::GetGlobal { dst, slot: *slot },
            Place::Attr { obj, slot, name, .. } => {
                Op::GetElement { dst, obj: obj.reg, attr: *slot, name: name.as_str().into() }
            }
            Place::Cell { arr, index, .. } => Op::GetIndex { dst, arr: arr.reg, index: index.reg },
        };
        self.b.emit(op);
        Ok(owned(dst, place.ty()))
    }

    /// Stores `src` into the place.
    fn write_place(&mut self, place: &Place, src: Reg) {
        let op = match place {
            Place::Local { reg, .. } => Op::Mov { dst: *reg, src },
            Place::Global { slot, .. } => Op::SetGlobal { slot: *slot, src },
            Place::Attr { obj, slot, name, .. } => {
                Op::SetElement { obj: obj.reg, attr: *slot, src, name: name.as_str().into() }
            }
            Place::Cell { arr, index, .. } => Op::SetIndex { arr: arr.reg, index: index.reg, src },
        };
        self.b.emit(op);
    }

    /// Releases the scratch registers the place's subexpressions held.
    fn free_place(&mut self, place: Place) {
        match place {
            Place::Local { .. } | Place::Global { .. } => {}
            Place::Attr { obj, .. } => self.free(obj),
            Place::Cell { arr, index, .. } => {
                self.free(index);
                self.free(arr);
            }
        }
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    fn compile_expr(&mut self, expr_loc: &ExprLoc) -> CompileResult<ExprResult> {
        let pos = &expr_loc.pos;
        match &expr_loc.expr {
            Expr::Null => self.load(pos, NULL_TY, |dst| Op::LoadNull { dst, ty: NULL_TY }),
            Expr::Bool(value) => self.load(pos, TypeRef::BOOLEAN, |dst| Op::LoadBool { dst, value: *value }),
            Expr::Int(value) => self.load(pos, TypeRef::INTEGER, |dst| Op::LoadInt { dst, value: *value }),
            Expr::Real(value) => self.load(pos, TypeRef::REAL, |dst| Op::LoadReal { dst, value: *value }),
            Expr::Str(bytes) => self.load(pos, TypeRef::STRING, |dst| Op::LoadString {
                dst,
                value: bytes.clone().into_boxed_slice(),
            }),
            Expr::Variable(name) => self.compile_variable(pos, name),
            Expr::Element { obj, name } => {
                let o = self.compile_expr(obj)?;
                let (attr, ty, _) = self.class_attr(o.ty, name, pos)?;
                let dst = self.alloc_reg(pos)?;
                self.b.emit(Op::GetElement { dst, obj: o.reg, attr, name: name.as_str().into() });
                self.free(o);
                Ok(owned(dst, ty))
            }
            Expr::Index { arr, index } => {
                let a = self.compile_expr(arr)?;
                if a.ty.depth == 0 {
                    return Err(self.err(
                        pos,
                        format!("the index operator requires an array, found {}", self.type_name(a.ty)),
                    ));
                }
                let i = self.compile_expr(index)?;
                if i.ty != TypeRef::INTEGER {
                    return Err(self.err(&index.pos, "array index must be an Integer"));
                }
                let dst = self.alloc_reg(pos)?;
                self.b.emit(Op::GetIndex { dst, arr: a.reg, index: i.reg });
                let ty = a.ty.element();
                self.free(i);
                self.free(a);
                Ok(owned(dst, ty))
            }
            Expr::Cast { ty, value } => self.compile_cast(pos, *ty, value),
            Expr::Assign { op, target, value } => self.compile_assign(pos, *op, target, value),
            Expr::PostInc(target) => self.compile_post_incdec(pos, target, 1),
            Expr::PostDec(target) => self.compile_post_incdec(pos, target, -1),
            Expr::Call { path, name, args } => self.compile_call(pos, path, name, args),
            Expr::MethodCall { obj, name, args } => self.compile_method_call(pos, obj, name, args),
            Expr::CreateObject { class, args } => self.compile_create_object(pos, *class, args),
            Expr::CreateArray { elem, len } => {
                let l = self.compile_expr(len)?;
                if l.ty != TypeRef::INTEGER {
                    return Err(self.err(&len.pos, "array length must be an Integer"));
                }
                let dst = self.alloc_reg(pos)?;
                self.b.emit(Op::CreateArray { dst, elem: *elem, len: l.reg });
                self.free(l);
                Ok(owned(dst, elem.array_of()))
            }
            Expr::ArrayLiteral(items) => self.compile_array_literal(pos, items),
            Expr::Ternary { cond, when_true, when_false } => match when_true {
                Some(when_true) => self.compile_ternary(pos, cond, when_true, when_false),
                None => self.compile_coalesce(pos, cond, when_false),
            },
            Expr::BinOp { op, left, right } => self.compile_binop(pos, *op, left, right),
            Expr::UniOp { op, value } => self.compile_uniop(pos, *op, value),
        }
    }

    /// Name resolution: nested local contexts outward, then script globals
    /// (importing a slot on first use), then the variant's named constants.
    fn compile_variable(&mut self, pos: &CodeLoc, name: &str) -> CompileResult<ExprResult> {
        if !name.contains('@') {
            if let Some((reg, ty)) = self.b.lookup_var(name) {
                return Ok(borrowed(reg, ty));
            }
            if let Some(global) = self.env.globals.iter().position(|g| g.name == name) {
                let ty = self.env.globals[global].ty;
                let slot = self
                    .b
                    .import_global(name, global as u16)
                    .map_err(|m| CompileError::new(pos.file.as_ref(), pos.line, m))?;
                let dst = self.alloc_reg(pos)?;
                self.b.emit(Op::GetGlobal { dst, slot });
                return Ok(owned(dst, ty));
            }
        }
        let mut parts: Vec<String> = name.split('@').map(str::to_owned).collect();
        let last = parts.pop().expect("name has at least one part");
        if let Some(index) = self.env.variant.find_constant(&parts, &last) {
            let constant = &self.env.variant.constants[index];
            let dst = self.alloc_reg(pos)?;
            let op = match &constant.value {
                ConstValue::Bool(value) => Op::LoadBool { dst, value: *value },
                ConstValue::Int(value) => Op::LoadInt { dst, value: *value },
                ConstValue::Real(value) => Op::LoadReal { dst, value: *value },
                ConstValue::Str(bytes) => Op::LoadString { dst, value: bytes.clone().into_boxed_slice() },
            };
            self.b.emit(op);
            return Ok(owned(dst, constant.ty));
        }
        Err(self.err(pos, format!("unknown variable '{name}'")))
    }

    /// Attribute lookup on an object type; errors on non-objects and unknown
    /// names. Returns (slot, type, read-only).
    fn class_attr(&self, ty: TypeRef, name: &str, pos: &CodeLoc) -> CompileResult<(u16, TypeRef, bool)> {
        let found = if ty.depth != 0 {
            None
        } else {
            match self.env.types.get(ty.def) {
                TypeDef::Script(i) => {
                    let class = &self.env.classes[*i];
                    let index = class.attributes.iter().position(|a| a.name == name);
                    match index {
                        Some(i) => Some(Ok((i as u16, class.attributes[i].ty, class.attributes[i].read_only))),
                        None => Some(Err(class.name.clone())),
                    }
                }
                TypeDef::Native(i) => {
                    let class = &self.env.variant.classes[*i];
                    match class.attr_index(name) {
                        Some(i) => Some(Ok((i as u16, class.attributes[i].ty, class.attributes[i].read_only))),
                        None => Some(Err(class.name.clone())),
                    }
                }
                _ => None,
            }
        };
        match found {
            Some(Ok(attr)) => Ok(attr),
            Some(Err(class_name)) => Err(self.err(pos, format!("class {class_name} has no attribute '{name}'"))),
            None => Err(self.err(
                pos,
                format!("element access requires an object, found {}", self.type_name(ty)),
            )),
        }
    }

    fn compile_cast(&mut self, pos: &CodeLoc, ty: TypeRef, value: &ExprLoc) -> CompileResult<ExprResult> {
        let v = self.compile_expr(value)?;
        let to_core = match self.env.types.get(ty.def) {
            TypeDef::Core(core) => *core,
            _ => return Err(self.err(pos, "casts may only target core types")),
        };
        if ty.depth != 0
            || !matches!(to_core, CoreType::Boolean | CoreType::Integer | CoreType::Real | CoreType::String)
        {
            return Err(self.err(pos, "casts may only target Boolean, Integer, Real or String"));
        }
        if v.ty == ty {
            return Ok(v);
        }
        if !matches!(v.ty, TypeRef::BOOLEAN | TypeRef::INTEGER | TypeRef::REAL) {
            return Err(self.err(pos, format!("cannot cast {} to {}", self.type_name(v.ty), self.type_name(ty))));
        }
        let dst = self.alloc_reg(pos)?;
        self.b.emit(Op::Cast { dst, to: to_core, src: v.reg });
        self.free(v);
        Ok(owned(dst, ty))
    }

    /// Assignment, optionally combined with a binary operator. The stored
    /// value is the expression's result.
    fn compile_assign(
        &mut self,
        pos: &CodeLoc,
        op: Option<BinOp>,
        target: &ExprLoc,
        value: &ExprLoc,
    ) -> CompileResult<ExprResult> {
        let place = self.resolve_place(target, pos)?;
        let ty = place.ty();
        let v = match op {
            None => self.compile_expr(value)?,
            Some(bop) => {
                let current = self.read_place(&place, pos)?;
                let rhs = self.compile_expr(value)?;
                self.emit_binop(pos, bop, current, rhs)?
            }
        };
        let v = self.coerce(v, ty, &value.pos)?;
        self.write_place(&place, v.reg);
        if let Place::Local { reg, .. } = &place {
            let reg = *reg;
            self.free(v);
            return Ok(borrowed(reg, ty));
        }
        self.free_place(place);
        Ok(v)
    }

    /// `lvalue++` / `lvalue--`: yields the old value, then stores old ± 1.
    fn compile_post_incdec(&mut self, pos: &CodeLoc, target: &ExprLoc, delta: i64) -> CompileResult<ExprResult> {
        let place = self.resolve_place(target, pos)?;
        let ty = place.ty();
        if ty != TypeRef::INTEGER && ty != TypeRef::REAL {
            return Err(self.err(pos, format!("++/-- require an Integer or Real, found {}", self.type_name(ty))));
        }
        let old = self.read_place(&place, pos)?;
        let step = self.alloc_reg(pos)?;
        let new = self.alloc_reg(pos)?;
        if ty == TypeRef::INTEGER {
            self.b.emit(Op::LoadInt { dst: step, value: delta });
            self.b.emit(Op::BinInt { op: IntBinOp::Add, dst: new, a: old.reg, b: step });
        } else {
            self.b.emit(Op::LoadReal { dst: step, value: delta as f64 });
            self.b.emit(Op::BinReal { op: RealBinOp::Add, dst: new, a: old.reg, b: step });
        }
        self.write_place(&place, new);
        self.b.free_reg(new);
        self.b.free_reg(step);
        self.free_place(place);
        Ok(old)
    }

    /// Call resolution order: script functions by qualified name, then host
    /// exports walking the namespace path, then nothing.
    fn compile_call(&mut self, pos: &CodeLoc, path: &[String], name: &str, args: &[ExprLoc]) -> CompileResult<ExprResult> {
        let full = if path.is_empty() {
            name.to_owned()
        } else {
            format!("{}@{name}", path.join("@"))
        };
        let (target, ret, arg_tys, variadic): (CallTarget, TypeRef, Vec<TypeRef>, bool) =
            if let Some(index) = self.env.functions.iter().position(|f| f.name == full) {
                let f = &self.env.functions[index];
                (CallTarget::Script(index as u16), f.ret, f.args.iter().map(|(t, _)| *t).collect(), false)
            } else if let Some(index) = self.env.variant.find_function(path, name) {
                let f = &self.env.variant.functions[index];
                (CallTarget::Native(index as u16), f.proto.ret, f.proto.args.clone(), f.proto.variadic)
            } else {
                return Err(self.err(pos, format!("unknown function '{full}'")));
            };
        self.emit_call(pos, args, &arg_tys, variadic, &full, ret, |dst, regs| Op::CallFunction {
            dst,
            target,
            args: regs,
        })
    }

    fn compile_method_call(
        &mut self,
        pos: &CodeLoc,
        obj: &ExprLoc,
        name: &str,
        args: &[ExprLoc],
    ) -> CompileResult<ExprResult> {
        let o = self.compile_expr(obj)?;
        if o.ty.depth != 0 {
            return Err(self.err(pos, "method call requires an object"));
        }
        let (target, ret, arg_tys, variadic) = match self.env.types.get(o.ty.def) {
            TypeDef::Script(ci) => {
                let class = &self.env.classes[*ci];
                let Some(mi) = class.method_index(name) else {
                    return Err(self.err(pos, format!("class {} has no method '{name}'", class.name)));
                };
                let m = &class.methods[mi];
                (
                    CallTarget::ScriptMethod { class: *ci as u16, method: mi as u16 },
                    m.ret,
                    m.args.iter().map(|(t, _)| *t).collect::<Vec<_>>(),
                    false,
                )
            }
            TypeDef::Native(ci) => {
                let class = &self.env.variant.classes[*ci];
                let Some(mi) = class.method_index(name) else {
                    return Err(self.err(pos, format!("class {} has no method '{name}'", class.name)));
                };
                let m = &class.methods[mi];
                (
                    CallTarget::NativeMethod { class: *ci as u16, method: mi as u16 },
                    m.proto.ret,
                    m.proto.args.clone(),
                    m.proto.variadic,
                )
            }
            _ => {
                return Err(self.err(pos, format!("method call requires an object, found {}", self.type_name(o.ty))))
            }
        };
        let this = o.reg;
        let result = self.emit_call(pos, args, &arg_tys, variadic, name, ret, |dst, regs| Op::CallMethod {
            dst,
            target,
            this,
            args: regs,
        })?;
        self.free(o);
        Ok(result)
    }

    fn compile_create_object(&mut self, pos: &CodeLoc, class: TypeId, args: &[ExprLoc]) -> CompileResult<ExprResult> {
        let (arg_tys, variadic, name): (Vec<TypeRef>, bool, String) = match self.env.types.get(class) {
            TypeDef::Script(ci) => {
                let c = &self.env.classes[*ci];
                let tys = c
                    .constructor_index()
                    .map(|mi| c.methods[mi].args.iter().map(|(t, _)| *t).collect())
                    .unwrap_or_default();
                (tys, false, c.name.clone())
            }
            TypeDef::Native(ci) => {
                let c = &self.env.variant.classes[*ci];
                match &c.constructor {
                    Some(ctor) => (ctor.proto.args.clone(), ctor.proto.variadic, c.name.clone()),
                    None => (Vec::new(), false, c.name.clone()),
                }
            }
            _ => return Err(self.err(pos, "'new' requires a class type")),
        };
        self.emit_call(pos, args, &arg_tys, variadic, &name, TypeRef::new(class), |dst, regs| Op::CreateObject {
            dst,
            class,
            args: regs,
        })
    }

    /// Compiles call arguments and checks them against the prototype.
    /// `undef` parameter types match anything; a variadic prototype relaxes
    /// the upper bound on the count.
    fn compile_args(
        &mut self,
        pos: &CodeLoc,
        args: &[ExprLoc],
        arg_tys: &[TypeRef],
        variadic: bool,
        callee: &str,
    ) -> CompileResult<Vec<ExprResult>> {
        let count_ok = if variadic { args.len() >= arg_tys.len() } else { args.len() == arg_tys.len() };
        if !count_ok {
            return Err(self.err(
                pos,
                format!(
                    "'{callee}' expects {}{} arguments, found {}",
                    arg_tys.len(),
                    if variadic { " or more" } else { "" },
                    args.len()
                ),
            ));
        }
        let mut results = Vec::with_capacity(args.len());
        for (index, arg) in args.iter().enumerate() {
            let r = self.compile_expr(arg)?;
            let r = match arg_tys.get(index) {
                Some(expected) => self.coerce(r, *expected, &arg.pos)?,
                None => r,
            };
            results.push(r);
        }
        Ok(results)
    }

    fn compile_array_literal(&mut self, pos: &CodeLoc, items: &[ExprLoc]) -> CompileResult<ExprResult> {
        let Some(first) = items.first() else {
            return Err(self.err(pos, "cannot infer the element type of an empty array literal"));
        };
        let first_result = self.compile_expr(first)?;
        if first_result.ty == NULL_TY {
            return Err(self.err(pos, "the first element of an array literal cannot be null"));
        }
        let elem = first_result.ty;

        let index_reg = self.alloc_reg(pos)?;
        self.b.emit(Op::LoadInt { dst: index_reg, value: items.len() as i64 });
        let dst = self.alloc_reg(pos)?;
        self.b.emit(Op::CreateArray { dst, elem, len: index_reg });

        self.b.emit(Op::LoadInt { dst: index_reg, value: 0 });
        self.b.emit(Op::SetIndex { arr: dst, index: index_reg, src: first_result.reg });
        self.free(first_result);

        for (index, item) in items.iter().enumerate().skip(1) {
            let r = self.compile_expr(item)?;
            let r = self.coerce(r, elem, &item.pos)?;
            self.b.emit(Op::LoadInt { dst: index_reg, value: index as i64 });
            self.b.emit(Op::SetIndex { arr: dst, index: index_reg, src: r.reg });
            self.free(r);
        }
        self.b.free_reg(index_reg);
        Ok(owned(dst, elem.array_of()))
    }

    fn compile_ternary(
        &mut self,
        pos: &CodeLoc,
        cond: &ExprLoc,
        when_true: &ExprLoc,
        when_false: &ExprLoc,
    ) -> CompileResult<ExprResult> {
        let c = self.compile_expr(cond)?;
        self.require_bool(&c, &cond.pos, "the ternary condition")?;
        let dst = self.alloc_reg(pos)?;
        let else_label = self.b.alloc_label();
        let end = self.b.alloc_label();
        self.b.emit(Op::JumpIfNot { label: else_label, cond: c.reg });
        self.free(c);

        let t = self.compile_expr(when_true)?;
        self.b.emit(Op::Mov { dst, src: t.reg });
        let true_ty = t.ty;
        self.free(t);
        self.b.emit(Op::Jump { label: end });

        self.b.set_label(else_label);
        let f = self.compile_expr(when_false)?;
        self.b.emit(Op::Mov { dst, src: f.reg });
        let false_ty = f.ty;
        self.free(f);
        self.b.set_label(end);

        let ty = self.unify_branch_types(true_ty, false_ty, pos)?;
        Ok(owned(dst, ty))
    }

    /// `a ?: b` — uses `a` when it is true (Boolean) or non-null
    /// (reference), otherwise evaluates `b`.
    fn compile_coalesce(&mut self, pos: &CodeLoc, cond: &ExprLoc, when_false: &ExprLoc) -> CompileResult<ExprResult> {
        let c = self.compile_expr(cond)?;
        let dst = self.alloc_reg(pos)?;
        let end = self.b.alloc_label();
        self.b.emit(Op::Mov { dst, src: c.reg });
        if c.ty == TypeRef::BOOLEAN {
            self.b.emit(Op::JumpIf { label: end, cond: c.reg });
        } else if self.env.types.is_reference(c.ty) {
            let null_reg = self.alloc_reg(pos)?;
            self.b.emit(Op::LoadNull { dst: null_reg, ty: c.ty });
            let test = self.alloc_reg(pos)?;
            self.b.emit(Op::RefNe { dst: test, a: c.reg, b: null_reg });
            self.b.emit(Op::JumpIf { label: end, cond: test });
            self.b.free_reg(test);
            self.b.free_reg(null_reg);
        } else {
            return Err(self.err(
                pos,
                format!("'?:' requires a Boolean or reference value, found {}", self.type_name(c.ty)),
            ));
        }
        let cond_ty = c.ty;
        self.free(c);

        let f = self.compile_expr(when_false)?;
        let f = self.coerce(f, cond_ty, &when_false.pos)?;
        self.b.emit(Op::Mov { dst, src: f.reg });
        self.free(f);
        self.b.set_label(end);
        Ok(owned(dst, cond_ty))
    }

    /// Both ternary branches must agree on a type; null unifies with any
    /// reference type.
    fn unify_branch_types(&self, a: TypeRef, b: TypeRef, pos: &CodeLoc) -> CompileResult<TypeRef> {
        if a == b {
            return Ok(a);
        }
        if a == NULL_TY && self.env.types.is_reference(b) {
            return Ok(b);
        }
        if b == NULL_TY && self.env.types.is_reference(a) {
            return Ok(a);
        }
        Err(self.err(
            pos,
            format!("ternary branches disagree: {} versus {}", self.type_name(a), self.type_name(b)),
        ))
    }

    fn compile_binop(&mut self, pos: &CodeLoc, op: BinOp, left: &ExprLoc, right: &ExprLoc) -> CompileResult<ExprResult> {
        match op {
            // Short-circuit forms preserve non-evaluation of the right side.
            BinOp::And | BinOp::Or => {
                let dst = self.alloc_reg(pos)?;
                let l = self.compile_expr(left)?;
                self.require_bool(&l, &left.pos, "the logical operand")?;
                self.b.emit(Op::Mov { dst, src: l.reg });
                let end = self.b.alloc_label();
                if op == BinOp::And {
                    self.b.emit(Op::JumpIfNot { label: end, cond: dst });
                } else {
                    self.b.emit(Op::JumpIf { label: end, cond: dst });
                }
                self.free(l);
                let r = self.compile_expr(right)?;
                self.require_bool(&r, &right.pos, "the logical operand")?;
                self.b.emit(Op::Mov { dst, src: r.reg });
                self.free(r);
                self.b.set_label(end);
                Ok(owned(dst, TypeRef::BOOLEAN))
            }
            BinOp::Xor => {
                let l = self.compile_expr(left)?;
                self.require_bool(&l, &left.pos, "the logical operand")?;
                let r = self.compile_expr(right)?;
                self.require_bool(&r, &right.pos, "the logical operand")?;
                let dst = self.alloc_reg(pos)?;
                self.b.emit(Op::BinBool { op: BoolBinOp::Xor, dst, a: l.reg, b: r.reg });
                self.free(l);
                self.free(r);
                Ok(owned(dst, TypeRef::BOOLEAN))
            }
            // Reference identity applies only to reference-typed operands.
            BinOp::RefEq | BinOp::RefNe => {
                let l = self.compile_expr(left)?;
                let r = self.compile_expr(right)?;
                for side in [&l, &r] {
                    if side.ty != NULL_TY && !self.env.types.is_reference(side.ty) {
                        return Err(self.err(
                            pos,
                            format!("===/!== require reference-typed operands, found {}", self.type_name(side.ty)),
                        ));
                    }
                }
                let dst = self.alloc_reg(pos)?;
                if op == BinOp::RefEq {
                    self.b.emit(Op::RefEq { dst, a: l.reg, b: r.reg });
                } else {
                    self.b.emit(Op::RefNe { dst, a: l.reg, b: r.reg });
                }
                self.free(l);
                self.free(r);
                Ok(owned(dst, TypeRef::BOOLEAN))
            }
            _ => {
                let l = self.compile_expr(left)?;
                let r = self.compile_expr(right)?;
                self.emit_binop(pos, op, l, r)
            }
        }
    }

    /// Emits a typed binary op, widening one Integer side to Real when the
    /// variant permits implicit casts.
    fn emit_binop(&mut self, pos: &CodeLoc, op: BinOp, l: ExprResult, r: ExprResult) -> CompileResult<ExprResult> {
        let (mut l, mut r) = (l, r);
        if l.ty != r.ty {
            let widen_left = l.ty == TypeRef::INTEGER && r.ty == TypeRef::REAL;
            let widen_right = r.ty == TypeRef::INTEGER && l.ty == TypeRef::REAL;
            if (widen_left || widen_right) && self.env.variant.implicit_casts {
                let side = if widen_left { &mut l } else { &mut r };
                let dst = self.alloc_reg(pos)?;
                self.b.emit(Op::Cast { dst, to: CoreType::Real, src: side.reg });
                self.free(*side);
                *side = owned(dst, TypeRef::REAL);
            } else {
                return Err(self.err(
                    pos,
                    format!(
                        "mixed operand types {} and {} require an explicit cast",
                        self.type_name(l.ty),
                        self.type_name(r.ty)
                    ),
                ));
            }
        }

        let ty = l.ty;
        let dst = self.alloc_reg(pos)?;
        let (a, b) = (l.reg, r.reg);
        // Boolean != has no dedicated opcode: equality then negation.
        if ty == TypeRef::BOOLEAN && op == BinOp::Ne {
            self.b.emit(Op::BinBool { op: BoolBinOp::Eq, dst, a, b });
            self.b.emit(Op::NotBool { dst, src: dst });
            self.free(l);
            self.free(r);
            return Ok(owned(dst, TypeRef::BOOLEAN));
        }
        let emitted = match ty {
            TypeRef::INTEGER => int_op(op).map(|op| Op::BinInt { op, dst, a, b }),
            TypeRef::REAL => real_op(op).map(|op| Op::BinReal { op, dst, a, b }),
            TypeRef::STRING => str_op(op).map(|op| Op::BinStr { op, dst, a, b }),
            TypeRef::BOOLEAN if op == BinOp::Eq => Some(Op::BinBool { op: BoolBinOp::Eq, dst, a, b }),
            _ => None,
        };
        let Some(emitted) = emitted else {
            return Err(self.err(pos, format!("operator not defined for {}", self.type_name(ty))));
        };
        self.b.emit(emitted);
        self.free(l);
        self.free(r);
        let result_ty = if op.is_comparison() { TypeRef::BOOLEAN } else { ty };
        Ok(owned(dst, result_ty))
    }

    fn compile_uniop(&mut self, pos: &CodeLoc, op: UniOp, value: &ExprLoc) -> CompileResult<ExprResult> {
        let v = self.compile_expr(value)?;
        let dst = self.alloc_reg(pos)?;
        let (emit, ty) = match (op, v.ty) {
            (UniOp::Neg, TypeRef::INTEGER) => (Op::UniInt { op: IntUniOp::Neg, dst, src: v.reg }, TypeRef::INTEGER),
            (UniOp::Neg, TypeRef::REAL) => (Op::NegReal { dst, src: v.reg }, TypeRef::REAL),
            (UniOp::BitNot, TypeRef::INTEGER) => {
                (Op::UniInt { op: IntUniOp::BitNot, dst, src: v.reg }, TypeRef::INTEGER)
            }
            (UniOp::Not, TypeRef::BOOLEAN) => (Op::NotBool { dst, src: v.reg }, TypeRef::BOOLEAN),
            (_, other) => {
                return Err(self.err(pos, format!("unary operator not defined for {}", self.type_name(other))))
            }
        };
        self.b.emit(emit);
        self.free(v);
        Ok(owned(dst, ty))
    }
}

/// Integer opcode for a source operator, if the family defines it.
fn int_op(op: BinOp) -> Option<IntBinOp> {
    Some(match op {
        BinOp::Add => IntBinOp::Add,
        BinOp::Sub => IntBinOp::Sub,
        BinOp::Mul => IntBinOp::Mul,
        BinOp::Div => IntBinOp::Div,
        BinOp::Mod => IntBinOp::Mod,
        BinOp::BitAnd => IntBinOp::BitAnd,
        BinOp::BitOr => IntBinOp::BitOr,
        BinOp::BitXor => IntBinOp::BitXor,
        BinOp::Shl => IntBinOp::Shl,
        BinOp::Shr => IntBinOp::Shr,
        BinOp::Rol => IntBinOp::Rol,
        BinOp::Eq => IntBinOp::Eq,
        BinOp::Ne => IntBinOp::Ne,
        BinOp::Lt => IntBinOp::Lt,
        BinOp::Le => IntBinOp::Le,
        BinOp::Gt => IntBinOp::Gt,
        BinOp::Ge => IntBinOp::Ge,
        _ => return None,
    })
}

fn real_op(op: BinOp) -> Option<RealBinOp> {
    Some(match op {
        BinOp::Add => RealBinOp::Add,
        BinOp::Sub => RealBinOp::Sub,
        BinOp::Mul => RealBinOp::Mul,
        BinOp::Div => RealBinOp::Div,
        BinOp::Eq => RealBinOp::Eq,
        BinOp::Ne => RealBinOp::Ne,
        BinOp::Lt => RealBinOp::Lt,
        BinOp::Le => RealBinOp::Le,
        BinOp::Gt => RealBinOp::Gt,
        BinOp::Ge => RealBinOp::Ge,
        _ => return None,
    })
}

fn str_op(op: BinOp) -> Option<StrBinOp> {
    Some(match op {
        BinOp::Add => StrBinOp::Add,
        BinOp::Eq => StrBinOp::Eq,
        BinOp::Ne => StrBinOp::Ne,
        BinOp::Lt => StrBinOp::Lt,
        BinOp::Le => StrBinOp::Le,
        BinOp::Gt => StrBinOp::Gt,
        BinOp::Ge => StrBinOp::Ge,
        _ => return None,
    })
}
