//! The register-machine interpreter.
//!
//! Executes one bytecode function over a frame sized to its register count,
//! with a context stack for scoped variable lifetime and a handler stack of
//! `(target label, saved context depth)` pairs. Dispatch is a flat match over
//! the operation; jumps reset the instruction pointer through the label
//! table.
//!
//! Every register write releases the previous occupant and every read that
//! crosses ownership clones with the heap, so reference counts track exact
//! ownership at all times. Unwinding is an explicit loop over the handler
//! stack driven by the pending-exception field; no control flow crosses the
//! host boundary non-locally.

use crate::bytecode::builder::MAX_GLOBALS;
use crate::bytecode::op::{
    BoolBinOp, CallTarget, Code, IntBinOp, IntUniOp, LabelId, Op, RealBinOp, Reg, StrBinOp,
};
use crate::exception::{ExcKind, RunResult, RuntimeError};
use crate::heap::{Heap, HeapData, HeapId};
use crate::script::{ScriptClass, ScriptFunction};
use crate::types::{CoreType, TypeDef, TypeId, TypeTable};
use crate::value::Value;
use crate::variant::{HostCall, Variant};

/// Script-call recursion limit; deep enough for real programs, shallow
/// enough to fail before the host thread's stack does.
pub const MAX_CALL_DEPTH: usize = 256;

/// Per-frame execution state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameState {
    Entering,
    Running,
    Returning,
    Unwinding,
}

/// Control-flow outcome of one operation.
enum Flow {
    Next,
    Return(Value),
}

/// The interpreter over one script instance's state.
pub struct Vm<'a> {
    pub types: &'a TypeTable,
    pub functions: &'a [ScriptFunction],
    pub classes: &'a [ScriptClass],
    pub variant: &'a Variant,
    pub heap: &'a mut Heap,
    pub globals: &'a mut [Value],
    /// Exception travelling outward through frames.
    pending: Option<RuntimeError>,
    /// Exception delivered to a handler, awaiting `ExceptionCheck`.
    caught: Option<RuntimeError>,
    depth: usize,
}

impl<'a> Vm<'a> {
    pub fn new(
        types: &'a TypeTable,
        functions: &'a [ScriptFunction],
        classes: &'a [ScriptClass],
        variant: &'a Variant,
        heap: &'a mut Heap,
        globals: &'a mut [Value],
    ) -> Self {
        Self {
            types,
            functions,
            classes,
            variant,
            heap,
            globals,
            pending: None,
            caught: None,
            depth: 0,
        }
    }

    /// Runs a compiled function with already-owned argument values.
    ///
    /// Ownership of `args` (one reference each) transfers into the frame;
    /// the returned value carries one reference out to the caller.
    pub fn run_code(&mut self, code: &Code, args: Vec<Value>) -> RunResult<Value> {
        if self.depth >= MAX_CALL_DEPTH {
            for arg in args {
                arg.drop_with_heap(self.heap);
            }
            return Err(RuntimeError::new(ExcKind::Recursion, "maximum call depth exceeded"));
        }
        self.depth += 1;
        let result = self.run_frame(code, args);
        self.depth -= 1;
        result
    }

    fn run_frame(&mut self, code: &Code, mut args: Vec<Value>) -> RunResult<Value> {
        let mut regs: Vec<Value> = Vec::with_capacity(code.max_registers() as usize);
        regs.resize_with(code.max_registers() as usize, || Value::Null);
        let mut contexts: Vec<Vec<Reg>> = Vec::new();
        let mut handlers: Vec<(LabelId, usize)> = Vec::new();
        let mut global_map = [0u16; MAX_GLOBALS];
        let mut state = FrameState::Entering;
        let mut ip = 0usize;
        let mut ret = Value::Null;

        loop {
            match state {
                FrameState::Entering => {
                    // Argument registers sit at the bottom of the frame.
                    for (index, arg) in args.drain(..).enumerate() {
                        if index < regs.len() {
                            let old = std::mem::replace(&mut regs[index], arg);
                            old.drop_with_heap(self.heap);
                        } else {
                            arg.drop_with_heap(self.heap);
                        }
                    }
                    state = FrameState::Running;
                }

                FrameState::Running => {
                    if self.pending.is_some() {
                        state = FrameState::Unwinding;
                        continue;
                    }
                    let Some(op) = code.ops().get(ip) else {
                        state = FrameState::Returning;
                        continue;
                    };
                    ip += 1;
                    match self.exec_op(op, code, &mut regs, &mut contexts, &mut handlers, &mut global_map, &mut ip)
                    {
                        Ok(Flow::Next) => {}
                        Ok(Flow::Return(value)) => {
                            let old = std::mem::replace(&mut ret, value);
                            old.drop_with_heap(self.heap);
                            state = FrameState::Returning;
                        }
                        Err(error) => self.pending = Some(error),
                    }
                }

                FrameState::Unwinding => {
                    if let Some((label, saved_depth)) = handlers.pop() {
                        // Close every context opened inside the protected
                        // region, releasing its registers.
                        while contexts.len() > saved_depth {
                            let frame = contexts.pop().expect("checked by loop condition");
                            for reg in frame {
                                let old = std::mem::replace(&mut regs[reg as usize], Value::Null);
                                old.drop_with_heap(self.heap);
                            }
                        }
                        ip = code.label_target(label);
                        self.caught = self.pending.take();
                        state = FrameState::Running;
                    } else {
                        for value in regs.drain(..) {
                            value.drop_with_heap(self.heap);
                        }
                        ret.drop_with_heap(self.heap);
                        return Err(self.pending.take().expect("unwinding requires a pending exception"));
                    }
                }

                FrameState::Returning => {
                    for value in regs.drain(..) {
                        value.drop_with_heap(self.heap);
                    }
                    return Ok(std::mem::replace(&mut ret, Value::Null));
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn exec_op(
        &mut self,
        op: &Op,
        code: &Code,
        regs: &mut [Value],
        contexts: &mut Vec<Vec<Reg>>,
        handlers: &mut Vec<(LabelId, usize)>,
        global_map: &mut [u16; MAX_GLOBALS],
        ip: &mut usize,
    ) -> RunResult<Flow> {
        match op {
            Op::Nop => {}

            Op::EnterContext => contexts.push(Vec::new()),
            Op::LeaveContext => {
                if let Some(frame) = contexts.pop() {
                    for reg in frame {
                        self.write(regs, reg, Value::Null);
                    }
                }
            }
            Op::TagRegister { reg, .. } => {
                if let Some(frame) = contexts.last_mut() {
                    frame.push(*reg);
                }
            }

            Op::ImportGlobal { slot, global, .. } => global_map[*slot as usize] = *global,
            Op::GetGlobal { dst, slot } => {
                let index = global_map[*slot as usize] as usize;
                let value = self.globals[index].shallow_copy();
                let value = self.retain(value);
                self.write(regs, *dst, value);
            }
            Op::SetGlobal { slot, src } => {
                let index = global_map[*slot as usize] as usize;
                let value = self.clone_reg(regs, *src);
                let old = std::mem::replace(&mut self.globals[index], value);
                old.drop_with_heap(self.heap);
            }

            Op::LoadNull { dst, .. } => self.write(regs, *dst, Value::Null),
            Op::LoadBool { dst, value } => self.write(regs, *dst, Value::Bool(*value)),
            Op::LoadInt { dst, value } => self.write(regs, *dst, Value::Int(*value)),
            Op::LoadReal { dst, value } => self.write(regs, *dst, Value::Real(*value)),
            Op::LoadString { dst, value } => {
                let id = self.heap.allocate(HeapData::Str(value.clone()));
                self.write(regs, *dst, Value::Ref(id));
            }

            Op::Return { src } => {
                let value = std::mem::replace(&mut regs[*src as usize], Value::Null);
                return Ok(Flow::Return(value));
            }
            Op::ClearReg { reg } => self.write(regs, *reg, Value::Null),
            Op::Mov { dst, src } => {
                if dst != src {
                    let value = self.clone_reg(regs, *src);
                    self.write(regs, *dst, value);
                }
            }
            Op::RefEq { dst, a, b } | Op::RefNe { dst, a, b } => {
                let equal = match (&regs[*a as usize], &regs[*b as usize]) {
                    (Value::Null, Value::Null) => true,
                    (Value::Ref(x), Value::Ref(y)) => x == y,
                    _ => false,
                };
                let value = if matches!(op, Op::RefEq { .. }) { equal } else { !equal };
                self.write(regs, *dst, Value::Bool(value));
            }

            Op::Jump { label } => *ip = code.label_target(*label),
            Op::JumpIf { label, cond } => {
                if self.read_bool(regs, *cond)? {
                    *ip = code.label_target(*label);
                }
            }
            Op::JumpIfNot { label, cond } => {
                if !self.read_bool(regs, *cond)? {
                    *ip = code.label_target(*label);
                }
            }

            Op::CreateArray { dst, elem, len } => {
                let len = self.read_int(regs, *len)?;
                if len < 0 {
                    return Err(RuntimeError::new(ExcKind::Argument, format!("negative array length {len}")));
                }
                let cells = (0..len).map(|_| Value::default_for(*elem, self.types)).collect();
                let id = self.heap.allocate(HeapData::Array { elem: *elem, cells });
                self.write(regs, *dst, Value::Ref(id));
            }
            Op::CreateObject { dst, class, args } => {
                let arg_values = self.clone_args(regs, args);
                let object = self.create_object(*class, arg_values)?;
                self.write(regs, *dst, object);
            }

            Op::CallFunction { dst, target, args } => {
                let arg_values = self.clone_args(regs, args);
                let value = self.invoke(*target, None, arg_values)?;
                self.write(regs, *dst, value);
            }
            Op::CallMethod { dst, target, this, args } => {
                let this_value = self.clone_reg(regs, *this);
                if matches!(this_value, Value::Null) {
                    return Err(RuntimeError::null_deref("object"));
                }
                let arg_values = self.clone_args(regs, args);
                let value = self.invoke(*target, Some(this_value), arg_values)?;
                self.write(regs, *dst, value);
            }

            Op::GetIndex { dst, arr, index } => {
                let idx = self.read_int(regs, *index)?;
                let id = self.read_ref(regs, *arr, "array")?;
                let i = self.array_index(id, idx)?;
                let cell = match self.heap.get(id) {
                    HeapData::Array { cells, .. } => cells[i].shallow_copy(),
                    _ => unreachable!("checked by array_index"),
                };
                let cell = self.retain(cell);
                self.write(regs, *dst, cell);
            }
            Op::SetIndex { arr, index, src } => {
                let idx = self.read_int(regs, *index)?;
                let id = self.read_ref(regs, *arr, "array")?;
                let i = self.array_index(id, idx)?;
                let value = self.clone_reg(regs, *src);
                let old = match self.heap.get_mut(id) {
                    HeapData::Array { cells, .. } => std::mem::replace(&mut cells[i], value),
                    _ => unreachable!("checked by array_index"),
                };
                old.drop_with_heap(self.heap);
            }

            Op::GetElement { dst, obj, attr, name } => {
                let id = self.read_ref(regs, *obj, "object")?;
                let slot = self.attr_slot(id, *attr, name)?;
                let value = match self.heap.get(id) {
                    HeapData::Object { attrs, .. } => attrs[slot].shallow_copy(),
                    _ => unreachable!("checked by attr_slot"),
                };
                let value = self.retain(value);
                self.write(regs, *dst, value);
            }
            Op::SetElement { obj, attr, src, name } => {
                let id = self.read_ref(regs, *obj, "object")?;
                let slot = self.attr_slot(id, *attr, name)?;
                let value = self.clone_reg(regs, *src);
                let old = match self.heap.get_mut(id) {
                    HeapData::Object { attrs, .. } => std::mem::replace(&mut attrs[slot], value),
                    _ => unreachable!("checked by attr_slot"),
                };
                old.drop_with_heap(self.heap);
            }

            Op::Cast { dst, to, src } => {
                let value = self.cast_value(*to, &regs[*src as usize])?;
                self.write(regs, *dst, value);
            }

            Op::BinInt { op, dst, a, b } => {
                let x = self.read_int(regs, *a)?;
                let y = self.read_int(regs, *b)?;
                let value = int_binop(*op, x, y)?;
                self.write(regs, *dst, value);
            }
            Op::BinReal { op, dst, a, b } => {
                let x = self.read_real(regs, *a)?;
                let y = self.read_real(regs, *b)?;
                self.write(regs, *dst, real_binop(*op, x, y));
            }
            Op::BinStr { op, dst, a, b } => {
                let a_id = self.read_ref(regs, *a, "string")?;
                let b_id = self.read_ref(regs, *b, "string")?;
                let value = self.str_binop(*op, a_id, b_id)?;
                self.write(regs, *dst, value);
            }
            Op::BinBool { op, dst, a, b } => {
                let x = self.read_bool(regs, *a)?;
                let y = self.read_bool(regs, *b)?;
                let value = match op {
                    BoolBinOp::And => x && y,
                    BoolBinOp::Or => x || y,
                    BoolBinOp::Xor => x != y,
                    BoolBinOp::Eq => x == y,
                };
                self.write(regs, *dst, Value::Bool(value));
            }
            Op::NotBool { dst, src } => {
                let value = self.read_bool(regs, *src)?;
                self.write(regs, *dst, Value::Bool(!value));
            }
            Op::UniInt { op, dst, src } => {
                let value = self.read_int(regs, *src)?;
                let result = match op {
                    IntUniOp::Neg => value.wrapping_neg(),
                    IntUniOp::BitNot => !value,
                };
                self.write(regs, *dst, Value::Int(result));
            }
            Op::NegReal { dst, src } => {
                let value = self.read_real(regs, *src)?;
                self.write(regs, *dst, Value::Real(-value));
            }

            Op::ExceptionPush { label } => handlers.push((*label, contexts.len())),
            Op::ExceptionPop => {
                handlers.pop();
            }
            Op::ExceptionCheck { label } => {
                if self.caught.is_some() {
                    self.caught = None;
                    *ip = code.label_target(*label);
                }
            }
        }
        Ok(Flow::Next)
    }

    // ------------------------------------------------------------------
    // Calls
    // ------------------------------------------------------------------

    /// Dispatches a resolved call target. `this` is prepended for methods.
    ///
    /// Argument counts are checked exactly; variadic prototypes relax the
    /// upper bound. Ownership of `this` and `args` is consumed on every
    /// path, including failures.
    pub(crate) fn invoke(&mut self, target: CallTarget, this: Option<Value>, mut args: Vec<Value>) -> RunResult<Value> {
        enum Callee<'c> {
            Script(&'c ScriptFunction),
            Native(&'c crate::variant::NativeFunction),
        }
        // Copies of the shared environment references; borrows derived from
        // them live for 'a, independent of &mut self.
        let (functions, classes, variant) = (self.functions, self.classes, self.variant);
        let callee = match target {
            CallTarget::Script(i) => Callee::Script(&functions[i as usize]),
            CallTarget::ScriptMethod { class, method } => {
                Callee::Script(&classes[class as usize].methods[method as usize])
            }
            CallTarget::Native(i) => Callee::Native(&variant.functions[i as usize]),
            CallTarget::NativeMethod { class, method } => {
                Callee::Native(&variant.classes[class as usize].methods[method as usize])
            }
        };
        let (name, expected, variadic) = match &callee {
            Callee::Script(f) => (f.name.as_str(), f.args.len(), false),
            Callee::Native(f) => (f.name.as_str(), f.proto.args.len(), f.proto.variadic),
        };
        let count_ok = if variadic { args.len() >= expected } else { args.len() == expected };
        if !count_ok {
            let error = RuntimeError::new(
                ExcKind::Argument,
                format!(
                    "'{name}' expects {expected}{} arguments, found {}",
                    if variadic { " or more" } else { "" },
                    args.len()
                ),
            );
            self.drop_values(this, args);
            return Err(error);
        }
        match callee {
            Callee::Script(function) => {
                let code = match self.expect_code(function) {
                    Ok(code) => code,
                    Err(error) => {
                        self.drop_values(this, args);
                        return Err(error);
                    }
                };
                if let Some(this) = this {
                    args.insert(0, this);
                }
                self.run_code(code, args)
            }
            Callee::Native(function) => {
                let handler = function.handler;
                if let Some(this) = this {
                    args.insert(0, this);
                }
                self.call_native(handler, args)
            }
        }
    }

    fn drop_values(&mut self, this: Option<Value>, args: Vec<Value>) {
        if let Some(this) = this {
            this.drop_with_heap(self.heap);
        }
        for arg in args {
            arg.drop_with_heap(self.heap);
        }
    }

    fn expect_code<'f>(&self, function: &'f ScriptFunction) -> RunResult<&'f Code> {
        function.code.as_ref().ok_or_else(|| {
            RuntimeError::new(ExcKind::Native, format!("function '{}' was never compiled", function.name))
        })
    }

    /// Dispatches to a host handler. A failing call becomes the pending
    /// exception in the caller.
    fn call_native(&mut self, handler: crate::variant::NativeHandler, args: Vec<Value>) -> RunResult<Value> {
        let result = {
            let mut ctx = HostCall {
                heap: self.heap,
                types: self.types,
            };
            handler(&mut ctx, &args)
        };
        for arg in args {
            arg.drop_with_heap(self.heap);
        }
        result
    }

    /// Allocates an object of `class` and runs its constructor, consuming
    /// the argument references.
    pub fn create_object(&mut self, class: TypeId, args: Vec<Value>) -> RunResult<Value> {
        let types = self.types;
        let classes = self.classes;
        let variant = self.variant;
        match types.get(class) {
            TypeDef::Script(ci) => {
                let class_def = &classes[*ci];
                let attrs = class_def
                    .attributes
                    .iter()
                    .map(|a| Value::default_for(a.ty, types))
                    .collect();
                let id = self.heap.allocate(HeapData::Object { class, attrs, drop_hook: None });
                let object = Value::Ref(id);
                if let Some(ctor) = class_def.constructor_index() {
                    let code = self.expect_code(&class_def.methods[ctor])?;
                    let mut call_args = Vec::with_capacity(args.len() + 1);
                    call_args.push(object.clone_with_heap(self.heap));
                    call_args.extend(args);
                    match self.run_code(code, call_args) {
                        Ok(value) => value.drop_with_heap(self.heap),
                        Err(error) => {
                            object.drop_with_heap(self.heap);
                            return Err(error);
                        }
                    }
                } else {
                    self.drop_values(None, args);
                }
                Ok(object)
            }
            TypeDef::Native(ci) => {
                let class_def = &variant.classes[*ci];
                match &class_def.constructor {
                    Some(ctor) => {
                        let handler = ctor.handler;
                        self.call_native(handler, args)
                    }
                    None => {
                        let attrs = class_def
                            .attributes
                            .iter()
                            .map(|a| Value::default_for(a.ty, types))
                            .collect();
                        let drop_hook = class_def.destructor;
                        self.drop_values(None, args);
                        Ok(Value::Ref(self.heap.allocate(HeapData::Object { class, attrs, drop_hook })))
                    }
                }
            }
            _ => Err(RuntimeError::new(ExcKind::Type, "'new' on a non-class type")),
        }
    }

    // ------------------------------------------------------------------
    // Register and heap access
    // ------------------------------------------------------------------

    /// Writes a register, releasing the previous occupant.
    fn write(&mut self, regs: &mut [Value], dst: Reg, value: Value) {
        let old = std::mem::replace(&mut regs[dst as usize], value);
        old.drop_with_heap(self.heap);
    }

    fn clone_reg(&mut self, regs: &[Value], reg: Reg) -> Value {
        regs[reg as usize].clone_with_heap(self.heap)
    }

    fn clone_args(&mut self, regs: &[Value], args: &[Reg]) -> Vec<Value> {
        args.iter().map(|reg| regs[*reg as usize].clone_with_heap(self.heap)).collect()
    }

    /// Takes ownership of a shallow copy by incrementing its refcount.
    fn retain(&mut self, value: Value) -> Value {
        if let Value::Ref(id) = &value {
            self.heap.inc_ref(*id);
        }
        value
    }

    fn confusion(&self, expected: &str, found: &str) -> RuntimeError {
        RuntimeError::new(ExcKind::Type, format!("register type confusion: expected {expected}, found {found}"))
    }

    fn read_int(&self, regs: &[Value], reg: Reg) -> RunResult<i64> {
        match &regs[reg as usize] {
            Value::Int(value) => Ok(*value),
            other => Err(self.confusion("Integer", other.kind_str(self.heap))),
        }
    }

    fn read_real(&self, regs: &[Value], reg: Reg) -> RunResult<f64> {
        match &regs[reg as usize] {
            Value::Real(value) => Ok(*value),
            other => Err(self.confusion("Real", other.kind_str(self.heap))),
        }
    }

    fn read_bool(&self, regs: &[Value], reg: Reg) -> RunResult<bool> {
        match &regs[reg as usize] {
            Value::Bool(value) => Ok(*value),
            other => Err(self.confusion("Boolean", other.kind_str(self.heap))),
        }
    }

    /// Reads a reference register, raising a null-dereference on null.
    fn read_ref(&self, regs: &[Value], reg: Reg, what: &str) -> RunResult<HeapId> {
        match &regs[reg as usize] {
            Value::Ref(id) => Ok(*id),
            Value::Null => Err(RuntimeError::null_deref(what)),
            other => Err(self.confusion(what, other.kind_str(self.heap))),
        }
    }

    /// Bounds-checks an array access, returning the usable index.
    fn array_index(&self, id: HeapId, idx: i64) -> RunResult<usize> {
        match self.heap.get(id) {
            HeapData::Array { cells, .. } => {
                if idx < 0 || idx as usize >= cells.len() {
                    Err(RuntimeError::index_out_of_bounds(idx, cells.len()))
                } else {
                    Ok(idx as usize)
                }
            }
            other => Err(self.confusion("array", other.kind_str())),
        }
    }

    /// Checks an attribute access, returning the usable slot.
    fn attr_slot(&self, id: HeapId, attr: u16, name: &str) -> RunResult<usize> {
        match self.heap.get(id) {
            HeapData::Object { attrs, .. } if (attr as usize) < attrs.len() => Ok(attr as usize),
            HeapData::Object { .. } => Err(RuntimeError::new(
                ExcKind::Type,
                format!("object has no attribute slot for '{name}'"),
            )),
            other => Err(self.confusion("object", other.kind_str())),
        }
    }

    fn cast_value(&mut self, to: CoreType, value: &Value) -> RunResult<Value> {
        Ok(match (to, value) {
            (CoreType::Integer, Value::Int(v)) => Value::Int(*v),
            (CoreType::Integer, Value::Real(v)) => Value::Int(*v as i64),
            (CoreType::Integer, Value::Bool(v)) => Value::Int(i64::from(*v)),
            (CoreType::Real, Value::Int(v)) => Value::Real(*v as f64),
            (CoreType::Real, Value::Real(v)) => Value::Real(*v),
            (CoreType::Real, Value::Bool(v)) => Value::Real(if *v { 1.0 } else { 0.0 }),
            (CoreType::Boolean, Value::Int(v)) => Value::Bool(*v != 0),
            (CoreType::Boolean, Value::Real(v)) => Value::Bool(*v != 0.0),
            (CoreType::Boolean, Value::Bool(v)) => Value::Bool(*v),
            (CoreType::String, Value::Int(v)) => self.alloc_str(v.to_string()),
            (CoreType::String, Value::Real(v)) => self.alloc_str(v.to_string()),
            (CoreType::String, Value::Bool(v)) => self.alloc_str(if *v { "true" } else { "false" }.to_owned()),
            (_, other) => return Err(self.confusion("castable scalar", other.kind_str(self.heap))),
        })
    }

    fn alloc_str(&mut self, text: String) -> Value {
        Value::Ref(self.heap.allocate(HeapData::Str(text.into_bytes().into_boxed_slice())))
    }

    fn str_binop(&mut self, op: StrBinOp, a: HeapId, b: HeapId) -> RunResult<Value> {
        if op == StrBinOp::Add {
            let joined = [self.heap.str_bytes(a), self.heap.str_bytes(b)].concat();
            return Ok(Value::Ref(self.heap.allocate(HeapData::Str(joined.into_boxed_slice()))));
        }
        let ordering = self.heap.str_bytes(a).cmp(self.heap.str_bytes(b));
        let result = match op {
            StrBinOp::Eq => ordering.is_eq(),
            StrBinOp::Ne => !ordering.is_eq(),
            StrBinOp::Lt => ordering.is_lt(),
            StrBinOp::Le => ordering.is_le(),
            StrBinOp::Gt => ordering.is_gt(),
            StrBinOp::Ge => ordering.is_ge(),
            StrBinOp::Add => unreachable!("handled above"),
        };
        Ok(Value::Bool(result))
    }
}

/// Two's-complement 64-bit arithmetic with wrap-around on overflow; shift
/// counts are masked to 0..63 and rotate-left wraps the full word.
fn int_binop(op: IntBinOp, x: i64, y: i64) -> RunResult<Value> {
    let shift = (y as u64 & 63) as u32;
    Ok(match op {
        IntBinOp::Add => Value::Int(x.wrapping_add(y)),
        IntBinOp::Sub => Value::Int(x.wrapping_sub(y)),
        IntBinOp::Mul => Value::Int(x.wrapping_mul(y)),
        IntBinOp::Div if y == 0 => return Err(RuntimeError::divide_by_zero()),
        IntBinOp::Div => Value::Int(x.wrapping_div(y)),
        IntBinOp::Mod if y == 0 => return Err(RuntimeError::modulo_by_zero()),
        IntBinOp::Mod => Value::Int(x.wrapping_rem(y)),
        IntBinOp::BitAnd => Value::Int(x & y),
        IntBinOp::BitOr => Value::Int(x | y),
        IntBinOp::BitXor => Value::Int(x ^ y),
        IntBinOp::Shl => Value::Int(((x as u64) << shift) as i64),
        IntBinOp::Shr => Value::Int(((x as u64) >> shift) as i64),
        IntBinOp::Rol => Value::Int((x as u64).rotate_left(shift) as i64),
        IntBinOp::Eq => Value::Bool(x == y),
        IntBinOp::Ne => Value::Bool(x != y),
        IntBinOp::Lt => Value::Bool(x < y),
        IntBinOp::Le => Value::Bool(x <= y),
        IntBinOp::Gt => Value::Bool(x > y),
        IntBinOp::Ge => Value::Bool(x >= y),
    })
}

/// IEEE 754 binary64 arithmetic; division by zero follows IEEE semantics.
fn real_binop(op: RealBinOp, x: f64, y: f64) -> Value {
    match op {
        RealBinOp::Add => Value::Real(x + y),
        RealBinOp::Sub => Value::Real(x - y),
        RealBinOp::Mul => Value::Real(x * y),
        RealBinOp::Div => Value::Real(x / y),
        RealBinOp::Eq => Value::Bool(x == y),
        RealBinOp::Ne => Value::Bool(x != y),
        RealBinOp::Lt => Value::Bool(x < y),
        RealBinOp::Le => Value::Bool(x <= y),
        RealBinOp::Gt => Value::Bool(x > y),
        RealBinOp::Ge => Value::Bool(x >= y),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::builder::FunctionBuilder;
    use crate::exception::ExcKind;
    use crate::variant::Variant;

    fn run(code: &Code) -> (RunResult<Value>, Heap) {
        let types = TypeTable::new();
        let variant = Variant::new("test");
        let mut heap = Heap::default();
        let mut globals: Vec<Value> = Vec::new();
        let result = {
            let mut vm = Vm::new(&types, &[], &[], &variant, &mut heap, &mut globals);
            vm.run_code(code, Vec::new())
        };
        (result, heap)
    }

    /// Builds a two-operand integer function `op(x, y)` returning the result.
    fn int_binop_code(op: IntBinOp, x: i64, y: i64) -> Code {
        let mut b = FunctionBuilder::new();
        let a = b.alloc_reg().unwrap();
        let c = b.alloc_reg().unwrap();
        b.emit(Op::LoadInt { dst: a, value: x });
        b.emit(Op::LoadInt { dst: c, value: y });
        b.emit(Op::BinInt { op, dst: a, a, b: c });
        b.emit(Op::Return { src: a });
        b.build()
    }

    #[test]
    fn integer_arithmetic() {
        let (result, _) = run(&int_binop_code(IntBinOp::Mul, 2, 3));
        assert_eq!(result.unwrap(), Value::Int(6));
    }

    #[test]
    fn integer_overflow_wraps() {
        let (result, _) = run(&int_binop_code(IntBinOp::Add, i64::MAX, 1));
        assert_eq!(result.unwrap(), Value::Int(i64::MIN));
    }

    #[test]
    fn shift_counts_are_masked() {
        // 65 & 63 == 1
        let (result, _) = run(&int_binop_code(IntBinOp::Shl, 1, 65));
        assert_eq!(result.unwrap(), Value::Int(2));
    }

    #[test]
    fn rotate_left_wraps_the_word() {
        let (result, _) = run(&int_binop_code(IntBinOp::Rol, i64::MIN, 1));
        assert_eq!(result.unwrap(), Value::Int(1));
    }

    #[test]
    fn divide_by_zero_raises_arithmetic_error() {
        let (result, _) = run(&int_binop_code(IntBinOp::Div, 1, 0));
        let err = result.unwrap_err();
        assert_eq!(err.kind, ExcKind::Arithmetic);
        assert!(err.message.contains("divide"));
    }

    /// The handler mechanism catches a raised arithmetic error: context
    /// frames unwind to the saved depth and execution resumes at the
    /// handler's label.
    #[test]
    fn handler_catches_divide_by_zero() {
        let mut b = FunctionBuilder::new();
        let handler = b.alloc_label();
        let caught = b.alloc_label();
        let x = b.alloc_reg().unwrap();
        let y = b.alloc_reg().unwrap();
        b.emit(Op::ExceptionPush { label: handler });
        b.emit(Op::EnterContext);
        b.emit(Op::LoadInt { dst: x, value: 1 });
        b.emit(Op::LoadInt { dst: y, value: 0 });
        b.emit(Op::BinInt { op: IntBinOp::Div, dst: x, a: x, b: y });
        // Unreachable: the divide raises and unwinds to the handler.
        b.emit(Op::LoadInt { dst: x, value: 111 });
        b.emit(Op::Return { src: x });
        b.set_label(handler);
        b.emit(Op::ExceptionCheck { label: caught });
        b.emit(Op::LoadInt { dst: x, value: -1 });
        b.emit(Op::Return { src: x });
        b.set_label(caught);
        b.emit(Op::LoadInt { dst: x, value: 42 });
        b.emit(Op::Return { src: x });
        let code = b.build();
        code.validate().unwrap();
        let (result, _) = run(&code);
        assert_eq!(result.unwrap(), Value::Int(42));
    }

    #[test]
    fn string_concat_releases_operands() {
        let mut b = FunctionBuilder::new();
        let x = b.alloc_reg().unwrap();
        let y = b.alloc_reg().unwrap();
        let dst = b.alloc_reg().unwrap();
        b.emit(Op::LoadString { dst: x, value: b"a".to_vec().into_boxed_slice() });
        b.emit(Op::LoadString { dst: y, value: b"b".to_vec().into_boxed_slice() });
        b.emit(Op::BinStr { op: StrBinOp::Add, dst, a: x, b: y });
        b.emit(Op::Return { src: dst });
        let (result, mut heap) = run(&b.build());
        let value = result.unwrap();
        match &value {
            Value::Ref(id) => assert_eq!(heap.str_bytes(*id), b"ab"),
            other => panic!("expected string, found {other:?}"),
        }
        // Operand strings died with the frame; only the result survives.
        assert_eq!(heap.live_count(), 1);
        value.drop_with_heap(&mut heap);
        assert_eq!(heap.live_count(), 0);
    }

    #[test]
    fn leave_context_clears_tagged_registers() {
        let mut b = FunctionBuilder::new();
        let s = b.alloc_reg().unwrap();
        let out = b.alloc_reg().unwrap();
        b.emit(Op::EnterContext);
        b.emit(Op::TagRegister { reg: s, name: "tmp".into() });
        b.emit(Op::LoadString { dst: s, value: b"scoped".to_vec().into_boxed_slice() });
        b.emit(Op::LeaveContext);
        b.emit(Op::LoadInt { dst: out, value: 0 });
        b.emit(Op::Return { src: out });
        let (result, heap) = run(&b.build());
        assert_eq!(result.unwrap(), Value::Int(0));
        assert_eq!(heap.live_count(), 0);
    }

    #[test]
    fn uncaught_exception_tears_down_the_frame() {
        let mut b = FunctionBuilder::new();
        let s = b.alloc_reg().unwrap();
        let z = b.alloc_reg().unwrap();
        b.emit(Op::LoadString { dst: s, value: b"leak check".to_vec().into_boxed_slice() });
        b.emit(Op::LoadInt { dst: z, value: 0 });
        b.emit(Op::BinInt { op: IntBinOp::Mod, dst: z, a: z, b: z });
        b.emit(Op::Return { src: z });
        let (result, heap) = run(&b.build());
        assert!(result.is_err());
        assert_eq!(heap.live_count(), 0);
    }
}
