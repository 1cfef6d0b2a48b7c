//! A script instance: parse, compile, and invoke.
//!
//! [`SpiderScript`] owns everything with script lifetime: the type table,
//! declarations, compiled bytecode, global storage, the heap, and the
//! current exception record. Two instances share no mutable state and may
//! run on separate host threads.

use std::sync::Arc;

use crate::ast::{AstFunction, AttrDef, CodeLoc, Expr, ExprLoc, Stmt};
use crate::bytecode::compiler::{CompileEnv, Compiler};
use crate::bytecode::op::{CallTarget, Code};
use crate::bytecode::vm::Vm;
use crate::exception::{CompileError, ExcKind, RuntimeError, RunResult, ScriptError};
use crate::heap::{Heap, HeapData};
use crate::optimize;
use crate::parser::{parse_source, IncludeLoader, NoIncludes};
use crate::types::{TypeDef, TypeId, TypeRef, TypeTable};
use crate::value::{ObjectHandle, ScriptValue, Value};
use crate::variant::Variant;

/// A script function: declaration, AST body and (after `compile`) bytecode.
#[derive(Debug, Clone)]
pub struct ScriptFunction {
    pub pos: CodeLoc,
    /// Possibly `@`-qualified name.
    pub name: String,
    pub ret: TypeRef,
    pub args: Vec<(TypeRef, String)>,
    pub body: Stmt,
    /// Compiled body; `None` until compilation, and left `None` for
    /// functions whose compilation failed (they were dropped).
    pub code: Option<Code>,
}

/// A script class: attributes and methods. The method named `__constructor`
/// is the constructor.
#[derive(Debug, Clone)]
pub struct ScriptClass {
    pub pos: CodeLoc,
    pub name: String,
    pub type_id: TypeId,
    pub attributes: Vec<AttrDef>,
    pub methods: Vec<ScriptFunction>,
}

impl ScriptClass {
    pub fn method_index(&self, name: &str) -> Option<usize> {
        self.methods.iter().position(|m| m.name == name)
    }

    pub fn constructor_index(&self) -> Option<usize> {
        self.method_index(crate::parser::CONSTRUCTOR_NAME)
    }
}

/// A script-global variable: declared type plus its storage slot, which
/// lives in `SpiderScript::global_values` at the same index.
pub type GlobalVar = crate::ast::AstGlobal;

/// One parsed (and possibly compiled) script bound to a host variant.
#[derive(Debug)]
pub struct SpiderScript {
    variant: Arc<Variant>,
    types: TypeTable,
    functions: Vec<ScriptFunction>,
    classes: Vec<ScriptClass>,
    globals: Vec<GlobalVar>,
    global_values: Vec<Value>,
    heap: Heap,
    /// Current exception record: the last runtime error that escaped a call.
    exception: Option<RuntimeError>,
    compiled: bool,
}

impl SpiderScript {
    /// Parses a source buffer with includes disabled.
    pub fn parse_buffer(variant: Arc<Variant>, source: &str, file: &str) -> Result<Self, ScriptError> {
        Self::parse_with_includes(variant, source, file, &NoIncludes)
    }

    /// Parses a source buffer, resolving `@include` through `loader`.
    ///
    /// Every syntax error is reported through the variant's error sink and
    /// drops only its top-level item; if any occurred, the first is
    /// returned.
    pub fn parse_with_includes(
        variant: Arc<Variant>,
        source: &str,
        file: &str,
        loader: &dyn IncludeLoader,
    ) -> Result<Self, ScriptError> {
        let mut types = TypeTable::new();
        for (index, class) in variant.classes.iter().enumerate() {
            if types.register_class(&class.name, TypeDef::Native(index)).is_err() {
                variant.emit_error(&format!("duplicate native class name '{}'", class.name));
            }
        }

        let (mut parsed, errors) = parse_source(source, file, &mut types, loader);
        optimize::optimize_script(&mut parsed);
        for error in &errors {
            variant.emit_error(&error.to_string());
        }

        let functions = parsed.functions.into_iter().map(lower_function).collect();
        let classes: Vec<ScriptClass> = parsed
            .classes
            .into_iter()
            .map(|class| ScriptClass {
                pos: class.pos,
                name: class.name,
                type_id: class.type_id,
                attributes: class.attributes,
                methods: class.methods.into_iter().map(lower_function).collect(),
            })
            .collect();
        let globals = parsed.globals;
        let global_values = globals.iter().map(|g| Value::default_for(g.ty, &types)).collect();

        let script = Self {
            variant,
            types,
            functions,
            classes,
            globals,
            global_values,
            heap: Heap::default(),
            exception: None,
            compiled: false,
        };
        match errors.into_iter().next() {
            Some(first) => Err(first.into()),
            None => Ok(script),
        }
    }

    /// Type-checks and compiles every function, method and global
    /// initializer. Compiling an already-compiled script is a no-op.
    ///
    /// A failing function is dropped (its bytecode stays absent) and
    /// compilation continues with the next one; every error reaches the
    /// error sink and the first is returned.
    pub fn compile(&mut self) -> Result<(), ScriptError> {
        if self.compiled {
            return Ok(());
        }
        let mut errors: Vec<CompileError> = Vec::new();
        let mut function_codes: Vec<Option<Code>> = vec![None; self.functions.len()];
        let mut method_codes: Vec<Vec<Option<Code>>> = self
            .classes
            .iter()
            .map(|c| vec![None; c.methods.len()])
            .collect();

        {
            let env = CompileEnv {
                types: &self.types,
                functions: &self.functions,
                classes: &self.classes,
                globals: &self.globals,
                variant: &self.variant,
            };
            for (index, function) in self.functions.iter().enumerate() {
                if function.code.is_some() {
                    continue;
                }
                match Compiler::compile_function(&env, function, None) {
                    Ok(code) => match checked(code, function) {
                        Ok(code) => function_codes[index] = Some(code),
                        Err(error) => errors.push(error),
                    },
                    Err(error) => errors.push(error),
                }
            }
            for (class_index, class) in self.classes.iter().enumerate() {
                for (method_index, method) in class.methods.iter().enumerate() {
                    if method.code.is_some() {
                        continue;
                    }
                    match Compiler::compile_function(&env, method, Some(class.type_id)) {
                        Ok(code) => match checked(code, method) {
                            Ok(code) => method_codes[class_index][method_index] = Some(code),
                            Err(error) => errors.push(error),
                        },
                        Err(error) => errors.push(error),
                    }
                }
            }
        }

        for (index, code) in function_codes.into_iter().enumerate() {
            if code.is_some() {
                self.functions[index].code = code;
            }
        }
        for (class_index, codes) in method_codes.into_iter().enumerate() {
            for (method_index, code) in codes.into_iter().enumerate() {
                if code.is_some() {
                    self.classes[class_index].methods[method_index].code = code;
                }
            }
        }

        // Global initializers must have folded to literals by now.
        for index in 0..self.globals.len() {
            let Some(init) = self.globals[index].init.clone() else {
                continue;
            };
            match literal_value(&init, self.globals[index].ty, &self.types, &mut self.heap) {
                Ok(value) => {
                    let old = std::mem::replace(&mut self.global_values[index], value);
                    old.drop_with_heap(&mut self.heap);
                }
                Err(error) => errors.push(error),
            }
        }

        self.compiled = true;
        for error in &errors {
            self.variant.emit_error(&error.to_string());
        }
        match errors.into_iter().next() {
            Some(first) => Err(first.into()),
            None => Ok(()),
        }
    }

    /// Invokes a script function by name with an argument tuple.
    pub fn call(&mut self, name: &str, args: &[ScriptValue]) -> Result<ScriptValue, ScriptError> {
        self.compile()?;
        let Some(index) = self.functions.iter().position(|f| f.name == name) else {
            return Err(self.surface(RuntimeError::new(
                ExcKind::Native,
                format!("unknown function '{name}'"),
            )));
        };
        let arg_tys: Vec<TypeRef> = self.functions[index].args.iter().map(|(t, _)| *t).collect();
        if args.len() != arg_tys.len() {
            return Err(self.surface(RuntimeError::new(
                ExcKind::Argument,
                format!("'{name}' expects {} arguments, found {}", arg_tys.len(), args.len()),
            )));
        }
        if self.functions[index].code.is_none() {
            return Err(self.surface(RuntimeError::new(
                ExcKind::Native,
                format!("function '{name}' failed to compile"),
            )));
        }
        let values = match self.convert_args(args, &arg_tys) {
            Ok(values) => values,
            Err(error) => return Err(self.surface(error)),
        };
        let code = self.functions[index].code.as_ref().expect("checked above");
        let result = {
            let mut vm =
                Vm::new(&self.types, &self.functions, &self.classes, &self.variant, &mut self.heap, &mut self.global_values);
            vm.run_code(code, values)
        };
        match result {
            Ok(value) => Ok(ScriptValue::from_value(value, &mut self.heap)),
            Err(error) => Err(self.surface(error)),
        }
    }

    /// Constructs an object of a named class; the returned handle owns one
    /// reference, released with [`SpiderScript::release`].
    pub fn construct(&mut self, class_name: &str, args: &[ScriptValue]) -> Result<ObjectHandle, ScriptError> {
        self.compile()?;
        let Some(class_id) = self.types.resolve(&[], class_name) else {
            return Err(self.surface(RuntimeError::new(
                ExcKind::Native,
                format!("unknown class '{class_name}'"),
            )));
        };
        let ctor_info: Result<(Vec<TypeRef>, bool), RuntimeError> = match self.types.get(class_id) {
            TypeDef::Script(ci) => {
                let class = &self.classes[*ci];
                let tys = class
                    .constructor_index()
                    .map(|mi| class.methods[mi].args.iter().map(|(t, _)| *t).collect::<Vec<_>>())
                    .unwrap_or_default();
                Ok((tys, false))
            }
            TypeDef::Native(ci) => match &self.variant.classes[*ci].constructor {
                Some(ctor) => Ok((ctor.proto.args.clone(), ctor.proto.variadic)),
                None => Ok((Vec::new(), false)),
            },
            _ => Err(RuntimeError::new(
                ExcKind::Type,
                format!("'{class_name}' is not a class"),
            )),
        };
        let (arg_tys, variadic) = match ctor_info {
            Ok(info) => info,
            Err(error) => return Err(self.surface(error)),
        };
        let count_ok = if variadic {
            args.len() >= arg_tys.len()
        } else {
            args.len() == arg_tys.len()
        };
        if !count_ok {
            return Err(self.surface(RuntimeError::new(
                ExcKind::Argument,
                format!(
                    "'{class_name}' constructor expects {} arguments, found {}",
                    arg_tys.len(),
                    args.len()
                ),
            )));
        }
        let values = match self.convert_args(args, &arg_tys) {
            Ok(values) => values,
            Err(error) => return Err(self.surface(error)),
        };
        let result = {
            let mut vm =
                Vm::new(&self.types, &self.functions, &self.classes, &self.variant, &mut self.heap, &mut self.global_values);
            vm.create_object(class_id, values)
        };
        match result {
            Ok(Value::Ref(id)) => Ok(ObjectHandle(id)),
            Ok(other) => {
                other.drop_with_heap(&mut self.heap);
                Err(self.surface(RuntimeError::new(
                    ExcKind::Native,
                    "constructor did not produce an object",
                )))
            }
            Err(error) => Err(self.surface(error)),
        }
    }

    /// Invokes a method on an object handle.
    pub fn call_method(
        &mut self,
        handle: ObjectHandle,
        name: &str,
        args: &[ScriptValue],
    ) -> Result<ScriptValue, ScriptError> {
        self.compile()?;
        let found = match self.heap.get(handle.0) {
            HeapData::Object { class, .. } => Ok(*class),
            other => Err(other.kind_str()),
        };
        let class_id = match found {
            Ok(class_id) => class_id,
            Err(kind) => {
                return Err(self.surface(RuntimeError::new(
                    ExcKind::Type,
                    format!("handle refers to a {kind}, not an object"),
                )));
            }
        };
        let resolved: Result<(CallTarget, Vec<TypeRef>), RuntimeError> = match self.types.get(class_id) {
            TypeDef::Script(ci) => {
                let class = &self.classes[*ci];
                match class.method_index(name) {
                    Some(mi) => Ok((
                        CallTarget::ScriptMethod {
                            class: *ci as u16,
                            method: mi as u16,
                        },
                        class.methods[mi].args.iter().map(|(t, _)| *t).collect(),
                    )),
                    None => Err(RuntimeError::new(
                        ExcKind::Native,
                        format!("class {} has no method '{name}'", class.name),
                    )),
                }
            }
            TypeDef::Native(ci) => {
                let class = &self.variant.classes[*ci];
                match class.method_index(name) {
                    Some(mi) => Ok((
                        CallTarget::NativeMethod {
                            class: *ci as u16,
                            method: mi as u16,
                        },
                        class.methods[mi].proto.args.clone(),
                    )),
                    None => Err(RuntimeError::new(
                        ExcKind::Native,
                        format!("class {} has no method '{name}'", class.name),
                    )),
                }
            }
            _ => Err(RuntimeError::new(ExcKind::Type, "handle is not an object")),
        };
        let (target, arg_tys) = match resolved {
            Ok(resolved) => resolved,
            Err(error) => return Err(self.surface(error)),
        };
        let values = match self.convert_args(args, &arg_tys) {
            Ok(values) => values,
            Err(error) => return Err(self.surface(error)),
        };
        self.heap.inc_ref(handle.0);
        let this = Value::Ref(handle.0);
        let result = {
            let mut vm =
                Vm::new(&self.types, &self.functions, &self.classes, &self.variant, &mut self.heap, &mut self.global_values);
            vm.invoke(target, Some(this), values)
        };
        match result {
            Ok(value) => Ok(ScriptValue::from_value(value, &mut self.heap)),
            Err(error) => Err(self.surface(error)),
        }
    }

    /// Releases an object handle's reference.
    pub fn release(&mut self, handle: ObjectHandle) {
        self.heap.dec_ref(handle.0);
    }

    /// Reads a script global by name.
    pub fn get_global(&mut self, name: &str) -> Option<ScriptValue> {
        let index = self.globals.iter().position(|g| g.name == name)?;
        let value = self.global_values[index].clone_with_heap(&mut self.heap);
        Some(ScriptValue::from_value(value, &mut self.heap))
    }

    /// Number of live heap values; the reference-count conservation hook.
    pub fn live_heap_values(&self) -> usize {
        self.heap.live_count()
    }

    /// The current exception record, set by the last failing call.
    pub fn last_exception(&self) -> Option<&RuntimeError> {
        self.exception.as_ref()
    }

    pub fn variant(&self) -> &Variant {
        &self.variant
    }

    /// Records a runtime error as the current exception, formats it through
    /// the host callback, and wraps it for the embedding result.
    fn surface(&mut self, error: RuntimeError) -> ScriptError {
        self.variant.emit_error(&error.to_string());
        self.exception = Some(error.clone());
        ScriptError::Runtime(error)
    }

    /// Converts host arguments against the callee's parameter types,
    /// releasing partial conversions on failure.
    fn convert_args(&mut self, args: &[ScriptValue], arg_tys: &[TypeRef]) -> RunResult<Vec<Value>> {
        let mut values = Vec::with_capacity(args.len());
        for (index, arg) in args.iter().enumerate() {
            let expected = arg_tys.get(index).copied().unwrap_or(TypeRef::UNDEF);
            match arg.to_value(expected, &mut self.heap, &self.types) {
                Ok(value) => values.push(value),
                Err(error) => {
                    for value in values {
                        value.drop_with_heap(&mut self.heap);
                    }
                    return Err(error);
                }
            }
        }
        Ok(values)
    }
}

impl Drop for SpiderScript {
    /// Globals own heap references; release them so the conservation
    /// invariant holds for the whole instance lifetime.
    fn drop(&mut self) {
        for value in std::mem::take(&mut self.global_values) {
            value.drop_with_heap(&mut self.heap);
        }
    }
}

/// Structural check on freshly emitted code: every jump targets an allocated
/// label within the op sequence and every operand register is in range.
fn checked(code: Code, function: &ScriptFunction) -> Result<Code, CompileError> {
    match code.validate() {
        Ok(()) => Ok(code),
        Err(message) => Err(CompileError::new(
            function.pos.file.as_ref(),
            function.pos.line,
            format!("invalid bytecode for '{}': {message}", function.name),
        )),
    }
}

fn lower_function(f: AstFunction) -> ScriptFunction {
    ScriptFunction {
        pos: f.pos,
        name: f.name,
        ret: f.ret,
        args: f.args,
        body: f.body,
        code: None,
    }
}

/// Evaluates a global initializer, which the optimizer must have reduced to
/// a literal of the declared type.
fn literal_value(
    expr: &ExprLoc,
    ty: TypeRef,
    types: &TypeTable,
    heap: &mut Heap,
) -> Result<Value, CompileError> {
    let mismatch = || {
        CompileError::new(
            expr.pos.file.as_ref(),
            expr.pos.line,
            "global initializer must be a constant of the declared type",
        )
    };
    match (&expr.expr, ty) {
        (Expr::Int(v), TypeRef::INTEGER) => Ok(Value::Int(*v)),
        (Expr::Real(v), TypeRef::REAL) => Ok(Value::Real(*v)),
        (Expr::Bool(v), TypeRef::BOOLEAN) => Ok(Value::Bool(*v)),
        (Expr::Str(bytes), TypeRef::STRING) => Ok(Value::Ref(
            heap.allocate(HeapData::Str(bytes.clone().into_boxed_slice())),
        )),
        (Expr::Null, _) if types.is_reference(ty) => Ok(Value::Null),
        _ => Err(mismatch()),
    }
}
