//! End-to-end language scenarios through the embedding surface.

use std::sync::Arc;

use spiderscript::{
    ExcKind, HostCall, NamedConstant, NativeAttr, NativeClass, NativeFunction, Prototype,
    RuntimeError, ScriptError, ScriptValue, SpiderScript, TypeRef, Value, Variant,
};

fn script(source: &str) -> SpiderScript {
    SpiderScript::parse_buffer(Arc::new(Variant::new("test")), source, "test.ss")
        .expect("source should parse")
}

fn call(source: &str, func: &str, args: &[ScriptValue]) -> ScriptValue {
    script(source).call(func, args).expect("call should succeed")
}

#[test]
fn constant_arithmetic() {
    assert_eq!(
        call("Integer f() { return 1 + 2 * 3; }", "f", &[]),
        ScriptValue::Int(7)
    );
}

#[test]
fn string_concatenation() {
    let result = call("String g() { return \"a\" + \"b\"; }", "g", &[]);
    let ScriptValue::Str(s) = result else {
        panic!("expected string, got {result:?}");
    };
    assert_eq!(s, "ab");
    assert_eq!(s.len(), 2);
}

#[test]
fn for_loop_sum() {
    let source = "Integer h(Integer n) { Integer s = 0; for (Integer i = 1; i <= n; i++) s += i; return s; }";
    assert_eq!(call(source, "h", &[ScriptValue::Int(10)]), ScriptValue::Int(55));
}

#[test]
fn divide_by_zero_is_an_arithmetic_error() {
    let mut s = script("Integer d() { return 1 / 0; }");
    let err = s.call("d", &[]).expect_err("divide by zero must fail");
    let ScriptError::Runtime(e) = err else {
        panic!("expected a runtime error, got {err}");
    };
    assert_eq!(e.kind, ExcKind::Arithmetic);
    assert!(e.message.contains("divide"), "message: {}", e.message);
    // The failure is recorded as the script's current exception.
    assert_eq!(s.last_exception(), Some(&e));
}

#[test]
fn object_attribute_round_trip_and_release() {
    let source = "class C { Integer x; } Integer m() { C o = new C(); o.x = 5; return o.x; }";
    let mut s = script(source);
    assert_eq!(s.call("m", &[]).unwrap(), ScriptValue::Int(5));
    // The object died with the frame: live heap count returns to baseline.
    assert_eq!(s.live_heap_values(), 0);
}

#[test]
fn array_create_fill_return() {
    let source = "Integer[] a() { Integer[] r = new Integer[3]; r[0] = 10; r[1] = 20; r[2] = 30; return r; }";
    assert_eq!(
        call(source, "a", &[]),
        ScriptValue::Array(vec![
            ScriptValue::Int(10),
            ScriptValue::Int(20),
            ScriptValue::Int(30)
        ])
    );
}

#[test]
fn array_literal_infers_element_type() {
    let source = "Integer total() { Integer[] r = [1, 2, 3, 4]; Integer s = 0; for (Integer i = 0; i < 4; i++) s += r[i]; return s; }";
    assert_eq!(call(source, "total", &[]), ScriptValue::Int(10));
}

#[test]
fn nested_arrays() {
    let source = "Integer n() { Integer[][] grid = new Integer[][2]; grid[0] = new Integer[2]; grid[0][1] = 7; return grid[0][1]; }";
    assert_eq!(call(source, "n", &[]), ScriptValue::Int(7));
}

#[test]
fn do_while_runs_at_least_once() {
    let source = "Integer dw() { Integer i = 0; do { i += 1; } while (i < 3); return i; }";
    assert_eq!(call(source, "dw", &[]), ScriptValue::Int(3));
    let once = "Integer o() { Integer i = 10; do { i += 1; } while (false); return i; }";
    assert_eq!(call(once, "o", &[]), ScriptValue::Int(11));
}

#[test]
fn switch_dispatches_with_default() {
    let source = "String name(Integer n) { switch (n) { case 1: return \"one\"; case 2: return \"two\"; default: return \"many\"; } }";
    assert_eq!(
        call(source, "name", &[ScriptValue::Int(2)]),
        ScriptValue::Str("two".to_owned())
    );
    assert_eq!(
        call(source, "name", &[ScriptValue::Int(9)]),
        ScriptValue::Str("many".to_owned())
    );
}

#[test]
fn switch_falls_through_without_break() {
    let source = "Integer f(Integer n) { Integer total = 0; switch (n) { case 1: total += 1; case 2: total += 2; break; default: total += 100; } return total; }";
    assert_eq!(call(source, "f", &[ScriptValue::Int(1)]), ScriptValue::Int(3));
    assert_eq!(call(source, "f", &[ScriptValue::Int(2)]), ScriptValue::Int(2));
    assert_eq!(call(source, "f", &[ScriptValue::Int(5)]), ScriptValue::Int(100));
}

#[test]
fn tagged_continue_skips_inner_loop() {
    let source = "Integer t() { Integer total = 0; outer: for (Integer i = 0; i < 3; i++) { for (Integer j = 0; j < 3; j++) { if (j == 2) continue outer; total += 1; } } return total; }";
    assert_eq!(call(source, "t", &[]), ScriptValue::Int(6));
}

#[test]
fn tagged_break_leaves_outer_loop() {
    let source = "Integer t() { Integer total = 0; outer: for (Integer i = 0; i < 10; i++) { for (Integer j = 0; j < 10; j++) { if (i * 10 + j == 23) break outer; total += 1; } } return total; }";
    assert_eq!(call(source, "t", &[]), ScriptValue::Int(23));
}

#[test]
fn short_circuit_skips_null_dereference() {
    let source = "Boolean sc() { Integer[] a = null; return a === null || a[0] == 1; }";
    assert_eq!(call(source, "sc", &[]), ScriptValue::Bool(true));
}

#[test]
fn logical_xor_is_not_short_circuit() {
    let source = "Boolean x(Boolean a, Boolean b) { return a ^^ b; }";
    assert_eq!(
        call(source, "x", &[ScriptValue::Bool(true), ScriptValue::Bool(false)]),
        ScriptValue::Bool(true)
    );
    assert_eq!(
        call(source, "x", &[ScriptValue::Bool(true), ScriptValue::Bool(true)]),
        ScriptValue::Bool(false)
    );
}

#[test]
fn null_coalescing_on_strings() {
    let source = "String f(String s) { return s ?: \"fallback\"; }";
    assert_eq!(
        call(source, "f", &[ScriptValue::Null]),
        ScriptValue::Str("fallback".to_owned())
    );
    assert_eq!(
        call(source, "f", &[ScriptValue::Str("hi".to_owned())]),
        ScriptValue::Str("hi".to_owned())
    );
}

#[test]
fn post_increment_yields_old_value() {
    let source = "Integer f() { Integer i = 5; Integer j = i++; return i * 100 + j; }";
    assert_eq!(call(source, "f", &[]), ScriptValue::Int(605));
}

#[test]
fn globals_persist_across_calls() {
    let source = "Integer counter = 0; Integer bump() { counter += 1; return counter; }";
    let mut s = script(source);
    assert_eq!(s.call("bump", &[]).unwrap(), ScriptValue::Int(1));
    assert_eq!(s.call("bump", &[]).unwrap(), ScriptValue::Int(2));
    assert_eq!(s.get_global("counter"), Some(ScriptValue::Int(2)));
}

#[test]
fn methods_and_constructor() {
    let source = "class Point { Integer x; Integer y; void __constructor(Integer ax, Integer ay) { this.x = ax; this.y = ay; } Integer sum() { return this.x + this.y; } } Integer use_point() { Point p = new Point(3, 4); return p.sum(); }";
    assert_eq!(call(source, "use_point", &[]), ScriptValue::Int(7));
}

#[test]
fn host_constructs_and_calls_methods() {
    let source = "class Point { Integer x; Integer y; void __constructor(Integer ax, Integer ay) { this.x = ax; this.y = ay; } Integer sum() { return this.x + this.y; } }";
    let mut s = script(source);
    let handle = s
        .construct("Point", &[ScriptValue::Int(3), ScriptValue::Int(4)])
        .unwrap();
    assert_eq!(s.call_method(handle, "sum", &[]).unwrap(), ScriptValue::Int(7));
    s.release(handle);
    assert_eq!(s.live_heap_values(), 0);
}

#[test]
fn explicit_cast_truncates() {
    let source = "Integer f(Real r) { return (Integer)r; }";
    assert_eq!(call(source, "f", &[ScriptValue::Real(3.9)]), ScriptValue::Int(3));
}

#[test]
fn cast_to_string_formats() {
    let source = "String f(Integer n) { return (String)n; }";
    assert_eq!(
        call(source, "f", &[ScriptValue::Int(-42)]),
        ScriptValue::Str("-42".to_owned())
    );
}

#[test]
fn mixed_arithmetic_requires_variant_permission() {
    let source = "Real f(Integer n) { return n * 1.5; }";
    // Without implicit casts: compile error.
    let result = SpiderScript::parse_buffer(Arc::new(Variant::new("strict")), source, "test.ss")
        .unwrap()
        .call("f", &[ScriptValue::Int(4)]);
    assert!(matches!(result, Err(ScriptError::Compile(_))), "got {result:?}");

    // With implicit casts: int widens to real.
    let variant = Arc::new(Variant::new("lenient").with_implicit_casts(true));
    let mut s = SpiderScript::parse_buffer(variant, source, "test.ss").unwrap();
    assert_eq!(s.call("f", &[ScriptValue::Int(4)]).unwrap(), ScriptValue::Real(6.0));
}

#[test]
fn string_comparison_is_lexicographic() {
    let source = "Boolean lt(String a, String b) { return a < b; }";
    assert_eq!(
        call(
            source,
            "lt",
            &[ScriptValue::Str("abc".to_owned()), ScriptValue::Str("abd".to_owned())]
        ),
        ScriptValue::Bool(true)
    );
}

#[test]
fn compiling_twice_is_a_no_op() {
    let mut s = script("Integer f() { return 1; }");
    s.compile().unwrap();
    s.compile().unwrap();
    assert_eq!(s.call("f", &[]).unwrap(), ScriptValue::Int(1));
}

#[test]
fn recursion_works() {
    let source = "Integer fib(Integer n) { if (n < 2) return n; return fib(n - 1) + fib(n - 2); }";
    assert_eq!(call(source, "fib", &[ScriptValue::Int(10)]), ScriptValue::Int(55));
}

#[test]
fn delete_releases_a_reference() {
    let source = "Integer f() { String s = \"keep me\"; delete s; return 0; }";
    let mut s = script(source);
    assert_eq!(s.call("f", &[]).unwrap(), ScriptValue::Int(0));
    assert_eq!(s.live_heap_values(), 0);
}

// ----------------------------------------------------------------------
// Host interop
// ----------------------------------------------------------------------

fn add2(_ctx: &mut HostCall<'_>, args: &[Value]) -> Result<Value, RuntimeError> {
    match (&args[0], &args[1]) {
        (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a + b)),
        _ => Err(RuntimeError::new(ExcKind::Type, "add2 expects integers")),
    }
}

fn greet(ctx: &mut HostCall<'_>, args: &[Value]) -> Result<Value, RuntimeError> {
    let name = ctx
        .str_bytes(&args[0])
        .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
        .unwrap_or_default();
    Ok(ctx.alloc_str(&format!("hello {name}")))
}

fn int_proto(argc: usize) -> Prototype {
    Prototype {
        ret: TypeRef::INTEGER,
        args: vec![TypeRef::INTEGER; argc],
        variadic: false,
    }
}

#[test]
fn native_function_call() {
    let variant = Arc::new(
        Variant::new("host").with_function(NativeFunction::new("math@add", int_proto(2), add2)),
    );
    let mut s = SpiderScript::parse_buffer(
        variant,
        "Integer f() { return math@add(2, 3); }",
        "test.ss",
    )
    .unwrap();
    assert_eq!(s.call("f", &[]).unwrap(), ScriptValue::Int(5));
}

#[test]
fn native_function_with_strings() {
    let variant = Arc::new(Variant::new("host").with_function(NativeFunction::new(
        "greet",
        Prototype {
            ret: TypeRef::STRING,
            args: vec![TypeRef::STRING],
            variadic: false,
        },
        greet,
    )));
    let mut s = SpiderScript::parse_buffer(
        variant,
        "String f() { return greet(\"world\"); }",
        "test.ss",
    )
    .unwrap();
    assert_eq!(
        s.call("f", &[]).unwrap(),
        ScriptValue::Str("hello world".to_owned())
    );
    assert_eq!(s.live_heap_values(), 0);
}

#[test]
fn named_constants_resolve() {
    let variant = Arc::new(Variant::new("host").with_constant(NamedConstant {
        name: "ANSWER".to_owned(),
        ty: TypeRef::INTEGER,
        value: spiderscript::ConstValue::Int(42),
    }));
    let mut s = SpiderScript::parse_buffer(
        variant,
        "Integer f() { return ANSWER; }",
        "test.ss",
    )
    .unwrap();
    assert_eq!(s.call("f", &[]).unwrap(), ScriptValue::Int(42));
}

fn counter_bump(ctx: &mut HostCall<'_>, args: &[Value]) -> Result<Value, RuntimeError> {
    let Value::Ref(id) = &args[0] else {
        return Err(RuntimeError::new(ExcKind::Type, "bump needs an object"));
    };
    match ctx.heap.get_mut(*id) {
        spiderscript::heap::HeapData::Object { attrs, .. } => {
            let next = match attrs[0] {
                Value::Int(v) => v + 1,
                _ => 0,
            };
            attrs[0] = Value::Int(next);
            Ok(Value::Int(next))
        }
        _ => Err(RuntimeError::new(ExcKind::Type, "bump needs an object")),
    }
}

#[test]
fn native_class_attribute_and_method() {
    let variant = Arc::new(Variant::new("host").with_class(NativeClass {
        name: "Counter".to_owned(),
        constructor: None,
        destructor: None,
        attributes: vec![NativeAttr {
            name: "count".to_owned(),
            ty: TypeRef::INTEGER,
            read_only: false,
        }],
        methods: vec![NativeFunction::new("bump", int_proto(0), counter_bump)],
    }));
    let mut s = SpiderScript::parse_buffer(
        variant,
        "Integer f() { Counter c = new Counter(); c.bump(); c.bump(); return c.count; }",
        "test.ss",
    )
    .unwrap();
    assert_eq!(s.call("f", &[]).unwrap(), ScriptValue::Int(2));
    assert_eq!(s.live_heap_values(), 0);
}

#[test]
fn read_only_native_attribute_rejects_writes() {
    let variant = Arc::new(Variant::new("host").with_class(NativeClass {
        name: "Fixed".to_owned(),
        constructor: None,
        destructor: None,
        attributes: vec![NativeAttr {
            name: "value".to_owned(),
            ty: TypeRef::INTEGER,
            read_only: true,
        }],
        methods: vec![],
    }));
    let result = SpiderScript::parse_buffer(
        variant,
        "Integer f() { Fixed x = new Fixed(); x.value = 3; return 0; }",
        "test.ss",
    )
    .unwrap()
    .call("f", &[]);
    match result {
        Err(ScriptError::Compile(e)) => assert!(e.message.contains("read-only"), "message: {}", e.message),
        other => panic!("expected a compile error, got {other:?}"),
    }
}
