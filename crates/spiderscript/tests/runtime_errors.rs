//! Runtime error behavior: wrap-around arithmetic, raised exceptions, and
//! reference-count conservation across failures.

use std::sync::Arc;

use spiderscript::{
    ExcKind, NativeFunction, Prototype, RuntimeError, ScriptError, ScriptValue, SpiderScript,
    TypeRef, Value, Variant,
};

fn script(source: &str) -> SpiderScript {
    SpiderScript::parse_buffer(Arc::new(Variant::new("test")), source, "test.ss")
        .expect("source should parse")
}

fn expect_runtime_error(source: &str, func: &str, args: &[ScriptValue]) -> (RuntimeError, SpiderScript) {
    let mut s = script(source);
    let err = s.call(func, args).expect_err("call should fail");
    let ScriptError::Runtime(e) = err else {
        panic!("expected a runtime error, got {err}");
    };
    (e, s)
}

#[test]
fn integer_overflow_wraps() {
    let source = "Integer f(Integer x) { return x + 1; }";
    assert_eq!(
        script(source).call("f", &[ScriptValue::Int(i64::MAX)]).unwrap(),
        ScriptValue::Int(i64::MIN)
    );
}

#[test]
fn integer_underflow_wraps() {
    let source = "Integer f(Integer x) { return x - 1; }";
    assert_eq!(
        script(source).call("f", &[ScriptValue::Int(i64::MIN)]).unwrap(),
        ScriptValue::Int(i64::MAX)
    );
}

#[test]
fn shift_count_masks_to_word_size() {
    let source = "Integer f(Integer x, Integer n) { return x << n; }";
    assert_eq!(
        script(source)
            .call("f", &[ScriptValue::Int(1), ScriptValue::Int(65)])
            .unwrap(),
        ScriptValue::Int(2)
    );
}

#[test]
fn rotate_left_with_negative_count_masks() {
    // -1 & 63 == 63: rotating by 63 moves the low bit to bit 63's right,
    // i.e. 2 rotl 63 == 1.
    let source = "Integer f(Integer x, Integer n) { return x <<< n; }";
    assert_eq!(
        script(source)
            .call("f", &[ScriptValue::Int(2), ScriptValue::Int(-1)])
            .unwrap(),
        ScriptValue::Int(1)
    );
}

#[test]
fn divide_by_zero_raises() {
    let (e, s) = expect_runtime_error("Integer f() { return 1 / 0; }", "f", &[]);
    assert_eq!(e.kind, ExcKind::Arithmetic);
    assert!(e.message.contains("divide"));
    assert_eq!(s.live_heap_values(), 0);
}

#[test]
fn modulo_by_zero_raises() {
    let (e, _) = expect_runtime_error("Integer f(Integer x) { return x % 0; }", "f", &[ScriptValue::Int(7)]);
    assert_eq!(e.kind, ExcKind::Arithmetic);
}

#[test]
fn null_array_dereference_raises() {
    let (e, _) = expect_runtime_error(
        "Integer f() { Integer[] a = null; return a[0]; }",
        "f",
        &[],
    );
    assert_eq!(e.kind, ExcKind::NullDereference);
}

#[test]
fn null_object_method_call_raises() {
    let source = "class C { Integer go() { return 1; } } Integer f() { C c = null; return c.go(); }";
    let (e, _) = expect_runtime_error(source, "f", &[]);
    assert_eq!(e.kind, ExcKind::NullDereference);
}

#[test]
fn index_out_of_bounds_raises() {
    let (e, _) = expect_runtime_error(
        "Integer f(Integer i) { Integer[] a = new Integer[3]; return a[i]; }",
        "f",
        &[ScriptValue::Int(3)],
    );
    assert_eq!(e.kind, ExcKind::Index);
    assert!(e.message.contains("out of bounds"));
}

#[test]
fn negative_array_length_raises() {
    let (e, _) = expect_runtime_error(
        "Integer f(Integer n) { Integer[] a = new Integer[n]; return 0; }",
        "f",
        &[ScriptValue::Int(-1)],
    );
    assert_eq!(e.kind, ExcKind::Argument);
}

#[test]
fn unbounded_recursion_raises() {
    let (e, s) = expect_runtime_error("Integer f() { return f(); }", "f", &[]);
    assert_eq!(e.kind, ExcKind::Recursion);
    assert_eq!(s.live_heap_values(), 0);
}

/// Conservation (I1): a frame that raises mid-way releases everything it
/// allocated on the way.
#[test]
fn exception_unwinding_releases_allocations() {
    let source = "Integer f() { String a = \"alloc one\"; Integer[] b = new Integer[16]; String c = a + a; return 1 / 0; }";
    let (e, s) = expect_runtime_error(source, "f", &[]);
    assert_eq!(e.kind, ExcKind::Arithmetic);
    assert_eq!(s.live_heap_values(), 0);
}

/// Conservation (I1) across successful calls: live heap values before and
/// after a top-level call match.
#[test]
fn successful_calls_conserve_heap_counts() {
    let source = "String f(Integer n) { String s = \"\"; for (Integer i = 0; i < n; i++) s = s + \"x\"; return s; }";
    let mut s = script(source);
    let baseline = s.live_heap_values();
    let result = s.call("f", &[ScriptValue::Int(8)]).unwrap();
    assert_eq!(result, ScriptValue::Str("xxxxxxxx".to_owned()));
    assert_eq!(s.live_heap_values(), baseline);
}

#[test]
fn globals_keep_references_until_the_script_drops() {
    let source = "String last = null; void remember(String s) { last = s; }";
    let mut s = script(source);
    s.call("remember", &[ScriptValue::Str("kept".to_owned())]).unwrap();
    // The global still owns the string.
    assert_eq!(s.live_heap_values(), 1);
    assert_eq!(s.get_global("last"), Some(ScriptValue::Str("kept".to_owned())));
    s.call("remember", &[ScriptValue::Null]).unwrap();
    assert_eq!(s.live_heap_values(), 0);
}

fn failing_native(_ctx: &mut spiderscript::HostCall<'_>, _args: &[Value]) -> Result<Value, RuntimeError> {
    Err(RuntimeError::new(ExcKind::Native, "device unavailable"))
}

#[test]
fn failing_native_call_becomes_the_pending_exception() {
    let variant = Arc::new(Variant::new("host").with_function(NativeFunction::new(
        "probe",
        Prototype {
            ret: TypeRef::INTEGER,
            args: vec![],
            variadic: false,
        },
        failing_native,
    )));
    let mut s = SpiderScript::parse_buffer(
        variant,
        "Integer f() { String held = \"unwind me\"; return probe(); }",
        "test.ss",
    )
    .unwrap();
    let err = s.call("f", &[]).expect_err("native failure must propagate");
    let ScriptError::Runtime(e) = err else {
        panic!("expected a runtime error, got {err}");
    };
    assert_eq!(e.kind, ExcKind::Native);
    assert!(e.message.contains("device unavailable"));
    assert_eq!(s.last_exception(), Some(&e));
    assert_eq!(s.live_heap_values(), 0);
}

#[test]
fn boundary_type_mismatch_is_a_type_error() {
    let source = "Integer f(Integer n) { return n; }";
    let mut s = script(source);
    let err = s
        .call("f", &[ScriptValue::Str("not an int".to_owned())])
        .expect_err("mismatched argument must fail");
    let ScriptError::Runtime(e) = err else {
        panic!("expected a runtime error, got {err}");
    };
    assert_eq!(e.kind, ExcKind::Type);
}

#[test]
fn wrong_argument_count_is_an_argument_error() {
    let source = "Integer f(Integer n) { return n; }";
    let mut s = script(source);
    let err = s.call("f", &[]).expect_err("missing argument must fail");
    let ScriptError::Runtime(e) = err else {
        panic!("expected a runtime error, got {err}");
    };
    assert_eq!(e.kind, ExcKind::Argument);
}
