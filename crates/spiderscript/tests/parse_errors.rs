//! Syntax error reporting and recovery at the top-level item boundary.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use spiderscript::parser::{parse_source, NoIncludes};
use spiderscript::types::TypeTable;
use spiderscript::{ScriptError, ScriptValue, SpiderScript, Variant};

#[test]
fn errors_carry_file_and_line() {
    let mut types = TypeTable::new();
    let (_, errors) = parse_source(
        "Integer f() { return 1; }\nInteger g() { if }",
        "sample.ss",
        &mut types,
        &NoIncludes,
    );
    assert_eq!(errors.len(), 1);
    let error = &errors[0];
    assert_eq!(error.file, "sample.ss");
    assert_eq!(error.line, 2);
    let message = error.to_string();
    assert!(message.contains("sample.ss:2"), "message: {message}");
}

#[test]
fn failing_item_is_dropped_but_later_items_survive() {
    let mut types = TypeTable::new();
    let (script, errors) = parse_source(
        "Integer broken( { return 1; }\nInteger ok() { return 2; }\nclass Fine { Integer x; }",
        "test.ss",
        &mut types,
        &NoIncludes,
    );
    assert_eq!(errors.len(), 1, "errors: {errors:?}");
    assert_eq!(script.functions.len(), 1);
    assert_eq!(script.functions[0].name, "ok");
    assert_eq!(script.classes.len(), 1);
    assert_eq!(script.classes[0].name, "Fine");
}

#[test]
fn every_failing_item_reports_its_own_error() {
    let mut types = TypeTable::new();
    let (script, errors) = parse_source(
        "Integer a( { return 1; }\nInteger b() { if }\nInteger c() { return 3; }",
        "test.ss",
        &mut types,
        &NoIncludes,
    );
    assert_eq!(errors.len(), 2, "errors: {errors:?}");
    assert_eq!(script.functions.len(), 1);
    assert_eq!(script.functions[0].name, "c");
}

#[test]
fn unknown_type_is_a_syntax_error() {
    let mut types = TypeTable::new();
    let (_, errors) = parse_source("Fnord f() { return; }", "test.ss", &mut types, &NoIncludes);
    assert_eq!(errors.len(), 1);
    assert!(errors[0].message.contains("unknown type 'Fnord'"));
}

#[test]
fn unterminated_string_aborts_the_parse() {
    let mut types = TypeTable::new();
    let (_, errors) = parse_source(
        "String f() { return \"never closed; }",
        "test.ss",
        &mut types,
        &NoIncludes,
    );
    assert!(!errors.is_empty());
    assert!(errors[0].message.contains("unterminated"));
}

#[test]
fn messages_name_the_expected_token() {
    let mut types = TypeTable::new();
    let (_, errors) = parse_source("Integer f() { return 1 }", "test.ss", &mut types, &NoIncludes);
    assert_eq!(errors.len(), 1);
    let message = &errors[0].message;
    assert!(message.contains("expected"), "message: {message}");
    assert!(message.contains(';'), "message: {message}");
}

static SINK_HITS: AtomicUsize = AtomicUsize::new(0);

fn counting_sink(_message: &str) {
    SINK_HITS.fetch_add(1, Ordering::SeqCst);
}

#[test]
fn parse_errors_reach_the_variant_error_sink() {
    let variant = Arc::new(Variant::new("test").with_error_sink(counting_sink));
    let before = SINK_HITS.load(Ordering::SeqCst);
    let result = SpiderScript::parse_buffer(variant, "Integer broken(", "test.ss");
    assert!(matches!(result, Err(ScriptError::Syntax(_))));
    assert!(SINK_HITS.load(Ordering::SeqCst) > before);
}

#[test]
fn compile_error_in_one_function_leaves_others_callable() {
    // `g` fails the type check; `f` still compiles and runs. The first call
    // surfaces the compile error, later calls reach the surviving function.
    let variant = Arc::new(Variant::new("test"));
    let mut script = SpiderScript::parse_buffer(
        variant,
        "Integer g() { return \"wrong\"; }\nInteger f() { return 2; }",
        "test.ss",
    )
    .unwrap();
    let first = script.call("f", &[]);
    assert!(matches!(first, Err(ScriptError::Compile(_))), "got {first:?}");
    assert_eq!(script.call("f", &[]).unwrap(), ScriptValue::Int(2));
    assert!(script.call("g", &[]).is_err());
}
