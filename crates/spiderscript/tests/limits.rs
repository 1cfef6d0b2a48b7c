//! Tests for the per-function resource limits: 64 registers, 32 global
//! slots, and the include nesting depth of 5.

use std::collections::HashMap;
use std::fmt::Write;
use std::sync::Arc;

use spiderscript::{IncludeLoader, ScriptError, ScriptValue, SpiderScript, Variant};

/// Generates a function with `count` local variables, returning the last.
fn generate_many_locals(count: usize) -> String {
    let mut code = String::from("Integer f() {\n");
    for i in 0..count {
        writeln!(code, "    Integer v{i} = {i};").unwrap();
    }
    writeln!(code, "    return v{};", count - 1).unwrap();
    code.push('}');
    code
}

/// Generates `count` globals plus a function reading every one of them.
fn generate_many_globals(count: usize) -> String {
    let mut code = String::new();
    for i in 0..count {
        writeln!(code, "Integer g{i} = {i};").unwrap();
    }
    code.push_str("Integer f() {\n    Integer s = 0;\n");
    for i in 0..count {
        writeln!(code, "    s += g{i};").unwrap();
    }
    code.push_str("    return s;\n}");
    code
}

fn compile(source: &str) -> Result<ScriptValue, ScriptError> {
    let mut script = SpiderScript::parse_buffer(Arc::new(Variant::new("test")), source, "test.ss")?;
    script.call("f", &[])
}

fn assert_compile_error(result: Result<ScriptValue, ScriptError>, expected: &str) {
    match result {
        Err(ScriptError::Compile(e)) => {
            assert!(
                e.message.contains(expected),
                "expected message containing '{expected}', got: {}",
                e.message
            );
        }
        other => panic!("expected a compile error, got {other:?}"),
    }
}

mod register_limits {
    use super::*;

    #[test]
    fn exactly_64_registers_compiles_and_runs() {
        let result = compile(&generate_many_locals(64));
        assert_eq!(result.unwrap(), ScriptValue::Int(63));
    }

    #[test]
    fn needing_65_registers_is_a_compile_error() {
        assert_compile_error(compile(&generate_many_locals(65)), "64 registers");
    }

    #[test]
    fn scratch_registers_are_recycled() {
        // Hundreds of sequential statements reuse the same scratch registers.
        let mut code = String::from("Integer f() {\n    Integer s = 0;\n");
        for i in 0..200 {
            writeln!(code, "    s = s + {i};").unwrap();
        }
        code.push_str("    return s;\n}");
        let expected: i64 = (0..200).sum();
        assert_eq!(compile(&code).unwrap(), ScriptValue::Int(expected));
    }
}

mod global_limits {
    use super::*;

    #[test]
    fn exactly_32_global_slots_compile() {
        let result = compile(&generate_many_globals(32));
        let expected: i64 = (0..32).sum();
        assert_eq!(result.unwrap(), ScriptValue::Int(expected));
    }

    #[test]
    fn a_33rd_global_slot_is_a_compile_error() {
        assert_compile_error(compile(&generate_many_globals(33)), "32 globals");
    }
}

mod include_limits {
    use super::*;

    struct MapLoader(HashMap<String, String>);

    impl IncludeLoader for MapLoader {
        fn load(&self, path: &str) -> Option<String> {
            self.0.get(path).cloned()
        }
    }

    /// Builds a chain d1 → d2 → … where the last file defines `deep()`.
    fn chain(len: usize) -> MapLoader {
        let mut sources = HashMap::new();
        for i in 1..=len {
            let body = if i < len {
                format!("@include \"d{}\"\n", i + 1)
            } else {
                "Integer deep() { return 6; }".to_owned()
            };
            sources.insert(format!("d{i}"), body);
        }
        MapLoader(sources)
    }

    #[test]
    fn five_nested_includes_succeed() {
        let loader = chain(5);
        let variant = Arc::new(Variant::new("test"));
        let mut script =
            SpiderScript::parse_with_includes(variant, "@include \"d1\"", "test.ss", &loader).unwrap();
        assert_eq!(script.call("deep", &[]).unwrap(), ScriptValue::Int(6));
    }

    #[test]
    fn six_nested_includes_fail() {
        let loader = chain(6);
        let variant = Arc::new(Variant::new("test"));
        let result = SpiderScript::parse_with_includes(variant, "@include \"d1\"", "test.ss", &loader);
        match result {
            Err(ScriptError::Syntax(e)) => {
                assert!(e.message.contains("include depth"), "message: {}", e.message);
            }
            other => panic!("expected a syntax error, got {other:?}"),
        }
    }

    #[test]
    fn missing_include_is_reported() {
        let variant = Arc::new(Variant::new("test"));
        let result = SpiderScript::parse_buffer(variant, "@include \"nowhere\"", "test.ss");
        match result {
            Err(ScriptError::Syntax(e)) => {
                assert!(e.message.contains("nowhere"), "message: {}", e.message);
            }
            other => panic!("expected a syntax error, got {other:?}"),
        }
    }
}
