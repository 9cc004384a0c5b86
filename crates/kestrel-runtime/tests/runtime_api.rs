//! runtime_api.rs: embedding API: state across units, host calls and natives

mod common;

use common::*;
use indexmap::IndexMap;
use kestrel_runtime::api::{FromValue, NativeFunctionBuilder, ToValue};
use kestrel_runtime::ast::build::*;
use kestrel_runtime::ast::VersionedProgram;
use kestrel_runtime::{Error, Runtime, RuntimeError, RuntimeSettings, Value};
use pretty_assertions::assert_eq;
use std::fs;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::TempDir;

// ============================================================================
// REPL-style state
// ============================================================================

#[test]
fn test_globals_functions_and_classes_persist() {
    let mut runtime = Runtime::new();
    runtime
        .run(&program(vec![
            let_("greeting", string("hello")),
            let_("shout", func(&["s"], vec![ret(infix("+", id("s"), string("!")))])),
            class("Box", None, vec![property("item")]),
        ]))
        .unwrap();
    let result = runtime
        .run(&program(vec![
            let_("b", call(id("Box"), vec![call(id("shout"), vec![id("greeting")])])),
            expr(member(id("b"), "item")),
        ]))
        .unwrap();
    assert_eq!(result, Value::string("hello!"));
}

#[test]
fn test_redeclaration_reuses_slot() {
    let mut runtime = Runtime::new();
    runtime.run(&program(vec![let_("v", int(1))])).unwrap();
    runtime.run(&program(vec![let_("v", string("two"))])).unwrap();
    assert_eq!(runtime.get_global("v"), Some(Value::string("two")));
}

#[test]
fn test_unit_without_expression_yields_null() {
    let mut runtime = Runtime::new();
    assert_eq!(runtime.run(&program(vec![])).unwrap(), Value::Null);
}

#[test]
fn test_runtime_error_keeps_earlier_writes() {
    let mut runtime = Runtime::new();
    let err = runtime
        .run(&program(vec![
            let_("progress", int(1)),
            expr(assign("progress", int(2))),
            throw(string("stop")),
            expr(assign("progress", int(3))),
        ]))
        .unwrap_err();
    assert!(matches!(err, Error::Runtime(RuntimeError::UncaughtThrow { .. })));
    assert_eq!(runtime.get_global("progress"), Some(Value::Integer(2)));
}

// ============================================================================
// Host calls into scripts
// ============================================================================

#[test]
fn test_call_with_values() {
    let mut runtime = Runtime::new();
    runtime
        .run(&program(vec![let_(
            "describe",
            func(&["name", "n"], vec![ret(infix("+", id("name"), call(id("str"), vec![id("n")])))]),
        )]))
        .unwrap();
    let result = runtime
        .call("describe", vec![Value::string("item-"), Value::Integer(7)])
        .unwrap();
    assert_eq!(result, Value::string("item-7"));
}

#[test]
fn test_call_builtin_by_name() {
    let mut runtime = Runtime::new();
    let n: i64 = runtime.call_typed("len", [vec![1i64, 2, 3]]).unwrap();
    assert_eq!(n, 3);
}

#[test]
fn test_call_typed_conversion_failure() {
    let mut runtime = Runtime::new();
    runtime
        .run(&program(vec![let_("name", func(&[], vec![ret(string("kestrel"))]))]))
        .unwrap();
    let result: Result<i64, _> = runtime.call_typed("name", Vec::<Value>::new());
    match result {
        Err(Error::Runtime(RuntimeError::TypeError { msg, .. })) => {
            assert_eq!(msg, "Type mismatch: expected integer, found string");
        }
        other => panic!("Expected conversion failure, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn test_call_script_error_propagates() {
    let mut runtime = Runtime::new();
    runtime
        .run(&program(vec![let_("fail", func(&[], vec![throw(string("bad"))]))]))
        .unwrap();
    let err = runtime.call("fail", vec![]).unwrap_err();
    assert_eq!(err.to_string(), "Uncaught exception: bad");
    // The runtime stays usable
    assert_eq!(
        runtime.run(&program(vec![expr(int(1))])).unwrap(),
        Value::Integer(1)
    );
}

#[test]
fn test_call_non_function_global() {
    let mut runtime = Runtime::new();
    runtime.run(&program(vec![let_("n", int(1))])).unwrap();
    assert!(matches!(runtime.call("n", vec![]), Err(Error::UnknownFunction(_))));
}

#[test]
fn test_call_method_closure_state() {
    let mut runtime = Runtime::new();
    runtime
        .run(&program(vec![
            let_("total", int(0)),
            let_("add", func(&["n"], vec![expr(assign("total", infix("+", id("total"), id("n"))))])),
        ]))
        .unwrap();
    for n in 1..=4 {
        runtime.call("add", vec![Value::Integer(n)]).unwrap();
    }
    assert_eq!(runtime.get_global("total"), Some(Value::Integer(10)));
}

// ============================================================================
// Native functions
// ============================================================================

#[test]
fn test_variadic_native() {
    let mut runtime = Runtime::new();
    runtime
        .register_variadic("sum", |args| {
            let mut total = 0;
            for arg in args {
                match i64::from_value(arg) {
                    Ok(n) => total += n,
                    Err(err) => return Value::error(err.to_string(), None),
                }
            }
            total.to_value()
        })
        .unwrap();
    assert_eq!(
        runtime
            .run(&program(vec![expr(call(id("sum"), vec![int(1), int(2), int(3)]))]))
            .unwrap(),
        Value::Integer(6)
    );
    let err = runtime
        .run(&program(vec![expr(call(id("sum"), vec![int(1), string("x")]))]))
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "Uncaught exception: error: Type mismatch: expected integer, found string"
    );
}

#[test]
fn test_native_with_captured_state() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let mut runtime = Runtime::new();
    runtime
        .register(
            NativeFunctionBuilder::new("tick")
                .with_arity(0)
                .with_implementation(move |_| {
                    Value::Integer(counter.fetch_add(1, Ordering::SeqCst) as i64 + 1)
                })
                .build()
                .unwrap(),
        )
        .unwrap();
    let result = runtime
        .run(&program(vec![
            expr(call(id("tick"), vec![])),
            expr(call(id("tick"), vec![])),
        ]))
        .unwrap();
    assert_eq!(result, Value::Integer(2));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[test]
fn test_native_receives_map() {
    let mut runtime = Runtime::new();
    runtime
        .register_function("count_keys", 1, |args| {
            match IndexMap::<String, Value>::from_value(&args[0]) {
                Ok(map) => (map.len() as i64).to_value(),
                Err(err) => Value::error(err.to_string(), None),
            }
        })
        .unwrap();
    let result = runtime
        .run(&program(vec![expr(call(
            id("count_keys"),
            vec![ordered(vec![
                (Some(string("a")), int(1)),
                (Some(string("b")), int(2)),
            ])],
        ))]))
        .unwrap();
    assert_eq!(result, Value::Integer(2));
}

#[test]
fn test_native_called_from_spawned_task() {
    let mut runtime = Runtime::new();
    runtime
        .register_function("square", 1, |args| match &args[0] {
            Value::Integer(n) => Value::Integer(n * n),
            other => Value::error(format!("square: {}", other.type_name()), None),
        })
        .unwrap();
    let result = runtime
        .run(&program(vec![expr(recv(spawn(id("square"), vec![int(12)])))]))
        .unwrap();
    assert_eq!(result, Value::Integer(144));
}

// ============================================================================
// JSON payloads and configuration
// ============================================================================

#[test]
fn test_run_json_shares_state_with_run() {
    let mut runtime = Runtime::new();
    runtime.run(&program(vec![let_("base", int(40))])).unwrap();
    let json = VersionedProgram::new(program(vec![expr(infix("+", id("base"), int(2)))]))
        .to_json()
        .unwrap();
    assert_eq!(runtime.run_json(&json).unwrap(), Value::Integer(42));
}

#[test]
fn test_small_stack_from_settings() {
    let mut runtime = Runtime::with_settings(RuntimeSettings {
        stack_size: 8,
        ..RuntimeSettings::default()
    });
    let err = runtime
        .run(&program(vec![expr(array((0..16).map(int).collect()))]))
        .unwrap_err();
    assert!(matches!(err, Error::Runtime(RuntimeError::StackOverflow { .. })));
}

#[test]
fn test_config_file_drives_settings() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("kestrel.toml"),
        "[vm]\nmax_frames = 8\n",
    )
    .unwrap();
    let nested = dir.path().join("scripts");
    fs::create_dir(&nested).unwrap();

    let mut runtime = Runtime::from_config(&nested).unwrap();
    assert_eq!(runtime.settings().max_frames, 8);
    let err = runtime
        .run(&program(vec![
            let_("deep", func(&["n"], vec![ret(call(id("deep"), vec![id("n")]))])),
            expr(call(id("deep"), vec![int(0)])),
        ]))
        .unwrap_err();
    assert!(matches!(err, Error::Runtime(RuntimeError::FrameOverflow { limit: 8, .. })));
}

#[test]
fn test_missing_config_uses_defaults() {
    let dir = TempDir::new().unwrap();
    let runtime = Runtime::from_config(dir.path()).unwrap();
    assert_eq!(runtime.settings(), RuntimeSettings::default());
}
