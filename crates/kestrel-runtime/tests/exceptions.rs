//! exceptions.rs: throw, try/catch/finally and error values

mod common;

use common::*;
use kestrel_runtime::ast::build::*;
use kestrel_runtime::ast::Stmt;
use kestrel_runtime::{Error, Runtime, RuntimeError, Value};
use pretty_assertions::assert_eq;

fn bump(name: &str, by: i64) -> Stmt {
    expr(assign(name, infix("+", id(name), int(by))))
}

// ============================================================================
// Ordering of try, catch and finally
// ============================================================================

#[test]
fn test_catch_then_finally() {
    let result = eval(vec![
        let_("x", int(0)),
        try_(
            vec![bump("x", 1), throw(string("e")), bump("x", 1000)],
            Some((Some("e"), vec![bump("x", 10)])),
            Some(vec![bump("x", 100)]),
        ),
        expr(id("x")),
    ]);
    assert_eq!(result, Value::Integer(111));
}

#[test]
fn test_finally_runs_without_throw() {
    let result = eval(vec![
        let_("x", int(0)),
        try_(
            vec![bump("x", 1)],
            Some((Some("e"), vec![bump("x", 10)])),
            Some(vec![bump("x", 100)]),
        ),
        expr(id("x")),
    ]);
    assert_eq!(result, Value::Integer(101));
}

#[test]
fn test_catch_binds_thrown_value() {
    let result = eval(vec![
        let_("seen", null()),
        try_(
            vec![throw(array(vec![int(1), int(2)]))],
            Some((Some("e"), vec![expr(assign("seen", id("e")))])),
            None,
        ),
        expr(id("seen")),
    ]);
    assert_eq!(result.to_display_string(), "[1, 2]");
}

#[test]
fn test_catch_without_binding() {
    let result = eval(vec![
        let_("caught", boolean(false)),
        try_(
            vec![throw(int(1))],
            Some((None, vec![expr(assign("caught", boolean(true)))])),
            None,
        ),
        expr(id("caught")),
    ]);
    assert_eq!(result, Value::Boolean(true));
}

#[test]
fn test_finally_without_catch_rethrows() {
    let mut runtime = Runtime::new();
    let err = runtime
        .run(&program(vec![
            let_("x", int(0)),
            try_(vec![throw(string("boom"))], None, Some(vec![bump("x", 5)])),
            bump("x", 1000),
        ]))
        .unwrap_err();
    match err {
        Error::Runtime(RuntimeError::UncaughtThrow { value, .. }) => {
            assert_eq!(value, Value::string("boom"));
        }
        other => panic!("Expected UncaughtThrow, got {}", other),
    }
    // finally ran, the statement after the try did not
    assert_eq!(runtime.get_global("x"), Some(Value::Integer(5)));
}

#[test]
fn test_throw_from_catch_still_runs_finally() {
    let mut runtime = Runtime::new();
    let err = runtime
        .run(&program(vec![
            let_("x", int(0)),
            try_(
                vec![throw(string("first"))],
                Some((Some("e"), vec![throw(string("second"))])),
                Some(vec![bump("x", 7)]),
            ),
        ]))
        .unwrap_err();
    assert_eq!(err.to_string(), "Uncaught exception: second");
    assert_eq!(runtime.get_global("x"), Some(Value::Integer(7)));
}

#[test]
fn test_nested_try_rethrow_to_outer() {
    let result = eval(vec![
        let_("log", array(vec![])),
        try_(
            vec![try_(
                vec![throw(string("inner"))],
                Some((
                    Some("e"),
                    vec![
                        expr(call(id("push"), vec![id("log"), string("inner catch")])),
                        throw(id("e")),
                    ],
                )),
                Some(vec![expr(call(id("push"), vec![id("log"), string("inner finally")]))]),
            )],
            Some((
                Some("outer"),
                vec![expr(call(id("push"), vec![id("log"), id("outer")]))],
            )),
            None,
        ),
        expr(id("log")),
    ]);
    assert_eq!(
        result.to_display_string(),
        r#"["inner catch", "inner finally", "inner"]"#
    );
}

// ============================================================================
// Leaving a protected region early still runs finally
// ============================================================================

#[test]
fn test_return_runs_finally() {
    let result = eval(vec![
        let_("log", int(0)),
        let_(
            "f",
            func(&[], vec![try_(vec![ret(int(1))], None, Some(vec![bump("log", 10)]))]),
        ),
        expr(array(vec![call(id("f"), vec![]), id("log")])),
    ]);
    assert_eq!(result.to_display_string(), "[1, 10]");
}

#[test]
fn test_return_value_computed_before_finally() {
    let result = eval(vec![
        let_("x", int(1)),
        let_(
            "f",
            func(
                &[],
                vec![try_(
                    vec![ret(id("x"))],
                    Some((None, vec![])),
                    Some(vec![expr(assign("x", int(5)))]),
                )],
            ),
        ),
        expr(array(vec![call(id("f"), vec![]), id("x")])),
    ]);
    assert_eq!(result.to_display_string(), "[1, 5]");
}

#[test]
fn test_return_from_catch_runs_finally() {
    let result = eval(vec![
        let_("log", int(0)),
        let_(
            "f",
            func(
                &[],
                vec![try_(
                    vec![throw(string("x"))],
                    Some((Some("e"), vec![ret(id("e"))])),
                    Some(vec![bump("log", 1)]),
                )],
            ),
        ),
        expr(array(vec![call(id("f"), vec![]), id("log")])),
    ]);
    assert_eq!(result.to_display_string(), r#"["x", 1]"#);
}

#[test]
fn test_nested_finally_blocks_run_inner_first() {
    let result = eval(vec![
        let_("trail", string("")),
        let_(
            "f",
            func(
                &[],
                vec![try_(
                    vec![try_(
                        vec![ret(int(0))],
                        None,
                        Some(vec![expr(assign("trail", infix("+", id("trail"), string("i"))))]),
                    )],
                    None,
                    Some(vec![expr(assign("trail", infix("+", id("trail"), string("o"))))]),
                )],
            ),
        ),
        expr(call(id("f"), vec![])),
        expr(id("trail")),
    ]);
    assert_eq!(result, Value::string("io"));
}

#[test]
fn test_return_in_finally_replaces_result() {
    let result = eval(vec![
        let_(
            "f",
            func(&[], vec![try_(vec![ret(int(1))], None, Some(vec![ret(int(2))]))]),
        ),
        expr(call(id("f"), vec![])),
    ]);
    assert_eq!(result, Value::Integer(2));
}

#[test]
fn test_break_runs_finally() {
    let result = eval(vec![
        let_("i", int(0)),
        let_("count", int(0)),
        while_(
            infix("<", id("i"), int(5)),
            vec![
                bump("i", 1),
                try_(vec![break_()], None, Some(vec![bump("count", 1)])),
            ],
        ),
        expr(array(vec![id("i"), id("count")])),
    ]);
    assert_eq!(result.to_display_string(), "[1, 1]");
}

#[test]
fn test_continue_runs_finally() {
    let result = eval(vec![
        let_("runs", int(0)),
        let_("body", int(0)),
        for_(
            Some(let_("i", int(0))),
            Some(infix("<", id("i"), int(3))),
            Some(assign("i", infix("+", id("i"), int(1)))),
            vec![try_(
                vec![continue_(), bump("body", 1)],
                Some((None, vec![])),
                Some(vec![bump("runs", 1)]),
            )],
        ),
        expr(array(vec![id("runs"), id("body")])),
    ]);
    assert_eq!(result.to_display_string(), "[3, 0]");
}

#[test]
fn test_break_leaves_handler_stack_balanced() {
    // A throw after the loop must not land in the abandoned region's catch
    let result = eval(vec![
        let_("where", string("")),
        let_("go", boolean(true)),
        while_(
            id("go"),
            vec![try_(
                vec![break_()],
                Some((None, vec![expr(assign("where", string("inner")))])),
                Some(vec![]),
            )],
        ),
        try_(
            vec![throw(int(1))],
            Some((None, vec![expr(assign("where", string("outer")))])),
            None,
        ),
        expr(id("where")),
    ]);
    assert_eq!(result, Value::string("outer"));
}

// ============================================================================
// Unwinding across call frames
// ============================================================================

#[test]
fn test_throw_unwinds_nested_calls() {
    let result = eval(vec![
        let_("deepest", func(&[], vec![throw(string("deep"))])),
        let_(
            "middle",
            func(&[], vec![expr(call(id("deepest"), vec![])), ret(int(1))]),
        ),
        let_("caught", null()),
        try_(
            vec![expr(call(id("middle"), vec![]))],
            Some((Some("e"), vec![expr(assign("caught", id("e")))])),
            None,
        ),
        expr(id("caught")),
    ]);
    assert_eq!(result, Value::string("deep"));
}

#[test]
fn test_handler_inside_function() {
    let result = eval(vec![
        let_(
            "safe_div",
            func(
                &["a", "b"],
                vec![
                    let_("out", int(-1)),
                    try_(
                        vec![expr(assign("out", infix("/", id("a"), id("b"))))],
                        Some((None, vec![])),
                        None,
                    ),
                    ret(id("out")),
                ],
            ),
        ),
        expr(array(vec![
            call(id("safe_div"), vec![int(9), int(3)]),
            call(id("safe_div"), vec![int(1), int(0)]),
        ])),
    ]);
    assert_eq!(result.to_display_string(), "[3, -1]");
}

// ============================================================================
// Runtime and native errors become catchable values
// ============================================================================

#[test]
fn test_catch_runtime_type_error() {
    let result = eval(vec![
        let_("s", string("a")),
        let_("caught", null()),
        try_(
            vec![expr(infix("+", int(1), id("s")))],
            Some((Some("e"), vec![expr(assign("caught", id("e")))])),
            None,
        ),
        expr(id("caught")),
    ]);
    assert_eq!(
        error_message(&result),
        "Type error: Invalid operands for +: integer and string"
    );
}

#[test]
fn test_catch_native_error() {
    let result = eval(vec![
        let_("caught", null()),
        try_(
            vec![expr(call(id("len"), vec![int(5)]))],
            Some((Some("e"), vec![expr(assign("caught", id("e")))])),
            None,
        ),
        expr(id("caught")),
    ]);
    assert_eq!(error_message(&result), "len() not supported for integer");
}

#[test]
fn test_error_builtin_raises() {
    let result = eval(vec![
        let_("caught", null()),
        try_(
            vec![expr(call(id("error"), vec![string("custom")]))],
            Some((Some("e"), vec![expr(assign("caught", call(id("type"), vec![id("e")])))])),
            None,
        ),
        expr(id("caught")),
    ]);
    assert_eq!(result, Value::string("error"));
}

#[test]
fn test_uncaught_native_error() {
    let err = eval_runtime_err(vec![expr(call(id("push"), vec![int(1), int(2)]))]);
    match err {
        RuntimeError::UncaughtThrow { value, .. } => {
            assert_eq!(error_message(&value), "push() not supported for integer");
        }
        other => panic!("Expected UncaughtThrow, got {:?}", other),
    }
}

#[test]
fn test_fatal_errors_bypass_handlers() {
    // Unbounded recursion is not catchable
    let err = eval_runtime_err(vec![
        let_("forever", func(&[], vec![ret(call(id("forever"), vec![]))])),
        try_(
            vec![expr(call(id("forever"), vec![]))],
            Some((None, vec![])),
            None,
        ),
    ]);
    assert!(
        matches!(err, RuntimeError::FrameOverflow { .. } | RuntimeError::StackOverflow { .. }),
        "got {:?}",
        err
    );
    assert!(!err.is_catchable());
}

#[test]
fn test_misplaced_keywords() {
    assert_error_code(vec![break_()], "K1007");
    assert_error_code(vec![ret(int(1))], "K1007");
}
