//! Shared test utilities
//!
//! Programs are built with `kestrel_runtime::ast::build` and run through a
//! fresh [`Runtime`] unless a test needs state across units.

#![allow(dead_code)]

use kestrel_runtime::ast::build::program;
use kestrel_runtime::ast::Stmt;
use kestrel_runtime::{Error, Runtime, RuntimeError, Value};

/// Run statements as one unit and return the last expression value
pub fn eval(statements: Vec<Stmt>) -> Value {
    let mut runtime = Runtime::new();
    match runtime.run(&program(statements)) {
        Ok(value) => value,
        Err(err) => panic!("Expected success, got error: {}", err),
    }
}

/// Run statements and return the rendered result
pub fn eval_display(statements: Vec<Stmt>) -> String {
    eval(statements).to_display_string()
}

/// Run statements expecting failure
pub fn eval_err(statements: Vec<Stmt>) -> Error {
    let mut runtime = Runtime::new();
    match runtime.run(&program(statements)) {
        Ok(value) => panic!("Expected error, got success: {:?}", value),
        Err(err) => err,
    }
}

/// Run statements expecting a runtime (not compile) failure
pub fn eval_runtime_err(statements: Vec<Stmt>) -> RuntimeError {
    match eval_err(statements) {
        Error::Runtime(err) => err,
        other => panic!("Expected runtime error, got: {}", other),
    }
}

/// Assert that statements fail with a specific diagnostic code
pub fn assert_error_code(statements: Vec<Stmt>, expected_code: &str) {
    let err = eval_err(statements);
    let diag = err
        .to_diagnostic()
        .unwrap_or_else(|| panic!("Expected a diagnostic for: {}", err));
    assert_eq!(
        diag.code, expected_code,
        "Expected error code {}, got {} ({})",
        expected_code, diag.code, diag.message
    );
}

/// Message of an Error value
pub fn error_message(value: &Value) -> String {
    match value {
        Value::Error(err) => err.message.clone(),
        other => panic!("Expected error value, got {:?}", other),
    }
}
