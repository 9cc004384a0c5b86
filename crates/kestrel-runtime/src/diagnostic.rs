//! Diagnostics for hosts that render errors
//!
//! Compile and runtime errors both convert into the serializable
//! [`Diagnostic`] type with a stable error code, so a host can print them or
//! forward them as JSON without matching on the error enums.

use crate::compiler::CompileError;
use crate::span::Span;
use crate::value::RuntimeError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Diagnostic schema version
pub const DIAG_VERSION: u32 = 1;

/// Severity level of a diagnostic
///
/// Compilation and execution only ever fail, so every diagnostic is an error.
/// The level is still serialized so the JSON shape can grow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticLevel {
    Error,
}

impl fmt::Display for DiagnosticLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiagnosticLevel::Error => write!(f, "error"),
        }
    }
}

/// A diagnostic message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// Diagnostic schema version
    pub diag_version: u32,
    pub level: DiagnosticLevel,
    /// Error code (e.g., "K0001")
    pub code: String,
    pub message: String,
    /// Source name, `<unknown>` until a host sets it
    pub file: String,
    /// Line number (1-based, 0 when unknown)
    pub line: u32,
    /// Byte offset of the span start within the source
    pub offset: usize,
    /// Length of error span
    pub length: usize,
    /// Source line string
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub snippet: String,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub notes: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub help: Option<String>,
}

impl Diagnostic {
    /// Create a new error diagnostic with code
    pub fn error_with_code(code: impl Into<String>, message: impl Into<String>, span: Span) -> Self {
        Self {
            diag_version: DIAG_VERSION,
            level: DiagnosticLevel::Error,
            code: code.into(),
            message: message.into(),
            file: "<unknown>".to_string(),
            line: span.line,
            offset: span.start,
            length: span.len(),
            snippet: String::new(),
            notes: Vec::new(),
            help: None,
        }
    }

    pub fn with_file(mut self, file: impl Into<String>) -> Self {
        self.file = file.into();
        self
    }

    /// Set the snippet (source line)
    pub fn with_snippet(mut self, snippet: impl Into<String>) -> Self {
        self.snippet = snippet.into();
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }

    /// Format as human-readable string
    pub fn to_human_string(&self) -> String {
        let mut output = String::new();

        // Header: error[K0005]: Division by zero
        output.push_str(&format!("{}[{}]: {}\n", self.level, self.code, self.message));
        output.push_str(&format!("  --> {}:{}\n", self.file, self.line));

        if !self.snippet.is_empty() {
            output.push_str("   |\n");
            output.push_str(&format!("{:>2} | {}\n", self.line, self.snippet));
        }
        for note in &self.notes {
            output.push_str(&format!("   = note: {}\n", note));
        }
        if let Some(help) = &self.help {
            output.push_str(&format!("   = help: {}\n", help));
        }

        output
    }

    /// Format as JSON string
    pub fn to_json_string(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Format as compact JSON string
    pub fn to_json_compact(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]: {}", self.level, self.code, self.message)
    }
}

/// Error code registry
///
/// - K0xxx: runtime errors
/// - K1xxx: compile errors
/// - K9xxx: internal errors (corrupt bytecode)
pub mod error_codes {
    // K0xxx - Runtime errors
    pub const TYPE_ERROR: &str = "K0001";
    pub const NOT_CALLABLE: &str = "K0002";
    pub const ARITY_MISMATCH: &str = "K0003";
    pub const UNHASHABLE_TYPE: &str = "K0004";
    pub const DIVIDE_BY_ZERO: &str = "K0005";
    pub const INDEX_OUT_OF_BOUNDS: &str = "K0006";
    pub const CHANNEL_CLOSED: &str = "K0007";
    pub const UNCAUGHT_THROW: &str = "K0008";
    pub const STACK_OVERFLOW: &str = "K0010";
    pub const FRAME_OVERFLOW: &str = "K0011";

    // K1xxx - Compile errors
    pub const UNRESOLVED_IDENTIFIER: &str = "K1001";
    pub const UNKNOWN_OPERATOR: &str = "K1002";
    pub const MALFORMED_CLASS_BODY: &str = "K1003";
    pub const UNKNOWN_PARENT_CLASS: &str = "K1004";
    pub const INHERITANCE_CYCLE: &str = "K1005";
    pub const INVALID_ASSIGNMENT: &str = "K1006";
    pub const MISPLACED_KEYWORD: &str = "K1007";
    pub const LIMIT_EXCEEDED: &str = "K1010";

    // K9xxx - Internal errors
    pub const UNKNOWN_OPCODE: &str = "K9998";
    pub const INVALID_BYTECODE: &str = "K9999";
}

impl From<&CompileError> for Diagnostic {
    fn from(err: &CompileError) -> Self {
        use error_codes::*;
        let code = match err {
            CompileError::UnresolvedIdentifier { .. } => UNRESOLVED_IDENTIFIER,
            CompileError::UnknownOperator { .. } => UNKNOWN_OPERATOR,
            CompileError::MalformedClassBody { .. } => MALFORMED_CLASS_BODY,
            CompileError::UnknownParentClass { .. } => UNKNOWN_PARENT_CLASS,
            CompileError::InheritanceCycle { .. } => INHERITANCE_CYCLE,
            CompileError::InvalidAssignmentTarget { .. } => INVALID_ASSIGNMENT,
            CompileError::MisplacedKeyword { .. } => MISPLACED_KEYWORD,
            CompileError::TooManyConstants { .. }
            | CompileError::TooManyLocals { .. }
            | CompileError::TooManyGlobals { .. }
            | CompileError::TooManyArguments { .. }
            | CompileError::JumpOutOfRange { .. } => LIMIT_EXCEEDED,
        };
        let diag = Diagnostic::error_with_code(code, err.to_string(), err.span());
        match err {
            CompileError::InvalidAssignmentTarget { .. } => {
                diag.with_help("only `let` bindings, array elements and properties can be assigned")
            }
            _ => diag,
        }
    }
}

impl From<&RuntimeError> for Diagnostic {
    fn from(err: &RuntimeError) -> Self {
        use error_codes::*;
        let code = match err {
            RuntimeError::TypeError { .. } => TYPE_ERROR,
            RuntimeError::DivideByZero { .. } => DIVIDE_BY_ZERO,
            RuntimeError::IndexOutOfBounds { .. } => INDEX_OUT_OF_BOUNDS,
            RuntimeError::UnhashableType { .. } => UNHASHABLE_TYPE,
            RuntimeError::NotCallable { .. } => NOT_CALLABLE,
            RuntimeError::ArityMismatch { .. } => ARITY_MISMATCH,
            RuntimeError::ChannelClosed { .. } => CHANNEL_CLOSED,
            RuntimeError::UncaughtThrow { .. } => UNCAUGHT_THROW,
            RuntimeError::StackOverflow { .. } => STACK_OVERFLOW,
            RuntimeError::FrameOverflow { .. } => FRAME_OVERFLOW,
            RuntimeError::UnknownOpcode { .. } => UNKNOWN_OPCODE,
            RuntimeError::InvalidBytecode { .. } => INVALID_BYTECODE,
        };
        let diag =
            Diagnostic::error_with_code(code, err.to_string(), err.span().unwrap_or_default());
        if err.is_catchable() {
            diag
        } else {
            diag.with_note("this error cannot be caught by `try`")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_error_codes() {
        let diag = Diagnostic::from(&RuntimeError::DivideByZero {
            span: Span::new(4, 9, 2),
        });
        assert_eq!(diag.code, error_codes::DIVIDE_BY_ZERO);
        assert_eq!(diag.message, "Division by zero");
        assert_eq!(diag.line, 2);
        assert_eq!(diag.length, 5);
        assert!(diag.notes.is_empty());

        let fatal = Diagnostic::from(&RuntimeError::StackOverflow { span: Span::dummy() });
        assert_eq!(fatal.code, error_codes::STACK_OVERFLOW);
        assert_eq!(fatal.notes.len(), 1);
        assert_eq!(fatal.level, DiagnosticLevel::Error);
    }

    #[test]
    fn test_compile_error_codes() {
        let diag = Diagnostic::from(&CompileError::UnresolvedIdentifier {
            name: "x".to_string(),
            span: Span::new(0, 1, 1),
        });
        assert_eq!(diag.code, "K1001");
        assert_eq!(diag.message, "Unresolved identifier 'x'");
        assert_eq!(diag.level, DiagnosticLevel::Error);
        assert_eq!(diag.to_string(), "error[K1001]: Unresolved identifier 'x'");
    }

    #[test]
    fn test_human_format() {
        let diag = Diagnostic::error_with_code("K0001", "Type error: bad", Span::new(0, 3, 3))
            .with_file("main.k")
            .with_snippet("a + b")
            .with_help("check the operands");
        let text = diag.to_human_string();
        assert!(text.starts_with("error[K0001]: Type error: bad\n  --> main.k:3\n"));
        assert!(text.contains(" 3 | a + b"));
        assert!(text.contains("= help: check the operands"));
    }

    #[test]
    fn test_json_round_trip() {
        let diag = Diagnostic::error_with_code("K0005", "Division by zero", Span::new(0, 1, 1))
            .with_file("test.k");
        let json = diag.to_json_string().unwrap();
        assert!(json.contains("\"level\": \"error\""));
        assert!(!json.contains("snippet"));

        let back: Diagnostic = serde_json::from_str(&json).unwrap();
        assert_eq!(back, diag);
    }
}
