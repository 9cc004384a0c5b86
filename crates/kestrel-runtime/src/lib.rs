//! Kestrel runtime: an embeddable scripting-language core
//!
//! The crate takes a finished AST from a host parser and runs it:
//! - [`compiler`] lowers the tree to bytecode, folding constants and
//!   resolving names through a [`SymbolTable`]
//! - [`vm`] executes the bytecode on a fixed-size operand stack
//! - [`concurrency`] provides tasks and channels for `spawn`
//! - [`runtime`] ties them together and keeps state across units

/// Kestrel runtime version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod api;
pub mod ast;
pub mod builtins;
pub mod bytecode;
pub mod compiler;
pub mod concurrency;
pub mod diagnostic;
pub mod optimizer;
pub mod runtime;
pub mod span;
pub mod symbol;
pub mod value;
pub mod vm;

pub use bytecode::{Bytecode, Opcode};
pub use compiler::{CompileError, Compiler};
pub use diagnostic::{Diagnostic, DiagnosticLevel};
pub use kestrel_config::RuntimeSettings;
pub use runtime::{Error, Runtime, RuntimeResult};
pub use span::Span;
pub use symbol::{Symbol, SymbolScope, SymbolTable};
pub use value::{RuntimeError, Value};
pub use vm::Vm;
