//! AST to bytecode compiler
//!
//! Lowers a [`Program`] to stack-based bytecode.
//! - Expressions leave exactly one value on the stack
//! - Statements leave the stack as they found it
//! - Function bodies compile into their own instruction block and land in the
//!   constant pool as [`CompiledFunction`] values
//! - Jumps are emitted with a placeholder target and back-patched once the
//!   destination offset is known
//!
//! A compiler keeps its symbol table and constant pool between units, so a
//! REPL can compile one program after another against the same globals.
//! Compilation of a unit is all-or-nothing: on error the symbol table and
//! constant pool are restored to what they were before the unit.

mod class;
mod expr;
mod stmt;

use crate::api::native::NativeRegistry;
use crate::ast::*;
use crate::bytecode::{make, Bytecode, DebugSpan, Opcode, NO_TARGET};
use crate::optimizer::Optimizer;
use crate::span::Span;
use crate::symbol::{Symbol, SymbolScope, SymbolTable};
use crate::value::{CompiledFunction, Value};
use std::collections::HashMap;
use thiserror::Error;

/// Largest constant pool index (u16 operand)
const MAX_CONSTANTS: usize = u16::MAX as usize + 1;
/// Largest local slot count per function (u8 operand)
const MAX_LOCALS: usize = u8::MAX as usize + 1;
/// Largest global slot count (u16 operand)
const MAX_GLOBALS: usize = u16::MAX as usize + 1;
/// Largest argument count per call (u8 operand)
const MAX_ARGS: usize = u8::MAX as usize;

/// Compilation failure
///
/// Always fatal to the unit being compiled.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CompileError {
    #[error("Unresolved identifier '{name}'")]
    UnresolvedIdentifier { name: String, span: Span },

    #[error("Unknown operator '{operator}'")]
    UnknownOperator { operator: String, span: Span },

    #[error("Malformed body of class '{class}': {reason}")]
    MalformedClassBody {
        class: String,
        reason: String,
        span: Span,
    },

    #[error("Class '{class}' extends unknown class '{parent}'")]
    UnknownParentClass {
        class: String,
        parent: String,
        span: Span,
    },

    #[error("Inheritance cycle involving class '{class}'")]
    InheritanceCycle { class: String, span: Span },

    #[error("Cannot assign to '{name}'")]
    InvalidAssignmentTarget { name: String, span: Span },

    #[error("'{keyword}' used outside of {context}")]
    MisplacedKeyword {
        keyword: &'static str,
        context: &'static str,
        span: Span,
    },

    #[error("Too many constants in one program (limit 65536)")]
    TooManyConstants { span: Span },

    #[error("Too many local variables in one function (limit 256)")]
    TooManyLocals { span: Span },

    #[error("Too many global variables (limit 65536)")]
    TooManyGlobals { span: Span },

    #[error("Too many arguments in one call (limit 255)")]
    TooManyArguments { span: Span },

    #[error("Instruction block too large for a jump target")]
    JumpOutOfRange { span: Span },
}

impl CompileError {
    pub fn span(&self) -> Span {
        match self {
            CompileError::UnresolvedIdentifier { span, .. }
            | CompileError::UnknownOperator { span, .. }
            | CompileError::MalformedClassBody { span, .. }
            | CompileError::UnknownParentClass { span, .. }
            | CompileError::InheritanceCycle { span, .. }
            | CompileError::InvalidAssignmentTarget { span, .. }
            | CompileError::MisplacedKeyword { span, .. }
            | CompileError::TooManyConstants { span }
            | CompileError::TooManyLocals { span }
            | CompileError::TooManyGlobals { span }
            | CompileError::TooManyArguments { span }
            | CompileError::JumpOutOfRange { span } => *span,
        }
    }
}

pub type CompileResult<T> = Result<T, CompileError>;

/// Opcode and position of an emitted instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct EmittedInstruction {
    pub(super) opcode: Opcode,
    pub(super) position: usize,
}

/// Instruction buffer for one function body (or the top level)
#[derive(Debug, Default)]
pub(super) struct CompilationScope {
    pub(super) instructions: Vec<u8>,
    pub(super) debug_info: Vec<DebugSpan>,
    /// Last emitted instruction
    pub(super) last: Option<EmittedInstruction>,
    /// Instruction emitted before `last`
    pub(super) previous: Option<EmittedInstruction>,
}

/// Loop context for break/continue
#[derive(Debug, Default)]
pub(super) struct LoopContext {
    /// Known continue destination (while loops jump straight to the condition)
    pub(super) continue_target: Option<usize>,
    /// Continue jumps waiting for the update clause of a for loop
    pub(super) continue_jumps: Vec<usize>,
    pub(super) break_jumps: Vec<usize>,
    /// Protected regions open when the loop was entered
    pub(super) try_depth: usize,
}

/// Class whose methods are being compiled, for `super`
#[derive(Debug, Clone)]
pub(super) struct ClassContext {
    pub(super) name: String,
    pub(super) constant: usize,
    pub(super) has_parent: bool,
}

/// Per-function compile state that must not leak into nested functions
#[derive(Debug, Default)]
pub(super) struct FunctionContext {
    pub(super) loops: Vec<LoopContext>,
    /// Open protected regions, innermost last, with their finally bodies
    pub(super) regions: Vec<Option<Block>>,
    pub(super) is_function: bool,
}

/// Compiler state
pub struct Compiler {
    pub(super) constants: Vec<Value>,
    pub(super) symbol_table: SymbolTable,
    pub(super) scopes: Vec<CompilationScope>,
    pub(super) functions: Vec<FunctionContext>,
    pub(super) classes: Vec<ClassContext>,
    /// Declaration spans of classes compiled in the current unit
    pub(super) class_spans: HashMap<String, Span>,
    optimizer: Optimizer,
}

impl Compiler {
    /// Create a compiler that resolves the registry's natives as builtins
    pub fn new(natives: &NativeRegistry) -> Self {
        let mut symbol_table = SymbolTable::new();
        for (index, name) in natives.names() {
            symbol_table.define_builtin(index, name);
        }
        Self::with_state(symbol_table, Vec::new())
    }

    /// Create a compiler continuing from an earlier unit's state
    pub fn with_state(symbol_table: SymbolTable, constants: Vec<Value>) -> Self {
        Self {
            constants,
            symbol_table,
            scopes: vec![CompilationScope::default()],
            functions: vec![FunctionContext::default()],
            classes: Vec::new(),
            class_spans: HashMap::new(),
            optimizer: Optimizer::with_default_passes(),
        }
    }

    /// Enable or disable constant folding
    pub fn set_optimize(&mut self, enabled: bool) {
        self.optimizer.set_enabled(enabled);
    }

    pub fn symbol_table(&self) -> &SymbolTable {
        &self.symbol_table
    }

    /// Host-side bindings made between units (natives, preset globals)
    pub fn symbol_table_mut(&mut self) -> &mut SymbolTable {
        &mut self.symbol_table
    }

    pub fn constants(&self) -> &[Value] {
        &self.constants
    }

    /// Give up the accumulated state, for a later [`Compiler::with_state`]
    pub fn into_state(self) -> (SymbolTable, Vec<Value>) {
        (self.symbol_table, self.constants)
    }

    /// Compile one unit
    ///
    /// The returned bytecode carries the whole constant pool, including the
    /// constants of earlier units.
    pub fn compile(&mut self, program: &Program) -> CompileResult<Bytecode> {
        let saved_symbols = self.symbol_table.clone();
        let saved_constants = self.constants.len();

        let (program, stats) = self.optimizer.optimize_with_stats(program);
        self.scopes = vec![CompilationScope::default()];
        self.functions = vec![FunctionContext::default()];
        self.classes.clear();
        self.class_spans.clear();

        let result = self
            .compile_statements(&program.statements)
            .and_then(|()| self.link_classes(saved_constants));

        if let Err(err) = result {
            tracing::debug!(error = %err, "compilation failed, state restored");
            self.symbol_table = saved_symbols;
            self.constants.truncate(saved_constants);
            return Err(err);
        }

        self.emit(Opcode::Halt, &[], Span::dummy());
        let scope = self.scopes.pop().unwrap_or_default();
        self.scopes.push(CompilationScope::default());

        tracing::debug!(
            statements = program.statements.len(),
            instructions = scope.instructions.len(),
            constants = self.constants.len(),
            folded = stats.constants_folded,
            "compiled unit"
        );

        Ok(Bytecode {
            instructions: scope.instructions,
            constants: self.constants.clone(),
            debug_info: scope.debug_info,
        })
    }

    pub(super) fn compile_statements(&mut self, statements: &[Stmt]) -> CompileResult<()> {
        for stmt in statements {
            self.compile_stmt(stmt)?;
        }
        Ok(())
    }

    // ===== Emission =====

    pub(super) fn scope(&self) -> &CompilationScope {
        // Invariant: there is always at least the top-level scope
        &self.scopes[self.scopes.len() - 1]
    }

    fn scope_mut(&mut self) -> &mut CompilationScope {
        let last = self.scopes.len() - 1;
        &mut self.scopes[last]
    }

    pub(super) fn function(&mut self) -> &mut FunctionContext {
        let last = self.functions.len() - 1;
        &mut self.functions[last]
    }

    /// Offset the next emitted instruction will occupy
    pub(super) fn current_offset(&self) -> usize {
        self.scope().instructions.len()
    }

    /// Append an instruction, returning its position
    pub(super) fn emit(&mut self, opcode: Opcode, operands: &[usize], span: Span) -> usize {
        let encoded = make(opcode, operands);
        let scope = self.scope_mut();
        let position = scope.instructions.len();
        scope.instructions.extend_from_slice(&encoded);

        if scope.debug_info.last().map(|d| d.span) != Some(span) {
            scope.debug_info.push(DebugSpan {
                instruction_offset: position,
                span,
            });
        }

        scope.previous = scope.last;
        scope.last = Some(EmittedInstruction { opcode, position });
        position
    }

    /// Emit a jump whose target is patched later
    pub(super) fn emit_jump(&mut self, opcode: Opcode, span: Span) -> usize {
        self.emit(opcode, &[NO_TARGET], span)
    }

    /// Point the first jump operand of the instruction at `position` to the
    /// current offset
    pub(super) fn patch_jump(&mut self, position: usize, span: Span) -> CompileResult<()> {
        let target = self.current_offset();
        self.patch_operand(position, 0, target, span)
    }

    /// Rewrite one 2-byte operand of an emitted instruction
    pub(super) fn patch_operand(
        &mut self,
        position: usize,
        operand: usize,
        target: usize,
        span: Span,
    ) -> CompileResult<()> {
        if target >= NO_TARGET {
            return Err(CompileError::JumpOutOfRange { span });
        }
        let at = position + 1 + operand * 2;
        let bytes = (target as u16).to_be_bytes();
        let instructions = &mut self.scope_mut().instructions;
        instructions[at] = bytes[0];
        instructions[at + 1] = bytes[1];
        Ok(())
    }

    /// Emit a jump to an already known target
    pub(super) fn emit_jump_to(&mut self, opcode: Opcode, target: usize, span: Span) -> CompileResult<()> {
        if target >= NO_TARGET {
            return Err(CompileError::JumpOutOfRange { span });
        }
        self.emit(opcode, &[target], span);
        Ok(())
    }

    pub(super) fn last_instruction_is(&self, opcode: Opcode) -> bool {
        self.scope().last.map(|l| l.opcode) == Some(opcode)
    }

    /// Drop a trailing Pop so the value stays on the stack
    pub(super) fn remove_last_pop(&mut self) {
        let scope = self.scope_mut();
        if let Some(last) = scope.last.filter(|l| l.opcode == Opcode::Pop) {
            scope.instructions.truncate(last.position);
            while scope
                .debug_info
                .last()
                .is_some_and(|d| d.instruction_offset >= last.position)
            {
                scope.debug_info.pop();
            }
            scope.last = scope.previous.take();
        }
    }

    /// Turn a trailing Pop into ReturnValue
    pub(super) fn replace_last_pop_with_return(&mut self) {
        let scope = self.scope_mut();
        if let Some(last) = scope.last.filter(|l| l.opcode == Opcode::Pop) {
            scope.instructions[last.position] = Opcode::ReturnValue as u8;
            scope.last = Some(EmittedInstruction {
                opcode: Opcode::ReturnValue,
                position: last.position,
            });
        }
    }

    pub(super) fn add_constant(&mut self, value: Value, span: Span) -> CompileResult<usize> {
        if self.constants.len() >= MAX_CONSTANTS {
            return Err(CompileError::TooManyConstants { span });
        }
        self.constants.push(value);
        Ok(self.constants.len() - 1)
    }

    pub(super) fn emit_constant(&mut self, value: Value, span: Span) -> CompileResult<()> {
        let index = self.add_constant(value, span)?;
        self.emit(Opcode::Constant, &[index], span);
        Ok(())
    }

    // ===== Scopes =====

    /// Open a function body: new instruction buffer and enclosed symbol table
    pub(super) fn enter_scope(&mut self) {
        self.scopes.push(CompilationScope::default());
        self.functions.push(FunctionContext {
            is_function: true,
            ..FunctionContext::default()
        });
        let outer = std::mem::take(&mut self.symbol_table);
        self.symbol_table = SymbolTable::enclosed(outer);
    }

    /// Close a function body, returning its instructions and the symbols it
    /// captured from the enclosing scope
    pub(super) fn leave_scope(&mut self) -> (CompilationScope, usize, Vec<Symbol>) {
        let scope = self.scopes.pop().unwrap_or_default();
        self.functions.pop();
        let table = std::mem::take(&mut self.symbol_table);
        let num_locals = table.num_definitions();
        let free = table.free_symbols().to_vec();
        self.symbol_table = table.into_outer().unwrap_or_default();
        (scope, num_locals, free)
    }

    /// Define a binding in the current scope, enforcing slot limits
    pub(super) fn define(&mut self, name: &str, constant: bool, span: Span) -> CompileResult<Symbol> {
        let symbol = if constant {
            self.symbol_table.define_const(name)
        } else {
            self.symbol_table.define(name)
        };
        match symbol.scope {
            SymbolScope::Local if symbol.index >= MAX_LOCALS => {
                Err(CompileError::TooManyLocals { span })
            }
            SymbolScope::Global if symbol.index >= MAX_GLOBALS => {
                Err(CompileError::TooManyGlobals { span })
            }
            _ => Ok(symbol),
        }
    }

    pub(super) fn resolve(&mut self, name: &str, span: Span) -> CompileResult<Symbol> {
        self.symbol_table
            .resolve(name)
            .ok_or_else(|| CompileError::UnresolvedIdentifier {
                name: name.to_string(),
                span,
            })
    }

    pub(super) fn load_symbol(&mut self, symbol: &Symbol, span: Span) {
        match symbol.scope {
            SymbolScope::Global => self.emit(Opcode::GetGlobal, &[symbol.index], span),
            SymbolScope::Local => self.emit(Opcode::GetLocal, &[symbol.index], span),
            SymbolScope::Free => self.emit(Opcode::GetFree, &[symbol.index], span),
            SymbolScope::Builtin => self.emit(Opcode::GetBuiltin, &[symbol.index], span),
            SymbolScope::FunctionSelf => self.emit(Opcode::CurrentClosure, &[], span),
        };
    }

    /// Queue the cell backing `symbol` for the closure being built
    ///
    /// Globals and builtins resolve as-is, so only locals, free variables
    /// and the enclosing function's own name are ever captured.
    pub(super) fn capture_symbol(&mut self, symbol: &Symbol, span: Span) {
        match symbol.scope {
            SymbolScope::Local => self.emit(Opcode::CaptureLocal, &[symbol.index], span),
            SymbolScope::Free => self.emit(Opcode::CaptureFree, &[symbol.index], span),
            SymbolScope::FunctionSelf => self.emit(Opcode::CaptureSelf, &[], span),
            SymbolScope::Global | SymbolScope::Builtin => unreachable!(),
        };
    }

    /// Store the top of stack into `symbol`, leaving it on the stack
    pub(super) fn store_symbol(&mut self, symbol: &Symbol, span: Span) -> CompileResult<()> {
        let opcode = match symbol.scope {
            SymbolScope::Global => Opcode::SetGlobal,
            SymbolScope::Local => Opcode::SetLocal,
            SymbolScope::Free => Opcode::SetFree,
            SymbolScope::Builtin | SymbolScope::FunctionSelf => {
                return Err(CompileError::InvalidAssignmentTarget {
                    name: symbol.name.clone(),
                    span,
                })
            }
        };
        self.emit(opcode, &[symbol.index], span);
        Ok(())
    }

    /// Build the compiled function for a finished scope
    pub(super) fn finish_function(
        name: Option<String>,
        scope: CompilationScope,
        num_locals: usize,
        num_parameters: usize,
    ) -> CompiledFunction {
        CompiledFunction {
            name,
            instructions: scope.instructions,
            num_locals,
            num_parameters,
            debug_info: scope.debug_info,
        }
    }
}
