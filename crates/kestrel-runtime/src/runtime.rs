//! Kestrel runtime API for embedding
//!
//! [`Runtime`] ties the compiler and the VM together and keeps state across
//! compilation units: globals, the symbol table and the constant pool all
//! persist, so each [`Runtime::run`] behaves like one REPL entry.

use crate::api::conversion::{FromValue, ToValue};
use crate::api::native::{NativeFunctionBuilder, NativeRegistry, RegistryError};
use crate::ast::{Program, VersionedProgram};
use crate::bytecode::Bytecode;
use crate::compiler::{CompileError, Compiler};
use crate::concurrency::TaskSet;
use crate::diagnostic::Diagnostic;
use crate::symbol::SymbolScope;
use crate::value::{NativeFunction, RuntimeError, Value};
use crate::vm::{GlobalTable, Vm};
use kestrel_config::{ConfigError, ConfigLoader, RuntimeSettings};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

/// Top-level error for embedding hosts
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Compile(#[from] CompileError),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("Invalid AST payload: {0}")]
    Ast(#[from] serde_json::Error),
    #[error("No global function named '{0}'")]
    UnknownFunction(String),
}

impl Error {
    /// Diagnostic for compile and runtime errors, `None` for host-side failures
    pub fn to_diagnostic(&self) -> Option<Diagnostic> {
        match self {
            Error::Compile(err) => Some(Diagnostic::from(err)),
            Error::Runtime(err) => Some(Diagnostic::from(err)),
            _ => None,
        }
    }
}

/// Result type for runtime operations
pub type RuntimeResult<T> = Result<T, Error>;

/// Kestrel runtime instance
///
/// # Examples
///
/// ```
/// use kestrel_runtime::ast::build::*;
/// use kestrel_runtime::{Runtime, Value};
///
/// let mut runtime = Runtime::new();
/// runtime.run(&program(vec![let_("x", int(40))])).unwrap();
/// let result = runtime
///     .run(&program(vec![expr(infix("+", id("x"), int(2)))]))
///     .unwrap();
/// assert_eq!(result, Value::Integer(42));
/// ```
pub struct Runtime {
    compiler: Compiler,
    natives: Arc<NativeRegistry>,
    globals: GlobalTable,
    tasks: Arc<TaskSet>,
    settings: RuntimeSettings,
}

impl Runtime {
    /// Runtime with default settings and the prelude builtins
    pub fn new() -> Self {
        Self::with_settings(RuntimeSettings::default())
    }

    pub fn with_settings(settings: RuntimeSettings) -> Self {
        let natives = NativeRegistry::with_prelude();
        let mut compiler = Compiler::new(&natives);
        compiler.set_optimize(settings.optimize);
        Self {
            compiler,
            natives: Arc::new(natives),
            globals: GlobalTable::with_capacity(settings.globals_size),
            tasks: Arc::new(TaskSet::new()),
            settings,
        }
    }

    /// Runtime configured from the `kestrel.toml` found at or above `dir`
    pub fn from_config(dir: &Path) -> RuntimeResult<Self> {
        let config = ConfigLoader::new().load_from_directory(dir)?;
        Ok(Self::with_settings(config.settings()))
    }

    pub fn settings(&self) -> RuntimeSettings {
        self.settings
    }

    pub fn globals(&self) -> &GlobalTable {
        &self.globals
    }

    pub fn tasks(&self) -> &Arc<TaskSet> {
        &self.tasks
    }

    /// Compile and execute one unit, returning the value of its last
    /// expression statement (null if there is none)
    pub fn run(&mut self, program: &Program) -> RuntimeResult<Value> {
        let bytecode = self.compiler.compile(program)?;
        let mut vm = self.vm(bytecode);
        vm.run()?;
        Ok(vm.last_popped_value().clone())
    }

    /// Run a unit handed over as versioned JSON by a host parser
    pub fn run_json(&mut self, json: &str) -> RuntimeResult<Value> {
        let payload = VersionedProgram::from_json(json)?;
        self.run(&payload.program)
    }

    /// Call a global script function (or a builtin) by name
    pub fn call(&mut self, name: &str, args: Vec<Value>) -> RuntimeResult<Value> {
        let callee = self
            .lookup(name)
            .filter(Value::is_callable)
            .ok_or_else(|| Error::UnknownFunction(name.to_string()))?;
        let bytecode = Bytecode {
            constants: self.compiler.constants().to_vec(),
            ..Bytecode::default()
        };
        Ok(self.vm(bytecode).run_callable(&callee, &args)?)
    }

    /// [`Runtime::call`] with typed arguments and result
    pub fn call_typed<A, R>(&mut self, name: &str, args: A) -> RuntimeResult<R>
    where
        A: IntoIterator,
        A::Item: ToValue,
        R: FromValue,
    {
        let args = args.into_iter().map(ToValue::to_value).collect();
        let result = self.call(name, args)?;
        R::from_value(&result).map_err(|err| {
            Error::Runtime(RuntimeError::TypeError {
                msg: err.to_string(),
                span: Default::default(),
            })
        })
    }

    /// Current value of a global binding
    pub fn get_global(&self, name: &str) -> Option<Value> {
        self.lookup(name)
    }

    /// Create or overwrite a global binding visible to later units
    pub fn set_global(&mut self, name: &str, value: Value) {
        let symbols = self.compiler.symbol_table_mut();
        let existing = symbols
            .lookup(name)
            .filter(|symbol| symbol.scope == SymbolScope::Global)
            .map(|symbol| symbol.index);
        let index = match existing {
            Some(index) => index,
            None => symbols.define(name).index,
        };
        self.globals.set(index, value);
    }

    /// Register a native function for later units
    pub fn register(&mut self, function: NativeFunction) -> RuntimeResult<usize> {
        let name = function.name.clone();
        let index = Arc::make_mut(&mut self.natives).register(function)?;
        self.compiler.symbol_table_mut().define_builtin(index, &name);
        Ok(index)
    }

    /// Register a fixed-arity native function
    pub fn register_function<F>(&mut self, name: &str, arity: usize, implementation: F) -> RuntimeResult<usize>
    where
        F: Fn(&[Value]) -> Value + Send + Sync + 'static,
    {
        self.register(NativeFunctionBuilder::new(name).with_arity(arity).build_with(implementation))
    }

    /// Register a native function taking any number of arguments
    pub fn register_variadic<F>(&mut self, name: &str, implementation: F) -> RuntimeResult<usize>
    where
        F: Fn(&[Value]) -> Value + Send + Sync + 'static,
    {
        self.register(NativeFunctionBuilder::new(name).variadic().build_with(implementation))
    }

    /// Block until every spawned task has finished
    pub fn join_tasks(&self) {
        self.tasks.join_all();
    }

    fn lookup(&self, name: &str) -> Option<Value> {
        let symbol = self.compiler.symbol_table().lookup(name)?;
        match symbol.scope {
            SymbolScope::Global => Some(self.globals.get(symbol.index)),
            SymbolScope::Builtin => self.natives.get(symbol.index).cloned().map(Value::Native),
            _ => None,
        }
    }

    fn vm(&self, bytecode: Bytecode) -> Vm {
        Vm::new(bytecode, Arc::clone(&self.natives))
            .with_settings(self.settings)
            .with_globals(self.globals.clone())
            .with_tasks(Arc::clone(&self.tasks))
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}
