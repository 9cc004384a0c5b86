//! Native function registration and builder
//!
//! Native functions are Rust closures callable from scripts. They receive the
//! call's arguments in order and return exactly one [`Value`]; returning a
//! [`Value::Error`] signals failure and is thrown at the call site.
//!
//! A [`NativeRegistry`] is shared by the compiler, which resolves each
//! registered name to a builtin index, and by the VM, which resolves the index
//! back to the function.
//!
//! # Examples
//!
//! ```rust
//! use kestrel_runtime::api::native::{NativeFunctionBuilder, NativeRegistry};
//! use kestrel_runtime::value::Value;
//!
//! let double = NativeFunctionBuilder::new("double")
//!     .with_arity(1)
//!     .with_implementation(|args| match &args[0] {
//!         Value::Integer(n) => Value::Integer(n * 2),
//!         other => Value::error(format!("double expects an integer, got {}", other.type_name()), None),
//!     })
//!     .build()
//!     .unwrap();
//!
//! let mut natives = NativeRegistry::with_prelude();
//! natives.register(double).unwrap();
//! assert!(natives.lookup("double").is_some());
//! ```

use crate::builtins;
use crate::value::{NativeFn, NativeFunction, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Builtin indexes are encoded in one byte
pub const MAX_NATIVES: usize = 256;

/// Type alias for native function implementation
type NativeFnImpl = Box<dyn Fn(&[Value]) -> Value + Send + Sync>;

/// Builder for constructing native functions with arity validation
///
/// Supports both fixed-arity functions (must be called with the exact
/// argument count) and variadic functions (any number of arguments).
pub struct NativeFunctionBuilder {
    name: String,
    arity: Option<usize>,
    implementation: Option<NativeFnImpl>,
}

impl NativeFunctionBuilder {
    /// Create a new native function builder with the given name
    ///
    /// The name is what scripts call the function by.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            arity: None,
            implementation: None,
        }
    }

    /// Set the function's arity (required argument count)
    ///
    /// Calls with too few or too many arguments yield an Error value without
    /// reaching the implementation, so the implementation may index `args`
    /// freely.
    pub fn with_arity(mut self, arity: usize) -> Self {
        self.arity = Some(arity);
        self
    }

    /// Accept any number of arguments
    pub fn variadic(mut self) -> Self {
        self.arity = None;
        self
    }

    /// Set the function implementation
    pub fn with_implementation<F>(mut self, implementation: F) -> Self
    where
        F: Fn(&[Value]) -> Value + Send + Sync + 'static,
    {
        self.implementation = Some(Box::new(implementation));
        self
    }

    /// Build the native function
    ///
    /// # Errors
    ///
    /// Returns [`BuildError::MissingImplementation`] if no implementation was
    /// provided.
    pub fn build(self) -> Result<NativeFunction, BuildError> {
        let implementation = self
            .implementation
            .ok_or_else(|| BuildError::MissingImplementation(self.name.clone()))?;
        Ok(finish(self.name, self.arity, implementation))
    }

    /// Build with `implementation`, replacing any set before
    pub fn build_with<F>(self, implementation: F) -> NativeFunction
    where
        F: Fn(&[Value]) -> Value + Send + Sync + 'static,
    {
        finish(self.name, self.arity, Box::new(implementation))
    }
}

fn finish(name: String, arity: Option<usize>, implementation: NativeFnImpl) -> NativeFunction {
    let func: NativeFn = match arity {
        Some(arity) => {
            let name = name.clone();
            Arc::new(move |args: &[Value]| {
                if args.len() != arity {
                    return Value::error(
                        format!(
                            "Function '{}' expects {} argument{}, got {}",
                            name,
                            arity,
                            if arity == 1 { "" } else { "s" },
                            args.len()
                        ),
                        None,
                    );
                }
                implementation(args)
            })
        }
        None => Arc::new(move |args: &[Value]| implementation(args)),
    };
    NativeFunction::new(name, func)
}

/// Errors that can occur when building native functions
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    /// Implementation function not provided
    #[error("Native function '{0}' missing implementation")]
    MissingImplementation(String),
}

/// Errors raised when registering a native function
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("Native function '{0}' is already registered")]
    Duplicate(String),
    #[error("Native function table is full (256 entries)")]
    Full,
}

/// Index-addressed table of native functions
#[derive(Default, Clone)]
pub struct NativeRegistry {
    functions: Vec<Arc<NativeFunction>>,
    index: HashMap<String, usize>,
}

impl NativeRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the prelude builtins
    pub fn with_prelude() -> Self {
        let mut registry = Self::new();
        for function in builtins::prelude() {
            registry.insert(function);
        }
        registry
    }

    /// Register a function, returning its builtin index
    ///
    /// # Errors
    ///
    /// Fails if the name is taken or the table is full.
    pub fn register(&mut self, function: NativeFunction) -> Result<usize, RegistryError> {
        if self.index.contains_key(&function.name) {
            return Err(RegistryError::Duplicate(function.name));
        }
        if self.functions.len() >= MAX_NATIVES {
            return Err(RegistryError::Full);
        }
        Ok(self.insert(function))
    }

    fn insert(&mut self, function: NativeFunction) -> usize {
        let index = self.functions.len();
        self.index.insert(function.name.clone(), index);
        self.functions.push(Arc::new(function));
        index
    }

    pub fn get(&self, index: usize) -> Option<&Arc<NativeFunction>> {
        self.functions.get(index)
    }

    /// Find a function and its index by name
    pub fn lookup(&self, name: &str) -> Option<(usize, &Arc<NativeFunction>)> {
        let index = *self.index.get(name)?;
        Some((index, &self.functions[index]))
    }

    /// Registered names with their indexes, in registration order
    pub fn names(&self) -> impl Iterator<Item = (usize, &str)> {
        self.functions
            .iter()
            .enumerate()
            .map(|(index, function)| (index, function.name.as_str()))
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

impl fmt::Debug for NativeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names().map(|(_, name)| name)).finish()
    }
}
