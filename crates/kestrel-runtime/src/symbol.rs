//! Symbol table and name binding
//!
//! One table per function scope, chained to the enclosing scope. Resolving a
//! name that lives in an enclosing function records it as a free variable in
//! every scope in between, which is what closure construction captures.

use std::collections::HashMap;

/// Storage class of a binding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SymbolScope {
    Global,
    Local,
    Free,
    Builtin,
    /// The function currently being defined, for self-recursion
    FunctionSelf,
}

/// Resolved binding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    pub name: String,
    pub scope: SymbolScope,
    pub index: usize,
    /// Declared with `const`
    pub constant: bool,
}

impl Symbol {
    /// Whether assignment to this binding is allowed
    pub fn is_assignable(&self) -> bool {
        !self.constant && matches!(self.scope, SymbolScope::Global | SymbolScope::Local | SymbolScope::Free)
    }
}

/// Symbol table for one function scope (or the top level)
#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    outer: Option<Box<SymbolTable>>,
    store: HashMap<String, Symbol>,
    num_definitions: usize,
    free_symbols: Vec<Symbol>,
}

impl SymbolTable {
    /// Create a top-level table
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a function scope nested in `outer`
    pub fn enclosed(outer: SymbolTable) -> Self {
        Self {
            outer: Some(Box::new(outer)),
            ..Self::default()
        }
    }

    /// Leave this scope, returning the enclosing table
    pub fn into_outer(self) -> Option<SymbolTable> {
        self.outer.map(|outer| *outer)
    }

    pub fn is_global(&self) -> bool {
        self.outer.is_none()
    }

    /// Slots defined in this scope (globals at top level, locals otherwise)
    pub fn num_definitions(&self) -> usize {
        self.num_definitions
    }

    /// Free variables captured by this scope, in capture order
    pub fn free_symbols(&self) -> &[Symbol] {
        &self.free_symbols
    }

    /// Bind `name` in the current scope
    pub fn define(&mut self, name: &str) -> Symbol {
        self.define_binding(name, false)
    }

    /// Bind `name` as a constant in the current scope
    pub fn define_const(&mut self, name: &str) -> Symbol {
        self.define_binding(name, true)
    }

    fn define_binding(&mut self, name: &str, constant: bool) -> Symbol {
        let scope = if self.is_global() {
            SymbolScope::Global
        } else {
            SymbolScope::Local
        };

        // Redeclaration in the same scope reuses the slot
        let index = match self.store.get(name) {
            Some(existing) if existing.scope == scope => existing.index,
            _ => {
                let index = self.num_definitions;
                self.num_definitions += 1;
                index
            }
        };

        let symbol = Symbol {
            name: name.to_string(),
            scope,
            index,
            constant,
        };
        self.store.insert(name.to_string(), symbol.clone());
        symbol
    }

    /// Bind a native function by its registry index
    pub fn define_builtin(&mut self, index: usize, name: &str) -> Symbol {
        let symbol = Symbol {
            name: name.to_string(),
            scope: SymbolScope::Builtin,
            index,
            constant: true,
        };
        self.store.insert(name.to_string(), symbol.clone());
        symbol
    }

    /// Bind the name of the function whose body this scope compiles
    pub fn define_function_name(&mut self, name: &str) -> Symbol {
        let symbol = Symbol {
            name: name.to_string(),
            scope: SymbolScope::FunctionSelf,
            index: 0,
            constant: true,
        };
        self.store.insert(name.to_string(), symbol.clone());
        symbol
    }

    fn define_free(&mut self, original: Symbol) -> Symbol {
        let symbol = Symbol {
            name: original.name.clone(),
            scope: SymbolScope::Free,
            index: self.free_symbols.len(),
            constant: original.constant,
        };
        self.free_symbols.push(original);
        self.store.insert(symbol.name.clone(), symbol.clone());
        symbol
    }

    /// Binding of `name` in this scope only
    pub fn lookup(&self, name: &str) -> Option<&Symbol> {
        self.store.get(name)
    }

    /// Resolve `name`, walking outward
    ///
    /// Globals and builtins resolve as-is. Anything found in an enclosing
    /// function scope becomes a free variable of this scope.
    pub fn resolve(&mut self, name: &str) -> Option<Symbol> {
        if let Some(symbol) = self.store.get(name) {
            return Some(symbol.clone());
        }

        let outer = self.outer.as_mut()?;
        let symbol = outer.resolve(name)?;
        match symbol.scope {
            SymbolScope::Global | SymbolScope::Builtin => Some(symbol),
            _ => Some(self.define_free(symbol)),
        }
    }
}
