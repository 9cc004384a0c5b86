//! AST optimizer
//!
//! Passes rewrite the tree before it is lowered to bytecode. A pass is a pure
//! `&Program -> Program` function: it never consults the symbol table and
//! never changes observable behavior.
//!
//! # Usage
//!
//! ```
//! use kestrel_runtime::ast::build::*;
//! use kestrel_runtime::optimizer::Optimizer;
//!
//! let program = program(vec![expr(infix("*", int(6), int(7)))]);
//! let folded = Optimizer::with_default_passes().optimize(&program);
//! assert_eq!(folded, kestrel_runtime::ast::build::program(vec![expr(int(42))]));
//! ```

pub mod constant_folding;

pub use constant_folding::ConstantFoldingPass;

use crate::ast::Program;

/// Statistics collected during an optimization run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OptimizationStats {
    /// Number of expressions replaced by a literal
    pub constants_folded: usize,
    /// Number of passes executed
    pub passes_run: usize,
}

impl OptimizationStats {
    pub fn new() -> Self {
        Default::default()
    }

    /// Merge another stats object into this one (sum all counts)
    pub fn merge(&mut self, other: &OptimizationStats) {
        self.constants_folded += other.constants_folded;
        self.passes_run += other.passes_run;
    }
}

/// A single AST optimization pass
pub trait OptimizationPass: Send + Sync {
    /// Human-readable name of this pass (for logs)
    fn name(&self) -> &str;

    /// Rewrite `program`. Must be idempotent.
    fn run(&self, program: &Program) -> (Program, OptimizationStats);
}

/// Runs registered passes in order
pub struct Optimizer {
    enabled: bool,
    passes: Vec<Box<dyn OptimizationPass>>,
}

impl Optimizer {
    /// Disabled optimizer (pass-through)
    pub fn new() -> Self {
        Self {
            enabled: false,
            passes: Vec::new(),
        }
    }

    /// Optimizer with constant folding enabled
    pub fn with_default_passes() -> Self {
        let mut opt = Self {
            enabled: true,
            passes: Vec::new(),
        };
        opt.add_pass(Box::new(ConstantFoldingPass));
        opt
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn add_pass(&mut self, pass: Box<dyn OptimizationPass>) {
        self.passes.push(pass);
    }

    /// Optimize a program, returning the rewritten tree
    pub fn optimize(&self, program: &Program) -> Program {
        self.optimize_with_stats(program).0
    }

    /// Optimize a program and report what changed
    pub fn optimize_with_stats(&self, program: &Program) -> (Program, OptimizationStats) {
        let mut total = OptimizationStats::new();
        if !self.enabled {
            return (program.clone(), total);
        }

        let mut current = program.clone();
        for pass in &self.passes {
            let (next, stats) = pass.run(&current);
            tracing::trace!(
                pass = pass.name(),
                folded = stats.constants_folded,
                "optimization pass finished"
            );
            total.merge(&stats);
            current = next;
        }
        (current, total)
    }
}

impl Default for Optimizer {
    fn default() -> Self {
        Self::new()
    }
}
