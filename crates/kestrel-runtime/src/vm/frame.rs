//! Call frame implementation for function calls

use crate::value::{Closure, FreeCell, Instance, Value};
use parking_lot::Mutex;
use std::sync::Arc;

/// How a frame was entered, which decides how its result is delivered
#[derive(Debug, Clone)]
pub enum FrameKind {
    /// Plain call: the callee sits in the slot below `base` and is replaced
    /// by the result
    Function,
    /// Method call: `base` is the receiver slot, which receives the result
    Method,
    /// Constructor run by a class call: the result is discarded and the
    /// instance is delivered instead
    Constructor(Arc<Instance>),
}

/// Call frame for function calls
///
/// Each call creates a new frame that tracks:
/// - The closure being executed (instructions, free cells)
/// - The instruction pointer within that closure's block
/// - Where the frame's locals start on the operand stack
///
/// The top-level code also runs in a frame ("<main>") with base 0.
///
/// ## Stack Layout Example
///
/// ```text
/// main called add(1, 2), add has one extra local:
///
/// [g...] [<fn add>][1][2][local]
///                   ^
///                   add frame base
///
/// obj.area() on a method with `this` as local 0:
///
/// [g...] [obj][arg]
///         ^
///         method frame base
/// ```
///
/// Local variable access is frame-relative: `GetLocal n` reads
/// `stack[base + n]`, unless a closure has captured local `n`. From then on
/// the local lives in a shared cell and the stack slot is stale.
#[derive(Debug, Clone)]
pub struct CallFrame {
    /// Closure being executed
    pub closure: Arc<Closure>,
    /// Offset of the next instruction in the closure's block
    pub ip: usize,
    /// Stack index of local 0
    pub base: usize,
    pub kind: FrameKind,
    /// Cells of captured locals, by local index
    cells: Vec<Option<FreeCell>>,
}

impl CallFrame {
    pub fn new(closure: Arc<Closure>, base: usize, kind: FrameKind) -> Self {
        Self {
            closure,
            ip: 0,
            base,
            kind,
            cells: Vec::new(),
        }
    }

    /// Cell of local `index` if a closure has captured it
    #[inline]
    pub fn cell(&self, index: usize) -> Option<&FreeCell> {
        self.cells.get(index).and_then(Option::as_ref)
    }

    /// Cell for local `index`, created from `current` on first capture
    pub fn capture(&mut self, index: usize, current: Value) -> FreeCell {
        if self.cells.len() <= index {
            self.cells.resize(index + 1, None);
        }
        let cell = self.cells[index].get_or_insert_with(|| Arc::new(Mutex::new(current)));
        Arc::clone(cell)
    }

    #[inline]
    pub fn instructions(&self) -> &[u8] {
        &self.closure.function.instructions
    }

    /// Name of the running function, for logs and traces
    pub fn function_name(&self) -> &str {
        self.closure.function.display_name()
    }

    /// Stack slot the frame's result is written to on return
    #[inline]
    pub fn result_slot(&self) -> usize {
        match self.kind {
            FrameKind::Function => self.base.saturating_sub(1),
            FrameKind::Method | FrameKind::Constructor(_) => self.base,
        }
    }
}
