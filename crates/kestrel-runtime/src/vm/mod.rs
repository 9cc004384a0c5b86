//! Stack-based virtual machine
//!
//! Executes bytecode with a fixed-size operand stack and a bounded frame
//! stack. One dispatch loop serves every task:
//! - Operators share their semantics with constant folding (see [`arith`])
//! - Globals live in a [`GlobalTable`] shared by reference between tasks
//! - try/catch/finally runs on a [`HandlerStack`] overlay
//! - `spawn` runs a callable on a child VM on the task pool
//!
//! Every slot at or above the stack pointer holds `Null`, so a new frame's
//! locals start out null without an explicit clear.

pub mod arith;
pub mod dispatch;
mod exception;
mod frame;
mod globals;

pub use exception::{HandlerRecord, HandlerStack};
pub use frame::{CallFrame, FrameKind};
pub use globals::GlobalTable;

use crate::api::native::NativeRegistry;
use crate::bytecode::{self, Bytecode, Opcode};
use crate::concurrency::{Channel, TaskSet};
use crate::span::Span;
use crate::value::{Closure, FreeCell, HashKey, Instance, RuntimeError, Value};
use arith::BinaryOp;
use indexmap::IndexMap;
use kestrel_config::RuntimeSettings;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Outcome of one instruction
enum Step {
    Continue,
    Halt,
}

/// Virtual machine state for one task
pub struct Vm {
    /// Operand stack, pre-sized and never resized
    stack: Vec<Value>,
    /// Next free stack slot
    sp: usize,
    frames: Vec<CallFrame>,
    handlers: HandlerStack,
    /// Cells queued by `Capture*` for the next `Closure`
    captures: Vec<FreeCell>,
    globals: GlobalTable,
    constants: Arc<[Value]>,
    /// Top-level block of the program
    main: Arc<Closure>,
    natives: Arc<NativeRegistry>,
    tasks: Arc<TaskSet>,
    settings: RuntimeSettings,
    /// Value discarded by the most recent `Pop`
    last_popped: Value,
    /// Offset of the instruction being executed, for error spans
    op_offset: usize,
}

impl Vm {
    /// Create a VM for `bytecode` with default settings and a private
    /// global table
    pub fn new(bytecode: Bytecode, natives: Arc<NativeRegistry>) -> Self {
        let main = Arc::new(Closure::new(Arc::new(bytecode.main_function()), Vec::new()));
        Self::from_parts(
            Arc::from(bytecode.constants),
            main,
            natives,
            GlobalTable::default(),
            Arc::new(TaskSet::new()),
            RuntimeSettings::default(),
        )
    }

    fn from_parts(
        constants: Arc<[Value]>,
        main: Arc<Closure>,
        natives: Arc<NativeRegistry>,
        globals: GlobalTable,
        tasks: Arc<TaskSet>,
        settings: RuntimeSettings,
    ) -> Self {
        Self {
            stack: vec![Value::Null; settings.stack_size],
            sp: 0,
            frames: Vec::new(),
            handlers: HandlerStack::new(),
            captures: Vec::new(),
            globals,
            constants,
            main,
            natives,
            tasks,
            settings,
            last_popped: Value::Null,
            op_offset: 0,
        }
    }

    /// Share an existing global table (REPL units, host state)
    pub fn with_globals(mut self, globals: GlobalTable) -> Self {
        self.globals = globals;
        self
    }

    /// Track spawned tasks in `tasks` instead of a private set
    pub fn with_tasks(mut self, tasks: Arc<TaskSet>) -> Self {
        self.tasks = tasks;
        self
    }

    /// Apply stack and frame limits
    pub fn with_settings(mut self, settings: RuntimeSettings) -> Self {
        self.stack = vec![Value::Null; settings.stack_size];
        self.sp = 0;
        self.settings = settings;
        self
    }

    /// Fresh VM for a spawned task: own stacks, shared everything else
    fn child(&self) -> Self {
        Self::from_parts(
            Arc::clone(&self.constants),
            Arc::clone(&self.main),
            Arc::clone(&self.natives),
            self.globals.clone(),
            Arc::clone(&self.tasks),
            self.settings,
        )
    }

    pub fn globals(&self) -> &GlobalTable {
        &self.globals
    }

    /// Last value discarded by an expression statement (REPL echo)
    pub fn last_popped_value(&self) -> &Value {
        &self.last_popped
    }

    /// Run the program's top-level block until `Halt`
    pub fn run(&mut self) -> Result<(), RuntimeError> {
        self.reset();
        self.push_frame(Arc::clone(&self.main), 0, FrameKind::Function)?;
        let result = self.execute(0);
        self.reset();
        result
    }

    /// Call a closure, native function or class to completion
    ///
    /// Entry point for spawned tasks and for hosts calling script functions.
    pub fn run_callable(&mut self, callee: &Value, args: &[Value]) -> Result<Value, RuntimeError> {
        let stop_depth = self.frames.len();
        let base_sp = self.sp;

        let result = (|| {
            self.push(callee.clone())?;
            for arg in args {
                self.push(arg.clone())?;
            }
            self.call_value(args.len())?;
            self.execute(stop_depth)?;
            self.pop()
        })();

        if result.is_err() {
            self.frames.truncate(stop_depth);
            self.handlers.discard_frame(stop_depth + 1);
            self.captures.clear();
            self.set_sp(base_sp);
        }
        result
    }

    fn reset(&mut self) {
        self.frames.clear();
        self.handlers = HandlerStack::new();
        self.captures.clear();
        self.set_sp(0);
    }

    // ===== Dispatch =====

    /// Run until the frame stack shrinks to `stop_depth` or `Halt`
    ///
    /// Catchable errors raised while a handler is registered are turned into
    /// Error values and thrown.
    fn execute(&mut self, stop_depth: usize) -> Result<(), RuntimeError> {
        while self.frames.len() > stop_depth {
            match self.step() {
                Ok(Step::Continue) => {}
                Ok(Step::Halt) => return Ok(()),
                Err(err) if err.is_catchable() && !self.handlers.is_empty() => {
                    trace!(error = %err, "runtime error caught by handler");
                    self.throw(err.to_value())?;
                }
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    fn step(&mut self) -> Result<Step, RuntimeError> {
        let (byte, offset) = {
            let frame = self.current_frame_mut()?;
            let offset = frame.ip;
            match frame.instructions().get(offset).copied() {
                Some(byte) => {
                    frame.ip += 1;
                    (byte, offset)
                }
                // Running off the end of a block is a halt
                None => return Ok(Step::Halt),
            }
        };
        self.op_offset = offset;
        let opcode =
            dispatch::decode_opcode(byte).ok_or(RuntimeError::UnknownOpcode { byte, offset })?;

        match opcode {
            // ===== Constants =====
            Opcode::Constant => {
                let index = self.read_u16()?;
                let value = self.constant(index)?.clone();
                self.push(value)?;
            }
            Opcode::Null => self.push(Value::Null)?,
            Opcode::True => self.push(Value::Boolean(true))?,
            Opcode::False => self.push(Value::Boolean(false))?,

            // ===== Variables =====
            Opcode::GetLocal => {
                let (index, slot) = self.local_operand()?;
                let value = match self.current_frame()?.cell(index) {
                    Some(cell) => cell.lock().clone(),
                    None => self.stack[slot].clone(),
                };
                self.push(value)?;
            }
            Opcode::SetLocal => {
                let (index, slot) = self.local_operand()?;
                let value = self.peek()?.clone();
                match self.frames.last().and_then(|frame| frame.cell(index)) {
                    Some(cell) => *cell.lock() = value,
                    None => self.stack[slot] = value,
                }
            }
            Opcode::GetGlobal => {
                let index = self.read_u16()?;
                let value = self.globals.get(index);
                self.push(value)?;
            }
            Opcode::SetGlobal => {
                let index = self.read_u16()?;
                let value = self.peek()?.clone();
                self.globals.set(index, value);
            }
            Opcode::GetFree => {
                let index = self.read_u8()?;
                let value = self.free_cell(index)?.lock().clone();
                self.push(value)?;
            }
            Opcode::SetFree => {
                let index = self.read_u8()?;
                let value = self.peek()?.clone();
                *self.free_cell(index)?.lock() = value;
            }
            Opcode::GetBuiltin => {
                let index = self.read_u8()?;
                let native = self.natives.get(index).cloned().ok_or_else(|| {
                    RuntimeError::InvalidBytecode {
                        msg: format!("builtin index {} out of range", index),
                    }
                })?;
                self.push(Value::Native(native))?;
            }
            Opcode::CurrentClosure => {
                let closure = Arc::clone(&self.current_frame()?.closure);
                self.push(Value::Closure(closure))?;
            }
            Opcode::CaptureLocal => {
                let (index, slot) = self.local_operand()?;
                let current = self.stack[slot].clone();
                let cell = self.current_frame_mut()?.capture(index, current);
                self.captures.push(cell);
            }
            Opcode::CaptureFree => {
                let index = self.read_u8()?;
                let cell = Arc::clone(self.free_cell(index)?);
                self.captures.push(cell);
            }
            Opcode::CaptureSelf => {
                let closure = Arc::clone(&self.current_frame()?.closure);
                self.captures.push(Arc::new(Mutex::new(Value::Closure(closure))));
            }

            // ===== Arithmetic & comparison =====
            Opcode::Add => self.binary(BinaryOp::Add)?,
            Opcode::Sub => self.binary(BinaryOp::Sub)?,
            Opcode::Mul => self.binary(BinaryOp::Mul)?,
            Opcode::Div => self.binary(BinaryOp::Div)?,
            Opcode::Mod => self.binary(BinaryOp::Mod)?,
            Opcode::Equal => self.binary(BinaryOp::Equal)?,
            Opcode::NotEqual => self.binary(BinaryOp::NotEqual)?,
            Opcode::Greater => self.binary(BinaryOp::Greater)?,
            Opcode::GreaterEqual => self.binary(BinaryOp::GreaterEqual)?,
            Opcode::Negate => {
                let value = self.pop()?;
                let result = arith::negate(&value, self.span())?;
                self.push(result)?;
            }
            Opcode::Not => {
                let value = self.pop()?;
                self.push(arith::not(&value))?;
            }

            // ===== Control flow =====
            Opcode::Jump => {
                let target = self.read_u16()?;
                self.current_frame_mut()?.ip = target;
            }
            Opcode::JumpIfFalse => {
                let target = self.read_u16()?;
                if !self.pop()?.is_truthy() {
                    self.current_frame_mut()?.ip = target;
                }
            }

            // ===== Functions =====
            Opcode::Call => {
                let argc = self.read_u8()?;
                self.call_value(argc)?;
            }
            Opcode::ReturnValue => {
                let value = self.pop()?;
                self.return_from_frame(value)?;
            }
            Opcode::Return => self.return_from_frame(Value::Null)?,
            Opcode::Closure => {
                let index = self.read_u16()?;
                let free_count = self.read_u8()?;
                let function = match self.constant(index)? {
                    Value::CompiledFunction(function) => Arc::clone(function),
                    other => {
                        return Err(RuntimeError::InvalidBytecode {
                            msg: format!("closure over non-function constant {}", other.type_name()),
                        })
                    }
                };
                let start = self.captures.len().checked_sub(free_count).ok_or_else(|| {
                    RuntimeError::InvalidBytecode {
                        msg: format!("closure expects {} captured cells", free_count),
                    }
                })?;
                let free = self.captures.split_off(start);
                self.push(Value::Closure(Arc::new(Closure::new(function, free))))?;
            }

            // ===== Collections =====
            Opcode::Array => {
                let count = self.read_u16()?;
                let elements = self.take_top(count)?;
                self.push(Value::array(elements))?;
            }
            Opcode::Hash => {
                let count = self.read_u16()?;
                let items = self.take_top(count)?;
                let mut entries = HashMap::with_capacity(count / 2);
                for pair in items.chunks_exact(2) {
                    entries.insert(self.hash_key(&pair[0])?, pair[1].clone());
                }
                self.push(Value::hash_map(entries))?;
            }
            Opcode::OrderedMap => {
                let count = self.read_u16()?;
                let items = self.take_top(count)?;
                let mut entries = IndexMap::with_capacity(count / 2);
                for pair in items.chunks_exact(2) {
                    entries.insert(self.hash_key(&pair[0])?, pair[1].clone());
                }
                self.push(Value::ordered_map(entries))?;
            }
            Opcode::GetIndex => {
                let index = self.pop()?;
                let target = self.pop()?;
                let value = self.index_get(&target, &index)?;
                self.push(value)?;
            }
            Opcode::SetIndex => {
                let value = self.pop()?;
                let index = self.pop()?;
                let target = self.pop()?;
                self.index_set(&target, &index, value.clone())?;
                self.push(value)?;
            }

            // ===== Stack manipulation =====
            Opcode::Pop => {
                self.last_popped = self.pop()?;
            }
            Opcode::Dup => {
                let value = self.peek()?.clone();
                self.push(value)?;
            }

            // ===== Classes =====
            Opcode::GetProperty => {
                let index = self.read_u16()?;
                let name = self.constant_str(index)?;
                let target = self.pop()?;
                let value = self.property_get(&target, &name)?;
                self.push(value)?;
            }
            Opcode::SetProperty => {
                let index = self.read_u16()?;
                let name = self.constant_str(index)?;
                let value = self.pop()?;
                let target = self.pop()?;
                self.property_set(&target, &name, value.clone())?;
                self.push(value)?;
            }
            Opcode::Invoke => {
                let index = self.read_u16()?;
                let name = self.constant_str(index)?;
                let argc = self.read_u8()?;
                self.invoke(&name, argc)?;
            }
            Opcode::InvokeSuper => {
                let index = self.read_u16()?;
                let name = self.constant_str(index)?;
                let argc = self.read_u8()?;
                self.invoke_super(&name, argc)?;
            }

            // ===== Exceptions =====
            Opcode::TryEnter => {
                let catch = self.read_u16()?;
                let finally = self.read_u16()?;
                self.handlers.push(HandlerRecord::from_operands(
                    catch,
                    finally,
                    self.frames.len(),
                    self.sp,
                ));
            }
            Opcode::FinallyEnd => {
                let target = self.read_u16()?;
                self.handlers.pop();
                self.current_frame_mut()?.ip = target;
            }
            Opcode::Throw => {
                let value = self.pop()?;
                self.throw(value)?;
            }
            Opcode::Rethrow => {
                let pending = self.pop()?;
                let value = self.pop()?;
                if pending.is_truthy() {
                    self.throw(value)?;
                }
            }

            // ===== Concurrency =====
            Opcode::Spawn => {
                let argc = self.read_u8()?;
                self.spawn_task(argc)?;
            }
            Opcode::Channel => {
                let has_capacity = self.read_u8()? != 0;
                let channel = if has_capacity {
                    match self.pop()? {
                        Value::Integer(n) if n >= 0 => Channel::bounded(n as usize),
                        other => {
                            return Err(self.type_error(format!(
                                "Channel capacity must be a non-negative integer, got {}",
                                other
                            )))
                        }
                    }
                } else {
                    Channel::unbuffered()
                };
                self.push(Value::Channel(Arc::new(channel)))?;
            }
            Opcode::Send => {
                let value = self.pop()?;
                let channel = self.pop_channel("send on")?;
                channel
                    .send(value)
                    .map_err(|_| RuntimeError::ChannelClosed { span: self.span() })?;
                self.push(Value::Null)?;
            }
            Opcode::Receive => {
                let channel = self.pop_channel("receive from")?;
                let value = channel.recv();
                self.push(value)?;
            }

            Opcode::Halt => return Ok(Step::Halt),
        }
        Ok(Step::Continue)
    }

    // ===== Calls =====

    /// Call the value sitting below the top `argc` stack slots
    fn call_value(&mut self, argc: usize) -> Result<(), RuntimeError> {
        let slot = self.callee_slot(argc)?;
        match self.stack[slot].clone() {
            Value::Closure(closure) => {
                let expected = closure.function.num_parameters;
                if expected != argc {
                    return Err(RuntimeError::ArityMismatch {
                        name: closure.function.display_name().to_string(),
                        expected,
                        got: argc,
                        span: self.span(),
                    });
                }
                self.push_frame(closure, slot + 1, FrameKind::Function)
            }
            Value::Native(native) => {
                trace!(function = %native.name, argc, "native call");
                let result = native.call(&self.stack[slot + 1..self.sp]);
                self.set_sp(slot);
                match result {
                    Value::Error(err) => {
                        let value = if err.span.is_some() {
                            Value::Error(err)
                        } else {
                            Value::error(err.message.clone(), Some(self.span()))
                        };
                        self.throw(value)
                    }
                    value => self.push(value),
                }
            }
            Value::Class(class) => {
                let instance = Arc::new(Instance::new(
                    Arc::clone(&class),
                    &self.stack[slot + 1..self.sp],
                ));
                let Some(constructor) = class.constructor() else {
                    self.set_sp(slot);
                    return self.push(Value::Instance(instance));
                };
                self.stack[slot] = Value::Instance(Arc::clone(&instance));
                // Constructor parameters need not mirror the properties
                let params = constructor.function.num_parameters;
                if argc > params {
                    self.set_sp(self.sp - (argc - params));
                } else {
                    for _ in argc..params {
                        self.push(Value::Null)?;
                    }
                }
                self.push_frame(constructor, slot, FrameKind::Constructor(instance))
            }
            other => Err(RuntimeError::NotCallable {
                type_name: other.type_name(),
                span: self.span(),
            }),
        }
    }

    /// Call a method with the receiver already in `slot`
    fn call_method(&mut self, method: Arc<Closure>, slot: usize, argc: usize) -> Result<(), RuntimeError> {
        let expected = method.function.num_parameters;
        if expected != argc {
            return Err(RuntimeError::ArityMismatch {
                name: method.function.display_name().to_string(),
                expected,
                got: argc,
                span: self.span(),
            });
        }
        self.push_frame(method, slot, FrameKind::Method)
    }

    /// `receiver.name(args)`: a callable field is called as a plain
    /// function, otherwise the method is looked up along the class chain
    fn invoke(&mut self, name: &str, argc: usize) -> Result<(), RuntimeError> {
        let slot = self.callee_slot(argc)?;
        let (field, class) = match &self.stack[slot] {
            Value::Instance(instance) => (instance.get_field(name), Some(Arc::clone(&instance.class))),
            Value::OrderedMap(map) => (map.read().get(&HashKey::String(name.into())).cloned(), None),
            Value::HashMap(map) => (map.read().get(&HashKey::String(name.into())).cloned(), None),
            other => {
                return Err(self.type_error(format!(
                    "Cannot call method '{}' on {}",
                    name,
                    other.type_name()
                )))
            }
        };

        if let Some(callee) = field.filter(Value::is_callable) {
            self.stack[slot] = callee;
            return self.call_value(argc);
        }
        match class.and_then(|class| class.find_method(name)) {
            Some(method) => self.call_method(method, slot, argc),
            None => {
                self.set_sp(slot);
                self.push(Value::Null)
            }
        }
    }

    /// `super.name(args)`: the enclosing class sits on top of the arguments
    fn invoke_super(&mut self, name: &str, argc: usize) -> Result<(), RuntimeError> {
        let class = match self.pop()? {
            Value::Class(class) => class,
            other => {
                return Err(RuntimeError::InvalidBytecode {
                    msg: format!("super call on {}", other.type_name()),
                })
            }
        };
        let slot = self.callee_slot(argc)?;
        match class.parent().and_then(|parent| parent.find_method(name)) {
            Some(method) => self.call_method(method, slot, argc),
            None => {
                self.set_sp(slot);
                self.push(Value::Null)
            }
        }
    }

    fn push_frame(&mut self, closure: Arc<Closure>, base: usize, kind: FrameKind) -> Result<(), RuntimeError> {
        if self.frames.len() >= self.settings.max_frames {
            return Err(RuntimeError::FrameOverflow {
                limit: self.settings.max_frames,
                span: self.span(),
            });
        }
        let top = base + closure.function.num_locals;
        if top > self.stack.len() {
            return Err(RuntimeError::StackOverflow { span: self.span() });
        }
        trace!(
            function = closure.function.display_name(),
            depth = self.frames.len() + 1,
            "call"
        );
        self.set_sp(top);
        self.frames.push(CallFrame::new(closure, base, kind));
        Ok(())
    }

    fn return_from_frame(&mut self, value: Value) -> Result<(), RuntimeError> {
        self.handlers.discard_frame(self.frames.len());
        let frame = self.frames.pop().ok_or_else(|| RuntimeError::InvalidBytecode {
            msg: "return without a frame".to_string(),
        })?;
        let slot = frame.result_slot();
        let result = match frame.kind {
            FrameKind::Constructor(instance) => Value::Instance(instance),
            FrameKind::Function | FrameKind::Method => value,
        };
        self.set_sp(slot);
        self.push(result)
    }

    // ===== Exceptions =====

    /// Unwind to the innermost handler and continue at its catch or
    /// finally target
    fn throw(&mut self, value: Value) -> Result<(), RuntimeError> {
        let Some(handler) = self.handlers.pop() else {
            return Err(RuntimeError::UncaughtThrow {
                value,
                span: self.span(),
            });
        };
        trace!(value = %value, depth = handler.frame_depth, "throw");

        self.frames.truncate(handler.frame_depth);
        self.set_sp(handler.sp);
        self.push(value)?;
        let target = match (handler.catch_target, handler.finally_target) {
            (Some(catch), _) => catch,
            (None, Some(finally)) => {
                self.push(Value::Boolean(true))?;
                finally
            }
            (None, None) => {
                return Err(RuntimeError::InvalidBytecode {
                    msg: "try region without catch or finally".to_string(),
                })
            }
        };
        self.current_frame_mut()?.ip = target;
        Ok(())
    }

    // ===== Concurrency =====

    /// Start the callee on its own task and push the task's result channel
    fn spawn_task(&mut self, argc: usize) -> Result<(), RuntimeError> {
        let slot = self.callee_slot(argc)?;
        let callee = self.stack[slot].clone();
        if !callee.is_callable() {
            return Err(RuntimeError::NotCallable {
                type_name: callee.type_name(),
                span: self.span(),
            });
        }
        let args = self.take_top(argc)?;
        self.set_sp(slot);

        let result = Arc::new(Channel::bounded(1));
        let sender = Arc::clone(&result);
        let mut child = self.child();
        let id = self.tasks.spawn(move |id| {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| child.run_callable(&callee, &args)));
            let value = match outcome {
                Ok(Ok(value)) => {
                    debug!(task = %id, "task finished");
                    value
                }
                Ok(Err(err)) => {
                    warn!(task = %id, error = %err, "task failed");
                    match err {
                        RuntimeError::UncaughtThrow {
                            value: thrown @ Value::Error(_),
                            ..
                        } => thrown,
                        err => err.to_value(),
                    }
                }
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    warn!(task = %id, panic = %message, "task panicked");
                    Value::error(format!("task panicked: {}", message), None)
                }
            };
            // Sole sender of a one-slot channel: never blocks
            let _ = sender.send(value);
            sender.close();
        });
        debug!(task = %id, argc, "spawned task");
        self.push(Value::Channel(result))
    }

    fn pop_channel(&mut self, action: &str) -> Result<Arc<Channel>, RuntimeError> {
        match self.pop()? {
            Value::Channel(channel) => Ok(channel),
            other => Err(self.type_error(format!("Cannot {} {}", action, other.type_name()))),
        }
    }

    // ===== Indexing & properties =====

    /// Read `target[index]`
    ///
    /// Out-of-range reads yield null. A string index is a byte offset and
    /// yields the whole character starting there, or null when the offset
    /// falls inside a multi-byte character.
    fn index_get(&self, target: &Value, index: &Value) -> Result<Value, RuntimeError> {
        match (target, index) {
            (Value::Array(arr), Value::Integer(i)) => Ok(usize::try_from(*i)
                .ok()
                .and_then(|i| arr.read().get(i).cloned())
                .unwrap_or(Value::Null)),
            (Value::String(s), Value::Integer(i)) => Ok(usize::try_from(*i)
                .ok()
                .and_then(|i| s.get(i..))
                .and_then(|rest| rest.chars().next())
                .map(|c| Value::from(c.to_string()))
                .unwrap_or(Value::Null)),
            (Value::OrderedMap(map), key) => {
                let key = self.hash_key(key)?;
                Ok(map.read().get(&key).cloned().unwrap_or(Value::Null))
            }
            (Value::HashMap(map), key) => {
                let key = self.hash_key(key)?;
                Ok(map.read().get(&key).cloned().unwrap_or(Value::Null))
            }
            (Value::Array(_) | Value::String(_), other) => Err(self.type_error(format!(
                "Index must be an integer, got {}",
                other.type_name()
            ))),
            (other, _) => Err(self.type_error(format!("Cannot index {}", other.type_name()))),
        }
    }

    fn index_set(&self, target: &Value, index: &Value, value: Value) -> Result<(), RuntimeError> {
        match (target, index) {
            (Value::Array(arr), Value::Integer(i)) => {
                let mut arr = arr.write();
                let len = arr.len();
                match usize::try_from(*i).ok().filter(|i| *i < len) {
                    Some(i) => {
                        arr[i] = value;
                        Ok(())
                    }
                    None => Err(RuntimeError::IndexOutOfBounds {
                        index: *i,
                        len,
                        span: self.span(),
                    }),
                }
            }
            (Value::OrderedMap(map), key) => {
                map.write().insert(self.hash_key(key)?, value);
                Ok(())
            }
            (Value::HashMap(map), key) => {
                map.write().insert(self.hash_key(key)?, value);
                Ok(())
            }
            (Value::Array(_), other) => Err(self.type_error(format!(
                "Index must be an integer, got {}",
                other.type_name()
            ))),
            (other, _) => Err(self.type_error(format!(
                "Cannot assign into {}",
                other.type_name()
            ))),
        }
    }

    fn property_get(&self, target: &Value, name: &str) -> Result<Value, RuntimeError> {
        match target {
            Value::Instance(instance) => Ok(instance.get_field(name).unwrap_or(Value::Null)),
            Value::OrderedMap(map) => Ok(map
                .read()
                .get(&HashKey::String(name.into()))
                .cloned()
                .unwrap_or(Value::Null)),
            Value::HashMap(map) => Ok(map
                .read()
                .get(&HashKey::String(name.into()))
                .cloned()
                .unwrap_or(Value::Null)),
            other => Err(self.type_error(format!(
                "Cannot read property '{}' of {}",
                name,
                other.type_name()
            ))),
        }
    }

    fn property_set(&self, target: &Value, name: &str, value: Value) -> Result<(), RuntimeError> {
        match target {
            Value::Instance(instance) => instance.set_field(name, value),
            Value::OrderedMap(map) => {
                map.write().insert(HashKey::String(name.into()), value);
            }
            Value::HashMap(map) => {
                map.write().insert(HashKey::String(name.into()), value);
            }
            other => {
                return Err(self.type_error(format!(
                    "Cannot set property '{}' on {}",
                    name,
                    other.type_name()
                )))
            }
        }
        Ok(())
    }

    fn hash_key(&self, value: &Value) -> Result<HashKey, RuntimeError> {
        value.hash_key().ok_or_else(|| RuntimeError::UnhashableType {
            type_name: value.type_name(),
            span: self.span(),
        })
    }

    // ===== Helper Methods =====

    fn binary(&mut self, op: BinaryOp) -> Result<(), RuntimeError> {
        let b = self.pop()?;
        let a = self.pop()?;
        let result = arith::binary(op, &a, &b, self.span())?;
        self.push(result)
    }

    #[inline(always)]
    fn push(&mut self, value: Value) -> Result<(), RuntimeError> {
        if self.sp >= self.stack.len() {
            return Err(RuntimeError::StackOverflow { span: self.span() });
        }
        self.stack[self.sp] = value;
        self.sp += 1;
        Ok(())
    }

    #[inline(always)]
    fn pop(&mut self) -> Result<Value, RuntimeError> {
        if self.sp == 0 {
            return Err(underflow());
        }
        self.sp -= 1;
        Ok(std::mem::take(&mut self.stack[self.sp]))
    }

    #[inline(always)]
    fn peek(&self) -> Result<&Value, RuntimeError> {
        self.sp
            .checked_sub(1)
            .map(|top| &self.stack[top])
            .ok_or_else(underflow)
    }

    /// Move the stack pointer, nulling any released slots
    fn set_sp(&mut self, sp: usize) {
        if sp < self.sp {
            for slot in &mut self.stack[sp..self.sp] {
                *slot = Value::Null;
            }
        }
        self.sp = sp;
    }

    /// Pop the top `count` values, oldest first
    fn take_top(&mut self, count: usize) -> Result<Vec<Value>, RuntimeError> {
        let start = self.sp.checked_sub(count).ok_or_else(underflow)?;
        let values = self.stack[start..self.sp].iter_mut().map(std::mem::take).collect();
        self.sp = start;
        Ok(values)
    }

    /// Slot of the callee (or receiver) below `argc` arguments
    fn callee_slot(&self, argc: usize) -> Result<usize, RuntimeError> {
        self.sp.checked_sub(argc + 1).ok_or_else(underflow)
    }

    #[inline(always)]
    fn current_frame(&self) -> Result<&CallFrame, RuntimeError> {
        self.frames.last().ok_or_else(no_frame)
    }

    #[inline(always)]
    fn current_frame_mut(&mut self) -> Result<&mut CallFrame, RuntimeError> {
        self.frames.last_mut().ok_or_else(no_frame)
    }

    #[inline(always)]
    fn read_u8(&mut self) -> Result<usize, RuntimeError> {
        let frame = self.current_frame_mut()?;
        let byte = *frame.instructions().get(frame.ip).ok_or_else(truncated)?;
        frame.ip += 1;
        Ok(byte as usize)
    }

    #[inline(always)]
    fn read_u16(&mut self) -> Result<usize, RuntimeError> {
        let frame = self.current_frame_mut()?;
        let value = bytecode::read_u16(frame.instructions(), frame.ip).ok_or_else(truncated)?;
        frame.ip += 2;
        Ok(value as usize)
    }

    /// Read a local index operand, returning it with its stack slot
    fn local_operand(&mut self) -> Result<(usize, usize), RuntimeError> {
        let index = self.read_u8()?;
        let slot = self.current_frame()?.base + index;
        if slot >= self.stack.len() {
            return Err(RuntimeError::InvalidBytecode {
                msg: format!("local {} outside the stack", index),
            });
        }
        Ok((index, slot))
    }

    fn free_cell(&self, index: usize) -> Result<&FreeCell, RuntimeError> {
        self.current_frame()?
            .closure
            .free
            .get(index)
            .ok_or_else(|| RuntimeError::InvalidBytecode {
                msg: format!("free variable {} out of range", index),
            })
    }

    fn constant(&self, index: usize) -> Result<&Value, RuntimeError> {
        self.constants
            .get(index)
            .ok_or_else(|| RuntimeError::InvalidBytecode {
                msg: format!("constant {} out of range", index),
            })
    }

    fn constant_str(&self, index: usize) -> Result<Arc<str>, RuntimeError> {
        match self.constant(index)? {
            Value::String(s) => Ok(Arc::clone(s)),
            other => Err(RuntimeError::InvalidBytecode {
                msg: format!("expected name constant, found {}", other.type_name()),
            }),
        }
    }

    /// Source span of the instruction being executed
    fn span(&self) -> Span {
        self.frames
            .last()
            .and_then(|frame| frame.closure.function.span_at(self.op_offset))
            .unwrap_or_else(Span::dummy)
    }

    fn type_error(&self, msg: String) -> RuntimeError {
        RuntimeError::TypeError {
            msg,
            span: self.span(),
        }
    }
}

impl fmt::Debug for Vm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Vm")
            .field("sp", &self.sp)
            .field("frames", &self.frames.len())
            .field("handlers", &self.handlers.len())
            .field("last_popped", &self.last_popped)
            .finish_non_exhaustive()
    }
}

fn underflow() -> RuntimeError {
    RuntimeError::InvalidBytecode {
        msg: "operand stack underflow".to_string(),
    }
}

fn no_frame() -> RuntimeError {
    RuntimeError::InvalidBytecode {
        msg: "no active frame".to_string(),
    }
}

fn truncated() -> RuntimeError {
    RuntimeError::InvalidBytecode {
        msg: "truncated instruction".to_string(),
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::build::*;
    use crate::ast::Stmt;
    use crate::bytecode::make;
    use crate::compiler::Compiler;

    fn run(statements: Vec<Stmt>) -> Result<Vm, RuntimeError> {
        let natives = Arc::new(NativeRegistry::with_prelude());
        let bytecode = Compiler::new(&natives)
            .compile(&program(statements))
            .expect("compilation failed");
        let mut vm = Vm::new(bytecode, natives);
        vm.run()?;
        Ok(vm)
    }

    fn eval(statements: Vec<Stmt>) -> Value {
        run(statements).expect("run failed").last_popped_value().clone()
    }

    fn raw(instructions: Vec<Vec<u8>>, constants: Vec<Value>) -> Vm {
        let bytecode = Bytecode {
            instructions: instructions.concat(),
            constants,
            debug_info: Vec::new(),
        };
        Vm::new(bytecode, Arc::new(NativeRegistry::new()))
    }

    #[test]
    fn test_arithmetic() {
        assert_eq!(eval(vec![expr(infix("+", int(2), int(3)))]), Value::Integer(5));
        assert_eq!(
            eval(vec![let_("x", int(7)), expr(infix("/", id("x"), int(2)))]),
            Value::Integer(3)
        );
        assert_eq!(
            eval(vec![expr(infix("<", float(1.5), int(2)))]),
            Value::Boolean(true)
        );
    }

    #[test]
    fn test_divide_by_zero_is_runtime_error() {
        let err = run(vec![let_("z", int(0)), expr(infix("/", int(1), id("z")))]).unwrap_err();
        assert!(matches!(err, RuntimeError::DivideByZero { .. }));
    }

    #[test]
    fn test_function_call_and_locals() {
        let value = eval(vec![
            let_(
                "add",
                func(&["a", "b"], vec![let_("sum", infix("+", id("a"), id("b"))), ret(id("sum"))]),
            ),
            expr(call(id("add"), vec![int(40), int(2)])),
        ]);
        assert_eq!(value, Value::Integer(42));
    }

    #[test]
    fn test_recursion() {
        let fib = func(
            &["n"],
            vec![ret(ternary(
                infix("<", id("n"), int(2)),
                id("n"),
                infix(
                    "+",
                    call(id("fib"), vec![infix("-", id("n"), int(1))]),
                    call(id("fib"), vec![infix("-", id("n"), int(2))]),
                ),
            ))],
        );
        let value = eval(vec![let_("fib", fib), expr(call(id("fib"), vec![int(15)]))]);
        assert_eq!(value, Value::Integer(610));
    }

    #[test]
    fn test_arity_mismatch() {
        let err = run(vec![
            let_("f", func(&["a"], vec![])),
            expr(call(id("f"), vec![])),
        ])
        .unwrap_err();
        assert!(matches!(err, RuntimeError::ArityMismatch { expected: 1, got: 0, .. }));
    }

    #[test]
    fn test_frame_overflow_is_not_catchable() {
        let err = run(vec![
            let_("down", func(&[], vec![expr(call(id("down"), vec![]))])),
            try_(
                vec![expr(call(id("down"), vec![]))],
                Some((Some("e"), vec![])),
                None,
            ),
        ])
        .unwrap_err();
        assert!(matches!(err, RuntimeError::FrameOverflow { limit: 1024, .. }));
    }

    #[test]
    fn test_indexing() {
        let value = eval(vec![
            let_("a", array(vec![int(1), int(2)])),
            expr(array(vec![
                index(id("a"), int(1)),
                index(id("a"), int(5)),
                index(id("a"), int(-1)),
                index(string("hey"), int(1)),
            ])),
        ]);
        assert_eq!(value.to_display_string(), r#"[2, null, null, "e"]"#);
    }

    #[test]
    fn test_index_assignment_out_of_bounds() {
        let err = run(vec![
            let_("a", array(vec![int(1)])),
            expr(index_assign(id("a"), int(3), int(0))),
        ])
        .unwrap_err();
        assert!(matches!(err, RuntimeError::IndexOutOfBounds { index: 3, len: 1, .. }));
    }

    #[test]
    fn test_unhashable_key() {
        let err = run(vec![
            let_("m", hash(vec![])),
            expr(index(id("m"), array(vec![]))),
        ])
        .unwrap_err();
        assert!(matches!(err, RuntimeError::UnhashableType { type_name: "array", .. }));
    }

    #[test]
    fn test_not_callable() {
        let err = run(vec![expr(call(int(3), vec![]))]).unwrap_err();
        assert_eq!(err.to_string(), "Calling non-callable value of type integer");
    }

    #[test]
    fn test_native_error_is_thrown() {
        let value = eval(vec![
            let_("caught", null()),
            try_(
                vec![expr(call(id("len"), vec![int(1)]))],
                Some((Some("e"), vec![expr(assign("caught", id("e")))])),
                None,
            ),
            expr(id("caught")),
        ]);
        match value {
            Value::Error(err) => assert_eq!(err.message, "len() not supported for integer"),
            other => panic!("expected error value, got {:?}", other),
        }
    }

    #[test]
    fn test_uncaught_throw() {
        let err = run(vec![throw(string("boom"))]).unwrap_err();
        assert_eq!(err.to_string(), "Uncaught exception: boom");
        assert!(!err.is_catchable());
    }

    #[test]
    fn test_throw_unwinds_frames() {
        let value = eval(vec![
            let_("inner", func(&[], vec![throw(int(5))])),
            let_("outer", func(&[], vec![expr(call(id("inner"), vec![])), ret(int(0))])),
            let_("x", int(0)),
            try_(
                vec![expr(call(id("outer"), vec![]))],
                Some((Some("e"), vec![expr(assign("x", id("e")))])),
                None,
            ),
            expr(infix("+", id("x"), int(1))),
        ]);
        assert_eq!(value, Value::Integer(6));
    }

    #[test]
    fn test_unknown_opcode() {
        let mut vm = raw(vec![vec![0xEE]], vec![]);
        assert_eq!(
            vm.run().unwrap_err(),
            RuntimeError::UnknownOpcode { byte: 0xEE, offset: 0 }
        );
    }

    #[test]
    fn test_stack_overflow() {
        let settings = RuntimeSettings {
            stack_size: 4,
            ..RuntimeSettings::default()
        };
        let mut vm = raw(
            vec![make(Opcode::Array, &[0]); 5],
            vec![],
        )
        .with_settings(settings);
        assert!(matches!(vm.run(), Err(RuntimeError::StackOverflow { .. })));
    }

    #[test]
    fn test_run_callable() {
        let natives = Arc::new(NativeRegistry::with_prelude());
        let mut vm = Vm::new(Bytecode::new(), Arc::clone(&natives));
        let (_, len) = natives.lookup("len").unwrap();
        let result = vm
            .run_callable(&Value::Native(Arc::clone(len)), &[Value::string("four")])
            .unwrap();
        assert_eq!(result, Value::Integer(4));
        assert!(vm.run_callable(&Value::Integer(1), &[]).is_err());
    }

    #[test]
    fn test_globals_shared_between_vms() {
        let natives = Arc::new(NativeRegistry::new());
        let globals = GlobalTable::default();
        let bytecode = Bytecode {
            instructions: [
                make(Opcode::Constant, &[0]),
                make(Opcode::SetGlobal, &[3]),
                make(Opcode::Pop, &[]),
                make(Opcode::Halt, &[]),
            ]
            .concat(),
            constants: vec![Value::Integer(9)],
            debug_info: Vec::new(),
        };
        let mut vm = Vm::new(bytecode, natives).with_globals(globals.clone());
        vm.run().unwrap();
        assert_eq!(globals.get(3), Value::Integer(9));
        assert_eq!(vm.last_popped_value(), &Value::Integer(9));
    }
}
