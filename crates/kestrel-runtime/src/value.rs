//! Runtime value representation
//!
//! Every value the VM touches is a [`Value`]. Scalars and strings are
//! immutable; arrays, maps and instances are shared by reference behind
//! `parking_lot::RwLock` so spawned tasks can hold them. Copies are explicit.

use crate::bytecode::DebugSpan;
use crate::concurrency::Channel;
use crate::span::Span;
use indexmap::IndexMap;
use ordered_float::OrderedFloat;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};
use thiserror::Error;

/// Native function signature
///
/// Receives the call's arguments in order and returns exactly one value.
/// Returning [`Value::Error`] signals failure and is thrown at the call site.
pub type NativeFn = Arc<dyn Fn(&[Value]) -> Value + Send + Sync>;

/// Shared array storage
pub type ArrayRef = Arc<RwLock<Vec<Value>>>;
/// Shared insertion-ordered map storage
pub type OrderedMapRef = Arc<RwLock<IndexMap<HashKey, Value>>>;
/// Shared unordered map storage
pub type HashMapRef = Arc<RwLock<HashMap<HashKey, Value>>>;
/// Captured variable slot of a closure
pub type FreeCell = Arc<Mutex<Value>>;

/// Runtime value
#[derive(Clone, Default)]
pub enum Value {
    Integer(i64),
    Float(f64),
    Boolean(bool),
    #[default]
    Null,
    String(Arc<str>),
    Array(ArrayRef),
    OrderedMap(OrderedMapRef),
    HashMap(HashMapRef),
    Closure(Arc<Closure>),
    CompiledFunction(Arc<CompiledFunction>),
    Native(Arc<NativeFunction>),
    Class(Arc<Class>),
    Instance(Arc<Instance>),
    Channel(Arc<Channel>),
    Error(Arc<ErrorValue>),
}

/// Key of an ordered map or hash map
///
/// Only integers, floats, booleans and strings are hashable.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HashKey {
    Integer(i64),
    Float(OrderedFloat<f64>),
    Boolean(bool),
    String(Arc<str>),
}

impl HashKey {
    pub fn to_value(&self) -> Value {
        match self {
            HashKey::Integer(i) => Value::Integer(*i),
            HashKey::Float(f) => Value::Float(f.into_inner()),
            HashKey::Boolean(b) => Value::Boolean(*b),
            HashKey::String(s) => Value::String(Arc::clone(s)),
        }
    }
}

impl fmt::Display for HashKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_value(&self.to_value(), f, &mut Vec::new(), true)
    }
}

/// Compiled instruction block for one function body
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CompiledFunction {
    pub name: Option<String>,
    pub instructions: Vec<u8>,
    /// Local slots including parameters
    pub num_locals: usize,
    pub num_parameters: usize,
    pub debug_info: Vec<DebugSpan>,
}

impl CompiledFunction {
    /// Source span of the instruction at `offset`
    pub fn span_at(&self, offset: usize) -> Option<Span> {
        let idx = self
            .debug_info
            .partition_point(|d| d.instruction_offset <= offset);
        idx.checked_sub(1).map(|i| self.debug_info[i].span)
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("<anonymous>")
    }
}

/// Function template plus its captured variable cells
///
/// Cells are shared with the frame that declared the variable and with every
/// other closure capturing it, so writes on either side are visible to all.
#[derive(Debug)]
pub struct Closure {
    pub function: Arc<CompiledFunction>,
    pub free: Vec<FreeCell>,
}

impl Closure {
    pub fn new(function: Arc<CompiledFunction>, free: Vec<FreeCell>) -> Self {
        Self { function, free }
    }
}

/// Host function callable from scripts
pub struct NativeFunction {
    pub name: String,
    pub func: NativeFn,
}

impl NativeFunction {
    pub fn new(name: impl Into<String>, func: NativeFn) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }

    pub fn call(&self, args: &[Value]) -> Value {
        (self.func)(args)
    }
}

impl fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NativeFunction({})", self.name)
    }
}

/// Class definition
///
/// The parent is recorded by name at compile time and linked once, before the
/// program runs.
#[derive(Debug)]
pub struct Class {
    pub name: String,
    pub methods: IndexMap<String, Arc<Closure>>,
    pub properties: Vec<String>,
    pub parent_name: Option<String>,
    parent: OnceLock<Arc<Class>>,
}

/// Method names treated as constructors, in lookup order
pub const CONSTRUCTOR_NAMES: [&str; 2] = ["init", "constructor"];

impl Class {
    pub fn new(
        name: impl Into<String>,
        parent_name: Option<String>,
        properties: Vec<String>,
        methods: IndexMap<String, Arc<Closure>>,
    ) -> Self {
        Self {
            name: name.into(),
            methods,
            properties,
            parent_name,
            parent: OnceLock::new(),
        }
    }

    pub fn parent(&self) -> Option<&Arc<Class>> {
        self.parent.get()
    }

    /// Attach the resolved parent. Returns false if already linked.
    pub fn link_parent(&self, parent: Arc<Class>) -> bool {
        self.parent.set(parent).is_ok()
    }

    /// Look a method up on this class, then along the parent chain
    pub fn find_method(&self, name: &str) -> Option<Arc<Closure>> {
        let mut class = self;
        loop {
            if let Some(method) = class.methods.get(name) {
                return Some(Arc::clone(method));
            }
            class = class.parent()?;
        }
    }

    pub fn constructor(&self) -> Option<Arc<Closure>> {
        let mut class = self;
        loop {
            for name in CONSTRUCTOR_NAMES {
                if let Some(method) = class.methods.get(name) {
                    return Some(Arc::clone(method));
                }
            }
            class = class.parent()?;
        }
    }

    /// Declared properties, ancestors first
    pub fn field_names(&self) -> Vec<String> {
        let mut names = match self.parent() {
            Some(parent) => parent.field_names(),
            None => Vec::new(),
        };
        for prop in &self.properties {
            if !names.contains(prop) {
                names.push(prop.clone());
            }
        }
        names
    }
}

/// Object created by calling a class
#[derive(Debug)]
pub struct Instance {
    pub class: Arc<Class>,
    pub fields: RwLock<IndexMap<String, Value>>,
}

impl Instance {
    /// Fresh instance with declared properties bound positionally from `args`
    pub fn new(class: Arc<Class>, args: &[Value]) -> Self {
        let fields = class
            .field_names()
            .into_iter()
            .enumerate()
            .map(|(i, name)| (name, args.get(i).cloned().unwrap_or(Value::Null)))
            .collect();
        Self {
            class,
            fields: RwLock::new(fields),
        }
    }

    pub fn get_field(&self, name: &str) -> Option<Value> {
        self.fields.read().get(name).cloned()
    }

    pub fn set_field(&self, name: &str, value: Value) {
        self.fields.write().insert(name.to_string(), value);
    }
}

/// Error value: thrown by scripts, returned by natives, or built from runtime errors
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorValue {
    pub message: String,
    pub span: Option<Span>,
}

impl Value {
    pub fn string(s: impl AsRef<str>) -> Self {
        Value::String(Arc::from(s.as_ref()))
    }

    pub fn array(values: Vec<Value>) -> Self {
        Value::Array(Arc::new(RwLock::new(values)))
    }

    pub fn ordered_map(entries: IndexMap<HashKey, Value>) -> Self {
        Value::OrderedMap(Arc::new(RwLock::new(entries)))
    }

    pub fn hash_map(entries: HashMap<HashKey, Value>) -> Self {
        Value::HashMap(Arc::new(RwLock::new(entries)))
    }

    pub fn error(message: impl Into<String>, span: Option<Span>) -> Self {
        Value::Error(Arc::new(ErrorValue {
            message: message.into(),
            span,
        }))
    }

    pub fn native(name: impl Into<String>, func: impl Fn(&[Value]) -> Value + Send + Sync + 'static) -> Self {
        Value::Native(Arc::new(NativeFunction::new(name, Arc::new(func))))
    }

    /// Get the type name for error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Integer(_) => "integer",
            Value::Float(_) => "float",
            Value::Boolean(_) => "boolean",
            Value::Null => "null",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::OrderedMap(_) => "ordered_map",
            Value::HashMap(_) => "hash",
            Value::Closure(_) => "closure",
            Value::CompiledFunction(_) => "function",
            Value::Native(_) => "native_function",
            Value::Class(_) => "class",
            Value::Instance(_) => "instance",
            Value::Channel(_) => "channel",
            Value::Error(_) => "error",
        }
    }

    /// `false` and `null` are falsy; everything else is truthy
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Boolean(b) => *b,
            Value::Null => false,
            _ => true,
        }
    }

    pub fn is_callable(&self) -> bool {
        matches!(self, Value::Closure(_) | Value::Native(_) | Value::Class(_))
    }

    /// Key form of this value, if it is hashable
    pub fn hash_key(&self) -> Option<HashKey> {
        match self {
            Value::Integer(i) => Some(HashKey::Integer(*i)),
            Value::Float(f) => Some(HashKey::Float(OrderedFloat(*f))),
            Value::Boolean(b) => Some(HashKey::Boolean(*b)),
            Value::String(s) => Some(HashKey::String(Arc::clone(s))),
            _ => None,
        }
    }

    /// Render for display (strings unquoted)
    pub fn to_display_string(&self) -> String {
        self.to_string()
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::string(s)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(Arc::from(s))
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        values_equal(self, other, &mut Vec::new())
    }
}

/// Address of a shared container, for cycle detection
fn addr<T>(shared: &Arc<T>) -> usize {
    Arc::as_ptr(shared) as usize
}

/// Structural equality
///
/// `open` holds the container pairs currently being compared. Meeting a
/// pair again means both sides recurse the same way, so it counts as equal.
fn values_equal(a: &Value, b: &Value, open: &mut Vec<(usize, usize)>) -> bool {
    match (a, b) {
        (Value::Integer(a), Value::Integer(b)) => a == b,
        (Value::Float(a), Value::Float(b)) => a == b,
        (Value::Integer(a), Value::Float(b)) | (Value::Float(b), Value::Integer(a)) => {
            (*a as f64) == *b
        }
        (Value::Boolean(a), Value::Boolean(b)) => a == b,
        (Value::Null, Value::Null) => true,
        (Value::String(a), Value::String(b)) => a == b,
        (Value::Array(x), Value::Array(y)) => {
            if Arc::ptr_eq(x, y) {
                return true;
            }
            guarded(open, (addr(x), addr(y)), |open| {
                let (x, y) = (x.read_recursive(), y.read_recursive());
                x.len() == y.len() && x.iter().zip(y.iter()).all(|(a, b)| values_equal(a, b, open))
            })
        }
        (Value::OrderedMap(x), Value::OrderedMap(y)) => {
            if Arc::ptr_eq(x, y) {
                return true;
            }
            guarded(open, (addr(x), addr(y)), |open| {
                let (x, y) = (x.read_recursive(), y.read_recursive());
                x.len() == y.len()
                    && x.iter().all(|(k, v)| y.get(k).is_some_and(|w| values_equal(v, w, open)))
            })
        }
        (Value::HashMap(x), Value::HashMap(y)) => {
            if Arc::ptr_eq(x, y) {
                return true;
            }
            guarded(open, (addr(x), addr(y)), |open| {
                let (x, y) = (x.read_recursive(), y.read_recursive());
                x.len() == y.len()
                    && x.iter().all(|(k, v)| y.get(k).is_some_and(|w| values_equal(v, w, open)))
            })
        }
        (Value::Closure(a), Value::Closure(b)) => Arc::ptr_eq(a, b),
        (Value::CompiledFunction(a), Value::CompiledFunction(b)) => Arc::ptr_eq(a, b),
        (Value::Native(a), Value::Native(b)) => Arc::ptr_eq(a, b),
        (Value::Class(a), Value::Class(b)) => Arc::ptr_eq(a, b),
        (Value::Instance(a), Value::Instance(b)) => Arc::ptr_eq(a, b),
        (Value::Channel(a), Value::Channel(b)) => Arc::ptr_eq(a, b),
        (Value::Error(a), Value::Error(b)) => a.message == b.message,
        _ => false,
    }
}

/// Run `compare` with `pair` marked open, or report equal if it already is
fn guarded(
    open: &mut Vec<(usize, usize)>,
    pair: (usize, usize),
    compare: impl FnOnce(&mut Vec<(usize, usize)>) -> bool,
) -> bool {
    if open.contains(&pair) {
        return true;
    }
    open.push(pair);
    let equal = compare(open);
    open.pop();
    equal
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_value(self, f, &mut Vec::new(), false)
    }
}

/// Render `value`, quoting strings that sit inside a container
///
/// `open` holds the containers currently being rendered. A container that
/// contains itself renders as `[...]` (or `{...}` for a hash map) at the
/// point of recursion.
fn write_value(
    value: &Value,
    f: &mut fmt::Formatter<'_>,
    open: &mut Vec<usize>,
    nested: bool,
) -> fmt::Result {
    match value {
        Value::Integer(i) => write!(f, "{}", i),
        Value::Float(n) => write!(f, "{:?}", n),
        Value::Boolean(b) => write!(f, "{}", b),
        Value::Null => write!(f, "null"),
        Value::String(s) if nested => write!(f, "{:?}", s.as_ref()),
        Value::String(s) => write!(f, "{}", s),
        Value::Array(arr) => {
            let id = addr(arr);
            if open.contains(&id) {
                return write!(f, "[...]");
            }
            open.push(id);
            write!(f, "[")?;
            for (i, v) in arr.read().iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write_value(v, f, open, true)?;
            }
            open.pop();
            write!(f, "]")
        }
        Value::OrderedMap(map) => {
            let id = addr(map);
            if open.contains(&id) {
                return write!(f, "[...]");
            }
            open.push(id);
            write!(f, "[")?;
            for (i, (k, v)) in map.read().iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{} => ", k)?;
                write_value(v, f, open, true)?;
            }
            open.pop();
            write!(f, "]")
        }
        Value::HashMap(map) => {
            let id = addr(map);
            if open.contains(&id) {
                return write!(f, "{{...}}");
            }
            open.push(id);
            write!(f, "{{")?;
            for (i, (k, v)) in map.read().iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}: ", k)?;
                write_value(v, f, open, true)?;
            }
            open.pop();
            write!(f, "}}")
        }
        Value::Closure(c) => write!(f, "<fn {}>", c.function.display_name()),
        Value::CompiledFunction(func) => write!(f, "<compiled fn {}>", func.display_name()),
        Value::Native(n) => write!(f, "<native fn {}>", n.name),
        Value::Class(c) => write!(f, "<class {}>", c.name),
        Value::Instance(i) => write!(f, "<{} instance>", i.class.name),
        Value::Channel(ch) => write!(f, "<channel {}>", ch.capacity_label()),
        Value::Error(e) => write!(f, "error: {}", e.message),
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Integer(i) => write!(f, "Integer({})", i),
            Value::Float(n) => write!(f, "Float({:?})", n),
            Value::Boolean(b) => write!(f, "Boolean({})", b),
            Value::Null => write!(f, "Null"),
            Value::String(s) => write!(f, "String({:?})", s.as_ref()),
            Value::Array(_) => write!(f, "Array({})", self),
            Value::OrderedMap(_) => write!(f, "OrderedMap({})", self),
            Value::HashMap(_) => write!(f, "HashMap({})", self),
            Value::Error(e) => write!(f, "Error({:?})", e.message),
            other => write!(f, "{}", other),
        }
    }
}

/// Runtime errors raised by the VM
///
/// Everything except the resource bounds and corrupt bytecode can be caught
/// by a `try` in the task that raised it.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RuntimeError {
    /// Unsupported operand types and similar
    #[error("Type error: {msg}")]
    TypeError { msg: String, span: Span },
    /// Integer or float division/modulo by zero
    #[error("Division by zero")]
    DivideByZero { span: Span },
    /// Array store outside the array
    #[error("Index {index} out of bounds for length {len}")]
    IndexOutOfBounds { index: i64, len: usize, span: Span },
    /// Map key that cannot be hashed
    #[error("Unhashable type: {type_name}")]
    UnhashableType { type_name: &'static str, span: Span },
    /// Call target is not a closure, native function or class
    #[error("Calling non-callable value of type {type_name}")]
    NotCallable { type_name: &'static str, span: Span },
    /// Wrong argument count for a closure
    #[error("Wrong number of arguments to {name}: expected {expected}, got {got}")]
    ArityMismatch {
        name: String,
        expected: usize,
        got: usize,
        span: Span,
    },
    /// Send on a closed channel
    #[error("Send on closed channel")]
    ChannelClosed { span: Span },
    /// A throw with no enclosing handler
    #[error("Uncaught exception: {value}")]
    UncaughtThrow { value: Value, span: Span },
    /// Operand stack exhausted
    #[error("Stack overflow")]
    StackOverflow { span: Span },
    /// Call depth limit exceeded
    #[error("Frame overflow: call depth exceeded {limit}")]
    FrameOverflow { limit: usize, span: Span },
    /// Byte that is not an opcode
    #[error("Unknown opcode 0x{byte:02X} at offset {offset}")]
    UnknownOpcode { byte: u8, offset: usize },
    /// Operand referencing something that does not exist
    #[error("Invalid bytecode: {msg}")]
    InvalidBytecode { msg: String },
}

impl RuntimeError {
    /// Source span, if the error is tied to an instruction
    pub fn span(&self) -> Option<Span> {
        match self {
            RuntimeError::TypeError { span, .. }
            | RuntimeError::DivideByZero { span }
            | RuntimeError::IndexOutOfBounds { span, .. }
            | RuntimeError::UnhashableType { span, .. }
            | RuntimeError::NotCallable { span, .. }
            | RuntimeError::ArityMismatch { span, .. }
            | RuntimeError::ChannelClosed { span }
            | RuntimeError::UncaughtThrow { span, .. }
            | RuntimeError::StackOverflow { span }
            | RuntimeError::FrameOverflow { span, .. } => Some(*span),
            RuntimeError::UnknownOpcode { .. } | RuntimeError::InvalidBytecode { .. } => None,
        }
    }

    /// Whether an enclosing `try` may recover from this error
    pub fn is_catchable(&self) -> bool {
        !matches!(
            self,
            RuntimeError::StackOverflow { .. }
                | RuntimeError::FrameOverflow { .. }
                | RuntimeError::UncaughtThrow { .. }
                | RuntimeError::UnknownOpcode { .. }
                | RuntimeError::InvalidBytecode { .. }
        )
    }

    /// Error value delivered to a catch block
    pub fn to_value(&self) -> Value {
        Value::error(self.to_string(), self.span())
    }
}
