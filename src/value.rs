//! Runtime value representation.
//!
//! A `Value` is the tagged union holding every Lua datum. Reference types
//! (strings, tables, functions, coroutines) are shared via `Rc`; tables and
//! coroutines have interior mutability. Equality and hashing follow Lua's
//! raw semantics: numbers compare across the integer/float divide, reference
//! types compare by identity.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use ahash::AHashMap;

use crate::ast::FunctionBody;
use crate::coroutine::Coroutine;
use crate::env::Scope;
use crate::error::LuaResult;
use crate::eval::Interpreter;
use crate::table::Table;
use crate::upvalue::Upvalue;

/// An immutable Lua string: a byte sequence, not Unicode text.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LuaStr {
    bytes: Vec<u8>,
}

impl LuaStr {
    pub fn new(bytes: Vec<u8>) -> Self {
        LuaStr { bytes }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Lossy UTF-8 view for display and host-side string handling.
    pub fn to_str_lossy(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }
}

impl fmt::Display for LuaStr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.bytes))
    }
}

/// Intern pool for literal strings: literals with the same raw bytes share
/// one allocation, so identity comparison is cheap for common keys.
#[derive(Default)]
pub struct Interner {
    pool: AHashMap<Vec<u8>, Rc<LuaStr>>,
}

impl Interner {
    pub fn new() -> Self {
        Interner {
            pool: AHashMap::new(),
        }
    }

    pub fn intern(&mut self, bytes: &[u8]) -> Rc<LuaStr> {
        if let Some(existing) = self.pool.get(bytes) {
            return Rc::clone(existing);
        }
        let s = Rc::new(LuaStr::new(bytes.to_vec()));
        self.pool.insert(bytes.to_vec(), Rc::clone(&s));
        s
    }
}

/// The callable side of the host boundary: builtins receive the interpreter
/// so they can call back into evaluation (pcall, pairs, require, ...).
pub type NativeCallback = dyn Fn(&mut Interpreter, Vec<Value>) -> LuaResult<Value>;

/// A Lua function: a host builtin or a closure over an AST body.
pub enum Function {
    Native {
        name: String,
        func: Rc<NativeCallback>,
    },
    Closure(LuaClosure),
}

impl Function {
    pub fn name(&self) -> Option<&str> {
        match self {
            Function::Native { name, .. } => Some(name),
            Function::Closure(c) => c.name.as_deref(),
        }
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Function::Native { name, .. } => write!(f, "<native function '{}'>", name),
            Function::Closure(c) => match &c.name {
                Some(n) => write!(f, "<function '{}'>", n),
                None => write!(f, "<function>"),
            },
        }
    }
}

/// A user-defined function: AST body plus the captured environment and the
/// upvalue cells joined at construction time.
pub struct LuaClosure {
    pub body: Rc<FunctionBody>,
    pub env: Rc<RefCell<Scope>>,
    pub upvalues: Vec<Upvalue>,
    pub name: Option<String>,
    /// Chunk the body was parsed from, for error positions.
    pub chunk: String,
}

/// Integer-or-float result of numeric coercion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    pub fn as_float(self) -> f64 {
        match self {
            Number::Int(i) => i as f64,
            Number::Float(f) => f,
        }
    }

    pub fn into_value(self) -> Value {
        match self {
            Number::Int(i) => Value::Integer(i),
            Number::Float(f) => Value::Float(f),
        }
    }
}

#[derive(Clone)]
pub enum Value {
    Nil,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    Str(Rc<LuaStr>),
    Table(Rc<RefCell<Table>>),
    Function(Rc<Function>),
    Coroutine(Rc<Coroutine>),
    /// Internal multi-value carrier produced by calls and `...`. Never a
    /// first-class Lua value; every non-expansion context collapses it.
    Multi(Vec<Value>),
}

impl Value {
    pub fn string(s: impl Into<Vec<u8>>) -> Value {
        Value::Str(Rc::new(LuaStr::new(s.into())))
    }

    pub fn native(
        name: impl Into<String>,
        f: impl Fn(&mut Interpreter, Vec<Value>) -> LuaResult<Value> + 'static,
    ) -> Value {
        Value::Function(Rc::new(Function::Native {
            name: name.into(),
            func: Rc::new(f),
        }))
    }

    pub fn new_table() -> Value {
        Value::Table(Rc::new(RefCell::new(Table::new())))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Boolean(_) => "boolean",
            Value::Integer(_) | Value::Float(_) => "number",
            Value::Str(_) => "string",
            Value::Table(_) => "table",
            Value::Function(_) => "function",
            Value::Coroutine(_) => "thread",
            Value::Multi(_) => "multi",
        }
    }

    /// Only `nil` and `false` are falsy.
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Nil | Value::Boolean(false))
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    /// Collapses a multi-value carrier to its first value; the identity
    /// operation for everything else.
    pub fn collapse(self) -> Value {
        match self {
            Value::Multi(mut vals) => {
                if vals.is_empty() {
                    Value::Nil
                } else {
                    vals.swap_remove(0).collapse()
                }
            }
            v => v,
        }
    }

    /// Expands into a value sequence: multi carriers flatten, everything
    /// else is a singleton.
    pub fn into_vec(self) -> Vec<Value> {
        match self {
            Value::Multi(vals) => vals,
            v => vec![v],
        }
    }

    /// Numeric coercion used by arithmetic: numbers pass through, numeric
    /// strings convert. Booleans do not coerce.
    pub fn to_numeric(&self) -> Option<Number> {
        match self {
            Value::Integer(i) => Some(Number::Int(*i)),
            Value::Float(f) => Some(Number::Float(*f)),
            Value::Str(s) => str_to_number(s.as_bytes()),
            _ => None,
        }
    }

    /// Integer coercion for bitwise operators and indices: floats with an
    /// exact integer value convert, others fail.
    pub fn to_integer(&self) -> Option<i64> {
        match self.to_numeric()? {
            Number::Int(i) => Some(i),
            Number::Float(f) => float_to_exact_int(f),
        }
    }

    /// Raw equality (no `__eq`): numbers compare across representations,
    /// strings by content, reference types by identity.
    pub fn raw_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Integer(a), Value::Float(b)) | (Value::Float(b), Value::Integer(a)) => {
                *a as f64 == *b
            }
            (Value::Str(a), Value::Str(b)) => Rc::ptr_eq(a, b) || a.as_bytes() == b.as_bytes(),
            (Value::Table(a), Value::Table(b)) => Rc::ptr_eq(a, b),
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            (Value::Coroutine(a), Value::Coroutine(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Default string conversion (no `__tostring`).
    pub fn display_string(&self) -> String {
        match self {
            Value::Nil => "nil".to_string(),
            Value::Boolean(b) => b.to_string(),
            Value::Integer(i) => i.to_string(),
            Value::Float(f) => float_to_display(*f),
            Value::Str(s) => s.to_str_lossy(),
            Value::Table(t) => format!("table: {:p}", Rc::as_ptr(t)),
            Value::Function(f) => format!("function: {:p}", Rc::as_ptr(f)),
            Value::Coroutine(c) => format!("thread: {:p}", Rc::as_ptr(c)),
            Value::Multi(vals) => match vals.first() {
                Some(v) => v.display_string(),
                None => "nil".to_string(),
            },
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Str(s) => write!(f, "\"{}\"", s),
            Value::Multi(vals) => write!(f, "multi{:?}", vals),
            other => write!(f, "{}", other.display_string()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_string())
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.raw_eq(other)
    }
}

// NaN never enters keyed collections (table writes reject it), so the
// reflexivity requirement holds where Eq matters.
impl Eq for Value {}

impl std::hash::Hash for Value {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        match self {
            Value::Nil => 0u8.hash(state),
            Value::Boolean(b) => {
                1u8.hash(state);
                b.hash(state);
            }
            Value::Integer(i) => {
                2u8.hash(state);
                i.hash(state);
            }
            Value::Float(f) => {
                // Floats with an exact integer value hash like that integer
                // so 1 and 1.0 address the same table slot.
                if let Some(i) = float_to_exact_int(*f) {
                    2u8.hash(state);
                    i.hash(state);
                } else {
                    3u8.hash(state);
                    f.to_bits().hash(state);
                }
            }
            Value::Str(s) => {
                4u8.hash(state);
                s.as_bytes().hash(state);
            }
            Value::Table(t) => {
                5u8.hash(state);
                (Rc::as_ptr(t) as usize).hash(state);
            }
            Value::Function(f) => {
                6u8.hash(state);
                (Rc::as_ptr(f) as usize).hash(state);
            }
            Value::Coroutine(c) => {
                7u8.hash(state);
                (Rc::as_ptr(c) as usize).hash(state);
            }
            Value::Multi(_) => {
                debug_assert!(false, "multi-value carrier used as key");
                8u8.hash(state);
            }
        }
    }
}

/// Exact float-to-integer conversion; fails for NaN, infinities, and values
/// with a fractional part or outside the i64 range.
pub fn float_to_exact_int(f: f64) -> Option<i64> {
    if f.is_finite() && f.floor() == f && f >= -(2f64.powi(63)) && f < 2f64.powi(63) {
        Some(f as i64)
    } else {
        None
    }
}

/// Lua's string-to-number conversion: optional sign, decimal or hex,
/// integer or float, surrounded by optional whitespace.
pub fn str_to_number(bytes: &[u8]) -> Option<Number> {
    let text = std::str::from_utf8(bytes).ok()?.trim();
    if text.is_empty() {
        return None;
    }
    let (negative, digits) = match text.as_bytes()[0] {
        b'-' => (true, &text[1..]),
        b'+' => (false, &text[1..]),
        _ => (false, text),
    };
    if digits.len() > 2 && (digits.starts_with("0x") || digits.starts_with("0X")) {
        let mut val: u64 = 0;
        for c in digits[2..].bytes() {
            let d = match c {
                b'0'..=b'9' => (c - b'0') as u64,
                b'a'..=b'f' => (c - b'a' + 10) as u64,
                b'A'..=b'F' => (c - b'A' + 10) as u64,
                _ => return None,
            };
            val = val.wrapping_mul(16).wrapping_add(d);
        }
        let i = val as i64;
        return Some(Number::Int(if negative { i.wrapping_neg() } else { i }));
    }
    if let Ok(i) = digits.parse::<i64>() {
        return Some(Number::Int(if negative { i.wrapping_neg() } else { i }));
    }
    match digits.parse::<f64>() {
        // reject "inf"/"nan" spellings; Lua only accepts numerals
        Ok(f) if digits.bytes().any(|b| b.is_ascii_digit()) => {
            Some(Number::Float(if negative { -f } else { f }))
        }
        _ => None,
    }
}

/// Float display following Lua's `%.14g`: integral floats keep a trailing
/// `.0`, non-integral values print with up to 14 significant digits.
pub fn float_to_display(f: f64) -> String {
    if f.is_nan() {
        return "nan".to_string();
    }
    if f.is_infinite() {
        return if f < 0.0 { "-inf" } else { "inf" }.to_string();
    }
    if f.floor() == f && f.abs() < 1e15 {
        return format!("{:.1}", f);
    }
    format!("{}", f)
}
