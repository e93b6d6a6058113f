//! Raw-then-metamethod dispatch.
//!
//! Every operator first attempts the raw operation on the operand types and
//! only then consults metamethods, left operand before right. Comparison
//! operators apply the swap/inversion fallback chain; `__index`/`__newindex`
//! table chains are followed iteratively with a depth bound instead of
//! recursion so metatable cycles terminate.

use std::cell::RefCell;
use std::rc::Rc;

use crate::ast::BinaryOp;
use crate::error::{LuaError, LuaResult};
use crate::eval::Interpreter;
use crate::table::Table;
use crate::value::{Number, Value};

/// Bound on `__index`/`__newindex`/`__call` chains.
pub const MAX_META_DEPTH: usize = 2000;

pub fn arith_event(op: BinaryOp) -> &'static str {
    match op {
        BinaryOp::Add => "__add",
        BinaryOp::Subtract => "__sub",
        BinaryOp::Multiply => "__mul",
        BinaryOp::Divide => "__div",
        BinaryOp::FloorDivide => "__idiv",
        BinaryOp::Modulo => "__mod",
        BinaryOp::Power => "__pow",
        BinaryOp::BitAnd => "__band",
        BinaryOp::BitOr => "__bor",
        BinaryOp::BitXor => "__bxor",
        BinaryOp::LeftShift => "__shl",
        BinaryOp::RightShift => "__shr",
        BinaryOp::Concat => "__concat",
        _ => "__add",
    }
}

/// The metatable of a value: tables carry their own, strings share one.
pub fn get_metatable(interp: &Interpreter, value: &Value) -> Option<Rc<RefCell<Table>>> {
    match value {
        Value::Table(t) => t.borrow().metatable.clone(),
        Value::Str(_) => interp.string_metatable(),
        _ => None,
    }
}

pub fn get_metamethod(interp: &Interpreter, value: &Value, event: &str) -> Option<Value> {
    let mt = get_metatable(interp, value)?;
    let handler = mt.borrow().get(&Value::string(event));
    if handler.is_nil() {
        None
    } else {
        Some(handler)
    }
}

/// Binary metamethod lookup: left operand first, then right.
fn binary_metamethod(interp: &Interpreter, a: &Value, b: &Value, event: &str) -> Option<Value> {
    get_metamethod(interp, a, event).or_else(|| get_metamethod(interp, b, event))
}

fn call_binary_meta(
    interp: &mut Interpreter,
    handler: Value,
    a: Value,
    b: Value,
) -> LuaResult<Value> {
    Ok(interp.call_value(handler, vec![a, b])?.collapse())
}

// ---------------------------------------------------------------------------
// Arithmetic
// ---------------------------------------------------------------------------

pub fn arith(interp: &mut Interpreter, op: BinaryOp, a: Value, b: Value) -> LuaResult<Value> {
    if let (Some(x), Some(y)) = (a.to_numeric(), b.to_numeric()) {
        return raw_arith(op, x, y);
    }
    let event = arith_event(op);
    match binary_metamethod(interp, &a, &b, event) {
        Some(handler) => call_binary_meta(interp, handler, a, b),
        None => {
            let bad = if a.to_numeric().is_none() { &a } else { &b };
            Err(LuaError::arith_error(bad.type_name()))
        }
    }
}

fn raw_arith(op: BinaryOp, x: Number, y: Number) -> LuaResult<Value> {
    use Number::{Float, Int};
    let v = match (op, x, y) {
        (BinaryOp::Add, Int(a), Int(b)) => Value::Integer(a.wrapping_add(b)),
        (BinaryOp::Add, a, b) => Value::Float(a.as_float() + b.as_float()),
        (BinaryOp::Subtract, Int(a), Int(b)) => Value::Integer(a.wrapping_sub(b)),
        (BinaryOp::Subtract, a, b) => Value::Float(a.as_float() - b.as_float()),
        (BinaryOp::Multiply, Int(a), Int(b)) => Value::Integer(a.wrapping_mul(b)),
        (BinaryOp::Multiply, a, b) => Value::Float(a.as_float() * b.as_float()),
        // `/` and `^` always work on floats
        (BinaryOp::Divide, a, b) => Value::Float(a.as_float() / b.as_float()),
        (BinaryOp::Power, a, b) => Value::Float(a.as_float().powf(b.as_float())),
        (BinaryOp::FloorDivide, Int(a), Int(b)) => {
            if b == 0 {
                return Err(LuaError::runtime("attempt to perform 'n//0'"));
            }
            Value::Integer(floor_div(a, b))
        }
        (BinaryOp::FloorDivide, a, b) => Value::Float((a.as_float() / b.as_float()).floor()),
        (BinaryOp::Modulo, Int(a), Int(b)) => {
            if b == 0 {
                return Err(LuaError::runtime("attempt to perform 'n%0'"));
            }
            Value::Integer(floor_mod(a, b))
        }
        (BinaryOp::Modulo, a, b) => {
            let (a, b) = (a.as_float(), b.as_float());
            // Result sign follows the divisor.
            let r = a - (a / b).floor() * b;
            Value::Float(r)
        }
        _ => return Err(LuaError::runtime("bad arithmetic operator")),
    };
    Ok(v)
}

/// Integer floor division (quotient rounded toward negative infinity).
fn floor_div(a: i64, b: i64) -> i64 {
    let q = a.wrapping_div(b);
    if a.wrapping_rem(b) != 0 && (a < 0) != (b < 0) {
        q.wrapping_sub(1)
    } else {
        q
    }
}

/// Integer modulo with the sign of the divisor.
fn floor_mod(a: i64, b: i64) -> i64 {
    let r = a.wrapping_rem(b);
    if r != 0 && (r < 0) != (b < 0) {
        r.wrapping_add(b)
    } else {
        r
    }
}

// ---------------------------------------------------------------------------
// Bitwise
// ---------------------------------------------------------------------------

pub fn bitwise(interp: &mut Interpreter, op: BinaryOp, a: Value, b: Value) -> LuaResult<Value> {
    if let (Some(x), Some(y)) = (a.to_integer(), b.to_integer()) {
        let v = match op {
            BinaryOp::BitAnd => x & y,
            BinaryOp::BitOr => x | y,
            BinaryOp::BitXor => x ^ y,
            BinaryOp::LeftShift => shift_left(x, y),
            BinaryOp::RightShift => shift_left(x, y.wrapping_neg()),
            _ => return Err(LuaError::runtime("bad bitwise operator")),
        };
        return Ok(Value::Integer(v));
    }
    let event = arith_event(op);
    match binary_metamethod(interp, &a, &b, event) {
        Some(handler) => call_binary_meta(interp, handler, a, b),
        None => {
            let bad = if a.to_integer().is_none() { &a } else { &b };
            if bad.to_numeric().is_some() {
                Err(LuaError::runtime(
                    "number has no integer representation",
                ))
            } else {
                Err(LuaError::runtime(format!(
                    "attempt to perform bitwise operation on a {} value",
                    bad.type_name()
                )))
            }
        }
    }
}

/// Lua shifts fill with zeros and displacements >= 64 produce 0; a negative
/// displacement shifts the other way.
fn shift_left(x: i64, n: i64) -> i64 {
    if n <= -64 || n >= 64 {
        0
    } else if n >= 0 {
        ((x as u64) << n) as i64
    } else {
        ((x as u64) >> (-n)) as i64
    }
}

pub fn bitwise_not(interp: &mut Interpreter, v: Value) -> LuaResult<Value> {
    if let Some(x) = v.to_integer() {
        return Ok(Value::Integer(!x));
    }
    match get_metamethod(interp, &v, "__bnot") {
        Some(handler) => {
            let clone = v.clone();
            call_binary_meta(interp, handler, v, clone)
        }
        None => Err(LuaError::runtime(format!(
            "attempt to perform bitwise operation on a {} value",
            v.type_name()
        ))),
    }
}

// ---------------------------------------------------------------------------
// Unary minus, length, concat
// ---------------------------------------------------------------------------

pub fn unary_minus(interp: &mut Interpreter, v: Value) -> LuaResult<Value> {
    match v.to_numeric() {
        Some(Number::Int(i)) => Ok(Value::Integer(i.wrapping_neg())),
        Some(Number::Float(f)) => Ok(Value::Float(-f)),
        None => match get_metamethod(interp, &v, "__unm") {
            Some(handler) => {
                let clone = v.clone();
                call_binary_meta(interp, handler, v, clone)
            }
            None => Err(LuaError::arith_error(v.type_name())),
        },
    }
}

pub fn length(interp: &mut Interpreter, v: Value) -> LuaResult<Value> {
    if let Value::Str(s) = &v {
        return Ok(Value::Integer(s.len() as i64));
    }
    if let Some(handler) = get_metamethod(interp, &v, "__len") {
        return Ok(interp.call_value(handler, vec![v])?.collapse());
    }
    match &v {
        Value::Table(t) => Ok(Value::Integer(t.borrow().border())),
        _ => Err(LuaError::runtime(format!(
            "attempt to get length of a {} value",
            v.type_name()
        ))),
    }
}

pub fn concat(interp: &mut Interpreter, a: Value, b: Value) -> LuaResult<Value> {
    let concatable =
        |v: &Value| matches!(v, Value::Str(_) | Value::Integer(_) | Value::Float(_));
    if concatable(&a) && concatable(&b) {
        let mut bytes = match &a {
            Value::Str(s) => s.as_bytes().to_vec(),
            other => other.display_string().into_bytes(),
        };
        match &b {
            Value::Str(s) => bytes.extend_from_slice(s.as_bytes()),
            other => bytes.extend_from_slice(other.display_string().as_bytes()),
        }
        return Ok(Value::string(bytes));
    }
    match binary_metamethod(interp, &a, &b, "__concat") {
        Some(handler) => call_binary_meta(interp, handler, a, b),
        None => {
            let bad = if concatable(&a) { &b } else { &a };
            Err(LuaError::concat_error(bad.type_name()))
        }
    }
}

// ---------------------------------------------------------------------------
// Comparison and equality
// ---------------------------------------------------------------------------

fn raw_number_lt(a: &Value, b: &Value) -> Option<bool> {
    let x = match a {
        Value::Integer(i) => Number::Int(*i),
        Value::Float(f) => Number::Float(*f),
        _ => return None,
    };
    let y = match b {
        Value::Integer(i) => Number::Int(*i),
        Value::Float(f) => Number::Float(*f),
        _ => return None,
    };
    Some(match (x, y) {
        (Number::Int(a), Number::Int(b)) => a < b,
        (a, b) => a.as_float() < b.as_float(),
    })
}

fn raw_number_le(a: &Value, b: &Value) -> Option<bool> {
    let x = match a {
        Value::Integer(i) => Number::Int(*i),
        Value::Float(f) => Number::Float(*f),
        _ => return None,
    };
    let y = match b {
        Value::Integer(i) => Number::Int(*i),
        Value::Float(f) => Number::Float(*f),
        _ => return None,
    };
    Some(match (x, y) {
        (Number::Int(a), Number::Int(b)) => a <= b,
        (a, b) => a.as_float() <= b.as_float(),
    })
}

/// `a < b` with `__lt` fallback.
pub fn less_than(interp: &mut Interpreter, a: Value, b: Value) -> LuaResult<Value> {
    if let Some(r) = raw_number_lt(&a, &b) {
        return Ok(Value::Boolean(r));
    }
    if let (Value::Str(x), Value::Str(y)) = (&a, &b) {
        return Ok(Value::Boolean(x.as_bytes() < y.as_bytes()));
    }
    match binary_metamethod(interp, &a, &b, "__lt") {
        Some(handler) => {
            let r = call_binary_meta(interp, handler, a, b)?;
            Ok(Value::Boolean(r.is_truthy()))
        }
        None => Err(LuaError::compare_error(a.type_name(), b.type_name())),
    }
}

/// `a <= b` with `__le` fallback, then `not (b < a)` via `__lt`.
pub fn less_equal(interp: &mut Interpreter, a: Value, b: Value) -> LuaResult<Value> {
    if let Some(r) = raw_number_le(&a, &b) {
        return Ok(Value::Boolean(r));
    }
    if let (Value::Str(x), Value::Str(y)) = (&a, &b) {
        return Ok(Value::Boolean(x.as_bytes() <= y.as_bytes()));
    }
    if let Some(handler) = binary_metamethod(interp, &a, &b, "__le") {
        let r = call_binary_meta(interp, handler, a, b)?;
        return Ok(Value::Boolean(r.is_truthy()));
    }
    if let Some(handler) = binary_metamethod(interp, &a, &b, "__lt") {
        let r = call_binary_meta(interp, handler, b, a)?;
        return Ok(Value::Boolean(!r.is_truthy()));
    }
    Err(LuaError::compare_error(a.type_name(), b.type_name()))
}

/// `a == b`: raw equality first; `__eq` only when both operands are tables.
pub fn equals(interp: &mut Interpreter, a: Value, b: Value) -> LuaResult<Value> {
    if a.raw_eq(&b) {
        return Ok(Value::Boolean(true));
    }
    if matches!((&a, &b), (Value::Table(_), Value::Table(_))) {
        if let Some(handler) = binary_metamethod(interp, &a, &b, "__eq") {
            let r = call_binary_meta(interp, handler, a, b)?;
            return Ok(Value::Boolean(r.is_truthy()));
        }
    }
    Ok(Value::Boolean(false))
}

// ---------------------------------------------------------------------------
// Indexing
// ---------------------------------------------------------------------------

/// `t[k]` following `__index` chains iteratively.
pub fn index_value(interp: &mut Interpreter, obj: Value, key: Value) -> LuaResult<Value> {
    let mut target = obj;
    for _ in 0..MAX_META_DEPTH {
        if let Value::Table(t) = &target {
            let raw = t.borrow().get(&key);
            if !raw.is_nil() {
                return Ok(raw);
            }
        }
        let handler = get_metamethod(interp, &target, "__index");
        let next = match handler {
            None => {
                return if matches!(target, Value::Table(_)) {
                    Ok(Value::Nil)
                } else {
                    Err(LuaError::type_error("index", target.type_name()))
                };
            }
            Some(Value::Function(f)) => {
                return Ok(interp
                    .call_value(Value::Function(f), vec![target, key])?
                    .collapse());
            }
            Some(next) => next,
        };
        target = next;
    }
    Err(LuaError::runtime("'__index' chain too long; possible loop"))
}

/// `t[k] = v` following `__newindex` chains iteratively.
pub fn newindex_value(
    interp: &mut Interpreter,
    obj: Value,
    key: Value,
    value: Value,
) -> LuaResult<()> {
    let mut target = obj;
    for _ in 0..MAX_META_DEPTH {
        if let Value::Table(t) = &target {
            // An existing raw key is assigned directly.
            let exists = !t.borrow().get(&key).is_nil();
            if exists {
                t.borrow_mut()
                    .set(key, value)
                    .map_err(|e| LuaError::runtime(e.message()))?;
                return Ok(());
            }
        }
        let handler = get_metamethod(interp, &target, "__newindex");
        let next = match handler {
            None => {
                return match &target {
                    Value::Table(t) => t
                        .borrow_mut()
                        .set(key, value)
                        .map_err(|e| LuaError::runtime(e.message())),
                    other => Err(LuaError::type_error("index", other.type_name())),
                };
            }
            Some(Value::Function(f)) => {
                interp.call_value(Value::Function(f), vec![target, key, value])?;
                return Ok(());
            }
            Some(next) => next,
        };
        target = next;
    }
    Err(LuaError::runtime(
        "'__newindex' chain too long; possible loop",
    ))
}

/// `tostring` semantics: `__tostring`, then `__name`, then the default form.
pub fn tostring_value(interp: &mut Interpreter, v: Value) -> LuaResult<Value> {
    if let Some(handler) = get_metamethod(interp, &v, "__tostring") {
        let r = interp.call_value(handler, vec![v])?.collapse();
        return match r {
            Value::Str(_) => Ok(r),
            other => Err(LuaError::runtime(format!(
                "'__tostring' must return a string (got {})",
                other.type_name()
            ))),
        };
    }
    if let Some(mt) = get_metatable(interp, &v) {
        let name = mt.borrow().get(&Value::string("__name"));
        if let Value::Str(n) = name {
            let default = v.display_string();
            let addr = default.rsplit(' ').next().unwrap_or("");
            return Ok(Value::string(format!("{}: {}", n, addr)));
        }
    }
    Ok(Value::string(v.display_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_floor_div_rounds_to_negative_infinity() {
        assert_eq!(floor_div(7, 2), 3);
        assert_eq!(floor_div(-7, 2), -4);
        assert_eq!(floor_div(7, -2), -4);
        assert_eq!(floor_div(-7, -2), 3);
    }

    #[test]
    fn test_floor_mod_sign_follows_divisor() {
        assert_eq!(floor_mod(7, 3), 1);
        assert_eq!(floor_mod(-7, 3), 2);
        assert_eq!(floor_mod(7, -3), -2);
        assert_eq!(floor_mod(-7, -3), -1);
    }

    #[test]
    fn test_shift_semantics() {
        assert_eq!(shift_left(1, 4), 16);
        assert_eq!(shift_left(16, -4), 1);
        assert_eq!(shift_left(1, 64), 0);
        assert_eq!(shift_left(-1, -1), i64::MAX);
    }

    #[test]
    fn test_raw_arith_integer_overflow_wraps() {
        let v = raw_arith(
            BinaryOp::Add,
            Number::Int(i64::MAX),
            Number::Int(1),
        )
        .unwrap();
        assert_eq!(v, Value::Integer(i64::MIN));
    }

    #[test]
    fn test_raw_arith_mixed_promotes_to_float() {
        let v = raw_arith(BinaryOp::Add, Number::Int(1), Number::Float(0.5)).unwrap();
        assert_eq!(v, Value::Float(1.5));
    }

    #[test]
    fn test_integer_division_by_zero_errors() {
        assert!(raw_arith(BinaryOp::FloorDivide, Number::Int(1), Number::Int(0)).is_err());
        assert!(raw_arith(BinaryOp::Modulo, Number::Int(1), Number::Int(0)).is_err());
    }

    #[test]
    fn test_float_division_by_zero_is_inf() {
        let v = raw_arith(BinaryOp::Divide, Number::Int(1), Number::Int(0)).unwrap();
        assert_eq!(v, Value::Float(f64::INFINITY));
    }
}
