//! Argument validation helpers shared by the stdlib.
//!
//! All checks produce Lua-shaped messages ("bad argument #n to 'f' (...)")
//! so builtin errors read like stock Lua's.

use std::cell::RefCell;
use std::rc::Rc;

use crate::error::{LuaError, LuaResult};
use crate::table::Table;
use crate::value::{LuaStr, Number, Value};

/// The `i`-th argument (1-based), nil when absent.
pub fn arg(args: &[Value], i: usize) -> Value {
    args.get(i - 1).cloned().unwrap_or(Value::Nil)
}

/// Requires at least `min` arguments.
pub fn check_arity(name: &str, args: &[Value], min: usize) -> LuaResult<()> {
    if args.len() < min {
        return Err(LuaError::bad_argument(
            args.len() + 1,
            name,
            "value",
            "no value",
        ));
    }
    Ok(())
}

pub fn to_table(name: &str, i: usize, v: &Value) -> LuaResult<Rc<RefCell<Table>>> {
    match v {
        Value::Table(t) => Ok(Rc::clone(t)),
        other => Err(LuaError::bad_argument(i, name, "table", other.type_name())),
    }
}

/// String argument; numbers coerce the way the string library accepts them.
pub fn to_str(name: &str, i: usize, v: &Value) -> LuaResult<Rc<LuaStr>> {
    match v {
        Value::Str(s) => Ok(Rc::clone(s)),
        Value::Integer(_) | Value::Float(_) => {
            Ok(Rc::new(LuaStr::new(v.display_string().into_bytes())))
        }
        other => Err(LuaError::bad_argument(i, name, "string", other.type_name())),
    }
}

pub fn to_float(name: &str, i: usize, v: &Value) -> LuaResult<f64> {
    match v.to_numeric() {
        Some(n) => Ok(n.as_float()),
        None => Err(LuaError::bad_argument(i, name, "number", v.type_name())),
    }
}

/// Integer argument; floats must have an exact integer value.
pub fn to_int(name: &str, i: usize, v: &Value) -> LuaResult<i64> {
    match v.to_numeric() {
        Some(Number::Int(n)) => Ok(n),
        Some(Number::Float(f)) => crate::value::float_to_exact_int(f).ok_or_else(|| {
            LuaError::runtime(format!(
                "bad argument #{} to '{}' (number has no integer representation)",
                i, name
            ))
        }),
        None => Err(LuaError::bad_argument(i, name, "number", v.type_name())),
    }
}

pub fn opt_int(name: &str, i: usize, args: &[Value], default: i64) -> LuaResult<i64> {
    match arg(args, i) {
        Value::Nil => Ok(default),
        v => to_int(name, i, &v),
    }
}

pub fn to_function(name: &str, i: usize, v: &Value) -> LuaResult<Value> {
    match v {
        Value::Function(_) => Ok(v.clone()),
        other => Err(LuaError::bad_argument(
            i,
            name,
            "function",
            other.type_name(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arg_defaults_to_nil() {
        assert_eq!(arg(&[], 1), Value::Nil);
        assert_eq!(arg(&[Value::Integer(1)], 1), Value::Integer(1));
    }

    #[test]
    fn test_check_arity_message() {
        let err = check_arity("type", &[], 1).unwrap_err();
        assert!(err.message().contains("bad argument #1 to 'type'"));
    }

    #[test]
    fn test_to_str_coerces_numbers() {
        let s = to_str("len", 1, &Value::Integer(42)).unwrap();
        assert_eq!(s.as_bytes(), b"42");
        assert!(to_str("len", 1, &Value::Nil).is_err());
    }

    #[test]
    fn test_to_int_rejects_fractions() {
        assert_eq!(to_int("abs", 1, &Value::Float(3.0)).unwrap(), 3);
        assert!(to_int("abs", 1, &Value::Float(3.5)).is_err());
    }
}
