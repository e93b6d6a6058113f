//! The table library.

use super::validation;
use crate::error::{LuaError, LuaResult};
use crate::eval::Interpreter;
use crate::value::Value;

/// `table.insert(t, [pos,] v)`
pub fn lua_insert(_interp: &mut Interpreter, args: Vec<Value>) -> LuaResult<Value> {
    validation::check_arity("insert", &args, 2)?;
    let t = validation::to_table("insert", 1, &args[0])?;
    let len = t.borrow().border();
    match args.len() {
        2 => {
            t.borrow_mut()
                .set(Value::Integer(len + 1), args[1].clone())
                .map_err(|e| LuaError::runtime(e.message()))?;
        }
        _ => {
            let pos = validation::to_int("insert", 2, &args[1])?;
            if pos < 1 || pos > len + 1 {
                return Err(LuaError::runtime(
                    "bad argument #2 to 'insert' (position out of bounds)",
                ));
            }
            // Shift the tail up.
            let mut i = len;
            while i >= pos {
                let v = t.borrow().get(&Value::Integer(i));
                t.borrow_mut()
                    .set(Value::Integer(i + 1), v)
                    .map_err(|e| LuaError::runtime(e.message()))?;
                i -= 1;
            }
            t.borrow_mut()
                .set(Value::Integer(pos), args[2].clone())
                .map_err(|e| LuaError::runtime(e.message()))?;
        }
    }
    Ok(Value::Multi(Vec::new()))
}

/// `table.remove(t [, pos])`
pub fn lua_remove(_interp: &mut Interpreter, args: Vec<Value>) -> LuaResult<Value> {
    validation::check_arity("remove", &args, 1)?;
    let t = validation::to_table("remove", 1, &args[0])?;
    let len = t.borrow().border();
    let pos = validation::opt_int("remove", 2, &args, len)?;
    if len == 0 && args.len() < 2 {
        return Ok(Value::Nil);
    }
    if len > 0 && (pos < 1 || pos > len + 1) {
        return Err(LuaError::runtime(
            "bad argument #2 to 'remove' (position out of bounds)",
        ));
    }
    let removed = t.borrow().get(&Value::Integer(pos));
    let mut i = pos;
    while i < len {
        let v = t.borrow().get(&Value::Integer(i + 1));
        t.borrow_mut()
            .set(Value::Integer(i), v)
            .map_err(|e| LuaError::runtime(e.message()))?;
        i += 1;
    }
    if pos <= len {
        t.borrow_mut()
            .set(Value::Integer(len), Value::Nil)
            .map_err(|e| LuaError::runtime(e.message()))?;
    }
    Ok(removed)
}

/// `table.concat(t [, sep [, i [, j]]])`
pub fn lua_concat(_interp: &mut Interpreter, args: Vec<Value>) -> LuaResult<Value> {
    validation::check_arity("concat", &args, 1)?;
    let t = validation::to_table("concat", 1, &args[0])?;
    let sep = match validation::arg(&args, 2) {
        Value::Nil => Vec::new(),
        v => validation::to_str("concat", 2, &v)?.as_bytes().to_vec(),
    };
    let i = validation::opt_int("concat", 3, &args, 1)?;
    let j = validation::opt_int("concat", 4, &args, t.borrow().border())?;

    let mut out: Vec<u8> = Vec::new();
    let mut k = i;
    while k <= j {
        let v = t.borrow().get(&Value::Integer(k));
        match &v {
            Value::Str(s) => out.extend_from_slice(s.as_bytes()),
            Value::Integer(_) | Value::Float(_) => {
                out.extend_from_slice(v.display_string().as_bytes())
            }
            other => {
                return Err(LuaError::runtime(format!(
                    "invalid value (at index {}) in table for 'concat' (got {})",
                    k,
                    other.type_name()
                )))
            }
        }
        if k < j {
            out.extend_from_slice(&sep);
        }
        k += 1;
    }
    Ok(Value::string(out))
}

/// `table.unpack(t [, i [, j]])`
pub fn lua_unpack(_interp: &mut Interpreter, args: Vec<Value>) -> LuaResult<Value> {
    validation::check_arity("unpack", &args, 1)?;
    let t = validation::to_table("unpack", 1, &args[0])?;
    let i = validation::opt_int("unpack", 2, &args, 1)?;
    let j = validation::opt_int("unpack", 3, &args, t.borrow().border())?;
    if j - i >= 1_000_000 {
        return Err(LuaError::runtime("too many results to unpack"));
    }
    let mut out = Vec::new();
    let mut k = i;
    while k <= j {
        out.push(t.borrow().get(&Value::Integer(k)));
        k += 1;
    }
    Ok(Value::Multi(out))
}

/// `table.pack(...)`: a new table with the arguments and field `n`.
pub fn lua_pack(_interp: &mut Interpreter, args: Vec<Value>) -> LuaResult<Value> {
    let t = Value::new_table();
    if let Value::Table(tref) = &t {
        let mut tb = tref.borrow_mut();
        for (i, v) in args.iter().enumerate() {
            tb.set(Value::Integer(i as i64 + 1), v.clone())
                .map_err(|e| LuaError::runtime(e.message()))?;
        }
        tb.set(Value::string("n"), Value::Integer(args.len() as i64))
            .map_err(|e| LuaError::runtime(e.message()))?;
    }
    Ok(t)
}

/// `table.sort(t [, comp])`: simple insertion-based sort through the
/// comparison protocol, stable enough for the usual cases.
pub fn lua_sort(interp: &mut Interpreter, args: Vec<Value>) -> LuaResult<Value> {
    validation::check_arity("sort", &args, 1)?;
    let t = validation::to_table("sort", 1, &args[0])?;
    let comp = validation::arg(&args, 2);
    let len = t.borrow().border();

    let mut items: Vec<Value> = (1..=len)
        .map(|i| t.borrow().get(&Value::Integer(i)))
        .collect();

    // Insertion sort: comparisons may run arbitrary Lua code, so the sort
    // must tolerate re-entry and report comparison errors.
    let mut i = 1;
    while i < items.len() {
        let mut j = i;
        while j > 0 {
            let should_swap = lua_sort_lt(interp, &comp, &items[j], &items[j - 1])?;
            if !should_swap {
                break;
            }
            items.swap(j, j - 1);
            j -= 1;
        }
        i += 1;
    }

    for (idx, v) in items.into_iter().enumerate() {
        t.borrow_mut()
            .set(Value::Integer(idx as i64 + 1), v)
            .map_err(|e| LuaError::runtime(e.message()))?;
    }
    Ok(Value::Multi(Vec::new()))
}

fn lua_sort_lt(
    interp: &mut Interpreter,
    comp: &Value,
    a: &Value,
    b: &Value,
) -> LuaResult<bool> {
    match comp {
        Value::Nil => {
            let r = crate::meta::less_than(interp, a.clone(), b.clone())?;
            Ok(r.is_truthy())
        }
        f => Ok(interp
            .call_value(f.clone(), vec![a.clone(), b.clone()])?
            .collapse()
            .is_truthy()),
    }
}
