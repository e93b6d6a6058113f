//! The basic library: print, type, conversion, iteration, raw access,
//! metatables, protected calls, load, and require.

use std::io::Write;
use std::rc::Rc;

use log::debug;

use super::validation;
use crate::chunk::{check_mode, LoadMode};
use crate::error::{LuaError, LuaResult};
use crate::eval::Interpreter;
use crate::meta;
use crate::value::Value;

pub fn lua_print(interp: &mut Interpreter, args: Vec<Value>) -> LuaResult<Value> {
    let mut pieces = Vec::with_capacity(args.len());
    for v in args {
        let s = meta::tostring_value(interp, v)?;
        pieces.push(s.display_string());
    }
    let mut out = std::io::stdout().lock();
    let _ = writeln!(out, "{}", pieces.join("\t"));
    Ok(Value::Multi(Vec::new()))
}

pub fn lua_type(_interp: &mut Interpreter, args: Vec<Value>) -> LuaResult<Value> {
    validation::check_arity("type", &args, 1)?;
    Ok(Value::string(args[0].type_name()))
}

pub fn lua_tostring(interp: &mut Interpreter, args: Vec<Value>) -> LuaResult<Value> {
    validation::check_arity("tostring", &args, 1)?;
    meta::tostring_value(interp, args[0].clone())
}

pub fn lua_tonumber(_interp: &mut Interpreter, args: Vec<Value>) -> LuaResult<Value> {
    validation::check_arity("tonumber", &args, 1)?;
    match validation::arg(&args, 2) {
        Value::Nil => Ok(match args[0].to_numeric() {
            Some(n) => n.into_value(),
            None => Value::Nil,
        }),
        base_v => {
            let base = validation::to_int("tonumber", 2, &base_v)?;
            if !(2..=36).contains(&base) {
                return Err(LuaError::runtime(
                    "bad argument #2 to 'tonumber' (base out of range)",
                ));
            }
            let s = validation::to_str("tonumber", 1, &args[0])?;
            let text = s.to_str_lossy();
            let text = text.trim();
            match i64::from_str_radix(text, base as u32) {
                Ok(i) => Ok(Value::Integer(i)),
                Err(_) => Ok(Value::Nil),
            }
        }
    }
}

pub fn lua_ipairs(_interp: &mut Interpreter, args: Vec<Value>) -> LuaResult<Value> {
    validation::check_arity("ipairs", &args, 1)?;
    let iter = Value::native("ipairs iterator", |interp: &mut Interpreter, args: Vec<Value>| {
        let t = validation::arg(&args, 1);
        let i = validation::to_int("ipairs", 2, &validation::arg(&args, 2))?;
        let next_i = i + 1;
        let v = meta::index_value(interp, t, Value::Integer(next_i))?;
        if v.is_nil() {
            Ok(Value::Nil)
        } else {
            Ok(Value::Multi(vec![Value::Integer(next_i), v]))
        }
    });
    Ok(Value::Multi(vec![
        iter,
        args[0].clone(),
        Value::Integer(0),
    ]))
}

pub fn lua_pairs(interp: &mut Interpreter, args: Vec<Value>) -> LuaResult<Value> {
    validation::check_arity("pairs", &args, 1)?;
    if let Some(handler) = meta::get_metamethod(interp, &args[0], "__pairs") {
        let mut results = interp
            .call_value(handler, vec![args[0].clone()])?
            .into_vec();
        results.resize(3, Value::Nil);
        return Ok(Value::Multi(results));
    }
    validation::to_table("pairs", 1, &args[0])?;
    Ok(Value::Multi(vec![
        Value::native("next", lua_next),
        args[0].clone(),
        Value::Nil,
    ]))
}

pub fn lua_next(_interp: &mut Interpreter, args: Vec<Value>) -> LuaResult<Value> {
    validation::check_arity("next", &args, 1)?;
    let t = validation::to_table("next", 1, &args[0])?;
    let key = validation::arg(&args, 2);
    let result = t.borrow().next_entry(&key);
    match result {
        Some((k, v)) => Ok(Value::Multi(vec![k, v])),
        None => Ok(Value::Nil),
    }
}

pub fn lua_select(_interp: &mut Interpreter, args: Vec<Value>) -> LuaResult<Value> {
    validation::check_arity("select", &args, 1)?;
    let rest = &args[1..];
    if let Value::Str(s) = &args[0] {
        if s.as_bytes() == b"#" {
            return Ok(Value::Integer(rest.len() as i64));
        }
    }
    let n = validation::to_int("select", 1, &args[0])?;
    let start = if n < 0 {
        let from_end = rest.len() as i64 + n;
        if from_end < 0 {
            return Err(LuaError::runtime(
                "bad argument #1 to 'select' (index out of range)",
            ));
        }
        from_end as usize
    } else if n == 0 {
        return Err(LuaError::runtime(
            "bad argument #1 to 'select' (index out of range)",
        ));
    } else {
        (n as usize - 1).min(rest.len())
    };
    Ok(Value::Multi(rest[start..].to_vec()))
}

pub fn lua_rawget(_interp: &mut Interpreter, args: Vec<Value>) -> LuaResult<Value> {
    validation::check_arity("rawget", &args, 2)?;
    let t = validation::to_table("rawget", 1, &args[0])?;
    let v = t.borrow().get(&args[1]);
    Ok(v)
}

pub fn lua_rawset(_interp: &mut Interpreter, args: Vec<Value>) -> LuaResult<Value> {
    validation::check_arity("rawset", &args, 3)?;
    let t = validation::to_table("rawset", 1, &args[0])?;
    t.borrow_mut()
        .set(args[1].clone(), args[2].clone())
        .map_err(|e| LuaError::runtime(e.message()))?;
    Ok(args[0].clone())
}

pub fn lua_rawequal(_interp: &mut Interpreter, args: Vec<Value>) -> LuaResult<Value> {
    validation::check_arity("rawequal", &args, 2)?;
    Ok(Value::Boolean(args[0].raw_eq(&args[1])))
}

pub fn lua_rawlen(_interp: &mut Interpreter, args: Vec<Value>) -> LuaResult<Value> {
    validation::check_arity("rawlen", &args, 1)?;
    match &args[0] {
        Value::Str(s) => Ok(Value::Integer(s.len() as i64)),
        Value::Table(t) => Ok(Value::Integer(t.borrow().border())),
        other => Err(LuaError::bad_argument(
            1,
            "rawlen",
            "table or string",
            other.type_name(),
        )),
    }
}

pub fn lua_assert(_interp: &mut Interpreter, args: Vec<Value>) -> LuaResult<Value> {
    validation::check_arity("assert", &args, 1)?;
    if args[0].is_truthy() {
        return Ok(Value::Multi(args));
    }
    match validation::arg(&args, 2) {
        Value::Nil => Err(LuaError::runtime("assertion failed!")),
        msg => Err(LuaError::from_value(msg)),
    }
}

/// `error(msg, level)`: string messages at level > 0 get a position prefix
/// from the `level`-th caller; level 0 suppresses rewriting.
pub fn lua_error(interp: &mut Interpreter, args: Vec<Value>) -> LuaResult<Value> {
    let payload = validation::arg(&args, 1);
    let level = validation::opt_int("error", 2, &args, 1)?;
    let payload = match (&payload, level) {
        (Value::Str(s), l) if l > 0 => match interp.frame_location(l as usize) {
            Some((chunk, line)) => {
                Value::string(format!("{}:{}: {}", chunk, line, s.to_str_lossy()))
            }
            None => payload.clone(),
        },
        _ => payload,
    };
    Err(LuaError::from_value(payload).with_traceback(interp.traceback_snapshot()))
}

/// `pcall(f, ...)`: errors become `(false, err)`; the close-cancellation
/// signal passes through.
pub fn lua_pcall(interp: &mut Interpreter, mut args: Vec<Value>) -> LuaResult<Value> {
    validation::check_arity("pcall", &args, 1)?;
    let f = args.remove(0);
    match interp.call_value(f, args) {
        Ok(v) => {
            let mut out = vec![Value::Boolean(true)];
            out.extend(v.into_vec());
            Ok(Value::Multi(out))
        }
        Err(e) if e.is_cancelled() => Err(e),
        Err(e) => Ok(Value::Multi(vec![Value::Boolean(false), e.payload()])),
    }
}

/// `xpcall(f, handler, ...)`: the handler maps the error payload; a failing
/// handler yields a recursive-error message instead of unwinding further.
pub fn lua_xpcall(interp: &mut Interpreter, mut args: Vec<Value>) -> LuaResult<Value> {
    validation::check_arity("xpcall", &args, 2)?;
    let f = args.remove(0);
    let handler = validation::to_function("xpcall", 2, &args.remove(0))?;
    match interp.call_value(f, args) {
        Ok(v) => {
            let mut out = vec![Value::Boolean(true)];
            out.extend(v.into_vec());
            Ok(Value::Multi(out))
        }
        Err(e) if e.is_cancelled() => Err(e),
        Err(e) => {
            let mapped = match interp.call_value(handler, vec![e.payload()]) {
                Ok(v) => v.collapse(),
                Err(_) => Value::string("error in error handling"),
            };
            Ok(Value::Multi(vec![Value::Boolean(false), mapped]))
        }
    }
}

pub fn lua_setmetatable(interp: &mut Interpreter, args: Vec<Value>) -> LuaResult<Value> {
    validation::check_arity("setmetatable", &args, 2)?;
    let t = validation::to_table("setmetatable", 1, &args[0])?;
    if let Some(mt) = meta::get_metatable(interp, &args[0]) {
        if !mt.borrow().get(&Value::string("__metatable")).is_nil() {
            return Err(LuaError::runtime("cannot change a protected metatable"));
        }
    }
    match &args[1] {
        Value::Table(mt) => {
            t.borrow_mut().metatable = Some(Rc::clone(mt));
        }
        Value::Nil => {
            t.borrow_mut().metatable = None;
        }
        other => {
            return Err(LuaError::bad_argument(
                2,
                "setmetatable",
                "nil or table",
                other.type_name(),
            ))
        }
    }
    Ok(args[0].clone())
}

pub fn lua_getmetatable(interp: &mut Interpreter, args: Vec<Value>) -> LuaResult<Value> {
    validation::check_arity("getmetatable", &args, 1)?;
    match meta::get_metatable(interp, &args[0]) {
        Some(mt) => {
            let protected = mt.borrow().get(&Value::string("__metatable"));
            if !protected.is_nil() {
                Ok(protected)
            } else {
                Ok(Value::Table(mt))
            }
        }
        None => Ok(Value::Nil),
    }
}

/// `load(chunk, chunkname, mode, env)`; failures are returned as
/// `nil, message` rather than raised.
pub fn lua_load(interp: &mut Interpreter, args: Vec<Value>) -> LuaResult<Value> {
    validation::check_arity("load", &args, 1)?;

    let source: Vec<u8> = match &args[0] {
        Value::Str(s) => s.as_bytes().to_vec(),
        Value::Function(_) => {
            // A reader function is called repeatedly until it returns nil
            // or an empty piece.
            let mut buf = Vec::new();
            loop {
                let piece = interp.call_value(args[0].clone(), Vec::new())?.collapse();
                match piece {
                    Value::Nil => break,
                    Value::Str(s) => {
                        if s.is_empty() {
                            break;
                        }
                        buf.extend_from_slice(s.as_bytes());
                    }
                    other => {
                        return Ok(Value::Multi(vec![
                            Value::Nil,
                            Value::string(format!(
                                "reader function must return a string (got {})",
                                other.type_name()
                            )),
                        ]))
                    }
                }
            }
            buf
        }
        other => {
            return Err(LuaError::bad_argument(
                1,
                "load",
                "string or function",
                other.type_name(),
            ))
        }
    };

    let chunk_name = match validation::arg(&args, 2) {
        Value::Nil => "=(load)".to_string(),
        v => validation::to_str("load", 2, &v)?.to_str_lossy(),
    };
    let mode = match validation::arg(&args, 3) {
        Value::Nil => LoadMode::Both,
        v => {
            let s = validation::to_str("load", 3, &v)?.to_str_lossy();
            match LoadMode::parse(&s) {
                Some(m) => m,
                None => {
                    return Err(LuaError::runtime(format!(
                        "bad argument #3 to 'load' (invalid mode '{}')",
                        s
                    )))
                }
            }
        }
    };
    let env = match validation::arg(&args, 4) {
        Value::Nil => None,
        v => Some(v),
    };

    if let Err(e) = check_mode(mode, &source, &chunk_name) {
        return Ok(Value::Multi(vec![Value::Nil, e.payload()]));
    }
    match interp.load_source(&source, &chunk_name, env) {
        Ok(closure) => Ok(closure),
        Err(e) => Ok(Value::Multi(vec![Value::Nil, e.payload()])),
    }
}

/// `require(name)`: cache, resolve through the loader templates, run the
/// module chunk, cache its result.
pub fn lua_require(interp: &mut Interpreter, args: Vec<Value>) -> LuaResult<Value> {
    validation::check_arity("require", &args, 1)?;
    let name = match &args[0] {
        Value::Str(s) => s.to_str_lossy(),
        other => {
            return Err(LuaError::bad_argument(
                1,
                "require",
                "string",
                other.type_name(),
            ))
        }
    };

    if let Some(cached) = interp.shared.loader.borrow().get_loaded(&name) {
        return Ok(cached);
    }

    let path = interp
        .shared
        .loader
        .borrow()
        .resolve_module(&name)
        .ok_or_else(|| {
            let tried = interp.shared.loader.borrow().tried_paths(&name);
            LuaError::runtime(format!("module '{}' not found:{}", name, tried))
        })?;

    if !interp.shared.loader.borrow_mut().begin_loading(&name) {
        return Err(LuaError::runtime(format!(
            "loop or previous error loading module '{}'",
            name
        )));
    }
    debug!("loading module '{}' from {}", name, path.display());

    let run: LuaResult<Value> = (|| {
        let source = std::fs::read(&path).map_err(|e| {
            LuaError::runtime(format!("cannot open {}: {}", path.display(), e))
        })?;
        let chunk_name = format!("@{}", path.display());
        let closure = interp.load_source(&source, &chunk_name, None)?;
        let results = interp
            .call_value(closure, vec![Value::string(name.clone())])?
            .into_vec();
        Ok(results.into_iter().next().unwrap_or(Value::Nil))
    })();

    interp.shared.loader.borrow_mut().end_loading(&name);
    let result = run?;
    // A module returning nil is cached as `true`, matching `package.loaded`.
    let cached = if result.is_nil() {
        Value::Boolean(true)
    } else {
        result
    };
    interp
        .shared
        .loader
        .borrow_mut()
        .register_loaded(name, cached.clone());
    Ok(cached)
}

/// The host's automatic storage manager does the collecting; this surface
/// only reports.
pub fn lua_collectgarbage(_interp: &mut Interpreter, args: Vec<Value>) -> LuaResult<Value> {
    let opt = match validation::arg(&args, 1) {
        Value::Nil => "collect".to_string(),
        v => validation::to_str("collectgarbage", 1, &v)?.to_str_lossy(),
    };
    match opt.as_str() {
        "count" => Ok(Value::Multi(vec![Value::Float(0.0), Value::Integer(0)])),
        _ => Ok(Value::Integer(0)),
    }
}
