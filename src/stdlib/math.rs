//! The math library.

use std::cell::RefCell;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::validation;
use crate::error::{LuaError, LuaResult};
use crate::eval::Interpreter;
use crate::value::{float_to_exact_int, Number, Value};

thread_local! {
    static RNG: RefCell<StdRng> = RefCell::new(StdRng::from_entropy());
}

pub fn lua_abs(_interp: &mut Interpreter, args: Vec<Value>) -> LuaResult<Value> {
    validation::check_arity("abs", &args, 1)?;
    match args[0].to_numeric() {
        Some(Number::Int(i)) => Ok(Value::Integer(i.wrapping_abs())),
        Some(Number::Float(f)) => Ok(Value::Float(f.abs())),
        None => Err(LuaError::bad_argument(
            1,
            "abs",
            "number",
            args[0].type_name(),
        )),
    }
}

pub fn lua_ceil(_interp: &mut Interpreter, args: Vec<Value>) -> LuaResult<Value> {
    validation::check_arity("ceil", &args, 1)?;
    if let Some(Number::Int(i)) = args[0].to_numeric() {
        return Ok(Value::Integer(i));
    }
    let f = validation::to_float("ceil", 1, &args[0])?;
    let c = f.ceil();
    match float_to_exact_int(c) {
        Some(i) => Ok(Value::Integer(i)),
        None => Err(LuaError::runtime("number has no integer representation")),
    }
}

pub fn lua_floor(_interp: &mut Interpreter, args: Vec<Value>) -> LuaResult<Value> {
    validation::check_arity("floor", &args, 1)?;
    if let Some(Number::Int(i)) = args[0].to_numeric() {
        return Ok(Value::Integer(i));
    }
    let f = validation::to_float("floor", 1, &args[0])?;
    let fl = f.floor();
    match float_to_exact_int(fl) {
        Some(i) => Ok(Value::Integer(i)),
        None => Err(LuaError::runtime("number has no integer representation")),
    }
}

pub fn lua_sqrt(_interp: &mut Interpreter, args: Vec<Value>) -> LuaResult<Value> {
    let f = validation::to_float("sqrt", 1, &validation::arg(&args, 1))?;
    Ok(Value::Float(f.sqrt()))
}

pub fn lua_exp(_interp: &mut Interpreter, args: Vec<Value>) -> LuaResult<Value> {
    let f = validation::to_float("exp", 1, &validation::arg(&args, 1))?;
    Ok(Value::Float(f.exp()))
}

pub fn lua_log(_interp: &mut Interpreter, args: Vec<Value>) -> LuaResult<Value> {
    let x = validation::to_float("log", 1, &validation::arg(&args, 1))?;
    match validation::arg(&args, 2) {
        Value::Nil => Ok(Value::Float(x.ln())),
        base => {
            let b = validation::to_float("log", 2, &base)?;
            Ok(Value::Float(x.log(b)))
        }
    }
}

pub fn lua_sin(_interp: &mut Interpreter, args: Vec<Value>) -> LuaResult<Value> {
    let f = validation::to_float("sin", 1, &validation::arg(&args, 1))?;
    Ok(Value::Float(f.sin()))
}

pub fn lua_cos(_interp: &mut Interpreter, args: Vec<Value>) -> LuaResult<Value> {
    let f = validation::to_float("cos", 1, &validation::arg(&args, 1))?;
    Ok(Value::Float(f.cos()))
}

pub fn lua_tan(_interp: &mut Interpreter, args: Vec<Value>) -> LuaResult<Value> {
    let f = validation::to_float("tan", 1, &validation::arg(&args, 1))?;
    Ok(Value::Float(f.tan()))
}

pub fn lua_fmod(_interp: &mut Interpreter, args: Vec<Value>) -> LuaResult<Value> {
    let a = validation::to_float("fmod", 1, &validation::arg(&args, 1))?;
    let b = validation::to_float("fmod", 2, &validation::arg(&args, 2))?;
    Ok(Value::Float(a % b))
}

/// Integral and fractional parts; the integral part is a float.
pub fn lua_modf(_interp: &mut Interpreter, args: Vec<Value>) -> LuaResult<Value> {
    let f = validation::to_float("modf", 1, &validation::arg(&args, 1))?;
    Ok(Value::Multi(vec![
        Value::Float(f.trunc()),
        Value::Float(f.fract()),
    ]))
}

pub fn lua_max(_interp: &mut Interpreter, args: Vec<Value>) -> LuaResult<Value> {
    validation::check_arity("max", &args, 1)?;
    let mut best = args[0].clone();
    for (i, v) in args.iter().enumerate().skip(1) {
        let a = validation::to_float("max", i + 1, v)?;
        let b = validation::to_float("max", 1, &best)?;
        if a > b {
            best = v.clone();
        }
    }
    Ok(best)
}

pub fn lua_min(_interp: &mut Interpreter, args: Vec<Value>) -> LuaResult<Value> {
    validation::check_arity("min", &args, 1)?;
    let mut best = args[0].clone();
    for (i, v) in args.iter().enumerate().skip(1) {
        let a = validation::to_float("min", i + 1, v)?;
        let b = validation::to_float("min", 1, &best)?;
        if a < b {
            best = v.clone();
        }
    }
    Ok(best)
}

pub fn lua_tointeger(_interp: &mut Interpreter, args: Vec<Value>) -> LuaResult<Value> {
    validation::check_arity("tointeger", &args, 1)?;
    match args[0].to_integer() {
        Some(i) => Ok(Value::Integer(i)),
        None => Ok(Value::Nil),
    }
}

/// `math.type(v)`: "integer", "float", or nil for non-numbers.
pub fn lua_math_type(_interp: &mut Interpreter, args: Vec<Value>) -> LuaResult<Value> {
    validation::check_arity("type", &args, 1)?;
    Ok(match &args[0] {
        Value::Integer(_) => Value::string("integer"),
        Value::Float(_) => Value::string("float"),
        _ => Value::Nil,
    })
}

/// `math.random([m [, n]])`
pub fn lua_random(_interp: &mut Interpreter, args: Vec<Value>) -> LuaResult<Value> {
    match args.len() {
        0 => Ok(Value::Float(RNG.with(|r| r.borrow_mut().gen::<f64>()))),
        1 => {
            let m = validation::to_int("random", 1, &args[0])?;
            if m < 1 {
                return Err(LuaError::runtime(
                    "bad argument #1 to 'random' (interval is empty)",
                ));
            }
            Ok(Value::Integer(
                RNG.with(|r| r.borrow_mut().gen_range(1..=m)),
            ))
        }
        _ => {
            let m = validation::to_int("random", 1, &args[0])?;
            let n = validation::to_int("random", 2, &args[1])?;
            if m > n {
                return Err(LuaError::runtime(
                    "bad argument #2 to 'random' (interval is empty)",
                ));
            }
            Ok(Value::Integer(
                RNG.with(|r| r.borrow_mut().gen_range(m..=n)),
            ))
        }
    }
}

pub fn lua_randomseed(_interp: &mut Interpreter, args: Vec<Value>) -> LuaResult<Value> {
    match validation::arg(&args, 1) {
        Value::Nil => RNG.with(|r| *r.borrow_mut() = StdRng::from_entropy()),
        v => {
            let seed = validation::to_float("randomseed", 1, &v)?;
            RNG.with(|r| *r.borrow_mut() = StdRng::seed_from_u64(seed.to_bits()));
        }
    }
    Ok(Value::Multi(Vec::new()))
}
