//! The coroutine library surface over the scheduler in `crate::coroutine`.

use std::rc::Rc;

use super::validation;
use crate::coroutine;
use crate::coroutine::Coroutine;
use crate::error::{LuaError, LuaResult};
use crate::eval::Interpreter;
use crate::value::Value;

fn to_coroutine(name: &str, i: usize, v: &Value) -> LuaResult<Rc<Coroutine>> {
    match v {
        Value::Coroutine(co) => Ok(Rc::clone(co)),
        other => Err(LuaError::bad_argument(
            i,
            name,
            "coroutine",
            other.type_name(),
        )),
    }
}

pub fn lua_create(_interp: &mut Interpreter, args: Vec<Value>) -> LuaResult<Value> {
    let f = validation::to_function("create", 1, &validation::arg(&args, 1))?;
    Ok(Value::Coroutine(Coroutine::new(f)))
}

pub fn lua_resume(interp: &mut Interpreter, mut args: Vec<Value>) -> LuaResult<Value> {
    validation::check_arity("resume", &args, 1)?;
    let co = to_coroutine("resume", 1, &args.remove(0))?;
    coroutine::resume(interp, &co, args)
}

pub fn lua_yield(interp: &mut Interpreter, args: Vec<Value>) -> LuaResult<Value> {
    coroutine::yield_values(interp, args)
}

pub fn lua_status(interp: &mut Interpreter, args: Vec<Value>) -> LuaResult<Value> {
    let co = to_coroutine("status", 1, &validation::arg(&args, 1))?;
    Ok(Value::string(coroutine::status_name(interp, &co)))
}

/// `coroutine.running()`: the running coroutine and whether it is the main
/// one.
pub fn lua_running(interp: &mut Interpreter, _args: Vec<Value>) -> LuaResult<Value> {
    let co = Rc::clone(&interp.current_co);
    let is_main = co.is_main();
    Ok(Value::Multi(vec![
        Value::Coroutine(co),
        Value::Boolean(is_main),
    ]))
}

pub fn lua_isyieldable(interp: &mut Interpreter, _args: Vec<Value>) -> LuaResult<Value> {
    Ok(Value::Boolean(coroutine::is_yieldable(interp)))
}

pub fn lua_close(interp: &mut Interpreter, args: Vec<Value>) -> LuaResult<Value> {
    let co = to_coroutine("close", 1, &validation::arg(&args, 1))?;
    coroutine::close(interp, &co)
}

/// `coroutine.wrap(f)`: resumes on call, re-raising errors instead of
/// returning a status flag.
pub fn lua_wrap(_interp: &mut Interpreter, args: Vec<Value>) -> LuaResult<Value> {
    let f = validation::to_function("wrap", 1, &validation::arg(&args, 1))?;
    let co = Coroutine::new(f);
    let wrapped = move |interp: &mut Interpreter, call_args: Vec<Value>| -> LuaResult<Value> {
        let mut results = coroutine::resume(interp, &co, call_args)?.into_vec();
        if results.is_empty() {
            return Ok(Value::Multi(Vec::new()));
        }
        let ok = results.remove(0);
        if ok.is_truthy() {
            Ok(Value::Multi(results))
        } else {
            let payload = results.into_iter().next().unwrap_or(Value::Nil);
            Err(LuaError::from_value(payload).with_traceback(interp.traceback_snapshot()))
        }
    };
    Ok(Value::native("wrap", wrapped))
}
