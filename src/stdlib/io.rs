//! A minimal io surface: write to stdout, read lines/numbers from stdin.

use std::io::{BufRead, Write};

use super::validation;
use crate::error::{LuaError, LuaResult};
use crate::eval::Interpreter;
use crate::value::Value;

pub fn lua_write(_interp: &mut Interpreter, args: Vec<Value>) -> LuaResult<Value> {
    let mut out = std::io::stdout().lock();
    for (i, v) in args.iter().enumerate() {
        match v {
            Value::Str(s) => out
                .write_all(s.as_bytes())
                .map_err(|e| LuaError::runtime(format!("write failed: {}", e)))?,
            Value::Integer(_) | Value::Float(_) => out
                .write_all(v.display_string().as_bytes())
                .map_err(|e| LuaError::runtime(format!("write failed: {}", e)))?,
            other => {
                return Err(LuaError::bad_argument(
                    i + 1,
                    "write",
                    "string",
                    other.type_name(),
                ))
            }
        }
    }
    let _ = out.flush();
    Ok(Value::Multi(Vec::new()))
}

pub fn lua_read(_interp: &mut Interpreter, args: Vec<Value>) -> LuaResult<Value> {
    let fmt = match validation::arg(&args, 1) {
        Value::Nil => "l".to_string(),
        v => validation::to_str("read", 1, &v)?
            .to_str_lossy()
            .trim_start_matches('*')
            .to_string(),
    };
    let stdin = std::io::stdin();
    match fmt.as_str() {
        "l" | "L" => {
            let mut line = String::new();
            let n = stdin
                .lock()
                .read_line(&mut line)
                .map_err(|e| LuaError::runtime(format!("read failed: {}", e)))?;
            if n == 0 {
                return Ok(Value::Nil);
            }
            if fmt == "l" {
                while line.ends_with('\n') || line.ends_with('\r') {
                    line.pop();
                }
            }
            Ok(Value::string(line))
        }
        "n" => {
            let mut line = String::new();
            let n = stdin
                .lock()
                .read_line(&mut line)
                .map_err(|e| LuaError::runtime(format!("read failed: {}", e)))?;
            if n == 0 {
                return Ok(Value::Nil);
            }
            match crate::value::str_to_number(line.trim().as_bytes()) {
                Some(num) => Ok(num.into_value()),
                None => Ok(Value::Nil),
            }
        }
        "a" => {
            let mut buf = String::new();
            std::io::Read::read_to_string(&mut stdin.lock(), &mut buf)
                .map_err(|e| LuaError::runtime(format!("read failed: {}", e)))?;
            Ok(Value::string(buf))
        }
        other => Err(LuaError::runtime(format!(
            "bad argument #1 to 'read' (invalid format '{}')",
            other
        ))),
    }
}
