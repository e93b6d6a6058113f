//! A small slice of the os library: time, clock, getenv, date.

use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Local, TimeZone, Utc};

use super::validation;
use crate::error::{LuaError, LuaResult};
use crate::eval::Interpreter;
use crate::value::Value;

pub fn lua_time(_interp: &mut Interpreter, args: Vec<Value>) -> LuaResult<Value> {
    match validation::arg(&args, 1) {
        Value::Nil => {
            let now = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map_err(|e| LuaError::runtime(format!("time failed: {}", e)))?;
            Ok(Value::Integer(now.as_secs() as i64))
        }
        Value::Table(t) => {
            let get = |field: &str, default: Option<i64>| -> LuaResult<i64> {
                let v = t.borrow().get(&Value::string(field));
                match (v.to_integer(), default) {
                    (Some(i), _) => Ok(i),
                    (None, Some(d)) => Ok(d),
                    (None, None) => Err(LuaError::runtime(format!(
                        "field '{}' missing in date table",
                        field
                    ))),
                }
            };
            let year = get("year", None)?;
            let month = get("month", None)?;
            let day = get("day", None)?;
            let hour = get("hour", Some(12))?;
            let min = get("min", Some(0))?;
            let sec = get("sec", Some(0))?;
            let dt = Local
                .with_ymd_and_hms(
                    year as i32,
                    month as u32,
                    day as u32,
                    hour as u32,
                    min as u32,
                    sec as u32,
                )
                .single()
                .ok_or_else(|| LuaError::runtime("time result cannot be represented"))?;
            Ok(Value::Integer(dt.timestamp()))
        }
        other => Err(LuaError::bad_argument(
            1,
            "time",
            "table",
            other.type_name(),
        )),
    }
}

/// Wall-clock seconds since an arbitrary program-local epoch.
pub fn lua_clock(_interp: &mut Interpreter, _args: Vec<Value>) -> LuaResult<Value> {
    use std::sync::OnceLock;
    use std::time::Instant;
    static START: OnceLock<Instant> = OnceLock::new();
    let start = START.get_or_init(Instant::now);
    Ok(Value::Float(start.elapsed().as_secs_f64()))
}

pub fn lua_getenv(_interp: &mut Interpreter, args: Vec<Value>) -> LuaResult<Value> {
    let name = validation::to_str("getenv", 1, &validation::arg(&args, 1))?;
    match std::env::var(name.to_str_lossy()) {
        Ok(v) => Ok(Value::string(v)),
        Err(_) => Ok(Value::Nil),
    }
}

/// `os.date([format [, time]])` with the common strftime directives.
pub fn lua_date(_interp: &mut Interpreter, args: Vec<Value>) -> LuaResult<Value> {
    let fmt = match validation::arg(&args, 1) {
        Value::Nil => "%c".to_string(),
        v => validation::to_str("date", 1, &v)?.to_str_lossy(),
    };
    let t = match validation::arg(&args, 2) {
        Value::Nil => SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0),
        v => validation::to_int("date", 2, &v)?,
    };

    let (fmt, utc) = match fmt.strip_prefix('!') {
        Some(rest) => (rest.to_string(), true),
        None => (fmt, false),
    };

    if fmt.starts_with("*t") {
        let dt: DateTime<Local> = Local
            .timestamp_opt(t, 0)
            .single()
            .ok_or_else(|| LuaError::runtime("date result cannot be represented"))?;
        return date_table(&dt);
    }

    let formatted = if utc {
        let dt: DateTime<Utc> = Utc
            .timestamp_opt(t, 0)
            .single()
            .ok_or_else(|| LuaError::runtime("date result cannot be represented"))?;
        dt.format(&fmt).to_string()
    } else {
        let dt: DateTime<Local> = Local
            .timestamp_opt(t, 0)
            .single()
            .ok_or_else(|| LuaError::runtime("date result cannot be represented"))?;
        dt.format(&fmt).to_string()
    };
    Ok(Value::string(formatted))
}

fn date_table(dt: &DateTime<Local>) -> LuaResult<Value> {
    use chrono::{Datelike, Timelike};
    let t = Value::new_table();
    if let Value::Table(tref) = &t {
        let mut tb = tref.borrow_mut();
        let fields: &[(&str, i64)] = &[
            ("year", dt.year() as i64),
            ("month", dt.month() as i64),
            ("day", dt.day() as i64),
            ("hour", dt.hour() as i64),
            ("min", dt.minute() as i64),
            ("sec", dt.second() as i64),
            ("wday", dt.weekday().number_from_sunday() as i64),
            ("yday", dt.ordinal() as i64),
        ];
        for (k, v) in fields {
            tb.set(Value::string(*k), Value::Integer(*v))
                .map_err(|e| LuaError::runtime(e.message()))?;
        }
        tb.set(Value::string("isdst"), Value::Boolean(false))
            .map_err(|e| LuaError::runtime(e.message()))?;
    }
    Ok(t)
}
