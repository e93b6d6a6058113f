//! Standard library installation.
//!
//! Builtins are host callables receiving the interpreter (so they can call
//! back into evaluation) and an argument vector. `install` populates the
//! globals table, builds the library tables, and wires the shared string
//! metatable so `("x"):upper()` resolves through the string library.

pub mod basic;
pub mod coroutine;
pub mod io;
pub mod math;
pub mod os;
pub mod string;
pub mod table;
pub mod validation;

use std::cell::RefCell;
use std::rc::Rc;

use crate::error::LuaResult;
use crate::eval::Interpreter;
use crate::table::Table;
use crate::value::Value;

fn set(t: &Rc<RefCell<Table>>, key: &str, value: Value) {
    // Keys here are known-good literals.
    t.borrow_mut()
        .set(Value::string(key), value)
        .expect("stdlib key");
}

fn native(
    name: &'static str,
    f: fn(&mut Interpreter, Vec<Value>) -> LuaResult<Value>,
) -> Value {
    Value::native(name, f)
}

fn library(entries: &[(&'static str, Value)]) -> Value {
    let t = Rc::new(RefCell::new(Table::new()));
    for (k, v) in entries {
        set(&t, k, v.clone());
    }
    Value::Table(t)
}

pub fn install(interp: &mut Interpreter) {
    let g = interp.globals();

    // Basic library
    set(&g, "print", native("print", basic::lua_print));
    set(&g, "type", native("type", basic::lua_type));
    set(&g, "tostring", native("tostring", basic::lua_tostring));
    set(&g, "tonumber", native("tonumber", basic::lua_tonumber));
    set(&g, "ipairs", native("ipairs", basic::lua_ipairs));
    set(&g, "pairs", native("pairs", basic::lua_pairs));
    set(&g, "next", native("next", basic::lua_next));
    set(&g, "select", native("select", basic::lua_select));
    set(&g, "rawget", native("rawget", basic::lua_rawget));
    set(&g, "rawset", native("rawset", basic::lua_rawset));
    set(&g, "rawequal", native("rawequal", basic::lua_rawequal));
    set(&g, "rawlen", native("rawlen", basic::lua_rawlen));
    set(&g, "assert", native("assert", basic::lua_assert));
    set(&g, "error", native("error", basic::lua_error));
    set(&g, "pcall", native("pcall", basic::lua_pcall));
    set(&g, "xpcall", native("xpcall", basic::lua_xpcall));
    set(&g, "setmetatable", native("setmetatable", basic::lua_setmetatable));
    set(&g, "getmetatable", native("getmetatable", basic::lua_getmetatable));
    set(&g, "load", native("load", basic::lua_load));
    set(&g, "require", native("require", basic::lua_require));
    set(
        &g,
        "collectgarbage",
        native("collectgarbage", basic::lua_collectgarbage),
    );

    // string
    let string_table = library(&[
        ("len", native("len", string::lua_len)),
        ("sub", native("sub", string::lua_sub)),
        ("upper", native("upper", string::lua_upper)),
        ("lower", native("lower", string::lua_lower)),
        ("rep", native("rep", string::lua_rep)),
        ("reverse", native("reverse", string::lua_reverse)),
        ("byte", native("byte", string::lua_byte)),
        ("char", native("char", string::lua_char)),
        ("format", native("format", string::lua_format)),
        ("find", native("find", string::lua_find)),
        ("match", native("match", string::lua_match)),
        ("gmatch", native("gmatch", string::lua_gmatch)),
        ("gsub", native("gsub", string::lua_gsub)),
        ("dump", native("dump", string::lua_dump)),
    ]);
    set(&g, "string", string_table.clone());

    // All strings share one metatable whose __index is the string library.
    let string_meta = Rc::new(RefCell::new(Table::new()));
    string_meta
        .borrow_mut()
        .set(Value::string("__index"), string_table)
        .expect("string metatable");
    interp.set_string_metatable(string_meta);

    // table
    set(
        &g,
        "table",
        library(&[
            ("insert", native("insert", table::lua_insert)),
            ("remove", native("remove", table::lua_remove)),
            ("concat", native("concat", table::lua_concat)),
            ("unpack", native("unpack", table::lua_unpack)),
            ("pack", native("pack", table::lua_pack)),
            ("sort", native("sort", table::lua_sort)),
        ]),
    );

    // math
    set(
        &g,
        "math",
        library(&[
            ("abs", native("abs", math::lua_abs)),
            ("ceil", native("ceil", math::lua_ceil)),
            ("floor", native("floor", math::lua_floor)),
            ("sqrt", native("sqrt", math::lua_sqrt)),
            ("exp", native("exp", math::lua_exp)),
            ("log", native("log", math::lua_log)),
            ("sin", native("sin", math::lua_sin)),
            ("cos", native("cos", math::lua_cos)),
            ("tan", native("tan", math::lua_tan)),
            ("fmod", native("fmod", math::lua_fmod)),
            ("modf", native("modf", math::lua_modf)),
            ("max", native("max", math::lua_max)),
            ("min", native("min", math::lua_min)),
            ("tointeger", native("tointeger", math::lua_tointeger)),
            ("type", native("type", math::lua_math_type)),
            ("random", native("random", math::lua_random)),
            ("randomseed", native("randomseed", math::lua_randomseed)),
            ("pi", Value::Float(std::f64::consts::PI)),
            ("huge", Value::Float(f64::INFINITY)),
            ("maxinteger", Value::Integer(i64::MAX)),
            ("mininteger", Value::Integer(i64::MIN)),
        ]),
    );

    // os
    set(
        &g,
        "os",
        library(&[
            ("time", native("time", os::lua_time)),
            ("clock", native("clock", os::lua_clock)),
            ("getenv", native("getenv", os::lua_getenv)),
            ("date", native("date", os::lua_date)),
        ]),
    );

    // io
    set(
        &g,
        "io",
        library(&[
            ("write", native("write", io::lua_write)),
            ("read", native("read", io::lua_read)),
        ]),
    );

    // coroutine
    set(
        &g,
        "coroutine",
        library(&[
            ("create", native("create", coroutine::lua_create)),
            ("resume", native("resume", coroutine::lua_resume)),
            ("yield", native("yield", coroutine::lua_yield)),
            ("status", native("status", coroutine::lua_status)),
            ("running", native("running", coroutine::lua_running)),
            ("isyieldable", native("isyieldable", coroutine::lua_isyieldable)),
            ("wrap", native("wrap", coroutine::lua_wrap)),
            ("close", native("close", coroutine::lua_close)),
        ]),
    );

    // Self-reference and version marker
    set(&g, "_G", Value::Table(Rc::clone(&g)));
    set(&g, "_VERSION", Value::string("Lua 5.4"));
}
