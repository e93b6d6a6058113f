//! Metamethod dispatch: raw operation first, then handlers, left before
//! right, with the comparison fallback chain.

use lumo::{Interpreter, LuaResult, Value};

fn eval(src: &str) -> LuaResult<Vec<Value>> {
    let mut interp = Interpreter::new();
    interp.eval_source(src.as_bytes(), "test")
}

fn eval_one(src: &str) -> Value {
    eval(src).unwrap().into_iter().next().unwrap_or(Value::Nil)
}

#[test]
fn test_add_left_operand_wins() {
    let v = eval_one(
        r#"
local a = setmetatable({}, {__add = function(x, y) return 10 end})
local b = setmetatable({}, {__add = function(x, y) return 20 end})
return a + b
"#,
    );
    assert_eq!(v, Value::Integer(10));
}

#[test]
fn test_add_right_fallback() {
    let v = eval_one(
        r#"
local b = setmetatable({}, {__add = function(x, y) return 20 end})
return 1 + b
"#,
    );
    assert_eq!(v, Value::Integer(20));
}

#[test]
fn test_metamethod_receives_operands_in_order() {
    let results = eval(
        r#"
local a = setmetatable({tag = "a"}, {__sub = function(x, y) return x.tag, y end})
return a - 5
"#,
    )
    .unwrap();
    // The caller collapses multiple results to the first.
    assert_eq!(results[0], Value::string("a"));
}

#[test]
fn test_index_function() {
    let v = eval_one(
        r#"
local t = setmetatable({}, {__index = function(t, k) return k .. "!" end})
return t.missing
"#,
    );
    assert_eq!(v, Value::string("missing!"));
}

#[test]
fn test_index_table_chain() {
    let v = eval_one(
        r#"
local base = {greet = "hi"}
local mid = setmetatable({}, {__index = base})
local top = setmetatable({}, {__index = mid})
return top.greet
"#,
    );
    assert_eq!(v, Value::string("hi"));
}

#[test]
fn test_index_raw_hit_skips_metamethod() {
    let v = eval_one(
        r#"
local t = setmetatable({x = 1}, {__index = function() return 99 end})
return t.x
"#,
    );
    assert_eq!(v, Value::Integer(1));
}

#[test]
fn test_newindex_function() {
    let v = eval_one(
        r#"
local log = {}
local t = setmetatable({}, {__newindex = function(t, k, v) log[k] = v end})
t.a = 5
return log.a ~= nil and rawget(t, "a") == nil
"#,
    );
    assert_eq!(v, Value::Boolean(true));
}

#[test]
fn test_newindex_existing_key_assigns_directly() {
    let v = eval_one(
        r#"
local t = setmetatable({a = 1}, {__newindex = function() error("should not run") end})
t.a = 2
return t.a
"#,
    );
    assert_eq!(v, Value::Integer(2));
}

#[test]
fn test_newindex_table_redirects() {
    let v = eval_one(
        r#"
local store = {}
local t = setmetatable({}, {__newindex = store})
t.key = "v"
return store.key
"#,
    );
    assert_eq!(v, Value::string("v"));
}

#[test]
fn test_call_metamethod() {
    let v = eval_one(
        r#"
local callable = setmetatable({}, {__call = function(self, a, b) return a + b end})
return callable(3, 4)
"#,
    );
    assert_eq!(v, Value::Integer(7));
}

#[test]
fn test_call_chain_flattens() {
    // A callable whose __call is itself a callable table.
    let v = eval_one(
        r#"
local inner = setmetatable({}, {__call = function(self, outer, x) return x * 2 end})
local outer = setmetatable({}, {__call = inner})
return outer(21)
"#,
    );
    assert_eq!(v, Value::Integer(42));
}

#[test]
fn test_eq_only_between_tables() {
    let results = eval(
        r#"
local mt = {__eq = function(a, b) return true end}
local a = setmetatable({}, mt)
local b = setmetatable({}, mt)
return a == b, a == 1, a ~= b
"#,
    )
    .unwrap();
    assert_eq!(results[0], Value::Boolean(true));
    assert_eq!(results[1], Value::Boolean(false));
    assert_eq!(results[2], Value::Boolean(false));
}

#[test]
fn test_eq_not_called_on_identity() {
    let v = eval_one(
        r#"
local called = false
local a = setmetatable({}, {__eq = function() called = true return false end})
local same = a == a
return same and not called
"#,
    );
    assert_eq!(v, Value::Boolean(true));
}

#[test]
fn test_lt_and_gt_fallback_chain() {
    let results = eval(
        r#"
local mt = {__lt = function(a, b) return a.v < b.v end}
local a = setmetatable({v = 1}, mt)
local b = setmetatable({v = 2}, mt)
return a < b, b > a, a > b
"#,
    )
    .unwrap();
    assert_eq!(results[0], Value::Boolean(true));
    assert_eq!(results[1], Value::Boolean(true));
    assert_eq!(results[2], Value::Boolean(false));
}

#[test]
fn test_le_falls_back_to_lt_swap() {
    let results = eval(
        r#"
local mt = {__lt = function(a, b) return a.v < b.v end}
local a = setmetatable({v = 1}, mt)
local b = setmetatable({v = 2}, mt)
return a <= b, b <= a, a >= b
"#,
    )
    .unwrap();
    assert_eq!(results[0], Value::Boolean(true));
    assert_eq!(results[1], Value::Boolean(false));
    assert_eq!(results[2], Value::Boolean(false));
}

#[test]
fn test_concat_metamethod() {
    let v = eval_one(
        r#"
local t = setmetatable({}, {__concat = function(a, b) return "joined" end})
return t .. "x"
"#,
    );
    assert_eq!(v, Value::string("joined"));
}

#[test]
fn test_len_metamethod() {
    let v = eval_one(
        r#"
local t = setmetatable({1, 2, 3}, {__len = function() return 100 end})
return #t
"#,
    );
    assert_eq!(v, Value::Integer(100));
}

#[test]
fn test_unm_metamethod() {
    let v = eval_one(
        r#"
local t = setmetatable({v = 9}, {__unm = function(x) return -x.v end})
return -t
"#,
    );
    assert_eq!(v, Value::Integer(-9));
}

#[test]
fn test_tostring_metamethod() {
    let v = eval_one(
        r#"
local t = setmetatable({}, {__tostring = function() return "custom" end})
return tostring(t)
"#,
    );
    assert_eq!(v, Value::string("custom"));
}

#[test]
fn test_protected_metatable() {
    let results = eval(
        r#"
local t = setmetatable({}, {__metatable = "locked"})
local ok = pcall(setmetatable, t, {})
return ok, getmetatable(t)
"#,
    )
    .unwrap();
    assert_eq!(results[0], Value::Boolean(false));
    assert_eq!(results[1], Value::string("locked"));
}

#[test]
fn test_pairs_metamethod() {
    let v = eval_one(
        r#"
local t = setmetatable({}, {__pairs = function(t)
  local i = 0
  return function()
    i = i + 1
    if i <= 2 then return i, i * 10 end
  end, t, nil
end})
local sum = 0
for _, v in pairs(t) do sum = sum + v end
return sum
"#,
    );
    assert_eq!(v, Value::Integer(30));
}

#[test]
fn test_index_on_non_table_errors_without_metamethod() {
    assert!(eval("local x = 5 return x.field").is_err());
    assert!(eval("local b = true return b[1]").is_err());
}

#[test]
fn test_call_on_non_callable_errors() {
    let err = eval("local x = nil x()").unwrap_err();
    assert!(err.message().contains("attempt to call a nil value"));
}

#[test]
fn test_getmetatable_returns_table() {
    let v = eval_one(
        r#"
local mt = {}
local t = setmetatable({}, mt)
return getmetatable(t) == mt
"#,
    );
    assert_eq!(v, Value::Boolean(true));
}
