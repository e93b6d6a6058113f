//! Core language semantics, end to end: tokenize, parse, evaluate.

use lumo::{Interpreter, LuaResult, Value};

fn eval(src: &str) -> LuaResult<Vec<Value>> {
    let mut interp = Interpreter::new();
    interp.eval_source(src.as_bytes(), "test")
}

fn eval_one(src: &str) -> Value {
    eval(src).unwrap().into_iter().next().unwrap_or(Value::Nil)
}

// =====================================================
// VALUES AND ARITHMETIC
// =====================================================

#[test]
fn test_integer_arithmetic() {
    assert_eq!(eval_one("return 2 + 3 * 4"), Value::Integer(14));
    assert_eq!(eval_one("return 7 // 2"), Value::Integer(3));
    assert_eq!(eval_one("return -7 // 2"), Value::Integer(-4));
    assert_eq!(eval_one("return 7 % 3"), Value::Integer(1));
    assert_eq!(eval_one("return -7 % 3"), Value::Integer(2));
}

#[test]
fn test_division_always_float() {
    assert_eq!(eval_one("return 10 / 4"), Value::Float(2.5));
    assert_eq!(eval_one("return 8 / 2"), Value::Float(4.0));
}

#[test]
fn test_mixed_arithmetic_promotes() {
    assert_eq!(eval_one("return 1 + 0.5"), Value::Float(1.5));
    assert_eq!(eval_one("return 2 * 1.5"), Value::Float(3.0));
}

#[test]
fn test_integer_overflow_wraps() {
    assert_eq!(
        eval_one("return math.maxinteger + 1"),
        Value::Integer(i64::MIN)
    );
}

#[test]
fn test_string_coercion_in_arithmetic() {
    assert_eq!(eval_one("return '10' + 5"), Value::Integer(15));
    assert_eq!(eval_one("return '3.5' * 2"), Value::Float(7.0));
}

#[test]
fn test_power_and_unary() {
    assert_eq!(eval_one("return 2 ^ 10"), Value::Float(1024.0));
    assert_eq!(eval_one("return -2 ^ 2"), Value::Float(-4.0));
    assert_eq!(eval_one("return -(5)"), Value::Integer(-5));
}

#[test]
fn test_bitwise_operators() {
    assert_eq!(eval_one("return 6 & 3"), Value::Integer(2));
    assert_eq!(eval_one("return 6 | 3"), Value::Integer(7));
    assert_eq!(eval_one("return 6 ~ 3"), Value::Integer(5));
    assert_eq!(eval_one("return 1 << 4"), Value::Integer(16));
    assert_eq!(eval_one("return 256 >> 4"), Value::Integer(16));
    assert_eq!(eval_one("return ~0"), Value::Integer(-1));
}

#[test]
fn test_comparison() {
    assert_eq!(eval_one("return 1 < 2"), Value::Boolean(true));
    assert_eq!(eval_one("return 2 <= 2"), Value::Boolean(true));
    assert_eq!(eval_one("return 3 > 4"), Value::Boolean(false));
    assert_eq!(eval_one("return 'abc' < 'abd'"), Value::Boolean(true));
    assert_eq!(eval_one("return 1 == 1.0"), Value::Boolean(true));
    assert_eq!(eval_one("return 1 ~= 2"), Value::Boolean(true));
}

#[test]
fn test_concat() {
    assert_eq!(eval_one("return 'a' .. 'b' .. 1"), Value::string("ab1"));
    assert_eq!(eval_one("return 1 .. 2"), Value::string("12"));
}

#[test]
fn test_logical_operators_return_operands() {
    assert_eq!(eval_one("return nil or 'fallback'"), Value::string("fallback"));
    assert_eq!(eval_one("return false and error('never')"), Value::Boolean(false));
    assert_eq!(eval_one("return 1 and 2"), Value::Integer(2));
    assert_eq!(eval_one("return not nil"), Value::Boolean(true));
}

#[test]
fn test_length_operator() {
    assert_eq!(eval_one("return #'hello'"), Value::Integer(5));
    assert_eq!(eval_one("return #{10, 20, 30}"), Value::Integer(3));
}

// =====================================================
// VARIABLES, SCOPES, CLOSURES
// =====================================================

#[test]
fn test_locals_and_globals() {
    assert_eq!(
        eval_one("local x = 1 x = x + 1 return x"),
        Value::Integer(2)
    );
    assert_eq!(eval_one("g = 42 return g"), Value::Integer(42));
}

#[test]
fn test_shadowing() {
    let v = eval_one(
        r#"
local x = 1
do
  local x = 2
end
return x
"#,
    );
    assert_eq!(v, Value::Integer(1));
}

#[test]
fn test_closure_shares_upvalue() {
    let results = eval(
        r#"
local function counter()
  local n = 0
  local function inc() n = n + 1 return n end
  local function get() return n end
  return inc, get
end
local inc, get = counter()
inc(); inc(); inc()
return get()
"#,
    )
    .unwrap();
    assert_eq!(results[0], Value::Integer(3));
}

#[test]
fn test_two_closures_share_one_cell() {
    let results = eval(
        r#"
local x = 0
local function a() x = x + 10 end
local function b() x = x + 1 end
a(); b(); a()
return x
"#,
    )
    .unwrap();
    assert_eq!(results[0], Value::Integer(21));
}

#[test]
fn test_closure_outlives_scope() {
    let v = eval_one(
        r#"
local f
do
  local hidden = "kept alive"
  f = function() return hidden end
end
return f()
"#,
    );
    assert_eq!(v, Value::string("kept alive"));
}

#[test]
fn test_local_rhs_sees_outer() {
    let v = eval_one(
        r#"
local x = "outer"
do
  local x = x .. "!"
  return x
end
"#,
    );
    assert_eq!(v, Value::string("outer!"));
}

// =====================================================
// FUNCTIONS, MULTIPLE RETURNS, VARARGS
// =====================================================

#[test]
fn test_multiple_returns() {
    let results = eval("local function f() return 1, 2, 3 end return f()").unwrap();
    assert_eq!(
        results,
        vec![Value::Integer(1), Value::Integer(2), Value::Integer(3)]
    );
}

#[test]
fn test_multi_truncation_in_middle() {
    let results = eval(
        r#"
local function m() return 1, 2, 3 end
return m(), 10
"#,
    )
    .unwrap();
    assert_eq!(results, vec![Value::Integer(1), Value::Integer(10)]);
}

#[test]
fn test_paren_truncates() {
    let results = eval(
        r#"
local function m() return 1, 2, 3 end
return (m())
"#,
    )
    .unwrap();
    assert_eq!(results, vec![Value::Integer(1)]);
}

#[test]
fn test_table_constructor_spread() {
    // Non-last calls collapse, the last expands.
    let results = eval(
        r#"
local function m() return 1, 2, 3 end
local t = {m(), m()}
return #t, t[1], t[2], t[3], t[4]
"#,
    )
    .unwrap();
    assert_eq!(
        results,
        vec![
            Value::Integer(4),
            Value::Integer(1),
            Value::Integer(1),
            Value::Integer(2),
            Value::Integer(3),
        ]
    );
}

#[test]
fn test_varargs() {
    let results = eval(
        r#"
local function f(...)
  local a, b = ...
  return a, b, select('#', ...)
end
return f(10, 20, 30)
"#,
    )
    .unwrap();
    assert_eq!(
        results,
        vec![Value::Integer(10), Value::Integer(20), Value::Integer(3)]
    );
}

#[test]
fn test_zero_returns() {
    let results = eval("local function f() return end return f()").unwrap();
    assert!(results.is_empty());
}

#[test]
fn test_method_call() {
    let v = eval_one(
        r#"
local obj = {value = 7}
function obj:double() return self.value * 2 end
return obj:double()
"#,
    );
    assert_eq!(v, Value::Integer(14));
}

#[test]
fn test_method_receiver_evaluated_once() {
    let v = eval_one(
        r#"
local count = 0
local obj = {f = function(self) return self end}
local function get()
  count = count + 1
  return obj
end
get():f()
return count
"#,
    );
    assert_eq!(v, Value::Integer(1));
}

#[test]
fn test_recursive_local_function() {
    assert_eq!(
        eval_one(
            "local function fact(n) if n <= 1 then return 1 end return n * fact(n - 1) end return fact(6)"
        ),
        Value::Integer(720)
    );
}

// =====================================================
// CONTROL FLOW
// =====================================================

#[test]
fn test_while_and_break() {
    let v = eval_one(
        r#"
local i = 0
while true do
  i = i + 1
  if i >= 5 then break end
end
return i
"#,
    );
    assert_eq!(v, Value::Integer(5));
}

#[test]
fn test_repeat_until_sees_body_locals() {
    let v = eval_one(
        r#"
local total = 0
local i = 0
repeat
  i = i + 1
  local done = i >= 3
  total = total + i
until done
return total
"#,
    );
    assert_eq!(v, Value::Integer(6));
}

#[test]
fn test_numeric_for() {
    let v = eval_one(
        r#"
local sum = 0
for i = 1, 10 do sum = sum + i end
return sum
"#,
    );
    assert_eq!(v, Value::Integer(55));
}

#[test]
fn test_numeric_for_step() {
    let v = eval_one(
        r#"
local sum = 0
for i = 10, 1, -2 do sum = sum + i end
return sum
"#,
    );
    assert_eq!(v, Value::Integer(30));
}

#[test]
fn test_numeric_for_fresh_variable_per_iteration() {
    let results = eval(
        r#"
local fns = {}
for i = 1, 3 do
  fns[i] = function() return i end
end
return fns[1](), fns[2](), fns[3]()
"#,
    )
    .unwrap();
    assert_eq!(
        results,
        vec![Value::Integer(1), Value::Integer(2), Value::Integer(3)]
    );
}

#[test]
fn test_numeric_for_zero_step_errors() {
    assert!(eval("for i = 1, 10, 0 do end").is_err());
}

#[test]
fn test_generic_for_pairs() {
    let v = eval_one(
        r#"
local t = {a = 1, b = 2, c = 3}
local sum = 0
for _, v in pairs(t) do sum = sum + v end
return sum
"#,
    );
    assert_eq!(v, Value::Integer(6));
}

#[test]
fn test_generic_for_ipairs_stops_at_hole() {
    let v = eval_one(
        r#"
local t = {1, 2, 3}
t[5] = 5
local count = 0
for _ in ipairs(t) do count = count + 1 end
return count
"#,
    );
    assert_eq!(v, Value::Integer(3));
}

#[test]
fn test_goto_continue_pattern() {
    let v = eval_one(
        r#"
local sum = 0
for i = 1, 10 do
  if i % 2 == 0 then goto continue end
  sum = sum + i
  ::continue::
end
return sum
"#,
    );
    assert_eq!(v, Value::Integer(25));
}

#[test]
fn test_goto_backward() {
    let v = eval_one(
        r#"
local i = 0
do
  ::top::
  i = i + 1
  if i < 3 then goto top end
end
return i
"#,
    );
    assert_eq!(v, Value::Integer(3));
}

// =====================================================
// TABLES
// =====================================================

#[test]
fn test_table_basics() {
    let results = eval(
        r#"
local t = {}
t[1] = "one"
t.name = "test"
t["key"] = 99
return t[1], t.name, t.key
"#,
    )
    .unwrap();
    assert_eq!(
        results,
        vec![
            Value::string("one"),
            Value::string("test"),
            Value::Integer(99)
        ]
    );
}

#[test]
fn test_float_key_normalization() {
    assert_eq!(
        eval_one("local t = {} t[1] = 'x' return t[1.0]"),
        Value::string("x")
    );
}

#[test]
fn test_nil_write_deletes_key() {
    let v = eval_one(
        r#"
local t = {x = 1}
t.x = nil
local count = 0
for _ in pairs(t) do count = count + 1 end
return count
"#,
    );
    assert_eq!(v, Value::Integer(0));
}

#[test]
fn test_nil_key_write_errors() {
    assert!(eval("local t = {} t[nil] = 1").is_err());
    assert!(eval("local t = {} t[0/0] = 1").is_err());
}

#[test]
fn test_table_identity() {
    assert_eq!(eval_one("local t = {} local u = t return t == u"), Value::Boolean(true));
    assert_eq!(eval_one("return {} == {}"), Value::Boolean(false));
}

// =====================================================
// STRINGS
// =====================================================

#[test]
fn test_string_library() {
    assert_eq!(eval_one("return string.len('hello')"), Value::Integer(5));
    assert_eq!(eval_one("return string.sub('hello', 2, 4)"), Value::string("ell"));
    assert_eq!(eval_one("return string.sub('hello', -3)"), Value::string("llo"));
    assert_eq!(eval_one("return string.upper('abc')"), Value::string("ABC"));
    assert_eq!(eval_one("return string.rep('ab', 3)"), Value::string("ababab"));
}

#[test]
fn test_string_methods_via_metatable() {
    assert_eq!(eval_one("return ('hello'):upper()"), Value::string("HELLO"));
    assert_eq!(eval_one("local s = 'abc' return s:len()"), Value::Integer(3));
}

#[test]
fn test_string_format() {
    assert_eq!(
        eval_one("return string.format('%d-%s', 5, 'x')"),
        Value::string("5-x")
    );
    assert_eq!(
        eval_one("return string.format('%05d', 42)"),
        Value::string("00042")
    );
    assert_eq!(
        eval_one("return string.format('%.2f', 1.5)"),
        Value::string("1.50")
    );
}

#[test]
fn test_string_patterns() {
    assert_eq!(
        eval_one("return string.match('key=value', '(%w+)=(%w+)')"),
        Value::string("key")
    );
    assert_eq!(
        eval_one("return (string.gsub('hello world', 'o', '0'))"),
        Value::string("hell0 w0rld")
    );
    let results = eval("return string.find('abc def', 'def')").unwrap();
    assert_eq!(results[0], Value::Integer(5));
    assert_eq!(results[1], Value::Integer(7));
}

#[test]
fn test_gmatch_iteration() {
    let v = eval_one(
        r#"
local words = {}
for w in string.gmatch('one two three', '%a+') do
  words[#words + 1] = w
end
return #words .. ':' .. words[3]
"#,
    );
    assert_eq!(v, Value::string("3:three"));
}

#[test]
fn test_tostring_tonumber_roundtrip() {
    assert_eq!(eval_one("return tonumber(tostring(12345))"), Value::Integer(12345));
    assert_eq!(eval_one("return tonumber('0x10')"), Value::Integer(16));
    assert_eq!(eval_one("return tonumber('ff', 16)"), Value::Integer(255));
    assert_eq!(eval_one("return tonumber('not a number')"), Value::Nil);
}

// =====================================================
// ASSORTED STDLIB
// =====================================================

#[test]
fn test_table_library() {
    let v = eval_one(
        r#"
local t = {1, 2, 3}
table.insert(t, 4)
table.insert(t, 1, 0)
table.remove(t)
return table.concat(t, ',')
"#,
    );
    assert_eq!(v, Value::string("0,1,2,3"));
}

#[test]
fn test_table_unpack_pack() {
    let results = eval("return table.unpack({7, 8, 9})").unwrap();
    assert_eq!(
        results,
        vec![Value::Integer(7), Value::Integer(8), Value::Integer(9)]
    );
    assert_eq!(eval_one("return table.pack(1, 2, 3).n"), Value::Integer(3));
}

#[test]
fn test_table_sort() {
    let v = eval_one(
        r#"
local t = {5, 2, 8, 1}
table.sort(t)
return table.concat(t, ',')
"#,
    );
    assert_eq!(v, Value::string("1,2,5,8"));

    let v = eval_one(
        r#"
local t = {5, 2, 8, 1}
table.sort(t, function(a, b) return a > b end)
return table.concat(t, ',')
"#,
    );
    assert_eq!(v, Value::string("8,5,2,1"));
}

#[test]
fn test_math_library() {
    assert_eq!(eval_one("return math.floor(3.7)"), Value::Integer(3));
    assert_eq!(eval_one("return math.ceil(3.2)"), Value::Integer(4));
    // Integers pass through untouched, even outside f64's exact range.
    assert_eq!(
        eval_one("return math.ceil(9007199254740993)"),
        Value::Integer(9007199254740993)
    );
    assert_eq!(
        eval_one("return math.floor(math.maxinteger)"),
        Value::Integer(i64::MAX)
    );
    assert_eq!(eval_one("return math.abs(-5)"), Value::Integer(5));
    assert_eq!(eval_one("return math.max(3, 7, 2)"), Value::Integer(7));
    assert_eq!(eval_one("return math.type(1)"), Value::string("integer"));
    assert_eq!(eval_one("return math.type(1.0)"), Value::string("float"));
    assert_eq!(eval_one("return math.tointeger(7.0)"), Value::Integer(7));
    assert_eq!(eval_one("return math.tointeger(7.5)"), Value::Nil);
}

#[test]
fn test_raw_access() {
    let v = eval_one(
        r#"
local t = setmetatable({}, {__index = function() return "meta" end})
return rawget(t, "missing") == nil and t.missing == "meta"
"#,
    );
    assert_eq!(v, Value::Boolean(true));
}

#[test]
fn test_globals_table() {
    assert_eq!(eval_one("x = 5 return _G.x"), Value::Integer(5));
    assert_eq!(eval_one("_G.y = 6 return y"), Value::Integer(6));
    assert_eq!(eval_one("return _VERSION"), Value::string("Lua 5.4"));
}
