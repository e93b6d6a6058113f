//! Error raising, protected calls, and error-message shapes.

use lumo::{Interpreter, LuaResult, Value};

fn eval(src: &str) -> LuaResult<Vec<Value>> {
    let mut interp = Interpreter::new();
    interp.eval_source(src.as_bytes(), "test")
}

fn eval_one(src: &str) -> Value {
    eval(src).unwrap().into_iter().next().unwrap_or(Value::Nil)
}

#[test]
fn test_pcall_success() {
    let results = eval("return pcall(function() return 1, 2 end)").unwrap();
    assert_eq!(
        results,
        vec![Value::Boolean(true), Value::Integer(1), Value::Integer(2)]
    );
}

#[test]
fn test_pcall_catches_error() {
    let results = eval("return pcall(function() error('boom') end)").unwrap();
    assert_eq!(results[0], Value::Boolean(false));
    match &results[1] {
        Value::Str(s) => assert!(s.to_str_lossy().contains("boom")),
        other => panic!("expected string payload, got {:?}", other),
    }
}

#[test]
fn test_error_message_carries_position() {
    let results = eval("return pcall(function() error('oops') end)").unwrap();
    match &results[1] {
        Value::Str(s) => {
            let msg = s.to_str_lossy();
            assert!(msg.contains("test:"), "missing chunk prefix: {}", msg);
            assert!(msg.ends_with("oops"), "unexpected message: {}", msg);
        }
        other => panic!("expected string payload, got {:?}", other),
    }
}

#[test]
fn test_error_level_zero_suppresses_position() {
    let results = eval("return pcall(function() error('bare', 0) end)").unwrap();
    assert_eq!(results[1], Value::string("bare"));
}

#[test]
fn test_error_with_non_string_payload() {
    let results = eval(
        r#"
local ok, err = pcall(function() error({code = 42}) end)
return ok, err.code
"#,
    )
    .unwrap();
    assert_eq!(results[0], Value::Boolean(false));
    assert_eq!(results[1], Value::Integer(42));
}

#[test]
fn test_xpcall_handler() {
    let results = eval(
        r#"
local ok, msg = xpcall(function() error("boom") end, function(e) return "caught: " .. e end)
return ok, msg
"#,
    )
    .unwrap();
    assert_eq!(results[0], Value::Boolean(false));
    match &results[1] {
        Value::Str(s) => {
            let msg = s.to_str_lossy();
            assert!(msg.starts_with("caught: "), "unexpected: {}", msg);
            assert!(msg.contains("boom"), "unexpected: {}", msg);
        }
        other => panic!("expected string, got {:?}", other),
    }
}

#[test]
fn test_xpcall_handler_failure() {
    let results = eval(
        r#"
return xpcall(function() error("a") end, function() error("handler fails") end)
"#,
    )
    .unwrap();
    assert_eq!(results[0], Value::Boolean(false));
    assert_eq!(results[1], Value::string("error in error handling"));
}

#[test]
fn test_nested_pcall() {
    let results = eval(
        r#"
local ok1 = pcall(function()
  local ok2, err2 = pcall(function() error("inner") end)
  assert(not ok2)
  error("outer")
end)
return ok1
"#,
    )
    .unwrap();
    assert_eq!(results[0], Value::Boolean(false));
}

#[test]
fn test_assert_passes_values_through() {
    let results = eval("return assert(1, 'unused', 'extra')").unwrap();
    assert_eq!(
        results,
        vec![Value::Integer(1), Value::string("unused"), Value::string("extra")]
    );
}

#[test]
fn test_assert_failure_message() {
    let results = eval("return pcall(function() assert(false, 'custom') end)").unwrap();
    assert_eq!(results[1], Value::string("custom"));
    let results = eval("return pcall(function() assert(nil) end)").unwrap();
    assert_eq!(results[1], Value::string("assertion failed!"));
}

#[test]
fn test_type_error_messages() {
    let err = eval("local x = nil return x + 1").unwrap_err();
    assert!(
        err.message().contains("arithmetic on a nil value"),
        "got: {}",
        err.message()
    );

    let err = eval("return {} < {}").unwrap_err();
    assert!(err.message().contains("attempt to compare"));

    let err = eval("return #5").unwrap_err();
    assert!(err.message().contains("length of a number value"));

    let err = eval("return nil .. 'x'").unwrap_err();
    assert!(err.message().contains("concatenate a nil value"));
}

#[test]
fn test_integer_division_by_zero() {
    assert!(eval("return 1 // 0").is_err());
    assert!(eval("return 1 % 0").is_err());
    // Float division by zero is inf, not an error.
    assert_eq!(eval_one("return 1 / 0"), Value::Float(f64::INFINITY));
}

#[test]
fn test_const_assignment_rejected() {
    let err = eval("local x <const> = 1 x = 2").unwrap_err();
    assert!(
        err.message().contains("const"),
        "got: {}",
        err.message()
    );
}

#[test]
fn test_close_requires_closable() {
    assert!(eval("local x <close> = 5").is_err());
    assert!(eval("local x <close> = nil return 1").is_ok());
    assert!(eval("local x <close> = false return 1").is_ok());
}

#[test]
fn test_stack_overflow_without_tail_call() {
    let err = eval(
        r#"
local function f(n) return 1 + f(n + 1) end
return f(1)
"#,
    )
    .unwrap_err();
    assert!(
        err.message().contains("stack overflow"),
        "got: {}",
        err.message()
    );
}

#[test]
fn test_stack_overflow_caught_by_pcall() {
    let results = eval(
        r#"
local function f() return 1 + f() end
return pcall(f)
"#,
    )
    .unwrap();
    assert_eq!(results[0], Value::Boolean(false));
}

#[test]
fn test_break_outside_loop_is_error() {
    let err = eval("local function f() break end f()").unwrap_err();
    assert!(
        err.message().contains("break"),
        "got: {}",
        err.message()
    );
}

#[test]
fn test_undefined_goto_rejected_at_load() {
    let err = eval("goto nowhere").unwrap_err();
    assert!(err.message().contains("nowhere"));
}

#[test]
fn test_error_rethrow_preserves_payload() {
    let results = eval(
        r#"
local sentinel = {}
local ok, err = pcall(function()
  local ok2, inner = pcall(function() error(sentinel) end)
  error(inner)
end)
return ok, err == sentinel
"#,
    )
    .unwrap();
    assert_eq!(results[0], Value::Boolean(false));
    assert_eq!(results[1], Value::Boolean(true));
}

#[test]
fn test_uncaught_error_reaches_embedder() {
    let mut interp = Interpreter::new();
    let err = interp
        .eval_source(b"error('top level')", "script.lua")
        .unwrap_err();
    assert!(err.message().contains("top level"));
    assert!(err.message().contains("script.lua"));
}

#[test]
fn test_runtime_error_has_traceback() {
    let mut interp = Interpreter::new();
    let err = interp
        .eval_source(
            b"local function inner() error('deep') end\nlocal function outer() inner() end\nouter()",
            "script.lua",
        )
        .unwrap_err();
    assert!(!err.traceback().is_empty());
}
