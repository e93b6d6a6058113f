//! Error values for the interpreter.
//!
//! Runtime errors are opaque carriers of a Lua value payload (anything passed
//! to `error(...)`) plus a synthesized traceback; syntax errors carry a chunk
//! name and line. Control-flow signals are not errors — they travel through
//! `eval::ControlFlow` — so the `Err` path here always means a real error.

use std::fmt;

use crate::value::Value;

#[derive(Debug, Clone)]
pub enum LuaError {
    Syntax {
        message: String,
        chunk: String,
        line: u32,
    },
    Runtime {
        payload: Value,
        traceback: Vec<String>,
    },
    /// Unwinding signal for `coroutine.close` on a suspended coroutine.
    /// Runs to-be-closed handlers on the way out but is not catchable by
    /// `pcall`; only the closing machinery consumes it.
    Cancelled,
}

impl LuaError {
    pub fn syntax(message: impl Into<String>, chunk: &str, line: u32) -> Self {
        LuaError::Syntax {
            message: message.into(),
            chunk: chunk.to_string(),
            line,
        }
    }

    /// A runtime error with a plain string payload.
    pub fn runtime(message: impl Into<String>) -> Self {
        LuaError::Runtime {
            payload: Value::string(message.into()),
            traceback: Vec::new(),
        }
    }

    /// A runtime error whose message is prefixed with `chunk:line:`, the way
    /// stock Lua reports positions.
    pub fn runtime_at(message: impl Into<String>, chunk: &str, line: u32) -> Self {
        LuaError::Runtime {
            payload: Value::string(format!("{}:{}: {}", chunk, line, message.into())),
            traceback: Vec::new(),
        }
    }

    /// Wraps an arbitrary Lua value as an error payload (`error(v)`).
    pub fn from_value(payload: Value) -> Self {
        LuaError::Runtime {
            payload,
            traceback: Vec::new(),
        }
    }

    pub fn type_error(operation: &str, type_name: &str) -> Self {
        Self::runtime(format!("attempt to {} a {} value", operation, type_name))
    }

    pub fn arith_error(type_name: &str) -> Self {
        Self::runtime(format!(
            "attempt to perform arithmetic on a {} value",
            type_name
        ))
    }

    pub fn compare_error(lhs: &str, rhs: &str) -> Self {
        Self::runtime(format!("attempt to compare {} with {}", lhs, rhs))
    }

    pub fn concat_error(type_name: &str) -> Self {
        Self::runtime(format!("attempt to concatenate a {} value", type_name))
    }

    pub fn bad_argument(n: usize, func: &str, expected: &str, got: &str) -> Self {
        Self::runtime(format!(
            "bad argument #{} to '{}' ({} expected, got {})",
            n, func, expected, got
        ))
    }

    pub fn stack_overflow() -> Self {
        Self::runtime("stack overflow (C stack depth exceeded)")
    }

    /// The Lua value observed by `pcall` handlers.
    pub fn payload(&self) -> Value {
        match self {
            LuaError::Syntax {
                message,
                chunk,
                line,
            } => Value::string(format!("{}:{}: {}", chunk, line, message)),
            LuaError::Runtime { payload, .. } => payload.clone(),
            LuaError::Cancelled => Value::string("coroutine closed"),
        }
    }

    /// True for the close-cancellation signal, which protected calls must
    /// pass through untouched.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, LuaError::Cancelled)
    }

    /// Attaches a synthesized traceback if none was recorded yet (the first
    /// raise site wins; rethrows keep the original trace).
    pub fn with_traceback(mut self, frames: Vec<String>) -> Self {
        if let LuaError::Runtime { traceback, .. } = &mut self {
            if traceback.is_empty() {
                *traceback = frames;
            }
        }
        self
    }

    pub fn traceback(&self) -> &[String] {
        match self {
            LuaError::Syntax { .. } | LuaError::Cancelled => &[],
            LuaError::Runtime { traceback, .. } => traceback,
        }
    }

    /// Human-readable message; non-string payloads are described rather than
    /// rendered.
    pub fn message(&self) -> String {
        match self {
            LuaError::Syntax {
                message,
                chunk,
                line,
            } => format!("{}:{}: {}", chunk, line, message),
            LuaError::Runtime { payload, .. } => match payload {
                Value::Str(s) => s.to_str_lossy(),
                Value::Integer(_) | Value::Float(_) => payload.display_string(),
                other => format!("(error object is a {} value)", other.type_name()),
            },
            LuaError::Cancelled => "coroutine closed".to_string(),
        }
    }
}

impl fmt::Display for LuaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl std::error::Error for LuaError {}

pub type LuaResult<T> = Result<T, LuaError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_at_prefixes_position() {
        let err = LuaError::runtime_at("boom", "script.lua", 7);
        assert_eq!(err.message(), "script.lua:7: boom");
    }

    #[test]
    fn test_payload_roundtrip() {
        let err = LuaError::from_value(Value::Integer(42));
        assert_eq!(err.payload(), Value::Integer(42));
        assert_eq!(err.message(), "42");
    }

    #[test]
    fn test_non_string_payload_description() {
        let err = LuaError::from_value(Value::new_table());
        assert!(err.message().contains("error object is a table value"));
    }

    #[test]
    fn test_type_error_shape() {
        let err = LuaError::type_error("call", "nil");
        assert_eq!(err.message(), "attempt to call a nil value");
    }

    #[test]
    fn test_bad_argument_shape() {
        let err = LuaError::bad_argument(1, "insert", "table", "nil");
        assert_eq!(
            err.message(),
            "bad argument #1 to 'insert' (table expected, got nil)"
        );
    }

    #[test]
    fn test_traceback_first_raise_wins() {
        let err = LuaError::runtime("x")
            .with_traceback(vec!["frame a".to_string()])
            .with_traceback(vec!["frame b".to_string()]);
        assert_eq!(err.traceback(), &["frame a".to_string()]);
    }

    #[test]
    fn test_syntax_error_display() {
        let err = LuaError::syntax("unexpected symbol", "test.lua", 3);
        assert_eq!(format!("{}", err), "test.lua:3: unexpected symbol");
    }
}
