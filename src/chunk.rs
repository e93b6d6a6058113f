//! Chunk recognition and the `load` mode gate.
//!
//! A binary chunk starts with 0x1B followed by "Lua". The serializer that
//! produces such chunks is an external collaborator; the core only
//! recognizes the signature and enforces the `"b"`/`"t"`/`"bt"` mode
//! string, rejecting binary input in text mode.

use crate::error::{LuaError, LuaResult};

/// Header prefix of a precompiled chunk.
pub const BINARY_SIGNATURE: &[u8] = b"\x1bLua";

/// Only the first byte marks a chunk as binary.
pub fn is_binary_chunk(bytes: &[u8]) -> bool {
    bytes.first() == Some(&0x1b)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadMode {
    Binary,
    Text,
    Both,
}

impl LoadMode {
    pub fn parse(mode: &str) -> Option<LoadMode> {
        match mode {
            "b" => Some(LoadMode::Binary),
            "t" => Some(LoadMode::Text),
            "bt" | "tb" => Some(LoadMode::Both),
            _ => None,
        }
    }

    pub fn allows_binary(&self) -> bool {
        matches!(self, LoadMode::Binary | LoadMode::Both)
    }

    pub fn allows_text(&self) -> bool {
        matches!(self, LoadMode::Text | LoadMode::Both)
    }
}

/// Validates a chunk against the requested mode. Text chunks pass through;
/// binary chunks are routed to the external serializer interface, which
/// this build does not bundle.
pub fn check_mode(mode: LoadMode, chunk: &[u8], chunk_name: &str) -> LuaResult<()> {
    if is_binary_chunk(chunk) {
        if !mode.allows_binary() {
            return Err(LuaError::runtime(format!(
                "attempt to load a binary chunk (mode is 't') in {}",
                chunk_name
            )));
        }
        return Err(LuaError::runtime(format!(
            "binary chunks are not supported by this loader ({})",
            chunk_name
        )));
    }
    if !mode.allows_text() {
        return Err(LuaError::runtime(format!(
            "attempt to load a text chunk (mode is 'b') in {}",
            chunk_name
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_detection() {
        assert!(is_binary_chunk(BINARY_SIGNATURE));
        assert!(is_binary_chunk(b"\x1b"));
        assert!(!is_binary_chunk(b"return 1"));
        assert!(!is_binary_chunk(b""));
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!(LoadMode::parse("b"), Some(LoadMode::Binary));
        assert_eq!(LoadMode::parse("t"), Some(LoadMode::Text));
        assert_eq!(LoadMode::parse("bt"), Some(LoadMode::Both));
        assert_eq!(LoadMode::parse("x"), None);
    }

    #[test]
    fn test_text_mode_rejects_binary() {
        let err = check_mode(LoadMode::Text, BINARY_SIGNATURE, "=(load)").unwrap_err();
        assert!(err.message().contains("binary chunk"));
    }

    #[test]
    fn test_binary_mode_rejects_text() {
        let err = check_mode(LoadMode::Binary, b"return 1", "=(load)").unwrap_err();
        assert!(err.message().contains("text chunk"));
    }

    #[test]
    fn test_text_chunk_passes() {
        assert!(check_mode(LoadMode::Both, b"return 1", "=(load)").is_ok());
        assert!(check_mode(LoadMode::Text, b"return 1", "=(load)").is_ok());
    }
}
