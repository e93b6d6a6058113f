//! Lua tables: an integer-indexed array part plus a general hash part.
//!
//! Keys are normalized before touching either part: float keys with an exact
//! integer value become integers, `-0.0` becomes `+0.0`, and nil/NaN keys are
//! rejected on write. Writing nil deletes. The `#` operator returns a border.

use std::cell::RefCell;
use std::rc::Rc;

use ahash::AHashMap;

use crate::value::Value;

/// Why a key was rejected on write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyError {
    NilKey,
    NanKey,
}

impl KeyError {
    pub fn message(&self) -> &'static str {
        match self {
            KeyError::NilKey => "table index is nil",
            KeyError::NanKey => "table index is NaN",
        }
    }
}

#[derive(Default)]
pub struct Table {
    /// Dense 1-based prefix; may contain nil holes after deletion.
    array: Vec<Value>,
    hash: AHashMap<Value, Value>,
    pub metatable: Option<Rc<RefCell<Table>>>,
}

/// Normalizes a key to its canonical table form. Errors on nil and NaN.
pub fn normalize_key(key: Value) -> Result<Value, KeyError> {
    match key {
        Value::Nil => Err(KeyError::NilKey),
        Value::Float(f) if f.is_nan() => Err(KeyError::NanKey),
        Value::Float(f) => match crate::value::float_to_exact_int(f) {
            Some(i) => Ok(Value::Integer(i)),
            None => Ok(Value::Float(f)),
        },
        Value::Multi(_) => Ok(key.collapse()),
        k => Ok(k),
    }
}

impl Table {
    pub fn new() -> Self {
        Table {
            array: Vec::new(),
            hash: AHashMap::new(),
            metatable: None,
        }
    }

    pub fn with_capacity(narr: usize, nrec: usize) -> Self {
        Table {
            array: Vec::with_capacity(narr),
            hash: AHashMap::with_capacity(nrec),
            metatable: None,
        }
    }

    /// Raw read; nil and NaN keys simply miss.
    pub fn get(&self, key: &Value) -> Value {
        let key = match normalize_key(key.clone()) {
            Ok(k) => k,
            Err(_) => return Value::Nil,
        };
        if let Value::Integer(i) = key {
            if i >= 1 && (i as usize) <= self.array.len() {
                return self.array[i as usize - 1].clone();
            }
        }
        self.hash.get(&key).cloned().unwrap_or(Value::Nil)
    }

    /// Raw write; nil value deletes, nil/NaN keys error.
    pub fn set(&mut self, key: Value, value: Value) -> Result<(), KeyError> {
        let key = normalize_key(key)?;
        if let Value::Integer(i) = key {
            if i >= 1 {
                let idx = i as usize;
                if idx <= self.array.len() {
                    self.array[idx - 1] = value;
                    if idx == self.array.len() {
                        self.trim_array_tail();
                    }
                    return Ok(());
                }
                if idx == self.array.len() + 1 {
                    if value.is_nil() {
                        self.hash.remove(&key);
                        return Ok(());
                    }
                    self.array.push(value);
                    self.migrate_from_hash();
                    return Ok(());
                }
            }
        }
        if value.is_nil() {
            self.hash.remove(&key);
        } else {
            self.hash.insert(key, value);
        }
        Ok(())
    }

    /// After appending to the array part, pull any now-contiguous integer
    /// keys out of the hash part.
    fn migrate_from_hash(&mut self) {
        loop {
            let next = Value::Integer(self.array.len() as i64 + 1);
            match self.hash.remove(&next) {
                Some(v) => self.array.push(v),
                None => break,
            }
        }
    }

    fn trim_array_tail(&mut self) {
        while matches!(self.array.last(), Some(Value::Nil)) {
            self.array.pop();
        }
    }

    /// A border: some n with `t[n] ~= nil` and `t[n+1] == nil` (0 when the
    /// table starts empty). With holes present, any border is acceptable.
    pub fn border(&self) -> i64 {
        let n = self.array.len();
        if n == 0 {
            // Array part empty; a dense run may still live in the hash part.
            if self.hash.get(&Value::Integer(1)).is_none() {
                return 0;
            }
            let mut i: i64 = 1;
            while self.hash.get(&Value::Integer(i + 1)).is_some() {
                i += 1;
            }
            return i;
        }
        if !self.array[n - 1].is_nil() {
            return n as i64;
        }
        // Binary search for a boundary inside the array part.
        let (mut lo, mut hi) = (0usize, n - 1);
        while hi - lo > 1 {
            let mid = (lo + hi) / 2;
            if self.array[mid].is_nil() {
                hi = mid;
            } else {
                lo = mid;
            }
        }
        if self.array[lo].is_nil() {
            0
        } else {
            lo as i64 + 1
        }
    }

    /// Stateless iteration for `next`: nil starts, the last key of the
    /// previous step continues. Returns None when exhausted.
    pub fn next_entry(&self, key: &Value) -> Option<(Value, Value)> {
        let start_index = match key {
            Value::Nil => 0,
            Value::Integer(i) if *i >= 1 && (*i as usize) <= self.array.len() => *i as usize,
            _ => {
                // Key lives in the hash part: find it and return its successor.
                let normalized = normalize_key(key.clone()).ok()?;
                let mut found = false;
                for (k, v) in self.hash.iter() {
                    if found {
                        return Some((k.clone(), v.clone()));
                    }
                    if *k == normalized {
                        found = true;
                    }
                }
                return None;
            }
        };
        for (offset, v) in self.array[start_index..].iter().enumerate() {
            if !v.is_nil() {
                return Some((
                    Value::Integer((start_index + offset) as i64 + 1),
                    v.clone(),
                ));
            }
        }
        self.hash
            .iter()
            .next()
            .map(|(k, v)| (k.clone(), v.clone()))
    }

    /// Number of live entries across both parts (diagnostics only).
    pub fn entry_count(&self) -> usize {
        self.array.iter().filter(|v| !v.is_nil()).count() + self.hash.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_array_part_growth() {
        let mut t = Table::new();
        for i in 1..=5 {
            t.set(Value::Integer(i), Value::Integer(i * 10)).unwrap();
        }
        assert_eq!(t.border(), 5);
        assert_eq!(t.get(&Value::Integer(3)), Value::Integer(30));
    }

    #[test]
    fn test_nil_write_deletes() {
        let mut t = Table::new();
        t.set(Value::string("k"), Value::Integer(1)).unwrap();
        assert_eq!(t.get(&Value::string("k")), Value::Integer(1));
        t.set(Value::string("k"), Value::Nil).unwrap();
        assert_eq!(t.get(&Value::string("k")), Value::Nil);
        assert_eq!(t.entry_count(), 0);
    }

    #[test]
    fn test_nil_and_nan_keys_rejected() {
        let mut t = Table::new();
        assert_eq!(
            t.set(Value::Nil, Value::Integer(1)),
            Err(KeyError::NilKey)
        );
        assert_eq!(
            t.set(Value::Float(f64::NAN), Value::Integer(1)),
            Err(KeyError::NanKey)
        );
    }

    #[test]
    fn test_float_key_normalization() {
        let mut t = Table::new();
        t.set(Value::Float(2.0), Value::string("two")).unwrap();
        assert_eq!(t.get(&Value::Integer(2)), Value::string("two"));
        t.set(Value::Integer(3), Value::string("three")).unwrap();
        assert_eq!(t.get(&Value::Float(3.0)), Value::string("three"));
    }

    #[test]
    fn test_negative_zero_key() {
        let mut t = Table::new();
        t.set(Value::Float(-0.0), Value::string("zero")).unwrap();
        assert_eq!(t.get(&Value::Float(0.0)), Value::string("zero"));
        assert_eq!(t.get(&Value::Integer(0)), Value::string("zero"));
    }

    #[test]
    fn test_hash_to_array_migration() {
        let mut t = Table::new();
        // Insert out of order: 3 lands in hash, then 1 and 2 arrive.
        t.set(Value::Integer(3), Value::Integer(30)).unwrap();
        t.set(Value::Integer(1), Value::Integer(10)).unwrap();
        t.set(Value::Integer(2), Value::Integer(20)).unwrap();
        assert_eq!(t.border(), 3);
    }

    #[test]
    fn test_border_with_trailing_nil() {
        let mut t = Table::new();
        for i in 1..=4 {
            t.set(Value::Integer(i), Value::Integer(i)).unwrap();
        }
        t.set(Value::Integer(4), Value::Nil).unwrap();
        assert_eq!(t.border(), 3);
    }

    #[test]
    fn test_border_empty() {
        let t = Table::new();
        assert_eq!(t.border(), 0);
    }

    #[test]
    fn test_border_is_valid_with_hole() {
        let mut t = Table::new();
        for i in 1..=6 {
            t.set(Value::Integer(i), Value::Integer(i)).unwrap();
        }
        t.set(Value::Integer(4), Value::Nil).unwrap();
        let b = t.border();
        // Any border is legal: t[b] ~= nil and t[b+1] == nil.
        assert!(!t.get(&Value::Integer(b)).is_nil());
        assert!(t.get(&Value::Integer(b + 1)).is_nil());
    }

    #[test]
    fn test_next_entry_traverses_everything() {
        let mut t = Table::new();
        t.set(Value::Integer(1), Value::Integer(10)).unwrap();
        t.set(Value::Integer(2), Value::Integer(20)).unwrap();
        t.set(Value::string("a"), Value::Integer(30)).unwrap();

        let mut seen = 0;
        let mut key = Value::Nil;
        while let Some((k, _)) = t.next_entry(&key) {
            seen += 1;
            key = k;
        }
        assert_eq!(seen, 3);
    }

    #[test]
    fn test_deleted_key_absent_from_iteration() {
        let mut t = Table::new();
        t.set(Value::string("x"), Value::Integer(1)).unwrap();
        t.set(Value::string("y"), Value::Integer(2)).unwrap();
        t.set(Value::string("x"), Value::Nil).unwrap();

        let mut key = Value::Nil;
        while let Some((k, _)) = t.next_entry(&key) {
            assert!(!k.raw_eq(&Value::string("x")));
            key = k;
        }
    }
}
