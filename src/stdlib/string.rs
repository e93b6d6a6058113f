//! The string library, including a Lua pattern matcher.
//!
//! Strings are byte sequences; every function here indexes by byte. The
//! pattern matcher implements Lua 5.4 semantics for classes, sets,
//! quantifiers, anchors, captures, and `%b` balance matching. `%f` frontier
//! patterns are supported; back-references (`%1` in patterns) are not.

use std::cell::RefCell;
use std::rc::Rc;

use super::validation;
use crate::error::{LuaError, LuaResult};
use crate::eval::Interpreter;
use crate::value::Value;

// ---------------------------------------------------------------------------
// Plain string functions
// ---------------------------------------------------------------------------

pub fn lua_len(_interp: &mut Interpreter, args: Vec<Value>) -> LuaResult<Value> {
    let s = validation::to_str("len", 1, &validation::arg(&args, 1))?;
    Ok(Value::Integer(s.len() as i64))
}

/// Translates a 1-based (possibly negative) Lua string index.
fn str_index(i: i64, len: usize) -> i64 {
    if i >= 0 {
        i
    } else {
        len as i64 + i + 1
    }
}

pub fn lua_sub(_interp: &mut Interpreter, args: Vec<Value>) -> LuaResult<Value> {
    let s = validation::to_str("sub", 1, &validation::arg(&args, 1))?;
    let len = s.len();
    let i = validation::to_int("sub", 2, &validation::arg(&args, 2))?;
    let j = validation::opt_int("sub", 3, &args, -1)?;
    let start = str_index(i, len).max(1);
    let stop = str_index(j, len).min(len as i64);
    if start > stop {
        return Ok(Value::string(""));
    }
    Ok(Value::string(
        s.as_bytes()[start as usize - 1..stop as usize].to_vec(),
    ))
}

pub fn lua_upper(_interp: &mut Interpreter, args: Vec<Value>) -> LuaResult<Value> {
    let s = validation::to_str("upper", 1, &validation::arg(&args, 1))?;
    Ok(Value::string(s.as_bytes().to_ascii_uppercase()))
}

pub fn lua_lower(_interp: &mut Interpreter, args: Vec<Value>) -> LuaResult<Value> {
    let s = validation::to_str("lower", 1, &validation::arg(&args, 1))?;
    Ok(Value::string(s.as_bytes().to_ascii_lowercase()))
}

pub fn lua_rep(_interp: &mut Interpreter, args: Vec<Value>) -> LuaResult<Value> {
    let s = validation::to_str("rep", 1, &validation::arg(&args, 1))?;
    let n = validation::to_int("rep", 2, &validation::arg(&args, 2))?;
    let sep = match validation::arg(&args, 3) {
        Value::Nil => Vec::new(),
        v => validation::to_str("rep", 3, &v)?.as_bytes().to_vec(),
    };
    if n <= 0 {
        return Ok(Value::string(""));
    }
    let mut out = Vec::with_capacity(s.len() * n as usize);
    for k in 0..n {
        if k > 0 {
            out.extend_from_slice(&sep);
        }
        out.extend_from_slice(s.as_bytes());
    }
    Ok(Value::string(out))
}

pub fn lua_reverse(_interp: &mut Interpreter, args: Vec<Value>) -> LuaResult<Value> {
    let s = validation::to_str("reverse", 1, &validation::arg(&args, 1))?;
    let mut bytes = s.as_bytes().to_vec();
    bytes.reverse();
    Ok(Value::string(bytes))
}

pub fn lua_byte(_interp: &mut Interpreter, args: Vec<Value>) -> LuaResult<Value> {
    let s = validation::to_str("byte", 1, &validation::arg(&args, 1))?;
    let len = s.len();
    let i = validation::opt_int("byte", 2, &args, 1)?;
    let j = validation::opt_int("byte", 3, &args, i)?;
    let start = str_index(i, len).max(1);
    let stop = str_index(j, len).min(len as i64);
    let mut out = Vec::new();
    let mut k = start;
    while k <= stop {
        out.push(Value::Integer(s.as_bytes()[k as usize - 1] as i64));
        k += 1;
    }
    Ok(Value::Multi(out))
}

pub fn lua_char(_interp: &mut Interpreter, args: Vec<Value>) -> LuaResult<Value> {
    let mut bytes = Vec::with_capacity(args.len());
    for (i, v) in args.iter().enumerate() {
        let n = validation::to_int("char", i + 1, v)?;
        if !(0..=255).contains(&n) {
            return Err(LuaError::runtime(format!(
                "bad argument #{} to 'char' (value out of range)",
                i + 1
            )));
        }
        bytes.push(n as u8);
    }
    Ok(Value::string(bytes))
}

/// The serializer for precompiled chunks lives outside the core runtime.
pub fn lua_dump(_interp: &mut Interpreter, args: Vec<Value>) -> LuaResult<Value> {
    validation::to_function("dump", 1, &validation::arg(&args, 1))?;
    Err(LuaError::runtime("unable to dump given function"))
}

// ---------------------------------------------------------------------------
// string.format
// ---------------------------------------------------------------------------

pub fn lua_format(interp: &mut Interpreter, args: Vec<Value>) -> LuaResult<Value> {
    let fmt = validation::to_str("format", 1, &validation::arg(&args, 1))?;
    let fmt = fmt.as_bytes();
    let mut out: Vec<u8> = Vec::with_capacity(fmt.len());
    let mut arg_i = 1usize;
    let mut i = 0usize;
    while i < fmt.len() {
        if fmt[i] != b'%' {
            out.push(fmt[i]);
            i += 1;
            continue;
        }
        i += 1;
        if i < fmt.len() && fmt[i] == b'%' {
            out.push(b'%');
            i += 1;
            continue;
        }
        // flags, width, precision
        let spec_start = i;
        while i < fmt.len() && matches!(fmt[i], b'-' | b'+' | b' ' | b'#' | b'0') {
            i += 1;
        }
        while i < fmt.len() && fmt[i].is_ascii_digit() {
            i += 1;
        }
        let mut precision: Option<usize> = None;
        if i < fmt.len() && fmt[i] == b'.' {
            i += 1;
            let p_start = i;
            while i < fmt.len() && fmt[i].is_ascii_digit() {
                i += 1;
            }
            precision = std::str::from_utf8(&fmt[p_start..i])
                .ok()
                .and_then(|s| s.parse().ok())
                .or(Some(0));
        }
        let spec = std::str::from_utf8(&fmt[spec_start..i]).unwrap_or("").to_string();
        let conv = *fmt.get(i).ok_or_else(|| {
            LuaError::runtime("invalid conversion to 'format' (ends with '%')")
        })?;
        i += 1;
        arg_i += 1;
        let v = validation::arg(&args, arg_i);
        let piece = format_one(interp, conv, &spec, precision, &v, arg_i)?;
        out.extend_from_slice(&piece);
    }
    Ok(Value::string(out))
}

fn pad(s: String, spec: &str) -> String {
    // Supports the common "-" flag, zero fill, and a numeric width.
    let left = spec.contains('-');
    let zero = spec.contains('0') && !left;
    let width: usize = spec
        .trim_start_matches(['-', '+', ' ', '#', '0'])
        .parse()
        .unwrap_or(0);
    if s.len() >= width {
        return s;
    }
    let fill = width - s.len();
    if left {
        format!("{}{}", s, " ".repeat(fill))
    } else if zero {
        let (sign, digits) = match s.strip_prefix('-') {
            Some(d) => ("-", d),
            None => ("", s.as_str()),
        };
        format!("{}{}{}", sign, "0".repeat(fill), digits)
    } else {
        format!("{}{}", " ".repeat(fill), s)
    }
}

fn format_one(
    interp: &mut Interpreter,
    conv: u8,
    spec: &str,
    precision: Option<usize>,
    v: &Value,
    arg_i: usize,
) -> LuaResult<Vec<u8>> {
    let name = "format";
    let piece = match conv {
        b'd' | b'i' => pad(validation::to_int(name, arg_i, v)?.to_string(), spec),
        b'u' => pad(
            (validation::to_int(name, arg_i, v)? as u64).to_string(),
            spec,
        ),
        b'x' => pad(format!("{:x}", validation::to_int(name, arg_i, v)?), spec),
        b'X' => pad(format!("{:X}", validation::to_int(name, arg_i, v)?), spec),
        b'o' => pad(format!("{:o}", validation::to_int(name, arg_i, v)?), spec),
        b'c' => {
            let n = validation::to_int(name, arg_i, v)?;
            return Ok(vec![n as u8]);
        }
        b'f' | b'F' => {
            let f = validation::to_float(name, arg_i, v)?;
            pad(format!("{:.*}", precision.unwrap_or(6), f), spec)
        }
        b'e' => {
            let f = validation::to_float(name, arg_i, v)?;
            pad(format!("{:.*e}", precision.unwrap_or(6), f), spec)
        }
        b'g' | b'G' => {
            let f = validation::to_float(name, arg_i, v)?;
            pad(crate::value::float_to_display(f), spec)
        }
        b's' => {
            let s = crate::meta::tostring_value(interp, v.clone())?;
            let mut text = match &s {
                Value::Str(s) => s.to_str_lossy(),
                other => other.display_string(),
            };
            if let Some(p) = precision {
                text.truncate(p);
            }
            pad(text, spec)
        }
        b'q' => {
            let s = validation::to_str(name, arg_i, v)?;
            let mut quoted = vec![b'"'];
            for &b in s.as_bytes() {
                match b {
                    b'"' => quoted.extend_from_slice(b"\\\""),
                    b'\\' => quoted.extend_from_slice(b"\\\\"),
                    b'\n' => quoted.extend_from_slice(b"\\n"),
                    b'\r' => quoted.extend_from_slice(b"\\r"),
                    0 => quoted.extend_from_slice(b"\\0"),
                    _ => quoted.push(b),
                }
            }
            quoted.push(b'"');
            return Ok(quoted);
        }
        other => {
            return Err(LuaError::runtime(format!(
                "invalid conversion '%{}' to 'format'",
                other as char
            )))
        }
    };
    Ok(piece.into_bytes())
}

// ---------------------------------------------------------------------------
// Pattern matching
// ---------------------------------------------------------------------------

const MAX_CAPTURES: usize = 32;

#[derive(Clone, Copy, PartialEq)]
enum CapState {
    Unclosed,
    Position,
    Len(usize),
}

struct MatchState<'a> {
    src: &'a [u8],
    pat: &'a [u8],
    captures: Vec<(usize, CapState)>,
}

fn class_match(c: u8, cl: u8) -> bool {
    let res = match cl.to_ascii_lowercase() {
        b'a' => c.is_ascii_alphabetic(),
        b'c' => c.is_ascii_control(),
        b'd' => c.is_ascii_digit(),
        b'g' => c.is_ascii_graphic(),
        b'l' => c.is_ascii_lowercase(),
        b'p' => c.is_ascii_punctuation(),
        b's' => matches!(c, b' ' | b'\t' | b'\n' | b'\r' | 0x0b | 0x0c),
        b'u' => c.is_ascii_uppercase(),
        b'w' => c.is_ascii_alphanumeric(),
        b'x' => c.is_ascii_hexdigit(),
        lit => return c == lit,
    };
    if cl.is_ascii_uppercase() {
        !res
    } else {
        res
    }
}

impl<'a> MatchState<'a> {
    fn new(src: &'a [u8], pat: &'a [u8]) -> Self {
        MatchState {
            src,
            pat,
            captures: Vec::new(),
        }
    }

    /// Index just past one pattern item starting at `p`.
    fn item_end(&self, p: usize) -> Option<usize> {
        match *self.pat.get(p)? {
            b'%' => {
                self.pat.get(p + 1)?;
                Some(p + 2)
            }
            b'[' => {
                let mut i = p + 1;
                if self.pat.get(i) == Some(&b'^') {
                    i += 1;
                }
                loop {
                    let c = *self.pat.get(i)?;
                    i += 1;
                    if c == b'%' {
                        self.pat.get(i)?;
                        i += 1;
                    }
                    if self.pat.get(i)? == &b']' {
                        return Some(i + 1);
                    }
                }
            }
            _ => Some(p + 1),
        }
    }

    fn match_set(&self, c: u8, p: usize, ep: usize) -> bool {
        let mut i = p + 1;
        let mut negate = false;
        if self.pat.get(i) == Some(&b'^') {
            negate = true;
            i += 1;
        }
        let mut found = false;
        let set_end = ep - 1;
        while i < set_end {
            if self.pat[i] == b'%' && i + 1 < set_end {
                if class_match(c, self.pat[i + 1]) {
                    found = true;
                }
                i += 2;
            } else if i + 2 < set_end && self.pat[i + 1] == b'-' {
                if self.pat[i] <= c && c <= self.pat[i + 2] {
                    found = true;
                }
                i += 3;
            } else {
                if self.pat[i] == c {
                    found = true;
                }
                i += 1;
            }
        }
        found != negate
    }

    fn single_char(&self, c: u8, p: usize, ep: usize) -> bool {
        match self.pat[p] {
            b'.' => true,
            b'%' => class_match(c, self.pat[p + 1]),
            b'[' => self.match_set(c, p, ep),
            pc => pc == c,
        }
    }

    fn single(&self, s: usize, p: usize, ep: usize) -> bool {
        s < self.src.len() && self.single_char(self.src[s], p, ep)
    }

    fn do_match(&mut self, mut s: usize, mut p: usize) -> Option<usize> {
        loop {
            if p >= self.pat.len() {
                return Some(s);
            }
            match self.pat[p] {
                b'(' => {
                    return if self.pat.get(p + 1) == Some(&b')') {
                        self.start_capture(s, p + 2, CapState::Position)
                    } else {
                        self.start_capture(s, p + 1, CapState::Unclosed)
                    };
                }
                b')' => return self.end_capture(s, p + 1),
                b'$' if p + 1 == self.pat.len() => {
                    return if s == self.src.len() { Some(s) } else { None };
                }
                b'%' => match self.pat.get(p + 1) {
                    Some(b'b') => return self.match_balance(s, p + 2),
                    Some(b'f') => {
                        let set_p = p + 2;
                        if self.pat.get(set_p) != Some(&b'[') {
                            return None;
                        }
                        let ep = self.item_end(set_p)?;
                        let prev = if s == 0 { 0 } else { self.src[s - 1] };
                        let cur = if s < self.src.len() { self.src[s] } else { 0 };
                        if !self.match_set(prev, set_p, ep) && self.match_set(cur, set_p, ep) {
                            p = ep;
                            continue;
                        }
                        return None;
                    }
                    _ => {}
                },
                _ => {}
            }

            let ep = self.item_end(p)?;
            let matched = self.single(s, p, ep);
            match self.pat.get(ep) {
                Some(b'?') => {
                    if matched {
                        if let Some(r) = self.do_match(s + 1, ep + 1) {
                            return Some(r);
                        }
                    }
                    p = ep + 1;
                }
                Some(b'+') => {
                    return if matched {
                        self.max_expand(s + 1, p, ep)
                    } else {
                        None
                    };
                }
                Some(b'*') => return self.max_expand(s, p, ep),
                Some(b'-') => return self.min_expand(s, p, ep),
                _ => {
                    if !matched {
                        return None;
                    }
                    s += 1;
                    p = ep;
                }
            }
        }
    }

    fn max_expand(&mut self, s: usize, p: usize, ep: usize) -> Option<usize> {
        let mut count = 0;
        while self.single(s + count, p, ep) {
            count += 1;
        }
        loop {
            if let Some(r) = self.do_match(s + count, ep + 1) {
                return Some(r);
            }
            if count == 0 {
                return None;
            }
            count -= 1;
        }
    }

    fn min_expand(&mut self, mut s: usize, p: usize, ep: usize) -> Option<usize> {
        loop {
            if let Some(r) = self.do_match(s, ep + 1) {
                return Some(r);
            }
            if self.single(s, p, ep) {
                s += 1;
            } else {
                return None;
            }
        }
    }

    fn start_capture(&mut self, s: usize, p: usize, state: CapState) -> Option<usize> {
        if self.captures.len() >= MAX_CAPTURES {
            return None;
        }
        self.captures.push((s, state));
        let r = self.do_match(s, p);
        if r.is_none() {
            self.captures.pop();
        }
        r
    }

    fn end_capture(&mut self, s: usize, p: usize) -> Option<usize> {
        let idx = self
            .captures
            .iter()
            .rposition(|(_, st)| *st == CapState::Unclosed)?;
        let start = self.captures[idx].0;
        self.captures[idx].1 = CapState::Len(s - start);
        let r = self.do_match(s, p);
        if r.is_none() {
            self.captures[idx].1 = CapState::Unclosed;
        }
        r
    }

    /// `%bxy`: a balanced run starting with `x` and ending with `y`.
    fn match_balance(&mut self, s: usize, p: usize) -> Option<usize> {
        let open = *self.pat.get(p)?;
        let close = *self.pat.get(p + 1)?;
        if s >= self.src.len() || self.src[s] != open {
            return None;
        }
        let mut depth = 1;
        let mut i = s + 1;
        while i < self.src.len() {
            if self.src[i] == close {
                depth -= 1;
                if depth == 0 {
                    return self.do_match(i + 1, p + 2);
                }
            } else if self.src[i] == open {
                depth += 1;
            }
            i += 1;
        }
        None
    }

    /// Captured values, or the whole match when the pattern has none.
    fn capture_values(&self, m_start: usize, m_end: usize) -> Vec<Value> {
        if self.captures.is_empty() {
            return vec![Value::string(self.src[m_start..m_end].to_vec())];
        }
        self.captures
            .iter()
            .map(|(start, st)| match st {
                CapState::Position => Value::Integer(*start as i64 + 1),
                CapState::Len(len) => Value::string(self.src[*start..*start + len].to_vec()),
                CapState::Unclosed => Value::Nil,
            })
            .collect()
    }
}

/// Finds the first match at or after `init`; returns (start, end, captures).
fn pattern_find(src: &[u8], pat: &[u8], init: usize) -> Option<(usize, usize, Vec<Value>)> {
    let anchor = pat.first() == Some(&b'^');
    let p_start = if anchor { 1 } else { 0 };
    let mut s = init;
    loop {
        let mut ms = MatchState::new(src, pat);
        if let Some(e) = ms.do_match(s, p_start) {
            let caps = ms.capture_values(s, e);
            return Some((s, e, caps));
        }
        if anchor || s >= src.len() {
            return None;
        }
        s += 1;
    }
}

fn init_index(args: &[Value], i: usize, len: usize) -> LuaResult<usize> {
    let init = validation::opt_int("find", i, args, 1)?;
    let idx = str_index(init, len);
    Ok(if idx < 1 { 0 } else { (idx as usize - 1).min(len) })
}

pub fn lua_find(_interp: &mut Interpreter, args: Vec<Value>) -> LuaResult<Value> {
    let s = validation::to_str("find", 1, &validation::arg(&args, 1))?;
    let pat = validation::to_str("find", 2, &validation::arg(&args, 2))?;
    let init = init_index(&args, 3, s.len())?;
    let plain = validation::arg(&args, 4).is_truthy();

    if plain {
        let hay = &s.as_bytes()[init..];
        let needle = pat.as_bytes();
        let pos = if needle.is_empty() {
            Some(0)
        } else {
            hay.windows(needle.len()).position(|w| w == needle)
        };
        return Ok(match pos {
            Some(p) => Value::Multi(vec![
                Value::Integer((init + p + 1) as i64),
                Value::Integer((init + p + needle.len()) as i64),
            ]),
            None => Value::Nil,
        });
    }

    match pattern_find(s.as_bytes(), pat.as_bytes(), init) {
        Some((start, end, caps)) => {
            let mut out = vec![
                Value::Integer(start as i64 + 1),
                Value::Integer(end as i64),
            ];
            // Captures follow the indices; without any, only the indices.
            if pat.as_bytes().contains(&b'(') {
                out.extend(caps);
            }
            Ok(Value::Multi(out))
        }
        None => Ok(Value::Nil),
    }
}

pub fn lua_match(_interp: &mut Interpreter, args: Vec<Value>) -> LuaResult<Value> {
    let s = validation::to_str("match", 1, &validation::arg(&args, 1))?;
    let pat = validation::to_str("match", 2, &validation::arg(&args, 2))?;
    let init = init_index(&args, 3, s.len())?;
    match pattern_find(s.as_bytes(), pat.as_bytes(), init) {
        Some((_, _, caps)) => Ok(Value::Multi(caps)),
        None => Ok(Value::Nil),
    }
}

pub fn lua_gmatch(_interp: &mut Interpreter, args: Vec<Value>) -> LuaResult<Value> {
    let s = validation::to_str("gmatch", 1, &validation::arg(&args, 1))?;
    let pat = validation::to_str("gmatch", 2, &validation::arg(&args, 2))?;
    let pos = Rc::new(RefCell::new(0usize));

    let iter = move |_: &mut Interpreter, _args: Vec<Value>| -> LuaResult<Value> {
        let start = *pos.borrow();
        if start > s.len() {
            return Ok(Value::Nil);
        }
        match pattern_find(s.as_bytes(), pat.as_bytes(), start) {
            Some((m_start, m_end, caps)) => {
                // An empty match still advances so iteration terminates.
                *pos.borrow_mut() = if m_end > m_start { m_end } else { m_end + 1 };
                Ok(Value::Multi(caps))
            }
            None => {
                *pos.borrow_mut() = s.len() + 1;
                Ok(Value::Nil)
            }
        }
    };
    Ok(Value::native("gmatch iterator", iter))
}

pub fn lua_gsub(interp: &mut Interpreter, args: Vec<Value>) -> LuaResult<Value> {
    let s = validation::to_str("gsub", 1, &validation::arg(&args, 1))?;
    let pat = validation::to_str("gsub", 2, &validation::arg(&args, 2))?;
    let repl = validation::arg(&args, 3);
    let max_n = validation::opt_int("gsub", 4, &args, i64::MAX)?;

    let src = s.as_bytes();
    let mut out: Vec<u8> = Vec::with_capacity(src.len());
    let mut pos = 0usize;
    let mut count: i64 = 0;

    while count < max_n && pos <= src.len() {
        let found = pattern_find(src, pat.as_bytes(), pos);
        let (m_start, m_end, caps) = match found {
            Some(hit) if hit.0 >= pos => hit,
            _ => break,
        };
        out.extend_from_slice(&src[pos..m_start]);
        let whole = Value::string(src[m_start..m_end].to_vec());
        let replacement = apply_replacement(interp, &repl, &whole, &caps)?;
        match replacement {
            Value::Nil | Value::Boolean(false) => {
                out.extend_from_slice(&src[m_start..m_end]);
            }
            Value::Str(r) => out.extend_from_slice(r.as_bytes()),
            Value::Integer(_) | Value::Float(_) => {
                out.extend_from_slice(replacement.display_string().as_bytes())
            }
            other => {
                return Err(LuaError::runtime(format!(
                    "invalid replacement value (a {})",
                    other.type_name()
                )))
            }
        }
        count += 1;
        if m_end > m_start {
            pos = m_end;
        } else {
            // Empty match: copy one byte through and step past it.
            if m_end < src.len() {
                out.push(src[m_end]);
            }
            pos = m_end + 1;
        }
    }
    if pos < src.len() {
        out.extend_from_slice(&src[pos..]);
    }
    Ok(Value::Multi(vec![
        Value::string(out),
        Value::Integer(count),
    ]))
}

fn apply_replacement(
    interp: &mut Interpreter,
    repl: &Value,
    whole: &Value,
    caps: &[Value],
) -> LuaResult<Value> {
    let first_cap = caps.first().cloned().unwrap_or_else(|| whole.clone());
    match repl {
        Value::Str(template) => {
            let t = template.as_bytes();
            let mut out = Vec::with_capacity(t.len());
            let mut i = 0;
            while i < t.len() {
                if t[i] == b'%' && i + 1 < t.len() {
                    let c = t[i + 1];
                    i += 2;
                    match c {
                        b'%' => out.push(b'%'),
                        b'0' => out.extend_from_slice(match whole {
                            Value::Str(w) => w.as_bytes(),
                            _ => b"",
                        }),
                        b'1'..=b'9' => {
                            let idx = (c - b'1') as usize;
                            let cap = caps.get(idx).cloned().unwrap_or_else(|| whole.clone());
                            match cap {
                                Value::Str(cs) => out.extend_from_slice(cs.as_bytes()),
                                other => {
                                    out.extend_from_slice(other.display_string().as_bytes())
                                }
                            }
                        }
                        other => {
                            return Err(LuaError::runtime(format!(
                                "invalid use of '%{}' in replacement string",
                                other as char
                            )))
                        }
                    }
                } else {
                    out.push(t[i]);
                    i += 1;
                }
            }
            Ok(Value::string(out))
        }
        Value::Table(t) => Ok(t.borrow().get(&first_cap)),
        Value::Function(_) => Ok(interp.call_value(repl.clone(), caps.to_vec())?.collapse()),
        other => Err(LuaError::bad_argument(
            3,
            "gsub",
            "string/function/table",
            other.type_name(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn find(src: &str, pat: &str) -> Option<(usize, usize)> {
        pattern_find(src.as_bytes(), pat.as_bytes(), 0).map(|(s, e, _)| (s, e))
    }

    fn first_capture(src: &str, pat: &str) -> Option<Value> {
        pattern_find(src.as_bytes(), pat.as_bytes(), 0)
            .map(|(_, _, caps)| caps.into_iter().next().unwrap())
    }

    #[test]
    fn test_literal_match() {
        assert_eq!(find("hello world", "world"), Some((6, 11)));
        assert_eq!(find("hello", "xyz"), None);
    }

    #[test]
    fn test_classes() {
        assert_eq!(find("abc123", "%d+"), Some((3, 6)));
        assert_eq!(find("abc123", "%a+"), Some((0, 3)));
        assert_eq!(find("  x", "%S"), Some((2, 3)));
    }

    #[test]
    fn test_anchors() {
        assert_eq!(find("abc", "^a"), Some((0, 1)));
        assert_eq!(find("abc", "^b"), None);
        assert_eq!(find("abc", "c$"), Some((2, 3)));
        assert_eq!(find("abc", "b$"), None);
    }

    #[test]
    fn test_sets_and_ranges() {
        assert_eq!(find("xyz", "[yz]"), Some((1, 2)));
        assert_eq!(find("m5", "[0-9]"), Some((1, 2)));
        assert_eq!(find("abc", "[^a]"), Some((1, 2)));
    }

    #[test]
    fn test_quantifiers() {
        assert_eq!(find("aaab", "a*b"), Some((0, 4)));
        assert_eq!(find("b", "a*b"), Some((0, 1)));
        assert_eq!(find("aaa", "a-"), Some((0, 0)));
        assert_eq!(find("color colour", "colou?r"), Some((0, 5)));
    }

    #[test]
    fn test_captures() {
        let cap = first_capture("key=value", "(%w+)=").unwrap();
        assert_eq!(cap, Value::string("key"));
    }

    #[test]
    fn test_position_capture() {
        let cap = first_capture("abc", "b()").unwrap();
        assert_eq!(cap, Value::Integer(3));
    }

    #[test]
    fn test_balance() {
        assert_eq!(find("(nested (parens)) after", "%b()"), Some((0, 17)));
    }

    #[test]
    fn test_frontier() {
        assert_eq!(find("THE (quick) fox", "%f[%a]%a+"), Some((0, 3)));
    }

    #[test]
    fn test_greedy_vs_lazy() {
        assert_eq!(find("<a><b>", "<.->"), Some((0, 3)));
        assert_eq!(find("<a><b>", "<.*>"), Some((0, 6)));
    }

    #[test]
    fn test_str_index_negative() {
        assert_eq!(str_index(-1, 5), 5);
        assert_eq!(str_index(-5, 5), 1);
        assert_eq!(str_index(2, 5), 2);
    }
}
