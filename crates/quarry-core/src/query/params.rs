//! Named placeholder scanning
//!
//! Finds `:name` placeholders in query text, skipping string literals,
//! quoted identifiers, comments and `::` casts.

/// A `:name` placeholder and its byte span (colon included)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placeholder {
    pub name: String,
    pub start: usize,
    pub end: usize,
}

fn is_ident_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_'
}

fn is_ident_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// Whether `s` is a plain SQL identifier
pub fn is_identifier(s: &str) -> bool {
    let bytes = s.as_bytes();
    !bytes.is_empty() && is_ident_start(bytes[0]) && bytes.iter().all(|&b| is_ident_char(b))
}

/// Index just past the closing `close` byte, honouring doubled-quote escapes
fn skip_quoted(bytes: &[u8], open_at: usize, close: u8) -> usize {
    let mut i = open_at + 1;
    while i < bytes.len() {
        if bytes[i] == close {
            if close != b']' && bytes.get(i + 1) == Some(&close) {
                i += 2;
                continue;
            }
            return i + 1;
        }
        i += 1;
    }
    bytes.len()
}

pub fn scan_placeholders(sql: &str) -> Vec<Placeholder> {
    let bytes = sql.as_bytes();
    let mut found = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\'' => i = skip_quoted(bytes, i, b'\''),
            b'"' => i = skip_quoted(bytes, i, b'"'),
            b'`' => i = skip_quoted(bytes, i, b'`'),
            b'[' => i = skip_quoted(bytes, i, b']'),
            b'-' if bytes.get(i + 1) == Some(&b'-') => {
                i = bytes[i..]
                    .iter()
                    .position(|&b| b == b'\n')
                    .map_or(bytes.len(), |p| i + p + 1);
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i = sql[i + 2..]
                    .find("*/")
                    .map_or(bytes.len(), |p| i + 2 + p + 2);
            }
            b':' if bytes.get(i + 1) == Some(&b':') => i += 2,
            b':' if bytes.get(i + 1).copied().is_some_and(is_ident_start) => {
                let start = i;
                let mut end = i + 1;
                while end < bytes.len() && is_ident_char(bytes[end]) {
                    end += 1;
                }
                found.push(Placeholder {
                    name: sql[start + 1..end].to_string(),
                    start,
                    end,
                });
                i = end;
            }
            _ => i += 1,
        }
    }
    found
}

/// Distinct placeholder names in order of first appearance
pub fn distinct_names(placeholders: &[Placeholder]) -> Vec<&str> {
    let mut names: Vec<&str> = Vec::new();
    for p in placeholders {
        if !names.contains(&p.name.as_str()) {
            names.push(&p.name);
        }
    }
    names
}

/// Replace each placeholder for which `replace` returns text
pub fn rewrite<F>(sql: &str, placeholders: &[Placeholder], mut replace: F) -> String
where
    F: FnMut(&Placeholder) -> Option<String>,
{
    let mut out = String::with_capacity(sql.len());
    let mut last = 0;
    for p in placeholders {
        if let Some(text) = replace(p) {
            out.push_str(&sql[last..p.start]);
            out.push_str(&text);
            last = p.end;
        }
    }
    out.push_str(&sql[last..]);
    out
}
