//! `{{ ... }}` template compilation.
//!
//! Expressions are written as text with embedded `{{ code }}` segments.
//! Compilation turns the whole template into a single JavaScript
//! expression:
//!
//! - a template that is exactly one segment (surrounding whitespace
//!   allowed) evaluates to the segment's raw value;
//! - mixed text and segments concatenate into a string, rendering
//!   `null`/`undefined` as empty and objects as JSON;
//! - text without any segment is a string literal.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("unterminated '{{{{' starting at offset {offset}")]
    Unterminated { offset: usize },

    #[error("empty expression at offset {offset}")]
    EmptySegment { offset: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment<'a> {
    Text(&'a str),
    Code(&'a str),
}

const STRINGIFY: &str = "(v) => v === undefined || v === null ? \"\" : typeof v === \"object\" ? JSON.stringify(v) : String(v)";

/// Compile a template into a JavaScript expression.
pub fn compile(template: &str) -> Result<String, TemplateError> {
    let segments = split(template)?;

    let code_segments: Vec<&str> = segments
        .iter()
        .filter_map(|s| match s {
            Segment::Code(c) => Some(*c),
            Segment::Text(_) => None,
        })
        .collect();

    if code_segments.is_empty() {
        return Ok(string_literal(template));
    }

    let only_whitespace_text = segments.iter().all(|s| match s {
        Segment::Text(t) => t.trim().is_empty(),
        Segment::Code(_) => true,
    });
    if code_segments.len() == 1 && only_whitespace_text {
        return Ok(format!("(\n{}\n)", code_segments[0].trim()));
    }

    let parts: Vec<String> = segments
        .iter()
        .filter(|s| !matches!(s, Segment::Text("")))
        .map(|s| match s {
            Segment::Text(t) => string_literal(t),
            Segment::Code(c) => format!("__tpl(\n{}\n)", c.trim()),
        })
        .collect();
    Ok(format!(
        "((__tpl) => {})({STRINGIFY})",
        parts.join(" + ")
    ))
}

fn string_literal(text: &str) -> String {
    // A JSON string is a valid JavaScript string literal once the two
    // line terminators JSON allows raw are escaped.
    serde_json::Value::String(text.to_string())
        .to_string()
        .replace('\u{2028}', "\\u2028")
        .replace('\u{2029}', "\\u2029")
}

fn split(template: &str) -> Result<Vec<Segment<'_>>, TemplateError> {
    let mut segments = Vec::new();
    let mut rest = template;
    let mut consumed = 0;

    while let Some(start) = rest.find("{{") {
        segments.push(Segment::Text(&rest[..start]));
        let body_start = start + 2;
        let body_len = find_close(&rest[body_start..]).ok_or(TemplateError::Unterminated {
            offset: consumed + start,
        })?;
        let body = &rest[body_start..body_start + body_len];
        if body.trim().is_empty() {
            return Err(TemplateError::EmptySegment {
                offset: consumed + start,
            });
        }
        segments.push(Segment::Code(body));
        let next = body_start + body_len + 2;
        consumed += next;
        rest = &rest[next..];
    }
    segments.push(Segment::Text(rest));
    Ok(segments)
}

/// Byte offset of the `}}` closing a segment body, skipping braces that
/// belong to object literals or sit inside string literals.
fn find_close(body: &str) -> Option<usize> {
    let bytes = body.as_bytes();
    let mut depth = 0usize;
    let mut quote: Option<u8> = None;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if let Some(q) = quote {
            if b == b'\\' {
                i += 2;
                continue;
            }
            if b == q {
                quote = None;
            }
            i += 1;
            continue;
        }
        match b {
            b'"' | b'\'' | b'`' => quote = Some(b),
            b'{' => depth += 1,
            b'}' if depth > 0 => depth -= 1,
            b'}' if bytes.get(i + 1) == Some(&b'}') => return Some(i),
            _ => {}
        }
        i += 1;
    }
    None
}
