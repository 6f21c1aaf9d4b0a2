// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use std::collections::BTreeMap;

pub fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            '/' => out.push_str("&#x2F;"),
            _ => out.push(ch),
        }
    }
    out
}

pub fn escape_attr(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(ch),
        }
    }
    out
}

pub fn unescape_html(raw: &str) -> String {
    raw.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#x27;", "'")
        .replace("&#39;", "'")
        .replace("&#x2F;", "/")
        .replace("&amp;", "&")
}

// `%0`..`%9` are positional; `%%` is a literal percent sign.
pub fn format_message(pattern: &str, args: &[&str]) -> String {
    let mut out = String::with_capacity(pattern.len());
    let mut chars = pattern.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch != '%' {
            out.push(ch);
            continue;
        }
        match chars.peek().copied() {
            Some('%') => {
                chars.next();
                out.push('%');
            }
            Some(digit) if digit.is_ascii_digit() => {
                chars.next();
                let index = digit as usize - '0' as usize;
                out.push_str(args.get(index).copied().unwrap_or(""));
            }
            _ => out.push('%'),
        }
    }
    out
}

// `&NAME.` substitutes raw, `&NAME!HTML.` HTML-escaped and `&NAME!ATTR.`
// attribute-escaped. Unknown names are left untouched.
pub fn apply_template(template: &str, substitutions: &BTreeMap<&str, &str>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find('&') {
        out.push_str(&rest[..start]);
        let tail = &rest[start + 1..];
        let Some(end) = tail.find('.') else {
            out.push_str(&rest[start..]);
            return out;
        };
        let token = &tail[..end];
        let (name, modifier) = match token.split_once('!') {
            Some((name, modifier @ ("HTML" | "ATTR"))) => (name, Some(modifier)),
            Some(_) | None => (token, None),
        };
        let valid_name =
            !name.is_empty() && name.chars().all(|ch| ch.is_ascii_alphanumeric() || ch == '_');
        match substitutions.get(name) {
            Some(value) if valid_name => {
                match modifier {
                    Some("HTML") => out.push_str(&escape_html(value)),
                    Some(_) => out.push_str(&escape_attr(value)),
                    None => out.push_str(value),
                }
                rest = &tail[end + 1..];
            }
            _ => {
                out.push('&');
                rest = tail;
            }
        }
    }
    out.push_str(rest);
    out
}
