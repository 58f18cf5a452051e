use regex::Regex;
use serde_json::Value;
use vigil_common::context_key;

/// Comparison operators, tried in this order when splitting an expression.
/// Two-character operators come before their one-character prefixes so that
/// `>` never eats `>=`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Eq,
    Ne,
    Ge,
    Le,
    Gt,
    Lt,
    Contains,
    Matches,
}

impl std::fmt::Display for Op {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Op::Eq => write!(f, "=="),
            Op::Ne => write!(f, "!="),
            Op::Ge => write!(f, ">="),
            Op::Le => write!(f, "<="),
            Op::Gt => write!(f, ">"),
            Op::Lt => write!(f, "<"),
            Op::Contains => write!(f, "contains"),
            Op::Matches => write!(f, "matches"),
        }
    }
}

/// Split tokens in trial order. Word operators require surrounding spaces so
/// they cannot match inside identifiers or quoted strings.
const OPERATORS: &[(&str, Op)] = &[
    ("==", Op::Eq),
    ("!=", Op::Ne),
    (">=", Op::Ge),
    ("<=", Op::Le),
    (">", Op::Gt),
    ("<", Op::Lt),
    (" contains ", Op::Contains),
    (" matches ", Op::Matches),
];

/// One step of a `[BODY]` extraction path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSeg {
    Key(String),
    Index(usize),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// `[KEY]`, optionally with an extraction path (BODY only).
    Placeholder { key: String, path: Vec<PathSeg> },
    /// A JSON literal; single-quoted strings are normalized to JSON strings.
    Literal(Value),
    /// The `undefined` token, and the result of any failed extraction.
    Undefined,
    /// Anything that did not parse. Evaluates to false.
    Invalid,
}

#[derive(Debug, Clone)]
pub(crate) enum Parsed {
    Compare {
        lhs: Operand,
        op: Op,
        rhs: Operand,
        /// Pre-compiled pattern when `op` is `matches` with a literal rhs.
        regex: Option<Regex>,
    },
    /// No operator: the expression must be the JSON literal `true`.
    Bare(Operand),
    Invalid,
}

/// A parsed condition. Construction never fails; an unparseable source is
/// retained and evaluates to `false`.
#[derive(Debug, Clone)]
pub struct Condition {
    raw: String,
    pub(crate) parsed: Parsed,
}

impl Condition {
    pub fn parse(source: &str) -> Self {
        let parsed = parse_expression(source);
        Self {
            raw: source.to_string(),
            parsed,
        }
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// True when the source split into a recognized expression shape.
    pub fn is_well_formed(&self) -> bool {
        !matches!(self.parsed, Parsed::Invalid)
            && !matches!(
                self.parsed,
                Parsed::Compare {
                    lhs: Operand::Invalid,
                    ..
                } | Parsed::Compare {
                    rhs: Operand::Invalid,
                    ..
                } | Parsed::Bare(Operand::Invalid)
            )
    }
}

fn parse_expression(source: &str) -> Parsed {
    let trimmed = source.trim();
    if trimmed.is_empty() {
        return Parsed::Invalid;
    }

    for (token, op) in OPERATORS {
        if let Some(at) = find_outside_quotes(trimmed, token) {
            let lhs = parse_operand(&trimmed[..at]);
            let rhs = parse_operand(&trimmed[at + token.len()..]);
            let regex = match (op, &rhs) {
                (Op::Matches, Operand::Literal(Value::String(pattern))) => {
                    Regex::new(pattern).ok()
                }
                _ => None,
            };
            return Parsed::Compare {
                lhs,
                op: *op,
                rhs,
                regex,
            };
        }
    }

    Parsed::Bare(parse_operand(trimmed))
}

/// Finds `token` outside single- or double-quoted regions, so that operators
/// embedded in string literals (`[BODY].x != "a == b"`) do not split the
/// expression. Works on bytes: tokens are ASCII, so a match can never start
/// inside a multi-byte character and every returned offset is a char
/// boundary.
fn find_outside_quotes(haystack: &str, token: &str) -> Option<usize> {
    let bytes = haystack.as_bytes();
    let token = token.as_bytes();
    let mut quote: Option<u8> = None;
    for i in 0..bytes.len() {
        let b = bytes[i];
        match quote {
            Some(q) => {
                if b == q {
                    quote = None;
                }
            }
            None => {
                if b == b'\'' || b == b'"' {
                    quote = Some(b);
                } else if bytes[i..].starts_with(token) {
                    return Some(i);
                }
            }
        }
    }
    None
}

fn parse_operand(raw: &str) -> Operand {
    let raw = raw.trim();
    if raw.is_empty() {
        return Operand::Invalid;
    }

    if let Some(rest) = raw.strip_prefix('[') {
        return parse_placeholder(rest);
    }

    if raw == "undefined" {
        return Operand::Undefined;
    }

    if let Ok(value) = serde_json::from_str::<Value>(raw) {
        return Operand::Literal(value);
    }

    // Single-quoted strings are accepted as a convenience ('healthy').
    if raw.len() >= 2 && raw.starts_with('\'') && raw.ends_with('\'') {
        let inner = &raw[1..raw.len() - 1];
        if !inner.contains('\'') {
            return Operand::Literal(Value::String(inner.to_string()));
        }
    }

    Operand::Invalid
}

fn parse_placeholder(after_bracket: &str) -> Operand {
    let Some(close) = after_bracket.find(']') else {
        return Operand::Invalid;
    };
    let key = &after_bracket[..close];
    if key.is_empty()
        || !key
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
    {
        return Operand::Invalid;
    }

    let remainder = &after_bracket[close + 1..];
    if remainder.is_empty() {
        return Operand::Placeholder {
            key: key.to_string(),
            path: Vec::new(),
        };
    }

    // An extraction path is only meaningful on [BODY].
    if key != context_key::BODY {
        return Operand::Invalid;
    }
    match parse_path(remainder) {
        Some(path) if !path.is_empty() => Operand::Placeholder {
            key: key.to_string(),
            path,
        },
        _ => Operand::Invalid,
    }
}

/// Parses `.member`, `[0]`, `['key']` and `["key"]` segments.
fn parse_path(raw: &str) -> Option<Vec<PathSeg>> {
    let mut segments = Vec::new();
    let mut rest = raw;

    while !rest.is_empty() {
        if let Some(after_dot) = rest.strip_prefix('.') {
            let end = after_dot
                .find(|c: char| c == '.' || c == '[')
                .unwrap_or(after_dot.len());
            let name = &after_dot[..end];
            if name.is_empty() {
                return None;
            }
            segments.push(PathSeg::Key(name.to_string()));
            rest = &after_dot[end..];
        } else if let Some(after_bracket) = rest.strip_prefix('[') {
            let close = after_bracket.find(']')?;
            let inner = after_bracket[..close].trim();
            let segment = if let Ok(index) = inner.parse::<usize>() {
                PathSeg::Index(index)
            } else {
                let quoted = inner
                    .strip_prefix('\'')
                    .and_then(|s| s.strip_suffix('\''))
                    .or_else(|| inner.strip_prefix('"').and_then(|s| s.strip_suffix('"')))?;
                PathSeg::Key(quoted.to_string())
            };
            segments.push(segment);
            rest = &after_bracket[close + 1..];
        } else {
            return None;
        }
    }

    Some(segments)
}
