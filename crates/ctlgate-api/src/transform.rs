//! Response transformation with JSONPath or jq
//!
//! JSONPath accepts the kubectl template form and a bare RFC 9535 query
//! (`$.items[*]`). Templates mix literal text with actions:
//!
//! - `{.items[*].metadata.name}` - a query, relative to the current node
//! - `{"\n"}` - a quoted literal
//! - `{range .items[*]}...{end}` - repeat the body for every match
//!
//! Matches are written space separated: strings raw, anything else as compact
//! JSON. A member lookup that finds nothing on a non-empty input is an error.
//!
//! jq filters run once over the whole document; every output value becomes one
//! compact JSON line. An error anywhere in the output stream discards the
//! partial result.
//!
//! Expressions are checked when the request arrives (`validate`), before any
//! downstream call; `apply` only fails on the document itself.

use jaq_interpret::{Ctx, Filter, FilterT, ParseCtx, RcIter, Val};
use serde_json::Value;
use serde_json_path::JsonPath;

use crate::error::{Error, Result};

/// A requested response transformation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transformation {
    /// JSONPath expression
    JsonPath(String),
    /// jq filter
    Jq(String),
}

impl Transformation {
    /// Pick and validate the transformation from the header values
    ///
    /// JSONPath wins over jq. An expression that does not parse is a
    /// BadRequest.
    pub fn from_headers(jsonpath: Option<String>, jq: Option<String>) -> Result<Option<Self>> {
        let transformation = jsonpath
            .map(Transformation::JsonPath)
            .or_else(|| jq.map(Transformation::Jq));

        if let Some(transformation) = &transformation {
            transformation.validate()?;
        }
        Ok(transformation)
    }

    /// Check that the expression parses
    pub fn validate(&self) -> Result<()> {
        match self {
            Transformation::JsonPath(expression) => parse_template(expression)
                .map(|_| ())
                .map_err(|e| Error::BadRequest(format!("invalid jsonpath expression: {}", e))),
            Transformation::Jq(filter) => compile_jq(filter)
                .map(|_| ())
                .map_err(|e| Error::BadRequest(format!("invalid jq filter: {}", e))),
        }
    }

    /// Apply the transformation to a JSON document
    pub fn apply(&self, input: &[u8]) -> Result<Vec<u8>> {
        match self {
            Transformation::JsonPath(expression) => jsonpath(input, expression)
                .map_err(|e| Error::Internal(format!("failed to build jsonpath response: {}", e))),
            Transformation::Jq(filter) => jq(input, filter)
                .map(String::into_bytes)
                .map_err(|e| Error::Internal(format!("failed to build jq response: {}", e))),
        }
    }
}

// ============================================================================
// JSONPath
// ============================================================================

/// Parsed template piece
enum Node {
    Text(String),
    Query(Query),
    Range(Query, Vec<Node>),
}

/// A compiled query and the node it starts from
struct Query {
    source: String,
    path: JsonPath,
    /// Evaluated against the current range element instead of the root
    relative: bool,
}

impl Query {
    /// Turn an action body (`.items[*]`, `$.a`, `@.b`, `[0]`) into an RFC query
    fn parse(action: &str) -> std::result::Result<Self, String> {
        let action = action.trim();
        let (source, relative) = if action.starts_with('$') {
            (action.to_string(), false)
        } else if action == "@" || action == "." {
            ("$".to_string(), true)
        } else if let Some(rest) = action.strip_prefix('@') {
            (format!("${}", rest), true)
        } else if action.starts_with('.') || action.starts_with('[') {
            (format!("${}", action), true)
        } else if action.is_empty() {
            return Err("empty jsonpath action".into());
        } else {
            return Err(format!("unsupported jsonpath action {:?}", action));
        };

        let path = JsonPath::parse(&source)
            .map_err(|e| format!("invalid jsonpath {:?}: {}", action, e))?;
        Ok(Self {
            source,
            path,
            relative,
        })
    }

    fn evaluate<'a>(
        &self,
        root: &'a Value,
        current: &'a Value,
    ) -> std::result::Result<Vec<&'a Value>, String> {
        let base = if self.relative { current } else { root };
        let matches = self.path.query(base).all();
        if matches.is_empty() {
            if let Some(member) = self.missing_member(base) {
                return Err(format!("{} is not found", member));
            }
        }
        Ok(matches)
    }

    /// First member lookup that matched nothing although its input did
    fn missing_member(&self, base: &Value) -> Option<String> {
        let segments = split_segments(&self.source[1..]);
        let mut prefix = String::from("$");
        for segment in segments {
            let parent_matched = JsonPath::parse(&prefix)
                .map(|path| !path.query(base).all().is_empty())
                .unwrap_or(false);
            prefix.push_str(segment);
            if !parent_matched {
                return None;
            }

            let Some(member) = member_name(segment) else {
                continue;
            };
            let matched = JsonPath::parse(&prefix)
                .map(|path| !path.query(base).all().is_empty())
                .unwrap_or(true);
            if !matched {
                return Some(member);
            }
        }
        None
    }
}

/// Split a query (without the leading `$`) into its segments
///
/// `.a['b'][0]..c` becomes `.a`, `['b']`, `[0]`, `..c`.
fn split_segments(path: &str) -> Vec<&str> {
    let bytes = path.as_bytes();
    let mut segments = Vec::new();
    let mut start = 0;
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
        } else {
            match b {
                b'\'' | b'"' => quote = Some(b),
                b'[' => {
                    if depth == 0 && i > start && &path[start..i] != ".." {
                        segments.push(&path[start..i]);
                        start = i;
                    }
                    depth += 1;
                }
                b']' => depth = depth.saturating_sub(1),
                b'.' if depth == 0 => {
                    let descendant = i == start + 1 && bytes[start] == b'.';
                    if i > start && !descendant {
                        segments.push(&path[start..i]);
                        start = i;
                    }
                }
                _ => {}
            }
        }
        i += 1;
    }
    if start < path.len() {
        segments.push(&path[start..]);
    }
    segments
}

/// Member named by a `.name` or `['name']` segment
fn member_name(segment: &str) -> Option<String> {
    if segment.starts_with("..") {
        return None;
    }
    if let Some(name) = segment.strip_prefix('.') {
        return (name != "*" && !name.is_empty()).then(|| name.to_string());
    }
    let inner = segment.strip_prefix('[')?.strip_suffix(']')?.trim();
    let quoted = (inner.starts_with('\'') && inner.ends_with('\''))
        || (inner.starts_with('"') && inner.ends_with('"'));
    if quoted && inner.len() >= 2 && !inner.contains(',') {
        Some(inner[1..inner.len() - 1].to_string())
    } else {
        None
    }
}

/// Evaluate a JSONPath expression or template against a JSON document
pub fn jsonpath(input: &[u8], expression: &str) -> std::result::Result<Vec<u8>, String> {
    let nodes = parse_template(expression)?;
    let document: Value =
        serde_json::from_slice(input).map_err(|e| format!("invalid json input: {}", e))?;

    let mut output = String::new();
    render_nodes(&nodes, &document, &document, &mut output)?;
    Ok(output.into_bytes())
}

fn render_nodes<'a>(
    nodes: &[Node],
    root: &'a Value,
    current: &'a Value,
    output: &mut String,
) -> std::result::Result<(), String> {
    for node in nodes {
        match node {
            Node::Text(text) => output.push_str(text),
            Node::Query(query) => {
                let rendered: Vec<String> = query
                    .evaluate(root, current)?
                    .into_iter()
                    .map(render)
                    .collect();
                output.push_str(&rendered.join(" "));
            }
            Node::Range(query, body) => {
                for matched in query.evaluate(root, current)? {
                    match matched {
                        Value::Array(items) => {
                            for item in items {
                                render_nodes(body, root, item, output)?;
                            }
                        }
                        other => render_nodes(body, root, other, output)?,
                    }
                }
            }
        }
    }
    Ok(())
}

/// Parse a template into text, literal, query and range nodes
///
/// An expression that starts with `$` and has no braces is one RFC query.
fn parse_template(expression: &str) -> std::result::Result<Vec<Node>, String> {
    let trimmed = expression.trim();
    if trimmed.starts_with('$') && !trimmed.contains('{') {
        return Ok(vec![Node::Query(Query::parse(trimmed)?)]);
    }

    let mut open_ranges: Vec<(Query, Vec<Node>)> = Vec::new();
    let mut nodes = Vec::new();
    let mut rest = expression;

    while let Some(start) = rest.find('{') {
        if start > 0 {
            nodes.push(Node::Text(rest[..start].to_string()));
        }
        let end = closing_brace(&rest[start..])
            .map(|offset| start + offset)
            .ok_or_else(|| format!("unclosed action in {:?}", expression))?;
        let action = rest[start + 1..end].trim();
        rest = &rest[end + 1..];

        if let Some(query) = action
            .strip_prefix("range")
            .filter(|q| q.starts_with(char::is_whitespace))
        {
            open_ranges.push((Query::parse(query)?, std::mem::take(&mut nodes)));
        } else if action == "end" {
            let (query, outer) = open_ranges
                .pop()
                .ok_or_else(|| "{end} without a matching {range}".to_string())?;
            let body = std::mem::replace(&mut nodes, outer);
            nodes.push(Node::Range(query, body));
        } else if action.starts_with('"') {
            let literal: String = serde_json::from_str(action)
                .map_err(|e| format!("invalid string literal {}: {}", action, e))?;
            nodes.push(Node::Text(literal));
        } else {
            nodes.push(Node::Query(Query::parse(action)?));
        }
    }

    if !open_ranges.is_empty() {
        return Err("{range} without a matching {end}".into());
    }
    if !rest.is_empty() {
        nodes.push(Node::Text(rest.to_string()));
    }
    Ok(nodes)
}

/// Offset of the `}` closing the action that opens `text`, skipping quoted strings
fn closing_brace(text: &str) -> Option<usize> {
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for (i, c) in text.char_indices().skip(1) {
        match quote {
            Some(_) if escaped => escaped = false,
            Some(_) if c == '\\' => escaped = true,
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None if c == '"' || c == '\'' => quote = Some(c),
            None if c == '}' => return Some(i),
            None => {}
        }
    }
    None
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// ============================================================================
// jq
// ============================================================================

fn compile_jq(filter: &str) -> std::result::Result<Filter, String> {
    let mut defs = ParseCtx::new(Vec::new());
    defs.insert_natives(jaq_core::core());
    defs.insert_defs(jaq_std::std());

    let (parsed, errs) = jaq_parse::parse(filter, jaq_parse::main());
    if !errs.is_empty() {
        let messages: Vec<String> = errs.iter().map(|e| e.to_string()).collect();
        return Err(messages.join("; "));
    }
    let parsed = parsed.ok_or_else(|| "empty filter".to_string())?;

    let compiled = defs.compile(parsed);
    if !defs.errs.is_empty() {
        return Err(format!("{} undefined symbol(s)", defs.errs.len()));
    }
    Ok(compiled)
}

/// Run a jq filter over a JSON document
pub fn jq(input: &[u8], filter: &str) -> std::result::Result<String, String> {
    let compiled = compile_jq(filter).map_err(|e| format!("invalid jq filter: {}", e))?;

    let document: Value =
        serde_json::from_slice(input).map_err(|e| format!("invalid json input: {}", e))?;

    let inputs = RcIter::new(core::iter::empty());
    let mut lines = Vec::new();
    for output in compiled.run((Ctx::new([], &inputs), Val::from(document))) {
        let value = output.map_err(|e| e.to_string())?;
        lines.push(Value::from(value).to_string());
    }
    Ok(lines.join("\n"))
}
