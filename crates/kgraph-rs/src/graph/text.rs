//! Compact textual form of a [`KernelGraph`], used by tests and debug dumps.
//!
//! ```text
//! graph @overlap {
//!   %x = param : f32[4x4]
//!   %a = MatMul(%x) : f32[4x4]
//!   %g = pass TupleGetItem(%a)
//!   %r = AllReduce(%g) : f32[4x4] {stream_id = stream(1)}
//! }
//! ```
//!
//! Kernels are listed in execution order. Parameters come first and
//! pass-through nodes are printed right before their first user.

use std::fmt;

use thiserror::Error;

use crate::device::{EventHandle, StreamId};
use crate::graph::{
    AttrValue, Attrs, DType, GraphError, KernelGraph, Node, NodeId, NodeKind, TensorType,
    ValueType,
};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TextGraphError {
    #[error("statement {statement}: {message}")]
    Syntax { statement: usize, message: String },
    #[error("{0}")]
    Header(String),
    #[error(transparent)]
    Graph(#[from] GraphError),
}

/// Parses a graph written in the compact text syntax.
///
/// # Example
/// ```
/// use kgraph_rs::graph::text::parse_graph;
///
/// let graph = parse_graph(r#"
/// graph @tiny {
///   %x = param
///   %a = MatMul(%x)
///   %r = AllReduce(%a)
/// }
/// "#).expect("valid graph");
/// assert_eq!(graph.name(), "tiny");
/// assert_eq!(graph.execution_order().len(), 2);
/// ```
pub fn parse_graph(src: &str) -> Result<KernelGraph, TextGraphError> {
    let trimmed = src.trim();
    if trimmed.is_empty() {
        return Err(TextGraphError::Header("input is empty".to_string()));
    }
    let header_end = trimmed
        .find('{')
        .ok_or_else(|| TextGraphError::Header("missing `{` to start graph body".to_string()))?;
    let body_end = trimmed
        .rfind('}')
        .ok_or_else(|| TextGraphError::Header("missing `}` to end graph body".to_string()))?;
    if body_end < header_end {
        return Err(TextGraphError::Header("graph body is not closed".to_string()));
    }
    let name = parse_header(&trimmed[..header_end])?;
    let mut graph = KernelGraph::new(name);

    let body = &trimmed[header_end + 1..body_end];
    let statements = body
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with("//"));
    for (idx, line) in statements.enumerate() {
        parse_statement(&mut graph, line).map_err(|err| match err {
            StatementError::Syntax(message) => TextGraphError::Syntax {
                statement: idx + 1,
                message,
            },
            StatementError::Graph(err) => TextGraphError::Graph(err),
        })?;
    }
    Ok(graph)
}

fn parse_header(header: &str) -> Result<String, TextGraphError> {
    let rest = header
        .trim()
        .strip_prefix("graph")
        .ok_or_else(|| TextGraphError::Header("header must start with `graph`".to_string()))?
        .trim();
    let name = rest.strip_prefix('@').unwrap_or(rest).trim();
    if name.is_empty() {
        return Err(TextGraphError::Header("graph name cannot be empty".to_string()));
    }
    Ok(name.to_string())
}

enum StatementError {
    Syntax(String),
    Graph(GraphError),
}

impl From<GraphError> for StatementError {
    fn from(err: GraphError) -> Self {
        StatementError::Graph(err)
    }
}

fn syntax(message: impl Into<String>) -> StatementError {
    StatementError::Syntax(message.into())
}

fn parse_statement(graph: &mut KernelGraph, line: &str) -> Result<(), StatementError> {
    let (lhs, rhs) = line
        .split_once('=')
        .ok_or_else(|| syntax("statement must be `%name = ...`"))?;
    let name = lhs
        .trim()
        .strip_prefix('%')
        .ok_or_else(|| syntax("value names must start with `%`"))?;
    if name.is_empty() {
        return Err(syntax("value name cannot be empty"));
    }
    let rhs = rhs.trim();

    if let Some(rest) = strip_keyword(rhs, "param") {
        let (ty, attrs) = parse_suffix(rest)?;
        let id = graph.add_parameter(name, ty)?;
        graph.node_mut(id)?.attrs = attrs;
        return Ok(());
    }

    if let Some(rest) = strip_keyword(rhs, "pass") {
        let (forward, rest) = parse_forward(rest)?;
        let call = parse_call(graph, rest)?;
        let id = graph.add_pass_through(name, call.op, &call.inputs, forward)?;
        graph.node_mut(id)?.attrs = call.attrs;
        return Ok(());
    }

    let call = parse_call(graph, rhs)?;
    let id = graph.add_kernel(name, call.op, &call.inputs, call.ty)?;
    graph.node_mut(id)?.attrs = call.attrs;
    Ok(())
}

fn strip_keyword<'a>(src: &'a str, keyword: &str) -> Option<&'a str> {
    let rest = src.strip_prefix(keyword)?;
    match rest.chars().next() {
        None => Some(rest),
        Some(ch) if ch.is_whitespace() || ch == ':' || ch == '[' || ch == '{' => Some(rest),
        Some(_) => None,
    }
}

fn parse_forward(src: &str) -> Result<(usize, &str), StatementError> {
    let src = src.trim_start();
    let Some(rest) = src.strip_prefix('[') else {
        return Ok((0, src));
    };
    let close = rest
        .find(']')
        .ok_or_else(|| syntax("missing `]` after forwarded input index"))?;
    let forward = rest[..close]
        .trim()
        .parse::<usize>()
        .map_err(|_| syntax(format!("invalid forwarded input index `{}`", &rest[..close])))?;
    Ok((forward, &rest[close + 1..]))
}

struct Call {
    op: String,
    inputs: Vec<NodeId>,
    ty: ValueType,
    attrs: Attrs,
}

fn parse_call(graph: &KernelGraph, src: &str) -> Result<Call, StatementError> {
    let src = src.trim();
    let open = src
        .find('(')
        .ok_or_else(|| syntax("missing `(` after op name"))?;
    let close = src[open..]
        .find(')')
        .map(|pos| open + pos)
        .ok_or_else(|| syntax("missing `)` to close operand list"))?;
    let op = src[..open].trim();
    if op.is_empty() || !op.chars().all(|ch| ch.is_alphanumeric() || ch == '_') {
        return Err(syntax(format!("invalid op name `{op}`")));
    }

    let mut inputs = Vec::new();
    for operand in src[open + 1..close].split(',').map(str::trim) {
        if operand.is_empty() {
            continue;
        }
        let value = operand
            .strip_prefix('%')
            .ok_or_else(|| syntax(format!("operand `{operand}` must start with `%`")))?;
        let id = graph
            .find(value)
            .ok_or_else(|| syntax(format!("unknown value `%{value}`")))?;
        inputs.push(id);
    }

    let (ty, attrs) = parse_suffix(&src[close + 1..])?;
    Ok(Call {
        op: op.to_string(),
        inputs,
        ty,
        attrs,
    })
}

/// Parses the optional `: type` and `{attrs}` trailing a statement.
fn parse_suffix(src: &str) -> Result<(ValueType, Attrs), StatementError> {
    let src = src.trim();
    let (type_src, attrs) = match src.find('{') {
        Some(start) => {
            let end = src
                .rfind('}')
                .filter(|end| *end > start)
                .ok_or_else(|| syntax("missing `}` to close attribute list"))?;
            if !src[end + 1..].trim().is_empty() {
                return Err(syntax("unexpected text after attribute list"));
            }
            (&src[..start], parse_attrs(&src[start + 1..end])?)
        }
        None => (src, Attrs::new()),
    };
    let type_src = type_src.trim();
    if type_src.is_empty() {
        return Ok((ValueType::None, attrs));
    }
    let type_src = type_src
        .strip_prefix(':')
        .ok_or_else(|| syntax(format!("unexpected text `{type_src}`")))?;
    Ok((parse_type(type_src.trim())?, attrs))
}

fn parse_type(src: &str) -> Result<ValueType, StatementError> {
    if src == "none" {
        return Ok(ValueType::None);
    }
    let open = src
        .find('[')
        .ok_or_else(|| syntax(format!("type `{src}` must look like `f32[2x3]`")))?;
    let inner = src[open + 1..]
        .strip_suffix(']')
        .ok_or_else(|| syntax(format!("missing `]` in type `{src}`")))?;
    let dtype = DType::parse(src[..open].trim())
        .ok_or_else(|| syntax(format!("unknown dtype in `{src}`")))?;
    let shape = if inner.trim().is_empty() {
        Vec::new()
    } else {
        inner
            .split('x')
            .map(|dim| {
                dim.trim()
                    .parse::<usize>()
                    .map_err(|_| syntax(format!("invalid dimension `{dim}` in `{src}`")))
            })
            .collect::<Result<Vec<_>, _>>()?
    };
    Ok(ValueType::Tensor(TensorType { dtype, shape }))
}

fn parse_attrs(src: &str) -> Result<Attrs, StatementError> {
    let mut attrs = Attrs::new();
    for entry in split_attr_entries(src) {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        let (key, value) = entry
            .split_once('=')
            .ok_or_else(|| syntax(format!("attribute `{entry}` must be `key = value`")))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(syntax("attribute key cannot be empty"));
        }
        attrs.set(key, parse_attr_value(value.trim())?);
    }
    Ok(attrs)
}

/// Splits on commas outside string literals; `\"` does not end a literal.
fn split_attr_entries(src: &str) -> Vec<&str> {
    let mut entries = Vec::new();
    let mut in_string = false;
    let mut escaped = false;
    let mut start = 0;
    for (idx, ch) in src.char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            ',' => {
                entries.push(&src[start..idx]);
                start = idx + 1;
            }
            _ => {}
        }
    }
    entries.push(&src[start..]);
    entries
}

fn parse_attr_value(src: &str) -> Result<AttrValue, StatementError> {
    if let Some(raw) = handle_arg(src, "stream") {
        return Ok(AttrValue::Stream(StreamId(parse_handle(raw)?)));
    }
    if let Some(raw) = handle_arg(src, "event") {
        return Ok(AttrValue::Event(EventHandle(parse_handle(raw)?)));
    }
    match src {
        "true" => return Ok(AttrValue::Bool(true)),
        "false" => return Ok(AttrValue::Bool(false)),
        _ => {}
    }
    if let Some(inner) = src.strip_prefix('"') {
        return Ok(AttrValue::Str(parse_string_literal(inner)?));
    }
    src.parse::<i64>()
        .map(AttrValue::Int)
        .map_err(|_| syntax(format!("invalid attribute value `{src}`")))
}

/// Decodes the escapes `{:?}` produces for strings, up to the closing quote.
fn parse_string_literal(src: &str) -> Result<String, StatementError> {
    let mut out = String::with_capacity(src.len());
    let mut chars = src.chars();
    while let Some(ch) = chars.next() {
        match ch {
            '"' => {
                let rest = chars.as_str();
                if !rest.trim().is_empty() {
                    return Err(syntax(format!("unexpected text `{rest}` after string")));
                }
                return Ok(out);
            }
            '\\' => {
                let decoded = match chars.next() {
                    Some('n') => '\n',
                    Some('t') => '\t',
                    Some('r') => '\r',
                    Some('0') => '\0',
                    Some('\\') => '\\',
                    Some('"') => '"',
                    Some('\'') => '\'',
                    Some('u') => parse_unicode_escape(&mut chars)?,
                    Some(other) => return Err(syntax(format!("unknown escape `\\{other}`"))),
                    None => return Err(syntax("unterminated string")),
                };
                out.push(decoded);
            }
            other => out.push(other),
        }
    }
    Err(syntax("unterminated string"))
}

fn parse_unicode_escape(chars: &mut std::str::Chars<'_>) -> Result<char, StatementError> {
    if chars.next() != Some('{') {
        return Err(syntax("expected `{` after `\\u`"));
    }
    let mut hex = String::new();
    for ch in chars.by_ref() {
        if ch == '}' {
            return u32::from_str_radix(&hex, 16)
                .ok()
                .and_then(char::from_u32)
                .ok_or_else(|| syntax(format!("invalid unicode escape `\\u{{{hex}}}`")));
        }
        hex.push(ch);
    }
    Err(syntax("unterminated unicode escape"))
}

fn handle_arg<'a>(src: &'a str, kind: &str) -> Option<&'a str> {
    src.strip_prefix(kind)?
        .trim_start()
        .strip_prefix('(')?
        .strip_suffix(')')
}

fn parse_handle(raw: &str) -> Result<u64, StatementError> {
    raw.trim()
        .parse::<u64>()
        .map_err(|_| syntax(format!("invalid handle `{raw}`")))
}

impl fmt::Display for KernelGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "graph @{} {{", self.name())?;
        let mut printed = vec![false; self.nodes().len()];
        for node in self.nodes() {
            if matches!(node.kind, NodeKind::Parameter) {
                printed[node.id.index()] = true;
                write_node(f, self, node)?;
            }
        }
        for &id in self.execution_order() {
            let Some(node) = self.nodes().get(id.index()) else {
                continue;
            };
            write_pass_through_deps(f, self, node, &mut printed)?;
            printed[id.index()] = true;
            write_node(f, self, node)?;
        }
        for node in self.nodes() {
            if matches!(node.kind, NodeKind::PassThrough { .. }) && !printed[node.id.index()] {
                write_pass_through_deps(f, self, node, &mut printed)?;
                printed[node.id.index()] = true;
                write_node(f, self, node)?;
            }
        }
        writeln!(f, "}}")
    }
}

fn write_pass_through_deps(
    f: &mut fmt::Formatter<'_>,
    graph: &KernelGraph,
    node: &Node,
    printed: &mut [bool],
) -> fmt::Result {
    for input in &node.inputs {
        let Some(dep) = graph.nodes().get(input.index()) else {
            continue;
        };
        if !matches!(dep.kind, NodeKind::PassThrough { .. }) || printed[dep.id.index()] {
            continue;
        }
        printed[dep.id.index()] = true;
        write_pass_through_deps(f, graph, dep, printed)?;
        write_node(f, graph, dep)?;
    }
    Ok(())
}

fn write_node(f: &mut fmt::Formatter<'_>, graph: &KernelGraph, node: &Node) -> fmt::Result {
    write!(f, "  %{} = ", node.name)?;
    match node.kind {
        NodeKind::Parameter => write!(f, "param")?,
        NodeKind::PassThrough { forward } => {
            if forward == 0 {
                write!(f, "pass ")?;
            } else {
                write!(f, "pass[{forward}] ")?;
            }
            write_call(f, graph, node)?;
        }
        NodeKind::Kernel => write_call(f, graph, node)?,
    }
    if let ValueType::Tensor(_) = node.ty {
        write!(f, " : {}", node.ty)?;
    }
    if !node.attrs.is_empty() {
        let entries: Vec<String> = node
            .attrs
            .iter()
            .map(|(key, value)| format!("{key} = {value}"))
            .collect();
        write!(f, " {{{}}}", entries.join(", "))?;
    }
    writeln!(f)
}

fn write_call(f: &mut fmt::Formatter<'_>, graph: &KernelGraph, node: &Node) -> fmt::Result {
    let operands: Vec<String> = node
        .inputs
        .iter()
        .map(|input| match graph.nodes().get(input.index()) {
            Some(dep) => format!("%{}", dep.name),
            None => format!("%<missing {input}>"),
        })
        .collect();
    write!(f, "{}({})", node.op, operands.join(", "))
}

/// Parses a [`KernelGraph`] from text, panicking on malformed input.
#[macro_export]
macro_rules! kgraph {
    ($src:expr) => {{
        $crate::graph::text::parse_graph($src).expect("failed to parse kernel graph text")
    }};
}
