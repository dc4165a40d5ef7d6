//! Decoding of Apache AGE `agtype` text.
//!
//! AGE renders graph values as JSON followed by a type annotation:
//!
//! ```text
//! {"id": 844424930131969, "label": "Person", "properties": {"name": "Ann"}}::vertex
//! {"id": 1125899906842625, "label": "KNOWS", "end_id": 2, "start_id": 1, "properties": {}}::edge
//! [{...}::vertex, {...}::edge, {...}::vertex]::path
//! ```
//!
//! Annotations are folded into marker keys so the document becomes plain JSON,
//! which serde_json then parses.

use crate::db::Properties;
use std::collections::BTreeMap;
use thiserror::Error;
use tokio_postgres::types::{FromSql, Type};

/// Key injected in place of a `::vertex` / `::edge` / `::path` annotation.
/// The NUL byte keeps it from colliding with real property names.
const MARKER: &str = "\u{0}agtype";
const MARKER_JSON: &str = "\"\\u0000agtype\"";
const PATH_ITEMS: &str = "items";

#[derive(Debug, Error)]
pub enum AgtypeError {
    #[error("invalid agtype JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("'::{annotation}' does not follow a {expected}")]
    MisplacedAnnotation {
        annotation: String,
        expected: &'static str,
    },
    #[error("unterminated string literal")]
    UnterminatedString,
    #[error("unbalanced brackets")]
    Unbalanced,
    #[error("malformed {0}")]
    Shape(&'static str),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Vertex {
    pub id: String,
    pub label: String,
    pub properties: Properties,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Edge {
    pub id: String,
    pub label: String,
    pub start_id: String,
    pub end_id: String,
    pub properties: Properties,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AgValue {
    Vertex(Vertex),
    Edge(Edge),
    /// Alternating vertices and edges, in path order.
    Path(Vec<AgValue>),
    List(Vec<AgValue>),
    Map(BTreeMap<String, AgValue>),
    Scalar(serde_json::Value),
}

impl AgValue {
    /// Whether a vertex, edge or path appears anywhere in this value.
    pub fn has_graph(&self) -> bool {
        match self {
            AgValue::Vertex(_) | AgValue::Edge(_) | AgValue::Path(_) => true,
            AgValue::List(items) => items.iter().any(AgValue::has_graph),
            AgValue::Map(entries) => entries.values().any(AgValue::has_graph),
            AgValue::Scalar(_) => false,
        }
    }
}

/// Parse one agtype value.
pub fn parse(text: &str) -> Result<AgValue, AgtypeError> {
    let json = fold_annotations(text)?;
    let value: serde_json::Value = serde_json::from_str(&json)?;
    convert(value)
}

/// Rewrite annotations outside string literals into marker keys.
fn fold_annotations(text: &str) -> Result<String, AgtypeError> {
    let mut out = String::with_capacity(text.len() + 32);
    // Output offsets of currently open '[' (None for '{').
    let mut open: Vec<Option<usize>> = Vec::new();
    // Output offset of the '[' matching the most recent ']'.
    let mut last_array_start: Option<usize> = None;
    let mut chars = text.char_indices().peekable();
    let mut in_string = false;
    let mut escaped = false;

    while let Some((i, ch)) = chars.next() {
        if in_string {
            out.push(ch);
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }

        match ch {
            '"' => {
                in_string = true;
                out.push(ch);
            }
            '[' => {
                open.push(Some(out.len()));
                out.push(ch);
            }
            '{' => {
                open.push(None);
                out.push(ch);
            }
            ']' => {
                last_array_start = open.pop().ok_or(AgtypeError::Unbalanced)?;
                if last_array_start.is_none() {
                    return Err(AgtypeError::Unbalanced);
                }
                out.push(ch);
            }
            '}' => {
                if open.pop().ok_or(AgtypeError::Unbalanced)?.is_some() {
                    return Err(AgtypeError::Unbalanced);
                }
                out.push(ch);
            }
            ':' if text[i..].starts_with("::") => {
                chars.next();
                let mut annotation = String::new();
                while let Some(&(_, c)) = chars.peek() {
                    if c.is_ascii_alphanumeric() || c == '_' {
                        annotation.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                apply_annotation(&mut out, &annotation, last_array_start.take())?;
            }
            _ => out.push(ch),
        }
    }

    if in_string {
        return Err(AgtypeError::UnterminatedString);
    }
    if !open.is_empty() {
        return Err(AgtypeError::Unbalanced);
    }
    Ok(out)
}

fn apply_annotation(
    out: &mut String,
    annotation: &str,
    array_start: Option<usize>,
) -> Result<(), AgtypeError> {
    let trimmed_len = out.trim_end().len();
    match annotation {
        "vertex" | "edge" => {
            if !out[..trimmed_len].ends_with('}') {
                return Err(AgtypeError::MisplacedAnnotation {
                    annotation: annotation.to_string(),
                    expected: "map",
                });
            }
            out.truncate(trimmed_len - 1);
            let empty = out.trim_end().ends_with('{');
            if !empty {
                out.push(',');
            }
            out.push_str(&format!("{}:\"{}\"}}", MARKER_JSON, annotation));
        }
        "path" => {
            let start = match array_start {
                Some(start) if out[..trimmed_len].ends_with(']') => start,
                _ => {
                    return Err(AgtypeError::MisplacedAnnotation {
                        annotation: annotation.to_string(),
                        expected: "list",
                    })
                }
            };
            out.insert_str(
                start,
                &format!("{{{}:\"path\",\"{}\":", MARKER_JSON, PATH_ITEMS),
            );
            out.push('}');
        }
        // Scalar casts such as `::numeric` carry no structure.
        _ => {}
    }
    Ok(())
}

fn convert(value: serde_json::Value) -> Result<AgValue, AgtypeError> {
    match value {
        serde_json::Value::Array(items) => Ok(AgValue::List(
            items.into_iter().map(convert).collect::<Result<_, _>>()?,
        )),
        serde_json::Value::Object(mut map) => match map.remove(MARKER) {
            Some(serde_json::Value::String(kind)) => match kind.as_str() {
                "vertex" => Ok(AgValue::Vertex(vertex_from(map))),
                "edge" => Ok(AgValue::Edge(edge_from(map))),
                "path" => match map.remove(PATH_ITEMS) {
                    Some(serde_json::Value::Array(items)) => Ok(AgValue::Path(
                        items.into_iter().map(convert).collect::<Result<_, _>>()?,
                    )),
                    _ => Err(AgtypeError::Shape("path")),
                },
                _ => Err(AgtypeError::Shape("annotation")),
            },
            Some(_) => Err(AgtypeError::Shape("annotation")),
            None => Ok(AgValue::Map(
                map.into_iter()
                    .map(|(k, v)| convert(v).map(|v| (k, v)))
                    .collect::<Result<_, _>>()?,
            )),
        },
        scalar => Ok(AgValue::Scalar(scalar)),
    }
}

pub(crate) fn vertex_from(mut map: serde_json::Map<String, serde_json::Value>) -> Vertex {
    Vertex {
        id: map.remove("id").map(id_string).unwrap_or_default(),
        label: take_string(&mut map, "label"),
        properties: take_properties(&mut map),
    }
}

pub(crate) fn edge_from(mut map: serde_json::Map<String, serde_json::Value>) -> Edge {
    Edge {
        id: map.remove("id").map(id_string).unwrap_or_default(),
        label: take_string(&mut map, "label"),
        start_id: map.remove("start_id").map(id_string).unwrap_or_default(),
        end_id: map.remove("end_id").map(id_string).unwrap_or_default(),
        properties: take_properties(&mut map),
    }
}

fn id_string(value: serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s,
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn take_string(map: &mut serde_json::Map<String, serde_json::Value>, key: &str) -> String {
    match map.remove(key) {
        Some(serde_json::Value::String(s)) => s,
        _ => String::new(),
    }
}

fn take_properties(map: &mut serde_json::Map<String, serde_json::Value>) -> Properties {
    match map.remove("properties") {
        Some(serde_json::Value::Object(props)) => props,
        _ => Properties::new(),
    }
}

/// Raw text of an `agtype` column.
///
/// AGE's binary send format is a version byte followed by the text form.
#[derive(Debug, Clone, PartialEq)]
pub struct AgtypeText(pub String);

impl<'a> FromSql<'a> for AgtypeText {
    fn from_sql(
        _ty: &Type,
        raw: &'a [u8],
    ) -> Result<Self, Box<dyn std::error::Error + Sync + Send>> {
        let body = match raw.split_first() {
            Some((1, rest)) => rest,
            _ => raw,
        };
        Ok(AgtypeText(std::str::from_utf8(body)?.to_string()))
    }

    fn accepts(ty: &Type) -> bool {
        ty.name() == "agtype"
    }
}
