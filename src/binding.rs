//! Binding CLI flag values and MCP tool arguments back to request locations.

use std::collections::BTreeMap;
use std::fs;
use std::io::Read;

use serde::Serialize;
use serde_json::{Map, Number, Value};
use urlencoding::encode;

use crate::cli::{FlagSet, FlagSpec, FlagTarget, ValueKind, BODY_FLAG};
use crate::command_tree::OperationDescriptor;
use crate::error::BindError;
use crate::spec::HttpMethod;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Body {
    Json(Value),
    Text(String),
}

/// A request ready for an executor: path substituted, values placed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequestParts {
    pub method: HttpMethod,
    pub path_template: String,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Body>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
}

impl RequestParts {
    fn new(op: &OperationDescriptor) -> Self {
        RequestParts {
            method: op.method,
            path_template: op.path.clone(),
            path: op.path.clone(),
            query: Vec::new(),
            headers: Vec::new(),
            body: None,
            content_type: None,
        }
    }
}

/// Raw flag values as typed on the command line, keyed by flag name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlagValues {
    values: BTreeMap<String, Vec<String>>,
    body: Option<String>,
}

impl FlagValues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, values: Vec<String>) {
        self.values.insert(name.into(), values);
    }

    pub fn set_body(&mut self, body: impl Into<String>) {
        self.body = Some(body.into());
    }

    pub fn get(&self, name: &str) -> Option<&[String]> {
        self.values.get(name).map(Vec::as_slice)
    }

    pub fn body(&self) -> Option<&str> {
        self.body.as_deref()
    }
}

/// Bind CLI flag values for `op`.
///
/// `--body` (literal, `@file` or `@-`) replaces any body property flags.
pub fn bind_flags(
    op: &OperationDescriptor,
    flags: &FlagSet,
    values: &FlagValues,
) -> Result<RequestParts, BindError> {
    let mut bound = Vec::new();
    for flag in flags.iter() {
        if values.body().is_some() && flag.target == FlagTarget::Body {
            continue;
        }
        match values.get(&flag.name) {
            Some(raw) if !raw.is_empty() => bound.push((flag, convert_strings(flag, raw)?)),
            _ => {}
        }
    }
    let raw_body = match values.body() {
        Some(input) => Some(read_body_input(input)?),
        None => None,
    };
    assemble(op, flags, bound, raw_body.map(Value::String))
}

/// Bind MCP tool arguments for `op`. Unknown argument names are rejected.
pub fn bind_arguments(
    op: &OperationDescriptor,
    flags: &FlagSet,
    args: &Map<String, Value>,
) -> Result<RequestParts, BindError> {
    let mut bound = Vec::new();
    let mut raw_body = None;
    for (name, value) in args {
        match flags.get(name) {
            Some(flag) => {
                if !value.is_null() {
                    bound.push((flag, convert_json(flag, value)?));
                }
            }
            None if name == BODY_FLAG && flags.accepts_raw_body => raw_body = Some(value.clone()),
            None => return Err(BindError::UnknownArgument { name: name.clone() }),
        }
    }
    if raw_body.is_some() {
        bound.retain(|(flag, _)| flag.target != FlagTarget::Body);
    }
    assemble(op, flags, bound, raw_body)
}

fn assemble(
    op: &OperationDescriptor,
    flags: &FlagSet,
    bound: Vec<(&FlagSpec, Value)>,
    raw_body: Option<Value>,
) -> Result<RequestParts, BindError> {
    let provided = |flag: &FlagSpec| bound.iter().any(|(f, _)| f.name == flag.name);
    if let Some(missing) = flags.params.iter().find(|f| f.required && !provided(f)) {
        return Err(BindError::MissingRequired {
            flag: missing.name.clone(),
        });
    }
    if raw_body.is_none() {
        if let Some(missing) = flags.body.iter().find(|f| f.required && !provided(f)) {
            return Err(BindError::MissingBodyField {
                field: missing.key.clone(),
            });
        }
    }

    let mut parts = RequestParts::new(op);
    let mut cookies = Vec::new();
    let mut body_map = Map::new();
    for (flag, value) in bound {
        match flag.target {
            FlagTarget::Path => {
                let encoded = encode(&render(&value)).into_owned();
                parts.path = parts.path.replace(&format!("{{{}}}", flag.key), &encoded);
            }
            FlagTarget::Query => match value {
                Value::Array(items) => {
                    for item in items {
                        parts.query.push((flag.key.clone(), render(&item)));
                    }
                }
                other => parts.query.push((flag.key.clone(), render(&other))),
            },
            FlagTarget::Header => parts.headers.push((flag.key.clone(), render_joined(&value))),
            FlagTarget::Cookie => cookies.push(format!("{}={}", flag.key, render_joined(&value))),
            FlagTarget::Body => {
                body_map.insert(flag.key.clone(), value);
            }
        }
    }
    if !cookies.is_empty() {
        parts.headers.push(("Cookie".to_string(), cookies.join("; ")));
    }

    let Some(descriptor) = &op.request_body else {
        return Ok(parts);
    };
    parts.body = match raw_body {
        Some(raw) => Some(raw_body_value(raw, descriptor.is_json())?),
        None if !body_map.is_empty() => Some(Body::Json(Value::Object(body_map))),
        None if flags.body_required => return Err(BindError::BodyRequired),
        None => None,
    };
    if parts.body.is_some() {
        parts.content_type = Some(descriptor.content_type.clone());
    }
    Ok(parts)
}

fn raw_body_value(raw: Value, json: bool) -> Result<Body, BindError> {
    match raw {
        Value::String(text) if json => serde_json::from_str(&text)
            .map(Body::Json)
            .map_err(|err| BindError::InvalidBody {
                message: err.to_string(),
            }),
        Value::String(text) => Ok(Body::Text(text)),
        other if json => Ok(Body::Json(other)),
        other => Ok(Body::Text(other.to_string())),
    }
}

/// Convert command-line strings for `flag`.
///
/// Arrays take repeated values, comma-separated values or a single JSON list.
pub fn convert_strings(flag: &FlagSpec, raw: &[String]) -> Result<Value, BindError> {
    match &flag.kind {
        ValueKind::Array(item) => {
            let pieces: Vec<String> = match raw {
                [single] if single.trim_start().starts_with('[') => parse_json_list(flag, single)?,
                _ => raw
                    .iter()
                    .flat_map(|v| v.split(','))
                    .map(|v| v.trim().to_string())
                    .filter(|v| !v.is_empty())
                    .collect(),
            };
            let items = pieces
                .iter()
                .map(|piece| {
                    check_enum(flag, piece)?;
                    convert_scalar(flag, item, piece)
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Value::Array(items))
        }
        kind => {
            let last = raw.last().map(String::as_str).unwrap_or_default();
            check_enum(flag, last)?;
            convert_scalar(flag, kind, last)
        }
    }
}

/// Convert a JSON tool argument for `flag`. Strings go through the same
/// parsing as command-line values.
pub fn convert_json(flag: &FlagSpec, value: &Value) -> Result<Value, BindError> {
    if let Value::String(s) = value {
        return convert_strings(flag, std::slice::from_ref(s));
    }
    let invalid = || BindError::InvalidValue {
        flag: flag.name.clone(),
        expected: expected(&flag.kind),
        value: value.to_string(),
    };
    match (&flag.kind, value) {
        (ValueKind::Array(item), Value::Array(items)) => {
            let converted = items
                .iter()
                .map(|v| {
                    let as_item = FlagSpec {
                        kind: (**item).clone(),
                        ..flag.clone()
                    };
                    convert_json(&as_item, v)
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Value::Array(converted))
        }
        (ValueKind::Array(_), scalar) => convert_json(flag, &Value::Array(vec![scalar.clone()])),
        (ValueKind::Integer, Value::Number(n)) if n.is_i64() || n.is_u64() => {
            check_enum(flag, &n.to_string())?;
            Ok(value.clone())
        }
        (ValueKind::Number, Value::Number(n)) => {
            check_enum(flag, &n.to_string())?;
            Ok(value.clone())
        }
        (ValueKind::Boolean, Value::Bool(_)) => Ok(value.clone()),
        (ValueKind::Object, Value::Object(_)) => Ok(value.clone()),
        (ValueKind::String, other) => {
            let rendered = render(other);
            check_enum(flag, &rendered)?;
            Ok(Value::String(rendered))
        }
        _ => Err(invalid()),
    }
}

fn convert_scalar(flag: &FlagSpec, kind: &ValueKind, raw: &str) -> Result<Value, BindError> {
    let invalid = || BindError::InvalidValue {
        flag: flag.name.clone(),
        expected: expected(kind),
        value: raw.to_string(),
    };
    let trimmed = raw.trim();
    match kind {
        ValueKind::Integer => trimmed.parse::<i64>().map(Value::from).map_err(|_| invalid()),
        ValueKind::Number => trimmed
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .ok_or_else(invalid),
        ValueKind::Boolean => match trimmed.to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(Value::Bool(true)),
            "false" | "0" | "no" | "off" => Ok(Value::Bool(false)),
            _ => Err(invalid()),
        },
        ValueKind::Object => match serde_json::from_str::<Value>(trimmed) {
            Ok(v @ Value::Object(_)) => Ok(v),
            _ => Err(invalid()),
        },
        ValueKind::String | ValueKind::Array(_) => Ok(Value::String(raw.to_string())),
    }
}

fn check_enum(flag: &FlagSpec, value: &str) -> Result<(), BindError> {
    if flag.enum_values.is_empty() || flag.enum_values.iter().any(|v| v == value) {
        return Ok(());
    }
    Err(BindError::NotInEnum {
        flag: flag.name.clone(),
        allowed: flag.enum_values.join(", "),
        value: value.to_string(),
    })
}

fn expected(kind: &ValueKind) -> &'static str {
    match kind {
        ValueKind::String => "string",
        ValueKind::Integer => "integer",
        ValueKind::Number => "number",
        ValueKind::Boolean => "boolean",
        ValueKind::Array(_) => "list",
        ValueKind::Object => "JSON object",
    }
}

fn parse_json_list(flag: &FlagSpec, raw: &str) -> Result<Vec<String>, BindError> {
    let parsed: Value = serde_json::from_str(raw).map_err(|_| BindError::InvalidValue {
        flag: flag.name.clone(),
        expected: "JSON list",
        value: raw.to_string(),
    })?;
    match parsed {
        Value::Array(items) => Ok(items.iter().map(render).collect()),
        _ => Err(BindError::InvalidValue {
            flag: flag.name.clone(),
            expected: "JSON list",
            value: raw.to_string(),
        }),
    }
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn render_joined(value: &Value) -> String {
    match value {
        Value::Array(items) => items.iter().map(render).collect::<Vec<_>>().join(","),
        other => render(other),
    }
}

/// Read a `--body` argument: a literal, `@path` for a file, or `@-` / `-`
/// for stdin.
pub fn read_body_input(value: &str) -> Result<String, BindError> {
    if value == "@-" || value == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .map_err(|err| BindError::BodyRead {
                source_name: "stdin".to_string(),
                message: err.to_string(),
            })?;
        return Ok(buf);
    }
    if let Some(path) = value.strip_prefix('@') {
        return fs::read_to_string(path).map_err(|err| BindError::BodyRead {
            source_name: path.to_string(),
            message: err.to_string(),
        });
    }
    Ok(value.to_string())
}
