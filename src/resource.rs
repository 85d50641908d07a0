//! Resource extraction from API paths.
//!
//! Picks the primary noun a CLI groups an operation under, plus an optional
//! parent and an action hint when the last segment reads like a verb
//! (`/pet/findByStatus`).

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use serde_json::Value;

use crate::naming::canonical_resource;
use crate::spec::Operation;

static PATH_PARAM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\{[^}]+\}$").expect("valid regex"));

static VERSION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^v\d+(\.\d+)?$").expect("valid regex"));

static TEMPLATE_PARAM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{([^{}/]*)\}").expect("valid regex"));

pub const RESOURCE_EXTENSION: &str = "x-cli-resource";

/// Segments skipped when looking for resources.
pub const IGNORED_PREFIXES: &[&str] = &[
    "api",
    "apis",
    "rest",
    "internal",
    "external",
    "public",
    "private",
    "admin",
    "management",
    "manage",
    "v1",
    "v2",
    "v3",
];

/// Verb prefixes that mark a path segment as an action (`findByStatus`).
pub const ACTION_PREFIXES: &[&str] = &[
    "find", "search", "query", "filter", "list", "get", "fetch", "load", "create", "add", "new",
    "update", "modify", "edit", "patch", "delete", "remove", "clear", "check", "verify",
    "validate", "enable", "disable", "activate", "deactivate", "start", "stop", "restart",
    "pause", "resume", "export", "import", "download", "upload", "sync", "refresh", "reset",
    "approve", "reject", "cancel", "publish", "unpublish", "archive", "unarchive", "lock",
    "unlock", "send", "resend", "clone", "copy", "move", "rename", "batch", "bulk",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentKind {
    Param,
    Version,
    Ignored,
    Resource,
}

/// Classify a single (non-empty) path segment.
pub fn classify_segment(segment: &str) -> SegmentKind {
    if PATH_PARAM.is_match(segment) || segment.contains('{') {
        SegmentKind::Param
    } else if VERSION.is_match(segment) {
        SegmentKind::Version
    } else if IGNORED_PREFIXES.contains(&segment.to_ascii_lowercase().as_str()) {
        SegmentKind::Ignored
    } else {
        SegmentKind::Resource
    }
}

/// Non-empty, trimmed path segments.
pub fn path_segments(path: &str) -> Vec<&str> {
    path.split('/')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

/// Segments of `path` that name resources, in order.
pub fn resource_segments(path: &str) -> Vec<&str> {
    path_segments(path)
        .into_iter()
        .filter(|s| classify_segment(s) == SegmentKind::Resource)
        .collect()
}

/// Longest action prefix of `segment`, when followed by a word boundary
/// (uppercase letter, `_` or `-`).
pub fn action_prefix(segment: &str) -> Option<&'static str> {
    let lower = segment.to_ascii_lowercase();
    ACTION_PREFIXES
        .iter()
        .filter(|prefix| {
            lower.starts_with(*prefix)
                && segment[prefix.len()..]
                    .chars()
                    .next()
                    .is_some_and(|c| c.is_ascii_uppercase() || c == '_' || c == '-')
        })
        .max_by_key(|prefix| prefix.len())
        .copied()
}

pub fn is_action_segment(segment: &str) -> bool {
    action_prefix(segment).is_some()
}

/// Parameter names referenced by `{...}` placeholders in a path template.
///
/// Fails on templates that do not start with `/`, have unbalanced braces or
/// empty placeholders.
pub fn template_params(path: &str) -> Result<Vec<String>, String> {
    if !path.starts_with('/') {
        return Err("path must start with '/'".to_string());
    }
    let mut depth = 0i32;
    for c in path.chars() {
        match c {
            '{' => depth += 1,
            '}' => depth -= 1,
            _ => {}
        }
        if !(0..=1).contains(&depth) {
            return Err("unbalanced braces in path template".to_string());
        }
    }
    if depth != 0 {
        return Err("unbalanced braces in path template".to_string());
    }
    let mut params = Vec::new();
    for caps in TEMPLATE_PARAM.captures_iter(path) {
        let name = caps[1].trim();
        if name.is_empty() {
            return Err("empty path parameter placeholder".to_string());
        }
        params.push(name.to_string());
    }
    Ok(params)
}

/// A malformed `x-cli-resource` value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidExtension(pub String);

impl fmt::Display for InvalidExtension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Result of resource extraction for one operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExtractResult {
    pub resource: String,
    pub parent: Option<String>,
    pub is_nested: bool,
    pub path_params: Vec<String>,
    /// Raw segment the resource name came from.
    pub original_segment: Option<String>,
    /// Trailing action segment, e.g. `findByStatus`.
    pub action_hint: Option<String>,
    pub from_extension: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ResourceExtractor;

impl ResourceExtractor {
    pub fn new() -> Self {
        Self
    }

    pub fn extract(
        &self,
        path: &str,
        operation: Option<&Operation>,
    ) -> Result<ExtractResult, InvalidExtension> {
        let mut result = ExtractResult {
            path_params: path_segments(path)
                .into_iter()
                .filter(|s| PATH_PARAM.is_match(s))
                .map(|s| s[1..s.len() - 1].to_string())
                .collect(),
            ..ExtractResult::default()
        };

        if let Some(ext) = operation.and_then(|op| op.extension(RESOURCE_EXTENSION)) {
            apply_extension(ext, &mut result)?;
            return Ok(result);
        }

        let segments = resource_segments(path);
        let Some((last, rest)) = segments.split_last() else {
            result.resource = "resource".to_string();
            return Ok(result);
        };

        let (resource, parent) = match rest.split_last() {
            Some((res, before)) if is_action_segment(last) => {
                result.action_hint = Some(last.to_string());
                (*res, before.last().copied())
            }
            _ => (*last, rest.last().copied()),
        };

        result.resource = canonical_resource(resource);
        result.original_segment = Some(resource.to_string());
        result.parent = parent.map(canonical_resource);
        result.is_nested = result.parent.is_some();
        Ok(result)
    }
}

fn apply_extension(ext: &Value, result: &mut ExtractResult) -> Result<(), InvalidExtension> {
    match ext {
        Value::String(name) if !name.trim().is_empty() => {
            result.resource = canonical_resource(name);
        }
        Value::Object(map) => {
            let name = map
                .get("name")
                .and_then(Value::as_str)
                .filter(|n| !n.trim().is_empty())
                .ok_or_else(|| {
                    InvalidExtension(format!("{RESOURCE_EXTENSION} object needs a string 'name'"))
                })?;
            result.resource = canonical_resource(name);
            match map.get("parent") {
                None | Some(Value::Null) => {}
                Some(Value::String(parent)) if !parent.trim().is_empty() => {
                    result.parent = Some(canonical_resource(parent));
                }
                Some(other) => {
                    return Err(InvalidExtension(format!(
                        "{RESOURCE_EXTENSION} parent must be a string, got {other}"
                    )))
                }
            }
        }
        other => {
            return Err(InvalidExtension(format!(
                "{RESOURCE_EXTENSION} must be a string or {{name, parent}} object, got {other}"
            )))
        }
    }
    result.is_nested = result.parent.is_some();
    result.from_extension = true;
    Ok(())
}

/// Structural breakdown of an API path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PathAnalysis {
    pub segments: Vec<String>,
    pub resource_segments: Vec<String>,
    pub param_names: Vec<String>,
    pub is_single_item: bool,
    pub nesting_level: usize,
}

impl PathAnalysis {
    pub fn new(path: &str) -> Self {
        let segments = path_segments(path);
        let mut analysis = PathAnalysis {
            segments: segments.iter().map(|s| s.to_string()).collect(),
            is_single_item: segments
                .last()
                .is_some_and(|s| classify_segment(s) == SegmentKind::Param),
            ..PathAnalysis::default()
        };
        for seg in segments {
            match classify_segment(seg) {
                SegmentKind::Param => analysis
                    .param_names
                    .push(seg.trim_start_matches('{').trim_end_matches('}').to_string()),
                SegmentKind::Resource => analysis.resource_segments.push(seg.to_string()),
                SegmentKind::Version | SegmentKind::Ignored => {}
            }
        }
        analysis.nesting_level = analysis.resource_segments.len().saturating_sub(1);
        analysis
    }

    pub fn is_collection(&self) -> bool {
        !self.segments.is_empty() && !self.is_single_item
    }

    pub fn last_resource_segment(&self) -> Option<&str> {
        self.resource_segments.last().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn op_with(ext: Value) -> Operation {
        serde_json::from_value(json!({ "x-cli-resource": ext })).unwrap()
    }

    fn extract(path: &str) -> ExtractResult {
        ResourceExtractor::new().extract(path, None).unwrap()
    }

    #[test]
    fn simple_collection_and_item() {
        assert_eq!(extract("/pet").resource, "pet");
        let r = extract("/pet/{petId}");
        assert_eq!(r.resource, "pet");
        assert_eq!(r.path_params, vec!["petId"]);
        assert!(!r.is_nested);
    }

    #[test]
    fn skips_versions_and_prefixes() {
        let r = extract("/api/v2.1/users");
        assert_eq!(r.resource, "users");
        assert_eq!(r.parent, None);
        assert_eq!(extract("/V3/customers").resource, "customers");
    }

    #[test]
    fn nested_resource_has_parent() {
        let r = extract("/repos/{owner}/{repo}/issues");
        assert_eq!(r.resource, "issues");
        assert_eq!(r.parent.as_deref(), Some("repos"));
        assert!(r.is_nested);
        assert_eq!(r.path_params, vec!["owner", "repo"]);
    }

    #[test]
    fn action_segment_demotes_to_hint() {
        let r = extract("/pet/findByStatus");
        assert_eq!(r.resource, "pet");
        assert_eq!(r.action_hint.as_deref(), Some("findByStatus"));
        assert_eq!(r.parent, None);

        let r = extract("/store/order/cancel_all");
        assert_eq!(r.resource, "order");
        assert_eq!(r.parent.as_deref(), Some("store"));
        assert_eq!(r.action_hint.as_deref(), Some("cancel_all"));
    }

    #[test]
    fn lone_action_segment_stays_resource() {
        let r = extract("/findByStatus");
        assert_eq!(r.resource, "findbystatus");
        assert_eq!(r.action_hint, None);
    }

    #[test]
    fn plain_words_are_not_actions() {
        assert!(!is_action_segment("address"));
        assert!(!is_action_segment("getaway"));
        assert!(!is_action_segment("list"));
        assert!(is_action_segment("getByName"));
        assert_eq!(action_prefix("unpublishAll"), Some("unpublish"));
        assert_eq!(action_prefix("deactivate-user"), Some("deactivate"));
    }

    #[test]
    fn empty_path_falls_back() {
        assert_eq!(extract("/").resource, "resource");
        assert_eq!(extract("/api/v1").resource, "resource");
    }

    #[test]
    fn separators_are_normalized() {
        assert_eq!(extract("/user-groups").resource, "usergroups");
        assert_eq!(extract("/Order_Items").resource, "orderitems");
    }

    #[test]
    fn extension_string_and_object() {
        let ex = ResourceExtractor::new();
        let r = ex.extract("/admins", Some(&op_with(json!("Users")))).unwrap();
        assert_eq!(r.resource, "users");
        assert!(r.from_extension);

        let r = ex
            .extract("/x", Some(&op_with(json!({"name": "member", "parent": "team"}))))
            .unwrap();
        assert_eq!(r.resource, "member");
        assert_eq!(r.parent.as_deref(), Some("team"));
        assert!(r.is_nested);
    }

    #[test]
    fn malformed_extension_is_rejected() {
        let ex = ResourceExtractor::new();
        assert!(ex.extract("/x", Some(&op_with(json!(42)))).is_err());
        assert!(ex.extract("/x", Some(&op_with(json!({"parent": "p"})))).is_err());
        assert!(ex.extract("/x", Some(&op_with(json!("")))).is_err());
    }

    #[test]
    fn template_validation() {
        assert_eq!(
            template_params("/a/{id}/b/{name}.{ext}").unwrap(),
            vec!["id", "name", "ext"]
        );
        assert!(template_params("a/b").is_err());
        assert!(template_params("/a/{id").is_err());
        assert!(template_params("/a/{{id}}").is_err());
        assert!(template_params("/a/{}").is_err());
    }

    #[test]
    fn path_analysis() {
        let a = PathAnalysis::new("/api/v1/users/{id}/posts/{postId}");
        assert_eq!(a.resource_segments, vec!["users", "posts"]);
        assert_eq!(a.param_names, vec!["id", "postId"]);
        assert!(a.is_single_item);
        assert!(!a.is_collection());
        assert_eq!(a.nesting_level, 1);
        assert_eq!(a.last_resource_segment(), Some("posts"));
    }
}
