//! HTTP method / path / operationId to CLI verb mapping.

use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use crate::naming::is_kebab_identifier;
use crate::resource::{action_prefix, classify_segment, path_segments, resource_segments, SegmentKind};
use crate::spec::{HttpMethod, Operation};

pub const VERB_EXTENSION: &str = "x-cli-verb";

/// Where a verb came from, highest priority first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum VerbSource {
    Extension,
    Pattern,
    OperationId,
    Default,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerbMapping {
    pub verb: String,
    pub method: HttpMethod,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation_id: Option<String>,
    pub source: VerbSource,
    pub is_action: bool,
    /// Set when the verb had to be qualified to resolve a conflict.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qualifier: Option<String>,
}

struct PathPatternRule {
    segment: &'static str,
    method: HttpMethod,
    verb: &'static str,
}

const fn rule(segment: &'static str, method: HttpMethod, verb: &'static str) -> PathPatternRule {
    PathPatternRule {
        segment,
        method,
        verb,
    }
}

const PATH_PATTERN_RULES: &[PathPatternRule] = &[
    rule("activate", HttpMethod::Post, "activate"),
    rule("deactivate", HttpMethod::Post, "deactivate"),
    rule("enable", HttpMethod::Post, "enable"),
    rule("disable", HttpMethod::Post, "disable"),
    rule("start", HttpMethod::Post, "start"),
    rule("stop", HttpMethod::Post, "stop"),
    rule("restart", HttpMethod::Post, "restart"),
    rule("pause", HttpMethod::Post, "pause"),
    rule("resume", HttpMethod::Post, "resume"),
    rule("cancel", HttpMethod::Post, "cancel"),
    rule("approve", HttpMethod::Post, "approve"),
    rule("reject", HttpMethod::Post, "reject"),
    rule("archive", HttpMethod::Post, "archive"),
    rule("unarchive", HttpMethod::Post, "unarchive"),
    rule("publish", HttpMethod::Post, "publish"),
    rule("unpublish", HttpMethod::Post, "unpublish"),
    rule("lock", HttpMethod::Post, "lock"),
    rule("unlock", HttpMethod::Post, "unlock"),
    rule("sync", HttpMethod::Post, "sync"),
    rule("refresh", HttpMethod::Post, "refresh"),
    rule("validate", HttpMethod::Post, "validate"),
    rule("verify", HttpMethod::Post, "verify"),
    rule("clone", HttpMethod::Post, "clone"),
    rule("copy", HttpMethod::Post, "copy"),
    rule("move", HttpMethod::Post, "move"),
    rule("rename", HttpMethod::Post, "rename"),
    rule("import", HttpMethod::Post, "import"),
    rule("export", HttpMethod::Post, "export"),
    rule("download", HttpMethod::Get, "download"),
    rule("upload", HttpMethod::Post, "upload"),
    rule("send", HttpMethod::Post, "send"),
    rule("resend", HttpMethod::Post, "resend"),
    rule("reset", HttpMethod::Post, "reset"),
    rule("search", HttpMethod::Post, "search"),
    rule("search", HttpMethod::Get, "search"),
    rule("query", HttpMethod::Post, "query"),
    rule("batch", HttpMethod::Post, "batch"),
    rule("bulk", HttpMethod::Post, "bulk"),
];

/// operationId prefix to verb. Matched longest prefix first.
const OPERATION_ID_VERBS: &[(&str, &str)] = &[
    ("list", "list"),
    ("get", "get"),
    ("fetch", "get"),
    ("create", "create"),
    ("add", "create"),
    ("post", "create"),
    ("update", "update"),
    ("put", "update"),
    ("patch", "apply"),
    ("delete", "delete"),
    ("remove", "delete"),
    ("find", "find"),
    ("search", "search"),
    ("check", "check"),
    ("verify", "verify"),
    ("validate", "validate"),
    ("save", "update"),
    ("store", "create"),
    ("load", "get"),
    ("modify", "update"),
    ("query", "query"),
];

/// Common CRUD verbs.
pub const STANDARD_VERBS: &[&str] = &["list", "get", "create", "update", "apply", "delete"];

/// Common non-CRUD action verbs.
pub const ACTION_VERBS: &[&str] = &[
    "activate", "deactivate", "enable", "disable", "start", "stop", "restart", "pause", "resume",
    "cancel", "approve", "reject", "archive", "unarchive", "publish", "unpublish", "lock",
    "unlock", "sync", "refresh", "validate", "verify", "clone", "copy", "move", "rename",
    "import", "export", "download", "upload", "send", "resend", "reset", "search", "query",
    "find", "filter", "batch", "bulk",
];

pub fn is_standard_verb(verb: &str) -> bool {
    STANDARD_VERBS.contains(&verb)
}

pub fn is_action_verb(verb: &str) -> bool {
    ACTION_VERBS.contains(&verb)
}

/// Human-readable help text for a verb.
pub fn verb_description(verb: &str) -> String {
    let known = match verb {
        "list" => "List all resources",
        "get" => "Get a single resource",
        "create" => "Create a new resource",
        "update" => "Update an existing resource",
        "apply" => "Apply partial updates to a resource",
        "delete" => "Delete a resource",
        "check" => "Check if a resource exists",
        "options" => "Get available options",
        "activate" => "Activate a resource",
        "deactivate" => "Deactivate a resource",
        "enable" => "Enable a resource",
        "disable" => "Disable a resource",
        "start" => "Start a resource",
        "stop" => "Stop a resource",
        "restart" => "Restart a resource",
        "find" => "Find resources matching criteria",
        "search" => "Search for resources",
        "download" => "Download a resource",
        "upload" => "Upload a resource",
        _ => return format!("Perform {verb} operation"),
    };
    known.to_string()
}

/// Verb for a trailing action segment such as `findByStatus`.
fn verb_for_action_prefix(prefix: &str) -> &str {
    match prefix {
        "get" | "fetch" | "load" => "get",
        "create" | "add" | "new" => "create",
        "update" | "modify" | "edit" => "update",
        "patch" => "apply",
        "delete" | "remove" => "delete",
        other => other,
    }
}

/// Verb inferred from an operationId prefix, if one matches at a word
/// boundary (`listUsers`, `get_user`, `delete`).
pub fn verb_from_operation_id(operation_id: &str) -> Option<&'static str> {
    let lower = operation_id.to_ascii_lowercase();
    OPERATION_ID_VERBS
        .iter()
        .filter(|(prefix, _)| {
            lower.starts_with(prefix)
                && operation_id[prefix.len()..]
                    .chars()
                    .next()
                    .map_or(true, |c| {
                        c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_' || c == '-'
                    })
        })
        .max_by_key(|(prefix, _)| prefix.len())
        .map(|(_, verb)| *verb)
}

/// Verb for a method when nothing more specific is known.
pub fn default_verb(method: HttpMethod, path: &str) -> &'static str {
    match method {
        HttpMethod::Get => {
            let ends_with_param = path_segments(path)
                .last()
                .is_some_and(|s| classify_segment(s) == SegmentKind::Param);
            if ends_with_param {
                "get"
            } else {
                "list"
            }
        }
        HttpMethod::Post => "create",
        HttpMethod::Put => "update",
        HttpMethod::Patch => "apply",
        HttpMethod::Delete => "delete",
        HttpMethod::Head => "check",
        HttpMethod::Options => "options",
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct VerbMapper;

impl VerbMapper {
    pub fn new() -> Self {
        Self
    }

    /// Map an operation to a verb, discarding extension diagnostics.
    pub fn map_verb(&self, method: HttpMethod, path: &str, operation: Option<&Operation>) -> VerbMapping {
        self.map_verb_checked(method, path, operation).0
    }

    /// Map an operation to a verb.
    ///
    /// Priority: `x-cli-verb` > path pattern (suffix table, then action hint)
    /// > operationId prefix > method default. An unusable `x-cli-verb` is
    /// returned as the second element and the next rule applies.
    pub fn map_verb_checked(
        &self,
        method: HttpMethod,
        path: &str,
        operation: Option<&Operation>,
    ) -> (VerbMapping, Option<String>) {
        let operation_id = operation
            .and_then(|op| op.operation_id.clone())
            .filter(|id| !id.trim().is_empty());
        let mapping = |verb: &str, source: VerbSource, is_action: bool| VerbMapping {
            verb: verb.to_string(),
            method,
            path: path.to_string(),
            operation_id: operation_id.clone(),
            source,
            is_action,
            qualifier: None,
        };

        let mut rejected = None;
        if let Some(ext) = operation.and_then(|op| op.extension(VERB_EXTENSION)) {
            match ext {
                Value::String(verb) if is_kebab_identifier(verb.trim()) => {
                    return (mapping(verb.trim(), VerbSource::Extension, false), None);
                }
                other => {
                    let reason = format!("invalid {VERB_EXTENSION} value {other}, ignoring");
                    warn!(%method, path, "{reason}");
                    rejected = Some(reason);
                }
            }
        }

        if let Some(verb) = self.pattern_verb(method, path) {
            return (mapping(verb, VerbSource::Pattern, true), rejected);
        }

        if let Some(verb) = operation_id.as_deref().and_then(verb_from_operation_id) {
            return (mapping(verb, VerbSource::OperationId, false), rejected);
        }

        (
            mapping(default_verb(method, path), VerbSource::Default, false),
            rejected,
        )
    }

    fn pattern_verb(&self, method: HttpMethod, path: &str) -> Option<&'static str> {
        let last = path_segments(path).last().map(|s| s.to_ascii_lowercase())?;
        if let Some(rule) = PATH_PATTERN_RULES
            .iter()
            .find(|r| r.method == method && r.segment == last)
        {
            return Some(rule.verb);
        }

        // trailing action segment, e.g. /pet/findByStatus
        let segments = resource_segments(path);
        if segments.len() < 2 {
            return None;
        }
        let hint = segments.last()?;
        let prefix = action_prefix(hint)?;
        Some(verb_for_action_prefix(prefix))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn op(value: Value) -> Operation {
        serde_json::from_value(value).unwrap()
    }

    fn verb(method: HttpMethod, path: &str, operation: Option<&Operation>) -> (String, VerbSource) {
        let m = VerbMapper::new().map_verb(method, path, operation);
        (m.verb, m.source)
    }

    #[test]
    fn extension_wins() {
        let o = op(json!({"operationId": "listUsers", "x-cli-verb": "ls"}));
        assert_eq!(
            verb(HttpMethod::Get, "/users/search", Some(&o)),
            ("ls".to_string(), VerbSource::Extension)
        );
    }

    #[test]
    fn invalid_extension_falls_through() {
        let o = op(json!({"operationId": "listUsers", "x-cli-verb": "Not A Verb"}));
        let (m, rejected) = VerbMapper::new().map_verb_checked(HttpMethod::Get, "/users", Some(&o));
        assert_eq!(m.verb, "list");
        assert_eq!(m.source, VerbSource::OperationId);
        assert!(rejected.is_some());
    }

    #[test]
    fn path_patterns() {
        assert_eq!(
            verb(HttpMethod::Post, "/users/{id}/activate", None),
            ("activate".to_string(), VerbSource::Pattern)
        );
        assert_eq!(verb(HttpMethod::Get, "/items/search", None).0, "search");
        assert_eq!(verb(HttpMethod::Post, "/items/search", None).0, "search");
        assert_eq!(verb(HttpMethod::Get, "/files/{id}/download", None).0, "download");
        // method mismatch falls back to default
        assert_eq!(verb(HttpMethod::Get, "/users/{id}/activate", None).0, "list");
    }

    #[test]
    fn pattern_mapping_is_action() {
        let m = VerbMapper::new().map_verb(HttpMethod::Post, "/jobs/{id}/cancel", None);
        assert!(m.is_action);
    }

    #[test]
    fn action_hint_drives_verb() {
        assert_eq!(
            verb(HttpMethod::Get, "/pet/findByStatus", None),
            ("find".to_string(), VerbSource::Pattern)
        );
        assert_eq!(verb(HttpMethod::Get, "/user/getByName", None).0, "get");
        assert_eq!(verb(HttpMethod::Post, "/orders/bulkImport", None).0, "bulk");
    }

    #[test]
    fn operation_id_prefixes() {
        assert_eq!(verb_from_operation_id("addPet"), Some("create"));
        assert_eq!(verb_from_operation_id("getPetById"), Some("get"));
        assert_eq!(verb_from_operation_id("patchUser"), Some("apply"));
        assert_eq!(verb_from_operation_id("storeItem"), Some("create"));
        assert_eq!(verb_from_operation_id("list_users_get"), Some("list"));
        assert_eq!(verb_from_operation_id("delete"), Some("delete"));
        assert_eq!(verb_from_operation_id("address"), None);
        assert_eq!(verb_from_operation_id("getaway"), None);
        assert_eq!(verb_from_operation_id("uploadFile"), None);
    }

    #[test]
    fn method_defaults() {
        assert_eq!(default_verb(HttpMethod::Get, "/users"), "list");
        assert_eq!(default_verb(HttpMethod::Get, "/users/{id}"), "get");
        assert_eq!(default_verb(HttpMethod::Post, "/users"), "create");
        assert_eq!(default_verb(HttpMethod::Put, "/users/{id}"), "update");
        assert_eq!(default_verb(HttpMethod::Patch, "/users/{id}"), "apply");
        assert_eq!(default_verb(HttpMethod::Delete, "/users/{id}"), "delete");
        assert_eq!(default_verb(HttpMethod::Head, "/users/{id}"), "check");
        assert_eq!(default_verb(HttpMethod::Options, "/users"), "options");
    }

    #[test]
    fn descriptions() {
        assert_eq!(verb_description("list"), "List all resources");
        assert_eq!(verb_description("frobnicate"), "Perform frobnicate operation");
        assert!(is_standard_verb("apply"));
        assert!(is_action_verb("publish"));
        assert!(!is_action_verb("list"));
    }
}
