//! Resource → verb → operation tree built from a parsed spec.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::conflict::{ConflictStrategy, VerbSet};
use crate::error::EngineError;
use crate::resource::{template_params, ResourceExtractor};
use crate::spec::{ApiSpec, HttpMethod, Operation, ParamLocation, Parameter, PathItem};
use crate::verb::{VerbMapper, VerbMapping};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildOptions {
    pub conflict_strategy: ConflictStrategy,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandTree {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    pub resources: BTreeMap<String, Resource>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Resource {
    pub name: String,
    /// Kept for diagnostics; the tree itself is flat.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    pub operations: BTreeMap<String, OperationDescriptor>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BodyDescriptor {
    pub required: bool,
    pub content_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<Value>,
}

impl BodyDescriptor {
    pub fn is_json(&self) -> bool {
        self.content_type.contains("json")
    }

    /// Top-level properties of a JSON object body: `(name, schema, required)`.
    pub fn properties(&self) -> Vec<(String, Value, bool)> {
        if !self.is_json() {
            return Vec::new();
        }
        let Some(schema) = &self.schema else {
            return Vec::new();
        };
        let required: Vec<&str> = schema
            .get("required")
            .and_then(Value::as_array)
            .map(|r| r.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();
        schema
            .get("properties")
            .and_then(Value::as_object)
            .map(|props| {
                props
                    .iter()
                    .map(|(name, prop)| (name.clone(), prop.clone(), required.contains(&name.as_str())))
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Everything needed to describe and invoke one operation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperationDescriptor {
    pub method: HttpMethod,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    pub deprecated: bool,
    /// Path-level and operation-level parameters, merged and resolved.
    pub parameters: Vec<Parameter>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_body: Option<BodyDescriptor>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub extensions: BTreeMap<String, Value>,
    pub resource: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action_hint: Option<String>,
    pub verb: VerbMapping,
}

impl OperationDescriptor {
    pub fn parameter(&self, name: &str, location: ParamLocation) -> Option<&Parameter> {
        self.parameters
            .iter()
            .find(|p| p.name == name && p.location == location)
    }

    pub fn path_parameters(&self) -> impl Iterator<Item = &Parameter> {
        self.parameters
            .iter()
            .filter(|p| p.location == ParamLocation::Path)
    }

    /// Summary, else the first line of the description.
    pub fn short_help(&self) -> Option<&str> {
        self.summary
            .as_deref()
            .or_else(|| self.description.as_deref().and_then(|d| d.lines().next()))
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

impl Resource {
    pub fn verbs(&self) -> impl Iterator<Item = &str> {
        self.operations.keys().map(String::as_str)
    }

    pub fn operation(&self, verb: &str) -> Option<&OperationDescriptor> {
        self.operations.get(verb)
    }
}

impl CommandTree {
    pub fn resource(&self, name: &str) -> Option<&Resource> {
        self.resources.get(name)
    }

    pub fn operation(&self, resource: &str, verb: &str) -> Option<&OperationDescriptor> {
        self.resources.get(resource)?.operation(verb)
    }

    /// `(resource, verb, operation)` in lexicographic order.
    pub fn operations(&self) -> impl Iterator<Item = (&str, &str, &OperationDescriptor)> {
        self.resources.values().flat_map(|r| {
            r.operations
                .iter()
                .map(move |(verb, op)| (r.name.as_str(), verb.as_str(), op))
        })
    }

    pub fn operation_count(&self) -> usize {
        self.resources.values().map(|r| r.operations.len()).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum WarningKind {
    InvalidPath { reason: String },
    MissingPathParameter { name: String },
    InvalidParameter { reason: String },
    InvalidResourceExtension { reason: String },
    InvalidVerbExtension { reason: String },
}

/// A problem with a single operation found during a build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildWarning {
    pub method: HttpMethod,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation_id: Option<String>,
    #[serde(flatten)]
    pub kind: WarningKind,
    /// Whether the operation was left out of the tree.
    pub skipped: bool,
}

impl fmt::Display for BuildWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}: ", self.method, self.path)?;
        match &self.kind {
            WarningKind::InvalidPath { reason } => write!(f, "invalid path: {reason}")?,
            WarningKind::MissingPathParameter { name } => {
                write!(f, "path parameter '{name}' is not declared")?
            }
            WarningKind::InvalidParameter { reason } => write!(f, "invalid parameter: {reason}")?,
            WarningKind::InvalidResourceExtension { reason }
            | WarningKind::InvalidVerbExtension { reason } => f.write_str(reason)?,
        }
        if self.skipped {
            f.write_str(" (operation skipped)")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BuildOutput {
    pub tree: CommandTree,
    pub warnings: Vec<BuildWarning>,
}

impl BuildOutput {
    pub fn skipped(&self) -> usize {
        self.warnings.iter().filter(|w| w.skipped).count()
    }
}

#[derive(Default)]
struct ResourceSlot {
    parent: Option<String>,
    verbs: VerbSet,
    operations: BTreeMap<String, OperationDescriptor>,
}

#[derive(Debug, Clone, Default)]
pub struct TreeBuilder {
    options: BuildOptions,
    extractor: ResourceExtractor,
    mapper: VerbMapper,
}

impl TreeBuilder {
    pub fn new(options: BuildOptions) -> Self {
        Self {
            options,
            extractor: ResourceExtractor::new(),
            mapper: VerbMapper::new(),
        }
    }

    pub fn build(&self, spec: &ApiSpec) -> Result<BuildOutput, EngineError> {
        self.build_with_cancel(spec, &CancellationToken::new())
    }

    /// Build the tree, checking `cancel` between paths.
    pub fn build_with_cancel(
        &self,
        spec: &ApiSpec,
        cancel: &CancellationToken,
    ) -> Result<BuildOutput, EngineError> {
        if spec.paths.is_empty() {
            return Err(EngineError::EmptySpec);
        }

        let mut warnings = Vec::new();
        let mut slots: BTreeMap<String, ResourceSlot> = BTreeMap::new();

        // BTreeMap iteration gives lexicographic path order
        for (path, item) in &spec.paths {
            if cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }
            for (method, operation) in item.operations() {
                let Some(descriptor) =
                    self.describe(spec, path, item, method, operation, &mut warnings)
                else {
                    continue;
                };
                let key = match &descriptor.parent {
                    Some(parent) => format!("{parent}-{}", descriptor.resource),
                    None => descriptor.resource.clone(),
                };
                let slot = slots.entry(key).or_insert_with(|| ResourceSlot {
                    parent: descriptor.parent.clone(),
                    verbs: VerbSet::new(self.options.conflict_strategy),
                    operations: BTreeMap::new(),
                });
                let mut descriptor = descriptor;
                let verb = slot.verbs.add(descriptor.verb.clone());
                if let Some(mapping) = slot.verbs.get(&verb) {
                    descriptor.verb = mapping.clone();
                }
                slot.operations.insert(verb, descriptor);
            }
        }

        let resources: BTreeMap<String, Resource> = slots
            .into_iter()
            .map(|(name, slot)| {
                let resource = Resource {
                    name: name.clone(),
                    parent: slot.parent,
                    operations: slot.operations,
                };
                (name, resource)
            })
            .collect();

        let tree = CommandTree {
            title: spec.info.title.clone(),
            base_url: spec.default_base_url().map(str::to_string),
            resources,
        };
        let output = BuildOutput { tree, warnings };
        if output.tree.operation_count() == 0 {
            return Err(EngineError::NoUsableOperations {
                skipped: output.skipped(),
            });
        }
        debug!(
            resources = output.tree.resources.len(),
            operations = output.tree.operation_count(),
            warnings = output.warnings.len(),
            "built command tree"
        );
        Ok(output)
    }

    fn describe(
        &self,
        spec: &ApiSpec,
        path: &str,
        item: &PathItem,
        method: HttpMethod,
        operation: &Operation,
        warnings: &mut Vec<BuildWarning>,
    ) -> Option<OperationDescriptor> {
        let mut report = |kind: WarningKind, skipped: bool| {
            let warning = BuildWarning {
                method,
                path: path.to_string(),
                operation_id: operation.operation_id.clone(),
                kind,
                skipped,
            };
            warn!("{warning}");
            warnings.push(warning);
        };

        let template = match template_params(path) {
            Ok(names) => names,
            Err(reason) => {
                report(WarningKind::InvalidPath { reason }, true);
                return None;
            }
        };

        let parameters = match merge_parameters(spec, &item.parameters, &operation.parameters) {
            Ok(params) => params,
            Err(reason) => {
                report(WarningKind::InvalidParameter { reason }, true);
                return None;
            }
        };
        if let Some(missing) = template.iter().find(|name| {
            !parameters
                .iter()
                .any(|p| p.location == ParamLocation::Path && &p.name == *name)
        }) {
            report(
                WarningKind::MissingPathParameter {
                    name: missing.clone(),
                },
                true,
            );
            return None;
        }

        let extracted = match self.extractor.extract(path, Some(operation)) {
            Ok(extracted) => extracted,
            Err(err) => {
                report(
                    WarningKind::InvalidResourceExtension {
                        reason: err.to_string(),
                    },
                    true,
                );
                return None;
            }
        };

        let (verb, rejected) = self.mapper.map_verb_checked(method, path, Some(operation));
        if let Some(reason) = rejected {
            report(WarningKind::InvalidVerbExtension { reason }, false);
        }

        Some(OperationDescriptor {
            method,
            path: path.to_string(),
            operation_id: operation
                .operation_id
                .clone()
                .filter(|id| !id.trim().is_empty()),
            summary: operation.summary.clone(),
            description: operation.description.clone(),
            tags: operation.tags.clone(),
            deprecated: operation.deprecated,
            parameters,
            request_body: operation
                .request_body
                .as_ref()
                .and_then(|body| body_descriptor(spec, body)),
            extensions: operation.extensions(),
            resource: extracted.resource,
            parent: extracted.parent,
            action_hint: extracted.action_hint,
            verb,
        })
    }
}

/// Merge path-level and operation-level parameters; the operation wins on
/// an identical `(name, in)`.
fn merge_parameters(
    spec: &ApiSpec,
    path_level: &[Value],
    op_level: &[Value],
) -> Result<Vec<Parameter>, String> {
    let mut merged: Vec<Parameter> = Vec::new();
    for raw in path_level.iter().chain(op_level) {
        let param = Parameter::from_value(&spec.resolve(raw))?;
        match merged
            .iter_mut()
            .find(|p| p.name == param.name && p.location == param.location)
        {
            Some(existing) => *existing = param,
            None => merged.push(param),
        }
    }
    Ok(merged)
}

fn body_descriptor(spec: &ApiSpec, raw: &Value) -> Option<BodyDescriptor> {
    let body = spec.resolve(raw);
    let content = body.get("content").and_then(Value::as_object)?;
    let content_type = if content.contains_key("application/json") {
        "application/json"
    } else {
        content
            .keys()
            .find(|k| k.contains("json"))
            .or_else(|| content.keys().next())?
            .as_str()
    };
    Some(BodyDescriptor {
        required: body.get("required").and_then(Value::as_bool).unwrap_or(false),
        content_type: content_type.to_string(),
        schema: content
            .get(content_type)
            .and_then(|media| media.get("schema"))
            .cloned(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verb::VerbSource;
    use serde_json::json;

    fn spec(value: Value) -> ApiSpec {
        serde_json::from_value(value).unwrap()
    }

    fn build(value: Value) -> BuildOutput {
        TreeBuilder::default().build(&spec(value)).unwrap()
    }

    #[test]
    fn pet_store_crud() {
        let out = build(json!({
            "openapi": "3.0.0",
            "info": {"title": "Petstore", "version": "1"},
            "paths": {
                "/pet": {
                    "post": {"operationId": "addPet"},
                    "put": {"operationId": "updatePet"}
                },
                "/pet/{petId}": {
                    "get": {"operationId": "getPetById",
                            "parameters": [{"name": "petId", "in": "path", "schema": {"type": "integer"}}]},
                    "delete": {"operationId": "deletePet",
                               "parameters": [{"name": "petId", "in": "path"}]}
                }
            }
        }));
        let pet = out.tree.resource("pet").unwrap();
        assert_eq!(pet.verbs().collect::<Vec<_>>(), vec!["create", "delete", "get", "update"]);
        assert_eq!(out.tree.resources.len(), 1);
        assert!(out.warnings.is_empty());
        let get = out.tree.operation("pet", "get").unwrap();
        assert!(get.parameters[0].required);
        assert_eq!(get.verb.source, VerbSource::OperationId);
    }

    #[test]
    fn nested_resources_are_flattened() {
        let out = build(json!({
            "openapi": "3.0.0",
            "paths": {
                "/repos/{owner}/{repo}/issues": {
                    "parameters": [
                        {"name": "owner", "in": "path", "required": true},
                        {"name": "repo", "in": "path", "required": true}
                    ],
                    "get": {"operationId": "listIssues"},
                    "post": {"operationId": "createIssue"}
                }
            }
        }));
        let res = out.tree.resource("repos-issues").unwrap();
        assert_eq!(res.parent.as_deref(), Some("repos"));
        assert_eq!(res.verbs().collect::<Vec<_>>(), vec!["create", "list"]);
        assert_eq!(res.operation("list").unwrap().parameters.len(), 2);
    }

    #[test]
    fn operation_parameters_override_path_level() {
        let out = build(json!({
            "openapi": "3.0.0",
            "paths": {
                "/items": {
                    "parameters": [{"name": "limit", "in": "query", "schema": {"type": "string"}}],
                    "get": {"parameters": [{"name": "limit", "in": "query", "schema": {"type": "integer"}}]}
                }
            }
        }));
        let op = out.tree.operation("items", "list").unwrap();
        assert_eq!(op.parameters.len(), 1);
        assert_eq!(op.parameters[0].schema, Some(json!({"type": "integer"})));
    }

    #[test]
    fn refs_are_resolved() {
        let out = build(json!({
            "openapi": "3.0.0",
            "paths": {
                "/pets": {
                    "post": {
                        "parameters": [{"$ref": "#/components/parameters/Trace"}],
                        "requestBody": {"$ref": "#/components/requestBodies/Pet"}
                    }
                }
            },
            "components": {
                "parameters": {"Trace": {"name": "X-Trace", "in": "header"}},
                "requestBodies": {"Pet": {"required": true, "content": {
                    "application/json": {"schema": {"$ref": "#/components/schemas/Pet"}}}}},
                "schemas": {"Pet": {"type": "object", "required": ["name"],
                    "properties": {"name": {"type": "string"}, "tag": {"type": "string"}}}}
            }
        }));
        let op = out.tree.operation("pets", "create").unwrap();
        assert_eq!(op.parameters[0].location, ParamLocation::Header);
        let body = op.request_body.as_ref().unwrap();
        assert!(body.required);
        let props = body.properties();
        assert_eq!(props.len(), 2);
        assert!(props.iter().any(|(n, _, req)| n == "name" && *req));
    }

    #[test]
    fn invalid_operations_are_skipped_with_warnings() {
        let out = build(json!({
            "openapi": "3.0.0",
            "paths": {
                "/users": {"get": {}},
                "/users/{id}": {"get": {}},
                "/broken/{id": {"get": {}},
                "/odd": {"get": {"x-cli-resource": 7}}
            }
        }));
        assert_eq!(out.tree.operation_count(), 1);
        assert_eq!(out.skipped(), 3);
        assert!(out.warnings.iter().any(|w| matches!(
            &w.kind,
            WarningKind::MissingPathParameter { name } if name == "id"
        )));
        assert!(out.warnings[0].to_string().contains("operation skipped"));
    }

    #[test]
    fn invalid_verb_extension_keeps_operation() {
        let out = build(json!({
            "openapi": "3.0.0",
            "paths": {"/users": {"get": {"x-cli-verb": "Bad Verb"}}}
        }));
        assert_eq!(out.tree.operation("users", "list").map(|o| o.method), Some(HttpMethod::Get));
        assert_eq!(out.warnings.len(), 1);
        assert!(!out.warnings[0].skipped);
    }

    #[test]
    fn conflicts_are_qualified_in_path_order() {
        let out = build(json!({
            "openapi": "3.0.0",
            "paths": {
                "/users": {"get": {"operationId": "listUsers"}},
                "/admins": {"get": {"operationId": "listAdmins", "x-cli-resource": "users"}}
            }
        }));
        let users = out.tree.resource("users").unwrap();
        assert_eq!(users.verbs().collect::<Vec<_>>(), vec!["list", "list-list-users"]);
        assert_eq!(users.operation("list").unwrap().path, "/admins");
        let qualified = users.operation("list-list-users").unwrap();
        assert_eq!(qualified.verb.verb, "list-list-users");
        assert_eq!(qualified.verb.qualifier.as_deref(), Some("list-users"));
    }

    #[test]
    fn fatal_errors() {
        let empty = spec(json!({"openapi": "3.0.0", "paths": {}}));
        assert!(matches!(TreeBuilder::default().build(&empty), Err(EngineError::EmptySpec)));

        let unusable = spec(json!({"openapi": "3.0.0", "paths": {"/a/{x}": {"get": {}}}}));
        assert!(matches!(
            TreeBuilder::default().build(&unusable),
            Err(EngineError::NoUsableOperations { skipped: 1 })
        ));
    }

    #[test]
    fn cancelled_build_returns_nothing() {
        let s = spec(json!({"openapi": "3.0.0", "paths": {"/a": {"get": {}}}}));
        let token = CancellationToken::new();
        token.cancel();
        assert!(matches!(
            TreeBuilder::default().build_with_cancel(&s, &token),
            Err(EngineError::Cancelled)
        ));
    }

    #[test]
    fn builds_are_deterministic() {
        let value = json!({
            "openapi": "3.0.0",
            "paths": {
                "/b": {"get": {}, "post": {}},
                "/a/{id}": {"get": {"parameters": [{"name": "id", "in": "path"}]}},
                "/a": {"get": {"operationId": "listA"}, "delete": {}}
            }
        });
        assert_eq!(build(value.clone()), build(value));
    }
}
