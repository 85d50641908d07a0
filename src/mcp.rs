//! MCP tool projection: names, input schemas, safety filtering and
//! invocation of a tool through a [`RequestExecutor`].

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::binding::bind_arguments;
use crate::cli::{FlagSet, FlagSpec, ValueKind, BODY_FLAG};
use crate::command_tree::{CommandTree, OperationDescriptor};
use crate::error::ToolError;
use crate::http::RequestExecutor;
use crate::naming::{to_tool_identifier, MAX_TOOL_NAME_LEN};
use crate::safety::SafetyPolicy;
use crate::spec::HttpMethod;

const METHOD_SUFFIXES: &[&str] = &["_get", "_post", "_put", "_patch", "_delete"];

/// Leading verbs of generated operationIds, compound ones first.
const FASTAPI_VERBS: &[&str] = &[
    "batch_create", "batch_delete", "batch_update", "list", "get", "create", "update", "delete",
    "patch", "post", "put", "find", "search", "query",
];

fn is_method_token(part: &str) -> bool {
    matches!(
        part,
        "get" | "post" | "put" | "patch" | "delete" | "head" | "options" | "trace" | "id"
    )
}

/// operationIds shaped like `{function}_{path}_{method}`, as FastAPI emits.
pub fn is_fastapi_pattern(operation_id: &str) -> bool {
    let lower = operation_id.to_ascii_lowercase();
    METHOD_SUFFIXES.iter().any(|s| lower.ends_with(s))
}

/// Whether an operationId repeats a word or follows the FastAPI shape.
pub fn has_redundancy(operation_id: &str) -> bool {
    let lower = operation_id.to_ascii_lowercase();
    let parts: Vec<&str> = lower.split('_').collect();
    if parts.len() < 3 {
        return false;
    }
    let mut seen = BTreeSet::new();
    for part in parts {
        if is_method_token(part) || part.len() <= 1 {
            continue;
        }
        if !seen.insert(part) {
            return true;
        }
    }
    is_fastapi_pattern(operation_id)
}

fn strip_method_suffix(operation_id: &str) -> &str {
    METHOD_SUFFIXES
        .iter()
        .find_map(|s| operation_id.strip_suffix(s))
        .unwrap_or(operation_id)
}

/// Path segments that can name a tool: no parameters, short `v..` version
/// markers or `api`.
fn tool_path_segments(path: &str) -> Vec<&str> {
    path.trim_matches('/')
        .split('/')
        .filter(|seg| {
            !seg.is_empty()
                && !seg.starts_with('{')
                && !(seg.starts_with('v') && seg.len() <= 3)
                && *seg != "api"
        })
        .collect()
}

fn verb_from_generated_id(operation_id: &str, main_resource: &str) -> Option<String> {
    if let Some(verb) = FASTAPI_VERBS
        .iter()
        .find(|v| operation_id.starts_with(&format!("{v}_")))
    {
        return Some(verb.to_string());
    }
    let parts: Vec<&str> = operation_id.split('_').collect();
    let i = parts.iter().position(|p| *p == main_resource)?;
    let verb = if i > 0 {
        parts[..i].join("_")
    } else {
        parts[i + 1..].join("_")
    };
    (!verb.is_empty()).then_some(verb)
}

/// `todos_list` from `list_todos_todos_get` on `/todos`.
fn fastapi_tool_name(operation_id: &str, path: &str) -> Option<String> {
    let lower = operation_id.to_ascii_lowercase();
    let id = strip_method_suffix(&lower);
    let segments = tool_path_segments(path);
    let main = *segments.first()?;
    let verb = verb_from_generated_id(id, main)?;

    if let Some(sub) = segments.get(1) {
        if verb.contains(sub) {
            return Some(format!("{main}_{verb}"));
        }
        return Some(format!("{main}_{sub}"));
    }
    let verb = verb
        .strip_suffix(&format!("_{main}"))
        .unwrap_or(&verb)
        .to_string();
    let singular = main.strip_suffix('s').unwrap_or(main);
    let verb = verb
        .strip_suffix(&format!("_{singular}"))
        .unwrap_or(&verb)
        .to_string();
    Some(format!("{main}_{verb}"))
}

/// Tool name derived from an operationId alone, if it yields one.
pub fn tool_name_from_operation_id(operation_id: &str, path: &str) -> Option<String> {
    if operation_id.trim().is_empty() {
        return None;
    }
    if !has_redundancy(operation_id) {
        return Some(to_tool_identifier(operation_id));
    }
    if is_fastapi_pattern(operation_id) {
        return fastapi_tool_name(operation_id, path).map(|n| to_tool_identifier(&n));
    }
    None
}

/// Tool name for the operation stored at `(resource, verb)` in the tree.
///
/// Falls back to `resource_verb` when the operationId is missing or too
/// noisy to use.
pub fn generate_tool_name(op: &OperationDescriptor, resource: &str, verb: &str) -> String {
    op.operation_id
        .as_deref()
        .and_then(|id| tool_name_from_operation_id(id, &op.path))
        .unwrap_or_else(|| to_tool_identifier(&format!("{resource}_{verb}").replace('-', "_")))
}

fn dedupe(name: String, taken: &BTreeSet<String>) -> String {
    if !taken.contains(&name) {
        return name;
    }
    let mut n = 2usize;
    loop {
        let suffix = format!("_{n}");
        let mut base = name.clone();
        base.truncate(MAX_TOOL_NAME_LEN - suffix.len());
        let candidate = format!("{base}{suffix}");
        if !taken.contains(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct McpTool {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
    #[serde(skip)]
    pub resource: String,
    #[serde(skip)]
    pub verb: String,
    #[serde(skip)]
    pub method: HttpMethod,
    #[serde(skip)]
    pub path: String,
    #[serde(skip)]
    pub operation_id: Option<String>,
    #[serde(skip)]
    pub flags: FlagSet,
}

impl McpTool {
    fn project(name: String, resource: &str, verb: &str, op: &OperationDescriptor) -> Self {
        let needs_raw_body = op
            .request_body
            .as_ref()
            .is_some_and(|b| b.properties().is_empty());
        let reserved: &[&str] = if needs_raw_body { &[BODY_FLAG] } else { &[] };
        let flags = FlagSet::for_operation(op, reserved);
        let input_schema = input_schema(op, &flags, needs_raw_body);
        McpTool {
            name,
            description: op
                .short_help()
                .map(str::to_string)
                .unwrap_or_else(|| format!("{} {}", op.method, op.path)),
            input_schema,
            resource: resource.to_string(),
            verb: verb.to_string(),
            method: op.method,
            path: op.path.clone(),
            operation_id: op.operation_id.clone(),
            flags,
        }
    }
}

fn property_schema(flag: &FlagSpec) -> Value {
    let mut prop = Map::new();
    prop.insert("type".into(), json!(flag.kind.json_type()));
    if let Some(desc) = &flag.description {
        prop.insert("description".into(), json!(desc));
    }
    match &flag.kind {
        ValueKind::Array(item) => {
            let mut items = Map::new();
            items.insert("type".into(), json!(item.json_type()));
            if let Some(values) = flag.schema.get("items").and_then(|i| i.get("enum")) {
                items.insert("enum".into(), values.clone());
            }
            prop.insert("items".into(), Value::Object(items));
        }
        _ => {
            if let Some(values) = flag.schema.get("enum") {
                prop.insert("enum".into(), values.clone());
            }
        }
    }
    if let Some(format) = flag.schema.get("format") {
        prop.insert("format".into(), format.clone());
    }
    if let Some(default) = &flag.default {
        prop.insert("default".into(), default.clone());
    }
    Value::Object(prop)
}

fn input_schema(op: &OperationDescriptor, flags: &FlagSet, raw_body: bool) -> Value {
    let mut properties = Map::new();
    let mut required = Vec::new();
    for flag in flags.iter() {
        properties.insert(flag.name.clone(), property_schema(flag));
        if flag.required {
            required.push(Value::String(flag.name.clone()));
        }
    }
    if let (true, Some(body)) = (raw_body, &op.request_body) {
        let mut schema = match (&body.schema, body.is_json()) {
            (Some(schema), true) => schema.clone(),
            _ => json!({"type": "string"}),
        };
        if let Some(map) = schema.as_object_mut() {
            map.entry("description")
                .or_insert_with(|| json!(format!("Request body ({})", body.content_type)));
        }
        properties.insert(BODY_FLAG.to_string(), schema);
        if body.required {
            required.push(json!(BODY_FLAG));
        }
    }
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

/// Outcome of a tool call as handed to an MCP transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolResult {
    pub text: String,
    #[serde(rename = "isError")]
    pub is_error: bool,
}

/// Safety-filtered MCP tools over a shared command tree.
#[derive(Debug, Clone)]
pub struct ToolCatalog {
    tree: Arc<CommandTree>,
    tools: Vec<McpTool>,
    index: BTreeMap<String, usize>,
}

impl ToolCatalog {
    /// Name every operation in tree order, then drop what `policy` rejects.
    pub fn project(tree: Arc<CommandTree>, policy: &SafetyPolicy) -> Self {
        let mut taken = BTreeSet::new();
        let mut tools = Vec::new();
        let mut filtered = 0usize;
        for (resource, verb, op) in tree.operations() {
            let name = dedupe(generate_tool_name(op, resource, verb), &taken);
            taken.insert(name.clone());
            if !policy.allows(op.method, op.operation_id.as_deref(), &name) {
                filtered += 1;
                continue;
            }
            tools.push(McpTool::project(name, resource, verb, op));
        }
        let index = tools
            .iter()
            .enumerate()
            .map(|(i, t)| (t.name.clone(), i))
            .collect();
        debug!(tools = tools.len(), filtered, "projected tool catalog");
        ToolCatalog { tree, tools, index }
    }

    pub fn tools(&self) -> &[McpTool] {
        &self.tools
    }

    pub fn get(&self, name: &str) -> Option<&McpTool> {
        self.index.get(name).map(|&i| &self.tools[i])
    }

    /// The operation a tool invokes.
    pub fn operation(&self, name: &str) -> Option<&OperationDescriptor> {
        let tool = self.get(name)?;
        self.tree.operation(&tool.resource, &tool.verb)
    }

    pub fn tree(&self) -> &CommandTree {
        &self.tree
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Validate `args`, build the request and run it through `executor`.
    ///
    /// HTTP error statuses are not errors here; they come back with
    /// `is_error` set.
    pub fn invoke(
        &self,
        name: &str,
        args: &Map<String, Value>,
        executor: &dyn RequestExecutor,
    ) -> Result<ToolResult, ToolError> {
        let not_found = || ToolError::NotFound {
            name: name.to_string(),
        };
        let tool = self.get(name).ok_or_else(not_found)?;
        let op = self.operation(name).ok_or_else(not_found)?;
        let parts = bind_arguments(op, &tool.flags, args)?;
        debug!(tool = name, method = %parts.method, path = %parts.path, "invoking tool");
        let response = executor.execute(&parts)?;
        let text = match &response.body {
            Value::String(s) => s.clone(),
            other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
        };
        Ok(ToolResult {
            text,
            is_error: response.status >= 400,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::{Body, RequestParts};
    use crate::command_tree::TreeBuilder;
    use crate::error::ExecError;
    use crate::http::ExecResponse;
    use crate::naming::is_tool_identifier;
    use crate::spec::ApiSpec;
    use std::sync::Mutex;

    fn name(operation_id: &str, path: &str) -> Option<String> {
        tool_name_from_operation_id(operation_id, path)
    }

    #[test]
    fn clean_operation_ids_are_kept() {
        assert_eq!(name("listUsers", "/users").as_deref(), Some("listUsers"));
        assert_eq!(name("getPetById", "/pet/{petId}").as_deref(), Some("getPetById"));
        assert_eq!(name("users_get", "/users").as_deref(), Some("users_get"));
        assert_eq!(name("get-user", "/users").as_deref(), Some("get_user"));
        assert_eq!(name("", "/users"), None);
    }

    #[test]
    fn fastapi_ids_are_shortened() {
        assert_eq!(name("list_todos_todos_get", "/todos").as_deref(), Some("todos_list"));
        assert_eq!(name("create_todo_todos_post", "/todos").as_deref(), Some("todos_create"));
        assert_eq!(
            name("get_todo_todos__todo_id__get", "/todos/{todo_id}").as_deref(),
            Some("todos_get")
        );
        assert_eq!(
            name("update_todo_todos__todo_id__put", "/todos/{todo_id}").as_deref(),
            Some("todos_update")
        );
        assert_eq!(
            name("list_posts_users__userid__posts_get", "/users/{userId}/posts").as_deref(),
            Some("users_posts")
        );
        assert_eq!(name("get_stats_todos_stats_get", "/todos/stats").as_deref(), Some("todos_stats"));
        assert_eq!(
            name("batch_create_todos_todos_batch_post", "/todos/batch").as_deref(),
            Some("todos_batch_create")
        );
    }

    #[test]
    fn redundant_non_fastapi_ids_fall_back() {
        assert!(has_redundancy("user_info_user_details"));
        assert_eq!(name("user_info_user_details", "/users"), None);
        assert!(!has_redundancy("get_user"));
    }

    fn catalog(policy: &SafetyPolicy) -> ToolCatalog {
        let spec: ApiSpec = serde_json::from_value(json!({
            "openapi": "3.0.0",
            "paths": {
                "/v1/customers": {
                    "get": {"operationId": "listCustomers", "summary": "List customers",
                        "parameters": [{"name": "limit", "in": "query", "schema": {"type": "integer", "default": 10}}]},
                    "post": {"operationId": "createCustomer", "requestBody": {"required": true, "content": {
                        "application/json": {"schema": {"type": "object", "required": ["email"],
                            "properties": {"email": {"type": "string"}, "tier": {"type": "string", "enum": ["free", "pro"]}}}}}}}
                },
                "/v1/customers/{id}": {
                    "delete": {"parameters": [{"name": "id", "in": "path"}]}
                },
                "/api/v1/users": {"get": {}},
                "/files": {"put": {"operationId": "uploadFile",
                    "requestBody": {"content": {"application/octet-stream": {}}}}}
            }
        }))
        .unwrap();
        let tree = TreeBuilder::default().build(&spec).unwrap().tree;
        ToolCatalog::project(Arc::new(tree), policy)
    }

    fn names(c: &ToolCatalog) -> Vec<&str> {
        c.tools().iter().map(|t| t.name.as_str()).collect()
    }

    #[test]
    fn projects_every_operation() {
        let c = catalog(&SafetyPolicy::default());
        assert_eq!(
            names(&c),
            vec!["createCustomer", "customers_delete", "listCustomers", "uploadFile", "users_list"]
        );
        assert!(c.tools().iter().all(|t| is_tool_identifier(&t.name)));
    }

    #[test]
    fn input_schemas() {
        let c = catalog(&SafetyPolicy::default());
        let create = c.get("createCustomer").unwrap();
        assert_eq!(create.input_schema["required"], json!(["email"]));
        assert_eq!(create.input_schema["properties"]["tier"]["enum"], json!(["free", "pro"]));

        let list = c.get("listCustomers").unwrap();
        assert_eq!(list.description, "List customers");
        assert_eq!(list.input_schema["properties"]["limit"], json!({"type": "integer", "default": 10}));
        assert_eq!(list.input_schema["required"], json!([]));

        let delete = c.get("customers_delete").unwrap();
        assert_eq!(delete.input_schema["required"], json!(["id"]));
        assert_eq!(delete.description, "DELETE /v1/customers/{id}");

        let upload = c.get("uploadFile").unwrap();
        assert_eq!(upload.input_schema["properties"]["body"]["type"], "string");
    }

    #[test]
    fn read_only_policy() {
        let c = catalog(&SafetyPolicy::read_only());
        assert_eq!(names(&c), vec!["listCustomers", "users_list"]);
        assert!(c.tools().iter().all(|t| t.method.is_read_only()));
        assert_eq!(c.tree().operation_count(), 5);
    }

    #[test]
    fn allowlist_policy() {
        let c = catalog(&SafetyPolicy::allow(["listCustomers"]));
        assert_eq!(c.len(), 1);
        let op = c.operation("listCustomers").unwrap();
        assert_eq!((op.method, op.path.as_str()), (HttpMethod::Get, "/v1/customers"));
    }

    #[test]
    fn names_survive_filtering() {
        let all = catalog(&SafetyPolicy::default());
        let denied = catalog(&SafetyPolicy::deny(["createCustomer"]));
        for tool in denied.tools() {
            assert_eq!(all.get(&tool.name).map(|t| &t.path), Some(&tool.path));
        }
        assert!(denied.get("createCustomer").is_none());
    }

    #[test]
    fn duplicate_names_get_suffixes() {
        let mut taken = BTreeSet::new();
        taken.insert("users_list".to_string());
        assert_eq!(dedupe("users_list".into(), &taken), "users_list_2");
        taken.insert("users_list_2".to_string());
        assert_eq!(dedupe("users_list".into(), &taken), "users_list_3");
        let long = "a".repeat(MAX_TOOL_NAME_LEN);
        taken.insert(long.clone());
        let deduped = dedupe(long, &taken);
        assert_eq!(deduped.len(), MAX_TOOL_NAME_LEN);
        assert!(deduped.ends_with("_2"));
    }

    struct Recorder {
        seen: Mutex<Vec<RequestParts>>,
        status: u16,
    }

    impl RequestExecutor for Recorder {
        fn execute(&self, parts: &RequestParts) -> Result<ExecResponse, ExecError> {
            self.seen.lock().unwrap().push(parts.clone());
            Ok(ExecResponse {
                status: self.status,
                headers: Vec::new(),
                body: json!({"ok": self.status < 400}),
                content_type: "application/json".to_string(),
            })
        }
    }

    #[test]
    fn invoke_binds_and_executes() {
        let c = catalog(&SafetyPolicy::default());
        let recorder = Recorder {
            seen: Mutex::new(Vec::new()),
            status: 201,
        };
        let args = json!({"email": "a@b.c", "tier": "pro"});
        let result = c
            .invoke("createCustomer", args.as_object().unwrap(), &recorder)
            .unwrap();
        assert!(!result.is_error);
        assert!(result.text.contains("\"ok\": true"));
        let seen = recorder.seen.lock().unwrap();
        assert_eq!(seen[0].path, "/v1/customers");
        assert_eq!(seen[0].body, Some(Body::Json(json!({"email": "a@b.c", "tier": "pro"}))));
    }

    #[test]
    fn invoke_errors() {
        let c = catalog(&SafetyPolicy::read_only());
        let recorder = Recorder {
            seen: Mutex::new(Vec::new()),
            status: 404,
        };
        assert!(matches!(
            c.invoke("createCustomer", &Map::new(), &recorder),
            Err(ToolError::NotFound { .. })
        ));
        let bad = json!({"limit": "many"});
        assert!(matches!(
            c.invoke("listCustomers", bad.as_object().unwrap(), &recorder),
            Err(ToolError::Bind(_))
        ));
        let result = c.invoke("listCustomers", &Map::new(), &recorder).unwrap();
        assert!(result.is_error);
    }
}
