//! CLI projection: flags for each `(verb, resource)` command and the clap
//! tree built from them.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use clap::builder::PossibleValuesParser;
use clap::{Arg, ArgAction, ArgMatches, Command};
use serde::Serialize;
use serde_json::Value;

use crate::binding::FlagValues;
use crate::command_tree::{CommandTree, OperationDescriptor};
use crate::spec::{schema_enum, schema_type, HttpMethod, ParamLocation};
use crate::verb::verb_description;

pub const BODY_FLAG: &str = "body";

pub const OUTPUT_FORMATS: &[&str] = &["table", "json", "yaml"];

/// Flags present on every operation command.
pub const COMMON_FLAGS: &[&str] = &["profile", "output", "json", "yaml"];

/// Names an operation flag may never take: common flags, the raw body flag,
/// clap's own flags and the binary's global options.
pub const RESERVED_FLAGS: &[&str] = &[
    "profile", "output", "json", "yaml", "body", "help", "version", "spec", "app", "config",
    "base-url", "token", "header", "timeout",
];

/// Primitive conversion target for a flag value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    String,
    Integer,
    Number,
    Boolean,
    Array(Box<ValueKind>),
    Object,
}

impl ValueKind {
    /// Kind for an OpenAPI schema. Unknown or missing types degrade to
    /// `String`; nested arrays degrade their items to `String`.
    pub fn from_schema(schema: &Value) -> Self {
        match schema_type(schema) {
            Some("integer") => ValueKind::Integer,
            Some("number") => ValueKind::Number,
            Some("boolean") => ValueKind::Boolean,
            Some("object") => ValueKind::Object,
            Some("array") => {
                let item = match schema.get("items").map(ValueKind::from_schema) {
                    Some(ValueKind::Array(_)) | None => ValueKind::String,
                    Some(kind) => kind,
                };
                ValueKind::Array(Box::new(item))
            }
            Some(_) => ValueKind::String,
            None if schema.get("properties").is_some() => ValueKind::Object,
            None => ValueKind::String,
        }
    }

    pub fn json_type(&self) -> &'static str {
        match self {
            ValueKind::String => "string",
            ValueKind::Integer => "integer",
            ValueKind::Number => "number",
            ValueKind::Boolean => "boolean",
            ValueKind::Array(_) => "array",
            ValueKind::Object => "object",
        }
    }

    fn value_name(&self) -> &'static str {
        match self {
            ValueKind::String => "STRING",
            ValueKind::Integer => "INT",
            ValueKind::Number => "NUMBER",
            ValueKind::Boolean => "BOOL",
            ValueKind::Array(item) => item.value_name(),
            ValueKind::Object => "JSON",
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueKind::Array(item) => write!(f, "[]{item}"),
            other => f.write_str(other.json_type()),
        }
    }
}

/// Where a bound flag value goes in the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FlagTarget {
    Path,
    Query,
    Header,
    Cookie,
    Body,
}

impl FlagTarget {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlagTarget::Path => "path",
            FlagTarget::Query => "query",
            FlagTarget::Header => "header",
            FlagTarget::Cookie => "cookie",
            FlagTarget::Body => "body",
        }
    }
}

impl From<ParamLocation> for FlagTarget {
    fn from(location: ParamLocation) -> Self {
        match location {
            ParamLocation::Path => FlagTarget::Path,
            ParamLocation::Query => FlagTarget::Query,
            ParamLocation::Header => FlagTarget::Header,
            ParamLocation::Cookie => FlagTarget::Cookie,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlagSpec {
    /// Flag / argument name, unique within the command.
    pub name: String,
    /// Parameter or body property name in the API.
    pub key: String,
    pub target: FlagTarget,
    pub kind: ValueKind,
    pub required: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub enum_values: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip)]
    pub schema: Value,
}

impl FlagSpec {
    fn new(name: String, key: &str, target: FlagTarget, schema: Value, required: bool) -> Self {
        let kind = ValueKind::from_schema(&schema);
        // arrays constrain their items
        let enum_values = match (&kind, schema.get("items")) {
            (ValueKind::Array(_), Some(items)) => schema_enum(items),
            _ => schema_enum(&schema),
        };
        FlagSpec {
            name,
            key: key.to_string(),
            target,
            kind,
            required,
            enum_values,
            default: schema.get("default").cloned(),
            description: schema
                .get("description")
                .and_then(Value::as_str)
                .map(str::to_string),
            schema,
        }
    }

    fn help(&self) -> String {
        let text = self
            .description
            .as_deref()
            .and_then(|d| d.lines().next())
            .unwrap_or("")
            .trim();
        let mut help = if text.is_empty() {
            format!("[{}]", self.target.as_str())
        } else {
            format!("{text} [{}]", self.target.as_str())
        };
        if let Some(default) = &self.default {
            help.push_str(&format!(" (default: {default})"));
        }
        help
    }

    fn to_arg(&self) -> Arg {
        let mut arg = Arg::new(self.name.clone())
            .long(self.name.clone())
            .value_name(self.kind.value_name())
            .help(self.help())
            .required(self.required && self.target != FlagTarget::Body);
        match &self.kind {
            ValueKind::Boolean => {
                arg = arg.num_args(0..=1).default_missing_value("true");
            }
            ValueKind::Array(_) => {
                arg = arg.action(ArgAction::Append);
            }
            _ => {}
        }
        if !self.enum_values.is_empty() && !matches!(self.kind, ValueKind::Array(_)) {
            arg = arg.value_parser(PossibleValuesParser::new(self.enum_values.clone()));
        }
        arg
    }
}

/// Parameter and body flags of one operation.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FlagSet {
    pub params: Vec<FlagSpec>,
    pub body: Vec<FlagSpec>,
    /// The operation has a request body, so a raw `body` value is accepted.
    pub accepts_raw_body: bool,
    pub body_required: bool,
}

impl FlagSet {
    /// Flags for `op`. A name clashing with `reserved` or an earlier flag is
    /// renamed `<location>-<name>`.
    pub fn for_operation(op: &OperationDescriptor, reserved: &[&str]) -> Self {
        let mut taken: BTreeSet<String> = reserved.iter().map(|s| s.to_string()).collect();
        let mut claim = |key: &str, target: FlagTarget| {
            let mut name = key.to_string();
            if taken.contains(&name) {
                name = format!("{}-{key}", target.as_str());
            }
            let base = name.clone();
            let mut n = 2;
            while taken.contains(&name) {
                name = format!("{base}-{n}");
                n += 1;
            }
            taken.insert(name.clone());
            name
        };

        let params = op
            .parameters
            .iter()
            .map(|p| {
                let target = FlagTarget::from(p.location);
                let mut schema = p.schema.clone().unwrap_or_else(|| Value::Object(Default::default()));
                if let (Some(desc), Some(map)) = (&p.description, schema.as_object_mut()) {
                    map.insert("description".to_string(), Value::String(desc.clone()));
                }
                FlagSpec::new(claim(&p.name, target), &p.name, target, schema, p.required)
            })
            .collect();

        let body = op
            .request_body
            .as_ref()
            .map(|b| b.properties())
            .unwrap_or_default()
            .into_iter()
            .filter(|(key, _, _)| !key.is_empty())
            .map(|(key, schema, required)| {
                FlagSpec::new(claim(&key, FlagTarget::Body), &key, FlagTarget::Body, schema, required)
            })
            .collect();

        FlagSet {
            params,
            body,
            accepts_raw_body: op.request_body.is_some(),
            body_required: op.request_body.as_ref().is_some_and(|b| b.required),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &FlagSpec> {
        self.params.iter().chain(&self.body)
    }

    pub fn get(&self, name: &str) -> Option<&FlagSpec> {
        self.iter().find(|f| f.name == name)
    }

    pub fn len(&self) -> usize {
        self.params.len() + self.body.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One `(verb, resource)` command.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CliCommand {
    pub verb: String,
    pub resource: String,
    pub method: HttpMethod,
    pub path: String,
    pub about: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub long_about: Option<String>,
    pub flags: FlagSet,
}

impl CliCommand {
    pub fn project(resource: &str, verb: &str, op: &OperationDescriptor) -> Self {
        CliCommand {
            verb: verb.to_string(),
            resource: resource.to_string(),
            method: op.method,
            path: op.path.clone(),
            about: op
                .short_help()
                .map(str::to_string)
                .unwrap_or_else(|| verb_description(verb)),
            long_about: op.description.clone(),
            flags: FlagSet::for_operation(op, RESERVED_FLAGS),
        }
    }

    /// The clap command for the resource level (`<verb> <resource>`).
    pub fn to_clap(&self) -> Command {
        let mut cmd = Command::new(self.resource.clone()).about(self.about.clone());
        if let Some(long) = &self.long_about {
            cmd = cmd.long_about(long.clone());
        }
        for flag in self.flags.iter() {
            cmd = cmd.arg(flag.to_arg());
        }
        if self.flags.accepts_raw_body {
            cmd = cmd.arg(
                Arg::new(BODY_FLAG)
                    .long(BODY_FLAG)
                    .value_name("JSON|@file|@-")
                    .help("Raw request body; overrides body property flags"),
            );
        }
        cmd.args(common_args())
    }

    /// Read this command's flag values back out of clap matches.
    pub fn flag_values(&self, matches: &ArgMatches) -> FlagValues {
        let mut values = FlagValues::new();
        for flag in self.flags.iter() {
            if let Some(raw) = matches.get_many::<String>(&flag.name) {
                values.insert(flag.name.clone(), raw.cloned().collect());
            }
        }
        if self.flags.accepts_raw_body {
            if let Some(body) = matches.get_one::<String>(BODY_FLAG) {
                values.set_body(body.clone());
            }
        }
        values
    }
}

/// `--profile` and the output format flags shared by every command.
pub fn common_args() -> Vec<Arg> {
    vec![
        Arg::new("profile")
            .long("profile")
            .value_name("NAME")
            .help("Profile to use from the app config"),
        Arg::new("output")
            .long("output")
            .short('o')
            .value_name("FORMAT")
            .value_parser(["table", "json", "yaml"])
            .help("Output format"),
        Arg::new("json")
            .long("json")
            .action(ArgAction::SetTrue)
            .conflicts_with_all(["yaml", "output"])
            .help("Shorthand for --output json"),
        Arg::new("yaml")
            .long("yaml")
            .action(ArgAction::SetTrue)
            .conflicts_with("output")
            .help("Shorthand for --output yaml"),
    ]
}

/// Every command of `tree`, in `(resource, verb)` order.
pub fn project_tree(tree: &CommandTree) -> Vec<CliCommand> {
    tree.operations()
        .map(|(resource, verb, op)| CliCommand::project(resource, verb, op))
        .collect()
}

/// One clap subcommand per verb, each holding the resources that support it.
///
/// Verbs named in `skip` (the binary's own subcommands) are left out.
pub fn verb_commands(commands: &[CliCommand], skip: &[&str]) -> Vec<Command> {
    let mut by_verb: BTreeMap<&str, Vec<&CliCommand>> = BTreeMap::new();
    for cmd in commands {
        by_verb.entry(cmd.verb.as_str()).or_default().push(cmd);
    }
    by_verb
        .into_iter()
        .filter(|(verb, _)| {
            let shadowed = skip.contains(verb);
            if shadowed {
                tracing::warn!(verb, "verb shadowed by a built-in command");
            }
            !shadowed
        })
        .map(|(verb, cmds)| {
            let mut verb_cmd = Command::new(verb.to_string())
                .about(verb_description(verb))
                .subcommand_required(true)
                .arg_required_else_help(true);
            for cmd in cmds {
                verb_cmd = verb_cmd.subcommand(cmd.to_clap());
            }
            verb_cmd
        })
        .collect()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
    Yaml,
}

impl OutputFormat {
    /// From `--json`, `--yaml` or `--output` on `matches`, if those flags exist.
    pub fn from_matches(matches: &ArgMatches) -> Self {
        let flag = |id: &str| matches!(matches.try_get_one::<bool>(id), Ok(Some(true)));
        if flag("json") {
            return OutputFormat::Json;
        }
        if flag("yaml") {
            return OutputFormat::Yaml;
        }
        match matches.try_get_one::<String>("output").ok().flatten().map(String::as_str) {
            Some("json") => OutputFormat::Json,
            Some("yaml") => OutputFormat::Yaml,
            _ => OutputFormat::Table,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command_tree::TreeBuilder;
    use crate::spec::ApiSpec;
    use serde_json::json;

    fn tree(value: Value) -> CommandTree {
        let spec: ApiSpec = serde_json::from_value(value).unwrap();
        TreeBuilder::default().build(&spec).unwrap().tree
    }

    fn repos_tree() -> CommandTree {
        tree(json!({
            "openapi": "3.0.0",
            "paths": {
                "/repos/{owner}/{repo}/issues": {
                    "parameters": [
                        {"name": "owner", "in": "path", "required": true, "schema": {"type": "string"}},
                        {"name": "repo", "in": "path", "required": true, "schema": {"type": "string"}}
                    ],
                    "get": {
                        "operationId": "listIssues",
                        "parameters": [
                            {"name": "state", "in": "query", "schema": {"type": "string", "enum": ["open", "closed"]}},
                            {"name": "labels", "in": "query", "schema": {"type": "array", "items": {"type": "string"}}},
                            {"name": "output", "in": "query", "schema": {"type": "string"}}
                        ]
                    },
                    "post": {
                        "operationId": "createIssue",
                        "requestBody": {"required": true, "content": {"application/json": {"schema": {
                            "type": "object",
                            "required": ["title"],
                            "properties": {
                                "title": {"type": "string"},
                                "draft": {"type": "boolean"},
                                "owner": {"type": "string"}
                            }
                        }}}}
                    }
                }
            }
        }))
    }

    #[test]
    fn kinds_from_schema() {
        assert_eq!(ValueKind::from_schema(&json!({"type": "integer"})), ValueKind::Integer);
        assert_eq!(ValueKind::from_schema(&json!({"type": ["null", "number"]})), ValueKind::Number);
        assert_eq!(
            ValueKind::from_schema(&json!({"type": "array", "items": {"type": "integer"}})),
            ValueKind::Array(Box::new(ValueKind::Integer))
        );
        assert_eq!(
            ValueKind::from_schema(&json!({"type": "array", "items": {"type": "array"}})),
            ValueKind::Array(Box::new(ValueKind::String))
        );
        assert_eq!(ValueKind::from_schema(&json!({"properties": {}})), ValueKind::Object);
        assert_eq!(ValueKind::from_schema(&json!({"type": "file"})), ValueKind::String);
        assert_eq!(ValueKind::from_schema(&json!({})), ValueKind::String);
    }

    #[test]
    fn path_params_are_required_flags() {
        let t = repos_tree();
        let cmd = CliCommand::project("repos-issues", "list", t.operation("repos-issues", "list").unwrap());
        let owner = cmd.flags.get("owner").unwrap();
        assert!(owner.required);
        assert_eq!(owner.target, FlagTarget::Path);
        assert!(cmd.flags.get("repo").unwrap().required);
        assert_eq!(cmd.flags.get("state").unwrap().enum_values, vec!["open", "closed"]);
    }

    #[test]
    fn colliding_flags_are_renamed() {
        let t = repos_tree();
        let list = CliCommand::project("repos-issues", "list", t.operation("repos-issues", "list").unwrap());
        let renamed = list.flags.get("query-output").unwrap();
        assert_eq!(renamed.key, "output");
        assert!(list.flags.get("output").is_none());

        let create = CliCommand::project("repos-issues", "create", t.operation("repos-issues", "create").unwrap());
        assert_eq!(create.flags.get("body-owner").unwrap().key, "owner");
        assert_eq!(create.flags.get("owner").unwrap().target, FlagTarget::Path);
        assert!(create.flags.accepts_raw_body);
        assert!(create.flags.body_required);
    }

    #[test]
    fn clap_parses_operation_flags() {
        let t = repos_tree();
        let cmd = CliCommand::project("repos-issues", "list", t.operation("repos-issues", "list").unwrap());
        let matches = cmd
            .to_clap()
            .try_get_matches_from([
                "repos-issues", "--owner", "o", "--repo", "r", "--labels", "a,b", "--labels", "c",
                "--state", "open", "--json",
            ])
            .unwrap();
        let values = cmd.flag_values(&matches);
        assert_eq!(values.get("labels").unwrap(), ["a,b", "c"]);
        assert_eq!(values.get("state").unwrap(), ["open"]);
        assert_eq!(OutputFormat::from_matches(&matches), OutputFormat::Json);
    }

    #[test]
    fn clap_rejects_missing_path_flag_and_bad_enum() {
        let t = repos_tree();
        let cmd = CliCommand::project("repos-issues", "list", t.operation("repos-issues", "list").unwrap());
        assert!(cmd.to_clap().try_get_matches_from(["repos-issues", "--owner", "o"]).is_err());
        assert!(cmd
            .to_clap()
            .try_get_matches_from(["repos-issues", "--owner", "o", "--repo", "r", "--state", "x"])
            .is_err());
    }

    #[test]
    fn boolean_flag_without_value() {
        let t = repos_tree();
        let cmd = CliCommand::project("repos-issues", "create", t.operation("repos-issues", "create").unwrap());
        let matches = cmd
            .to_clap()
            .try_get_matches_from(["repos-issues", "--owner", "o", "--repo", "r", "--draft"])
            .unwrap();
        assert_eq!(cmd.flag_values(&matches).get("draft").unwrap(), ["true"]);
    }

    #[test]
    fn verb_level_groups_resources() {
        let t = repos_tree();
        let commands = project_tree(&t);
        let verbs = verb_commands(&commands, &["tree"]);
        let names: Vec<_> = verbs.iter().map(|c| c.get_name().to_string()).collect();
        assert_eq!(names, vec!["create", "list"]);
        assert!(verbs[1].find_subcommand("repos-issues").is_some());

        let shadowed = verb_commands(&commands, &["list"]);
        assert_eq!(shadowed.len(), 1);
    }
}
