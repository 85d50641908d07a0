use anyhow::{anyhow, bail, Context, Result};
use clap::{Arg, ArgAction, ArgMatches, Command};
use openbridge::cli::{common_args, project_tree, verb_commands, CliCommand, OutputFormat};
use openbridge::{
    bind_flags, config, ApiSpec, CommandTree, CompletionCatalog, Config, HttpClient, Profile,
    RequestExecutor, SafetyPolicy, ToolCatalog, TreeBuilder,
};
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::sync::Arc;
use std::env;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

/// Subcommands of the binary itself; API verbs with these names are hidden.
const BUILTINS: &[&str] = &["tree", "describe", "tools", "complete", "call-tool", "help"];

/// Completion key for a spec given with `--spec`.
const SPEC_APP: &str = "spec";

fn main() {
    init_tracing();
    if let Err(err) = run() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("OB_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// The spec an invocation runs against.
struct Source {
    /// App name, or `spec` for `--spec`.
    name: String,
    spec: ApiSpec,
    config: Config,
    config_path: PathBuf,
}

impl Source {
    fn profile(&self, requested: Option<&str>) -> Result<Option<&Profile>> {
        if !self.config.apps.contains_key(&self.name) {
            if let Some(name) = requested {
                bail!("--profile {name} needs --app");
            }
            return Ok(None);
        }
        Ok(self.config.profile(&self.name, requested)?)
    }

    fn profile_names(&self) -> Vec<String> {
        self.config
            .apps
            .get(&self.name)
            .map(|app| app.profile_names())
            .unwrap_or_default()
    }
}

fn run() -> Result<()> {
    let pre = bootstrap_cli()
        .try_get_matches()
        .unwrap_or_else(|_| ArgMatches::default());
    let source = load_source(&pre)?;

    let tree = match &source {
        Some(source) => {
            let built = TreeBuilder::default().build(&source.spec)?;
            debug!(
                resources = built.tree.resources.len(),
                skipped = built.skipped(),
                "loaded {}",
                source.name
            );
            Some(Arc::new(built.tree))
        }
        None => None,
    };
    let commands = tree.as_deref().map(project_tree).unwrap_or_default();
    let matches = build_cli(&commands).get_matches();

    let need_tree = || {
        tree.clone()
            .ok_or_else(|| anyhow!("no spec loaded: pass --spec FILE or --app NAME"))
    };
    let need_source = || {
        source
            .as_ref()
            .ok_or_else(|| anyhow!("no spec loaded: pass --spec FILE or --app NAME"))
    };

    match matches.subcommand() {
        Some(("tree", sub)) => handle_tree(&*need_tree()?, sub),
        Some(("describe", sub)) => handle_describe(&commands, sub),
        Some(("tools", sub)) => {
            let source = need_source()?;
            let policy = safety_policy(source, sub)?;
            handle_tools(&ToolCatalog::project(need_tree()?, &policy), sub)
        }
        Some(("complete", sub)) => handle_complete(source.as_ref(), tree.clone(), sub),
        Some(("call-tool", sub)) => {
            let source = need_source()?;
            let policy = safety_policy(source, sub)?;
            let catalog = ToolCatalog::project(need_tree()?, &policy);
            let client = http_client(source, &matches, sub)?;
            handle_call_tool(&catalog, &client, sub)
        }
        Some((verb, verb_matches)) => {
            let (resource, leaf) = verb_matches
                .subcommand()
                .ok_or_else(|| anyhow!("resource required"))?;
            let cmd = commands
                .iter()
                .find(|c| c.verb == verb && c.resource == resource)
                .ok_or_else(|| anyhow!("unknown command {verb} {resource}"))?;
            let tree = need_tree()?;
            let op = tree
                .operation(resource, verb)
                .ok_or_else(|| anyhow!("unknown command {verb} {resource}"))?;
            let parts = bind_flags(op, &cmd.flags, &cmd.flag_values(leaf))?;
            let client = http_client(need_source()?, &matches, leaf)?;
            let response = client.execute(&parts)?;
            print_value(&response.body, OutputFormat::from_matches(leaf))?;
            if response.status >= 400 {
                bail!("http {}", response.status);
            }
            Ok(())
        }
        None => Err(anyhow!("command required")),
    }
}

fn global_args() -> Vec<Arg> {
    vec![
        Arg::new("spec")
            .long("spec")
            .value_name("FILE")
            .env("OB_SPEC")
            .global(true)
            .help("OpenAPI document (JSON or YAML)"),
        Arg::new("app")
            .long("app")
            .value_name("NAME")
            .global(true)
            .help("Installed app from the config file; wins over --spec"),
        Arg::new("config")
            .long("config")
            .value_name("FILE")
            .env(config::CONFIG_ENV)
            .global(true)
            .help("Config file (default: <config dir>/openbridge/config.yaml)"),
        Arg::new("base-url")
            .long("base-url")
            .value_name("URL")
            .env("OB_BASE_URL")
            .global(true)
            .help("API base URL; overrides the profile and the spec servers"),
        Arg::new("token")
            .long("token")
            .value_name("TOKEN")
            .env("OB_TOKEN")
            .hide_env_values(true)
            .global(true)
            .help("Bearer token"),
        Arg::new("header")
            .long("header")
            .value_name("NAME:VALUE")
            .global(true)
            .action(ArgAction::Append)
            .help("Extra header (repeatable)"),
        Arg::new("timeout")
            .long("timeout")
            .value_name("SECS")
            .global(true)
            .value_parser(clap::value_parser!(u64))
            .help("HTTP timeout in seconds"),
    ]
}

/// Reads only the global flags so the spec can be loaded before the full
/// command line is known.
fn bootstrap_cli() -> Command {
    Command::new("ob")
        .args(global_args())
        .allow_external_subcommands(true)
        .disable_help_flag(true)
        .disable_version_flag(true)
        .ignore_errors(true)
}

fn build_cli(commands: &[CliCommand]) -> Command {
    Command::new("ob")
        .about("Resource-oriented CLI for any OpenAPI document")
        .version(env!("CARGO_PKG_VERSION"))
        .subcommand_required(true)
        .arg_required_else_help(true)
        .args(global_args())
        .subcommand(
            Command::new("tree")
                .about("Show resources and their verbs")
                .args(common_args()),
        )
        .subcommand(
            Command::new("describe")
                .about("Describe one command")
                .arg(Arg::new("verb").required(true))
                .arg(Arg::new("resource").required(true))
                .args(common_args()),
        )
        .subcommand(
            Command::new("tools")
                .about("List MCP tools allowed by the profile's safety policy")
                .args(common_args()),
        )
        .subcommand(
            Command::new("complete")
                .about("Print completion candidates for a partial command line")
                .arg(
                    Arg::new("words")
                        .num_args(0..)
                        .trailing_var_arg(true)
                        .allow_hyphen_values(true)
                        .help("Words after `ob`; the last one is being completed"),
                ),
        )
        .subcommand(
            Command::new("call-tool")
                .about("Invoke an MCP tool with JSON arguments")
                .arg(Arg::new("name").required(true))
                .arg(
                    Arg::new("args")
                        .long("args")
                        .value_name("JSON|@file|@-")
                        .help("Tool arguments as a JSON object"),
                )
                .args(common_args()),
        )
        .subcommands(verb_commands(commands, BUILTINS))
}

fn string_arg(matches: &ArgMatches, id: &str) -> Option<String> {
    matches.try_get_one::<String>(id).ok().flatten().cloned()
}

fn config_path(pre: &ArgMatches) -> Result<PathBuf> {
    string_arg(pre, "config")
        .or_else(|| env::var(config::CONFIG_ENV).ok())
        .map(PathBuf::from)
        .or_else(config::default_path)
        .ok_or_else(|| anyhow!("no config directory; pass --config"))
}

fn load_source(pre: &ArgMatches) -> Result<Option<Source>> {
    let config_path = config_path(pre)?;
    let config = Config::load_or_default(&config_path)?;

    if let Some(app) = string_arg(pre, "app") {
        let spec_path = config.app(&app)?.spec_path(&config_path);
        let spec = ApiSpec::load(&spec_path)
            .with_context(|| format!("load spec for app {app}"))?;
        return Ok(Some(Source {
            name: app,
            spec,
            config,
            config_path,
        }));
    }

    let Some(path) = string_arg(pre, "spec").or_else(|| env::var("OB_SPEC").ok()) else {
        return Ok(None);
    };
    let spec = ApiSpec::load(&path).with_context(|| format!("load spec {path}"))?;
    Ok(Some(Source {
        name: SPEC_APP.to_string(),
        spec,
        config,
        config_path,
    }))
}

fn safety_policy(source: &Source, matches: &ArgMatches) -> Result<SafetyPolicy> {
    let requested = string_arg(matches, "profile");
    Ok(source
        .profile(requested.as_deref())?
        .map(|p| p.safety.clone())
        .unwrap_or_default())
}

fn http_client(source: &Source, globals: &ArgMatches, leaf: &ArgMatches) -> Result<HttpClient> {
    let requested = string_arg(leaf, "profile");
    let profile = source.profile(requested.as_deref())?;

    let base_url = string_arg(globals, "base-url")
        .or_else(|| profile.and_then(|p| p.base_url.clone()))
        .or_else(|| source.spec.default_base_url().map(str::to_string))
        .ok_or_else(|| anyhow!("no base url: pass --base-url or add servers to the spec"))?;

    let mut headers: Vec<(String, String)> = profile
        .map(|p| p.headers.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
        .unwrap_or_default();
    headers.extend(parse_header_args(globals.get_many::<String>("header"))?);

    let timeout = globals
        .get_one::<u64>("timeout")
        .copied()
        .or_else(|| profile.and_then(|p| p.timeout_secs));

    debug!(%base_url, config = %source.config_path.display(), "http client");
    Ok(HttpClient::new(
        base_url,
        string_arg(globals, "token"),
        headers,
        timeout,
    )?)
}

fn parse_header_args(
    values: Option<clap::parser::ValuesRef<'_, String>>,
) -> Result<Vec<(String, String)>> {
    let mut out = Vec::new();
    let Some(values) = values else {
        return Ok(out);
    };
    for raw in values {
        let (k, v) = split_header(raw).ok_or_else(|| anyhow!("invalid header: {raw}"))?;
        out.push((k.to_string(), v.to_string()));
    }
    Ok(out)
}

fn split_header(value: &str) -> Option<(&str, &str)> {
    value
        .split_once(':')
        .or_else(|| value.split_once('='))
        .map(|(k, v)| (k.trim(), v.trim()))
        .filter(|(k, _)| !k.is_empty())
}

fn handle_tree(tree: &CommandTree, matches: &ArgMatches) -> Result<()> {
    let format = OutputFormat::from_matches(matches);
    if format != OutputFormat::Table {
        return print_value(&serde_json::to_value(tree)?, format);
    }
    for (name, resource) in &tree.resources {
        match &resource.parent {
            Some(parent) => println!("{name} (under {parent})"),
            None => println!("{name}"),
        }
        let width = resource.verbs().map(str::len).max().unwrap_or(0);
        for (verb, op) in &resource.operations {
            println!(
                "  {verb:<width$}  {:<7} {}  {}",
                op.method.as_str(),
                op.path,
                op.short_help().unwrap_or("")
            );
        }
    }
    Ok(())
}

fn handle_describe(commands: &[CliCommand], matches: &ArgMatches) -> Result<()> {
    let verb = string_arg(matches, "verb").ok_or_else(|| anyhow!("verb required"))?;
    let resource = string_arg(matches, "resource").ok_or_else(|| anyhow!("resource required"))?;
    let cmd = commands
        .iter()
        .find(|c| c.verb == verb && c.resource == resource)
        .ok_or_else(|| anyhow!("unknown command {verb} {resource}"))?;

    let format = OutputFormat::from_matches(matches);
    if format != OutputFormat::Table {
        return print_value(&serde_json::to_value(cmd)?, format);
    }

    println!("{verb} {resource}");
    println!("  method: {}", cmd.method);
    println!("  path: {}", cmd.path);
    println!("  about: {}", cmd.about);
    if let Some(desc) = &cmd.long_about {
        println!("  description: {}", desc.trim());
    }
    if !cmd.flags.is_empty() {
        println!("  flags:");
        for flag in cmd.flags.iter() {
            let required = if flag.required { ", required" } else { "" };
            println!("    --{}  {} ({}{required})", flag.name, flag.kind, flag.target.as_str());
            if !flag.enum_values.is_empty() {
                println!("        one of: {}", flag.enum_values.join(", "));
            }
        }
    }
    if cmd.flags.accepts_raw_body {
        println!("    --body  JSON|@file|@-");
    }
    Ok(())
}

fn handle_tools(catalog: &ToolCatalog, matches: &ArgMatches) -> Result<()> {
    let format = OutputFormat::from_matches(matches);
    if format != OutputFormat::Table {
        return print_value(&serde_json::to_value(catalog.tools())?, format);
    }
    let width = catalog.tools().iter().map(|t| t.name.len()).max().unwrap_or(0);
    for tool in catalog.tools() {
        println!("{:<width$}  {}", tool.name, tool.description);
    }
    Ok(())
}

fn handle_call_tool(catalog: &ToolCatalog, client: &HttpClient, matches: &ArgMatches) -> Result<()> {
    let name = string_arg(matches, "name").ok_or_else(|| anyhow!("tool name required"))?;
    let args = match string_arg(matches, "args") {
        Some(raw) => {
            let text = openbridge::binding::read_body_input(&raw)?;
            let value: Value = serde_json::from_str(&text).context("invalid JSON arguments")?;
            match value {
                Value::Object(map) => map,
                _ => bail!("tool arguments must be a JSON object"),
            }
        }
        None => Map::new(),
    };
    let result = catalog.invoke(&name, &args, client)?;
    match OutputFormat::from_matches(matches) {
        OutputFormat::Table => println!("{}", result.text),
        format => print_value(&serde_json::to_value(&result)?, format)?,
    }
    if result.is_error {
        bail!("tool {name} returned an error");
    }
    Ok(())
}

/// Completion catalog over every configured app plus the current source.
fn completion_catalog(source: Option<&Source>, tree: Option<Arc<CommandTree>>) -> CompletionCatalog {
    let mut catalog = CompletionCatalog::new();
    if let Some(source) = source {
        for (name, app) in &source.config.apps {
            if *name == source.name {
                continue;
            }
            let built = ApiSpec::load(app.spec_path(&source.config_path))
                .map_err(anyhow::Error::from)
                .and_then(|spec| Ok(TreeBuilder::default().build(&spec)?));
            match built {
                Ok(built) => catalog.add_app(name.clone(), Arc::new(built.tree), app.profile_names()),
                Err(err) => warn!(app = %name, "skipping app for completion: {err}"),
            }
        }
        if let Some(tree) = tree {
            catalog.add_app(source.name.clone(), tree, source.profile_names());
        }
    }
    catalog
}

fn handle_complete(
    source: Option<&Source>,
    tree: Option<Arc<CommandTree>>,
    matches: &ArgMatches,
) -> Result<()> {
    let words: Vec<String> = matches
        .get_many::<String>("words")
        .map(|w| w.cloned().collect())
        .unwrap_or_default();
    let app = source.map(|s| s.name.clone()).unwrap_or_default();
    let catalog = completion_catalog(source, tree);
    for candidate in complete_words(&catalog, &app, &words) {
        println!("{candidate}");
    }
    Ok(())
}

/// Candidates for the last of `words` (`ob` itself excluded).
fn complete_words(catalog: &CompletionCatalog, app: &str, words: &[String]) -> Vec<String> {
    let (current, before) = match words.split_last() {
        Some((last, before)) => (last.as_str(), before),
        None => ("", words),
    };
    let previous = before.last().map(String::as_str);
    if previous == Some("--app") {
        return catalog.apps(current);
    }

    // positional words, skipping global flags and their values
    let mut positional = Vec::new();
    let mut skip_value = false;
    for word in before {
        if skip_value {
            skip_value = false;
        } else if word.starts_with("--") {
            skip_value = !word.contains('=');
        } else {
            positional.push(word.as_str());
        }
    }

    match positional.as_slice() {
        [] if !current.starts_with('-') => {
            let mut out = catalog.verbs(app, current);
            out.extend(BUILTINS.iter().filter(|b| b.starts_with(current)).map(|b| b.to_string()));
            out.sort();
            out.dedup();
            out
        }
        [verb] if !current.starts_with('-') => catalog.resources_for_verb(app, verb, current),
        [verb, resource, ..] => match previous {
            Some(flag) if flag.starts_with("--") && !current.starts_with('-') => {
                catalog.flag_values(app, verb, resource, flag, current)
            }
            _ => catalog.flags(app, verb, resource, current),
        },
        _ => Vec::new(),
    }
}

fn print_value(value: &Value, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
        OutputFormat::Yaml => print!("{}", serde_yaml_ng::to_string(value)?),
        OutputFormat::Table => println!("{}", render_table(value)),
    }
    Ok(())
}

fn cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Arrays of objects become columns, objects become `key: value` lines.
fn render_table(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Array(rows) if !rows.is_empty() && rows.iter().all(Value::is_object) => {
            let mut columns: Vec<&str> = Vec::new();
            for row in rows.iter().filter_map(Value::as_object) {
                for key in row.keys() {
                    if !columns.contains(&key.as_str()) {
                        columns.push(key);
                    }
                }
            }
            let cells: Vec<Vec<String>> = rows
                .iter()
                .map(|row| columns.iter().map(|c| cell(&row[*c])).collect())
                .collect();
            let widths: Vec<usize> = columns
                .iter()
                .enumerate()
                .map(|(i, c)| cells.iter().map(|r| r[i].len()).max().unwrap_or(0).max(c.len()))
                .collect();
            let line = |values: Vec<&str>| {
                values
                    .iter()
                    .zip(&widths)
                    .map(|(v, w)| format!("{v:<w$}"))
                    .collect::<Vec<_>>()
                    .join("  ")
                    .trim_end()
                    .to_string()
            };
            let header: Vec<String> = columns.iter().map(|c| c.to_uppercase()).collect();
            let mut out = vec![line(header.iter().map(String::as_str).collect())];
            for row in &cells {
                out.push(line(row.iter().map(String::as_str).collect()));
            }
            out.join("\n")
        }
        Value::Object(map) if !map.is_empty() => {
            let width = map.keys().map(String::len).max().unwrap_or(0);
            map.iter()
                .map(|(k, v)| format!("{k:<width$}  {}", cell(v)))
                .collect::<Vec<_>>()
                .join("\n")
        }
        other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn words(line: &str) -> Vec<String> {
        let mut out: Vec<String> = line.split_whitespace().map(str::to_string).collect();
        if line.ends_with(' ') {
            out.push(String::new());
        }
        out
    }

    fn catalog() -> CompletionCatalog {
        let spec = ApiSpec::parse(
            r#"{"openapi": "3.0.0", "paths": {
                "/pets": {"get": {"operationId": "listPets", "parameters": [
                    {"name": "status", "in": "query", "schema": {"type": "string", "enum": ["sold", "available"]}}]}},
                "/pets/{id}": {"delete": {"parameters": [{"name": "id", "in": "path"}]}}
            }}"#,
        )
        .unwrap();
        let tree = TreeBuilder::default().build(&spec).unwrap().tree;
        let mut catalog = CompletionCatalog::new();
        catalog.add_app("pets", Arc::new(tree), vec!["prod".into()]);
        catalog
    }

    #[test]
    fn completes_verbs_resources_and_flags() {
        let c = catalog();
        assert_eq!(complete_words(&c, "pets", &words("")), vec![
            "call-tool", "complete", "delete", "describe", "help", "list", "tools", "tree"
        ]);
        assert_eq!(complete_words(&c, "pets", &words("de")), vec!["delete", "describe"]);
        assert_eq!(complete_words(&c, "pets", &words("list ")), vec!["pets"]);
        assert_eq!(complete_words(&c, "pets", &words("list pets --s")), vec!["--status"]);
        assert_eq!(
            complete_words(&c, "pets", &words("--app pets list pets --status ")),
            vec!["available", "sold"]
        );
        assert_eq!(complete_words(&c, "pets", &words("list pets --profile ")), vec!["prod"]);
        assert_eq!(complete_words(&c, "pets", &words("--app p")), vec!["pets"]);
    }

    #[test]
    fn renders_tables() {
        let rows = json!([{"id": 1, "name": "rex"}, {"id": 12, "name": "tom", "tag": "cat"}]);
        assert_eq!(render_table(&rows), "ID  NAME  TAG\n1   rex\n12  tom   cat");
        assert_eq!(render_table(&json!({"id": 1, "name": "rex"})), "id    1\nname  rex");
        assert_eq!(render_table(&json!("plain")), "plain");
        assert_eq!(render_table(&json!([])), "[]");
    }

    #[test]
    fn splits_headers() {
        assert_eq!(split_header("x-tenant: acme"), Some(("x-tenant", "acme")));
        assert_eq!(split_header("x-tenant=acme"), Some(("x-tenant", "acme")));
        assert_eq!(split_header("nope"), None);
        assert_eq!(split_header(": v"), None);
    }

    #[test]
    fn cli_hides_builtin_verbs() {
        let spec = ApiSpec::parse(
            r#"{"openapi": "3.0.0", "paths": {
                "/reports/tree": {"get": {"x-cli-verb": "tree"}},
                "/reports": {"get": {}}
            }}"#,
        )
        .unwrap();
        let tree = TreeBuilder::default().build(&spec).unwrap().tree;
        let cli = build_cli(&project_tree(&tree));
        cli.clone().debug_assert();
        let matches = cli
            .try_get_matches_from(["ob", "list", "reports", "--json"])
            .unwrap();
        let (verb, sub) = matches.subcommand().unwrap();
        assert_eq!(verb, "list");
        let (resource, leaf) = sub.subcommand().unwrap();
        assert_eq!(resource, "reports");
        assert_eq!(OutputFormat::from_matches(leaf), OutputFormat::Json);
    }
}
