//! Shell completion candidates over installed apps.
//!
//! Every lookup takes the word typed so far and returns the matching
//! candidates, sorted. Unknown apps, verbs or resources yield nothing.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::cli::{CliCommand, BODY_FLAG, COMMON_FLAGS, OUTPUT_FORMATS};
use crate::command_tree::CommandTree;

#[derive(Debug, Clone)]
struct AppEntry {
    tree: Arc<CommandTree>,
    profiles: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct CompletionCatalog {
    apps: BTreeMap<String, AppEntry>,
}

fn matching<I, S>(candidates: I, prefix: &str) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let set: BTreeSet<String> = candidates
        .into_iter()
        .map(Into::into)
        .filter(|c| c.starts_with(prefix))
        .collect();
    set.into_iter().collect()
}

impl CompletionCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `name`, replacing any earlier registration.
    pub fn add_app(&mut self, name: impl Into<String>, tree: Arc<CommandTree>, profiles: Vec<String>) {
        self.apps.insert(name.into(), AppEntry { tree, profiles });
    }

    fn tree(&self, app: &str) -> Option<&CommandTree> {
        self.apps.get(app).map(|a| a.tree.as_ref())
    }

    pub fn apps(&self, prefix: &str) -> Vec<String> {
        matching(self.apps.keys().cloned(), prefix)
    }

    pub fn verbs(&self, app: &str, prefix: &str) -> Vec<String> {
        let Some(tree) = self.tree(app) else {
            return Vec::new();
        };
        matching(tree.operations().map(|(_, verb, _)| verb), prefix)
    }

    pub fn resources(&self, app: &str, prefix: &str) -> Vec<String> {
        let Some(tree) = self.tree(app) else {
            return Vec::new();
        };
        matching(tree.resources.keys().cloned(), prefix)
    }

    /// Resources that support `verb`.
    pub fn resources_for_verb(&self, app: &str, verb: &str, prefix: &str) -> Vec<String> {
        let Some(tree) = self.tree(app) else {
            return Vec::new();
        };
        matching(
            tree.resources
                .values()
                .filter(|r| r.operation(verb).is_some())
                .map(|r| r.name.clone()),
            prefix,
        )
    }

    pub fn verbs_for_resource(&self, app: &str, resource: &str, prefix: &str) -> Vec<String> {
        let Some(res) = self.tree(app).and_then(|t| t.resource(resource)) else {
            return Vec::new();
        };
        matching(res.verbs(), prefix)
    }

    fn command(&self, app: &str, verb: &str, resource: &str) -> Option<CliCommand> {
        let op = self.tree(app)?.operation(resource, verb)?;
        Some(CliCommand::project(resource, verb, op))
    }

    /// `--flag` candidates for `<verb> <resource>`, common flags included.
    pub fn flags(&self, app: &str, verb: &str, resource: &str, prefix: &str) -> Vec<String> {
        let Some(cmd) = self.command(app, verb, resource) else {
            return Vec::new();
        };
        let mut names: Vec<String> = cmd.flags.iter().map(|f| f.name.clone()).collect();
        if cmd.flags.accepts_raw_body {
            names.push(BODY_FLAG.to_string());
        }
        names.extend(COMMON_FLAGS.iter().map(|f| f.to_string()));
        matching(names.into_iter().map(|n| format!("--{n}")), prefix)
    }

    /// Values for `flag` (with or without the leading `--`).
    pub fn flag_values(
        &self,
        app: &str,
        verb: &str,
        resource: &str,
        flag: &str,
        prefix: &str,
    ) -> Vec<String> {
        let flag = flag.trim_start_matches("--");
        match flag {
            "output" => return matching(OUTPUT_FORMATS.iter().copied(), prefix),
            "profile" => {
                return self
                    .apps
                    .get(app)
                    .map(|a| matching(a.profiles.iter().cloned(), prefix))
                    .unwrap_or_default();
            }
            _ => {}
        }
        self.command(app, verb, resource)
            .and_then(|cmd| cmd.flags.get(flag).map(|f| f.enum_values.clone()))
            .map(|values| matching(values, prefix))
            .unwrap_or_default()
    }
}
