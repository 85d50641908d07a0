//! Per-resource verb sets with deterministic conflict resolution.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::naming::{normalize, sanitize_identifier, to_kebab};
use crate::resource::PathAnalysis;
use crate::verb::VerbMapping;

/// How a second operation claiming an existing verb gets renamed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConflictStrategy {
    /// `verb-<kebab(operationId)>`, else [`ConflictStrategy::Path`].
    #[default]
    Qualify,
    /// `<kebab(operationId)>`, else [`ConflictStrategy::Path`].
    OperationId,
    /// `verb-<last resource segment>`, then `-alt`, `-alt2`, ...
    Path,
}

/// Verbs registered under one resource.
#[derive(Debug, Clone, Default)]
pub struct VerbSet {
    verbs: BTreeMap<String, VerbMapping>,
    strategy: ConflictStrategy,
}

impl VerbSet {
    pub fn new(strategy: ConflictStrategy) -> Self {
        Self {
            verbs: BTreeMap::new(),
            strategy,
        }
    }

    /// Register a mapping, qualifying its verb if already taken.
    ///
    /// Returns the final verb, which is also written back to the stored
    /// mapping along with its qualifier.
    pub fn add(&mut self, mut mapping: VerbMapping) -> String {
        let original = mapping.verb.clone();
        let verb = self.resolve(&mapping);
        if verb != original {
            let qualifier = verb
                .strip_prefix(&format!("{original}-"))
                .unwrap_or(&verb)
                .to_string();
            mapping.qualifier = Some(qualifier);
        }
        mapping.verb = verb.clone();
        self.verbs.insert(verb.clone(), mapping);
        verb
    }

    /// The verb `mapping` would receive if added now.
    pub fn resolve(&self, mapping: &VerbMapping) -> String {
        let verb = &mapping.verb;
        if !self.contains(verb) {
            return verb.clone();
        }

        let operation_id = mapping
            .operation_id
            .as_deref()
            .filter(|id| !id.trim().is_empty());
        let qualified = match (self.strategy, operation_id) {
            (ConflictStrategy::Qualify, Some(id)) => Some(format!("{verb}-{}", to_kebab(id))),
            (ConflictStrategy::OperationId, Some(id)) => Some(to_kebab(id)),
            _ => None,
        };
        if let Some(candidate) = qualified.map(|c| sanitize_identifier(&c, 'v')) {
            if !candidate.is_empty() && !self.contains(&candidate) {
                return candidate;
            }
        }

        let analysis = PathAnalysis::new(&mapping.path);
        let base = match analysis.last_resource_segment() {
            Some(segment) => sanitize_identifier(&format!("{verb}-{}", normalize(segment)), 'v'),
            None => verb.clone(),
        };
        if !self.contains(&base) {
            return base;
        }

        let mut n = 1usize;
        loop {
            let candidate = if n == 1 {
                format!("{base}-alt")
            } else {
                format!("{base}-alt{n}")
            };
            if !self.contains(&candidate) {
                return candidate;
            }
            n += 1;
        }
    }

    pub fn contains(&self, verb: &str) -> bool {
        self.verbs.contains_key(verb)
    }

    pub fn get(&self, verb: &str) -> Option<&VerbMapping> {
        self.verbs.get(verb)
    }

    /// Registered verbs in lexicographic order.
    pub fn verbs(&self) -> impl Iterator<Item = &str> {
        self.verbs.keys().map(String::as_str)
    }

    pub fn mappings(&self) -> impl Iterator<Item = &VerbMapping> {
        self.verbs.values()
    }

    pub fn len(&self) -> usize {
        self.verbs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.verbs.is_empty()
    }

    pub fn strategy(&self) -> ConflictStrategy {
        self.strategy
    }
}
