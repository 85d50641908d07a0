//! Safety policy gating which operations are exposed as MCP tools.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::spec::HttpMethod;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyPolicy {
    /// Only GET and HEAD operations are exposed.
    pub read_only_mode: bool,
    /// operationIds or tool names. When non-empty, nothing else is exposed
    /// and `denied_operations` is ignored.
    pub allowed_operations: Vec<String>,
    pub denied_operations: Vec<String>,
}

impl SafetyPolicy {
    pub fn read_only() -> Self {
        SafetyPolicy {
            read_only_mode: true,
            ..Self::default()
        }
    }

    pub fn allow<I, S>(operations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        SafetyPolicy {
            allowed_operations: operations.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn deny<I, S>(operations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        SafetyPolicy {
            denied_operations: operations.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn is_unrestricted(&self) -> bool {
        !self.read_only_mode && self.allowed_operations.is_empty() && self.denied_operations.is_empty()
    }

    /// Whether an operation may be exposed, matching lists against either its
    /// operationId or its tool name.
    pub fn allows(&self, method: HttpMethod, operation_id: Option<&str>, tool_name: &str) -> bool {
        if self.read_only_mode && !method.is_read_only() {
            return false;
        }
        let listed = |list: &[String]| {
            list.iter()
                .any(|entry| entry == tool_name || Some(entry.as_str()) == operation_id)
        };
        if !self.allowed_operations.is_empty() {
            return listed(&self.allowed_operations);
        }
        !listed(&self.denied_operations)
    }

    /// Stable digest of the policy; list order and duplicates do not matter.
    pub fn fingerprint(&self) -> String {
        let canonical = |list: &[String]| {
            let mut sorted = list.to_vec();
            sorted.sort();
            sorted.dedup();
            sorted
        };
        let canonical = serde_json::json!({
            "read_only_mode": self.read_only_mode,
            "allowed_operations": canonical(&self.allowed_operations),
            "denied_operations": canonical(&self.denied_operations),
        });
        hex_digest(canonical.to_string().as_bytes())
    }
}

pub(crate) fn hex_digest(bytes: &[u8]) -> String {
    Sha256::digest(bytes)
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}
