//! Built trees cached per spec content and safety policy.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OnceCell};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::command_tree::{BuildOptions, BuildWarning, CommandTree, TreeBuilder};
use crate::error::EngineError;
use crate::mcp::ToolCatalog;
use crate::safety::{hex_digest, SafetyPolicy};
use crate::spec::ApiSpec;

/// Where a spec came from plus a digest of its bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SpecIdentity {
    pub source: String,
    pub digest: String,
}

impl SpecIdentity {
    pub fn new(source: impl Into<String>, content: &[u8]) -> Self {
        SpecIdentity {
            source: source.into(),
            digest: hex_digest(content),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub spec: SpecIdentity,
    pub policy: String,
}

impl CacheKey {
    pub fn new(spec: SpecIdentity, policy: &SafetyPolicy) -> Self {
        CacheKey {
            spec,
            policy: policy.fingerprint(),
        }
    }
}

/// A tree together with its tool catalog and build warnings.
#[derive(Debug)]
pub struct CachedBuild {
    pub tree: Arc<CommandTree>,
    pub tools: ToolCatalog,
    pub warnings: Vec<BuildWarning>,
}

impl CachedBuild {
    pub fn build(
        spec: &ApiSpec,
        policy: &SafetyPolicy,
        options: BuildOptions,
        token: &CancellationToken,
    ) -> Result<Self, EngineError> {
        let output = TreeBuilder::new(options).build_with_cancel(spec, token)?;
        let tree = Arc::new(output.tree);
        Ok(CachedBuild {
            tools: ToolCatalog::project(Arc::clone(&tree), policy),
            tree,
            warnings: output.warnings,
        })
    }
}

type Slot = Arc<OnceCell<Arc<CachedBuild>>>;

/// Per-key single-flight cache. Concurrent requests for one key share a
/// single build; a failed or cancelled build publishes nothing.
#[derive(Debug, Default)]
pub struct TreeCache {
    slots: Mutex<HashMap<CacheKey, Slot>>,
}

impl TreeCache {
    pub fn new() -> Self {
        Self::default()
    }

    async fn slot(&self, key: &CacheKey) -> Slot {
        let mut slots = self.slots.lock().await;
        if let Some(slot) = slots.get(key) {
            return Arc::clone(slot);
        }
        let before = slots.len();
        slots.retain(|k, _| k.spec.source != key.spec.source);
        if slots.len() != before {
            info!(source = %key.spec.source, "spec or safety policy changed, rebuilding");
        }
        let slot = Slot::default();
        slots.insert(key.clone(), Arc::clone(&slot));
        slot
    }

    /// Return the cached build for `key`, running `build` if there is none.
    pub async fn get_or_build<F>(
        &self,
        key: CacheKey,
        token: &CancellationToken,
        build: F,
    ) -> Result<Arc<CachedBuild>, EngineError>
    where
        F: FnOnce(&CancellationToken) -> Result<CachedBuild, EngineError>,
    {
        if token.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        let slot = self.slot(&key).await;
        let built = slot
            .get_or_try_init(|| async {
                debug!(source = %key.spec.source, "building command tree");
                let built = build(token)?;
                if token.is_cancelled() {
                    return Err(EngineError::Cancelled);
                }
                Ok(Arc::new(built))
            })
            .await?;
        Ok(Arc::clone(built))
    }

    /// [`get_or_build`](Self::get_or_build) for an already parsed spec.
    pub async fn load(
        &self,
        identity: SpecIdentity,
        spec: &ApiSpec,
        policy: &SafetyPolicy,
        options: BuildOptions,
        token: &CancellationToken,
    ) -> Result<Arc<CachedBuild>, EngineError> {
        let key = CacheKey::new(identity, policy);
        self.get_or_build(key, token, |token| {
            CachedBuild::build(spec, policy, options, token)
        })
        .await
    }

    /// Drop every entry built from `source`.
    pub async fn invalidate(&self, source: &str) {
        self.slots.lock().await.retain(|k, _| k.spec.source != source);
    }

    pub async fn len(&self) -> usize {
        self.slots.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
