//! Entity → integration resolution

use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::cache::EntityPattern;
use crate::controller::{ControllerClient, ControllerError};

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("no integration owns {0}")]
    NotFound(String),
    #[error("integration lookup failed: {0}")]
    Lookup(#[from] ControllerError),
}

#[async_trait]
pub trait IntegrationResolver: Send + Sync + 'static {
    async fn resolve(&self, entity_id: &str) -> Result<String, ResolveError>;
}

/// Static mapping from entity ids or `*` patterns to integration ids.
///
/// Exact ids win over patterns; among patterns the longest wins.
#[derive(Debug, Clone, Default)]
pub struct StaticResolver {
    exact: HashMap<String, String>,
    /// Longest pattern first
    patterns: Vec<(EntityPattern, String)>,
}

impl StaticResolver {
    pub fn new(mappings: &BTreeMap<String, String>) -> Self {
        let mut exact = HashMap::new();
        let mut patterns = Vec::new();
        for (key, integration) in mappings {
            if !key.contains('*') {
                exact.insert(key.clone(), integration.clone());
                continue;
            }
            match EntityPattern::new(key) {
                Ok(pattern) => patterns.push((pattern, integration.clone())),
                Err(e) => warn!(pattern = %key, error = %e, "Ignoring integration mapping"),
            }
        }
        patterns.sort_by(|(a, _), (b, _)| {
            b.as_str()
                .len()
                .cmp(&a.as_str().len())
                .then_with(|| a.as_str().cmp(b.as_str()))
        });
        Self { exact, patterns }
    }

    pub fn lookup(&self, entity_id: &str) -> Option<&str> {
        if let Some(integration) = self.exact.get(entity_id) {
            return Some(integration);
        }
        self.patterns
            .iter()
            .find(|(pattern, _)| pattern.matches(entity_id))
            .map(|(_, integration)| integration.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.exact.is_empty() && self.patterns.is_empty()
    }
}

#[async_trait]
impl IntegrationResolver for StaticResolver {
    async fn resolve(&self, entity_id: &str) -> Result<String, ResolveError> {
        self.lookup(entity_id)
            .map(str::to_string)
            .ok_or_else(|| ResolveError::NotFound(entity_id.to_string()))
    }
}

/// Asks the controller which config entry owns an entity.
///
/// Static overrides are consulted first. Successful lookups are cached for
/// the life of the process; misses are not, so an entity whose integration
/// is still loading can resolve on a later issue.
pub struct ControllerResolver {
    client: ControllerClient,
    overrides: StaticResolver,
    cache: RwLock<HashMap<String, String>>,
}

impl ControllerResolver {
    pub fn new(client: ControllerClient, overrides: StaticResolver) -> Self {
        Self {
            client,
            overrides,
            cache: RwLock::new(HashMap::new()),
        }
    }

    fn cached(&self, entity_id: &str) -> Option<String> {
        self.cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(entity_id)
            .cloned()
    }
}

#[async_trait]
impl IntegrationResolver for ControllerResolver {
    async fn resolve(&self, entity_id: &str) -> Result<String, ResolveError> {
        if let Some(integration) = self.overrides.lookup(entity_id) {
            return Ok(integration.to_string());
        }
        if let Some(integration) = self.cached(entity_id) {
            return Ok(integration);
        }

        let entry = self
            .client
            .config_entry_for(entity_id)
            .await?
            .ok_or_else(|| ResolveError::NotFound(entity_id.to_string()))?;
        debug!(entity_id, config_entry = %entry, "Resolved integration");
        self.cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(entity_id.to_string(), entry.clone());
        Ok(entry)
    }
}
