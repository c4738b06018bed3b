//! Entity selection by domain and id pattern

use regex::Regex;
use tracing::warn;

use crate::config::MonitorConfig;
use crate::types::entity_domain;

/// Entity id pattern where `*` matches any run of characters.
///
/// Compiled once into an anchored regex; every other character is literal.
#[derive(Debug, Clone)]
pub struct EntityPattern {
    source: String,
    regex: Regex,
}

impl EntityPattern {
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        let body = pattern
            .split('*')
            .map(regex::escape)
            .collect::<Vec<_>>()
            .join(".*");
        Ok(Self {
            source: pattern.to_string(),
            regex: Regex::new(&format!("^{body}$"))?,
        })
    }

    /// Compile every pattern, dropping the ones that cannot be compiled.
    pub fn compile_all<'a>(patterns: impl IntoIterator<Item = &'a str>) -> Vec<Self> {
        patterns
            .into_iter()
            .filter_map(|p| match Self::new(p) {
                Ok(pattern) => Some(pattern),
                Err(e) => {
                    warn!(pattern = p, error = %e, "Ignoring entity pattern");
                    None
                }
            })
            .collect()
    }

    pub fn matches(&self, entity_id: &str) -> bool {
        self.regex.is_match(entity_id)
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}

/// Decides which entities are monitored.
#[derive(Debug, Clone, Default)]
pub struct EntityFilter {
    include_domains: Vec<String>,
    exclude_domains: Vec<String>,
    exclude_entities: Vec<EntityPattern>,
}

impl EntityFilter {
    pub fn new(config: &MonitorConfig) -> Self {
        Self {
            include_domains: config.include_domains.clone(),
            exclude_domains: config.exclude_domains.clone(),
            exclude_entities: EntityPattern::compile_all(config.exclude_entities.iter().map(String::as_str)),
        }
    }

    /// Filter that admits every entity.
    pub fn allow_all() -> Self {
        Self::default()
    }

    pub fn is_monitored(&self, entity_id: &str) -> bool {
        let domain = entity_domain(entity_id);
        if !self.include_domains.is_empty() && !self.include_domains.iter().any(|d| d == domain) {
            return false;
        }
        if self.exclude_domains.iter().any(|d| d == domain) {
            return false;
        }
        !self
            .exclude_entities
            .iter()
            .any(|p| p.matches(entity_id))
    }
}
