//! Capabilities: named units of work the engine can perform.
//!
//! A [`Capability`] is catalog data owned by the engine. Handlers declare the
//! capability ids they fulfil through a [`Capabilities`] set, which is what
//! the registry matches against when building handler chains.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

pub type CapabilityId = String;

pub const GENERATE_ARTICLE: &str = "generate-article";
pub const GENERATE_CONTENT: &str = "generate-content";
pub const REWRITE_CONTENT: &str = "rewrite-content";
pub const SUMMARIZE: &str = "summarize";
pub const TRANSLATE: &str = "translate";
pub const EXTRACT_KEYWORDS: &str = "extract-keywords";
pub const DISCOVER_TRENDS: &str = "discover-trends";
pub const RESEARCH: &str = "research";
pub const SEARCH_IMAGES: &str = "search-images";
pub const GENERATE_IMAGE: &str = "generate-image";
pub const ANALYZE_SEO: &str = "analyze-seo";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Capability {
    pub id: CapabilityId,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// `true` for catalog entries, `false` for capabilities added at runtime.
    #[serde(default)]
    pub is_default: bool,
}

impl Capability {
    /// A custom capability, enabled, not part of the default catalog.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: None,
            enabled: true,
            is_default: false,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    fn builtin(id: &str, name: &str, description: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            description: Some(description.to_string()),
            enabled: true,
            is_default: true,
        }
    }
}

/// The static catalog loaded by `Engine::initialize` when the configuration
/// does not override it.
pub fn default_catalog() -> Vec<Capability> {
    vec![
        Capability::builtin(
            GENERATE_ARTICLE,
            "Generate Article",
            "Long-form article for a topic",
        ),
        Capability::builtin(
            GENERATE_CONTENT,
            "Generate Content",
            "Short-form text from a prompt",
        ),
        Capability::builtin(
            REWRITE_CONTENT,
            "Rewrite Content",
            "Rewrite existing text in a new voice",
        ),
        Capability::builtin(SUMMARIZE, "Summarize", "Condense text"),
        Capability::builtin(TRANSLATE, "Translate", "Translate text"),
        Capability::builtin(
            EXTRACT_KEYWORDS,
            "Extract Keywords",
            "SEO keywords from text",
        ),
        Capability::builtin(
            DISCOVER_TRENDS,
            "Discover Trends",
            "Trending topics for a niche",
        ),
        Capability::builtin(RESEARCH, "Research", "Web-grounded research"),
        Capability::builtin(SEARCH_IMAGES, "Search Images", "Stock image search"),
        Capability::builtin(GENERATE_IMAGE, "Generate Image", "AI image generation"),
        Capability::builtin(ANALYZE_SEO, "Analyze SEO", "SEO review of a page"),
    ]
}

/// Per-capability user preferences supplied by a config provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CapabilitySettings {
    #[serde(default = "default_true")]
    pub is_enabled: bool,
    #[serde(default)]
    pub default_handler_id: Option<String>,
    #[serde(default)]
    pub fallback_handler_ids: Option<Vec<String>>,
}

impl CapabilitySettings {
    pub fn enabled() -> Self {
        Self {
            is_enabled: true,
            default_handler_id: None,
            fallback_handler_ids: None,
        }
    }

    pub fn disabled() -> Self {
        Self {
            is_enabled: false,
            ..Self::enabled()
        }
    }
}

impl Default for CapabilitySettings {
    fn default() -> Self {
        Self::enabled()
    }
}

/// The set of capability ids a handler fulfils.
///
/// Ordered internally so listings are deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capabilities {
    capabilities: BTreeSet<CapabilityId>,
}

impl Capabilities {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, capability: impl Into<String>) {
        self.capabilities.insert(capability.into());
    }

    pub fn supports(&self, capability: &str) -> bool {
        self.capabilities.contains(capability)
    }

    pub fn supports_any(&self, capabilities: &[&str]) -> bool {
        capabilities.iter().any(|c| self.supports(c))
    }

    pub fn list(&self) -> Vec<&str> {
        self.capabilities.iter().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.capabilities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.capabilities.is_empty()
    }

    pub fn or(&self, other: &Capabilities) -> Capabilities {
        let mut merged = self.capabilities.clone();
        merged.extend(other.capabilities.iter().cloned());
        Capabilities {
            capabilities: merged,
        }
    }
}

impl<S: Into<String>> FromIterator<S> for Capabilities {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            capabilities: iter.into_iter().map(Into::into).collect(),
        }
    }
}

impl From<&[&str]> for Capabilities {
    fn from(capabilities: &[&str]) -> Self {
        capabilities.iter().copied().collect()
    }
}

fn default_true() -> bool {
    true
}
