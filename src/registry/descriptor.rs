//! Declarative inputs of the directory.
//!
//! Descriptors are populated once at load time from the configuration (and,
//! for providers that can list their own models, from a single enumeration
//! call). Everything downstream reads these plain structs instead of asking
//! providers about their capabilities.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Priority given to providers that do not declare one.
pub(crate) const DEFAULT_PRIORITY: u8 = 10;

/// The model served by providers flagged with `supports_gpt_4`.
pub(crate) const GPT_4: &str = "gpt-4";
/// The model served by providers flagged with `supports_gpt_35_turbo`.
pub(crate) const GPT_35_TURBO: &str = "gpt-3.5-turbo";

/// The provider(s) recommended for a model. A group is an ordered retry-group
/// of providers meant to be tried in sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub(crate) enum Recommendation {
    Single(String),
    Group(Vec<String>),
}

impl Recommendation {
    pub(crate) fn members(&self) -> impl Iterator<Item = &str> {
        let members: &[String] = match self {
            Recommendation::Single(name) => std::slice::from_ref(name),
            Recommendation::Group(names) => names,
        };

        members.iter().map(|s| s.as_str())
    }

    /// The provider a model is originally meant to be served by: the single
    /// recommendation, or the head of the retry-group.
    pub(crate) fn designated(&self) -> Option<&str> {
        self.members().next()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ProviderDescriptor {
    pub name: String,
    /// Informational only.
    pub url: String,
    pub working: bool,
    pub needs_auth: bool,
    /// Higher priority providers are scanned first when looking for a
    /// provider serving a model.
    pub priority: u8,
    /// Models the provider declares itself.
    pub models: Vec<String>,
    pub default_model: Option<String>,
    pub supports_gpt_4: bool,
    pub supports_gpt_35_turbo: bool,
    /// Models reported by the provider's own enumeration, when it has one.
    pub enumerated_models: Option<Vec<String>>,
}

impl ProviderDescriptor {
    pub(crate) fn new(name: &str) -> ProviderDescriptor {
        ProviderDescriptor {
            name: name.to_string(),
            url: String::new(),
            working: true,
            needs_auth: false,
            priority: DEFAULT_PRIORITY,
            models: Vec::new(),
            default_model: None,
            supports_gpt_4: false,
            supports_gpt_35_turbo: false,
            enumerated_models: None,
        }
    }

    /// Models the descriptor claims without help from any model's
    /// recommendation: the declared list, the default model and the legacy
    /// capability flags.
    pub(crate) fn declared_models(&self) -> impl Iterator<Item = &str> {
        let flags: [Option<&str>; 2] = [
            self.supports_gpt_4.then_some(GPT_4),
            self.supports_gpt_35_turbo.then_some(GPT_35_TURBO),
        ];

        self.models
            .iter()
            .map(|s| s.as_str())
            .chain(self.default_model.as_deref())
            .chain(flags.into_iter().flatten())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ModelDescriptor {
    pub name: String,
    /// The organisation or provider the model originates from.
    pub base_provider: Option<String>,
    pub best_provider: Option<Recommendation>,
}

/// Everything the directory is built from.
#[derive(Debug, Clone, Default)]
pub(crate) struct Catalog {
    pub providers: Vec<ProviderDescriptor>,
    pub models: Vec<ModelDescriptor>,
    /// Providers known to be unreliable, never eligible.
    pub denylist: BTreeSet<String>,
    /// Literal model lists replacing what a provider would otherwise serve.
    pub overrides: BTreeMap<String, Vec<String>>,
    /// Models preferred when picking one, best first.
    pub preferred_models: Vec<String>,
    /// Models left out of the preference order.
    pub model_blacklist: BTreeSet<String>,
}

impl Catalog {
    /// Providers that are working, need no credentials and are not denied.
    pub(crate) fn eligible(&self) -> BTreeSet<String> {
        self.providers
            .iter()
            .filter(|p| p.working && !p.needs_auth && !self.denylist.contains(&p.name))
            .map(|p| p.name.clone())
            .collect()
    }

    pub(crate) fn provider(&self, name: &str) -> Option<&ProviderDescriptor> {
        self.providers.iter().find(|p| p.name == name)
    }

    pub(crate) fn model(&self, name: &str) -> Option<&ModelDescriptor> {
        self.models.iter().find(|m| m.name == name)
    }

    /// The provider a model is designated to, if the model declares one.
    pub(crate) fn designated_provider(&self, model: &str) -> Option<&str> {
        self.model(model)?.best_provider.as_ref()?.designated()
    }
}
