//! The bidirectional provider/model index.
//!
//! A [`Directory`] is a pure function of a [`Catalog`] and the set of provider
//! names allowed into it. The baseline directory admits every eligible
//! provider, the live one only those that answered the last probe.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use super::descriptor::Catalog;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub(crate) struct ProviderEntry {
    pub name: String,
    pub url: String,
    #[serde(skip)]
    pub priority: u8,
    pub supported_models: BTreeSet<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub(crate) struct ModelEntry {
    pub name: String,
    pub supported_provider_names: BTreeSet<String>,
}

/// A (model, provider) pair under consideration for a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CandidatePair {
    pub model: String,
    pub provider: String,
}

impl CandidatePair {
    pub(crate) fn new(model: &str, provider: &str) -> CandidatePair {
        CandidatePair {
            model: model.to_string(),
            provider: provider.to_string(),
        }
    }
}

impl fmt::Display for CandidatePair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.provider, self.model)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct Directory {
    providers: BTreeMap<String, ProviderEntry>,
    models: BTreeMap<String, ModelEntry>,
    /// Provider names, highest priority first.
    order: Vec<String>,
    /// Model names, most preferred first.
    preference: Vec<String>,
}

impl Directory {
    /// Build the directory from `catalog`, admitting only the eligible
    /// providers that are also in `admitted`.
    pub(crate) fn build(catalog: &Catalog, admitted: &BTreeSet<String>) -> Directory {
        let eligible: BTreeSet<String> = catalog
            .eligible()
            .intersection(admitted)
            .cloned()
            .collect();

        let mut providers: BTreeMap<String, ProviderEntry> = eligible
            .iter()
            .filter_map(|name| catalog.provider(name))
            .map(|desc| {
                (
                    desc.name.clone(),
                    ProviderEntry {
                        name: desc.name.clone(),
                        url: desc.url.clone(),
                        priority: desc.priority,
                        supported_models: BTreeSet::new(),
                    },
                )
            })
            .collect();

        // Models recommend their providers
        for model in &catalog.models {
            let best = match &model.best_provider {
                Some(best) => best,
                None => continue,
            };

            let recommended = model.base_provider.as_deref().into_iter().chain(best.members());

            for name in recommended {
                if let Some(entry) = providers.get_mut(name) {
                    entry.supported_models.insert(model.name.clone());
                }
            }
        }

        // Providers declare their own models
        for entry in providers.values_mut() {
            let desc = match catalog.provider(&entry.name) {
                Some(desc) => desc,
                None => continue,
            };

            entry
                .supported_models
                .extend(desc.declared_models().map(str::to_string));

            if let Some(enumerated) = &desc.enumerated_models {
                entry.supported_models.extend(enumerated.iter().cloned());
            }

            if let Some(replacement) = catalog.overrides.get(&entry.name) {
                entry.supported_models = replacement.iter().cloned().collect();
            }
        }

        let mut models: BTreeMap<String, ModelEntry> = BTreeMap::new();

        for entry in providers.values() {
            for model in &entry.supported_models {
                models
                    .entry(model.clone())
                    .or_insert_with(|| ModelEntry {
                        name: model.clone(),
                        supported_provider_names: BTreeSet::new(),
                    })
                    .supported_provider_names
                    .insert(entry.name.clone());
            }
        }

        let mut order: Vec<&ProviderEntry> = providers.values().collect();
        order.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.name.cmp(&b.name)));
        let order = order.into_iter().map(|p| p.name.clone()).collect();

        let preference = Self::preference_order(catalog, &models);

        Directory {
            providers,
            models,
            order,
            preference,
        }
    }

    fn preference_order(catalog: &Catalog, models: &BTreeMap<String, ModelEntry>) -> Vec<String> {
        let mut preference: Vec<String> = Vec::new();

        for model in &catalog.preferred_models {
            if models.contains_key(model)
                && !catalog.model_blacklist.contains(model)
                && !preference.contains(model)
            {
                preference.push(model.clone());
            }
        }

        let rest: Vec<String> = models
            .keys()
            .filter(|m| !catalog.model_blacklist.contains(*m) && !preference.contains(*m))
            .cloned()
            .collect();

        preference.extend(rest);
        preference
    }

    pub(crate) fn providers(&self) -> &BTreeMap<String, ProviderEntry> {
        &self.providers
    }

    pub(crate) fn models(&self) -> &BTreeMap<String, ModelEntry> {
        &self.models
    }

    pub(crate) fn provider(&self, name: &str) -> Option<&ProviderEntry> {
        self.providers.get(name)
    }

    pub(crate) fn model(&self, name: &str) -> Option<&ModelEntry> {
        self.models.get(name)
    }

    pub(crate) fn serves(&self, provider: &str, model: &str) -> bool {
        self.providers
            .get(provider)
            .is_some_and(|p| p.supported_models.contains(model))
    }

    /// Providers in registration order: highest priority first, ties by name.
    pub(crate) fn providers_in_order(&self) -> impl Iterator<Item = &ProviderEntry> {
        self.order.iter().filter_map(|name| self.providers.get(name))
    }

    pub(crate) fn preference(&self) -> &[String] {
        &self.preference
    }

    pub(crate) fn rank(&self, model: &str) -> Option<usize> {
        self.preference.iter().position(|m| m == model)
    }

    /// The most preferred model `provider` serves. Unranked models sort last,
    /// ties are broken by name.
    pub(crate) fn best_model(&self, provider: &str) -> Option<&str> {
        self.providers
            .get(provider)?
            .supported_models
            .iter()
            .min_by_key(|m| (self.rank(m).unwrap_or(usize::MAX), *m))
            .map(|m| m.as_str())
    }

    /// The provider to ask for `model`: its designated provider when that one
    /// is in the directory and serves it, otherwise the first serving
    /// provider in registration order.
    pub(crate) fn provider_for(&self, model: &str, catalog: &Catalog) -> Option<&str> {
        if let Some(designated) = catalog.designated_provider(model) {
            if self.serves(designated, model) {
                return self.providers.get(designated).map(|p| p.name.as_str());
            }
        }

        self.providers_in_order()
            .find(|p| p.supported_models.contains(model))
            .map(|p| p.name.as_str())
    }

    /// One nominated pair per preferred model that some provider serves, in
    /// preference order.
    pub(crate) fn walk(&self, catalog: &Catalog) -> Vec<CandidatePair> {
        self.preference
            .iter()
            .filter_map(|model| {
                self.provider_for(model, catalog)
                    .map(|provider| CandidatePair::new(model, provider))
            })
            .collect()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::registry::descriptor::{ModelDescriptor, ProviderDescriptor, Recommendation};

    pub(crate) fn provider(name: &str, models: &[&str]) -> ProviderDescriptor {
        let mut desc = ProviderDescriptor::new(name);
        desc.models = models.iter().map(|s| s.to_string()).collect();
        desc
    }

    pub(crate) fn model(name: &str, base: Option<&str>, best: &[&str]) -> ModelDescriptor {
        let best_provider = match best {
            [] => None,
            [single] => Some(Recommendation::Single(single.to_string())),
            group => Some(Recommendation::Group(
                group.iter().map(|s| s.to_string()).collect(),
            )),
        };

        ModelDescriptor {
            name: name.to_string(),
            base_provider: base.map(str::to_string),
            best_provider,
        }
    }

    fn everyone(catalog: &Catalog) -> BTreeSet<String> {
        catalog.providers.iter().map(|p| p.name.clone()).collect()
    }

    fn names<'a>(it: impl IntoIterator<Item = &'a String>) -> Vec<&'a str> {
        it.into_iter().map(|s| s.as_str()).collect()
    }

    fn assert_consistent(dir: &Directory) {
        for (name, entry) in dir.providers() {
            for model in &entry.supported_models {
                assert!(dir.model(model).unwrap().supported_provider_names.contains(name));
            }
        }

        for (name, entry) in dir.models() {
            for provider in &entry.supported_provider_names {
                assert!(dir.provider(provider).unwrap().supported_models.contains(name));
            }
        }
    }

    pub(crate) fn sample_catalog() -> Catalog {
        let mut bing = provider("Bing", &[]);
        bing.supports_gpt_4 = true;
        bing.priority = 20;

        let mut you = provider("You", &["llama-3"]);
        you.default_model = Some("gpt-3.5-turbo".to_string());

        let mut locked = provider("Locked", &["gpt-4"]);
        locked.needs_auth = true;

        Catalog {
            providers: vec![bing, you, locked, provider("Liaobots", &["claude-3"])],
            models: vec![
                model("gpt-4", Some("OpenAI"), &["Bing", "Locked"]),
                model("gpt-3.5-turbo", Some("OpenAI"), &["You"]),
                model("claude-3", Some("Anthropic"), &["Liaobots"]),
                model("mixtral", None, &[]),
            ],
            preferred_models: vec!["gpt-4".to_string(), "gpt-3.5-turbo".to_string()],
            ..Default::default()
        }
    }

    #[test]
    fn test_build_merges_sources() {
        let catalog = sample_catalog();
        let dir = Directory::build(&catalog, &everyone(&catalog));

        assert_eq!(
            names(dir.providers().keys()),
            vec!["Bing", "Liaobots", "You"]
        );
        assert_eq!(names(&dir.provider("Bing").unwrap().supported_models), vec!["gpt-4"]);
        assert_eq!(
            names(&dir.provider("You").unwrap().supported_models),
            vec!["gpt-3.5-turbo", "llama-3"]
        );

        // Locked needs credentials and is never referenced
        assert_eq!(
            names(&dir.model("gpt-4").unwrap().supported_provider_names),
            vec!["Bing"]
        );
        assert!(dir.model("mixtral").is_none());

        assert_consistent(&dir);
    }

    #[test]
    fn test_build_is_deterministic() {
        let catalog = sample_catalog();
        let dir = Directory::build(&catalog, &everyone(&catalog));

        let mut shuffled = catalog.clone();
        shuffled.providers.reverse();
        shuffled.models.rotate_left(2);

        assert_eq!(Directory::build(&shuffled, &everyone(&shuffled)), dir);
        assert_eq!(Directory::build(&catalog, &everyone(&catalog)), dir);
    }

    #[test]
    fn test_overrides_replace() {
        let mut catalog = sample_catalog();
        catalog
            .overrides
            .insert("You".to_string(), vec!["mistral-7b".to_string()]);

        let dir = Directory::build(&catalog, &everyone(&catalog));

        assert_eq!(
            names(&dir.provider("You").unwrap().supported_models),
            vec!["mistral-7b"]
        );
        assert!(dir.model("gpt-3.5-turbo").is_none());
        assert!(dir.model("llama-3").is_none());
        assert_consistent(&dir);
    }

    #[test]
    fn test_enumerated_models_and_empty_providers() {
        let mut catalog = sample_catalog();
        catalog.providers.push(provider("Empty", &[]));
        catalog.providers[3].enumerated_models = Some(vec!["claude-3-haiku".to_string()]);

        let dir = Directory::build(&catalog, &everyone(&catalog));

        assert!(dir.provider("Empty").unwrap().supported_models.is_empty());
        assert_eq!(dir.best_model("Empty"), None);
        assert_eq!(
            names(&dir.provider("Liaobots").unwrap().supported_models),
            vec!["claude-3", "claude-3-haiku"]
        );
        assert_consistent(&dir);
    }

    #[test]
    fn test_admitted_subset() {
        let catalog = sample_catalog();
        let live = BTreeSet::from(["You".to_string(), "Locked".to_string()]);

        let dir = Directory::build(&catalog, &live);

        assert_eq!(names(dir.providers().keys()), vec!["You"]);
        assert!(dir.model("gpt-4").is_none());
        assert_consistent(&dir);
    }

    #[test]
    fn test_preference_and_best_model() {
        let mut catalog = sample_catalog();
        catalog.model_blacklist.insert("llama-3".to_string());

        let dir = Directory::build(&catalog, &everyone(&catalog));

        assert_eq!(dir.preference(), ["gpt-4", "gpt-3.5-turbo", "claude-3"]);
        assert_eq!(dir.rank("llama-3"), None);
        assert_eq!(dir.best_model("You"), Some("gpt-3.5-turbo"));
        assert_eq!(dir.best_model("Liaobots"), Some("claude-3"));
        assert_eq!(dir.best_model("Nope"), None);
    }

    #[test]
    fn test_registration_order() {
        let catalog = sample_catalog();
        let dir = Directory::build(&catalog, &everyone(&catalog));

        let order: Vec<&str> = dir.providers_in_order().map(|p| p.name.as_str()).collect();
        assert_eq!(order, vec!["Bing", "Liaobots", "You"]);
    }

    #[test]
    fn test_walk_prefers_designated_provider() {
        let mut catalog = sample_catalog();
        let mut backup = provider("Backup", &["gpt-4"]);
        backup.priority = 50;
        catalog.providers.push(backup);

        let dir = Directory::build(&catalog, &everyone(&catalog));

        assert_eq!(
            dir.walk(&catalog),
            vec![
                CandidatePair::new("gpt-4", "Bing"),
                CandidatePair::new("gpt-3.5-turbo", "You"),
                CandidatePair::new("claude-3", "Liaobots"),
                CandidatePair::new("llama-3", "You"),
            ]
        );

        // Once Bing is gone, the highest priority server takes over
        let live = BTreeSet::from(["Backup".to_string(), "You".to_string()]);
        let dir = Directory::build(&catalog, &live);

        assert_eq!(dir.provider_for("gpt-4", &catalog), Some("Backup"));
        assert_eq!(dir.walk(&catalog)[0], CandidatePair::new("gpt-4", "Backup"));
    }
}
