use futures_util::future::join_all;
use std::env::VarError;
use std::sync::Arc;
use std::time::Duration;

use super::descriptor::{ModelDescriptor, ProviderDescriptor, DEFAULT_PRIORITY};
use super::{Catalog, Error, Registry};
use crate::config::{self, Config};
use crate::providers::providers::{OpenAIProvider, ProviderKind};
use crate::providers::{ChatProvider, ProviderPool};

fn api_key(provider: &config::Provider) -> Result<Option<String>, Error> {
    if let Some(api_key) = &provider.api_key {
        return Ok(Some(api_key.clone()));
    }

    let var = match &provider.api_key_env {
        Some(var) => var,
        None => return Ok(None),
    };

    match std::env::var(var) {
        Ok(api_key) => Ok(Some(api_key)),
        Err(VarError::NotPresent) => {
            tracing::warn!(
                "{} is not set, provider \"{}\" will be used without an API key",
                var,
                provider.name
            );

            Ok(None)
        }
        Err(VarError::NotUnicode(_)) => Err(Error::ApiKey(provider.name.clone(), var.clone())),
    }
}

fn descriptor(provider: &config::Provider) -> ProviderDescriptor {
    ProviderDescriptor {
        url: provider.url.clone(),
        working: provider.working,
        needs_auth: provider.needs_auth,
        priority: provider.priority.unwrap_or(DEFAULT_PRIORITY),
        models: provider.models.clone(),
        default_model: provider.default_model.clone(),
        supports_gpt_4: provider.supports_gpt_4,
        supports_gpt_35_turbo: provider.supports_gpt_35_turbo,
        ..ProviderDescriptor::new(&provider.name)
    }
}

/// The declarative part of the configuration, before any provider is asked
/// about its models.
pub(crate) fn catalog(config: &Config) -> Catalog {
    Catalog {
        providers: config.providers.iter().map(descriptor).collect(),
        models: config
            .models
            .iter()
            .map(|m| ModelDescriptor {
                name: m.name.clone(),
                base_provider: m.base_provider.clone(),
                best_provider: m.best_provider.clone(),
            })
            .collect(),
        denylist: config.directory.provider_denylist.clone(),
        overrides: config.directory.overrides.clone(),
        preferred_models: config.directory.preferred_models.clone(),
        model_blacklist: config.directory.model_blacklist.clone(),
    }
}

/// Instantiate a backend for every configured provider that has an address.
pub(crate) fn pool(config: &Config) -> Result<ProviderPool, Error> {
    let mut pool = ProviderPool::new();

    for provider in &config.providers {
        let api_base = match provider.api_base.as_deref() {
            Some(api_base) => api_base,
            None if !provider.url.is_empty() => provider.url.as_str(),
            None => {
                tracing::warn!("provider \"{}\" has no address, skipping", provider.name);
                continue;
            }
        };

        let backend: Arc<dyn ChatProvider> = match provider.kind {
            ProviderKind::OpenAI => {
                let backend = OpenAIProvider::new(&provider.name, api_base, api_key(provider)?)
                    .map_err(|e| Error::InvalidProvider(provider.name.clone(), e))?
                    .enumerate_models(provider.enumerate_models);

                Arc::new(backend)
            }
        };

        pool.insert(backend, provider.adapter);
    }

    Ok(pool)
}

/// Ask the eligible providers for the models they serve. Failures leave the
/// provider with its declared models only.
pub(crate) async fn enumerate_models(
    catalog: &mut Catalog,
    pool: &ProviderPool,
    timeout: Duration,
) {
    let eligible = catalog.eligible();

    let listings = eligible.iter().filter_map(|name| {
        let provider = pool.get(name)?.clone();

        Some(async move {
            let listing = match tokio::time::timeout(timeout, provider.models()).await {
                Ok(Ok(models)) => Ok(models),
                Ok(Err(err)) => Err(Error::ModelListingFailed(provider.name().to_string(), err)),
                Err(_) => Err(Error::ModelListingTimedOut(provider.name().to_string())),
            };

            (provider.name().to_string(), listing)
        })
    });

    for (name, listing) in join_all(listings).await {
        let models = match listing {
            Ok(Some(models)) => models,
            Ok(None) => continue,
            Err(err) => {
                tracing::warn!("{}", err);
                continue;
            }
        };

        tracing::debug!("provider \"{}\" lists {} models", name, models.len());

        if let Some(desc) = catalog.providers.iter_mut().find(|p| p.name == name) {
            desc.enumerated_models = Some(models);
        }
    }
}

/// Populate a registry with the configured providers and models
pub(crate) async fn populated_registry(config: &Config) -> Result<Registry, Error> {
    let pool = pool(config)?;
    let mut catalog = catalog(config);

    enumerate_models(&mut catalog, &pool, config.prober.probe_timeout()).await;

    let registry = Registry::new(catalog, pool);

    tracing::info!(
        "registered {} providers ({} with a backend), {} eligible, serving {} models",
        registry.catalog().providers.len(),
        registry.pool().len(),
        registry.baseline().providers().len(),
        registry.baseline().models().len()
    );

    Ok(registry)
}
