//! Liveness probing.
//!
//! A refresh sends every eligible provider one minimal completion and rebuilds
//! the live directory from the providers that answered. Probes run with a
//! bounded concurrency, each under its own timeout, and the refresh as a whole
//! gives up waiting after a deadline. Failures are recorded, never propagated.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;

use crate::chat::Message;
use crate::config;
use crate::providers::ChatProvider;
use crate::registry::{Directory, Registry};

const PROBE_PROMPT: &str = "hi";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, strum_macros::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub(crate) enum ProbeStatus {
    Live,
    /// The probe failed, with the reason
    Failed(String),
    TimedOut,
    /// No answer before the refresh deadline
    Unfinished,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct ProbeResult {
    pub provider: String,
    pub model: String,
    pub status: ProbeStatus,
}

pub(crate) struct Refresh {
    /// One result per probed provider, by name
    pub results: Vec<ProbeResult>,
    pub live: Arc<Directory>,
}

pub(crate) struct Prober {
    registry: Arc<Registry>,
    settings: config::Prober,
    running: Mutex<()>,
}

async fn probe(
    provider: Option<Arc<dyn ChatProvider>>,
    model: &str,
    timeout: Duration,
) -> ProbeStatus {
    let provider = match provider {
        Some(provider) => provider,
        None => return ProbeStatus::Failed("no backend".to_string()),
    };

    let messages = [Message::user(PROBE_PROMPT)];
    let completion = provider.completion(model, &messages);

    match tokio::time::timeout(timeout, completion).await {
        Ok(Ok(text)) if !text.trim().is_empty() => ProbeStatus::Live,
        Ok(Ok(_)) => ProbeStatus::Failed("empty response".to_string()),
        Ok(Err(err)) => ProbeStatus::Failed(err.to_string()),
        Err(_) => ProbeStatus::TimedOut,
    }
}

impl Prober {
    pub(crate) fn new(registry: Arc<Registry>, settings: config::Prober) -> Prober {
        Prober {
            registry,
            settings,
            running: Mutex::new(()),
        }
    }

    /// The model a provider is probed with: its first declared model, its
    /// default model, the first model it is known to serve, or the fallback.
    pub(crate) fn probe_model(&self, provider: &str) -> String {
        let desc = self.registry.catalog().provider(provider);

        let declared = desc.and_then(|d| d.models.first().or(d.default_model.as_ref()));

        let known = || {
            self.registry
                .baseline()
                .provider(provider)
                .and_then(|p| p.supported_models.iter().next())
        };

        declared
            .or_else(known)
            .unwrap_or(&self.settings.fallback_model)
            .clone()
    }

    /// Probe every provider of the baseline directory and swap in the live
    /// directory built from those that answered. Returns `None` without
    /// waiting when another refresh is in flight.
    pub(crate) async fn refresh(&self) -> Option<Refresh> {
        let _guard = match self.running.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                tracing::debug!("a liveness refresh is already running, skipping");
                return None;
            }
        };

        let names: Vec<String> = self.registry.baseline().providers().keys().cloned().collect();

        tracing::info!("probing {} providers", names.len());

        let semaphore = Arc::new(Semaphore::new(self.settings.concurrency.max(1)));
        let (tx, mut rx) = mpsc::channel(names.len().max(1));
        let mut tasks = JoinSet::new();
        let mut models = BTreeMap::new();

        for name in &names {
            let model = self.probe_model(name);
            let provider = self.registry.pool().get(name).cloned();
            let semaphore = semaphore.clone();
            let tx = tx.clone();
            let timeout = self.settings.probe_timeout();
            let name = name.clone();

            models.insert(name.clone(), model.clone());

            tasks.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return;
                };

                let status = probe(provider, &model, timeout).await;

                if let ProbeStatus::Failed(reason) = &status {
                    tracing::debug!("probe of \"{}\" with {} failed: {}", name, model, reason);
                }

                let _ = tx.send((name, status)).await;
            });
        }

        drop(tx);

        let deadline = tokio::time::sleep(self.settings.deadline());
        tokio::pin!(deadline);

        let mut statuses = BTreeMap::new();

        loop {
            tokio::select! {
                received = rx.recv() => match received {
                    Some((name, status)) => {
                        statuses.insert(name, status);
                    }
                    None => break,
                },
                _ = &mut deadline => {
                    tracing::warn!(
                        "liveness refresh deadline reached with {} probes outstanding",
                        names.len() - statuses.len()
                    );
                    break;
                }
            }
        }

        tasks.abort_all();

        let results: Vec<ProbeResult> = names
            .into_iter()
            .map(|name| ProbeResult {
                model: models.remove(&name).unwrap_or_default(),
                status: statuses.remove(&name).unwrap_or(ProbeStatus::Unfinished),
                provider: name,
            })
            .collect();

        let live: BTreeSet<String> = results
            .iter()
            .filter(|r| r.status == ProbeStatus::Live)
            .map(|r| r.provider.clone())
            .collect();

        let live = self.registry.replace_live(&live);

        if live.providers().is_empty() {
            tracing::warn!("no provider answered the liveness probe");
        }

        tracing::info!(
            "liveness refresh finished, {} of {} providers live",
            live.providers().len(),
            results.len()
        );

        Some(Refresh { results, live })
    }

    /// Refresh on every tick of the configured interval, starting now. A tick
    /// landing while a refresh is still running is skipped.
    pub(crate) fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let period = self.settings.interval().max(Duration::from_secs(1));
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                interval.tick().await;

                let prober = self.clone();
                tokio::spawn(async move {
                    prober.refresh().await;
                });
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::mock::{CallLog, MockProvider, Outcome};
    use crate::providers::{Adapter, ProviderPool};
    use crate::registry::descriptor::ProviderDescriptor;
    use crate::registry::directory::tests::provider;
    use crate::registry::Catalog;

    fn registry(entries: Vec<(ProviderDescriptor, MockProvider)>) -> Arc<Registry> {
        let mut pool = ProviderPool::new();
        let mut catalog = Catalog::default();

        for (desc, mock) in entries {
            catalog.providers.push(desc);
            pool.insert(Arc::new(mock), Adapter::Identity);
        }

        Arc::new(Registry::new(catalog, pool))
    }

    fn settings() -> config::Prober {
        config::Prober::default()
    }

    fn status_of<'r>(refresh: &'r Refresh, name: &str) -> &'r ProbeStatus {
        &refresh
            .results
            .iter()
            .find(|r| r.provider == name)
            .unwrap()
            .status
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_narrows_live_directory() {
        let log = CallLog::default();
        let registry = registry(vec![
            (provider("Up", &["m1"]), MockProvider::new("Up", &log)),
            (
                provider("Down", &["m1", "m2"]),
                MockProvider::new("Down", &log).otherwise(Outcome::fail()),
            ),
            (
                provider("Mute", &["m3"]),
                MockProvider::new("Mute", &log).otherwise(Outcome::reply("  ")),
            ),
            (
                provider("Slow", &["m4"]),
                MockProvider::new("Slow", &log).otherwise(Outcome::Hang),
            ),
        ]);

        let prober = Prober::new(registry.clone(), settings());
        let refresh = prober.refresh().await.unwrap();

        assert_eq!(*status_of(&refresh, "Up"), ProbeStatus::Live);
        assert!(matches!(status_of(&refresh, "Down"), ProbeStatus::Failed(_)));
        assert!(matches!(status_of(&refresh, "Mute"), ProbeStatus::Failed(_)));
        assert_eq!(*status_of(&refresh, "Slow"), ProbeStatus::TimedOut);

        let live = registry.live();
        assert_eq!(live.providers().keys().collect::<Vec<_>>(), vec!["Up"]);
        assert_eq!(
            live.model("m1").unwrap().supported_provider_names,
            BTreeSet::from(["Up".to_string()])
        );
        assert!(live.model("m2").is_none());

        // Every provider was probed exactly once
        assert_eq!(log.len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_flight() {
        let log = CallLog::default();
        let registry = registry(vec![(
            provider("Slow", &["m1"]),
            MockProvider::new("Slow", &log).otherwise(Outcome::Hang),
        )]);

        let prober = Prober::new(registry, settings());
        let (first, second) = tokio::join!(prober.refresh(), prober.refresh());

        assert!(first.is_some());
        assert!(second.is_none());
        assert_eq!(log.len(), 1);

        // The lock is released once the refresh is over
        assert!(prober.refresh().await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline() {
        let log = CallLog::default();
        let registry = registry(vec![
            (
                provider("A", &["m1"]),
                MockProvider::new("A", &log).otherwise(Outcome::Hang),
            ),
            (
                provider("B", &["m1"]),
                MockProvider::new("B", &log).otherwise(Outcome::Hang),
            ),
        ]);

        let settings = config::Prober {
            probe_timeout_secs: 60,
            deadline_secs: 10,
            concurrency: 1,
            ..settings()
        };

        let prober = Prober::new(registry.clone(), settings);
        let refresh = prober.refresh().await.unwrap();

        assert_eq!(*status_of(&refresh, "A"), ProbeStatus::Unfinished);
        assert_eq!(*status_of(&refresh, "B"), ProbeStatus::Unfinished);
        assert!(registry.live().providers().is_empty());

        // Concurrency 1: the second probe never started
        assert_eq!(log.len(), 1);
    }

    #[tokio::test]
    async fn test_probe_model_selection() {
        let log = CallLog::default();

        let declared = provider("Declared", &["first", "second"]);

        let mut defaulted = provider("Defaulted", &[]);
        defaulted.default_model = Some("default".to_string());

        let mut flagged = provider("Flagged", &[]);
        flagged.supports_gpt_35_turbo = true;

        let registry = registry(vec![
            (declared, MockProvider::new("Declared", &log)),
            (defaulted, MockProvider::new("Defaulted", &log)),
            (flagged, MockProvider::new("Flagged", &log)),
            (provider("Bare", &[]), MockProvider::new("Bare", &log)),
        ]);

        let settings = config::Prober {
            fallback_model: "fallback".to_string(),
            ..settings()
        };
        let prober = Prober::new(registry, settings);

        assert_eq!(prober.probe_model("Declared"), "first");
        assert_eq!(prober.probe_model("Defaulted"), "default");
        assert_eq!(prober.probe_model("Flagged"), "gpt-3.5-turbo");
        assert_eq!(prober.probe_model("Bare"), "fallback");

        prober.refresh().await.unwrap();

        let mut calls = log.calls();
        calls.sort();
        assert_eq!(
            calls,
            vec![
                ("Bare".to_string(), "fallback".to_string()),
                ("Declared".to_string(), "first".to_string()),
                ("Defaulted".to_string(), "default".to_string()),
                ("Flagged".to_string(), "gpt-3.5-turbo".to_string()),
            ]
        );
    }
}
