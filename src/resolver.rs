//! Fallback completion resolution.
//!
//! Callers may pin a model, a provider, both or neither. Any pinned
//! constraint turns the request into exactly one attempt whose failure is
//! reported as is. Without constraints the resolver walks the preferred
//! models of the live directory, one candidate pair per model, and retries
//! down the walk until an attempt succeeds or the attempt ceiling is reached.

mod softblock;

pub(crate) use softblock::SoftBlockDetector;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::chat::Message;
use crate::config;
use crate::providers::{self, ErrorKind};
use crate::registry::{CandidatePair, Registry};

fn exhausted_message(attempts: &usize, last: &Option<CandidatePair>) -> String {
    match last {
        Some(pair) if *attempts > 0 => format!(
            "failed to get a response after {} attempts, last tried model {} with provider {}",
            attempts, pair.model, pair.provider
        ),
        Some(pair) => format!(
            "provider {} cannot serve model {} at the moment",
            pair.provider, pair.model
        ),
        None => "failed to find a live model and provider to use".to_string(),
    }
}

#[derive(Error, Debug)]
pub(crate) enum Error {
    #[error("model {model} not in available models")]
    UnknownModel { model: String, allowed: Vec<String> },
    #[error("provider {provider} not in available providers")]
    UnknownProvider {
        provider: String,
        allowed: Vec<String>,
    },
    #[error("model {model} not supported by provider {provider}")]
    Incompatible {
        model: String,
        provider: String,
        allowed: Vec<String>,
    },
    #[error("no models supported by provider {0}, please specify a model")]
    NoModels(String),
    /// The single attempt of a pinned request failed
    #[error("{pair} failed: {source}")]
    Downstream {
        pair: CandidatePair,
        #[source]
        source: providers::Error,
    },
    #[error("{}", exhausted_message(.attempts, .last))]
    Exhausted {
        attempts: usize,
        last: Option<CandidatePair>,
    },
}

/// What the caller asked for. Empty names count as absent.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub(crate) struct Constraints {
    pub model: Option<String>,
    pub provider: Option<String>,
}

impl Constraints {
    pub(crate) fn new(model: Option<String>, provider: Option<String>) -> Constraints {
        Constraints {
            model: model.filter(|m| !m.is_empty()),
            provider: provider.filter(|p| !p.is_empty()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Completion {
    pub text: String,
    pub model: String,
    pub provider: String,
}

enum Plan {
    Pinned(CandidatePair),
    Walk(Vec<CandidatePair>),
}

pub(crate) struct Resolver {
    registry: Arc<Registry>,
    attempts: usize,
    attempt_timeout: Duration,
    softblock: SoftBlockDetector,
}

impl Resolver {
    pub(crate) fn new(registry: Arc<Registry>, settings: &config::Resolver) -> Resolver {
        Resolver {
            registry,
            attempts: settings.attempts.max(1),
            attempt_timeout: settings.attempt_timeout(),
            softblock: SoftBlockDetector::new(settings.public_ip),
        }
    }

    pub(crate) fn registry(&self) -> &Registry {
        &self.registry
    }

    // Names are checked against the baseline so a model nobody can serve
    // right now is not reported as unknown. Pinned providers must be live.
    fn plan(&self, constraints: &Constraints) -> Result<Plan, Error> {
        let baseline = self.registry.baseline();
        let live = self.registry.live();
        let catalog = self.registry.catalog();

        if let Some(model) = &constraints.model {
            if baseline.model(model).is_none() {
                return Err(Error::UnknownModel {
                    model: model.clone(),
                    allowed: baseline.models().keys().cloned().collect(),
                });
            }
        }

        if let Some(provider) = &constraints.provider {
            if baseline.provider(provider).is_none() {
                return Err(Error::UnknownProvider {
                    provider: provider.clone(),
                    allowed: baseline.providers().keys().cloned().collect(),
                });
            }
        }

        let unavailable = |last| Error::Exhausted { attempts: 0, last };

        // A provider that is down is reported like an unknown one, against the
        // providers that are up.
        let not_live = |provider: &String| Error::UnknownProvider {
            provider: provider.clone(),
            allowed: live.providers().keys().cloned().collect(),
        };

        match (&constraints.model, &constraints.provider) {
            (Some(model), Some(provider)) => {
                let pair = CandidatePair::new(model, provider);

                if !baseline.serves(provider, model) {
                    return Err(Error::Incompatible {
                        model: model.clone(),
                        provider: provider.clone(),
                        allowed: baseline
                            .provider(provider)
                            .map(|p| p.supported_models.iter().cloned().collect())
                            .unwrap_or_default(),
                    });
                }

                if live.provider(provider).is_none() {
                    return Err(not_live(provider));
                }

                if !live.serves(provider, model) {
                    return Err(unavailable(Some(pair)));
                }

                Ok(Plan::Pinned(pair))
            }
            (None, Some(provider)) => {
                if live.provider(provider).is_none() {
                    return Err(not_live(provider));
                }

                match live.best_model(provider) {
                    Some(model) => Ok(Plan::Pinned(CandidatePair::new(model, provider))),
                    None => Err(Error::NoModels(provider.clone())),
                }
            }
            (Some(model), None) => match live.provider_for(model, catalog) {
                Some(provider) => Ok(Plan::Pinned(CandidatePair::new(model, provider))),
                None => Err(unavailable(None)),
            },
            (None, None) => {
                let walk = live.walk(catalog);

                if walk.is_empty() {
                    return Err(unavailable(None));
                }

                Ok(Plan::Walk(walk))
            }
        }
    }

    async fn resolve<F, Fut>(
        &self,
        constraints: &Constraints,
        screen_blocks: bool,
        mut attempt: F,
    ) -> Result<Completion, Error>
    where
        F: FnMut(CandidatePair) -> Fut,
        Fut: Future<Output = Result<String, providers::Error>>,
    {
        let walk = match self.plan(constraints)? {
            Plan::Pinned(pair) => {
                return match attempt(pair.clone()).await {
                    Ok(text) => Ok(Completion {
                        text,
                        model: pair.model,
                        provider: pair.provider,
                    }),
                    Err(source) => Err(Error::Downstream { pair, source }),
                };
            }
            Plan::Walk(walk) => walk,
        };

        let mut retained: Option<Completion> = None;
        let mut last = None;

        for i in 0..self.attempts {
            let pair = walk[i % walk.len()].clone();

            match attempt(pair.clone()).await {
                Ok(text) if screen_blocks && self.softblock.is_blocked(&text) => {
                    tracing::warn!(
                        "attempt {}/{} with {} looks blocked",
                        i + 1,
                        self.attempts,
                        pair
                    );

                    if retained.is_none() {
                        retained = Some(Completion {
                            text,
                            model: pair.model.clone(),
                            provider: pair.provider.clone(),
                        });
                    }
                }
                Ok(text) => {
                    return Ok(Completion {
                        text,
                        model: pair.model,
                        provider: pair.provider,
                    })
                }
                Err(err) => {
                    tracing::warn!(
                        "attempt {}/{} with {} failed: {}",
                        i + 1,
                        self.attempts,
                        pair,
                        err
                    );
                }
            }

            last = Some(pair);
        }

        if let Some(completion) = retained {
            tracing::warn!("every attempt failed, returning a blocked response");
            return Ok(completion);
        }

        Err(Error::Exhausted {
            attempts: self.attempts,
            last,
        })
    }

    async fn attempt(
        &self,
        pair: CandidatePair,
        messages: &[Message],
    ) -> Result<String, providers::Error> {
        let completion = self
            .registry
            .pool()
            .completion(&pair.provider, &pair.model, messages);

        match tokio::time::timeout(self.attempt_timeout, completion).await {
            Ok(Ok(text)) if text.trim().is_empty() => {
                Err(providers::Error::from_kind(ErrorKind::EmptyResponse))
            }
            Ok(result) => result,
            Err(_) => Err(providers::Error::from_kind(ErrorKind::TimedOut)),
        }
    }

    async fn stream_attempt<F: Fn(&str) + Send + Sync>(
        &self,
        pair: CandidatePair,
        messages: &[Message],
        on_fragment: &F,
    ) -> Result<String, providers::Error> {
        let run = async {
            let mut stream = self
                .registry
                .pool()
                .stream_completion(&pair.provider, &pair.model, messages)
                .await?;

            let mut text = String::new();

            while let Some(delta) = stream.next().await {
                let delta = delta?;

                if delta.content.is_empty() {
                    continue;
                }

                on_fragment(&delta.content);
                text.push_str(&delta.content);
            }

            if text.trim().is_empty() {
                return Err(providers::Error::from_kind(ErrorKind::EmptyResponse));
            }

            Ok(text)
        };

        match tokio::time::timeout(self.attempt_timeout, run).await {
            Ok(result) => result,
            Err(_) => Err(providers::Error::from_kind(ErrorKind::TimedOut)),
        }
    }

    /// Complete `messages` under `constraints`, buffering the whole reply.
    pub(crate) async fn complete(
        &self,
        messages: &[Message],
        constraints: &Constraints,
    ) -> Result<Completion, Error> {
        self.resolve(constraints, true, |pair| self.attempt(pair, messages))
            .await
    }

    /// Complete `messages` under `constraints`, handing every fragment to
    /// `on_fragment` as it arrives. A stream failing midway is started over
    /// with the next candidate, fragments already handed out stay handed out.
    pub(crate) async fn stream<F: Fn(&str) + Send + Sync>(
        &self,
        messages: &[Message],
        constraints: &Constraints,
        on_fragment: F,
    ) -> Result<Completion, Error> {
        let on_fragment = &on_fragment;

        self.resolve(constraints, false, |pair| {
            self.stream_attempt(pair, messages, on_fragment)
        })
        .await
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::providers::mock::{CallLog, MockProvider, Outcome};
    use crate::providers::{Adapter, ProviderPool};
    use crate::registry::descriptor::ProviderDescriptor;
    use crate::registry::directory::tests::{model, provider};
    use crate::registry::Catalog;
    use std::collections::BTreeSet;
    use std::sync::Mutex;

    pub(crate) fn resolver_with(
        entries: Vec<(ProviderDescriptor, MockProvider)>,
        mut catalog: Catalog,
        attempts: usize,
    ) -> Resolver {
        let mut pool = ProviderPool::new();

        for (desc, mock) in entries {
            catalog.providers.push(desc);
            pool.insert(Arc::new(mock), Adapter::Identity);
        }

        let settings = config::Resolver {
            attempts,
            ..Default::default()
        };

        Resolver::new(Arc::new(Registry::new(catalog, pool)), &settings)
    }

    /// Providers A, B and C, serving m1, m2 and m3 in that order of preference.
    pub(crate) fn chain(log: &CallLog, outcomes: [Outcome; 3], attempts: usize) -> Resolver {
        let [a, b, c] = outcomes;

        let catalog = Catalog {
            preferred_models: vec!["m1".to_string(), "m2".to_string(), "m3".to_string()],
            ..Default::default()
        };

        resolver_with(
            vec![
                (provider("A", &["m1"]), MockProvider::new("A", log).otherwise(a)),
                (provider("B", &["m2"]), MockProvider::new("B", log).otherwise(b)),
                (provider("C", &["m3"]), MockProvider::new("C", log).otherwise(c)),
            ],
            catalog,
            attempts,
        )
    }

    fn hi() -> Vec<Message> {
        vec![Message::user("hi")]
    }

    fn pinned(model: Option<&str>, provider: Option<&str>) -> Constraints {
        Constraints::new(model.map(str::to_string), provider.map(str::to_string))
    }

    fn calls(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(p, m)| (p.to_string(), m.to_string()))
            .collect()
    }

    #[test]
    fn test_empty_constraints_are_absent() {
        assert_eq!(
            Constraints::new(Some(String::new()), Some(String::new())),
            Constraints::default()
        );
    }

    #[tokio::test]
    async fn test_unconstrained_takes_first_candidate() {
        let log = CallLog::default();
        let resolver = chain(
            &log,
            [
                Outcome::reply("response"),
                Outcome::fail(),
                Outcome::fail(),
            ],
            10,
        );

        let completion = resolver.complete(&hi(), &Constraints::default()).await.unwrap();

        assert_eq!(completion.text, "response");
        assert_eq!((completion.model.as_str(), completion.provider.as_str()), ("m1", "A"));
        assert!(resolver.registry().live().provider("A").is_some());
        assert_eq!(log.len(), 1);
    }

    #[tokio::test]
    async fn test_failures_advance_the_walk() {
        let log = CallLog::default();
        let resolver = chain(&log, [Outcome::fail(), Outcome::fail(), Outcome::reply("ok")], 10);

        let completion = resolver.complete(&hi(), &Constraints::default()).await.unwrap();

        assert_eq!((completion.model.as_str(), completion.provider.as_str()), ("m3", "C"));
        assert_eq!(log.calls(), calls(&[("A", "m1"), ("B", "m2"), ("C", "m3")]));
    }

    #[tokio::test]
    async fn test_ceiling_is_exact() {
        let log = CallLog::default();
        let resolver = chain(&log, [Outcome::fail(), Outcome::fail(), Outcome::fail()], 5);

        let err = resolver
            .complete(&hi(), &Constraints::default())
            .await
            .unwrap_err();

        match err {
            Error::Exhausted { attempts, last } => {
                assert_eq!(attempts, 5);
                assert_eq!(last, Some(CandidatePair::new("m2", "B")));
            }
            err => panic!("unexpected error: {}", err),
        }

        // The walk wraps around
        assert_eq!(
            log.calls(),
            calls(&[("A", "m1"), ("B", "m2"), ("C", "m3"), ("A", "m1"), ("B", "m2")])
        );
    }

    #[tokio::test]
    async fn test_empty_reply_is_a_failure() {
        let log = CallLog::default();
        let resolver = chain(&log, [Outcome::reply(""), Outcome::reply("ok"), Outcome::fail()], 10);

        let completion = resolver.complete(&hi(), &Constraints::default()).await.unwrap();

        assert_eq!(completion.provider, "B");
        assert_eq!(log.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_attempt_times_out() {
        let log = CallLog::default();
        let resolver = chain(&log, [Outcome::Hang, Outcome::reply("ok"), Outcome::fail()], 10);

        let completion = resolver.complete(&hi(), &Constraints::default()).await.unwrap();

        assert_eq!(completion.provider, "B");
    }

    #[tokio::test]
    async fn test_blocked_reply_is_a_last_resort() {
        let log = CallLog::default();
        let resolver = chain(
            &log,
            [Outcome::reply("203.0.113.7"), Outcome::reply("198.51.100.2"), Outcome::fail()],
            4,
        );

        let completion = resolver.complete(&hi(), &Constraints::default()).await.unwrap();

        // The first blocked reply is kept, after every attempt was spent
        assert_eq!(completion.text, "203.0.113.7");
        assert_eq!(completion.provider, "A");
        assert_eq!(log.len(), 4);

        let log = CallLog::default();
        let resolver = chain(
            &log,
            [
                Outcome::reply("203.0.113.7"),
                Outcome::reply("ok"),
                Outcome::fail(),
            ],
            4,
        );

        let completion = resolver.complete(&hi(), &Constraints::default()).await.unwrap();
        assert_eq!(completion.text, "ok");
        assert_eq!(log.len(), 2);
    }

    #[tokio::test]
    async fn test_every_pinned_pair_makes_one_attempt() {
        let log = CallLog::default();
        let resolver = chain(
            &log,
            [
                Outcome::reply("a"),
                Outcome::reply("b"),
                Outcome::reply("c"),
            ],
            10,
        );

        let pairs: Vec<(String, String)> = resolver
            .registry()
            .baseline()
            .providers()
            .values()
            .flat_map(|p| {
                p.supported_models
                    .iter()
                    .map(|m| (m.clone(), p.name.clone()))
            })
            .collect();

        for (i, (model, provider)) in pairs.iter().enumerate() {
            let completion = resolver
                .complete(&hi(), &pinned(Some(model), Some(provider)))
                .await
                .unwrap();

            assert_eq!(&completion.provider, provider);
            assert_eq!(log.len(), i + 1);
        }
    }

    #[tokio::test]
    async fn test_pinned_failure_is_not_retried() {
        let log = CallLog::default();
        let resolver = chain(
            &log,
            [
                Outcome::Fail(ErrorKind::ExcessUsage),
                Outcome::reply("ok"),
                Outcome::reply("ok"),
            ],
            10,
        );

        for constraints in [
            pinned(Some("m1"), Some("A")),
            pinned(Some("m1"), None),
            pinned(None, Some("A")),
        ] {
            match resolver.complete(&hi(), &constraints).await.unwrap_err() {
                Error::Downstream { pair, source } => {
                    assert_eq!(pair, CandidatePair::new("m1", "A"));
                    assert_eq!(source.kind(), ErrorKind::ExcessUsage);
                }
                err => panic!("unexpected error: {}", err),
            }
        }

        assert_eq!(log.len(), 3);
    }

    #[tokio::test]
    async fn test_invalid_constraints() {
        let log = CallLog::default();
        let resolver = chain(
            &log,
            [
                Outcome::reply("a"),
                Outcome::reply("b"),
                Outcome::reply("c"),
            ],
            10,
        );

        let err = resolver.complete(&hi(), &pinned(Some("m1"), Some("B"))).await.unwrap_err();
        match err {
            Error::Incompatible { allowed, .. } => assert_eq!(allowed, vec!["m2"]),
            err => panic!("unexpected error: {}", err),
        }

        let err = resolver.complete(&hi(), &pinned(Some("gpt-5"), None)).await.unwrap_err();
        assert!(matches!(err, Error::UnknownModel { .. }));

        let err = resolver.complete(&hi(), &pinned(None, Some("Z"))).await.unwrap_err();
        assert!(matches!(err, Error::UnknownProvider { .. }));

        assert_eq!(log.len(), 0);
    }

    #[tokio::test]
    async fn test_provider_only_uses_best_model() {
        let log = CallLog::default();

        let catalog = Catalog {
            models: vec![model("gpt-4", None, &["Wide"])],
            preferred_models: vec!["gpt-4".to_string(), "gpt-3.5-turbo".to_string()],
            ..Default::default()
        };

        let resolver = resolver_with(
            vec![
                (provider("Wide", &["zephyr", "gpt-3.5-turbo"]), MockProvider::new("Wide", &log)),
                (provider("Empty", &[]), MockProvider::new("Empty", &log)),
            ],
            catalog,
            10,
        );

        let completion = resolver.complete(&hi(), &pinned(None, Some("Wide"))).await.unwrap();
        assert_eq!(completion.model, "gpt-4");

        let err = resolver.complete(&hi(), &pinned(None, Some("Empty"))).await.unwrap_err();
        assert!(matches!(err, Error::NoModels(_)));
    }

    #[tokio::test]
    async fn test_pinned_provider_must_be_live() {
        let log = CallLog::default();
        let resolver = chain(
            &log,
            [
                Outcome::reply("a"),
                Outcome::reply("b"),
                Outcome::reply("c"),
            ],
            10,
        );

        resolver
            .registry()
            .replace_live(&BTreeSet::from(["B".to_string()]));

        for constraints in [pinned(None, Some("A")), pinned(Some("m1"), Some("A"))] {
            match resolver.complete(&hi(), &constraints).await.unwrap_err() {
                Error::UnknownProvider { provider, allowed } => {
                    assert_eq!(provider, "A");
                    assert_eq!(allowed, vec!["B"]);
                }
                err => panic!("unexpected error: {}", err),
            }
        }

        // A pinned model only needs some live provider
        let err = resolver.complete(&hi(), &pinned(Some("m1"), None)).await.unwrap_err();
        assert!(matches!(err, Error::Exhausted { attempts: 0, .. }));

        assert_eq!(log.len(), 0);
    }

    #[tokio::test]
    async fn test_model_only_follows_designated_provider() {
        let log = CallLog::default();

        let catalog = Catalog {
            models: vec![model("gpt-4", Some("OpenAI"), &["Designated", "Other"])],
            ..Default::default()
        };

        let mut eager = provider("Eager", &["gpt-4"]);
        eager.priority = 100;

        let resolver = resolver_with(
            vec![
                (provider("Designated", &[]), MockProvider::new("Designated", &log)),
                (eager, MockProvider::new("Eager", &log)),
            ],
            catalog,
            10,
        );

        let completion = resolver.complete(&hi(), &pinned(Some("gpt-4"), None)).await.unwrap();
        assert_eq!(completion.provider, "Designated");

        // Once the designated provider is down, the highest priority server is used
        resolver
            .registry()
            .replace_live(&BTreeSet::from(["Eager".to_string()]));

        let completion = resolver.complete(&hi(), &pinned(Some("gpt-4"), None)).await.unwrap();
        assert_eq!(completion.provider, "Eager");

        // Known, but nobody live serves it
        resolver.registry().replace_live(&BTreeSet::new());

        let err = resolver.complete(&hi(), &pinned(Some("gpt-4"), None)).await.unwrap_err();
        assert!(matches!(err, Error::Exhausted { attempts: 0, .. }));
    }

    #[tokio::test]
    async fn test_stream_restarts_on_failure() {
        let log = CallLog::default();
        let resolver = chain(
            &log,
            [
                Outcome::Broken(vec!["par".to_string()]),
                Outcome::fragments(&["he", "llo"]),
                Outcome::fail(),
            ],
            10,
        );

        let forwarded = Mutex::new(Vec::new());
        let completion = resolver
            .stream(&hi(), &Constraints::default(), |part| {
                forwarded.lock().unwrap().push(part.to_string())
            })
            .await
            .unwrap();

        assert_eq!(completion.text, "hello");
        assert_eq!(completion.provider, "B");
        assert_eq!(*forwarded.lock().unwrap(), vec!["par", "he", "llo"]);
    }

    #[tokio::test]
    async fn test_stream_exhaustion() {
        let log = CallLog::default();
        let resolver = chain(
            &log,
            [
                Outcome::fail(),
                Outcome::reply(""),
                Outcome::Broken(Vec::new()),
            ],
            3,
        );

        let err = resolver
            .stream(&hi(), &Constraints::default(), |_| {})
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Exhausted { attempts: 3, .. }));
        assert_eq!(log.len(), 3);
    }
}
