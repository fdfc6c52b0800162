//! The set of instantiated providers, addressable by name.

use std::collections::HashMap;
use std::sync::Arc;

use super::{Adapter, AsyncMessageIterator, ChatProvider, Error, ErrorKind};
use crate::chat::Message;

struct PoolEntry {
    provider: Arc<dyn ChatProvider>,
    adapter: Adapter,
}

/// Providers keyed by name. The pool is built once at startup and shared
/// read-only afterwards.
#[derive(Default)]
pub(crate) struct ProviderPool {
    entries: HashMap<String, PoolEntry>,
}

impl ProviderPool {
    pub(crate) fn new() -> ProviderPool {
        ProviderPool::default()
    }

    pub(crate) fn insert(&mut self, provider: Arc<dyn ChatProvider>, adapter: Adapter) {
        let name = provider.name().to_string();

        if self
            .entries
            .insert(name.clone(), PoolEntry { provider, adapter })
            .is_some()
        {
            tracing::warn!("provider \"{}\" registered twice, keeping the last one", name);
        }
    }

    pub(crate) fn get(&self, name: &str) -> Option<&Arc<dyn ChatProvider>> {
        self.entries.get(name).map(|ent| &ent.provider)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    fn entry(&self, name: &str) -> Result<&PoolEntry, Error> {
        self.entries.get(name).ok_or_else(|| {
            Error::from_source(
                ErrorKind::NotFound,
                format!("provider \"{}\" has no backend", name).into(),
            )
        })
    }

    /// Ask `provider` to complete `messages` with `model`, buffering the reply.
    pub(crate) async fn completion(
        &self,
        provider: &str,
        model: &str,
        messages: &[Message],
    ) -> Result<String, Error> {
        let ent = self.entry(provider)?;
        let text = ent.provider.completion(model, messages).await?;

        Ok(ent.adapter.apply(text))
    }

    /// Ask `provider` to stream a completion of `messages` with `model`.
    pub(crate) async fn stream_completion(
        &self,
        provider: &str,
        model: &str,
        messages: &[Message],
    ) -> Result<Box<dyn AsyncMessageIterator>, Error> {
        let ent = self.entry(provider)?;
        let stream = ent.provider.stream_completion(model, messages).await?;

        Ok(ent.adapter.wrap(stream))
    }
}
