//! A scripted provider used by tests in place of a real backend.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use super::{AsyncMessageIterator, ChatProvider, Error, ErrorKind, MessageDelta};
use crate::chat::Message;

#[derive(Debug, Clone)]
pub(crate) enum Outcome {
    /// Stream the fragments, then finish.
    Fragments(Vec<String>),
    /// Stream the fragments, then fail.
    Broken(Vec<String>),
    /// Fail before streaming anything.
    Fail(ErrorKind),
    /// Never answer.
    Hang,
}

impl Outcome {
    pub(crate) fn reply(text: &str) -> Outcome {
        Outcome::Fragments(vec![text.to_string()])
    }

    pub(crate) fn fragments(parts: &[&str]) -> Outcome {
        Outcome::Fragments(parts.iter().map(|s| s.to_string()).collect())
    }

    pub(crate) fn fail() -> Outcome {
        Outcome::Fail(ErrorKind::InternalError)
    }
}

#[derive(Debug, Clone)]
struct Call {
    provider: String,
    model: String,
    messages: Vec<Message>,
}

/// Records every completion request, across all the providers sharing it.
#[derive(Debug, Clone, Default)]
pub(crate) struct CallLog(Arc<Mutex<Vec<Call>>>);

impl CallLog {
    fn record(&self, provider: &str, model: &str, messages: &[Message]) {
        self.0.lock().unwrap().push(Call {
            provider: provider.to_string(),
            model: model.to_string(),
            messages: messages.to_vec(),
        });
    }

    /// The (provider, model) pair of every request.
    pub(crate) fn calls(&self) -> Vec<(String, String)> {
        self.0
            .lock()
            .unwrap()
            .iter()
            .map(|c| (c.provider.clone(), c.model.clone()))
            .collect()
    }

    /// The conversation sent with every request.
    pub(crate) fn messages(&self) -> Vec<Vec<Message>> {
        self.0
            .lock()
            .unwrap()
            .iter()
            .map(|c| c.messages.clone())
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.0.lock().unwrap().len()
    }
}

pub(crate) struct MockProvider {
    name: String,
    log: CallLog,
    otherwise: Outcome,
    models: Option<Vec<String>>,
}

impl MockProvider {
    pub(crate) fn new(name: &str, log: &CallLog) -> MockProvider {
        MockProvider {
            name: name.to_string(),
            log: log.clone(),
            otherwise: Outcome::reply("response"),
            models: None,
        }
    }

    /// The outcome of every call.
    pub(crate) fn otherwise(mut self, outcome: Outcome) -> MockProvider {
        self.otherwise = outcome;
        self
    }

    pub(crate) fn with_models(mut self, models: &[&str]) -> MockProvider {
        self.models = Some(models.iter().map(|s| s.to_string()).collect());
        self
    }
}

struct ScriptedStream {
    fragments: VecDeque<String>,
    fail_at_end: bool,
}

#[async_trait]
impl AsyncMessageIterator for ScriptedStream {
    async fn next(&mut self) -> Option<Result<MessageDelta, Error>> {
        match self.fragments.pop_front() {
            Some(content) => Some(Ok(MessageDelta { content })),
            None if self.fail_at_end => {
                self.fail_at_end = false;
                Some(Err(Error::from_kind(ErrorKind::Connection)))
            }
            None => None,
        }
    }
}

#[async_trait]
impl ChatProvider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn models(&self) -> Result<Option<Vec<String>>, Error> {
        Ok(self.models.clone())
    }

    async fn stream_completion(
        &self,
        model: &str,
        messages: &[Message],
    ) -> Result<Box<dyn AsyncMessageIterator>, Error> {
        self.log.record(&self.name, model, messages);

        let (fragments, fail_at_end) = match self.otherwise.clone() {
            Outcome::Fragments(fragments) => (fragments, false),
            Outcome::Broken(fragments) => (fragments, true),
            Outcome::Fail(kind) => return Err(Error::from_kind(kind)),
            Outcome::Hang => std::future::pending().await,
        };

        Ok(Box::new(ScriptedStream {
            fragments: fragments.into(),
            fail_at_end,
        }))
    }
}
