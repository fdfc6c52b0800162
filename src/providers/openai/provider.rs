use async_trait::async_trait;
use reqwest::IntoUrl;

use crate::chat::{Message, Role};
use crate::providers::openai::api;
use crate::providers::{AsyncMessageIterator, ChatProvider, Error, ErrorKind, MessageDelta};

impl From<api::Error> for Error {
    fn from(value: api::Error) -> Self {
        let kind = match &value {
            api::Error::Authentication(_) | api::Error::PermissionDenied(_) => {
                Some(ErrorKind::Authentication)
            }
            api::Error::BadRequest(_)
            | api::Error::InvalidApiBase(_)
            | api::Error::InvalidEndpoint(_)
            | api::Error::UnprocessableEntity(_) => Some(ErrorKind::BadRequest),
            // Request invalidated by a race condition
            api::Error::Conflict(_) => Some(ErrorKind::BadRequest),
            api::Error::InternalError(_) => Some(ErrorKind::InternalError),
            api::Error::NotFound(_) => Some(ErrorKind::NotFound),
            api::Error::RateLimit(_) => Some(ErrorKind::ExcessUsage),
            api::Error::UnknownStatus(_) => Some(ErrorKind::UnspecifiedError),
            api::Error::ApiOverloaded(_) => Some(ErrorKind::ApiOverloaded),

            api::Error::RequestFailed(_) | api::Error::StreamParser(_) => None,
        };

        match (kind, value) {
            (_, api::Error::RequestFailed(err)) => err.into(),
            (_, api::Error::StreamParser(err)) => err.into(),
            (Some(kind), value) => Error::from_source(kind, Box::new(value)),
            (None, value) => Error::from_source(ErrorKind::UnspecifiedError, Box::new(value)),
        }
    }
}

impl From<Role> for api::Role {
    fn from(value: Role) -> Self {
        match value {
            Role::Assistant => api::Role::Assistant,
            Role::System => api::Role::System,
            Role::User => api::Role::User,
        }
    }
}

/// A provider speaking the OpenAI chat completions protocol. Most of the
/// free and self-hosted backends do.
pub(crate) struct OpenAIProvider {
    name: String,
    api: api::OpenAIApi,
    enumerate_models: bool,
}

impl OpenAIProvider {
    pub(crate) fn new<U: IntoUrl>(
        name: &str,
        api_base: U,
        api_key: Option<String>,
    ) -> Result<OpenAIProvider, Error> {
        Ok(OpenAIProvider {
            name: name.to_string(),
            api: api::OpenAIApi::new(api_base, api_key)?,
            enumerate_models: false,
        })
    }

    /// Ask the backend's `models` route for the models it serves.
    pub(crate) fn enumerate_models(mut self, enumerate: bool) -> OpenAIProvider {
        self.enumerate_models = enumerate;
        self
    }
}

pub(crate) struct OpenAICompletionResponse {
    inner: api::StreamingChatResponse,
}

#[async_trait]
impl AsyncMessageIterator for OpenAICompletionResponse {
    async fn next(&mut self) -> Option<Result<MessageDelta, Error>> {
        loop {
            let chunk = match self.inner.next().await? {
                Ok(chunk) => chunk,
                Err(err) => return Some(Err(err.into())),
            };

            // Role announcements, finish reasons and usage carry no text
            let content: String = chunk
                .choices
                .into_iter()
                .filter_map(|choice| choice.delta.content)
                .collect();

            if content.is_empty() {
                continue;
            }

            return Some(Ok(MessageDelta { content }));
        }
    }
}

#[async_trait]
impl ChatProvider for OpenAIProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn models(&self) -> Result<Option<Vec<String>>, Error> {
        if !self.enumerate_models {
            return Ok(None);
        }

        Ok(Some(self.api.list_models().await?))
    }

    async fn stream_completion(
        &self,
        model: &str,
        messages: &[Message],
    ) -> Result<Box<dyn AsyncMessageIterator>, Error> {
        let messages: Vec<api::ChatMessage> = messages
            .iter()
            .map(|m| api::ChatMessage {
                role: m.role.into(),
                content: &m.content,
            })
            .collect();

        let inner = self.api.streaming_chat_completion(model, &messages).await?;

        Ok(Box::new(OpenAICompletionResponse { inner }))
    }
}
