//! Traits and type definitions for chat completions and provider interactions.
//!
//! The `providers` module contains the components used to talk to the backends
//! the gateway fronts. Every backend implements the [`ChatProvider`] trait, which
//! is the only way the rest of the crate asks "provider P, complete these
//! messages with model M". The directory, prober and resolver treat it as an
//! opaque call that either yields text or fails.
//!
//! ## Chat Providers
//!
//! A chat provider must support one essential operation, a streamed completion,
//! which produces a lazy sequence of [`MessageDelta`] fragments. A buffered
//! completion is derived from it by default. Providers that can list their own
//! models may also implement [`ChatProvider::models`]; it is consulted once at
//! startup and merged into the directory.
//!
//! Providers are registered by name in a [`ProviderPool`], together with an
//! optional response [`Adapter`] that rewrites replies of backends known to
//! return mangled text.
//!
//! ## Error Handling
//!
//! Each backend has its own bespoke error system. These are encapsulated in
//! [`Error`], and the [`ErrorKind`] enum provides an indication of the category
//! of error that was raised. The resolver does not distinguish between kinds
//! when deciding whether to retry: every provider error is a failed attempt.

mod adapter;
mod apireq;
mod openai;
mod pool;

#[cfg(test)]
pub(crate) mod mock;

pub(crate) mod providers;

pub(crate) use adapter::Adapter;
pub(crate) use pool::ProviderPool;

use async_trait::async_trait;
use std::error::Error as StdError;
use std::fmt;

use crate::chat::Message;

/// This is a list specifying general categories of errors that
/// can be returned by a [`ChatProvider`]. This list may be updated
/// as providers are added.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ErrorKind {
    /// Failed to connect to the underlying API service.
    /// This could be due to network issues like DNS
    /// resolution, connectivity issues, or routing problems.
    Connection,
    /// A request timed out.
    TimedOut,
    /// An API key was not provided or service-specific
    /// permissions are needed.
    Authentication,
    /// A rate limit was reached or a quota was exceeded.
    ExcessUsage,
    /// The servers are overloaded. This is non-fatal
    /// and indicates that a retry may be needed later.
    ApiOverloaded,
    /// The requested resource was not found. This likely means that
    /// the model or the provider requested was not found.
    NotFound,
    /// The request was malformed or is otherwise improper. This
    /// often corresponds to errors with HTTP status codes in
    /// the 400s.
    BadRequest,
    /// The server encountered an error. This often corresponds to
    /// errors with HTTP status codes in the 500s.
    InternalError,
    /// An API response was unable to be deserialized, malformed,
    /// or otherwise violated the assumptions of the client.
    UnexpectedResponse,
    /// The completion finished without producing any text.
    EmptyResponse,
    /// An error that does not fit into any of the other categories.
    UnspecifiedError,
}

#[derive(Debug)]
pub(crate) struct Error {
    kind: ErrorKind,
    source: Option<Box<dyn StdError + Send + Sync>>,
}

impl Error {
    pub(crate) fn from_kind(kind: ErrorKind) -> Error {
        Error { kind, source: None }
    }

    pub(crate) fn from_source(kind: ErrorKind, source: Box<dyn StdError + Send + Sync>) -> Error {
        Error {
            kind,
            source: Some(source),
        }
    }

    pub(crate) fn kind(&self) -> ErrorKind {
        self.kind
    }

    fn message(&self) -> &'static str {
        match self.kind {
            ErrorKind::Connection => "failed to connect to the API service",
            ErrorKind::TimedOut => "request timed out",
            ErrorKind::Authentication => "authentication failed or not provided",
            ErrorKind::ExcessUsage => "rate limit exceeded or quota crossed",
            ErrorKind::ApiOverloaded => "API server(s) are currently overloaded",
            ErrorKind::NotFound => "the requested resource was not found",
            ErrorKind::BadRequest => "the request was bad or malformed",
            ErrorKind::InternalError => "the server encountered an internal error",
            ErrorKind::UnexpectedResponse => "API response was unexpected or malformed",
            ErrorKind::EmptyResponse => "the provider returned an empty response",
            ErrorKind::UnspecifiedError => "an unspecified error occurred",
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message())?;

        if let Some(source) = &self.source {
            write!(f, " ({})", source)?;
        }

        Ok(())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source.as_ref().map(|e| &**e as _)
    }
}

/// A message delta represents a "chunk" of a streamed message.
/// Usually, this consists of a single token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct MessageDelta {
    /// The content of the message.
    pub content: String,
}

/// A streamed response from a completion.
#[async_trait]
pub(crate) trait AsyncMessageIterator: Send {
    /// The next chunk of the message.
    async fn next(&mut self) -> Option<Result<MessageDelta, Error>>;
}

/// A trait implemented by all chat providers.
#[async_trait]
pub(crate) trait ChatProvider: Send + Sync {
    /// Returns the name the provider is registered under.
    fn name(&self) -> &str;

    /// Returns the models the provider reports serving, or `None` when the
    /// provider cannot enumerate them.
    async fn models(&self) -> Result<Option<Vec<String>>, Error> {
        Ok(None)
    }

    /// Takes a series of messages that are part of a chat conversation
    /// and produces a new message generated by the model in response.
    ///
    /// `model`: The id of the model.
    /// `messages`: A series of messages in the conversation.
    async fn stream_completion(
        &self,
        model: &str,
        messages: &[Message],
    ) -> Result<Box<dyn AsyncMessageIterator>, Error>;

    /// Buffers a whole completion.
    async fn completion(&self, model: &str, messages: &[Message]) -> Result<String, Error> {
        let mut stream = self.stream_completion(model, messages).await?;
        let mut text = String::new();

        while let Some(delta) = stream.next().await {
            text.push_str(&delta?.content);
        }

        Ok(text)
    }
}
